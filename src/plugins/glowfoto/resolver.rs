use crate::engine::model::{LinkInput, Resolution, ResolvedTarget};
use crate::plugins::registry::LinkResolver;
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use url::Url;

const HOST: &str = "glowfoto.com";
const DEFAULT_SERVER: &str = "www";

/// glowfoto.com viewer pages carry the image coordinates in the query string:
/// `?img=..&y=..&m=..&t=..&rand=..[&srv=..]`.
pub struct GlowFotoResolver;

impl GlowFotoResolver {
    pub fn new() -> Self {
        Self
    }

    fn is_glowfoto_host(host: &str) -> bool {
        host.eq_ignore_ascii_case(HOST)
            || host.to_ascii_lowercase().ends_with(".glowfoto.com")
    }

    fn server_label(srv: Option<&str>) -> &str {
        static LABEL: OnceLock<Regex> = OnceLock::new();
        let re = LABEL.get_or_init(|| Regex::new(r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?$").expect("valid server label pattern"));

        match srv {
            Some(s) if re.is_match(s) => s,
            _ => DEFAULT_SERVER,
        }
    }

    fn is_digits(s: &str) -> bool {
        !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
    }
}

impl Default for GlowFotoResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkResolver for GlowFotoResolver {
    fn name(&self) -> &'static str {
        "glowfoto-resolver"
    }

    fn can_handle(&self, input: &LinkInput) -> u8 {
        match Url::parse(&input.url) {
            Ok(u) if u.host_str().map(Self::is_glowfoto_host).unwrap_or(false) => 90,
            _ => 0,
        }
    }

    fn resolve(&self, input: &LinkInput) -> Resolution {
        let Ok(url) = Url::parse(&input.url) else {
            return Resolution::NoMatch;
        };

        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let field = |k: &str| query.get(k).map(String::as_str);

        let (Some(img), Some(year), Some(month), Some(ext), Some(rand)) =
            (field("img"), field("y"), field("m"), field("t"), field("rand"))
        else {
            return Resolution::NoMatch;
        };

        if img.is_empty()
            || ext.is_empty()
            || !Self::is_digits(year)
            || !Self::is_digits(month)
            || !Self::is_digits(rand)
        {
            return Resolution::NoMatch;
        }

        let server = Self::server_label(field("srv"));
        let file_name = format!("{}{}L.{}", img, rand, ext);

        Resolution::Target(ResolvedTarget {
            direct_url: format!("http://{}.{}/images/{}/{}/{}", server, HOST, year, month, file_name),
            suggested_file_name: file_name,
        })
    }
}
