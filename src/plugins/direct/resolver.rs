use crate::engine::model::{LinkInput, Resolution, ResolvedTarget};
use crate::engine::naming::title_based_name;
use crate::plugins::registry::LinkResolver;
use url::Url;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

/// Links that already point at an image file are their own direct URL.
pub struct DirectImageResolver;

impl DirectImageResolver {
    pub fn new() -> Self {
        Self
    }

    fn image_file_name(u: &Url) -> Option<String> {
        let last = u.path_segments()?.last().filter(|s| !s.is_empty())?;
        let (_, ext) = last.rsplit_once('.')?;
        if IMAGE_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
            Some(last.to_string())
        } else {
            None
        }
    }
}

impl Default for DirectImageResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkResolver for DirectImageResolver {
    fn name(&self) -> &'static str {
        "direct-image-resolver"
    }

    fn can_handle(&self, input: &LinkInput) -> u8 {
        match Url::parse(&input.url) {
            Ok(u) if matches!(u.scheme(), "http" | "https") && Self::image_file_name(&u).is_some() => 40,
            _ => 0,
        }
    }

    fn resolve(&self, input: &LinkInput) -> Resolution {
        let Ok(u) = Url::parse(&input.url) else {
            return Resolution::NoMatch;
        };
        let Some(file_name) = Self::image_file_name(&u) else {
            return Resolution::NoMatch;
        };

        let suggested_file_name = match input.post_title.as_deref() {
            Some(title) if !title.trim().is_empty() => title_based_name(title, &input.url, input.index),
            _ => file_name,
        };

        Resolution::Target(ResolvedTarget { direct_url: input.url.clone(), suggested_file_name })
    }
}
