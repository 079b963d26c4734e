use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, REFERER, USER_AGENT};
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use crate::engine::model::{FetchMethod, FetchRequest};
use crate::engine::naming::PARTIAL_SUFFIX;
use crate::plugins::registry::{FetchContext, FetchError, TransferDriver};

pub struct HttpDriver {
    client: reqwest::Client,
}

impl HttpDriver {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }

    fn build_headers(req: &FetchRequest, ctx: &FetchContext) -> Result<HeaderMap, FetchError> {
        fn value(name: &str, v: &str) -> Result<HeaderValue, FetchError> {
            HeaderValue::from_str(v).map_err(|e| FetchError::InvalidHeader {
                name: name.to_string(),
                message: e.to_string(),
            })
        }

        let mut h = HeaderMap::new();
        h.insert(USER_AGENT, value("User-Agent", &ctx.user_agent)?);
        h.insert(REFERER, value("Referer", &req.referer)?);

        if let Some(cookie) = ctx.cookies.as_ref().and_then(|c| c.cookie_header()) {
            h.insert(COOKIE, value("Cookie", &cookie)?);
        }

        for (k, v) in &req.headers {
            let name = HeaderName::from_bytes(k.as_bytes()).map_err(|e| FetchError::InvalidHeader {
                name: k.clone(),
                message: e.to_string(),
            })?;
            h.insert(name, value(k, v)?);
        }
        Ok(h)
    }

    fn partial_path(dest: &Path) -> PathBuf {
        let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(PARTIAL_SUFFIX);
        dest.with_file_name(name)
    }

    async fn stream_to(
        &self,
        req: &FetchRequest,
        ctx: &FetchContext,
        partial: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        let headers = Self::build_headers(req, ctx)?;
        let builder = match ctx.method {
            FetchMethod::Get => self.client.get(&req.direct_url),
            FetchMethod::Post => self.client.post(&req.direct_url),
        };

        // the timeout covers the whole transfer, body included
        let send = builder.headers(headers).timeout(ctx.timeout).send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            r = send => r?,
        };

        if !resp.status().is_success() {
            return Err(FetchError::Status(resp.status()));
        }

        let mut file = BufWriter::new(File::create(partial).await?);
        let mut stream = resp.bytes_stream();
        let mut written = 0u64;

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                c = stream.next() => c,
            };
            match chunk {
                Some(bytes) => {
                    let bytes = bytes?;
                    file.write_all(&bytes).await?;
                    written += bytes.len() as u64;
                }
                None => break,
            }
        }

        file.flush().await?;
        Ok(written)
    }
}

#[async_trait]
impl TransferDriver for HttpDriver {
    fn name(&self) -> &'static str {
        "http-driver"
    }

    fn supports(&self, direct_url: &str) -> bool {
        direct_url.starts_with("http://") || direct_url.starts_with("https://")
    }

    async fn fetch_to_file(
        &self,
        req: &FetchRequest,
        ctx: &FetchContext,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, FetchError> {
        let partial = Self::partial_path(dest);
        tracing::debug!(source = %req.source_url, direct_url = %req.direct_url, "http fetch");

        let result = match self.stream_to(req, ctx, &partial, cancel).await {
            Ok(n) => tokio::fs::rename(&partial, dest).await.map(|_| n).map_err(FetchError::from),
            Err(e) => Err(e),
        };

        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&partial).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %partial.display(), error = %e, "failed to remove partial file");
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::registry::StaticCookie;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn request() -> FetchRequest {
        FetchRequest {
            source_url: "http://www.glowfoto.com/viewimage.php?img=a".into(),
            direct_url: "http://www.glowfoto.com/images/a.jpg".into(),
            referer: "http://www.glowfoto.com/viewimage.php?img=a".into(),
            headers: HashMap::from([("X-Extra".to_string(), "1".to_string())]),
        }
    }

    #[test]
    fn test_build_headers() {
        let ctx = FetchContext {
            cookies: Some(Arc::new(StaticCookie("sid=1".into()))),
            ..Default::default()
        };
        let h = HttpDriver::build_headers(&request(), &ctx).unwrap();

        assert_eq!(h.get(REFERER).unwrap(), "http://www.glowfoto.com/viewimage.php?img=a");
        assert_eq!(h.get(USER_AGENT).unwrap(), crate::plugins::registry::DEFAULT_USER_AGENT);
        assert_eq!(h.get(COOKIE).unwrap(), "sid=1");
        assert_eq!(h.get("x-extra").unwrap(), "1");
    }

    #[test]
    fn test_build_headers_rejects_bad_value() {
        let mut req = request();
        req.referer = "bad\nvalue".into();
        let err = HttpDriver::build_headers(&req, &FetchContext::default()).unwrap_err();
        assert!(matches!(err, FetchError::InvalidHeader { .. }));
    }

    #[test]
    fn test_partial_path() {
        assert_eq!(
            HttpDriver::partial_path(Path::new("/d/abc42L.jpg")),
            PathBuf::from("/d/abc42L.jpg.part")
        );
    }
}
