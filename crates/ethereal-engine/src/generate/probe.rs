use std::io::Cursor;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCESS_CONTROL_ALLOW_ORIGIN, ORIGIN};

/// How strictly a preload is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Cross-origin load: the host must allow any origin.
    Anonymous,
    /// Plain load without the cross-origin requirement.
    Relaxed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHit {
    pub format: String,
    pub dimensions: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("timed out after {}ms loading {url}", after.as_millis())]
    Timeout { url: String, after: Duration },
    #[error("failed to load {url}: {reason}")]
    Failed { url: String, reason: String },
}

impl ProbeError {
    pub fn failed(url: &str, reason: impl Into<String>) -> Self {
        Self::Failed {
            url: url.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Loads a URL the way an `<img>` element would and reports whether it
/// produced a decodable image.
pub trait ImageProbe: Send + Sync {
    fn probe(&self, url: &str, mode: ProbeMode, timeout: Duration) -> Result<ProbeHit, ProbeError>;
}

/// `Origin` sent with anonymous loads.
const PROBE_ORIGIN: &str = "http://localhost";

pub struct HttpImageProbe {
    http: HttpClient,
}

impl HttpImageProbe {
    pub fn new() -> Self {
        Self::with_client(HttpClient::new())
    }

    pub fn with_client(http: HttpClient) -> Self {
        Self { http }
    }
}

impl Default for HttpImageProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProbe for HttpImageProbe {
    fn probe(&self, url: &str, mode: ProbeMode, timeout: Duration) -> Result<ProbeHit, ProbeError> {
        if let Some(payload) = url.strip_prefix("data:") {
            let bytes = decode_data_uri(payload).map_err(|reason| ProbeError::failed(url, reason))?;
            return sniff_image(&bytes).ok_or_else(|| ProbeError::failed(url, "data is not an image"));
        }

        let mut request = self.http.get(url).timeout(timeout);
        if mode == ProbeMode::Anonymous {
            request = request.header(ORIGIN, PROBE_ORIGIN);
        }
        let response = request.send().map_err(|err| classify(url, timeout, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProbeError::failed(url, format!("status {}", status.as_u16())));
        }
        if mode == ProbeMode::Anonymous && !response.headers().contains_key(ACCESS_CONTROL_ALLOW_ORIGIN) {
            return Err(ProbeError::failed(url, "missing Access-Control-Allow-Origin"));
        }

        let bytes = response.bytes().map_err(|err| classify(url, timeout, err))?;
        sniff_image(&bytes).ok_or_else(|| ProbeError::failed(url, "response body is not an image"))
    }
}

fn classify(url: &str, timeout: Duration, err: reqwest::Error) -> ProbeError {
    if err.is_timeout() {
        return ProbeError::Timeout {
            url: url.to_string(),
            after: timeout,
        };
    }
    ProbeError::failed(url, err.to_string())
}

/// Splits `mime;base64,payload` and decodes the payload.
pub(crate) fn decode_data_uri(payload: &str) -> Result<Vec<u8>, String> {
    let Some((meta, data)) = payload.split_once(',') else {
        return Err("data URI has no payload".to_string());
    };
    if !meta.ends_with(";base64") {
        return Err("only base64 data URIs are supported".to_string());
    }
    BASE64
        .decode(data.trim().as_bytes())
        .map_err(|err| format!("invalid base64 payload: {err}"))
}

pub(crate) fn sniff_image(bytes: &[u8]) -> Option<ProbeHit> {
    let format = image::guess_format(bytes).ok()?;
    let dimensions = image::ImageReader::with_format(Cursor::new(bytes), format)
        .into_dimensions()
        .ok();
    Some(ProbeHit {
        format: format!("{format:?}").to_ascii_lowercase(),
        dimensions,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;
    use std::time::Duration;

    use base64::engine::general_purpose::STANDARD as BASE64;
    use base64::Engine as _;
    use image::{ImageFormat, Rgb, RgbImage};
    use reqwest::blocking::Client as HttpClient;
    use tokio::runtime::Runtime;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{sniff_image, HttpImageProbe, ImageProbe, ProbeMode};

    pub(crate) fn png_bytes(width: u32, height: u32) -> anyhow::Result<Vec<u8>> {
        let mut out = Cursor::new(Vec::new());
        RgbImage::from_pixel(width, height, Rgb([99, 102, 241])).write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    /// Local image host:
    /// `/cors.png` allows any origin, `/plain.png` sends no CORS header,
    /// `/page` is HTML. Anything else is a 404.
    pub(crate) struct ImageHost {
        server: MockServer,
        _runtime: Runtime,
    }

    impl ImageHost {
        pub fn start() -> anyhow::Result<Self> {
            let runtime = Runtime::new()?;
            let server = runtime.block_on(MockServer::start());
            let png = png_bytes(4, 3)?;
            runtime.block_on(async {
                Mock::given(method("GET"))
                    .and(path("/cors.png"))
                    .respond_with(
                        ResponseTemplate::new(200)
                            .insert_header("access-control-allow-origin", "*")
                            .set_body_raw(png.clone(), "image/png"),
                    )
                    .mount(&server)
                    .await;
                Mock::given(method("GET"))
                    .and(path("/plain.png"))
                    .respond_with(ResponseTemplate::new(200).set_body_raw(png.clone(), "image/png"))
                    .mount(&server)
                    .await;
                Mock::given(method("GET"))
                    .and(path("/page"))
                    .respond_with(
                        ResponseTemplate::new(200)
                            .insert_header("access-control-allow-origin", "*")
                            .set_body_raw("<html>rate limited</html>", "text/html"),
                    )
                    .mount(&server)
                    .await;
            });
            Ok(Self {
                server,
                _runtime: runtime,
            })
        }

        pub fn url(&self, route: &str) -> String {
            format!("{}{route}", self.server.uri())
        }
    }

    pub(crate) fn local_client() -> anyhow::Result<HttpClient> {
        Ok(HttpClient::builder().no_proxy().build()?)
    }

    #[test]
    fn sniff_reports_format_and_dimensions() -> anyhow::Result<()> {
        let hit = sniff_image(&png_bytes(3, 2)?);
        assert_eq!(hit.as_ref().map(|hit| hit.format.as_str()), Some("png"));
        assert_eq!(hit.and_then(|hit| hit.dimensions), Some((3, 2)));
        assert!(sniff_image(b"<html>not an image</html>").is_none());
        Ok(())
    }

    #[test]
    fn data_uri_is_checked_locally() -> anyhow::Result<()> {
        let probe = HttpImageProbe::new();
        let uri = format!("data:image/png;base64,{}", BASE64.encode(png_bytes(1, 1)?));
        let hit = probe.probe(&uri, ProbeMode::Anonymous, Duration::from_millis(10));
        assert!(hit.is_ok());

        let bad = probe.probe("data:text/plain;base64,aGVsbG8=", ProbeMode::Relaxed, Duration::from_millis(10));
        assert!(bad.is_err_and(|err| !err.is_timeout()));
        Ok(())
    }

    #[test]
    fn unreachable_host_is_a_failure_not_a_timeout() {
        let probe = HttpImageProbe::new();
        let result = probe.probe(
            "http://127.0.0.1:9/image.png",
            ProbeMode::Relaxed,
            Duration::from_secs(5),
        );
        assert!(result.is_err_and(|err| !err.is_timeout()));
    }

    #[test]
    fn served_image_loads_in_both_modes() -> anyhow::Result<()> {
        let host = ImageHost::start()?;
        let probe = HttpImageProbe::with_client(local_client()?);
        let url = host.url("/cors.png");

        for mode in [ProbeMode::Anonymous, ProbeMode::Relaxed] {
            let hit = probe.probe(&url, mode, Duration::from_secs(5))?;
            assert_eq!(hit.format, "png");
            assert_eq!(hit.dimensions, Some((4, 3)));
        }
        Ok(())
    }

    #[test]
    fn missing_cors_header_only_fails_anonymous_loads() -> anyhow::Result<()> {
        let host = ImageHost::start()?;
        let probe = HttpImageProbe::with_client(local_client()?);
        let url = host.url("/plain.png");

        let anonymous = probe.probe(&url, ProbeMode::Anonymous, Duration::from_secs(5));
        assert!(anonymous.is_err_and(|err| err.to_string().contains("Access-Control-Allow-Origin")));
        let relaxed = probe.probe(&url, ProbeMode::Relaxed, Duration::from_secs(5))?;
        assert_eq!(relaxed.format, "png");
        Ok(())
    }

    #[test]
    fn error_status_and_html_bodies_are_rejected() -> anyhow::Result<()> {
        let host = ImageHost::start()?;
        let probe = HttpImageProbe::with_client(local_client()?);

        let missing = probe.probe(&host.url("/gone.png"), ProbeMode::Relaxed, Duration::from_secs(5));
        assert!(missing.is_err_and(|err| err.to_string().contains("status 404")));

        let page = probe.probe(&host.url("/page"), ProbeMode::Anonymous, Duration::from_secs(5));
        assert!(page.is_err_and(|err| !err.is_timeout() && err.to_string().contains("not an image")));
        Ok(())
    }
}
