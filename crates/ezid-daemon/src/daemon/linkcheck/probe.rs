use crate::daemon::config::LinkCheckConfig;
use bytes::BytesMut;
use ezid::{CONTENT_SAMPLE_LEN, CheckResult};
use reqwest::{StatusCode, header::CONTENT_TYPE, redirect};
use std::time::Duration;

/// Redirects followed before a target counts as unreachable.
const MAX_REDIRECTS: usize = 10;

/// Issues the GET behind one link check.
///
/// Redirects are followed and cookies kept for the life of one check, since
/// some sites bounce a cookieless client through a login redirect. Each
/// check starts with an empty jar.
pub struct LinkProbe {
    timeout: Duration,
    user_agent: String,
    max_read: usize,
}

impl LinkProbe {
    pub fn new(config: &LinkCheckConfig) -> anyhow::Result<Self> {
        let probe = Self {
            timeout: config.check_timeout,
            user_agent: config.user_agent.clone(),
            max_read: config.max_read,
        };
        probe.client()?;
        Ok(probe)
    }

    fn client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str())
            .cookie_store(true)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()
    }

    /// Checks one URL.
    ///
    /// 200 is success, and so are 401 and 403: the server answered and only
    /// credentials stand between the user and the content. A body cut off
    /// mid-read still counts if what arrived is HTML. Everything else fails.
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn check(&self, url: &str) -> CheckResult {
        let http = match self.client() {
            Ok(http) => http,
            Err(e) => return CheckResult::failed(None, describe(&e)),
        };
        let mut resp = match http.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                let code = e.status().map(|s| i32::from(s.as_u16()));
                return CheckResult::failed(code, describe(&e));
            }
        };

        let status = resp.status();
        let code = Some(i32::from(status.as_u16()));
        let mime_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_owned();

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return CheckResult {
                success: true,
                return_code: code,
                mime_type,
                ..CheckResult::default()
            };
        }
        if status != StatusCode::OK {
            return CheckResult {
                mime_type,
                ..CheckResult::failed(code, format!("HTTP {status}"))
            };
        }

        let mut body = BytesMut::new();
        loop {
            match resp.chunk().await {
                Ok(Some(chunk)) => {
                    let room = self.max_read - body.len();
                    body.extend_from_slice(&chunk[..chunk.len().min(room)]);
                    if body.len() >= self.max_read {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) if looks_like_html(&mime_type, &body) => {
                    tracing::debug!(url, error = %e, "partial HTML body accepted");
                    break;
                }
                Err(e) => {
                    return CheckResult {
                        mime_type,
                        ..CheckResult::failed(code, format!("incomplete read: {}", describe(&e)))
                    };
                }
            }
        }

        body.truncate(CONTENT_SAMPLE_LEN);
        CheckResult {
            success: true,
            return_code: code,
            mime_type,
            content_sample: body.to_vec(),
            error: String::new(),
        }
    }
}

fn describe(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "timed out".to_owned()
    } else if e.is_redirect() {
        format!("too many redirects: {e}")
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else {
        e.to_string()
    }
}

/// Whether a (possibly partial) body is an HTML document.
pub fn looks_like_html(mime_type: &str, body: &[u8]) -> bool {
    if mime_type.to_ascii_lowercase().contains("html") {
        return true;
    }
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map_or(&body[..0], |i| &body[i..]);
    let head = &start[..start.len().min(16)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn probe(max_read: usize) -> LinkProbe {
        let config = LinkCheckConfig {
            table_update_cycle: 0,
            results_upload_cycle: 0,
            good_recheck_min_interval: 0,
            bad_recheck_min_interval: 0,
            owner_revisit_min_interval: Duration::ZERO,
            notification_threshold: 7,
            workers: 1,
            owner_max_links: 10,
            check_timeout: Duration::from_secs(5),
            user_agent: "ezid-linkcheck-test".into(),
            max_read,
            exclusion_file: None,
            idle_sleep: Duration::from_secs(1),
        };
        LinkProbe::new(&config).unwrap()
    }

    #[tokio::test]
    async fn ok_page_is_sampled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header("user-agent", "ezid-linkcheck-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html>hello world</html>"),
            )
            .mount(&server)
            .await;

        let result = probe(1024).check(&format!("{}/page", server.uri())).await;
        assert!(result.success);
        assert_eq!(result.return_code, Some(200));
        assert_eq!(result.mime_type, "text/html");
        assert_eq!(result.content_sample, b"<html>hello world</html>");
    }

    #[tokio::test]
    async fn read_stops_at_the_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(100)))
            .mount(&server)
            .await;

        let result = probe(10).check(&server.uri()).await;
        assert!(result.success);
        assert_eq!(result.content_sample.len(), 10);
    }

    #[tokio::test]
    async fn credential_gates_count_as_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/private"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let probe = probe(1024);
        for page in ["/private", "/login"] {
            let result = probe.check(&format!("{}{page}", server.uri())).await;
            assert!(result.success, "{page}");
        }
    }

    #[tokio::test]
    async fn missing_and_broken_pages_fail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/error"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let probe = probe(1024);
        let missing = probe.check(&format!("{}/missing", server.uri())).await;
        assert!(!missing.success);
        assert_eq!(missing.return_code, Some(404));
        assert_eq!(missing.error, "HTTP 404 Not Found");

        let broken = probe.check(&format!("{}/error", server.uri())).await;
        assert_eq!(broken.return_code, Some(500));
    }

    #[tokio::test]
    async fn redirects_are_followed_with_cookies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "/landing")
                    .insert_header("set-cookie", "session=1; Path=/"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/landing"))
            .and(header("cookie", "session=1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("landed"))
            .mount(&server)
            .await;

        let result = probe(1024).check(&format!("{}/start", server.uri())).await;
        assert!(result.success, "{}", result.error);
        assert_eq!(result.content_sample, b"landed");
    }

    #[tokio::test]
    async fn cookies_do_not_carry_over_between_checks() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header_exists("cookie"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/first"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "session=1; Path=/"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/second"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let probe = probe(1024);
        assert!(probe.check(&format!("{}/first", server.uri())).await.success);
        let second = probe.check(&format!("{}/second", server.uri())).await;
        assert!(second.success, "{}", second.error);
    }

    #[test]
    fn html_detection() {
        assert!(looks_like_html("text/html; charset=utf-8", b""));
        assert!(looks_like_html("", b"  \n<!DOCTYPE html><html>"));
        assert!(looks_like_html("application/octet-stream", b"<HTML><body>"));
        assert!(!looks_like_html("application/pdf", b"%PDF-1.7"));
        assert!(!looks_like_html("", b""));
    }
}
