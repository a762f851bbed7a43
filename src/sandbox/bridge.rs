//! Host side of the capabilities a program can reach: outbound HTTP and URL
//! parsing. Both speak JSON strings across the isolate boundary.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::SandboxLimits;

const USER_AGENT: &str = "harvest/0.1 (+collector)";
const MAX_REDIRECTS: usize = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("fetch call limit of {0} exceeded")]
    CallLimit(u32),

    #[error("invalid request options: {0}")]
    InvalidRequest(String),

    #[error("invalid URL {0}")]
    InvalidUrl(String),

    #[error("unsupported URL scheme '{0}' (only http and https are allowed)")]
    UnsupportedScheme(String),

    #[error("response exceeded the {limit} byte limit")]
    ResponseTooLarge { limit: usize },

    #[error("request timed out")]
    Timeout,

    #[error("run time budget exhausted")]
    BudgetExhausted,

    #[error("{0}")]
    Transport(String),
}

/// A request as handed to the transport, already validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRequest {
    pub url: String,
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
}

/// Per-call limits derived from the run's limits and remaining time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallBudget {
    pub timeout: Duration,
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub status_text: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

#[cfg_attr(test, mockall::automock)]
pub trait HttpTransport: Send + Sync {
    fn send(
        &self,
        request: &BridgeRequest,
        budget: &CallBudget,
    ) -> Result<TransportResponse, BridgeError>;
}

/// Blocking reqwest transport. A client is built per call because calls
/// happen on the sandbox's blocking thread with their own timeout.
pub struct ReqwestTransport;

impl HttpTransport for ReqwestTransport {
    fn send(
        &self,
        request: &BridgeRequest,
        budget: &CallBudget,
    ) -> Result<TransportResponse, BridgeError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(budget.timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| BridgeError::InvalidRequest(format!("bad method {}", request.method)))?;

        let mut builder = client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                BridgeError::Timeout
            } else {
                BridgeError::Transport(e.to_string())
            }
        })?;

        if let Some(length) = response.content_length() {
            if length > budget.max_bytes as u64 {
                return Err(BridgeError::ResponseTooLarge {
                    limit: budget.max_bytes,
                });
            }
        }

        let status = response.status();
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let mut body = Vec::new();
        response
            .take(budget.max_bytes as u64 + 1)
            .read_to_end(&mut body)
            .map_err(|e| BridgeError::Transport(e.to_string()))?;

        Ok(TransportResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            url,
            headers,
            body,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct FetchInit {
    method: Option<String>,
    headers: Option<BTreeMap<String, String>>,
    body: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchReply {
    ok: bool,
    status: u16,
    status_text: String,
    url: String,
    headers: BTreeMap<String, String>,
    body: String,
}

/// Enforces the per-run fetch limits in front of a transport.
pub struct FetchBridge {
    transport: Arc<dyn HttpTransport>,
    max_calls: u32,
    max_response_bytes: usize,
    call_timeout: Duration,
    deadline: Instant,
    calls: AtomicU32,
}

impl FetchBridge {
    pub fn new(transport: Arc<dyn HttpTransport>, limits: &SandboxLimits, deadline: Instant) -> Self {
        Self {
            transport,
            max_calls: limits.max_fetch_calls,
            max_response_bytes: limits.max_response_bytes,
            call_timeout: limits.fetch_timeout,
            deadline,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls_made(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Entry point for `__host_fetch`. Always answers with a JSON string.
    pub fn handle(&self, url: &str, init_json: &str) -> String {
        match self.dispatch(url, init_json) {
            Ok(reply) => serde_json::to_string(&reply)
                .unwrap_or_else(|e| error_json(&e.to_string())),
            Err(e) => {
                debug!("Refused fetch of {}: {}", url, e);
                error_json(&e.to_string())
            }
        }
    }

    fn dispatch(&self, url: &str, init_json: &str) -> Result<FetchReply, BridgeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call > self.max_calls {
            return Err(BridgeError::CallLimit(self.max_calls));
        }

        let init: FetchInit = if init_json.trim().is_empty() {
            FetchInit::default()
        } else {
            serde_json::from_str(init_json)
                .map_err(|e| BridgeError::InvalidRequest(e.to_string()))?
        };

        let parsed = Url::parse(url).map_err(|e| BridgeError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(BridgeError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(BridgeError::BudgetExhausted);
        }

        let budget = CallBudget {
            timeout: self.call_timeout.min(remaining),
            max_bytes: self.max_response_bytes,
        };
        let request = BridgeRequest {
            url: parsed.to_string(),
            method: init
                .method
                .map(|m| m.to_uppercase())
                .unwrap_or_else(|| "GET".to_string()),
            headers: init.headers.unwrap_or_default(),
            body: init.body,
        };

        debug!("fetch #{} {} {}", call, request.method, request.url);
        let response = self.transport.send(&request, &budget)?;
        if response.body.len() > budget.max_bytes {
            return Err(BridgeError::ResponseTooLarge {
                limit: budget.max_bytes,
            });
        }

        Ok(FetchReply {
            ok: (200..300).contains(&response.status),
            status: response.status,
            status_text: response.status_text,
            url: if response.url.is_empty() {
                request.url
            } else {
                response.url
            },
            headers: response.headers,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        })
    }
}

fn error_json(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}

/// Entry point for `__host_parse_url`. An empty `base` means none.
pub fn parse_url(input: &str, base: &str) -> String {
    let parsed = if base.is_empty() {
        Url::parse(input)
    } else {
        Url::parse(base).and_then(|b| b.join(input))
    };

    match parsed {
        Ok(url) => {
            let hostname = url.host_str().unwrap_or("").to_string();
            let port = url.port().map(|p| p.to_string()).unwrap_or_default();
            let host = if port.is_empty() {
                hostname.clone()
            } else {
                format!("{hostname}:{port}")
            };

            serde_json::json!({
                "href": url.as_str(),
                "protocol": format!("{}:", url.scheme()),
                "username": url.username(),
                "password": url.password().unwrap_or(""),
                "host": host,
                "hostname": hostname,
                "port": port,
                "pathname": url.path(),
                "search": url.query().filter(|q| !q.is_empty()).map(|q| format!("?{q}")).unwrap_or_default(),
                "hash": url.fragment().filter(|f| !f.is_empty()).map(|f| format!("#{f}")).unwrap_or_default(),
                "origin": url.origin().ascii_serialization(),
            })
            .to_string()
        }
        Err(e) => error_json(&format!("{input}: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn limits(max_calls: u32, max_bytes: usize) -> SandboxLimits {
        SandboxLimits {
            max_fetch_calls: max_calls,
            max_response_bytes: max_bytes,
            ..SandboxLimits::default()
        }
    }

    fn bridge(transport: MockHttpTransport, limits: &SandboxLimits) -> FetchBridge {
        FetchBridge::new(
            Arc::new(transport),
            limits,
            Instant::now() + Duration::from_secs(30),
        )
    }

    fn ok_response(body: &str) -> TransportResponse {
        TransportResponse {
            status: 200,
            status_text: "OK".to_string(),
            url: "https://example.com/feed".to_string(),
            headers: BTreeMap::from([("content-type".to_string(), "application/json".to_string())]),
            body: body.as_bytes().to_vec(),
        }
    }

    fn reply(json: &str) -> Value {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_successful_fetch_reply_shape() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .withf(|req, budget| {
                req.method == "POST"
                    && req.headers.get("accept").map(String::as_str) == Some("application/json")
                    && req.body.as_deref() == Some("{\"q\":1}")
                    && budget.max_bytes == 1024
            })
            .times(1)
            .returning(|_, _| Ok(ok_response("[1,2]")));

        let bridge = bridge(transport, &limits(5, 1024));
        let out = reply(&bridge.handle(
            "https://example.com/feed",
            r#"{"method":"post","headers":{"accept":"application/json"},"body":"{\"q\":1}"}"#,
        ));

        assert_eq!(out["ok"], true);
        assert_eq!(out["status"], 200);
        assert_eq!(out["statusText"], "OK");
        assert_eq!(out["body"], "[1,2]");
        assert_eq!(out["headers"]["content-type"], "application/json");
    }

    #[test]
    fn test_call_limit_stops_before_transport() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .times(2)
            .returning(|_, _| Ok(ok_response("ok")));

        let bridge = bridge(transport, &limits(2, 1024));
        assert!(reply(&bridge.handle("https://example.com/1", "{}"))["error"].is_null());
        assert!(reply(&bridge.handle("https://example.com/2", "{}"))["error"].is_null());

        let third = reply(&bridge.handle("https://example.com/3", "{}"));
        assert!(third["error"].as_str().unwrap().contains("call limit of 2"));
        assert_eq!(bridge.calls_made(), 3);
    }

    #[test]
    fn test_non_http_schemes_are_refused() {
        let bridge = bridge(MockHttpTransport::new(), &limits(5, 1024));

        let out = reply(&bridge.handle("file:///etc/passwd", "{}"));
        assert!(out["error"].as_str().unwrap().contains("unsupported URL scheme 'file'"));

        let out = reply(&bridge.handle("not a url", "{}"));
        assert!(out["error"].as_str().unwrap().starts_with("invalid URL"));
    }

    #[test]
    fn test_oversized_response_is_an_error() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .returning(|_, _| Ok(ok_response("0123456789ABC")));

        let bridge = bridge(transport, &limits(5, 10));
        let out = reply(&bridge.handle("https://example.com/big", ""));
        assert_eq!(out["error"], "response exceeded the 10 byte limit");
    }

    #[test]
    fn test_expired_deadline_refuses_calls() {
        let bridge = FetchBridge::new(
            Arc::new(MockHttpTransport::new()),
            &limits(5, 1024),
            Instant::now(),
        );
        let out = reply(&bridge.handle("https://example.com/", "{}"));
        assert_eq!(out["error"], "run time budget exhausted");
    }

    #[test]
    fn test_call_timeout_is_clipped_to_remaining_budget() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .withf(|_, budget| budget.timeout <= Duration::from_secs(2))
            .returning(|_, _| Ok(ok_response("ok")));

        let bridge = FetchBridge::new(
            Arc::new(transport),
            &limits(5, 1024),
            Instant::now() + Duration::from_secs(2),
        );
        assert!(reply(&bridge.handle("https://example.com/", "{}"))["error"].is_null());
    }

    #[test]
    fn test_transport_errors_are_reported() {
        let mut transport = MockHttpTransport::new();
        transport
            .expect_send()
            .returning(|_, _| Err(BridgeError::Timeout));

        let bridge = bridge(transport, &limits(5, 1024));
        let out = reply(&bridge.handle("https://example.com/", "{}"));
        assert_eq!(out["error"], "request timed out");
    }

    #[test]
    fn test_parse_url_fields() {
        let out = reply(&parse_url("https://user:pw@example.com:8443/a/b?x=1&y=2#top", ""));
        assert_eq!(out["protocol"], "https:");
        assert_eq!(out["username"], "user");
        assert_eq!(out["password"], "pw");
        assert_eq!(out["host"], "example.com:8443");
        assert_eq!(out["hostname"], "example.com");
        assert_eq!(out["port"], "8443");
        assert_eq!(out["pathname"], "/a/b");
        assert_eq!(out["search"], "?x=1&y=2");
        assert_eq!(out["hash"], "#top");
        assert_eq!(out["origin"], "https://example.com:8443");
    }

    #[test]
    fn test_parse_url_with_base_and_errors() {
        let out = reply(&parse_url("../c?q=1", "https://example.com/a/b/"));
        assert_eq!(out["href"], "https://example.com/a/c?q=1");
        assert_eq!(out["port"], "");

        let out = reply(&parse_url("/relative", ""));
        assert!(out["error"].as_str().unwrap().starts_with("/relative"));
    }
}
