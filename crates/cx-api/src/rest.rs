//! Unauthenticated REST transport.
//!
//! One stateless call per request: `{rest_url}/{action}`, parameters in the
//! query string for GET and as a JSON body otherwise. No signing, no retry.

use cx_core::CexError;
use cx_core::config::ConnectionConfig;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Client for the configured public REST endpoint.
    pub fn from_config(config: &ConnectionConfig) -> Result<Self, CexError> {
        config.validate(false)?;
        Ok(Self::new(config.rest_url.clone()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send `action` with `params` and return the parsed JSON body.
    ///
    /// Non-200 statuses, and 200 bodies carrying an `error` field, map to
    /// [`CexError::Http`].
    pub async fn request(
        &self,
        action: &str,
        params: &Value,
        headers: &[(&str, &str)],
        method: Method,
    ) -> Result<Value, CexError> {
        let url = format!("{}/{}", self.base_url, action);
        let mut builder = if method == Method::GET {
            let query = build_query(params);
            let url = if query.is_empty() { url } else { format!("{url}?{query}") };
            self.http.get(url)
        } else {
            self.http.request(method.clone(), url).json(params)
        };
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        debug!("[cex-rest] {method} {action}");
        let resp = builder
            .send()
            .await
            .map_err(|e| CexError::Transport(format!("{action}: {e}")))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| CexError::Transport(format!("{action}: {e}")))?;

        parse_response(status, &body).inspect_err(|e| warn!("[cex-rest] {action} failed: {e}"))
    }

    pub async fn get(&self, action: &str, params: &Value) -> Result<Value, CexError> {
        self.request(action, params, &[], Method::GET).await
    }

    pub async fn post(&self, action: &str, params: &Value) -> Result<Value, CexError> {
        self.request(action, params, &[], Method::POST).await
    }
}

/// URL-encode the top-level fields of a JSON object as `k=v&...`.
///
/// Strings go in unquoted, other scalars and nested values as JSON text,
/// nulls are skipped. Non-objects encode to an empty query.
pub fn build_query(params: &Value) -> String {
    let Some(map) = params.as_object() else {
        return String::new();
    };
    map.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            format!("{}={}", urlencoding::encode(k), urlencoding::encode(&value))
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Map an HTTP status and body to the call outcome.
pub fn parse_response(status_code: u16, body: &str) -> Result<Value, CexError> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error_field = parsed.as_ref().and_then(|v| match v.get("error")? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    });

    if status_code != 200 {
        return Err(CexError::Http {
            status_code,
            error: error_field.unwrap_or_else(|| body.to_string()),
        });
    }
    if let Some(error) = error_field {
        return Err(CexError::Http { status_code, error });
    }
    parsed.ok_or_else(|| CexError::Parse(format!("response is not JSON: {body}")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn query_encoding() {
        let query = build_query(&json!({ "pair": "BTC-USD", "limit": 10, "note": "a b&c", "skip": null }));
        let mut parts: Vec<_> = query.split('&').collect();
        parts.sort_unstable();
        assert_eq!(parts, vec!["limit=10", "note=a%20b%26c", "pair=BTC-USD"]);

        assert_eq!(build_query(&json!({})), "");
        assert_eq!(build_query(&json!([1, 2])), "");
    }

    #[test]
    fn response_mapping() {
        assert_eq!(parse_response(200, r#"{"data":{"last":"1"}}"#).unwrap(), json!({ "data": { "last": "1" } }));

        match parse_response(200, r#"{"error":"invalid pair"}"#) {
            Err(CexError::Http { status_code, error }) => {
                assert_eq!(status_code, 200);
                assert_eq!(error, "invalid pair");
            }
            other => panic!("expected http error, got {other:?}"),
        }

        match parse_response(503, "upstream down") {
            Err(CexError::Http { status_code, error }) => {
                assert_eq!(status_code, 503);
                assert_eq!(error, "upstream down");
            }
            other => panic!("expected http error, got {other:?}"),
        }

        match parse_response(400, r#"{"error":"bad params"}"#) {
            Err(CexError::Http { error, .. }) => assert_eq!(error, "bad params"),
            other => panic!("expected http error, got {other:?}"),
        }

        assert!(matches!(parse_response(200, "<html>"), Err(CexError::Parse(_))));
        assert_eq!(parse_response(200, r#"{"ok":"ok","error":null}"#).unwrap()["ok"], "ok");
    }

    /// Serves a single canned HTTP response and hands back the raw request.
    async fn one_shot_server(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let task = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let n = socket.read(&mut buf).await.unwrap();
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (format!("http://{addr}"), task)
    }

    #[tokio::test]
    async fn get_sends_query_and_headers() {
        let (url, server) = one_shot_server("200 OK", r#"{"ok":"ok","data":[1]}"#).await;
        let client = RestClient::new(format!("{url}/"));

        let reply = client
            .request("ticker", &json!({ "pair": "BTC-USD" }), &[("x-trace", "abc")], Method::GET)
            .await
            .unwrap();
        assert_eq!(reply["data"], json!([1]));

        let raw = server.await.unwrap().to_lowercase();
        assert!(raw.starts_with("get /ticker?pair=btc-usd http/1.1"));
        assert!(raw.contains("x-trace: abc"));
    }

    #[tokio::test]
    async fn non_200_is_http_error() {
        let (url, _server) = one_shot_server("500 Internal Server Error", r#"{"error":"boom"}"#).await;
        let client = RestClient::new(url);

        match client.post("candles", &json!({ "pair": "BTC-USD" })).await {
            Err(CexError::Http { status_code, error }) => {
                assert_eq!(status_code, 500);
                assert_eq!(error, "boom");
            }
            other => panic!("expected http error, got {other:?}"),
        }
    }

    #[test]
    fn from_config_strips_trailing_slash() {
        let config = ConnectionConfig {
            rest_url: "https://example.com/api/".into(),
            ..ConnectionConfig::default()
        };
        assert_eq!(RestClient::from_config(&config).unwrap().base_url(), "https://example.com/api");
    }
}
