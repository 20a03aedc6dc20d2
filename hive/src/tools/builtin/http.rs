//! HTTP request tool.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{Tool, ToolErrorKind, ToolOutput};

/// Cap on the response body persisted into a tool message.
const BODY_CAP: usize = 20_000;

pub struct HttpRequestTool {
    client: reqwest::Client,
}

impl HttpRequestTool {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpRequestTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Performs an HTTP request. Arguments: url (required), method (GET default), \
         headers (object), body (string or object)."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {"type": "string"},
                "method": {"type": "string", "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"]},
                "headers": {"type": "object"},
                "body": {}
            },
            "required": ["url"]
        })
    }

    async fn invoke(&self, args: Value) -> ToolOutput {
        let Some(url) = args.get("url").and_then(Value::as_str) else {
            return ToolOutput::err(ToolErrorKind::ValidationError, "'url' is required");
        };
        let method = args
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let method = match method.parse::<reqwest::Method>() {
            Ok(m) => m,
            Err(_) => {
                return ToolOutput::err(
                    ToolErrorKind::ValidationError,
                    format!("unsupported method '{method}'"),
                )
            }
        };

        let mut request = self.client.request(method, url);
        if let Some(headers) = args.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                if let Some(v) = value.as_str() {
                    request = request.header(key, v);
                }
            }
        }
        if let Some(body) = args.get("body") {
            request = match body {
                Value::String(s) => request.body(s.clone()),
                other => request.json(other),
            };
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                return ToolOutput::err(
                    ToolErrorKind::ExecutionError,
                    format!("request failed: {e}"),
                )
            }
        };

        let status = response.status();
        if status.as_u16() == 401 {
            return ToolOutput::err(
                ToolErrorKind::InvalidCredentials,
                "the server rejected the request credentials",
            );
        }
        if status.as_u16() == 403 {
            return ToolOutput::err(
                ToolErrorKind::PermissionDenied,
                "the server refused access to this resource",
            );
        }
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            let message = match retry_after {
                Some(after) => format!("rate limited, retry after {after}s"),
                None => "rate limited".to_string(),
            };
            return ToolOutput::err(ToolErrorKind::RateLimited, message);
        }

        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(BODY_CAP).collect();
        let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::String(body));
        ToolOutput::ok(json!({
            "status": status.as_u16(),
            "body": parsed,
        }))
    }
}
