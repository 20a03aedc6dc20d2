//! The uniform tool result envelope.
//!
//! Every tool returns exactly one of `{ok: true, data}` or
//! `{ok: false, error_type, user_message, connector?}`. The error kinds are a
//! closed set; anything else is a bug.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

/// Closed set of tool error kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    ValidationError,
    ExecutionError,
    ConnectorNotConfigured,
    InvalidCredentials,
    PermissionDenied,
    RateLimited,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "validation_error",
            Self::ExecutionError => "execution_error",
            Self::ConnectorNotConfigured => "connector_not_configured",
            Self::InvalidCredentials => "invalid_credentials",
            Self::PermissionDenied => "permission_denied",
            Self::RateLimited => "rate_limited",
        }
    }
}

/// Tool result envelope, tagged by the `ok` field on the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutput {
    Ok {
        data: Value,
    },
    Err {
        error_type: ToolErrorKind,
        user_message: String,
        connector: Option<String>,
    },
}

impl ToolOutput {
    pub fn ok(data: Value) -> Self {
        Self::Ok { data }
    }

    pub fn err(error_type: ToolErrorKind, user_message: impl Into<String>) -> Self {
        Self::Err {
            error_type,
            user_message: user_message.into(),
            connector: None,
        }
    }

    pub fn with_connector(self, connector: impl Into<String>) -> Self {
        match self {
            Self::Err {
                error_type,
                user_message,
                ..
            } => Self::Err {
                error_type,
                user_message,
                connector: Some(connector.into()),
            },
            ok => ok,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// Rendered as the tool message content: JSON for both arms, so the LLM
    /// and the error detector see a stable shape.
    pub fn to_content(&self) -> String {
        serde_json::to_value(self)
            .map(|v| v.to_string())
            .unwrap_or_else(|_| "{\"ok\":false}".to_string())
    }
}

impl Serialize for ToolOutput {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = match self {
            Self::Ok { data } => json!({"ok": true, "data": data}),
            Self::Err {
                error_type,
                user_message,
                connector,
            } => {
                let mut obj = json!({
                    "ok": false,
                    "error_type": error_type.as_str(),
                    "user_message": user_message,
                });
                if let Some(c) = connector {
                    obj["connector"] = json!(c);
                }
                obj
            }
        };
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ToolOutput {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let ok = value
            .get("ok")
            .and_then(Value::as_bool)
            .ok_or_else(|| D::Error::custom("envelope missing boolean 'ok'"))?;
        if ok {
            let data = value
                .get("data")
                .cloned()
                .ok_or_else(|| D::Error::custom("success envelope missing 'data'"))?;
            Ok(Self::Ok { data })
        } else {
            let error_type: ToolErrorKind = serde_json::from_value(
                value
                    .get("error_type")
                    .cloned()
                    .ok_or_else(|| D::Error::custom("error envelope missing 'error_type'"))?,
            )
            .map_err(D::Error::custom)?;
            let user_message = value
                .get("user_message")
                .and_then(Value::as_str)
                .ok_or_else(|| D::Error::custom("error envelope missing 'user_message'"))?
                .to_string();
            let connector = value
                .get("connector")
                .and_then(Value::as_str)
                .map(String::from);
            Ok(Self::Err {
                error_type,
                user_message,
                connector,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_wire_shape() {
        let out = ToolOutput::ok(json!({"time": "12:00"}));
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v, json!({"ok": true, "data": {"time": "12:00"}}));
    }

    #[test]
    fn error_wire_shape_with_connector() {
        let out = ToolOutput::err(ToolErrorKind::InvalidCredentials, "Slack rejected the token")
            .with_connector("slack");
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["ok"], false);
        assert_eq!(v["error_type"], "invalid_credentials");
        assert_eq!(v["connector"], "slack");
    }

    #[test]
    fn envelope_round_trips() {
        for out in [
            ToolOutput::ok(json!([1, 2])),
            ToolOutput::err(ToolErrorKind::RateLimited, "slow down"),
        ] {
            let wire = serde_json::to_string(&out).unwrap();
            let back: ToolOutput = serde_json::from_str(&wire).unwrap();
            assert_eq!(back, out);
        }
    }

    #[test]
    fn unknown_error_type_is_rejected() {
        let raw = r#"{"ok": false, "error_type": "weird_error", "user_message": "x"}"#;
        assert!(serde_json::from_str::<ToolOutput>(raw).is_err());
    }
}
