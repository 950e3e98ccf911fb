//! Execution routing: catalog lookup, argument validation, dispatch, and
//! the normalized outcome envelope.
//!
//! Every execution resolves to `{ok: true, result}` or `{ok: false,
//! error}`; the envelope is built exactly once, by the gateway, from the
//! `GatewayResult` this module produces.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::auth::RemediationPayload;
use crate::catalog::ToolCatalog;
use crate::connection::{classify_transport_error, ConnectionManager, ConnectionState};
use crate::error::{GatewayError, GatewayResult};
use crate::protocol::CallActionResult;
use crate::transport::TransportError;

pub struct ExecutionRouter {
    catalog: Arc<ToolCatalog>,
    manager: Arc<ConnectionManager>,
}

impl ExecutionRouter {
    pub fn new(catalog: Arc<ToolCatalog>, manager: Arc<ConnectionManager>) -> Self {
        Self { catalog, manager }
    }

    /// Runs one action: lookup, validate, dispatch, normalize.
    pub async fn execute(
        &self,
        server: &str,
        action: &str,
        arguments: Value,
    ) -> GatewayResult<Value> {
        let Some(descriptor) = self.catalog.get(server, action) else {
            return Err(match self.manager.status(server).await {
                None => GatewayError::NotFound(format!("server '{server}'")),
                Some(status) if status.state == ConnectionState::Connected => {
                    GatewayError::NotFound(format!("action '{action}' on server '{server}'"))
                }
                Some(_) => GatewayError::Unavailable(server.to_string()),
            });
        };

        validate_args(&descriptor.parameter_schema, &arguments)?;

        let (session, timeout) = self.manager.session(server).await?;
        debug!(server, action, timeout_ms = timeout.as_millis() as u64, "dispatching");

        match session.invoke(action, arguments, timeout).await {
            Ok(raw) => normalize_result(server, raw),
            Err(e) => {
                // A stuck or closed wire is a connection problem, not just
                // this call's; kick the reconnect path. Auth and downstream
                // errors say nothing about the connection itself.
                if matches!(e, TransportError::Timeout(_) | TransportError::Closed(_)) {
                    self.manager.report_failure(server, &e).await;
                }
                Err(classify_transport_error(server, e))
            }
        }
    }
}

/// Shapes a downstream call result into the envelope payload. Text-only
/// results collapse to their text (parsed as JSON when they carry JSON);
/// anything richer passes through as the content array.
fn normalize_result(server: &str, raw: Value) -> GatewayResult<Value> {
    // Only results that actually carry a content array get collapsed;
    // everything else passes through untouched. CallActionResult's
    // defaulted fields would otherwise swallow any object as empty.
    if raw.get("content").map_or(true, |c| !c.is_array()) {
        return Ok(raw);
    }
    let Ok(result) = serde_json::from_value::<CallActionResult>(raw.clone()) else {
        return Ok(raw);
    };
    if result.is_error() {
        return Err(GatewayError::Downstream {
            server: server.to_string(),
            message: result.text(),
        });
    }
    let all_text = result.content.iter().all(|c| c.content_type == "text");
    if all_text {
        let text = result.text();
        if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
            return Ok(parsed);
        }
        return Ok(Value::String(text));
    }
    Ok(serde_json::to_value(result.content)?)
}

/// Validates `arguments` against the action's cached parameter schema:
/// required fields must be present and declared primitive types must
/// match. The offending field is always named. Extra fields pass; deep
/// schema features are the downstream server's problem.
pub fn validate_args(schema: &Value, arguments: &Value) -> GatewayResult<()> {
    let Some(args) = arguments.as_object() else {
        return Err(GatewayError::InvalidArgument {
            field: "arguments".to_string(),
            message: "expected a JSON object".to_string(),
        });
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for field in required.iter().filter_map(Value::as_str) {
            if !args.contains_key(field) {
                return Err(GatewayError::InvalidArgument {
                    field: field.to_string(),
                    message: "missing required field".to_string(),
                });
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (field, value) in args {
            let Some(expected) = properties
                .get(field)
                .and_then(|p| p.get("type"))
                .and_then(Value::as_str)
            else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(GatewayError::InvalidArgument {
                    field: field.clone(),
                    message: format!("expected {expected}, got {}", type_name(value)),
                });
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        // Unknown or union types are left to the downstream server.
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// `{ok: true, result}`.
pub fn success_envelope(result: Value) -> Value {
    json!({ "ok": true, "result": result })
}

/// `{ok: false, error: {kind, message, field?, remediation?, ...}}`.
pub fn error_envelope(error: &GatewayError, remediation: Option<&RemediationPayload>) -> Value {
    let mut details = json!({
        "kind": error.kind(),
        "message": error.to_string(),
    });
    if let Some(field) = error.field() {
        details["field"] = json!(field);
    }
    if let Some(payload) = remediation {
        details["remediation"] = json!(payload.remediation);
        if let Some(url) = &payload.authorization_url {
            details["authorization_url"] = json!(url);
        }
    }
    json!({ "ok": false, "error": details })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn list_dir_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string"},
                "depth": {"type": "integer"}
            },
            "required": ["path"]
        })
    }

    #[test]
    fn missing_required_field_is_named() {
        let err = validate_args(&list_dir_schema(), &json!({})).unwrap_err();
        assert_eq!(err.field(), Some("path"));
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[test]
    fn type_mismatch_is_named() {
        let err = validate_args(&list_dir_schema(), &json!({"path": 42})).unwrap_err();
        assert_eq!(err.field(), Some("path"));
        assert!(err.to_string().contains("expected string"));

        let err = validate_args(&list_dir_schema(), &json!({"path": "/tmp", "depth": "deep"}))
            .unwrap_err();
        assert_eq!(err.field(), Some("depth"));
    }

    #[test]
    fn valid_and_extra_fields_pass() {
        assert!(validate_args(&list_dir_schema(), &json!({"path": "/tmp"})).is_ok());
        assert!(
            validate_args(&list_dir_schema(), &json!({"path": "/tmp", "depth": 2, "extra": true}))
                .is_ok()
        );
        // A schema with no constraints accepts anything object-shaped.
        assert!(validate_args(&json!({}), &json!({"whatever": 1})).is_ok());
    }

    #[test]
    fn non_object_arguments_rejected() {
        let err = validate_args(&list_dir_schema(), &json!([1, 2])).unwrap_err();
        assert_eq!(err.field(), Some("arguments"));
    }

    #[test]
    fn normalize_collapses_text_content() {
        let raw = json!({
            "content": [{"type": "text", "text": "{\"entries\": [\"a.txt\"]}"}],
            "isError": false
        });
        let payload = normalize_result("files", raw).unwrap();
        assert_eq!(payload["entries"][0], "a.txt");

        let plain = json!({"content": [{"type": "text", "text": "done"}]});
        assert_eq!(normalize_result("files", plain).unwrap(), json!("done"));
    }

    #[test]
    fn normalize_leaves_contentless_objects_alone() {
        let structured = json!({"structuredContent": {"rows": [1, 2, 3]}});
        assert_eq!(
            normalize_result("files", structured.clone()).unwrap(),
            structured
        );

        // A content key that is not an array is not MCP-shaped either.
        let odd = json!({"content": "plain string"});
        assert_eq!(normalize_result("files", odd.clone()).unwrap(), odd);
    }

    #[test]
    fn normalize_surfaces_downstream_errors() {
        let raw = json!({
            "content": [{"type": "text", "text": "no such directory"}],
            "isError": true
        });
        let err = normalize_result("files", raw).unwrap_err();
        assert_eq!(err.kind(), "downstream_error");
        assert!(err.to_string().contains("no such directory"));
    }

    #[test]
    fn envelopes_have_the_fixed_shape() {
        let ok = success_envelope(json!({"n": 1}));
        assert_eq!(ok["ok"], true);
        assert_eq!(ok["result"]["n"], 1);

        let err = GatewayError::InvalidArgument {
            field: "path".to_string(),
            message: "missing required field".to_string(),
        };
        let envelope = error_envelope(&err, None);
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["error"]["kind"], "invalid_argument");
        assert_eq!(envelope["error"]["field"], "path");
        assert!(envelope["error"].get("remediation").is_none());
    }
}
