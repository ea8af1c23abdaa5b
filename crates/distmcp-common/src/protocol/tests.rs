use super::*;
use serde_json::json;

#[test]
fn test_request_ids_are_unique() {
    let a = JsonRpcRequest::new("ping", json!({}));
    let b = JsonRpcRequest::new("ping", json!({}));
    assert_ne!(a.id, b.id);
}

#[test]
fn test_request_wire_shape() {
    let request = JsonRpcRequest::new("tools/list", json!({"cursor": "abc"}));
    let wire = serde_json::to_value(&request).unwrap();
    assert_eq!(wire["jsonrpc"], "2.0");
    assert_eq!(wire["method"], "tools/list");
    assert_eq!(wire["params"]["cursor"], "abc");
}

#[test]
fn test_notification_has_no_id() {
    let notification = JsonRpcNotification::new("notifications/initialized", json!(null));
    let wire = serde_json::to_value(&notification).unwrap();
    assert!(wire.get("id").is_none());
    assert!(wire.get("params").is_none());
}

#[test]
fn test_response_into_result_success() {
    let response = JsonRpcResponse::success(json!(1), json!({"ok": true}));
    let result = response.into_result().unwrap();
    assert_eq!(result, json!({"ok": true}));
}

#[test]
fn test_response_into_result_error() {
    let response = JsonRpcResponse::error(json!(1), JsonRpcError::method_not_found("tools/list"));
    match response.into_result() {
        Err(DistmcpError::Rpc { code, message }) => {
            assert_eq!(code, -32601);
            assert!(message.contains("tools/list"));
        }
        other => panic!("expected Rpc error, got {:?}", other),
    }
}

#[test]
fn test_response_missing_both_members_is_invalid() {
    let response: JsonRpcResponse =
        serde_json::from_str(r#"{"jsonrpc":"2.0","id":1}"#).unwrap();
    assert!(matches!(
        response.into_result(),
        Err(DistmcpError::InvalidResponse(_))
    ));
}

#[test]
fn test_initialize_result_parses_wire_format() {
    let result: InitializeResult = serde_json::from_value(json!({
        "protocolVersion": "2025-03-26",
        "capabilities": {"tools": {"listChanged": true}, "logging": {}},
        "serverInfo": {"name": "test-server", "version": "1.2.0"},
        "instructions": "be nice"
    }))
    .unwrap();
    assert_eq!(result.protocol_version, MCP_PROTOCOL_VERSION);
    assert_eq!(result.server_info.name, "test-server");
    assert!(result.capabilities.tools.is_some());
    assert!(result.capabilities.resources.is_none());
    assert_eq!(result.instructions.as_deref(), Some("be nice"));
}

#[test]
fn test_tool_uses_camel_case_input_schema() {
    let tool = Tool {
        name: "echo".into(),
        description: None,
        input_schema: json!({"type": "object"}),
    };
    let wire = serde_json::to_value(&tool).unwrap();
    assert!(wire.get("inputSchema").is_some());
    assert!(wire.get("description").is_none());
}

#[test]
fn test_call_tool_result_content_is_tagged() {
    let result: CallToolResult = serde_json::from_value(json!({
        "content": [{"type": "text", "text": "hello"}],
        "isError": false
    }))
    .unwrap();
    assert_eq!(result.content, vec![Content::Text { text: "hello".into() }]);
    assert_eq!(result.is_error, Some(false));
}

#[test]
fn test_logging_level_serializes_lowercase() {
    assert_eq!(
        serde_json::to_value(LoggingLevel::Warning).unwrap(),
        json!("warning")
    );
}

#[test]
fn test_complete_request_renames_ref() {
    let request = CompleteRequest {
        reference: json!({"type": "ref/prompt", "name": "greet"}),
        argument: CompletionArgument {
            name: "lang".into(),
            value: "ru".into(),
        },
    };
    let wire = serde_json::to_value(&request).unwrap();
    assert_eq!(wire["ref"]["type"], "ref/prompt");
    assert_eq!(wire["argument"]["name"], "lang");
}
