//! Unit tests for the JSON-RPC message envelope and the protocol builders.

use serde_json::{json, Map, Value};

use readium_probe::config::ClientConfig;
use readium_probe::rpc::message::{Message, MessageId, MessageKind, RpcError};
use readium_probe::rpc::methods::{self, find_tool, parse_tool_list, parse_tool_output, ToolOutput};
use readium_probe::AppError;

// ── decode ──────────────────────────────────────────────────

#[test]
fn result_reply_decodes() {
    let msg = Message::decode(r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[]}}"#)
        .expect("valid reply");
    assert_eq!(msg.id, Some(MessageId::Number(2)));
    assert_eq!(msg.kind(), MessageKind::Result);
    assert!(msg.is_reply());
}

#[test]
fn null_result_is_still_a_reply() {
    let msg = Message::decode(r#"{"jsonrpc":"2.0","id":5,"result":null}"#).expect("valid reply");
    assert_eq!(msg.result, Some(Value::Null));
    assert!(msg.is_reply());
}

#[test]
fn error_reply_decodes() {
    let msg = Message::decode(
        r#"{"jsonrpc":"2.0","id":"abc","error":{"code":-32601,"message":"Method not found"}}"#,
    )
    .expect("valid error reply");
    assert_eq!(msg.id, Some(MessageId::Text("abc".into())));
    assert_eq!(msg.kind(), MessageKind::Error);
    let error = msg.error.expect("error object");
    assert_eq!(error.code, -32601);
    assert_eq!(error.to_string(), "Method not found (code -32601)");
}

#[test]
fn notification_and_server_request_are_not_replies() {
    let note = Message::decode(r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#)
        .expect("notification");
    assert_eq!(note.kind(), MessageKind::Notification);
    assert!(!note.is_reply());

    let req = Message::decode(r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#).expect("request");
    assert_eq!(req.kind(), MessageKind::Request);
    assert!(!req.is_reply());
    assert_eq!(req.method_name(), "ping");
}

#[test]
fn malformed_json_is_a_decode_error() {
    match Message::decode("{not json") {
        Err(AppError::Decode(msg)) => assert!(
            msg.contains("malformed json"),
            "error must mention 'malformed json', got: {msg}"
        ),
        other => panic!("expected Err(AppError::Decode), got: {other:?}"),
    }
}

#[test]
fn message_with_result_and_error_is_rejected() {
    let result = Message::decode(
        r#"{"jsonrpc":"2.0","id":1,"result":{},"error":{"code":1,"message":"x"}}"#,
    );
    match result {
        Err(AppError::Decode(msg)) => assert!(msg.contains("invalid message shape")),
        other => panic!("expected shape error, got: {other:?}"),
    }
}

#[test]
fn message_with_nothing_is_rejected() {
    let result = Message::decode(r#"{"jsonrpc":"2.0","id":1}"#);
    assert!(matches!(result, Err(AppError::Decode(_))));
}

#[test]
fn params_without_method_is_rejected() {
    let result = Message::decode(r#"{"jsonrpc":"2.0","id":1,"result":1,"params":{}}"#);
    assert!(matches!(result, Err(AppError::Decode(_))));
}

// ── encode ──────────────────────────────────────────────────

#[test]
fn request_encodes_without_reply_fields() {
    let msg = Message::request(1, "tools/list", json!({}));
    let value: Value = serde_json::from_str(&msg.encode().expect("encode")).expect("json");
    assert_eq!(
        value,
        json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list", "params": {}})
    );
}

#[test]
fn notification_has_no_id() {
    let msg = Message::notification("notifications/initialized", json!({}));
    assert!(msg.id.is_none());
    assert_eq!(msg.kind(), MessageKind::Notification);
    let encoded = msg.encode().expect("encode");
    assert!(!encoded.contains("\"id\""), "unexpected id in {encoded}");
}

// ── protocol builders ───────────────────────────────────────

#[test]
fn initialize_carries_version_capabilities_and_client_info() {
    let config = ClientConfig::default();
    let msg = methods::initialize(1, &config);
    assert_eq!(msg.method_name(), methods::INITIALIZE);

    let params = msg.params.expect("params");
    assert_eq!(params["protocolVersion"], "1.0.0");
    assert_eq!(params["capabilities"]["tools"]["listChanged"], true);
    assert_eq!(params["capabilities"]["resources"]["subscribe"], true);
    assert_eq!(params["clientInfo"]["name"], "Readium Debug Client");
    assert_eq!(params["clientInfo"]["version"], "1.0.0");
}

#[test]
fn call_tool_passes_arguments_verbatim() {
    let mut args = Map::new();
    args.insert("path".into(), json!("/docs"));
    args.insert("use_markitdown".into(), json!(false));

    let msg = methods::call_tool(3, "analyze_docs", &args);
    assert_eq!(msg.id, Some(MessageId::Number(3)));
    assert_eq!(msg.method_name(), methods::CALL_TOOL);
    assert_eq!(
        msg.params.expect("params"),
        json!({"name": "analyze_docs", "arguments": {"path": "/docs", "use_markitdown": false}})
    );
}

#[test]
fn tool_list_accepts_bare_array() {
    let reply = Message::result(2, json!([{"name": "analyze_docs", "description": "Analyze"}]));
    let tools = parse_tool_list(&reply).expect("tool list");
    assert_eq!(tools.len(), 1);
    assert!(find_tool(&tools, "analyze_docs").is_some());
}

#[test]
fn tool_list_accepts_tools_object() {
    let reply = Message::result(2, json!({"tools": [{"name": "a"}, {"description": "no name"}]}));
    let tools = parse_tool_list(&reply).expect("tool list");
    assert_eq!(tools.len(), 2);
    assert_eq!(tools[1].display_name(), "(unnamed)");
    assert!(find_tool(&tools, "analyze_docs").is_none());
}

#[test]
fn tool_list_rejects_other_shapes() {
    let reply = Message::result(2, json!("tools"));
    assert!(matches!(parse_tool_list(&reply), Err(AppError::Protocol(_))));

    let reply = Message::result(2, json!({"items": []}));
    assert!(matches!(parse_tool_list(&reply), Err(AppError::Protocol(_))));
}

#[test]
fn error_reply_becomes_rpc_error() {
    let reply = Message::error(
        2,
        RpcError {
            code: -32000,
            message: "boom".into(),
            data: None,
        },
    );
    match parse_tool_list(&reply) {
        Err(AppError::Rpc(msg)) => {
            assert!(msg.contains("request 2"), "got: {msg}");
            assert!(msg.contains("boom"), "got: {msg}");
        }
        other => panic!("expected Err(AppError::Rpc), got: {other:?}"),
    }
}

#[test]
fn tool_output_defaults_content_type_to_text() {
    let reply = Message::result(
        3,
        json!({"content": [{"text": "hello"}, {"type": "resource", "text": "r"}], "isError": true}),
    );
    let output = parse_tool_output(&reply).expect("tool output");
    assert!(output.is_error);
    assert_eq!(output.content[0].kind, "text");
    assert_eq!(output.content[1].kind, "resource");
}

#[test]
fn tool_output_without_content_is_empty() {
    let output = parse_tool_output(&Message::result(3, json!({}))).expect("tool output");
    assert!(output.content.is_empty());
    assert!(!output.is_error);
}

#[test]
fn non_object_tool_result_is_an_empty_output() {
    for result in [json!("done"), json!(null), json!([1, 2])] {
        let output = parse_tool_output(&Message::result(3, result.clone()))
            .unwrap_or_else(|e| panic!("{result} should decode: {e}"));
        assert_eq!(output, ToolOutput::default());
    }
}
