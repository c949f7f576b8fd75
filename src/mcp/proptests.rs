//! Property-Based Tests for the MCP protocol layer
//!
//! - **Robustness**: arbitrary server output never panics the line parser
//! - **Correlation**: a response always routes by the id it carries
//! - **Content mapping**: only text blocks reach the tool result

use proptest::prelude::*;
use serde_json::{json, Value};

use crate::mcp::protocol::{CallToolResult, ContentBlock, IncomingMessage, McpResponse};

fn arb_json_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
        prop::collection::vec(any::<i64>().prop_map(|n| Value::Number(n.into())), 0..3)
            .prop_map(Value::Array),
    ]
}

fn arb_block() -> impl Strategy<Value = ContentBlock> {
    prop_oneof![
        "[a-z ]{0,12}".prop_map(|text| ContentBlock {
            kind: "text".to_string(),
            text: Some(text),
        }),
        Just(ContentBlock {
            kind: "image".to_string(),
            text: None,
        }),
    ]
}

proptest! {
    #[test]
    fn prop_parse_never_panics(line in ".*") {
        let _ = IncomingMessage::parse(&line);
    }

    #[test]
    fn prop_parse_never_panics_on_json_objects(
        key in "[a-z]{1,8}",
        value in arb_json_value()
    ) {
        let mut object = serde_json::Map::new();
        object.insert(key, value);
        let line = Value::Object(object).to_string();
        let _ = IncomingMessage::parse(&line);
    }

    #[test]
    fn prop_response_routes_by_id(id in any::<u64>(), result in arb_json_value()) {
        let line = serde_json::to_string(&McpResponse::ok(id, result)).unwrap();
        match IncomingMessage::parse(&line) {
            Ok(IncomingMessage::Response(response)) => prop_assert_eq!(response.id, Some(id)),
            other => prop_assert!(false, "unexpected parse: {:?}", other),
        }
    }

    #[test]
    fn prop_messages_with_method_are_server_initiated(
        method in "[a-z/]{1,20}",
        id in prop::option::of(any::<u32>())
    ) {
        let mut message = json!({"jsonrpc": "2.0", "method": method});
        if let Some(id) = id {
            message["id"] = json!(id);
        }
        let parsed = IncomingMessage::parse(&message.to_string());
        let is_server_message = matches!(parsed, Ok(IncomingMessage::ServerMessage { .. }));
        prop_assert!(is_server_message);
    }

    #[test]
    fn prop_text_joins_only_text_blocks(blocks in prop::collection::vec(arb_block(), 0..6)) {
        let expected: Vec<String> = blocks
            .iter()
            .filter_map(|b| b.text.clone())
            .collect();
        let result = CallToolResult { content: blocks, is_error: false };
        prop_assert_eq!(result.text(), expected.join("\n"));
    }
}
