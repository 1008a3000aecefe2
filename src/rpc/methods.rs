//! The three requests of the fixed protocol sequence and their replies.
//!
//! | Step | Method       | Params                                         |
//! |------|--------------|------------------------------------------------|
//! | 1    | `initialize` | protocol version, capability flags, client info |
//! | 2    | `tools/list` | `{}`                                           |
//! | 3    | `call_tool`  | tool name + argument object                    |

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::config::ClientConfig;
use crate::rpc::message::{Message, MessageId};
use crate::{AppError, Result};

/// Method opening the session.
pub const INITIALIZE: &str = "initialize";

/// Method listing the server's capabilities.
pub const TOOLS_LIST: &str = "tools/list";

/// Method invoking one capability.
pub const CALL_TOOL: &str = "call_tool";

/// One capability offered by the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ToolInfo {
    /// Tool name; servers occasionally omit it.
    #[serde(default)]
    pub name: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
}

impl ToolInfo {
    /// Name for display, `(unnamed)` when absent.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("(unnamed)")
    }
}

/// One item of a tool invocation's `content` array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContentItem {
    /// Item type, `text` when absent.
    #[serde(rename = "type", default = "default_content_type")]
    pub kind: String,
    /// Text body; empty for non-text items.
    #[serde(default)]
    pub text: String,
}

fn default_content_type() -> String {
    "text".into()
}

/// Decoded result of a tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ToolOutput {
    /// Content items in server order.
    #[serde(default)]
    pub content: Vec<ContentItem>,
    /// Set by the server when the tool itself failed.
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

/// Build the `initialize` request.
#[must_use]
pub fn initialize(id: impl Into<MessageId>, config: &ClientConfig) -> Message {
    Message::request(
        id,
        INITIALIZE,
        json!({
            "protocolVersion": config.protocol_version,
            "capabilities": {
                "tools": { "listChanged": true },
                "resources": { "subscribe": true, "listChanged": true },
                "prompts": { "listChanged": true },
                "logging": {},
                "completion": {}
            },
            "clientInfo": {
                "name": config.client_info.name,
                "version": config.client_info.version
            }
        }),
    )
}

/// Build the `tools/list` request.
#[must_use]
pub fn list_tools(id: impl Into<MessageId>) -> Message {
    Message::request(id, TOOLS_LIST, json!({}))
}

/// Build the `call_tool` request.
#[must_use]
pub fn call_tool(id: impl Into<MessageId>, name: &str, arguments: &Map<String, Value>) -> Message {
    Message::request(
        id,
        CALL_TOOL,
        json!({
            "name": name,
            "arguments": arguments
        }),
    )
}

/// Extract the tool list from a `tools/list` reply.
///
/// Accepts a bare array or an object with a `tools` array.
///
/// # Errors
///
/// - [`AppError::Rpc`]: the reply carries an error object.
/// - [`AppError::Protocol`]: the result has neither accepted shape.
pub fn parse_tool_list(reply: &Message) -> Result<Vec<ToolInfo>> {
    let result = reply_result(reply)?;

    let tools = match result {
        Value::Array(_) => result,
        Value::Object(map) => map.get("tools").ok_or_else(|| {
            AppError::Protocol("tools/list result object has no `tools` field".into())
        })?,
        other => {
            return Err(AppError::Protocol(format!(
                "tools/list result must be an array or object, got {other}"
            )))
        }
    };

    Vec::<ToolInfo>::deserialize(tools)
        .map_err(|e| AppError::Protocol(format!("tools/list result malformed: {e}")))
}

/// Decode a `call_tool` reply.
///
/// A result that is not an object, or an object without `content`, decodes
/// as an empty output; the raw reply stays available to the caller.
///
/// # Errors
///
/// - [`AppError::Rpc`]: the reply carries an error object.
/// - [`AppError::Protocol`]: the result object has malformed fields.
pub fn parse_tool_output(reply: &Message) -> Result<ToolOutput> {
    let result = reply_result(reply)?;
    if !result.is_object() {
        return Ok(ToolOutput::default());
    }
    ToolOutput::deserialize(result)
        .map_err(|e| AppError::Protocol(format!("call_tool result malformed: {e}")))
}

/// Find `name` in a tool list.
#[must_use]
pub fn find_tool<'a>(tools: &'a [ToolInfo], name: &str) -> Option<&'a ToolInfo> {
    tools.iter().find(|tool| tool.name.as_deref() == Some(name))
}

fn reply_result(reply: &Message) -> Result<&Value> {
    if let Some(error) = &reply.error {
        let id = reply
            .id
            .as_ref()
            .map_or_else(|| "-".to_owned(), ToString::to_string);
        return Err(AppError::Rpc(format!("request {id} failed: {error}")));
    }
    reply
        .result
        .as_ref()
        .ok_or_else(|| AppError::Protocol("reply carries no result".into()))
}
