//! Protocol envelopes and request arguments.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct DapRequest {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

impl DapRequest {
    /// Deserialize request arguments, absent arguments are treated as an empty object.
    pub fn arguments<T: for<'de> Deserialize<'de>>(&self) -> anyhow::Result<T> {
        let arguments = match &self.arguments {
            Value::Null => Value::Object(Default::default()),
            arguments => arguments.clone(),
        };
        serde_json::from_value(arguments)
            .map_err(|e| anyhow::anyhow!("invalid `{}` arguments: {e}", self.command))
    }
}

/// Response envelope.
///
/// Body is kept as a `serde_json::Value`, responses without a body skip the field.
#[derive(Debug, Serialize)]
pub struct DapResponse {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Event envelope.
#[derive(Debug, Serialize)]
pub struct DapEvent {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeArguments {
    #[serde(default = "default_true")]
    pub lines_start_at1: bool,
    #[serde(default = "default_true")]
    pub columns_start_at1: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceArgument {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceBreakpointArgument {
    pub line: i64,
    pub column: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetBreakpointsArguments {
    pub source: SourceArgument,
    #[serde(default)]
    pub breakpoints: Vec<SourceBreakpointArgument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionBreakpointArgument {
    pub instruction_reference: String,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetInstructionBreakpointsArguments {
    #[serde(default)]
    pub breakpoints: Vec<InstructionBreakpointArgument>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointLocationsArguments {
    pub source: SourceArgument,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackTraceArguments {
    pub start_frame: Option<i64>,
    pub levels: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopesArguments {
    pub frame_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariablesArguments {
    pub variables_reference: i64,
    pub start: Option<i64>,
    pub count: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateArguments {
    pub expression: String,
    pub frame_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadMemoryArguments {
    pub memory_reference: String,
    pub offset: Option<i64>,
    pub count: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteMemoryArguments {
    pub memory_reference: String,
    pub offset: Option<i64>,
    pub data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisassembleArguments {
    pub memory_reference: String,
    pub offset: Option<i64>,
    pub instruction_offset: Option<i64>,
    pub instruction_count: i64,
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn request(arguments: Value) -> DapRequest {
        serde_json::from_value(json!({
            "seq": 3,
            "type": "request",
            "command": "stackTrace",
            "arguments": arguments,
        }))
        .unwrap()
    }

    #[test]
    fn test_missing_arguments() {
        let req: DapRequest =
            serde_json::from_value(json!({"seq": 1, "type": "request", "command": "initialize"}))
                .unwrap();
        let args: InitializeArguments = req.arguments().unwrap();
        assert!(args.lines_start_at1);
        assert!(args.columns_start_at1);
    }

    #[test]
    fn test_arguments() {
        let args: StackTraceArguments = request(json!({"threadId": 1, "levels": 20}))
            .arguments()
            .unwrap();
        assert_eq!(args.start_frame, None);
        assert_eq!(args.levels, Some(20));

        let err = request(json!({"frameId": "x"}))
            .arguments::<ScopesArguments>()
            .unwrap_err();
        assert!(err.to_string().starts_with("invalid `stackTrace` arguments"));
    }

    #[test]
    fn test_serialize_response_without_body() {
        let response = DapResponse {
            seq: 4,
            r#type: "response",
            request_seq: 3,
            success: true,
            command: "pause".to_string(),
            message: None,
            body: None,
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({
                "seq": 4,
                "type": "response",
                "request_seq": 3,
                "success": true,
                "command": "pause",
            })
        );
    }
}
