use crate::llm::{ToolCallOutput, ToolCallRequest};
use crate::tools::ToolHandler;
use crate::types::ToolLoopError;
use futures::future::try_join_all;
use tracing::{debug, warn};

const MISSING_OUTPUT: &str = r#"{"error":"Tool did not return output"}"#;

/// Resolve every call through `handler` concurrently.
///
/// Outputs come back in call order. The first handler failure aborts the
/// whole batch.
pub(super) async fn execute_tool_calls<H>(
    handler: &H,
    calls: Vec<ToolCallRequest>,
) -> Result<Vec<ToolCallOutput>, ToolLoopError>
where
    H: ToolHandler + ?Sized,
{
    try_join_all(calls.into_iter().map(|call| execute_tool_call(handler, call))).await
}

async fn execute_tool_call<H>(
    handler: &H,
    call: ToolCallRequest,
) -> Result<ToolCallOutput, ToolLoopError>
where
    H: ToolHandler + ?Sized,
{
    let call_id = call.call_id.clone();
    let name = call.name.clone();

    match handler.call(call).await {
        Ok(output) if output.is_empty() => {
            warn!(call_id = %call_id, tool_name = %name, "Tool returned empty output");
            Ok(ToolCallOutput {
                call_id,
                output: MISSING_OUTPUT.to_owned(),
            })
        }
        Ok(output) => {
            debug!(call_id = %call_id, tool_name = %name, output_len = output.len(), "Tool call completed");
            Ok(ToolCallOutput { call_id, output })
        }
        Err(source) => {
            warn!(call_id = %call_id, tool_name = %name, error = %source, "Tool handler failed");
            Err(ToolLoopError::ToolHandler {
                call_id,
                name,
                source,
            })
        }
    }
}
