//! Builds the system prompt handed to [`push_providers::stream`].
//!
//! No provider adapter sends a function-calling schema on the wire (see
//! `push-providers`), so the prompt is the only place a model ever learns
//! which tools exist or how to invoke one. It is generated fresh from the
//! live [`push_tools::ToolRegistry`] rather than embedded at compile time,
//! so a tool added to the registry shows up here without touching this file.

use push_tools::ToolRegistry;

const PREAMBLE: &str = "You are push, an AI coding assistant operating inside a sandboxed \
workspace. You can read and edit files, run shell commands, search the \
workspace, and (when configured) search the web, by emitting a tool call. \
Use a tool only when it is necessary to answer the request; otherwise reply \
in plain text.";

const WIRE_FORMAT: &str = "To call a tool, emit exactly this block and nothing else on those \
lines:\n\n<<<TOOL_CALL>>>\n{\"tool\": \"<tool name>\", \"args\": { ... }}\n<<<END>>>\n\n\
Only one tool call per block. After a tool runs, its result is appended to the \
conversation as:\n\n[TOOL_RESULT]\n{\"tool_call_id\":\"<id>\",\"tool\":\"<name>\",\"ok\":<bool>,\"text\":\"<output>\",\"error\":null}\n[/TOOL_RESULT]\n\n\
Read the result before deciding whether to call another tool or answer the user.";

/// Renders the full system prompt for the given tool registry: a fixed
/// preamble, the wire-format instructions, then one entry per visible tool
/// with its name, description, and JSON schema.
#[must_use]
pub fn system_prompt(registry: &ToolRegistry) -> String {
    let mut prompt = String::new();
    prompt.push_str(PREAMBLE);
    prompt.push_str("\n\n");
    prompt.push_str(WIRE_FORMAT);
    prompt.push_str("\n\nAvailable tools:\n");

    for def in registry.definitions() {
        if def.hidden {
            continue;
        }
        prompt.push_str(&format!(
            "\n- {}: {}\n  schema: {}\n",
            def.name,
            def.description,
            serde_json::to_string(&def.parameters).unwrap_or_else(|_| "{}".to_string())
        ));
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use push_tools::{ToolCtx, ToolError, ToolExecutor, ToolFut};
    use serde_json::Value;

    struct StubTool;
    impl ToolExecutor for StubTool {
        fn name(&self) -> &'static str {
            "stub"
        }
        fn description(&self) -> &'static str {
            "a stub tool"
        }
        fn schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        fn is_side_effecting(&self, _args: &Value) -> bool {
            false
        }
        fn approval_summary(&self, _args: &Value) -> Result<String, ToolError> {
            Ok("stub".to_string())
        }
        fn execute<'a>(&'a self, _args: Value, _ctx: &'a mut ToolCtx) -> ToolFut<'a> {
            Box::pin(async { Ok(String::new()) })
        }
    }

    #[test]
    fn prompt_lists_every_registered_tool() {
        let mut registry = ToolRegistry::default();
        registry.register(Box::new(StubTool)).unwrap();
        let prompt = system_prompt(&registry);
        assert!(prompt.contains("<<<TOOL_CALL>>>"));
        assert!(prompt.contains("- stub: a stub tool"));
    }
}
