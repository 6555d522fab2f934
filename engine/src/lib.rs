//! Provider-agnostic agent core: tool-call parsing, skill loading, the
//! input buffer/completer, approval gating, and the round loop that ties
//! them together.
//!
//! This crate has no UI of its own — `push-cli` drives [`agent_loop::AgentLoop`]
//! from a REPL, but anything that can push a [`push_types::SessionState`]
//! through one user turn and read back an [`agent_loop::UiEvent`] stream can
//! reuse it the same way.

pub mod agent_loop;
pub mod approval;
pub mod completer;
pub mod config;
pub mod skills;
pub mod tool_call_parser;

pub use agent_loop::{AgentLoop, AgentLoopError, DEFAULT_MAX_ROUNDS, UiEvent};
pub use approval::{ApprovalFut, ApprovalGate, ApprovalHook, decision_allows, gate};
pub use completer::{HistoryRing, InputBuffer};
pub use skills::{Skill, SkillError, load_skills, parse_skill_source, validate_skill_name};
pub use tool_call_parser::{KnownTools, MalformedReason, ParseOutcome, parse_tool_calls};
