//! Cross-cutting infrastructure shared by the tool registry and the agent
//! loop: anchor-stable line editing (hashline refs), the append-only
//! session journal, and provider-error formatting.

pub mod errors;
pub mod hashline;
pub mod session_store;

pub use errors::{extract_error_message, format_stream_error, is_auth_error, split_api_error};
pub use hashline::{
    AppliedEdit, EditOp, EditOutcome, HashlineError, LineRef, RefParseError, RenderedView,
    apply_edits, calculate_content_version, check_expected_version, line_hash, render_anchored,
};
pub use session_store::{SessionStore, SessionStoreError};
