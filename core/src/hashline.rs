//! Anchor-stable line editing: every line the model reads carries a short
//! content hash, and edits reference lines by that hash rather than by raw
//! line number, so the model can keep editing against a file it read
//! earlier even if neighboring edits have shifted every subsequent line.
//!
//! The hash-then-validate-then-rehash shape mirrors the workspace's older
//! region-hash tool, narrowed from a whole-range digest to one hash per
//! line: a ref names a single line, and an edit either matches it exactly
//! or is rejected as stale.

use sha1::{Digest, Sha1};

/// Leading hex characters of a line hash, as embedded in a rendered view ref.
const LINE_HASH_LEN: usize = 7;
/// Leading hex characters of a whole-file content version.
const CONTENT_VERSION_LEN: usize = 12;

fn hex_digest(bytes: &[u8], len: usize) -> String {
    let mut hasher = Sha1::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(len);
    hex
}

/// `<7-hex-hash>` over the raw line, excluding any trailing newline.
pub fn line_hash(line: &str) -> String {
    hex_digest(line.as_bytes(), LINE_HASH_LEN)
}

/// `<12-hex>` over the full file contents.
pub fn calculate_content_version(content: &str) -> String {
    hex_digest(content.as_bytes(), CONTENT_VERSION_LEN)
}

fn split_lines(content: &str) -> Vec<String> {
    if content.is_empty() {
        return Vec::new();
    }
    content.split('\n').map(str::to_string).collect()
}

/// The annotated view the model reads: one `<lineNo>|<hash>| <text>` row
/// per line in range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedView {
    pub text: String,
    pub start_line: u32,
    pub end_line: u32,
    pub total_lines: u32,
}

/// Render `content` with hashline annotations for lines `start_line..=end_line`
/// (1-indexed, inclusive); omitted bounds default to the full file.
pub fn render_anchored(content: &str, start_line: Option<u32>, end_line: Option<u32>) -> RenderedView {
    let lines = split_lines(content);
    let total_lines = lines.len() as u32;
    let start = start_line.unwrap_or(1).max(1);
    let end = end_line.unwrap_or(total_lines).min(total_lines.max(start));

    let mut text = String::new();
    for (idx, line) in lines.iter().enumerate() {
        let line_no = (idx + 1) as u32;
        if line_no < start || line_no > end {
            continue;
        }
        let hash = line_hash(line);
        text.push_str(&format!("{line_no}|{hash}| {line}\n"));
    }

    RenderedView { text, start_line: start, end_line: end, total_lines }
}

/// A resolved reference to exactly one line, either by hash alone or
/// line-number-qualified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineRef {
    HashOnly(String),
    Qualified(u32, String),
}

#[derive(Debug, thiserror::Error)]
pub enum RefParseError {
    #[error("empty ref")]
    Empty,
}

impl LineRef {
    /// Accepts `<hash>`, `<lineNo>:<hash>`, or `<lineNo>|<hash>`.
    pub fn parse(raw: &str) -> Result<Self, RefParseError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(RefParseError::Empty);
        }
        for sep in [':', '|'] {
            if let Some((left, right)) = raw.split_once(sep)
                && let Ok(line_no) = left.trim().parse::<u32>()
            {
                return Ok(Self::Qualified(line_no, right.trim().to_string()));
            }
        }
        Ok(Self::HashOnly(raw.to_string()))
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum HashlineError {
    #[error("stale ref at line {line}: expected {expected}, found {found}")]
    StaleRef { line: u32, expected: String, found: String },
    #[error("stale ref: no line hashes to {hash}")]
    StaleRefNoMatch { hash: String },
    #[error("ambiguous ref: {hash} matched {count} lines; use line-qualified ref like \"12:abc1234\"")]
    AmbiguousRef { hash: String, count: usize },
    #[error("line {line} is out of range (file has {total} lines)")]
    OutOfRange { line: u32, total: u32 },
    #[error("expected content version {expected}, file is at {actual}")]
    VersionMismatch { expected: String, actual: String },
}

fn resolve_ref(lines: &[String], line_ref: &LineRef) -> Result<usize, HashlineError> {
    match line_ref {
        LineRef::Qualified(line_no, hash) => {
            let idx = *line_no as usize;
            if idx == 0 || idx > lines.len() {
                return Err(HashlineError::OutOfRange { line: *line_no, total: lines.len() as u32 });
            }
            let actual = line_hash(&lines[idx - 1]);
            if &actual != hash {
                return Err(HashlineError::StaleRef { line: *line_no, expected: hash.clone(), found: actual });
            }
            Ok(idx - 1)
        }
        LineRef::HashOnly(hash) => {
            let matches: Vec<usize> = lines
                .iter()
                .enumerate()
                .filter(|(_, line)| &line_hash(line) == hash)
                .map(|(idx, _)| idx)
                .collect();
            match matches.len() {
                0 => Err(HashlineError::StaleRefNoMatch { hash: hash.clone() }),
                1 => Ok(matches[0]),
                count => Err(HashlineError::AmbiguousRef { hash: hash.clone(), count }),
            }
        }
    }
}

/// One requested edit against a hashline ref.
#[derive(Debug, Clone)]
pub enum EditOp {
    ReplaceLine { line_ref: LineRef, content: String },
    DeleteLine { line_ref: LineRef },
    InsertBefore { line_ref: LineRef, content: String },
    InsertAfter { line_ref: LineRef, content: String },
}

impl EditOp {
    fn line_ref(&self) -> &LineRef {
        match self {
            Self::ReplaceLine { line_ref, .. }
            | Self::DeleteLine { line_ref }
            | Self::InsertBefore { line_ref, .. }
            | Self::InsertAfter { line_ref, .. } => line_ref,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::ReplaceLine { .. } => "replace_line",
            Self::DeleteLine { .. } => "delete_line",
            Self::InsertBefore { .. } => "insert_before",
            Self::InsertAfter { .. } => "insert_after",
        }
    }
}

/// The resulting line number of one applied op, so the model can chain
/// further edits against the post-edit state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEdit {
    pub op: &'static str,
    pub resulting_line: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditOutcome {
    pub content: String,
    pub applied: Vec<AppliedEdit>,
}

/// Apply `edits` in order against the mutating line array. Each op
/// re-indexes the array for subsequent ops, and refs are resolved against
/// the state left by prior ops in the same batch — so `expected_version`
/// (if the caller wants a whole-file guard) should be checked by the
/// caller against `calculate_content_version` before calling this.
///
/// Failure on any edit aborts the whole batch; the caller must not write
/// `content` back on error.
pub fn apply_edits(content: &str, edits: &[EditOp]) -> Result<EditOutcome, HashlineError> {
    let mut lines = split_lines(content);
    let mut applied = Vec::with_capacity(edits.len());

    for edit in edits {
        let idx = resolve_ref(&lines, edit.line_ref())?;
        let resulting_line = match edit {
            EditOp::ReplaceLine { content, .. } => {
                lines[idx] = content.clone();
                idx + 1
            }
            EditOp::DeleteLine { .. } => {
                lines.remove(idx);
                idx + 1
            }
            EditOp::InsertBefore { content, .. } => {
                lines.insert(idx, content.clone());
                idx + 1
            }
            EditOp::InsertAfter { content, .. } => {
                lines.insert(idx + 1, content.clone());
                idx + 2
            }
        };
        applied.push(AppliedEdit { op: edit.name(), resulting_line: resulting_line as u32 });
    }

    Ok(EditOutcome { content: lines.join("\n"), applied })
}

/// Guard an edit batch against a whole-file version the caller captured at
/// read time.
pub fn check_expected_version(content: &str, expected: Option<&str>) -> Result<(), HashlineError> {
    let Some(expected) = expected else { return Ok(()) };
    let actual = calculate_content_version(content);
    if actual != expected {
        return Err(HashlineError::VersionMismatch { expected: expected.to_string(), actual });
    }
    Ok(())
}
