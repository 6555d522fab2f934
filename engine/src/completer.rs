//! The input buffer the REPL's line editor is built on, plus the
//! completion engine that drives tab-completion over it.
//!
//! [`InputBuffer`] is a grapheme-aware single-or-multi-line editor in the
//! same style as a readline implementation: every movement and mutation
//! operates on grapheme boundaries, never raw bytes, so combining
//! characters and multi-byte glyphs behave the same as single-width ASCII.
//! [`HistoryRing`] layers recall on top of it: Up/Down walk older/newer
//! entries, the in-progress line is stashed the moment recall starts, and
//! pressing Down past the newest entry restores that stashed line rather
//! than clearing the input.

use std::path::{Path, PathBuf};

use unicode_segmentation::UnicodeSegmentation;

const DEFAULT_HISTORY_CAPACITY: usize = 200;

/// A `[A-Za-z0-9_]` run; anything else is a word boundary.
fn is_word_byte(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Grapheme-aware, line-aware input editor.
#[derive(Debug, Clone, Default)]
pub struct InputBuffer {
    text: String,
    cursor: usize,
}

impl InputBuffer {
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn take_text(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.text)
    }

    pub fn set_text(&mut self, text: String) {
        self.text = text;
        self.cursor = self.grapheme_count();
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }

    #[must_use]
    pub fn grapheme_count(&self) -> usize {
        self.text.graphemes(true).count()
    }

    fn byte_index_at(&self, grapheme_index: usize) -> usize {
        self.text.grapheme_indices(true).nth(grapheme_index).map_or(self.text.len(), |(i, _)| i)
    }

    fn byte_index(&self) -> usize {
        self.byte_index_at(self.cursor)
    }

    pub fn move_cursor_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_cursor_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.grapheme_count());
    }

    pub fn move_cursor_home(&mut self) {
        self.cursor = 0;
    }

    pub fn move_cursor_end(&mut self) {
        self.cursor = self.grapheme_count();
    }

    /// Moves left to the start of the previous word (`[A-Za-z0-9_]` run),
    /// skipping any non-word characters first.
    pub fn move_word_left(&mut self) {
        self.cursor = self.word_left_index();
    }

    /// Moves right to the start of the next word, skipping the rest of the
    /// current word and any intervening non-word characters.
    pub fn move_word_right(&mut self) {
        self.cursor = self.word_right_index();
    }

    fn grapheme_char_at(&self, index: usize) -> Option<char> {
        self.text.graphemes(true).nth(index)?.chars().next()
    }

    fn word_left_index(&self) -> usize {
        let mut idx = self.cursor;
        while idx > 0 && self.grapheme_char_at(idx - 1).is_some_and(|c| !is_word_byte(c)) {
            idx -= 1;
        }
        while idx > 0 && self.grapheme_char_at(idx - 1).is_some_and(is_word_byte) {
            idx -= 1;
        }
        idx
    }

    fn word_right_index(&self) -> usize {
        let max = self.grapheme_count();
        let mut idx = self.cursor;
        while idx < max && self.grapheme_char_at(idx).is_some_and(is_word_byte) {
            idx += 1;
        }
        while idx < max && self.grapheme_char_at(idx).is_some_and(|c| !is_word_byte(c)) {
            idx += 1;
        }
        idx
    }

    pub fn enter_char(&mut self, c: char) {
        let byte_index = self.byte_index();
        self.text.insert(byte_index, c);
        self.cursor += 1;
    }

    pub fn enter_newline(&mut self) {
        self.enter_char('\n');
    }

    /// Bulk-inserts `text` at the cursor, normalizing `\r\n` and bare `\r`
    /// to `\n` first so a pasted multi-line block behaves the same
    /// regardless of the terminal's line-ending convention.
    pub fn enter_text(&mut self, text: &str) {
        let normalized = normalize_line_endings_for_paste(text);
        let byte_index = self.byte_index();
        self.text.insert_str(byte_index, &normalized);
        self.cursor += normalized.graphemes(true).count();
    }

    pub fn delete_char(&mut self) {
        if self.cursor == 0 {
            return;
        }
        let start = self.byte_index_at(self.cursor - 1);
        let end = self.byte_index_at(self.cursor);
        self.text.replace_range(start..end, "");
        self.cursor -= 1;
    }

    pub fn delete_char_forward(&mut self) {
        if self.cursor >= self.grapheme_count() {
            return;
        }
        let start = self.byte_index_at(self.cursor);
        let end = self.byte_index_at(self.cursor + 1);
        self.text.replace_range(start..end, "");
    }

    /// Deletes back to (but not across) the previous word boundary, same
    /// semantics as a shell's Ctrl-W.
    pub fn delete_word_backward(&mut self) {
        let target = self.word_left_index();
        let start = self.byte_index_at(target);
        let end = self.byte_index_at(self.cursor);
        self.text.replace_range(start..end, "");
        self.cursor = target;
    }

    /// Deletes from the cursor to the start of the current line (kill-line
    /// backward, Ctrl-U).
    pub fn kill_line_backward(&mut self) {
        let line_start = self.current_line_start();
        let start = self.byte_index_at(line_start);
        let end = self.byte_index_at(self.cursor);
        self.text.replace_range(start..end, "");
        self.cursor = line_start;
    }

    /// Deletes from the cursor to the end of the current line (kill-line
    /// forward, Ctrl-K).
    pub fn kill_line_forward(&mut self) {
        let line_end = self.current_line_end();
        let start = self.byte_index_at(self.cursor);
        let end = self.byte_index_at(line_end);
        self.text.replace_range(start..end, "");
    }

    fn current_line_start(&self) -> usize {
        let mut idx = self.cursor;
        while idx > 0 && self.grapheme_char_at(idx - 1) != Some('\n') {
            idx -= 1;
        }
        idx
    }

    fn current_line_end(&self) -> usize {
        let max = self.grapheme_count();
        let mut idx = self.cursor;
        while idx < max && self.grapheme_char_at(idx) != Some('\n') {
            idx += 1;
        }
        idx
    }
}

fn normalize_line_endings_for_paste(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// A bounded recall ring over previously submitted lines.
///
/// Duplicates of the immediately preceding entry are dropped on push so
/// repeatedly submitting the same line doesn't pad the ring. Recall stashes
/// whatever was being typed the moment Up is first pressed, and restores it
/// when Down walks back past the newest entry.
#[derive(Debug, Clone)]
pub struct HistoryRing {
    entries: Vec<String>,
    capacity: usize,
    cursor: Option<usize>,
    stash: Option<String>,
}

impl Default for HistoryRing {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryRing {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: Vec::new(), capacity, cursor: None, stash: None }
    }

    pub fn push(&mut self, line: String) {
        if line.is_empty() {
            return;
        }
        if self.entries.last().is_some_and(|last| last == &line) {
            self.reset_navigation();
            return;
        }
        self.entries.push(line);
        if self.entries.len() > self.capacity {
            self.entries.remove(0);
        }
        self.reset_navigation();
    }

    pub fn reset_navigation(&mut self) {
        self.cursor = None;
        self.stash = None;
    }

    pub fn navigate_up(&mut self, current: &str) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        match self.cursor {
            None => {
                self.stash = Some(current.to_owned());
                self.cursor = Some(self.entries.len() - 1);
                self.entries.last().map(String::as_str)
            }
            Some(0) => None,
            Some(idx) => {
                self.cursor = Some(idx - 1);
                self.entries.get(idx - 1).map(String::as_str)
            }
        }
    }

    pub fn navigate_down(&mut self) -> Option<&str> {
        match self.cursor {
            None => None,
            Some(idx) if idx + 1 >= self.entries.len() => {
                self.cursor = None;
                self.stash.as_deref()
            }
            Some(idx) => {
                self.cursor = Some(idx + 1);
                self.entries.get(idx + 1).map(String::as_str)
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A single tab-completion candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub replacement: String,
    pub display: String,
}

/// Reserved top-level slash commands, independent of any loaded skill.
pub const RESERVED_COMMANDS: &[&str] = crate::skills::RESERVED_COMMAND_NAMES;

/// Commands that take an extra level of argument-specific completion.
const ARG_COMPLETION_COMMANDS: &[&str] = &["model", "provider"];

pub struct Completer<'a> {
    pub workspace_root: &'a Path,
    pub skill_names: &'a [String],
    pub known_models: &'a [String],
    pub known_providers: &'a [String],
}

impl<'a> Completer<'a> {
    /// Computes completions for the current input line, given the cursor's
    /// grapheme index within it.
    #[must_use]
    pub fn complete(&self, line: &str, cursor: usize) -> Vec<Completion> {
        let prefix: String = line.graphemes(true).take(cursor).collect();

        if let Some(at_start) = find_at_fragment_start(&prefix) {
            let fragment = &prefix[at_start + 1..];
            return self.complete_workspace_path(fragment);
        }

        if let Some(stripped) = prefix.strip_prefix('/') {
            if !stripped.contains(' ') {
                return self.complete_command_name(stripped);
            }
            let mut parts = stripped.splitn(2, ' ');
            let cmd = parts.next().unwrap_or_default();
            let arg = parts.next().unwrap_or_default();
            if ARG_COMPLETION_COMMANDS.contains(&cmd) {
                return self.complete_command_arg(cmd, arg);
            }
            if cmd == "session" && arg.starts_with("rename") {
                return Vec::new();
            }
            if cmd == "skills" && arg.starts_with("reload") {
                return Vec::new();
            }
        }

        Vec::new()
    }

    fn complete_command_name(&self, fragment: &str) -> Vec<Completion> {
        let mut names: Vec<&str> = RESERVED_COMMANDS.to_vec();
        names.extend(self.skill_names.iter().map(String::as_str));
        names.sort_unstable();
        names.dedup();

        names
            .into_iter()
            .filter(|name| name.starts_with(fragment))
            .map(|name| Completion { replacement: format!("/{name}"), display: format!("/{name}") })
            .collect()
    }

    fn complete_command_arg(&self, cmd: &str, fragment: &str) -> Vec<Completion> {
        let candidates: &[String] = match cmd {
            "model" => self.known_models,
            "provider" => self.known_providers,
            _ => return Vec::new(),
        };
        candidates
            .iter()
            .filter(|c| c.starts_with(fragment))
            .map(|c| Completion { replacement: format!("/{cmd} {c}"), display: c.clone() })
            .collect()
    }

    fn complete_workspace_path(&self, fragment: &str) -> Vec<Completion> {
        let (dir_part, file_fragment) = match fragment.rsplit_once('/') {
            Some((dir, file)) => (dir, file),
            None => ("", fragment),
        };
        let search_dir = if dir_part.is_empty() { self.workspace_root.to_path_buf() } else { self.workspace_root.join(dir_part) };

        let Ok(read_dir) = std::fs::read_dir(&search_dir) else {
            return Vec::new();
        };

        let mut entries: Vec<Completion> = read_dir
            .filter_map(|e| e.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.starts_with(file_fragment) {
                    return None;
                }
                let is_dir = entry.file_type().ok()?.is_dir();
                let rel = if dir_part.is_empty() { name.clone() } else { format!("{dir_part}/{name}") };
                let display = if is_dir { format!("{rel}/") } else { rel.clone() };
                Some(Completion { replacement: format!("@{rel}"), display: format!("@{display}") })
            })
            .collect();
        entries.sort_by(|a, b| a.display.cmp(&b.display));
        entries
    }
}

fn find_at_fragment_start(prefix: &str) -> Option<usize> {
    let at_index = prefix.rfind('@')?;
    let fragment = &prefix[at_index + 1..];
    if fragment.contains(char::is_whitespace) {
        return None;
    }
    Some(at_index)
}

#[must_use]
pub fn workspace_path_exists(root: &Path, relative: &str) -> bool {
    root.join(relative).exists()
}

#[must_use]
pub fn resolve_workspace_relative(root: &Path, relative: &str) -> PathBuf {
    root.join(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_backspace() {
        let mut buf = InputBuffer::default();
        buf.enter_char('h');
        buf.enter_char('i');
        assert_eq!(buf.text(), "hi");
        buf.delete_char();
        assert_eq!(buf.text(), "h");
    }

    #[test]
    fn backspace_merges_lines() {
        let mut buf = InputBuffer::default();
        buf.set_text("a\nb".to_string());
        buf.move_cursor_left();
        buf.move_cursor_left();
        buf.delete_char();
        assert_eq!(buf.text(), "ab");
    }

    #[test]
    fn home_and_end() {
        let mut buf = InputBuffer::default();
        buf.set_text("hello".to_string());
        buf.move_cursor_home();
        assert_eq!(buf.cursor(), 0);
        buf.move_cursor_end();
        assert_eq!(buf.cursor(), 5);
    }

    #[test]
    fn word_left_and_right() {
        let mut buf = InputBuffer::default();
        buf.set_text("one two three".to_string());
        buf.move_word_left();
        assert_eq!(buf.cursor(), 8);
        buf.move_word_left();
        assert_eq!(buf.cursor(), 4);
        buf.move_word_right();
        assert_eq!(buf.cursor(), 8);
    }

    #[test]
    fn kill_line_backward_and_forward() {
        let mut buf = InputBuffer::default();
        buf.set_text("hello world".to_string());
        buf.kill_line_backward();
        assert_eq!(buf.text(), "");

        buf.set_text("hello world".to_string());
        buf.move_cursor_home();
        buf.kill_line_forward();
        assert_eq!(buf.text(), "");
    }

    #[test]
    fn kill_word_backward() {
        let mut buf = InputBuffer::default();
        buf.set_text("hello world".to_string());
        buf.delete_word_backward();
        assert_eq!(buf.text(), "hello ");
    }

    #[test]
    fn paste_normalizes_crlf_and_bare_cr() {
        let mut buf = InputBuffer::default();
        buf.enter_text("line1\r\nline2\rline3");
        assert_eq!(buf.text(), "line1\nline2\nline3");
    }

    #[test]
    fn history_dedupes_immediate_repeat() {
        let mut history = HistoryRing::default();
        history.push("hello".to_string());
        history.push("hello".to_string());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn history_stashes_on_enter_and_restores_past_newest() {
        let mut history = HistoryRing::default();
        history.push("first".to_string());
        history.push("second".to_string());

        assert_eq!(history.navigate_up("draft"), Some("second"));
        assert_eq!(history.navigate_up(""), Some("first"));
        assert_eq!(history.navigate_down(), Some("second"));
        assert_eq!(history.navigate_down(), Some("draft"));
    }

    #[test]
    fn slash_prefix_completes_reserved_and_skill_names() {
        let skills = vec!["review".to_string()];
        let completer = Completer { workspace_root: Path::new("."), skill_names: &skills, known_models: &[], known_providers: &[] };
        let completions = completer.complete("/re", 3);
        let displays: Vec<&str> = completions.iter().map(|c| c.display.as_str()).collect();
        assert!(displays.contains(&"/review"));
    }

    #[test]
    fn model_arg_completion() {
        let models = vec!["claude-opus-4".to_string(), "claude-haiku".to_string()];
        let completer = Completer { workspace_root: Path::new("."), skill_names: &[], known_models: &models, known_providers: &[] };
        let completions = completer.complete("/model claude-o", 15);
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].replacement, "/model claude-opus-4");
    }

    #[test]
    fn at_fragment_completes_workspace_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();

        let completer = Completer { workspace_root: dir.path(), skill_names: &[], known_models: &[], known_providers: &[] };
        let completions = completer.complete("look at @ma", 11);
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].replacement, "@main.rs");
    }

    #[test]
    fn at_fragment_with_whitespace_after_is_not_a_trigger() {
        let completer = Completer { workspace_root: Path::new("."), skill_names: &[], known_models: &[], known_providers: &[] };
        let completions = completer.complete("look at @foo bar", 16);
        assert!(completions.is_empty());
    }
}
