//! Skill loading: turns a directory of Markdown files into named prompt
//! templates the user can invoke with `/<name> <args>`.
//!
//! A skill is a single Markdown file `<name>.md`. Its first `# heading`
//! becomes the one-line description shown in `/help` and tab completion;
//! everything after that heading is the template, with every `{{args}}`
//! occurrence replaced by the user's argument string at invocation time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Names already claimed by built-in slash commands; a skill can't shadow one.
pub const RESERVED_COMMAND_NAMES: &[&str] = &[
    "q", "quit", "clear", "cancel", "tool", "model", "provider", "ctx", "session", "skills", "help",
];

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("skill name '{0}' is not a valid identifier")]
    InvalidName(String),
    #[error("skill name '{0}' collides with a reserved command")]
    ReservedName(String),
    #[error("failed to read skill file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("skill file {0} has no content after its heading")]
    EmptyTemplate(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub template: String,
    pub source: PathBuf,
}

impl Skill {
    /// Renders this skill's template for one invocation, replacing every
    /// `{{args}}` occurrence with `args` and trimming the result.
    #[must_use]
    pub fn render(&self, args: &str) -> String {
        self.template.replace("{{args}}", args).trim().to_string()
    }
}

/// Validates a skill's base name: lowercase alphanumerics and hyphens,
/// no leading/trailing hyphen, not a reserved command.
pub fn validate_skill_name(name: &str) -> Result<(), SkillError> {
    let valid = {
        let bytes = name.as_bytes();
        !bytes.is_empty()
            && bytes[0].is_ascii_alphanumeric()
            && bytes[bytes.len() - 1].is_ascii_alphanumeric()
            && bytes.iter().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
    };
    if !valid {
        return Err(SkillError::InvalidName(name.to_string()));
    }
    if RESERVED_COMMAND_NAMES.contains(&name) {
        return Err(SkillError::ReservedName(name.to_string()));
    }
    Ok(())
}

/// Parses one skill file's contents: the first `# heading` line becomes the
/// description, and everything after it is the template.
pub fn parse_skill_source(name: &str, source_path: &Path, contents: &str) -> Result<Skill, SkillError> {
    let mut description = String::new();
    let mut heading_line_index = None;

    for (index, line) in contents.lines().enumerate() {
        if let Some(heading) = line.strip_prefix("# ") {
            description = heading.trim().to_string();
            heading_line_index = Some(index);
            break;
        }
    }

    let Some(heading_index) = heading_line_index else {
        return Err(SkillError::EmptyTemplate(source_path.to_path_buf()));
    };

    let template: String = contents.lines().skip(heading_index + 1).collect::<Vec<_>>().join("\n");
    let template = template.trim().to_string();
    if template.is_empty() {
        return Err(SkillError::EmptyTemplate(source_path.to_path_buf()));
    }

    Ok(Skill { name: name.to_string(), description, template, source: source_path.to_path_buf() })
}

fn load_dir_into(dir: &Path, out: &mut BTreeMap<String, Skill>) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    entries.sort();

    for path in entries {
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        if validate_skill_name(stem).is_err() {
            tracing::warn!(path = %path.display(), "skipping skill file with invalid name");
            continue;
        }
        let contents = std::fs::read_to_string(&path)?;
        match parse_skill_source(stem, &path, &contents) {
            Ok(skill) => {
                out.insert(skill.name.clone(), skill);
            }
            Err(err) => tracing::warn!(path = %path.display(), error = %err, "skipping unparseable skill file"),
        }
    }
    Ok(())
}

/// Discovers skills from a built-in directory and a workspace-local
/// override directory. A skill present in both wins from the workspace
/// copy, matching the general rule that local overrides beat shipped
/// defaults.
pub fn load_skills(builtin_dir: &Path, workspace_dir: &Path) -> std::io::Result<BTreeMap<String, Skill>> {
    let mut skills = BTreeMap::new();
    load_dir_into(builtin_dir, &mut skills)?;
    load_dir_into(workspace_dir, &mut skills)?;
    Ok(skills)
}
