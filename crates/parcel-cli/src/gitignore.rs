//! Managed `.gitignore` section for git-backed datasets
//!
//! Only `data/`, `metrics.csv` and the config belong in history; staging
//! payloads, command logs and secrets stay out.

use crate::error::Result;
use std::fs;
use std::path::Path;

/// First line of the managed section
const SECTION_MARKER: &str = "# parcel: working files";

const ENTRIES: &[&str] = &[".DS_Store", "incomplete/", "log/", "/secrets*"];

/// What [`ensure_section`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitignoreChange {
    Created,
    Updated,
    Unchanged,
}

/// Make sure every managed entry is ignored
///
/// Lines outside the managed section are left alone. Missing entries are
/// added to the end of the section, or a new section is appended.
pub fn ensure_section(dataset: &Path) -> Result<GitignoreChange> {
    let path = dataset.join(".gitignore");
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            fs::write(&path, render_section(ENTRIES))?;
            return Ok(GitignoreChange::Created);
        },
        Err(e) => return Err(e.into()),
    };

    let updated = merge(&content);
    if updated == content {
        return Ok(GitignoreChange::Unchanged);
    }
    fs::write(&path, updated)?;
    Ok(GitignoreChange::Updated)
}

fn render_section(entries: &[&str]) -> String {
    let mut section = format!("{}\n", SECTION_MARKER);
    for entry in entries {
        section.push_str(entry);
        section.push('\n');
    }
    section
}

fn merge(content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let Some(start) = lines.iter().position(|l| *l == SECTION_MARKER) else {
        let mut out = content.to_string();
        if !out.is_empty() {
            if !out.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
        }
        out.push_str(&render_section(ENTRIES));
        return out;
    };

    // The section runs until a blank line or the next comment.
    let end = lines[start + 1..]
        .iter()
        .position(|l| l.trim().is_empty() || l.starts_with('#'))
        .map_or(lines.len(), |offset| start + 1 + offset);

    let present: Vec<&str> = lines[start + 1..end].iter().map(|l| l.trim()).collect();
    let missing: Vec<&str> = ENTRIES
        .iter()
        .copied()
        .filter(|entry| !present.contains(entry))
        .collect();
    if missing.is_empty() {
        return content.to_string();
    }

    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + missing.len());
    out.extend_from_slice(&lines[..end]);
    out.extend(missing);
    out.extend_from_slice(&lines[end..]);

    let mut merged = out.join("\n");
    merged.push('\n');
    merged
}
