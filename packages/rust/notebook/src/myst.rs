//! MyST text notebook parser.
//!
//! Format (as written by jupytext):
//! - Optional YAML front matter between `---` lines (kernelspec, jupytext)
//! - Markdown text, split into cells by `+++` lines
//! - ```` ```{code-cell} <lang> ```` fences holding code cells, with options
//!   given as leading `:key: value` lines or a `---` YAML block
//! - ```` ```{raw-cell} ```` fences holding raw cells

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use nbdocs_shared::{NbdocsError, Result};

use crate::{Cell, CodeCell, Notebook, TextCell};

// ---------------------------------------------------------------------------
// Regex patterns (compiled once)
// ---------------------------------------------------------------------------

/// Matches an opening ```` ```{code-cell} lang ```` or ```` ```{raw-cell} ```` fence.
static CELL_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(`{3,})\{(code-cell|raw-cell)\}\s*(\S*)\s*$").expect("cell fence regex")
});

/// Matches a `:key: value` cell option line.
static OPTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^:([A-Za-z_][\w-]*):\s*(.*)$").expect("option regex")
});

/// Matches a `+++` markdown cell break with optional JSON metadata.
static BREAK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+\+\+\s*(\{.*\})?\s*$").expect("break regex")
});

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse a MyST text notebook.
pub fn parse_myst(content: &str) -> Result<Notebook> {
    let content = content.replace("\r\n", "\n");
    let lines: Vec<&str> = content.lines().collect();

    let (metadata, body_start) = parse_front_matter(&lines)?;
    let mut notebook = Notebook::new(metadata);

    let mut markdown: Vec<&str> = Vec::new();
    let mut pending_meta: Option<Map<String, Value>> = None;
    let mut fence_language: Option<String> = None;
    let mut i = body_start;

    while i < lines.len() {
        let line = lines[i];

        if let Some(caps) = BREAK_RE.captures(line) {
            flush_markdown(&mut notebook, &mut markdown, pending_meta.take());
            if let Some(json) = caps.get(1) {
                let meta: Map<String, Value> = serde_json::from_str(json.as_str()).map_err(|e| {
                    NbdocsError::parse(format!("line {}: invalid cell metadata: {e}", i + 1))
                })?;
                pending_meta = Some(meta);
            }
            i += 1;
            continue;
        }

        if let Some(caps) = CELL_FENCE_RE.captures(line) {
            flush_markdown(&mut notebook, &mut markdown, pending_meta.take());

            let fence = caps[1].to_string();
            let kind = caps[2].to_string();
            let language = caps[3].to_string();
            let opened_at = i + 1;

            let end = (i + 1..lines.len())
                .find(|&j| is_closing_fence(lines[j], &fence))
                .ok_or_else(|| {
                    NbdocsError::parse(format!("line {opened_at}: unterminated {{{kind}}} fence"))
                })?;

            let (options, source) = split_options(&lines[i + 1..end], opened_at)?;

            if kind == "code-cell" {
                if !language.is_empty() && fence_language.is_none() {
                    fence_language = Some(language);
                }
                let mut cell = CodeCell::new(source);
                cell.metadata = options;
                notebook.cells.push(Cell::Code(cell));
            } else {
                let mut cell = TextCell::new(source);
                cell.metadata = options;
                notebook.cells.push(Cell::Raw(cell));
            }

            i = end + 1;
            continue;
        }

        markdown.push(line);
        i += 1;
    }

    flush_markdown(&mut notebook, &mut markdown, pending_meta.take());

    if notebook.language().is_none() {
        if let Some(lang) = fence_language {
            notebook
                .metadata
                .insert("language_info".into(), serde_json::json!({ "name": lang }));
        }
    }

    Ok(notebook)
}

/// Split off YAML front matter. Returns the metadata and the first body line index.
fn parse_front_matter(lines: &[&str]) -> Result<(Map<String, Value>, usize)> {
    if lines.first().map(|l| l.trim_end()) != Some("---") {
        return Ok((Map::new(), 0));
    }

    let end = lines
        .iter()
        .skip(1)
        .position(|l| l.trim_end() == "---")
        .map(|p| p + 1)
        .ok_or_else(|| NbdocsError::parse("unterminated front matter"))?;

    let yaml = lines[1..end].join("\n");
    let metadata = yaml_mapping(&yaml, "front matter")?;
    Ok((metadata, end + 1))
}

/// Separate leading cell options from the cell body.
fn split_options(body: &[&str], opened_at: usize) -> Result<(Map<String, Value>, String)> {
    let mut options = Map::new();
    let mut start = 0;

    if body.first().map(|l| l.trim_end()) == Some("---") {
        let end = body
            .iter()
            .skip(1)
            .position(|l| l.trim_end() == "---")
            .map(|p| p + 1)
            .ok_or_else(|| {
                NbdocsError::parse(format!("line {opened_at}: unterminated cell option block"))
            })?;
        options = yaml_mapping(&body[1..end].join("\n"), "cell options")?;
        start = end + 1;
    } else {
        while let Some(caps) = body.get(start).and_then(|l| OPTION_RE.captures(l)) {
            let value: Value = serde_yaml::from_str(&caps[2]).map_err(|e| {
                NbdocsError::parse(format!(
                    "line {}: invalid value for option '{}': {e}",
                    opened_at + start + 1,
                    &caps[1]
                ))
            })?;
            options.insert(caps[1].to_string(), value);
            start += 1;
        }
    }

    // One blank line conventionally separates options from code.
    if start > 0 && body.get(start).is_some_and(|l| l.trim().is_empty()) {
        start += 1;
    }

    Ok((options, body[start..].join("\n")))
}

fn is_closing_fence(line: &str, fence: &str) -> bool {
    let trimmed = line.trim_end();
    trimmed.len() >= fence.len() && trimmed.chars().all(|c| c == '`')
}

/// Push the buffered markdown as a cell, dropping surrounding blank lines.
fn flush_markdown(
    notebook: &mut Notebook,
    buffer: &mut Vec<&str>,
    metadata: Option<Map<String, Value>>,
) {
    let first = buffer.iter().position(|l| !l.trim().is_empty());
    let last = buffer.iter().rposition(|l| !l.trim().is_empty());

    if let (Some(first), Some(last)) = (first, last) {
        let mut cell = TextCell::new(buffer[first..=last].join("\n"));
        cell.metadata = metadata.unwrap_or_default();
        notebook.cells.push(Cell::Markdown(cell));
    }

    buffer.clear();
}

fn yaml_mapping(yaml: &str, what: &str) -> Result<Map<String, Value>> {
    if yaml.trim().is_empty() {
        return Ok(Map::new());
    }

    let value: Value = serde_yaml::from_str(yaml)
        .map_err(|e| NbdocsError::parse(format!("invalid YAML in {what}: {e}")))?;

    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err(NbdocsError::parse(format!("{what} must be a YAML mapping"))),
    }
}
