//! Post-render cleanup pipeline for Markdown output.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! Passes that touch whitespace leave fenced code blocks alone, since
//! captured program output must survive verbatim.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on assembled Markdown text.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.to_string();

    result = strip_trailing_whitespace(&result);
    result = collapse_blank_lines(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Fence tracking
// ---------------------------------------------------------------------------

/// Tags each line with whether it sits inside a fenced code block.
/// Fence delimiter lines count as inside. An opening backtick fence
/// carries no further backticks in its info string.
pub(crate) fn fenced_lines(md: &str) -> Vec<(&str, bool)> {
    let mut open: Option<usize> = None;
    let mut out = Vec::new();

    for line in md.lines() {
        let trimmed = line.trim();
        let ticks = trimmed.chars().take_while(|&c| c == '`').count();

        match open {
            None if ticks >= 3 && !trimmed[ticks..].contains('`') => {
                open = Some(ticks);
                out.push((line, true));
            }
            Some(n) if ticks >= n && ticks == trimmed.len() => {
                open = None;
                out.push((line, true));
            }
            Some(_) => out.push((line, true)),
            None => out.push((line, false)),
        }
    }

    out
}

/// Shortest backtick fence that cannot be closed by `content`.
pub(crate) fn fence_for(content: &str) -> String {
    let longest = content
        .lines()
        .map(|l| l.trim_start().chars().take_while(|&c| c == '`').count())
        .max()
        .unwrap_or(0);
    "`".repeat(longest.max(2) + 1)
}

// ---------------------------------------------------------------------------
// Pass 1: Trailing whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace on lines outside code fences.
fn strip_trailing_whitespace(md: &str) -> String {
    fenced_lines(md)
        .into_iter()
        .map(|(line, fenced)| if fenced { line } else { line.trim_end() })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of blank lines outside code fences into one.
fn collapse_blank_lines(md: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut previous_blank = true; // drops leading blank lines

    for (line, fenced) in fenced_lines(md) {
        let blank = !fenced && line.trim().is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;
        lines.push(line);
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 3: Trailing newline
// ---------------------------------------------------------------------------

/// Ensure the file ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Output text passes
// ---------------------------------------------------------------------------

/// Remove ANSI colour and cursor escapes from captured output.
pub(crate) fn strip_ansi(text: &str) -> String {
    static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07").expect("valid regex")
    });

    ANSI_RE.replace_all(text, "").to_string()
}

/// Remove stray layout tags left over from HTML conversion, keeping their text.
pub(crate) fn strip_leftover_html(md: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary|style)(?:\s[^>]*)?>").expect("valid regex")
    });

    fenced_lines(md)
        .into_iter()
        .map(|(line, fenced)| {
            if fenced {
                line.to_string()
            } else {
                HTML_TAG_RE.replace_all(line, "").to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Rewrite class-style fence hints (`language-py`, `lang-r`) to bare names.
pub(crate) fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "```$1").to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
