//! `text/html` output conversion.
//!
//! Rich outputs such as DataFrame tables arrive as HTML. Tables are turned
//! into pipe tables with `scraper` (`htmd` has no table support); the rest
//! goes through `htmd` and the leftover-tag cleanup.

use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use nbdocs_shared::{NbdocsError, Result};

use crate::cleanup;

/// Convert an HTML fragment to Markdown.
pub(crate) fn html_to_markdown(html: &str) -> Result<String> {
    let (html, tables) = extract_tables(html);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "iframe", "noscript"])
        .build();

    let mut markdown = converter
        .convert(&html)
        .map_err(|e| NbdocsError::render(format!("HTML conversion failed: {e}")))?;

    for (i, table) in tables.iter().enumerate() {
        markdown = markdown.replacen(&placeholder(i), &format!("\n\n{table}\n\n"), 1);
    }

    let markdown = cleanup::fix_code_block_languages(&markdown);
    let markdown = cleanup::strip_leftover_html(&markdown);

    debug!(tables = tables.len(), len = markdown.len(), "converted HTML output");
    Ok(markdown.trim().to_string())
}

fn placeholder(i: usize) -> String {
    format!("NBDOCSTABLE{i}X")
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Swap every top-level `<table>` for a placeholder paragraph.
///
/// Replacement runs on the re-serialized fragment, so each table's
/// serialization matches the surrounding text exactly.
fn extract_tables(html: &str) -> (String, Vec<String>) {
    let doc = Html::parse_fragment(html);
    let table_sel = Selector::parse("table").expect("valid selector");

    let mut serialized = doc.root_element().inner_html();
    let mut tables = Vec::new();

    for table_el in doc.select(&table_sel) {
        let outer = table_el.html();
        if !serialized.contains(&outer) {
            // Nested inside a table already replaced.
            continue;
        }
        let md_table = html_table_to_markdown(&table_el);
        let marker = format!("<p>{}</p>", placeholder(tables.len()));
        serialized = serialized.replacen(&outer, &marker, 1);
        tables.push(md_table);
    }

    (serialized, tables)
}

/// Convert a single HTML table element to a markdown table string.
///
/// The first row is the header. Header cells inside body rows (the
/// row index of a DataFrame) are kept in place as ordinary cells.
fn html_table_to_markdown(table: &ElementRef) -> String {
    let tr_sel = Selector::parse("tr").expect("valid selector");
    let cell_sel = Selector::parse("th, td").expect("valid selector");

    let mut rows: Vec<Vec<String>> = table
        .select(&tr_sel)
        .map(|tr| tr.select(&cell_sel).map(|cell| cell_text(&cell)).collect::<Vec<_>>())
        .filter(|row: &Vec<String>| !row.is_empty())
        .collect();

    let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if col_count == 0 {
        return String::new();
    }

    for row in &mut rows {
        row.resize(col_count, String::new());
    }

    let line = |cells: &[String]| format!("| {} |", cells.join(" | "));

    let mut md = Vec::with_capacity(rows.len() + 1);
    md.push(line(&rows[0]));
    md.push(line(&vec!["---".to_string(); col_count]));
    md.extend(rows[1..].iter().map(|r| line(r)));
    md.join("\n")
}

/// Cell text with whitespace collapsed and pipes escaped.
fn cell_text(cell: &ElementRef) -> String {
    cell.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('|', "\\|")
}
