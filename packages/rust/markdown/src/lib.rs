//! Executed-notebook to Markdown rendering.
//!
//! Walks the cells of an executed notebook and emits Markdown: prose cells
//! verbatim, code cells as fenced blocks followed by their outputs. Image
//! outputs become asset files referenced from the text. The assembled
//! document then goes through a series of cleanup passes.
//!
//! Rendering is a pure function of the notebook and options, so rendering
//! the same executed notebook twice yields byte-identical Markdown.

mod cleanup;
mod html;

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument};

use nbdocs_notebook::{Cell, CodeCell, MimeBundle, Notebook, Output, StreamName, mime_text};
use nbdocs_shared::{NbdocsError, RenderConfig, Result, assets_dir_name, markdown_file_name};

/// Cell tag: drop the whole cell.
pub const TAG_REMOVE_CELL: &str = "remove-cell";
/// Cell tag: drop the code fence, keep outputs.
pub const TAG_REMOVE_INPUT: &str = "remove-input";
/// Cell tag: drop the outputs, keep the code fence.
pub const TAG_REMOVE_OUTPUT: &str = "remove-output";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for rendering one document.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Document base name; names the asset directory.
    pub name: String,
    /// Source file name recorded in front matter.
    pub source: Option<String>,
    /// Prepend YAML front matter.
    pub front_matter: bool,
    /// Code fence language when the notebook names none.
    pub default_language: String,
    /// Render stderr stream outputs.
    pub include_stderr: bool,
}

impl RenderOptions {
    pub fn new(name: impl Into<String>, config: &RenderConfig) -> Self {
        Self {
            name: name.into(),
            source: None,
            front_matter: config.front_matter,
            default_language: config.default_language.clone(),
            include_stderr: config.include_stderr,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A binary output written next to the Markdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Path relative to the Markdown file: `<name>_files/output_<cell>_<k>.<ext>`.
    pub path: String,
    pub bytes: Vec<u8>,
}

/// Result of rendering an executed notebook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub name: String,
    pub markdown: String,
    pub assets: Vec<Asset>,
}

impl RenderedDocument {
    /// `<name>.md`
    pub fn markdown_file_name(&self) -> String {
        markdown_file_name(&self.name)
    }

    /// `<name>_files`
    pub fn assets_dir_name(&self) -> String {
        assets_dir_name(&self.name)
    }
}

/// Where [`write_rendered`] put things.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenDocument {
    pub markdown: PathBuf,
    /// `None` when the document has no assets.
    pub assets_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Render an executed notebook to Markdown plus assets.
#[instrument(skip_all, fields(name = %opts.name, cells = notebook.cells.len()))]
pub fn render(notebook: &Notebook, opts: &RenderOptions) -> Result<RenderedDocument> {
    let language = fence_language(notebook, &opts.default_language);
    let mut blocks: Vec<String> = Vec::new();
    let mut assets: Vec<Asset> = Vec::new();

    for (index, cell) in notebook.cells.iter().enumerate() {
        if cell.has_tag(TAG_REMOVE_CELL) {
            continue;
        }

        match cell {
            Cell::Markdown(text) | Cell::Raw(text) => {
                let source = text.source.as_str().trim_end();
                if !source.trim().is_empty() {
                    blocks.push(source.to_string());
                }
            }
            Cell::Code(code) => {
                render_code_cell(index, code, cell, &language, opts, &mut blocks, &mut assets)?;
            }
        }
    }

    let mut markdown = cleanup::run_pipeline(&blocks.join("\n\n"));
    if opts.front_matter {
        markdown = format!("{}\n{markdown}", build_front_matter(&markdown, opts));
    }

    debug!(len = markdown.len(), assets = assets.len(), "render complete");

    Ok(RenderedDocument {
        name: opts.name.clone(),
        markdown,
        assets,
    })
}

/// Read an executed notebook artifact and render it.
///
/// Any read or parse failure of the artifact is a render failure.
pub fn render_file(path: &Path, opts: &RenderOptions) -> Result<RenderedDocument> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        NbdocsError::render(format!("cannot read {}: {e}", path.display()))
    })?;
    let notebook = nbdocs_notebook::parse_ipynb(&content).map_err(|e| {
        NbdocsError::render(format!("malformed executed notebook {}: {e}", path.display()))
    })?;
    render(&notebook, opts)
}

/// Write `<out>/<name>.md` and, when there are assets, `<out>/<name>_files/`.
///
/// A stale asset directory from an earlier render is removed first.
pub fn write_rendered(doc: &RenderedDocument, out_dir: &Path) -> Result<WrittenDocument> {
    std::fs::create_dir_all(out_dir).map_err(|e| NbdocsError::io(out_dir, e))?;

    let assets_dir = out_dir.join(doc.assets_dir_name());
    if assets_dir.exists() {
        std::fs::remove_dir_all(&assets_dir).map_err(|e| NbdocsError::io(&assets_dir, e))?;
    }

    if !doc.assets.is_empty() {
        std::fs::create_dir_all(&assets_dir).map_err(|e| NbdocsError::io(&assets_dir, e))?;
        for asset in &doc.assets {
            let path = out_dir.join(&asset.path);
            std::fs::write(&path, &asset.bytes).map_err(|e| NbdocsError::io(&path, e))?;
        }
    }

    let markdown = out_dir.join(doc.markdown_file_name());
    std::fs::write(&markdown, &doc.markdown).map_err(|e| NbdocsError::io(&markdown, e))?;

    Ok(WrittenDocument {
        markdown,
        assets_dir: (!doc.assets.is_empty()).then_some(assets_dir),
    })
}

// ---------------------------------------------------------------------------
// Code cells
// ---------------------------------------------------------------------------

fn render_code_cell(
    index: usize,
    code: &CodeCell,
    cell: &Cell,
    language: &str,
    opts: &RenderOptions,
    blocks: &mut Vec<String>,
    assets: &mut Vec<Asset>,
) -> Result<()> {
    let source = code.source.as_str().trim_end();
    if !cell.has_tag(TAG_REMOVE_INPUT) && !source.trim().is_empty() {
        blocks.push(fenced(source, language));
    }

    if cell.has_tag(TAG_REMOVE_OUTPUT) {
        return Ok(());
    }

    for (k, output) in code.outputs.iter().enumerate() {
        match output {
            Output::Stream { name, text } => {
                if *name == StreamName::Stderr && !opts.include_stderr {
                    continue;
                }
                let text = cleanup::strip_ansi(text.as_str());
                if !text.trim().is_empty() {
                    blocks.push(fenced(text.trim_end(), ""));
                }
            }
            Output::DisplayData { data, .. } | Output::ExecuteResult { data, .. } => {
                if let Some(block) = render_bundle(data, index, k, opts, assets)? {
                    blocks.push(block);
                }
            }
            Output::Error {
                ename,
                evalue,
                traceback,
            } => {
                let text = if traceback.is_empty() {
                    format!("{ename}: {evalue}")
                } else {
                    traceback
                        .iter()
                        .map(|l| l.trim_end_matches('\n'))
                        .collect::<Vec<_>>()
                        .join("\n")
                };
                blocks.push(fenced(cleanup::strip_ansi(&text).trim_end(), ""));
            }
        }
    }

    Ok(())
}

/// Image formats in preference order: mime type, file extension.
const IMAGE_TYPES: [(&str, &str); 3] = [
    ("image/png", "png"),
    ("image/jpeg", "jpeg"),
    ("image/svg+xml", "svg"),
];

/// Render the richest representation in a mime bundle.
fn render_bundle(
    data: &MimeBundle,
    cell: usize,
    k: usize,
    opts: &RenderOptions,
    assets: &mut Vec<Asset>,
) -> Result<Option<String>> {
    for (mime, ext) in IMAGE_TYPES {
        let Some(value) = data.get(mime) else {
            continue;
        };
        let payload = text_payload(value, mime, cell)?;
        let bytes = if ext == "svg" {
            payload.into_bytes()
        } else {
            let compact: String = payload.split_whitespace().collect();
            STANDARD.decode(compact.as_bytes()).map_err(|e| {
                NbdocsError::render(format!("cell {cell}: invalid base64 in {mime} output: {e}"))
            })?
        };

        let path = format!("{}/output_{cell}_{k}.{ext}", assets_dir_name(&opts.name));
        let block = format!("![{ext}]({path})");
        assets.push(Asset { path, bytes });
        return Ok(Some(block));
    }

    if let Some(value) = data.get("text/markdown") {
        return Ok(Some(text_payload(value, "text/markdown", cell)?.trim().to_string()));
    }

    if let Some(value) = data.get("text/html") {
        let html = text_payload(value, "text/html", cell)?;
        return Ok(Some(html::html_to_markdown(&html)?));
    }

    if let Some(value) = data.get("text/latex") {
        let latex = text_payload(value, "text/latex", cell)?;
        return Ok(Some(format!("$$\n{}\n$$", strip_math_delimiters(&latex))));
    }

    if let Some(value) = data.get("text/plain") {
        let text = cleanup::strip_ansi(&text_payload(value, "text/plain", cell)?);
        return Ok((!text.trim().is_empty()).then(|| fenced(text.trim_end(), "")));
    }

    Ok(None)
}

fn text_payload(value: &Value, mime: &str, cell: usize) -> Result<String> {
    mime_text(value).ok_or_else(|| {
        NbdocsError::render(format!("cell {cell}: {mime} payload must be text"))
    })
}

fn strip_math_delimiters(latex: &str) -> &str {
    let trimmed = latex.trim();
    trimmed
        .strip_prefix("$$")
        .and_then(|s| s.strip_suffix("$$"))
        .or_else(|| trimmed.strip_prefix('$').and_then(|s| s.strip_suffix('$')))
        .unwrap_or(trimmed)
        .trim()
}

fn fenced(content: &str, language: &str) -> String {
    let fence = cleanup::fence_for(content);
    format!("{fence}{language}\n{content}\n{fence}")
}

/// Fence language from notebook metadata, IPython kernels mapped to `python`.
fn fence_language(notebook: &Notebook, default: &str) -> String {
    match notebook.language().map(str::to_ascii_lowercase) {
        Some(lang) if lang.starts_with("ipython") || lang == "python3" => "python".into(),
        Some(lang) if !lang.is_empty() => lang,
        _ => default.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Front matter
// ---------------------------------------------------------------------------

fn build_front_matter(markdown: &str, opts: &RenderOptions) -> String {
    let title = extract_title(markdown).unwrap_or_else(|| opts.name.clone());

    let mut fm = String::from("---\n");
    fm.push_str(&format!("title: \"{}\"\n", escape_yaml_string(&title)));
    if let Some(source) = &opts.source {
        fm.push_str(&format!("source: \"{}\"\n", escape_yaml_string(source)));
    }
    fm.push_str("---\n");
    fm
}

/// First H1 outside code fences.
fn extract_title(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^# (.+)$").expect("valid regex"));

    cleanup::fenced_lines(md)
        .into_iter()
        .filter(|(_, fenced)| !fenced)
        .find_map(|(line, _)| H1_RE.captures(line).map(|c| c[1].trim().to_string()))
}

fn escape_yaml_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use nbdocs_notebook::{MultilineString, TextCell};
    use serde_json::{Map, json};

    // 1x1 transparent PNG
    const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    fn opts(name: &str) -> RenderOptions {
        RenderOptions::new(name, &RenderConfig::default())
    }

    fn python_notebook(cells: Vec<Cell>) -> Notebook {
        let mut metadata = Map::new();
        metadata.insert(
            "kernelspec".into(),
            json!({"name": "python3", "language": "python", "display_name": "Python 3"}),
        );
        let mut nb = Notebook::new(metadata);
        nb.cells = cells;
        nb
    }

    fn code(source: &str, outputs: Vec<Output>) -> Cell {
        let mut cell = CodeCell::new(source);
        cell.execution_count = Some(1);
        cell.outputs = outputs;
        Cell::Code(cell)
    }

    fn tagged(mut cell: Cell, tag: &str) -> Cell {
        let metadata = match &mut cell {
            Cell::Code(c) => &mut c.metadata,
            Cell::Markdown(c) | Cell::Raw(c) => &mut c.metadata,
        };
        metadata.insert("tags".into(), json!([tag]));
        cell
    }

    fn bundle(pairs: &[(&str, Value)]) -> MimeBundle {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn markdown_only_notebook_has_no_assets() {
        let nb = python_notebook(vec![Cell::Markdown(TextCell::new("# Intro\n\nJust prose."))]);
        let doc = render(&nb, &opts("intro")).unwrap();
        assert_eq!(doc.markdown, "# Intro\n\nJust prose.\n");
        assert!(doc.assets.is_empty());
    }

    #[test]
    fn code_cell_with_stream_and_result() {
        let nb = python_notebook(vec![code(
            "print('sites')\nts.num_sites",
            vec![
                Output::stdout("sites\n"),
                Output::ExecuteResult {
                    execution_count: Some(1),
                    data: bundle(&[("text/plain", json!("42"))]),
                    metadata: Map::new(),
                },
            ],
        )]);
        let doc = render(&nb, &opts("stats")).unwrap();
        assert_eq!(
            doc.markdown,
            "```python\nprint('sites')\nts.num_sites\n```\n\n```\nsites\n```\n\n```\n42\n```\n"
        );
    }

    #[test]
    fn png_output_becomes_asset() {
        let nb = python_notebook(vec![
            Cell::Markdown(TextCell::new("# Plot")),
            code(
                "plt.plot(x)",
                vec![Output::display(bundle(&[
                    ("image/png", json!(PNG_B64)),
                    ("text/plain", json!("<Figure size 640x480 with 1 Axes>")),
                ]))],
            ),
        ]);
        let doc = render(&nb, &opts("plots")).unwrap();

        assert_eq!(doc.assets.len(), 1);
        assert_eq!(doc.assets[0].path, "plots_files/output_1_0.png");
        assert!(doc.assets[0].bytes.starts_with(b"\x89PNG"));
        assert!(doc.markdown.contains("![png](plots_files/output_1_0.png)"));
        assert!(!doc.markdown.contains("Figure size"));
    }

    #[test]
    fn invalid_base64_is_render_error() {
        let nb = python_notebook(vec![code(
            "show()",
            vec![Output::display(bundle(&[("image/png", json!("not base64!!"))]))],
        )]);
        let err = render(&nb, &opts("bad")).unwrap_err();
        assert!(matches!(err, NbdocsError::Render { .. }), "{err:?}");
    }

    #[test]
    fn wrong_shape_mime_is_render_error() {
        let nb = python_notebook(vec![code(
            "x",
            vec![Output::display(bundle(&[("text/plain", json!(42))]))],
        )]);
        assert!(matches!(
            render(&nb, &opts("bad")),
            Err(NbdocsError::Render { .. })
        ));
    }

    #[test]
    fn svg_markdown_latex_and_html_outputs() {
        let nb = python_notebook(vec![code(
            "show()",
            vec![
                Output::display(bundle(&[("image/svg+xml", json!("<svg></svg>"))])),
                Output::display(bundle(&[("text/markdown", json!("**bold**"))])),
                Output::display(bundle(&[("text/latex", json!("$\\pi$"))])),
                Output::display(bundle(&[
                    ("text/html", json!("<table><tr><th>n</th></tr><tr><td>3</td></tr></table>")),
                    ("text/plain", json!("   n\n0  3")),
                ])),
            ],
        )]);
        let doc = render(&nb, &opts("rich")).unwrap();
        assert_eq!(doc.assets[0].path, "rich_files/output_0_0.svg");
        assert_eq!(doc.assets[0].bytes, b"<svg></svg>");
        assert!(doc.markdown.contains("\n**bold**\n"));
        assert!(doc.markdown.contains("$$\n\\pi\n$$"));
        assert!(doc.markdown.contains("| n |\n| --- |\n| 3 |"));
    }

    #[test]
    fn stderr_and_errors_are_ansi_stripped() {
        let nb = python_notebook(vec![code(
            "1 / 0",
            vec![
                Output::Stream {
                    name: StreamName::Stderr,
                    text: MultilineString::from("\x1b[33mwarning\x1b[0m\n"),
                },
                Output::Error {
                    ename: "ZeroDivisionError".into(),
                    evalue: "division by zero".into(),
                    traceback: vec!["\x1b[31mZeroDivisionError\x1b[0m: division by zero".into()],
                },
            ],
        )]);
        let doc = render(&nb, &opts("err")).unwrap();
        assert!(doc.markdown.contains("```\nwarning\n```"));
        assert!(doc.markdown.contains("```\nZeroDivisionError: division by zero\n```"));
        assert!(!doc.markdown.contains('\x1b'));

        let mut quiet = opts("err");
        quiet.include_stderr = false;
        assert!(!render(&nb, &quiet).unwrap().markdown.contains("warning"));
    }

    #[test]
    fn tags_control_visibility() {
        let nb = python_notebook(vec![
            tagged(code("import setup", vec![Output::stdout("noise\n")]), TAG_REMOVE_CELL),
            tagged(code("hidden_input()", vec![Output::stdout("shown\n")]), TAG_REMOVE_INPUT),
            tagged(code("shown_input()", vec![Output::stdout("hidden\n")]), TAG_REMOVE_OUTPUT),
        ]);
        let doc = render(&nb, &opts("tags")).unwrap();
        assert!(!doc.markdown.contains("import setup"));
        assert!(!doc.markdown.contains("noise"));
        assert!(!doc.markdown.contains("hidden_input"));
        assert!(doc.markdown.contains("shown\n"));
        assert!(doc.markdown.contains("shown_input()"));
        assert!(!doc.markdown.contains("hidden\n"));
    }

    #[test]
    fn ipython_language_maps_to_python() {
        let mut nb = Notebook::new(Map::new());
        nb.metadata.insert("language_info".into(), json!({"name": "ipython3"}));
        nb.cells.push(code("x = 1", vec![]));
        assert!(render(&nb, &opts("lang")).unwrap().markdown.starts_with("```python\n"));

        let mut bare = Notebook::new(Map::new());
        bare.cells.push(code("x <- 1", vec![]));
        let mut r_opts = opts("lang");
        r_opts.default_language = "r".into();
        assert!(render(&bare, &r_opts).unwrap().markdown.starts_with("```r\n"));
    }

    #[test]
    fn front_matter_uses_first_heading() {
        let nb = python_notebook(vec![
            code("# not a title", vec![]),
            Cell::Markdown(TextCell::new("# Simplification \"basics\"")),
        ]);
        let mut o = opts("simplify").with_source("simplify.ipynb");
        o.front_matter = true;
        let doc = render(&nb, &o).unwrap();
        assert!(doc.markdown.starts_with(
            "---\ntitle: \"Simplification \\\"basics\\\"\"\nsource: \"simplify.ipynb\"\n---\n\n"
        ));

        let untitled = python_notebook(vec![Cell::Markdown(TextCell::new("Prose only."))]);
        let doc = render(&untitled, &o).unwrap();
        assert!(doc.markdown.starts_with("---\ntitle: \"simplify\"\n"));
    }

    #[test]
    fn rendering_is_deterministic() {
        let nb = python_notebook(vec![
            Cell::Markdown(TextCell::new("# Title")),
            code(
                "plot()",
                vec![Output::display(bundle(&[("image/png", json!(PNG_B64))]))],
            ),
        ]);
        let a = render(&nb, &opts("same")).unwrap();
        let b = render(&nb, &opts("same")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn write_rendered_replaces_stale_assets() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join("doc_files");
        std::fs::create_dir_all(&stale).unwrap();
        std::fs::write(stale.join("output_9_0.png"), b"old").unwrap();

        let doc = RenderedDocument {
            name: "doc".into(),
            markdown: "# Doc\n".into(),
            assets: vec![],
        };
        let written = write_rendered(&doc, dir.path()).unwrap();
        assert_eq!(written.assets_dir, None);
        assert!(!stale.exists());
        assert_eq!(std::fs::read_to_string(written.markdown).unwrap(), "# Doc\n");

        let with_asset = RenderedDocument {
            assets: vec![Asset {
                path: "doc_files/output_1_0.png".into(),
                bytes: vec![1, 2, 3],
            }],
            ..doc
        };
        let written = write_rendered(&with_asset, dir.path()).unwrap();
        assert_eq!(written.assets_dir.as_deref(), Some(stale.as_path()));
        assert_eq!(std::fs::read(stale.join("output_1_0.png")).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn render_file_rejects_malformed_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.output.ipynb");
        std::fs::write(
            &path,
            r#"{"cells":[{"cell_type":"code","metadata":{},"source":"x"}],"metadata":{},"nbformat":4,"nbformat_minor":5}"#,
        )
        .unwrap();
        let err = render_file(&path, &opts("doc")).unwrap_err();
        assert!(matches!(err, NbdocsError::Render { .. }), "{err:?}");
    }
}
