//! nbformat 4 JSON reader and writer.

use serde::Serialize;

use nbdocs_shared::{NbdocsError, Result};

use crate::{NBFORMAT, Notebook};

/// Parse an `.ipynb` document.
pub fn parse_ipynb(content: &str) -> Result<Notebook> {
    let notebook: Notebook = serde_json::from_str(content)
        .map_err(|e| NbdocsError::parse(format!("invalid notebook JSON: {e}")))?;

    if notebook.nbformat != NBFORMAT {
        return Err(NbdocsError::parse(format!(
            "unsupported nbformat {} (expected {NBFORMAT})",
            notebook.nbformat
        )));
    }

    Ok(notebook)
}

/// Serialize a notebook the way Jupyter writes it: one-space indent,
/// trailing newline.
pub fn to_ipynb_string(notebook: &Notebook) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    notebook
        .serialize(&mut ser)
        .map_err(|e| NbdocsError::validation(format!("notebook serialization failed: {e}")))?;

    let mut out = String::from_utf8(buf)
        .map_err(|e| NbdocsError::validation(format!("notebook is not UTF-8: {e}")))?;
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Cell, Output, StreamName};

    const MINIMAL: &str = r##"{
 "cells": [
  {"cell_type": "markdown", "metadata": {}, "source": ["# Tree sequences\n", "Intro."]},
  {
   "cell_type": "code",
   "execution_count": 3,
   "metadata": {"tags": ["remove-input"]},
   "outputs": [
    {"output_type": "stream", "name": "stdout", "text": ["4\n"]},
    {"output_type": "execute_result", "execution_count": 3, "data": {"text/plain": ["42"]}, "metadata": {}}
   ],
   "source": "print(2 + 2)\n42"
  }
 ],
 "metadata": {"kernelspec": {"name": "python3", "language": "python", "display_name": "Python 3"}},
 "nbformat": 4,
 "nbformat_minor": 5
}"##;

    #[test]
    fn parses_minimal_notebook() {
        let nb = parse_ipynb(MINIMAL).unwrap();
        assert_eq!(nb.cells.len(), 2);
        assert_eq!(nb.language(), Some("python"));
        assert_eq!(nb.cells[0].source(), "# Tree sequences\nIntro.");

        let Cell::Code(code) = &nb.cells[1] else {
            panic!("expected code cell");
        };
        assert_eq!(code.execution_count, Some(3));
        assert_eq!(code.outputs.len(), 2);
        assert!(matches!(
            &code.outputs[0],
            Output::Stream { name: StreamName::Stdout, text } if text.as_str() == "4\n"
        ));
        assert!(nb.cells[1].has_tag("remove-input"));
    }

    #[test]
    fn code_cell_without_outputs_is_rejected() {
        let json = r#"{"cells": [{"cell_type": "code", "metadata": {}, "source": "x"}],
                       "metadata": {}, "nbformat": 4, "nbformat_minor": 5}"#;
        let err = parse_ipynb(json).unwrap_err();
        assert!(err.to_string().contains("outputs"), "{err}");
    }

    #[test]
    fn old_nbformat_is_rejected() {
        let json = r#"{"cells": [], "metadata": {}, "nbformat": 3, "nbformat_minor": 0}"#;
        let err = parse_ipynb(json).unwrap_err();
        assert!(err.to_string().contains("nbformat 3"));
    }

    #[test]
    fn writer_output_reparses_identically() {
        let nb = parse_ipynb(MINIMAL).unwrap();
        let written = to_ipynb_string(&nb).unwrap();
        assert!(written.ends_with("}\n"));
        assert!(written.starts_with("{\n \"cells\""));
        assert_eq!(parse_ipynb(&written).unwrap(), nb);
    }

    #[test]
    fn fixture_notebook_parses() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../../fixtures/notebooks/tutorial.ipynb");
        let nb = crate::load(&path).expect("load fixture");
        assert_eq!(nb.code_cell_count(), 3);
        assert_eq!(nb.language(), Some("python"));
    }
}
