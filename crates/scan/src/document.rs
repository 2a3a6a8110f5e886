use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

/// Kind of a notebook cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellKind {
    Code,
    /// Markdown and raw cells
    Prose,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub kind: CellKind,
    pub source: String,
}

/// A notebook (or a script seen as a one-cell notebook).
///
/// Immutable: rewriting the metadata produces a new document.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    cells: Vec<Cell>,
    /// Full notebook JSON; None for scripts
    raw: Option<Value>,
}

/// `source` is stored either as one string or as a list of lines
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CellSource {
    Text(String),
    Lines(Vec<String>),
}

impl Default for CellSource {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl CellSource {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            // nbformat keeps the trailing newline on every line but the last
            Self::Lines(lines) => lines.concat(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawCell {
    cell_type: String,
    #[serde(default)]
    source: CellSource,
}

#[derive(Debug, Deserialize)]
struct RawNotebook {
    cells: Vec<RawCell>,
}

impl SourceDocument {
    /// Parse notebook JSON
    pub fn from_notebook_str(text: &str) -> Result<Self> {
        let raw: Value = serde_json::from_str(text)?;
        if !raw.is_object() {
            return Err(ScanError::invalid_notebook("top-level value is not an object"));
        }
        let notebook = RawNotebook::deserialize(&raw)
            .map_err(|e| ScanError::invalid_notebook(e.to_string()))?;

        let cells = notebook
            .cells
            .into_iter()
            .map(|cell| Cell {
                kind: if cell.cell_type == "code" {
                    CellKind::Code
                } else {
                    CellKind::Prose
                },
                source: cell.source.into_text(),
            })
            .collect();

        Ok(Self {
            cells,
            raw: Some(raw),
        })
    }

    /// A Python script, treated as a single code cell
    pub fn from_script(text: &str) -> Self {
        Self {
            cells: vec![Cell {
                kind: CellKind::Code,
                source: text.to_string(),
            }],
            raw: None,
        }
    }

    /// Build a notebook from cells (mostly useful in tests and tooling)
    pub fn from_cells(cells: Vec<Cell>) -> Self {
        let raw = json!({
            "cells": cells.iter().map(|cell| json!({
                "cell_type": match cell.kind {
                    CellKind::Code => "code",
                    CellKind::Prose => "markdown",
                },
                "metadata": {},
                "source": cell.source,
            })).collect::<Vec<_>>(),
            "metadata": {},
            "nbformat": 4,
            "nbformat_minor": 5,
        });
        Self {
            cells,
            raw: Some(raw),
        }
    }

    /// Read a `.ipynb` notebook; anything else is read as a script
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        if is_notebook(path) {
            Self::from_notebook_str(&text)
        } else {
            Ok(Self::from_script(&text))
        }
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn is_notebook(&self) -> bool {
        self.raw.is_some()
    }

    /// Code cells joined by newlines
    pub fn code_text(&self) -> String {
        self.join(|cell| cell.kind == CellKind::Code)
    }

    /// Every cell joined by newlines
    pub fn full_text(&self) -> String {
        self.join(|_| true)
    }

    fn join(&self, keep: impl Fn(&Cell) -> bool) -> String {
        self.cells
            .iter()
            .filter(|cell| keep(cell))
            .map(|cell| cell.source.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// `metadata.kernelspec`, when present and non-empty
    pub fn kernelspec(&self) -> Option<&Value> {
        self.raw
            .as_ref()?
            .get("metadata")?
            .get("kernelspec")
            .filter(|spec| spec.as_object().is_some_and(|obj| !obj.is_empty()))
    }

    pub fn has_kernelspec(&self) -> bool {
        self.kernelspec().is_some()
    }

    /// A copy with a Python kernelspec for `env_name` (or the stock
    /// `python3` kernel) injected. None when the document already has one
    /// or is a script.
    pub fn with_default_kernelspec(&self, env_name: Option<&str>) -> Option<Self> {
        if self.has_kernelspec() {
            return None;
        }
        let mut raw = self.raw.clone()?;
        let root = raw.as_object_mut()?;
        let metadata = root
            .entry("metadata")
            .or_insert_with(|| Value::Object(Default::default()));
        if !metadata.is_object() {
            *metadata = Value::Object(Default::default());
        }
        metadata
            .as_object_mut()?
            .insert("kernelspec".to_string(), default_kernelspec(env_name));

        Some(Self {
            cells: self.cells.clone(),
            raw: Some(raw),
        })
    }

    /// Serialize the notebook the way nbformat does (sorted keys, one-space
    /// indent, trailing newline)
    pub fn to_notebook_string(&self) -> Result<String> {
        let raw = self
            .raw
            .as_ref()
            .ok_or_else(|| ScanError::invalid_notebook("scripts have no notebook form"))?;
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        raw.serialize(&mut ser)?;
        buf.push(b'\n');
        String::from_utf8(buf).map_err(|e| ScanError::invalid_notebook(e.to_string()))
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_notebook_string()?)?;
        Ok(())
    }
}

/// `{display_name, language, name}` for a Python kernel
pub fn default_kernelspec(env_name: Option<&str>) -> Value {
    match env_name {
        Some(name) => json!({
            "display_name": format!("Python 3 ({name})"),
            "language": "python",
            "name": name,
        }),
        None => json!({
            "display_name": "Python 3 (ipykernel)",
            "language": "python",
            "name": "python3",
        }),
    }
}

/// Whether `path` names a notebook (by extension)
pub fn is_notebook(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("ipynb"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTEBOOK: &str = r##"{
 "cells": [
  {"cell_type": "markdown", "metadata": {}, "source": ["# Title\n", "pip install duckdb"]},
  {"cell_type": "code", "metadata": {}, "source": "import pandas as pd", "outputs": [], "execution_count": null},
  {"cell_type": "code", "metadata": {}, "source": ["import numpy\n", "x = 1"], "outputs": [], "execution_count": null}
 ],
 "metadata": {},
 "nbformat": 4,
 "nbformat_minor": 5
}"##;

    #[test]
    fn accepts_string_and_list_sources() {
        let doc = SourceDocument::from_notebook_str(NOTEBOOK).unwrap();
        assert_eq!(doc.cells().len(), 3);
        assert_eq!(doc.cells()[0].kind, CellKind::Prose);
        assert_eq!(doc.code_text(), "import pandas as pd\nimport numpy\nx = 1");
        assert_eq!(
            doc.full_text(),
            "# Title\npip install duckdb\nimport pandas as pd\nimport numpy\nx = 1"
        );
    }

    #[test]
    fn injects_kernelspec_only_when_missing() {
        let doc = SourceDocument::from_notebook_str(NOTEBOOK).unwrap();
        assert!(!doc.has_kernelspec());

        let updated = doc.with_default_kernelspec(Some("nb-env")).unwrap();
        let spec = updated.kernelspec().unwrap();
        assert_eq!(spec["name"], "nb-env");
        assert_eq!(spec["display_name"], "Python 3 (nb-env)");
        assert_eq!(spec["language"], "python");

        assert!(updated.with_default_kernelspec(Some("other")).is_none());
        // the original is untouched
        assert!(!doc.has_kernelspec());
    }

    #[test]
    fn default_spec_without_env_name() {
        let doc = SourceDocument::from_notebook_str(NOTEBOOK).unwrap();
        let updated = doc.with_default_kernelspec(None).unwrap();
        assert_eq!(updated.kernelspec().unwrap()["name"], "python3");
    }

    #[test]
    fn writes_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nb.ipynb");
        let doc = SourceDocument::from_notebook_str(NOTEBOOK)
            .unwrap()
            .with_default_kernelspec(Some("nb-env"))
            .unwrap();
        doc.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n \"cells\": ["));
        assert!(text.ends_with("}\n"));

        let back = SourceDocument::read(&path).unwrap();
        assert!(back.has_kernelspec());
        assert_eq!(back.code_text(), doc.code_text());
    }

    #[test]
    fn scripts_are_single_code_cells() {
        let doc = SourceDocument::from_script("import polars\n");
        assert!(!doc.is_notebook());
        assert_eq!(doc.code_text(), "import polars\n");
        assert!(doc.with_default_kernelspec(None).is_none());
        assert!(doc.to_notebook_string().is_err());
    }

    #[test]
    fn rejects_non_notebooks() {
        assert!(SourceDocument::from_notebook_str("[1, 2]").is_err());
        assert!(SourceDocument::from_notebook_str("{\"metadata\": {}}").is_err());
    }
}
