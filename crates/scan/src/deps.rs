use crate::document::{is_notebook, SourceDocument};
use crate::error::Result;
use crate::imports::packages_used;
use crate::local_files::local_files;
use crate::plain_text::extract_from_plain_text;
use crate::scanner::Scanner;
use crate::SELF_PACKAGE;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::Path;

/// Deduplicated package names, iterated in sorted order.
///
/// Never contains this tool's own package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DependencySet(BTreeSet<String>);

impl DependencySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when the name was already present or is rejected
    pub fn insert(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if name.is_empty() || name == SELF_PACKAGE {
            return false;
        }
        self.0.insert(name)
    }

    pub fn merge(&mut self, other: DependencySet) {
        self.0.extend(other.0);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for DependencySet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        set.extend(iter);
        set
    }
}

impl<S: Into<String>> Extend<S> for DependencySet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for name in iter {
            self.insert(name);
        }
    }
}

impl IntoIterator for DependencySet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Everything recovered from one document
#[derive(Debug, Clone, Default, Serialize)]
pub struct Extraction {
    pub packages: DependencySet,
    /// Files passed to `Path(...)`, `read(...)` or `read_*(...)`
    pub local_files: BTreeSet<String>,
}

/// Runs every extractor over documents, sharing one tree-sitter parser.
pub struct DependencyExtractor {
    scanner: Scanner,
}

impl DependencyExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            scanner: Scanner::new()?,
        })
    }

    /// Imports and magics from code cells, `pip install` directives from
    /// every cell
    pub fn from_document(&mut self, doc: &SourceDocument) -> Extraction {
        let code = doc.code_text();
        let tree = self.scanner.scan(&code);

        let mut packages: DependencySet = packages_used(&tree).into_iter().collect();
        packages.extend(extract_from_plain_text(&doc.full_text()));

        Extraction {
            packages,
            local_files: local_files(&tree),
        }
    }

    pub fn from_script(&mut self, text: &str) -> Extraction {
        self.from_document(&SourceDocument::from_script(text))
    }

    /// Notebooks by `.ipynb` extension, anything else as a script
    pub fn from_path(&mut self, path: impl AsRef<Path>) -> Result<Extraction> {
        let path = path.as_ref();
        let doc = SourceDocument::read(path)?;
        log::debug!(
            "extracting dependencies from {} ({})",
            path.display(),
            if is_notebook(path) { "notebook" } else { "script" }
        );
        Ok(self.from_document(&doc))
    }
}

/// Package names used by a notebook
pub fn extract_imports_from_notebook(doc: &SourceDocument) -> Result<DependencySet> {
    Ok(DependencyExtractor::new()?.from_document(doc).packages)
}

/// Package names used by a script
pub fn extract_imports_from_script(text: &str) -> Result<DependencySet> {
    Ok(DependencyExtractor::new()?.from_script(text).packages)
}
