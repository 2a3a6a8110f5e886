//! # k2s scan
//!
//! Static discovery of what a notebook needs in order to run: third-party
//! packages and the local files it reads. Nothing is executed.
//!
//! ## Architecture
//!
//! ```text
//! SourceDocument (.ipynb / .py)
//!     │
//!     ├──> code cells ──> Scanner (tree-sitter) ──> LeafTree
//!     │                        │
//!     │                        ├─> imports + %load_ext ──> package names
//!     │                        └─> Path()/read()/read_*() ──> local files
//!     │
//!     └──> all cells ──> `pip install ...` directives ──> package names
//!                                    │
//!                                    v
//!                              DependencySet
//! ```
//!
//! ## Example
//!
//! ```rust
//! use k2s_scan::DependencyExtractor;
//!
//! let mut extractor = DependencyExtractor::new().unwrap();
//! let found = extractor.from_script("import sklearn.tree\ndf = pd.read_csv('iris.csv')\n");
//!
//! assert!(found.packages.contains("scikit-learn"));
//! assert!(found.local_files.contains("iris.csv"));
//! ```

mod deps;
mod document;
mod error;
mod imports;
mod local_files;
mod plain_text;
mod scanner;
mod stdlib;

pub use deps::{
    extract_imports_from_notebook, extract_imports_from_script, DependencyExtractor,
    DependencySet, Extraction,
};
pub use document::{default_kernelspec, is_notebook, Cell, CellKind, SourceDocument};
pub use error::{Result, ScanError};
pub use imports::{package_name, packages_used};
pub use local_files::{decode_string_literal, local_files, paths, string_literals};
pub use plain_text::extract_from_plain_text;
pub use scanner::{Leaf, LeafKind, LeafTree, Scanner};
pub use stdlib::is_stdlib;

/// This tool's own package name; never reported as a dependency
pub const SELF_PACKAGE: &str = "k2s";
