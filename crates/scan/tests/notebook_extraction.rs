use k2s_scan::{paths, DependencyExtractor, Scanner, SourceDocument};
use pretty_assertions::assert_eq;
use std::fs;

const NOTEBOOK: &str = r##"{
 "cells": [
  {
   "cell_type": "markdown",
   "metadata": {},
   "source": [
    "# Querying with DuckDB\n",
    "\n",
    "```sh\n",
    "pip install duckdb duckdb-engine pyarrow -U\n",
    "pip install git+https://github.com/ploomber/ploomber\n",
    "```\n",
    "\n",
    "Try it: `pip install k2s -U && k2s get ploomber/jupysql/main/examples/nb.ipynb`"
   ]
  },
  {
   "cell_type": "code",
   "execution_count": null,
   "metadata": {},
   "outputs": [],
   "source": [
    "%load_ext sql\n",
    "import duckdb\n",
    "import pandas as pd\n",
    "from functions import clean\n",
    "df = pd.read_parquet(\"data/penguins.parquet\")"
   ]
  },
  {
   "cell_type": "code",
   "execution_count": null,
   "metadata": {},
   "outputs": [],
   "source": "import os\nimport matplotlib.pyplot as plt\nplt.rcParams['figure.figsize'] = (12, 8)\nsrc = Path('functions.py').read_text()"
  }
 ],
 "metadata": {},
 "nbformat": 4,
 "nbformat_minor": 5
}
"##;

#[test]
fn extracts_packages_and_files_from_notebook_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nb.ipynb");
    fs::write(&path, NOTEBOOK).unwrap();

    let mut extractor = DependencyExtractor::new().unwrap();
    let result = extractor.from_path(&path).unwrap();

    let packages: Vec<&str> = result.packages.iter().collect();
    assert_eq!(
        packages,
        [
            "duckdb",
            "duckdb-engine",
            "functions",
            "jupysql",
            "matplotlib",
            "pandas",
            "pyarrow"
        ]
    );

    let files: Vec<&str> = result.local_files.iter().map(String::as_str).collect();
    assert_eq!(files, ["data/penguins.parquet", "functions.py"]);
}

#[test]
fn rewrites_kernelspec_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nb.ipynb");
    fs::write(&path, NOTEBOOK).unwrap();

    let doc = SourceDocument::read(&path).unwrap();
    let updated = doc.with_default_kernelspec(Some("nb-env")).unwrap();
    updated.write(&path).unwrap();

    let reread = SourceDocument::read(&path).unwrap();
    assert_eq!(reread.kernelspec().unwrap()["name"], "nb-env");
    assert!(reread.with_default_kernelspec(Some("another-env")).is_none());
}

#[test]
fn path_heuristic_over_code_cells() {
    let doc = SourceDocument::from_notebook_str(NOTEBOOK).unwrap();
    let mut scanner = Scanner::new().unwrap();
    let found = paths(&scanner.scan(&doc.code_text()), false);
    let found: Vec<&str> = found.iter().map(String::as_str).collect();
    assert_eq!(found, ["data/penguins.parquet", "functions.py"]);
}
