use anyhow::{bail, Context as AnyhowContext, Result};
use k2s_scan::{is_notebook, DependencyExtractor, DependencySet, SourceDocument};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};

const GITHUB_RAW: &str = "https://raw.githubusercontent.com";

/// Where remote documents come from
pub trait RemoteSource {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Plain HTTP(S) GETs; non-2xx statuses are errors
pub struct HttpSource {
    client: reqwest::blocking::Client,
}

impl HttpSource {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl RemoteSource for HttpSource {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("GET {url}"))?
            .error_for_status()?;
        Ok(response.bytes()?.to_vec())
    }
}

/// `org/repo/ref/path.ipynb` expands to a raw GitHub URL; full URLs pass
/// through
pub fn resolve_url(target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("{GITHUB_RAW}/{}", target.trim_start_matches('/'))
    }
}

/// Directory part of a document URL (query and fragment dropped)
pub fn sibling_base(url: &str) -> &str {
    let url = url.split(['?', '#']).next().unwrap_or(url);
    match url.rfind('/') {
        Some(at) if at > url.find("://").map_or(0, |s| s + 2) => &url[..at],
        _ => url,
    }
}

/// File name of a document URL
pub fn url_file_name(url: &str) -> Option<&str> {
    let url = url.split(['?', '#']).next().unwrap_or(url);
    url.rsplit('/').next().filter(|name| !name.is_empty())
}

fn validate_relative_path(path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("empty path");
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => bail!("path escapes the destination: {}", path.display()),
            Component::RootDir | Component::Prefix(_) => {
                bail!("absolute paths are not allowed: {}", path.display())
            }
        }
    }
    Ok(())
}

/// `dest/relative`, refusing anything that would land outside `dest`
pub fn safe_join(dest: &Path, relative: &str) -> Result<PathBuf> {
    let rel = Path::new(relative);
    validate_relative_path(rel)?;
    Ok(dest.join(rel))
}

/// Downloads the files a document reads from next to it, following
/// scripts and notebooks among them.
pub struct SiblingFetcher<'a> {
    source: &'a dyn RemoteSource,
    extractor: &'a mut DependencyExtractor,
    visited: HashSet<String>,
    downloaded: Vec<PathBuf>,
}

impl<'a> SiblingFetcher<'a> {
    pub fn new(source: &'a dyn RemoteSource, extractor: &'a mut DependencyExtractor) -> Self {
        Self {
            source,
            extractor,
            visited: HashSet::new(),
            downloaded: Vec::new(),
        }
    }

    /// Files written so far
    pub fn downloaded(&self) -> &[PathBuf] {
        &self.downloaded
    }

    /// Mark a URL as already handled (the root document)
    pub fn visit(&mut self, url: &str) {
        self.visited.insert(url.to_string());
    }

    /// Fetch each of `files` from beside `doc_url` into `dest`. A file that
    /// cannot be fetched, or fetched but not scanned, is reported and skipped. Returns the packages used
    /// by fetched scripts and notebooks, transitively.
    pub fn fetch_all(
        &mut self,
        doc_url: &str,
        files: &BTreeSet<String>,
        dest: &Path,
    ) -> DependencySet {
        let base = sibling_base(doc_url).to_string();
        let mut packages = DependencySet::new();

        for file in files {
            let local = match safe_join(dest, file) {
                Ok(local) => local,
                Err(err) => {
                    log::warn!("Not downloading {file:?}: {err}");
                    continue;
                }
            };
            let url = format!("{base}/{}", file.trim_start_matches("./"));
            if !self.visited.insert(url.clone()) {
                continue;
            }

            let body = match self.download(&url, &local) {
                Ok(body) => body,
                Err(err) => {
                    log::warn!(
                        "It appears the notebook is using a file named {file:?}, \
                         but downloading it failed: {err:#}"
                    );
                    continue;
                }
            };
            match self.scan_fetched(&url, &local, &body) {
                Ok(found) => packages.merge(found),
                Err(err) => log::warn!(
                    "Downloaded {} but could not read its dependencies: {err:#}",
                    local.display()
                ),
            }
        }

        packages
    }

    fn download(&mut self, url: &str, local: &Path) -> Result<Vec<u8>> {
        let body = self.source.fetch(url)?;
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(local, &body)?;
        log::info!("Downloaded file used in notebook: {}", local.display());
        self.downloaded.push(local.to_path_buf());
        Ok(body)
    }

    /// Packages used by a fetched script or notebook, following the files
    /// it reads in turn. Other files contribute nothing.
    fn scan_fetched(&mut self, url: &str, local: &Path, body: &[u8]) -> Result<DependencySet> {
        let doc = if is_notebook(local) {
            SourceDocument::from_notebook_str(&String::from_utf8_lossy(body))?
        } else if local.extension().is_some_and(|ext| ext == "py") {
            SourceDocument::from_script(&String::from_utf8_lossy(body))
        } else {
            return Ok(DependencySet::new());
        };

        let found = self.extractor.from_document(&doc);
        let mut packages = found.packages;
        let nested_dest = local.parent().unwrap_or(local).to_path_buf();
        packages.merge(self.fetch_all(url, &found.local_files, &nested_dest));
        Ok(packages)
    }
}
