use crate::fetch::{resolve_url, url_file_name, HttpSource, RemoteSource, SiblingFetcher};
use anyhow::{Context as AnyhowContext, Result};
use k2s_env::{install, ChannelIndex, InstallRequest, K2sContext, ProvisionOutcome};
use k2s_scan::{is_notebook, DependencyExtractor, DependencySet, SourceDocument, SELF_PACKAGE};
use std::fs;
use std::path::{Path, PathBuf};

/// One notebook to provision for
pub struct BootstrapOptions<'a> {
    pub notebook: &'a Path,
    /// None installs into the active environment
    pub env_name: Option<&'a str>,
    /// Packages found outside the notebook (fetched sibling files)
    pub extra: DependencySet,
    /// Installed on top of whatever the notebook needs
    pub also_install: &'a [&'a str],
    pub install_conda: bool,
}

/// Provision an environment for a notebook on disk, register its kernel
/// and point the notebook at it.
pub fn bootstrap_env(ctx: &K2sContext, opts: BootstrapOptions<'_>) -> Result<ProvisionOutcome> {
    if opts.env_name.is_none() {
        log::info!("name not supplied, installing in the current environment...");
    }

    log::info!("Parsing notebook...");
    let doc = SourceDocument::read(opts.notebook)
        .with_context(|| format!("Failed to read {}", opts.notebook.display()))?;
    let mut extractor = DependencyExtractor::new()?;
    let mut packages = extractor.from_document(&doc).packages;
    packages.merge(opts.extra);

    let dir = opts
        .notebook
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    let packages = drop_local_modules(packages, dir);

    let requirements = requirement_list(&packages, opts.also_install);
    println!("Found: {}", packages.to_vec().join(", "));

    let index = ChannelIndex::load(ctx).context("Failed to load the package index")?;
    let request = InstallRequest::classify(&index, opts.env_name, &requirements)
        .install_conda(opts.install_conda);
    log::debug!(
        "conda-forge: {:?}; pip: {:?}",
        request.primary,
        request.fallback
    );

    let outcome = install(ctx, &request)?;
    if outcome == ProvisionOutcome::RestartRequired {
        return Ok(outcome);
    }

    if let Some(name) = opts.env_name {
        println!("Kernel is ready! Refresh your browser and switch the kernel to: {name}");
    }
    if let Some(updated) = doc.with_default_kernelspec(opts.env_name) {
        updated
            .write(opts.notebook)
            .with_context(|| format!("Failed to update {}", opts.notebook.display()))?;
        log::info!("Set the notebook kernel in {}", opts.notebook.display());
    }

    Ok(outcome)
}

/// Packages, then extras not already present, then this tool itself
pub fn requirement_list(packages: &DependencySet, also_install: &[&str]) -> Vec<String> {
    let mut requirements = packages.to_vec();
    for extra in also_install {
        if !packages.contains(extra) {
            requirements.push(extra.to_string());
        }
    }
    requirements.push(SELF_PACKAGE.to_string());
    requirements
}

/// Imports that resolve to `<dir>/<name>.py` or a `<dir>/<name>/` package
/// are the notebook's own modules, not installable packages
pub fn drop_local_modules(packages: DependencySet, dir: &Path) -> DependencySet {
    packages
        .into_iter()
        .filter(|name| {
            let local = dir.join(format!("{name}.py")).is_file()
                || dir.join(name).join("__init__.py").is_file();
            if local {
                log::debug!("{name} is a local module, not installing it");
            }
            !local
        })
        .collect()
}

/// Environment name derived from a notebook file name
pub fn env_name_for(notebook: &Path) -> String {
    let stem = notebook
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "notebook".to_string());
    format!("{stem}-env")
}

/// A notebook fetched into a working directory
pub struct Fetched {
    pub notebook: PathBuf,
    /// Packages used by the sibling scripts and notebooks fetched with it
    pub extra: DependencySet,
}

/// Download `target` (URL or GitHub shorthand) into `dest` along with the
/// files it reads.
pub fn fetch_notebook(source: &dyn RemoteSource, target: &str, dest: &Path) -> Result<Fetched> {
    let url = resolve_url(target);
    let name = url_file_name(&url).with_context(|| format!("No file name in {url}"))?;
    let notebook = dest.join(name);

    log::info!("Downloading {url}...");
    let body = source
        .fetch(&url)
        .with_context(|| format!("Failed to download {url}"))?;
    fs::write(&notebook, &body)?;

    let text = String::from_utf8_lossy(&body);
    let doc = if is_notebook(&notebook) {
        SourceDocument::from_notebook_str(&text)?
    } else {
        SourceDocument::from_script(&text)
    };

    let mut extractor = DependencyExtractor::new()?;
    let local_files = extractor.from_document(&doc).local_files;

    let mut fetcher = SiblingFetcher::new(source, &mut extractor);
    fetcher.visit(&url);
    let extra = fetcher.fetch_all(&url, &local_files, dest);

    Ok(Fetched { notebook, extra })
}

/// What `k2s get` hands to the launcher
pub struct ReadyToLaunch {
    pub jupyter_lab: PathBuf,
    pub notebook: PathBuf,
}

/// Fetch, provision `<stem>-env` with JupyterLab. None when the host must
/// restart first.
pub fn prepare_get(ctx: &K2sContext, target: &str, dest: &Path) -> Result<Option<ReadyToLaunch>> {
    let source = HttpSource::new(ctx.http().clone());
    let fetched = fetch_notebook(&source, target, dest)?;
    let env_name = env_name_for(&fetched.notebook);

    println!("Creating environment {env_name}...");
    println!("This may take a moment.");

    let outcome = bootstrap_env(
        ctx,
        BootstrapOptions {
            notebook: &fetched.notebook,
            env_name: Some(&env_name),
            extra: fetched.extra,
            also_install: &["jupyterlab"],
            install_conda: true,
        },
    )?;

    Ok(match outcome {
        ProvisionOutcome::Ready(env) => Some(ReadyToLaunch {
            jupyter_lab: env.bin("jupyter-lab"),
            notebook: fetched.notebook,
        }),
        ProvisionOutcome::RestartRequired => None,
    })
}
