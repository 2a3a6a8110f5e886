use crate::context::K2sContext;
use crate::error::{EnvError, Result};
use crate::index::{requirement_name, PRIMARY_CHANNEL};
use crate::platform::AfterInstall;
use crate::runner::Invocation;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment file handed to `mamba env update` (JSON is valid YAML)
pub const ENV_FILE: &str = "env.yml";

/// Always installed alongside the requested packages
const BASE_DEPENDENCIES: &[&str] = &["pip", "ipykernel", "python"];

/// Contents of `env.yml`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentSpec {
    pub name: Option<String>,
    pub channels: Vec<String>,
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Dependency {
    Conda(String),
    Pip { pip: Vec<String> },
}

impl EnvironmentSpec {
    /// `primary` from the channel, then the base set, then `fallback` via pip
    pub fn new(name: Option<&str>, primary: &[String], fallback: &[String]) -> Self {
        let mut dependencies: Vec<Dependency> =
            primary.iter().cloned().map(Dependency::Conda).collect();
        dependencies.extend(
            BASE_DEPENDENCIES
                .iter()
                .map(|dep| Dependency::Conda(dep.to_string())),
        );
        dependencies.push(Dependency::Pip {
            pip: fallback.to_vec(),
        });

        Self {
            name: name.map(str::to_string),
            channels: vec![PRIMARY_CHANNEL.to_string()],
            dependencies,
        }
    }
}

#[derive(Deserialize)]
struct CondaInfo {
    active_prefix: Option<String>,
    root_prefix: Option<String>,
}

/// Drives one conda base installation.
pub struct CondaManager<'a> {
    ctx: &'a K2sContext,
    base: PathBuf,
}

impl<'a> CondaManager<'a> {
    /// Manage an existing base installation at `base`
    pub fn at(ctx: &'a K2sContext, base: impl Into<PathBuf>) -> Self {
        Self {
            ctx,
            base: base.into(),
        }
    }

    /// Locate the base installation, installing it when allowed.
    ///
    /// Lookup order: the profile's fixed prefix on hosted platforms;
    /// otherwise `<home>/conda`, then a `conda` found on PATH.
    pub fn ensure(ctx: &'a K2sContext, install_conda: bool) -> Result<(Self, AfterInstall)> {
        let candidates: Vec<PathBuf> = match ctx.profile().fixed_prefix() {
            Some(prefix) => vec![prefix.to_path_buf()],
            None => {
                let mut found = vec![local_base(ctx)];
                if let Some(conda) = ctx.find_program("conda") {
                    found.extend(prefix_of_binary(&conda));
                }
                found
            }
        };

        if let Some(base) = candidates.iter().find(|base| has_conda(base)) {
            log::debug!("using conda at {}", base.display());
            return Ok((Self::at(ctx, base), AfterInstall::Continue));
        }

        let target = match ctx.profile().fixed_prefix() {
            Some(prefix) => prefix.to_path_buf(),
            None => local_base(ctx),
        };
        if !install_conda {
            return Err(EnvError::CondaMissing(target));
        }

        let manager = Self::at(ctx, target);
        let after = manager.install_base()?;
        Ok((manager, after))
    }

    pub fn base_prefix(&self) -> &Path {
        &self.base
    }

    pub fn conda_bin(&self) -> PathBuf {
        self.base.join("bin").join("conda")
    }

    pub fn mamba_bin(&self) -> PathBuf {
        self.base.join("bin").join("mamba")
    }

    /// Download the platform installer and run it unattended into the base
    /// prefix
    fn install_base(&self) -> Result<AfterInstall> {
        let profile = self.ctx.profile();
        let url = profile
            .installer_url()?
            .ok_or_else(|| EnvError::CondaMissing(self.base.clone()))?;

        log::info!("Installing conda (only needed once)...");
        let script = self.ctx.home().join("conda-installer.sh");
        self.ctx.download(url, &script)?;
        let installed = self
            .ctx
            .runner()
            .run(&profile.installer_invocation(&script, &self.base));
        let _ = fs::remove_file(&script);
        installed?;
        log::info!("Finished installing conda.");

        profile.post_install_hook(&self.base)
    }

    /// Install mamba into the base prefix unless it is already there
    pub fn ensure_mamba(&self) -> Result<()> {
        if self.mamba_bin().exists() {
            log::info!("mamba already installed, skipping.");
            return Ok(());
        }

        log::info!("Installing mamba...");
        let inv = Invocation::new(self.conda_bin())
            .arg("install")
            .arg("mamba")
            .arg("-c")
            .arg(PRIMARY_CHANNEL)
            .arg("-y")
            .arg("--prefix")
            .path_arg(&self.base);
        self.ctx.runner().run(&inv)?;
        log::info!("Done installing mamba.");
        Ok(())
    }

    /// Prefix of the currently active environment (where kernels get
    /// registered)
    pub fn active_prefix(&self) -> Result<PathBuf> {
        if let Some(prefix) = self.ctx.profile().fixed_prefix() {
            return Ok(prefix.to_path_buf());
        }

        let inv = Invocation::new(self.conda_bin()).arg("info").arg("--json");
        let info: CondaInfo = serde_json::from_str(&self.ctx.runner().output(&inv)?)?;
        // conda reports no active prefix from inside the base environment
        Ok(info
            .active_prefix
            .or(info.root_prefix)
            .map(PathBuf::from)
            .unwrap_or_else(|| self.base.clone()))
    }

    /// `<base>/envs/<name>`, or the active prefix when unnamed
    pub fn env_prefix(&self, name: Option<&str>) -> Result<PathBuf> {
        match name {
            Some(name) => Ok(self.base.join("envs").join(name)),
            None => self.active_prefix(),
        }
    }

    /// Create or update an environment so it holds `primary` (from the
    /// channel) and `fallback` (through pip). Returns its prefix.
    pub fn create_env(
        &self,
        name: Option<&str>,
        primary: &[String],
        fallback: &[String],
    ) -> Result<PathBuf> {
        let prefix = self.env_prefix(name)?;

        if name.is_some() && prefix.exists() && !is_complete(&prefix) {
            log::warn!(
                "{} looks like an interrupted install; recreating it",
                prefix.display()
            );
            fs::remove_dir_all(&prefix)?;
        }

        if prefix.join("conda-meta").is_dir() {
            log::info!("Updating environment at {}...", prefix.display());
            pin_runtime(&prefix)?;
        } else {
            log::info!("Installing dependencies...");
        }

        let spec = EnvironmentSpec::new(name, primary, fallback);
        let env_file = self.ctx.home().join(ENV_FILE);
        fs::write(&env_file, serde_json::to_string(&spec)?)?;

        let mut inv = Invocation::new(self.mamba_bin())
            .arg("env")
            .arg("update")
            .arg("--file")
            .path_arg(&env_file)
            .arg("--prefix")
            .path_arg(&prefix);
        // never prune packages the user put in their own active environment
        if name.is_some() {
            inv = inv.arg("--prune");
        }
        self.ctx.runner().run(&inv)?;

        pin_runtime(&prefix)?;
        log::info!("Done installing dependencies.");
        Ok(prefix)
    }
}

fn local_base(ctx: &K2sContext) -> PathBuf {
    ctx.home().join("conda")
}

fn has_conda(base: &Path) -> bool {
    base.join("bin").join("conda").is_file()
}

/// `<prefix>` for a binary at `<prefix>/bin/<name>`
fn prefix_of_binary(binary: &Path) -> Option<PathBuf> {
    binary.parent()?.parent().map(Path::to_path_buf)
}

/// A prefix without `conda-meta/history` was never finished
fn is_complete(prefix: &Path) -> bool {
    prefix.join("conda-meta").join("history").is_file()
}

/// Python version recorded in `conda-meta/python-<version>-<build>.json`
pub fn installed_python_version(prefix: &Path) -> Result<Option<String>> {
    let meta = prefix.join("conda-meta");
    if !meta.is_dir() {
        return Ok(None);
    }

    for entry in fs::read_dir(&meta)? {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(rest) = name
            .strip_prefix("python-")
            .and_then(|rest| rest.strip_suffix(".json"))
        else {
            continue;
        };
        // python-dateutil-..., python-tzdata-... are other packages
        if !rest.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        if let Some((version, _build)) = rest.split_once('-') {
            return Ok(Some(version.to_string()));
        }
    }
    Ok(None)
}

/// Pin the installed Python in `conda-meta/pinned` so adding packages can
/// never swap the interpreter. Other pins are kept.
pub fn pin_runtime(prefix: &Path) -> Result<Option<String>> {
    let Some(version) = installed_python_version(prefix)? else {
        return Ok(None);
    };

    let pinned = prefix.join("conda-meta").join("pinned");
    let existing = match fs::read_to_string(&pinned) {
        Ok(existing) => existing,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let mut lines: Vec<&str> = existing
        .lines()
        .filter(|line| !line.trim().is_empty() && requirement_name(line.trim()) != "python")
        .collect();
    let pin = format!("python=={version}");
    lines.push(&pin);

    fs::write(&pinned, lines.join("\n") + "\n")?;
    log::debug!("pinned {pin} in {}", pinned.display());
    Ok(Some(version))
}
