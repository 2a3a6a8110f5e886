use crate::error::{EnvError, Result};
use crate::runner::Invocation;
use std::collections::HashSet;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Fixed prefix of the hosted Colab runtime
pub const COLAB_PREFIX: &str = "/usr/local";
/// Fixed prefix of the hosted Kaggle runtime
pub const KAGGLE_PREFIX: &str = "/opt/conda";

const COLAB_PROBES: &[&str] = &["COLAB_RELEASE_TAG", "COLAB_GPU"];
const KAGGLE_PROBES: &[&str] = &["KAGGLE_KERNEL_RUN_TYPE", "KAGGLE_URL_BASE"];

const MINIFORGE_LINUX_X86_64: &str =
    "https://github.com/conda-forge/miniforge/releases/latest/download/Miniforge3-Linux-x86_64.sh";

/// Where provisioning happens and how the base installation gets there.
///
/// Selected once per invocation by [`PlatformProfile::detect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformProfile {
    /// A workstation: conda lives under the k2s home or wherever PATH finds it
    Local,
    /// Google Colab: the system interpreter prefix is the environment
    Colab { prefix: PathBuf },
    /// Kaggle: conda is preinstalled at a fixed prefix
    Kaggle { prefix: PathBuf },
}

/// What the caller must do after a base installation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AfterInstall {
    Continue,
    /// The running interpreter was replaced; the host process must restart
    RestartRequired,
}

impl PlatformProfile {
    /// Probe the process environment
    pub fn detect() -> Self {
        Self::detect_with(|key| env::var_os(key))
    }

    /// Probe through `lookup` instead of the process environment
    pub fn detect_with(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let present = |keys: &[&str]| keys.iter().any(|key| lookup(key).is_some());

        let profile = if present(COLAB_PROBES) {
            Self::colab()
        } else if present(KAGGLE_PROBES) {
            Self::kaggle()
        } else {
            Self::Local
        };
        log::debug!("platform profile: {}", profile.name());
        profile
    }

    pub fn colab() -> Self {
        Self::Colab {
            prefix: PathBuf::from(COLAB_PREFIX),
        }
    }

    pub fn kaggle() -> Self {
        Self::Kaggle {
            prefix: PathBuf::from(KAGGLE_PREFIX),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Colab { .. } => "colab",
            Self::Kaggle { .. } => "kaggle",
        }
    }

    /// Hosted platforms pin both the base and the active prefix
    pub fn fixed_prefix(&self) -> Option<&Path> {
        match self {
            Self::Local => None,
            Self::Colab { prefix } | Self::Kaggle { prefix } => Some(prefix.as_path()),
        }
    }

    /// Bootstrap installer for this platform; None when the platform ships
    /// its own installation
    pub fn installer_url(&self) -> Result<Option<&'static str>> {
        match self {
            Self::Local => miniconda_url(env::consts::OS, env::consts::ARCH).map(Some),
            Self::Colab { .. } => Ok(Some(MINIFORGE_LINUX_X86_64)),
            Self::Kaggle { .. } => Ok(None),
        }
    }

    /// Unattended installer run into `prefix`
    pub fn installer_invocation(&self, script: &Path, prefix: &Path) -> Invocation {
        let inv = Invocation::new("bash").path_arg(script).arg("-b");
        // the hosted prefix already exists and must be installed over
        let inv = match self {
            Self::Colab { .. } => inv.arg("-f"),
            _ => inv,
        };
        inv.arg("-p").path_arg(prefix)
    }

    /// Runs once, right after a fresh base installation into `prefix`
    pub fn post_install_hook(&self, prefix: &Path) -> Result<AfterInstall> {
        match self {
            Self::Colab { .. } => {
                let lib = prefix.join("lib");
                let joined = prepend_path_entry(env::var_os("LD_LIBRARY_PATH"), &lib);
                env::set_var("LD_LIBRARY_PATH", &joined);
                install_python_wrapper(prefix)?;
                Ok(AfterInstall::RestartRequired)
            }
            Self::Local | Self::Kaggle { .. } => Ok(AfterInstall::Continue),
        }
    }
}

/// Miniconda installer for an OS/architecture pair
pub fn miniconda_url(os: &str, arch: &str) -> Result<&'static str> {
    match (os, arch) {
        ("linux", "x86_64") => {
            Ok("https://repo.anaconda.com/miniconda/Miniconda3-latest-Linux-x86_64.sh")
        }
        ("macos", "x86_64") => {
            Ok("https://repo.anaconda.com/miniconda/Miniconda3-latest-MacOSX-x86_64.sh")
        }
        ("macos", "aarch64") => {
            Ok("https://repo.anaconda.com/miniconda/Miniconda3-latest-MacOSX-arm64.sh")
        }
        _ => Err(EnvError::UnsupportedPlatform(format!("{os}/{arch}"))),
    }
}

/// `entry` first, then the existing colon-separated entries, without
/// duplicates
fn prepend_path_entry(existing: Option<OsString>, entry: &Path) -> String {
    let mut seen: HashSet<String> = HashSet::new();
    let mut ordered: Vec<String> = Vec::new();

    let first = entry.to_string_lossy().into_owned();
    seen.insert(first.clone());
    ordered.push(first);

    if let Some(existing) = existing {
        for part in existing.to_string_lossy().split(':').filter(|p| !p.is_empty()) {
            if seen.insert(part.to_string()) {
                ordered.push(part.to_string());
            }
        }
    }

    ordered.join(":")
}

/// Replace `bin/python3` with a script that exports the prefix's library
/// directory before exec'ing the real interpreter.
fn install_python_wrapper(prefix: &Path) -> Result<()> {
    let bin = prefix.join("bin");
    let python = bin.join("python3");
    let real = bin.join("python3.real");

    // a second run must not move the wrapper over the real binary
    if !real.exists() {
        fs::rename(&python, &real)?;
    }

    let script = format!(
        "#!/bin/bash\nexport LD_LIBRARY_PATH=\"{lib}:$LD_LIBRARY_PATH\"\nexec {real} \"$@\"\n",
        lib = prefix.join("lib").display(),
        real = real.display(),
    );

    let tmp = bin.join(".python3.k2s-tmp");
    fs::write(&tmp, script)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o755))?;
    }
    fs::rename(&tmp, &python)?;
    log::info!("installed interpreter wrapper at {}", python.display());
    Ok(())
}
