use crate::conda::CondaManager;
use crate::context::K2sContext;
use crate::error::Result;
use crate::index::ChannelIndex;
use crate::kernel::register_kernel;
use crate::platform::AfterInstall;
use std::path::PathBuf;

/// What to provision
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallRequest {
    /// Named environment under `<base>/envs`; None updates the active one
    pub name: Option<String>,
    /// Available on the primary channel
    pub primary: Vec<String>,
    /// Installed through pip
    pub fallback: Vec<String>,
    /// Bootstrap conda when no installation is found
    pub install_conda: bool,
}

impl InstallRequest {
    /// Split `requirements` against the channel index
    pub fn classify<S: AsRef<str>>(
        index: &ChannelIndex,
        name: Option<&str>,
        requirements: &[S],
    ) -> Self {
        let (primary, fallback) = index.pkg_exists(requirements);
        Self {
            name: name.map(str::to_string),
            primary,
            fallback,
            install_conda: true,
        }
    }

    pub fn install_conda(mut self, install_conda: bool) -> Self {
        self.install_conda = install_conda;
        self
    }
}

/// A ready-to-use environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedEnv {
    pub prefix: PathBuf,
    /// `<prefix>/bin/python`
    pub python: PathBuf,
    /// `kernel.json` written for named environments
    pub kernel: Option<PathBuf>,
}

impl ProvisionedEnv {
    /// Path of an executable installed in the environment
    pub fn bin(&self, name: &str) -> PathBuf {
        self.prefix.join("bin").join(name)
    }
}

/// Result of a provisioning run. Neither variant is an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Ready(ProvisionedEnv),
    /// The base installation replaced the running interpreter; restart the
    /// host process and run again to finish
    RestartRequired,
}

/// Run the provisioning steps in order; each one is a no-op when its work
/// is already done.
///
/// 1. base conda installation
/// 2. mamba in the base prefix
/// 3. environment create/update from the request
/// 4. kernel registration (named environments only)
pub fn install(ctx: &K2sContext, request: &InstallRequest) -> Result<ProvisionOutcome> {
    log::debug!(
        "provisioning on {}: {} conda + {} pip packages",
        ctx.profile().name(),
        request.primary.len(),
        request.fallback.len()
    );

    let (manager, after) = CondaManager::ensure(ctx, request.install_conda)?;
    if after == AfterInstall::RestartRequired {
        return Ok(ProvisionOutcome::RestartRequired);
    }

    manager.ensure_mamba()?;

    let name = request.name.as_deref();
    let prefix = manager.create_env(name, &request.primary, &request.fallback)?;
    let python = prefix.join("bin").join("python");

    let kernel = match name {
        Some(name) => Some(register_kernel(&manager.active_prefix()?, name, &python)?),
        None => None,
    };

    Ok(ProvisionOutcome::Ready(ProvisionedEnv {
        prefix,
        python,
        kernel,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EnvError;
    use crate::platform::PlatformProfile;
    use crate::test_support::{EnvGuard, FakeConda, FakeDownloads, ENV_MUTEX};
    use pretty_assertions::assert_eq;
    use std::fs;

    fn bootstrap_request() -> InstallRequest {
        InstallRequest {
            install_conda: true,
            ..InstallRequest::default()
        }
    }

    #[test]
    fn classify_splits_by_channel() {
        let index = ChannelIndex::from_names(["pandas", "ploomber"]);
        let request =
            InstallRequest::classify(&index, Some("nb-env"), &["pandas", "ploomber==0.21", "k2s"])
                .install_conda(false);
        assert_eq!(request.primary, ["pandas", "ploomber=0.21"]);
        assert_eq!(request.fallback, ["k2s"]);
        assert!(!request.install_conda);
    }

    #[test]
    fn full_run_registers_kernel() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("conda");
        fs::create_dir_all(base.join("bin")).unwrap();
        fs::write(base.join("bin/conda"), "").unwrap();

        let fake = FakeConda::default();
        let ctx = K2sContext::new(dir.path(), PlatformProfile::Local, Box::new(fake.clone()))
            .unwrap();
        let request = InstallRequest {
            name: Some("nb-env".to_string()),
            primary: vec!["pandas".to_string()],
            fallback: vec!["k2s".to_string()],
            install_conda: false,
        };

        let ProvisionOutcome::Ready(env) = install(&ctx, &request).unwrap() else {
            panic!("expected a ready environment");
        };
        assert_eq!(env.prefix, base.join("envs/nb-env"));
        assert_eq!(env.python, base.join("envs/nb-env/bin/python"));
        assert_eq!(env.bin("jupyter-lab"), base.join("envs/nb-env/bin/jupyter-lab"));
        // no active env reported: kernels go to the root prefix
        assert_eq!(
            env.kernel,
            Some(base.join("share/jupyter/kernels/nb-env/kernel.json"))
        );
        assert_eq!(fake.programs(), ["conda install", "mamba env", "conda info"]);
    }

    #[test]
    fn hosted_profile_reuses_fixed_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("usr-local");
        fs::create_dir_all(prefix.join("bin")).unwrap();
        fs::write(prefix.join("bin/conda"), "").unwrap();
        fs::write(prefix.join("bin/mamba"), "").unwrap();

        let fake = FakeConda::default();
        let ctx = K2sContext::new(
            dir.path().join("home"),
            PlatformProfile::Colab {
                prefix: prefix.clone(),
            },
            Box::new(fake.clone()),
        )
        .unwrap();

        let outcome = install(&ctx, &InstallRequest::default()).unwrap();
        let ProvisionOutcome::Ready(env) = outcome else {
            panic!("conda is present, no restart expected");
        };
        assert_eq!(env.prefix, prefix);
        assert_eq!(env.kernel, None);
        assert_eq!(fake.programs(), ["mamba env"]);
    }

    #[test]
    fn fresh_colab_install_asks_for_restart() {
        let _lock = ENV_MUTEX.lock().expect("ENV_MUTEX");
        let _guard = EnvGuard::new(&["LD_LIBRARY_PATH"]);

        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("home");
        let prefix = dir.path().join("usr-local");
        let fake = FakeConda::default();
        let downloads = FakeDownloads::default();
        let ctx = K2sContext::new(
            &home,
            PlatformProfile::Colab {
                prefix: prefix.clone(),
            },
            Box::new(fake.clone()),
        )
        .unwrap()
        .with_downloader(Box::new(downloads.clone()));

        let outcome = install(&ctx, &bootstrap_request()).unwrap();
        assert_eq!(outcome, ProvisionOutcome::RestartRequired);

        let urls = downloads.urls.borrow();
        assert_eq!(urls.len(), 1);
        assert!(urls[0].contains("Miniforge3-Linux-x86_64.sh"), "{urls:?}");

        // only the installer ran; the environment waits for the next run
        let calls = fake.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].to_string(),
            format!(
                "bash {} -b -f -p {}",
                home.join("conda-installer.sh").display(),
                prefix.display()
            )
        );
        assert!(!home.join("conda-installer.sh").exists());

        assert_eq!(fs::read_to_string(prefix.join("bin/python3.real")).unwrap(), "ELF");
        let wrapper = fs::read_to_string(prefix.join("bin/python3")).unwrap();
        assert!(wrapper.contains("python3.real"), "{wrapper}");
        assert_eq!(
            std::env::var("LD_LIBRARY_PATH").unwrap(),
            prefix.join("lib").to_string_lossy().into_owned()
        );
    }

    #[test]
    fn local_without_conda_and_no_install_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let empty_path = dir.path().join("empty-bin");
        fs::create_dir_all(&empty_path).unwrap();

        let fake = FakeConda::default();
        let downloads = FakeDownloads::default();
        let ctx = K2sContext::new(
            dir.path().join("home"),
            PlatformProfile::Local,
            Box::new(fake.clone()),
        )
        .unwrap()
        .with_downloader(Box::new(downloads.clone()))
        .with_search_path(empty_path.as_os_str());

        let err = install(&ctx, &InstallRequest::default()).unwrap_err();
        match err {
            EnvError::CondaMissing(target) => assert_eq!(target, dir.path().join("home/conda")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(fake.calls.borrow().is_empty());
        assert!(downloads.urls.borrow().is_empty());
    }

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    #[test]
    fn fresh_local_install_continues_to_the_environment() {
        let dir = tempfile::tempdir().unwrap();
        let empty_path = dir.path().join("empty-bin");
        fs::create_dir_all(&empty_path).unwrap();
        let home = dir.path().join("home");

        let fake = FakeConda::default();
        let downloads = FakeDownloads::default();
        let ctx = K2sContext::new(&home, PlatformProfile::Local, Box::new(fake.clone()))
            .unwrap()
            .with_downloader(Box::new(downloads.clone()))
            .with_search_path(empty_path.as_os_str());

        let request = InstallRequest {
            name: Some("nb-env".to_string()),
            ..bootstrap_request()
        };
        let ProvisionOutcome::Ready(env) = install(&ctx, &request).unwrap() else {
            panic!("a local install never needs a restart");
        };

        assert_eq!(env.prefix, home.join("conda/envs/nb-env"));
        assert_eq!(
            *downloads.urls.borrow(),
            ["https://repo.anaconda.com/miniconda/Miniconda3-latest-Linux-x86_64.sh"]
        );
        let programs = fake.programs();
        assert_eq!(programs[1..].to_vec(), ["conda install", "mamba env", "conda info"]);
        assert!(programs[0].starts_with("bash "), "{programs:?}");
        assert!(home.join("conda/bin/conda").is_file());
    }
}
