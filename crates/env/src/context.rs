use crate::error::{EnvError, Result};
use crate::platform::PlatformProfile;
use crate::runner::{CommandRunner, StreamingRunner};
use reqwest::blocking::Client;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Overrides the k2s home directory
pub const HOME_ENV: &str = "K2S_HOME";

/// Seam between the provisioner and the network
pub trait Downloader {
    /// Fetch `url` into `dest`, creating parent directories as needed
    fn download(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Downloads over HTTP. The body lands in a sibling temp file that is
/// renamed into place, so `dest` is never left half-written.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Downloader for HttpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        log::debug!("downloading {url} -> {}", dest.display());
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut response = self.client.get(url).send()?.error_for_status()?;
        let tmp = temp_path_for(dest);
        let written = {
            let mut file = fs::File::create(&tmp)?;
            response.copy_to(&mut file)
        };
        if let Err(err) = written {
            let _ = fs::remove_file(&tmp);
            return Err(err.into());
        }
        fs::rename(&tmp, dest)?;
        Ok(())
    }
}

/// Everything one k2s invocation shares: the home directory, the HTTP
/// client, the platform profile and the command runner.
///
/// Built once per invocation and passed by reference; nothing here is
/// process-global.
pub struct K2sContext {
    home: PathBuf,
    profile: PlatformProfile,
    http: Client,
    runner: Box<dyn CommandRunner>,
    downloader: Box<dyn Downloader>,
    search_path: Option<OsString>,
}

impl K2sContext {
    /// Home from `$K2S_HOME` (else `~/.k2s`), profile from the environment
    /// probe, child processes streamed through a spinner
    pub fn from_env(quiet: bool) -> Result<Self> {
        Self::new(
            resolve_home()?,
            PlatformProfile::detect(),
            Box::new(StreamingRunner::new().quiet(quiet)),
        )
    }

    /// Creates `home` if missing. Downloads go over HTTP and programs are
    /// looked up on the process `PATH`.
    pub fn new(
        home: impl Into<PathBuf>,
        profile: PlatformProfile,
        runner: Box<dyn CommandRunner>,
    ) -> Result<Self> {
        let home = home.into();
        fs::create_dir_all(&home)?;
        let http = Client::builder()
            .user_agent(concat!("k2s/", env!("CARGO_PKG_VERSION")))
            .build()?;
        log::debug!("k2s home: {}", home.display());
        Ok(Self {
            home,
            profile,
            downloader: Box::new(HttpDownloader::new(http.clone())),
            http,
            runner,
            search_path: std::env::var_os("PATH"),
        })
    }

    pub fn with_downloader(mut self, downloader: Box<dyn Downloader>) -> Self {
        self.downloader = downloader;
        self
    }

    /// Look programs up in `paths` (`PATH` syntax) instead of the process
    /// `PATH`
    pub fn with_search_path(mut self, paths: impl Into<OsString>) -> Self {
        self.search_path = Some(paths.into());
        self
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    pub fn profile(&self) -> &PlatformProfile {
        &self.profile
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn download(&self, url: &str, dest: &Path) -> Result<()> {
        self.downloader.download(url, dest)
    }

    /// Absolute path of `program` on the search path
    pub fn find_program(&self, program: &str) -> Option<PathBuf> {
        let paths = self.search_path.as_ref()?;
        which::which_in(program, Some(paths), &self.home).ok()
    }
}

/// `$K2S_HOME`, else `~/.k2s`
pub fn resolve_home() -> Result<PathBuf> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }
    dirs::home_dir()
        .map(|home| home.join(".k2s"))
        .ok_or_else(|| EnvError::other(format!("cannot locate a home directory; set {HOME_ENV}")))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".download");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{EnvGuard, ENV_MUTEX};

    #[test]
    fn home_honours_override() {
        let _lock = ENV_MUTEX.lock().expect("ENV_MUTEX");
        let _guard = EnvGuard::new(&[HOME_ENV]);

        std::env::set_var(HOME_ENV, "/srv/k2s");
        assert_eq!(resolve_home().unwrap(), PathBuf::from("/srv/k2s"));

        std::env::set_var(HOME_ENV, "");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(resolve_home().unwrap(), home.join(".k2s"));
        }
    }

    #[test]
    fn new_creates_home() {
        let dir = tempfile::tempdir().unwrap();
        let home = dir.path().join("nested/.k2s");
        let ctx = K2sContext::new(
            &home,
            PlatformProfile::Local,
            Box::new(StreamingRunner::new().quiet(true)),
        )
        .unwrap();
        assert!(home.is_dir());
        assert_eq!(ctx.home(), home.as_path());
        assert_eq!(ctx.profile(), &PlatformProfile::Local);
    }

    #[test]
    fn programs_come_from_the_search_path() {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let ctx = K2sContext::new(
            dir.path().join("home"),
            PlatformProfile::Local,
            Box::new(StreamingRunner::new().quiet(true)),
        )
        .unwrap()
        .with_search_path(bin.as_os_str());
        assert_eq!(ctx.find_program("conda"), None);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let conda = bin.join("conda");
            fs::write(&conda, "#!/bin/sh\n").unwrap();
            fs::set_permissions(&conda, fs::Permissions::from_mode(0o755)).unwrap();
            assert_eq!(ctx.find_program("conda"), Some(conda));
        }
    }

    #[test]
    fn temp_path_is_a_sibling() {
        assert_eq!(
            temp_path_for(Path::new("/a/b/conda-forge.json")),
            PathBuf::from("/a/b/conda-forge.json.download")
        );
    }
}
