//! Shared unit-test fixtures: environment-variable guards, a fake conda and
//! a fake network.

use crate::context::Downloader;
use crate::error::{EnvError, Result};
use crate::runner::{CommandRunner, Invocation};
use std::cell::RefCell;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Mutex;

/// Serialises tests that read or write process environment variables
pub static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Clears `keys` and restores their previous values on drop
pub struct EnvGuard {
    saved: Vec<(String, Option<OsString>)>,
}

impl EnvGuard {
    pub fn new(keys: &[&str]) -> Self {
        let mut saved = Vec::new();
        for &key in keys {
            saved.push((key.to_string(), env::var_os(key)));
            env::remove_var(key);
        }
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in self.saved.drain(..) {
            match value {
                Some(v) => env::set_var(&key, v),
                None => env::remove_var(&key),
            }
        }
    }
}

/// Python version the fake resolver "installs"
pub const FAKE_PYTHON: &str = "3.11.5";

/// Stands in for conda/mamba: records every invocation and leaves behind
/// the files a real run would.
#[derive(Clone, Default)]
pub struct FakeConda {
    pub calls: Rc<RefCell<Vec<Invocation>>>,
    pub active_prefix: Option<PathBuf>,
    pub fail_on: Option<&'static str>,
}

impl FakeConda {
    pub fn programs(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|inv| {
                let sub = inv.args.first().map(String::as_str).unwrap_or("");
                format!("{} {sub}", inv.program_name())
            })
            .collect()
    }

    fn flag_value(inv: &Invocation, flag: &str) -> Option<PathBuf> {
        let at = inv.args.iter().position(|arg| arg == flag)?;
        inv.args.get(at + 1).map(PathBuf::from)
    }
}

impl CommandRunner for FakeConda {
    fn run(&self, inv: &Invocation) -> Result<()> {
        self.calls.borrow_mut().push(inv.clone());
        if self.fail_on == Some(inv.program_name()) {
            return Err(EnvError::CommandFailed {
                command: inv.to_string(),
                code: Some(1),
                stderr: "ResolvePackageNotFound".to_string(),
            });
        }

        match (inv.program_name(), inv.args.first().map(String::as_str)) {
            ("conda", Some("install")) => {
                if let Some(prefix) = Self::flag_value(inv, "--prefix") {
                    fs::create_dir_all(prefix.join("bin"))?;
                    fs::write(prefix.join("bin/mamba"), "")?;
                }
            }
            ("mamba", Some("env")) => {
                if let Some(prefix) = Self::flag_value(inv, "--prefix") {
                    let meta = prefix.join("conda-meta");
                    fs::create_dir_all(&meta)?;
                    fs::create_dir_all(prefix.join("bin"))?;
                    fs::write(meta.join("history"), "==> 2024-01-01 <==\n")?;
                    fs::write(meta.join(format!("python-{FAKE_PYTHON}-hab00c5b_0_cpython.json")), "{}")?;
                    fs::write(meta.join("python-dateutil-2.8.2-pyhd8ed1ab_0.json"), "{}")?;
                    fs::write(prefix.join("bin/python"), "")?;
                }
            }
            ("bash", _) => {
                if let Some(prefix) = Self::flag_value(inv, "-p") {
                    fs::create_dir_all(prefix.join("bin"))?;
                    fs::write(prefix.join("bin/conda"), "")?;
                    fs::write(prefix.join("bin/python3"), "ELF")?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn output(&self, inv: &Invocation) -> Result<String> {
        self.calls.borrow_mut().push(inv.clone());
        let active = match &self.active_prefix {
            Some(prefix) => serde_json::Value::String(prefix.to_string_lossy().into_owned()),
            None => serde_json::Value::Null,
        };
        let root = inv
            .program
            .parent()
            .and_then(|bin| bin.parent())
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(serde_json::json!({"active_prefix": active, "root_prefix": root}).to_string())
    }
}

/// Records requested URLs and writes a stub body instead of fetching
#[derive(Clone, Default)]
pub struct FakeDownloads {
    pub urls: Rc<RefCell<Vec<String>>>,
}

impl Downloader for FakeDownloads {
    fn download(&self, url: &str, dest: &Path) -> Result<()> {
        self.urls.borrow_mut().push(url.to_string());
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, "#!/bin/sh\n")?;
        Ok(())
    }
}
