use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A Jupyter `kernel.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    pub argv: Vec<String>,
    pub display_name: String,
    pub language: String,
    pub metadata: KernelMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelMetadata {
    pub debugger: bool,
}

impl KernelSpec {
    /// ipykernel launched by `python` (the environment must have ipykernel)
    pub fn for_python(python: &Path, name: &str) -> Self {
        Self {
            argv: vec![
                python.to_string_lossy().into_owned(),
                "-m".to_string(),
                "ipykernel_launcher".to_string(),
                "-f".to_string(),
                "{connection_file}".to_string(),
            ],
            display_name: format!("Python 3 ({name})"),
            language: "python".to_string(),
            metadata: KernelMetadata { debugger: true },
        }
    }
}

/// `<prefix>/share/jupyter/kernels`
pub fn kernels_dir(prefix: &Path) -> PathBuf {
    prefix.join("share").join("jupyter").join("kernels")
}

/// Write `<active_prefix>/share/jupyter/kernels/<name>/kernel.json`,
/// replacing any previous spec of the same name. Returns the file written.
pub fn register_kernel(active_prefix: &Path, name: &str, python: &Path) -> Result<PathBuf> {
    let dir = kernels_dir(active_prefix).join(name);
    fs::create_dir_all(&dir)?;

    let path = dir.join("kernel.json");
    let spec = KernelSpec::for_python(python, name);
    fs::write(&path, serde_json::to_string_pretty(&spec)?)?;
    log::info!("Registered kernel '{name}' at {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn spec_layout() {
        let spec = KernelSpec::for_python(Path::new("/c/envs/nb-env/bin/python"), "nb-env");
        assert_eq!(
            serde_json::to_value(&spec).unwrap(),
            json!({
                "argv": ["/c/envs/nb-env/bin/python", "-m", "ipykernel_launcher", "-f", "{connection_file}"],
                "display_name": "Python 3 (nb-env)",
                "language": "python",
                "metadata": {"debugger": true}
            })
        );
    }

    #[test]
    fn registration_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let first = register_kernel(dir.path(), "nb-env", Path::new("/old/bin/python")).unwrap();
        let second = register_kernel(dir.path(), "nb-env", Path::new("/new/bin/python")).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            second,
            dir.path().join("share/jupyter/kernels/nb-env/kernel.json")
        );

        let spec: KernelSpec =
            serde_json::from_str(&fs::read_to_string(&second).unwrap()).unwrap();
        assert_eq!(spec.argv[0], "/new/bin/python");
    }
}
