use crate::context::K2sContext;
use crate::error::Result;
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;

/// Catalog snapshot of the primary channel
pub const CHANNEL_DATA_URL: &str = "https://conda.anaconda.org/conda-forge/channeldata.json";
/// Cache file name inside the k2s home
pub const CHANNEL_DATA_FILE: &str = "conda-forge.json";
pub const PRIMARY_CHANNEL: &str = "conda-forge";

#[derive(Deserialize)]
struct ChannelData {
    packages: HashMap<String, IgnoredAny>,
}

/// Package names published on the primary channel.
///
/// The snapshot is downloaded once and then reused from the home directory
/// for good; a stale catalog only sends new packages to pip.
#[derive(Debug, Clone, Default)]
pub struct ChannelIndex {
    names: HashSet<String>,
}

impl ChannelIndex {
    /// Cached snapshot, downloading it first when absent
    pub fn load(ctx: &K2sContext) -> Result<Self> {
        let target = ctx.home().join(CHANNEL_DATA_FILE);
        if !target.exists() {
            log::info!("Fetching {PRIMARY_CHANNEL} package index (only needed once)...");
            ctx.download(CHANNEL_DATA_URL, &target)?;
        }
        let text = fs::read_to_string(&target)?;
        let index = Self::from_json(&text)?;
        log::debug!("{} packages in {}", index.len(), target.display());
        Ok(index)
    }

    /// Parse `channeldata.json`
    pub fn from_json(text: &str) -> Result<Self> {
        let data: ChannelData = serde_json::from_str(text)?;
        Ok(Self {
            names: data.packages.into_keys().collect(),
        })
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Split requirements into (primary channel, pip) lists, keeping input
    /// order. Primary entries get `==` rewritten to conda's `=`; pip entries
    /// are passed through untouched.
    pub fn pkg_exists<S: AsRef<str>>(&self, names: &[S]) -> (Vec<String>, Vec<String>) {
        let mut exist = Vec::new();
        let mut not_exist = Vec::new();

        for requirement in names {
            let requirement = requirement.as_ref();
            if self.contains(requirement_name(requirement)) {
                exist.push(requirement.replace("==", "="));
            } else {
                not_exist.push(requirement.to_string());
            }
        }

        (exist, not_exist)
    }
}

/// The bare package name of a requirement like `pandas>=2.0` or
/// `ploomber==0.21`
pub fn requirement_name(requirement: &str) -> &str {
    let end = requirement
        .find(|c: char| matches!(c, '=' | '<' | '>' | '!' | '~' | ';' | '[' | ' '))
        .unwrap_or(requirement.len());
    &requirement[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformProfile;
    use crate::runner::StreamingRunner;
    use pretty_assertions::assert_eq;

    #[test]
    fn classifies_requirements() {
        let index = ChannelIndex::from_names(["ploomber", "pandas", "numpy"]);
        let (exist, not_exist) = index.pkg_exists(&[
            "ploomber==0.21",
            "some-unknown-package",
            "pandas>=2.0",
            "numpy",
            "torch==2.1",
        ]);
        assert_eq!(exist, ["ploomber=0.21", "pandas>=2.0", "numpy"]);
        assert_eq!(not_exist, ["some-unknown-package", "torch==2.1"]);
    }

    #[test]
    fn requirement_names() {
        assert_eq!(requirement_name("ploomber==0.21"), "ploomber");
        assert_eq!(requirement_name("pandas>=2"), "pandas");
        assert_eq!(requirement_name("black[jupyter]"), "black");
        assert_eq!(requirement_name("foo ; python_version<'3.9'"), "foo");
        assert_eq!(requirement_name("numpy"), "numpy");
    }

    #[test]
    fn parses_channel_data() {
        let index = ChannelIndex::from_json(
            r#"{"channeldata_version": 1, "packages": {"duckdb": {"version": "0.9.2"}, "pyarrow": {}}, "subdirs": ["noarch"]}"#,
        )
        .unwrap();
        assert_eq!(index.len(), 2);
        assert!(index.contains("duckdb"));
        assert!(!index.contains("duckdb-engine"));
    }

    #[test]
    fn load_reuses_cached_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CHANNEL_DATA_FILE),
            r#"{"packages": {"matplotlib": {}}}"#,
        )
        .unwrap();
        let ctx = K2sContext::new(
            dir.path(),
            PlatformProfile::Local,
            Box::new(StreamingRunner::new().quiet(true)),
        )
        .unwrap();

        let index = ChannelIndex::load(&ctx).unwrap();
        assert!(index.contains("matplotlib"));
    }
}
