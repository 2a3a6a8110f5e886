//! # k2s env
//!
//! Turns a list of package requirements into a working conda environment
//! with a registered Jupyter kernel.
//!
//! ```text
//! requirements ──> ChannelIndex::pkg_exists ──> (conda-forge, pip)
//!                                                    │
//!   K2sContext (home, http, PlatformProfile, runner) │
//!        │                                           v
//!        └──> CondaManager: base conda ──> mamba ──> env update ──> kernel.json
//! ```
//!
//! Every external tool runs through [`CommandRunner`] and every download
//! through [`Downloader`], so the whole flow can be exercised against fakes
//! in tests.

mod conda;
mod context;
mod error;
mod index;
mod install;
mod kernel;
mod platform;
mod runner;

#[cfg(test)]
mod test_support;

pub use conda::{
    installed_python_version, pin_runtime, CondaManager, Dependency, EnvironmentSpec, ENV_FILE,
};
pub use context::{resolve_home, Downloader, HttpDownloader, K2sContext, HOME_ENV};
pub use error::{EnvError, Result};
pub use index::{
    requirement_name, ChannelIndex, CHANNEL_DATA_FILE, CHANNEL_DATA_URL, PRIMARY_CHANNEL,
};
pub use install::{install, InstallRequest, ProvisionOutcome, ProvisionedEnv};
pub use kernel::{kernels_dir, register_kernel, KernelMetadata, KernelSpec};
pub use platform::{miniconda_url, AfterInstall, PlatformProfile, COLAB_PREFIX, KAGGLE_PREFIX};
pub use runner::{CommandRunner, Invocation, StreamingRunner};
