use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quiet_exec::Capture;
use serde::{Deserialize, Serialize};

use crate::cli::Args;

// =============================================================================
// Layered config: defaults / quietrun.toml / QUIETRUN_* env vars / CLI flags
// =============================================================================
//
//   quietrun.toml:   capture = "stderr"
//                    format = "tap"
//
//   env var:         QUIETRUN_CAPTURE=stderr

pub const DEFAULT_CONFIG_FILE: &str = "quietrun.toml";
pub const ENV_PREFIX: &str = "QUIETRUN_";

/// Report layout.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// One status line per command, output indented below it
    #[default]
    Pretty,
    /// Test Anything Protocol
    Tap,
}

/// When the captured output is printed under the report line.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutputPolicy {
    #[default]
    OnFailure,
    Always,
    Never,
}

impl OutputPolicy {
    pub fn shows(self, success: bool) -> bool {
        match self {
            OutputPolicy::OnFailure => !success,
            OutputPolicy::Always => true,
            OutputPolicy::Never => false,
        }
    }
}

/// Tunables, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileConfig {
    #[serde(default)]
    pub capture: Capture,
    #[serde(default)]
    pub pty: bool,
    #[serde(default)]
    pub shell: bool,
    #[serde(default)]
    pub format: Format,
    #[serde(default)]
    pub output: OutputPolicy,
    #[serde(default)]
    pub allow_failure: bool,
}

impl FileConfig {
    /// CLI flags sit on top of every other layer. Switches only turn things on.
    pub fn apply_args(mut self, args: &Args) -> Self {
        if let Some(capture) = args.capture {
            self.capture = capture;
        }
        if let Some(format) = args.format {
            self.format = format;
        }
        if let Some(output) = args.output {
            self.output = output;
        }
        self.pty |= args.pty;
        self.shell |= args.shell;
        self.allow_failure |= args.allow_failure;
        self
    }
}

/// Build a figment that layers: defaults → config file → QUIETRUN_* env vars.
///
/// A missing default file is skipped; a missing `--config` file is an error.
pub fn load_config(explicit: Option<&Path>) -> Result<figment::Figment> {
    use figment::{
        Figment,
        providers::{Env, Format as _, Serialized, Toml},
    };

    let path = match explicit {
        Some(path) => {
            anyhow::ensure!(path.is_file(), "config file {} not found", path.display());
            path.to_path_buf()
        }
        None => PathBuf::from(DEFAULT_CONFIG_FILE),
    };

    Ok(Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX)))
}

/// Resolve the effective settings for one invocation.
pub fn resolve(args: &Args) -> Result<FileConfig> {
    let config: FileConfig = load_config(args.config.as_deref())?
        .extract()
        .context("invalid quietrun configuration")?;
    Ok(config.apply_args(args))
}
