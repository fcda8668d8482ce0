//! The three commands run by the `pipechain` binary.
//!
//! By default the binary runs `ps -A | grep PATTERN | wc -l`. A TOML file can replace
//! any of the three commands:
//!
//! ```toml
//! [source]
//! program = "ls"
//! args = ["-1", "/usr/bin"]
//!
//! [filter]
//! program = "grep"
//! args = ["-i"]
//! ```
//!
//! The pattern is always appended to the filter's arguments.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::pipeline::Pipeline;
use crate::stage::Stage;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{role} command has an empty program name")]
    EmptyProgram { role: &'static str },
}

/// One command: a program looked up in `PATH` and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandConfig {
    pub fn new(program: &str, args: &[&str]) -> CommandConfig {
        CommandConfig {
            program: program.to_owned(),
            args: args.iter().map(|&a| a.to_owned()).collect(),
        }
    }

    fn to_stage(&self) -> Stage {
        Stage::cmd(&self.program).args(&self.args)
    }
}

/// The source, filter and counter commands.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ChainConfig {
    pub source: CommandConfig,
    pub filter: CommandConfig,
    pub counter: CommandConfig,
}

impl Default for ChainConfig {
    fn default() -> ChainConfig {
        ChainConfig {
            source: CommandConfig::new("ps", &["-A"]),
            filter: CommandConfig::new("grep", &[]),
            counter: CommandConfig::new("wc", &["-l"]),
        }
    }
}

impl ChainConfig {
    /// Reads the configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<ChainConfig, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        let config: ChainConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (role, command) in [
            ("source", &self.source),
            ("filter", &self.filter),
            ("counter", &self.counter),
        ] {
            if command.program.is_empty() {
                return Err(ConfigError::EmptyProgram { role });
            }
        }
        Ok(())
    }

    /// Builds the three-stage pipeline, passing `pattern` as the filter's last argument.
    pub fn pipeline(&self, pattern: impl AsRef<OsStr>) -> Pipeline {
        Pipeline::new()
            .pipe(self.source.to_stage())
            .pipe(self.filter.to_stage().arg(pattern))
            .pipe(self.counter.to_stage())
    }
}
