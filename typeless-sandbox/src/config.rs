use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Parser, Debug, Clone, Default, Serialize, Deserialize)]
#[command(name = "typeless-sandbox")]
#[command(about = "Erased box serialization sandbox")]
#[command(long_about = "Writes a mixed stream of erased values and decodes it again.

Without --input the sandbox runs the write scenario and either saves the
encoded stream to --output or decodes it in process. With --input it decodes
a stream written earlier by the same build.")]
pub struct Config {
    /// TOML file providing defaults for the other settings
    #[arg(long, env = "TYPELESS_CONFIG")]
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Write the encoded stream to this file
    #[arg(long, env = "TYPELESS_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Decode a previously written stream instead of running the scenario
    #[arg(long, env = "TYPELESS_INPUT")]
    pub input: Option<PathBuf>,

    /// Number of times the scenario is written [default: 1]
    #[arg(long, env = "TYPELESS_ROUNDS")]
    pub rounds: Option<u32>,

    /// Log level (trace, debug, info, warn, error) [default: info]
    #[arg(long, env = "TYPELESS_LOG_LEVEL")]
    pub log_level: Option<String>,
}

impl Config {
    /// Parse the command line and apply the optional config file
    pub fn load() -> Result<Self> {
        let mut config = Config::parse();
        if let Some(path) = config.config.clone() {
            config.merge(Config::from_file(&path)?);
        }
        Ok(config)
    }

    /// Read settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Config::from_toml(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Fill settings not given on the command line from `file`
    pub fn merge(&mut self, file: Config) {
        if self.output.is_none() {
            self.output = file.output;
        }
        if self.input.is_none() {
            self.input = file.input;
        }
        if self.rounds.is_none() {
            self.rounds = file.rounds;
        }
        if self.log_level.is_none() {
            self.log_level = file.log_level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rounds() == 0 {
            return Err(anyhow!("rounds must be greater than 0"));
        }

        if self.input.is_some() && self.output.is_some() {
            return Err(anyhow!("input and output cannot be used together"));
        }

        if !LOG_LEVELS.contains(&self.log_level()) {
            return Err(anyhow!(
                "log_level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.log_level()
            ));
        }

        Ok(())
    }

    pub fn rounds(&self) -> u32 {
        self.rounds.unwrap_or(1)
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}
