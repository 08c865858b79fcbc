use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to open config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Ceiling for `while` / `for each` iterations inside one loop.
    #[serde(default = "default_max_loop_iterations")]
    pub max_loop_iterations: usize,

    /// Maximum fork depth (nested procedure calls, handlers, agent turns).
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,

    /// Lets `append` replace procedures that already exist.
    #[serde(default)]
    pub allow_redefinition: bool,

    /// Variable an `on_error` block sees the triggering error under.
    #[serde(default = "default_error_variable")]
    pub error_variable: String,

    #[serde(default)]
    pub ask: AskConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_loop_iterations: default_max_loop_iterations(),
            max_call_depth: default_max_call_depth(),
            allow_redefinition: false,
            error_variable: default_error_variable(),
            ask: AskConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_loop_iterations == 0 {
            return Err(ConfigError::Invalid(
                "max_loop_iterations must be positive".to_string(),
            ));
        }
        if self.max_call_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_call_depth must be positive".to_string(),
            ));
        }
        if self.error_variable.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "error_variable must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Defaults applied to provider requests issued by `ask`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AskConfig {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<usize>,
}

impl Default for AskConfig {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: None,
        }
    }
}

fn default_max_loop_iterations() -> usize {
    1000
}

fn default_max_call_depth() -> usize {
    64
}

fn default_error_variable() -> String {
    "system_error".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> Result<T, ConfigError> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, ConfigError> {
    Ok(serde_json::from_str(s)?)
}
