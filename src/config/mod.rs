// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Configuration for midilink.
//!
//! A single file, YAML or TOML (picked by extension), describes which
//! backend to use and how the input and output endpoints are set up. Every
//! field has a default, so an empty file is a valid configuration. The file
//! is read once at startup.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::driver::codec::DEFAULT_ENCODER_CAPACITY;
use crate::driver::Api;
use crate::midi::FilterConfig;

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MidilinkConfig {
    /// Native backend to open endpoints on
    #[serde(default = "default_backend")]
    pub backend: Api,
    /// Default log filter, used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// The platform's native backend when this build has one, else the
/// in-process loopback bus.
fn default_backend() -> Api {
    if cfg!(target_os = "macos") {
        Api::CoreMidi
    } else if cfg!(feature = "midir") {
        Api::Midir
    } else {
        Api::Loopback
    }
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MidilinkConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            log_level: default_log_level(),
            input: InputConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl MidilinkConfig {
    /// Load a configuration file. `.toml` files are parsed as TOML,
    /// `.yaml`/`.yml` as YAML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml(&contents),
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            _ => bail!("Unsupported config file extension: {:?}", path),
        }
    }

    /// Parse a configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // serde_yaml rejects an empty document for a struct
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")
    }

    /// Parse a configuration from a TOML string
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("Failed to parse TOML configuration")
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize configuration to YAML")
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = self.to_yaml()?;
        fs::write(path.as_ref(), yaml)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))
    }
}

/// Input endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputConfig {
    /// Name of the native client
    #[serde(default = "default_input_client")]
    pub client_name: String,
    /// Name of the port opened by the CLI
    #[serde(default = "default_input_port")]
    pub port_name: String,
    /// Message classes to drop
    #[serde(flatten)]
    pub filter: FilterConfig,
    /// Bound of the message queue used with `Delivery::Queue`
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_input_client() -> String {
    "midilink input client".to_string()
}
fn default_input_port() -> String {
    "midilink input".to_string()
}
fn default_queue_capacity() -> usize {
    100
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            client_name: default_input_client(),
            port_name: default_input_port(),
            filter: FilterConfig::default(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Output endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    #[serde(default = "default_output_client")]
    pub client_name: String,
    #[serde(default = "default_output_port")]
    pub port_name: String,
    /// Initial encoder buffer size in bytes
    #[serde(default = "default_encoder_capacity")]
    pub encoder_capacity: usize,
}

fn default_output_client() -> String {
    "midilink output client".to_string()
}
fn default_output_port() -> String {
    "midilink output".to_string()
}
fn default_encoder_capacity() -> usize {
    DEFAULT_ENCODER_CAPACITY
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            client_name: default_output_client(),
            port_name: default_output_port(),
            encoder_capacity: default_encoder_capacity(),
        }
    }
}
