// Copyright 2026 Cornell University
// released under MIT License

//! # Configuration
//! `stimulus.toml` with one table per concern. Every field has a default, an
//! empty file is a valid configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::process::ProcessOptions;
use crate::value::ThresholdMap;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    IoError(#[from] std::io::Error),
    #[error("failed to parse configuration: {0}")]
    ParseError(String),
    #[error("validation error: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub session: SessionConfig,
    pub process: ProcessOptions,
    pub digital: DigitalConfig,
    pub analog: AnalogConfig,
    pub symbolic: SymbolicConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Wall clock budget for one run, shared by all commands
    pub timeout_secs: f64,
    /// How often a run is repeated after a process failed to launch
    pub max_retries: u32,
    /// Seed for random stimulus and don't care pokes
    pub seed: u64,
    /// Keep the scratch directory after the run
    pub keep_artifacts: bool,
    /// Where scratch directories are created, defaults to the system temp dir
    pub scratch_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60.0,
            max_retries: 2,
            seed: 0,
            keep_artifacts: false,
            scratch_dir: None,
        }
    }
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Simulator {
    #[default]
    Icarus,
    Verilator,
    /// Command lines come from `digital.commands`
    Custom,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DigitalConfig {
    pub simulator: Simulator,
    /// Clock period in timescale units
    pub clock_period: u64,
    pub timescale: String,
    /// Extra arguments for the compile step
    pub flags: Vec<String>,
    /// Name of a VCD file to dump all testbench signals into
    pub waveform: Option<String>,
    /// Command templates for the custom simulator. `{sources}`, `{testbench}`,
    /// `{top}` and `{flags}` are substituted.
    pub commands: Vec<Vec<String>>,
    /// Overrides whether the simulator can reach internal signals by
    /// hierarchical name
    pub probes: Option<bool>,
}

impl Default for DigitalConfig {
    fn default() -> Self {
        Self {
            simulator: Simulator::Icarus,
            clock_period: 10,
            timescale: "1ns/1ps".to_string(),
            flags: vec![],
            waveform: None,
            commands: vec![],
            probes: None,
        }
    }
}

impl DigitalConfig {
    pub fn supports_probes(&self) -> bool {
        self.probes.unwrap_or(match self.simulator {
            Simulator::Icarus | Simulator::Custom => true,
            Simulator::Verilator => false,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalogConfig {
    /// Simulator executable, run in batch mode
    pub simulator: String,
    pub flags: Vec<String>,
    /// Simulated seconds per clock step
    pub step_duration: f64,
    /// Maximum internal time step of the transient analysis
    pub time_step: f64,
    /// Time an input needs to move to a new level
    pub rise_time: f64,
    /// Conversion between logic values and voltages on analog nets
    pub threshold: Option<ThresholdMap>,
    /// Command templates replacing the default invocation, `{deck}` is substituted
    pub commands: Vec<Vec<String>>,
}

impl Default for AnalogConfig {
    fn default() -> Self {
        Self {
            simulator: "ngspice".to_string(),
            flags: vec![],
            step_duration: 10e-9,
            time_step: 10e-12,
            rise_time: 100e-12,
            threshold: None,
            commands: vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SymbolicConfig {
    pub solver: String,
    /// Arguments placed before the query file
    pub args: Vec<String>,
    /// SMT-LIB logic, picked from the query contents when unset
    pub logic: Option<String>,
    /// Time one query may take before its expectation reads as unknown
    pub query_timeout_secs: f64,
}

impl SymbolicConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.query_timeout_secs)
    }
}

impl Default for SymbolicConfig {
    fn default() -> Self {
        Self {
            solver: "z3".to_string(),
            args: vec!["-smt2".to_string()],
            logic: None,
            query_timeout_secs: 30.0,
        }
    }
}

/// Loads and validates a configuration file
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let fail = |msg: &str| Err(ConfigError::ValidationError(msg.to_string()));
    if !(config.session.timeout_secs.is_finite() && config.session.timeout_secs > 0.0) {
        return fail("session.timeout_secs must be positive");
    }
    if config.digital.clock_period < 2 || config.digital.clock_period % 2 != 0 {
        return fail("digital.clock_period must be an even number of at least 2");
    }
    if config.digital.simulator == Simulator::Custom && config.digital.commands.is_empty() {
        return fail("digital.commands is required for the custom simulator");
    }
    if config.digital.commands.iter().any(|c| c.is_empty()) {
        return fail("digital.commands must not contain empty command lines");
    }
    let analog = &config.analog;
    if !(analog.step_duration > 0.0 && analog.time_step > 0.0) {
        return fail("analog.step_duration and analog.time_step must be positive");
    }
    if !(analog.rise_time > 0.0 && analog.rise_time * 2.0 < analog.step_duration) {
        return fail("analog.rise_time must be positive and less than half of analog.step_duration");
    }
    if let Some(threshold) = &analog.threshold {
        threshold
            .validate()
            .map_err(|e| ConfigError::ValidationError(format!("analog.threshold: {e}")))?;
    }
    if analog.commands.iter().any(|c| c.is_empty()) {
        return fail("analog.commands must not contain empty command lines");
    }
    if config.symbolic.solver.is_empty() {
        return fail("symbolic.solver must not be empty");
    }
    if !(config.symbolic.query_timeout_secs.is_finite() && config.symbolic.query_timeout_secs > 0.0) {
        return fail("symbolic.query_timeout_secs must be positive");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::DisplayMode;

    #[test]
    fn parse_empty_config() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.session.timeout(), Duration::from_secs(60));
        assert!(config.digital.supports_probes());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[session]
timeout_secs = 2.5
max_retries = 0
seed = 42
keep_artifacts = true

[process]
display = "realtime"
error_marker = "ERROR"
check_exit_code = false
clean_env = true
write_script = true
env = { LC_ALL = "C" }

[digital]
simulator = "verilator"
clock_period = 4
flags = ["-Wall"]
waveform = "waves.vcd"

[analog]
step_duration = 1e-8
threshold = { vlow = 0.0, vhigh = 1.8, vil = 0.6, vih = 1.2 }

[symbolic]
solver = "cvc5"
args = ["--lang", "smt2"]
logic = "QF_BV"
query_timeout_secs = 0.5
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.session.timeout(), Duration::from_millis(2500));
        assert_eq!(config.session.seed, 42);
        assert_eq!(config.process.display, DisplayMode::Realtime);
        assert_eq!(config.process.env["LC_ALL"], "C");
        assert!(!config.process.check_exit_code);
        assert_eq!(config.digital.simulator, Simulator::Verilator);
        assert!(!config.digital.supports_probes());
        assert_eq!(config.analog.threshold.unwrap().vhigh, 1.8);
        assert_eq!(config.symbolic.solver, "cvc5");
        assert_eq!(config.symbolic.query_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn reject_invalid_configs() {
        for toml in [
            "[session]\ntimeout_secs = 0",
            "[digital]\nclock_period = 3",
            "[digital]\nsimulator = \"custom\"",
            "[analog]\nrise_time = 1.0",
            "[analog]\nthreshold = { vlow = 0.0, vhigh = 1.8, vil = 1.5, vih = 1.2 }",
            "[symbolic]\nsolver = \"\"",
            "[symbolic]\nquery_timeout_secs = -1.0",
        ] {
            assert!(
                matches!(load_config_from_str(toml), Err(ConfigError::ValidationError(_))),
                "{toml}"
            );
        }
        assert!(matches!(
            load_config_from_str("[digital]\nunknown = 1"),
            Err(ConfigError::ParseError(_))
        ));
    }
}
