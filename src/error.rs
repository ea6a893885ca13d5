// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Error types shared by the hardware-facing modules.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure talking to a PWM output.
#[derive(Debug, Error)]
pub enum PwmError {
    #[error("failed to export {chip} channel {channel}: {source}")]
    Export {
        chip: String,
        channel: u32,
        #[source]
        source: io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("duty cycle {0} is outside 0.0..=1.0")]
    OutOfRange(f64),

    #[error("PWM device already closed")]
    Closed,
}

/// Failure reading a temperature.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unparsable reading {0:?}")]
    Parse(String),

    #[error("failed to run {command}: {source}")]
    Command {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("{command} did not finish within {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("no temperature found for {0}")]
    Missing(String),
}

/// Failure acquiring or reading a GPIO line.
#[derive(Debug, Error)]
pub enum GpioError {
    #[error("invalid GPIO line {0:?}")]
    InvalidLine(String),

    #[error("GPIO {chip} line {line}: {source}")]
    Request {
        chip: String,
        line: u32,
        #[source]
        source: gpio_cdev::Error,
    },
}

/// Failure loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },
}
