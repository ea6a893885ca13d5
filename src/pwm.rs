// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! PWM sysfs output.
//!
//! Drives `/sys/class/pwm/<chip>/pwm<N>`: the channel is exported if
//! needed, given a fixed period and enabled, and duty cycles are written
//! as a fraction of that period in nanoseconds.

use crate::config::Polarity;
use crate::error::PwmError;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const PWM_ROOT: &str = "/sys/class/pwm";

/// PWM period in nanoseconds (25 kHz).
pub const DEFAULT_PERIOD_NS: u64 = 40_000;

/// A duty-cycle-settable output.
pub trait PwmDevice: Send {
    /// Set the duty cycle as a fraction in `0.0..=1.0`.
    fn set_duty_cycle(&mut self, fraction: f64) -> Result<(), PwmError>;

    /// Release the output. Further writes fail with [`PwmError::Closed`].
    fn close(&mut self) -> Result<(), PwmError>;
}

/// A PWM channel exposed through the kernel sysfs interface.
#[derive(Debug)]
pub struct SysfsPwm {
    base: PathBuf,
    period_ns: u64,
    closed: bool,
}

impl SysfsPwm {
    /// Export (if needed) and enable `channel` on `chip`.
    pub fn open(chip: &str, channel: u32, polarity: Polarity) -> Result<Self, PwmError> {
        Self::open_at(Path::new(PWM_ROOT), chip, channel, polarity)
    }

    /// Same as [`SysfsPwm::open`] with a different sysfs root.
    pub fn open_at(
        root: &Path,
        chip: &str,
        channel: u32,
        polarity: Polarity,
    ) -> Result<Self, PwmError> {
        let chip_dir = root.join(chip);
        let base = chip_dir.join(format!("pwm{channel}"));

        if !base.exists() {
            match fs::write(chip_dir.join("export"), channel.to_string()) {
                Ok(()) => {}
                // Another process exported it first.
                Err(e) if e.kind() == io::ErrorKind::ResourceBusy => {}
                Err(source) => {
                    return Err(PwmError::Export {
                        chip: chip.to_string(),
                        channel,
                        source,
                    });
                }
            }
        }

        let pwm = Self {
            base,
            period_ns: DEFAULT_PERIOD_NS,
            closed: false,
        };

        pwm.write_attr("period", &pwm.period_ns.to_string())?;
        // Some controllers reject polarity changes; the fan still runs.
        if let Err(e) = pwm.write_attr("polarity", polarity.as_sysfs()) {
            log::warn!("Could not set {chip}/pwm{channel} polarity to {polarity}: {e}");
        }
        pwm.write_attr("enable", "1")?;

        log::info!("Opened PWM {chip}/pwm{channel} ({polarity})");
        Ok(pwm)
    }

    fn write_attr(&self, name: &str, value: &str) -> Result<(), PwmError> {
        let path = self.base.join(name);
        fs::write(&path, value).map_err(|source| PwmError::Write { path, source })
    }
}

impl PwmDevice for SysfsPwm {
    fn set_duty_cycle(&mut self, fraction: f64) -> Result<(), PwmError> {
        if self.closed {
            return Err(PwmError::Closed);
        }
        if !(0.0..=1.0).contains(&fraction) {
            return Err(PwmError::OutOfRange(fraction));
        }
        let duty_ns = (self.period_ns as f64 * fraction).round() as u64;
        self.write_attr("duty_cycle", &duty_ns.to_string())
    }

    fn close(&mut self) -> Result<(), PwmError> {
        if self.closed {
            return Ok(());
        }
        let result = self.set_duty_cycle(0.0);
        self.closed = true;
        result
    }
}
