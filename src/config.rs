// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Configuration file handling.
//!
//! Loaded once from TOML at startup and never reloaded.
//! Default path: `/etc/quadhat/config.toml`
//!
//! Board wiring (GPIO chip/lines, PWM chip/channels, polarity) usually
//! comes from the service environment file, so those keys can also be
//! overridden by environment variables; see [`Config::apply_env_overrides`].

use crate::curve::{Breakpoints, CurveMode, DEFAULT_MIN_DUTY};
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Default config file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/quadhat/config.toml";

/// Default daemon socket path.
pub const DEFAULT_SOCKET_PATH: &str = "/run/quadhat.sock";

/// Default CPU thermal zone.
pub const DEFAULT_CPU_TEMP_PATH: &str = "/sys/class/thermal/thermal_zone0/temp";

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Fan curve settings.
    pub fan: FanConfig,

    /// Gesture to action bindings.
    pub key: KeyConfig,

    /// Gesture timing.
    pub time: TimeConfig,

    /// Disks to watch.
    pub disk: DiskConfig,

    /// Board wiring.
    pub hardware: HardwareConfig,

    /// Status display.
    pub display: DisplayConfig,

    /// Daemon settings.
    pub daemon: DaemonConfig,
}

/// Fan curve thresholds and behaviour.
///
/// `lv0..lv3` apply to both fans; `lv0c..lv3c` (CPU) and `lv0f..lv3f`
/// (disk bay) override them per channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FanConfig {
    pub lv0: f64,
    pub lv1: f64,
    pub lv2: f64,
    pub lv3: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lv0c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lv1c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lv2c: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lv3c: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub lv0f: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lv1f: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lv2f: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lv3f: Option<f64>,

    /// CPU temperature at which the linear curve reaches 100%.
    pub max_cpu_temp: f64,

    /// Disk temperature at which the linear curve reaches 100%.
    pub max_disk_temp: f64,

    /// Interpolate between thresholds instead of stepping.
    pub linear: bool,

    /// Drive the disk-bay fan from disk temperatures.
    pub temp_disks: bool,

    /// Minimum nonzero duty cycle.
    pub min_duty: f64,

    /// Seconds between disk temperature samples.
    pub disk_refresh_secs: u64,

    /// Log every control tick at info level instead of debug.
    pub log_ticks: bool,
}

impl Default for FanConfig {
    fn default() -> Self {
        Self {
            lv0: 35.0,
            lv1: 40.0,
            lv2: 45.0,
            lv3: 50.0,
            lv0c: None,
            lv1c: None,
            lv2c: None,
            lv3c: None,
            lv0f: None,
            lv1f: None,
            lv2f: None,
            lv3f: None,
            max_cpu_temp: 80.0,
            max_disk_temp: 70.0,
            linear: false,
            temp_disks: false,
            min_duty: DEFAULT_MIN_DUTY,
            disk_refresh_secs: 10,
            log_ticks: false,
        }
    }
}

impl FanConfig {
    /// Thresholds for the CPU fan.
    pub fn cpu_breakpoints(&self) -> Breakpoints {
        Breakpoints {
            lv0: self.lv0c.unwrap_or(self.lv0),
            lv1: self.lv1c.unwrap_or(self.lv1),
            lv2: self.lv2c.unwrap_or(self.lv2),
            lv3: self.lv3c.unwrap_or(self.lv3),
            max: self.max_cpu_temp,
        }
    }

    /// Thresholds for the disk-bay fan.
    pub fn disk_breakpoints(&self) -> Breakpoints {
        Breakpoints {
            lv0: self.lv0f.unwrap_or(self.lv0),
            lv1: self.lv1f.unwrap_or(self.lv1),
            lv2: self.lv2f.unwrap_or(self.lv2),
            lv3: self.lv3f.unwrap_or(self.lv3),
            max: self.max_disk_temp,
        }
    }

    pub fn mode(&self) -> CurveMode {
        CurveMode::from_linear(self.linear)
    }

    pub fn disk_refresh(&self) -> Duration {
        Duration::from_secs(self.disk_refresh_secs)
    }
}

/// Action strings bound to each gesture.
///
/// Recognised actions: `slider`, `switch`, `poweroff`, `reboot`, `none`.
/// Anything else runs as a shell command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyConfig {
    pub click: String,
    pub twice: String,
    pub press: String,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            click: "slider".to_string(),
            twice: "switch".to_string(),
            press: "poweroff".to_string(),
        }
    }
}

/// Gesture timing, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Window after a release in which a second press counts as a double click.
    pub twice: f64,
    /// Hold time after which a press counts as a long press.
    pub press: f64,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            twice: 0.7,
            press: 1.8,
        }
    }
}

impl TimeConfig {
    pub fn twice_window(&self) -> Duration {
        seconds_or(self.twice, Self::default().twice)
    }

    pub fn press_time(&self) -> Duration {
        seconds_or(self.press, Self::default().press)
    }
}

/// Disks whose temperature drives the disk-bay fan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskConfig {
    /// Device paths passed to smartctl, e.g. `/dev/sda`.
    pub disks_temp: Vec<String>,
}

/// PWM output polarity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    #[default]
    Normal,
    Inversed,
}

impl Polarity {
    /// Duty cycle that runs the fans flat out.
    pub fn full_speed(self) -> f64 {
        match self {
            Polarity::Normal => 1.0,
            Polarity::Inversed => 0.0,
        }
    }

    pub fn as_sysfs(self) -> &'static str {
        match self {
            Polarity::Normal => "normal",
            Polarity::Inversed => "inversed",
        }
    }
}

impl FromStr for Polarity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "normal" => Ok(Polarity::Normal),
            "inversed" | "inverted" => Ok(Polarity::Inversed),
            other => Err(ConfigError::InvalidValue {
                key: "polarity".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sysfs())
    }
}

/// How the HAT is wired to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    /// GPIO chip of the button, as `0`, `gpiochip0` or `/dev/gpiochip0`.
    pub button_chip: String,

    /// GPIO line of the button. Unset disables the button.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub button_line: Option<String>,

    /// PWM chip under `/sys/class/pwm`.
    pub pwm_chip: String,

    /// PWM channel of the CPU fan.
    pub cpu_pwm_channel: u32,

    /// PWM channel of the disk-bay fan. Unset shares the CPU channel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_pwm_channel: Option<u32>,

    pub polarity: Polarity,

    /// CPU temperature file, in millidegrees Celsius.
    pub cpu_temp_path: String,

    /// GPIO chip of the SATA power lines.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sata_chip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sata_line_1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sata_line_2: Option<String>,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            button_chip: "gpiochip0".to_string(),
            button_line: None,
            pwm_chip: "pwmchip0".to_string(),
            cpu_pwm_channel: 0,
            disk_pwm_channel: None,
            polarity: Polarity::Normal,
            cpu_temp_path: DEFAULT_CPU_TEMP_PATH.to_string(),
            sata_chip: None,
            sata_line_1: None,
            sata_line_2: None,
        }
    }
}

impl HardwareConfig {
    /// Whether the disk-bay fan has its own PWM channel.
    pub fn has_separate_disk_fan(&self) -> bool {
        self.disk_pwm_channel
            .is_some_and(|ch| ch != self.cpu_pwm_channel)
    }
}

/// Status display settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub enabled: bool,

    /// Seconds each page stays up before advancing on its own.
    pub slide_secs: u64,

    /// Show temperatures in Fahrenheit.
    pub fahrenheit: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            slide_secs: 10,
            fahrenheit: false,
        }
    }
}

/// Daemon-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path for the Unix domain socket.
    pub socket_path: String,

    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,

    /// How long shutdown waits for tasks to release hardware.
    pub shutdown_grace_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            log_level: "info".to_string(),
            shutdown_grace_ms: 5000,
        }
    }
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Override board wiring from environment variables.
    ///
    /// `lookup` is normally `|k| std::env::var(k).ok()`. Empty values are
    /// ignored. `PWM_TB_FAN=0` means "same as the CPU fan".
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let hw = &mut self.hardware;

        if let Some(v) = get("BUTTON_CHIP") {
            hw.button_chip = v;
        }
        if let Some(v) = get("BUTTON_LINE") {
            hw.button_line = Some(v);
        }
        if let Some(v) = get("PWM_CHIP") {
            hw.pwm_chip = v;
        }
        if let Some(v) = get("PWM_CPU_FAN") {
            hw.cpu_pwm_channel = parse_env("PWM_CPU_FAN", &v)?;
        }
        if let Some(v) = get("PWM_TB_FAN") {
            let ch: u32 = parse_env("PWM_TB_FAN", &v)?;
            hw.disk_pwm_channel = (ch != 0).then_some(ch);
        }
        if let Some(v) = get("POLARITY") {
            hw.polarity = v.parse()?;
        }
        if let Some(v) = get("SATA_CHIP") {
            hw.sata_chip = Some(v);
        }
        if let Some(v) = get("SATA_LINE_1") {
            hw.sata_line_1 = Some(v);
        }
        if let Some(v) = get("SATA_LINE_2") {
            hw.sata_line_2 = Some(v);
        }
        Ok(())
    }

    /// Log warnings for settings that load but look wrong.
    pub fn warn_suspicious(&self) {
        for (name, bp) in [
            ("cpu", self.fan.cpu_breakpoints()),
            ("disk", self.fan.disk_breakpoints()),
        ] {
            if let Err(e) = bp.validate() {
                log::warn!("Fan {name} thresholds: {e}");
            }
        }
        if !(0.0..=1.0).contains(&self.fan.min_duty) {
            log::warn!("fan.min_duty {} is outside 0.0-1.0", self.fan.min_duty);
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Load config from a TOML file, or return the default if the file doesn't exist.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        log::info!("No config file at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    log::info!("Loaded config from {}", path.display());
    Ok(config)
}

/// Render a config as TOML.
pub fn to_toml(config: &Config) -> Result<String, toml::ser::Error> {
    toml::to_string_pretty(config)
}

/// Resolve the config file path from CLI arg or default.
pub fn resolve_config_path(cli_path: Option<&str>) -> PathBuf {
    cli_path
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn seconds_or(secs: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|d| !d.is_zero())
        .unwrap_or_else(|| Duration::from_secs_f64(fallback))
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.key.click, "slider");
        assert_eq!(cfg.key.twice, "switch");
        assert_eq!(cfg.key.press, "poweroff");
        assert_eq!(cfg.time.twice_window(), Duration::from_millis(700));
        assert_eq!(cfg.time.press_time(), Duration::from_millis(1800));
        assert_eq!(cfg.fan.min_duty, DEFAULT_MIN_DUTY);
    }

    #[test]
    fn test_per_channel_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[fan]
lv0 = 30
lv1 = 40
lv2 = 50
lv3 = 60
lv0f = 25.5
linear = true
max_disk_temp = 55

[key]
press = "none"
"#
        )
        .unwrap();

        let cfg = load_config(file.path()).unwrap();
        let cpu = cfg.fan.cpu_breakpoints();
        let disk = cfg.fan.disk_breakpoints();
        assert_eq!(cpu.lv0, 30.0);
        assert_eq!(cpu.max, 80.0);
        assert_eq!(disk.lv0, 25.5);
        assert_eq!(disk.lv1, 40.0);
        assert_eq!(disk.max, 55.0);
        assert_eq!(cfg.fan.mode(), CurveMode::Linear);
        assert_eq!(cfg.key.press, "none");
        assert_eq!(cfg.key.click, "slider");
    }

    #[test]
    fn test_parse_error_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[fan\nlv0 = ").unwrap();
        assert!(matches!(
            load_config(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BUTTON_LINE", "17"),
            ("PWM_CHIP", "pwmchip1"),
            ("PWM_CPU_FAN", "0"),
            ("PWM_TB_FAN", "1"),
            ("POLARITY", "inversed"),
            ("SATA_CHIP", ""),
        ]
        .into_iter()
        .collect();

        let mut cfg = Config::default();
        cfg.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(cfg.hardware.button_line.as_deref(), Some("17"));
        assert_eq!(cfg.hardware.pwm_chip, "pwmchip1");
        assert_eq!(cfg.hardware.disk_pwm_channel, Some(1));
        assert!(cfg.hardware.has_separate_disk_fan());
        assert_eq!(cfg.hardware.polarity, Polarity::Inversed);
        assert_eq!(cfg.hardware.sata_chip, None);
    }

    #[test]
    fn test_zero_tb_fan_shares_cpu_channel() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(|k| (k == "PWM_TB_FAN").then(|| "0".to_string()))
            .unwrap();
        assert_eq!(cfg.hardware.disk_pwm_channel, None);
        assert!(!cfg.hardware.has_separate_disk_fan());
    }

    #[test]
    fn test_bad_env_value_is_rejected() {
        let mut cfg = Config::default();
        let err = cfg
            .apply_env_overrides(|k| (k == "PWM_CPU_FAN").then(|| "two".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_invalid_durations_fall_back() {
        let time = TimeConfig {
            twice: -1.0,
            press: f64::NAN,
        };
        assert_eq!(time.twice_window(), Duration::from_millis(700));
        assert_eq!(time.press_time(), Duration::from_millis(1800));
    }

    #[test]
    fn test_defaults_round_trip_through_toml() {
        let text = to_toml(&Config::default()).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.daemon.socket_path, DEFAULT_SOCKET_PATH);
        assert_eq!(back.hardware.polarity, Polarity::Normal);
    }
}
