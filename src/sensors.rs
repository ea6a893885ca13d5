// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Temperature sources.
//!
//! The CPU temperature comes from a thermal zone file and is cheap to read.
//! Disk temperatures come from `smartctl`, which spins up a subprocess per
//! disk, so the disk source is wrapped in [`RateLimited`].

use crate::error::SensorError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;

/// Longest a single `smartctl` call may take; a failing disk can hang it.
const SMARTCTL_TIMEOUT: Duration = Duration::from_secs(5);

/// Something that reports a temperature in degrees Celsius.
#[async_trait]
pub trait TemperatureSource: Send {
    async fn read_celsius(&mut self) -> Result<f64, SensorError>;
}

// ---------------------------------------------------------------------------
// Thermal zone
// ---------------------------------------------------------------------------

/// A sysfs file holding millidegrees Celsius, e.g.
/// `/sys/class/thermal/thermal_zone0/temp`.
#[derive(Debug, Clone)]
pub struct ThermalZone {
    path: PathBuf,
}

impl ThermalZone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TemperatureSource for ThermalZone {
    async fn read_celsius(&mut self) -> Result<f64, SensorError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| SensorError::Read {
                path: self.path.clone(),
                source,
            })?;
        let millic: f64 = raw
            .trim()
            .parse()
            .map_err(|_| SensorError::Parse(raw.trim().to_string()))?;
        Ok(millic / 1000.0)
    }
}

// ---------------------------------------------------------------------------
// smartctl
// ---------------------------------------------------------------------------

/// Hottest of a set of disks, as reported by `smartctl -A`.
#[derive(Debug, Clone)]
pub struct SmartctlDisks {
    devices: Vec<String>,
}

impl SmartctlDisks {
    pub fn new(devices: Vec<String>) -> Self {
        Self { devices }
    }

    async fn read_device(device: &str) -> Result<f64, SensorError> {
        let mut cmd = Command::new("smartctl");
        cmd.arg("-A").arg(device);
        let stdout = run_with_timeout(&mut cmd, SMARTCTL_TIMEOUT).await?;
        // smartctl uses its exit status as a bitmask of disk health flags,
        // so a nonzero status can still carry a valid attribute table.
        let text = String::from_utf8_lossy(&stdout);
        parse_smartctl_temperature(&text).ok_or_else(|| SensorError::Missing(device.to_string()))
    }
}

/// Run `cmd` and collect its stdout, killing it if it outlives `limit`.
async fn run_with_timeout(cmd: &mut Command, limit: Duration) -> Result<Vec<u8>, SensorError> {
    let command = format!("{:?}", cmd.as_std());
    cmd.kill_on_drop(true);
    match tokio::time::timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => Ok(output.stdout),
        Ok(Err(source)) => Err(SensorError::Command { command, source }),
        Err(_) => Err(SensorError::Timeout {
            command,
            after: limit,
        }),
    }
}

#[async_trait]
impl TemperatureSource for SmartctlDisks {
    async fn read_celsius(&mut self) -> Result<f64, SensorError> {
        let mut hottest: Option<f64> = None;
        let mut last_err = None;

        for device in &self.devices {
            match Self::read_device(device).await {
                Ok(t) => hottest = Some(hottest.map_or(t, |h| h.max(t))),
                Err(e) => {
                    log::debug!("Disk temperature for {device}: {e}");
                    last_err = Some(e);
                }
            }
        }

        match (hottest, last_err) {
            (Some(t), _) => Ok(t),
            (None, Some(e)) => Err(e),
            (None, None) => Err(SensorError::Missing("no disks configured".to_string())),
        }
    }
}

/// Pull the raw value of SMART attribute 190 (`Airflow_Temperature_Cel`)
/// or 194 (`Temperature_Celsius`) out of `smartctl -A` output.
///
/// ```text
/// ID# ATTRIBUTE_NAME          FLAG     VALUE WORST THRESH TYPE      UPDATED  WHEN_FAILED RAW_VALUE
/// 194 Temperature_Celsius     0x0022   036   052   000    Old_age   Always       -       36 (Min/Max 18/52)
/// ```
pub fn parse_smartctl_temperature(output: &str) -> Option<f64> {
    output.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let is_temp = matches!(fields.first(), Some(&"190") | Some(&"194"))
            || line.contains("Temperature_Celsius")
            || line.contains("Airflow_Temperature_Cel");
        if !is_temp || fields.len() < 10 {
            return None;
        }
        fields[9].parse().ok()
    })
}

// ---------------------------------------------------------------------------
// Rate limiting
// ---------------------------------------------------------------------------

/// Samples the inner source at most once per `interval` and serves the
/// cached value in between. A failed sample caches 0.0 until the next one.
pub struct RateLimited<S> {
    inner: S,
    interval: Duration,
    last: Option<(Instant, f64)>,
}

impl<S: TemperatureSource> RateLimited<S> {
    pub fn new(inner: S, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            last: None,
        }
    }

    pub async fn read(&mut self) -> f64 {
        if let Some((at, value)) = self.last {
            if at.elapsed() < self.interval {
                return value;
            }
        }

        let value = match self.inner.read_celsius().await {
            Ok(t) => t,
            Err(e) => {
                log::warn!("Disk temperature unavailable: {e}");
                0.0
            }
        };
        self.last = Some((Instant::now(), value));
        value
    }
}

// ---------------------------------------------------------------------------
// Both sources together
// ---------------------------------------------------------------------------

/// One sample of both temperatures.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Temperatures {
    pub cpu: f64,
    pub disk: f64,
}

/// The temperature inputs of the fan loop.
pub struct Sensors {
    cpu: Box<dyn TemperatureSource>,
    disk: Option<RateLimited<Box<dyn TemperatureSource>>>,
}

#[async_trait]
impl TemperatureSource for Box<dyn TemperatureSource> {
    async fn read_celsius(&mut self) -> Result<f64, SensorError> {
        (**self).read_celsius().await
    }
}

impl Sensors {
    /// `disk` of `None` pins the disk temperature at 0.0.
    pub fn new(
        cpu: Box<dyn TemperatureSource>,
        disk: Option<Box<dyn TemperatureSource>>,
        disk_refresh: Duration,
    ) -> Self {
        Self {
            cpu,
            disk: disk.map(|d| RateLimited::new(d, disk_refresh)),
        }
    }

    /// Read both temperatures. Failures read as 0.0.
    pub async fn read(&mut self) -> Temperatures {
        let cpu = match self.cpu.read_celsius().await {
            Ok(t) => t,
            Err(e) => {
                log::debug!("CPU temperature unavailable: {e}");
                0.0
            }
        };
        let disk = match &mut self.disk {
            Some(disk) => disk.read().await,
            None => 0.0,
        };
        Temperatures { cpu, disk }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
        value: Result<f64, ()>,
    }

    #[async_trait]
    impl TemperatureSource for Counting {
        async fn read_celsius(&mut self) -> Result<f64, SensorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.value
                .map_err(|_| SensorError::Missing("test".to_string()))
        }
    }

    const SMART_OUTPUT: &str = "\
ID# ATTRIBUTE_NAME          FLAG     VALUE WORST THRESH TYPE      UPDATED  WHEN_FAILED RAW_VALUE
  9 Power_On_Hours          0x0032   097   097   000    Old_age   Always       -       14212
194 Temperature_Celsius     0x0022   036   052   000    Old_age   Always       -       36 (Min/Max 18/52)
";

    #[test]
    fn test_parse_smartctl_194() {
        assert_eq!(parse_smartctl_temperature(SMART_OUTPUT), Some(36.0));
    }

    #[test]
    fn test_parse_smartctl_190_first() {
        let out = "190 Airflow_Temperature_Cel 0x0032   059   036   000    Old_age   Always       -       41\n\
                   194 Temperature_Celsius     0x0022   036   052   000    Old_age   Always       -       36";
        assert_eq!(parse_smartctl_temperature(out), Some(41.0));
    }

    #[test]
    fn test_parse_smartctl_without_temperature() {
        assert_eq!(parse_smartctl_temperature("no attributes here"), None);
    }

    #[tokio::test]
    async fn test_hung_command_times_out() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let err = run_with_timeout(&mut cmd, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, SensorError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_thermal_zone_reads_millidegrees() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temp");
        std::fs::write(&path, "48250\n").unwrap();

        let mut zone = ThermalZone::new(&path);
        assert_eq!(zone.read_celsius().await.unwrap(), 48.25);
    }

    #[tokio::test]
    async fn test_thermal_zone_missing_file() {
        let mut zone = ThermalZone::new("/nonexistent/thermal/temp");
        assert!(matches!(
            zone.read_celsius().await,
            Err(SensorError::Read { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_caches_between_samples() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner = Counting {
            calls: calls.clone(),
            value: Ok(42.0),
        };
        let mut limited = RateLimited::new(inner, Duration::from_secs(10));

        assert_eq!(limited.read().await, 42.0);
        for _ in 0..9 {
            tokio::time::advance(Duration::from_secs(1)).await;
            assert_eq!(limited.read().await, 42.0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        limited.read().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_failures_read_as_zero() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cpu = Counting {
            calls: calls.clone(),
            value: Err(()),
        };
        let disk = Counting {
            calls: calls.clone(),
            value: Err(()),
        };
        let mut sensors = Sensors::new(Box::new(cpu), Some(Box::new(disk)), Duration::from_secs(10));

        assert_eq!(sensors.read().await, Temperatures { cpu: 0.0, disk: 0.0 });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_no_disk_source_reads_zero() {
        let cpu = Counting {
            calls: Arc::new(AtomicUsize::new(0)),
            value: Ok(55.0),
        };
        let mut sensors = Sensors::new(Box::new(cpu), None, Duration::from_secs(10));
        assert_eq!(sensors.read().await, Temperatures { cpu: 55.0, disk: 0.0 });
    }
}
