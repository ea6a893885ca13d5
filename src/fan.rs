// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Fan control loop.
//!
//! Two logical fans: the CPU fan and the disk-bay fan. Every second the
//! loop samples both temperatures, runs each through its curve, floors the
//! result and writes the PWM output only when the value changed.
//!
//! The button can switch automatic control off at any time; while off, both
//! fans are held at full speed. The enabled flag and the last-applied duty
//! cycles sit behind a single mutex so a toggle never lands halfway through
//! a tick.

use crate::config::{Config, Polarity};
use crate::curve::{self, Breakpoints, CurveMode};
use crate::pwm::PwmDevice;
use crate::sensors::{Sensors, Temperatures};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Control loop period.
pub const TICK: Duration = Duration::from_secs(1);

/// Fixed inputs of the control loop.
#[derive(Debug, Clone)]
pub struct FanSettings {
    pub cpu: Breakpoints,
    pub disk: Breakpoints,
    pub mode: CurveMode,
    pub min_duty: f64,
    pub polarity: Polarity,
    pub log_ticks: bool,
}

impl FanSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            cpu: cfg.fan.cpu_breakpoints(),
            disk: cfg.fan.disk_breakpoints(),
            mode: cfg.fan.mode(),
            min_duty: cfg.fan.min_duty,
            polarity: cfg.hardware.polarity,
            log_ticks: cfg.fan.log_ticks,
        }
    }

    /// Floored duty cycles for a temperature sample, as (cpu, disk).
    pub fn duties(&self, temps: Temperatures) -> (f64, f64) {
        let cpu = curve::duty_cycle(temps.cpu, &self.cpu, self.mode);
        let disk = curve::duty_cycle(temps.disk, &self.disk, self.mode);
        (
            curve::apply_floor(cpu, self.min_duty),
            curve::apply_floor(disk, self.min_duty),
        )
    }
}

/// Last-applied fan speeds, in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FanSpeeds {
    pub cpu: f64,
    pub disk: f64,
}

impl FanSpeeds {
    pub fn is_off(&self) -> bool {
        self.cpu == 0.0 && self.disk == 0.0
    }
}

// ---------------------------------------------------------------------------
// Channel state
// ---------------------------------------------------------------------------

struct Channel {
    name: &'static str,
    device: Option<Box<dyn PwmDevice>>,
    last: f64,
}

impl Channel {
    fn new(name: &'static str, device: Box<dyn PwmDevice>) -> Self {
        Self {
            name,
            device: Some(device),
            last: 0.0,
        }
    }

    /// Write `duty` if it differs from the last applied value.
    fn apply(&mut self, duty: f64) {
        if duty == self.last {
            return;
        }
        let Some(device) = self.device.as_mut() else {
            return;
        };
        match device.set_duty_cycle(duty) {
            Ok(()) => self.last = duty,
            Err(e) => log::error!("Failed to set {} fan to {:.0}%: {e}", self.name, duty * 100.0),
        }
    }

    fn release(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };
        if let Err(e) = device.set_duty_cycle(0.0) {
            log::warn!("Failed to stop {} fan: {e}", self.name);
        }
        if let Err(e) = device.close() {
            log::warn!("Failed to release {} fan: {e}", self.name);
        }
        self.last = 0.0;
    }
}

struct FanState {
    enabled: bool,
    cpu: Channel,
    /// `None` when the disk-bay fan shares the CPU fan's output.
    disk: Option<Channel>,
}

impl FanState {
    fn speeds(&self) -> FanSpeeds {
        let cpu = self.cpu.last;
        let disk = self.disk.as_ref().map_or(cpu, |d| d.last);
        FanSpeeds {
            cpu: cpu * 100.0,
            disk: disk * 100.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Owns both fan outputs and their control state.
pub struct FanController {
    settings: FanSettings,
    state: Mutex<FanState>,
}

impl FanController {
    /// `disk` of `None` means the disk-bay fan is wired to the CPU fan's
    /// output; its reported speed then mirrors the CPU fan.
    pub fn new(
        settings: FanSettings,
        cpu: Box<dyn PwmDevice>,
        disk: Option<Box<dyn PwmDevice>>,
    ) -> Self {
        Self {
            settings,
            state: Mutex::new(FanState {
                enabled: true,
                cpu: Channel::new("cpu", cpu),
                disk: disk.map(|d| Channel::new("disk", d)),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FanState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    /// Apply one temperature sample. Does nothing while control is off.
    pub fn update(&self, temps: Temperatures) {
        let (cpu_dc, disk_dc) = self.settings.duties(temps);
        let mut st = self.lock();
        if !st.enabled {
            return;
        }

        st.cpu.apply(cpu_dc);
        if let Some(disk) = st.disk.as_mut() {
            disk.apply(disk_dc);
        }

        let level = if self.settings.log_ticks {
            log::Level::Info
        } else {
            log::Level::Debug
        };
        log::log!(
            level,
            "cpu_temp: {:.2}, cpu_dc: {:.2}, disk_temp: {:.2}, disk_dc: {:.2}",
            temps.cpu,
            cpu_dc * 100.0,
            temps.disk,
            disk_dc * 100.0
        );
    }

    /// Flip automatic control. Returns the new enabled state.
    ///
    /// Switching off immediately drives both fans at full speed. Switching
    /// back on writes nothing; the next tick recomputes from the curves.
    ///
    /// A forced write that fails is not recorded, so [`current_speeds`]
    /// keeps showing what the hardware last accepted until a later tick
    /// retries it.
    ///
    /// [`current_speeds`]: FanController::current_speeds
    pub fn toggle(&self) -> bool {
        let mut st = self.lock();
        st.enabled = !st.enabled;
        if st.enabled {
            log::info!("Fan control enabled");
        } else {
            let full = self.settings.polarity.full_speed();
            st.cpu.apply(full);
            if let Some(disk) = st.disk.as_mut() {
                disk.apply(full);
            }
            log::info!("Fan control disabled, fans forced to full speed");
        }
        st.enabled
    }

    /// Re-assert the forced value while control is off; retries a failed
    /// forced write.
    fn hold_full_speed(&self) {
        let full = self.settings.polarity.full_speed();
        let mut st = self.lock();
        if st.enabled {
            return;
        }
        st.cpu.apply(full);
        if let Some(disk) = st.disk.as_mut() {
            disk.apply(full);
        }
    }

    /// Last-applied duty cycles as percentages.
    pub fn current_speeds(&self) -> FanSpeeds {
        self.lock().speeds()
    }

    /// Stop both fans and release their outputs.
    pub fn shutdown(&self) {
        let mut st = self.lock();
        st.cpu.release();
        if let Some(disk) = st.disk.as_mut() {
            disk.release();
        }
        log::info!("Fans stopped");
    }

    /// Run the control loop until `cancel` fires, then stop the fans.
    pub async fn run(&self, mut sensors: Sensors, cancel: CancellationToken) {
        let mut interval = time::interval(TICK);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if !self.is_enabled() {
                        self.hold_full_speed();
                        continue;
                    }
                    // A stuck sensor must not hold the outputs past shutdown.
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        temps = sensors.read() => self.update(temps),
                    }
                }
            }
        }

        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{PwmError, SensorError};
    use crate::sensors::TemperatureSource;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct Recorded {
        writes: Mutex<Vec<f64>>,
        closed: AtomicBool,
        fail: AtomicBool,
    }

    impl Recorded {
        fn writes(&self) -> Vec<f64> {
            self.writes.lock().unwrap().clone()
        }
    }

    struct MockPwm(Arc<Recorded>);

    impl PwmDevice for MockPwm {
        fn set_duty_cycle(&mut self, fraction: f64) -> Result<(), PwmError> {
            if self.0.fail.load(Ordering::SeqCst) {
                return Err(PwmError::Closed);
            }
            self.0.writes.lock().unwrap().push(fraction);
            Ok(())
        }

        fn close(&mut self) -> Result<(), PwmError> {
            self.0.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FixedTemp(f64);

    #[async_trait]
    impl TemperatureSource for FixedTemp {
        async fn read_celsius(&mut self) -> Result<f64, SensorError> {
            Ok(self.0)
        }
    }

    fn settings(mode: CurveMode, polarity: Polarity) -> FanSettings {
        let bp = Breakpoints {
            lv0: 35.0,
            lv1: 40.0,
            lv2: 45.0,
            lv3: 50.0,
            max: 80.0,
        };
        FanSettings {
            cpu: bp,
            disk: bp,
            mode,
            min_duty: curve::DEFAULT_MIN_DUTY,
            polarity,
            log_ticks: false,
        }
    }

    fn controller(
        mode: CurveMode,
        polarity: Polarity,
    ) -> (FanController, Arc<Recorded>, Arc<Recorded>) {
        let cpu = Arc::new(Recorded::default());
        let disk = Arc::new(Recorded::default());
        let ctrl = FanController::new(
            settings(mode, polarity),
            Box::new(MockPwm(cpu.clone())),
            Some(Box::new(MockPwm(disk.clone()))),
        );
        (ctrl, cpu, disk)
    }

    fn temps(cpu: f64, disk: f64) -> Temperatures {
        Temperatures { cpu, disk }
    }

    #[test]
    fn test_writes_only_on_change() {
        let (ctrl, cpu, disk) = controller(CurveMode::Stepped, Polarity::Normal);

        for _ in 0..5 {
            ctrl.update(temps(42.0, 37.0));
        }
        assert_eq!(cpu.writes(), vec![0.50]);
        assert_eq!(disk.writes(), vec![0.25]);

        ctrl.update(temps(43.0, 38.0));
        assert_eq!(cpu.writes().len(), 1);

        ctrl.update(temps(46.0, 38.0));
        assert_eq!(cpu.writes(), vec![0.50, 0.75]);
        assert_eq!(disk.writes(), vec![0.25]);
    }

    #[test]
    fn test_cold_start_writes_nothing() {
        let (ctrl, cpu, _) = controller(CurveMode::Stepped, Polarity::Normal);
        ctrl.update(temps(20.0, 20.0));
        assert!(cpu.writes().is_empty());
        assert_eq!(ctrl.current_speeds(), FanSpeeds::default());
    }

    #[test]
    fn test_floor_applied_to_low_linear_duty() {
        let (ctrl, cpu, _) = controller(CurveMode::Linear, Polarity::Normal);
        ctrl.update(temps(35.0, 0.0));
        assert_eq!(cpu.writes(), vec![curve::DEFAULT_MIN_DUTY]);

        ctrl.update(temps(42.0, 0.0));
        let speeds = ctrl.current_speeds();
        assert!((speeds.cpu - 35.0).abs() < 1e-9);
        assert_eq!(speeds.disk, 0.0);
    }

    #[test]
    fn test_toggle_forces_full_speed() {
        let (ctrl, cpu, disk) = controller(CurveMode::Stepped, Polarity::Normal);
        ctrl.update(temps(42.0, 42.0));

        assert!(!ctrl.toggle());
        assert_eq!(
            ctrl.current_speeds(),
            FanSpeeds {
                cpu: 100.0,
                disk: 100.0
            }
        );
        assert_eq!(cpu.writes(), vec![0.50, 1.0]);
        assert_eq!(disk.writes(), vec![0.50, 1.0]);

        // Ticks are ignored while disabled.
        ctrl.update(temps(20.0, 20.0));
        assert_eq!(ctrl.current_speeds().cpu, 100.0);
    }

    #[test]
    fn test_toggle_inversed_forces_zero() {
        let (ctrl, cpu, _) = controller(CurveMode::Stepped, Polarity::Inversed);
        ctrl.update(temps(42.0, 42.0));
        ctrl.toggle();
        assert_eq!(cpu.writes(), vec![0.50, 0.0]);
        assert!(ctrl.current_speeds().is_off());
    }

    #[test]
    fn test_reenable_waits_for_next_tick() {
        let (ctrl, cpu, _) = controller(CurveMode::Stepped, Polarity::Normal);
        ctrl.toggle();
        assert!(ctrl.toggle());
        assert_eq!(cpu.writes(), vec![1.0]);

        ctrl.update(temps(42.0, 42.0));
        assert_eq!(cpu.writes(), vec![1.0, 0.50]);
    }

    #[test]
    fn test_write_failure_retried_next_tick() {
        let (ctrl, cpu, disk) = controller(CurveMode::Stepped, Polarity::Normal);
        cpu.fail.store(true, Ordering::SeqCst);

        ctrl.update(temps(42.0, 42.0));
        assert!(cpu.writes().is_empty());
        assert_eq!(disk.writes(), vec![0.50]);
        assert_eq!(ctrl.current_speeds().cpu, 0.0);

        cpu.fail.store(false, Ordering::SeqCst);
        ctrl.update(temps(42.0, 42.0));
        assert_eq!(cpu.writes(), vec![0.50]);
        assert_eq!(disk.writes(), vec![0.50]);
    }

    #[test]
    fn test_failed_forced_write_keeps_reported_speed() {
        let (ctrl, cpu, _) = controller(CurveMode::Stepped, Polarity::Normal);
        ctrl.update(temps(42.0, 42.0));
        cpu.fail.store(true, Ordering::SeqCst);

        assert!(!ctrl.toggle());
        let speeds = ctrl.current_speeds();
        assert_eq!(speeds.cpu, 50.0);
        assert_eq!(speeds.disk, 100.0);

        cpu.fail.store(false, Ordering::SeqCst);
        ctrl.hold_full_speed();
        assert_eq!(ctrl.current_speeds().cpu, 100.0);
        assert_eq!(cpu.writes(), vec![0.50, 1.0]);
    }

    #[test]
    fn test_shared_output_mirrors_cpu() {
        let cpu = Arc::new(Recorded::default());
        let ctrl = FanController::new(
            settings(CurveMode::Stepped, Polarity::Normal),
            Box::new(MockPwm(cpu.clone())),
            None,
        );
        ctrl.update(temps(46.0, 20.0));
        assert_eq!(cpu.writes(), vec![0.75]);
        assert_eq!(
            ctrl.current_speeds(),
            FanSpeeds {
                cpu: 75.0,
                disk: 75.0
            }
        );
    }

    #[test]
    fn test_shutdown_stops_and_closes() {
        let (ctrl, cpu, disk) = controller(CurveMode::Stepped, Polarity::Normal);
        ctrl.update(temps(50.0, 50.0));
        ctrl.shutdown();

        assert_eq!(cpu.writes(), vec![1.0, 0.0]);
        assert!(cpu.closed.load(Ordering::SeqCst));
        assert!(disk.closed.load(Ordering::SeqCst));
        assert!(ctrl.current_speeds().is_off());

        // Second shutdown has nothing left to release.
        ctrl.shutdown();
        assert_eq!(cpu.writes().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_ticks_until_cancelled() {
        let (ctrl, cpu, disk) = controller(CurveMode::Stepped, Polarity::Normal);
        let ctrl = Arc::new(ctrl);
        let sensors = Sensors::new(
            Box::new(FixedTemp(47.0)),
            Some(Box::new(FixedTemp(41.0))),
            Duration::from_secs(10),
        );
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let ctrl = ctrl.clone();
            let cancel = cancel.clone();
            async move { ctrl.run(sensors, cancel).await }
        });

        time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(
            ctrl.current_speeds(),
            FanSpeeds {
                cpu: 75.0,
                disk: 50.0
            }
        );

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(cpu.writes(), vec![0.75, 0.0]);
        assert_eq!(disk.writes(), vec![0.50, 0.0]);
        assert!(cpu.closed.load(Ordering::SeqCst));
    }

    struct StuckTemp;

    #[async_trait]
    impl TemperatureSource for StuckTemp {
        async fn read_celsius(&mut self) -> Result<f64, SensorError> {
            time::sleep(Duration::from_secs(600)).await;
            Ok(0.0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_stuck_sensor_read_releases_fans() {
        let (ctrl, cpu, disk) = controller(CurveMode::Stepped, Polarity::Normal);
        let ctrl = Arc::new(ctrl);
        let sensors = Sensors::new(
            Box::new(FixedTemp(47.0)),
            Some(Box::new(StuckTemp)),
            Duration::from_secs(10),
        );
        let cancel = CancellationToken::new();

        let task = tokio::spawn({
            let ctrl = ctrl.clone();
            let cancel = cancel.clone();
            async move { ctrl.run(sensors, cancel).await }
        });

        time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
        time::timeout(Duration::from_secs(5), task)
            .await
            .expect("fan loop did not stop after cancellation")
            .unwrap();

        assert!(cpu.closed.load(Ordering::SeqCst));
        assert!(disk.closed.load(Ordering::SeqCst));
        assert!(ctrl.current_speeds().is_off());
    }
}
