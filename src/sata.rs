// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! SATA controller power-up.
//!
//! On some boards the SATA bridge stays unpowered until two GPIO lines are
//! driven high. If no `sd*` disk is visible at startup and the lines are
//! configured, they are raised and held for the life of the daemon.

use crate::config::HardwareConfig;
use crate::gpio;
use gpio_cdev::LineHandle;
use std::time::Duration;
use tokio::process::Command;

/// Time given to the disks to spin up after power is applied.
const SPIN_UP: Duration = Duration::from_secs(2);

/// Held SATA power lines. Dropping this releases them.
#[derive(Default)]
pub struct SataPower {
    lines: Vec<LineHandle>,
}

impl SataPower {
    pub fn is_powered(&self) -> bool {
        !self.lines.is_empty()
    }
}

/// Names of whole `sd*` disks in `lsblk -d` output.
pub fn sd_disks(lsblk: &str) -> Vec<String> {
    lsblk
        .lines()
        .filter_map(|l| l.split_whitespace().next())
        .filter(|name| name.starts_with("sd"))
        .map(str::to_string)
        .collect()
}

async fn disks_present() -> bool {
    match Command::new("lsblk").arg("-d").output().await {
        Ok(out) => !sd_disks(&String::from_utf8_lossy(&out.stdout)).is_empty(),
        Err(e) => {
            log::warn!("Failed to run lsblk: {e}");
            false
        }
    }
}

/// Power the SATA controller if needed. Never fails; problems are logged
/// and leave the controller as it was.
pub async fn enable_if_needed(hw: &HardwareConfig) -> SataPower {
    if disks_present().await {
        log::info!("SATA disks detected, skipping SATA controller enable");
        return SataPower::default();
    }

    let (Some(chip), Some(line1), Some(line2)) = (
        hw.sata_chip.as_deref(),
        hw.sata_line_1.as_deref(),
        hw.sata_line_2.as_deref(),
    ) else {
        log::info!("SATA controller not configured");
        return SataPower::default();
    };

    let offsets = match (gpio::parse_line(line1), gpio::parse_line(line2)) {
        (Ok(a), Ok(b)) => [a, b],
        (Err(e), _) | (_, Err(e)) => {
            log::warn!("SATA controller disabled: {e}");
            return SataPower::default();
        }
    };

    log::info!("No SATA disks detected, enabling SATA controller...");
    let mut power = SataPower::default();
    for offset in offsets {
        match gpio::request_output(chip, offset, 1) {
            Ok(handle) => {
                log::info!("SATA line {offset} set HIGH");
                power.lines.push(handle);
            }
            Err(e) => log::warn!("Failed to raise SATA line: {e}"),
        }
    }

    if power.is_powered() {
        tokio::time::sleep(SPIN_UP).await;
        log::info!("SATA controller enabled");
    }
    power
}
