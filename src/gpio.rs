// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! GPIO character-device access.
//!
//! The button is an active-low input watched for both edges: a falling
//! edge is a press, a rising edge a release. Edges are timestamped when
//! they reach userspace, which is what the gesture timing cares about.

use crate::error::GpioError;
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use gpio_cdev::{AsyncLineEventHandle, Chip, EventRequestFlags, EventType, LineRequestFlags};
use std::time::Duration;
use tokio::time::Instant;

const CONSUMER: &str = "quadhat";

/// Bounce from requesting the line is discarded for this long.
const SETTLE_TIME: Duration = Duration::from_millis(100);

/// Direction of a button transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Button pressed.
    Falling,
    /// Button released.
    Rising,
}

/// A single edge and when it was seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    pub edge: Edge,
    pub at: Instant,
}

impl EdgeEvent {
    pub fn now(edge: Edge) -> Self {
        Self {
            edge,
            at: Instant::now(),
        }
    }
}

/// An ordered stream of button edges.
#[async_trait]
pub trait EdgeSource: Send {
    /// Wait for the next edge. `None` once the source has gone away.
    ///
    /// Must be cancel-safe: dropping the future loses no edge.
    async fn next_edge(&mut self) -> Option<EdgeEvent>;

    /// Discard edges that are already queued.
    fn drain(&mut self);

    /// Release the underlying line.
    fn close(&mut self);
}

/// Normalise a chip name: `0` and `gpiochip0` both become `/dev/gpiochip0`.
pub fn resolve_chip_path(chip: &str) -> String {
    let chip = chip.trim();
    let chip = if chip.is_empty() { "gpiochip0" } else { chip };
    let chip = if chip.chars().all(|c| c.is_ascii_digit()) {
        format!("gpiochip{chip}")
    } else {
        chip.to_string()
    };
    if chip.starts_with("/dev/") {
        chip
    } else {
        format!("/dev/{chip}")
    }
}

/// Parse a line offset from config text.
pub fn parse_line(line: &str) -> Result<u32, GpioError> {
    line.trim()
        .parse()
        .map_err(|_| GpioError::InvalidLine(line.to_string()))
}

// ---------------------------------------------------------------------------
// Button input
// ---------------------------------------------------------------------------

/// The button line, requested for both-edge events.
pub struct GpioButton {
    events: Option<AsyncLineEventHandle>,
}

impl GpioButton {
    /// Request `line` on `chip` and discard the edges the request itself causes.
    pub async fn open(chip: &str, line: u32) -> Result<Self, GpioError> {
        let path = resolve_chip_path(chip);
        let request_err = |source| GpioError::Request {
            chip: path.clone(),
            line,
            source,
        };

        let mut chip_dev = Chip::new(&path).map_err(request_err)?;
        let handle = chip_dev
            .get_line(line)
            .and_then(|l| {
                l.events(
                    LineRequestFlags::INPUT,
                    EventRequestFlags::BOTH_EDGES,
                    CONSUMER,
                )
            })
            .map_err(request_err)?;
        let events = AsyncLineEventHandle::new(handle).map_err(request_err)?;

        let mut button = Self {
            events: Some(events),
        };
        tokio::time::sleep(SETTLE_TIME).await;
        button.drain();

        log::info!("Button monitoring enabled on {path} line {line}");
        Ok(button)
    }
}

#[async_trait]
impl EdgeSource for GpioButton {
    async fn next_edge(&mut self) -> Option<EdgeEvent> {
        let events = self.events.as_mut()?;
        loop {
            match events.next().await? {
                Ok(ev) => {
                    let edge = match ev.event_type() {
                        EventType::FallingEdge => Edge::Falling,
                        EventType::RisingEdge => Edge::Rising,
                    };
                    return Some(EdgeEvent::now(edge));
                }
                Err(e) => log::warn!("Button event read failed: {e}"),
            }
        }
    }

    fn drain(&mut self) {
        let Some(events) = self.events.as_mut() else {
            return;
        };
        while let Some(Some(_)) = events.next().now_or_never() {}
    }

    fn close(&mut self) {
        if self.events.take().is_some() {
            log::debug!("Button line released");
        }
    }
}

// ---------------------------------------------------------------------------
// Outputs
// ---------------------------------------------------------------------------

/// Request `line` on `chip` as an output driven to `value`.
///
/// The line holds its value until the returned handle is dropped.
pub fn request_output(chip: &str, line: u32, value: u8) -> Result<gpio_cdev::LineHandle, GpioError> {
    let path = resolve_chip_path(chip);
    Chip::new(&path)
        .and_then(|mut c| c.get_line(line))
        .and_then(|l| l.request(LineRequestFlags::OUTPUT, value, CONSUMER))
        .map_err(|source| GpioError::Request {
            chip: path,
            line,
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_chip_path() {
        assert_eq!(resolve_chip_path("0"), "/dev/gpiochip0");
        assert_eq!(resolve_chip_path("gpiochip3"), "/dev/gpiochip3");
        assert_eq!(resolve_chip_path("/dev/gpiochip1"), "/dev/gpiochip1");
        assert_eq!(resolve_chip_path(""), "/dev/gpiochip0");
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line(" 17 ").unwrap(), 17);
        assert!(matches!(parse_line("GPIO17"), Err(GpioError::InvalidLine(_))));
        assert!(parse_line("-1").is_err());
    }

    #[tokio::test]
    async fn test_open_missing_chip_fails() {
        let err = GpioButton::open("/dev/gpiochip-does-not-exist", 3)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, GpioError::Request { line: 3, .. }));
    }
}
