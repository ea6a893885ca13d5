// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Status pages.
//!
//! A small set of text pages rotated on a timer and on every page-advance
//! request from the button. Pixel rendering belongs to whatever implements
//! [`Screen`]; the daemon ships [`LogScreen`], which writes the page text
//! to the log.

use crate::fan::{FanController, FanSpeeds};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Read-only view of the fan speeds.
pub trait FanSpeedSource: Send + Sync {
    fn fan_speeds(&self) -> FanSpeeds;
}

impl FanSpeedSource for FanController {
    fn fan_speeds(&self) -> FanSpeeds {
        self.current_speeds()
    }
}

/// Somewhere to put page text.
pub trait Screen: Send {
    fn show(&mut self, lines: &[String]);
    fn clear(&mut self);
}

/// Writes each page to the log at debug level.
#[derive(Debug, Default)]
pub struct LogScreen;

impl Screen for LogScreen {
    fn show(&mut self, lines: &[String]) {
        log::debug!("[display] {}", lines.join(" | "));
    }

    fn clear(&mut self) {
        log::debug!("[display] cleared");
    }
}

/// Pages, in rotation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    /// Uptime, CPU temperature, memory.
    System,
    /// Fan speeds and load average.
    Fans,
}

const PAGES: [Page; 2] = [Page::System, Page::Fans];

/// Page rotation and rendering.
pub struct StatusPages {
    fans: Arc<dyn FanSpeedSource>,
    proc_root: PathBuf,
    cpu_temp_path: PathBuf,
    fahrenheit: bool,
    slide: Duration,
    index: usize,
}

impl StatusPages {
    pub fn new(
        fans: Arc<dyn FanSpeedSource>,
        cpu_temp_path: impl Into<PathBuf>,
        fahrenheit: bool,
        slide: Duration,
    ) -> Self {
        Self {
            fans,
            proc_root: PathBuf::from("/proc"),
            cpu_temp_path: cpu_temp_path.into(),
            fahrenheit,
            slide,
            index: 0,
        }
    }

    /// Read uptime, memory and load from somewhere other than `/proc`.
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    pub fn current(&self) -> Page {
        PAGES[self.index]
    }

    pub fn advance(&mut self) {
        self.index = (self.index + 1) % PAGES.len();
    }

    /// Text lines for `page`. Unreadable values show as `N/A`.
    pub async fn render(&self, page: Page) -> Vec<String> {
        match page {
            Page::System => vec![
                self.read_proc("uptime")
                    .await
                    .and_then(|s| uptime_line(&s))
                    .unwrap_or_else(|| "Up: N/A".to_string()),
                read_text(&self.cpu_temp_path)
                    .await
                    .and_then(|s| s.trim().parse::<f64>().ok())
                    .map(|millic| format!("CPU: {}", format_temp(millic / 1000.0, self.fahrenheit)))
                    .unwrap_or_else(|| "CPU: N/A".to_string()),
                self.read_proc("meminfo")
                    .await
                    .and_then(|s| memory_line(&s))
                    .unwrap_or_else(|| "Mem: N/A".to_string()),
            ],
            Page::Fans => vec![
                fan_line(self.fans.fan_speeds()),
                self.read_proc("loadavg")
                    .await
                    .and_then(|s| s.split_whitespace().next().map(|l| format!("Load: {l}")))
                    .unwrap_or_else(|| "Load: N/A".to_string()),
            ],
        }
    }

    async fn read_proc(&self, name: &str) -> Option<String> {
        read_text(&self.proc_root.join(name)).await
    }

    /// Show pages until `cancel` fires, advancing every slide interval and
    /// on each message from `advance`.
    pub async fn run<S: Screen>(
        mut self,
        mut screen: S,
        mut advance: mpsc::Receiver<()>,
        cancel: CancellationToken,
    ) {
        screen.show(&self.render(self.current()).await);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                msg = advance.recv() => {
                    if msg.is_none() {
                        cancel.cancelled().await;
                        break;
                    }
                    self.advance();
                }
                _ = tokio::time::sleep(self.slide) => self.advance(),
            }
            screen.show(&self.render(self.current()).await);
        }

        screen.show(&["Good Bye ~".to_string()]);
        screen.clear();
    }
}

async fn read_text(path: &Path) -> Option<String> {
    tokio::fs::read_to_string(path).await.ok()
}

/// Consume page-advance requests when no display is configured.
pub async fn discard_pages(mut advance: mpsc::Receiver<()>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = advance.recv() => if msg.is_none() { break },
        }
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// `Fan C-50%, D-75%`, or `Fan: off` when both fans are stopped.
pub fn fan_line(speeds: FanSpeeds) -> String {
    if speeds.is_off() {
        "Fan: off".to_string()
    } else {
        format!("Fan C-{:.0}%, D-{:.0}%", speeds.cpu, speeds.disk)
    }
}

pub fn format_temp(celsius: f64, fahrenheit: bool) -> String {
    if fahrenheit {
        format!("{:.0}°F", celsius * 1.8 + 32.0)
    } else {
        format!("{celsius:.1}°C")
    }
}

/// From `/proc/uptime`: `Up: 3d 4h 12m`.
fn uptime_line(proc_uptime: &str) -> Option<String> {
    let secs: f64 = proc_uptime.split_whitespace().next()?.parse().ok()?;
    let mins = (secs as u64) / 60;
    let (days, hours, mins) = (mins / 1440, (mins / 60) % 24, mins % 60);
    Some(if days > 0 {
        format!("Up: {days}d {hours}h {mins}m")
    } else {
        format!("Up: {hours}h {mins}m")
    })
}

/// From `/proc/meminfo`: `Mem: used/totalMB`.
fn memory_line(meminfo: &str) -> Option<String> {
    let field = |name: &str| -> Option<u64> {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    Some(format!(
        "Mem: {}/{}MB",
        total.saturating_sub(available) / 1024,
        total / 1024
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedSpeeds(FanSpeeds);

    impl FanSpeedSource for FixedSpeeds {
        fn fan_speeds(&self) -> FanSpeeds {
            self.0
        }
    }

    #[derive(Clone, Default)]
    struct MemoryScreen(Arc<Mutex<Vec<Vec<String>>>>);

    impl Screen for MemoryScreen {
        fn show(&mut self, lines: &[String]) {
            self.0.lock().unwrap().push(lines.to_vec());
        }

        fn clear(&mut self) {
            self.0.lock().unwrap().push(Vec::new());
        }
    }

    fn pages(speeds: FanSpeeds) -> (StatusPages, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("uptime"), "273600.55 1000.00\n").unwrap();
        std::fs::write(
            dir.path().join("meminfo"),
            "MemTotal:        4048576 kB\nMemFree:          100000 kB\nMemAvailable:    2000000 kB\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("loadavg"), "0.42 0.30 0.25 1/200 1234\n").unwrap();
        std::fs::write(dir.path().join("temp"), "48300\n").unwrap();

        let p = StatusPages::new(
            Arc::new(FixedSpeeds(speeds)),
            dir.path().join("temp"),
            false,
            Duration::from_secs(10),
        )
        .with_proc_root(dir.path());
        (p, dir)
    }

    #[test]
    fn test_fan_line() {
        assert_eq!(fan_line(FanSpeeds::default()), "Fan: off");
        assert_eq!(
            fan_line(FanSpeeds {
                cpu: 50.0,
                disk: 75.0
            }),
            "Fan C-50%, D-75%"
        );
    }

    #[test]
    fn test_format_temp() {
        assert_eq!(format_temp(48.3, false), "48.3°C");
        assert_eq!(format_temp(50.0, true), "122°F");
    }

    #[tokio::test]
    async fn test_render_pages() {
        let (p, _dir) = pages(FanSpeeds {
            cpu: 25.0,
            disk: 100.0,
        });
        assert_eq!(
            p.render(Page::System).await,
            vec!["Up: 3d 4h 0m", "CPU: 48.3°C", "Mem: 2000/3953MB"]
        );
        assert_eq!(
            p.render(Page::Fans).await,
            vec!["Fan C-25%, D-100%", "Load: 0.42"]
        );
    }

    #[tokio::test]
    async fn test_render_missing_sources() {
        let p = StatusPages::new(
            Arc::new(FixedSpeeds(FanSpeeds::default())),
            "/nonexistent/temp",
            false,
            Duration::from_secs(10),
        )
        .with_proc_root("/nonexistent");
        assert_eq!(p.render(Page::System).await, vec!["Up: N/A", "CPU: N/A", "Mem: N/A"]);
    }

    #[test]
    fn test_advance_wraps() {
        let (mut p, _dir) = pages(FanSpeeds::default());
        assert_eq!(p.current(), Page::System);
        p.advance();
        assert_eq!(p.current(), Page::Fans);
        p.advance();
        assert_eq!(p.current(), Page::System);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_advances_on_request_and_timer() {
        let (p, _dir) = pages(FanSpeeds::default());
        let screen = MemoryScreen::default();
        let shown = screen.0.clone();
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(p.run(screen, rx, cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        tx.send(()).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(shown.lock().unwrap().len(), 2);
        assert_eq!(shown.lock().unwrap()[1][0], "Fan: off");

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(shown.lock().unwrap().len(), 3);
        assert_eq!(shown.lock().unwrap()[2][0], "Up: 3d 4h 0m");

        cancel.cancel();
        task.await.unwrap();
        let shown = shown.lock().unwrap();
        assert_eq!(shown[shown.len() - 2], vec!["Good Bye ~"]);
        assert!(shown[shown.len() - 1].is_empty());
    }
}
