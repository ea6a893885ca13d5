// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! quadhat-daemon: system service that drives the HAT fans from CPU and
//! disk temperatures, turns button gestures into actions, rotates the
//! status pages and accepts commands over a Unix domain socket.

use anyhow::Context;
use clap::Parser;
use quadhat::actions::{Dispatcher, FanSwitch, KeyBindings, PAGE_QUEUE, ProcessRunner};
use quadhat::button::{ButtonMonitor, GESTURE_QUEUE, Gesture};
use quadhat::config::{self, Config};
use quadhat::display::{self, FanSpeedSource, LogScreen, StatusPages};
use quadhat::fan::{FanController, FanSettings};
use quadhat::gpio::{self, GpioButton};
use quadhat::protocol::{self, Request, Response};
use quadhat::pwm::{PwmDevice, SysfsPwm};
use quadhat::sata;
use quadhat::sensors::{Sensors, SmartctlDisks, TemperatureSource, ThermalZone};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::{self, Duration};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "quadhat-daemon", about = "Quad SATA HAT fan, button and display daemon")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    /// Override the socket path.
    #[arg(short, long)]
    socket: Option<String>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    dump_config: bool,
}

// ---------------------------------------------------------------------------
// Socket control surface
// ---------------------------------------------------------------------------

/// Owner and group may connect; other users may not.
const SOCKET_MODE: u32 = 0o660;

#[derive(Clone)]
struct Control {
    fan: Arc<FanController>,
    bindings: KeyBindings,
    gestures: mpsc::Sender<Gesture>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = config::resolve_config_path(Some(&cli.config));
    let mut cfg = config::load_config(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    cfg.apply_env_overrides(|k| std::env::var(k).ok())
        .context("applying environment overrides")?;

    if cli.dump_config {
        print!("{}", config::to_toml(&cfg).context("rendering config")?);
        return Ok(());
    }

    let level = if cli.verbose {
        "debug"
    } else {
        cfg.daemon.log_level.as_str()
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    log::info!("Using config {}", config_path.display());
    cfg.warn_suspicious();

    let socket_path = cli
        .socket
        .clone()
        .unwrap_or_else(|| cfg.daemon.socket_path.clone());

    // Disks must be powered before the first smartctl read.
    let sata_power = sata::enable_if_needed(&cfg.hardware).await;

    let fan = Arc::new(open_fans(&cfg)?);
    let sensors = build_sensors(&cfg);
    let button = open_button(&cfg).await;

    let cancel = CancellationToken::new();
    let tracker = TaskTracker::new();
    let (gesture_tx, gesture_rx) = mpsc::channel(GESTURE_QUEUE);
    let (page_tx, page_rx) = mpsc::channel(PAGE_QUEUE);

    // Clean up old socket file
    let _ = std::fs::remove_file(&socket_path);
    let listener =
        UnixListener::bind(&socket_path).with_context(|| format!("binding {socket_path}"))?;

    // Let the socket's group in, nobody else
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(SOCKET_MODE);
        std::fs::set_permissions(&socket_path, perms)?;
    }
    log::info!("Listening on {socket_path}");

    // Fan loop
    {
        let fan = fan.clone();
        let cancel = cancel.clone();
        tracker.spawn(async move { fan.run(sensors, cancel).await });
    }

    // Button and gesture dispatch
    tracker.spawn(button.run(gesture_tx.clone(), cancel.clone()));
    let dispatcher = Dispatcher::new(
        KeyBindings::from_config(&cfg.key),
        fan.clone() as Arc<dyn FanSwitch>,
        page_tx,
        Arc::new(ProcessRunner::new(tracker.clone())),
        cancel.clone(),
    );
    tracker.spawn(dispatcher.run(gesture_rx, cancel.clone()));

    // Status pages
    if cfg.display.enabled {
        let pages = StatusPages::new(
            fan.clone() as Arc<dyn FanSpeedSource>,
            cfg.hardware.cpu_temp_path.clone(),
            cfg.display.fahrenheit,
            Duration::from_secs(cfg.display.slide_secs.max(1)),
        );
        tracker.spawn(pages.run(LogScreen, page_rx, cancel.clone()));
    } else {
        tracker.spawn(display::discard_pages(page_rx, cancel.clone()));
    }

    // Socket server
    let control = Control {
        fan: fan.clone(),
        bindings: KeyBindings::from_config(&cfg.key),
        gestures: gesture_tx,
    };
    tracker.spawn(serve(listener, control, tracker.clone(), cancel.clone()));

    // Wait for a signal or a power action
    let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => log::info!("Received SIGINT"),
        _ = sigterm.recv() => log::info!("Received SIGTERM"),
        _ = cancel.cancelled() => log::info!("Shutdown requested"),
    }

    cancel.cancel();
    tracker.close();
    let grace = Duration::from_millis(cfg.daemon.shutdown_grace_ms);
    if time::timeout(grace, tracker.wait()).await.is_err() {
        log::warn!("Tasks still running after {grace:?}, exiting anyway");
    }

    // Cleanup socket
    let _ = std::fs::remove_file(&socket_path);
    drop(sata_power);
    log::info!("Daemon stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Startup helpers
// ---------------------------------------------------------------------------

fn open_fans(cfg: &Config) -> anyhow::Result<FanController> {
    let hw = &cfg.hardware;
    let cpu = SysfsPwm::open(&hw.pwm_chip, hw.cpu_pwm_channel, hw.polarity)
        .context("opening CPU fan PWM")?;

    let disk: Option<Box<dyn PwmDevice>> = match hw.disk_pwm_channel {
        Some(ch) if hw.has_separate_disk_fan() => Some(Box::new(
            SysfsPwm::open(&hw.pwm_chip, ch, hw.polarity).context("opening disk fan PWM")?,
        )),
        _ => {
            log::info!("Disk fan shares the CPU fan output");
            None
        }
    };

    Ok(FanController::new(
        FanSettings::from_config(cfg),
        Box::new(cpu),
        disk,
    ))
}

fn build_sensors(cfg: &Config) -> Sensors {
    let cpu: Box<dyn TemperatureSource> = Box::new(ThermalZone::new(&cfg.hardware.cpu_temp_path));

    let disk: Option<Box<dyn TemperatureSource>> =
        if cfg.fan.temp_disks && !cfg.disk.disks_temp.is_empty() {
            log::info!("Disk temperature from {}", cfg.disk.disks_temp.join(", "));
            Some(Box::new(SmartctlDisks::new(cfg.disk.disks_temp.clone())))
        } else {
            log::info!("Disk temperature monitoring off");
            None
        };

    Sensors::new(cpu, disk, cfg.fan.disk_refresh())
}

async fn open_button(cfg: &Config) -> ButtonMonitor<GpioButton> {
    let hw = &cfg.hardware;
    let Some(line) = hw.button_line.as_deref() else {
        log::info!("No button line configured");
        return ButtonMonitor::disabled();
    };

    let opened = match gpio::parse_line(line) {
        Ok(offset) => GpioButton::open(&hw.button_chip, offset).await,
        Err(e) => Err(e),
    };
    match opened {
        Ok(source) => ButtonMonitor::new(source, cfg.time.twice_window(), cfg.time.press_time()),
        Err(e) => {
            log::warn!("Button disabled: {e}");
            ButtonMonitor::disabled()
        }
    }
}

// ---------------------------------------------------------------------------
// Client connections
// ---------------------------------------------------------------------------

async fn serve(
    listener: UnixListener,
    control: Control,
    tracker: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        tracker.spawn(handle_client(stream, control.clone(), cancel.clone()));
                    }
                    Err(e) => {
                        log::error!("Failed to accept connection: {e}");
                    }
                }
            }
            _ = cancel.cancelled() => break,
        }
    }
}

async fn handle_client(stream: UnixStream, control: Control, cancel: CancellationToken) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                _ => break,
            },
        };

        let response = match protocol::decode::<Request>(&line) {
            Ok(req) => process_request(req, &control),
            Err(e) => Response::Error {
                message: format!("Invalid request: {e}"),
            },
        };

        let encoded = match protocol::encode(&response) {
            Ok(s) => s,
            Err(e) => {
                log::error!("Failed to encode response: {e}");
                continue;
            }
        };

        if writer.write_all(encoded.as_bytes()).await.is_err() {
            break; // Client disconnected
        }
    }
}

fn process_request(req: Request, control: &Control) -> Response {
    match req {
        Request::GetStatus => {
            let speeds = control.fan.current_speeds();
            Response::Status {
                cpu_percent: speeds.cpu,
                disk_percent: speeds.disk,
                enabled: control.fan.is_enabled(),
            }
        }

        Request::ToggleFan => {
            let enabled = control.fan.toggle();
            Response::Ok {
                message: if enabled {
                    "Fan control enabled".to_string()
                } else {
                    "Fan control disabled, fans at full speed".to_string()
                },
            }
        }

        Request::Gesture { gesture } if !control.bindings.action_for(gesture).allowed_remotely() => {
            Response::Error {
                message: format!(
                    "{gesture} is bound to '{}', which only the button may trigger",
                    control.bindings.action_for(gesture)
                ),
            }
        }

        Request::Gesture { gesture } => match control.gestures.try_send(gesture) {
            Ok(()) => Response::Ok {
                message: format!("Queued {gesture}"),
            },
            Err(mpsc::error::TrySendError::Full(_)) => Response::Error {
                message: "Gesture queue full".to_string(),
            },
            Err(mpsc::error::TrySendError::Closed(_)) => Response::Error {
                message: "Daemon is shutting down".to_string(),
            },
        },
    }
}
