// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Gesture actions.
//!
//! Each gesture is bound to an action string in the `[key]` config section.
//! The [`Dispatcher`] looks the gesture up and carries out the action; it is
//! the only place where gestures turn into effects.

use crate::button::Gesture;
use crate::config::KeyConfig;
use crate::fan::FanController;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Delay before running `poweroff`/`reboot`, so the shutdown gets logged.
pub const POWER_DELAY: Duration = Duration::from_secs(1);

/// Capacity of the page-advance channel.
pub const PAGE_QUEUE: usize = 10;

/// What a gesture does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Advance the status display one page.
    Slider,
    /// Toggle automatic fan control.
    Switch,
    Poweroff,
    Reboot,
    None,
    /// Run through `sh -c`.
    Command(String),
}

static NO_ACTION: Action = Action::None;

impl Action {
    /// Whether a control-socket client may trigger this action. Power
    /// control and shell commands need the physical button.
    pub fn allowed_remotely(&self) -> bool {
        matches!(self, Action::Slider | Action::Switch | Action::None)
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        match s.trim() {
            "slider" => Action::Slider,
            "switch" => Action::Switch,
            "poweroff" => Action::Poweroff,
            "reboot" => Action::Reboot,
            "none" | "" => Action::None,
            cmd => Action::Command(cmd.to_string()),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Slider => f.write_str("slider"),
            Action::Switch => f.write_str("switch"),
            Action::Poweroff => f.write_str("poweroff"),
            Action::Reboot => f.write_str("reboot"),
            Action::None => f.write_str("none"),
            Action::Command(cmd) => f.write_str(cmd),
        }
    }
}

/// Gesture to action table.
#[derive(Debug, Clone, Default)]
pub struct KeyBindings {
    table: HashMap<Gesture, Action>,
}

impl KeyBindings {
    pub fn from_config(key: &KeyConfig) -> Self {
        let table = [
            (Gesture::Click, key.click.as_str()),
            (Gesture::DoubleClick, key.twice.as_str()),
            (Gesture::LongPress, key.press.as_str()),
        ]
        .into_iter()
        .map(|(g, a)| (g, Action::from(a)))
        .collect();
        Self { table }
    }

    /// Action bound to `gesture`; unbound gestures do nothing.
    pub fn action_for(&self, gesture: Gesture) -> &Action {
        self.table.get(&gesture).unwrap_or(&NO_ACTION)
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// The fan on/off switch.
pub trait FanSwitch: Send + Sync {
    /// Flip automatic control; returns the new enabled state.
    fn toggle(&self) -> bool;
}

impl FanSwitch for FanController {
    fn toggle(&self) -> bool {
        FanController::toggle(self)
    }
}

/// Fire-and-forget external commands.
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args` after `delay`. Never waits for completion;
    /// the outcome is only logged.
    fn spawn(&self, program: &str, args: &[&str], delay: Duration);
}

/// Runs commands as child processes on tasks tracked by the daemon, so a
/// pending `poweroff` survives the shutdown that follows it.
#[derive(Clone)]
pub struct ProcessRunner {
    tracker: TaskTracker,
}

impl ProcessRunner {
    pub fn new(tracker: TaskTracker) -> Self {
        Self { tracker }
    }
}

impl CommandRunner for ProcessRunner {
    fn spawn(&self, program: &str, args: &[&str], delay: Duration) {
        let program = program.to_string();
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let display = std::iter::once(program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        self.tracker.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match Command::new(&program).args(&args).status().await {
                Ok(status) if status.success() => {
                    log::info!("Command '{display}' executed successfully");
                }
                Ok(status) => log::warn!("Command '{display}' failed: {status}"),
                Err(e) => log::error!("Failed to execute command '{display}': {e}"),
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Turns gestures into effects.
pub struct Dispatcher {
    bindings: KeyBindings,
    fan: Arc<dyn FanSwitch>,
    pages: mpsc::Sender<()>,
    runner: Arc<dyn CommandRunner>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// `shutdown` is cancelled when a gesture powers the board off or reboots it.
    pub fn new(
        bindings: KeyBindings,
        fan: Arc<dyn FanSwitch>,
        pages: mpsc::Sender<()>,
        runner: Arc<dyn CommandRunner>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            bindings,
            fan,
            pages,
            runner,
            shutdown,
        }
    }

    /// Look up and perform the action bound to `gesture`.
    pub fn handle(&self, gesture: Gesture) {
        let action = self.bindings.action_for(gesture);
        log::info!("Button event: {gesture} (action: {action})");
        self.perform(action);
    }

    pub fn perform(&self, action: &Action) {
        match action {
            Action::Slider => {
                // Losing a page flip is harmless; never block on the display.
                if self.pages.try_send(()).is_err() {
                    log::debug!("Page queue full, page advance dropped");
                }
            }
            Action::Switch => {
                self.fan.toggle();
            }
            Action::Poweroff | Action::Reboot => {
                let program = if *action == Action::Poweroff {
                    "poweroff"
                } else {
                    "reboot"
                };
                log::info!("{program} requested via button");
                self.runner.spawn(program, &[], POWER_DELAY);
                self.shutdown.cancel();
            }
            Action::None => {}
            Action::Command(cmd) => {
                log::info!("Executing custom command: {cmd}");
                self.runner.spawn("sh", &["-c", cmd], Duration::ZERO);
            }
        }
    }

    /// Handle gestures from `rx` until `cancel` fires or all senders are gone.
    pub async fn run(self, mut rx: mpsc::Receiver<Gesture>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                gesture = rx.recv() => match gesture {
                    Some(g) => self.handle(g),
                    None => break,
                },
            }
        }
    }
}
