// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Button gesture detection.
//!
//! Raw edges are classified into three gestures:
//!
//! | Gesture      | Edges                                                   |
//! |--------------|---------------------------------------------------------|
//! | Click        | press + release, no second press within `twice`         |
//! | Double click | press + release, second press within `twice`, release   |
//! | Long press   | press held for at least `press`, then release           |
//!
//! Long presses and double clicks are reported on the final release, never
//! while the button is still down.
//!
//! [`GestureDecoder`] is a plain state machine fed edges and deadline
//! expiries; [`ButtonMonitor`] drives it from an [`EdgeSource`].

use crate::gpio::{Edge, EdgeEvent, EdgeSource};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Capacity of the gesture channel.
pub const GESTURE_QUEUE: usize = 10;

/// A classified button gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gesture {
    Click,
    #[serde(rename = "twice")]
    DoubleClick,
    #[serde(rename = "press")]
    LongPress,
}

impl Gesture {
    /// Name of the gesture's key binding in the config.
    pub fn config_key(self) -> &'static str {
        match self {
            Gesture::Click => "click",
            Gesture::DoubleClick => "twice",
            Gesture::LongPress => "press",
        }
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_key())
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    /// Down, not yet long enough for a long press.
    Pressed { since: Instant },
    /// Down past the long-press threshold; waiting for release.
    Held,
    /// Released once; a press before `deadline` makes a double click.
    AwaitingSecond { deadline: Instant },
    /// Second press is down; its release completes the double click.
    SecondPressed,
}

/// What woke the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Input {
    Edge(EdgeEvent),
    /// The deadline returned by [`GestureDecoder::deadline`] passed.
    Timeout(Instant),
}

/// Click / double-click / long-press classifier.
#[derive(Debug, Clone)]
pub struct GestureDecoder {
    twice: Duration,
    press: Duration,
    state: State,
}

impl GestureDecoder {
    pub fn new(twice: Duration, press: Duration) -> Self {
        Self {
            twice,
            press,
            state: State::Idle,
        }
    }

    /// True when no gesture is in progress.
    pub fn is_idle(&self) -> bool {
        self.state == State::Idle
    }

    /// When the decoder next needs a [`Input::Timeout`], if ever.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            State::Pressed { since } => Some(since + self.press),
            State::AwaitingSecond { deadline } => Some(deadline),
            State::Idle | State::Held | State::SecondPressed => None,
        }
    }

    /// Drop any gesture in progress.
    pub fn reset(&mut self) {
        self.state = State::Idle;
    }

    /// Advance by one input, returning a gesture if one completed.
    pub fn step(&mut self, input: Input) -> Option<Gesture> {
        let (next, gesture) = match (self.state, input) {
            (State::Idle, Input::Edge(ev)) if ev.edge == Edge::Falling => {
                (State::Pressed { since: ev.at }, None)
            }

            (State::Pressed { since }, Input::Edge(ev)) if ev.edge == Edge::Rising => {
                if ev.at.duration_since(since) >= self.press {
                    (State::Idle, Some(Gesture::LongPress))
                } else {
                    let deadline = ev.at + self.twice;
                    (State::AwaitingSecond { deadline }, None)
                }
            }
            (State::Pressed { since }, Input::Timeout(now)) if now >= since + self.press => {
                (State::Held, None)
            }

            (State::Held, Input::Edge(ev)) if ev.edge == Edge::Rising => {
                (State::Idle, Some(Gesture::LongPress))
            }

            (State::AwaitingSecond { deadline }, Input::Edge(ev)) if ev.edge == Edge::Falling => {
                if ev.at < deadline {
                    (State::SecondPressed, None)
                } else {
                    // Window already closed: report the click, and this
                    // press starts the next gesture.
                    (State::Pressed { since: ev.at }, Some(Gesture::Click))
                }
            }
            (State::AwaitingSecond { deadline }, Input::Timeout(now)) if now >= deadline => {
                (State::Idle, Some(Gesture::Click))
            }

            (State::SecondPressed, Input::Edge(ev)) if ev.edge == Edge::Rising => {
                (State::Idle, Some(Gesture::DoubleClick))
            }

            // Repeated edges in the same direction and early wakeups.
            (state, _) => (state, None),
        };
        self.state = next;
        gesture
    }
}

// ---------------------------------------------------------------------------
// Monitor task
// ---------------------------------------------------------------------------

/// Runs a [`GestureDecoder`] over an edge source and publishes gestures.
pub struct ButtonMonitor<S> {
    source: Option<S>,
    decoder: GestureDecoder,
}

impl<S: EdgeSource> ButtonMonitor<S> {
    pub fn new(source: S, twice: Duration, press: Duration) -> Self {
        Self {
            source: Some(source),
            decoder: GestureDecoder::new(twice, press),
        }
    }

    /// A monitor with no button attached; it only waits for cancellation.
    pub fn disabled() -> Self {
        Self {
            source: None,
            decoder: GestureDecoder::new(Duration::ZERO, Duration::ZERO),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.source.is_some()
    }

    /// Decode gestures until `cancel` fires or the edge source ends.
    ///
    /// Gestures go out with `try_send`; when `tx` is full the gesture is
    /// dropped so a slow consumer never stalls edge handling.
    pub async fn run(mut self, tx: mpsc::Sender<Gesture>, cancel: CancellationToken) {
        let Some(mut source) = self.source.take() else {
            log::info!("Button monitoring disabled");
            cancel.cancelled().await;
            return;
        };

        loop {
            let deadline = self.decoder.deadline();
            let input = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                edge = source.next_edge() => match edge {
                    Some(ev) => Input::Edge(ev),
                    None => {
                        log::warn!("Button edge source closed, monitoring stopped");
                        cancel.cancelled().await;
                        break;
                    }
                },
                _ = sleep_until(deadline) => Input::Timeout(Instant::now()),
            };

            let Some(gesture) = self.decoder.step(input) else {
                continue;
            };
            if gesture == Gesture::DoubleClick {
                source.drain();
            }

            match tx.try_send(gesture) {
                Ok(()) => log::debug!("Gesture detected: {gesture}"),
                Err(TrySendError::Full(_)) => log::debug!("Gesture queue full, dropped {gesture}"),
                Err(TrySendError::Closed(_)) => {
                    log::debug!("Gesture receiver gone, stopping button monitor");
                    break;
                }
            }
        }

        if !self.decoder.is_idle() {
            log::debug!("Unfinished gesture discarded");
            self.decoder.reset();
        }
        source.close();
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}
