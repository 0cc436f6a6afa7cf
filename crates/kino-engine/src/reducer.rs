//! Player state reducer
//!
//! `reduce` is a pure transition over an immutable [`PlayerState`] snapshot.
//! Actions with no observable effect hand back the same `Arc`, so consumers
//! can skip work with `Arc::ptr_eq` instead of comparing fields.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

/// Smallest time or volume delta that counts as a change
pub const EPSILON: f64 = 0.01;

/// Observable player state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub playing: bool,
    pub paused: bool,
    pub current_time: f64,
    pub duration: f64,
    pub volume: f64,
    pub muted: bool,
    /// Active quality label, "auto" until an engine reports a level
    pub quality: String,
    pub loading: bool,
    pub error: Option<String>,
    pub play_count: u32,
    pub quality_change_count: u32,
    /// Seconds of media played, accumulated on pause
    pub total_watch_time: f64,
    /// Seconds spent loading
    pub buffering_time: f64,
    /// Media time at the last play
    pub play_started_at: Option<f64>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            playing: false,
            paused: true,
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            muted: false,
            quality: "auto".to_string(),
            loading: false,
            error: None,
            play_count: 0,
            quality_change_count: 0,
            total_watch_time: 0.0,
            buffering_time: 0.0,
            play_started_at: None,
        }
    }
}

/// State transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerAction {
    Play,
    Pause,
    TimeUpdate { current_time: f64, duration: f64 },
    QualityChange { label: String },
    VolumeChange { volume: f64, muted: bool },
    LoadStart,
    LoadEnd { buffering_time: f64 },
    Error { message: String },
    Reset,
}

fn changed(previous: f64, next: f64) -> bool {
    (next - previous).abs() >= EPSILON
}

/// Apply `action` to `state`
pub fn reduce(state: &Arc<PlayerState>, action: &PlayerAction) -> Arc<PlayerState> {
    match action {
        PlayerAction::Play => {
            if state.playing {
                return Arc::clone(state);
            }
            Arc::new(PlayerState {
                playing: true,
                paused: false,
                play_count: state.play_count + 1,
                play_started_at: Some(state.current_time),
                ..PlayerState::clone(state)
            })
        }

        PlayerAction::Pause => {
            if !state.playing {
                return Arc::clone(state);
            }
            let watched = state
                .play_started_at
                .map_or(0.0, |started| (state.current_time - started).max(0.0));
            Arc::new(PlayerState {
                playing: false,
                paused: true,
                total_watch_time: state.total_watch_time + watched,
                play_started_at: None,
                ..PlayerState::clone(state)
            })
        }

        PlayerAction::TimeUpdate {
            current_time,
            duration,
        } => {
            let duration = if duration.is_finite() {
                *duration
            } else {
                state.duration
            };
            if !changed(state.current_time, *current_time) && !changed(state.duration, duration) {
                return Arc::clone(state);
            }
            Arc::new(PlayerState {
                current_time: *current_time,
                duration,
                ..PlayerState::clone(state)
            })
        }

        PlayerAction::QualityChange { label } => {
            if state.quality == *label {
                return Arc::clone(state);
            }
            Arc::new(PlayerState {
                quality: label.clone(),
                quality_change_count: state.quality_change_count + 1,
                ..PlayerState::clone(state)
            })
        }

        PlayerAction::VolumeChange { volume, muted } => {
            let volume = volume.clamp(0.0, 1.0);
            let volume_changed = changed(state.volume, volume);
            if !volume_changed && state.muted == *muted {
                return Arc::clone(state);
            }
            Arc::new(PlayerState {
                volume: if volume_changed { volume } else { state.volume },
                muted: *muted,
                ..PlayerState::clone(state)
            })
        }

        PlayerAction::LoadStart => {
            if state.loading && state.error.is_none() {
                return Arc::clone(state);
            }
            Arc::new(PlayerState {
                loading: true,
                error: None,
                ..PlayerState::clone(state)
            })
        }

        PlayerAction::LoadEnd { buffering_time } => {
            let increment = buffering_time.max(0.0);
            if increment == 0.0 && !state.loading {
                return Arc::clone(state);
            }
            Arc::new(PlayerState {
                loading: false,
                buffering_time: state.buffering_time + increment,
                ..PlayerState::clone(state)
            })
        }

        PlayerAction::Error { message } => {
            if !state.loading && state.error.as_deref() == Some(message.as_str()) {
                return Arc::clone(state);
            }
            Arc::new(PlayerState {
                error: Some(message.clone()),
                loading: false,
                ..PlayerState::clone(state)
            })
        }

        PlayerAction::Reset => Arc::new(PlayerState::default()),
    }
}

/// Holder of the current snapshot
pub struct PlayerStore {
    state: Mutex<Arc<PlayerState>>,
    state_tx: watch::Sender<Arc<PlayerState>>,
}

impl Default for PlayerStore {
    fn default() -> Self {
        Self::new(PlayerState::default())
    }
}

impl PlayerStore {
    pub fn new(initial: PlayerState) -> Self {
        let initial = Arc::new(initial);
        let (state_tx, _) = watch::channel(initial.clone());
        Self {
            state: Mutex::new(initial),
            state_tx,
        }
    }

    pub fn state(&self) -> Arc<PlayerState> {
        self.state.lock().clone()
    }

    /// Subscribe to new snapshots. No-op actions are not published.
    pub fn subscribe(&self) -> watch::Receiver<Arc<PlayerState>> {
        self.state_tx.subscribe()
    }

    /// Apply an action. Returns true when a new snapshot was produced.
    pub fn dispatch(&self, action: &PlayerAction) -> bool {
        let next = {
            let mut state = self.state.lock();
            let next = reduce(&state, action);
            if Arc::ptr_eq(&next, &state) {
                return false;
            }
            *state = next.clone();
            next
        };
        self.state_tx.send_replace(next);
        true
    }
}
