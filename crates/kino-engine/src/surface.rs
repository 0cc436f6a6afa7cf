//! Playback surface bridge
//!
//! The engine never touches the real media element. It issues
//! [`SurfaceCommand`]s that the host applies, and the host reports element
//! events back through [`PlaybackSurface::dispatch`].
//!
//! ```text
//!   engine ──SurfaceCommand──▶ host media element
//!   engine ◀──SurfaceEvent─── host media element
//! ```

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;
use uuid::Uuid;

const EVENT_CAPACITY: usize = 64;

/// Decryption key container bound to the surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaKeys {
    pub id: Uuid,
    /// Key system the container was created for
    pub key_system: String,
}

impl MediaKeys {
    pub fn new(key_system: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key_system: key_system.into(),
        }
    }
}

/// Instruction for the host media element
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceCommand {
    SetSource(String),
    Load,
    ClearSource,
    Play,
    Pause,
    SetVolume(f64),
    SetMuted(bool),
    SetMediaKeys(Option<MediaKeys>),
}

/// Notification from the host media element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SurfaceEvent {
    /// First frame decoded
    LoadedData,
    /// Enough data to start playback
    CanPlay,
    /// Decode or network error on the element
    Error { code: u16, message: String },
    TimeUpdate { current_time: f64, duration: f64 },
    Ended,
}

#[derive(Debug, Clone)]
struct SurfaceState {
    source: Option<String>,
    media_keys: Option<MediaKeys>,
    volume: f64,
    muted: bool,
    paused: bool,
}

impl Default for SurfaceState {
    fn default() -> Self {
        Self {
            source: None,
            media_keys: None,
            volume: 1.0,
            muted: false,
            paused: true,
        }
    }
}

/// The single playback surface owned by the current load generation
pub struct PlaybackSurface {
    commands: mpsc::UnboundedSender<SurfaceCommand>,
    events: broadcast::Sender<SurfaceEvent>,
    state: RwLock<SurfaceState>,
}

impl PlaybackSurface {
    /// Create a surface and the command stream the host must drain
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SurfaceCommand>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let surface = Arc::new(Self {
            commands,
            events,
            state: RwLock::new(SurfaceState::default()),
        });
        (surface, command_rx)
    }

    /// Subscribe to element events. Subscribe before issuing the command
    /// whose outcome you wait for.
    pub fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.events.subscribe()
    }

    /// Report an element event (host side)
    pub fn dispatch(&self, event: SurfaceEvent) {
        trace!(?event, "Surface event");
        // No subscribers is fine: nobody is waiting on a load
        let _ = self.events.send(event);
    }

    pub fn set_source(&self, source: &str) {
        self.state.write().source = Some(source.to_string());
        self.send(SurfaceCommand::SetSource(source.to_string()));
    }

    pub fn load(&self) {
        self.send(SurfaceCommand::Load);
    }

    /// Detach any source (`removeAttribute("src"); load()` on the web)
    pub fn clear_source(&self) {
        let had_source = self.state.write().source.take().is_some();
        if had_source {
            self.send(SurfaceCommand::ClearSource);
        }
    }

    pub fn play(&self) {
        self.state.write().paused = false;
        self.send(SurfaceCommand::Play);
    }

    pub fn pause(&self) {
        self.state.write().paused = true;
        self.send(SurfaceCommand::Pause);
    }

    pub fn set_volume(&self, volume: f64) {
        let volume = volume.clamp(0.0, 1.0);
        self.state.write().volume = volume;
        self.send(SurfaceCommand::SetVolume(volume));
    }

    pub fn set_muted(&self, muted: bool) {
        self.state.write().muted = muted;
        self.send(SurfaceCommand::SetMuted(muted));
    }

    /// Bind (or with `None`, unbind) the decryption key container
    pub fn set_media_keys(&self, keys: Option<MediaKeys>) {
        self.state.write().media_keys = keys.clone();
        self.send(SurfaceCommand::SetMediaKeys(keys));
    }

    pub fn source(&self) -> Option<String> {
        self.state.read().source.clone()
    }

    pub fn media_keys(&self) -> Option<MediaKeys> {
        self.state.read().media_keys.clone()
    }

    pub fn volume(&self) -> f64 {
        self.state.read().volume
    }

    pub fn muted(&self) -> bool {
        self.state.read().muted
    }

    pub fn paused(&self) -> bool {
        self.state.read().paused
    }

    fn send(&self, command: SurfaceCommand) {
        if self.commands.send(command).is_err() {
            trace!("Surface host detached, command dropped");
        }
    }
}
