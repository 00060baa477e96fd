use std::sync::{Mutex, RwLock};

use {relaybot_routing::Target, tracing::debug};

use crate::{Error, Result};

/// Lifecycle of a single backend.
///
/// `Disconnected → Connecting → Connected → Joined → Reading → Draining → Closed`.
/// Any state may short-circuit to `Closed` on failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BackendState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Joined,
    Reading,
    Draining,
    Closed,
}

impl BackendState {
    /// Whether `self → next` is a legal step.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use BackendState::*;
        matches!(
            (self, next),
            (_, Closed)
                | (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, Joined)
                | (Joined, Joined)
                | (Joined, Reading)
                | (Reading, Draining)
        )
    }

    /// A session exists and may carry writes.
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connected | Self::Joined | Self::Reading)
    }
}

impl std::fmt::Display for BackendState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Joined => "joined",
            Self::Reading => "reading",
            Self::Draining => "draining",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// State shared by every connector: its name, the rooms it was told to
/// join, and where it is in its lifecycle.
#[derive(Debug)]
pub struct BackendBase {
    name: String,
    targets: RwLock<Vec<Target>>,
    state: Mutex<BackendState>,
}

impl BackendBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            targets: RwLock::new(Vec::new()),
            state: Mutex::new(BackendState::Disconnected),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BackendState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail with [`Error::NotConnected`] unless a session can carry writes.
    pub fn ensure_live(&self) -> Result<()> {
        if self.state().is_live() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&self, next: BackendState) -> Result<BackendState> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let from = *state;
        if !from.can_transition_to(next) {
            return Err(Error::InvalidState { from, to: next });
        }
        *state = next;
        if from != next {
            debug!(backend = %self.name, %from, to = %next, "backend state changed");
        }
        Ok(from)
    }

    /// Record the joined rooms. Targets for other backends are ignored and
    /// duplicates are kept once.
    pub fn set_targets(&self, targets: impl IntoIterator<Item = Target>) {
        let mut current = self.targets.write().unwrap_or_else(|e| e.into_inner());
        current.clear();
        for target in targets {
            if target.backend != self.name {
                debug!(backend = %self.name, %target, "ignoring target for another backend");
                continue;
            }
            if !current.contains(&target) {
                current.push(target);
            }
        }
    }

    pub fn targets(&self) -> Vec<Target> {
        self.targets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Map a protocol room identifier back to a known target.
    pub fn target_for_room(&self, room: &str) -> Result<Target> {
        self.targets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|t| t.room == room)
            .cloned()
            .ok_or_else(|| Error::TargetNotFound {
                room: room.to_string(),
            })
    }
}
