//! Circuit Breaker / Gateway Mode (component F): a shared OBSERVE/ENFORCE
//! selector with a single compare-and-set mutator and relaxed reads.

#![deny(unsafe_code)]

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

const OBSERVE: u8 = 0;
const ENFORCE: u8 = 1;

/// The two gateway operating modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    /// Decisions are computed and audited but responses are rewritten to
    /// look like `ALLOW`.
    Observe,
    /// Decisions are returned to the caller as computed.
    Enforce,
}

impl Mode {
    fn from_raw(raw: u8) -> Self {
        if raw == ENFORCE {
            Self::Enforce
        } else {
            Self::Observe
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            Self::Observe => OBSERVE,
            Self::Enforce => ENFORCE,
        }
    }

    /// Parse a mode from the `?mode=` query value or request body string.
    ///
    /// # Errors
    /// Returns `Err` with the rejected string when it is neither
    /// `"OBSERVE"` nor `"ENFORCE"` (case-insensitive).
    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.to_ascii_uppercase().as_str() {
            "OBSERVE" => Ok(Self::Observe),
            "ENFORCE" => Ok(Self::Enforce),
            other => Err(other.to_string()),
        }
    }
}

/// Hook for propagating a mode change to other gateway instances sharing
/// a cache. The cache itself is an out-of-scope external collaborator;
/// this trait is the seam a deployment wires it in through.
pub trait ModeBroadcast: Send + Sync {
    /// Publish a mode change to peers.
    fn publish(&self, mode: Mode);
}

/// No-op broadcaster: the default for a single-instance deployment.
#[derive(Default)]
pub struct NoopBroadcast;

impl ModeBroadcast for NoopBroadcast {
    fn publish(&self, _mode: Mode) {}
}

/// Process-shared gateway mode. Every clone of [`GatewayMode`] (held, for
/// example, by each clone of a `GatewayService`) observes the same
/// underlying atomic.
#[derive(Clone)]
pub struct GatewayMode {
    raw: Arc<AtomicU8>,
}

impl GatewayMode {
    /// Construct a mode cell initialized from configuration.
    #[must_use]
    pub fn new(initial: Mode) -> Self {
        Self { raw: Arc::new(AtomicU8::new(initial.to_raw())) }
    }

    /// Read the current mode. Readers never block.
    #[must_use]
    pub fn get(&self) -> Mode {
        Mode::from_raw(self.raw.load(Ordering::Relaxed))
    }

    /// Set the mode and notify a broadcaster. A single `store` suffices
    /// as the mutator since there is no read-modify-write dependency
    /// between the old and new value.
    pub fn set(&self, mode: Mode, broadcast: &dyn ModeBroadcast) {
        self.raw.store(mode.to_raw(), Ordering::Relaxed);
        broadcast.publish(mode);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_constructed_value() {
        let mode = GatewayMode::new(Mode::Observe);
        assert_eq!(mode.get(), Mode::Observe);
    }

    #[test]
    fn set_is_visible_across_clones() {
        let mode = GatewayMode::new(Mode::Observe);
        let clone = mode.clone();
        mode.set(Mode::Enforce, &NoopBroadcast);
        assert_eq!(clone.get(), Mode::Enforce);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Mode::parse("enforce").unwrap(), Mode::Enforce);
        assert_eq!(Mode::parse("OBSERVE").unwrap(), Mode::Observe);
        assert!(Mode::parse("maybe").is_err());
    }

    struct RecordingBroadcast(std::sync::Mutex<Vec<Mode>>);

    impl ModeBroadcast for RecordingBroadcast {
        fn publish(&self, mode: Mode) {
            self.0.lock().unwrap().push(mode);
        }
    }

    #[test]
    fn set_notifies_broadcaster() {
        let mode = GatewayMode::new(Mode::Observe);
        let broadcast = RecordingBroadcast(std::sync::Mutex::new(vec![]));
        mode.set(Mode::Enforce, &broadcast);
        assert_eq!(broadcast.0.lock().unwrap().as_slice(), [Mode::Enforce]);
    }
}
