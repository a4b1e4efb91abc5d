//! Connection upgrade state machine.
//!
//! # States
//! - Unknown: nothing negotiated yet (initial)
//! - BaselineOnly: peer speaks plain binary only (terminal)
//! - Enhanced: every message carries a trace header (terminal)
//!
//! # State Transitions
//! ```text
//! Unknown → BaselineOnly: probe rejected or answered with another method name
//! Unknown → Enhanced:     probe answered with an upgrade reply (client),
//!                         or probe reply written (server)
//! ```
//!
//! # Design Decisions
//! - Per connection, never shared between connections
//! - Transition is a compare-and-set from Unknown, so it happens at most once

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Negotiated wire mode of a connection.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpgradeState {
    Unknown = 0,
    BaselineOnly = 1,
    Enhanced = 2,
}

impl From<u8> for UpgradeState {
    fn from(val: u8) -> Self {
        match val {
            1 => UpgradeState::BaselineOnly,
            2 => UpgradeState::Enhanced,
            _ => UpgradeState::Unknown,
        }
    }
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpgradeState::Unknown => "unknown",
            UpgradeState::BaselineOnly => "baseline",
            UpgradeState::Enhanced => "enhanced",
        };
        f.write_str(name)
    }
}

/// Upgrade state owned by one connection.
#[derive(Debug, Default)]
pub struct ConnectionState {
    state: AtomicU8,
}

impl ConnectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> UpgradeState {
        UpgradeState::from(self.state.load(Ordering::Acquire))
    }

    pub fn is_resolved(&self) -> bool {
        self.get() != UpgradeState::Unknown
    }

    pub fn is_enhanced(&self) -> bool {
        self.get() == UpgradeState::Enhanced
    }

    /// Move out of `Unknown`. Fails with the current state if already resolved.
    pub fn resolve(&self, to: UpgradeState) -> Result<(), UpgradeState> {
        debug_assert_ne!(to, UpgradeState::Unknown, "cannot resolve back to Unknown");
        self.state
            .compare_exchange(
                UpgradeState::Unknown as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(drop)
            .map_err(UpgradeState::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn resolves_once() {
        let state = ConnectionState::new();
        assert_eq!(state.get(), UpgradeState::Unknown);
        assert!(!state.is_resolved());

        assert_eq!(state.resolve(UpgradeState::Enhanced), Ok(()));
        assert!(state.is_enhanced());

        assert_eq!(
            state.resolve(UpgradeState::BaselineOnly),
            Err(UpgradeState::Enhanced)
        );
        assert_eq!(state.get(), UpgradeState::Enhanced);
    }

    #[test]
    fn concurrent_resolvers_single_winner() {
        let state = Arc::new(ConnectionState::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    let to = if i % 2 == 0 {
                        UpgradeState::Enhanced
                    } else {
                        UpgradeState::BaselineOnly
                    };
                    state.resolve(to).is_ok()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(state.is_resolved());
    }
}
