//! Per-run session context
//!
//! Shared by the coordinator, the channel handlers and the shutdown path.
//! The exit flag is the only cancellation signal: once it is set, handlers
//! turn into no-ops and no new scan/connect/read cycle may start.

use crate::domain::models::UserConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug)]
pub struct Session {
    closing: AtomicBool,
    config: Mutex<UserConfig>,
}

impl Session {
    pub fn new(config: UserConfig) -> Self {
        Self {
            closing: AtomicBool::new(false),
            config: Mutex::new(config),
        }
    }

    /// True once shutdown has been requested.
    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Sets the exit flag. Returns `true` for the first caller only.
    pub fn request_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    pub fn config(&self) -> UserConfig {
        match self.config.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn update_config(&self, update: impl FnOnce(&mut UserConfig)) {
        let mut guard = match self.config.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        update(&mut guard);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ScanMode;

    #[test]
    fn test_close_is_sticky_and_first_caller_wins() {
        let session = Session::new(UserConfig::default());
        assert!(!session.is_closed());
        assert!(session.request_close());
        assert!(!session.request_close());
        assert!(session.is_closed());
    }

    #[test]
    fn test_config_update() {
        let session = Session::new(UserConfig::default());
        session.update_config(|c| {
            c.scan_period = 7;
            c.scan_mode = ScanMode::Passive;
        });
        let config = session.config();
        assert_eq!(config.scan_period, 7);
        assert_eq!(config.scan_mode, ScanMode::Passive);
        assert_eq!(config.interval_max, 100);
    }
}
