//! Firmware configuration: timing policy, file names and record handling.

use heapless::Vec;

use crate::drivers::serial::SerialConfig;
use crate::error::ConfigError;

/// Bytes in one record, on disk after padding and on the wire
pub const RECORD_CAPACITY: usize = 60;

/// Upper bound on configured candidate file names
pub const MAX_CANDIDATES: usize = 8;

/// File names tried in order on every mount
pub const DEFAULT_CANDIDATES: [&str; 4] = ["mailbox.csv", "Mailbox.csv", "mailboxes.csv", "Mailboxes.csv"];

/// Blocking delay provider. The firmware only ever suspends here.
pub trait Delay {
    fn delay_ms(&mut self, ms: u32);
}

/// Delays between the steps of an attach cycle, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Wait before every bus poll
    pub poll_interval_ms: u32,
    /// Wait after each successful attach stage
    pub attach_settle_ms: u32,
    /// Wait after a completed cycle before polling again
    pub cooldown_ms: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self { poll_interval_ms: 1000, attach_settle_ms: 1000, cooldown_ms: 5000 }
    }
}

/// What to do with a record that reaches capacity before its terminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Keep the first `RECORD_CAPACITY` bytes, drop the rest up to the terminator
    #[default]
    Truncate,
    /// Skip the whole record
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub timing: Timing,
    pub serial: SerialConfig,
    pub overflow: OverflowPolicy,
    candidates: Vec<&'static str, MAX_CANDIDATES>,
}

impl Config {
    pub fn candidates(&self) -> &[&'static str] {
        &self.candidates
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn with_serial(mut self, serial: SerialConfig) -> Self {
        self.serial = serial;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Replace the candidate file names. Order is preserved.
    pub fn with_candidates(mut self, names: &[&'static str]) -> Result<Self, ConfigError> {
        if names.is_empty() {
            return Err(ConfigError::NoCandidates);
        }
        self.candidates = Vec::from_slice(names).map_err(|_| ConfigError::TooManyCandidates)?;
        Ok(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut candidates = Vec::new();
        for name in DEFAULT_CANDIDATES {
            // DEFAULT_CANDIDATES is shorter than MAX_CANDIDATES
            let _ = candidates.push(name);
        }
        Self {
            timing: Timing::default(),
            serial: SerialConfig::default(),
            overflow: OverflowPolicy::default(),
            candidates,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.candidates(), &DEFAULT_CANDIDATES[..]);
        assert_eq!(config.timing.poll_interval_ms, 1000);
        assert_eq!(config.timing.attach_settle_ms, 1000);
        assert_eq!(config.timing.cooldown_ms, 5000);
        assert_eq!(config.overflow, OverflowPolicy::Truncate);
        assert_eq!(config.serial.baud_rate, 115_200);
    }

    #[test]
    fn test_with_candidates() {
        let config = Config::default().with_candidates(&["names.txt"]).unwrap();
        assert_eq!(config.candidates(), &["names.txt"]);

        let err = Config::default().with_candidates(&[]).unwrap_err();
        assert_eq!(err, ConfigError::NoCandidates);

        let many = ["a"; MAX_CANDIDATES + 1];
        let err = Config::default().with_candidates(&many).unwrap_err();
        assert_eq!(err, ConfigError::TooManyCandidates);
    }
}
