//! Virtual terminal identifiers.
//!
//! The kiosk manages a bounded set of Linux virtual consoles, `tty1` through
//! `tty12`. [`TerminalId`] is the only way the rest of the crate names one,
//! so an out-of-range terminal cannot reach the unit manager.

use crate::error::{KioskError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest virtual terminal managed by the kiosk.
pub const MAX_TERMINALS: u8 = 12;

/// A virtual terminal in `1..=MAX_TERMINALS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TerminalId(u8);

impl TerminalId {
    /// Create a terminal id, rejecting numbers outside the managed range.
    pub fn new(number: u8) -> Result<Self> {
        if (1..=MAX_TERMINALS).contains(&number) {
            Ok(Self(number))
        } else {
            Err(KioskError::validation(format!(
                "terminal {} is out of range (tty1-tty{})",
                number, MAX_TERMINALS
            )))
        }
    }

    /// Terminal number, e.g. `3` for `tty3`.
    pub const fn number(self) -> u8 {
        self.0
    }

    /// Device name without `/dev/`, e.g. `tty3`.
    pub fn device_name(self) -> String {
        format!("tty{}", self.0)
    }

    /// systemd getty instance for this terminal, e.g. `getty@tty3.service`.
    pub fn getty_unit(self) -> String {
        format!("getty@tty{}.service", self.0)
    }

    /// Every managed terminal in ascending order.
    pub fn all() -> impl Iterator<Item = TerminalId> {
        (1..=MAX_TERMINALS).map(TerminalId)
    }

    /// Identify the terminal attached to a device path such as `/dev/tty3`.
    pub fn from_device_path(path: &str) -> Option<Self> {
        path.strip_prefix("/dev/").unwrap_or(path).parse().ok()
    }
}

impl fmt::Display for TerminalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tty{}", self.0)
    }
}

impl FromStr for TerminalId {
    type Err = KioskError;

    /// Accepts `tty3` or a bare `3`.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed.strip_prefix("tty").unwrap_or(trimmed);
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(KioskError::validation(format!(
                "invalid terminal identifier '{}' (expected ttyN or N)",
                s
            )));
        }
        let number: u8 = digits.parse().map_err(|_| {
            KioskError::validation(format!("terminal '{}' is out of range", s))
        })?;
        Self::new(number)
    }
}

impl TryFrom<String> for TerminalId {
    type Error = KioskError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TerminalId> for String {
    fn from(id: TerminalId) -> Self {
        id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!("tty3".parse::<TerminalId>().unwrap().number(), 3);
        assert_eq!("12".parse::<TerminalId>().unwrap().number(), 12);
        assert_eq!(" tty1 ".parse::<TerminalId>().unwrap().number(), 1);
    }

    #[test]
    fn test_out_of_range() {
        assert!("tty0".parse::<TerminalId>().is_err());
        assert!("tty13".parse::<TerminalId>().is_err());
        assert!("999".parse::<TerminalId>().is_err());
        assert!(TerminalId::new(0).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        for bad in ["", "tty", "ttyS0", "pts/1", "-1", "tty 3"] {
            let err = bad.parse::<TerminalId>().unwrap_err();
            assert!(err.is_validation(), "{bad} should be a validation error");
        }
    }

    #[test]
    fn test_names() {
        let id = TerminalId::new(5).unwrap();
        assert_eq!(id.to_string(), "tty5");
        assert_eq!(id.device_name(), "tty5");
        assert_eq!(id.getty_unit(), "getty@tty5.service");
    }

    #[test]
    fn test_all_is_bounded_set() {
        let all: Vec<u8> = TerminalId::all().map(|t| t.number()).collect();
        assert_eq!(all, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn test_from_device_path() {
        assert_eq!(
            TerminalId::from_device_path("/dev/tty7"),
            Some(TerminalId::new(7).unwrap())
        );
        assert_eq!(TerminalId::from_device_path("/dev/pts/0"), None);
    }

    #[test]
    fn test_serde_as_string() {
        let id = TerminalId::new(9).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"tty9\"");
        let back: TerminalId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<TerminalId>("\"tty40\"").is_err());
    }
}
