//! Port link state.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Administrative state, set by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminState {
    #[default]
    Down,
    Up,
}

impl AdminState {
    pub const fn is_up(&self) -> bool {
        matches!(self, AdminState::Up)
    }
}

impl From<bool> for AdminState {
    fn from(up: bool) -> Self {
        if up {
            AdminState::Up
        } else {
            AdminState::Down
        }
    }
}

impl fmt::Display for AdminState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminState::Up => write!(f, "up"),
            AdminState::Down => write!(f, "down"),
        }
    }
}

impl FromStr for AdminState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(AdminState::Up),
            "down" => Ok(AdminState::Down),
            _ => Err(ParseError::InvalidState(s.to_string())),
        }
    }
}

/// Operational state, derived from the underlying link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperState {
    #[default]
    Down,
    Up,
}

impl OperState {
    pub const fn is_up(&self) -> bool {
        matches!(self, OperState::Up)
    }
}

impl From<bool> for OperState {
    fn from(up: bool) -> Self {
        if up {
            OperState::Up
        } else {
            OperState::Down
        }
    }
}

impl fmt::Display for OperState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperState::Up => write!(f, "up"),
            OperState::Down => write!(f, "down"),
        }
    }
}

impl FromStr for OperState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "up" => Ok(OperState::Up),
            "down" => Ok(OperState::Down),
            _ => Err(ParseError::InvalidState(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip_text() {
        assert_eq!("UP".parse::<AdminState>().unwrap(), AdminState::Up);
        assert_eq!(OperState::Down.to_string(), "down");
        assert!("sideways".parse::<OperState>().is_err());
    }

    #[test]
    fn test_state_defaults_down() {
        assert!(!AdminState::default().is_up());
        assert!(!OperState::default().is_up());
    }
}
