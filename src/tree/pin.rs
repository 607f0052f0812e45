use serde::{Deserialize, Serialize};
use std::fmt;

/// Tri-state pin annotation
///
/// Serialized as `0` (unpinned), `1` (partially pinned) or `2` (pinned).
/// Leaves only ever store `Unpinned` or `Pinned`; `PartiallyPinned` is the
/// derived read of a group whose children disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PinState {
    #[default]
    Unpinned,
    PartiallyPinned,
    Pinned,
}

impl PinState {
    pub fn is_pinned(self) -> bool {
        self == PinState::Pinned
    }

    /// Flip between pinned and unpinned; a partial state toggles to pinned
    pub fn toggled(self) -> Self {
        match self {
            PinState::Pinned => PinState::Unpinned,
            PinState::Unpinned | PinState::PartiallyPinned => PinState::Pinned,
        }
    }

    /// Combine child states into the derived state of their parent group
    pub fn combine(states: impl IntoIterator<Item = PinState>) -> Option<PinState> {
        let mut combined: Option<PinState> = None;
        for state in states {
            combined = Some(match combined {
                None => state,
                Some(current) if current == state => current,
                Some(_) => return Some(PinState::PartiallyPinned),
            });
        }
        combined
    }
}

impl From<PinState> for u8 {
    fn from(state: PinState) -> Self {
        match state {
            PinState::Unpinned => 0,
            PinState::PartiallyPinned => 1,
            PinState::Pinned => 2,
        }
    }
}

impl TryFrom<u8> for PinState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PinState::Unpinned),
            1 => Ok(PinState::PartiallyPinned),
            2 => Ok(PinState::Pinned),
            other => Err(format!("invalid pin_state {other}, expected 0, 1 or 2")),
        }
    }
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PinState::Unpinned => "unpinned",
            PinState::PartiallyPinned => "partially pinned",
            PinState::Pinned => "pinned",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_uniform_states() {
        assert_eq!(
            PinState::combine([PinState::Pinned, PinState::Pinned]),
            Some(PinState::Pinned)
        );
        assert_eq!(
            PinState::combine([PinState::Unpinned, PinState::Unpinned]),
            Some(PinState::Unpinned)
        );
    }

    #[test]
    fn test_combine_mixed_is_partial() {
        assert_eq!(
            PinState::combine([PinState::Pinned, PinState::Unpinned, PinState::Pinned]),
            Some(PinState::PartiallyPinned)
        );
        // A partial child makes the parent partial even if it is the only one
        assert_eq!(
            PinState::combine([PinState::PartiallyPinned]),
            Some(PinState::PartiallyPinned)
        );
    }

    #[test]
    fn test_combine_empty() {
        assert_eq!(PinState::combine([]), None);
    }

    #[test]
    fn test_wire_values() {
        assert_eq!(serde_json::to_string(&PinState::Pinned).unwrap(), "2");
        assert_eq!(serde_json::from_str::<PinState>("0").unwrap(), PinState::Unpinned);
        assert!(serde_json::from_str::<PinState>("7").is_err());
    }

    #[test]
    fn test_toggled() {
        assert_eq!(PinState::Pinned.toggled(), PinState::Unpinned);
        assert_eq!(PinState::PartiallyPinned.toggled(), PinState::Pinned);
    }
}
