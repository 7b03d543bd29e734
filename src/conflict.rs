//! Contextual AU suppression
//!
//! Zeroes AUs that the current context explains mechanically: mouth
//! movement while speaking, brow raise while looking up, lid and cheek
//! changes while looking down.

use crate::types::{ActionUnits, GazeStatus, MetaSignals};

pub const SPEECH_SUPPRESSED: [&str; 6] = ["AU10", "AU12", "AU15", "AU20", "AU25", "AU26"];
pub const GAZE_UP_SUPPRESSED: [&str; 3] = ["AU1", "AU2", "AU5"];
pub const GAZE_DOWN_SUPPRESSED: [&str; 3] = ["AU6", "AU7", "AU43"];

/// Codes suppressed for this context
pub fn suppressed_codes(meta: &MetaSignals) -> Vec<&'static str> {
    let mut codes = Vec::new();
    if meta.is_speaking {
        codes.extend(SPEECH_SUPPRESSED);
    }
    match meta.gaze {
        GazeStatus::ThinkingUp => codes.extend(GAZE_UP_SUPPRESSED),
        GazeStatus::ThinkingDown => codes.extend(GAZE_DOWN_SUPPRESSED),
        _ => {}
    }
    codes
}

/// Copy of `aus` with context-explained AUs set to 0
pub fn suppress(aus: &ActionUnits, meta: &MetaSignals) -> ActionUnits {
    let mut filtered = aus.clone();
    for code in suppressed_codes(meta) {
        if let Some(value) = filtered.get_mut(code) {
            *value = 0.0;
        }
    }
    filtered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aus() -> ActionUnits {
        ["AU1", "AU6", "AU12", "AU25", "AU4"]
            .iter()
            .map(|c| (c.to_string(), 0.7))
            .collect()
    }

    #[test]
    fn test_speaking_zeroes_mouth() {
        let meta = MetaSignals {
            is_speaking: true,
            ..MetaSignals::default()
        };
        let out = suppress(&aus(), &meta);
        assert_eq!(out["AU12"], 0.0);
        assert_eq!(out["AU25"], 0.0);
        assert_eq!(out["AU6"], 0.7);
        assert!(!out.contains_key("AU10"));
    }

    #[test]
    fn test_gaze_suppression() {
        let up = MetaSignals {
            gaze: GazeStatus::ThinkingUp,
            ..MetaSignals::default()
        };
        assert_eq!(suppress(&aus(), &up)["AU1"], 0.0);

        let down = MetaSignals {
            gaze: GazeStatus::ThinkingDown,
            ..MetaSignals::default()
        };
        let out = suppress(&aus(), &down);
        assert_eq!(out["AU6"], 0.0);
        assert_eq!(out["AU4"], 0.7);
    }

    #[test]
    fn test_direct_gaze_keeps_everything() {
        assert_eq!(suppress(&aus(), &MetaSignals::default()), aus());
    }
}
