//! Runout classification results.

use serde::Serialize;

/// What the engine did about a feed sensor dropping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunoutOutcome {
    /// Not printing; the drop is an ordinary unload
    NotPrinting,
    /// A runout for this lane is already being handled
    AlreadyInProgress,
    /// Target feeds the same extruder; the lane is flagged and the host's
    /// infinite-spool path takes over
    SameExtruder { target: String },
    /// One handoff to a lane on another extruder was issued
    CrossExtruder { target: String },
    /// No usable target; the extruder's own runout handling was invoked
    NativeRunout { extruder: Option<String> },
    /// Extruders could not be resolved; the printer was paused
    Paused { reason: String },
}

impl RunoutOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunoutOutcome::NotPrinting => "not_printing",
            RunoutOutcome::AlreadyInProgress => "already_in_progress",
            RunoutOutcome::SameExtruder { .. } => "same_extruder",
            RunoutOutcome::CrossExtruder { .. } => "cross_extruder",
            RunoutOutcome::NativeRunout { .. } => "native_runout",
            RunoutOutcome::Paused { .. } => "paused",
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            RunoutOutcome::SameExtruder { target } | RunoutOutcome::CrossExtruder { target } => {
                Some(target)
            }
            _ => None,
        }
    }
}

impl std::fmt::Display for RunoutOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.target() {
            Some(target) => write!(f, "{} -> {}", self.as_str(), target),
            None => f.write_str(self.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_display() {
        let outcome = RunoutOutcome::CrossExtruder {
            target: "lane2".to_string(),
        };
        assert_eq!(outcome.to_string(), "cross_extruder -> lane2");
        assert_eq!(RunoutOutcome::NotPrinting.to_string(), "not_printing");
    }

    #[test]
    fn test_outcome_serializes_with_tag() {
        let json = serde_json::to_value(RunoutOutcome::SameExtruder {
            target: "lane5".to_string(),
        })
        .unwrap();
        assert_eq!(json["outcome"], "same_extruder");
        assert_eq!(json["target"], "lane5");
    }
}
