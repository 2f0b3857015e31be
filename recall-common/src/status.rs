//! Source ingestion status state machine
//!
//! PENDING → PROCESSING → COMPLETED | FAILED
//!
//! COMPLETED marks the end of the extraction stage. Generation failing
//! afterwards moves COMPLETED → FAILED; nothing ever leaves FAILED.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Persisted status of one ingestion job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceStatus {
    /// Created, no stage has started
    Pending,
    /// Extraction running
    Processing,
    /// Extraction finished; generation may follow
    Completed,
    /// Terminal failure, see the error log
    Failed,
}

impl SourceStatus {
    /// Database/text representation
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Pending => "PENDING",
            SourceStatus::Processing => "PROCESSING",
            SourceStatus::Completed => "COMPLETED",
            SourceStatus::Failed => "FAILED",
        }
    }

    /// Whether `self → next` is a legal transition
    pub fn can_transition_to(self, next: SourceStatus) -> bool {
        use SourceStatus::{Completed, Failed, Pending, Processing};
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Failed)
        )
    }

    /// FAILED is the only state with no outgoing transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, SourceStatus::Failed)
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(SourceStatus::Pending),
            "PROCESSING" => Ok(SourceStatus::Processing),
            "COMPLETED" => Ok(SourceStatus::Completed),
            "FAILED" => Ok(SourceStatus::Failed),
            other => Err(Error::InvalidInput(format!("Unknown source status: {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(SourceStatus::Pending.can_transition_to(SourceStatus::Processing));
        assert!(SourceStatus::Processing.can_transition_to(SourceStatus::Completed));
        assert!(SourceStatus::Processing.can_transition_to(SourceStatus::Failed));
        assert!(SourceStatus::Completed.can_transition_to(SourceStatus::Failed));
    }

    #[test]
    fn test_backward_and_skipping_transitions_rejected() {
        assert!(!SourceStatus::Processing.can_transition_to(SourceStatus::Pending));
        assert!(!SourceStatus::Completed.can_transition_to(SourceStatus::Processing));
        assert!(!SourceStatus::Pending.can_transition_to(SourceStatus::Completed));
        assert!(!SourceStatus::Failed.can_transition_to(SourceStatus::Completed));
        assert!(!SourceStatus::Failed.can_transition_to(SourceStatus::Failed));
    }

    #[test]
    fn test_round_trip_through_text() {
        for status in [
            SourceStatus::Pending,
            SourceStatus::Processing,
            SourceStatus::Completed,
            SourceStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SourceStatus>().unwrap(), status);
        }
        assert!("DONE".parse::<SourceStatus>().is_err());
    }

    #[test]
    fn test_serde_uses_uppercase() {
        let json = serde_json::to_string(&SourceStatus::Processing).unwrap();
        assert_eq!(json, "\"PROCESSING\"");
    }
}
