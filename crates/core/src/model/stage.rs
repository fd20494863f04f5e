//! Pipeline stages and failure classification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Position of an episode in the processing pipeline.
///
/// Stages are totally ordered; a later stage means more artifacts exist.
/// The stage is never stored, it is derived from the artifact paths of an
/// [`Episode`](super::Episode) by [`Episode::state`](super::Episode::state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Discovered,
    Downloaded,
    Downsampled,
    Transcribed,
    Cleaned,
    Summarized,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::Discovered,
        Stage::Downloaded,
        Stage::Downsampled,
        Stage::Transcribed,
        Stage::Cleaned,
        Stage::Summarized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Discovered => "discovered",
            Stage::Downloaded => "downloaded",
            Stage::Downsampled => "downsampled",
            Stage::Transcribed => "transcribed",
            Stage::Cleaned => "cleaned",
            Stage::Summarized => "summarized",
        }
    }

    /// The stage that follows this one, if any.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Discovered => Some(Stage::Downloaded),
            Stage::Downloaded => Some(Stage::Downsampled),
            Stage::Downsampled => Some(Stage::Transcribed),
            Stage::Transcribed => Some(Stage::Cleaned),
            Stage::Cleaned => Some(Stage::Summarized),
            Stage::Summarized => None,
        }
    }

    /// Whether the pipeline has nothing left to do for this stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Summarized)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown stage or failure kind name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what}: {value}")]
pub struct ParseNameError {
    what: &'static str,
    value: String,
}

impl ParseNameError {
    pub(crate) fn new(what: &'static str, value: &str) -> Self {
        Self {
            what,
            value: value.to_string(),
        }
    }
}

impl FromStr for Stage {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseNameError::new("stage", s))
    }
}

/// Whether a failed processing step may be retried automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Safe to retry automatically (network blips, lock contention, timeouts).
    Transient,
    /// Needs manual intervention before the episode is retried.
    Fatal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::Fatal => "fatal",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "transient" => Ok(FailureKind::Transient),
            "fatal" => Ok(FailureKind::Fatal),
            _ => Err(ParseNameError::new("failure kind", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order_matches_pipeline() {
        for pair in Stage::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
        assert_eq!(Stage::Summarized.next(), None);
        assert!(Stage::Summarized.is_terminal());
        assert!(!Stage::Cleaned.is_terminal());
    }

    #[test]
    fn test_stage_parse() {
        assert_eq!("cleaned".parse::<Stage>().unwrap(), Stage::Cleaned);
        assert_eq!(" Downloaded ".parse::<Stage>().unwrap(), Stage::Downloaded);
        assert!("uploaded".parse::<Stage>().is_err());
    }

    #[test]
    fn test_stage_serde_snake_case() {
        let json = serde_json::to_string(&Stage::Downsampled).unwrap();
        assert_eq!(json, "\"downsampled\"");
    }

    #[test]
    fn test_failure_kind_parse() {
        assert_eq!("FATAL".parse::<FailureKind>().unwrap(), FailureKind::Fatal);
        assert_eq!(
            "transient".parse::<FailureKind>().unwrap(),
            FailureKind::Transient
        );
        assert!("sometimes".parse::<FailureKind>().is_err());
        assert!(FailureKind::Transient.is_retryable());
        assert!(!FailureKind::Fatal.is_retryable());
    }
}
