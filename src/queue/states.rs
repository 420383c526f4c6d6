use serde::{Deserialize, Serialize};
use std::fmt;

/// Job state definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Eligible for claiming by a worker
    Waiting,
    /// Claimed and currently executing
    Active,
    /// Handler returned successfully
    Completed,
    /// Handler failed and no attempts remain
    Failed,
    /// Scheduled for a future retry (or enqueued with a delay)
    Delayed,
    /// Cancelled before execution
    Cancelled,
}

impl JobState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if a worker currently holds this job
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Check if the job can still be cancelled (pre-execution only)
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Waiting | Self::Delayed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Delayed => write!(f, "delayed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "delayed" => Ok(Self::Delayed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::Waiting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_check() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(!JobState::Waiting.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert!(!JobState::Delayed.is_terminal());
    }

    #[test]
    fn test_cancellable_boundary() {
        assert!(JobState::Waiting.is_cancellable());
        assert!(JobState::Delayed.is_cancellable());
        assert!(!JobState::Active.is_cancellable());
        assert!(!JobState::Completed.is_cancellable());
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(JobState::Active.to_string(), "active");
        assert_eq!("delayed".parse::<JobState>().unwrap(), JobState::Delayed);
        assert!("bogus".parse::<JobState>().is_err());
    }

    #[test]
    fn test_state_serde() {
        let state = JobState::Waiting;
        let json = serde_json::to_string(&state).unwrap();
        assert_eq!(json, "\"waiting\"");

        let parsed: JobState = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, state);
    }
}
