use serde::{Deserialize, Serialize};

/// Acquisition session lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Running,
    Stopped,
    Error { message: String },
}

impl SessionState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &SessionState) -> bool {
        use SessionState::*;

        matches!(
            (self, target),
            // From Idle
            (Idle, Connecting) |

            // From Connecting
            (Connecting, Running) |
            (Connecting, Stopped) |
            (Connecting, Error { .. }) |

            // From Running
            (Running, Stopped) |
            (Running, Error { .. }) |

            // Restart after a stop or a fatal error
            (Stopped, Connecting) |
            (Error { .. }, Connecting) |
            (Stopped, Idle) |
            (Error { .. }, Idle)
        )
    }

    /// Get human-readable state name
    pub fn name(&self) -> &str {
        match self {
            Self::Idle => "Idle",
            Self::Connecting => "Connecting",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Error { .. } => "Error",
        }
    }

    /// Whether a producer may be active in this state
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(SessionState::Idle.can_transition_to(&SessionState::Connecting));
        assert!(SessionState::Connecting.can_transition_to(&SessionState::Running));
        assert!(!SessionState::Idle.can_transition_to(&SessionState::Running));
        assert!(!SessionState::Running.can_transition_to(&SessionState::Connecting));
    }

    #[test]
    fn test_error_allows_restart() {
        let error = SessionState::Error {
            message: "refill failed".to_string(),
        };
        assert!(SessionState::Running.can_transition_to(&error));
        assert!(error.can_transition_to(&SessionState::Connecting));
        assert_eq!(error.name(), "Error");
        assert!(!error.is_active());
    }
}
