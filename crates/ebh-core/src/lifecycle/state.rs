/// Lifecycle of one managed service.
///
/// ```text
/// New ──► Starting ──► Running ──► Stopping ──► Terminated
///  │         │                        │
///  │         └────────► Failed ◄──────┘
///  └──────────────────────────────────────────► Terminated
/// ```
///
/// States only move forward. `Failed` and `Terminated` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    New,
    Starting,
    Running,
    Stopping,
    Terminated,
    Failed,
}

impl LifecycleState {
    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (New, Starting)
                | (New, Terminated)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Stopping, Terminated)
                | (Stopping, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated | Self::Failed)
    }

    /// True once startup has finished one way or the other.
    pub fn is_settled(self) -> bool {
        !matches!(self, Self::New | Self::Starting)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Starting => write!(f, "STARTING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Stopping => write!(f, "STOPPING"),
            Self::Terminated => write!(f, "TERMINATED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LifecycleState::{self, *};

    const ALL: [LifecycleState; 6] = [New, Starting, Running, Stopping, Terminated, Failed];

    #[test]
    fn happy_path_is_legal() {
        assert!(New.can_transition_to(Starting));
        assert!(Starting.can_transition_to(Running));
        assert!(Running.can_transition_to(Stopping));
        assert!(Stopping.can_transition_to(Terminated));
    }

    #[test]
    fn failed_is_reachable_only_from_starting_and_stopping() {
        for state in ALL {
            let expected = matches!(state, Starting | Stopping);
            assert_eq!(state.can_transition_to(Failed), expected, "{state} -> FAILED");
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for next in ALL {
            assert!(!Terminated.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn no_backwards_moves() {
        assert!(!Running.can_transition_to(Starting));
        assert!(!Stopping.can_transition_to(Running));
        assert!(!Starting.can_transition_to(New));
    }

    #[test]
    fn settled_after_starting() {
        assert!(!New.is_settled());
        assert!(!Starting.is_settled());
        assert!(Running.is_settled());
        assert!(Failed.is_settled());
    }
}
