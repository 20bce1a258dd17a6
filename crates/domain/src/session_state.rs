use serde::{Deserialize, Serialize};

/// The per-call session state machine. One `Session` owns its own
/// transitions; see `va-session` for the orchestrator that drives them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Listening,
    UserSpeaking,
    Thinking,
    Speaking,
    ToolRunning,
    Ending,
    Terminated,
}

impl SessionState {
    /// Whether `to` is a transition this state machine allows from `self`,
    /// per the transition table. `Ending` is reachable from every
    /// non-terminal state; `Terminated` is reachable only from `Ending`.
    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;
        if self == Terminated {
            return false;
        }
        if to == Ending {
            return self != Ending;
        }
        match (self, to) {
            (Idle, Listening) => true,
            (Listening, UserSpeaking) => true,
            (UserSpeaking, Thinking) => true,
            (Thinking, Speaking) => true,
            (Thinking, ToolRunning) => true,
            (ToolRunning, Thinking) => true,
            (Speaking, Listening) => true,
            (Ending, Terminated) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        assert!(Idle.can_transition_to(Listening));
        assert!(Listening.can_transition_to(UserSpeaking));
        assert!(UserSpeaking.can_transition_to(Thinking));
        assert!(Thinking.can_transition_to(Speaking));
        assert!(Speaking.can_transition_to(Listening));
    }

    #[test]
    fn tool_running_returns_to_thinking() {
        assert!(Thinking.can_transition_to(ToolRunning));
        assert!(ToolRunning.can_transition_to(Thinking));
    }

    #[test]
    fn ending_reachable_from_every_non_terminal_state() {
        for state in [Idle, Listening, UserSpeaking, Thinking, Speaking, ToolRunning] {
            assert!(state.can_transition_to(Ending), "{state:?} -> Ending");
        }
        assert!(!Terminated.can_transition_to(Ending));
    }

    #[test]
    fn terminated_is_terminal_and_has_no_outgoing_transitions() {
        assert!(Terminated.is_terminal());
        for state in [Idle, Listening, UserSpeaking, Thinking, Speaking, ToolRunning, Ending] {
            assert!(!Terminated.can_transition_to(state));
        }
    }

    #[test]
    fn skipping_thinking_to_listening_is_not_allowed() {
        assert!(!Thinking.can_transition_to(Listening));
    }
}
