use std::fmt;

use serde::Serialize;

/// Lifecycle state of a [`SceneSession`](super::SceneSession).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum SessionState {
    #[default]
    Disconnect,
    Connect,
    Foreground,
    Active,
    Inactive,
    Background,
    End,
}

impl SessionState {
    pub fn can_transition_to(self, to: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, to),
            (Disconnect, Connect | End)
                | (Connect, Foreground | Background | Disconnect | End)
                | (Foreground, Active | Inactive | Background | End)
                | (Active, Inactive | Background | End)
                | (Inactive, Active | Background | End)
                | (Background, Foreground | Disconnect | End)
        )
    }

    /// On screen: foreground, active or inactive.
    pub fn is_visible(self) -> bool {
        matches!(
            self,
            SessionState::Foreground | SessionState::Active | SessionState::Inactive
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SessionState::End
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnect => "disconnect",
            SessionState::Connect => "connect",
            SessionState::Foreground => "foreground",
            SessionState::Active => "active",
            SessionState::Inactive => "inactive",
            SessionState::Background => "background",
            SessionState::End => "end",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::SessionState::*;
    use super::*;

    #[test]
    fn end_is_terminal() {
        for to in [Disconnect, Connect, Foreground, Active, Inactive, Background, End] {
            assert!(!End.can_transition_to(to));
        }
    }

    #[test]
    fn every_live_state_can_end() {
        for from in [Disconnect, Connect, Foreground, Active, Inactive, Background] {
            assert!(from.can_transition_to(End), "{from} -> end");
        }
    }

    #[test]
    fn active_does_not_jump_to_disconnect() {
        assert!(!Active.can_transition_to(Disconnect));
        assert!(!Foreground.can_transition_to(Disconnect));
        assert!(Background.can_transition_to(Foreground));
        assert!(Active.can_transition_to(Inactive) && Inactive.can_transition_to(Active));
    }
}
