//! Client connection state machine

/// Client lifecycle state
///
/// Tracks where the client is in its connection lifecycle so that connect
/// and dispose requests are handled correctly at any point.
///
/// # State Transitions
/// ```text
/// Init -> Running (first connect attempt starts)
/// Running -> Running (successful reconnect)
/// Running -> Interrupted (interrupted mid-connect)
/// Interrupted -> Running (reconnect scheduled and retried)
/// any -> Disposed (explicit shutdown, terminal)
/// ```
///
/// # Why State Machine?
/// Using explicit states provides:
/// - **Clear Lifecycle**: connect/dispose decisions read off the state
/// - **Terminal Shutdown**: `Disposed` refuses every later connect attempt
/// - **Debugging**: the state can be logged and inspected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Constructed, never successfully connected
    Init,
    /// Actively connected or actively attempting the first/next connection
    Running,
    /// A connection attempt was interrupted by cancellation; awaiting
    /// reconnect
    Interrupted,
    /// Terminal; no further connection attempts are made
    Disposed,
}

impl ClientState {
    /// Check if connect attempts are still permitted
    pub fn can_connect(&self) -> bool {
        !matches!(self, ClientState::Disposed)
    }

    /// Check if the client has been shut down
    pub fn is_disposed(&self) -> bool {
        matches!(self, ClientState::Disposed)
    }

    /// Validate a state transition
    ///
    /// # Valid Transitions
    /// - `Init` -> `Running` (first connect attempt)
    /// - `Running` -> `Running` (successful reconnect)
    /// - `Running` -> `Interrupted` (interrupted mid-connect)
    /// - `Interrupted` -> `Running` (retry)
    /// - any -> `Disposed` (shutdown, including `Disposed` -> `Disposed`
    ///   for idempotent disposal)
    pub fn validate_transition(&self, new_state: ClientState) -> bool {
        match (*self, new_state) {
            (_, ClientState::Disposed) => true,
            (ClientState::Init, ClientState::Running) => true,
            (ClientState::Running, ClientState::Running) => true,
            (ClientState::Running, ClientState::Interrupted) => true,
            (ClientState::Interrupted, ClientState::Running) => true,
            _ => false,
        }
    }

    /// Get human-readable state name
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientState::Init => "Init",
            ClientState::Running => "Running",
            ClientState::Interrupted => "Interrupted",
            ClientState::Disposed => "Disposed",
        }
    }
}

impl Default for ClientState {
    fn default() -> Self {
        ClientState::Init
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposal_is_reachable_from_every_state() {
        for state in [
            ClientState::Init,
            ClientState::Running,
            ClientState::Interrupted,
            ClientState::Disposed,
        ] {
            assert!(state.validate_transition(ClientState::Disposed));
        }
    }

    #[test]
    fn test_disposed_is_terminal() {
        assert!(!ClientState::Disposed.validate_transition(ClientState::Running));
        assert!(!ClientState::Disposed.validate_transition(ClientState::Init));
        assert!(!ClientState::Disposed.can_connect());
    }

    #[test]
    fn test_connect_transitions() {
        assert!(ClientState::Init.validate_transition(ClientState::Running));
        assert!(ClientState::Running.validate_transition(ClientState::Running));
        assert!(ClientState::Running.validate_transition(ClientState::Interrupted));
        assert!(ClientState::Interrupted.validate_transition(ClientState::Running));
        assert!(!ClientState::Init.validate_transition(ClientState::Interrupted));
        assert!(!ClientState::Running.validate_transition(ClientState::Init));
    }
}
