//! Host-facing connection status notifications

/// Reason detail attached to an offline status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineDetail {
    /// The link could not be opened or was lost; a reconnect may follow
    CommunicationError,
    /// The configuration is unusable; no automatic retry is scheduled
    ConfigurationError,
}

/// Connection status reported to the owning application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Online,
    Offline {
        detail: OfflineDetail,
        description: String,
    },
}

impl ConnectionStatus {
    /// Build an offline status
    pub fn offline(detail: OfflineDetail, description: impl Into<String>) -> Self {
        ConnectionStatus::Offline {
            detail,
            description: description.into(),
        }
    }

    /// Check if the status is online
    pub fn is_online(&self) -> bool {
        matches!(self, ConnectionStatus::Online)
    }
}

/// Callback interface the client reports status transitions through
///
/// The host only ever observes online/offline transitions and per-call
/// results; the internal retry bookkeeping stays invisible.
#[cfg_attr(test, mockall::automock)]
pub trait StatusCallback: Send + Sync {
    fn update_status(&self, status: ConnectionStatus);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_predicates() {
        assert!(ConnectionStatus::Online.is_online());
        let offline =
            ConnectionStatus::offline(OfflineDetail::CommunicationError, "gateway unreachable");
        assert!(!offline.is_online());
    }
}
