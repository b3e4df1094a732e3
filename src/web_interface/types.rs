use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Header carrying the caller identity, set by the authenticating front proxy.
pub const CALLER_HEADER: &str = "x-caller-id";

/// Body of `GET /health`
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connections: usize,
}

/// Count of open session connections, observable while it changes.
#[derive(Debug, Clone)]
pub struct Connections {
    open: Arc<watch::Sender<usize>>,
}

impl Connections {
    pub fn new() -> Self {
        Self {
            open: Arc::new(watch::Sender::new(0)),
        }
    }

    pub fn count(&self) -> usize {
        *self.open.borrow()
    }

    /// Registers a connection and returns the new count.
    pub fn opened(&self) -> usize {
        self.open.send_modify(|open| *open += 1);
        self.count()
    }

    /// Unregisters a connection and returns the new count.
    pub fn closed(&self) -> usize {
        self.open.send_modify(|open| *open = open.saturating_sub(1));
        self.count()
    }

    /// Resolves once no connection is open.
    pub async fn drained(&self) {
        let mut open = self.open.subscribe();
        let _ = open.wait_for(|open| *open == 0).await;
    }
}

impl Default for Connections {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_drained_waits_for_last_close() {
        let connections = Connections::new();
        connections.drained().await;

        assert_eq!(connections.opened(), 1);
        assert_eq!(connections.opened(), 2);

        let waiter = tokio::spawn({
            let connections = connections.clone();
            async move { connections.drained().await }
        });
        assert_eq!(connections.closed(), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        assert_eq!(connections.closed(), 0);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
