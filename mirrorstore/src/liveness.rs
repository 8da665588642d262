use crate::errors::{MirrorError, Result};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Receives liveness signals from a running sync, e.g. a workflow engine's
/// activity heartbeat. Returning an error aborts the pass.
pub trait HeartbeatSink: Send + Sync {
    fn heartbeat(&self, connector_id: &str, tables_processed: usize) -> Result<()>;
}

pub struct LogHeartbeat;

impl HeartbeatSink for LogHeartbeat {
    fn heartbeat(&self, connector_id: &str, tables_processed: usize) -> Result<()> {
        log::debug!(
            "Sync heartbeat for connector {}: {} table(s) processed",
            connector_id,
            tables_processed
        );
        Ok(())
    }
}

/// Heartbeat and cancellation port handed to one sync invocation.
#[derive(Clone, Default)]
pub struct Liveness {
    token: CancellationToken,
    sink: Option<Arc<dyn HeartbeatSink>>,
}

impl Liveness {
    pub fn new(token: CancellationToken) -> Self {
        Self { token, sink: None }
    }

    pub fn with_sink(mut self, sink: Arc<dyn HeartbeatSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Emits a heartbeat, then fails with `Cancelled` if cancellation was requested.
    pub fn heartbeat(&self, connector_id: &str, tables_processed: usize) -> Result<()> {
        if let Some(sink) = &self.sink {
            sink.heartbeat(connector_id, tables_processed)?;
        }
        self.check(connector_id)
    }

    pub fn check(&self, connector_id: &str) -> Result<()> {
        if self.token.is_cancelled() {
            return Err(MirrorError::Cancelled(connector_id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Beats(Mutex<Vec<usize>>);

    impl HeartbeatSink for Beats {
        fn heartbeat(&self, _connector_id: &str, tables_processed: usize) -> Result<()> {
            self.0.lock().unwrap().push(tables_processed);
            Ok(())
        }
    }

    #[test]
    fn test_heartbeat_reaches_sink_and_honours_cancellation() {
        let beats = Arc::new(Beats::default());
        let token = CancellationToken::new();
        let liveness = Liveness::new(token.clone()).with_sink(beats.clone());

        assert!(liveness.heartbeat("c1", 25).is_ok());
        token.cancel();
        assert!(matches!(
            liveness.heartbeat("c1", 50),
            Err(MirrorError::Cancelled(_))
        ));
        assert_eq!(*beats.0.lock().unwrap(), vec![25, 50]);
    }
}
