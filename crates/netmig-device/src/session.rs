//! Device session traits and the scoped session handle.

use crate::{CommandError, ConnectError, Device};
use async_trait::async_trait;
use netmig_util::TimingGuard;
use std::time::Duration;
use tracing::{debug, warn};

/// A live connection to one device, implemented by transport collaborators.
///
/// Implementations own their connection exclusively; nothing is shared
/// between sessions.
#[async_trait]
pub trait DeviceSession: Send {
    /// Prompt reported by the device on login (e.g. `R1#`), if the transport sees one.
    fn prompt(&self) -> Option<&str> {
        None
    }

    /// Execute one command and return its raw output.
    async fn execute(&mut self, command: &str) -> Result<String, CommandError>;

    /// Close the connection. Must be safe to call on a broken session.
    async fn close(&mut self);
}

/// Opens sessions to devices.
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    /// Open a session. On error, no connection may be left open.
    async fn open(&self, device: &Device) -> Result<Box<dyn DeviceSession>, ConnectError>;
}

/// Scoped handle around a [`DeviceSession`].
///
/// Enforces the per-call timeout independently of the transport. After a
/// timeout or a lost connection the handle is marked unusable; the caller is
/// expected to [`close`](Session::close) it and open a fresh one.
pub struct Session {
    device_id: String,
    inner: Option<Box<dyn DeviceSession>>,
    usable: bool,
}

impl Session {
    /// Open a session, treating a connect that exceeds `timeout` as unreachable.
    pub async fn open(
        connector: &dyn DeviceConnector,
        device: &Device,
        timeout: Duration,
    ) -> Result<Self, ConnectError> {
        let _timing = TimingGuard::connect(&device.id);

        match tokio::time::timeout(timeout, connector.open(device)).await {
            Ok(Ok(inner)) => {
                debug!(device = %device.id, prompt = ?inner.prompt(), "Session opened");
                Ok(Self {
                    device_id: device.id.clone(),
                    inner: Some(inner),
                    usable: true,
                })
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(ConnectError::Unreachable(format!(
                "connect timed out after {timeout:?}"
            ))),
        }
    }

    /// Device this session belongs to.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Prompt reported by the device.
    pub fn prompt(&self) -> Option<&str> {
        self.inner.as_ref().and_then(|s| s.prompt())
    }

    /// Whether further commands may be sent.
    pub fn is_usable(&self) -> bool {
        self.usable && self.inner.is_some()
    }

    /// Execute one command within `timeout`.
    pub async fn execute(
        &mut self,
        command: &str,
        timeout: Duration,
    ) -> Result<String, CommandError> {
        if !self.is_usable() {
            return Err(CommandError::SessionLost(
                "session was invalidated by an earlier error".to_string(),
            ));
        }
        let Some(inner) = self.inner.as_mut() else {
            return Err(CommandError::SessionLost("session already closed".to_string()));
        };

        let _timing = TimingGuard::command(&self.device_id, command);
        let result = match tokio::time::timeout(timeout, inner.execute(command)).await {
            Ok(result) => result,
            Err(_) => Err(CommandError::Timeout(timeout)),
        };

        if let Err(e) = &result {
            if e.invalidates_session() {
                debug!(device = %self.device_id, command, error = %e, "Session invalidated");
                self.usable = false;
            }
        }

        result
    }

    /// Close the underlying connection.
    pub async fn close(mut self) {
        if let Some(mut inner) = self.inner.take() {
            inner.close().await;
            debug!(device = %self.device_id, "Session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.inner.is_some() {
            warn!(device = %self.device_id, "Session dropped without close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct SlowSession {
        delay: Duration,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DeviceSession for SlowSession {
        fn prompt(&self) -> Option<&str> {
            Some("R1#")
        }

        async fn execute(&mut self, command: &str) -> Result<String, CommandError> {
            tokio::time::sleep(self.delay).await;
            Ok(format!("output of {command}"))
        }

        async fn close(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct SlowConnector {
        delay: Duration,
        connect_delay: Duration,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl DeviceConnector for SlowConnector {
        async fn open(&self, _device: &Device) -> Result<Box<dyn DeviceSession>, ConnectError> {
            tokio::time::sleep(self.connect_delay).await;
            Ok(Box::new(SlowSession {
                delay: self.delay,
                closes: self.closes.clone(),
            }))
        }
    }

    fn connector(delay_ms: u64, connect_delay_ms: u64) -> (SlowConnector, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        (
            SlowConnector {
                delay: Duration::from_millis(delay_ms),
                connect_delay: Duration::from_millis(connect_delay_ms),
                closes: closes.clone(),
            },
            closes,
        )
    }

    #[tokio::test]
    async fn test_execute_and_close() {
        let (connector, closes) = connector(0, 0);
        let device = Device::new("r1");

        let mut session = Session::open(&connector, &device, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(session.prompt(), Some("R1#"));

        let out = session
            .execute("show version", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, "output of show version");

        session.close().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_invalidates_session() {
        let (connector, closes) = connector(200, 0);
        let device = Device::new("r1");

        let mut session = Session::open(&connector, &device, Duration::from_secs(1))
            .await
            .unwrap();
        let err = session
            .execute("show tech", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::Timeout(Duration::from_millis(20)));
        assert!(!session.is_usable());

        // No reuse after timeout
        let err = session
            .execute("show clock", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::SessionLost(_)));

        session.close().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_timeout_is_unreachable() {
        let (connector, _) = connector(0, 200);
        let device = Device::new("r1");

        let err = Session::open(&connector, &device, Duration::from_millis(20))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::Unreachable(_)));
    }
}
