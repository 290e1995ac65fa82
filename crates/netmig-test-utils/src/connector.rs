//! Scripted device connector.
//!
//! Provides a [`DeviceConnector`] that never touches the network. Each device
//! can be scripted to be unreachable, reject credentials, answer commands with
//! fixed output, fail, or hang. Every open, command, and close is recorded so
//! tests can assert on ordering and concurrency.

use async_trait::async_trait;
use netmig_device::{CommandError, ConnectError, Device, DeviceConnector, DeviceSession};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Scripted answer to one command.
#[derive(Debug, Clone)]
pub struct MockResponse {
    result: Result<String, CommandError>,
    delay: Duration,
}

impl MockResponse {
    /// Successful output.
    pub fn output(text: impl Into<String>) -> Self {
        Self {
            result: Ok(text.into()),
            delay: Duration::ZERO,
        }
    }

    /// Device-side command error.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::error(CommandError::Failed(message.into()))
    }

    /// Connection drops during the command.
    pub fn session_lost() -> Self {
        Self::error(CommandError::SessionLost("connection reset by peer".to_string()))
    }

    /// Command never completes (within any reasonable test timeout).
    pub fn hang() -> Self {
        Self::output("").with_delay(Duration::from_secs(3600))
    }

    pub fn error(error: CommandError) -> Self {
        Self {
            result: Err(error),
            delay: Duration::ZERO,
        }
    }

    /// Delay before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// A recorded command execution.
#[derive(Debug, Clone)]
pub struct ExecutedCommand {
    pub device: String,
    pub command: String,
    pub at: Instant,
}

/// Scripted queue: values are consumed in order, the last one repeats.
#[derive(Debug, Clone)]
struct Script<T: Clone> {
    queue: VecDeque<T>,
}

impl<T: Clone> Script<T> {
    fn new(values: Vec<T>) -> Self {
        Self {
            queue: values.into(),
        }
    }

    fn next(&mut self) -> Option<T> {
        if self.queue.len() > 1 {
            self.queue.pop_front()
        } else {
            self.queue.front().cloned()
        }
    }
}

#[derive(Default)]
struct MockState {
    connects: HashMap<String, Script<Result<(), ConnectError>>>,
    connect_delays: HashMap<String, Duration>,
    responses: HashMap<(String, String), Script<MockResponse>>,
    default_delay: Duration,
    prompts: HashMap<String, String>,

    opens: Vec<String>,
    closes: Vec<String>,
    executed: Vec<ExecutedCommand>,
    active: usize,
    max_active: usize,
    active_per_device: HashMap<String, usize>,
    max_active_per_device: usize,
}

/// A mock [`DeviceConnector`] for testing.
///
/// Unscripted devices are reachable and answer every command with
/// `"<command> output from <device>\n"`.
///
/// # Example
///
/// ```rust,ignore
/// let connector = MockConnector::new()
///     .with_unreachable("r3")
///     .with_output("r1", "show version", "IOS 15.1");
/// ```
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default output for an unscripted command.
    pub fn default_output(device: &str, command: &str) -> String {
        format!("{command} output from {device}\n")
    }

    /// Every connect attempt to `device` fails as unreachable.
    pub fn with_unreachable(self, device: &str) -> Self {
        self.with_connect_results(
            device,
            vec![Err(ConnectError::Unreachable("no route to host".to_string()))],
        )
    }

    /// Every connect attempt to `device` is rejected.
    pub fn with_auth_failure(self, device: &str) -> Self {
        self.with_connect_results(
            device,
            vec![Err(ConnectError::AuthFailed("bad credentials".to_string()))],
        )
    }

    /// Script connect attempts in order; the last result repeats.
    pub fn with_connect_results(self, device: &str, results: Vec<Result<(), ConnectError>>) -> Self {
        self.lock()
            .connects
            .insert(device.to_string(), Script::new(results));
        self
    }

    /// Delay every connect to `device`.
    pub fn with_connect_delay(self, device: &str, delay: Duration) -> Self {
        self.lock()
            .connect_delays
            .insert(device.to_string(), delay);
        self
    }

    /// Fixed output for one command on one device.
    pub fn with_output(self, device: &str, command: &str, output: impl Into<String>) -> Self {
        self.with_response(device, command, MockResponse::output(output))
    }

    /// Fixed response for one command on one device.
    pub fn with_response(self, device: &str, command: &str, response: MockResponse) -> Self {
        self.with_responses(device, command, vec![response])
    }

    /// Script successive responses for one command; the last one repeats.
    pub fn with_responses(self, device: &str, command: &str, responses: Vec<MockResponse>) -> Self {
        self.lock().responses.insert(
            (device.to_string(), command.to_string()),
            Script::new(responses),
        );
        self
    }

    /// Delay applied to unscripted commands.
    pub fn with_default_delay(self, delay: Duration) -> Self {
        self.lock().default_delay = delay;
        self
    }

    /// Prompt reported by `device`.
    pub fn with_prompt(self, device: &str, prompt: &str) -> Self {
        self.lock()
            .prompts
            .insert(device.to_string(), prompt.to_string());
        self
    }

    /// Devices in the order they were opened (including failed attempts).
    pub fn opens(&self) -> Vec<String> {
        self.lock().opens.clone()
    }

    /// Number of open attempts for one device.
    pub fn open_count(&self, device: &str) -> usize {
        self.lock().opens.iter().filter(|d| *d == device).count()
    }

    /// Devices in the order their sessions were closed.
    pub fn closes(&self) -> Vec<String> {
        self.lock().closes.clone()
    }

    /// All executed commands, in execution order.
    pub fn executed(&self) -> Vec<ExecutedCommand> {
        self.lock().executed.clone()
    }

    /// Commands executed on one device, in order.
    pub fn executed_on(&self, device: &str) -> Vec<String> {
        self.lock()
            .executed
            .iter()
            .filter(|e| e.device == device)
            .map(|e| e.command.clone())
            .collect()
    }

    /// Sessions currently open.
    pub fn active_sessions(&self) -> usize {
        self.lock().active
    }

    /// Highest number of sessions open at once.
    pub fn max_concurrent_sessions(&self) -> usize {
        self.lock().max_active
    }

    /// Highest number of sessions open at once against a single device.
    pub fn max_sessions_per_device(&self) -> usize {
        self.lock().max_active_per_device
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DeviceConnector for MockConnector {
    async fn open(&self, device: &Device) -> Result<Box<dyn DeviceSession>, ConnectError> {
        let (result, delay) = {
            let mut state = self.lock();
            state.opens.push(device.id.clone());
            let result = state
                .connects
                .get_mut(&device.id)
                .and_then(Script::next)
                .unwrap_or(Ok(()));
            let delay = state
                .connect_delays
                .get(&device.id)
                .copied()
                .unwrap_or_default();
            (result, delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        result?;

        let prompt = {
            let mut state = self.lock();
            state.active += 1;
            state.max_active = state.max_active.max(state.active);
            let per_device = state.active_per_device.entry(device.id.clone()).or_default();
            *per_device += 1;
            let per_device = *per_device;
            state.max_active_per_device = state.max_active_per_device.max(per_device);
            state.prompts.get(&device.id).cloned()
        };

        Ok(Box::new(MockSession {
            device: device.id.clone(),
            prompt,
            connector: self.clone(),
            closed: false,
        }))
    }
}

struct MockSession {
    device: String,
    prompt: Option<String>,
    connector: MockConnector,
    closed: bool,
}

impl MockSession {
    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.connector.lock();
        state.active = state.active.saturating_sub(1);
        if let Some(count) = state.active_per_device.get_mut(&self.device) {
            *count = count.saturating_sub(1);
        }
    }
}

#[async_trait]
impl DeviceSession for MockSession {
    fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    async fn execute(&mut self, command: &str) -> Result<String, CommandError> {
        let response = {
            let mut state = self.connector.lock();
            state.executed.push(ExecutedCommand {
                device: self.device.clone(),
                command: command.to_string(),
                at: Instant::now(),
            });
            let scripted = state
                .responses
                .get_mut(&(self.device.clone(), command.to_string()))
                .and_then(Script::next);
            let default_delay = state.default_delay;
            scripted.unwrap_or_else(|| {
                MockResponse::output(MockConnector::default_output(&self.device, command))
                    .with_delay(default_delay)
            })
        };

        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }
        response.result
    }

    async fn close(&mut self) {
        if !self.closed {
            self.connector.lock().closes.push(self.device.clone());
        }
        self.release();
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_output_and_recording() {
        let connector = MockConnector::new().with_prompt("r1", "R1#");
        let mut session = connector.open(&Device::new("r1")).await.unwrap();

        assert_eq!(session.prompt(), Some("R1#"));
        let out = session.execute("show version").await.unwrap();
        assert_eq!(out, "show version output from r1\n");
        assert_eq!(connector.active_sessions(), 1);

        session.close().await;
        assert_eq!(connector.active_sessions(), 0);
        assert_eq!(connector.closes(), vec!["r1".to_string()]);
        assert_eq!(connector.executed_on("r1"), vec!["show version".to_string()]);
    }

    #[tokio::test]
    async fn test_connect_script_last_result_repeats() {
        let connector = MockConnector::new().with_connect_results(
            "r1",
            vec![Err(ConnectError::Unreachable("down".to_string())), Ok(())],
        );
        let device = Device::new("r1");

        assert!(connector.open(&device).await.is_err());
        assert!(connector.open(&device).await.is_ok());
        assert!(connector.open(&device).await.is_ok());
        assert_eq!(connector.open_count("r1"), 3);
    }

    #[tokio::test]
    async fn test_response_script() {
        let connector = MockConnector::new().with_responses(
            "r1",
            "show ip route",
            vec![MockResponse::session_lost(), MockResponse::output("routes")],
        );
        let mut session = connector.open(&Device::new("r1")).await.unwrap();

        assert!(session.execute("show ip route").await.is_err());
        assert_eq!(session.execute("show ip route").await.unwrap(), "routes");
        session.close().await;
    }

    #[tokio::test]
    async fn test_dropped_session_is_released() {
        let connector = MockConnector::new();
        let session = connector.open(&Device::new("r1")).await.unwrap();
        assert_eq!(connector.active_sessions(), 1);
        drop(session);
        assert_eq!(connector.active_sessions(), 0);
        assert!(connector.closes().is_empty());
    }
}
