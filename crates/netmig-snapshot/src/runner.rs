//! Snapshot runner.
//!
//! Runs command sets against a device set with a fixed pool of workers. Each
//! worker pulls one device at a time from a shared queue and runs that
//! device's commands in order before taking the next one. Per-device and
//! per-command failures become data in the snapshot; the runner itself only
//! fails on bad configuration.

use crate::command::Command;
use crate::events::EventSink;
use crate::retry::{sleep_with_cancel, RetryHelper, RetryPolicy};
use crate::{
    CommandCatalog, CommandResult, CommandSet, DeviceCapture, FailureKind, Outcome, Phase,
    RunEvent, RunnerError, Snapshot,
};
use chrono::Utc;
use netmig_device::{CommandError, ConnectError, Device, DeviceConnector, Session};
use netmig_util::{device_span, Identifier};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

/// Default number of devices captured at once.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Default per-command timeout in seconds.
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

/// Default connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Runner settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Worker pool size.
    pub concurrency: usize,
    /// Timeout for commands without their own override.
    pub command_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
        }
    }
}

impl RunnerConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Captures snapshots.
///
/// # Example
///
/// ```rust,ignore
/// let runner = Runner::new(connector)
///     .with_concurrency(16)
///     .with_cancellation(token.clone());
/// let snapshot = runner.run(&devices, &commands, Phase::Pre, "dc1-cutover").await?;
/// ```
pub struct Runner {
    connector: Arc<dyn DeviceConnector>,
    config: RunnerConfig,
    command_timeout: Duration,
    connect_timeout: Duration,
    events: EventSink,
    cancel: CancellationToken,
}

impl Runner {
    pub fn new(connector: Arc<dyn DeviceConnector>) -> Self {
        let config = RunnerConfig::default();
        Self {
            connector,
            command_timeout: config.command_timeout(),
            connect_timeout: config.connect_timeout(),
            config,
            events: EventSink::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.command_timeout = config.command_timeout();
        self.connect_timeout = config.connect_timeout();
        self.config = config;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.concurrency = concurrency;
        self
    }

    /// Default per-command timeout (sub-second values allowed).
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.events = EventSink::new(Some(tx));
        self
    }

    /// Stop dispatching devices and commands once `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run one command set against every device.
    pub async fn run(
        &self,
        devices: &[Device],
        commands: &CommandSet,
        phase: Phase,
        label: &str,
    ) -> Result<Snapshot, RunnerError> {
        if commands.is_empty() {
            return Err(RunnerError::EmptyCommandSet(commands.name().to_string()));
        }
        let commands = Arc::new(commands.clone());
        let work = devices
            .iter()
            .map(|d| (d.clone(), commands.clone()))
            .collect();
        self.run_work(work, phase, label).await
    }

    /// Run each device's command set, chosen by device class.
    pub async fn run_catalog(
        &self,
        devices: &[Device],
        catalog: &CommandCatalog,
        phase: Phase,
        label: &str,
    ) -> Result<Snapshot, RunnerError> {
        let mut work = Vec::with_capacity(devices.len());
        for device in devices {
            let set = catalog
                .resolve(device)
                .ok_or_else(|| RunnerError::MissingCommandSet {
                    device: device.id.clone(),
                    class: device.class.clone(),
                })?;
            if set.is_empty() {
                return Err(RunnerError::EmptyCommandSet(set.name().to_string()));
            }
            work.push((device.clone(), set));
        }
        self.run_work(work, phase, label).await
    }

    async fn run_work(
        &self,
        work: Vec<(Device, Arc<CommandSet>)>,
        phase: Phase,
        label: &str,
    ) -> Result<Snapshot, RunnerError> {
        if self.config.concurrency == 0 {
            return Err(RunnerError::InvalidConcurrency(self.config.concurrency));
        }
        let mut seen = HashSet::new();
        for (device, _) in &work {
            if !seen.insert(device.id.as_str()) {
                return Err(RunnerError::DuplicateDevice(device.id.clone()));
            }
        }

        let run_id = Identifier::run();
        let builder = Snapshot::builder(label, phase);
        let device_count = work.len();
        let workers = self.config.concurrency.min(device_count);

        info!(
            run_id = %run_id,
            label,
            phase = %phase,
            devices = device_count,
            workers,
            "Starting snapshot run"
        );
        self.events.emit(RunEvent::RunStarted {
            run_id: run_id.clone(),
            label: label.to_string(),
            phase,
            devices: device_count,
        });

        let ctx = Arc::new(WorkerContext {
            connector: self.connector.clone(),
            phase,
            command_timeout: self.command_timeout,
            connect_timeout: self.connect_timeout,
            retry: self.config.retry,
            events: self.events.clone(),
            cancel: self.cancel.clone(),
        });
        let queue: Arc<Mutex<VecDeque<WorkItem>>> = Arc::new(Mutex::new(
            work.iter()
                .enumerate()
                .map(|(index, (device, commands))| WorkItem {
                    index,
                    device: device.clone(),
                    commands: commands.clone(),
                })
                .collect(),
        ));
        let slots: Arc<Mutex<Vec<Option<DeviceCapture>>>> =
            Arc::new(Mutex::new(vec![None; device_count]));

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let ctx = ctx.clone();
                let queue = queue.clone();
                let slots = slots.clone();
                tokio::spawn(async move {
                    while let Some(item) = pop(&queue) {
                        let span = device_span!(item.device.id);
                        let capture = ctx
                            .capture_device(&item.device, &item.commands)
                            .instrument(span)
                            .await;
                        store_slot(&slots, item.index, capture);
                    }
                    debug!(worker, "Worker finished");
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Snapshot worker aborted");
            }
        }

        // Any device a crashed worker left behind still gets a result per command.
        let mut filled = take_slots(&slots);
        let devices = work
            .iter()
            .enumerate()
            .map(|(index, (device, commands))| {
                filled[index].take().unwrap_or_else(|| {
                    failed_capture(
                        device,
                        commands,
                        phase,
                        FailureKind::Protocol,
                        "capture aborted unexpectedly",
                    )
                })
            })
            .collect::<Vec<_>>();

        let cancelled = self.cancel.is_cancelled();
        let snapshot = builder.devices(devices).cancelled(cancelled).build();
        let summary = snapshot.summary();

        info!(
            run_id = %run_id,
            snapshot_id = %snapshot.id(),
            succeeded = summary.succeeded,
            failed = summary.failed,
            timed_out = summary.timed_out,
            cancelled,
            "Snapshot run finished"
        );
        self.events.emit(RunEvent::RunFinished { run_id, cancelled });

        Ok(snapshot)
    }
}

struct WorkItem {
    index: usize,
    device: Device,
    commands: Arc<CommandSet>,
}

fn pop(queue: &Mutex<VecDeque<WorkItem>>) -> Option<WorkItem> {
    queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
}

fn store_slot(slots: &Mutex<Vec<Option<DeviceCapture>>>, index: usize, capture: DeviceCapture) {
    let mut slots = slots.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(slot) = slots.get_mut(index) {
        *slot = Some(capture);
    }
}

fn take_slots(slots: &Mutex<Vec<Option<DeviceCapture>>>) -> Vec<Option<DeviceCapture>> {
    std::mem::take(&mut *slots.lock().unwrap_or_else(|e| e.into_inner()))
}

/// A capture where no command was sent, each recording the same failure.
fn failed_capture(
    device: &Device,
    commands: &CommandSet,
    phase: Phase,
    kind: FailureKind,
    message: &str,
) -> DeviceCapture {
    let mut capture = DeviceCapture::new(&device.id, &device.class);
    let started_at = Utc::now();
    capture.results = commands
        .iter()
        .map(|command| CommandResult {
            device_id: device.id.clone(),
            command_name: command.name.clone(),
            command: command.command.clone(),
            phase,
            started_at,
            duration_ms: 0,
            attempts: 0,
            outcome: Outcome::failure(kind, message),
        })
        .collect();
    capture
}

/// Result of running one command with retries.
enum Attempted {
    Done(CommandResult),
    /// The device could not be reached again; it is lost for this run.
    ConnectFailed(CommandResult, ConnectError),
}

/// Why no session could be opened.
enum Unavailable {
    Failed(ConnectError),
    /// Cancellation fired during a connect backoff.
    Cancelled,
}

/// State shared by all workers of one run.
struct WorkerContext {
    connector: Arc<dyn DeviceConnector>,
    phase: Phase,
    command_timeout: Duration,
    connect_timeout: Duration,
    retry: RetryPolicy,
    events: EventSink,
    cancel: CancellationToken,
}

impl WorkerContext {
    async fn capture_device(&self, device: &Device, commands: &CommandSet) -> DeviceCapture {
        self.events.emit(RunEvent::DeviceStarted {
            device: device.id.clone(),
        });

        let capture = if self.cancel.is_cancelled() {
            debug!("Run cancelled, device not started");
            failed_capture(
                device,
                commands,
                self.phase,
                FailureKind::Cancelled,
                "run cancelled before dispatch",
            )
        } else {
            match self.connect(device).await {
                Ok(session) => self.run_commands(device, commands, session).await,
                Err(Unavailable::Failed(e)) => {
                    warn!(error = %e, "Device unavailable, recording failure for every command");
                    failed_capture(device, commands, self.phase, (&e).into(), e.message())
                }
                Err(Unavailable::Cancelled) => {
                    debug!("Run cancelled while connecting");
                    failed_capture(
                        device,
                        commands,
                        self.phase,
                        FailureKind::Cancelled,
                        "run cancelled while connecting",
                    )
                }
            }
        };

        let succeeded = capture
            .results
            .iter()
            .filter(|r| r.outcome.is_success())
            .count();
        debug!(succeeded, total = capture.results.len(), "Device finished");
        self.events.emit(RunEvent::DeviceFinished {
            device: device.id.clone(),
            succeeded,
            total: capture.results.len(),
        });
        capture
    }

    async fn run_commands(
        &self,
        device: &Device,
        commands: &CommandSet,
        session: Session,
    ) -> DeviceCapture {
        let mut capture = DeviceCapture::new(&device.id, &device.class);
        capture.prompt = session.prompt().map(str::to_string);
        self.events.emit(RunEvent::DeviceConnected {
            device: device.id.clone(),
            prompt: capture.prompt.clone(),
        });

        let mut session = Some(session);
        let mut lost: Option<ConnectError> = None;

        for command in commands {
            let result = if let Some(err) = &lost {
                self.unsent(device, command, err.into(), err.message())
            } else if self.cancel.is_cancelled() {
                self.unsent(
                    device,
                    command,
                    FailureKind::Cancelled,
                    "run cancelled before dispatch",
                )
            } else {
                match self.execute_with_retry(device, command, &mut session).await {
                    Attempted::Done(result) => result,
                    Attempted::ConnectFailed(result, err) => {
                        warn!(command = %command.name, error = %err, "Device unreachable, abandoning device");
                        lost = Some(err);
                        result
                    }
                }
            };

            self.events.emit(RunEvent::CommandFinished {
                device: device.id.clone(),
                command: command.name.clone(),
                outcome: result.outcome.clone(),
            });
            capture.results.push(result);
        }

        if let Some(session) = session {
            session.close().await;
        }
        capture
    }

    async fn connect(&self, device: &Device) -> Result<Session, Unavailable> {
        let mut helper = self.retry.helper();
        loop {
            match Session::open(self.connector.as_ref(), device, self.connect_timeout).await {
                Ok(session) => return Ok(session),
                Err(e) if e.is_retryable() => match helper.next_attempt() {
                    Some(delay) => {
                        warn!(
                            attempt = helper.current_attempt(),
                            error = %e,
                            "Connect failed, retrying"
                        );
                        if !sleep_with_cancel(delay, &self.cancel).await {
                            return Err(Unavailable::Cancelled);
                        }
                    }
                    None => return Err(Unavailable::Failed(e)),
                },
                Err(e) => return Err(Unavailable::Failed(e)),
            }
        }
    }

    async fn execute_with_retry(
        &self,
        device: &Device,
        command: &Command,
        session: &mut Option<Session>,
    ) -> Attempted {
        let timeout = command.timeout().unwrap_or(self.command_timeout);
        let started_at = Utc::now();
        let start = Instant::now();
        let mut helper = self.retry.helper();

        // `unreached` holds the connect error when the last attempt never reached the device.
        let (outcome, unreached) = loop {
            // A timed-out or broken session is never reused.
            if session.as_ref().map_or(true, |s| !s.is_usable()) {
                if let Some(stale) = session.take() {
                    stale.close().await;
                }
                match self.connect(device).await {
                    Ok(fresh) => *session = Some(fresh),
                    Err(Unavailable::Failed(err)) => {
                        let outcome = Outcome::failure((&err).into(), err.message());
                        break (outcome, Some(err));
                    }
                    Err(Unavailable::Cancelled) => {
                        let outcome =
                            Outcome::failure(FailureKind::Cancelled, "run cancelled while reconnecting");
                        break (outcome, None);
                    }
                }
            }
            let Some(live) = session.as_mut() else {
                continue;
            };

            let (outcome, unreached) = match live.execute(&command.command, timeout).await {
                Ok(output) => break (Outcome::success(output), None),
                Err(CommandError::Timeout(after)) => (Outcome::timeout(after), None),
                Err(CommandError::Failed(message)) => {
                    (Outcome::failure(FailureKind::Command, message), None)
                }
                Err(CommandError::SessionLost(message)) => {
                    (Outcome::failure(FailureKind::Protocol, message), None)
                }
                Err(CommandError::Connect(err)) if !err.is_retryable() => {
                    break (Outcome::failure((&err).into(), err.message()), Some(err));
                }
                Err(CommandError::Connect(err)) => {
                    (Outcome::failure((&err).into(), err.message()), Some(err))
                }
            };

            match helper.next_attempt() {
                Some(delay) => {
                    warn!(
                        command = %command.name,
                        attempt = helper.current_attempt(),
                        outcome = %outcome.describe(),
                        "Command failed, retrying"
                    );
                    if !sleep_with_cancel(delay, &self.cancel).await {
                        break (outcome, None);
                    }
                }
                None => break (outcome, unreached),
            }
        };

        let result = self.finish(device, command, started_at, start, &helper, outcome);
        match unreached {
            Some(err) => Attempted::ConnectFailed(result, err),
            None => Attempted::Done(result),
        }
    }

    fn finish(
        &self,
        device: &Device,
        command: &Command,
        started_at: chrono::DateTime<Utc>,
        start: Instant,
        helper: &RetryHelper,
        outcome: Outcome,
    ) -> CommandResult {
        CommandResult {
            device_id: device.id.clone(),
            command_name: command.name.clone(),
            command: command.command.clone(),
            phase: self.phase,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
            attempts: helper.current_attempt(),
            outcome,
        }
    }

    fn unsent(
        &self,
        device: &Device,
        command: &Command,
        kind: FailureKind,
        message: &str,
    ) -> CommandResult {
        CommandResult {
            device_id: device.id.clone(),
            command_name: command.name.clone(),
            command: command.command.clone(),
            phase: self.phase,
            started_at: Utc::now(),
            duration_ms: 0,
            attempts: 0,
            outcome: Outcome::failure(kind, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmig_test_utils::{fleet, MockConnector, MockResponse};

    fn commands(names: &[&str]) -> CommandSet {
        CommandSet::new(
            "test",
            names.iter().map(|n| crate::Command::new(*n)).collect(),
        )
        .unwrap()
    }

    fn runner(connector: &MockConnector) -> Runner {
        Runner::new(Arc::new(connector.clone()))
            .with_retry(RetryPolicy::none())
            .with_command_timeout(Duration::from_secs(5))
            .with_connect_timeout(Duration::from_secs(5))
    }

    fn command_names(capture: &DeviceCapture) -> Vec<&str> {
        capture
            .results
            .iter()
            .map(|r| r.command_name.as_str())
            .collect()
    }

    #[tokio::test]
    async fn test_one_unreachable_device_is_isolated() {
        let connector = MockConnector::new().with_unreachable("r3");
        let devices = fleet(10);
        let set = commands(&["show version", "show ip route"]);

        let snapshot = runner(&connector)
            .with_concurrency(4)
            .run(&devices, &set, Phase::Pre, "cutover")
            .await
            .unwrap();

        assert_eq!(snapshot.devices().len(), 10);
        for capture in snapshot.devices() {
            assert_eq!(capture.results.len(), 2);
            if capture.device_id == "r3" {
                assert!(capture.results.iter().all(|r| {
                    r.outcome.failure_kind() == Some(FailureKind::Unreachable)
                }));
            } else {
                assert!(capture.results.iter().all(|r| r.outcome.is_success()));
            }
        }
        assert_eq!(connector.active_sessions(), 0);
        assert!(!snapshot.is_cancelled());
    }

    #[tokio::test]
    async fn test_command_order_independent_of_pool_size() {
        for concurrency in [1, 2, 8, 32] {
            let connector = MockConnector::new().with_default_delay(Duration::from_millis(1));
            let devices = fleet(5);
            let set = commands(&["A", "B", "C"]);

            let snapshot = runner(&connector)
                .with_concurrency(concurrency)
                .run(&devices, &set, Phase::Post, "cutover")
                .await
                .unwrap();

            let ids: Vec<_> = snapshot.devices().iter().map(|d| d.device_id.as_str()).collect();
            assert_eq!(ids, vec!["r1", "r2", "r3", "r4", "r5"]);
            for capture in snapshot.devices() {
                assert_eq!(command_names(capture), vec!["A", "B", "C"]);
                assert_eq!(
                    connector.executed_on(&capture.device_id),
                    vec!["A".to_string(), "B".to_string(), "C".to_string()]
                );
            }
            assert!(connector.max_concurrent_sessions() <= concurrency);
            assert_eq!(connector.max_sessions_per_device(), 1);
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let connector = MockConnector::new().with_default_delay(Duration::from_millis(20));
        let snapshot = runner(&connector)
            .with_concurrency(3)
            .run(&fleet(12), &commands(&["show clock"]), Phase::Pre, "cutover")
            .await
            .unwrap();

        assert_eq!(snapshot.summary().succeeded, 12);
        assert!(connector.max_concurrent_sessions() <= 3);
        assert!(connector.max_concurrent_sessions() >= 2);
    }

    #[tokio::test]
    async fn test_configuration_errors() {
        let connector = MockConnector::new();
        let set = commands(&["show version"]);

        let err = runner(&connector)
            .with_concurrency(0)
            .run(&fleet(1), &set, Phase::Pre, "x")
            .await
            .unwrap_err();
        assert_eq!(err, RunnerError::InvalidConcurrency(0));

        let devices = vec![Device::new("r1"), Device::new("r1")];
        let err = runner(&connector)
            .run(&devices, &set, Phase::Pre, "x")
            .await
            .unwrap_err();
        assert_eq!(err, RunnerError::DuplicateDevice("r1".to_string()));
        assert!(connector.opens().is_empty());
    }

    #[tokio::test]
    async fn test_empty_device_set_yields_empty_snapshot() {
        let connector = MockConnector::new();
        let snapshot = runner(&connector)
            .run(&[], &commands(&["show version"]), Phase::Pre, "x")
            .await
            .unwrap();
        assert!(snapshot.devices().is_empty());
    }

    #[tokio::test]
    async fn test_command_failure_does_not_stop_device() {
        let connector = MockConnector::new()
            .with_response("r1", "B", MockResponse::failed("% Invalid input detected"))
            .with_prompt("r1", "R1#");
        let snapshot = runner(&connector)
            .run(&fleet(1), &commands(&["A", "B", "C"]), Phase::Pre, "x")
            .await
            .unwrap();

        let capture = snapshot.device("r1").unwrap();
        assert_eq!(capture.prompt.as_deref(), Some("R1#"));
        assert!(capture.results[0].outcome.is_success());
        assert_eq!(capture.results[1].outcome.failure_kind(), Some(FailureKind::Command));
        assert!(capture.results[2].outcome.is_success());
        assert_eq!(connector.open_count("r1"), 1);
    }

    #[tokio::test]
    async fn test_timeout_reopens_session_for_next_command() {
        let connector = MockConnector::new().with_response("r1", "B", MockResponse::hang());
        let snapshot = runner(&connector)
            .with_command_timeout(Duration::from_millis(50))
            .run(&fleet(1), &commands(&["A", "B", "C"]), Phase::Pre, "x")
            .await
            .unwrap();

        let capture = snapshot.device("r1").unwrap();
        assert!(matches!(capture.results[1].outcome, Outcome::Timeout { after_ms: 50 }));
        assert!(capture.results[2].outcome.is_success());
        // B's session was discarded and C ran on a fresh one.
        assert_eq!(connector.open_count("r1"), 2);
        assert_eq!(connector.active_sessions(), 0);
    }

    #[tokio::test]
    async fn test_per_command_timeout_override() {
        let connector = MockConnector::new().with_response(
            "r1",
            "show tech",
            MockResponse::output("big").with_delay(Duration::from_millis(100)),
        );
        let set = CommandSet::new(
            "t",
            vec![crate::Command::new("show tech").with_timeout(Duration::from_secs(2))],
        )
        .unwrap();

        let snapshot = runner(&connector)
            .with_command_timeout(Duration::from_millis(10))
            .run(&fleet(1), &set, Phase::Pre, "x")
            .await
            .unwrap();
        assert_eq!(
            snapshot.result("r1", "show tech").unwrap().outcome.output(),
            Some("big")
        );
    }

    #[tokio::test]
    async fn test_retry_reopens_lost_session() {
        let connector = MockConnector::new().with_responses(
            "r1",
            "show ip route",
            vec![MockResponse::session_lost(), MockResponse::output("routes")],
        );
        let snapshot = runner(&connector)
            .with_retry(RetryPolicy::fixed(2, Duration::from_millis(1)))
            .run(&fleet(1), &commands(&["show ip route"]), Phase::Pre, "x")
            .await
            .unwrap();

        let result = snapshot.result("r1", "show ip route").unwrap();
        assert_eq!(result.outcome.output(), Some("routes"));
        assert_eq!(result.attempts, 2);
        assert_eq!(connector.open_count("r1"), 2);
    }

    #[tokio::test]
    async fn test_connect_retry_then_success() {
        let connector = MockConnector::new().with_connect_results(
            "r1",
            vec![Err(ConnectError::Unreachable("timeout".to_string())), Ok(())],
        );
        let snapshot = runner(&connector)
            .with_retry(RetryPolicy::fixed(3, Duration::from_millis(1)))
            .run(&fleet(1), &commands(&["A"]), Phase::Pre, "x")
            .await
            .unwrap();

        assert!(snapshot.result("r1", "A").unwrap().outcome.is_success());
        assert_eq!(connector.open_count("r1"), 2);
    }

    #[tokio::test]
    async fn test_auth_failure_not_retried() {
        let connector = MockConnector::new().with_auth_failure("r1");
        let snapshot = runner(&connector)
            .with_retry(RetryPolicy::fixed(5, Duration::from_millis(1)))
            .run(&fleet(1), &commands(&["A", "B"]), Phase::Pre, "x")
            .await
            .unwrap();

        assert_eq!(connector.open_count("r1"), 1);
        let capture = snapshot.device("r1").unwrap();
        assert!(capture
            .results
            .iter()
            .all(|r| r.outcome.failure_kind() == Some(FailureKind::AuthFailed)));
    }

    #[tokio::test]
    async fn test_reconnect_failure_fails_remaining_commands() {
        let connector = MockConnector::new()
            .with_connect_results(
                "r1",
                vec![Ok(()), Err(ConnectError::Unreachable("gone".to_string()))],
            )
            .with_response("r1", "B", MockResponse::session_lost());
        let snapshot = runner(&connector)
            .with_retry(RetryPolicy::fixed(2, Duration::from_millis(1)))
            .run(&fleet(1), &commands(&["A", "B", "C"]), Phase::Pre, "x")
            .await
            .unwrap();

        let capture = snapshot.device("r1").unwrap();
        assert!(capture.results[0].outcome.is_success());
        assert_eq!(capture.results[1].outcome.failure_kind(), Some(FailureKind::Unreachable));
        assert_eq!(capture.results[2].outcome.failure_kind(), Some(FailureKind::Unreachable));
        assert_eq!(capture.results[2].attempts, 0);
        assert_eq!(connector.executed_on("r1"), vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn test_unreached_on_first_command_abandons_device() {
        let connector = MockConnector::new().with_response(
            "r1",
            "A",
            MockResponse::error(CommandError::Connect(ConnectError::Unreachable(
                "no route to host".to_string(),
            ))),
        );
        let snapshot = runner(&connector)
            .with_retry(RetryPolicy::fixed(2, Duration::from_millis(1)))
            .run(&fleet(2), &commands(&["A", "B"]), Phase::Pre, "x")
            .await
            .unwrap();

        let capture = snapshot.device("r1").unwrap();
        assert!(capture
            .results
            .iter()
            .all(|r| r.outcome.failure_kind() == Some(FailureKind::Unreachable)));
        assert_eq!(capture.results[0].attempts, 2);
        assert_eq!(capture.results[1].attempts, 0);
        assert_eq!(connector.executed_on("r1"), vec!["A".to_string(), "A".to_string()]);
        assert!(snapshot.device("r2").unwrap().results.iter().all(|r| r.outcome.is_success()));
    }

    fn failing_transport(stderr: &str) -> Arc<dyn DeviceConnector> {
        let config = netmig_device::TransportConfig {
            program: "sh".to_string(),
            args: vec![
                "-c".to_string(),
                format!("echo '{stderr}' >&2; exit 255"),
                "{command}".to_string(),
            ],
            ..Default::default()
        };
        let credentials = netmig_device::StaticCredentialResolver::new()
            .with_default(netmig_device::Credentials::anonymous());
        Arc::new(netmig_device::ProcessConnector::new(config, Arc::new(credentials)))
    }

    #[tokio::test]
    async fn test_unreachable_transport_without_open_check() {
        let snapshot = Runner::new(failing_transport(
            "ssh: connect to host r1 port 22: No route to host",
        ))
        .with_retry(RetryPolicy::fixed(2, Duration::from_millis(1)))
        .run(&fleet(1), &commands(&["show version", "show clock"]), Phase::Pre, "x")
        .await
        .unwrap();

        let capture = snapshot.device("r1").unwrap();
        assert!(capture
            .results
            .iter()
            .all(|r| r.outcome.failure_kind() == Some(FailureKind::Unreachable)));
        assert_eq!(capture.results[0].attempts, 2);
        assert_eq!(capture.results[1].attempts, 0);
    }

    #[tokio::test]
    async fn test_rejected_credentials_without_open_check_not_retried() {
        let snapshot = Runner::new(failing_transport("netops@r1: Permission denied (password)."))
            .with_retry(RetryPolicy::fixed(3, Duration::from_millis(1)))
            .run(&fleet(1), &commands(&["show version", "show clock"]), Phase::Pre, "x")
            .await
            .unwrap();

        let capture = snapshot.device("r1").unwrap();
        assert!(capture
            .results
            .iter()
            .all(|r| r.outcome.failure_kind() == Some(FailureKind::AuthFailed)));
        assert_eq!(capture.results[0].attempts, 1);
        assert_eq!(capture.results[1].attempts, 0);
    }

    #[tokio::test]
    async fn test_cancellation_during_connect_backoff() {
        let connector = MockConnector::new().with_unreachable("r1");
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            run_cancel.cancel();
        });

        let snapshot = runner(&connector)
            .with_retry(RetryPolicy::fixed(5, Duration::from_millis(500)))
            .with_cancellation(cancel)
            .run(&fleet(1), &commands(&["A", "B"]), Phase::Pre, "x")
            .await
            .unwrap();

        assert!(snapshot.is_cancelled());
        assert_eq!(connector.open_count("r1"), 1);
        assert!(snapshot
            .device("r1")
            .unwrap()
            .results
            .iter()
            .all(|r| r.outcome.failure_kind() == Some(FailureKind::Cancelled)));
    }

    #[tokio::test]
    async fn test_cancellation_stops_dispatch() {
        let connector = MockConnector::new().with_default_delay(Duration::from_millis(30));
        let cancel = CancellationToken::new();
        let run_cancel = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            run_cancel.cancel();
        });

        let snapshot = runner(&connector)
            .with_concurrency(1)
            .with_cancellation(cancel)
            .run(&fleet(3), &commands(&["A", "B"]), Phase::Pre, "x")
            .await
            .unwrap();

        assert!(snapshot.is_cancelled());
        // In-flight command finished, nothing else was sent.
        assert_eq!(connector.executed().len(), 1);
        let r1 = snapshot.device("r1").unwrap();
        assert!(r1.results[0].outcome.is_success());
        assert_eq!(r1.results[1].outcome.failure_kind(), Some(FailureKind::Cancelled));
        for id in ["r2", "r3"] {
            let capture = snapshot.device(id).unwrap();
            assert_eq!(capture.results.len(), 2);
            assert!(capture
                .results
                .iter()
                .all(|r| r.outcome.failure_kind() == Some(FailureKind::Cancelled)));
        }
        assert_eq!(connector.opens(), vec!["r1".to_string()]);
    }

    #[tokio::test]
    async fn test_run_catalog_by_class() {
        let catalog = CommandCatalog::new()
            .with_set("ios", CommandSet::from_text("ios", "show version\nshow ip int brief").unwrap())
            .with_set("nxos", CommandSet::from_text("nxos", "show version").unwrap());
        let devices = vec![
            Device::new("r1").with_class("ios"),
            Device::new("sw1").with_class("nxos"),
        ];
        let connector = MockConnector::new();

        let snapshot = runner(&connector)
            .run_catalog(&devices, &catalog, Phase::Pre, "x")
            .await
            .unwrap();
        assert_eq!(snapshot.device("r1").unwrap().results.len(), 2);
        assert_eq!(snapshot.device("sw1").unwrap().results.len(), 1);

        let unknown = vec![Device::new("fw1").with_class("asa")];
        let err = runner(&connector)
            .run_catalog(&unknown, &catalog, Phase::Pre, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::MissingCommandSet { ref class, .. } if class == "asa"));
    }

    #[tokio::test]
    async fn test_events_emitted() {
        let connector = MockConnector::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        runner(&connector)
            .with_events(tx)
            .run(&fleet(2), &commands(&["A"]), Phase::Pre, "x")
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(RunEvent::RunStarted { devices: 2, .. })));
        assert!(matches!(events.last(), Some(RunEvent::RunFinished { cancelled: false, .. })));
        let finished = events
            .iter()
            .filter(|e| matches!(e, RunEvent::CommandFinished { .. }))
            .count();
        assert_eq!(finished, 2);
    }
}
