//! Connector that drives an external transport program (typically `ssh`).
//!
//! Every command spawns the transport once, with the command appended (or
//! substituted for `{command}`). Arguments may use these placeholders:
//!
//! | Placeholder  | Value                                   |
//! |--------------|-----------------------------------------|
//! | `{host}`     | device address                          |
//! | `{port}`     | device port, or the configured default  |
//! | `{username}` | resolved username (empty when none)     |
//! | `{target}`   | `username@host`, or `host`              |
//! | `{command}`  | the command being executed              |
//! | `{jumphost}` | `username@jumphost`, only in `jump_args` |
//!
//! The password never appears on the command line; when `password_env` is
//! set it is passed through that environment variable (e.g. `SSHPASS`).

use crate::{
    CommandError, ConnectError, CredentialResolver, Credentials, Device, DeviceConnector,
    DeviceSession,
};
use async_trait::async_trait;
use netmig_util::Secret;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, trace};

/// Exit status `ssh` uses for its own connection errors.
const TRANSPORT_ERROR_STATUS: i32 = 255;

const AUTH_FAILURE_MARKERS: &[&str] = &[
    "permission denied",
    "authentication failed",
    "too many authentication failures",
];

/// How to invoke the external transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Program to spawn.
    pub program: String,

    /// Arguments, with placeholders.
    pub args: Vec<String>,

    /// Extra arguments inserted before `args` when a jump host is configured.
    pub jump_args: Vec<String>,

    /// Port used when the device does not set one.
    pub default_port: u16,

    /// Environment variable carrying the password, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Command run once at open to verify reachability and learn the prompt.
    ///
    /// Without one, opening is lazy and the first command doubles as the
    /// connection attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_command: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            args: vec![
                "-o".to_string(),
                "StrictHostKeyChecking=accept-new".to_string(),
                "-p".to_string(),
                "{port}".to_string(),
                "{target}".to_string(),
                "{command}".to_string(),
            ],
            jump_args: vec!["-J".to_string(), "{jumphost}".to_string()],
            default_port: 22,
            password_env: None,
            check_command: None,
        }
    }
}

impl TransportConfig {
    /// Build the argument vector for one invocation.
    fn render_args(&self, vars: &TransportVars, command: &str) -> Vec<String> {
        let mut rendered = Vec::with_capacity(self.args.len() + self.jump_args.len() + 1);

        if let Some(jumphost) = &vars.jumphost {
            rendered.extend(
                self.jump_args
                    .iter()
                    .map(|arg| arg.replace("{jumphost}", jumphost)),
            );
        }

        let mut has_command = false;
        for arg in &self.args {
            if arg.contains("{command}") {
                has_command = true;
            }
            rendered.push(vars.substitute(arg).replace("{command}", command));
        }
        if !has_command {
            rendered.push(command.to_string());
        }

        rendered
    }
}

/// Per-device placeholder values.
#[derive(Debug, Clone)]
struct TransportVars {
    host: String,
    port: String,
    username: String,
    target: String,
    jumphost: Option<String>,
}

impl TransportVars {
    fn new(device: &Device, credentials: &Credentials, default_port: u16) -> Self {
        let host = device.host().to_string();
        let username = credentials.username.clone().unwrap_or_default();
        let target = if username.is_empty() {
            host.clone()
        } else {
            format!("{username}@{host}")
        };
        let jumphost = credentials.jumphost.as_ref().map(|j| match &j.username {
            Some(user) => format!("{user}@{}", j.host),
            None => j.host.clone(),
        });

        Self {
            port: device.params.port.unwrap_or(default_port).to_string(),
            host,
            username,
            target,
            jumphost,
        }
    }

    fn substitute(&self, arg: &str) -> String {
        arg.replace("{host}", &self.host)
            .replace("{port}", &self.port)
            .replace("{username}", &self.username)
            .replace("{target}", &self.target)
    }
}

/// Raw result of one transport invocation.
struct Invocation {
    stdout: String,
    stderr: String,
    status: Option<i32>,
}

impl Invocation {
    fn success(&self) -> bool {
        self.status == Some(0)
    }

    fn transport_failed(&self) -> bool {
        self.status == Some(TRANSPORT_ERROR_STATUS)
    }

    fn looks_like_auth_failure(&self) -> bool {
        let stderr = self.stderr.to_lowercase();
        AUTH_FAILURE_MARKERS.iter().any(|m| stderr.contains(m))
    }

    /// The connect error this invocation shows, if it never reached the device.
    fn connect_failure(&self) -> Option<ConnectError> {
        if self.success() {
            None
        } else if self.looks_like_auth_failure() {
            Some(ConnectError::AuthFailed(self.error_text()))
        } else if self.transport_failed() {
            Some(ConnectError::Unreachable(self.error_text()))
        } else {
            None
        }
    }

    fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            match self.status {
                Some(code) => format!("exit status {code}"),
                None => "terminated by signal".to_string(),
            }
        } else {
            stderr.to_string()
        }
    }
}

/// Connector spawning an external transport per command.
pub struct ProcessConnector {
    config: Arc<TransportConfig>,
    credentials: Arc<dyn CredentialResolver>,
}

impl ProcessConnector {
    pub fn new(config: TransportConfig, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            config: Arc::new(config),
            credentials,
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

#[async_trait]
impl DeviceConnector for ProcessConnector {
    async fn open(&self, device: &Device) -> Result<Box<dyn DeviceSession>, ConnectError> {
        let credentials = self
            .credentials
            .resolve(device.params.credential.as_deref())
            .await?;
        let vars = TransportVars::new(device, &credentials, self.config.default_port);

        let mut session = ProcessSession {
            device_id: device.id.clone(),
            config: self.config.clone(),
            vars,
            password: credentials.password,
            prompt: None,
            contacted: false,
        };

        if let Some(check) = self.config.check_command.as_deref() {
            let invocation = session
                .invoke(check)
                .await
                .map_err(|e| ConnectError::Protocol(e.to_string()))?;

            if let Some(err) = invocation.connect_failure() {
                return Err(err);
            }
            if !invocation.success() {
                return Err(ConnectError::Protocol(format!(
                    "open check '{check}' failed: {}",
                    invocation.error_text()
                )));
            }

            session.prompt = invocation
                .stdout
                .lines()
                .map(str::trim)
                .rfind(|line| !line.is_empty())
                .map(str::to_string);
            session.contacted = true;
        }

        debug!(device = %device.id, program = %self.config.program, "Transport ready");
        Ok(Box::new(session))
    }
}

/// Session state for [`ProcessConnector`]. Holds no live process between commands.
struct ProcessSession {
    device_id: String,
    config: Arc<TransportConfig>,
    vars: TransportVars,
    password: Option<Secret<String>>,
    prompt: Option<String>,
    /// Set once the device has answered anything.
    contacted: bool,
}

impl ProcessSession {
    async fn invoke(&self, command: &str) -> std::io::Result<Invocation> {
        let args = self.config.render_args(&self.vars, command);
        trace!(device = %self.device_id, program = %self.config.program, ?args, "Spawning transport");

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("TERM", "dumb")
            .kill_on_drop(true);

        if let (Some(var), Some(password)) = (&self.config.password_env, &self.password) {
            cmd.env(var, password.expose());
        }

        let output = cmd.output().await?;
        Ok(Invocation {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status.code(),
        })
    }
}

#[async_trait]
impl DeviceSession for ProcessSession {
    fn prompt(&self) -> Option<&str> {
        self.prompt.as_deref()
    }

    async fn execute(&mut self, command: &str) -> Result<String, CommandError> {
        let invocation = match self.invoke(command).await {
            Ok(invocation) => invocation,
            Err(e) if self.contacted => return Err(CommandError::SessionLost(e.to_string())),
            Err(e) => {
                return Err(ConnectError::Protocol(format!(
                    "failed to start {}: {e}",
                    self.config.program
                ))
                .into())
            }
        };

        if !self.contacted {
            if let Some(err) = invocation.connect_failure() {
                debug!(device = %self.device_id, error = %err, "Device not reached");
                return Err(err.into());
            }
        }

        if invocation.success() {
            self.contacted = true;
            Ok(invocation.stdout)
        } else if invocation.transport_failed() {
            Err(CommandError::SessionLost(invocation.error_text()))
        } else {
            self.contacted = true;
            Err(CommandError::Failed(invocation.error_text()))
        }
    }

    async fn close(&mut self) {
        // Each invocation is reaped on completion; nothing stays open.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JumpHost, StaticCredentialResolver};

    fn shell_config() -> TransportConfig {
        TransportConfig {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "{command}".to_string()],
            jump_args: Vec::new(),
            default_port: 22,
            password_env: None,
            check_command: None,
        }
    }

    fn anonymous() -> Arc<dyn CredentialResolver> {
        Arc::new(StaticCredentialResolver::new().with_default(Credentials::anonymous()))
    }

    #[test]
    fn test_render_args_default_ssh() {
        let config = TransportConfig::default();
        let device = Device::new("r1").with_port(2222);
        let credentials = Credentials::login("netops", "pw").with_jumphost(JumpHost {
            host: "bastion".to_string(),
            username: Some("jump".to_string()),
            password: None,
        });
        let vars = TransportVars::new(&device, &credentials, config.default_port);

        let args = config.render_args(&vars, "show version");
        assert_eq!(
            args,
            vec![
                "-J",
                "jump@bastion",
                "-o",
                "StrictHostKeyChecking=accept-new",
                "-p",
                "2222",
                "netops@r1",
                "show version",
            ]
        );
        assert!(!args.iter().any(|a| a.contains("pw")));
    }

    #[test]
    fn test_render_args_appends_command_without_placeholder() {
        let config = TransportConfig {
            args: vec!["{host}".to_string()],
            ..shell_config()
        };
        let vars = TransportVars::new(&Device::new("sw1"), &Credentials::anonymous(), 22);
        assert_eq!(config.render_args(&vars, "show clock"), vec!["sw1", "show clock"]);
    }

    #[tokio::test]
    async fn test_execute_returns_stdout() {
        let connector = ProcessConnector::new(shell_config(), anonymous());
        let mut session = connector.open(&Device::new("r1")).await.unwrap();

        let out = session.execute("echo hello").await.unwrap();
        assert_eq!(out, "hello\n");
        session.close().await;
    }

    #[tokio::test]
    async fn test_execute_classifies_failures() {
        let connector = ProcessConnector::new(shell_config(), anonymous());
        let mut session = connector.open(&Device::new("r1")).await.unwrap();

        let err = session
            .execute("echo '% Invalid input' >&2; exit 1")
            .await
            .unwrap_err();
        assert_eq!(err, CommandError::Failed("% Invalid input".to_string()));

        let err = session.execute("exit 255").await.unwrap_err();
        assert!(matches!(err, CommandError::SessionLost(_)));
    }

    #[tokio::test]
    async fn test_lazy_open_reports_unreachable_on_first_command() {
        let connector = ProcessConnector::new(shell_config(), anonymous());
        let mut session = connector.open(&Device::new("r1")).await.unwrap();

        let err = session
            .execute("echo 'ssh: connect to host r1 port 22: No route to host' >&2; exit 255")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CommandError::Connect(ConnectError::Unreachable(
                "ssh: connect to host r1 port 22: No route to host".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_lazy_open_reports_auth_failure_on_first_command() {
        let connector = ProcessConnector::new(shell_config(), anonymous());
        let mut session = connector.open(&Device::new("r1")).await.unwrap();

        let err = session
            .execute("echo 'netops@r1: Permission denied (password).' >&2; exit 255")
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Connect(ConnectError::AuthFailed(_))));
    }

    #[tokio::test]
    async fn test_device_errors_after_contact_are_command_failures() {
        let connector = ProcessConnector::new(shell_config(), anonymous());
        let mut session = connector.open(&Device::new("r1")).await.unwrap();

        session.execute("echo R1#").await.unwrap();
        let err = session
            .execute("echo '% Permission denied for this command' >&2; exit 1")
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Failed(_)));
    }

    #[tokio::test]
    async fn test_lazy_open_missing_program_is_connect_error() {
        let config = TransportConfig {
            program: "/nonexistent/netmig-transport".to_string(),
            ..shell_config()
        };
        let connector = ProcessConnector::new(config, anonymous());
        let mut session = connector.open(&Device::new("r1")).await.unwrap();

        let err = session.execute("show version").await.unwrap_err();
        assert!(matches!(err, CommandError::Connect(ConnectError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_open_check_sets_prompt() {
        let config = TransportConfig {
            check_command: Some("printf 'banner\\nR1#\\n'".to_string()),
            ..shell_config()
        };
        let connector = ProcessConnector::new(config, anonymous());
        let session = connector.open(&Device::new("r1")).await.unwrap();
        assert_eq!(session.prompt(), Some("R1#"));
    }

    #[tokio::test]
    async fn test_open_check_failures_map_to_connect_errors() {
        let unreachable = ProcessConnector::new(
            TransportConfig {
                check_command: Some("echo 'No route to host' >&2; exit 255".to_string()),
                ..shell_config()
            },
            anonymous(),
        );
        let err = unreachable.open(&Device::new("r1")).await.err().unwrap();
        assert_eq!(err, ConnectError::Unreachable("No route to host".to_string()));

        let denied = ProcessConnector::new(
            TransportConfig {
                check_command: Some("echo 'Permission denied (password).' >&2; exit 255".to_string()),
                ..shell_config()
            },
            anonymous(),
        );
        let err = denied.open(&Device::new("r1")).await.err().unwrap();
        assert!(matches!(err, ConnectError::AuthFailed(_)));
    }

    #[tokio::test]
    async fn test_missing_program_is_protocol_error() {
        let config = TransportConfig {
            program: "/nonexistent/netmig-transport".to_string(),
            check_command: Some("x".to_string()),
            ..shell_config()
        };
        let connector = ProcessConnector::new(config, anonymous());
        let err = connector.open(&Device::new("r1")).await.err().unwrap();
        assert!(matches!(err, ConnectError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_password_passed_through_env() {
        let config = TransportConfig {
            password_env: Some("NETMIG_TEST_TRANSPORT_PW".to_string()),
            ..shell_config()
        };
        let resolver =
            StaticCredentialResolver::new().with_default(Credentials::login("netops", "s3cret"));
        let connector = ProcessConnector::new(config, Arc::new(resolver));
        let mut session = connector.open(&Device::new("r1")).await.unwrap();

        let out = session
            .execute("printf %s \"$NETMIG_TEST_TRANSPORT_PW\"")
            .await
            .unwrap();
        assert_eq!(out, "s3cret");
    }
}
