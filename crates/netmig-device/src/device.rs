//! Device descriptions supplied by the inventory collaborator.

use serde::{Deserialize, Serialize};

/// Device class used when the inventory does not name one.
pub const DEFAULT_CLASS: &str = "default";

/// How to reach a device.
///
/// The credential is a reference, never the secret itself; it is resolved by a
/// [`crate::CredentialResolver`] when the session opens.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Host name or address; falls back to the device id when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Transport port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Opaque credential reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// One device of the fleet.
///
/// Immutable for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Identifier, usually host name or IP.
    pub id: String,

    /// Class tag used to pick a command set.
    #[serde(default = "default_class")]
    pub class: String,

    #[serde(default)]
    pub params: ConnectionParams,
}

fn default_class() -> String {
    DEFAULT_CLASS.to_string()
}

impl Device {
    /// Create a device of the default class.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class: default_class(),
            params: ConnectionParams::default(),
        }
    }

    /// Set the device class.
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = class.into();
        self
    }

    /// Set the credential reference.
    pub fn with_credential(mut self, reference: impl Into<String>) -> Self {
        self.params.credential = Some(reference.into());
        self
    }

    /// Set the transport port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.params.port = Some(port);
        self
    }

    /// Address to connect to.
    pub fn host(&self) -> &str {
        self.params.host.as_deref().unwrap_or(&self.id)
    }
}

/// Parse a plain-text device list.
///
/// One device per line, `host` or `host class`. Blank lines and lines
/// starting with `#` are skipped.
pub fn parse_device_list(text: &str) -> Vec<Device> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let id = parts.next()?;
            let device = Device::new(id);
            Some(match parts.next() {
                Some(class) => device.with_class(class),
                None => device,
            })
        })
        .collect()
}
