//! Device sessions for netmig.
//!
//! The snapshot engine treats "a device connection" as an opaque capability.
//! This crate defines that capability:
//!
//! - [`Device`]: what to connect to, with an opaque credential reference
//! - [`CredentialResolver`]: turns the reference into usable secrets at open time
//! - [`DeviceConnector`] / [`DeviceSession`]: transport seam implemented by collaborators
//! - [`Session`]: the scoped, timeout-enforcing handle the runner actually uses
//! - [`ProcessConnector`]: a connector that shells out to an external transport (e.g. `ssh`)
//!
//! Commands are assumed to be read-only "show" commands; nothing here
//! distinguishes read from write.

pub mod credentials;
pub mod device;
pub mod error;
pub mod process;
pub mod session;

pub use credentials::{
    CredentialResolver, Credentials, EnvCredentialResolver, JumpHost, StaticCredentialResolver,
};
pub use device::{parse_device_list, ConnectionParams, Device, DEFAULT_CLASS};
pub use error::{CommandError, ConnectError};
pub use process::{ProcessConnector, TransportConfig};
pub use session::{DeviceConnector, DeviceSession, Session};
