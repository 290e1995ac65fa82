//! Testing utilities, fixtures, and mocks for netmig.
//!
//! - **Connector**: [`MockConnector`], a scripted device connector that
//!   records every open, command, and close
//! - **Fixtures**: small fleets and temporary data directories
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use netmig_test_utils::{fixtures::fleet, MockConnector};
//!
//! #[tokio::test]
//! async fn test_unreachable_device_is_isolated() {
//!     let connector = MockConnector::new().with_unreachable("r3");
//!     let devices = fleet(10);
//!     // run a capture against `devices` with `connector`...
//! }
//! ```

pub mod connector;
pub mod fixtures;

pub use connector::{ExecutedCommand, MockConnector, MockResponse};
pub use fixtures::{fleet, TestDataDir};
