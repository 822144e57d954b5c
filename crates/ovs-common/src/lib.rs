//! Common infrastructure for the OVS commit layer.
//!
//! This crate holds the pieces every part of the commit layer leans on:
//!
//! - [`process`]: external process execution with stdin and a hard timeout
//! - [`channel`]: the [`OvsChannel`] capability (run, run with retry, subscribe)
//! - [`cli`]: [`OvsCli`], the channel backed by `ovs-vsctl`, `ovs-ofctl`
//!   and `ovsdb-client`
//! - [`ovsdb`]: typed extraction of OVSDB JSON datums and monitor output
//! - [`registry`]: the [`EntityRegistry`] seam fed by port-inventory events
//! - [`error`]: error types for all of the above
//!
//! # Example
//!
//! ```ignore
//! use ovs_common::{OvsChannel, OvsCli, OvsCliConfig, OvsProgram};
//!
//! let cli = OvsCli::new(OvsCliConfig::default());
//! let args = vec!["br-exists".to_string(), "br-int".to_string()];
//! cli.run_with_retry(OvsProgram::Vsctl, &args, None).await?;
//! ```

pub mod channel;
pub mod cli;
pub mod error;
pub mod ovsdb;
pub mod process;
pub mod registry;

pub use channel::{OvsChannel, OvsProgram, TableRow, TableUpdate, DEFAULT_RETRY_ATTEMPTS};
pub use cli::{OvsCli, OvsCliConfig};
pub use error::{MalformedDatum, OvsError, OvsResult};
pub use registry::{EntityKind, EntityRegistry};
