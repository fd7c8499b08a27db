//! rasbridge - typed client for the Windows Remote Access Service API
//!
//! A library that wraps the RAS dial-up and VPN entry points behind strongly
//! typed operations.
//!
//! ## What This Library Provides
//! - Enumeration of connections, devices, phonebook entries and autodial addresses
//! - Phonebook entry, credential and pre-shared key management
//! - Connection status, link statistics and projection results
//! - Asynchronous dialing with progress events, cancellation and timeouts
//! - Capability-aware record layouts for every supported OS level
//! - An in-process simulated backend for hosts without `rasapi32.dll`
//!
//! ## Layers
//! - [`native`]: the raw entry-point table and its backends
//! - [`marshal`]: fixed-layout native records and their domain types
//! - [`buffer`]: the grow-and-retry protocol for variable-size results
//! - [`client`], [`dialer`], [`phonebook`]: the typed surface

pub mod bridge;
pub mod buffer;
pub mod capability;
pub mod client;
pub mod config;
pub mod dialer;
pub mod dispatch;
pub mod error;
pub mod handle;
pub mod marshal;
pub mod native;
pub mod phonebook;

// Re-export core types
pub use capability::Capability;
pub use client::RasClient;
pub use config::Config;
pub use dialer::{DialCompleted, DialState, DialTicket, RasDialer, StateChanged};
pub use dispatch::{Dispatcher, EventLoop, InlineDispatcher};
pub use error::{ErrorKind, RasError, Result};
pub use handle::RasHandle;
pub use marshal::{ConnectionState, ConnectionStatus, Credentials, Entry, RasConnection, RasDevice};
pub use native::simulated::SimulatedRas;
pub use native::NativeApi;
pub use phonebook::{NameValidation, Phonebook, PhonebookPath};

#[cfg(feature = "tokio-runtime")]
pub use dispatch::TokioDispatcher;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
