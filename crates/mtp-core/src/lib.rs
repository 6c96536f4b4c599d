//! # mtp-core
//!
//! Host-side Media Transfer Protocol (MTP) session engine.
//!
//! This crate provides:
//! - Container encoding and decoding (header, parameters, data payloads)
//! - Little-endian byte codec for strings, integers and arrays
//! - Typed property marshaling for device and object properties
//! - DeviceInfo, StorageInfo and ObjectInfo datasets
//! - Transaction engine with split transfers, stall recovery and abort
//! - Session façade exposing the MTP operation set
//! - Path resolution over the device's object tree
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Resolver (paths -> object handles)               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                 Session (MTP operations, state)                  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │     Transaction engine (ids, phases, chunking, abort)            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   Containers / datasets / properties      │   Transport (USB)    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use mtp_core::container::{encode_container, ContainerType};
//! use mtp_core::{Session, SessionConfig, StorageId};
//! use mtp_transport::ScriptedTransport;
//!
//! let (transport, script) = ScriptedTransport::new(512);
//! script.push_inbound(encode_container(ContainerType::Response, 0x2001, 1, &[], None));
//!
//! let mut session = Session::new(Box::new(transport), SessionConfig::default());
//! session.open(1).unwrap();
//! assert!(session.get_storage_info(StorageId(1)).is_err());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod codes;
pub mod container;
pub mod dataset;
pub mod error;
pub mod property;
pub mod resolver;
pub mod session;
pub mod transaction;
pub mod types;

pub use codes::{
    DevicePropertyCode, ObjectFormat, ObjectPropertyCode, OperationCode, ResponseCode,
};
pub use container::{Container, ContainerHeader, ContainerType};
pub use dataset::{DeviceInfo, NewObject, ObjectInfo, StorageInfo};
pub use error::{Error, ProtocolError, Result};
pub use property::{DataType, DevicePropertyDesc, ObjectPropertyDesc, ScalarType, Value};
pub use resolver::{ObjectTree, Resolver, RootPolicy};
pub use session::{Session, SessionConfig, SessionState};
pub use transaction::{
    AbortHandle, DataPhase, EngineConfig, PhaseTimeouts, Progress, Response, TransactionEngine,
    TransactionIds,
};
pub use types::{ObjectHandle, StorageId};

/// Default session id passed to OpenSession
pub const DEFAULT_SESSION_ID: u32 = 1;
