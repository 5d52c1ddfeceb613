//! # regsync Core
//!
//! Value types shared by every side of the regsync registry protocol.
//!
//! This crate provides:
//! - The registered instance model ([`InstanceInfo`], ports, datacenter info)
//! - [`Source`] provenance tags with per-node logical versions
//! - The delta engine: single-field changes with reset-on-absent semantics
//! - Composable [`Interest`] filters with canonical union
//! - Change and stream-state notifications consumed by discovery

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod datacenter;
pub mod delta;
pub mod instance;
pub mod interest;
pub mod notification;
pub mod source;

pub use datacenter::{AwsDataCenterInfo, BasicDataCenterInfo, DataCenterInfo};
pub use delta::{
    apply, Delta, DeltaBuilder, FieldChange, FieldMismatchError, FieldValue, InstanceField,
};
pub use instance::{InstanceError, InstanceInfo, InstanceInfoBuilder, ServicePort, Status};
pub use interest::{Interest, MalformedInterestError};
pub use notification::{BufferState, ChangeNotification, StreamStateNotification};
pub use source::{Origin, Source};
