//! Core types and utilities for the KNX field-bus client
//!
//! This crate provides the shared vocabulary of the client stack: bus
//! addresses, the application-layer frame model and service codes, the
//! datapoint value objects, and the error taxonomy.

pub mod address;
pub mod datapoint;
pub mod error;
pub mod frame;

pub use address::{GroupAddress, IndividualAddress};
pub use datapoint::{DptValue, InboundSpec, OutboundSpec, ReadDatapoint};
pub use error::{KnxError, KnxResult};
pub use frame::{BusFrame, Destination, GroupEventKind};
