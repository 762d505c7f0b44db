//! Vigil is the state tracking core of an explicit GPU API validation layer.
//!
//! It mirrors the lifetime of every API object, the memory bound to resources
//! and the commands recorded into command buffers, and reports misuse through
//! a [`ReportSink`]. Recorded memory accesses are checked for unsynchronized
//! hazards, and pipeline layouts are compared through canonical ids.
//!
//! [`ValidationLayer`] wraps a [`DeviceState`] and forwards validated calls to
//! the next layer in the chain.

#![warn(missing_debug_implementations)]

#[cfg(feature = "tracing")]
#[macro_export]
macro_rules! trace {
    ($($tokens:tt)*) => {
        tracing::trace!($($tokens)*)
    };
}

#[cfg(feature = "tracing")]
#[macro_export]
macro_rules! debug {
    ($($tokens:tt)*) => {
        tracing::debug!($($tokens)*)
    };
}

#[cfg(feature = "tracing")]
#[macro_export]
macro_rules! info {
    ($($tokens:tt)*) => {
        tracing::info!($($tokens)*)
    };
}

#[cfg(feature = "tracing")]
#[macro_export]
macro_rules! warn {
    ($($tokens:tt)*) => {
        tracing::warn!($($tokens)*)
    };
}

#[cfg(feature = "tracing")]
#[macro_export]
macro_rules! error {
    ($($tokens:tt)*) => {
        tracing::error!($($tokens)*)
    };
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! trace {
    ($($e:expr),*) => {{ $(let _ = &$e;)* }};
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! debug {
    ($($e:expr),*) => {{ $( let _ = &$e;)* }};
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! info {
    ($($e:expr),*) => {{ $(let _ = &$e;)* }};
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! warn {
    ($($e:expr),*) => {{ $(let _ = &$e;)* }};
}

#[cfg(not(feature = "tracing"))]
#[macro_export]
macro_rules! error {
    ($($e:expr),*) => {{ $(let _ = &$e;)* }};
}

mod access;
mod command;
mod command_buffer;
mod config;
mod descriptor;
mod device;
mod encode;
mod handle;
mod hazard;
mod intern;
mod layer;
mod memory;
mod pipeline;
mod queue;
mod registry;
mod render_pass;
mod report;
mod resource;
mod stage;

pub use self::{
    access::*,
    command::*,
    command_buffer::*,
    config::*,
    descriptor::*,
    device::*,
    encode::*,
    handle::*,
    hazard::*,
    intern::*,
    layer::*,
    memory::*,
    pipeline::*,
    queue::*,
    registry::*,
    render_pass::*,
    report::*,
    resource::*,
    stage::*,
};

/// Error returned when the layer fails to allocate its own tracking records.
///
/// The intercepted call fails with out of host memory,
/// tracking cannot silently skip a live object.
#[derive(Clone, Copy, Debug, thiserror::Error, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
#[error("Out of host memory for validation bookkeeping")]
pub struct OutOfMemory;

impl From<std::collections::TryReserveError> for OutOfMemory {
    fn from(_: std::collections::TryReserveError) -> Self {
        OutOfMemory
    }
}
