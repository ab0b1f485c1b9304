//! Client-side Wayland bindings: connection setup, registry binding, and
//! the core-protocol proxies generated from `protocols/wayland.xml` by
//! `wayland-scanner` at build time.
//!
//! The wire codec, object table and dispatch engine live in
//! `wayland-backend`; this crate adds the pieces that need to know what
//! an interface actually is.

mod conn;
mod registry;

/// Generated proxy types, one module per interface, plus the static
/// `Interface` descriptors the dispatcher reads requests/events from.
#[allow(clippy::all)]
pub mod protocol {
    include!(concat!(env!("OUT_DIR"), "/wayland.rs"));
}

pub use conn::{ConnectError, Connection};
pub use registry::{Global, GlobalBindingError, Registry};

pub use wayland_backend::client::{ObjectData, ObjectId};
pub use wayland_backend::protocol::{Interface, WEnum, WEnumError};
pub use wayland_backend::{InvalidId, WaylandError};
