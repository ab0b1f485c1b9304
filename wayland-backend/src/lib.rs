//! Low-level Wayland client runtime: wire codec, fd channel, object table
//! and connection/dispatch engine. Protocol-specific proxy types are
//! generated at build time by `wayland-scanner` and live in
//! `wayland-client`; this crate knows nothing about any interface beyond
//! `wl_display`'s two built-in events (`error`, `delete_id`).

pub mod client;
pub mod error;
mod map;
pub mod protocol;
pub mod socket;
pub mod wire;

pub use client::{Backend, ObjectData, ObjectId};
pub use error::{InvalidId, WaylandError};
