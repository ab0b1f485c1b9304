//! Static description of Wayland interfaces, shared between generated proxy
//! code and the runtime dispatcher.

use std::fmt;

/// A single argument slot as described by an interface schema.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ArgumentType {
    Int,
    Uint,
    Fixed,
    Str { allow_null: bool },
    Object { allow_null: bool },
    NewId,
    Array,
    Fd,
}

/// Description of one request or event: its name, wire signature, and
/// whatever static metadata the dispatcher needs to act on it without
/// consulting generated code.
#[derive(Debug)]
pub struct MessageDesc {
    pub name: &'static str,
    pub signature: &'static [ArgumentType],
    /// `true` for requests/events that destroy their target object once
    /// delivered (e.g. `wl_callback.done`, `wl_buffer.destroy`).
    pub is_destructor: bool,
    /// The interface of the object created by a `new_id` argument in this
    /// message, when the schema pins it down. `None` for polymorphic
    /// constructors like `wl_registry.bind`, where the interface is only
    /// known from the `bind` call's own arguments.
    pub child_interface: Option<&'static Interface>,
}

/// Static description of a Wayland interface: its name, requests and
/// events. Generated once per interface by the scanner and referenced by
/// every proxy of that interface.
pub struct Interface {
    pub name: &'static str,
    pub version: u32,
    pub requests: &'static [MessageDesc],
    pub events: &'static [MessageDesc],
}

impl fmt::Debug for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface").field("name", &self.name).field("version", &self.version).finish()
    }
}

impl PartialEq for Interface {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other) || self.name == other.name
    }
}

impl Eq for Interface {}

/// Placeholder interface for objects whose type cannot be known ahead of
/// time (an object argument accepted generically, or the null id).
pub static ANONYMOUS_INTERFACE: Interface =
    Interface { name: "<anonymous>", version: 0, requests: &[], events: &[] };

/// A typed protocol enum value as it crosses the wire: always a `u32`, but
/// resolved to a known variant when possible so that servers speaking a
/// newer protocol version than the client was generated against don't
/// cause a decode failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WEnum<T> {
    Value(T),
    Unknown(u32),
}

impl<T> WEnum<T> {
    pub fn into_result(self) -> Result<T, WEnumError> {
        match self {
            WEnum::Value(v) => Ok(v),
            WEnum::Unknown(v) => Err(WEnumError(v)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unrecognized enum value: {0}")]
pub struct WEnumError(pub u32);

/// Read-only snapshot of an object's protocol identity.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub id: u32,
    pub interface: &'static Interface,
    pub version: u32,
}

/// A `wl_display.error` event, the sticky protocol-level failure the server
/// can report against any object.
#[derive(Debug, Clone, thiserror::Error)]
#[error("protocol error {code} on {object_interface}@{object_id}: {message}")]
pub struct ProtocolError {
    pub code: u32,
    pub object_id: u32,
    pub object_interface: &'static str,
    pub message: String,
}
