//! Error taxonomy for the backend: everything that can go wrong once a
//! connection exists (dial-time failures belong to the client crate's
//! `ConnectError`, since they never reach a live `Backend`).

use crate::protocol::ProtocolError;

/// A connection-lifetime error. Once stored on a connection it is sticky:
/// every later request short-circuits with a clone of the same error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WaylandError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("request sent to a deleted or unknown object (id {0})")]
    ObjectState(u32),

    /// A `new_id`-bearing request was sent with a listener whose
    /// `ObjectData::interface()` doesn't match the interface the request
    /// is creating. Generated code pins this down statically wherever the
    /// target interface is known at codegen time; this is the runtime
    /// fallback for the polymorphic case (`wl_registry.bind`), where the
    /// target interface is only known from the call's own arguments.
    #[error("listener implements interface `{actual}`, expected `{expected}`")]
    ListenerMismatch { expected: &'static str, actual: &'static str },

    #[error(transparent)]
    ServerProtocol(#[from] ProtocolError),
}

/// Returned by id-based lookups (`Backend::get_data`, `Backend::info`)
/// when the id no longer names a live object.
#[derive(Debug, Clone, thiserror::Error)]
#[error("object id {0} is not (or no longer) valid")]
pub struct InvalidId(pub u32);
