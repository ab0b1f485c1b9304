//! Establishing a connection to a compositor and driving round-trips.

use std::env;
use std::os::unix::io::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use wayland_backend::client::Backend;
use wayland_backend::WaylandError;

use crate::protocol::wl_callback::{WlCallback, WlCallbackListener};
use crate::protocol::wl_display::{self, WlDisplay};
use crate::protocol::wl_registry::{WlRegistry, WlRegistryListener};

#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    #[error("WAYLAND_SOCKET holds a malformed file descriptor: {0}")]
    InvalidFd(String),
    #[error("neither WAYLAND_SOCKET nor XDG_RUNTIME_DIR/WAYLAND_DISPLAY identify a compositor socket")]
    NoCompositor,
    #[error("connecting to the compositor socket: {0}")]
    Io(#[from] std::io::Error),
}

/// A connection to a Wayland compositor: the shared backend plus the one
/// `wl_display` object every connection is seeded with.
#[derive(Clone)]
pub struct Connection {
    backend: Backend,
    display: WlDisplay,
}

impl Connection {
    /// Resolve a compositor socket the way every Wayland client does:
    /// prefer an already-open fd handed down in `WAYLAND_SOCKET` (used when
    /// a parent process execs the client after connecting for it),
    /// otherwise dial `$XDG_RUNTIME_DIR/$WAYLAND_DISPLAY` (defaulting the
    /// display name to `wayland-0`).
    pub fn connect_to_env() -> Result<Connection, ConnectError> {
        if let Some(stream) = stream_from_env_socket()? {
            return Ok(Self::from_stream(stream));
        }
        let path = socket_path_from_env()?;
        let stream = UnixStream::connect(&path)?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: UnixStream) -> Connection {
        let backend = Backend::connect(stream, &wl_display::INTERFACE);
        let display = WlDisplay::from_id(backend.display_id());
        Connection { backend, display }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn display(&self) -> &WlDisplay {
        &self.display
    }

    /// Create a registry and let it accumulate `global`/`global_remove`
    /// events, without blocking for the first batch to arrive. Callers
    /// almost always want [`Connection::round_trip`] right after this.
    pub fn get_registry(&self) -> Result<(WlRegistry, Arc<crate::registry::Registry>), WaylandError> {
        let registry_state = Arc::new(crate::registry::Registry::new());
        let listener: Arc<dyn WlRegistryListener> = registry_state.clone();
        let registry = self.display.get_registry(&self.backend, listener)?;
        Ok((registry, registry_state))
    }

    /// Send `wl_display.sync` and block the calling thread until the
    /// server has processed every request sent before this call. This is
    /// the only operation in this crate that blocks a thread other than
    /// the background reader; it works by registering a throwaway
    /// `wl_callback` listener that flips an `AtomicBool` the reader thread
    /// then wakes us up to check.
    pub fn round_trip(&self) -> Result<(), WaylandError> {
        let done = Arc::new(AtomicBool::new(false));
        let listener: Arc<dyn WlCallbackListener> = Arc::new(SyncListener { done: done.clone() });
        let _callback: WlCallback = self.display.sync(&self.backend, listener)?;
        self.backend.flush()?;
        self.backend.block_until(&done)
    }
}

struct SyncListener {
    done: Arc<AtomicBool>,
}

impl WlCallbackListener for SyncListener {
    fn done(&self, _proxy: &WlCallback, _callback_data: u32) {
        self.done.store(true, Ordering::Release);
    }
}

fn stream_from_env_socket() -> Result<Option<UnixStream>, ConnectError> {
    let Some(value) = env::var_os("WAYLAND_SOCKET") else {
        return Ok(None);
    };
    let raw: RawFd = value
        .to_string_lossy()
        .parse()
        .map_err(|_| ConnectError::InvalidFd(value.to_string_lossy().into_owned()))?;
    // SAFETY: WAYLAND_SOCKET is documented to hold an fd the parent process
    // opened and is handing off ownership of to this process.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };
    Ok(Some(UnixStream::from(fd)))
}

fn socket_path_from_env() -> Result<PathBuf, ConnectError> {
    let runtime_dir = env::var_os("XDG_RUNTIME_DIR").ok_or(ConnectError::NoCompositor)?;
    let display = env::var_os("WAYLAND_DISPLAY").unwrap_or_else(|| "wayland-0".into());
    let mut path = PathBuf::from(runtime_dir);
    path.push(display);
    Ok(path)
}
