//! Tracking advertised globals and binding them to concrete proxies.
//!
//! The upstream crate this one is modeled on parameterizes its registry
//! state over an application-defined `Dispatch<State>` so that global
//! binding can be wired straight into a user event loop. That
//! indirection earns nothing here, since a bind only ever needs the
//! advertised name, interface and version to hand back to
//! `wl_registry.bind`, so this is a plain, ungeneric accumulator instead.

use std::sync::{Arc, Mutex};

use wayland_backend::client::{Backend, ObjectData, ObjectId};
use wayland_backend::protocol::Interface;
use wayland_backend::WaylandError;

use crate::protocol::wl_registry::{WlRegistry, WlRegistryListener};

/// One `wl_registry.global` advertisement, as received.
#[derive(Debug, Clone)]
pub struct Global {
    pub name: u32,
    pub interface: String,
    pub version: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum GlobalBindingError {
    /// `bind_global` requires exactly one advertised instance of the
    /// interface; zero or more than one both fail this way rather than
    /// silently picking a global the caller didn't ask for.
    #[error("expected exactly one global for interface `{0}`, found {1}")]
    AmbiguousOrMissingGlobal(String, usize),
    #[error("interface `{interface}` has no global at index {index} (advertised {advertised})")]
    GlobalIndexOutOfRange { interface: String, index: usize, advertised: usize },
    #[error(transparent)]
    Wayland(#[from] WaylandError),
}

/// Accumulates every `global`/`global_remove` event delivered to a
/// `wl_registry`. A connection typically creates one of these via
/// [`crate::Connection::get_registry`] and performs a
/// [`crate::Connection::round_trip`] to let the first batch of globals
/// arrive before binding anything.
pub struct Registry {
    globals: Mutex<Vec<Global>>,
}

impl Registry {
    pub(crate) fn new() -> Registry {
        Registry { globals: Mutex::new(Vec::new()) }
    }

    pub fn globals(&self) -> Vec<Global> {
        self.globals.lock().unwrap().clone()
    }

    /// How many globals are currently advertised for `interface_name`.
    /// Distinct interfaces that can have more than one live instance
    /// (outputs, seats) are the reason [`Registry::bind_global_index`]
    /// exists alongside the exactly-one [`Registry::bind_global`].
    pub fn num_globals(&self, interface_name: &str) -> usize {
        self.globals.lock().unwrap().iter().filter(|g| g.interface == interface_name).count()
    }

    fn matching(&self, interface_name: &str) -> Vec<Global> {
        self.globals.lock().unwrap().iter().filter(|g| g.interface == interface_name).cloned().collect()
    }

    /// Bind the single advertised global matching `interface.name`. Fails
    /// with [`GlobalBindingError::AmbiguousOrMissingGlobal`] unless
    /// exactly one instance is advertised; use
    /// [`Registry::bind_global_index`] for interfaces the compositor may
    /// advertise more than once. The version requested from the server is
    /// clamped to whatever the server actually advertised, since asking
    /// for more than it offers is a protocol error.
    pub fn bind_global(
        &self,
        registry: &WlRegistry,
        backend: &Backend,
        interface: &'static Interface,
        max_version: u32,
        listener: Arc<dyn ObjectData>,
    ) -> Result<ObjectId, GlobalBindingError> {
        let matches = self.matching(interface.name);
        if matches.len() != 1 {
            return Err(GlobalBindingError::AmbiguousOrMissingGlobal(interface.name.to_string(), matches.len()));
        }
        self.bind_one(registry, backend, interface, max_version, &matches[0], listener)
    }

    /// Bind the `index`-th (0-based, in advertisement order) global
    /// matching `interface.name`. Meant for interfaces a compositor can
    /// legitimately advertise more than once, such as `wl_output` with
    /// multiple monitors.
    pub fn bind_global_index(
        &self,
        registry: &WlRegistry,
        backend: &Backend,
        interface: &'static Interface,
        max_version: u32,
        index: usize,
        listener: Arc<dyn ObjectData>,
    ) -> Result<ObjectId, GlobalBindingError> {
        let matches = self.matching(interface.name);
        let global = matches.get(index).ok_or_else(|| GlobalBindingError::GlobalIndexOutOfRange {
            interface: interface.name.to_string(),
            index,
            advertised: matches.len(),
        })?;
        self.bind_one(registry, backend, interface, max_version, global, listener)
    }

    fn bind_one(
        &self,
        registry: &WlRegistry,
        backend: &Backend,
        interface: &'static Interface,
        max_version: u32,
        global: &Global,
        listener: Arc<dyn ObjectData>,
    ) -> Result<ObjectId, GlobalBindingError> {
        let version = max_version.min(global.version);
        let id = registry.bind(backend, global.name, interface, version, listener)?;
        Ok(id)
    }
}

impl WlRegistryListener for Registry {
    fn global(&self, _proxy: &WlRegistry, name: u32, interface: String, version: u32) {
        self.globals.lock().unwrap().push(Global { name, interface, version });
    }

    fn global_remove(&self, _proxy: &WlRegistry, name: u32) {
        self.globals.lock().unwrap().retain(|g| g.name != name);
    }
}
