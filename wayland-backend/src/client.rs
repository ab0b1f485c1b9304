//! Connection lifecycle: socket ownership, the write lock, the background
//! reader thread, and request/event dispatch.

use std::fmt;
use std::os::unix::io::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use smallvec::SmallVec;

use crate::error::{InvalidId, WaylandError};
use crate::map::{ObjectMap, DISPLAY_ID};
use crate::protocol::{ArgumentType, Interface, ObjectInfo, ProtocolError};
use crate::socket::{BufferedSocket, Socket, SocketError};
use crate::wire::{Argument, Message, INLINE_ARGS};

/// An identifier for a live protocol object, scoped to the connection that
/// created it. Equality compares only the numeric id: since this runtime
/// never reuses an id after deletion (see design notes on id reuse), two
/// `ObjectId`s with the same number always name the same object over the
/// life of a connection.
#[derive(Clone)]
pub struct ObjectId {
    pub(crate) id: u32,
    pub(crate) interface: &'static Interface,
}

impl ObjectId {
    pub fn is_null(&self) -> bool {
        self.id == 0
    }

    pub fn null() -> ObjectId {
        ObjectId { id: 0, interface: &crate::protocol::ANONYMOUS_INTERFACE }
    }

    pub fn interface(&self) -> &'static Interface {
        self.interface
    }

    pub fn protocol_id(&self) -> u32 {
        self.id
    }

    /// Construct an id for an object the caller already knows the number
    /// and interface of, without going through [`Backend::send_request`].
    /// Used by generated code when a `new_id` arrives as an event argument
    /// rather than being allocated locally.
    pub fn for_new_id(id: u32, interface: &'static Interface) -> ObjectId {
        ObjectId { id, interface }
    }
}

impl PartialEq for ObjectId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for ObjectId {}

impl std::hash::Hash for ObjectId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.interface.name, self.id)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-object callback surface. Implementations receive every event
/// addressed to the object they're registered for, on the background
/// reader thread.
pub trait ObjectData: downcast_rs::DowncastSync {
    /// Handle one event. If the event declared a `new_id` argument, the
    /// implementation must return the `ObjectData` to install for the
    /// newly created child object.
    fn event(self: Arc<Self>, backend: &Backend, msg: Message<OwnedFd>) -> Option<Arc<dyn ObjectData>>;

    /// Called once the object has been removed from the object table,
    /// either because the client destroyed it or the server deleted it.
    fn destroyed(&self, object_id: ObjectId);

    /// The interface this listener was generated (or hand-written) for.
    /// `Backend::send_request` checks this against the interface a
    /// `new_id` request is actually creating, so a caller that hands the
    /// wrong `{Iface}Router` to a polymorphic constructor like
    /// `wl_registry.bind` gets `WaylandError::ListenerMismatch` instead of
    /// silently mis-dispatching every later event for that object.
    fn interface(&self) -> &'static Interface;
}

downcast_rs::impl_downcast!(sync ObjectData);

pub(crate) struct UninitObjectData;

impl ObjectData for UninitObjectData {
    fn event(self: Arc<Self>, _backend: &Backend, msg: Message<OwnedFd>) -> Option<Arc<dyn ObjectData>> {
        panic!("received an event for an object whose listener was never installed: {msg:?}");
    }
    fn destroyed(&self, _object_id: ObjectId) {}
    fn interface(&self) -> &'static Interface {
        &crate::protocol::ANONYMOUS_INTERFACE
    }
}

pub(crate) struct DumbObjectData;

impl ObjectData for DumbObjectData {
    fn event(self: Arc<Self>, _backend: &Backend, msg: Message<OwnedFd>) -> Option<Arc<dyn ObjectData>> {
        panic!("unexpected event delivered to a sentinel object: {msg:?}");
    }
    fn destroyed(&self, _object_id: ObjectId) {}
    fn interface(&self) -> &'static Interface {
        &crate::protocol::ANONYMOUS_INTERFACE
    }
}

struct ProtocolState {
    socket: BufferedSocket,
    map: ObjectMap,
    last_error: Option<WaylandError>,
    debug: bool,
}

impl ProtocolState {
    fn event_signature(&self, sender_id: u32, opcode: u16) -> Option<&'static [ArgumentType]> {
        self.map.lookup(sender_id).and_then(|entry| {
            entry.interface.events.get(opcode as usize).map(|desc| desc.signature)
        })
    }
}

struct Shared {
    protocol: Mutex<ProtocolState>,
    roundtrip_lock: Mutex<()>,
    roundtrip_cv: Condvar,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// A live connection to a Wayland server. Cloning shares the same
/// underlying socket and state; all clones observe the same object table
/// and the same sticky error once one occurs.
#[derive(Clone)]
pub struct Backend {
    inner: Arc<Shared>,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend").finish_non_exhaustive()
    }
}

impl Backend {
    /// Wrap an already-connected stream and start the background reader.
    /// `display_interface` is the generated `wl_display` interface
    /// descriptor, used only to label object id 1 for debugging; the
    /// backend itself special-cases `wl_display.error`/`delete_id` by
    /// object id rather than by looking up generated request/event
    /// tables, so it needs no other knowledge of the display interface.
    pub fn connect(stream: UnixStream, display_interface: &'static Interface) -> Backend {
        let debug = std::env::var_os("WAYLAND_DEBUG").is_some();
        let mut map = ObjectMap::new();
        let display_id = map.allocate_id();
        debug_assert_eq!(display_id, DISPLAY_ID);
        map.register(display_id, display_interface, Arc::new(DumbObjectData));

        let protocol = ProtocolState {
            socket: BufferedSocket::new(Socket::new(stream)),
            map,
            last_error: None,
            debug,
        };

        let inner = Arc::new(Shared {
            protocol: Mutex::new(protocol),
            roundtrip_lock: Mutex::new(()),
            roundtrip_cv: Condvar::new(),
            reader: Mutex::new(None),
        });

        let backend = Backend { inner };
        let reader_backend = backend.clone();
        let handle = std::thread::Builder::new()
            .name("wayland-reader".into())
            .spawn(move || reader_loop(reader_backend))
            .expect("failed to spawn wayland reader thread");
        *backend.inner.reader.lock().unwrap() = Some(handle);
        backend
    }

    pub fn display_id(&self) -> ObjectId {
        let proto = self.inner.protocol.lock().unwrap();
        let interface = proto.map.lookup(DISPLAY_ID).expect("display always registered").interface;
        ObjectId { id: DISPLAY_ID, interface }
    }

    pub fn last_error(&self) -> Option<WaylandError> {
        self.inner.protocol.lock().unwrap().last_error.clone()
    }

    pub fn flush(&self) -> Result<(), WaylandError> {
        let mut proto = self.inner.protocol.lock().unwrap();
        proto.socket.flush().map_err(|e| store_fault(&mut proto, transport_error(e)))
    }

    pub fn info(&self, id: &ObjectId) -> Result<ObjectInfo, InvalidId> {
        let proto = self.inner.protocol.lock().unwrap();
        let entry = proto.map.lookup(id.id).ok_or(InvalidId(id.id))?;
        Ok(ObjectInfo { id: id.id, interface: entry.interface, version: entry.interface.version })
    }

    pub fn get_data(&self, id: &ObjectId) -> Result<Arc<dyn ObjectData>, InvalidId> {
        let proto = self.inner.protocol.lock().unwrap();
        proto.map.lookup(id.id).map(|e| e.data.clone()).ok_or(InvalidId(id.id))
    }

    pub fn set_data(&self, id: &ObjectId, data: Arc<dyn ObjectData>) -> Result<(), InvalidId> {
        let mut proto = self.inner.protocol.lock().unwrap();
        if !proto.map.contains(id.id) {
            return Err(InvalidId(id.id));
        }
        proto.map.register(id.id, id.interface, data);
        Ok(())
    }

    /// Send one request. `args` must already match the request's
    /// signature; if the request declares a `new_id`, exactly one
    /// `Argument::NewId` placeholder (value ignored) must be present and
    /// `child` must describe the object to create. Allocation,
    /// registration and the `sendmsg` call happen atomically under the
    /// connection's write lock, as required for positional new_id
    /// association with the server.
    pub fn send_request(
        &self,
        sender: &ObjectId,
        opcode: u16,
        mut args: SmallVec<[Argument<OwnedFd>; INLINE_ARGS]>,
        child: Option<(&'static Interface, Arc<dyn ObjectData>)>,
    ) -> Result<Option<ObjectId>, WaylandError> {
        let mut proto = self.inner.protocol.lock().unwrap();
        if let Some(err) = proto.last_error.clone() {
            return Err(err);
        }
        if !proto.map.contains(sender.id) {
            return Err(WaylandError::ObjectState(sender.id));
        }

        let mut created = None;
        if let Some((interface, data)) = child {
            if data.interface().name != interface.name {
                return Err(WaylandError::ListenerMismatch {
                    expected: interface.name,
                    actual: data.interface().name,
                });
            }
            let new_id = proto.map.allocate_id();
            for arg in args.iter_mut() {
                if let Argument::NewId(slot) = arg {
                    *slot = new_id;
                }
            }
            proto.map.register(new_id, interface, data);
            created = Some(ObjectId { id: new_id, interface });
        }

        if proto.debug {
            log_sent(sender, opcode);
        }

        let is_destructor = sender.interface.requests.get(opcode as usize).map(|d| d.is_destructor).unwrap_or(false);

        let msg = Message { sender_id: sender.id, opcode, args };
        let result = proto.socket.write_message(&msg).and_then(|_| proto.socket.flush());
        if let Err(e) = result {
            let err = store_fault(&mut proto, transport_error(e));
            drop(proto);
            self.inner.roundtrip_cv.notify_all();
            return Err(err);
        }

        let removed = if is_destructor { proto.map.delete(sender.id) } else { None };
        drop(proto);
        if let Some(entry) = removed {
            entry.data.destroyed(sender.clone());
        }

        Ok(created)
    }

    /// Remove `id` from the object table and notify its listener, for
    /// requests that destroy their target on the client side without a
    /// server acknowledgement (as opposed to objects torn down via
    /// `delete_id`).
    pub fn destroy_object(&self, id: &ObjectId) {
        let entry = {
            let mut proto = self.inner.protocol.lock().unwrap();
            proto.map.delete(id.id)
        };
        if let Some(entry) = entry {
            entry.data.destroyed(id.clone());
        }
    }

    /// Block the calling thread until `done` is set (by some listener
    /// invoked on the reader thread) or the connection faults.
    pub fn block_until(&self, done: &AtomicBool) -> Result<(), WaylandError> {
        let mut guard = self.inner.roundtrip_lock.lock().unwrap();
        loop {
            if done.load(Ordering::Acquire) {
                return Ok(());
            }
            if let Some(err) = self.last_error() {
                return Err(err);
            }
            guard = self.inner.roundtrip_cv.wait(guard).unwrap();
        }
    }

    /// Close the socket; the reader thread exits on its next read error.
    pub fn disconnect(&self) {
        let mut proto = self.inner.protocol.lock().unwrap();
        if proto.last_error.is_none() {
            proto.last_error = Some(WaylandError::Transport("connection closed locally".into()));
        }
        // Shutdown is enough to wake the reader out of a blocking recvmsg.
        let _ = proto.socket.socket().stream().shutdown(std::net::Shutdown::Both);
        drop(proto);
        self.inner.roundtrip_cv.notify_all();
    }
}

fn transport_error(e: SocketError) -> WaylandError {
    WaylandError::Transport(e.to_string())
}

fn store_fault(proto: &mut ProtocolState, err: WaylandError) -> WaylandError {
    if proto.last_error.is_none() {
        proto.last_error = Some(err.clone());
    }
    proto.last_error.clone().unwrap()
}

#[cfg_attr(not(feature = "log"), allow(unused_variables))]
fn log_sent(sender: &ObjectId, opcode: u16) {
    #[cfg(feature = "log")]
    log::debug!(" -> {sender}.[{opcode}]");
}

#[cfg_attr(not(feature = "log"), allow(unused_variables))]
fn log_received(sender_id: u32, opcode: u16) {
    #[cfg(feature = "log")]
    log::debug!(" <- {sender_id}@[{opcode}]");
}

fn reader_loop(backend: Backend) {
    loop {
        let outcome = read_one_round(&backend);
        backend.inner.roundtrip_cv.notify_all();
        if matches!(outcome, ReadOutcome::Fatal) {
            break;
        }
    }
}

enum ReadOutcome {
    Progress,
    Fatal,
}

fn read_one_round(backend: &Backend) -> ReadOutcome {
    let mut proto = backend.inner.protocol.lock().unwrap();
    if proto.last_error.is_some() {
        return ReadOutcome::Fatal;
    }

    let msg = loop {
        let ProtocolState { socket, map, .. } = &mut *proto;
        match socket.try_read_message(|id, op| map.lookup(id).and_then(|e| e.interface.events.get(op as usize)).map(|d| d.signature)) {
            Ok(Some(msg)) => break msg,
            Ok(None) => {
                if let Err(e) = proto.socket.fill_incoming_buffer() {
                    store_fault(&mut proto, transport_error(e));
                    return ReadOutcome::Fatal;
                }
            }
            Err(e) => {
                store_fault(&mut proto, WaylandError::Framing(e.to_string()));
                return ReadOutcome::Fatal;
            }
        }
    };

    if proto.debug {
        log_received(msg.sender_id, msg.opcode);
    }

    if msg.sender_id == DISPLAY_ID {
        match handle_display_event(&mut proto, msg) {
            Some(ReadOutcome::Fatal) => return ReadOutcome::Fatal,
            _ => return ReadOutcome::Progress,
        }
    }

    let entry = match proto.map.lookup(msg.sender_id) {
        Some(e) => e,
        None => {
            log_ignored(msg.sender_id);
            return ReadOutcome::Progress;
        }
    };
    let sender_id = msg.sender_id;
    let interface = entry.interface;
    let event_desc = interface.events.get(msg.opcode as usize);
    let data = entry.data.clone();

    let new_id_value = find_new_id(&msg);
    if let (Some(id), Some(desc)) = (new_id_value, event_desc) {
        if let Some(child_interface) = desc.child_interface {
            proto.map.register(id, child_interface, Arc::new(UninitObjectData));
        }
    }

    let is_destructor = event_desc.map(|d| d.is_destructor).unwrap_or(false);
    drop(proto);

    let child_data = data.event(backend, msg);

    if let (Some(id), Some(desc)) = (new_id_value, event_desc) {
        if let Some(child_interface) = desc.child_interface {
            if let Some(child_data) = child_data {
                let mut proto = backend.inner.protocol.lock().unwrap();
                proto.map.register(id, child_interface, child_data);
            }
        }
    }

    if is_destructor {
        let removed = {
            let mut proto = backend.inner.protocol.lock().unwrap();
            proto.map.delete(sender_id)
        };
        if let Some(entry) = removed {
            entry.data.destroyed(ObjectId { id: sender_id, interface });
        }
    }

    ReadOutcome::Progress
}

fn find_new_id(msg: &Message<OwnedFd>) -> Option<u32> {
    msg.args.iter().find_map(|a| match a {
        Argument::NewId(id) => Some(*id),
        _ => None,
    })
}

fn log_ignored(sender_id: u32) {
    #[cfg(feature = "log")]
    log::debug!("event for unknown object {sender_id}, ignoring");
    #[cfg(not(feature = "log"))]
    let _ = sender_id;
}

fn handle_display_event(proto: &mut ProtocolState, msg: Message<OwnedFd>) -> Option<ReadOutcome> {
    match msg.opcode {
        0 => {
            // wl_display.error(object_id: object, code: uint, message: string)
            let mut args = msg.args.into_iter();
            let object_id = match args.next() {
                Some(Argument::Object(id)) => id,
                _ => 0,
            };
            let code = match args.next() {
                Some(Argument::Uint(c)) => c,
                _ => 0,
            };
            let message = match args.next() {
                Some(Argument::Str(Some(s))) => s.to_string_lossy().into_owned(),
                _ => String::new(),
            };
            let object_interface = proto.map.lookup(object_id).map(|e| e.interface.name).unwrap_or("<unknown>");
            let err = ProtocolError { code, object_id, object_interface, message };
            store_fault(proto, WaylandError::ServerProtocol(err));
            Some(ReadOutcome::Fatal)
        }
        1 => {
            // wl_display.delete_id(id: uint)
            let id = msg.args.into_iter().find_map(|a| match a {
                Argument::Uint(v) => Some(v),
                _ => None,
            });
            if let Some(id) = id {
                if let Some(entry) = proto.map.delete(id) {
                    entry.data.destroyed(ObjectId { id, interface: entry.interface });
                }
            }
            None
        }
        _ => None,
    }
}
