//! Emits one `pub mod <interface>` block per interface, textually, into a
//! single Rust source file meant to be `include!()`d by `wayland-client`.
//!
//! This mirrors the older, pre-`proc_macro` generation pipeline in the
//! Smithay lineage (a `build.rs` calling a generator function that writes
//! straight to an `OUT_DIR` file with `write!`/`writeln!`) rather than
//! building a `proc_macro2::TokenStream` — there is no compiler available
//! to validate the emitted tokens against here, so plain text that a
//! human could proofread is the safer target.

use std::fmt::Write as _;

use crate::ast::{Arg, ArgType, Enum, Interface, Message, Protocol};

pub fn generate_client_code(protocol: &Protocol) -> String {
    let mut out = String::new();
    writeln!(out, "// @generated by wayland-scanner from the `{}` protocol. Do not edit.", protocol.name).unwrap();
    writeln!(out).unwrap();

    for interface in &protocol.interfaces {
        emit_interface(&mut out, interface);
    }

    out
}

fn camel(name: &str) -> String {
    name.split('_').map(|part| {
        let mut c = part.chars();
        match c.next() {
            Some(first) => first.to_uppercase().collect::<String>() + c.as_str(),
            None => String::new(),
        }
    }).collect()
}

fn emit_interface(out: &mut String, iface: &Interface) {
    let struct_name = camel(&iface.name);
    writeln!(out, "pub mod {} {{", iface.name).unwrap();
    writeln!(out, "    #![allow(clippy::all)]").unwrap();
    writeln!(out, "    use super::*;").unwrap();
    writeln!(out).unwrap();

    emit_interface_static(out, iface);
    for e in &iface.enums {
        emit_enum(out, e);
    }

    writeln!(out, "    #[derive(Debug, Clone)]").unwrap();
    writeln!(out, "    pub struct {struct_name} {{").unwrap();
    writeln!(out, "        pub(crate) id: wayland_backend::client::ObjectId,").unwrap();
    writeln!(out, "    }}").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "    impl {struct_name} {{").unwrap();
    writeln!(out, "        pub fn id(&self) -> &wayland_backend::client::ObjectId {{ &self.id }}").unwrap();
    writeln!(out, "        pub fn from_id(id: wayland_backend::client::ObjectId) -> Self {{ Self {{ id }} }}").unwrap();
    writeln!(out).unwrap();
    for (opcode, req) in iface.requests.iter().enumerate() {
        emit_request(out, &struct_name, opcode as u16, req);
    }
    writeln!(out, "    }}").unwrap();
    writeln!(out).unwrap();

    // Emitted unconditionally, even for interfaces with no events (e.g.
    // `wl_region`): every interface that can be the target of a `new_id`
    // request needs a `{Iface}Listener`/`{Iface}Router` pair so that
    // `emit_request` can type that request's listener parameter precisely
    // instead of falling back to the untyped `Arc<dyn ObjectData>`.
    emit_listener_trait(out, &struct_name, iface);
    emit_dispatch_router(out, &struct_name, iface);

    writeln!(out, "}}").unwrap();
    writeln!(out).unwrap();
}

fn emit_interface_static(out: &mut String, iface: &Interface) {
    let upper = iface.name.to_uppercase();
    emit_message_array(out, &format!("{upper}_REQUESTS"), iface, &iface.requests);
    emit_message_array(out, &format!("{upper}_EVENTS"), iface, &iface.events);

    writeln!(out, "    pub static INTERFACE: wayland_backend::protocol::Interface = wayland_backend::protocol::Interface {{").unwrap();
    writeln!(out, "        name: \"{}\",", iface.name).unwrap();
    writeln!(out, "        version: {},", iface.version).unwrap();
    writeln!(out, "        requests: &{upper}_REQUESTS,").unwrap();
    writeln!(out, "        events: &{upper}_EVENTS,").unwrap();
    writeln!(out, "    }};").unwrap();
    writeln!(out).unwrap();
}

fn emit_message_array(out: &mut String, const_name: &str, _iface: &Interface, messages: &[Message]) {
    writeln!(
        out,
        "    static {const_name}: [wayland_backend::protocol::MessageDesc; {}] = [",
        messages.len()
    )
    .unwrap();
    for msg in messages {
        let sig = wire_signature(msg);
        write!(out, "        wayland_backend::protocol::MessageDesc {{ name: \"{}\", signature: &[", msg.name).unwrap();
        for (i, t) in sig.iter().enumerate() {
            if i > 0 {
                write!(out, ", ").unwrap();
            }
            write!(out, "{}", argument_type_tokens(*t)).unwrap();
        }
        write!(out, "], is_destructor: {}, child_interface: ", msg.is_destructor).unwrap();
        match msg.new_id_arg().and_then(|a| a.interface.as_deref()) {
            Some(child) => write!(out, "Some(&super::{child}::INTERFACE)").unwrap(),
            None => write!(out, "None").unwrap(),
        }
        writeln!(out, " }},").unwrap();
    }
    writeln!(out, "    ];").unwrap();
}

/// Wire-level argument types for a message. A `new_id` argument with no
/// statically declared interface (the `wl_registry.bind` shape) expands
/// to three wire slots: the target interface name, its version, and the
/// id itself.
fn wire_signature(msg: &Message) -> Vec<ArgType> {
    let mut sig = Vec::new();
    for arg in &msg.args {
        match arg.typ {
            Some(ArgType::NewId) if arg.interface.is_none() => {
                sig.push(ArgType::String);
                sig.push(ArgType::Uint);
                sig.push(ArgType::NewId);
            }
            Some(t) => sig.push(t),
            None => {}
        }
    }
    sig
}

fn argument_type_tokens(t: ArgType) -> &'static str {
    match t {
        ArgType::Int => "wayland_backend::protocol::ArgumentType::Int",
        ArgType::Uint => "wayland_backend::protocol::ArgumentType::Uint",
        ArgType::Fixed => "wayland_backend::protocol::ArgumentType::Fixed",
        ArgType::String => "wayland_backend::protocol::ArgumentType::Str { allow_null: false }",
        ArgType::Object => "wayland_backend::protocol::ArgumentType::Object { allow_null: true }",
        ArgType::NewId => "wayland_backend::protocol::ArgumentType::NewId",
        ArgType::Array => "wayland_backend::protocol::ArgumentType::Array",
        ArgType::Fd => "wayland_backend::protocol::ArgumentType::Fd",
    }
}

fn emit_enum(out: &mut String, e: &Enum) {
    let enum_name = camel(&e.name);
    if e.bitfield {
        writeln!(out, "    bitflags::bitflags! {{").unwrap();
        writeln!(out, "        #[derive(Debug, Clone, Copy, PartialEq, Eq)]").unwrap();
        writeln!(out, "        pub struct {enum_name}: u32 {{").unwrap();
        for entry in &e.entries {
            writeln!(out, "            const {} = {};", entry.name.to_uppercase(), entry.value).unwrap();
        }
        writeln!(out, "        }}").unwrap();
        writeln!(out, "    }}").unwrap();
    } else {
        writeln!(out, "    #[derive(Debug, Clone, Copy, PartialEq, Eq)]").unwrap();
        writeln!(out, "    #[repr(u32)]").unwrap();
        writeln!(out, "    pub enum {enum_name} {{").unwrap();
        for entry in &e.entries {
            writeln!(out, "        {} = {},", camel(&entry.name), entry.value).unwrap();
        }
        writeln!(out, "    }}").unwrap();
        writeln!(out).unwrap();
        writeln!(out, "    impl {enum_name} {{").unwrap();
        writeln!(out, "        pub fn from_u32(v: u32) -> wayland_backend::protocol::WEnum<Self> {{").unwrap();
        writeln!(out, "            match v {{").unwrap();
        for entry in &e.entries {
            writeln!(out, "                {} => wayland_backend::protocol::WEnum::Value(Self::{}),", entry.value, camel(&entry.name)).unwrap();
        }
        writeln!(out, "                other => wayland_backend::protocol::WEnum::Unknown(other),").unwrap();
        writeln!(out, "            }}").unwrap();
        writeln!(out, "        }}").unwrap();
        writeln!(out, "    }}").unwrap();
    }
    writeln!(out).unwrap();
}

fn emit_request(out: &mut String, struct_name: &str, opcode: u16, req: &Message) {
    let new_id = req.new_id_arg();
    let polymorphic = new_id.map(|a| a.interface.is_none()).unwrap_or(false);

    write!(out, "        pub fn {}(&self, backend: &wayland_backend::client::Backend", req.name).unwrap();
    for arg in &req.args {
        if arg.typ == Some(ArgType::NewId) {
            continue;
        }
        write!(out, ", {}: {}", safe_ident(&arg.name), request_param_type(arg)).unwrap();
    }
    let return_type = match new_id {
        Some(a) => match &a.interface {
            Some(child) => format!("{child}::{}", camel(child)),
            None => "wayland_backend::client::ObjectId".to_string(),
        },
        None => "()".to_string(),
    };
    if polymorphic {
        write!(out, ", target_interface: &'static wayland_backend::protocol::Interface, target_version: u32").unwrap();
    }
    if new_id.is_some() {
        // A statically known target interface gets its own
        // `{Iface}Listener` trait as the parameter type, so passing a
        // listener built for the wrong interface is a compile error.
        // `wl_registry.bind` and friends, where the target interface is
        // chosen by the caller at runtime, keep the untyped
        // `Arc<dyn ObjectData>` and rely on `Backend::send_request`'s
        // `ListenerMismatch` check instead.
        match new_id.and_then(|a| a.interface.as_deref()) {
            Some(child) => write!(out, ", listener: std::sync::Arc<dyn {child}::{}Listener>", camel(child)).unwrap(),
            None => write!(out, ", listener: std::sync::Arc<dyn wayland_backend::client::ObjectData>").unwrap(),
        }
    }
    writeln!(out, ") -> Result<{return_type}, wayland_backend::WaylandError> {{").unwrap();

    writeln!(out, "            use wayland_backend::wire::Argument;").unwrap();
    writeln!(out, "            let mut args: smallvec::SmallVec<[Argument<std::os::unix::io::OwnedFd>; wayland_backend::wire::INLINE_ARGS]> = smallvec::smallvec![];").unwrap();
    for arg in &req.args {
        emit_request_arg_push(out, arg, polymorphic);
    }

    let child_expr = match new_id {
        Some(a) => match &a.interface {
            Some(child) => format!("Some((&{child}::INTERFACE, {child}::{}Router::new(listener)))", camel(child)),
            None => "Some((target_interface, listener))".to_string(),
        },
        None => "None".to_string(),
    };

    writeln!(out, "            let created = backend.send_request(&self.id, {opcode}, args, {child_expr})?;").unwrap();
    match new_id {
        Some(Arg { interface: Some(child), .. }) => {
            writeln!(out, "            Ok({child}::{}::from_id(created.expect(\"request declares a new_id\")))", camel(child)).unwrap();
        }
        Some(Arg { interface: None, .. }) => {
            writeln!(out, "            Ok(created.expect(\"request declares a new_id\"))").unwrap();
        }
        None => {
            writeln!(out, "            let _ = created;").unwrap();
            writeln!(out, "            Ok(())").unwrap();
        }
    }
    writeln!(out, "        }}").unwrap();
    writeln!(out).unwrap();
}

fn request_param_type(arg: &Arg) -> String {
    match arg.typ {
        Some(ArgType::Int) => "i32".to_string(),
        Some(ArgType::Uint) => "u32".to_string(),
        Some(ArgType::Fixed) => "f64".to_string(),
        Some(ArgType::String) => "&str".to_string(),
        Some(ArgType::Object) => "Option<&wayland_backend::client::ObjectId>".to_string(),
        Some(ArgType::Array) => "&[u8]".to_string(),
        Some(ArgType::Fd) => "std::os::unix::io::OwnedFd".to_string(),
        Some(ArgType::NewId) => unreachable!("new_id args are not surfaced as parameters"),
        None => "u32".to_string(),
    }
}

fn emit_request_arg_push(out: &mut String, arg: &Arg, polymorphic_new_id: bool) {
    let name = safe_ident(&arg.name);
    match arg.typ {
        Some(ArgType::Int) => writeln!(out, "            args.push(Argument::Int({name}));").unwrap(),
        Some(ArgType::Uint) => writeln!(out, "            args.push(Argument::Uint({name}));").unwrap(),
        Some(ArgType::Fixed) => writeln!(out, "            args.push(Argument::Fixed(wayland_backend::wire::double_to_fixed({name})));").unwrap(),
        Some(ArgType::String) => {
            writeln!(out, "            args.push(Argument::Str(Some(Box::new(std::ffi::CString::new({name}).expect(\"nul byte in string argument\")))));").unwrap();
        }
        Some(ArgType::Object) => {
            writeln!(out, "            args.push(Argument::Object({name}.map(|o| o.protocol_id()).unwrap_or(0)));").unwrap();
        }
        Some(ArgType::Array) => writeln!(out, "            args.push(Argument::Array(Box::new({name}.to_vec())));").unwrap(),
        Some(ArgType::Fd) => writeln!(out, "            args.push(Argument::Fd({name}));").unwrap(),
        Some(ArgType::NewId) => {
            if polymorphic_new_id {
                writeln!(out, "            args.push(Argument::Str(Some(Box::new(std::ffi::CString::new(target_interface.name).unwrap()))));").unwrap();
                writeln!(out, "            args.push(Argument::Uint(target_version));").unwrap();
            }
            writeln!(out, "            args.push(Argument::NewId(0));").unwrap();
        }
        None => writeln!(out, "            args.push(Argument::Uint({name}));").unwrap(),
    }
}

fn emit_listener_trait(out: &mut String, struct_name: &str, iface: &Interface) {
    writeln!(out, "    pub trait {struct_name}Listener: Send + Sync {{").unwrap();
    for event in &iface.events {
        write!(out, "        fn {}(&self, proxy: &{struct_name}", event.name).unwrap();
        for arg in &event.args {
            write!(out, ", {}: {}", safe_ident(&arg.name), event_param_type(arg)).unwrap();
        }
        writeln!(out, ") {{ let _ = proxy; }}").unwrap();
    }
    writeln!(out, "    }}").unwrap();
    writeln!(out).unwrap();
}

fn event_param_type(arg: &Arg) -> String {
    match arg.typ {
        Some(ArgType::Int) => "i32".to_string(),
        Some(ArgType::Uint) => "u32".to_string(),
        Some(ArgType::Fixed) => "f64".to_string(),
        Some(ArgType::String) => "String".to_string(),
        Some(ArgType::Object) => "u32".to_string(),
        Some(ArgType::Array) => "Vec<u8>".to_string(),
        Some(ArgType::Fd) => "std::os::unix::io::OwnedFd".to_string(),
        Some(ArgType::NewId) => "wayland_backend::client::ObjectId".to_string(),
        None => "u32".to_string(),
    }
}

fn emit_dispatch_router(out: &mut String, struct_name: &str, iface: &Interface) {
    writeln!(out, "    pub struct {struct_name}Router {{").unwrap();
    writeln!(out, "        pub(crate) listener: std::sync::Arc<dyn {struct_name}Listener>,").unwrap();
    writeln!(out, "    }}").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "    impl {struct_name}Router {{").unwrap();
    writeln!(out, "        pub fn new(listener: std::sync::Arc<dyn {struct_name}Listener>) -> std::sync::Arc<dyn wayland_backend::client::ObjectData> {{").unwrap();
    writeln!(out, "            std::sync::Arc::new(Self {{ listener }})").unwrap();
    writeln!(out, "        }}").unwrap();
    writeln!(out, "    }}").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "    impl wayland_backend::client::ObjectData for {struct_name}Router {{").unwrap();
    writeln!(out, "        fn event(self: std::sync::Arc<Self>, _backend: &wayland_backend::client::Backend, msg: wayland_backend::wire::Message<std::os::unix::io::OwnedFd>) -> Option<std::sync::Arc<dyn wayland_backend::client::ObjectData>> {{").unwrap();
    writeln!(out, "            use wayland_backend::wire::Argument;").unwrap();
    writeln!(out, "            let proxy = {struct_name} {{ id: wayland_backend::client::ObjectId::for_new_id(msg.sender_id, &INTERFACE) }};").unwrap();
    writeln!(out, "            let mut args = msg.args.into_iter();").unwrap();
    writeln!(out, "            match msg.opcode {{").unwrap();
    for (opcode, event) in iface.events.iter().enumerate() {
        writeln!(out, "                {opcode} => {{").unwrap();
        let mut call_args = Vec::new();
        for (i, arg) in event.args.iter().enumerate() {
            let var = format!("a{i}");
            emit_event_arg_decode(out, &var, arg);
            call_args.push(var);
        }
        writeln!(out, "                    self.listener.{}(&proxy{});", event.name, call_args.iter().map(|a| format!(", {a}")).collect::<String>()).unwrap();
        writeln!(out, "                    None").unwrap();
        writeln!(out, "                }}").unwrap();
    }
    writeln!(out, "                _ => {{ #[cfg(feature = \"log\")] log::debug!(\"unknown opcode {{}} for {}\", msg.opcode); None }}", iface.name).unwrap();
    writeln!(out, "            }}").unwrap();
    writeln!(out, "        }}").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "        fn destroyed(&self, _object_id: wayland_backend::client::ObjectId) {{}}").unwrap();
    writeln!(out).unwrap();
    writeln!(out, "        fn interface(&self) -> &'static wayland_backend::protocol::Interface {{ &INTERFACE }}").unwrap();
    writeln!(out, "    }}").unwrap();
    writeln!(out).unwrap();
}

fn emit_event_arg_decode(out: &mut String, var: &str, arg: &Arg) {
    match arg.typ {
        Some(ArgType::Int) => writeln!(out, "                    let {var} = match args.next() {{ Some(Argument::Int(v)) => v, _ => 0 }};").unwrap(),
        Some(ArgType::Uint) => writeln!(out, "                    let {var} = match args.next() {{ Some(Argument::Uint(v)) => v, _ => 0 }};").unwrap(),
        Some(ArgType::Fixed) => writeln!(out, "                    let {var} = match args.next() {{ Some(Argument::Fixed(v)) => wayland_backend::wire::fixed_to_double(v), _ => 0.0 }};").unwrap(),
        Some(ArgType::String) => writeln!(out, "                    let {var} = match args.next() {{ Some(Argument::Str(Some(s))) => s.to_string_lossy().into_owned(), _ => String::new() }};").unwrap(),
        Some(ArgType::Object) => writeln!(out, "                    let {var} = match args.next() {{ Some(Argument::Object(v)) => v, _ => 0 }};").unwrap(),
        Some(ArgType::Array) => writeln!(out, "                    let {var} = match args.next() {{ Some(Argument::Array(a)) => *a, _ => Vec::new() }};").unwrap(),
        Some(ArgType::Fd) => writeln!(out, "                    let {var} = match args.next() {{ Some(Argument::Fd(f)) => f, _ => panic!(\"expected fd argument\") }};").unwrap(),
        Some(ArgType::NewId) => writeln!(out, "                    let {var} = match args.next() {{ Some(Argument::NewId(v)) => wayland_backend::client::ObjectId::for_new_id(v, &wayland_backend::protocol::ANONYMOUS_INTERFACE), _ => wayland_backend::client::ObjectId::null() }};").unwrap(),
        None => writeln!(out, "                    let {var} = match args.next() {{ Some(Argument::Uint(v)) => v, _ => 0 }};").unwrap(),
    }
}

fn safe_ident(name: &str) -> String {
    match name {
        "type" | "move" | "loop" | "box" | "mod" => format!("{name}_"),
        other => other.to_string(),
    }
}
