//! Exercises registry binding and the round-trip barrier against a
//! hand-written fake compositor speaking raw wire bytes over a socket
//! pair, rather than a real `wayland-server`.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::thread;

use wayland_client::Connection;

const DISPLAY_ID: u32 = 1;

fn encode_header(sender_id: u32, opcode: u16, arg_words: &[u8]) -> Vec<u8> {
    let size = (8 + arg_words.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&sender_id.to_ne_bytes());
    out.extend_from_slice(&(((size) << 16) | opcode as u32).to_ne_bytes());
    out.extend_from_slice(arg_words);
    out
}

fn encode_uint(v: u32) -> Vec<u8> {
    v.to_ne_bytes().to_vec()
}

fn encode_string(s: &str) -> Vec<u8> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    let len = bytes.len() as u32;
    let pad = (4 - (bytes.len() % 4)) % 4;
    bytes.extend(std::iter::repeat(0u8).take(pad));
    let mut out = len.to_ne_bytes().to_vec();
    out.extend(bytes);
    out
}

/// Read exactly one wire message's header + payload, given that none of
/// the messages this fake server receives in this test carry fds.
fn read_message(stream: &mut UnixStream) -> (u32, u16, Vec<u8>) {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).unwrap();
    let sender_id = u32::from_ne_bytes(header[0..4].try_into().unwrap());
    let word = u32::from_ne_bytes(header[4..8].try_into().unwrap());
    let opcode = (word & 0xFFFF) as u16;
    let size = (word >> 16) as usize;
    let mut payload = vec![0u8; size - 8];
    stream.read_exact(&mut payload).unwrap();
    (sender_id, opcode, payload)
}

fn read_u32_at(payload: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes(payload[offset..offset + 4].try_into().unwrap())
}

#[test]
fn registry_binding_and_round_trip() {
    let (client_sock, mut server_sock) = UnixStream::pair().unwrap();

    let server = thread::spawn(move || {
        // wl_display.get_registry(registry: new_id)
        let (sender, opcode, payload) = read_message(&mut server_sock);
        assert_eq!(sender, DISPLAY_ID);
        assert_eq!(opcode, 1);
        let registry_id = read_u32_at(&payload, 0);

        // wl_registry.global(name: uint, interface: string, version: uint)
        let mut args = encode_uint(42);
        args.extend(encode_string("wl_shm"));
        args.extend(encode_uint(1));
        let global_event = encode_header(registry_id, 0, &args);
        server_sock.write_all(&global_event).unwrap();

        // wl_display.sync(callback: new_id)
        let (sender, opcode, payload) = read_message(&mut server_sock);
        assert_eq!(sender, DISPLAY_ID);
        assert_eq!(opcode, 0);
        let callback_id = read_u32_at(&payload, 0);

        let done_event = encode_header(callback_id, 0, &encode_uint(0));
        server_sock.write_all(&done_event).unwrap();
    });

    let conn = Connection::from_stream(client_sock);
    let (_registry, state) = conn.get_registry().unwrap();
    conn.round_trip().unwrap();

    let globals = state.globals();
    assert_eq!(globals.len(), 1);
    assert_eq!(globals[0].name, 42);
    assert_eq!(globals[0].interface, "wl_shm");
    assert_eq!(globals[0].version, 1);

    server.join().unwrap();
}

#[test]
fn server_error_fails_pending_round_trip() {
    let (client_sock, mut server_sock) = UnixStream::pair().unwrap();

    let server = thread::spawn(move || {
        let (sender, opcode, _payload) = read_message(&mut server_sock);
        assert_eq!(sender, DISPLAY_ID);
        assert_eq!(opcode, 0);

        // wl_display.error(object_id: object, code: uint, message: string)
        let mut args = encode_uint(DISPLAY_ID);
        args.extend(encode_uint(3));
        args.extend(encode_string("boom"));
        let error_event = encode_header(DISPLAY_ID, 0, &args);
        server_sock.write_all(&error_event).unwrap();
    });

    let conn = Connection::from_stream(client_sock);
    let err = conn.round_trip().unwrap_err();
    assert!(matches!(err, wayland_client::WaylandError::ServerProtocol(_)));

    server.join().unwrap();
}
