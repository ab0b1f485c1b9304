//! Message framing: argument encoding/decoding and the 8-byte message
//! header, independent of the socket that carries the bytes.

use std::collections::VecDeque;
use std::ffi::CString;
use std::os::unix::io::OwnedFd;

use smallvec::SmallVec;

use crate::protocol::ArgumentType;

/// Arguments are rarely more than four wide; inline storage avoids a heap
/// allocation for the common case.
pub const INLINE_ARGS: usize = 4;

#[derive(Debug)]
pub enum Argument<Fd> {
    Int(i32),
    Uint(u32),
    Fixed(i32),
    Str(Option<Box<CString>>),
    Object(u32),
    NewId(u32),
    Array(Box<Vec<u8>>),
    Fd(Fd),
}

impl<Fd> Argument<Fd> {
    pub fn arg_type(&self) -> ArgumentType {
        match self {
            Argument::Int(_) => ArgumentType::Int,
            Argument::Uint(_) => ArgumentType::Uint,
            Argument::Fixed(_) => ArgumentType::Fixed,
            Argument::Str(_) => ArgumentType::Str { allow_null: true },
            Argument::Object(_) => ArgumentType::Object { allow_null: true },
            Argument::NewId(_) => ArgumentType::NewId,
            Argument::Array(_) => ArgumentType::Array,
            Argument::Fd(_) => ArgumentType::Fd,
        }
    }
}

/// A single wire message: which object it targets, which opcode, and its
/// decoded argument list.
#[derive(Debug)]
pub struct Message<Fd> {
    pub sender_id: u32,
    pub opcode: u16,
    pub args: SmallVec<[Argument<Fd>; INLINE_ARGS]>,
}

#[derive(Debug, thiserror::Error)]
pub enum MessageWriteError {
    #[error("output buffer too small for message")]
    BufferTooSmall,
}

#[derive(Debug, thiserror::Error)]
pub enum MessageParseError {
    #[error("not enough bytes to decode message header")]
    ShortRead,
    #[error("message claims more payload than was received")]
    MissingData,
    #[error("no pending file descriptor available for an fd argument")]
    FdStarvation,
    #[error("message is not well-formed: {0}")]
    Malformed(&'static str),
}

fn pad4(len: usize) -> usize {
    (4 - (len % 4)) % 4
}

/// Convert a 24.8 signed fixed-point wire value to `f64` using the
/// bias-and-reinterpret technique: the magic offset forces the IEEE-754
/// mantissa to align such that the low 32 bits of the double's bit pattern
/// are exactly the fixed-point integer, without any rounding step.
pub fn fixed_to_double(bits: i32) -> f64 {
    let i: u64 = (((1023u64 + 44) << 52) + (1u64 << 51)).wrapping_add(bits as i64 as u64);
    let d = f64::from_bits(i);
    d - (3i64 << 43) as f64
}

/// The inverse of [`fixed_to_double`].
pub fn double_to_fixed(value: f64) -> i32 {
    let biased = value + (3i64 << (52 - 8)) as f64;
    biased.to_bits() as i32
}

/// Serialize one message into `payload`, appending any `Fd` arguments'
/// owned descriptors to `fds` in order. The header's size field is patched
/// in once the full payload length is known.
pub fn write_message(
    msg: &Message<OwnedFd>,
    payload: &mut Vec<u8>,
    fds: &mut Vec<OwnedFd>,
) -> Result<(), MessageWriteError> {
    let header_pos = payload.len();
    payload.extend_from_slice(&msg.sender_id.to_ne_bytes());
    payload.extend_from_slice(&0u32.to_ne_bytes()); // patched below

    for arg in &msg.args {
        match arg {
            Argument::Int(v) => payload.extend_from_slice(&v.to_ne_bytes()),
            Argument::Uint(v) => payload.extend_from_slice(&v.to_ne_bytes()),
            Argument::Fixed(v) => payload.extend_from_slice(&v.to_ne_bytes()),
            Argument::Object(v) | Argument::NewId(v) => payload.extend_from_slice(&v.to_ne_bytes()),
            Argument::Str(s) => {
                let bytes = s.as_ref().map(|c| c.as_bytes_with_nul()).unwrap_or(&[]);
                let len = bytes.len() as u32;
                payload.extend_from_slice(&len.to_ne_bytes());
                payload.extend_from_slice(bytes);
                payload.extend(std::iter::repeat(0u8).take(pad4(bytes.len())));
            }
            Argument::Array(a) => {
                let len = a.len() as u32;
                payload.extend_from_slice(&len.to_ne_bytes());
                payload.extend_from_slice(a);
                payload.extend(std::iter::repeat(0u8).take(pad4(a.len())));
            }
            Argument::Fd(fd) => {
                fds.push(clone_owned_fd(fd));
            }
        }
    }

    let total_len = payload.len() - header_pos;
    if total_len > u16::MAX as usize {
        return Err(MessageWriteError::BufferTooSmall);
    }
    let patched = ((total_len as u32) << 16) | (msg.opcode as u32);
    payload[header_pos + 4..header_pos + 8].copy_from_slice(&patched.to_ne_bytes());
    Ok(())
}

fn clone_owned_fd(fd: &OwnedFd) -> OwnedFd {
    use std::os::unix::io::AsFd;
    fd.as_fd().try_clone_to_owned().expect("dup of outgoing fd failed")
}

/// Parse exactly one message out of `data`, using `signature` to know how
/// many bytes/fds each argument consumes. Returns the message and the
/// number of bytes of `data` it consumed.
pub fn parse_message(
    data: &[u8],
    signature: &[ArgumentType],
    fds: &mut VecDeque<OwnedFd>,
) -> Result<(Message<OwnedFd>, usize), MessageParseError> {
    if data.len() < 8 {
        return Err(MessageParseError::ShortRead);
    }
    let sender_id = u32::from_ne_bytes(data[0..4].try_into().unwrap());
    let word = u32::from_ne_bytes(data[4..8].try_into().unwrap());
    let opcode = (word & 0xFFFF) as u16;
    let size = (word >> 16) as usize;

    if size < 8 {
        return Err(MessageParseError::Malformed("message size smaller than header"));
    }
    if data.len() < size {
        return Err(MessageParseError::MissingData);
    }

    let mut cursor = &data[8..size];
    let mut args = SmallVec::with_capacity(signature.len());

    for arg_type in signature {
        let arg = match arg_type {
            ArgumentType::Int => {
                let v = read_u32(&mut cursor)? as i32;
                Argument::Int(v)
            }
            ArgumentType::Uint => Argument::Uint(read_u32(&mut cursor)?),
            ArgumentType::Fixed => Argument::Fixed(read_u32(&mut cursor)? as i32),
            ArgumentType::Object { .. } => Argument::Object(read_u32(&mut cursor)?),
            ArgumentType::NewId => Argument::NewId(read_u32(&mut cursor)?),
            ArgumentType::Str { .. } => {
                let len = read_u32(&mut cursor)? as usize;
                if len == 0 {
                    return Err(MessageParseError::Malformed("zero-length string argument"));
                }
                if cursor.len() < len {
                    return Err(MessageParseError::MissingData);
                }
                let (body, rest) = cursor.split_at(len);
                let pad = pad4(len);
                if rest.len() < pad {
                    return Err(MessageParseError::MissingData);
                }
                cursor = &rest[pad..];
                let cstr = CString::from_vec_with_nul(body.to_vec())
                    .map_err(|_| MessageParseError::Malformed("string argument missing NUL"))?;
                Argument::Str(Some(Box::new(cstr)))
            }
            ArgumentType::Array => {
                let len = read_u32(&mut cursor)? as usize;
                if cursor.len() < len {
                    return Err(MessageParseError::MissingData);
                }
                let (body, rest) = cursor.split_at(len);
                let pad = pad4(len);
                if rest.len() < pad {
                    return Err(MessageParseError::MissingData);
                }
                cursor = &rest[pad..];
                Argument::Array(Box::new(body.to_vec()))
            }
            ArgumentType::Fd => {
                let fd = fds.pop_front().ok_or(MessageParseError::FdStarvation)?;
                Argument::Fd(fd)
            }
        };
        args.push(arg);
    }

    Ok((Message { sender_id, opcode, args }, size))
}

fn read_u32(cursor: &mut &[u8]) -> Result<u32, MessageParseError> {
    if cursor.len() < 4 {
        return Err(MessageParseError::MissingData);
    }
    let (head, rest) = cursor.split_at(4);
    *cursor = rest;
    Ok(u32::from_ne_bytes(head.try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_point_round_trip() {
        assert_eq!(double_to_fixed(1.5), 0x0000_0180);
        assert_eq!(fixed_to_double(0x0000_0180), 1.5);
    }

    #[test]
    fn fixed_point_negative() {
        let bits = double_to_fixed(-1.5);
        assert_eq!(bits, -384);
        assert_eq!(bits as u32, 0xFFFF_FE80);
        assert_eq!(fixed_to_double(bits), -1.5);
    }

    #[test]
    fn header_patch_matches_example() {
        let msg = Message { sender_id: 2, opcode: 0, args: SmallVec::from_vec(vec![Argument::Uint(4)]) };
        let mut payload = Vec::new();
        let mut fds = Vec::new();
        write_message(&msg, &mut payload, &mut fds).unwrap();
        assert_eq!(payload, vec![2, 0, 0, 0, 0, 0, 0x0C, 0x00, 4, 0, 0, 0]);
    }

    #[test]
    fn string_padding_matches_example() {
        let msg = Message {
            sender_id: 1,
            opcode: 0,
            args: SmallVec::from_vec(vec![Argument::Str(Some(Box::new(
                CString::new("wl_shm").unwrap(),
            )))]),
        };
        let mut payload = Vec::new();
        let mut fds = Vec::new();
        write_message(&msg, &mut payload, &mut fds).unwrap();
        // header (8) + len(4) + "wl_shm\0"(7) + 1 pad byte
        assert_eq!(&payload[8..], &[7, 0, 0, 0, b'w', b'l', b'_', b's', b'h', b'm', 0, 0]);
    }

    #[test]
    fn write_then_parse_round_trip() {
        let msg = Message {
            sender_id: 5,
            opcode: 3,
            args: SmallVec::from_vec(vec![
                Argument::Int(-7),
                Argument::Uint(42),
                Argument::Str(Some(Box::new(CString::new("hello").unwrap()))),
            ]),
        };
        let mut payload = Vec::new();
        let mut fds = Vec::new();
        write_message(&msg, &mut payload, &mut fds).unwrap();

        let signature = [ArgumentType::Int, ArgumentType::Uint, ArgumentType::Str { allow_null: false }];
        let mut in_fds = VecDeque::new();
        let (parsed, consumed) = parse_message(&payload, &signature, &mut in_fds).unwrap();
        assert_eq!(consumed, payload.len());
        assert_eq!(parsed.sender_id, 5);
        assert_eq!(parsed.opcode, 3);
        assert!(matches!(parsed.args[0], Argument::Int(-7)));
        assert!(matches!(parsed.args[1], Argument::Uint(42)));
    }

    #[test]
    fn zero_length_string_is_framing_error() {
        // header + bogus length-0 string
        let mut payload = vec![1, 0, 0, 0, 0, 0, 12, 0, 0, 0, 0, 0];
        payload.truncate(12);
        let signature = [ArgumentType::Str { allow_null: false }];
        let mut in_fds = VecDeque::new();
        let err = parse_message(&payload, &signature, &mut in_fds).unwrap_err();
        assert!(matches!(err, MessageParseError::Malformed(_)));
    }

    #[test]
    fn short_read_preserves_carryover() {
        let data = [1, 0, 0, 0];
        let signature: [ArgumentType; 0] = [];
        let mut in_fds = VecDeque::new();
        assert!(matches!(
            parse_message(&data, &signature, &mut in_fds),
            Err(MessageParseError::ShortRead)
        ));
    }
}
