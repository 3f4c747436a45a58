//! The channels between a context and its workers.
//!
//! A channel is a one-directional, message-oriented transport built atop a
//! connected pair of Unix stream sockets. Because it is a plain socket, a
//! channel survives `fork` and works the same between threads and between
//! processes.
//!
//! Each message is preceded by its length as a 32 bit value in network
//! byte order. Both ends keep their socket behind a mutex, so concurrent
//! senders never interleave their messages and concurrent receivers never
//! see a partial one.
//!
//! At creation, each end shuts down the direction it doesn’t use. Closing
//! the sending end shuts down its write direction, which makes the
//! receiving end see end-of-stream once everything sent before has been
//! read, no matter how many copies of the socket exist.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::error::Error;

/// The largest message we accept.
pub(crate) const MAX_MESSAGE_LEN: usize = 1 << 24;

//------------ channel -------------------------------------------------------

/// Creates a new channel, returning the sending and receiving ends.
pub fn channel() -> Result<(Sender, Receiver), Error> {
    let (tx, rx) = UnixStream::pair()?;
    tx.shutdown(Shutdown::Read)?;
    rx.shutdown(Shutdown::Write)?;
    let fd = rx.as_raw_fd();
    Ok((
        Sender {
            sock: Mutex::new(tx),
        },
        Receiver {
            sock: Mutex::new(rx),
            fd,
        },
    ))
}

//------------ Sender --------------------------------------------------------

/// The sending end of a channel.
#[derive(Debug)]
pub struct Sender {
    sock: Mutex<UnixStream>,
}

impl Sender {
    /// Sends a message.
    ///
    /// Blocks while the channel’s buffer is full. The message is written
    /// completely before any other sender gets its turn.
    pub fn send(&self, msg: &[u8]) -> Result<(), Error> {
        if msg.len() > MAX_MESSAGE_LEN {
            return Err(Error::malformed("message too long"));
        }
        let mut frame = BytesMut::with_capacity(msg.len() + 4);
        frame.put_u32(msg.len() as u32);
        frame.put_slice(msg);
        let mut sock = self.sock.lock();
        sock.write_all(&frame)?;
        Ok(())
    }

    /// Closes the channel for sending.
    ///
    /// Receivers will see end-of-stream after reading all messages sent
    /// before.
    pub fn close(&self) {
        // Already shut down or the other side is gone: nothing left to do.
        let _ = self.sock.lock().shutdown(Shutdown::Write);
    }

    /// Closes the channel if this is the last reference to the sender.
    ///
    /// Dropping the sender only closes our descriptor. Copies of it that
    /// ended up in forked processes keep the channel open until they exit,
    /// so the last of several sharing users needs to close it explicitly.
    pub fn close_last(this: Arc<Self>) {
        if let Some(sender) = Arc::into_inner(this) {
            trace!("last sender closes channel");
            sender.close()
        }
    }
}

//------------ Receiver ------------------------------------------------------

/// The receiving end of a channel.
#[derive(Debug)]
pub struct Receiver {
    sock: Mutex<UnixStream>,

    /// The socket’s descriptor for polling without taking the lock.
    fd: RawFd,
}

impl Receiver {
    /// Receives the next message, blocking until there is one.
    pub fn receive(&self) -> Result<Bytes, Error> {
        self.lock().receive()
    }

    /// Acquires exclusive use of the receiving end.
    ///
    /// This allows checking some state before committing to a blocking
    /// read.
    pub fn lock(&self) -> ReceiverGuard<'_> {
        ReceiverGuard {
            sock: self.sock.lock(),
        }
    }

    /// Returns whether a message or end-of-stream can be read right away.
    pub fn is_ready(&self) -> Result<bool, Error> {
        let mut pollfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        // SAFETY: `pollfd` is a single valid entry and `self.fd` stays
        // open for as long as `self` lives.
        let res = unsafe { libc::poll(&mut pollfd, 1, 0) };
        if res < 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(res > 0 && pollfd.revents & (libc::POLLIN | libc::POLLHUP) != 0)
    }
}

impl AsRawFd for Receiver {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}

//------------ ReceiverGuard -------------------------------------------------

/// Exclusive use of the receiving end of a channel.
pub struct ReceiverGuard<'a> {
    sock: MutexGuard<'a, UnixStream>,
}

impl ReceiverGuard<'_> {
    /// Receives the next message, blocking until there is one.
    ///
    /// Returns [`Error::ChannelClosed`] if the stream ended cleanly
    /// between two messages.
    pub fn receive(&mut self) -> Result<Bytes, Error> {
        let mut len = [0u8; 4];
        if !read_full(&mut *self.sock, &mut len)? {
            trace!("channel closed");
            return Err(Error::ChannelClosed);
        }
        let len = u32::from_be_bytes(len) as usize;
        if len > MAX_MESSAGE_LEN {
            return Err(Error::malformed("message too long"));
        }
        let mut buf = BytesMut::zeroed(len);
        if !read_full(&mut *self.sock, &mut buf)? {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(buf.freeze())
    }

    /// Gives up exclusive use, handing it to a waiting thread if any.
    pub fn unlock_fair(self) {
        MutexGuard::unlock_fair(self.sock)
    }
}

/// Fills `buf` completely.
///
/// Returns `Ok(false)` if the stream ended before the first octet. Ending
/// anywhere later is an error.
fn read_full(sock: &mut UnixStream, buf: &mut [u8]) -> Result<bool, Error> {
    let mut pos = 0;
    while pos < buf.len() {
        match sock.read(&mut buf[pos..]) {
            Ok(0) if pos == 0 => return Ok(false),
            Ok(0) => {
                return Err(
                    io::Error::from(io::ErrorKind::UnexpectedEof).into()
                )
            }
            Ok(n) => pos += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(true)
}

//============ Tests =========================================================
