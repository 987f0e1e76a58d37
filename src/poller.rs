//! Readiness multiplexer and transfer deadlines
//!
//! The single place a transport call may block. `await_ready` wraps
//! `poll(2)`: it returns as soon as any watched handle is ready for its
//! requested operation (or flags an exceptional condition), and fails with
//! [`TransportError::IoTimeout`] if the deadline passes first.
//!
//! A [`Deadline`] is computed once per logical read or write call, so every
//! partial-I/O retry inside that call shares one expiry instead of
//! resetting the budget.

use crate::error::TransportError;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io;
use std::os::fd::BorrowedFd;
use std::time::{Duration, Instant};

/// Absolute expiry point in monotonic time, or unbounded.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    /// Deadline `timeout` from now; `None` means block indefinitely.
    pub fn after(timeout: Option<Duration>) -> Self {
        Deadline(timeout.and_then(|t| Instant::now().checked_add(t)))
    }

    /// A deadline that never expires.
    pub fn unbounded() -> Self {
        Deadline(None)
    }

    /// Time left until expiry, saturating at zero. `None` if unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.0.map(|end| end.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }
}

/// Block until at least one fd in `read_fds` is readable, at least one in
/// `write_fds` is writable, or any fd in the union reports an exceptional
/// condition, whichever comes first.
///
/// `poll(2)` reports `POLLERR`/`POLLHUP`/`POLLNVAL` regardless of the
/// requested events, so a dead peer wakes the wait even when only data
/// readiness was asked for. Interrupted waits are retried with whatever
/// budget remains.
pub fn await_ready(
    read_fds: &[BorrowedFd<'_>],
    write_fds: &[BorrowedFd<'_>],
    deadline: &Deadline,
) -> Result<(), TransportError> {
    loop {
        let mut poll_fds: Vec<PollFd> = Vec::with_capacity(read_fds.len() + write_fds.len());
        for fd in read_fds {
            poll_fds.push(PollFd::new(*fd, PollFlags::POLLIN | PollFlags::POLLPRI));
        }
        for fd in write_fds {
            poll_fds.push(PollFd::new(*fd, PollFlags::POLLOUT));
        }

        let timeout = match deadline.remaining() {
            None => PollTimeout::NONE,
            Some(left) => {
                let millis = left.as_millis().min(i32::MAX as u128) as i32;
                PollTimeout::try_from(millis).unwrap_or(PollTimeout::MAX)
            }
        };

        match poll(&mut poll_fds, timeout) {
            Ok(0) => return Err(TransportError::IoTimeout),
            Ok(_) => return Ok(()),
            Err(Errno::EINTR) => {
                if deadline.expired() {
                    return Err(TransportError::IoTimeout);
                }
                continue;
            }
            Err(errno) => return Err(TransportError::Io(io::Error::from(errno))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsFd;

    #[test]
    fn test_deadline_remaining_counts_down() {
        let deadline = Deadline::after(Some(Duration::from_millis(500)));
        let left = deadline.remaining().unwrap();
        assert!(left <= Duration::from_millis(500));
        assert!(left > Duration::from_millis(400));
        assert!(!deadline.expired());
    }

    #[test]
    fn test_deadline_expires() {
        let deadline = Deadline::after(Some(Duration::ZERO));
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
        assert!(deadline.expired());
    }

    #[test]
    fn test_unbounded_deadline_never_expires() {
        let deadline = Deadline::unbounded();
        assert_eq!(deadline.remaining(), None);
        assert!(!deadline.expired());

        let from_none = Deadline::after(None);
        assert_eq!(from_none.remaining(), None);
    }

    #[test]
    fn test_empty_pipe_times_out() {
        let (reader, _writer) = os_pipe::pipe().unwrap();
        let deadline = Deadline::after(Some(Duration::from_millis(50)));

        let start = Instant::now();
        let result = await_ready(&[reader.as_fd()], &[], &deadline);
        assert!(matches!(result, Err(TransportError::IoTimeout)));
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_readable_pipe_is_ready() {
        let (reader, mut writer) = os_pipe::pipe().unwrap();
        writer.write_all(b"x").unwrap();

        let deadline = Deadline::after(Some(Duration::from_secs(5)));
        await_ready(&[reader.as_fd()], &[], &deadline).unwrap();
    }

    #[test]
    fn test_fresh_pipe_is_writable() {
        let (_reader, writer) = os_pipe::pipe().unwrap();

        let deadline = Deadline::after(Some(Duration::from_secs(5)));
        await_ready(&[], &[writer.as_fd()], &deadline).unwrap();
    }

    #[test]
    fn test_hangup_wakes_reader() {
        let (reader, writer) = os_pipe::pipe().unwrap();
        drop(writer);

        // Peer gone: POLLHUP must wake the wait, not let it time out.
        let deadline = Deadline::after(Some(Duration::from_secs(5)));
        await_ready(&[reader.as_fd()], &[], &deadline).unwrap();
    }

    #[test]
    fn test_shared_deadline_across_waits() {
        let (reader, _writer) = os_pipe::pipe().unwrap();
        let deadline = Deadline::after(Some(Duration::from_millis(80)));

        // Two consecutive waits on one deadline must not double the budget.
        let start = Instant::now();
        let first = await_ready(&[reader.as_fd()], &[], &deadline);
        let second = await_ready(&[reader.as_fd()], &[], &deadline);
        assert!(matches!(first, Err(TransportError::IoTimeout)));
        assert!(matches!(second, Err(TransportError::IoTimeout)));
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}
