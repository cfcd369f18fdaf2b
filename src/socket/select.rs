use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use log::{debug, trace};
use crate::error::{errno, SocketError};
use super::Socket;

/// Longest single wait inside `select`.
///
/// Cancellation set by another thread is noticed at the next slice.
pub const MAX_WAIT_SLICE: Duration = Duration::from_secs(2);

/// Overall time budget of one blocking call.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
	end: Option<Instant>,
}

impl Deadline {
	/// `None` never expires. Neither does a timeout too long to represent.
	pub fn after(timeout: Option<Duration>) -> Self {
		Self { end: timeout.and_then(|t| Instant::now().checked_add(t)) }
	}

	pub fn never() -> Self {
		Self { end: None }
	}

	/// Time left, `None` when unbounded. Zero once expired.
	pub fn remaining(&self) -> Option<Duration> {
		self.end.map(|end| end.saturating_duration_since(Instant::now()))
	}

	pub fn expired(&self) -> bool {
		self.end.is_some_and(|end| Instant::now() >= end)
	}
}

/// Thread-safe handle that cancels waits on one socket.
///
/// Obtained from `Socket::cancel_handle()`. Any thread may call `cancel()`.
/// Waits in progress give up within `MAX_WAIT_SLICE`.
#[derive(Debug, Clone)]
pub struct CancelHandle {
	flag: Arc<AtomicBool>,
}

impl CancelHandle {
	pub(crate) fn new(flag: Arc<AtomicBool>) -> Self {
		Self { flag }
	}

	pub fn cancel(&self) {
		self.flag.store(true, Ordering::SeqCst);
	}

	pub fn is_canceled(&self) -> bool {
		self.flag.load(Ordering::SeqCst)
	}
}

const READ_EVENTS: libc::c_short = libc::POLLIN | libc::POLLPRI;
const WRITE_EVENTS: libc::c_short = libc::POLLOUT;
const ALWAYS_READY: libc::c_short = libc::POLLERR | libc::POLLHUP | libc::POLLNVAL;

/// Waits until at least one socket is ready.
///
/// `read` holds sockets waiting to read, `write` sockets waiting to write.
/// `timeout` of `None` waits forever.
///
/// Returns `true` when something is ready; both sets then hold only the
/// ready sockets. Returns `false` on timeout, cancellation or poll failure;
/// both sets are then empty. On timeout every watched socket is marked
/// TIMED_OUT. A socket whose cancel flag is raised aborts the wait.
pub fn select(read: &mut Vec<&Socket>, write: &mut Vec<&Socket>, timeout: Option<Duration>) -> bool {
	read.retain(|s| s.raw().is_valid());
	write.retain(|s| s.raw().is_valid());
	if read.is_empty() && write.is_empty() {
		return false;
	}

	let deadline = Deadline::after(timeout);
	let mut fds: Vec<libc::pollfd> = Vec::with_capacity(read.len() + write.len());

	loop {
		if read.iter().chain(write.iter()).any(|s| s.cancel_requested()) {
			abort_canceled(read, write);
			return false;
		}
		fds.clear();
		fds.extend(read.iter().map(|s| pollfd(s, READ_EVENTS)));
		fds.extend(write.iter().map(|s| pollfd(s, WRITE_EVENTS)));

		let slice = deadline.remaining().map_or(MAX_WAIT_SLICE, |left| left.min(MAX_WAIT_SLICE));
		let millis = slice.as_micros().div_ceil(1000) as libc::c_int;

		let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, millis) };
		if n > 0 {
			break;
		}
		if n == -1 {
			let e = errno();
			if e == libc::EINTR {
				continue;
			}
			debug!("poll failed over {} sockets: errno {}", fds.len(), e);
			for socket in read.iter().chain(write.iter()) {
				socket.record(SocketError::Select { errno: e });
			}
			read.clear();
			write.clear();
			return false;
		}
		if deadline.expired() {
			trace!("wait timed out after {:?}", timeout);
			for socket in read.iter().chain(write.iter()) {
				socket.mark_timed_out();
			}
			read.clear();
			write.clear();
			return false;
		}
	}

	let (read_fds, write_fds) = fds.split_at(read.len());
	prune(read, read_fds, READ_EVENTS);
	prune(write, write_fds, WRITE_EVENTS);
	true
}

#[inline]
fn pollfd(socket: &Socket, events: libc::c_short) -> libc::pollfd {
	libc::pollfd { fd: socket.raw().as_raw_fd(), events, revents: 0 }
}

fn prune(set: &mut Vec<&Socket>, fds: &[libc::pollfd], wanted: libc::c_short) {
	let mut ready = fds.iter().map(|fd| fd.revents & (wanted | ALWAYS_READY) != 0);
	set.retain(|_| ready.next().unwrap_or(false));
}

fn abort_canceled(read: &mut Vec<&Socket>, write: &mut Vec<&Socket>) {
	for socket in read.iter().chain(write.iter()) {
		if socket.cancel_requested() {
			socket.mark_canceled();
		} else {
			socket.record(SocketError::Canceled);
		}
	}
	debug!("wait canceled");
	read.clear();
	write.clear();
}
