use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use log::{debug, trace};
use crate::addr::{Family, SocketAddress};
use crate::error::{Result, SocketError};
use super::raw::{ConnectStatus, RawSocket};
use super::select::{select, CancelHandle};
use super::{Shutdown, SockKind, SocketState};

/// Snapshot of a socket's traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
	pub bytes_sent: u64,
	pub bytes_received: u64,
	pub packets_sent: u64,
	pub packets_received: u64,
}

#[derive(Debug, Default)]
struct AtomicCounters {
	bytes_sent: AtomicU64,
	bytes_received: AtomicU64,
	packets_sent: AtomicU64,
	packets_received: AtomicU64,
}

impl AtomicCounters {
	fn sent(&self, bytes: usize) {
		self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
		self.packets_sent.fetch_add(1, Ordering::Relaxed);
	}

	fn received(&self, bytes: usize) {
		self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
		self.packets_received.fetch_add(1, Ordering::Relaxed);
	}

	fn snapshot(&self) -> Counters {
		Counters {
			bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
			bytes_received: self.bytes_received.load(Ordering::Relaxed),
			packets_sent: self.packets_sent.load(Ordering::Relaxed),
			packets_received: self.packets_received.load(Ordering::Relaxed),
		}
	}
}

/// The state machine shared by every socket kind.
///
/// Owns the OS handle and tracks lifecycle bits, the last error, the
/// local/peer addresses and traffic counters. Guarded operations check the
/// current state first and record a specific error instead of calling the
/// OS when the state is wrong.
///
/// State bits, counters, the cancel flag and the last error are safe to
/// touch through `&self` from any thread. Everything else needs `&mut self`.
#[derive(Debug)]
pub struct Socket {
	handle: RawSocket,
	state: AtomicU32,
	cancel: Arc<AtomicBool>,
	last_error: Mutex<Option<SocketError>>,
	local: SocketAddress,
	peer: SocketAddress,
	counters: AtomicCounters,
}

impl Socket {
	/// Creates a new OS socket. The result is OPEN.
	pub fn new(family: Family, kind: SockKind) -> Result<Self> {
		let handle = RawSocket::create(family, kind)?;
		Ok(Self::with_state(handle, SocketState::OPEN))
	}

	/// Wraps a descriptor returned by `accept()`.
	///
	/// The socket is OPEN, BOUND, CONNECTED, READABLE and WRITABLE, and its
	/// local address is fetched.
	pub(crate) fn from_accepted(handle: RawSocket, peer: SocketAddress) -> Self {
		let mut socket = Self::with_state(
			handle,
			SocketState::OPEN
				| SocketState::BOUND
				| SocketState::CONNECTED
				| SocketState::READABLE
				| SocketState::WRITABLE,
		);
		socket.local = socket.handle.local_addr().unwrap_or_default();
		socket.peer = peer;
		socket
	}

	fn with_state(handle: RawSocket, state: SocketState) -> Self {
		Self {
			handle,
			state: AtomicU32::new(state.bits()),
			cancel: Arc::new(AtomicBool::new(false)),
			last_error: Mutex::new(None),
			local: SocketAddress::Unspecified,
			peer: SocketAddress::Unspecified,
			counters: AtomicCounters::default(),
		}
	}

	pub fn raw(&self) -> &RawSocket {
		&self.handle
	}

	pub fn kind(&self) -> SockKind {
		self.handle.kind()
	}

	pub fn family(&self) -> Family {
		self.handle.family()
	}

	// ---------------------------------------------------------------------
	// State bits
	// ---------------------------------------------------------------------

	pub fn state(&self) -> SocketState {
		SocketState::from_bits_retain(self.state.load(Ordering::SeqCst))
	}

	#[inline]
	fn has(&self, flags: SocketState) -> bool {
		self.state().contains(flags)
	}

	pub(crate) fn set_state(&self, flags: SocketState) {
		self.state.fetch_or(flags.bits(), Ordering::SeqCst);
	}

	pub(crate) fn clear_state(&self, flags: SocketState) {
		self.state.fetch_and(!flags.bits(), Ordering::SeqCst);
	}

	pub fn is_open(&self) -> bool {
		self.has(SocketState::OPEN)
	}

	pub fn is_bound(&self) -> bool {
		self.has(SocketState::BOUND)
	}

	pub fn is_listening(&self) -> bool {
		self.has(SocketState::LISTENING)
	}

	pub fn is_connecting(&self) -> bool {
		self.has(SocketState::CONNECTING)
	}

	pub fn is_connected(&self) -> bool {
		self.has(SocketState::CONNECTED)
	}

	pub fn is_readable(&self) -> bool {
		self.has(SocketState::READABLE)
	}

	pub fn is_writable(&self) -> bool {
		self.has(SocketState::WRITABLE)
	}

	pub fn is_closed(&self) -> bool {
		self.has(SocketState::CLOSED)
	}

	pub fn timed_out(&self) -> bool {
		self.has(SocketState::TIMED_OUT)
	}

	pub fn canceled(&self) -> bool {
		self.has(SocketState::CANCELED)
	}

	// ---------------------------------------------------------------------
	// Errors and cancellation
	// ---------------------------------------------------------------------

	/// The most recent failure recorded on this socket.
	pub fn last_error(&self) -> Option<SocketError> {
		self.last_error.lock().unwrap_or_else(PoisonError::into_inner).clone()
	}

	pub fn clear_error(&self) {
		*self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
	}

	pub(crate) fn record(&self, err: SocketError) {
		trace!("fd {}: {}", self.raw_fd(), err);
		*self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err);
	}

	/// Records `err` as the last error and returns it.
	pub(crate) fn fail<T>(&self, err: SocketError) -> Result<T> {
		self.record(err.clone());
		Err(err)
	}

	/// Returns the last recorded error, falling back to `fallback`.
	pub(crate) fn last_error_or(&self, fallback: SocketError) -> SocketError {
		self.last_error().unwrap_or(fallback)
	}

	pub(crate) fn mark_timed_out(&self) {
		self.set_state(SocketState::TIMED_OUT);
		self.record(SocketError::TimedOut);
	}

	pub(crate) fn mark_canceled(&self) {
		self.set_state(SocketState::CANCELED);
		self.record(SocketError::Canceled);
	}

	/// Requests cancellation of any wait on this socket.
	pub fn cancel(&self) {
		self.cancel.store(true, Ordering::SeqCst);
	}

	pub fn cancel_handle(&self) -> CancelHandle {
		CancelHandle::new(self.cancel.clone())
	}

	pub(crate) fn cancel_requested(&self) -> bool {
		self.cancel.load(Ordering::SeqCst)
	}

	/// Clears TIMED_OUT, CANCELED, the cancel flag and the last error so
	/// the socket can be used again.
	pub fn reset_status(&self) {
		self.cancel.store(false, Ordering::SeqCst);
		self.clear_state(SocketState::TIMED_OUT | SocketState::CANCELED);
		self.clear_error();
	}

	// ---------------------------------------------------------------------
	// Addresses and counters
	// ---------------------------------------------------------------------

	pub fn local_address(&self) -> SocketAddress {
		self.local
	}

	pub fn peer_address(&self) -> SocketAddress {
		self.peer
	}

	pub fn counters(&self) -> Counters {
		self.counters.snapshot()
	}

	fn raw_fd(&self) -> libc::c_int {
		use std::os::fd::AsRawFd;
		self.handle.as_raw_fd()
	}

	pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
		self.handle.set_nonblocking(nonblocking).or_else(|e| self.fail(e))
	}

	// ---------------------------------------------------------------------
	// Guarded transitions
	// ---------------------------------------------------------------------

	/// Binds to `addr`. Requires OPEN and not already BOUND.
	pub fn bind(&mut self, addr: &SocketAddress) -> Result<()> {
		if !self.is_open() {
			return self.fail(SocketError::NotOpen);
		}
		if self.is_bound() {
			return self.fail(SocketError::AlreadyBound);
		}
		self.handle.bind(addr).or_else(|e| self.fail(e))?;
		self.set_state(SocketState::BOUND);
		self.local = self.handle.local_addr().unwrap_or(*addr);
		debug!("fd {}: bound to {}", self.raw_fd(), self.local);
		Ok(())
	}

	/// Starts listening. Requires BOUND and not already LISTENING.
	pub fn listen(&mut self, backlog: i32) -> Result<()> {
		if !self.is_bound() {
			return self.fail(SocketError::NotBound);
		}
		if self.is_listening() {
			return self.fail(SocketError::AlreadyListening);
		}
		self.handle.listen(backlog).or_else(|e| self.fail(e))?;
		self.set_state(SocketState::LISTENING);
		debug!("fd {}: listening on {} (backlog {})", self.raw_fd(), self.local, backlog);
		Ok(())
	}

	/// Starts a connection to `addr`.
	///
	/// Returns `Ok(true)` if it completed at once, `Ok(false)` if it is in
	/// progress (CONNECTING is set; use `wait_connected`).
	pub fn connect(&mut self, addr: &SocketAddress) -> Result<bool> {
		if !self.is_open() {
			return self.fail(SocketError::NotOpen);
		}
		if self.is_connecting() {
			return self.fail(SocketError::AlreadyConnecting);
		}
		if self.is_connected() {
			return self.fail(SocketError::AlreadyConnected);
		}
		self.peer = *addr;
		match self.handle.connect(addr) {
			Ok(ConnectStatus::Connected) => {
				self.promote_connected();
				Ok(true)
			}
			Ok(ConnectStatus::InProgress) => {
				self.set_state(SocketState::CONNECTING);
				trace!("fd {}: connect to {} in progress", self.raw_fd(), addr);
				Ok(false)
			}
			Err(e) => self.fail(e),
		}
	}

	fn promote_connected(&mut self) {
		self.clear_state(SocketState::CONNECTING);
		self.set_state(
			SocketState::CONNECTED | SocketState::DUPLEX | SocketState::BOUND,
		);
		self.local = self.handle.local_addr().unwrap_or_default();
		if let Ok(peer) = self.handle.peer_addr() {
			self.peer = peer;
		}
		debug!("fd {}: connected {} -> {}", self.raw_fd(), self.local, self.peer);
	}

	/// Waits for an in-progress connect to finish.
	///
	/// Returns at once if already CONNECTED. Fails with `TimedOut`,
	/// `Canceled`, or `ConnectFailed` carrying the pending socket error.
	pub fn wait_connected(&mut self, timeout: Option<Duration>) -> Result<()> {
		if self.is_connected() {
			return Ok(());
		}
		if !self.is_connecting() {
			return self.fail(SocketError::NotConnected);
		}

		let ready = {
			let me: &Socket = self;
			let mut read = vec![me];
			let mut write = vec![me];
			select(&mut read, &mut write, timeout)
		};
		if !ready {
			return Err(self.last_error_or(SocketError::TimedOut));
		}

		let pending = self.handle.pending_error().or_else(|e| self.fail(e))?;
		if pending != 0 {
			self.clear_state(SocketState::CONNECTING);
			return self.fail(SocketError::ConnectFailed { errno: pending });
		}
		self.promote_connected();
		Ok(())
	}

	/// Shuts down one or both directions. Requires CONNECTED and the
	/// direction(s) still open.
	pub fn shutdown(&mut self, how: Shutdown) -> Result<()> {
		if !self.is_connected() {
			return self.fail(SocketError::NotConnected);
		}
		if matches!(how, Shutdown::Read | Shutdown::ReadWrite) && !self.is_readable() {
			return self.fail(SocketError::NotReadable);
		}
		if matches!(how, Shutdown::Write | Shutdown::ReadWrite) && !self.is_writable() {
			return self.fail(SocketError::NotWritable);
		}
		self.handle.shutdown(how).or_else(|e| self.fail(e))?;
		self.clear_state(how.cleared_state());
		Ok(())
	}

	// ---------------------------------------------------------------------
	// Data transfer
	// ---------------------------------------------------------------------

	/// Receives into `buf`. Requires READABLE.
	///
	/// `Ok(0)` is an orderly close by the peer; `ClosedByPeer` is recorded
	/// but READABLE stays set. A hard failure clears READABLE.
	/// `WouldBlock` is returned without touching state.
	pub fn recv(&self, buf: &mut [u8]) -> Result<usize> {
		if !self.is_readable() {
			return self.fail(SocketError::NotReadable);
		}
		match self.handle.recv(buf, 0) {
			Ok(0) => {
				self.record(SocketError::ClosedByPeer);
				Ok(0)
			}
			Ok(n) => {
				self.counters.received(n);
				Ok(n)
			}
			Err(SocketError::WouldBlock) => Err(SocketError::WouldBlock),
			Err(e) => {
				self.clear_state(SocketState::READABLE);
				self.fail(e)
			}
		}
	}

	/// Receives one datagram with its source address. Requires READABLE.
	pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddress)> {
		if !self.is_readable() {
			return self.fail(SocketError::NotReadable);
		}
		match self.handle.recv_from(buf, 0) {
			Ok((n, from)) => {
				self.counters.received(n);
				Ok((n, from))
			}
			Err(SocketError::WouldBlock) => Err(SocketError::WouldBlock),
			Err(e) => {
				self.clear_state(SocketState::READABLE);
				self.fail(e)
			}
		}
	}

	/// Sends from `buf`. Requires WRITABLE. A hard failure clears WRITABLE.
	pub fn send(&self, buf: &[u8]) -> Result<usize> {
		if !self.is_writable() {
			return self.fail(SocketError::NotWritable);
		}
		match self.handle.send(buf, 0) {
			Ok(n) => {
				self.counters.sent(n);
				Ok(n)
			}
			Err(SocketError::WouldBlock) => Err(SocketError::WouldBlock),
			Err(e) => {
				self.clear_state(SocketState::WRITABLE);
				self.fail(e)
			}
		}
	}

	/// Sends one datagram to `addr`. Requires WRITABLE.
	pub fn send_to(&self, buf: &[u8], addr: &SocketAddress) -> Result<usize> {
		if !self.is_writable() {
			return self.fail(SocketError::NotWritable);
		}
		match self.handle.send_to(buf, addr, 0) {
			Ok(n) => {
				self.counters.sent(n);
				Ok(n)
			}
			Err(SocketError::WouldBlock) => Err(SocketError::WouldBlock),
			Err(e @ SocketError::InvalidAddress { .. }) => self.fail(e),
			Err(e) => {
				self.clear_state(SocketState::WRITABLE);
				self.fail(e)
			}
		}
	}

	/// Closes the handle. The state becomes CLOSED. Closing twice is fine.
	pub fn close(&mut self) -> Result<()> {
		let fd = self.raw_fd();
		let result = self.handle.close();
		self.state.store(SocketState::CLOSED.bits(), Ordering::SeqCst);
		self.cancel.store(false, Ordering::SeqCst);
		if fd != -1 {
			debug!("fd {}: closed", fd);
		}
		result.or_else(|e| self.fail(e))
	}
}
