use std::time::Duration;
use log::debug;
use crate::addr::SocketAddress;
use crate::error::{Result, SocketError};
use super::buffer::ChunkBuffer;
use super::select::{select, CancelHandle, Deadline};
use super::{Counters, Shutdown, SockKind, Socket, SocketOptions, StreamLimits};

/// Queued output below this many bytes is held back by `send_data`.
pub const SEND_COALESCE_LIMIT: usize = 7500;

/// A connected TCP stream with buffered line and message framing.
///
/// Received bytes collect in a read buffer; `send_data` queues bytes in a
/// send buffer and only pushes them once enough has built up. Every wait
/// goes through one loop that flushes queued output whenever the socket
/// can take it, so a request/response exchange never needs a separate
/// round trip just for the write.
///
/// # Example
/// ```ignore
/// let mut conn = TcpSocket::connect(&addr, &SocketOptions::new(), Some(Duration::from_secs(5)))?;
/// conn.send_line(b"HELO example.org", None)?;
/// conn.flush_output(None)?;
/// let greeting = conn.read_line(Some(Duration::from_secs(10)))?;
/// ```
#[derive(Debug)]
pub struct TcpSocket {
	socket: Socket,
	read_buf: ChunkBuffer,
	send_buf: ChunkBuffer,
	scratch: Vec<u8>,
	limits: StreamLimits,
}

impl TcpSocket {
	/// Opens a non-blocking connection to `addr` and waits up to `timeout`
	/// for it to complete.
	pub fn connect(addr: &SocketAddress, options: &SocketOptions, timeout: Option<Duration>) -> Result<Self> {
		let mut socket = Socket::new(addr.family(), SockKind::Stream)?;
		socket.set_nonblocking(true)?;
		options.apply_stream(socket.raw()).or_else(|e| socket.fail(e))?;
		if !socket.connect(addr)? {
			socket.wait_connected(timeout)?;
		}
		Ok(Self::from_socket(socket, options.limits))
	}

	pub(crate) fn from_socket(socket: Socket, limits: StreamLimits) -> Self {
		Self {
			socket,
			read_buf: ChunkBuffer::new(),
			send_buf: ChunkBuffer::new(),
			scratch: Vec::new(),
			limits,
		}
	}

	pub fn socket(&self) -> &Socket {
		&self.socket
	}

	pub fn local_address(&self) -> SocketAddress {
		self.socket.local_address()
	}

	pub fn peer_address(&self) -> SocketAddress {
		self.socket.peer_address()
	}

	pub fn counters(&self) -> Counters {
		self.socket.counters()
	}

	pub fn last_error(&self) -> Option<SocketError> {
		self.socket.last_error()
	}

	pub fn cancel_handle(&self) -> CancelHandle {
		self.socket.cancel_handle()
	}

	pub fn limits(&self) -> &StreamLimits {
		&self.limits
	}

	pub fn set_limits(&mut self, limits: StreamLimits) {
		self.limits = limits;
	}

	/// Bytes received but not yet consumed.
	pub fn buffered_input(&self) -> usize {
		self.read_buf.len()
	}

	/// Bytes queued but not yet sent.
	pub fn pending_output(&self) -> usize {
		self.send_buf.len()
	}

	// ---------------------------------------------------------------------
	// Low-level steps
	// ---------------------------------------------------------------------

	/// One receive attempt of at most `max` bytes (and at most `recv_chunk`)
	/// into the read buffer. Only the bytes received are kept.
	fn receive_chunk(&mut self, max: usize) -> Result<usize> {
		let want = self.limits.recv_chunk.min(max).max(1);
		self.scratch.resize(want, 0);
		let n = self.socket.recv(&mut self.scratch[..want])?;
		self.read_buf.push_slice(&self.scratch[..n]);
		Ok(n)
	}

	/// One send attempt covering as much queued output as fits.
	fn send_pending(&mut self) -> Result<usize> {
		self.send_buf.coalesce_front(SEND_COALESCE_LIMIT);
		let Some(front) = self.send_buf.front() else {
			return Ok(0);
		};
		let n = self.socket.send(front)?;
		self.send_buf.consume(n);
		Ok(n)
	}

	fn wait(&self, read: bool, write: bool, deadline: &Deadline) -> Result<(bool, bool)> {
		let mut read_set = Vec::with_capacity(1);
		let mut write_set = Vec::with_capacity(1);
		if read {
			read_set.push(&self.socket);
		}
		if write {
			write_set.push(&self.socket);
		}
		if select(&mut read_set, &mut write_set, deadline.remaining()) {
			Ok((!read_set.is_empty(), !write_set.is_empty()))
		} else {
			Err(self.socket.last_error_or(SocketError::TimedOut))
		}
	}

	/// Waits for input and receives one chunk, sending queued output
	/// whenever the socket turns writable in the meantime.
	///
	/// An orderly close by the peer fails with `ClosedByPeer`.
	fn fill(&mut self, deadline: &Deadline) -> Result<usize> {
		if !self.socket.is_readable() {
			return self.socket.fail(SocketError::NotReadable);
		}
		loop {
			let want_write = !self.send_buf.is_empty() && self.socket.is_writable();
			let (readable, writable) = self.wait(true, want_write, deadline)?;
			if writable {
				match self.send_pending() {
					Ok(_) | Err(SocketError::WouldBlock) => {}
					Err(e) => return Err(e),
				}
			}
			if readable {
				match self.receive_chunk(usize::MAX) {
					Ok(0) => return Err(SocketError::ClosedByPeer),
					Ok(n) => return Ok(n),
					Err(SocketError::WouldBlock) => {}
					Err(e) => return Err(e),
				}
			}
		}
	}

	/// One wait for the socket to accept output, reading on the side.
	///
	/// Reads stop once `max_read_ahead` bytes are buffered, or after the
	/// peer closes its side. Returns whether a send was attempted.
	fn exchange(&mut self, deadline: &Deadline, peer_closed: &mut bool) -> Result<bool> {
		if !self.socket.is_writable() {
			return self.socket.fail(SocketError::NotWritable);
		}
		let room = match self.limits.max_read_ahead {
			0 => usize::MAX,
			limit => limit.saturating_sub(self.read_buf.len()),
		};
		let want_read = !*peer_closed && self.socket.is_readable() && room > 0;

		let (readable, writable) = self.wait(want_read, true, deadline)?;
		if readable {
			match self.receive_chunk(room) {
				Ok(0) => *peer_closed = true,
				Ok(_) | Err(SocketError::WouldBlock) => {}
				Err(e) => return Err(e),
			}
		}
		if writable {
			match self.send_pending() {
				Ok(_) | Err(SocketError::WouldBlock) => {}
				Err(e) => return Err(e),
			}
		}
		Ok(writable)
	}

	/// Sends queued output until none is left.
	fn drain(&mut self, deadline: &Deadline) -> Result<()> {
		let mut peer_closed = false;
		while !self.send_buf.is_empty() {
			self.exchange(deadline, &mut peer_closed)?;
		}
		Ok(())
	}

	/// Queues `data`. Past `SEND_COALESCE_LIMIT` queued bytes, makes one
	/// send attempt before returning.
	fn queue(&mut self, data: Vec<u8>, deadline: &Deadline) -> Result<()> {
		if !self.socket.is_writable() {
			return self.socket.fail(SocketError::NotWritable);
		}
		self.send_buf.push(data);
		if self.send_buf.len() < SEND_COALESCE_LIMIT {
			return Ok(());
		}
		let mut peer_closed = false;
		while !self.exchange(deadline, &mut peer_closed)? {}
		Ok(())
	}

	fn next_line(&mut self, deadline: &Deadline) -> Result<Vec<u8>> {
		let mut scanned = 0;
		loop {
			if let Some(end) = self.read_buf.find(b'\n', scanned) {
				return Ok(self.read_buf.split_to(end + 1));
			}
			scanned = self.read_buf.len();
			let limit = self.limits.max_line_length;
			if limit != 0 && scanned >= limit {
				return self.socket.fail(SocketError::LineTooLong { limit });
			}
			self.fill(deadline)?;
		}
	}

	// ---------------------------------------------------------------------
	// Reading
	// ---------------------------------------------------------------------

	/// Reads exactly `n` bytes.
	///
	/// With `n == 0`, returns whatever is buffered, receiving once first if
	/// nothing is.
	pub fn read_data(&mut self, n: usize, timeout: Option<Duration>) -> Result<Vec<u8>> {
		let deadline = Deadline::after(timeout);
		if n == 0 {
			if self.read_buf.is_empty() {
				self.fill(&deadline)?;
			}
			return Ok(self.read_buf.take_all());
		}
		while self.read_buf.len() < n {
			self.fill(&deadline)?;
		}
		Ok(self.read_buf.split_to(n))
	}

	/// Reads one line, terminator included.
	///
	/// Fails with `LineTooLong` once `max_line_length` bytes are buffered
	/// without a `\n`. The buffered bytes are kept.
	pub fn read_line(&mut self, timeout: Option<Duration>) -> Result<Vec<u8>> {
		let deadline = Deadline::after(timeout);
		self.next_line(&deadline)
	}

	/// Reads one dot-terminated message.
	///
	/// Lines are read until one equal to `.\r\n` or `.\n`, which is consumed
	/// and dropped. A leading `.` on any other line is removed. The result
	/// is the concatenation of the decoded lines, each with its terminator.
	pub fn read_multi_line(&mut self, timeout: Option<Duration>) -> Result<Vec<u8>> {
		let deadline = Deadline::after(timeout);
		let limit = self.limits.max_message_size;
		let mut body = Vec::new();
		loop {
			let line = self.next_line(&deadline)?;
			if line == b".\r\n" || line == b".\n" {
				return Ok(body);
			}
			let data = line.strip_prefix(b".").unwrap_or(&line[..]);
			if limit != 0 && body.len() + data.len() > limit {
				return self.socket.fail(SocketError::MessageTooBig { limit });
			}
			body.extend_from_slice(data);
		}
	}

	// ---------------------------------------------------------------------
	// Sending
	// ---------------------------------------------------------------------

	/// Queues `data` for sending.
	///
	/// Returns at once while less than `SEND_COALESCE_LIMIT` bytes are
	/// queued. Past that, makes one send attempt before returning. Use
	/// `flush_output` to push everything out.
	pub fn send_data(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<()> {
		let deadline = Deadline::after(timeout);
		self.queue(data.to_vec(), &deadline)
	}

	/// Queues `line`, making sure it ends in CRLF.
	pub fn send_line(&mut self, line: &[u8], timeout: Option<Duration>) -> Result<()> {
		let deadline = Deadline::after(timeout);
		self.queue(crlf_terminated(line), &deadline)
	}

	/// Sends `body` as a dot-stuffed message and flushes it.
	pub fn send_multi_line(&mut self, body: &[u8], timeout: Option<Duration>) -> Result<()> {
		let deadline = Deadline::after(timeout);
		for line in body.split_inclusive(|&b| b == b'\n') {
			let mut wire = Vec::with_capacity(line.len() + 3);
			if line.first() == Some(&b'.') {
				wire.push(b'.');
			}
			wire.extend_from_slice(&crlf_terminated(line));
			self.queue(wire, &deadline)?;
		}
		self.queue(b".\r\n".to_vec(), &deadline)?;
		self.drain(&deadline)
	}

	/// Sends everything queued.
	pub fn flush_output(&mut self, timeout: Option<Duration>) -> Result<()> {
		let deadline = Deadline::after(timeout);
		self.drain(&deadline)
	}

	pub fn shutdown(&mut self, how: Shutdown) -> Result<()> {
		self.socket.shutdown(how)
	}

	/// Flushes queued output within `close_timeout`, then closes.
	///
	/// The handle is closed even if the flush fails; the flush error is
	/// returned so the caller knows the last writes may be lost.
	pub fn close(&mut self) -> Result<()> {
		let flushed = self.flush_output(self.limits.close_timeout);
		if let Err(e) = &flushed {
			debug!("closing {} with {} bytes unsent: {}", self.socket.peer_address(), self.send_buf.len(), e);
		}
		self.read_buf.clear();
		self.send_buf.clear();
		let closed = self.socket.close();
		flushed.and(closed)
	}
}

impl std::io::Read for TcpSocket {
	fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
		if buf.is_empty() {
			return Ok(0);
		}
		if self.read_buf.is_empty() {
			match self.fill(&Deadline::never()) {
				Ok(_) => {}
				Err(SocketError::ClosedByPeer) => return Ok(0),
				Err(e) => return Err(e.into()),
			}
		}
		let data = self.read_buf.split_to(buf.len());
		buf[..data.len()].copy_from_slice(&data);
		Ok(data.len())
	}
}

impl std::io::Write for TcpSocket {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		self.send_data(buf, None)?;
		Ok(buf.len())
	}

	fn flush(&mut self) -> std::io::Result<()> {
		self.flush_output(None)?;
		Ok(())
	}
}

/*
  Line terminator normalisation:
  ┌──────────────────┬──────────────────┐
  │ line ends with   │ sent as          │
  ├──────────────────┼──────────────────┤
  │ \r\n             │ unchanged        │
  │ \n               │ \n -> \r\n       │
  │ \r               │ \r + \n          │
  │ anything else    │ + \r\n           │
  └──────────────────┴──────────────────┘
*/
fn crlf_terminated(line: &[u8]) -> Vec<u8> {
	let mut out = Vec::with_capacity(line.len() + 2);
	out.extend_from_slice(line);
	if out.ends_with(b"\r\n") {
		return out;
	}
	if out.ends_with(b"\n") {
		out.pop();
		out.extend_from_slice(b"\r\n");
	} else if out.ends_with(b"\r") {
		out.push(b'\n');
	} else {
		out.extend_from_slice(b"\r\n");
	}
	out
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn terminators_become_crlf() {
		assert_eq!(crlf_terminated(b"a\r\n"), b"a\r\n");
		assert_eq!(crlf_terminated(b"a\n"), b"a\r\n");
		assert_eq!(crlf_terminated(b"a\r"), b"a\r\n");
		assert_eq!(crlf_terminated(b"a"), b"a\r\n");
		assert_eq!(crlf_terminated(b""), b"\r\n");
	}
}
