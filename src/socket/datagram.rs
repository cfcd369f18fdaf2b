use std::time::Duration;
use crate::addr::SocketAddress;
use crate::error::{Result, SocketError};
use super::select::{select, CancelHandle, Deadline};
use super::{Counters, SockKind, Socket, SocketOptions, SocketState};

/// Size of the buffer each `read_data` call receives into.
///
/// Longer datagrams are truncated.
pub const DATAGRAM_SCRATCH_SIZE: usize = 2000;

/// A UDP socket.
///
/// Created bound (`bind`, for receiving from anyone) or connected
/// (`connect`, with a fixed peer for `send_data`). Either way it can send
/// to explicit destinations with `send_data_to`.
#[derive(Debug)]
pub struct UdpSocket {
	socket: Socket,
	last_sender: SocketAddress,
}

impl UdpSocket {
	pub fn bind(addr: &SocketAddress, options: &SocketOptions) -> Result<Self> {
		let mut socket = Self::open(addr, options)?;
		socket.bind(addr)?;
		socket.set_state(SocketState::DUPLEX);
		Ok(Self { socket, last_sender: SocketAddress::Unspecified })
	}

	/// Fixes the peer to `addr`. The local side gets an ephemeral port.
	pub fn connect(addr: &SocketAddress, options: &SocketOptions, timeout: Option<Duration>) -> Result<Self> {
		let mut socket = Self::open(addr, options)?;
		if !socket.connect(addr)? {
			socket.wait_connected(timeout)?;
		}
		Ok(Self { socket, last_sender: SocketAddress::Unspecified })
	}

	fn open(addr: &SocketAddress, options: &SocketOptions) -> Result<Socket> {
		let socket = Socket::new(addr.family(), SockKind::Datagram)?;
		options.apply_datagram(socket.raw()).or_else(|e| socket.fail(e))?;
		socket.set_nonblocking(true)?;
		Ok(socket)
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

	/// Source of the datagram most recently returned by `read_data`.
	pub fn last_sender(&self) -> SocketAddress {
		self.last_sender
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

	fn wait(&self, write: bool, deadline: &Deadline) -> Result<()> {
		let mut read_set = Vec::with_capacity(1);
		let mut write_set = Vec::with_capacity(1);
		if write {
			write_set.push(&self.socket);
		} else {
			read_set.push(&self.socket);
		}
		if select(&mut read_set, &mut write_set, deadline.remaining()) {
			Ok(())
		} else {
			Err(self.socket.last_error_or(SocketError::TimedOut))
		}
	}

	/// Waits up to `timeout` for one datagram and returns its payload.
	pub fn read_data(&mut self, timeout: Option<Duration>) -> Result<Vec<u8>> {
		let deadline = Deadline::after(timeout);
		loop {
			self.wait(false, &deadline)?;
			let mut scratch = vec![0u8; DATAGRAM_SCRATCH_SIZE];
			match self.socket.recv_from(&mut scratch) {
				Ok((n, from)) => {
					scratch.truncate(n);
					self.last_sender = from;
					return Ok(scratch);
				}
				Err(SocketError::WouldBlock) => continue,
				Err(e) => return Err(e),
			}
		}
	}

	/// Sends `data` to the connected peer as one datagram.
	pub fn send_data(&self, data: &[u8], timeout: Option<Duration>) -> Result<()> {
		if !self.socket.is_connected() {
			return self.socket.fail(SocketError::NotConnected);
		}
		self.send_whole(data, timeout, |socket| socket.send(data))
	}

	/// Sends `data` to `addr` as one datagram.
	pub fn send_data_to(&self, data: &[u8], addr: &SocketAddress, timeout: Option<Duration>) -> Result<()> {
		self.send_whole(data, timeout, |socket| socket.send_to(data, addr))
	}

	fn send_whole<F>(&self, data: &[u8], timeout: Option<Duration>, send: F) -> Result<()>
	where
		F: Fn(&Socket) -> Result<usize>,
	{
		let deadline = Deadline::after(timeout);
		loop {
			self.wait(true, &deadline)?;
			match send(&self.socket) {
				Ok(n) if n == data.len() => return Ok(()),
				Ok(n) => return self.socket.fail(SocketError::ShortSend { sent: n, len: data.len() }),
				Err(SocketError::WouldBlock) => continue,
				Err(e) => return Err(e),
			}
		}
	}

	pub fn close(&mut self) -> Result<()> {
		self.socket.close()
	}
}
