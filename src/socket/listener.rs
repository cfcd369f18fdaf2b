use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use log::{debug, warn};
use crate::addr::{AddressFilter, SocketAddress};
use crate::error::{Result, SocketError};
use super::select::{select, CancelHandle, Deadline};
use super::{SockKind, Socket, SocketOptions, TcpSocket};

/// A bound TCP socket that accepts connections.
///
/// `accept` takes `&self` so several threads can serve one listener; the
/// OS accept call itself is serialised by an internal mutex. Each peer is
/// checked against the listener's `AddressFilter` and every accepted
/// connection gets the listener's `SocketOptions`.
#[derive(Debug)]
pub struct TcpListener {
	socket: Socket,
	accept_lock: Mutex<()>,
	filter: AddressFilter,
	options: SocketOptions,
}

impl TcpListener {
	/// Creates a non-blocking TCP socket and binds it to `addr`.
	///
	/// `*:0` picks an ephemeral port; read it back with `local_address()`.
	pub fn bind(addr: &SocketAddress, options: &SocketOptions) -> Result<Self> {
		let mut socket = Socket::new(addr.family(), SockKind::Stream)?;
		options.apply_listener(socket.raw()).or_else(|e| socket.fail(e))?;
		socket.set_nonblocking(true)?;
		socket.bind(addr)?;
		Ok(Self {
			socket,
			accept_lock: Mutex::new(()),
			filter: AddressFilter::new(),
			options: *options,
		})
	}

	pub fn with_filter(mut self, filter: AddressFilter) -> Self {
		self.filter = filter;
		self
	}

	pub fn set_filter(&mut self, filter: AddressFilter) {
		self.filter = filter;
	}

	pub fn filter(&self) -> &AddressFilter {
		&self.filter
	}

	pub fn options(&self) -> &SocketOptions {
		&self.options
	}

	pub fn socket(&self) -> &Socket {
		&self.socket
	}

	pub fn local_address(&self) -> SocketAddress {
		self.socket.local_address()
	}

	pub fn last_error(&self) -> Option<SocketError> {
		self.socket.last_error()
	}

	pub fn cancel_handle(&self) -> CancelHandle {
		self.socket.cancel_handle()
	}

	pub fn listen(&mut self, backlog: i32) -> Result<()> {
		self.socket.listen(backlog)
	}

	/// Waits up to `timeout` for a connection and accepts it.
	///
	/// A peer rejected by the filter is closed at once and the call fails
	/// with `AddressBlocked`.
	pub fn accept(&self, timeout: Option<Duration>) -> Result<TcpSocket> {
		if !self.socket.is_listening() {
			return self.socket.fail(SocketError::NotListening);
		}

		let deadline = Deadline::after(timeout);
		let (mut raw, peer) = loop {
			let mut read_set = vec![&self.socket];
			let mut write_set = Vec::new();
			if !select(&mut read_set, &mut write_set, deadline.remaining()) {
				return Err(self.socket.last_error_or(SocketError::TimedOut));
			}

			let accepted = {
				let _guard = self.accept_lock.lock().unwrap_or_else(PoisonError::into_inner);
				if self.socket.cancel_requested() {
					self.socket.mark_canceled();
					return Err(SocketError::Canceled);
				}
				self.socket.raw().accept()
			};

			match accepted {
				Ok(pair) => break pair,
				// another thread took it
				Err(SocketError::WouldBlock) => continue,
				Err(e) => return self.socket.fail(e),
			}
		};

		if let Err(e) = self.filter.check(&peer) {
			warn!("{}: refusing connection from blocked address {}", self.socket.local_address(), peer);
			let _ = raw.close();
			return self.socket.fail(e);
		}

		let socket = Socket::from_accepted(raw, peer);
		if let Err(e) = self.options.apply_stream(socket.raw()) {
			return self.socket.fail(e);
		}
		debug!("{}: accepted connection from {}", self.socket.local_address(), peer);
		Ok(TcpSocket::from_socket(socket, self.options.limits))
	}

	pub fn close(&mut self) -> Result<()> {
		self.socket.close()
	}
}
