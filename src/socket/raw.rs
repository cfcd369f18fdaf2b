use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use crate::addr::{Family, FromSockAddr, SocketAddress, ToSockAddr};
use crate::error::{errno, Result, SocketError};
use super::{Shutdown, SockKind};

/// Outcome of a `connect()` call on a non-blocking socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
	/// The connection completed immediately (common on loopback).
	Connected,
	/// The kernel is still completing the handshake; wait for writability
	/// and read `pending_error()`.
	InProgress,
}

/// Thin wrapper over an OS socket descriptor.
///
/// Every call that can fail reports an error carrying the errno. No state
/// is tracked here; that is `Socket`'s job. An invalid handle (never
/// created, or already closed) fails every call with `NotOpen` except
/// `close()`, which is a no-op.
#[derive(Debug)]
pub struct RawSocket {
	fd: Option<OwnedFd>,
	family: Family,
	kind: SockKind,
}

impl RawSocket {
	/// Creates a new socket with `SOCK_CLOEXEC`.
	pub fn create(family: Family, kind: SockKind) -> Result<Self> {
		if family == Family::Unspecified {
			return Err(SocketError::InvalidAddress { reason: "unspecified address family" });
		}
		let fd = unsafe { libc::socket(family.raw(), kind.raw() | libc::SOCK_CLOEXEC, 0) };
		if fd == -1 {
			return Err(SocketError::Create { errno: errno() });
		}
		let fd = unsafe { OwnedFd::from_raw_fd(fd) };
		Ok(Self { fd: Some(fd), family, kind })
	}

	pub(crate) fn from_owned(fd: OwnedFd, family: Family, kind: SockKind) -> Self {
		Self { fd: Some(fd), family, kind }
	}

	pub fn is_valid(&self) -> bool {
		self.fd.is_some()
	}

	pub fn family(&self) -> Family {
		self.family
	}

	pub fn kind(&self) -> SockKind {
		self.kind
	}

	#[inline]
	fn fd(&self) -> Result<RawFd> {
		self.fd.as_ref().map(|fd| fd.as_raw_fd()).ok_or(SocketError::NotOpen)
	}

	/// Sets or clears `O_NONBLOCK`.
	pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
		let fd = self.fd()?;
		let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
		if flags == -1 {
			return Err(SocketError::GetOption { errno: errno(), option: "F_GETFL" });
		}
		let new_flags = if nonblocking {
			flags | libc::O_NONBLOCK
		} else {
			flags & !libc::O_NONBLOCK
		};
		if unsafe { libc::fcntl(fd, libc::F_SETFL, new_flags) } == -1 {
			return Err(SocketError::SetOption { errno: errno(), option: "O_NONBLOCK" });
		}
		Ok(())
	}

	pub fn bind(&self, addr: &SocketAddress) -> Result<()> {
		let fd = self.fd()?;
		match addr.with_raw(|ptr, len| unsafe { libc::bind(fd, ptr, len) }) {
			Some(-1) => Err(SocketError::Bind { errno: errno(), addr: addr.to_string() }),
			Some(_) => Ok(()),
			None => Err(SocketError::InvalidAddress { reason: "cannot bind to an unspecified address" }),
		}
	}

	pub fn listen(&self, backlog: i32) -> Result<()> {
		if unsafe { libc::listen(self.fd()?, backlog) } == -1 {
			return Err(SocketError::Listen { errno: errno(), backlog });
		}
		Ok(())
	}

	/// Accepts one pending connection.
	///
	/// The new descriptor is created non-blocking and close-on-exec.
	/// `WouldBlock` means no connection was pending.
	pub fn accept(&self) -> Result<(RawSocket, SocketAddress)> {
		let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
		let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

		let fd = unsafe {
			libc::accept4(
				self.fd()?,
				&mut storage as *mut _ as *mut libc::sockaddr,
				&mut len,
				libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
			)
		};
		if fd == -1 {
			return match errno() {
				libc::EAGAIN | libc::EINTR | libc::ECONNABORTED => Err(SocketError::WouldBlock),
				e => Err(SocketError::Accept { errno: e }),
			};
		}

		let fd = unsafe { OwnedFd::from_raw_fd(fd) };
		let peer = unsafe { SocketAddress::from_sockaddr(&storage as *const _ as *const libc::sockaddr, len) }
			.unwrap_or_default();
		Ok((RawSocket::from_owned(fd, self.family, SockKind::Stream), peer))
	}

	/// Starts (or completes) a connection.
	pub fn connect(&self, addr: &SocketAddress) -> Result<ConnectStatus> {
		let fd = self.fd()?;
		match addr.with_raw(|ptr, len| unsafe { libc::connect(fd, ptr, len) }) {
			Some(0) => Ok(ConnectStatus::Connected),
			Some(_) => match errno() {
				libc::EINPROGRESS | libc::EAGAIN | libc::EINTR => Ok(ConnectStatus::InProgress),
				e => Err(SocketError::Connect { errno: e, addr: addr.to_string() }),
			},
			None => Err(SocketError::InvalidAddress { reason: "cannot connect to an unspecified address" }),
		}
	}

	pub fn shutdown(&self, how: Shutdown) -> Result<()> {
		if unsafe { libc::shutdown(self.fd()?, how.raw()) } == -1 {
			return Err(SocketError::Shutdown { errno: errno() });
		}
		Ok(())
	}

	/// Receives into `buf`. `Ok(0)` is an orderly close by the peer.
	pub fn recv(&self, buf: &mut [u8], flags: i32) -> Result<usize> {
		let n = unsafe {
			libc::recv(self.fd()?, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), flags)
		};
		if n == -1 {
			return Err(read_error(errno()));
		}
		Ok(n as usize)
	}

	/// Receives one datagram and the address it came from.
	pub fn recv_from(&self, buf: &mut [u8], flags: i32) -> Result<(usize, SocketAddress)> {
		let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
		let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

		let n = unsafe {
			libc::recvfrom(
				self.fd()?,
				buf.as_mut_ptr() as *mut libc::c_void,
				buf.len(),
				flags,
				&mut storage as *mut _ as *mut libc::sockaddr,
				&mut len,
			)
		};
		if n == -1 {
			return Err(read_error(errno()));
		}

		let from = unsafe { SocketAddress::from_sockaddr(&storage as *const _ as *const libc::sockaddr, len) }
			.unwrap_or_default();
		Ok((n as usize, from))
	}

	/// Sends from `buf`. `MSG_NOSIGNAL` is always added.
	pub fn send(&self, buf: &[u8], flags: i32) -> Result<usize> {
		let n = unsafe {
			libc::send(
				self.fd()?,
				buf.as_ptr() as *const libc::c_void,
				buf.len(),
				flags | libc::MSG_NOSIGNAL,
			)
		};
		if n == -1 {
			return Err(send_error(errno()));
		}
		Ok(n as usize)
	}

	pub fn send_to(&self, buf: &[u8], addr: &SocketAddress, flags: i32) -> Result<usize> {
		let fd = self.fd()?;
		let result = addr.with_raw(|ptr, len| unsafe {
			libc::sendto(
				fd,
				buf.as_ptr() as *const libc::c_void,
				buf.len(),
				flags | libc::MSG_NOSIGNAL,
				ptr,
				len,
			)
		});

		match result {
			Some(n) if n >= 0 => Ok(n as usize),
			Some(_) => Err(send_error(errno())),
			None => Err(SocketError::InvalidAddress { reason: "cannot send to an unspecified address" }),
		}
	}

	/// Returns the locally bound address.
	pub fn local_addr(&self) -> Result<SocketAddress> {
		let fd = self.fd()?;
		self.query_addr("getsockname", |storage, len| unsafe { libc::getsockname(fd, storage, len) })
	}

	/// Returns the remote address of a connected socket.
	pub fn peer_addr(&self) -> Result<SocketAddress> {
		let fd = self.fd()?;
		self.query_addr("getpeername", |storage, len| unsafe { libc::getpeername(fd, storage, len) })
	}

	fn query_addr<F>(&self, option: &'static str, call: F) -> Result<SocketAddress>
	where
		F: FnOnce(*mut libc::sockaddr, *mut libc::socklen_t) -> libc::c_int,
	{
		let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
		let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;

		if call(&mut storage as *mut _ as *mut libc::sockaddr, &mut len) == -1 {
			return Err(SocketError::GetOption { errno: errno(), option });
		}
		unsafe { SocketAddress::from_sockaddr(&storage as *const _ as *const libc::sockaddr, len) }
			.ok_or(SocketError::InvalidAddress { reason: "invalid address" })
	}

	/// Reads and clears the socket error status (`SO_ERROR`).
	///
	/// Zero means no error. After a non-blocking connect this is the
	/// connect result.
	pub fn pending_error(&self) -> Result<i32> {
		let mut error: libc::c_int = 0;
		let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;

		let result = unsafe {
			libc::getsockopt(
				self.fd()?,
				libc::SOL_SOCKET,
				libc::SO_ERROR,
				&mut error as *mut _ as *mut libc::c_void,
				&mut len,
			)
		};
		if result == -1 {
			return Err(SocketError::GetOption { errno: errno(), option: "SO_ERROR" });
		}
		Ok(error)
	}

	/// Closes the descriptor. Closing an invalid handle succeeds.
	pub fn close(&mut self) -> Result<()> {
		let Some(fd) = self.fd.take() else {
			return Ok(());
		};
		if unsafe { libc::close(fd.into_raw_fd()) } == -1 {
			return Err(SocketError::Close { errno: errno() });
		}
		Ok(())
	}
}

fn read_error(errno: i32) -> SocketError {
	match errno {
		libc::EAGAIN | libc::EINTR => SocketError::WouldBlock,
		e => SocketError::Read { errno: e },
	}
}

fn send_error(errno: i32) -> SocketError {
	match errno {
		libc::EAGAIN | libc::EINTR | libc::ENOBUFS => SocketError::WouldBlock,
		e => SocketError::Send { errno: e },
	}
}

impl AsRawFd for RawSocket {
	/// Returns -1 for an invalid handle.
	fn as_raw_fd(&self) -> RawFd {
		self.fd.as_ref().map_or(-1, |fd| fd.as_raw_fd())
	}
}

impl IntoRawFd for RawSocket {
	fn into_raw_fd(mut self) -> RawFd {
		self.fd.take().map_or(-1, |fd| fd.into_raw_fd())
	}
}

/*
  Error normalisation:
  ┌──────────────────────────────┬─────────────────────────────┐
  │ errno                        │ reported as                 │
  ├──────────────────────────────┼─────────────────────────────┤
  │ EINPROGRESS on connect       │ ConnectStatus::InProgress   │
  │ EAGAIN / EINTR on recv/send  │ SocketError::WouldBlock     │
  │ anything else                │ category error with errno   │
  └──────────────────────────────┴─────────────────────────────┘
*/
