use std::os::fd::AsRawFd;
use std::time::Duration;
use crate::error::{errno, Result, SocketError};

fn setsockopt<S: AsRawFd, T>(
	socket: &S,
	level: libc::c_int,
	name: libc::c_int,
	value: &T,
	option: &'static str,
) -> Result<()> {
	let result = unsafe {
		libc::setsockopt(
			socket.as_raw_fd(),
			level,
			name,
			value as *const T as *const libc::c_void,
			std::mem::size_of::<T>() as libc::socklen_t,
		)
	};
	if result == -1 {
		Err(SocketError::SetOption { errno: errno(), option })
	} else {
		Ok(())
	}
}

#[inline]
fn flag(enable: bool) -> libc::c_int {
	if enable { 1 } else { 0 }
}

/// Sets SO_REUSEADDR on a socket.
///
/// Allows binding to an address that's in TIME_WAIT state.
pub fn set_reuse_addr<S: AsRawFd>(socket: &S, enable: bool) -> Result<()> {
	setsockopt(socket, libc::SOL_SOCKET, libc::SO_REUSEADDR, &flag(enable), "SO_REUSEADDR")
}

/// Sets SO_REUSEPORT on a socket.
///
/// Allows multiple sockets to bind the same port.
pub fn set_reuse_port<S: AsRawFd>(socket: &S, enable: bool) -> Result<()> {
	setsockopt(socket, libc::SOL_SOCKET, libc::SO_REUSEPORT, &flag(enable), "SO_REUSEPORT")
}

/// Sets SO_BROADCAST, required to send datagrams to a broadcast address.
pub fn set_broadcast<S: AsRawFd>(socket: &S, enable: bool) -> Result<()> {
	setsockopt(socket, libc::SOL_SOCKET, libc::SO_BROADCAST, &flag(enable), "SO_BROADCAST")
}

/// Sets TCP_NODELAY on a socket.
///
/// Disables Nagle's algorithm. Small writes go out immediately.
pub fn set_tcp_nodelay<S: AsRawFd>(socket: &S, enable: bool) -> Result<()> {
	setsockopt(socket, libc::IPPROTO_TCP, libc::TCP_NODELAY, &flag(enable), "TCP_NODELAY")
}

/// Sets TCP_MAXSEG, the largest segment the socket will send.
pub fn set_tcp_max_segment<S: AsRawFd>(socket: &S, bytes: u32) -> Result<()> {
	setsockopt(socket, libc::IPPROTO_TCP, libc::TCP_MAXSEG, &(bytes as libc::c_int), "TCP_MAXSEG")
}

/// Sets receive buffer size (SO_RCVBUF).
///
/// Kernel typically doubles this value internally.
pub fn set_recv_buffer_size<S: AsRawFd>(socket: &S, size: usize) -> Result<()> {
	setsockopt(socket, libc::SOL_SOCKET, libc::SO_RCVBUF, &(size as libc::c_int), "SO_RCVBUF")
}

/// Sets send buffer size (SO_SNDBUF).
pub fn set_send_buffer_size<S: AsRawFd>(socket: &S, size: usize) -> Result<()> {
	setsockopt(socket, libc::SOL_SOCKET, libc::SO_SNDBUF, &(size as libc::c_int), "SO_SNDBUF")
}

/// Enables TCP keep-alive (SO_KEEPALIVE).
///
/// The kernel checks idle connections with keepalive segments to detect dead peers.
pub fn set_keepalive<S: AsRawFd>(socket: &S, enable: bool) -> Result<()> {
	setsockopt(socket, libc::SOL_SOCKET, libc::SO_KEEPALIVE, &flag(enable), "SO_KEEPALIVE")
}

/// Sets socket linger behavior (SO_LINGER).
///
/// - `None`: close returns immediately, kernel sends data in background
/// - `Some(0)`: hard reset (RST), discards unsent data
/// - `Some(n)`: close blocks up to n seconds waiting for data to send
pub fn set_linger<S: AsRawFd>(socket: &S, linger: Option<u32>) -> Result<()> {
	let val = match linger {
		None => libc::linger { l_onoff: 0, l_linger: 0 },
		Some(seconds) => libc::linger { l_onoff: 1, l_linger: seconds as libc::c_int },
	};
	setsockopt(socket, libc::SOL_SOCKET, libc::SO_LINGER, &val, "SO_LINGER")
}

/// Buffer size configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferConfig {
	pub recv: Option<usize>,
	pub send: Option<usize>,
}

impl BufferConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn recv(mut self, size: usize) -> Self {
		self.recv = Some(size);
		self
	}

	pub fn send(mut self, size: usize) -> Self {
		self.send = Some(size);
		self
	}

	pub fn both(mut self, size: usize) -> Self {
		self.recv = Some(size);
		self.send = Some(size);
		self
	}

	fn apply<S: AsRawFd>(&self, socket: &S) -> Result<()> {
		if let Some(size) = self.recv {
			set_recv_buffer_size(socket, size)?;
		}
		if let Some(size) = self.send {
			set_send_buffer_size(socket, size)?;
		}
		Ok(())
	}
}

/// Address reuse configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReuseConfig {
	pub addr: bool,
	pub port: bool,
}

impl Default for ReuseConfig {
	fn default() -> Self {
		Self { addr: true, port: false }
	}
}

impl ReuseConfig {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn addr(mut self, enable: bool) -> Self {
		self.addr = enable;
		self
	}

	pub fn port(mut self, enable: bool) -> Self {
		self.port = enable;
		self
	}

	fn apply<S: AsRawFd>(&self, socket: &S) -> Result<()> {
		if self.addr {
			set_reuse_addr(socket, true)?;
		}
		if self.port {
			set_reuse_port(socket, true)?;
		}
		Ok(())
	}
}

/// Framing limits carried by every `TcpSocket`.
///
/// A zero limit means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
	/// Bytes requested from the OS per receive call.
	pub recv_chunk: usize,
	/// Most bytes buffered ahead of the reader while flushing output.
	pub max_read_ahead: usize,
	/// Longest line `read_line` will buffer without finding `\n`.
	pub max_line_length: usize,
	/// Largest decoded body `read_multi_line` will accept.
	pub max_message_size: usize,
	/// How long `close()` waits to drain queued output.
	pub close_timeout: Option<Duration>,
}

impl Default for StreamLimits {
	fn default() -> Self {
		Self {
			recv_chunk: 4096,
			max_read_ahead: 64 * 1024,
			max_line_length: 0,
			max_message_size: 0,
			close_timeout: Some(Duration::from_secs(30)),
		}
	}
}

/// Option template applied to sockets as they are created or accepted.
///
/// # Example
/// ```ignore
/// use wireline::{SocketOptions, BufferConfig};
///
/// let options = SocketOptions::new()
///     .keepalive(true)
///     .linger(Some(5))
///     .max_line_length(1000)
///     .buffers(BufferConfig::new().both(65536));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
	pub limits: StreamLimits,
	pub keepalive: bool,
	pub nodelay: bool,
	/// `None` leaves the OS default, `Some(x)` calls `set_linger(x)`.
	pub linger: Option<Option<u32>>,
	pub max_segment: Option<u32>,
	pub broadcast: bool,
	pub reuse: ReuseConfig,
	pub buffers: BufferConfig,
}

impl Default for SocketOptions {
	fn default() -> Self {
		Self {
			limits: StreamLimits::default(),
			keepalive: false,
			nodelay: true,
			linger: None,
			max_segment: None,
			broadcast: false,
			reuse: ReuseConfig::default(),
			buffers: BufferConfig::default(),
		}
	}
}

impl SocketOptions {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn recv_chunk(mut self, bytes: usize) -> Self {
		self.limits.recv_chunk = bytes;
		self
	}

	pub fn max_read_ahead(mut self, bytes: usize) -> Self {
		self.limits.max_read_ahead = bytes;
		self
	}

	pub fn max_line_length(mut self, bytes: usize) -> Self {
		self.limits.max_line_length = bytes;
		self
	}

	pub fn max_message_size(mut self, bytes: usize) -> Self {
		self.limits.max_message_size = bytes;
		self
	}

	pub fn close_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.limits.close_timeout = timeout;
		self
	}

	pub fn keepalive(mut self, enable: bool) -> Self {
		self.keepalive = enable;
		self
	}

	pub fn nodelay(mut self, enable: bool) -> Self {
		self.nodelay = enable;
		self
	}

	pub fn linger(mut self, seconds: Option<u32>) -> Self {
		self.linger = Some(seconds);
		self
	}

	pub fn max_segment(mut self, bytes: u32) -> Self {
		self.max_segment = Some(bytes);
		self
	}

	pub fn broadcast(mut self, enable: bool) -> Self {
		self.broadcast = enable;
		self
	}

	pub fn reuse(mut self, config: ReuseConfig) -> Self {
		self.reuse = config;
		self
	}

	pub fn buffers(mut self, config: BufferConfig) -> Self {
		self.buffers = config;
		self
	}

	/// Options for a connected or accepted TCP socket.
	pub(crate) fn apply_stream<S: AsRawFd>(&self, socket: &S) -> Result<()> {
		set_tcp_nodelay(socket, self.nodelay)?;
		if self.keepalive {
			set_keepalive(socket, true)?;
		}
		if let Some(linger) = self.linger {
			set_linger(socket, linger)?;
		}
		if let Some(bytes) = self.max_segment {
			set_tcp_max_segment(socket, bytes)?;
		}
		self.buffers.apply(socket)
	}

	/// Options for a TCP listener, set before bind.
	pub(crate) fn apply_listener<S: AsRawFd>(&self, socket: &S) -> Result<()> {
		self.reuse.apply(socket)?;
		self.buffers.apply(socket)
	}

	/// Options for a UDP socket, set before bind or connect.
	pub(crate) fn apply_datagram<S: AsRawFd>(&self, socket: &S) -> Result<()> {
		self.reuse.apply(socket)?;
		if self.broadcast {
			set_broadcast(socket, true)?;
		}
		self.buffers.apply(socket)
	}
}
