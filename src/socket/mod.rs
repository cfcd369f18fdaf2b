mod base;
mod buffer;
mod datagram;
mod listener;
mod options;
mod raw;
mod select;
mod state;
mod stream;

pub use self::base::{Counters, Socket};
pub use self::datagram::{UdpSocket, DATAGRAM_SCRATCH_SIZE};
pub use self::listener::TcpListener;
pub use self::options::{set_broadcast, set_keepalive, set_linger, set_recv_buffer_size,
						set_reuse_addr, set_reuse_port, set_send_buffer_size, set_tcp_max_segment,
						set_tcp_nodelay, BufferConfig, ReuseConfig, SocketOptions, StreamLimits};
pub use self::raw::{ConnectStatus, RawSocket};
pub use self::select::{select, CancelHandle, Deadline, MAX_WAIT_SLICE};
pub use self::state::SocketState;
pub use self::stream::{TcpSocket, SEND_COALESCE_LIMIT};

/// Socket type passed to the `socket()` syscall.
///
/// - `Stream`: reliable, ordered byte stream (TCP)
/// - `Datagram`: unreliable, unordered packets (UDP)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockKind {
	Stream,
	Datagram,
}

impl SockKind {
	/// Returns the libc constant for this socket type.
	#[inline]
	pub fn raw(self) -> libc::c_int {
		match self {
			SockKind::Stream => libc::SOCK_STREAM,
			SockKind::Datagram => libc::SOCK_DGRAM,
		}
	}
}

/// Direction for `shutdown()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
	Read,      // SHUT_RD
	Write,     // SHUT_WR
	ReadWrite, // SHUT_RDWR
}

impl Shutdown {
	#[inline]
	pub(crate) fn raw(self) -> libc::c_int {
		match self {
			Shutdown::Read => libc::SHUT_RD,
			Shutdown::Write => libc::SHUT_WR,
			Shutdown::ReadWrite => libc::SHUT_RDWR,
		}
	}

	/// State bits that stop being valid once this direction is shut.
	pub(crate) fn cleared_state(self) -> SocketState {
		match self {
			Shutdown::Read => SocketState::READABLE,
			Shutdown::Write => SocketState::WRITABLE,
			Shutdown::ReadWrite => SocketState::DUPLEX,
		}
	}
}
