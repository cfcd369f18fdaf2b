use bitflags::bitflags;

bitflags! {
	/// Lifecycle bitmask of a socket.
	///
	/// OPEN is set while a handle exists and is replaced by CLOSED on close.
	/// BOUND implies OPEN, LISTENING implies BOUND. CONNECTING and CONNECTED
	/// never hold together. TIMED_OUT and CANCELED stay set until the socket
	/// is closed or `reset_status()` is called.
	#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
	pub struct SocketState: u32 {
		const OPEN = 1 << 0;
		const BOUND = 1 << 1;
		const LISTENING = 1 << 2;
		const CONNECTING = 1 << 3;
		const CONNECTED = 1 << 4;
		const READABLE = 1 << 5;
		const WRITABLE = 1 << 6;
		const CLOSED = 1 << 7;
		const TIMED_OUT = 1 << 8;
		const CANCELED = 1 << 9;

		/// Both data directions open.
		const DUPLEX = Self::READABLE.bits() | Self::WRITABLE.bits();
	}
}
