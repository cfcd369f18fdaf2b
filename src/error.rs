/// Errors reported by sockets and the network facade.
///
/// Every fallible operation returns one of these and also records it as the
/// object's last error, so a caller can inspect the outcome later.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
	// State preconditions. No OS call was attempted.
	#[error("socket is not open")]
	NotOpen,

	#[error("socket is already bound")]
	AlreadyBound,

	#[error("socket is not bound")]
	NotBound,

	#[error("socket is already listening")]
	AlreadyListening,

	#[error("socket is not listening")]
	NotListening,

	#[error("connect already in progress")]
	AlreadyConnecting,

	#[error("socket is already connected")]
	AlreadyConnected,

	#[error("socket is not connected")]
	NotConnected,

	#[error("socket is not readable")]
	NotReadable,

	#[error("socket is not writable")]
	NotWritable,

	// OS call failures.
	#[error("socket() failed: {}", errno_to_str(*.errno))]
	Create { errno: i32 },

	#[error("bind({addr}) failed: {}", errno_to_str(*.errno))]
	Bind { errno: i32, addr: String },

	#[error("listen(backlog={backlog}) failed: {}", errno_to_str(*.errno))]
	Listen { errno: i32, backlog: i32 },

	#[error("accept() failed: {}", errno_to_str(*.errno))]
	Accept { errno: i32 },

	#[error("connect({addr}) failed: {}", errno_to_str(*.errno))]
	Connect { errno: i32, addr: String },

	#[error("poll() failed: {}", errno_to_str(*.errno))]
	Select { errno: i32 },

	#[error("recv() failed: {}", errno_to_str(*.errno))]
	Read { errno: i32 },

	#[error("send() failed: {}", errno_to_str(*.errno))]
	Send { errno: i32 },

	#[error("shutdown() failed: {}", errno_to_str(*.errno))]
	Shutdown { errno: i32 },

	#[error("close() failed: {}", errno_to_str(*.errno))]
	Close { errno: i32 },

	#[error("setsockopt({option}) failed: {}", errno_to_str(*.errno))]
	SetOption { errno: i32, option: &'static str },

	#[error("getsockopt({option}) failed: {}", errno_to_str(*.errno))]
	GetOption { errno: i32, option: &'static str },

	#[error("operation would block")]
	WouldBlock,

	#[error("short send: {sent} of {len} bytes")]
	ShortSend { sent: usize, len: usize },

	// Policy rejections detected by this layer.
	#[error("address blocked: {addr}")]
	AddressBlocked { addr: String },

	#[error("bad connect string: {input:?}")]
	BadConnectString { input: String },

	#[error("port unspecified in {input:?}")]
	PortUnspecified { input: String },

	#[error("invalid address: {reason}")]
	InvalidAddress { reason: &'static str },

	#[error("lookup of {host:?} failed: {reason}")]
	Lookup { host: String, reason: String },

	#[error("no addresses found for {host:?}")]
	NoAddresses { host: String },

	#[error("line too long (limit {limit} bytes)")]
	LineTooLong { limit: usize },

	#[error("message too big (limit {limit} bytes)")]
	MessageTooBig { limit: usize },

	// Stream outcomes.
	#[error("connection closed by peer")]
	ClosedByPeer,

	#[error("connect failed: {}", errno_to_str(*.errno))]
	ConnectFailed { errno: i32 },

	#[error("operation timed out")]
	TimedOut,

	#[error("operation canceled")]
	Canceled,
}

impl SocketError {
	/// Returns the OS error number carried by this error, if any.
	pub fn errno(&self) -> Option<i32> {
		match self {
			SocketError::Create { errno }
			| SocketError::Bind { errno, .. }
			| SocketError::Listen { errno, .. }
			| SocketError::Accept { errno }
			| SocketError::Connect { errno, .. }
			| SocketError::Select { errno }
			| SocketError::Read { errno }
			| SocketError::Send { errno }
			| SocketError::Shutdown { errno }
			| SocketError::Close { errno }
			| SocketError::SetOption { errno, .. }
			| SocketError::GetOption { errno, .. }
			| SocketError::ConnectFailed { errno } => Some(*errno),
			_ => None,
		}
	}

	/// True for `TimedOut`. The caller may retry.
	pub fn is_timeout(&self) -> bool {
		matches!(self, SocketError::TimedOut)
	}

	/// True for `Canceled`.
	pub fn is_canceled(&self) -> bool {
		matches!(self, SocketError::Canceled)
	}

	/// True if the error was raised before any OS call because the socket
	/// was in the wrong state.
	pub fn is_state_error(&self) -> bool {
		matches!(
			self,
			SocketError::NotOpen
				| SocketError::AlreadyBound
				| SocketError::NotBound
				| SocketError::AlreadyListening
				| SocketError::NotListening
				| SocketError::AlreadyConnecting
				| SocketError::AlreadyConnected
				| SocketError::NotConnected
				| SocketError::NotReadable
				| SocketError::NotWritable
		)
	}

	/// True for the policy rejections of this layer.
	pub fn is_policy_error(&self) -> bool {
		matches!(
			self,
			SocketError::AddressBlocked { .. }
				| SocketError::BadConnectString { .. }
				| SocketError::PortUnspecified { .. }
				| SocketError::InvalidAddress { .. }
		)
	}
}

pub type Result<T> = std::result::Result<T, SocketError>;

/// Returns current errno value.
#[inline]
pub fn errno() -> i32 {
	std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Converts errno to human-readable string.
fn errno_to_str(errno: i32) -> String {
	match errno {
		libc::EACCES => "permission denied".into(),
		libc::EADDRINUSE => "address already in use".into(),
		libc::EADDRNOTAVAIL => "address not available".into(),
		libc::EAFNOSUPPORT => "address family not supported".into(),
		libc::EAGAIN => "resource temporarily unavailable".into(),
		libc::EBADF => "bad file descriptor".into(),
		libc::ECONNABORTED => "connection aborted".into(),
		libc::ECONNREFUSED => "connection refused".into(),
		libc::ECONNRESET => "connection reset by peer".into(),
		libc::EHOSTUNREACH => "host unreachable".into(),
		libc::EINPROGRESS => "operation in progress".into(),
		libc::EINTR => "interrupted by signal".into(),
		libc::EINVAL => "invalid argument".into(),
		libc::EMFILE => "too many open files".into(),
		libc::EMSGSIZE => "message too long".into(),
		libc::ENETUNREACH => "network unreachable".into(),
		libc::ENOBUFS => "no buffer space available".into(),
		libc::ENOTCONN => "not connected".into(),
		libc::EPIPE => "broken pipe".into(),
		libc::ETIMEDOUT => "connection timed out".into(),
		_ => format!("errno {}", errno),
	}
}

/// Maps errno to std::io::ErrorKind.
fn errno_to_kind(errno: i32) -> std::io::ErrorKind {
	match errno {
		libc::EACCES | libc::EPERM => std::io::ErrorKind::PermissionDenied,
		libc::EADDRINUSE => std::io::ErrorKind::AddrInUse,
		libc::EADDRNOTAVAIL => std::io::ErrorKind::AddrNotAvailable,
		libc::EAGAIN => std::io::ErrorKind::WouldBlock,
		libc::ECONNABORTED => std::io::ErrorKind::ConnectionAborted,
		libc::ECONNREFUSED => std::io::ErrorKind::ConnectionRefused,
		libc::ECONNRESET => std::io::ErrorKind::ConnectionReset,
		libc::EINTR => std::io::ErrorKind::Interrupted,
		libc::EINVAL => std::io::ErrorKind::InvalidInput,
		libc::ENOTCONN => std::io::ErrorKind::NotConnected,
		libc::EPIPE => std::io::ErrorKind::BrokenPipe,
		libc::ETIMEDOUT => std::io::ErrorKind::TimedOut,
		_ => std::io::ErrorKind::Other,
	}
}

impl From<SocketError> for std::io::Error {
	fn from(err: SocketError) -> Self {
		let kind = match &err {
			SocketError::WouldBlock => std::io::ErrorKind::WouldBlock,
			SocketError::TimedOut => std::io::ErrorKind::TimedOut,
			SocketError::ClosedByPeer => std::io::ErrorKind::ConnectionReset,
			SocketError::NotConnected => std::io::ErrorKind::NotConnected,
			SocketError::AddressBlocked { .. } => std::io::ErrorKind::PermissionDenied,
			SocketError::BadConnectString { .. }
			| SocketError::PortUnspecified { .. }
			| SocketError::InvalidAddress { .. } => std::io::ErrorKind::InvalidInput,
			SocketError::LineTooLong { .. } | SocketError::MessageTooBig { .. } => {
				std::io::ErrorKind::InvalidData
			}
			SocketError::ShortSend { .. } => std::io::ErrorKind::WriteZero,
			other => match other.errno() {
				Some(errno) => errno_to_kind(errno),
				None => std::io::ErrorKind::Other,
			},
		};
		std::io::Error::new(kind, err)
	}
}
