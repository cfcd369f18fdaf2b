pub mod socket;
mod addr;
mod error;
mod network;

pub use self::error::{Result, SocketError, errno};
pub use self::addr::{Family, FromSockAddr, ToSockAddr, SocketAddress, SocketAddrV4, SocketAddrV6,
					 AddressFilter, AddressRange};
pub use self::network::{startup, resolve, ConnectString, Network};
pub use self::socket::{Socket, SocketState, Counters, Shutdown, SockKind, RawSocket, ConnectStatus,
					   TcpListener, TcpSocket, UdpSocket,
					   select, CancelHandle, Deadline, MAX_WAIT_SLICE,
					   SEND_COALESCE_LIMIT, DATAGRAM_SCRATCH_SIZE,
					   SocketOptions, StreamLimits, BufferConfig, ReuseConfig};
