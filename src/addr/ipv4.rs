use std::net::Ipv4Addr;
use crate::addr::ToSockAddr;

/// IPv4 socket address (IP + port).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketAddrV4 {
	ip: [u8; 4],
	port: u16,
}

impl SocketAddrV4 {
	/// The wildcard address `0.0.0.0` with the given port.
	pub const fn any(port: u16) -> Self {
		Self { ip: [0; 4], port }
	}

	/// Creates a new IPv4 address.
	pub fn new(ip: [u8; 4], port: u16) -> Self {
		Self { ip, port }
	}

	/// Creates from raw sockaddr_in.
	pub(crate) fn from_raw(raw: &libc::sockaddr_in) -> Self {
		Self {
			ip: raw.sin_addr.s_addr.to_ne_bytes(),
			port: u16::from_be(raw.sin_port),
		}
	}

	/// Returns the IP bytes.
	pub fn ip(&self) -> [u8; 4] {
		self.ip
	}

	/// The address as a host-order integer, used for prefix masking.
	pub fn ip_bits(&self) -> u32 {
		u32::from_be_bytes(self.ip)
	}

	/// Returns the port.
	pub fn port(&self) -> u16 {
		self.port
	}

	pub fn set_port(&mut self, port: u16) {
		self.port = port;
	}

	pub fn set_ip(&mut self, ip: [u8; 4]) {
		self.ip = ip;
	}

	/// Converts to the raw sockaddr_in for syscalls.
	pub(crate) fn to_raw(&self) -> libc::sockaddr_in {
		libc::sockaddr_in {
			sin_family: libc::AF_INET as libc::sa_family_t,
			sin_port: self.port.to_be(),
			sin_addr: libc::in_addr {
				s_addr: u32::from_be_bytes(self.ip).to_be(),
			},
			sin_zero: [0; 8],
		}
	}

	/// Parses a dotted quad with an optional port.
	///
	/// Accepts `a.b.c.d`, `a.b.c.d:port` and the legacy `a.b.c.d.port`.
	pub(crate) fn parse_dotted(text: &str) -> Option<Self> {
		if let Some((host, port)) = text.split_once(':') {
			let ip: Ipv4Addr = host.parse().ok()?;
			return Some(Self::new(ip.octets(), port.parse().ok()?));
		}
		let parts: Vec<&str> = text.split('.').collect();
		match parts.len() {
			4 => text.parse::<Ipv4Addr>().ok().map(|ip| Self::new(ip.octets(), 0)),
			5 => {
				let ip: Ipv4Addr = parts[..4].join(".").parse().ok()?;
				Some(Self::new(ip.octets(), parts[4].parse().ok()?))
			}
			_ => None,
		}
	}
}

impl std::fmt::Display for SocketAddrV4 {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}:{}", Ipv4Addr::from(self.ip), self.port)
	}
}

impl ToSockAddr for SocketAddrV4 {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		let raw = self.to_raw();
		let ptr = &raw as *const _ as *const libc::sockaddr;
		let len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
		Some(f(ptr, len))
	}
}

/*
  sockaddr_in layout:
  ┌────────────┬──────────────────────────────────────┐
  │ sin_family │ AF_INET                              │
  │ sin_port   │ port, network byte order             │
  │ sin_addr   │ address, network byte order          │
  │ sin_zero   │ padding up to sizeof(sockaddr)       │
  └────────────┴──────────────────────────────────────┘
*/
