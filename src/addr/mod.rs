//! Address values and address policy.
//!
//! - `SocketAddrV4` / `SocketAddrV6`: concrete family addresses
//! - `SocketAddress`: fixed-size value over either family (or unspecified)
//! - `AddressRange` / `AddressFilter`: CIDR ranges and allow/block policy

mod ipv4;
mod ipv6;
mod range;
pub use self::ipv4::SocketAddrV4;
pub use self::ipv6::SocketAddrV6;
pub use self::range::{AddressFilter, AddressRange};

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::str::FromStr;
use crate::error::SocketError;

/// Address family tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
	Unspecified,
	Ipv4,
	Ipv6,
}

impl Family {
	/// Returns the libc constant for this address family.
	#[inline]
	pub fn raw(self) -> libc::c_int {
		match self {
			Family::Unspecified => libc::AF_UNSPEC,
			Family::Ipv4 => libc::AF_INET,
			Family::Ipv6 => libc::AF_INET6,
		}
	}
}

/// Trait for address types that can be converted to raw sockaddr for syscalls.
pub trait ToSockAddr {
	/// Calls the provided closure with a pointer to the raw sockaddr and its size.
	/// Returns None if the address cannot be expressed (unspecified family).
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R;
}

/// Trait for address types that can be created from raw sockaddr.
pub trait FromSockAddr: Sized {
	/// Creates address from raw sockaddr storage.
	///
	/// # Safety
	/// `addr` must point to at least `len` readable bytes.
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self>;
}

impl FromSockAddr for SocketAddrV4 {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_in) };
		Some(Self::from_raw(raw))
	}
}

impl FromSockAddr for SocketAddrV6 {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t {
			return None;
		}
		let raw = unsafe { &*(addr as *const libc::sockaddr_in6) };
		Some(Self::from_raw(raw))
	}
}

/// A socket address of either IP family.
///
/// `Unspecified` is what a socket reports before it has been bound or
/// connected. It never compares equal to a concrete address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SocketAddress {
	#[default]
	Unspecified,
	V4(SocketAddrV4),
	V6(SocketAddrV6),
}

impl SocketAddress {
	pub fn family(&self) -> Family {
		match self {
			SocketAddress::Unspecified => Family::Unspecified,
			SocketAddress::V4(_) => Family::Ipv4,
			SocketAddress::V6(_) => Family::Ipv6,
		}
	}

	pub fn is_unspecified(&self) -> bool {
		matches!(self, SocketAddress::Unspecified)
	}

	/// Returns the port, or 0 for an unspecified address.
	pub fn port(&self) -> u16 {
		match self {
			SocketAddress::Unspecified => 0,
			SocketAddress::V4(a) => a.port(),
			SocketAddress::V6(a) => a.port(),
		}
	}

	/// Sets the port. Has no effect on an unspecified address.
	pub fn set_port(&mut self, port: u16) {
		match self {
			SocketAddress::Unspecified => {}
			SocketAddress::V4(a) => a.set_port(port),
			SocketAddress::V6(a) => a.set_port(port),
		}
	}

	/// Replaces the IP, switching family if needed. The port is kept.
	pub fn set_ip(&mut self, ip: IpAddr) {
		let port = self.port();
		*self = SocketAddress::from((ip, port));
	}

	pub fn ip(&self) -> Option<IpAddr> {
		match self {
			SocketAddress::Unspecified => None,
			SocketAddress::V4(a) => Some(IpAddr::V4(Ipv4Addr::from(a.ip()))),
			SocketAddress::V6(a) => Some(IpAddr::V6(Ipv6Addr::from(a.ip()))),
		}
	}

	/// The address without its port, e.g. `234.56.78.90` or `::1`.
	pub fn ip_string(&self) -> String {
		match self.ip() {
			Some(ip) => ip.to_string(),
			None => String::new(),
		}
	}

	/// True for `0.0.0.0` and `::`.
	pub fn is_wildcard(&self) -> bool {
		self.ip().is_some_and(|ip| ip.is_unspecified())
	}

	pub fn as_v4(&self) -> Option<&SocketAddrV4> {
		match self {
			SocketAddress::V4(a) => Some(a),
			_ => None,
		}
	}

	pub fn to_std(&self) -> Option<SocketAddr> {
		let ip = self.ip()?;
		Some(SocketAddr::new(ip, self.port()))
	}
}

impl std::fmt::Display for SocketAddress {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			SocketAddress::Unspecified => f.write_str("<unspecified>"),
			SocketAddress::V4(a) => std::fmt::Display::fmt(a, f),
			SocketAddress::V6(a) => std::fmt::Display::fmt(a, f),
		}
	}
}

impl From<SocketAddrV4> for SocketAddress {
	fn from(addr: SocketAddrV4) -> Self {
		SocketAddress::V4(addr)
	}
}

impl From<SocketAddrV6> for SocketAddress {
	fn from(addr: SocketAddrV6) -> Self {
		SocketAddress::V6(addr)
	}
}

impl From<(IpAddr, u16)> for SocketAddress {
	fn from((ip, port): (IpAddr, u16)) -> Self {
		match ip {
			IpAddr::V4(ip) => SocketAddress::V4(SocketAddrV4::new(ip.octets(), port)),
			IpAddr::V6(ip) => SocketAddress::V6(SocketAddrV6::new(ip.octets(), port)),
		}
	}
}

impl From<SocketAddr> for SocketAddress {
	fn from(addr: SocketAddr) -> Self {
		match addr {
			SocketAddr::V4(a) => SocketAddress::V4(SocketAddrV4::new(a.ip().octets(), a.port())),
			SocketAddr::V6(a) => {
				SocketAddress::V6(SocketAddrV6::with_scope(a.ip().octets(), a.port(), a.scope_id()))
			}
		}
	}
}

impl FromStr for SocketAddress {
	type Err = SocketError;

	/// Parses the textual address forms.
	///
	/// `*`, `*:*`, `*:PORT`, `[::]`, `[::]:PORT`, `a.b.c.d[:PORT]`,
	/// `a.b.c.d.PORT`, or anything the std numeric parsers accept.
	fn from_str(text: &str) -> Result<Self, Self::Err> {
		let text = text.trim();

		if text == "*" || text == "*:*" {
			return Ok(SocketAddress::V4(SocketAddrV4::any(0)));
		}
		if let Some(port) = text.strip_prefix("*:") {
			return Ok(SocketAddress::V4(SocketAddrV4::any(parse_port(port)?)));
		}
		if text == "[::]" {
			return Ok(SocketAddress::V6(SocketAddrV6::any(0)));
		}
		if let Some(port) = text.strip_prefix("[::]:") {
			return Ok(SocketAddress::V6(SocketAddrV6::any(parse_port(port)?)));
		}
		if let Some(addr) = SocketAddrV4::parse_dotted(text) {
			return Ok(SocketAddress::V4(addr));
		}
		if let Ok(addr) = text.parse::<SocketAddr>() {
			return Ok(addr.into());
		}
		if let Ok(ip) = text.parse::<IpAddr>() {
			return Ok((ip, 0).into());
		}
		if let Some(inner) = text.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
			if let Ok(ip) = inner.parse::<Ipv6Addr>() {
				return Ok((IpAddr::V6(ip), 0).into());
			}
		}
		Err(SocketError::InvalidAddress { reason: "unrecognised address text" })
	}
}

fn parse_port(text: &str) -> Result<u16, SocketError> {
	text.parse().map_err(|_| SocketError::InvalidAddress { reason: "invalid port" })
}

impl ToSockAddr for SocketAddress {
	fn with_raw<F, R>(&self, f: F) -> Option<R>
	where
		F: FnOnce(*const libc::sockaddr, libc::socklen_t) -> R,
	{
		match self {
			SocketAddress::Unspecified => None,
			SocketAddress::V4(a) => a.with_raw(f),
			SocketAddress::V6(a) => a.with_raw(f),
		}
	}
}

impl FromSockAddr for SocketAddress {
	unsafe fn from_sockaddr(addr: *const libc::sockaddr, len: libc::socklen_t) -> Option<Self> {
		if len < std::mem::size_of::<libc::sa_family_t>() as libc::socklen_t {
			return None;
		}
		let family = unsafe { (*addr).sa_family } as libc::c_int;
		match family {
			libc::AF_INET => unsafe { SocketAddrV4::from_sockaddr(addr, len) }.map(SocketAddress::V4),
			libc::AF_INET6 => unsafe { SocketAddrV6::from_sockaddr(addr, len) }.map(SocketAddress::V6),
			_ => Some(SocketAddress::Unspecified),
		}
	}
}
