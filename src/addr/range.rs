use std::str::FromStr;
use super::{SocketAddress, SocketAddrV4};
use crate::error::SocketError;

/// An IPv4 CIDR range such as `123.45.64.0/18`.
///
/// Ranges built from a non-IPv4 address degrade to `0.0.0.0/32`, which
/// only ever matches the wildcard address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressRange {
	base: SocketAddrV4,
	prefix: u8,
	mask: u32,
}

impl AddressRange {
	/// Creates a range from a base address and prefix length.
	///
	/// Prefixes longer than 32 are clamped to 32.
	pub fn new(base: SocketAddress, prefix: u8) -> Self {
		match base {
			SocketAddress::V4(v4) => {
				let prefix = prefix.min(32);
				Self { base: SocketAddrV4::new(v4.ip(), 0), prefix, mask: prefix_mask(prefix) }
			}
			_ => Self { base: SocketAddrV4::any(0), prefix: 32, mask: u32::MAX },
		}
	}

	pub fn base(&self) -> SocketAddress {
		SocketAddress::V4(self.base)
	}

	pub fn prefix(&self) -> u8 {
		self.prefix
	}

	pub fn mask(&self) -> u32 {
		self.mask
	}

	/// True iff `addr` is IPv4 and shares the top `prefix` bits with the base.
	pub fn contains(&self, addr: &SocketAddress) -> bool {
		match addr.as_v4() {
			Some(v4) => v4.ip_bits() & self.mask == self.base.ip_bits() & self.mask,
			None => false,
		}
	}
}

#[inline]
fn prefix_mask(prefix: u8) -> u32 {
	match prefix {
		0 => 0,
		p => u32::MAX << (32 - u32::from(p)),
	}
}

impl FromStr for AddressRange {
	type Err = SocketError;

	/// Parses `a.b.c.d/N`. A bare address is taken as `/32`.
	fn from_str(text: &str) -> Result<Self, Self::Err> {
		let (addr, prefix) = match text.trim().split_once('/') {
			Some((addr, bits)) => {
				let bits: u8 = bits
					.parse()
					.map_err(|_| SocketError::InvalidAddress { reason: "invalid prefix length" })?;
				if bits > 32 {
					return Err(SocketError::InvalidAddress { reason: "prefix length above 32" });
				}
				(addr, bits)
			}
			None => (text.trim(), 32),
		};
		Ok(Self::new(addr.parse()?, prefix))
	}
}

impl std::fmt::Display for AddressRange {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}/{}", std::net::Ipv4Addr::from(self.base.ip()), self.prefix)
	}
}

/// Allow/block policy applied to peer or listener addresses.
///
/// With an empty allow-list an address is blocked only if it matches a
/// block range. With a non-empty allow-list it must match an allow range
/// and no block range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressFilter {
	allow: Vec<AddressRange>,
	block: Vec<AddressRange>,
}

impl AddressFilter {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn allow(mut self, range: AddressRange) -> Self {
		self.allow.push(range);
		self
	}

	pub fn block(mut self, range: AddressRange) -> Self {
		self.block.push(range);
		self
	}

	pub fn allowed_ranges(&self) -> &[AddressRange] {
		&self.allow
	}

	pub fn blocked_ranges(&self) -> &[AddressRange] {
		&self.block
	}

	pub fn is_empty(&self) -> bool {
		self.allow.is_empty() && self.block.is_empty()
	}

	pub fn is_blocked(&self, addr: &SocketAddress) -> bool {
		let denied = self.block.iter().any(|r| r.contains(addr));
		if self.allow.is_empty() {
			denied
		} else {
			denied || !self.allow.iter().any(|r| r.contains(addr))
		}
	}

	/// Returns `AddressBlocked` if the policy rejects `addr`.
	pub fn check(&self, addr: &SocketAddress) -> Result<(), SocketError> {
		if self.is_blocked(addr) {
			Err(SocketError::AddressBlocked { addr: addr.to_string() })
		} else {
			Ok(())
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn addr(text: &str) -> SocketAddress {
		text.parse().unwrap()
	}

	fn range(text: &str) -> AddressRange {
		text.parse().unwrap()
	}

	#[test]
	fn prefix_masks() {
		assert_eq!(prefix_mask(0), 0);
		assert_eq!(prefix_mask(18), 0xFFFF_C000);
		assert_eq!(prefix_mask(32), u32::MAX);
	}

	#[test]
	fn zero_prefix_matches_every_ipv4() {
		let any = range("10.0.0.0/0");
		assert!(any.contains(&addr("1.2.3.4")));
		assert!(!any.contains(&addr("::1")));
	}

	#[test]
	fn ipv6_base_degrades_to_wildcard() {
		let r = AddressRange::new(addr("[::1]:80"), 64);
		assert_eq!(r.prefix(), 32);
		assert!(r.contains(&addr("0.0.0.0")));
		assert!(!r.contains(&addr("1.2.3.4")));
	}

	#[test]
	fn allow_list_requires_a_match() {
		let filter = AddressFilter::new()
			.allow(range("192.168.0.0/16"))
			.block(range("192.168.1.0/24"));
		assert!(!filter.is_blocked(&addr("192.168.2.7:1000")));
		assert!(filter.is_blocked(&addr("192.168.1.7:1000")));
		assert!(filter.is_blocked(&addr("10.0.0.1:1000")));
	}

	#[test]
	fn empty_allow_list_blocks_only_listed() {
		let filter = AddressFilter::new().block(range("127.0.0.1"));
		assert!(filter.is_blocked(&addr("127.0.0.1:4000")));
		assert!(!filter.is_blocked(&addr("127.0.0.2:4000")));
		assert!(filter.check(&addr("127.0.0.1:1")).is_err());
	}

	#[test]
	fn bad_ranges_are_rejected() {
		assert!("1.2.3.4/33".parse::<AddressRange>().is_err());
		assert!("1.2.3.4/x".parse::<AddressRange>().is_err());
		assert!("nonsense/8".parse::<AddressRange>().is_err());
	}
}
