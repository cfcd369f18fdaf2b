use std::net::{IpAddr, Ipv4Addr};
use wireline::{AddressFilter, AddressRange, Family, SocketAddress, SocketAddrV4, SocketError};

fn addr(text: &str) -> SocketAddress {
	text.parse().unwrap()
}

fn range(text: &str) -> AddressRange {
	text.parse().unwrap()
}

#[test]
fn dotted_quad_with_port() {
	let a = addr("234.56.78.90:1024");
	assert_eq!(a.family(), Family::Ipv4);
	assert_eq!(a.ip_string(), "234.56.78.90");
	assert_eq!(a.port(), 1024);
	assert_eq!(a.to_string(), "234.56.78.90:1024");
}

#[test]
fn dotted_quad_with_dot_port() {
	assert_eq!(addr("10.0.0.1.25"), addr("10.0.0.1:25"));
}

#[test]
fn wildcard_forms() {
	let a = addr("*:10025");
	assert_eq!(a.ip_string(), "0.0.0.0");
	assert_eq!(a.port(), 10025);
	assert!(a.is_wildcard());

	assert_eq!(addr("*"), addr("*:*"));
	assert_eq!(addr("*").port(), 0);

	let v6 = addr("[::]:10025");
	assert_eq!(v6.family(), Family::Ipv6);
	assert!(v6.is_wildcard());
	assert_eq!(v6.port(), 10025);
}

#[test]
fn ipv6_literals() {
	let a = addr("[::1]:8080");
	assert_eq!(a.ip(), Some("::1".parse::<IpAddr>().unwrap()));
	assert_eq!(a.to_string(), "[::1]:8080");
	assert_eq!(addr("fe80::1").port(), 0);
}

#[test]
fn set_ip_and_port() {
	let mut a = addr("1.2.3.4:5");
	a.set_port(6);
	a.set_ip(IpAddr::V4(Ipv4Addr::new(9, 8, 7, 6)));
	assert_eq!(a, SocketAddress::V4(SocketAddrV4::new([9, 8, 7, 6], 6)));
}

#[test]
fn unspecified_is_distinct() {
	let none = SocketAddress::default();
	assert!(none.is_unspecified());
	assert_ne!(none, addr("0.0.0.0:0"));
	assert_eq!(none.ip(), None);
}

#[test]
fn garbage_is_rejected() {
	for text in ["", "hello", "1.2.3.4:99999", "*:port", "1.2.3"] {
		assert!(
			matches!(text.parse::<SocketAddress>(), Err(SocketError::InvalidAddress { .. })),
			"{text:?} should not parse"
		);
	}
}

#[test]
fn range_membership() {
	let r = range("123.45.64.0/18");
	assert!(r.contains(&addr("123.45.67.89")));
	assert!(r.contains(&addr("123.45.127.255:80")));
	assert!(!r.contains(&addr("123.45.128.0")));
	assert!(!r.contains(&addr("234.56.78.90")));
	assert!(!r.contains(&addr("::1")));
	assert_eq!(r.to_string(), "123.45.64.0/18");
}

#[test]
fn host_range_and_bad_prefix() {
	let host = range("10.0.0.7");
	assert_eq!(host.prefix(), 32);
	assert!(host.contains(&addr("10.0.0.7:1")));
	assert!(!host.contains(&addr("10.0.0.8")));
	assert!("10.0.0.0/33".parse::<AddressRange>().is_err());
}

#[test]
fn block_list_only() {
	let filter = AddressFilter::new().block(range("192.168.0.0/16"));
	assert!(filter.is_blocked(&addr("192.168.1.1")));
	assert!(!filter.is_blocked(&addr("10.1.1.1")));
	assert!(matches!(
		filter.check(&addr("192.168.1.1:25")),
		Err(SocketError::AddressBlocked { .. })
	));
}

#[test]
fn allow_list_with_exception() {
	let filter = AddressFilter::new()
		.allow(range("10.0.0.0/8"))
		.block(range("10.9.0.0/16"));
	assert!(!filter.is_blocked(&addr("10.1.2.3")));
	assert!(filter.is_blocked(&addr("10.9.2.3")));
	assert!(filter.is_blocked(&addr("11.0.0.1")));
	assert!(AddressFilter::new().check(&addr("11.0.0.1")).is_ok());
}
