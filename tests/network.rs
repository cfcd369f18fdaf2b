use std::time::Duration;
use wireline::{AddressFilter, DATAGRAM_SCRATCH_SIZE, Network, SocketError, SocketOptions, StreamLimits};

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

#[test]
fn bad_connect_strings() {
	let net = Network::new();
	assert!(matches!(
		net.tcp_connect("no such host:port", WAIT),
		Err(SocketError::BadConnectString { .. })
	));
	assert!(matches!(net.last_error(), Some(SocketError::BadConnectString { .. })));

	assert!(matches!(
		net.tcp_connect("tcp://127.0.0.1", WAIT),
		Err(SocketError::PortUnspecified { .. })
	));
	assert!(matches!(net.last_error(), Some(SocketError::PortUnspecified { .. })));
}

#[test]
fn tcp_connect_over_loopback() {
	let net = Network::new().with_options(SocketOptions::new().keepalive(true));
	let mut listener = net.tcp_listen("*:0").unwrap();
	assert!(!listener.socket().is_listening());
	listener.listen(5).unwrap();
	let port = listener.local_address().port();

	let mut client = net.tcp_connect(&format!("tcp://127.0.0.1:{port}/"), WAIT).unwrap();
	let mut server = listener.accept(WAIT).unwrap();

	client.send_line(b"HELLO", WAIT).unwrap();
	client.flush_output(WAIT).unwrap();
	assert_eq!(server.read_line(WAIT).unwrap(), b"HELLO\r\n");
}

#[test]
fn listener_inherits_limits() {
	let options = SocketOptions::new().max_line_length(8);
	let net = Network::new().with_options(options);
	let mut listener = net.tcp_listen("127.0.0.1:0").unwrap();
	listener.listen(5).unwrap();
	let port = listener.local_address().port();

	let _client = net.tcp_connect(&format!("127.0.0.1:{port}"), WAIT).unwrap();
	let server = listener.accept(WAIT).unwrap();
	assert_eq!(*server.limits(), StreamLimits { max_line_length: 8, ..StreamLimits::default() });
}

#[test]
fn accept_filter_reaches_listener() {
	let net = Network::new().with_accept_filter(AddressFilter::new().block("127.0.0.1".parse().unwrap()));
	let mut listener = net.tcp_listen("127.0.0.1:0").unwrap();
	listener.listen(5).unwrap();
	let port = listener.local_address().port();

	let _client = Network::new().tcp_connect(&format!("127.0.0.1:{port}"), WAIT).unwrap();
	assert!(matches!(listener.accept(WAIT), Err(SocketError::AddressBlocked { .. })));
}

#[test]
fn blocked_candidate_is_skipped() {
	let net = Network::new().with_connect_filter(AddressFilter::new().block("127.0.0.0/8".parse().unwrap()));
	let err = net.tcp_connect("127.0.0.1:9", WAIT).unwrap_err();
	assert!(matches!(err, SocketError::AddressBlocked { .. }));
	assert_eq!(net.last_error(), Some(err));
}

#[test]
fn udp_round_trip() {
	let net = Network::new();
	let mut server = net.udp_listen("127.0.0.1:0").unwrap();
	let port = server.local_address().port();

	let client = net.udp_connect(&format!("127.0.0.1:{port}"), WAIT).unwrap();
	assert!(client.socket().is_connected());
	client.send_data(b"datagram payload", WAIT).unwrap();

	let data = server.read_data(WAIT).unwrap();
	assert_eq!(data, b"datagram payload");
	assert_eq!(server.last_sender(), client.local_address());

	server.send_data_to(b"reply", &server.last_sender(), WAIT).unwrap();
	assert_eq!(client.counters().packets_sent, 1);
}

#[test]
fn udp_send_requires_peer() {
	let net = Network::new();
	let server = net.udp_listen("127.0.0.1:0").unwrap();
	assert_eq!(server.send_data(b"x", WAIT).unwrap_err(), SocketError::NotConnected);
}

#[test]
fn udp_filter_applies_to_listener_address() {
	let net = Network::new().with_udp_filter(AddressFilter::new().block("127.0.0.0/8".parse().unwrap()));
	assert!(matches!(net.udp_listen("127.0.0.1:0"), Err(SocketError::AddressBlocked { .. })));
	assert!(net.udp_listen("*:0").is_ok());
}

#[test]
fn udp_read_times_out() {
	let net = Network::new();
	let mut server = net.udp_listen("127.0.0.1:0").unwrap();
	assert_eq!(server.read_data(Some(Duration::from_millis(100))).unwrap_err(), SocketError::TimedOut);
}

#[test]
fn long_datagram_is_truncated() {
	let net = Network::new();
	let mut server = net.udp_listen("127.0.0.1:0").unwrap();
	let port = server.local_address().port();
	let client = net.udp_connect(&format!("127.0.0.1:{port}"), WAIT).unwrap();

	let payload: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
	client.send_data(&payload, WAIT).unwrap();
	let data = server.read_data(WAIT).unwrap();
	assert_eq!(data.len(), DATAGRAM_SCRATCH_SIZE);
	assert_eq!(data, payload[..DATAGRAM_SCRATCH_SIZE]);

	client.send_data(b"short", WAIT).unwrap();
	assert_eq!(server.read_data(WAIT).unwrap(), b"short");
}
