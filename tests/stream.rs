use std::io::{Read, Write};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};
use wireline::{select, AddressFilter, Family, Shutdown, SockKind, Socket, SocketAddress, SocketError,
			   SocketOptions, StreamLimits, TcpListener, TcpSocket, SEND_COALESCE_LIMIT};

const WAIT: Option<Duration> = Some(Duration::from_secs(5));

fn listening() -> (TcpListener, SocketAddress) {
	let mut listener = TcpListener::bind(&"*:0".parse().unwrap(), &SocketOptions::new()).unwrap();
	listener.listen(5).unwrap();
	let mut target: SocketAddress = "127.0.0.1:0".parse().unwrap();
	target.set_port(listener.local_address().port());
	(listener, target)
}

fn pair() -> (TcpSocket, TcpSocket) {
	let (listener, target) = listening();
	let client = TcpSocket::connect(&target, &SocketOptions::new(), WAIT).unwrap();
	let server = listener.accept(WAIT).unwrap();
	(client, server)
}

#[test]
fn hello_world_line() {
	let (mut client, mut server) = pair();
	assert!(client.socket().is_connected());
	assert!(server.socket().is_connected());
	assert!(server.socket().is_readable() && server.socket().is_writable());
	assert_eq!(server.peer_address().port(), client.local_address().port());

	server.send_line(b"Hello, world.", WAIT).unwrap();
	server.flush_output(WAIT).unwrap();
	assert_eq!(client.read_line(WAIT).unwrap(), b"Hello, world.\r\n");

	server.close().unwrap();
	assert!(server.socket().is_closed());
	assert_eq!(client.read_line(WAIT).unwrap_err(), SocketError::ClosedByPeer);
	assert_eq!(client.last_error(), Some(SocketError::ClosedByPeer));
}

#[test]
fn multi_line_unstuffing() {
	let (mut client, mut server) = pair();
	server.send_data(b"A\r\n.A\r\n.\r\nnext\r\n", WAIT).unwrap();
	server.flush_output(WAIT).unwrap();

	assert_eq!(client.read_multi_line(WAIT).unwrap(), b"A\r\nA\r\n");
	assert_eq!(client.read_line(WAIT).unwrap(), b"next\r\n");
}

#[test]
fn multi_line_round_trip() {
	let (mut client, mut server) = pair();
	client.send_multi_line(b"A\n.A\n..\nB", WAIT).unwrap();
	assert_eq!(client.pending_output(), 0);
	assert_eq!(server.read_multi_line(WAIT).unwrap(), b"A\r\n.A\r\n..\r\nB\r\n");
}

#[test]
fn read_data_splits_buffer() {
	let (mut client, mut server) = pair();
	server.send_data(b"abcdef", WAIT).unwrap();
	server.flush_output(WAIT).unwrap();

	assert_eq!(client.read_data(4, WAIT).unwrap(), b"abcd");
	assert_eq!(client.buffered_input(), 2);
	assert_eq!(client.read_data(0, WAIT).unwrap(), b"ef");
}

#[test]
fn select_times_out() {
	let (client, _server) = pair();
	let mut read = vec![client.socket()];
	let mut write = Vec::new();

	let start = Instant::now();
	assert!(!select(&mut read, &mut write, Some(Duration::from_millis(500))));
	let elapsed = start.elapsed();

	assert!(elapsed >= Duration::from_millis(450), "returned after {elapsed:?}");
	assert!(elapsed < Duration::from_millis(2500), "returned after {elapsed:?}");
	assert!(read.is_empty());
	assert!(client.socket().timed_out());
	assert_eq!(client.last_error(), Some(SocketError::TimedOut));

	client.socket().reset_status();
	assert!(!client.socket().timed_out());
	assert_eq!(client.last_error(), None);
}

#[test]
fn select_reports_ready_sockets() {
	let (client, mut server) = pair();
	server.send_data(b"ping\n", WAIT).unwrap();
	server.flush_output(WAIT).unwrap();

	let mut read = vec![client.socket(), server.socket()];
	let mut write = Vec::new();
	assert!(select(&mut read, &mut write, WAIT));
	assert_eq!(read.len(), 1);
	assert_eq!(read[0].local_address(), client.local_address());
}

#[test]
fn read_line_times_out() {
	let (mut client, _server) = pair();
	let err = client.read_line(Some(Duration::from_millis(200))).unwrap_err();
	assert!(err.is_timeout());
	assert!(client.socket().timed_out());
}

#[test]
fn cancel_from_another_thread() {
	let (mut client, _server) = pair();
	let handle = client.cancel_handle();
	let canceler = thread::spawn(move || {
		thread::sleep(Duration::from_millis(300));
		handle.cancel();
	});

	let start = Instant::now();
	assert_eq!(client.read_line(None).unwrap_err(), SocketError::Canceled);
	assert!(start.elapsed() < Duration::from_secs(3));
	assert!(client.socket().canceled());
	canceler.join().unwrap();
}

#[test]
fn blocked_peer_is_dropped() {
	let (mut listener, target) = listening();
	listener.set_filter(AddressFilter::new().block("127.0.0.0/8".parse().unwrap()));

	let mut client = TcpSocket::connect(&target, &SocketOptions::new(), WAIT).unwrap();
	let err = listener.accept(WAIT).unwrap_err();
	assert!(matches!(err, SocketError::AddressBlocked { .. }));
	assert_eq!(listener.last_error(), Some(err));
	assert_eq!(client.read_data(0, WAIT).unwrap_err(), SocketError::ClosedByPeer);
}

#[test]
fn accept_times_out() {
	let (listener, _) = listening();
	let err = listener.accept(Some(Duration::from_millis(100))).unwrap_err();
	assert_eq!(err, SocketError::TimedOut);
}

#[test]
fn small_sends_are_coalesced() {
	let (mut client, mut server) = pair();
	for _ in 0..10 {
		client.send_data(b"0123456789", WAIT).unwrap();
	}
	assert_eq!(client.counters().packets_sent, 0);
	assert_eq!(client.pending_output(), 100);

	client.flush_output(WAIT).unwrap();
	let sent = client.counters().packets_sent;
	assert!(sent >= 1 && sent < 10, "{sent} sends for 10 writes");
	assert_eq!(client.counters().bytes_sent, 100);
	assert_eq!(server.read_data(100, WAIT).unwrap().len(), 100);
}

#[test]
fn large_send_flushes() {
	let (mut client, mut server) = pair();
	let payload = vec![b'x'; SEND_COALESCE_LIMIT + 500];
	client.send_data(&payload, WAIT).unwrap();
	assert!(client.counters().packets_sent >= 1);

	client.flush_output(WAIT).unwrap();
	assert_eq!(server.read_data(payload.len(), WAIT).unwrap(), payload);
}

#[test]
fn line_too_long() {
	let (mut client, mut server) = pair();
	client.set_limits(StreamLimits { max_line_length: 16, ..StreamLimits::default() });
	server.send_data(&[b'a'; 64], WAIT).unwrap();
	server.flush_output(WAIT).unwrap();

	assert_eq!(client.read_line(WAIT).unwrap_err(), SocketError::LineTooLong { limit: 16 });
}

#[test]
fn message_too_big() {
	let (mut client, mut server) = pair();
	client.set_limits(StreamLimits { max_message_size: 4, ..StreamLimits::default() });
	server.send_data(b"hello\r\n.\r\n", WAIT).unwrap();
	server.flush_output(WAIT).unwrap();

	assert_eq!(client.read_multi_line(WAIT).unwrap_err(), SocketError::MessageTooBig { limit: 4 });
}

#[test]
fn close_flushes_queued_output() {
	let (mut client, mut server) = pair();
	client.send_line(b"QUIT", WAIT).unwrap();
	assert_eq!(client.pending_output(), 6);
	client.close().unwrap();
	client.close().unwrap();

	assert_eq!(server.read_line(WAIT).unwrap(), b"QUIT\r\n");
	assert!(server.read_line(WAIT).is_err());
}

#[test]
fn shutdown_write_blocks_sending() {
	let (mut client, mut server) = pair();
	client.shutdown(Shutdown::Write).unwrap();
	assert!(!client.socket().is_writable());
	assert_eq!(client.send_data(b"x", WAIT).unwrap_err(), SocketError::NotWritable);
	assert_eq!(client.shutdown(Shutdown::Write).unwrap_err(), SocketError::NotWritable);
	assert_eq!(server.read_data(0, WAIT).unwrap_err(), SocketError::ClosedByPeer);
}

#[test]
fn io_traits() {
	let (mut client, mut server) = pair();
	client.write_all(b"stream").unwrap();
	client.flush().unwrap();

	let mut buf = [0u8; 6];
	server.read_exact(&mut buf).unwrap();
	assert_eq!(&buf, b"stream");
}

#[test]
fn state_preconditions() {
	let mut socket = Socket::new(Family::Ipv4, SockKind::Stream).unwrap();
	assert!(socket.is_open());
	assert_eq!(socket.listen(5).unwrap_err(), SocketError::NotBound);

	socket.bind(&"127.0.0.1:0".parse().unwrap()).unwrap();
	assert!(socket.is_bound());
	assert_ne!(socket.local_address().port(), 0);
	assert_eq!(socket.bind(&"127.0.0.1:0".parse().unwrap()).unwrap_err(), SocketError::AlreadyBound);
	assert_eq!(socket.last_error(), Some(SocketError::AlreadyBound));
	assert_eq!(socket.send(b"x").unwrap_err(), SocketError::NotWritable);
	assert_eq!(socket.shutdown(Shutdown::Read).unwrap_err(), SocketError::NotConnected);

	socket.close().unwrap();
	assert!(socket.is_closed());
	assert!(!socket.is_open());
	socket.close().unwrap();
}

#[test]
fn connect_refused() {
	// Bound but not listening, so the port stays taken and refuses.
	let mut idle = Socket::new(Family::Ipv4, SockKind::Stream).unwrap();
	idle.bind(&"127.0.0.1:0".parse().unwrap()).unwrap();

	let err = TcpSocket::connect(&idle.local_address(), &SocketOptions::new(), WAIT).unwrap_err();
	assert_eq!(std::io::Error::from(err).kind(), std::io::ErrorKind::ConnectionRefused);
}

#[test]
fn read_accepts_unrepresentable_timeout() {
	let (mut client, mut server) = pair();
	server.send_line(b"no deadline", WAIT).unwrap();
	server.flush_output(WAIT).unwrap();
	assert_eq!(client.read_line(Some(Duration::MAX)).unwrap(), b"no deadline\r\n");

	server.send_data(b"tail", Some(Duration::MAX)).unwrap();
	server.flush_output(Some(Duration::MAX)).unwrap();
	assert_eq!(client.read_data(4, Some(Duration::MAX)).unwrap(), b"tail");
}

#[test]
fn concurrent_large_sends_do_not_deadlock() {
	// Far more than loopback socket buffers hold, in both directions,
	// with neither side reading until everything is queued.
	const TOTAL: usize = 32 << 20;
	const PIECE: usize = 64 << 10;
	let long = Some(Duration::from_secs(60));
	let unlimited = StreamLimits { max_read_ahead: 0, ..StreamLimits::default() };

	let (mut client, mut server) = pair();
	client.set_limits(unlimited);
	server.set_limits(unlimited);

	let peer = thread::spawn(move || {
		let piece = vec![b's'; PIECE];
		for _ in 0..TOTAL / PIECE {
			server.send_data(&piece, long).unwrap();
		}
		server.flush_output(long).unwrap();
		let got = server.read_data(TOTAL, long).unwrap();
		assert!(got.iter().all(|&b| b == b'c'));
	});

	let piece = vec![b'c'; PIECE];
	for _ in 0..TOTAL / PIECE {
		client.send_data(&piece, long).unwrap();
	}
	client.flush_output(long).unwrap();
	let got = client.read_data(TOTAL, long).unwrap();
	assert!(got.iter().all(|&b| b == b's'));
	peer.join().unwrap();
}

#[test]
fn flush_reads_up_to_read_ahead_limit() {
	const LIMIT: usize = 16 << 10;
	const INCOMING: usize = 64 << 10;
	const OUTGOING: usize = 1 << 20;
	let long = Some(Duration::from_secs(30));

	let (mut client, mut server) = pair();
	client.set_limits(StreamLimits { max_read_ahead: LIMIT, ..StreamLimits::default() });
	server.set_limits(StreamLimits { max_read_ahead: 0, ..StreamLimits::default() });

	let (sent_tx, sent_rx) = mpsc::channel();
	let peer = thread::spawn(move || {
		server.send_data(&vec![b'r'; INCOMING], long).unwrap();
		server.flush_output(long).unwrap();
		sent_tx.send(()).unwrap();
		assert_eq!(server.read_data(OUTGOING, long).unwrap().len(), OUTGOING);
	});

	// The reply is already waiting in the kernel when the flush starts.
	sent_rx.recv().unwrap();
	client.send_data(&vec![b'q'; OUTGOING], long).unwrap();
	client.flush_output(long).unwrap();
	assert_eq!(client.pending_output(), 0);
	assert!(client.buffered_input() > 0);
	assert!(client.buffered_input() <= LIMIT, "buffered {}", client.buffered_input());

	peer.join().unwrap();
	assert_eq!(client.read_data(INCOMING, long).unwrap(), vec![b'r'; INCOMING]);
}

#[test]
fn pending_connect_times_out() {
	// A zero backlog lets one handshake finish; later SYNs are dropped
	// while it sits unaccepted, so their connects stay in progress.
	let mut listener = TcpListener::bind(&"127.0.0.1:0".parse().unwrap(), &SocketOptions::new()).unwrap();
	listener.listen(0).unwrap();
	let target = listener.local_address();

	let mut held = Vec::new();
	let mut stalled = None;
	for _ in 0..8 {
		let mut socket = Socket::new(Family::Ipv4, SockKind::Stream).unwrap();
		socket.set_nonblocking(true).unwrap();
		if socket.connect(&target).unwrap() {
			held.push(socket);
			continue;
		}
		assert!(socket.is_connecting());
		assert_eq!(socket.connect(&target).unwrap_err(), SocketError::AlreadyConnecting);
		match socket.wait_connected(Some(Duration::from_millis(300))) {
			Ok(()) => held.push(socket),
			Err(err) => {
				assert_eq!(err, SocketError::TimedOut);
				stalled = Some(socket);
				break;
			}
		}
	}

	let socket = stalled.expect("every connect completed");
	assert!(socket.timed_out());
	assert!(socket.is_connecting());
	assert!(!socket.is_connected());
	assert_eq!(socket.last_error(), Some(SocketError::TimedOut));
}

#[test]
fn select_drops_closed_sockets() {
	let mut closed = Socket::new(Family::Ipv4, SockKind::Stream).unwrap();
	closed.close().unwrap();

	let mut read = vec![&closed];
	let mut write = Vec::new();
	let start = Instant::now();
	assert!(!select(&mut read, &mut write, WAIT));
	assert!(start.elapsed() < Duration::from_secs(1));
	assert!(read.is_empty());
	assert!(!closed.timed_out());

	let (client, mut server) = pair();
	server.send_data(b"ready\n", WAIT).unwrap();
	server.flush_output(WAIT).unwrap();

	let mut read = vec![&closed, client.socket()];
	let mut write = vec![&closed];
	assert!(select(&mut read, &mut write, WAIT));
	assert_eq!(read.len(), 1);
	assert_eq!(read[0].local_address(), client.local_address());
	assert!(write.is_empty());
}
