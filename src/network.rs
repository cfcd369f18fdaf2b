use std::net::{IpAddr, ToSocketAddrs};
use std::str::FromStr;
use std::sync::{Mutex, Once, OnceLock, PoisonError};
use std::time::Duration;
use log::{debug, trace, warn};
use regex::Regex;
use crate::addr::{AddressFilter, SocketAddrV4, SocketAddress};
use crate::error::{Result, SocketError};
use crate::socket::{Deadline, SocketOptions, TcpListener, TcpSocket, UdpSocket};

/// Process-wide socket initialisation. Safe to call any number of times.
///
/// Ignores `SIGPIPE` so a write to a reset connection fails with `EPIPE`
/// instead of killing the process. `Network::new()` calls this.
pub fn startup() {
	static INIT: Once = Once::new();
	INIT.call_once(|| {
		unsafe {
			libc::signal(libc::SIGPIPE, libc::SIG_IGN);
		}
		trace!("socket layer initialised");
	});
}

fn connect_string_pattern() -> Option<&'static Regex> {
	static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
	PATTERN
		.get_or_init(|| {
			Regex::new(
				r"^(?:(?:(?P<proto>[A-Za-z][A-Za-z0-9+.\-]*):)?//)?(?P<host>\[[^\]]*\]|[^:/\[\]\s]+)(?::(?P<port>\d+|\*))?/?$",
			)
			.ok()
		})
		.as_ref()
}

/// A parsed `[[proto:]//]host[:port][/]` destination.
///
/// `host` may be bracketed (`[::1]`); the brackets are removed. A port of
/// `*` means "any" and parses as 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectString {
	pub proto: Option<String>,
	pub host: String,
	pub port: Option<u16>,
}

impl ConnectString {
	pub fn parse(input: &str) -> Result<Self> {
		let bad = || SocketError::BadConnectString { input: input.to_string() };
		let caps = connect_string_pattern()
			.and_then(|pattern| pattern.captures(input.trim()))
			.ok_or_else(bad)?;

		let host = &caps["host"];
		let host = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
		if host.is_empty() {
			return Err(bad());
		}
		let port = match caps.name("port").map(|m| m.as_str()) {
			None => None,
			Some("*") => Some(0),
			Some(digits) => Some(digits.parse().map_err(|_| bad())?),
		};

		Ok(Self {
			proto: caps.name("proto").map(|m| m.as_str().to_ascii_lowercase()),
			host: host.to_string(),
			port,
		})
	}

	/// True when the host is `*` or an IP literal, so no lookup is needed.
	pub fn is_numeric(&self) -> bool {
		self.host == "*" || self.host.parse::<IpAddr>().is_ok()
	}

	/// The port, or `PortUnspecified` if the string had none.
	pub fn require_port(&self, input: &str) -> Result<u16> {
		self.port.ok_or_else(|| SocketError::PortUnspecified { input: input.to_string() })
	}
}

impl FromStr for ConnectString {
	type Err = SocketError;

	fn from_str(s: &str) -> Result<Self> {
		Self::parse(s)
	}
}

impl std::fmt::Display for ConnectString {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		if let Some(proto) = &self.proto {
			write!(f, "{proto}://")?;
		}
		if self.host.contains(':') {
			write!(f, "[{}]", self.host)?;
		} else {
			f.write_str(&self.host)?;
		}
		if let Some(port) = self.port {
			write!(f, ":{port}")?;
		}
		Ok(())
	}
}

/// Resolves `host` to candidate addresses, in lookup order.
///
/// `*` is the IPv4 wildcard. IP literals skip the resolver.
pub fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddress>> {
	if host == "*" {
		return Ok(vec![SocketAddress::V4(SocketAddrV4::any(port))]);
	}
	if let Ok(ip) = host.parse::<IpAddr>() {
		return Ok(vec![SocketAddress::from((ip, port))]);
	}

	let found = (host, port).to_socket_addrs().map_err(|e| SocketError::Lookup {
		host: host.to_string(),
		reason: e.to_string(),
	})?;
	let mut candidates: Vec<SocketAddress> = Vec::new();
	for addr in found.map(SocketAddress::from) {
		if !candidates.contains(&addr) {
			candidates.push(addr);
		}
	}
	if candidates.is_empty() {
		return Err(SocketError::NoAddresses { host: host.to_string() });
	}
	trace!("{} resolved to {} address(es)", host, candidates.len());
	Ok(candidates)
}

/// Factory for connected and listening sockets.
///
/// Holds the option template applied to every socket it creates and three
/// independent address policies:
/// - `connect_filter`: outbound candidates, checked before any I/O
/// - `accept_filter`: handed to each `TcpListener` and checked per accept
/// - `udp_filter`: checked against the local address of a UDP listener
///
/// Failures are returned and also kept as the facade's `last_error()`.
///
/// # Example
/// ```ignore
/// let net = Network::new().with_options(SocketOptions::new().keepalive(true));
/// let mut conn = net.tcp_connect("smtp://mail.example.org:25", Some(Duration::from_secs(10)))?;
/// let banner = conn.read_line(Some(Duration::from_secs(30)))?;
/// ```
#[derive(Debug)]
pub struct Network {
	options: SocketOptions,
	connect_filter: AddressFilter,
	accept_filter: AddressFilter,
	udp_filter: AddressFilter,
	last_error: Mutex<Option<SocketError>>,
}

impl Default for Network {
	fn default() -> Self {
		Self::new()
	}
}

impl Network {
	pub fn new() -> Self {
		startup();
		Self {
			options: SocketOptions::default(),
			connect_filter: AddressFilter::new(),
			accept_filter: AddressFilter::new(),
			udp_filter: AddressFilter::new(),
			last_error: Mutex::new(None),
		}
	}

	pub fn with_options(mut self, options: SocketOptions) -> Self {
		self.options = options;
		self
	}

	pub fn with_connect_filter(mut self, filter: AddressFilter) -> Self {
		self.connect_filter = filter;
		self
	}

	pub fn with_accept_filter(mut self, filter: AddressFilter) -> Self {
		self.accept_filter = filter;
		self
	}

	pub fn with_udp_filter(mut self, filter: AddressFilter) -> Self {
		self.udp_filter = filter;
		self
	}

	pub fn options(&self) -> &SocketOptions {
		&self.options
	}

	pub fn last_error(&self) -> Option<SocketError> {
		self.last_error.lock().unwrap_or_else(PoisonError::into_inner).clone()
	}

	fn fail<T>(&self, err: SocketError) -> Result<T> {
		*self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(err.clone());
		Err(err)
	}

	/// Parses `dest` and resolves it to candidate addresses.
	pub fn lookup(&self, dest: &str) -> Result<Vec<SocketAddress>> {
		let target = ConnectString::parse(dest).or_else(|e| self.fail(e))?;
		let port = target.require_port(dest).or_else(|e| self.fail(e))?;
		resolve(&target.host, port).or_else(|e| self.fail(e))
	}

	/// Connects to the first reachable candidate of `dest`.
	///
	/// Candidates are tried in lookup order within one overall `timeout`.
	/// Blocked candidates are skipped without I/O. If every candidate
	/// fails, the error of the last one is returned.
	pub fn tcp_connect(&self, dest: &str, timeout: Option<Duration>) -> Result<TcpSocket> {
		let deadline = Deadline::after(timeout);
		self.first_candidate(dest, &self.connect_filter, |addr| {
			TcpSocket::connect(addr, &self.options, deadline.remaining())
		})
	}

	/// Creates a UDP socket whose peer is the first usable candidate of `dest`.
	pub fn udp_connect(&self, dest: &str, timeout: Option<Duration>) -> Result<UdpSocket> {
		let deadline = Deadline::after(timeout);
		self.first_candidate(dest, &self.connect_filter, |addr| {
			UdpSocket::connect(addr, &self.options, deadline.remaining())
		})
	}

	/// Binds a TCP listener to `local`. Call `listen` on it before accepting.
	///
	/// The listener carries the accept filter and checks each peer.
	pub fn tcp_listen(&self, local: &str) -> Result<TcpListener> {
		let listener = self.first_candidate(local, &AddressFilter::new(), |addr| {
			TcpListener::bind(addr, &self.options)
		})?;
		Ok(listener.with_filter(self.accept_filter.clone()))
	}

	/// Binds a UDP socket to `local`, refusing addresses the UDP filter blocks.
	pub fn udp_listen(&self, local: &str) -> Result<UdpSocket> {
		self.first_candidate(local, &self.udp_filter, |addr| UdpSocket::bind(addr, &self.options))
	}

	fn first_candidate<T, F>(&self, dest: &str, filter: &AddressFilter, mut attempt: F) -> Result<T>
	where
		F: FnMut(&SocketAddress) -> Result<T>,
	{
		let candidates = self.lookup(dest)?;
		let mut last = SocketError::NoAddresses { host: dest.to_string() };
		for addr in &candidates {
			if let Err(e) = filter.check(addr) {
				warn!("{}: skipping blocked address {}", dest, addr);
				last = e;
				continue;
			}
			match attempt(addr) {
				Ok(socket) => return Ok(socket),
				Err(e) => {
					debug!("{}: {} failed: {}", dest, addr, e);
					last = e;
				}
			}
		}
		self.fail(last)
	}
}
