use std::collections::VecDeque;

/// Ordered sequence of byte chunks read as one logical stream.
///
/// Chunk boundaries carry no meaning. Bytes are appended at the back and
/// drained from the front.
#[derive(Debug, Default)]
pub(crate) struct ChunkBuffer {
	chunks: VecDeque<Vec<u8>>,
	len: usize,
}

impl ChunkBuffer {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, chunk: Vec<u8>) {
		if chunk.is_empty() {
			return;
		}
		self.len += chunk.len();
		self.chunks.push_back(chunk);
	}

	/// Appends a copy of `bytes` sized to fit.
	pub fn push_slice(&mut self, bytes: &[u8]) {
		self.push(bytes.to_vec());
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	pub fn clear(&mut self) {
		self.chunks.clear();
		self.len = 0;
	}

	/// Position of the first `byte` at or after logical offset `from`.
	pub fn find(&self, byte: u8, from: usize) -> Option<usize> {
		let mut offset = 0;
		for chunk in &self.chunks {
			let end = offset + chunk.len();
			if end > from {
				let start = from.saturating_sub(offset);
				if let Some(i) = chunk[start..].iter().position(|&b| b == byte) {
					return Some(offset + start + i);
				}
			}
			offset = end;
		}
		None
	}

	/// Removes and returns the first `n` bytes (or everything, if fewer).
	pub fn split_to(&mut self, n: usize) -> Vec<u8> {
		let n = n.min(self.len);
		let mut out = Vec::with_capacity(n);
		while out.len() < n {
			let Some(front) = self.chunks.front_mut() else { break };
			let want = n - out.len();
			if front.len() <= want {
				out.extend_from_slice(front);
				self.chunks.pop_front();
			} else {
				out.extend_from_slice(&front[..want]);
				front.drain(..want);
			}
		}
		self.len -= out.len();
		out
	}

	pub fn take_all(&mut self) -> Vec<u8> {
		self.split_to(self.len)
	}

	pub fn front(&self) -> Option<&[u8]> {
		self.chunks.front().map(Vec::as_slice)
	}

	/// Drops the first `n` bytes.
	pub fn consume(&mut self, mut n: usize) {
		n = n.min(self.len);
		self.len -= n;
		while n > 0 {
			let Some(front) = self.chunks.front_mut() else { break };
			if front.len() <= n {
				n -= front.len();
				self.chunks.pop_front();
			} else {
				front.drain(..n);
				n = 0;
			}
		}
	}

	/// Merges leading chunks so the front holds up to `max` bytes.
	///
	/// Lets one send call cover many small queued writes.
	pub fn coalesce_front(&mut self, max: usize) {
		if self.chunks.len() < 2 {
			return;
		}
		let first = self.chunks.front().map_or(0, Vec::len);
		if first >= max {
			return;
		}
		let take = max.min(self.len);
		let merged = self.split_to(take);
		self.len += merged.len();
		self.chunks.push_front(merged);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn buffer(chunks: &[&[u8]]) -> ChunkBuffer {
		let mut buf = ChunkBuffer::new();
		for chunk in chunks {
			buf.push(chunk.to_vec());
		}
		buf
	}

	#[test]
	fn find_spans_chunks() {
		let buf = buffer(&[b"ab", b"c\nd", b"\n"]);
		assert_eq!(buf.len(), 6);
		assert_eq!(buf.find(b'\n', 0), Some(3));
		assert_eq!(buf.find(b'\n', 4), Some(5));
		assert_eq!(buf.find(b'x', 0), None);
	}

	#[test]
	fn split_keeps_remainder() {
		let mut buf = buffer(&[b"hello", b" world"]);
		assert_eq!(buf.split_to(7), b"hello w");
		assert_eq!(buf.len(), 4);
		assert_eq!(buf.take_all(), b"orld");
		assert!(buf.is_empty());
	}

	#[test]
	fn consume_partial_chunk() {
		let mut buf = buffer(&[b"abc", b"def"]);
		buf.consume(4);
		assert_eq!(buf.front(), Some(&b"ef"[..]));
		assert_eq!(buf.len(), 2);
	}

	#[test]
	fn coalesce_merges_small_chunks() {
		let mut buf = buffer(&[b"aa", b"bb", b"cc"]);
		buf.coalesce_front(5);
		assert_eq!(buf.front(), Some(&b"aabbc"[..]));
		assert_eq!(buf.len(), 6);
		assert_eq!(buf.take_all(), b"aabbcc");
	}

	#[test]
	fn empty_chunks_are_ignored() {
		let mut buf = ChunkBuffer::new();
		buf.push(Vec::new());
		assert!(buf.front().is_none());
	}

	#[test]
	fn pushed_slice_does_not_keep_scratch_capacity() {
		let scratch = vec![7u8; 4096];
		let mut buf = ChunkBuffer::new();
		buf.push_slice(&scratch[..3]);
		buf.push_slice(&scratch[..0]);
		assert_eq!(buf.len(), 3);
		assert_eq!(buf.chunks.len(), 1);
		assert_eq!(buf.chunks[0].capacity(), 3);
	}
}
