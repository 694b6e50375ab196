//! Header accumulation before a connection is handed to the consumer.

/// Outcome of feeding one chunk to a [`HeaderAccumulator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
	/// Fewer than `threshold` bytes seen so far.
	Accumulating,
	/// Threshold reached: `header` is exactly `threshold` bytes, `overflow` is
	/// whatever arrived past the boundary and must be replayed.
	Complete { header: Vec<u8>, overflow: Vec<u8> },
}

/// Buffers incoming bytes until at least `threshold` bytes arrived.
///
/// Never times out; a connection that stays silent stays accumulating.
#[derive(Debug)]
pub struct HeaderAccumulator {
	threshold: usize,
	buf: Vec<u8>,
}

impl HeaderAccumulator {
	pub fn new(threshold: usize) -> Self {
		Self {
			threshold,
			buf: Vec::with_capacity(threshold),
		}
	}

	/// Bytes buffered so far.
	pub fn buffered(&self) -> usize {
		self.buf.len()
	}

	pub fn threshold(&self) -> usize {
		self.threshold
	}

	/// Appends `chunk` and reports whether the header is complete.
	///
	/// After [`Progress::Complete`] the accumulator is empty again.
	pub fn push(&mut self, chunk: &[u8]) -> Progress {
		self.buf.extend_from_slice(chunk);
		if self.buf.len() < self.threshold {
			return Progress::Accumulating;
		}

		let overflow = self.buf.split_off(self.threshold);
		let header = std::mem::take(&mut self.buf);
		Progress::Complete { header, overflow }
	}
}
