//! Byte-oriented seams between the protocols and the physical layer.
//!
//! The link layer never touches hardware. A driver supplies something that
//! swallows outgoing bytes and something that hands over whatever arrived
//! since the last poll; both must return immediately.

/// Non-blocking transmit sink.
pub trait ByteSink {
    /// Enqueue bytes for transmission. The sink owns delivery pacing.
    fn write(&mut self, bytes: &[u8]);

    /// Soft cap on how many bytes one transmit pass should hand the sink.
    ///
    /// The reliable-delivery scheduler splits this budget between control
    /// and data traffic. Sinks with real backpressure should report their
    /// current headroom; the default is effectively "unlimited".
    fn max_bytes(&self) -> usize {
        usize::MAX
    }
}

/// Non-blocking receive source.
pub trait ByteSource {
    /// All bytes received since the previous call, possibly empty and
    /// possibly cutting across frame boundaries.
    fn read(&mut self) -> Vec<u8>;
}
