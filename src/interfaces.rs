//! Capability traits the demultiplexer depends on.

use std::io::{self, Read, Seek, SeekFrom};
use std::time::Duration;

use crate::types::{AccessUnit, StreamClass, StreamInfo};

/// Raw transport bytes for the pull driver.
pub trait ByteSource {
    /// Same contract as [`Read::read`]; `Ok(0)` is end of input.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Reposition to an absolute byte offset. Sources that cannot seek
    /// return `Ok(false)`.
    fn seek_to(&mut self, _offset: u64) -> io::Result<bool> {
        Ok(false)
    }
}

/// [`ByteSource`] over any seekable reader, e.g. a file.
pub struct ReaderSource<R> {
    inner: R,
}

impl<R: Read + Seek> ReaderSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> ByteSource for ReaderSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn seek_to(&mut self, offset: u64) -> io::Result<bool> {
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(true)
    }
}

/// Per elementary stream consumer of access units.
pub trait StreamSink {
    fn push_access_unit(&mut self, unit: AccessUnit) -> io::Result<()>;

    /// Called once when the stream ends or its output is torn down.
    fn end_of_stream(&mut self) -> io::Result<()>;
}

/// Creates outputs as elementary streams are discovered.
pub trait OutputFactory {
    type Sink: StreamSink;

    /// `None` declines the stream; it is then ignored like an
    /// unsupported stream type.
    fn create_output(&mut self, info: &StreamInfo) -> Option<Self::Sink>;
}

/// Approximate byte/time mapping derived from PCR samples.
pub trait ClockQuery {
    fn duration(&self) -> Option<Duration>;

    /// Estimated presentation time at a byte offset.
    fn time_for_offset(&self, offset: u64) -> Option<Duration>;

    /// Estimated byte offset of a presentation time, aligned down to a
    /// packet boundary. Accurate to within a packet stride only when the
    /// stream bitrate is constant.
    fn offset_for_time(&self, time: Duration) -> Option<u64>;
}

/// Conditional access pass-through.
pub trait CaHook {
    /// ECM or EMM section as received.
    fn on_ca_section(&mut self, pid: u16, class: StreamClass, section: &[u8]);

    /// Descramble a payload in place. Returns `false` when the payload
    /// is left scrambled.
    fn descramble(&mut self, pid: u16, scrambling_control: u8, payload: &mut [u8]) -> bool;
}
