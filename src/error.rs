//! Demultiplexer error types.
//!
//! Only synchronization failures, configuration mistakes and I/O problems
//! terminate a session. Section, PES and continuity anomalies are reported
//! through these variants internally but are counted and swallowed by the
//! orchestrator.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DemuxError {
    /// No packet alignment found within the bounded input prefix.
    #[error("no transport packet synchronization within the first {scanned} bytes")]
    NoSync { scanned: u64 },

    /// Synchronization was lost mid-stream and could not be re-acquired.
    #[error("transport packet synchronization lost, {skipped} bytes skipped without re-lock")]
    SyncLost { skipped: u64 },

    /// A read buffer can never hold a full transport packet.
    #[error("buffer of {0} bytes cannot hold a transport packet")]
    BufferTooSmall(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Seeking needs a bitrate estimate from at least two PCR samples and
    /// a target that maps to an addressable byte offset.
    #[error("seek target cannot be mapped to a byte offset")]
    SeekUnavailable,

    #[error("invalid transport packet: {0}")]
    InvalidPacket(String),

    #[error("invalid section: {0}")]
    InvalidSection(String),

    #[error("CRC mismatch: computed 0x{computed:08X}, carried 0x{carried:08X}")]
    CrcMismatch { computed: u32, carried: u32 },

    #[error("invalid PES packet: {0}")]
    InvalidPes(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DemuxError {
    pub fn invalid_section(msg: impl Into<String>) -> Self {
        DemuxError::InvalidSection(msg.into())
    }

    pub fn invalid_pes(msg: impl Into<String>) -> Self {
        DemuxError::InvalidPes(msg.into())
    }

    /// True for errors that end the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DemuxError::NoSync { .. }
                | DemuxError::SyncLost { .. }
                | DemuxError::BufferTooSmall(_)
                | DemuxError::InvalidConfig(_)
                | DemuxError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, DemuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_display() {
        let err = DemuxError::CrcMismatch { computed: 0xDEADBEEF, carried: 0xCAFEBABE };
        assert_eq!(err.to_string(), "CRC mismatch: computed 0xDEADBEEF, carried 0xCAFEBABE");
    }

    #[test]
    fn test_fatality() {
        assert!(DemuxError::NoSync { scanned: 10 }.is_fatal());
        assert!(DemuxError::BufferTooSmall(100).is_fatal());
        assert!(!DemuxError::invalid_section("short").is_fatal());
        assert!(!DemuxError::invalid_pes("bad start code").is_fatal());
    }
}
