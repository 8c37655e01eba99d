//! Typed demultiplexer configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{DemuxError, Result};

/// Options recognised by the demultiplexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemuxConfig {
    /// Force a packet stride (188/192/204/208) instead of probing.
    pub packet_size: Option<usize>,
    /// Force 192-byte M2TS framing.
    pub m2ts_mode: bool,
    /// Program to expose; `None` selects the lowest program_number in the PAT.
    pub program_number: Option<u16>,
    pub check_crc: bool,
    /// Keep packets carrying transport_error_indicator instead of dropping them.
    pub tolerate_transport_errors: bool,
    /// Consecutive packets at a constant stride needed to lock.
    pub min_sync_run: usize,
    /// Bytes scanned without lock before the session fails.
    pub max_resync_bytes: usize,
    pub max_pes_buffer: usize,
    /// Pre-allocation hint for PES buffers.
    pub min_pes_buffer: usize,
    /// Weight of a new sample in the exponentially weighted bitrate.
    pub bitrate_smoothing: f64,
    /// Read size used by the pull driver.
    pub read_chunk_size: usize,
}

impl Default for DemuxConfig {
    fn default() -> Self {
        Self {
            packet_size: None,
            m2ts_mode: false,
            program_number: None,
            check_crc: true,
            tolerate_transport_errors: false,
            min_sync_run: DEFAULT_MIN_SYNC_RUN,
            max_resync_bytes: DEFAULT_MAX_RESYNC_BYTES,
            max_pes_buffer: PES_MAX_BUFFER_SIZE,
            min_pes_buffer: PES_MIN_BUFFER_SIZE,
            bitrate_smoothing: 0.2,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl DemuxConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: DemuxConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Packet stride forced by the configuration, if any.
    pub fn forced_packet_size(&self) -> Option<usize> {
        if self.m2ts_mode {
            Some(M2TS_PACKET_SIZE)
        } else {
            self.packet_size
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(size) = self.packet_size {
            if !PACKET_SIZES.contains(&size) {
                return Err(DemuxError::InvalidConfig(format!("unsupported packet size {size}")));
            }
            if self.m2ts_mode && size != M2TS_PACKET_SIZE {
                return Err(DemuxError::InvalidConfig(format!(
                    "m2ts_mode requires 192-byte packets, got {size}"
                )));
            }
        }
        if self.min_sync_run < 2 {
            return Err(DemuxError::InvalidConfig("min_sync_run must be at least 2".into()));
        }
        if self.max_resync_bytes < MAX_PACKET_SIZE * self.min_sync_run {
            return Err(DemuxError::InvalidConfig(
                "max_resync_bytes is smaller than one sync lock window".into(),
            ));
        }
        if self.min_pes_buffer > self.max_pes_buffer {
            return Err(DemuxError::InvalidConfig("min_pes_buffer exceeds max_pes_buffer".into()));
        }
        if !(self.bitrate_smoothing > 0.0 && self.bitrate_smoothing <= 1.0) {
            return Err(DemuxError::InvalidConfig("bitrate_smoothing must be in (0, 1]".into()));
        }
        if self.read_chunk_size < MAX_PACKET_SIZE {
            return Err(DemuxError::BufferTooSmall(self.read_chunk_size));
        }
        Ok(())
    }
}
