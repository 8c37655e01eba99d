use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;

/// Elementary stream types as carried in the PMT ES loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StreamType {
    Mpeg1Video,
    Mpeg2Video,
    Mpeg1Audio,
    Mpeg2Audio,
    /// ISO 13818-1 private sections, not PES
    PrivateSections,
    PrivatePes,
    AdtsAac,
    Mpeg4Video,
    LatmAac,
    Metadata,
    H264,
    Hevc,
    Vvc,
    Ac3,
    Dts,
    TrueHd,
    Eac3,
    /// SCTE-35 splice information, carried as sections
    Scte35,
    Unknown(u8),
}

/// Coarse classification of a [`StreamType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MediaKind {
    Video,
    Audio,
    Private,
    Metadata,
    Unknown,
}

impl StreamType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x01 => StreamType::Mpeg1Video,
            0x02 => StreamType::Mpeg2Video,
            0x03 => StreamType::Mpeg1Audio,
            0x04 => StreamType::Mpeg2Audio,
            0x05 => StreamType::PrivateSections,
            0x06 => StreamType::PrivatePes,
            0x0F => StreamType::AdtsAac,
            0x10 => StreamType::Mpeg4Video,
            0x11 => StreamType::LatmAac,
            0x15 => StreamType::Metadata,
            0x1B => StreamType::H264,
            0x24 => StreamType::Hevc,
            0x33 => StreamType::Vvc,
            0x81 => StreamType::Ac3,
            0x82 => StreamType::Dts,
            0x83 => StreamType::TrueHd,
            0x86 => StreamType::Scte35,
            0x87 => StreamType::Eac3,
            other => StreamType::Unknown(other),
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            StreamType::Mpeg1Video => 0x01,
            StreamType::Mpeg2Video => 0x02,
            StreamType::Mpeg1Audio => 0x03,
            StreamType::Mpeg2Audio => 0x04,
            StreamType::PrivateSections => 0x05,
            StreamType::PrivatePes => 0x06,
            StreamType::AdtsAac => 0x0F,
            StreamType::Mpeg4Video => 0x10,
            StreamType::LatmAac => 0x11,
            StreamType::Metadata => 0x15,
            StreamType::H264 => 0x1B,
            StreamType::Hevc => 0x24,
            StreamType::Vvc => 0x33,
            StreamType::Ac3 => 0x81,
            StreamType::Dts => 0x82,
            StreamType::TrueHd => 0x83,
            StreamType::Scte35 => 0x86,
            StreamType::Eac3 => 0x87,
            StreamType::Unknown(v) => *v,
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            StreamType::Mpeg1Video
            | StreamType::Mpeg2Video
            | StreamType::Mpeg4Video
            | StreamType::H264
            | StreamType::Hevc
            | StreamType::Vvc => MediaKind::Video,
            StreamType::Mpeg1Audio
            | StreamType::Mpeg2Audio
            | StreamType::AdtsAac
            | StreamType::LatmAac
            | StreamType::Ac3
            | StreamType::Dts
            | StreamType::TrueHd
            | StreamType::Eac3 => MediaKind::Audio,
            StreamType::PrivatePes | StreamType::PrivateSections | StreamType::Scte35 => MediaKind::Private,
            StreamType::Metadata => MediaKind::Metadata,
            StreamType::Unknown(_) => MediaKind::Unknown,
        }
    }

    /// Whether the stream carries PES and gets an output.
    pub fn is_supported(&self) -> bool {
        !matches!(
            self,
            StreamType::PrivateSections | StreamType::Scte35 | StreamType::Unknown(_)
        )
    }

    pub fn codec_name(&self) -> &'static str {
        match self {
            StreamType::Mpeg1Video => "MPEG-1 Video",
            StreamType::Mpeg2Video => "MPEG-2 Video",
            StreamType::Mpeg1Audio => "MPEG-1 Audio",
            StreamType::Mpeg2Audio => "MPEG-2 Audio",
            StreamType::PrivateSections => "Private sections",
            StreamType::PrivatePes => "Private PES",
            StreamType::AdtsAac => "AAC (ADTS)",
            StreamType::Mpeg4Video => "MPEG-4 Visual",
            StreamType::LatmAac => "AAC (LATM)",
            StreamType::Metadata => "Metadata",
            StreamType::H264 => "H.264/AVC",
            StreamType::Hevc => "H.265/HEVC",
            StreamType::Vvc => "H.266/VVC",
            StreamType::Ac3 => "AC-3",
            StreamType::Dts => "DTS",
            StreamType::TrueHd => "TrueHD",
            StreamType::Scte35 => "SCTE-35",
            StreamType::Eac3 => "E-AC-3",
            StreamType::Unknown(_) => "Unknown",
        }
    }
}

/// Role of a tracked PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamClass {
    Pat,
    Pmt,
    Cat,
    Ecm,
    Emm,
    Pes,
}

/// Session state of the demultiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DemuxState {
    Init,
    Syncing,
    PatPending,
    PmtPending,
    Streaming,
    Flushing,
    Eos,
}

/// Description handed to an [`OutputFactory`](crate::interfaces::OutputFactory)
/// when a new elementary stream is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub pid: u16,
    pub program_number: u16,
    pub stream_type: StreamType,
    pub pcr_pid: u16,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ecm_pids: Vec<u16>,
}

/// One reassembled PES packet delivered to an output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessUnit {
    pub pid: u16,
    pub stream_id: u8,
    pub stream_type: StreamType,
    /// Raw 33-bit PTS from the PES header
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// Unwrapped presentation time relative to the output's time base
    pub timestamp: Option<Duration>,
    pub payload: Bytes,
    /// Data was lost before or inside this unit
    pub discontinuity: bool,
    pub random_access: bool,
    /// Stream offset of the packet that started this unit
    pub offset: u64,
}
