//! Constants for MPEG-TS demultiplexing

/// MPEG-TS packet constants
pub const TS_PACKET_SIZE: usize = 188;
pub const TS_SYNC_BYTE: u8 = 0x47;

/// Packet strides the synchronizer tries, in order of preference.
/// 192 = M2TS (4-byte arrival timestamp prefix), 204 = DVB-ASI with RS parity,
/// 208 = ATSC with FEC.
pub const PACKET_SIZES: [usize; 4] = [188, 192, 204, 208];
pub const M2TS_PACKET_SIZE: usize = 192;
pub const M2TS_PREFIX_SIZE: usize = M2TS_PACKET_SIZE - TS_PACKET_SIZE;
pub const MAX_PACKET_SIZE: usize = 208;

/// Well known PIDs
pub const PID_PAT: u16 = 0x0000;
pub const PID_CAT: u16 = 0x0001;
pub const PID_NULL: u16 = 0x1FFF;

/// Table ids
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_CAT: u8 = 0x01;
pub const TABLE_ID_PMT: u8 = 0x02;

/// Section constants
pub const SECTION_HEADER_SIZE: usize = 3;
pub const MAX_SECTION_LENGTH: usize = 4093;
pub const CRC_SIZE: usize = 4;

/// CA descriptor tag (ISO/IEC 13818-1 2.6.16)
pub const CA_DESCRIPTOR_TAG: u8 = 0x09;

/// PES packet constants
pub const PES_START_CODE: [u8; 3] = [0x00, 0x00, 0x01];
pub const PES_MAX_BUFFER_SIZE: usize = 256 * 1024;
pub const PES_MIN_BUFFER_SIZE: usize = 4 * 1024;

/// PCR constants
pub const PCR_CLOCK_HZ: u64 = 27_000_000; // 27 MHz
pub const PCR_WRAP: u64 = (1u64 << 33) * 300; // PCR wrap-around period in 27 MHz ticks
/// Shortest PCR interval used for a bitrate sample (10 ms)
pub const PCR_MIN_INTERVAL: u64 = PCR_CLOCK_HZ / 100;
/// Forward PCR jumps larger than this are treated as a clock discontinuity
pub const PCR_MAX_GAP: u64 = PCR_CLOCK_HZ * 10;

/// PTS constants
pub const PTS_CLOCK_HZ: u64 = 90_000; // 90 kHz
pub const PTS_WRAP: u64 = 1u64 << 33; // 33-bit PTS counter

/// Synchronizer defaults
pub const DEFAULT_MIN_SYNC_RUN: usize = 5;
pub const DEFAULT_MAX_RESYNC_BYTES: usize = 256 * 1024;

/// Pull-mode default read size
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;
