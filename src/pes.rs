//! PES header parsing and per-PID access unit reassembly.

use bitstream_io::{BigEndian, BitRead, BitReader};
use bytes::{Bytes, BytesMut};
use log::{debug, trace};

use crate::constants::*;
use crate::error::{DemuxError, Result};

const PES_FIXED_HEADER: usize = 6;
const STREAM_ID_PADDING: u8 = 0xBE;

/// Stream ids that carry no optional PES header.
fn has_optional_header(stream_id: u8) -> bool {
    !matches!(stream_id, 0xBC | 0xBE | 0xBF | 0xF0 | 0xF1 | 0xF2 | 0xF8 | 0xFF)
}

/// Decode a 5-byte PTS/DTS field, checking its 4-bit prefix and markers.
pub fn parse_timestamp(data: &[u8], prefix: u8) -> Result<u64> {
    if data.len() < 5 {
        return Err(DemuxError::invalid_pes("timestamp needs 5 bytes"));
    }
    let mut br = BitReader::endian(&data[..5], BigEndian);
    let found = br.read::<4, u8>()?;
    let high = br.read::<3, u64>()?;
    let m0 = br.read_bit()?;
    let mid = br.read::<15, u64>()?;
    let m1 = br.read_bit()?;
    let low = br.read::<15, u64>()?;
    let m2 = br.read_bit()?;
    if !(m0 && m1 && m2) {
        return Err(DemuxError::invalid_pes("timestamp marker bit cleared"));
    }
    if found != prefix {
        trace!("timestamp prefix {found:#x}, expected {prefix:#x}");
    }
    Ok((high << 30) | (mid << 15) | low)
}

/// Encode a 33-bit timestamp with the given 4-bit prefix.
pub fn write_timestamp(value: u64, prefix: u8, out: &mut [u8]) {
    let value = value & (PTS_WRAP - 1);
    out[0] = (prefix << 4) | (((value >> 30) as u8 & 0x07) << 1) | 0x01;
    out[1] = (value >> 22) as u8;
    out[2] = (((value >> 15) as u8 & 0x7F) << 1) | 0x01;
    out[3] = (value >> 7) as u8;
    out[4] = ((value as u8 & 0x7F) << 1) | 0x01;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// 0 means unbounded
    pub packet_length: u16,
    pub data_alignment: bool,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// Bytes from the start code up to the first payload byte
    pub header_size: usize,
}

impl PesHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < PES_FIXED_HEADER {
            return Err(DemuxError::invalid_pes("shorter than the fixed header"));
        }
        if data[..3] != PES_START_CODE {
            return Err(DemuxError::invalid_pes(format!(
                "bad start code {:02X}{:02X}{:02X}",
                data[0], data[1], data[2]
            )));
        }
        let stream_id = data[3];
        let packet_length = u16::from_be_bytes([data[4], data[5]]);
        if !has_optional_header(stream_id) {
            return Ok(Self {
                stream_id,
                packet_length,
                data_alignment: false,
                pts: None,
                dts: None,
                header_size: PES_FIXED_HEADER,
            });
        }

        if data.len() < 9 {
            return Err(DemuxError::invalid_pes("optional header truncated"));
        }
        if data[6] & 0xC0 != 0x80 {
            return Err(DemuxError::invalid_pes("optional header marker bits"));
        }
        let data_alignment = data[6] & 0x04 != 0;
        let pts_dts_flags = data[7] >> 6;
        let header_size = 9 + data[8] as usize;
        if data.len() < header_size {
            return Err(DemuxError::invalid_pes("header_data_length exceeds packet"));
        }
        let fields = &data[9..header_size];

        let (pts, dts) = match pts_dts_flags {
            0b10 => (Some(parse_timestamp(fields, 0x2)?), None),
            0b11 => {
                if fields.len() < 10 {
                    return Err(DemuxError::invalid_pes("PTS/DTS fields truncated"));
                }
                (Some(parse_timestamp(fields, 0x3)?), Some(parse_timestamp(&fields[5..], 0x1)?))
            }
            0b01 => return Err(DemuxError::invalid_pes("forbidden PTS_DTS_flags value 01")),
            _ => (None, None),
        };

        Ok(Self { stream_id, packet_length, data_alignment, pts, dts, header_size })
    }
}

/// A closed PES packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PesPacket {
    pub header: PesHeader,
    pub payload: Bytes,
    pub discontinuity: bool,
    pub random_access: bool,
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssemblyState {
    /// Waiting for payload_unit_start
    Idle,
    Collecting,
    /// Current unit was abandoned; wait for the next start
    Skipping,
}

/// Reassembles PES packets for one elementary PID.
#[derive(Debug)]
pub struct PesReassembler {
    pid: u16,
    buf: BytesMut,
    state: AssemblyState,
    /// Total PES size including the fixed header, when bounded
    expected: Option<usize>,
    length_known: bool,
    discontinuity: bool,
    pending_discontinuity: bool,
    random_access: bool,
    offset: u64,
    max_buffer: usize,
    min_buffer: usize,
    pub overflows: u64,
    pub dropped: u64,
    pub invalid: u64,
}

impl PesReassembler {
    pub fn new(pid: u16, min_buffer: usize, max_buffer: usize) -> Self {
        Self {
            pid,
            buf: BytesMut::new(),
            state: AssemblyState::Idle,
            expected: None,
            length_known: false,
            discontinuity: false,
            pending_discontinuity: false,
            random_access: false,
            offset: 0,
            max_buffer,
            min_buffer,
            overflows: 0,
            dropped: 0,
            invalid: 0,
        }
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    pub fn is_collecting(&self) -> bool {
        self.state == AssemblyState::Collecting
    }

    /// Feed one packet's payload. Returns the PES packets closed by it.
    pub fn push(&mut self, payload: &[u8], payload_unit_start: bool, random_access: bool, offset: u64) -> Vec<PesPacket> {
        let mut out = Vec::new();

        if payload_unit_start {
            if self.state == AssemblyState::Collecting {
                if self.expected.is_none() && self.length_known {
                    out.extend(self.close());
                } else {
                    debug!(
                        "PID 0x{:04X}: PES cut short at {} of {:?} bytes",
                        self.pid,
                        self.buf.len(),
                        self.expected
                    );
                    self.drop_unit();
                }
            }
            self.begin(random_access, offset);
        } else if self.state != AssemblyState::Collecting {
            return out;
        }

        if self.buf.len() + payload.len() > self.max_buffer {
            self.overflows += 1;
            debug!("PID 0x{:04X}: PES buffer overflow beyond {} bytes", self.pid, self.max_buffer);
            self.buf.clear();
            self.state = AssemblyState::Skipping;
            self.pending_discontinuity = true;
            return out;
        }
        self.buf.extend_from_slice(payload);

        if !self.length_known && self.buf.len() >= PES_FIXED_HEADER {
            if self.buf[..3] != PES_START_CODE {
                self.invalid += 1;
                debug!("PID 0x{:04X}: payload_unit_start without PES start code", self.pid);
                self.buf.clear();
                self.state = AssemblyState::Skipping;
                return out;
            }
            let length = u16::from_be_bytes([self.buf[4], self.buf[5]]) as usize;
            self.length_known = true;
            self.expected = (length != 0).then_some(PES_FIXED_HEADER + length);
        }

        if let Some(expected) = self.expected {
            if self.buf.len() >= expected {
                // anything past the declared length is stuffing
                self.buf.truncate(expected);
                out.extend(self.close());
            }
        }
        out
    }

    /// A continuity gap hit this PID. Unbounded units are kept and flagged;
    /// bounded ones can no longer complete and are dropped.
    pub fn mark_discontinuity(&mut self) {
        match self.state {
            AssemblyState::Collecting if self.length_known && self.expected.is_none() => {
                self.discontinuity = true;
            }
            AssemblyState::Collecting => {
                debug!("PID 0x{:04X}: dropping bounded PES after continuity gap", self.pid);
                self.drop_unit();
                self.pending_discontinuity = true;
            }
            AssemblyState::Idle | AssemblyState::Skipping => self.pending_discontinuity = true,
        }
    }

    /// End of input: close an unbounded unit, discard an incomplete bounded one.
    pub fn flush_eos(&mut self) -> Option<PesPacket> {
        let packet = match self.state {
            AssemblyState::Collecting if self.length_known && self.expected.is_none() => self.close(),
            AssemblyState::Collecting => {
                self.drop_unit();
                None
            }
            _ => None,
        };
        self.reset();
        packet
    }

    /// Forget the unit in progress and any pending flags.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.state = AssemblyState::Idle;
        self.expected = None;
        self.length_known = false;
        self.discontinuity = false;
        self.pending_discontinuity = false;
    }

    fn begin(&mut self, random_access: bool, offset: u64) {
        self.buf = BytesMut::with_capacity(self.min_buffer);
        self.state = AssemblyState::Collecting;
        self.expected = None;
        self.length_known = false;
        self.discontinuity = std::mem::take(&mut self.pending_discontinuity);
        self.random_access = random_access;
        self.offset = offset;
    }

    fn drop_unit(&mut self) {
        self.dropped += 1;
        self.buf.clear();
        self.state = AssemblyState::Skipping;
        self.pending_discontinuity |= self.discontinuity;
    }

    fn close(&mut self) -> Option<PesPacket> {
        self.state = AssemblyState::Idle;
        let data = std::mem::take(&mut self.buf).freeze();
        let header = match PesHeader::parse(&data) {
            Ok(header) => header,
            Err(e) => {
                self.invalid += 1;
                debug!("PID 0x{:04X}: {e}", self.pid);
                self.pending_discontinuity |= self.discontinuity;
                return None;
            }
        };
        if header.stream_id == STREAM_ID_PADDING {
            trace!("PID 0x{:04X}: padding PES skipped", self.pid);
            return None;
        }
        trace!(
            "PID 0x{:04X}: PES stream_id 0x{:02X}, {} bytes, pts {:?}",
            self.pid,
            header.stream_id,
            data.len(),
            header.pts
        );
        Some(PesPacket {
            payload: data.slice(header.header_size..),
            header,
            discontinuity: std::mem::take(&mut self.discontinuity),
            random_access: self.random_access,
            offset: self.offset,
        })
    }
}
