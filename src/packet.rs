//! Transport packet parsing and continuity counter tracking.

use bitstream_io::{BigEndian, BitRead, BitReader};
use bytes::Bytes;

use crate::constants::*;
use crate::error::{DemuxError, Result};

/// Parsed 4-byte transport packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    pub pid: u16,
    pub scrambling_control: u8,
    /// 01 = payload only, 10 = adaptation only, 11 = both, 00 = reserved
    pub adaptation_field_control: u8,
    pub continuity_counter: u8,
}

impl TsHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(DemuxError::InvalidPacket(format!("header needs 4 bytes, got {}", data.len())));
        }
        let mut br = BitReader::endian(&data[..4], BigEndian);
        let sync = br.read::<8, u8>()?;
        if sync != TS_SYNC_BYTE {
            return Err(DemuxError::InvalidPacket(format!("sync byte 0x{sync:02X}")));
        }
        Ok(Self {
            transport_error: br.read_bit()?,
            payload_unit_start: br.read_bit()?,
            transport_priority: br.read_bit()?,
            pid: br.read::<13, u16>()?,
            scrambling_control: br.read::<2, u8>()?,
            adaptation_field_control: br.read::<2, u8>()?,
            continuity_counter: br.read::<4, u8>()?,
        })
    }

    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0x02 != 0
    }

    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0x01 != 0
    }

    pub fn is_scrambled(&self) -> bool {
        self.scrambling_control != 0
    }
}

/// Program clock reference: 33-bit base at 90 kHz plus 9-bit extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pcr {
    pub base: u64,
    pub extension: u16,
}

impl Pcr {
    pub fn new(base: u64, extension: u16) -> Self {
        Self { base: base & (PTS_WRAP - 1), extension: extension % 300 }
    }

    pub fn from_27mhz(value: u64) -> Self {
        let value = value % PCR_WRAP;
        Self::new(value / 300, (value % 300) as u16)
    }

    pub fn to_27mhz(&self) -> u64 {
        self.base * 300 + self.extension as u64
    }

    /// Parse the 6-byte PCR field of an adaptation field.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 6 {
            return Err(DemuxError::InvalidPacket("PCR needs 6 bytes".into()));
        }
        let mut br = BitReader::endian(&data[..6], BigEndian);
        let base = br.read::<33, u64>()?;
        br.skip(6)?; // reserved
        let extension = br.read::<9, u16>()?;
        Ok(Self { base, extension })
    }

    /// Encode into the 6-byte adaptation field layout.
    pub fn write(&self, out: &mut [u8]) {
        out[0] = (self.base >> 25) as u8;
        out[1] = (self.base >> 17) as u8;
        out[2] = (self.base >> 9) as u8;
        out[3] = (self.base >> 1) as u8;
        out[4] = (((self.base & 0x01) as u8) << 7) | 0x7E | ((self.extension >> 8) as u8 & 0x01);
        out[5] = self.extension as u8;
    }
}

/// Adaptation field fields the demultiplexer acts upon.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdaptationField {
    pub length: u8,
    pub discontinuity: bool,
    pub random_access: bool,
    pub es_priority: bool,
    pub pcr: Option<Pcr>,
    pub opcr: Option<Pcr>,
    pub splice_countdown: Option<i8>,
}

impl AdaptationField {
    /// `data` starts at the adaptation_field_length byte.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let length = *data
            .first()
            .ok_or_else(|| DemuxError::InvalidPacket("missing adaptation field length".into()))?;
        if length as usize + 1 > data.len() {
            return Err(DemuxError::InvalidPacket(format!("adaptation field length {length} overruns packet")));
        }
        let mut af = AdaptationField { length, ..Default::default() };
        if length == 0 {
            return Ok(af);
        }
        let body = &data[1..1 + length as usize];
        let flags = body[0];
        af.discontinuity = flags & 0x80 != 0;
        af.random_access = flags & 0x40 != 0;
        af.es_priority = flags & 0x20 != 0;
        let pcr_flag = flags & 0x10 != 0;
        let opcr_flag = flags & 0x08 != 0;
        let splicing_point_flag = flags & 0x04 != 0;

        let mut idx = 1;
        if pcr_flag {
            if idx + 6 > body.len() {
                return Err(DemuxError::InvalidPacket("truncated PCR".into()));
            }
            af.pcr = Some(Pcr::parse(&body[idx..idx + 6])?);
            idx += 6;
        }
        if opcr_flag {
            if idx + 6 > body.len() {
                return Err(DemuxError::InvalidPacket("truncated OPCR".into()));
            }
            af.opcr = Some(Pcr::parse(&body[idx..idx + 6])?);
            idx += 6;
        }
        if splicing_point_flag && idx < body.len() {
            af.splice_countdown = Some(body[idx] as i8);
        }
        Ok(af)
    }
}

/// One transport packet, owned and immutable.
#[derive(Debug, Clone)]
pub struct TransportPacket {
    pub header: TsHeader,
    pub adaptation: Option<AdaptationField>,
    /// Stream offset of the sync byte.
    pub offset: u64,
    /// 30-bit arrival time stamp carried by 192-byte M2TS framing.
    pub arrival_timestamp: Option<u32>,
    data: Bytes,
    payload_start: usize,
}

impl TransportPacket {
    /// Parse a 188-byte packet starting at the sync byte.
    pub fn parse(data: Bytes, offset: u64) -> Result<Self> {
        if data.len() < TS_PACKET_SIZE {
            return Err(DemuxError::InvalidPacket(format!("expected 188 bytes, got {}", data.len())));
        }
        let data = data.slice(..TS_PACKET_SIZE);
        let header = TsHeader::parse(&data)?;
        if header.adaptation_field_control == 0 {
            return Err(DemuxError::InvalidPacket("reserved adaptation_field_control 00".into()));
        }

        let mut payload_start = 4;
        let adaptation = if header.has_adaptation_field() {
            let af = AdaptationField::parse(&data[4..])?;
            payload_start += 1 + af.length as usize;
            Some(af)
        } else {
            None
        };
        if header.has_payload() && payload_start >= TS_PACKET_SIZE {
            return Err(DemuxError::InvalidPacket("adaptation field leaves no room for payload".into()));
        }

        Ok(Self { header, adaptation, offset, arrival_timestamp: None, data, payload_start })
    }

    pub fn pid(&self) -> u16 {
        self.header.pid
    }

    pub fn pcr(&self) -> Option<Pcr> {
        self.adaptation.as_ref().and_then(|af| af.pcr)
    }

    pub fn discontinuity_indicator(&self) -> bool {
        self.adaptation.as_ref().is_some_and(|af| af.discontinuity)
    }

    pub fn random_access(&self) -> bool {
        self.adaptation.as_ref().is_some_and(|af| af.random_access)
    }

    pub fn payload(&self) -> Option<&[u8]> {
        if self.header.has_payload() {
            Some(&self.data[self.payload_start..])
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Result of checking one continuity counter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcStatus {
    /// First packet seen on the PID, or the expectation was reset.
    First,
    Ok,
    /// Single repeat of the previous packet; payload must be dropped.
    Duplicate,
    Discontinuity { expected: u8, actual: u8 },
}

/// Per-PID continuity counter expectation.
#[derive(Debug, Clone, Default)]
pub struct ContinuityCounter {
    last: Option<u8>,
    duplicate_seen: bool,
}

impl ContinuityCounter {
    pub fn check(&mut self, cc: u8, has_payload: bool, discontinuity_indicator: bool) -> CcStatus {
        let cc = cc & 0x0F;
        if discontinuity_indicator {
            self.last = Some(cc);
            self.duplicate_seen = false;
            return CcStatus::First;
        }
        let Some(prev) = self.last else {
            self.last = Some(cc);
            return CcStatus::First;
        };

        // the counter only advances on packets that carry payload
        if !has_payload {
            if cc == prev {
                return CcStatus::Ok;
            }
            self.last = Some(cc);
            self.duplicate_seen = false;
            return CcStatus::Discontinuity { expected: prev, actual: cc };
        }

        let expected = (prev + 1) & 0x0F;
        if cc == expected {
            self.last = Some(cc);
            self.duplicate_seen = false;
            CcStatus::Ok
        } else if cc == prev && !self.duplicate_seen {
            self.duplicate_seen = true;
            CcStatus::Duplicate
        } else {
            self.last = Some(cc);
            self.duplicate_seen = false;
            CcStatus::Discontinuity { expected, actual: cc }
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.duplicate_seen = false;
    }
}
