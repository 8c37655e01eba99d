// psi/section.rs
//! Section reassembly across transport packets, CRC-32 (MPEG-2) validation
//! and the generic long-form section header reader.

use bytes::{Bytes, BytesMut};
use crc::{Crc, CRC_32_MPEG_2};
use log::{debug, trace};

use crate::constants::*;
use crate::error::{DemuxError, Result};

const CRC_MPEG: Crc<u32> = Crc::<u32>::new(&CRC_32_MPEG_2);

pub fn crc32(data: &[u8]) -> u32 {
    CRC_MPEG.checksum(data)
}

/// Check the trailing CRC-32 of a complete section.
pub fn verify_crc(section: &[u8]) -> Result<()> {
    if section.len() < SECTION_HEADER_SIZE + CRC_SIZE {
        return Err(DemuxError::invalid_section("section too short for CRC"));
    }
    let (data, trailer) = section.split_at(section.len() - CRC_SIZE);
    let computed = crc32(data);
    let carried = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    if computed != carried {
        return Err(DemuxError::CrcMismatch { computed, carried });
    }
    Ok(())
}

/// Long-form section header view over a complete section.
pub struct SectionReader<'a> {
    pub table_id:       u8,
    pub section_length: usize,
    pub table_id_ext:   u16,
    pub version:        u8,
    pub current_next:   bool,
    pub section_number: u8,
    pub last_section:   u8,
    pub body:           &'a [u8],   // bytes between fixed header & CRC
}

impl<'a> SectionReader<'a> {
    /// `section` starts at table_id; CRC is checked by the filter, not here.
    pub fn new(section: &'a [u8]) -> Result<Self> {
        if section.len() < SECTION_HEADER_SIZE + 5 + CRC_SIZE {
            return Err(DemuxError::invalid_section("short section"));
        }
        if section[1] & 0x80 == 0 {
            return Err(DemuxError::invalid_section("section_syntax_indicator not set"));
        }
        let section_length = (((section[1] & 0x0F) as usize) << 8) | section[2] as usize;
        let end = SECTION_HEADER_SIZE + section_length;
        if section_length < 5 + CRC_SIZE {
            return Err(DemuxError::invalid_section(format!("section_length {section_length} too small")));
        }
        if end > section.len() {
            return Err(DemuxError::invalid_section(format!(
                "section_length {section_length} exceeds {} received bytes",
                section.len() - SECTION_HEADER_SIZE
            )));
        }
        let section_number = section[6];
        let last_section = section[7];
        if section_number > last_section {
            return Err(DemuxError::invalid_section(format!(
                "section_number {section_number} beyond last_section_number {last_section}"
            )));
        }
        Ok(Self {
            table_id: section[0],
            section_length,
            table_id_ext: u16::from_be_bytes([section[3], section[4]]),
            version: (section[5] & 0x3E) >> 1,
            current_next: section[5] & 0x01 != 0,
            section_number,
            last_section,
            body: &section[8..end - CRC_SIZE],
        })
    }
}

/// Assemble a long-form section with header and CRC around `body`.
pub fn build_section(
    table_id: u8,
    table_id_ext: u16,
    version: u8,
    current_next: bool,
    section_number: u8,
    last_section: u8,
    body: &[u8],
) -> Vec<u8> {
    let section_length = 5 + body.len() + CRC_SIZE;
    let mut out = Vec::with_capacity(SECTION_HEADER_SIZE + section_length);
    out.push(table_id);
    out.push(0xB0 | ((section_length >> 8) as u8 & 0x0F));
    out.push(section_length as u8);
    out.extend_from_slice(&table_id_ext.to_be_bytes());
    out.push(0xC0 | ((version & 0x1F) << 1) | current_next as u8);
    out.push(section_number);
    out.push(last_section);
    out.extend_from_slice(body);
    let crc = crc32(&out);
    out.extend_from_slice(&crc.to_be_bytes());
    out
}

/// Per-PID section reassembly.
///
/// Sections may span packets, several sections may share one packet, and a
/// section is only delivered once complete and CRC-clean.
pub struct SectionFilter {
    pid: u16,
    check_crc: bool,
    /// PSI tables must use the long form; private (ECM/EMM) sections may not.
    long_form_only: bool,
    buf: BytesMut,
    expected: Option<usize>,
    active: bool,
    pub crc_errors: u64,
    pub truncated: u64,
    pub malformed: u64,
}

impl SectionFilter {
    pub fn psi(pid: u16, check_crc: bool) -> Self {
        Self::new(pid, check_crc, true)
    }

    pub fn private(pid: u16, check_crc: bool) -> Self {
        Self::new(pid, check_crc, false)
    }

    fn new(pid: u16, check_crc: bool, long_form_only: bool) -> Self {
        Self {
            pid,
            check_crc,
            long_form_only,
            buf: BytesMut::new(),
            expected: None,
            active: false,
            crc_errors: 0,
            truncated: 0,
            malformed: 0,
        }
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Discard any partial section.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.expected = None;
        self.active = false;
    }

    /// Drop the in-progress section after a continuity gap.
    pub fn discontinuity(&mut self) {
        if self.active {
            self.truncated += 1;
            debug!("PID 0x{:04X}: partial section dropped on discontinuity", self.pid);
        }
        self.reset();
    }

    /// Feed one packet payload; returns every section completed by it.
    pub fn push(&mut self, payload: &[u8], payload_unit_start: bool) -> Vec<Bytes> {
        let mut out = Vec::new();
        if !payload_unit_start {
            if self.active {
                // anything after a completed section here is stuffing
                self.append(payload, &mut out);
            }
            return out;
        }

        let Some((&pointer, data)) = payload.split_first() else {
            return out;
        };
        let pointer = pointer as usize;
        if pointer > data.len() {
            self.malformed += 1;
            debug!("PID 0x{:04X}: pointer_field {pointer} overruns payload", self.pid);
            self.reset();
            return out;
        }
        let (tail, rest) = data.split_at(pointer);
        if self.active {
            self.append(tail, &mut out);
            if self.active {
                self.truncated += 1;
                debug!("PID 0x{:04X}: section truncated by new payload unit", self.pid);
                self.reset();
            }
        }
        self.consume_new(rest, &mut out);
        out
    }

    fn consume_new(&mut self, mut data: &[u8], out: &mut Vec<Bytes>) {
        while let Some(&first) = data.first() {
            if first == 0xFF {
                break; // stuffing
            }
            self.buf.clear();
            self.expected = None;
            self.active = true;
            let used = self.append(data, out);
            data = &data[used..];
            if self.active {
                break; // continues in the next packet
            }
        }
    }

    /// Returns the number of bytes taken from `data`.
    fn append(&mut self, data: &[u8], out: &mut Vec<Bytes>) -> usize {
        let mut used = 0;
        if self.expected.is_none() {
            let take = (SECTION_HEADER_SIZE - self.buf.len()).min(data.len());
            self.buf.extend_from_slice(&data[..take]);
            used += take;
            if self.buf.len() < SECTION_HEADER_SIZE {
                return used;
            }
            let section_length = (((self.buf[1] & 0x0F) as usize) << 8) | self.buf[2] as usize;
            if section_length > MAX_SECTION_LENGTH {
                self.malformed += 1;
                debug!("PID 0x{:04X}: section_length {section_length} too large", self.pid);
                self.reset();
                return data.len();
            }
            self.buf.reserve(section_length);
            self.expected = Some(SECTION_HEADER_SIZE + section_length);
        }

        let expected = self.expected.unwrap_or(SECTION_HEADER_SIZE);
        let take = (expected - self.buf.len()).min(data.len() - used);
        self.buf.extend_from_slice(&data[used..used + take]);
        used += take;
        if self.buf.len() == expected {
            self.complete(out);
        }
        used
    }

    fn complete(&mut self, out: &mut Vec<Bytes>) {
        let section = self.buf.split().freeze();
        self.expected = None;
        self.active = false;

        let long_form = section[1] & 0x80 != 0;
        if self.long_form_only && !long_form {
            self.malformed += 1;
            debug!("PID 0x{:04X}: short-form section on a PSI PID", self.pid);
            return;
        }
        if self.check_crc && long_form {
            if let Err(e) = verify_crc(&section) {
                self.crc_errors += 1;
                debug!("PID 0x{:04X}: section discarded: {e}", self.pid);
                return;
            }
        }
        trace!("PID 0x{:04X}: section table_id 0x{:02X} ({} bytes)", self.pid, section[0], section.len());
        out.push(section);
    }
}
