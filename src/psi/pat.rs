use crate::constants::{TABLE_ID_PAT, PID_PAT};
use crate::error::{DemuxError, Result};
use crate::psi::section::{build_section, SectionReader};

/// ─────────── PAT ───────────
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatSection {
    pub transport_stream_id: u16,
    pub version:      u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section: u8,
    pub programs:     Vec<PatEntry>,
    /// program_number 0 points at the network PID instead of a PMT
    pub network_pid:  Option<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pmt_pid:        u16,
}

impl PatSection {
    pub fn pmt_pid(&self, program_number: u16) -> Option<u16> {
        self.programs.iter().find(|p| p.program_number == program_number).map(|p| p.pmt_pid)
    }

    pub fn is_pmt_pid(&self, pid: u16) -> bool {
        self.programs.iter().any(|p| p.pmt_pid == pid)
    }

    /// Lowest program_number, the default program when none is requested.
    pub fn lowest_program(&self) -> Option<u16> {
        self.programs.iter().map(|p| p.program_number).min()
    }

    /// Merge the sections of one complete table version.
    pub fn merge(mut parts: Vec<PatSection>) -> Option<PatSection> {
        parts.sort_by_key(|p| p.section_number);
        let mut iter = parts.into_iter();
        let mut table = iter.next()?;
        for part in iter {
            table.programs.extend(part.programs);
            table.network_pid = table.network_pid.or(part.network_pid);
        }
        table.section_number = 0;
        Some(table)
    }

    /// Single-section encoding, used to build synthetic streams.
    pub fn to_section(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(self.programs.len() * 4 + 4);
        if let Some(pid) = self.network_pid {
            body.extend_from_slice(&[0x00, 0x00, 0xE0 | (pid >> 8) as u8, pid as u8]);
        }
        for p in &self.programs {
            body.extend_from_slice(&p.program_number.to_be_bytes());
            body.push(0xE0 | ((p.pmt_pid >> 8) as u8 & 0x1F));
            body.push(p.pmt_pid as u8);
        }
        build_section(
            TABLE_ID_PAT,
            self.transport_stream_id,
            self.version,
            self.current_next,
            self.section_number,
            self.last_section,
            &body,
        )
    }
}

pub fn parse_pat(section: &[u8]) -> Result<PatSection> {
    let sec = SectionReader::new(section)?;
    if sec.table_id != TABLE_ID_PAT {
        return Err(DemuxError::invalid_section(format!("table_id 0x{:02X} is not a PAT", sec.table_id)));
    }
    if sec.body.len() % 4 != 0 {
        return Err(DemuxError::invalid_section("PAT program loop not a multiple of 4 bytes"));
    }

    let mut programs = Vec::with_capacity(sec.body.len() / 4);
    let mut network_pid = None;
    for entry in sec.body.chunks_exact(4) {
        let pn  = u16::from_be_bytes([entry[0], entry[1]]);
        let pid = (((entry[2] & 0x1F) as u16) << 8) | (entry[3] as u16);
        if pn == 0 {
            network_pid = Some(pid);
        } else if pid == PID_PAT {
            return Err(DemuxError::invalid_section(format!("program {pn} mapped to PID 0")));
        } else {
            programs.push(PatEntry { program_number: pn, pmt_pid: pid });
        }
    }
    Ok(PatSection {
        transport_stream_id: sec.table_id_ext,
        version: sec.version,
        current_next: sec.current_next,
        section_number: sec.section_number,
        last_section: sec.last_section,
        programs,
        network_pid,
    })
}
