use crate::constants::TABLE_ID_PMT;
use crate::error::{DemuxError, Result};
use crate::psi::descriptor::{ca_pids, parse_descriptors, Descriptor};
use crate::psi::section::{build_section, SectionReader};

/// ─────────── PMT ───────────
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtSection {
    pub program_number: u16,
    pub version:        u8,
    pub current_next:   bool,
    pub section_number: u8,
    pub last_section:   u8,
    pub pcr_pid:        u16,
    pub descriptors:    Vec<Descriptor>,
    pub streams:        Vec<PmtStream>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type:    u8,
    pub elementary_pid: u16,
    pub descriptors:    Vec<Descriptor>,
}

impl PmtStream {
    pub fn ecm_pids(&self) -> Vec<u16> {
        ca_pids(&self.descriptors).collect()
    }
}

impl PmtSection {
    pub fn stream(&self, pid: u16) -> Option<&PmtStream> {
        self.streams.iter().find(|s| s.elementary_pid == pid)
    }

    /// ECM PIDs from the program loop and every ES loop, deduplicated.
    pub fn ecm_pids(&self) -> Vec<u16> {
        let mut pids: Vec<u16> = ca_pids(&self.descriptors)
            .chain(self.streams.iter().flat_map(|s| ca_pids(&s.descriptors)))
            .collect();
        pids.sort_unstable();
        pids.dedup();
        pids
    }

    pub fn merge(mut parts: Vec<PmtSection>) -> Option<PmtSection> {
        parts.sort_by_key(|p| p.section_number);
        let mut iter = parts.into_iter();
        let mut table = iter.next()?;
        for part in iter {
            table.descriptors.extend(part.descriptors);
            table.streams.extend(part.streams);
        }
        table.section_number = 0;
        Some(table)
    }

    pub fn to_section(&self) -> Vec<u8> {
        let mut program_info = Vec::new();
        for d in &self.descriptors {
            d.encode(&mut program_info);
        }
        let mut body = Vec::new();
        body.push(0xE0 | ((self.pcr_pid >> 8) as u8 & 0x1F));
        body.push(self.pcr_pid as u8);
        body.push(0xF0 | ((program_info.len() >> 8) as u8 & 0x0F));
        body.push(program_info.len() as u8);
        body.extend_from_slice(&program_info);
        for s in &self.streams {
            let mut es_info = Vec::new();
            for d in &s.descriptors {
                d.encode(&mut es_info);
            }
            body.push(s.stream_type);
            body.push(0xE0 | ((s.elementary_pid >> 8) as u8 & 0x1F));
            body.push(s.elementary_pid as u8);
            body.push(0xF0 | ((es_info.len() >> 8) as u8 & 0x0F));
            body.push(es_info.len() as u8);
            body.extend_from_slice(&es_info);
        }
        build_section(
            TABLE_ID_PMT,
            self.program_number,
            self.version,
            self.current_next,
            self.section_number,
            self.last_section,
            &body,
        )
    }
}

pub fn parse_pmt(section: &[u8]) -> Result<PmtSection> {
    let sec = SectionReader::new(section)?;
    if sec.table_id != TABLE_ID_PMT {
        return Err(DemuxError::invalid_section(format!("table_id 0x{:02X} is not a PMT", sec.table_id)));
    }
    let b = sec.body;
    if b.len() < 4 {
        return Err(DemuxError::invalid_section("PMT body shorter than its fixed fields"));
    }

    let pcr_pid       = (((b[0] & 0x1F) as u16) << 8) | (b[1] as u16);
    let prog_info_len = (((b[2] & 0x0F) as usize) << 8) | (b[3] as usize);
    if 4 + prog_info_len > b.len() {
        return Err(DemuxError::invalid_section("program_info_length overruns section"));
    }
    let descriptors = parse_descriptors(&b[4..4 + prog_info_len])?;
    let mut idx = 4 + prog_info_len;

    let mut streams = Vec::new();
    while idx < b.len() {
        if idx + 5 > b.len() {
            return Err(DemuxError::invalid_section("truncated ES loop entry"));
        }
        let stype = b[idx];
        let pid   = (((b[idx+1] & 0x1F) as u16) << 8) | (b[idx+2] as u16);
        let eslen = (((b[idx+3] & 0x0F) as usize) << 8) | (b[idx+4] as usize);
        if idx + 5 + eslen > b.len() {
            return Err(DemuxError::invalid_section(format!("ES_info_length overruns section for PID 0x{pid:04X}")));
        }
        if streams.iter().any(|s: &PmtStream| s.elementary_pid == pid) {
            return Err(DemuxError::invalid_section(format!("PID 0x{pid:04X} listed twice")));
        }
        streams.push(PmtStream {
            stream_type: stype,
            elementary_pid: pid,
            descriptors: parse_descriptors(&b[idx + 5..idx + 5 + eslen])?,
        });
        idx += 5 + eslen;
    }

    Ok(PmtSection {
        program_number: sec.table_id_ext,
        version: sec.version,
        current_next: sec.current_next,
        section_number: sec.section_number,
        last_section: sec.last_section,
        pcr_pid,
        descriptors,
        streams,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PmtSection {
        PmtSection {
            program_number: 1,
            version: 2,
            current_next: true,
            section_number: 0,
            last_section: 0,
            pcr_pid: 0x101,
            descriptors: vec![Descriptor { tag: 0x09, data: vec![0x01, 0x00, 0xE3, 0x00] }],
            streams: vec![
                PmtStream { stream_type: 0x02, elementary_pid: 0x101, descriptors: vec![] },
                PmtStream {
                    stream_type: 0x0F,
                    elementary_pid: 0x102,
                    descriptors: vec![
                        Descriptor { tag: 0x0A, data: b"eng\0".to_vec() },
                        Descriptor { tag: 0x09, data: vec![0x01, 0x00, 0xE3, 0x01] },
                    ],
                },
            ],
        }
    }

    #[test]
    fn test_parse_encoded_pmt() {
        let pmt = sample();
        let parsed = parse_pmt(&pmt.to_section()).unwrap();
        assert_eq!(parsed, pmt);
        assert_eq!(parsed.stream(0x102).unwrap().stream_type, 0x0F);
        assert_eq!(parsed.ecm_pids(), vec![0x300, 0x301]);
    }

    #[test]
    fn test_truncated_es_loop() {
        let pmt = sample();
        let good = pmt.to_section();
        // keep the header but claim an ES_info_length past the end
        let mut body = good[8..good.len() - 4].to_vec();
        let es_len_idx = 4 + 6 + 3;
        body[es_len_idx] = 0xF0;
        body[es_len_idx + 1] = 0xFF;
        let bad = build_section(TABLE_ID_PMT, 1, 2, true, 0, 0, &body);
        assert!(parse_pmt(&bad).is_err());
    }

    #[test]
    fn test_duplicate_pid_rejected() {
        let mut pmt = sample();
        pmt.streams[1].elementary_pid = 0x101;
        assert!(parse_pmt(&pmt.to_section()).is_err());
    }
}
