use crate::constants::TABLE_ID_CAT;
use crate::error::{DemuxError, Result};
use crate::psi::descriptor::{ca_pids, parse_descriptors, Descriptor};
use crate::psi::section::{build_section, SectionReader};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatSection {
    pub version: u8,
    pub current_next: bool,
    pub section_number: u8,
    pub last_section: u8,
    pub descriptors: Vec<Descriptor>,
}

impl CatSection {
    pub fn emm_pids(&self) -> Vec<u16> {
        ca_pids(&self.descriptors).collect()
    }

    pub fn merge(mut parts: Vec<CatSection>) -> Option<CatSection> {
        parts.sort_by_key(|p| p.section_number);
        let mut iter = parts.into_iter();
        let mut table = iter.next()?;
        for part in iter {
            table.descriptors.extend(part.descriptors);
        }
        table.section_number = 0;
        Some(table)
    }

    pub fn to_section(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for d in &self.descriptors {
            d.encode(&mut body);
        }
        build_section(TABLE_ID_CAT, 0xFFFF, self.version, self.current_next, self.section_number, self.last_section, &body)
    }
}

pub fn parse_cat(section: &[u8]) -> Result<CatSection> {
    let sec = SectionReader::new(section)?;
    if sec.table_id != TABLE_ID_CAT {
        return Err(DemuxError::invalid_section(format!("table_id 0x{:02X} is not a CAT", sec.table_id)));
    }
    Ok(CatSection {
        version: sec.version,
        current_next: sec.current_next,
        section_number: sec.section_number,
        last_section: sec.last_section,
        descriptors: parse_descriptors(sec.body)?,
    })
}
