//! Descriptor loops shared by PMT and CAT.

use crate::constants::CA_DESCRIPTOR_TAG;
use crate::error::{DemuxError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    pub tag: u8,
    pub data: Vec<u8>,
}

/// conditional-access descriptor contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaDescriptor {
    pub ca_system_id: u16,
    /// ECM PID in a PMT, EMM PID in a CAT
    pub ca_pid: u16,
}

impl Descriptor {
    pub fn as_ca(&self) -> Option<CaDescriptor> {
        if self.tag != CA_DESCRIPTOR_TAG || self.data.len() < 4 {
            return None;
        }
        Some(CaDescriptor {
            ca_system_id: u16::from_be_bytes([self.data[0], self.data[1]]),
            ca_pid: (((self.data[2] & 0x1F) as u16) << 8) | self.data[3] as u16,
        })
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.tag);
        out.push(self.data.len() as u8);
        out.extend_from_slice(&self.data);
    }
}

pub fn parse_descriptors(mut data: &[u8]) -> Result<Vec<Descriptor>> {
    let mut out = Vec::new();
    while !data.is_empty() {
        if data.len() < 2 {
            return Err(DemuxError::invalid_section("truncated descriptor header"));
        }
        let tag = data[0];
        let len = data[1] as usize;
        if 2 + len > data.len() {
            return Err(DemuxError::invalid_section(format!(
                "descriptor 0x{tag:02X} length {len} overruns loop"
            )));
        }
        out.push(Descriptor { tag, data: data[2..2 + len].to_vec() });
        data = &data[2 + len..];
    }
    Ok(out)
}

pub fn ca_pids(descriptors: &[Descriptor]) -> impl Iterator<Item = u16> + '_ {
    descriptors.iter().filter_map(Descriptor::as_ca).map(|ca| ca.ca_pid)
}
