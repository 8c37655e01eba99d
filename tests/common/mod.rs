//! Synthetic transport stream builder and recording outputs shared by the
//! integration tests.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use tsdemux::packet::Pcr;
use tsdemux::pes::write_timestamp;
use tsdemux::psi::descriptor::Descriptor;
use tsdemux::psi::{PatEntry, PatSection, PmtSection, PmtStream};
use tsdemux::types::{AccessUnit, StreamInfo};
use tsdemux::{OutputFactory, StreamSink};

pub const PMT_PID: u16 = 0x100;
pub const VIDEO_PID: u16 = 0x101;
pub const AUDIO_PID: u16 = 0x102;

pub struct TsBuilder {
    out: Vec<u8>,
    cc: HashMap<u16, u8>,
    packet_size: usize,
    packets: u32,
    /// scrambling_control for the next payload packets
    pub scrambling: u8,
    /// Set discontinuity_indicator on the next packet only
    pub discontinuity_indicator: bool,
}

impl TsBuilder {
    pub fn new() -> Self {
        Self::with_packet_size(188)
    }

    pub fn with_packet_size(packet_size: usize) -> Self {
        Self {
            out: Vec::new(),
            cc: HashMap::new(),
            packet_size,
            packets: 0,
            scrambling: 0,
            discontinuity_indicator: false,
        }
    }

    pub fn len(&self) -> usize {
        self.out.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.out
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    pub fn raw(&mut self, data: &[u8]) {
        self.out.extend_from_slice(data);
    }

    /// Force the next packet on `pid` to skip `n` counter values.
    pub fn skip_cc(&mut self, pid: u16, n: u8) {
        let cc = self.cc.entry(pid).or_insert(0x0F);
        *cc = cc.wrapping_add(n) & 0x0F;
    }

    /// Emit one packet and return how many payload bytes it carried.
    pub fn packet(&mut self, pid: u16, pusi: bool, pcr: Option<u64>, random_access: bool, data: &[u8]) -> usize {
        let discontinuity = std::mem::take(&mut self.discontinuity_indicator);
        let mut af = Vec::new();
        if pcr.is_some() || random_access || discontinuity {
            let mut flags = 0u8;
            if discontinuity {
                flags |= 0x80;
            }
            if random_access {
                flags |= 0x40;
            }
            af.push(flags);
            if let Some(pcr) = pcr {
                af[0] |= 0x10;
                let mut field = [0u8; 6];
                Pcr::from_27mhz(pcr).write(&mut field);
                af.extend_from_slice(&field);
            }
        }
        let room = if af.is_empty() { 184 } else { 183 - af.len() };
        let take = data.len().min(room);
        let afc = if af.is_empty() && take == 184 {
            0x10
        } else {
            // everything after the length byte; stuffing fills the gap
            let af_len = 183 - take;
            if af.is_empty() && af_len > 0 {
                af.push(0x00);
            }
            af.resize(af_len, 0xFF);
            0x30
        };

        let cc = {
            let entry = self.cc.entry(pid).or_insert(0x0F);
            *entry = (*entry + 1) & 0x0F;
            *entry
        };
        let mut p = Vec::with_capacity(188);
        p.push(0x47);
        p.push(((pusi as u8) << 6) | ((pid >> 8) as u8 & 0x1F));
        p.push(pid as u8);
        let scrambling = if pid < 0x20 { 0 } else { self.scrambling };
        p.push((scrambling << 6) | afc | cc);
        if afc == 0x30 {
            p.push(af.len() as u8);
            p.extend_from_slice(&af);
        }
        p.extend_from_slice(&data[..take]);
        assert_eq!(p.len(), 188);
        self.emit(&p);
        take
    }

    /// Adaptation-only packet carrying a PCR; the counter does not advance.
    pub fn pcr_only(&mut self, pid: u16, pcr: u64) {
        let cc = *self.cc.entry(pid).or_insert(0);
        let mut p = vec![0x47, (pid >> 8) as u8 & 0x1F, pid as u8, 0x20 | cc, 183, 0x10];
        let mut field = [0u8; 6];
        Pcr::from_27mhz(pcr).write(&mut field);
        p.extend_from_slice(&field);
        p.resize(188, 0xFF);
        self.emit(&p);
    }

    fn emit(&mut self, packet: &[u8]) {
        if self.packet_size == 192 {
            let ats = self.packets.wrapping_mul(1000) & 0x3FFF_FFFF;
            self.out.extend_from_slice(&ats.to_be_bytes());
        }
        self.out.extend_from_slice(packet);
        if self.packet_size > 192 {
            self.out.resize(self.out.len() + self.packet_size - 188, 0x00);
        }
        self.packets += 1;
    }

    /// Section with pointer_field 0, spread over as many packets as needed.
    pub fn section(&mut self, pid: u16, section: &[u8]) {
        let mut data = vec![0x00];
        data.extend_from_slice(section);
        let mut pos = 0;
        let mut first = true;
        while pos < data.len() {
            pos += self.packet(pid, first, None, false, &data[pos..]);
            first = false;
        }
    }

    /// PES packet split over transport packets; an optional PCR goes into
    /// the first one.
    pub fn pes(&mut self, pid: u16, pes: &[u8], pcr: Option<u64>, random_access: bool) {
        let mut pos = self.packet(pid, true, pcr, random_access, pes);
        while pos < pes.len() {
            pos += self.packet(pid, false, None, false, &pes[pos..]);
        }
    }

    pub fn pat(&mut self, version: u8, programs: &[(u16, u16)]) {
        let section = pat(version, programs).to_section();
        self.section(0, &section);
    }

    pub fn pmt(&mut self, pmt: &PmtSection) {
        let pid = PMT_PID;
        self.section(pid, &pmt.to_section());
    }
}

pub fn pat(version: u8, programs: &[(u16, u16)]) -> PatSection {
    PatSection {
        transport_stream_id: 1,
        version,
        current_next: true,
        section_number: 0,
        last_section: 0,
        programs: programs.iter().map(|&(program_number, pmt_pid)| PatEntry { program_number, pmt_pid }).collect(),
        network_pid: None,
    }
}

pub fn pmt(program: u16, version: u8, pcr_pid: u16, streams: &[(u8, u16)]) -> PmtSection {
    PmtSection {
        program_number: program,
        version,
        current_next: true,
        section_number: 0,
        last_section: 0,
        pcr_pid,
        descriptors: vec![],
        streams: streams
            .iter()
            .map(|&(stream_type, elementary_pid)| PmtStream { stream_type, elementary_pid, descriptors: vec![] })
            .collect(),
    }
}

pub fn ca_descriptor(ca_system_id: u16, ca_pid: u16) -> Descriptor {
    let mut data = ca_system_id.to_be_bytes().to_vec();
    data.push(0xE0 | (ca_pid >> 8) as u8);
    data.push(ca_pid as u8);
    Descriptor { tag: 0x09, data }
}

/// PES packet bytes. `bounded` fills in PES_packet_length, otherwise 0.
pub fn pes_bytes(stream_id: u8, pts: Option<u64>, payload: &[u8], bounded: bool) -> Vec<u8> {
    let mut out = vec![0x00, 0x00, 0x01, stream_id, 0, 0, 0x80, 0x00, 0x00];
    if let Some(pts) = pts {
        out[7] = 0x80;
        out[8] = 5;
        let mut ts = [0u8; 5];
        write_timestamp(pts, 0x2, &mut ts);
        out.extend_from_slice(&ts);
    }
    out.extend_from_slice(payload);
    if bounded {
        let len = (out.len() - 6) as u16;
        out[4..6].copy_from_slice(&len.to_be_bytes());
    }
    out
}

/// Everything one output received.
#[derive(Debug, Default)]
pub struct Recorded {
    pub info: Option<StreamInfo>,
    pub units: Vec<AccessUnit>,
    pub eos: usize,
}

pub type Shared = Rc<RefCell<HashMap<u16, Recorded>>>;

pub struct Recorder {
    pid: u16,
    log: Shared,
}

impl StreamSink for Recorder {
    fn push_access_unit(&mut self, unit: AccessUnit) -> io::Result<()> {
        self.log.borrow_mut().entry(self.pid).or_default().units.push(unit);
        Ok(())
    }

    fn end_of_stream(&mut self) -> io::Result<()> {
        self.log.borrow_mut().entry(self.pid).or_default().eos += 1;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecorderFactory {
    pub log: Shared,
    pub created: Vec<u16>,
    /// PIDs to refuse
    pub decline: Vec<u16>,
}

impl OutputFactory for RecorderFactory {
    type Sink = Recorder;

    fn create_output(&mut self, info: &StreamInfo) -> Option<Recorder> {
        if self.decline.contains(&info.pid) {
            return None;
        }
        self.created.push(info.pid);
        self.log.borrow_mut().entry(info.pid).or_default().info = Some(info.clone());
        Some(Recorder { pid: info.pid, log: self.log.clone() })
    }
}

/// PAT, PMT and `rounds` interleaved video/audio PES, PCR on the video PID.
pub fn two_stream_program(builder: &mut TsBuilder, rounds: u64) {
    builder.pat(0, &[(1, PMT_PID)]);
    builder.pmt(&pmt(1, 0, VIDEO_PID, &[(0x02, VIDEO_PID), (0x0F, AUDIO_PID)]));
    for i in 0..rounds {
        let video = pes_bytes(0xE0, Some(i * 3600), &vec![i as u8; 400], false);
        builder.pes(VIDEO_PID, &video, Some(i * 3600 * 300), i % 5 == 0);
        let audio = pes_bytes(0xC0, Some(i * 1920), &vec![0xA0 | i as u8; 200], true);
        builder.pes(AUDIO_PID, &audio, None, false);
    }
}
