//! Demultiplexer orchestration
//!
//! Drives the synchronizer, routes packets by PID to section filters or PES
//! reassemblers, applies table changes and feeds the PCR clock. Input is
//! pushed synchronously; every output call happens on the caller's thread.

pub mod output;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, info, trace, warn};

use crate::clock::PcrTracker;
use crate::config::DemuxConfig;
use crate::constants::*;
use crate::error::{DemuxError, Result};
use crate::interfaces::{ByteSource, CaHook, ClockQuery, OutputFactory};
use crate::packet::{CcStatus, TransportPacket};
use crate::pes::PesPacket;
use crate::psi::{PmtSection, TableEvent, TableTracker};
use crate::stats::StatsManager;
use crate::sync::{SyncItem, Synchronizer};
use crate::types::{DemuxState, StreamClass, StreamInfo, StreamType};

pub use output::{ElementaryStreamOutput, Reassembly, StreamState};

pub struct Demuxer<F: OutputFactory> {
    config: DemuxConfig,
    factory: F,
    sync: Synchronizer,
    state: DemuxState,
    tables: TableTracker,
    streams: HashMap<u16, StreamState>,
    outputs: BTreeMap<u16, ElementaryStreamOutput<F::Sink>>,
    /// PIDs of the current PMT that got no output
    declined: HashSet<u16>,
    program: Option<u16>,
    pcr_pid: Option<u16>,
    clock: PcrTracker,
    stats: StatsManager,
    ca_hook: Option<Box<dyn CaHook>>,
    scratch: Vec<u8>,
}

impl<F: OutputFactory> Demuxer<F> {
    pub fn new(config: DemuxConfig, factory: F) -> Result<Self> {
        config.validate()?;
        let mut demuxer = Self {
            sync: Synchronizer::new(&config),
            clock: PcrTracker::new(config.bitrate_smoothing),
            scratch: Vec::new(),
            config,
            factory,
            state: DemuxState::Init,
            tables: TableTracker::new(),
            streams: HashMap::new(),
            outputs: BTreeMap::new(),
            declined: HashSet::new(),
            program: None,
            pcr_pid: None,
            stats: StatsManager::new(),
            ca_hook: None,
        };
        demuxer.track_table(PID_PAT, StreamClass::Pat);
        demuxer.track_table(PID_CAT, StreamClass::Cat);
        Ok(demuxer)
    }

    pub fn set_ca_hook(&mut self, hook: Box<dyn CaHook>) {
        self.ca_hook = Some(hook);
    }

    pub fn state(&self) -> DemuxState {
        self.state
    }

    pub fn config(&self) -> &DemuxConfig {
        &self.config
    }

    pub fn stats(&self) -> &StatsManager {
        &self.stats
    }

    pub fn tables(&self) -> &TableTracker {
        &self.tables
    }

    pub fn clock(&self) -> &PcrTracker {
        &self.clock
    }

    /// Selected program_number once the PAT is known.
    pub fn program(&self) -> Option<u16> {
        self.program
    }

    pub fn packet_size(&self) -> Option<usize> {
        self.sync.packet_size()
    }

    pub fn outputs(&self) -> impl Iterator<Item = &StreamInfo> {
        self.outputs.values().map(|o| o.info())
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut F {
        &mut self.factory
    }

    pub fn into_factory(self) -> F {
        self.factory
    }

    /// Feed the next chunk of the stream.
    pub fn push(&mut self, data: &[u8]) -> Result<()> {
        if self.state == DemuxState::Eos || data.is_empty() {
            return Ok(());
        }
        if self.state == DemuxState::Init {
            self.state = DemuxState::Syncing;
        }
        self.sync.push(data);
        self.drain()
    }

    /// End of input: emit what can still be completed and signal end of
    /// stream on every output.
    pub fn finish(&mut self) -> Result<()> {
        if self.state == DemuxState::Eos {
            return Ok(());
        }
        self.sync.finish();
        let drained = self.drain();
        let never_synced = self.sync.bytes_seen() > 0 && !self.sync.ever_locked();

        let pids: Vec<u16> = self.outputs.keys().copied().collect();
        for pid in pids {
            self.close_output(pid, false)?;
        }
        self.state = DemuxState::Eos;
        drained?;
        if never_synced {
            return Err(DemuxError::NoSync { scanned: self.sync.bytes_seen() });
        }
        info!(
            "end of stream: {} packets, {} access units, {} continuity errors",
            self.stats.demux.packets, self.stats.demux.access_units, self.stats.demux.cc_errors
        );
        Ok(())
    }

    /// Drop all in-flight data; tables and the bitrate estimate survive.
    pub fn flush(&mut self) {
        self.reset_for_flush(None);
    }

    /// Map `time` to a byte offset and flush. The caller repositions its
    /// input to the returned offset before pushing more data.
    pub fn seek(&mut self, time: Duration) -> Result<u64> {
        let offset = self.clock.offset_for_time(time).ok_or(DemuxError::SeekUnavailable)?;
        info!("seek to {:.3}s, estimated offset {offset}", time.as_secs_f64());
        self.reset_for_flush(Some(offset));
        Ok(offset)
    }

    /// Seek a pull source. The demuxer is left untouched when the source
    /// cannot seek.
    pub fn seek_source<S: ByteSource>(&mut self, source: &mut S, time: Duration) -> Result<u64> {
        let offset = self.clock.offset_for_time(time).ok_or(DemuxError::SeekUnavailable)?;
        if !source.seek_to(offset)? {
            return Err(DemuxError::SeekUnavailable);
        }
        self.seek(time)
    }

    /// Read and process one chunk. Returns `false` at end of input.
    pub fn pump<S: ByteSource>(&mut self, source: &mut S) -> Result<bool> {
        if self.config.read_chunk_size < MAX_PACKET_SIZE {
            return Err(DemuxError::BufferTooSmall(self.config.read_chunk_size));
        }
        let mut buf = std::mem::take(&mut self.scratch);
        buf.resize(self.config.read_chunk_size, 0);
        let n = source.read(&mut buf)?;
        let result = self.push(&buf[..n]);
        self.scratch = buf;
        result.map(|_| n > 0)
    }

    /// Pull the whole source through the demuxer and finish.
    pub fn run<S: ByteSource>(&mut self, source: &mut S) -> Result<()> {
        while self.pump(source)? {}
        self.finish()
    }

    fn reset_for_flush(&mut self, offset: Option<u64>) {
        debug!("flushing demuxer state");
        self.state = DemuxState::Flushing;
        self.sync.flush(offset);
        for stream in self.streams.values_mut() {
            stream.reset();
        }
        for output in self.outputs.values_mut() {
            output.mark_discontinuity();
        }
        self.tables.discard_partial();
        self.clock.discontinuity();
    }

    fn drain(&mut self) -> Result<()> {
        loop {
            let item = self.sync.next_item();
            self.stats.demux.bytes = self.sync.bytes_seen();
            self.stats.demux.resyncs = self.sync.resyncs();
            self.stats.demux.invalid_packets = self.sync.invalid_packets();
            match item? {
                None => return Ok(()),
                Some(SyncItem::Locked { packet_size, offset }) => {
                    debug!("locked on {packet_size}-byte packets at offset {offset}");
                    self.clock.set_packet_size(packet_size);
                    self.state = self.settled_state();
                }
                Some(SyncItem::Lost { offset }) => {
                    debug!("discontinuity on all PIDs after sync loss at {offset}");
                    for stream in self.streams.values_mut() {
                        stream.cc.reset();
                        stream.discontinuity();
                    }
                    self.clock.discontinuity();
                }
                Some(SyncItem::Packet(packet)) => self.handle_packet(packet)?,
            }
        }
    }

    fn settled_state(&self) -> DemuxState {
        if self.tables.pat().is_none() {
            DemuxState::PatPending
        } else if self.outputs.is_empty() {
            DemuxState::PmtPending
        } else {
            DemuxState::Streaming
        }
    }

    fn handle_packet(&mut self, packet: TransportPacket) -> Result<()> {
        let header = packet.header;
        let pid = header.pid;
        let payload_len = packet.payload().map_or(0, |p| p.len());
        self.stats.record_packet(pid, payload_len, header.is_scrambled());

        if header.transport_error {
            self.stats.demux.transport_errors += 1;
            if !self.config.tolerate_transport_errors {
                trace!("PID 0x{pid:04X}: transport_error_indicator set, packet dropped");
                return Ok(());
            }
        }
        if pid == PID_NULL {
            return Ok(());
        }

        if Some(pid) == self.pcr_pid {
            if packet.discontinuity_indicator() {
                self.clock.discontinuity();
            }
            if let Some(pcr) = packet.pcr() {
                self.clock.observe(pcr.to_27mhz(), packet.offset);
            }
        }

        let Some(stream) = self.streams.get_mut(&pid) else {
            return Ok(());
        };
        match stream.cc.check(header.continuity_counter, header.has_payload(), packet.discontinuity_indicator()) {
            CcStatus::Duplicate => {
                trace!("PID 0x{pid:04X}: duplicate packet dropped");
                self.stats.record_duplicate(pid);
                return Ok(());
            }
            CcStatus::Discontinuity { expected, actual } => {
                debug!("PID 0x{pid:04X}: continuity counter {actual}, expected {expected}");
                stream.discontinuity();
                self.stats.record_cc_error(pid);
            }
            CcStatus::First | CcStatus::Ok => {}
        }

        let Some(payload) = packet.payload() else {
            return Ok(());
        };
        let mut descrambled = None;
        if header.is_scrambled() {
            if let Some(hook) = self.ca_hook.as_mut() {
                let mut buf = payload.to_vec();
                if hook.descramble(pid, header.scrambling_control, &mut buf) {
                    descrambled = Some(buf);
                }
            }
        }
        let payload = descrambled.as_deref().unwrap_or(payload);

        let Some(stream) = self.streams.get_mut(&pid) else {
            return Ok(());
        };
        let class = stream.class;
        match &mut stream.reassembly {
            Reassembly::Sections(filter) => {
                let sections = filter.push(payload, header.payload_unit_start);
                self.stats.demux.crc_errors += std::mem::take(&mut filter.crc_errors);
                self.stats.demux.truncated_sections += std::mem::take(&mut filter.truncated);
                self.stats.demux.malformed_sections += std::mem::take(&mut filter.malformed);
                for section in sections {
                    self.handle_section(pid, class, section)?;
                }
            }
            Reassembly::Pes(pes) => {
                let units = pes.push(payload, header.payload_unit_start, packet.random_access(), packet.offset);
                self.stats.demux.pes_overflows += std::mem::take(&mut pes.overflows);
                self.stats.demux.pes_dropped += std::mem::take(&mut pes.dropped);
                self.stats.demux.pes_invalid += std::mem::take(&mut pes.invalid);
                for unit in units {
                    self.deliver(pid, unit)?;
                }
            }
        }
        Ok(())
    }

    fn deliver(&mut self, pid: u16, unit: PesPacket) -> Result<()> {
        let Some(output) = self.outputs.get_mut(&pid) else {
            return Ok(());
        };
        self.stats.record_access_unit(pid, unit.header.pts);
        output.deliver(unit, self.clock.first_pcr())?;
        Ok(())
    }

    fn handle_section(&mut self, pid: u16, class: StreamClass, section: Bytes) -> Result<()> {
        match class {
            StreamClass::Ecm | StreamClass::Emm => {
                if let Some(hook) = self.ca_hook.as_mut() {
                    hook.on_ca_section(pid, class, &section);
                }
                Ok(())
            }
            StreamClass::Pat | StreamClass::Pmt | StreamClass::Cat => {
                let events = self.tables.handle_section(pid, &section);
                self.stats.demux.malformed_sections += std::mem::take(&mut self.tables.malformed);
                self.stats.demux.table_version_changes += std::mem::take(&mut self.tables.version_changes);
                for event in events {
                    self.apply_event(event)?;
                }
                Ok(())
            }
            StreamClass::Pes => Ok(()),
        }
    }

    fn apply_event(&mut self, event: TableEvent) -> Result<()> {
        match event {
            TableEvent::PatChanged { current, .. } => {
                let pmt_pids: HashSet<u16> = current.programs.iter().map(|p| p.pmt_pid).collect();
                let stale: Vec<u16> = self
                    .streams
                    .values()
                    .filter(|s| s.class == StreamClass::Pmt && !pmt_pids.contains(&s.pid))
                    .map(|s| s.pid)
                    .collect();
                for pid in stale {
                    self.untrack(pid);
                }
                for pid in pmt_pids {
                    if !self.streams.contains_key(&pid) {
                        self.track_table(pid, StreamClass::Pmt);
                    }
                }

                let selected = self.tables.select_program(self.config.program_number);
                if selected != self.program {
                    if let Some(old) = self.program {
                        info!("program {old} no longer selected");
                        self.teardown_program()?;
                    }
                    self.program = selected;
                    match selected {
                        Some(program) => info!("selected program {program}"),
                        None => warn!("requested program {:?} not in PAT", self.config.program_number),
                    }
                }
                if let Some(pmt) = self.program.and_then(|p| self.tables.pmt(p)).cloned() {
                    self.apply_pmt(&pmt)?;
                }
                if !matches!(self.state, DemuxState::Syncing | DemuxState::Flushing) {
                    self.state = self.settled_state();
                }
            }
            TableEvent::PmtChanged { current, .. } => {
                if Some(current.program_number) == self.program {
                    self.apply_pmt(&current)?;
                }
            }
            TableEvent::CatChanged { current, .. } => {
                let emm: HashSet<u16> = current.emm_pids().into_iter().collect();
                self.retrack(StreamClass::Emm, &emm);
            }
        }
        Ok(())
    }

    /// Bring outputs in line with the selected program's PMT. Streams whose
    /// PID and type are unchanged keep flowing.
    fn apply_pmt(&mut self, pmt: &PmtSection) -> Result<()> {
        if self.pcr_pid != Some(pmt.pcr_pid) {
            if self.pcr_pid.is_some() {
                info!("PCR PID changed to 0x{:04X}, restarting clock", pmt.pcr_pid);
                self.restart_clock();
            }
            self.pcr_pid = Some(pmt.pcr_pid);
        }

        let wanted: HashMap<u16, StreamType> =
            pmt.streams.iter().map(|s| (s.elementary_pid, StreamType::from_u8(s.stream_type))).collect();
        let removed: Vec<u16> = self
            .outputs
            .iter()
            .filter(|(pid, output)| wanted.get(pid) != Some(&output.info().stream_type))
            .map(|(pid, _)| *pid)
            .collect();
        for pid in removed {
            self.close_output(pid, true)?;
        }
        self.declined.retain(|pid| wanted.contains_key(pid));

        // before outputs, so a PID that stopped carrying ECMs is free again
        let ecm: HashSet<u16> = pmt.ecm_pids().into_iter().collect();
        self.retrack(StreamClass::Ecm, &ecm);

        for stream in &pmt.streams {
            let pid = stream.elementary_pid;
            if self.outputs.contains_key(&pid) || self.declined.contains(&pid) {
                continue;
            }
            let stream_type = StreamType::from_u8(stream.stream_type);
            if !stream_type.is_supported() {
                debug!("PID 0x{pid:04X}: stream_type 0x{:02X} not supported", stream.stream_type);
                self.stats.demux.unsupported_streams += 1;
                self.declined.insert(pid);
                continue;
            }
            if self.streams.get(&pid).is_some_and(|s| s.class != StreamClass::Pes) {
                warn!("PID 0x{pid:04X} already carries tables, stream ignored");
                self.declined.insert(pid);
                continue;
            }
            let info = StreamInfo {
                pid,
                program_number: pmt.program_number,
                stream_type,
                pcr_pid: pmt.pcr_pid,
                ecm_pids: stream.ecm_pids(),
            };
            match self.factory.create_output(&info) {
                Some(sink) => {
                    info!("output for PID 0x{pid:04X} ({})", stream_type.codec_name());
                    self.streams.insert(pid, StreamState::pes(pid, &self.config));
                    self.stats.add_stream(pid, StreamClass::Pes);
                    self.outputs.insert(pid, ElementaryStreamOutput::new(info, sink));
                }
                None => {
                    debug!("PID 0x{pid:04X}: output declined");
                    self.stats.demux.unsupported_streams += 1;
                    self.declined.insert(pid);
                }
            }
        }

        if !matches!(self.state, DemuxState::Syncing | DemuxState::Flushing) {
            self.state = self.settled_state();
        }
        Ok(())
    }

    /// Flush, signal end of stream and drop the output on `pid`.
    fn close_output(&mut self, pid: u16, untrack: bool) -> Result<()> {
        let pending = match self.streams.get_mut(&pid).map(|s| &mut s.reassembly) {
            Some(Reassembly::Pes(pes)) => {
                let unit = pes.flush_eos();
                self.stats.demux.pes_dropped += std::mem::take(&mut pes.dropped);
                self.stats.demux.pes_invalid += std::mem::take(&mut pes.invalid);
                unit
            }
            _ => None,
        };
        if let Some(unit) = pending {
            self.deliver(pid, unit)?;
        }
        if untrack {
            self.untrack(pid);
            if let Some(mut output) = self.outputs.remove(&pid) {
                info!("output for PID 0x{pid:04X} removed");
                output.end_of_stream()?;
            }
        } else if let Some(output) = self.outputs.get_mut(&pid) {
            output.end_of_stream()?;
        }
        Ok(())
    }

    fn teardown_program(&mut self) -> Result<()> {
        let pids: Vec<u16> = self.outputs.keys().copied().collect();
        for pid in pids {
            self.close_output(pid, true)?;
        }
        self.retrack(StreamClass::Ecm, &HashSet::new());
        self.declined.clear();
        self.pcr_pid = None;
        self.restart_clock();
        Ok(())
    }

    /// Fresh PCR timeline for a new clock source; the packet stride is kept.
    fn restart_clock(&mut self) {
        self.clock = PcrTracker::new(self.config.bitrate_smoothing);
        if let Some(size) = self.sync.packet_size() {
            self.clock.set_packet_size(size);
        }
    }

    /// Make the tracked PIDs of `class` exactly `pids`.
    fn retrack(&mut self, class: StreamClass, pids: &HashSet<u16>) {
        let stale: Vec<u16> = self
            .streams
            .values()
            .filter(|s| s.class == class && !pids.contains(&s.pid))
            .map(|s| s.pid)
            .collect();
        for pid in stale {
            self.untrack(pid);
        }
        for &pid in pids {
            if !self.streams.contains_key(&pid) {
                self.track_table(pid, class);
            }
        }
    }

    fn track_table(&mut self, pid: u16, class: StreamClass) {
        debug!("tracking PID 0x{pid:04X} as {class:?}");
        self.streams.insert(pid, StreamState::table(pid, class, self.config.check_crc));
        self.stats.add_stream(pid, class);
    }

    fn untrack(&mut self, pid: u16) {
        if self.streams.remove(&pid).is_some() {
            debug!("PID 0x{pid:04X} no longer tracked");
        }
    }
}

impl<F: OutputFactory> ClockQuery for Demuxer<F> {
    fn duration(&self) -> Option<Duration> {
        self.clock.duration()
    }

    fn time_for_offset(&self, offset: u64) -> Option<Duration> {
        self.clock.time_for_offset(offset)
    }

    fn offset_for_time(&self, time: Duration) -> Option<u64> {
        self.clock.offset_for_time(time)
    }
}
