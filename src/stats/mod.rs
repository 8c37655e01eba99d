//! Session and per-PID counters

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::StreamClass;

/// Session wide counters. Every non-fatal anomaly lands in one of these.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DemuxStats {
    pub bytes: u64,
    pub packets: u64,
    pub resyncs: u64,
    /// Packets rejected after lock (bad sync byte or reserved AFC)
    pub invalid_packets: u64,
    pub transport_errors: u64,
    pub cc_errors: u64,
    pub duplicates: u64,
    pub crc_errors: u64,
    pub truncated_sections: u64,
    pub malformed_sections: u64,
    pub pes_overflows: u64,
    pub pes_dropped: u64,
    pub pes_invalid: u64,
    pub scrambled_packets: u64,
    pub table_version_changes: u64,
    pub unsupported_streams: u64,
    pub access_units: u64,
}

/// Counters for one tracked PID.
#[derive(Debug, Clone, Serialize)]
pub struct StreamStats {
    pub class: StreamClass,
    pub packets: u64,
    pub payload_bytes: u64,
    pub cc_errors: u64,
    pub duplicates: u64,
    pub scrambled: u64,
    pub access_units: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_pts: Option<u64>,
}

impl StreamStats {
    fn new(class: StreamClass) -> Self {
        Self {
            class,
            packets: 0,
            payload_bytes: 0,
            cc_errors: 0,
            duplicates: 0,
            scrambled: 0,
            access_units: 0,
            last_pts: None,
        }
    }
}

/// Owns the session counters and the per-PID table.
#[derive(Debug, Default)]
pub struct StatsManager {
    pub demux: DemuxStats,
    streams: BTreeMap<u16, StreamStats>,
}

impl StatsManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a PID; an existing entry keeps its counters.
    pub fn add_stream(&mut self, pid: u16, class: StreamClass) -> &mut StreamStats {
        let entry = self.streams.entry(pid).or_insert_with(|| StreamStats::new(class));
        entry.class = class;
        entry
    }

    pub fn get(&self, pid: u16) -> Option<&StreamStats> {
        self.streams.get(&pid)
    }

    pub fn record_packet(&mut self, pid: u16, payload_len: usize, scrambled: bool) {
        self.demux.packets += 1;
        if scrambled {
            self.demux.scrambled_packets += 1;
        }
        if let Some(s) = self.streams.get_mut(&pid) {
            s.packets += 1;
            s.payload_bytes += payload_len as u64;
            if scrambled {
                s.scrambled += 1;
            }
        }
    }

    pub fn record_cc_error(&mut self, pid: u16) {
        self.demux.cc_errors += 1;
        if let Some(s) = self.streams.get_mut(&pid) {
            s.cc_errors += 1;
        }
    }

    pub fn record_duplicate(&mut self, pid: u16) {
        self.demux.duplicates += 1;
        if let Some(s) = self.streams.get_mut(&pid) {
            s.duplicates += 1;
        }
    }

    pub fn record_access_unit(&mut self, pid: u16, pts: Option<u64>) {
        self.demux.access_units += 1;
        if let Some(s) = self.streams.get_mut(&pid) {
            s.access_units += 1;
            if pts.is_some() {
                s.last_pts = pts;
            }
        }
    }

    pub fn streams(&self) -> &BTreeMap<u16, StreamStats> {
        &self.streams
    }
}
