//! JSON session summary

use std::collections::BTreeMap;

use serde::Serialize;

use crate::clock::ClockStats;
use crate::interfaces::{ClockQuery, OutputFactory};
use crate::processor::Demuxer;
use crate::stats::{DemuxStats, StreamStats};
use crate::types::DemuxState;

/// Elementary stream entry of a program
#[derive(Debug, Clone, Serialize)]
pub struct EsReport {
    pub pid: u16,
    pub stream_type: u8,
    pub codec: &'static str,
    /// An output was created for this stream
    pub output: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ecm_pids: Vec<u16>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgramReport {
    pub program: u16,
    pub pmt_pid: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pcr_pid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmt_version: Option<u8>,
    pub selected: bool,
    pub streams: Vec<EsReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DemuxReport {
    pub timestamp: String,
    pub state: DemuxState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packet_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_stream_id: Option<u16>,
    pub programs: Vec<ProgramReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate_bps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    pub stats: DemuxStats,
    pub clock: ClockStats,
    pub pids: BTreeMap<u16, StreamStats>,
}

/// Report generator for a demuxer session
pub struct Reporter;

impl Reporter {
    pub fn create_report<F: OutputFactory>(demuxer: &Demuxer<F>) -> DemuxReport {
        let tables = demuxer.tables();
        let outputs: BTreeMap<u16, _> = demuxer.outputs().map(|info| (info.pid, info)).collect();

        let mut programs = Vec::new();
        if let Some(pat) = tables.pat() {
            for entry in &pat.programs {
                let pmt = tables.pmt(entry.program_number);
                let streams = pmt
                    .map(|pmt| {
                        pmt.streams
                            .iter()
                            .map(|s| EsReport {
                                pid: s.elementary_pid,
                                stream_type: s.stream_type,
                                codec: crate::types::StreamType::from_u8(s.stream_type).codec_name(),
                                output: outputs.contains_key(&s.elementary_pid)
                                    && demuxer.program() == Some(entry.program_number),
                                ecm_pids: s.ecm_pids(),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                programs.push(ProgramReport {
                    program: entry.program_number,
                    pmt_pid: entry.pmt_pid,
                    pcr_pid: pmt.map(|p| p.pcr_pid),
                    pmt_version: pmt.map(|p| p.version),
                    selected: demuxer.program() == Some(entry.program_number),
                    streams,
                });
            }
        }

        DemuxReport {
            timestamp: chrono::Utc::now().to_rfc3339(),
            state: demuxer.state(),
            packet_size: demuxer.packet_size(),
            transport_stream_id: tables.pat().map(|p| p.transport_stream_id),
            programs,
            bitrate_bps: demuxer.clock().bitrate().map(|b| b * 8.0),
            duration_secs: demuxer.duration().map(|d| d.as_secs_f64()),
            stats: demuxer.stats().demux.clone(),
            clock: demuxer.clock().stats.clone(),
            pids: demuxer.stats().streams().clone(),
        }
    }

    /// Pretty-printed JSON for the CLI
    pub fn generate_json_report<F: OutputFactory>(demuxer: &Demuxer<F>) -> String {
        let report = Self::create_report(demuxer);
        serde_json::to_string_pretty(&report)
            .unwrap_or_else(|_| "{\"error\": \"JSON serialization failed\"}".to_string())
    }
}
