mod common;

use std::time::Duration;

use common::*;
use tsdemux::report::Reporter;
use tsdemux::{DemuxConfig, DemuxState, Demuxer};

const PMT2_PID: u16 = 0x200;
const VIDEO2_PID: u16 = 0x201;
const SCTE35_PID: u16 = 0x103;

/// PAT listing programs 2 and 1, both PMTs, then `rounds` of PES on every
/// elementary PID.
fn two_programs(ts: &mut TsBuilder, rounds: u64) {
    ts.pat(0, &[(2, PMT2_PID), (1, PMT_PID)]);
    ts.section(PMT2_PID, &pmt(2, 0, VIDEO2_PID, &[(0x1B, VIDEO2_PID)]).to_section());
    ts.pmt(&pmt(1, 0, VIDEO_PID, &[(0x02, VIDEO_PID), (0x0F, AUDIO_PID), (0x86, SCTE35_PID)]));
    for i in 0..rounds {
        program_round(ts, i);
    }
}

fn program_round(ts: &mut TsBuilder, i: u64) {
    let video = pes_bytes(0xE0, Some(i * 3600), &vec![i as u8; 300], false);
    ts.pes(VIDEO_PID, &video, Some(i * 3600 * 300), false);
    let audio = pes_bytes(0xC0, Some(i * 1920), &[0xA5; 100], true);
    ts.pes(AUDIO_PID, &audio, None, false);
    let other = pes_bytes(0xE0, Some(i * 3000), &[0x11; 250], false);
    ts.pes(VIDEO2_PID, &other, Some(i * 3000 * 300), false);
}

fn run(config: DemuxConfig, factory: RecorderFactory, data: &[u8]) -> Demuxer<RecorderFactory> {
    let mut demux = Demuxer::new(config, factory).unwrap();
    demux.push(data).unwrap();
    demux.finish().unwrap();
    demux
}

#[test]
fn test_lowest_program_selected_by_default() {
    let mut ts = TsBuilder::new();
    two_programs(&mut ts, 4);
    let demux = run(DemuxConfig::default(), RecorderFactory::default(), ts.bytes());

    assert_eq!(demux.program(), Some(1));
    assert!(demux.tables().pmt(2).is_some());
    assert_eq!(demux.factory().created, vec![VIDEO_PID, AUDIO_PID]);
    // SCTE-35 carries sections, not PES
    assert_eq!(demux.stats().demux.unsupported_streams, 1);

    let log = demux.factory().log.borrow();
    assert_eq!(log[&VIDEO_PID].units.len(), 4);
    assert_eq!(log[&AUDIO_PID].units.len(), 4);
    assert!(!log.contains_key(&VIDEO2_PID));
}

#[test]
fn test_requested_program() {
    let mut ts = TsBuilder::new();
    two_programs(&mut ts, 4);
    let config = DemuxConfig { program_number: Some(2), ..Default::default() };
    let demux = run(config, RecorderFactory::default(), ts.bytes());

    assert_eq!(demux.program(), Some(2));
    assert_eq!(demux.factory().created, vec![VIDEO2_PID]);
    let log = demux.factory().log.borrow();
    let units = &log[&VIDEO2_PID].units;
    assert_eq!(units.len(), 4);
    assert_eq!(units[2].pts, Some(6000));
    assert_eq!(log[&VIDEO2_PID].info.as_ref().unwrap().program_number, 2);
}

#[test]
fn test_missing_program_creates_nothing() {
    let mut ts = TsBuilder::new();
    two_programs(&mut ts, 3);
    let config = DemuxConfig { program_number: Some(9), ..Default::default() };
    let mut demux = Demuxer::new(config, RecorderFactory::default()).unwrap();
    demux.push(ts.bytes()).unwrap();
    assert_eq!(demux.program(), None);
    assert_eq!(demux.state(), DemuxState::PmtPending);
    demux.finish().unwrap();
    assert!(demux.factory().created.is_empty());
}

#[test]
fn test_declined_output_is_ignored() {
    let mut ts = TsBuilder::new();
    two_stream_program(&mut ts, 5);
    let factory = RecorderFactory { decline: vec![AUDIO_PID], ..Default::default() };
    let demux = run(DemuxConfig::default(), factory, ts.bytes());

    assert_eq!(demux.factory().created, vec![VIDEO_PID]);
    assert_eq!(demux.stats().demux.unsupported_streams, 1);
    let log = demux.factory().log.borrow();
    assert_eq!(log[&VIDEO_PID].units.len(), 5);
    assert!(!log.contains_key(&AUDIO_PID));
}

#[test]
fn test_pmt_update_removes_stream() {
    let mut ts = TsBuilder::new();
    two_stream_program(&mut ts, 5);
    ts.pmt(&pmt(1, 1, VIDEO_PID, &[(0x02, VIDEO_PID)]));
    for i in 5..10u64 {
        let video = pes_bytes(0xE0, Some(i * 3600), &vec![i as u8; 400], false);
        ts.pes(VIDEO_PID, &video, Some(i * 3600 * 300), false);
        let audio = pes_bytes(0xC0, Some(i * 1920), &[0xA0; 200], true);
        ts.pes(AUDIO_PID, &audio, None, false);
    }

    let mut demux = Demuxer::new(DemuxConfig::default(), RecorderFactory::default()).unwrap();
    demux.push(ts.bytes()).unwrap();
    {
        let log = demux.factory().log.borrow();
        assert_eq!(log[&AUDIO_PID].eos, 1);
        assert_eq!(log[&VIDEO_PID].eos, 0);
    }
    assert_eq!(demux.outputs().map(|o| o.pid).collect::<Vec<_>>(), vec![VIDEO_PID]);
    assert_eq!(demux.tables().pmt(1).unwrap().version, 1);
    assert_eq!(demux.stats().demux.table_version_changes, 1);
    demux.finish().unwrap();

    let log = demux.factory().log.borrow();
    let video = &log[&VIDEO_PID];
    assert_eq!(video.units.len(), 10);
    assert_eq!(video.eos, 1);
    assert!(video.units.iter().all(|u| !u.discontinuity));
    let audio = &log[&AUDIO_PID];
    assert_eq!(audio.units.len(), 5);
    assert_eq!(audio.eos, 1);
}

#[test]
fn test_pat_update_switches_program() {
    let mut ts = TsBuilder::new();
    two_programs(&mut ts, 3);
    ts.pat(1, &[(2, PMT2_PID)]);
    for i in 3..7 {
        program_round(&mut ts, i);
    }

    let demux = run(DemuxConfig::default(), RecorderFactory::default(), ts.bytes());
    assert_eq!(demux.program(), Some(2));
    assert!(demux.tables().pmt(1).is_none());
    assert_eq!(demux.factory().created, vec![VIDEO_PID, AUDIO_PID, VIDEO2_PID]);

    let log = demux.factory().log.borrow();
    assert_eq!(log[&VIDEO_PID].eos, 1);
    assert_eq!(log[&AUDIO_PID].units.len(), 3);
    // the open video unit is flushed when the program goes away
    assert_eq!(log[&VIDEO_PID].units.len(), 3);
    let other = &log[&VIDEO2_PID];
    assert_eq!(other.units.len(), 4);
    assert_eq!(other.units[0].pts, Some(3 * 3000));
    assert_eq!(other.eos, 1);
}

#[test]
fn test_program_switch_restarts_clock() {
    let mut ts = TsBuilder::new();
    ts.pat(0, &[(2, PMT2_PID), (1, PMT_PID)]);
    ts.section(PMT2_PID, &pmt(2, 0, VIDEO2_PID, &[(0x1B, VIDEO2_PID)]).to_section());
    ts.pmt(&pmt(1, 0, VIDEO_PID, &[(0x02, VIDEO_PID)]));
    for i in 0..4u64 {
        let pts = 1_000_000 + i * 3600;
        ts.pes(VIDEO_PID, &pes_bytes(0xE0, Some(pts), &[0x01; 300], false), Some(pts * 300), false);
    }
    // program 2 runs on its own clock, well behind program 1
    ts.pat(1, &[(2, PMT2_PID)]);
    for i in 0..4u64 {
        let pts = 45_000 + i * 3000;
        ts.pes(VIDEO2_PID, &pes_bytes(0xE0, Some(pts), &[0x02; 250], false), Some(pts * 300), false);
    }

    let demux = run(DemuxConfig::default(), RecorderFactory::default(), ts.bytes());
    assert_eq!(demux.program(), Some(2));
    let clock = demux.clock();
    assert_eq!(clock.first_pcr(), Some(45_000 * 300));
    assert_eq!(clock.stats.samples, 4);
    assert_eq!(clock.stats.gaps, 0);
    assert_eq!(clock.stats.jitter, 0);

    let log = demux.factory().log.borrow();
    let units = &log[&VIDEO2_PID].units;
    assert_eq!(units.len(), 4);
    assert_eq!(units[0].timestamp, Some(Duration::ZERO));
    assert_eq!(units[1].timestamp, Some(Duration::from_micros(33_333)));
}

#[test]
fn test_report_lists_programs() {
    let mut ts = TsBuilder::new();
    two_programs(&mut ts, 3);
    let demux = run(DemuxConfig::default(), RecorderFactory::default(), ts.bytes());

    let json: serde_json::Value = serde_json::from_str(&Reporter::generate_json_report(&demux)).unwrap();
    assert_eq!(json["packet_size"], 188);
    assert_eq!(json["transport_stream_id"], 1);
    let programs = json["programs"].as_array().unwrap();
    assert_eq!(programs.len(), 2);
    let program_one = &programs[1];
    assert_eq!(program_one["program"], 1);
    assert_eq!(program_one["selected"], true);
    let outputs: Vec<bool> = program_one["streams"].as_array().unwrap().iter().map(|s| s["output"] == true).collect();
    assert_eq!(outputs, vec![true, true, false]);
    assert_eq!(programs[0]["selected"], false);
    assert_eq!(json["stats"]["unsupported_streams"], 1);
}
