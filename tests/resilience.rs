mod common;

use common::*;
use tsdemux::{DemuxConfig, DemuxState, Demuxer};

fn demuxer() -> Demuxer<RecorderFactory> {
    Demuxer::new(DemuxConfig::default(), RecorderFactory::default()).unwrap()
}

fn round(ts: &mut TsBuilder, i: u64) {
    let video = pes_bytes(0xE0, Some(i * 3600), &vec![i as u8; 400], false);
    ts.pes(VIDEO_PID, &video, Some(i * 3600 * 300), false);
    let audio = pes_bytes(0xC0, Some(i * 1920), &vec![0xA0 | i as u8; 200], true);
    ts.pes(AUDIO_PID, &audio, None, false);
}

#[test]
fn test_recovers_from_corruption() {
    let mut ts = TsBuilder::new();
    let junk: Vec<u8> = (0..1000u32).map(|i| (i * 7 + 3) as u8).collect();
    ts.raw(&junk);
    ts.pat(0, &[(1, PMT_PID)]);
    ts.pmt(&pmt(1, 0, VIDEO_PID, &[(0x02, VIDEO_PID), (0x0F, AUDIO_PID)]));
    for i in 0..12 {
        match i {
            4 => {
                let mut bad = pmt(1, 1, VIDEO_PID, &[(0x02, VIDEO_PID)]).to_section();
                bad[12] ^= 0xFF;
                ts.section(PMT_PID, &bad);
            }
            6 => ts.raw(&[0u8; 100]),
            8 => ts.skip_cc(AUDIO_PID, 2),
            _ => {}
        }
        round(&mut ts, i);
    }

    let mut demux = demuxer();
    demux.push(ts.bytes()).unwrap();
    assert_eq!(demux.state(), DemuxState::Streaming);
    demux.finish().unwrap();

    let stats = &demux.stats().demux;
    assert_eq!(stats.crc_errors, 1);
    assert_eq!(stats.resyncs, 1);
    assert_eq!(stats.cc_errors, 1);
    assert_eq!(demux.stats().get(AUDIO_PID).unwrap().cc_errors, 1);
    // the corrupted PMT revision never applied
    assert_eq!(demux.tables().pmt(1).unwrap().version, 0);
    assert_eq!(demux.outputs().count(), 2);

    let log = demux.factory().log.borrow();
    let video = &log[&VIDEO_PID].units;
    assert_eq!(video.len(), 12);
    let flagged: Vec<usize> = video.iter().enumerate().filter(|(_, u)| u.discontinuity).map(|(i, _)| i).collect();
    // unit 5 was still open when sync was lost
    assert_eq!(flagged, vec![5]);
    assert_eq!(&video[5].payload[..], &[5u8; 400][..]);

    let audio = &log[&AUDIO_PID].units;
    assert_eq!(audio.len(), 12);
    let flagged: Vec<usize> = audio.iter().enumerate().filter(|(_, u)| u.discontinuity).map(|(i, _)| i).collect();
    assert_eq!(flagged, vec![6, 8]);
}

#[test]
fn test_error_and_duplicate_packets() {
    let mut ts = TsBuilder::new();
    ts.pat(0, &[(1, PMT_PID)]);
    ts.pmt(&pmt(1, 0, VIDEO_PID, &[(0x02, VIDEO_PID), (0x0F, AUDIO_PID)]));
    let mut tei_at = 0;
    for i in 0..6 {
        if i == 3 {
            // audio of this round starts in the next packet
            tei_at = ts.len() + 188 * 3;
        }
        round(&mut ts, i);
        if i == 1 {
            let last = ts.bytes()[ts.len() - 188..].to_vec();
            ts.raw(&last);
        }
    }
    let mut data = ts.into_bytes();
    assert_eq!(data[tei_at], 0x47);
    assert_eq!(data[tei_at + 2], AUDIO_PID as u8);
    data[tei_at + 1] |= 0x80;

    let mut demux = demuxer();
    demux.push(&data).unwrap();
    demux.finish().unwrap();

    let stats = &demux.stats().demux;
    assert_eq!(stats.transport_errors, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(stats.cc_errors, 1);

    let log = demux.factory().log.borrow();
    assert_eq!(log[&VIDEO_PID].units.len(), 6);
    let audio = &log[&AUDIO_PID].units;
    // the unit whose first packet was damaged is lost, the next one is flagged
    assert_eq!(audio.len(), 5);
    let pts: Vec<u64> = audio.iter().map(|u| u.pts.unwrap()).collect();
    assert_eq!(pts, vec![0, 1920, 2 * 1920, 4 * 1920, 5 * 1920]);
    assert!(audio[3].discontinuity);
    assert_eq!(audio[1].payload.len(), 200);
}

#[test]
fn test_oversized_unit_is_skipped() {
    let config = DemuxConfig { max_pes_buffer: 4096, min_pes_buffer: 1024, ..Default::default() };
    let mut demux = Demuxer::new(config, RecorderFactory::default()).unwrap();

    let mut ts = TsBuilder::new();
    ts.pat(0, &[(1, PMT_PID)]);
    ts.pmt(&pmt(1, 0, VIDEO_PID, &[(0x1B, VIDEO_PID)]));
    for i in 0..4u64 {
        let size = if i == 1 { 10_000 } else { 1000 };
        let pes = pes_bytes(0xE0, Some(i * 3600), &vec![i as u8; size], false);
        ts.pes(VIDEO_PID, &pes, Some(i * 3600 * 300), false);
    }
    demux.push(ts.bytes()).unwrap();
    demux.finish().unwrap();

    assert_eq!(demux.stats().demux.pes_overflows, 1);
    let log = demux.factory().log.borrow();
    let units = &log[&VIDEO_PID].units;
    let pts: Vec<u64> = units.iter().map(|u| u.pts.unwrap()).collect();
    assert_eq!(pts, vec![0, 2 * 3600, 3 * 3600]);
    assert!(units[1].discontinuity);
    assert!(!units[2].discontinuity);
}

#[test]
fn test_signalled_discontinuity_is_not_an_error() {
    let mut ts = TsBuilder::new();
    ts.pat(0, &[(1, PMT_PID)]);
    ts.pmt(&pmt(1, 0, VIDEO_PID, &[(0x02, VIDEO_PID)]));
    let shift = 60 * 27_000_000;
    for i in 0..10u64 {
        let mut pcr = i * 3600 * 300;
        if i >= 5 {
            pcr += shift;
        }
        if i == 5 {
            ts.skip_cc(VIDEO_PID, 4);
            ts.discontinuity_indicator = true;
        }
        let video = pes_bytes(0xE0, Some(i * 3600), &vec![i as u8; 400], false);
        ts.pes(VIDEO_PID, &video, Some(pcr), false);
    }

    let mut demux = demuxer();
    demux.push(ts.bytes()).unwrap();
    demux.finish().unwrap();

    assert_eq!(demux.stats().demux.cc_errors, 0);
    let clock = &demux.clock().stats;
    assert_eq!(clock.gaps, 0);
    assert_eq!(clock.jitter, 0);
    assert_eq!(clock.samples, 10);

    let log = demux.factory().log.borrow();
    let video = &log[&VIDEO_PID].units;
    assert_eq!(video.len(), 10);
    assert!(video.iter().all(|u| !u.discontinuity));
    assert_eq!(&video[5].payload[..], &[5u8; 400][..]);
}

#[test]
fn test_unsignalled_counter_jump_is_an_error() {
    let mut ts = TsBuilder::new();
    ts.pat(0, &[(1, PMT_PID)]);
    ts.pmt(&pmt(1, 0, VIDEO_PID, &[(0x02, VIDEO_PID)]));
    for i in 0..10u64 {
        if i == 5 {
            ts.skip_cc(VIDEO_PID, 4);
        }
        let video = pes_bytes(0xE0, Some(i * 3600), &vec![i as u8; 400], false);
        ts.pes(VIDEO_PID, &video, Some(i * 3600 * 300), false);
    }

    let mut demux = demuxer();
    demux.push(ts.bytes()).unwrap();
    demux.finish().unwrap();

    assert_eq!(demux.stats().demux.cc_errors, 1);
    let log = demux.factory().log.borrow();
    let video = &log[&VIDEO_PID].units;
    assert_eq!(video.len(), 10);
    // the gap lands inside unit 4, which was still open
    let flagged: Vec<usize> = video.iter().enumerate().filter(|(_, u)| u.discontinuity).map(|(i, _)| i).collect();
    assert_eq!(flagged, vec![4]);
}
