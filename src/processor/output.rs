//! Per-PID demultiplexing state and elementary stream outputs.

use std::io;
use std::time::Duration;

use log::trace;

use crate::config::DemuxConfig;
use crate::constants::*;
use crate::interfaces::StreamSink;
use crate::packet::ContinuityCounter;
use crate::pes::{PesPacket, PesReassembler};
use crate::psi::SectionFilter;
use crate::types::{AccessUnit, StreamClass, StreamInfo};

pub enum Reassembly {
    Sections(SectionFilter),
    Pes(PesReassembler),
}

/// Everything tracked for one PID the demultiplexer listens to.
pub struct StreamState {
    pub pid: u16,
    pub class: StreamClass,
    pub cc: ContinuityCounter,
    pub reassembly: Reassembly,
}

impl StreamState {
    /// Section carrying PID. ECM and EMM sections use the private form.
    pub fn table(pid: u16, class: StreamClass, check_crc: bool) -> Self {
        let filter = match class {
            StreamClass::Ecm | StreamClass::Emm => SectionFilter::private(pid, check_crc),
            _ => SectionFilter::psi(pid, check_crc),
        };
        Self { pid, class, cc: ContinuityCounter::default(), reassembly: Reassembly::Sections(filter) }
    }

    pub fn pes(pid: u16, config: &DemuxConfig) -> Self {
        Self {
            pid,
            class: StreamClass::Pes,
            cc: ContinuityCounter::default(),
            reassembly: Reassembly::Pes(PesReassembler::new(pid, config.min_pes_buffer, config.max_pes_buffer)),
        }
    }

    /// Data was lost on this PID.
    pub fn discontinuity(&mut self) {
        match &mut self.reassembly {
            Reassembly::Sections(filter) => filter.discontinuity(),
            Reassembly::Pes(pes) => pes.mark_discontinuity(),
        }
    }

    /// Flush: drop buffers and the continuity expectation.
    pub fn reset(&mut self) {
        self.cc.reset();
        match &mut self.reassembly {
            Reassembly::Sections(filter) => filter.reset(),
            Reassembly::Pes(pes) => pes.reset(),
        }
    }
}

/// Unwraps 33-bit PTS/DTS values into a monotonic 90 kHz timeline.
#[derive(Debug, Default, Clone)]
struct PtsUnwrapper {
    adjust: u64,
    last: Option<u64>,
}

impl PtsUnwrapper {
    fn unwrap(&mut self, pts: u64, reference: Option<u64>) -> u64 {
        if let Some(reference) = self.last.or(reference) {
            let current = pts + self.adjust;
            if current + PTS_WRAP / 2 < reference {
                self.adjust += PTS_WRAP;
            } else if current > reference + PTS_WRAP / 2 && self.adjust >= PTS_WRAP {
                self.adjust -= PTS_WRAP;
            }
        }
        let value = pts + self.adjust;
        self.last = Some(value);
        value
    }
}

/// Output for one elementary PID: owns the sink and the stream's time base.
pub struct ElementaryStreamOutput<S> {
    info: StreamInfo,
    sink: S,
    /// 90 kHz origin that timestamps are reported against
    time_base: Option<u64>,
    pts: PtsUnwrapper,
    pending_discontinuity: bool,
    eos: bool,
}

impl<S: StreamSink> ElementaryStreamOutput<S> {
    pub fn new(info: StreamInfo, sink: S) -> Self {
        Self { info, sink, time_base: None, pts: PtsUnwrapper::default(), pending_discontinuity: false, eos: false }
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn time_base(&self) -> Option<u64> {
        self.time_base
    }

    /// The next access unit will carry the discontinuity flag.
    pub fn mark_discontinuity(&mut self) {
        self.pending_discontinuity = true;
    }

    /// Deliver a closed PES packet. `first_pcr` is the program's first
    /// unwrapped PCR in 27 MHz ticks, if one has been seen.
    pub fn deliver(&mut self, packet: PesPacket, first_pcr: Option<u64>) -> io::Result<()> {
        if self.eos {
            return Ok(());
        }
        let header = packet.header;
        if self.time_base.is_none() {
            self.time_base = first_pcr.map(|pcr| pcr / 300).or(header.pts);
        }
        let timestamp = header.pts.map(|pts| {
            let unwrapped = self.pts.unwrap(pts, self.time_base);
            let ticks = unwrapped.saturating_sub(self.time_base.unwrap_or(unwrapped));
            Duration::from_micros(ticks * 1_000_000 / PTS_CLOCK_HZ)
        });
        let discontinuity = packet.discontinuity || std::mem::take(&mut self.pending_discontinuity);
        trace!("PID 0x{:04X}: access unit {:?} ({} bytes)", self.info.pid, timestamp, packet.payload.len());

        self.sink.push_access_unit(AccessUnit {
            pid: self.info.pid,
            stream_id: header.stream_id,
            stream_type: self.info.stream_type,
            pts: header.pts,
            dts: header.dts,
            timestamp,
            payload: packet.payload,
            discontinuity,
            random_access: packet.random_access,
            offset: packet.offset,
        })
    }

    /// Signal end of stream once; later calls are no-ops.
    pub fn end_of_stream(&mut self) -> io::Result<()> {
        if self.eos {
            return Ok(());
        }
        self.eos = true;
        self.sink.end_of_stream()
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
