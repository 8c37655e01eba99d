//! PCR tracking and bitrate estimation.
//!
//! PCR values are unwrapped into a monotonic 27 MHz timeline. Successive
//! samples at least 10 ms apart yield a bytes-per-second estimate that is
//! exponentially smoothed; seeking and duration are derived from it and
//! are estimates only.

use std::time::Duration;

use log::{debug, trace};
use serde::Serialize;

use crate::constants::*;
use crate::interfaces::ClockQuery;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ClockStats {
    pub samples: u64,
    pub wraps: u64,
    /// Small backward steps ignored as jitter
    pub jitter: u64,
    /// Jumps of more than ten seconds either way, treated as clock restarts
    pub gaps: u64,
}

#[derive(Debug, Clone)]
pub struct PcrTracker {
    first_pcr: Option<u64>,
    first_offset: u64,
    last_raw: Option<u64>,
    last_pcr: Option<u64>,
    last_offset: u64,
    pcr_adjust: u64,
    /// Unwrapped PCR and offset the next bitrate sample is measured from
    anchor: Option<(u64, u64)>,
    /// Clock time skipped by discontinuities, excluded from the duration
    skipped: u64,
    bitrate: Option<f64>,
    smoothing: f64,
    packet_size: usize,
    pub stats: ClockStats,
}

impl PcrTracker {
    pub fn new(smoothing: f64) -> Self {
        Self {
            first_pcr: None,
            first_offset: 0,
            last_raw: None,
            last_pcr: None,
            last_offset: 0,
            pcr_adjust: 0,
            anchor: None,
            skipped: 0,
            bitrate: None,
            smoothing,
            packet_size: TS_PACKET_SIZE,
            stats: ClockStats::default(),
        }
    }

    pub fn set_packet_size(&mut self, size: usize) {
        self.packet_size = size;
    }

    /// Record a PCR (27 MHz ticks) seen in the packet at `offset`.
    /// Returns the unwrapped value, or `None` when the sample was
    /// rejected as jitter.
    ///
    /// A backward step too large to be jitter but too small to be a wrap
    /// is an unsignalled clock restart: the timeline is rebased so it
    /// continues from the last value and tracking resumes.
    pub fn observe(&mut self, pcr: u64, offset: u64) -> Option<u64> {
        let pcr = pcr % PCR_WRAP;
        if let Some(last) = self.last_raw {
            if pcr < last {
                if last - pcr > PCR_WRAP / 2 {
                    self.pcr_adjust += PCR_WRAP;
                    self.stats.wraps += 1;
                    debug!("PCR wrap at offset {offset}, adjust now {}", self.pcr_adjust);
                } else if last - pcr > PCR_MAX_GAP {
                    self.stats.gaps += 1;
                    debug!("PCR restarted {:.3}s back at offset {offset}", (last - pcr) as f64 / PCR_CLOCK_HZ as f64);
                    self.pcr_adjust += last - pcr;
                    self.anchor = None;
                } else {
                    self.stats.jitter += 1;
                    trace!("PCR stepped back by {} ticks at offset {offset}", last - pcr);
                    return None;
                }
            } else if pcr - last > PCR_WRAP / 2 {
                // a late sample from before the last wrap
                self.stats.jitter += 1;
                return None;
            }
        }
        self.last_raw = Some(pcr);
        let corrected = pcr + self.pcr_adjust;
        self.stats.samples += 1;

        if self.first_pcr.is_none() {
            self.first_pcr = Some(corrected);
            self.first_offset = offset;
        }
        self.last_pcr = Some(self.last_pcr.map_or(corrected, |last| last.max(corrected)));
        self.last_offset = self.last_offset.max(offset);

        match self.anchor {
            Some((anchor_pcr, anchor_offset)) => {
                let delta = corrected.saturating_sub(anchor_pcr);
                if delta > PCR_MAX_GAP {
                    self.stats.gaps += 1;
                    self.skipped += delta;
                    debug!("PCR jumped {:.3}s at offset {offset}", delta as f64 / PCR_CLOCK_HZ as f64);
                    self.anchor = Some((corrected, offset));
                } else if delta >= PCR_MIN_INTERVAL && offset > anchor_offset {
                    let sample = (offset - anchor_offset) as f64 * PCR_CLOCK_HZ as f64 / delta as f64;
                    self.bitrate = Some(match self.bitrate {
                        Some(prev) => prev + self.smoothing * (sample - prev),
                        None => sample,
                    });
                    self.anchor = Some((corrected, offset));
                }
            }
            None => self.anchor = Some((corrected, offset)),
        }
        Some(corrected)
    }

    /// Forget the sample anchor after a discontinuity_indicator or a seek;
    /// the next PCR starts a new measurement interval.
    pub fn discontinuity(&mut self) {
        self.anchor = None;
        self.last_raw = None;
    }

    /// Smoothed bitrate in bytes per second.
    pub fn bitrate(&self) -> Option<f64> {
        self.bitrate
    }

    pub fn pcr_adjust(&self) -> u64 {
        self.pcr_adjust
    }

    pub fn first_pcr(&self) -> Option<u64> {
        self.first_pcr
    }

    pub fn last_pcr(&self) -> Option<u64> {
        self.last_pcr
    }
}

impl ClockQuery for PcrTracker {
    fn duration(&self) -> Option<Duration> {
        let span = self.last_pcr?.saturating_sub(self.first_pcr?).saturating_sub(self.skipped);
        Some(Duration::from_nanos(span * 1_000 / 27))
    }

    fn time_for_offset(&self, offset: u64) -> Option<Duration> {
        let bitrate = self.bitrate?;
        let bytes = offset.saturating_sub(self.first_offset);
        Some(Duration::from_secs_f64(bytes as f64 / bitrate))
    }

    /// `None` without a bitrate or when the target lies beyond any
    /// addressable byte offset.
    fn offset_for_time(&self, time: Duration) -> Option<u64> {
        let bitrate = self.bitrate?;
        let bytes = time.as_secs_f64() * bitrate;
        if !bytes.is_finite() || bytes >= u64::MAX as f64 {
            return None;
        }
        let raw = self.first_offset.checked_add(bytes as u64)?;
        let stride = self.packet_size as u64;
        Some(raw - raw % stride)
    }
}
