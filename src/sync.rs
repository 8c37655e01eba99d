//! Packet synchronizer: recovers transport packet framing from an arbitrary
//! byte offset and keeps it while the stream stays aligned.
//!
//! Lock requires `min_sync_run` sync bytes at a constant stride, each followed
//! by a legal adaptation_field_control value. Once locked, every packet is
//! re-validated; a failure drops one byte and restarts the same search.

use bytes::{Buf, BytesMut};
use log::{debug, info, warn};

use crate::config::DemuxConfig;
use crate::constants::*;
use crate::error::{DemuxError, Result};
use crate::packet::TransportPacket;

/// What the synchronizer hands to the orchestrator.
#[derive(Debug)]
pub enum SyncItem {
    /// Alignment established at `offset` with the given stride.
    Locked { packet_size: usize, offset: u64 },
    Packet(TransportPacket),
    /// Alignment lost at `offset`; the search restarts transparently.
    Lost { offset: u64 },
}

pub struct Synchronizer {
    buf: BytesMut,
    /// Stream offset of `buf[0]`
    base_offset: u64,
    forced_size: Option<usize>,
    packet_size: Option<usize>,
    locked: bool,
    ever_locked: bool,
    min_run: usize,
    max_resync_bytes: u64,
    /// Bytes discarded since the last lock (or since start)
    skipped: u64,
    pending_arrival: Option<u32>,
    eos: bool,
    bytes_seen: u64,
    resyncs: u64,
    invalid_packets: u64,
}

impl Synchronizer {
    pub fn new(config: &DemuxConfig) -> Self {
        Self {
            buf: BytesMut::with_capacity(config.min_sync_run * MAX_PACKET_SIZE * 2),
            base_offset: 0,
            forced_size: config.forced_packet_size(),
            packet_size: None,
            locked: false,
            ever_locked: false,
            min_run: config.min_sync_run,
            max_resync_bytes: config.max_resync_bytes as u64,
            skipped: 0,
            pending_arrival: None,
            eos: false,
            bytes_seen: 0,
            resyncs: 0,
            invalid_packets: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.bytes_seen += data.len() as u64;
        self.buf.extend_from_slice(data);
    }

    /// No more input will arrive; trailing packets without their stride
    /// padding are released and short candidate runs are accepted.
    pub fn finish(&mut self) {
        self.eos = true;
    }

    /// Drop buffered bytes and alignment, e.g. after a seek to `offset`.
    pub fn flush(&mut self, offset: Option<u64>) {
        match offset {
            Some(offset) => self.base_offset = offset,
            None => self.base_offset += self.buf.len() as u64,
        }
        self.buf.clear();
        self.locked = false;
        self.skipped = 0;
        self.pending_arrival = None;
        self.eos = false;
    }

    pub fn packet_size(&self) -> Option<usize> {
        self.packet_size
    }

    pub fn is_m2ts(&self) -> bool {
        self.packet_size == Some(M2TS_PACKET_SIZE)
    }

    pub fn ever_locked(&self) -> bool {
        self.ever_locked
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    pub fn invalid_packets(&self) -> u64 {
        self.invalid_packets
    }

    pub fn next_item(&mut self) -> Result<Option<SyncItem>> {
        loop {
            if !self.locked {
                return self.try_lock();
            }

            let size = self.packet_size.unwrap_or(TS_PACKET_SIZE);
            if self.buf.len() < TS_PACKET_SIZE || (!self.eos && self.buf.len() < size) {
                return Ok(None);
            }

            if self.buf[0] != TS_SYNC_BYTE || self.buf[3] & 0x30 == 0 {
                let offset = self.base_offset;
                warn!("sync lost at offset {offset}, searching again");
                self.locked = false;
                self.resyncs += 1;
                self.pending_arrival = None;
                self.discard(1);
                return Ok(Some(SyncItem::Lost { offset }));
            }

            let take = size.min(self.buf.len());
            let offset = self.base_offset;
            let unit = self.buf.split_to(take).freeze();
            self.base_offset += take as u64;

            let arrival = self.pending_arrival.take();
            if size == M2TS_PACKET_SIZE && unit.len() == M2TS_PACKET_SIZE {
                self.pending_arrival = Some(arrival_timestamp(&unit[TS_PACKET_SIZE..]));
            }

            match TransportPacket::parse(unit, offset) {
                Ok(mut packet) => {
                    packet.arrival_timestamp = arrival;
                    return Ok(Some(SyncItem::Packet(packet)));
                }
                Err(e) => {
                    self.invalid_packets += 1;
                    debug!("dropping packet at offset {offset}: {e}");
                }
            }
        }
    }

    fn candidate_sizes(&self) -> Vec<usize> {
        if let Some(forced) = self.forced_size {
            return vec![forced];
        }
        let mut sizes = Vec::with_capacity(PACKET_SIZES.len());
        if let Some(known) = self.packet_size {
            sizes.push(known);
        }
        sizes.extend(PACKET_SIZES.iter().copied().filter(|s| Some(*s) != self.packet_size));
        sizes
    }

    /// Check `min_run` candidate packets at `pos` with stride `size`.
    /// `None` means more data is needed before deciding.
    fn aligned_at(&self, pos: usize, size: usize) -> Option<bool> {
        let available = self.buf.len() - pos;
        let fits = if available < 4 { 0 } else { (available - 4) / size + 1 };
        let run = if fits >= self.min_run {
            self.min_run
        } else if self.eos && fits >= 1 && available >= TS_PACKET_SIZE {
            fits
        } else {
            return if self.eos { Some(false) } else { None };
        };
        Some((0..run).all(|k| {
            let at = pos + k * size;
            self.buf[at] == TS_SYNC_BYTE && self.buf[at + 3] & 0x30 != 0
        }))
    }

    fn try_lock(&mut self) -> Result<Option<SyncItem>> {
        let sizes = self.candidate_sizes();
        let mut pos = 0;
        while pos < self.buf.len() {
            if self.buf[pos] != TS_SYNC_BYTE {
                pos += 1;
                continue;
            }
            let mut undecided = false;
            for &size in &sizes {
                match self.aligned_at(pos, size) {
                    Some(true) => return Ok(Some(self.lock(pos, size)?)),
                    Some(false) => {}
                    None => undecided = true,
                }
            }
            if undecided {
                self.discard(pos);
                self.check_resync_budget()?;
                return Ok(None);
            }
            pos += 1;
        }
        let len = self.buf.len();
        self.discard(len);
        self.check_resync_budget()?;
        Ok(None)
    }

    fn lock(&mut self, pos: usize, size: usize) -> Result<SyncItem> {
        self.pending_arrival = if size == M2TS_PACKET_SIZE && pos >= M2TS_PREFIX_SIZE {
            Some(arrival_timestamp(&self.buf[pos - M2TS_PREFIX_SIZE..pos]))
        } else {
            None
        };
        self.discard(pos);
        self.check_resync_budget()?;

        if self.packet_size != Some(size) {
            info!("transport packet size {size} detected at offset {}", self.base_offset);
        } else {
            debug!("re-acquired {size}-byte alignment at offset {}", self.base_offset);
        }
        self.packet_size = Some(size);
        self.locked = true;
        self.ever_locked = true;
        self.skipped = 0;
        Ok(SyncItem::Locked { packet_size: size, offset: self.base_offset })
    }

    fn discard(&mut self, n: usize) {
        self.buf.advance(n);
        self.base_offset += n as u64;
        self.skipped += n as u64;
    }

    fn check_resync_budget(&self) -> Result<()> {
        if self.skipped <= self.max_resync_bytes {
            return Ok(());
        }
        if self.ever_locked {
            Err(DemuxError::SyncLost { skipped: self.skipped })
        } else {
            Err(DemuxError::NoSync { scanned: self.skipped })
        }
    }
}

fn arrival_timestamp(prefix: &[u8]) -> u32 {
    u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) & 0x3FFF_FFFF
}
