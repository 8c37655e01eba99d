//! Program table tracker: version-aware PAT / PMT / CAT state.
//!
//! Sections of one table version are collected until every section_number
//! up to last_section_number is present. A complete table whose version
//! differs from the active one replaces it and yields a [`TableEvent`].
//! Tables with current_next_indicator = 0 are kept aside and never applied.

use std::collections::{BTreeMap, HashMap};

use log::{debug, info, warn};

use crate::constants::*;
use crate::error::{DemuxError, Result};
use crate::psi::cat::{parse_cat, CatSection};
use crate::psi::pat::{parse_pat, PatSection};
use crate::psi::pmt::{parse_pmt, PmtSection};
use crate::psi::section::SectionReader;

#[derive(Debug, Clone, PartialEq)]
pub enum TableEvent {
    PatChanged { previous: Option<PatSection>, current: PatSection },
    PmtChanged { pmt_pid: u16, previous: Option<PmtSection>, current: PmtSection },
    CatChanged { previous: Option<CatSection>, current: CatSection },
}

/// Sections of a single table version being collected.
#[derive(Debug)]
struct SectionSet<T> {
    version: Option<u8>,
    current_next: bool,
    last_section: u8,
    parts: BTreeMap<u8, T>,
}

impl<T> Default for SectionSet<T> {
    fn default() -> Self {
        Self { version: None, current_next: true, last_section: 0, parts: BTreeMap::new() }
    }
}

impl<T> SectionSet<T> {
    /// Returns every part once the set is complete.
    fn offer(&mut self, version: u8, current_next: bool, number: u8, last: u8, part: T) -> Result<Option<Vec<T>>> {
        let same_version = self.version == Some(version) && self.current_next == current_next;
        if same_version && !self.parts.is_empty() && self.last_section != last {
            self.parts.clear();
            self.version = None;
            return Err(DemuxError::invalid_section(format!(
                "last_section_number changed from {} to {last} within version {version}",
                self.last_section
            )));
        }
        if !same_version {
            self.parts.clear();
            self.version = Some(version);
            self.current_next = current_next;
        }
        self.last_section = last;
        self.parts.insert(number, part);
        if self.parts.len() == last as usize + 1 {
            let parts = std::mem::take(&mut self.parts);
            return Ok(Some(parts.into_values().collect()));
        }
        Ok(None)
    }

    fn clear(&mut self) {
        self.parts.clear();
        self.version = None;
    }
}

#[derive(Debug, Default)]
pub struct TableTracker {
    pat: Option<PatSection>,
    pat_next: Option<PatSection>,
    pat_parts: SectionSet<PatSection>,
    /// program_number → (pmt_pid, table)
    pmts: BTreeMap<u16, (u16, PmtSection)>,
    pmt_next: HashMap<u16, PmtSection>,
    pmt_parts: HashMap<(u16, u16), SectionSet<PmtSection>>,
    cat: Option<CatSection>,
    cat_next: Option<CatSection>,
    cat_parts: SectionSet<CatSection>,
    pub version_changes: u64,
    pub malformed: u64,
}

impl TableTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pat(&self) -> Option<&PatSection> {
        self.pat.as_ref()
    }

    /// Parsed but not yet applicable PAT (current_next_indicator = 0).
    pub fn next_pat(&self) -> Option<&PatSection> {
        self.pat_next.as_ref()
    }

    pub fn pmt(&self, program_number: u16) -> Option<&PmtSection> {
        self.pmts.get(&program_number).map(|(_, pmt)| pmt)
    }

    pub fn next_pmt(&self, program_number: u16) -> Option<&PmtSection> {
        self.pmt_next.get(&program_number)
    }

    pub fn pmts(&self) -> impl Iterator<Item = (u16, &PmtSection)> {
        self.pmts.values().map(|(pid, pmt)| (*pid, pmt))
    }

    pub fn cat(&self) -> Option<&CatSection> {
        self.cat.as_ref()
    }

    pub fn is_pmt_pid(&self, pid: u16) -> bool {
        self.pat.as_ref().is_some_and(|pat| pat.is_pmt_pid(pid))
    }

    /// Requested program if present, else the lowest program_number.
    pub fn select_program(&self, requested: Option<u16>) -> Option<u16> {
        let pat = self.pat.as_ref()?;
        match requested {
            Some(pn) => pat.pmt_pid(pn).map(|_| pn),
            None => pat.lowest_program(),
        }
    }

    /// Drop partially collected multi-section tables; applied tables stay.
    pub fn discard_partial(&mut self) {
        self.pat_parts.clear();
        self.pmt_parts.clear();
        self.cat_parts.clear();
    }

    /// Consume one CRC-checked section received on `pid`.
    /// Malformed sections are counted and dropped.
    pub fn handle_section(&mut self, pid: u16, section: &[u8]) -> Vec<TableEvent> {
        let result = match (pid, section.first().copied()) {
            (PID_PAT, Some(TABLE_ID_PAT)) => self.on_pat(section),
            (PID_CAT, Some(TABLE_ID_CAT)) => self.on_cat(section),
            (_, Some(TABLE_ID_PMT)) if self.is_pmt_pid(pid) => self.on_pmt(pid, section),
            (_, Some(table_id)) => {
                debug!("PID 0x{pid:04X}: ignoring table_id 0x{table_id:02X}");
                Ok(None)
            }
            (_, None) => Ok(None),
        };
        match result {
            Ok(event) => event.into_iter().collect(),
            Err(e) => {
                self.malformed += 1;
                warn!("PID 0x{pid:04X}: dropping section: {e}");
                Vec::new()
            }
        }
    }

    fn on_pat(&mut self, section: &[u8]) -> Result<Option<TableEvent>> {
        let part = parse_pat(section)?;
        let Some(parts) = self.pat_parts.offer(part.version, part.current_next, part.section_number, part.last_section, part)? else {
            return Ok(None);
        };
        let Some(pat) = PatSection::merge(parts) else { return Ok(None) };

        if !pat.current_next {
            debug!("PAT version {} held as next", pat.version);
            self.pat_next = Some(pat);
            return Ok(None);
        }
        if self.pat.as_ref().is_some_and(|cur| cur.version == pat.version) {
            return Ok(None);
        }
        if self.pat_next.as_ref().is_some_and(|next| next.version == pat.version) {
            self.pat_next = None;
        }

        info!("PAT version {} with {} program(s)", pat.version, pat.programs.len());
        let previous = self.pat.replace(pat.clone());
        if previous.is_some() {
            self.version_changes += 1;
        }
        // forget PMTs whose program vanished or moved to another PID
        self.pmts.retain(|program, (pmt_pid, _)| pat.pmt_pid(*program) == Some(*pmt_pid));
        self.pmt_next.retain(|program, _| pat.pmt_pid(*program).is_some());
        self.pmt_parts.retain(|(pmt_pid, program), _| pat.pmt_pid(*program) == Some(*pmt_pid));
        Ok(Some(TableEvent::PatChanged { previous, current: pat }))
    }

    fn on_pmt(&mut self, pid: u16, section: &[u8]) -> Result<Option<TableEvent>> {
        let program = SectionReader::new(section)?.table_id_ext;
        if self.pat.as_ref().and_then(|pat| pat.pmt_pid(program)) != Some(pid) {
            debug!("PID 0x{pid:04X}: PMT for program {program} not announced on this PID");
            return Ok(None);
        }
        let part = parse_pmt(section)?;
        let set = self.pmt_parts.entry((pid, program)).or_default();
        let Some(parts) = set.offer(part.version, part.current_next, part.section_number, part.last_section, part)? else {
            return Ok(None);
        };
        let Some(pmt) = PmtSection::merge(parts) else { return Ok(None) };

        if !pmt.current_next {
            debug!("PMT program {program} version {} held as next", pmt.version);
            self.pmt_next.insert(program, pmt);
            return Ok(None);
        }
        if self.pmts.get(&program).is_some_and(|(_, cur)| cur.version == pmt.version) {
            return Ok(None);
        }
        if self.pmt_next.get(&program).is_some_and(|next| next.version == pmt.version) {
            self.pmt_next.remove(&program);
        }

        info!(
            "PMT program {program} version {} on PID 0x{pid:04X}: {} stream(s), PCR PID 0x{:04X}",
            pmt.version,
            pmt.streams.len(),
            pmt.pcr_pid
        );
        let previous = self.pmts.insert(program, (pid, pmt.clone())).map(|(_, p)| p);
        if previous.is_some() {
            self.version_changes += 1;
        }
        Ok(Some(TableEvent::PmtChanged { pmt_pid: pid, previous, current: pmt }))
    }

    fn on_cat(&mut self, section: &[u8]) -> Result<Option<TableEvent>> {
        let part = parse_cat(section)?;
        let Some(parts) = self.cat_parts.offer(part.version, part.current_next, part.section_number, part.last_section, part)? else {
            return Ok(None);
        };
        let Some(cat) = CatSection::merge(parts) else { return Ok(None) };

        if !cat.current_next {
            self.cat_next = Some(cat);
            return Ok(None);
        }
        if self.cat.as_ref().is_some_and(|cur| cur.version == cat.version) {
            return Ok(None);
        }
        self.cat_next = None;
        info!("CAT version {} with {} EMM PID(s)", cat.version, cat.emm_pids().len());
        let previous = self.cat.replace(cat.clone());
        if previous.is_some() {
            self.version_changes += 1;
        }
        Ok(Some(TableEvent::CatChanged { previous, current: cat }))
    }
}
