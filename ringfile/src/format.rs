//! On-disk layout of a ringfile database.
//!
//! The file is a strict sequence of fixed-size sections:
//!
//! ```text
//! [ stat head ]
//! [ ds def    * ds_cnt ]
//! [ rra def   * rra_cnt ]
//! [ live head ]                 (a bare 8-byte timestamp before version 3)
//! [ pdp prep  * ds_cnt ]
//! [ cdp prep  * rra_cnt * ds_cnt ]
//! [ rra ptr   * rra_cnt ]
//! [ value area, one ring of f64 rows per archive ]
//! ```
//!
//! All numeric fields use native byte order; an 8-byte float sentinel in
//! the stat head detects files written by an incompatible architecture.
//! Section byte offsets match the classic RRD file layout on LP64
//! targets, including struct tail padding.

use crate::error::{Error, ErrorKind, Result};

pub const COOKIE: &[u8; 4] = b"RRD\0";
pub const VERSION_3: &str = "0003";
pub const VERSION_4: &str = "0004";
pub const MAX_VERSION: u32 = 4;
pub const FLOAT_COOKIE: f64 = 8.642135e130;

pub const DS_NAME_SIZE: usize = 20;
pub const DST_SIZE: usize = 20;
pub const CF_NAME_SIZE: usize = 20;
pub const LAST_DS_LEN: usize = 30;
pub const MAX_RRA_PAR: usize = 10;
pub const MAX_CDP_PAR: usize = 10;
pub const MAX_FAILURES_WINDOW_LEN: u64 = 28;

/// Smoothing runs are suppressed for this many passes over a seasonal
/// ring while the coefficients burn in.
pub const BURNIN_CYCLES: u64 = 3;

/// Parameter slot indices of a non-COMPUTE DS definition.
pub mod ds_param {
    /// Minimum required heartbeat, seconds (integer slot).
    pub const MRHB: usize = 0;
    pub const MIN: usize = 1;
    pub const MAX: usize = 2;
    /// COMPUTE programs start at slot 0 and may use all ten slots.
    pub const CDEF: usize = 0;
}

/// Parameter slot indices of an RRA definition. The HW family aliases
/// the same slots with CF-specific meanings.
pub mod rra_param {
    pub const XFF: usize = 0;
    pub const HW_ALPHA: usize = 1;
    pub const HW_BETA: usize = 2;
    pub const DEP_IDX: usize = 3;
    pub const SEASONAL_GAMMA: usize = 1;
    pub const SEASONAL_SMOOTHING_WINDOW: usize = 2;
    pub const SEASONAL_SMOOTH_IDX: usize = 4;
    pub const DELTA_POS: usize = 1;
    pub const DELTA_NEG: usize = 2;
    pub const WINDOW_LEN: usize = 4;
    pub const FAILURE_THRESHOLD: usize = 5;
}

/// Scratch slot indices of a PDP prep area.
pub mod pdp_param {
    /// Seconds of the running PDP window known to be unknown (integer).
    pub const UNKN_SEC_CNT: usize = 0;
    /// Accumulated rate * seconds over the running window (float).
    pub const VAL: usize = 1;
}

/// Scratch slot indices of a CDP prep area. Slots 2..=7 are aliased by
/// the Holt-Winters family.
pub mod cdp_param {
    pub const VAL: usize = 0;
    pub const UNKN_PDP_CNT: usize = 1;
    pub const HW_INTERCEPT: usize = 2;
    pub const HW_LAST_INTERCEPT: usize = 3;
    pub const HW_SLOPE: usize = 4;
    pub const HW_LAST_SLOPE: usize = 5;
    pub const NULL_COUNT: usize = 6;
    pub const LAST_NULL_COUNT: usize = 7;
    pub const PRIMARY: usize = 8;
    pub const SECONDARY: usize = 9;

    pub const HW_SEASONAL: usize = HW_INTERCEPT;
    pub const HW_LAST_SEASONAL: usize = HW_LAST_INTERCEPT;
    pub const SEASONAL_DEVIATION: usize = HW_INTERCEPT;
    pub const LAST_SEASONAL_DEVIATION: usize = HW_LAST_INTERCEPT;
    /// Burn-in counter; > [`super::BURNIN_CYCLES`] arms scheduled smoothing.
    pub const INIT_SEASONAL: usize = NULL_COUNT;
}

/// One 8-byte slot holding either an integer count or an IEEE double.
/// Both views pun the same bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Unival(u64);

impl Unival {
    pub fn from_cnt(v: u64) -> Self {
        Unival(v)
    }

    pub fn from_val(v: f64) -> Self {
        Unival(v.to_bits())
    }

    pub fn from_bits(bits: u64) -> Self {
        Unival(bits)
    }

    pub fn cnt(self) -> u64 {
        self.0
    }

    pub fn val(self) -> f64 {
        f64::from_bits(self.0)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn set_cnt(&mut self, v: u64) {
        self.0 = v;
    }

    pub fn set_val(&mut self, v: f64) {
        self.0 = v.to_bits();
    }
}

/// The five data source types, in their stable on-disk tag order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DsType {
    Counter,
    Absolute,
    Gauge,
    Derive,
    Compute,
}

impl DsType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "COUNTER" => Some(DsType::Counter),
            "ABSOLUTE" => Some(DsType::Absolute),
            "GAUGE" => Some(DsType::Gauge),
            "DERIVE" => Some(DsType::Derive),
            "COMPUTE" => Some(DsType::Compute),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DsType::Counter => "COUNTER",
            DsType::Absolute => "ABSOLUTE",
            DsType::Gauge => "GAUGE",
            DsType::Derive => "DERIVE",
            DsType::Compute => "COMPUTE",
        }
    }
}

/// Consolidation functions. New entries go at the end; files spell the
/// CF out by name but dependency indices assume a stable order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consolidation {
    Average,
    Minimum,
    Maximum,
    Last,
    HwPredict,
    Seasonal,
    DevPredict,
    DevSeasonal,
    Failures,
    MhwPredict,
}

impl Consolidation {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "AVERAGE" => Some(Consolidation::Average),
            "MIN" => Some(Consolidation::Minimum),
            "MAX" => Some(Consolidation::Maximum),
            "LAST" => Some(Consolidation::Last),
            "HWPREDICT" => Some(Consolidation::HwPredict),
            "SEASONAL" => Some(Consolidation::Seasonal),
            "DEVPREDICT" => Some(Consolidation::DevPredict),
            "DEVSEASONAL" => Some(Consolidation::DevSeasonal),
            "FAILURES" => Some(Consolidation::Failures),
            "MHWPREDICT" => Some(Consolidation::MhwPredict),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Consolidation::Average => "AVERAGE",
            Consolidation::Minimum => "MIN",
            Consolidation::Maximum => "MAX",
            Consolidation::Last => "LAST",
            Consolidation::HwPredict => "HWPREDICT",
            Consolidation::Seasonal => "SEASONAL",
            Consolidation::DevPredict => "DEVPREDICT",
            Consolidation::DevSeasonal => "DEVSEASONAL",
            Consolidation::Failures => "FAILURES",
            Consolidation::MhwPredict => "MHWPREDICT",
        }
    }

    /// The plain consolidating CFs; everything else is aberrant-behaviour
    /// machinery with one PDP per row.
    pub fn is_plain(self) -> bool {
        matches!(
            self,
            Consolidation::Average
                | Consolidation::Minimum
                | Consolidation::Maximum
                | Consolidation::Last
        )
    }
}

fn get_u64(buf: &[u8], off: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[off..off + 8]);
    u64::from_ne_bytes(raw)
}

fn put_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_ne_bytes());
}

fn get_i64(buf: &[u8], off: usize) -> i64 {
    get_u64(buf, off) as i64
}

fn put_i64(buf: &mut [u8], off: usize, v: i64) {
    put_u64(buf, off, v as u64);
}

fn get_par<const N: usize>(buf: &[u8], off: usize) -> [Unival; N] {
    let mut par = [Unival::default(); N];
    for (i, slot) in par.iter_mut().enumerate() {
        *slot = Unival::from_bits(get_u64(buf, off + i * 8));
    }
    par
}

fn put_par(buf: &mut [u8], off: usize, par: &[Unival]) {
    for (i, slot) in par.iter().enumerate() {
        put_u64(buf, off + i * 8, slot.bits());
    }
}

/// Read a NUL-padded fixed-width ASCII field.
fn get_name(buf: &[u8], off: usize, width: usize) -> String {
    let raw = &buf[off..off + width];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(width);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn put_name(buf: &mut [u8], off: usize, width: usize, name: &str) {
    let field = &mut buf[off..off + width];
    field.fill(0);
    let bytes = name.as_bytes();
    let n = bytes.len().min(width - 1);
    field[..n].copy_from_slice(&bytes[..n]);
}

/// Static header: identification, geometry counters, global parameters.
#[derive(Debug, Clone)]
pub struct StatHead {
    pub version: String,
    pub ds_cnt: u64,
    pub rra_cnt: u64,
    pub pdp_step: u64,
    pub par: [Unival; 10],
}

impl StatHead {
    pub const SIZE: usize = 128;

    const VERSION_OFF: usize = 4;
    const FLOAT_COOKIE_OFF: usize = 16;
    const DS_CNT_OFF: usize = 24;
    const RRA_CNT_OFF: usize = 32;
    const PDP_STEP_OFF: usize = 40;
    const PAR_OFF: usize = 48;

    pub fn new(pdp_step: u64) -> Self {
        StatHead {
            version: VERSION_3.to_string(),
            ds_cnt: 0,
            rra_cnt: 0,
            pdp_step,
            par: [Unival::default(); 10],
        }
    }

    pub fn version_num(&self) -> u32 {
        self.version.parse().unwrap_or(0)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if &buf[0..4] != COOKIE {
            return Err(Error::new(ErrorKind::BadMagic));
        }
        let float_bits = get_u64(buf, Self::FLOAT_COOKIE_OFF);
        if float_bits != FLOAT_COOKIE.to_bits() {
            return Err(Error::new(ErrorKind::WrongArchitecture));
        }
        let version = get_name(buf, Self::VERSION_OFF, 5);
        let head = StatHead {
            version,
            ds_cnt: get_u64(buf, Self::DS_CNT_OFF),
            rra_cnt: get_u64(buf, Self::RRA_CNT_OFF),
            pdp_step: get_u64(buf, Self::PDP_STEP_OFF),
            par: get_par(buf, Self::PAR_OFF),
        };
        if head.version_num() > MAX_VERSION {
            return Err(Error::with_detail(
                ErrorKind::UnsupportedVersion,
                head.version.clone(),
            ));
        }
        Ok(head)
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[..Self::SIZE].fill(0);
        buf[0..4].copy_from_slice(COOKIE);
        put_name(buf, Self::VERSION_OFF, 5, &self.version);
        put_u64(buf, Self::FLOAT_COOKIE_OFF, FLOAT_COOKIE.to_bits());
        put_u64(buf, Self::DS_CNT_OFF, self.ds_cnt);
        put_u64(buf, Self::RRA_CNT_OFF, self.rra_cnt);
        put_u64(buf, Self::PDP_STEP_OFF, self.pdp_step);
        put_par(buf, Self::PAR_OFF, &self.par);
    }
}

/// One data source definition.
#[derive(Debug, Clone)]
pub struct DsDef {
    pub name: String,
    pub dst: String,
    pub par: [Unival; 10],
}

impl DsDef {
    pub const SIZE: usize = 120;

    const DST_OFF: usize = 20;
    const PAR_OFF: usize = 40;

    pub fn ds_type(&self) -> Result<DsType> {
        DsType::parse(&self.dst)
            .ok_or_else(|| Error::with_detail(ErrorKind::UnknownDsType, self.dst.clone()))
    }

    pub fn heartbeat(&self) -> u64 {
        self.par[ds_param::MRHB].cnt()
    }

    pub fn min(&self) -> f64 {
        self.par[ds_param::MIN].val()
    }

    pub fn max(&self) -> f64 {
        self.par[ds_param::MAX].val()
    }

    pub fn decode(buf: &[u8]) -> Self {
        DsDef {
            name: get_name(buf, 0, DS_NAME_SIZE),
            dst: get_name(buf, Self::DST_OFF, DST_SIZE),
            par: get_par(buf, Self::PAR_OFF),
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[..Self::SIZE].fill(0);
        put_name(buf, 0, DS_NAME_SIZE, &self.name);
        put_name(buf, Self::DST_OFF, DST_SIZE, &self.dst);
        put_par(buf, Self::PAR_OFF, &self.par);
    }
}

/// One round-robin archive definition.
#[derive(Debug, Clone)]
pub struct RraDef {
    pub cf_name: String,
    pub row_cnt: u64,
    pub pdp_cnt: u64,
    pub par: [Unival; MAX_RRA_PAR],
}

impl RraDef {
    pub const SIZE: usize = 120;

    const ROW_CNT_OFF: usize = 24;
    const PDP_CNT_OFF: usize = 32;
    const PAR_OFF: usize = 40;

    pub fn new(cf: Consolidation) -> Self {
        RraDef {
            cf_name: cf.name().to_string(),
            row_cnt: 0,
            pdp_cnt: 1,
            par: [Unival::default(); MAX_RRA_PAR],
        }
    }

    pub fn cf(&self) -> Result<Consolidation> {
        Consolidation::parse(&self.cf_name)
            .ok_or_else(|| Error::with_detail(ErrorKind::UnknownConsolidation, self.cf_name.clone()))
    }

    pub fn xff(&self) -> f64 {
        self.par[rra_param::XFF].val()
    }

    pub fn decode(buf: &[u8]) -> Self {
        RraDef {
            cf_name: get_name(buf, 0, CF_NAME_SIZE),
            row_cnt: get_u64(buf, Self::ROW_CNT_OFF),
            pdp_cnt: get_u64(buf, Self::PDP_CNT_OFF),
            par: get_par(buf, Self::PAR_OFF),
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[..Self::SIZE].fill(0);
        put_name(buf, 0, CF_NAME_SIZE, &self.cf_name);
        put_u64(buf, Self::ROW_CNT_OFF, self.row_cnt);
        put_u64(buf, Self::PDP_CNT_OFF, self.pdp_cnt);
        put_par(buf, Self::PAR_OFF, &self.par);
    }
}

/// Live header: timestamp of the most recent accepted update.
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveHead {
    pub last_up: i64,
    /// Microsecond remainder, always in `0..1_000_000`.
    pub last_up_usec: i64,
}

impl LiveHead {
    pub const SIZE: usize = 16;
    /// Before version 3 the live section is a bare seconds field.
    pub const LEGACY_SIZE: usize = 8;

    pub fn decode(buf: &[u8]) -> Self {
        LiveHead {
            last_up: get_i64(buf, 0),
            last_up_usec: get_i64(buf, 8),
        }
    }

    pub fn decode_legacy(buf: &[u8]) -> Self {
        LiveHead {
            last_up: get_i64(buf, 0),
            last_up_usec: 0,
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        put_i64(buf, 0, self.last_up);
        put_i64(buf, 8, self.last_up_usec);
    }

    pub fn encode_legacy(&self, buf: &mut [u8]) {
        put_i64(buf, 0, self.last_up);
    }
}

/// Per-DS staging area for the primary data point in progress.
#[derive(Debug, Clone)]
pub struct PdpPrep {
    /// Previous raw reading in ASCII; `"U"` when unknown. Kept textual
    /// so counters wider than an f64 mantissa survive differencing.
    pub last_ds: String,
    pub scratch: [Unival; 10],
}

impl PdpPrep {
    pub const SIZE: usize = 112;

    const SCRATCH_OFF: usize = 32;

    pub fn new() -> Self {
        PdpPrep {
            last_ds: "U".to_string(),
            scratch: [Unival::default(); 10],
        }
    }

    pub fn set_last_ds(&mut self, reading: &str) {
        let mut s = reading;
        // 29 bytes of payload plus the NUL of the fixed field.
        while s.len() > LAST_DS_LEN - 1 {
            let mut cut = s.len() - 1;
            while !s.is_char_boundary(cut) {
                cut -= 1;
            }
            s = &s[..cut];
        }
        self.last_ds = s.to_string();
    }

    pub fn decode(buf: &[u8]) -> Self {
        PdpPrep {
            last_ds: get_name(buf, 0, LAST_DS_LEN),
            scratch: get_par(buf, Self::SCRATCH_OFF),
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        buf[..Self::SIZE].fill(0);
        put_name(buf, 0, LAST_DS_LEN, &self.last_ds);
        put_par(buf, Self::SCRATCH_OFF, &self.scratch);
    }
}

impl Default for PdpPrep {
    fn default() -> Self {
        PdpPrep::new()
    }
}

/// Per-(RRA, DS) staging area for the consolidated data point in
/// progress. The FAILURES CF views the same memory as a byte array of
/// violation flags, one byte per window position.
#[derive(Debug, Clone, Copy, Default)]
pub struct CdpPrep {
    pub scratch: [Unival; MAX_CDP_PAR],
}

impl CdpPrep {
    pub const SIZE: usize = 80;

    pub fn violation(&self, idx: usize) -> u8 {
        (self.scratch[idx / 8].bits() >> ((idx % 8) * 8)) as u8
    }

    pub fn set_violation(&mut self, idx: usize, flag: u8) {
        let shift = (idx % 8) * 8;
        let slot = &mut self.scratch[idx / 8];
        let bits = (slot.bits() & !(0xffu64 << shift)) | ((flag as u64) << shift);
        *slot = Unival::from_bits(bits);
    }

    pub fn decode(buf: &[u8]) -> Self {
        CdpPrep {
            scratch: get_par(buf, 0),
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        put_par(buf, 0, &self.scratch);
    }
}

/// Ring pointer: zero-based index of the last written row of one RRA.
#[derive(Debug, Clone, Copy, Default)]
pub struct RraPtr {
    pub cur_row: u64,
}

impl RraPtr {
    pub const SIZE: usize = 8;

    pub fn decode(buf: &[u8]) -> Self {
        RraPtr {
            cur_row: get_u64(buf, 0),
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        put_u64(buf, 0, self.cur_row);
    }
}

pub const VALUE_SIZE: usize = 8;

pub fn decode_value(buf: &[u8]) -> f64 {
    f64::from_bits(get_u64(buf, 0))
}

pub fn encode_value(buf: &mut [u8], v: f64) {
    put_u64(buf, 0, v.to_bits());
}

/// The complete in-memory model of one database, owning every header
/// section. The value area stays on disk and is accessed through
/// [`crate::file::RrdFile`] at offsets computed here.
#[derive(Debug, Clone)]
pub struct Rrd {
    pub stat_head: StatHead,
    pub ds_def: Vec<DsDef>,
    pub rra_def: Vec<RraDef>,
    pub live_head: LiveHead,
    pub pdp_prep: Vec<PdpPrep>,
    pub cdp_prep: Vec<CdpPrep>,
    pub rra_ptr: Vec<RraPtr>,
}

impl Rrd {
    /// Decode all header sections from the start of a mapped file.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut off = 0usize;
        let take = |off: &mut usize, wanted: usize| -> Result<usize> {
            if *off + wanted > data.len() {
                return Err(Error::new(ErrorKind::ShortRead));
            }
            let at = *off;
            *off += wanted;
            Ok(at)
        };

        let at = take(&mut off, StatHead::SIZE)?;
        let stat_head = StatHead::decode(&data[at..])?;
        let version = stat_head.version_num();

        let mut ds_def = Vec::with_capacity(stat_head.ds_cnt as usize);
        for _ in 0..stat_head.ds_cnt {
            let at = take(&mut off, DsDef::SIZE)?;
            ds_def.push(DsDef::decode(&data[at..]));
        }

        let mut rra_def = Vec::with_capacity(stat_head.rra_cnt as usize);
        for _ in 0..stat_head.rra_cnt {
            let at = take(&mut off, RraDef::SIZE)?;
            rra_def.push(RraDef::decode(&data[at..]));
        }

        let live_head = if version < 3 {
            let at = take(&mut off, LiveHead::LEGACY_SIZE)?;
            LiveHead::decode_legacy(&data[at..])
        } else {
            let at = take(&mut off, LiveHead::SIZE)?;
            LiveHead::decode(&data[at..])
        };

        let mut pdp_prep = Vec::with_capacity(stat_head.ds_cnt as usize);
        for _ in 0..stat_head.ds_cnt {
            let at = take(&mut off, PdpPrep::SIZE)?;
            pdp_prep.push(PdpPrep::decode(&data[at..]));
        }

        let cdp_cnt = stat_head.rra_cnt * stat_head.ds_cnt;
        let mut cdp_prep = Vec::with_capacity(cdp_cnt as usize);
        for _ in 0..cdp_cnt {
            let at = take(&mut off, CdpPrep::SIZE)?;
            cdp_prep.push(CdpPrep::decode(&data[at..]));
        }

        let mut rra_ptr = Vec::with_capacity(stat_head.rra_cnt as usize);
        for _ in 0..stat_head.rra_cnt {
            let at = take(&mut off, RraPtr::SIZE)?;
            rra_ptr.push(RraPtr::decode(&data[at..]));
        }

        let rrd = Rrd {
            stat_head,
            ds_def,
            rra_def,
            live_head,
            pdp_prep,
            cdp_prep,
            rra_ptr,
        };

        if rrd.total_size() > data.len() as u64 {
            return Err(Error::new(ErrorKind::FileTooShort));
        }
        Ok(rrd)
    }

    pub fn version(&self) -> u32 {
        self.stat_head.version_num()
    }

    fn live_head_size(&self) -> u64 {
        if self.version() < 3 {
            LiveHead::LEGACY_SIZE as u64
        } else {
            LiveHead::SIZE as u64
        }
    }

    pub fn live_head_offset(&self) -> u64 {
        StatHead::SIZE as u64
            + DsDef::SIZE as u64 * self.stat_head.ds_cnt
            + RraDef::SIZE as u64 * self.stat_head.rra_cnt
    }

    pub fn pdp_prep_offset(&self) -> u64 {
        self.live_head_offset() + self.live_head_size()
    }

    pub fn cdp_prep_offset(&self) -> u64 {
        self.pdp_prep_offset() + PdpPrep::SIZE as u64 * self.stat_head.ds_cnt
    }

    pub fn rra_ptr_offset(&self) -> u64 {
        self.cdp_prep_offset()
            + CdpPrep::SIZE as u64 * self.stat_head.rra_cnt * self.stat_head.ds_cnt
    }

    /// Total size of the header sections; the value area starts here.
    pub fn header_size(&self) -> u64 {
        self.rra_ptr_offset() + RraPtr::SIZE as u64 * self.stat_head.rra_cnt
    }

    /// Byte offset of the first row of archive `rra_idx`.
    pub fn rra_start(&self, rra_idx: usize) -> u64 {
        let mut off = self.header_size();
        for def in &self.rra_def[..rra_idx] {
            off += def.row_cnt * self.stat_head.ds_cnt * VALUE_SIZE as u64;
        }
        off
    }

    /// Exact file size implied by the header geometry.
    pub fn total_size(&self) -> u64 {
        self.rra_start(self.rra_def.len())
    }

    pub fn cdp_idx(&self, rra_idx: usize, ds_idx: usize) -> usize {
        rra_idx * self.stat_head.ds_cnt as usize + ds_idx
    }

    pub fn ds_match(&self, name: &str) -> Option<usize> {
        self.ds_def.iter().position(|ds| ds.name == name)
    }

    /// Encode every header section into `out`, which must hold at least
    /// [`Rrd::header_size`] bytes.
    pub fn encode_header(&self, out: &mut [u8]) {
        let mut off = 0usize;
        self.stat_head.encode(&mut out[off..]);
        off += StatHead::SIZE;
        for ds in &self.ds_def {
            ds.encode(&mut out[off..]);
            off += DsDef::SIZE;
        }
        for rra in &self.rra_def {
            rra.encode(&mut out[off..]);
            off += RraDef::SIZE;
        }
        if self.version() < 3 {
            self.live_head.encode_legacy(&mut out[off..]);
            off += LiveHead::LEGACY_SIZE;
        } else {
            self.live_head.encode(&mut out[off..]);
            off += LiveHead::SIZE;
        }
        for pdp in &self.pdp_prep {
            pdp.encode(&mut out[off..]);
            off += PdpPrep::SIZE;
        }
        for cdp in &self.cdp_prep {
            cdp.encode(&mut out[off..]);
            off += CdpPrep::SIZE;
        }
        for ptr in &self.rra_ptr {
            ptr.encode(&mut out[off..]);
            off += RraPtr::SIZE;
        }
        debug_assert_eq!(off as u64, self.header_size());
    }

    /// Encode only the live sections (live head, pdp/cdp prep, ring
    /// pointers) into `out` at their positions relative to the live
    /// head offset. Used to flush mutable state after an update.
    pub fn encode_live_sections(&self, out: &mut [u8]) {
        let mut off = 0usize;
        if self.version() < 3 {
            self.live_head.encode_legacy(&mut out[off..]);
            off += LiveHead::LEGACY_SIZE;
        } else {
            self.live_head.encode(&mut out[off..]);
            off += LiveHead::SIZE;
        }
        for pdp in &self.pdp_prep {
            pdp.encode(&mut out[off..]);
            off += PdpPrep::SIZE;
        }
        for cdp in &self.cdp_prep {
            cdp.encode(&mut out[off..]);
            off += CdpPrep::SIZE;
        }
        for ptr in &self.rra_ptr {
            ptr.encode(&mut out[off..]);
            off += RraPtr::SIZE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unival_is_a_bit_pun() {
        let mut u = Unival::from_val(2.5);
        assert_eq!(u.val(), 2.5);
        assert_eq!(u.bits(), 2.5f64.to_bits());
        u.set_cnt(7);
        assert_eq!(u.cnt(), 7);
    }

    #[test]
    fn stat_head_round_trip() {
        let mut head = StatHead::new(300);
        head.ds_cnt = 2;
        head.rra_cnt = 3;
        let mut buf = vec![0u8; StatHead::SIZE];
        head.encode(&mut buf);
        let back = StatHead::decode(&buf).unwrap();
        assert_eq!(back.version, VERSION_3);
        assert_eq!(back.ds_cnt, 2);
        assert_eq!(back.rra_cnt, 3);
        assert_eq!(back.pdp_step, 300);
    }

    #[test]
    fn stat_head_rejects_bad_magic_and_cookie() {
        let mut buf = vec![0u8; StatHead::SIZE];
        StatHead::new(300).encode(&mut buf);

        let mut bad = buf.clone();
        bad[0] = b'X';
        assert_eq!(
            StatHead::decode(&bad).unwrap_err().kind(),
            ErrorKind::BadMagic
        );

        let mut bad = buf.clone();
        // flip one bit of the float sentinel
        bad[StatHead::FLOAT_COOKIE_OFF] ^= 1;
        assert_eq!(
            StatHead::decode(&bad).unwrap_err().kind(),
            ErrorKind::WrongArchitecture
        );

        let mut head = StatHead::new(300);
        head.version = "0005".to_string();
        head.encode(&mut buf);
        assert_eq!(
            StatHead::decode(&buf).unwrap_err().kind(),
            ErrorKind::UnsupportedVersion
        );
    }

    #[test]
    fn ds_def_round_trip_preserves_padded_names() {
        let mut ds = DsDef {
            name: "ifInOctets".to_string(),
            dst: "COUNTER".to_string(),
            par: [Unival::default(); 10],
        };
        ds.par[ds_param::MRHB].set_cnt(600);
        ds.par[ds_param::MIN].set_val(f64::NAN);
        ds.par[ds_param::MAX].set_val(1e9);

        let mut buf = vec![0u8; DsDef::SIZE];
        ds.encode(&mut buf);
        let back = DsDef::decode(&buf);
        assert_eq!(back.name, "ifInOctets");
        assert_eq!(back.ds_type().unwrap(), DsType::Counter);
        assert_eq!(back.heartbeat(), 600);
        assert!(back.min().is_nan());
        assert_eq!(back.max(), 1e9);
    }

    #[test]
    fn last_ds_is_capped_at_field_width() {
        let mut prep = PdpPrep::new();
        prep.set_last_ds("123456789012345678901234567890123");
        assert_eq!(prep.last_ds.len(), LAST_DS_LEN - 1);
        let mut buf = vec![0u8; PdpPrep::SIZE];
        prep.encode(&mut buf);
        assert_eq!(PdpPrep::decode(&buf).last_ds, prep.last_ds);
    }

    #[test]
    fn violation_bytes_live_in_scratch_slots() {
        let mut cdp = CdpPrep::default();
        cdp.set_violation(0, 1);
        cdp.set_violation(9, 1);
        assert_eq!(cdp.violation(0), 1);
        assert_eq!(cdp.violation(1), 0);
        assert_eq!(cdp.violation(9), 1);
        // byte 9 sits in the second slot
        assert_ne!(cdp.scratch[1].bits(), 0);
        cdp.set_violation(9, 0);
        assert_eq!(cdp.scratch[1].bits(), 0);
    }

    fn sample_rrd() -> Rrd {
        let mut stat_head = StatHead::new(300);
        stat_head.ds_cnt = 2;
        stat_head.rra_cnt = 1;
        let mut rra = RraDef::new(Consolidation::Average);
        rra.row_cnt = 5;
        rra.par[rra_param::XFF].set_val(0.5);
        Rrd {
            stat_head,
            ds_def: vec![
                DsDef {
                    name: "a".into(),
                    dst: "GAUGE".into(),
                    par: [Unival::default(); 10],
                },
                DsDef {
                    name: "b".into(),
                    dst: "GAUGE".into(),
                    par: [Unival::default(); 10],
                },
            ],
            rra_def: vec![rra],
            live_head: LiveHead {
                last_up: 1000,
                last_up_usec: 0,
            },
            pdp_prep: vec![PdpPrep::new(), PdpPrep::new()],
            cdp_prep: vec![CdpPrep::default(); 2],
            rra_ptr: vec![RraPtr::default()],
        }
    }

    #[test]
    fn geometry_matches_section_arithmetic() {
        let rrd = sample_rrd();
        // 128 + 2*120 + 1*120 + 16 + 2*112 + 2*80 + 8
        assert_eq!(rrd.header_size(), 128 + 240 + 120 + 16 + 224 + 160 + 8);
        assert_eq!(rrd.total_size(), rrd.header_size() + 5 * 2 * 8);
        assert_eq!(rrd.rra_start(0), rrd.header_size());
    }

    #[test]
    fn full_header_round_trip() {
        let rrd = sample_rrd();
        let mut buf = vec![0u8; rrd.total_size() as usize];
        rrd.encode_header(&mut buf);
        let back = Rrd::decode(&buf).unwrap();
        assert_eq!(back.stat_head.ds_cnt, 2);
        assert_eq!(back.ds_def[1].name, "b");
        assert_eq!(back.rra_def[0].row_cnt, 5);
        assert_eq!(back.rra_def[0].xff(), 0.5);
        assert_eq!(back.live_head.last_up, 1000);
        assert_eq!(back.ds_match("b"), Some(1));
        assert_eq!(back.ds_match("zz"), None);
    }

    #[test]
    fn truncated_header_is_a_short_read() {
        let rrd = sample_rrd();
        let mut buf = vec![0u8; rrd.header_size() as usize];
        rrd.encode_header(&mut buf);
        buf.truncate(300);
        assert_eq!(Rrd::decode(&buf).unwrap_err().kind(), ErrorKind::ShortRead);
    }
}
