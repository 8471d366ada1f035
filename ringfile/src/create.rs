//! Schema parsing and file materialization.
//!
//! `create` takes the declarative `DS:...` / `RRA:...` argument list,
//! validates it, computes the exact file geometry and writes out a
//! fully initialized database: header sections, prep areas primed for
//! the first primary data point, and a value area of NaN rows.

use std::path::Path;

use log::debug;
use rand::Rng;

use crate::error::{Error, ErrorKind, Result};
use crate::file::RrdFile;
use crate::format::{
    cdp_param, ds_param, pdp_param, rra_param, CdpPrep, Consolidation, DsDef, DsType,
    LiveHead, PdpPrep, Rrd, RraDef, RraPtr, StatHead, Unival, MAX_FAILURES_WINDOW_LEN,
    VERSION_4,
};
use crate::hw;
use crate::rpn;

const DS_NAME_MAX: usize = 19;
const DST_MAX: usize = 19;
const CF_NAME_MAX: usize = 19;

/// FNV-1 hash of the file name; seeds per-file seasonal smooth offsets
/// so identical schemas on different files do not smooth in lockstep.
fn fnv_hash(name: &str) -> u64 {
    let mut hval: u64 = 0x811c9dc5;
    for b in name.bytes() {
        hval = hval.wrapping_mul(16_777_619);
        hval ^= b as u64;
    }
    hval
}

fn valid_ds_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= DS_NAME_MAX
        && name
            .bytes()
            .all(|b| b == b'_' || b == b'-' || b.is_ascii_alphanumeric())
}

fn parse_u64(token: &str, kind: ErrorKind) -> Result<u64> {
    token
        .parse::<u64>()
        .map_err(|_| Error::with_detail(kind, token))
}

fn parse_i64(token: &str, kind: ErrorKind) -> Result<i64> {
    token
        .parse::<i64>()
        .map_err(|_| Error::with_detail(kind, token))
}

fn parse_f64(token: &str, kind: ErrorKind) -> Result<f64> {
    token
        .parse::<f64>()
        .map_err(|_| Error::with_detail(kind, token))
}

fn parse_ds(spec: &str, rrd: &mut Rrd) -> Result<()> {
    let rest = spec.strip_prefix("DS:").expect("caller checked the prefix");
    let (name, rest) = rest
        .split_once(':')
        .ok_or_else(|| Error::with_detail(ErrorKind::InvalidDsSpec, spec))?;
    if !valid_ds_name(name) {
        return Err(Error::with_detail(ErrorKind::InvalidDsName, name));
    }
    if rrd.ds_match(name).is_some() {
        return Err(Error::with_detail(ErrorKind::DuplicateDsName, name));
    }
    let (dst, rest) = rest
        .split_once(':')
        .ok_or_else(|| Error::with_detail(ErrorKind::InvalidDsSpec, spec))?;
    if dst.is_empty() || dst.len() > DST_MAX || !dst.bytes().all(|b| b.is_ascii_uppercase()) {
        return Err(Error::with_detail(ErrorKind::InvalidDsType, dst));
    }
    let ds_type = DsType::parse(dst)
        .ok_or_else(|| Error::with_detail(ErrorKind::InvalidDsType, dst))?;

    let mut def = DsDef {
        name: name.to_string(),
        dst: dst.to_string(),
        par: [Unival::default(); 10],
    };

    match ds_type {
        DsType::Compute => {
            def.par = rpn::compile_compute(rest, |ds| rrd.ds_match(ds))?;
        }
        _ => {
            let mut fields = rest.split(':');
            let hb = fields
                .next()
                .ok_or_else(|| Error::with_detail(ErrorKind::InvalidDsSpec, spec))?;
            let min = fields
                .next()
                .ok_or_else(|| Error::with_detail(ErrorKind::InvalidDsSpec, spec))?;
            let max = fields
                .next()
                .ok_or_else(|| Error::with_detail(ErrorKind::InvalidDsSpec, spec))?;
            if fields.next().is_some() {
                return Err(Error::with_detail(ErrorKind::InvalidDsSpec, spec));
            }
            def.par[ds_param::MRHB].set_cnt(parse_u64(hb, ErrorKind::InvalidDsSpec)?);
            let min = if min == "U" {
                f64::NAN
            } else {
                parse_f64(min, ErrorKind::InvalidNumber)?
            };
            let max = if max == "U" {
                f64::NAN
            } else {
                parse_f64(max, ErrorKind::InvalidNumber)?
            };
            if !min.is_nan() && !max.is_nan() && min >= max {
                return Err(Error::with_detail(ErrorKind::MinMaxOrder, spec));
            }
            def.par[ds_param::MIN].set_val(min);
            def.par[ds_param::MAX].set_val(max);
        }
    }

    rrd.ds_def.push(def);
    rrd.stat_head.ds_cnt += 1;
    Ok(())
}

/// Append the SEASONAL, DEVSEASONAL, DEVPREDICT and FAILURES archives
/// implied by an HWPREDICT spec without an explicit dependency index.
fn create_hw_contingent_rras(rrd: &mut Rrd, period: u64, hashed_name: u64) {
    let hw_index = rrd.rra_def.len() - 1;
    let alpha = rrd.rra_def[hw_index].par[rra_param::HW_ALPHA].val();
    let hw_rows = rrd.rra_def[hw_index].row_cnt;

    let mut seasonal = RraDef::new(Consolidation::Seasonal);
    seasonal.row_cnt = period;
    seasonal.pdp_cnt = 1;
    seasonal.par[rra_param::SEASONAL_SMOOTH_IDX].set_cnt(hashed_name % period);
    seasonal.par[rra_param::SEASONAL_GAMMA].set_val(alpha);
    seasonal.par[rra_param::DEP_IDX].set_cnt(hw_index as u64);
    rrd.rra_def[hw_index].par[rra_param::DEP_IDX].set_cnt((hw_index + 1) as u64);
    rrd.rra_def.push(seasonal);

    let mut devseasonal = RraDef::new(Consolidation::DevSeasonal);
    devseasonal.row_cnt = period;
    devseasonal.pdp_cnt = 1;
    devseasonal.par[rra_param::SEASONAL_SMOOTH_IDX].set_cnt(hashed_name % period);
    devseasonal.par[rra_param::SEASONAL_GAMMA].set_val(alpha);
    devseasonal.par[rra_param::DEP_IDX].set_cnt(hw_index as u64);
    rrd.rra_def.push(devseasonal);

    let mut devpredict = RraDef::new(Consolidation::DevPredict);
    devpredict.row_cnt = hw_rows;
    devpredict.pdp_cnt = 1;
    devpredict.par[rra_param::DEP_IDX].set_cnt((hw_index + 2) as u64);
    rrd.rra_def.push(devpredict);

    let mut failures = RraDef::new(Consolidation::Failures);
    failures.row_cnt = period;
    failures.pdp_cnt = 1;
    failures.par[rra_param::DELTA_POS].set_val(2.0);
    failures.par[rra_param::DELTA_NEG].set_val(2.0);
    failures.par[rra_param::FAILURE_THRESHOLD].set_cnt(7);
    failures.par[rra_param::WINDOW_LEN].set_cnt(9);
    failures.par[rra_param::DEP_IDX].set_cnt((hw_index + 2) as u64);
    rrd.rra_def.push(failures);

    rrd.stat_head.rra_cnt += 4;
}

fn parse_rra(spec: &str, rrd: &mut Rrd, hashed_name: u64) -> Result<()> {
    let rest = spec.strip_prefix("RRA:").expect("caller checked the prefix");
    let own_index = rrd.rra_def.len() as u64;
    let mut def = RraDef::new(Consolidation::Average);
    def.pdp_cnt = 1;

    let mut cf = Consolidation::Average;
    let mut token_min = 4usize;
    let mut period = 0u64;
    let bad = |detail: &str| Error::with_detail(ErrorKind::InvalidRraSpec, detail);

    let mut token_idx = 0usize;
    for token in rest.split(':') {
        match token_idx {
            0 => {
                if token.is_empty()
                    || token.len() > CF_NAME_MAX
                    || !token.bytes().all(|b| b.is_ascii_uppercase())
                {
                    return Err(Error::with_detail(ErrorKind::InvalidCfName, token));
                }
                cf = Consolidation::parse(token)
                    .ok_or_else(|| Error::with_detail(ErrorKind::UnknownConsolidation, token))?;
                def.cf_name = token.to_string();
                match cf {
                    Consolidation::HwPredict | Consolidation::MhwPredict => {
                        if cf == Consolidation::MhwPredict {
                            rrd.stat_head.version = VERSION_4.to_string();
                        }
                        token_min = 5;
                        def.par[rra_param::HW_ALPHA].set_val(0.1);
                        def.par[rra_param::HW_BETA].set_val(1.0 / 288.0);
                        def.par[rra_param::DEP_IDX].set_cnt(own_index);
                    }
                    Consolidation::Seasonal | Consolidation::DevSeasonal => {
                        token_min = if cf == Consolidation::Seasonal { 4 } else { 3 };
                        def.par[rra_param::SEASONAL_GAMMA].set_val(0.1);
                        def.par[rra_param::SEASONAL_SMOOTHING_WINDOW].set_val(0.05);
                        def.par[rra_param::DEP_IDX].set_cnt(u64::MAX);
                    }
                    Consolidation::DevPredict => {
                        token_min = 3;
                        def.par[rra_param::DEP_IDX].set_cnt(u64::MAX);
                    }
                    Consolidation::Failures => {
                        token_min = 5;
                        def.par[rra_param::DELTA_POS].set_val(2.0);
                        def.par[rra_param::DELTA_NEG].set_val(2.0);
                        def.par[rra_param::WINDOW_LEN].set_cnt(3);
                        def.par[rra_param::FAILURE_THRESHOLD].set_cnt(2);
                        def.par[rra_param::DEP_IDX].set_cnt(u64::MAX);
                    }
                    _ => {}
                }
            }
            1 => match cf {
                Consolidation::HwPredict
                | Consolidation::MhwPredict
                | Consolidation::Seasonal
                | Consolidation::DevSeasonal
                | Consolidation::DevPredict
                | Consolidation::Failures => {
                    let rows = parse_i64(token, ErrorKind::InvalidRowCount)?;
                    if rows <= 0 {
                        return Err(Error::with_detail(ErrorKind::InvalidRowCount, token));
                    }
                    def.row_cnt = rows as u64;
                }
                _ => {
                    let xff = parse_f64(token, ErrorKind::InvalidXff)?;
                    if !(0.0..1.0).contains(&xff) {
                        return Err(Error::with_detail(ErrorKind::InvalidXff, token));
                    }
                    def.par[rra_param::XFF].set_val(xff);
                }
            },
            2 => match cf {
                Consolidation::HwPredict | Consolidation::MhwPredict => {
                    let alpha = parse_f64(token, ErrorKind::InvalidAlpha)?;
                    if alpha <= 0.0 || alpha >= 1.0 {
                        return Err(Error::with_detail(ErrorKind::InvalidAlpha, token));
                    }
                    def.par[rra_param::HW_ALPHA].set_val(alpha);
                }
                Consolidation::Seasonal | Consolidation::DevSeasonal => {
                    let gamma = parse_f64(token, ErrorKind::InvalidGamma)?;
                    if gamma <= 0.0 || gamma >= 1.0 {
                        return Err(Error::with_detail(ErrorKind::InvalidGamma, token));
                    }
                    def.par[rra_param::SEASONAL_GAMMA].set_val(gamma);
                    def.par[rra_param::SEASONAL_SMOOTH_IDX].set_cnt(hashed_name % def.row_cnt);
                }
                Consolidation::Failures => {
                    let threshold = parse_i64(token, ErrorKind::FailureThresholdOutOfRange)?;
                    if threshold < 1 || threshold as u64 > MAX_FAILURES_WINDOW_LEN {
                        return Err(Error::with_detail(
                            ErrorKind::FailureThresholdOutOfRange,
                            token,
                        ));
                    }
                    def.par[rra_param::FAILURE_THRESHOLD].set_cnt(threshold as u64);
                }
                Consolidation::DevPredict => {
                    let dep = parse_i64(token, ErrorKind::InvalidRraSpec)?;
                    def.par[rra_param::DEP_IDX].set_cnt((dep - 1) as u64);
                }
                _ => {
                    let steps = parse_i64(token, ErrorKind::InvalidStep)?;
                    if steps < 1 {
                        return Err(Error::with_detail(ErrorKind::InvalidStep, token));
                    }
                    def.pdp_cnt = steps as u64;
                }
            },
            3 => match cf {
                Consolidation::HwPredict | Consolidation::MhwPredict => {
                    let beta = parse_f64(token, ErrorKind::InvalidBeta)?;
                    if !(0.0..=1.0).contains(&beta) {
                        return Err(Error::with_detail(ErrorKind::InvalidBeta, token));
                    }
                    def.par[rra_param::HW_BETA].set_val(beta);
                }
                Consolidation::Seasonal | Consolidation::DevSeasonal => {
                    let dep = parse_i64(token, ErrorKind::InvalidRraSpec)?;
                    def.par[rra_param::DEP_IDX].set_cnt((dep - 1) as u64);
                }
                Consolidation::Failures => {
                    let window = parse_i64(token, ErrorKind::WindowLenOutOfRange)?;
                    if window < 1 || window as u64 > MAX_FAILURES_WINDOW_LEN {
                        return Err(Error::with_detail(ErrorKind::WindowLenOutOfRange, token));
                    }
                    if (window as u64) < def.par[rra_param::FAILURE_THRESHOLD].cnt() {
                        return Err(Error::with_detail(
                            ErrorKind::WindowShorterThanThreshold,
                            token,
                        ));
                    }
                    def.par[rra_param::WINDOW_LEN].set_cnt(window as u64);
                }
                Consolidation::DevPredict => {
                    return Err(Error::with_detail(ErrorKind::TrailingArgument, token));
                }
                _ => {
                    let rows = parse_i64(token, ErrorKind::InvalidRowCount)?;
                    if rows <= 0 {
                        return Err(Error::with_detail(ErrorKind::InvalidRowCount, token));
                    }
                    #[cfg(target_pointer_width = "32")]
                    {
                        let span = rrd.stat_head.pdp_step as i128
                            * def.pdp_cnt as i128
                            * rows as i128;
                        if span > 4_294_967_296i128 {
                            return Err(Error::new(ErrorKind::SpanTooLarge));
                        }
                    }
                    def.row_cnt = rows as u64;
                }
            },
            4 => match cf {
                Consolidation::Failures => {
                    let dep = parse_i64(token, ErrorKind::InvalidRraSpec)?;
                    def.par[rra_param::DEP_IDX].set_cnt((dep - 1) as u64);
                }
                Consolidation::Seasonal | Consolidation::DevSeasonal => {
                    let window = token
                        .strip_prefix("smoothing-window=")
                        .ok_or_else(|| bad(token))?;
                    let window = parse_f64(window, ErrorKind::InvalidSmoothingWindow)?;
                    if !(0.0..=1.0).contains(&window) {
                        return Err(Error::with_detail(ErrorKind::InvalidSmoothingWindow, token));
                    }
                    rrd.stat_head.version = VERSION_4.to_string();
                    def.par[rra_param::SEASONAL_SMOOTHING_WINDOW].set_val(window);
                }
                Consolidation::HwPredict | Consolidation::MhwPredict => {
                    let p = parse_u64(token, ErrorKind::InvalidRraSpec)?;
                    if p == 0 || p > def.row_cnt {
                        return Err(Error::with_detail(ErrorKind::SeasonalCycleTooLong, token));
                    }
                    period = p;
                }
                _ => {
                    return Err(Error::with_detail(ErrorKind::TrailingArgument, token));
                }
            },
            5 => match cf {
                Consolidation::HwPredict | Consolidation::MhwPredict => {
                    let dep = parse_i64(token, ErrorKind::InvalidRraSpec)?;
                    def.par[rra_param::DEP_IDX].set_cnt((dep - 1) as u64);
                }
                _ => {
                    return Err(Error::with_detail(ErrorKind::TrailingArgument, token));
                }
            },
            _ => {
                return Err(Error::with_detail(ErrorKind::TrailingArgument, token));
            }
        }
        token_idx += 1;
    }

    if token_idx < token_min {
        return Err(Error::with_detail(ErrorKind::MissingArguments, spec));
    }

    let auto_contingent = matches!(cf, Consolidation::HwPredict | Consolidation::MhwPredict)
        && def.par[rra_param::DEP_IDX].cnt() == own_index;

    rrd.rra_def.push(def);
    rrd.stat_head.rra_cnt += 1;

    if auto_contingent {
        debug!("[create] appending contingent Holt-Winters archives for {spec}");
        create_hw_contingent_rras(rrd, period, hashed_name);
    }
    Ok(())
}

/// Build an in-memory schema from `DS:`/`RRA:` argument strings.
pub fn build_schema(
    filename: &str,
    pdp_step: u64,
    last_up: i64,
    args: &[String],
) -> Result<Rrd> {
    if pdp_step < 1 {
        return Err(Error::new(ErrorKind::InvalidStep));
    }
    let mut rrd = Rrd {
        stat_head: StatHead::new(pdp_step),
        ds_def: Vec::new(),
        rra_def: Vec::new(),
        live_head: LiveHead {
            last_up,
            last_up_usec: 0,
        },
        pdp_prep: Vec::new(),
        cdp_prep: Vec::new(),
        rra_ptr: Vec::new(),
    };

    let hashed_name = fnv_hash(filename);
    for arg in args {
        if arg.starts_with("DS:") {
            parse_ds(arg, &mut rrd)?;
        } else if arg.starts_with("RRA:") {
            parse_rra(arg, &mut rrd, hashed_name)?;
        } else {
            return Err(Error::with_detail(ErrorKind::UnrecognizedArgument, arg));
        }
    }

    if rrd.rra_def.is_empty() || rrd.ds_def.is_empty() {
        return Err(Error::with_detail(
            ErrorKind::MissingArguments,
            "need at least one DS and one RRA",
        ));
    }
    Ok(rrd)
}

/// Prime the prep areas for the first update cycle.
fn init_prep_areas(rrd: &mut Rrd) -> Result<()> {
    let last_up = rrd.live_head.last_up as u64;
    let pdp_step = rrd.stat_head.pdp_step;

    let mut pdp = PdpPrep::new();
    pdp.scratch[pdp_param::VAL].set_val(0.0);
    pdp.scratch[pdp_param::UNKN_SEC_CNT].set_cnt(last_up % pdp_step);
    rrd.pdp_prep = vec![pdp; rrd.stat_head.ds_cnt as usize];

    rrd.cdp_prep.clear();
    for def in &rrd.rra_def {
        let mut cdp = CdpPrep::default();
        match def.cf()? {
            Consolidation::HwPredict | Consolidation::MhwPredict => {
                hw::init_hwpredict_cdp(&mut cdp)
            }
            Consolidation::Seasonal | Consolidation::DevSeasonal => {
                hw::init_seasonal_cdp(&mut cdp)
            }
            Consolidation::Failures => {}
            _ => {
                cdp.scratch[cdp_param::VAL].set_val(f64::NAN);
                // phase offset so the first consolidated point closes on
                // a wall-clock boundary of this archive's cadence
                let unkn_sec = rrd.pdp_prep[0].scratch[pdp_param::UNKN_SEC_CNT].cnt();
                cdp.scratch[cdp_param::UNKN_PDP_CNT]
                    .set_cnt(((last_up - unkn_sec) % (pdp_step * def.pdp_cnt)) / pdp_step);
            }
        }
        for _ in 0..rrd.stat_head.ds_cnt {
            rrd.cdp_prep.push(cdp);
        }
    }
    Ok(())
}

/// Create a database file. `pick_row` selects each archive's initial
/// ring position; randomizing it staggers page faults across archives.
pub fn create_with(
    path: &Path,
    pdp_step: u64,
    last_up: i64,
    no_overwrite: bool,
    args: &[String],
    mut pick_row: impl FnMut(u64) -> u64,
) -> Result<()> {
    let filename = path.to_string_lossy();
    let mut rrd = build_schema(&filename, pdp_step, last_up, args)?;
    init_prep_areas(&mut rrd)?;

    rrd.rra_ptr = rrd
        .rra_def
        .iter()
        .map(|def| RraPtr {
            cur_row: pick_row(def.row_cnt) % def.row_cnt,
        })
        .collect();

    let total = rrd.total_size();
    let mut file = RrdFile::create(path, total, no_overwrite)?;

    let mut header = vec![0u8; rrd.header_size() as usize];
    rrd.encode_header(&mut header);
    file.write_all_at(0, &header)?;

    // fill the value area with unknowns, a chunk of rows at a time
    let value_cnt =
        ((total - rrd.header_size()) / crate::format::VALUE_SIZE as u64) as usize;
    let chunk = [f64::NAN; 512];
    let mut written = 0usize;
    while written < value_cnt {
        let n = (value_cnt - written).min(chunk.len());
        file.write_values(
            rrd.header_size() + (written * crate::format::VALUE_SIZE) as u64,
            &chunk[..n],
        )?;
        written += n;
    }
    file.close()?;

    debug!(
        "[create] {} ds={} rra={} size={}",
        path.display(),
        rrd.stat_head.ds_cnt,
        rrd.stat_head.rra_cnt,
        total
    );

    // leave a cold page cache behind; only future hot rows matter
    if let Ok(ro) = RrdFile::open(path, false) {
        if let Ok(rrd_ro) = Rrd::decode(ro.data()) {
            ro.dontneed(&rrd_ro);
        }
    }
    Ok(())
}

/// Create with a randomized initial ring row per archive.
pub fn create(
    path: &Path,
    pdp_step: u64,
    last_up: i64,
    no_overwrite: bool,
    args: &[String],
) -> Result<()> {
    let mut rng = rand::thread_rng();
    create_with(path, pdp_step, last_up, no_overwrite, args, |rows| {
        rng.gen_range(0..rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn schema_validation_errors() {
        let cases: &[(&[&str], ErrorKind)] = &[
            (
                &["DS:a:GAUGE:600:U:U", "DS:a:GAUGE:600:U:U", "RRA:AVERAGE:0.5:1:3"],
                ErrorKind::DuplicateDsName,
            ),
            (
                &["DS:a:BOGUS:600:U:U", "RRA:AVERAGE:0.5:1:3"],
                ErrorKind::InvalidDsType,
            ),
            (
                &["DS:a:GAUGE:600:5:2", "RRA:AVERAGE:0.5:1:3"],
                ErrorKind::MinMaxOrder,
            ),
            (
                &["DS:a:GAUGE:600:U:U", "RRA:AVERAGE:1.5:1:3"],
                ErrorKind::InvalidXff,
            ),
            (
                &["DS:a:GAUGE:600:U:U", "RRA:AVERAGE:0.5:0:3"],
                ErrorKind::InvalidStep,
            ),
            (
                &["DS:a:GAUGE:600:U:U", "RRA:AVERAGE:0.5:1:0"],
                ErrorKind::InvalidRowCount,
            ),
            (
                &["DS:a:GAUGE:600:U:U", "RRA:AVERAGE:0.5:1"],
                ErrorKind::MissingArguments,
            ),
            (
                &["DS:a:GAUGE:600:U:U", "RRA:BOGUS:0.5:1:3"],
                ErrorKind::UnknownConsolidation,
            ),
            (&["DS:a:GAUGE:600:U:U"], ErrorKind::MissingArguments),
            (
                &["DS:a:GAUGE:600:U:U", "RRA:AVERAGE:0.5:1:3", "nonsense"],
                ErrorKind::UnrecognizedArgument,
            ),
            (
                &["DS:bad name:GAUGE:600:U:U", "RRA:AVERAGE:0.5:1:3"],
                ErrorKind::InvalidDsName,
            ),
        ];
        for (args, kind) in cases {
            let err = build_schema("t.rrd", 300, 1000, &strings(args)).unwrap_err();
            assert_eq!(err.kind(), *kind, "{args:?}");
        }
    }

    #[test]
    fn compute_ds_sees_only_earlier_sources() {
        let args = strings(&[
            "DS:a:GAUGE:600:U:U",
            "DS:sum:COMPUTE:a,b,+",
            "DS:b:GAUGE:600:U:U",
            "RRA:LAST:0.5:1:1",
        ]);
        let err = build_schema("t.rrd", 300, 1000, &args).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownDsName);

        let args = strings(&[
            "DS:a:GAUGE:600:U:U",
            "DS:b:GAUGE:600:U:U",
            "DS:sum:COMPUTE:a,b,+",
            "RRA:LAST:0.5:1:1",
        ]);
        let rrd = build_schema("t.rrd", 300, 1000, &args).unwrap();
        let nodes = rpn::expand(&rrd.ds_def[2].par).unwrap();
        assert_eq!(
            nodes,
            vec![
                rpn::RpnNode::Variable(0),
                rpn::RpnNode::Variable(1),
                rpn::RpnNode::Op(rpn::Op::Add)
            ]
        );
    }

    #[test]
    fn hwpredict_appends_contingent_archives() {
        let args = strings(&[
            "DS:load:GAUGE:600:U:U",
            "RRA:HWPREDICT:1440:0.1:0.0035:288",
        ]);
        let rrd = build_schema("t.rrd", 300, 1000, &args).unwrap();
        assert_eq!(rrd.stat_head.rra_cnt, 5);
        let cfs: Vec<_> = rrd.rra_def.iter().map(|r| r.cf().unwrap()).collect();
        assert_eq!(
            cfs,
            vec![
                Consolidation::HwPredict,
                Consolidation::Seasonal,
                Consolidation::DevSeasonal,
                Consolidation::DevPredict,
                Consolidation::Failures,
            ]
        );
        // dependency ring: hw -> seasonal, seasonal/devseasonal -> hw,
        // devpredict/failures -> devseasonal
        assert_eq!(rrd.rra_def[0].par[rra_param::DEP_IDX].cnt(), 1);
        assert_eq!(rrd.rra_def[1].par[rra_param::DEP_IDX].cnt(), 0);
        assert_eq!(rrd.rra_def[2].par[rra_param::DEP_IDX].cnt(), 0);
        assert_eq!(rrd.rra_def[3].par[rra_param::DEP_IDX].cnt(), 2);
        assert_eq!(rrd.rra_def[4].par[rra_param::DEP_IDX].cnt(), 2);
        assert_eq!(rrd.rra_def[1].row_cnt, 288);
        assert_eq!(rrd.rra_def[3].row_cnt, 1440);
        // plain HWPREDICT keeps version 3
        assert_eq!(rrd.stat_head.version, crate::format::VERSION_3);
    }

    #[test]
    fn version_upgrades_to_4_when_needed() {
        let args = strings(&[
            "DS:load:GAUGE:600:U:U",
            "RRA:MHWPREDICT:1440:0.1:0.0035:288",
        ]);
        let rrd = build_schema("t.rrd", 300, 1000, &args).unwrap();
        assert_eq!(rrd.stat_head.version, VERSION_4);

        let args = strings(&[
            "DS:load:GAUGE:600:U:U",
            "RRA:HWPREDICT:1440:0.1:0.0035:288:1",
            "RRA:SEASONAL:288:0.1:1:smoothing-window=0.1",
            "RRA:DEVSEASONAL:288:0.1:1",
            "RRA:DEVPREDICT:1440:3",
            "RRA:FAILURES:288:7:9:3",
        ]);
        let rrd = build_schema("t.rrd", 300, 1000, &args).unwrap();
        assert_eq!(rrd.stat_head.version, VERSION_4);
        assert_eq!(rrd.stat_head.rra_cnt, 5);
    }

    #[test]
    fn created_file_has_exact_size_and_nan_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exact.rrd");
        let args = strings(&[
            "DS:a:GAUGE:600:U:U",
            "DS:b:COUNTER:600:0:100",
            "RRA:AVERAGE:0.5:1:3",
            "RRA:MAX:0.5:12:10",
        ]);
        create_with(&path, 300, 1000, false, &args, |_| 0).unwrap();

        let file = RrdFile::open(&path, false).unwrap();
        let rrd = Rrd::decode(file.data()).unwrap();
        assert_eq!(file.len() as u64, rrd.total_size());
        assert_eq!(
            rrd.total_size(),
            rrd.header_size() + (3 + 10) * 2 * 8
        );

        // every value slot is NaN
        let values = file
            .read_values(rrd.header_size(), 2 * (3 + 10))
            .unwrap();
        assert!(values.iter().all(|v| v.is_nan()));

        // prep areas are primed
        assert_eq!(rrd.pdp_prep[0].last_ds, "U");
        assert_eq!(
            rrd.pdp_prep[0].scratch[pdp_param::UNKN_SEC_CNT].cnt(),
            1000 % 300
        );
        // 1000 aligned down by one PDP leaves (900 % 3600) / 300 = 3
        assert_eq!(
            rrd.cdp_prep[rrd.cdp_idx(1, 0)].scratch[cdp_param::UNKN_PDP_CNT].cnt(),
            3
        );
        assert!(rrd.cdp_prep[0].scratch[cdp_param::VAL].val().is_nan());
    }

    #[test]
    fn initial_ring_rows_stay_in_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.rrd");
        let args = strings(&["DS:a:GAUGE:600:U:U", "RRA:AVERAGE:0.5:1:7"]);
        create_with(&path, 300, 1000, false, &args, |_| 12).unwrap();
        let file = RrdFile::open(&path, false).unwrap();
        let rrd = Rrd::decode(file.data()).unwrap();
        assert_eq!(rrd.rra_ptr[0].cur_row, 12 % 7);
    }

    #[test]
    fn exclusive_create_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.rrd");
        let args = strings(&["DS:a:GAUGE:600:U:U", "RRA:AVERAGE:0.5:1:3"]);
        create_with(&path, 300, 1000, false, &args, |_| 0).unwrap();
        let err = create_with(&path, 300, 1000, true, &args, |_| 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OpenFile);
    }
}
