//! Sample ingestion.
//!
//! Each update argument carries a timestamp and one reading per data
//! source. Readings become rate contributions, contributions accumulate
//! into the running primary data point, and every crossed step boundary
//! closes a PDP window, feeds the consolidation prep areas and emits
//! finished rows into the archive rings. All of it happens under a
//! whole-file lock and is flushed back to the fixed header positions at
//! the end of the call.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use log::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::file::RrdFile;
use crate::format::{
    cdp_param, pdp_param, Consolidation, DsType, Rrd, Unival, LAST_DS_LEN, VALUE_SIZE,
};
use crate::hw;
use crate::rpn;
use crate::timespec::{parse_timespec, TimeRef};

/// Wall clock as (seconds, microseconds), microseconds always >= 0.
pub fn wall_clock() -> (i64, i64) {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_secs() as i64, now.subsec_micros() as i64)
}

/// Difference of two integers given as ASCII strings, tolerating values
/// far beyond the f64 mantissa (SNMP 64-bit counters). Junk around the
/// digits is ignored; mixed signs and oversized magnitudes yield NaN.
pub(crate) fn ascii_diff(a: &str, b: &str) -> f64 {
    fn split(s: &str) -> (bool, &str) {
        let bytes = s.as_bytes();
        let mut neg = false;
        let mut start = 0;
        while start < bytes.len() && !bytes[start].is_ascii_digit() {
            if bytes[start] == b'-' {
                neg = true;
            }
            start += 1;
        }
        let mut end = start;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        (neg, &s[start..end])
    }

    let (a_neg, a_digits) = split(a);
    let (b_neg, b_digits) = split(b);
    if a_digits.is_empty() || b_digits.is_empty() {
        return f64::NAN;
    }
    // one negative operand cannot be handled, two flip the result
    if a_neg != b_neg {
        return f64::NAN;
    }
    if a_digits.len().max(b_digits.len()) > LAST_DS_LEN {
        return f64::NAN;
    }
    let av: u128 = a_digits.parse().unwrap_or(0);
    let bv: u128 = b_digits.parse().unwrap_or(0);
    let mut result = if av >= bv {
        (av - bv) as f64
    } else {
        -((bv - av) as f64)
    };
    if a_neg && b_neg {
        result = -result;
    }
    result
}

/// Map update argument fields onto data source indices. Without a
/// template every non-COMPUTE source is expected, in file order.
fn build_template(rrd: &Rrd, template: Option<&str>) -> Result<Vec<usize>> {
    match template {
        None => {
            let mut idx = Vec::new();
            for (i, ds) in rrd.ds_def.iter().enumerate() {
                if ds.ds_type()? != DsType::Compute {
                    idx.push(i);
                }
            }
            Ok(idx)
        }
        Some(tmpl) => {
            let mut idx = Vec::new();
            for name in tmpl.split(':') {
                if idx.len() >= rrd.ds_def.len() {
                    return Err(Error::with_detail(
                        ErrorKind::InvalidTemplate,
                        "template names more sources than the file holds",
                    ));
                }
                let ds = rrd
                    .ds_match(name)
                    .ok_or_else(|| Error::with_detail(ErrorKind::UnknownDsName, name))?;
                idx.push(ds);
            }
            Ok(idx)
        }
    }
}

/// Parse the timestamp field of one argument.
fn get_time(
    token: &str,
    at_style: bool,
    version: u32,
    clock: &dyn Fn() -> (i64, i64),
) -> Result<(i64, i64)> {
    let (mut sec, mut usec);
    if at_style {
        let spec = parse_timespec(token, clock().0)?;
        if spec.kind == TimeRef::Start || spec.kind == TimeRef::End {
            return Err(Error::with_detail(
                ErrorKind::InvalidTime,
                "start/end references make no sense in an update",
            ));
        }
        sec = spec.resolve()?;
        usec = 0;
    } else if token == "N" {
        let now = clock();
        sec = now.0;
        usec = now.1;
    } else {
        let mut t: f64 = token
            .parse()
            .map_err(|_| Error::with_detail(ErrorKind::InvalidTime, token))?;
        if t < 0.0 {
            let now = clock();
            t += now.0 as f64 + now.1 as f64 * 1e-6;
        }
        sec = t.floor() as i64;
        usec = ((t - sec as f64) * 1e6) as i64;
    }
    if version < 3 {
        usec = 0;
    }
    Ok((sec, usec))
}

struct PreparedArg<'a> {
    time: (i64, i64),
    /// One reading per data source; unknown sources hold `"U"`.
    updvals: Vec<&'a str>,
}

fn parse_arg<'a>(
    arg: &'a str,
    rrd: &Rrd,
    tmpl: &[usize],
    version: u32,
    clock: &dyn Fn() -> (i64, i64),
) -> Result<PreparedArg<'a>> {
    let (time_str, rest, at_style) = if let Some(p) = arg.find('@') {
        (&arg[..p], &arg[p + 1..], true)
    } else if let Some(p) = arg.find(':') {
        (&arg[..p], &arg[p + 1..], false)
    } else {
        return Err(Error::with_detail(ErrorKind::InvalidUpdateArg, arg));
    };

    let fields: Vec<&str> = rest.split(':').collect();
    if fields.len() != tmpl.len() {
        return Err(Error::with_detail(
            ErrorKind::InvalidUpdateArg,
            format!("expected {} data source values, got {}", tmpl.len(), fields.len()),
        ));
    }

    let mut updvals = vec!["U"; rrd.ds_def.len()];
    for (slot, field) in tmpl.iter().zip(fields) {
        updvals[*slot] = field;
    }

    Ok(PreparedArg {
        time: get_time(time_str, at_style, version, clock)?,
        updvals,
    })
}

/// Convert the raw readings into per-DS contributions (`rate * time`
/// over the interval). Returns the contributions and the periodic flag
/// (false when any heartbeat is shorter than the interval).
fn update_pdp_prep(
    rrd: &mut Rrd,
    updvals: &[&str],
    interval: f64,
) -> Result<(Vec<f64>, bool)> {
    let mut pdp_new = vec![f64::NAN; rrd.ds_def.len()];
    let mut periodic = true;

    for ds_idx in 0..rrd.ds_def.len() {
        let dst = rrd.ds_def[ds_idx].ds_type()?;
        let heartbeat = rrd.ds_def[ds_idx].heartbeat();
        if (heartbeat as f64) < interval {
            periodic = false;
        }

        let reading = updvals[ds_idx];
        let known = !reading.is_empty() && !reading.starts_with('U');

        if known && dst != DsType::Compute && heartbeat as f64 >= interval {
            let mut rate = f64::NAN;
            match dst {
                DsType::Counter | DsType::Derive => {
                    for (i, b) in reading.bytes().enumerate() {
                        if i == 0 && dst == DsType::Derive && b == b'-' {
                            continue;
                        }
                        if !b.is_ascii_digit() {
                            return Err(Error::with_detail(ErrorKind::InvalidInteger, reading));
                        }
                    }
                    if rrd.pdp_prep[ds_idx].last_ds != "U" {
                        let mut diff = ascii_diff(reading, &rrd.pdp_prep[ds_idx].last_ds);
                        if dst == DsType::Counter {
                            // 32 then 64 bit wrap correction
                            if diff < 0.0 {
                                diff += 4_294_967_296.0;
                            }
                            if diff < 0.0 {
                                diff += 18_446_744_069_414_584_320.0;
                            }
                        }
                        pdp_new[ds_idx] = diff;
                        rate = diff / interval;
                    }
                }
                DsType::Absolute => {
                    let v: f64 = reading
                        .parse()
                        .map_err(|_| Error::with_detail(ErrorKind::InvalidNumber, reading))?;
                    pdp_new[ds_idx] = v;
                    rate = v / interval;
                }
                DsType::Gauge => {
                    let v: f64 = reading
                        .parse()
                        .map_err(|_| Error::with_detail(ErrorKind::InvalidNumber, reading))?;
                    pdp_new[ds_idx] = v * interval;
                    rate = pdp_new[ds_idx] / interval;
                }
                DsType::Compute => unreachable!("guarded above"),
            }

            let min = rrd.ds_def[ds_idx].min();
            let max = rrd.ds_def[ds_idx].max();
            if !rate.is_nan()
                && ((!max.is_nan() && rate > max) || (!min.is_nan() && rate < min))
            {
                pdp_new[ds_idx] = f64::NAN;
            }
        }

        rrd.pdp_prep[ds_idx].set_last_ds(reading);
    }
    Ok((pdp_new, periodic))
}

struct ElapsedSteps {
    elapsed: u64,
    pre_int: f64,
    post_int: f64,
    /// Index of the last fully processed PDP before this update.
    proc_pdp_cnt: u64,
}

fn calculate_elapsed_steps(rrd: &Rrd, now: i64, now_usec: i64, interval: f64) -> ElapsedSteps {
    let step = rrd.stat_head.pdp_step as i64;
    let last_up = rrd.live_head.last_up;

    let proc_pdp_age = last_up % step;
    let proc_pdp_st = last_up - proc_pdp_age;
    let occu_pdp_age = now % step;
    let occu_pdp_st = now - occu_pdp_age;

    let (pre_int, post_int) = if occu_pdp_st > proc_pdp_st {
        (
            (occu_pdp_st - last_up) as f64 - rrd.live_head.last_up_usec as f64 / 1e6,
            occu_pdp_age as f64 + now_usec as f64 / 1e6,
        )
    } else {
        (interval, 0.0)
    };

    ElapsedSteps {
        elapsed: ((occu_pdp_st - proc_pdp_st) / step) as u64,
        pre_int,
        post_int,
        proc_pdp_cnt: (proc_pdp_st / step) as u64,
    }
}

/// No boundary crossed: fold the contribution into the running window.
fn simple_update(rrd: &mut Rrd, interval: f64, pdp_new: &[f64]) {
    for (ds_idx, new) in pdp_new.iter().enumerate() {
        let scratch = &mut rrd.pdp_prep[ds_idx].scratch;
        if new.is_nan() {
            let unkn = scratch[pdp_param::UNKN_SEC_CNT].cnt();
            scratch[pdp_param::UNKN_SEC_CNT].set_cnt(unkn + interval.floor() as u64);
        } else if scratch[pdp_param::VAL].val().is_nan() {
            scratch[pdp_param::VAL].set_val(*new);
        } else {
            let v = scratch[pdp_param::VAL].val();
            scratch[pdp_param::VAL].set_val(v + new);
        }
    }
}

/// Close the running PDP window of every data source and seed the next
/// one. Returns the finalized rate per source.
fn process_all_pdp_st(
    rrd: &mut Rrd,
    interval: f64,
    pre_int: f64,
    post_int: f64,
    elapsed: u64,
    pdp_new: &[f64],
    now: i64,
) -> Result<Vec<f64>> {
    let step = rrd.stat_head.pdp_step;
    let diff_pdp_st = elapsed * step;
    let mut pdp_temp = vec![f64::NAN; rrd.ds_def.len()];

    for ds_idx in 0..rrd.ds_def.len() {
        let mut pre_unknown = 0.0;
        {
            let scratch = &mut rrd.pdp_prep[ds_idx].scratch;
            if pdp_new[ds_idx].is_nan() {
                pre_unknown = pre_int;
            } else {
                if scratch[pdp_param::VAL].val().is_nan() {
                    scratch[pdp_param::VAL].set_val(0.0);
                }
                let v = scratch[pdp_param::VAL].val();
                scratch[pdp_param::VAL].set_val(v + pdp_new[ds_idx] / interval * pre_int);
            }

            let unkn_sec = scratch[pdp_param::UNKN_SEC_CNT].cnt();
            if (step as f64) / 2.0 < unkn_sec as f64 {
                pdp_temp[ds_idx] = f64::NAN;
            } else {
                pdp_temp[ds_idx] = scratch[pdp_param::VAL].val()
                    / ((diff_pdp_st - unkn_sec) as f64 - pre_unknown);
            }
        }

        // COMPUTE sources derive their rate from lower-indexed ones
        if rrd.ds_def[ds_idx].ds_type()? == DsType::Compute {
            let nodes = rpn::expand(&rrd.ds_def[ds_idx].par)?;
            pdp_temp[ds_idx] = rpn::eval_compute(&nodes, &pdp_temp, now)?;
        }

        let scratch = &mut rrd.pdp_prep[ds_idx].scratch;
        if pdp_new[ds_idx].is_nan() {
            scratch[pdp_param::UNKN_SEC_CNT].set_cnt(post_int.floor() as u64);
            scratch[pdp_param::VAL].set_val(f64::NAN);
        } else {
            scratch[pdp_param::UNKN_SEC_CNT].set_cnt(0);
            scratch[pdp_param::VAL].set_val(pdp_new[ds_idx] / interval * post_int);
        }
    }
    Ok(pdp_temp)
}

fn if_nan(v: f64, fallback: f64) -> f64 {
    if v.is_nan() {
        fallback
    } else {
        v
    }
}

/// Seed the primary value for the row being emitted.
fn initialize_cdp_val(
    scratch: &mut [Unival; 10],
    cf: Consolidation,
    pdp_temp_val: f64,
    start_pdp_offset: u64,
    pdp_cnt: u64,
) {
    let primary = match cf {
        Consolidation::Average => {
            if scratch[cdp_param::VAL].val().is_nan() && pdp_temp_val.is_nan() {
                f64::INFINITY
            } else {
                let cum = if_nan(scratch[cdp_param::VAL].val(), 0.0);
                let cur = if_nan(pdp_temp_val, 0.0);
                (cum + cur * start_pdp_offset as f64)
                    / (pdp_cnt - scratch[cdp_param::UNKN_PDP_CNT].cnt()) as f64
            }
        }
        Consolidation::Maximum => {
            let cum = if_nan(scratch[cdp_param::VAL].val(), f64::NEG_INFINITY);
            let cur = if_nan(pdp_temp_val, f64::NEG_INFINITY);
            if cur > cum {
                cur
            } else {
                cum
            }
        }
        Consolidation::Minimum => {
            let cum = if_nan(scratch[cdp_param::VAL].val(), f64::INFINITY);
            let cur = if_nan(pdp_temp_val, f64::INFINITY);
            if cur < cum {
                cur
            } else {
                cum
            }
        }
        _ => pdp_temp_val,
    };
    scratch[cdp_param::PRIMARY].set_val(primary);
}

/// Value carried into the partially-filled CDP that remains open after
/// this emit.
fn initialize_carry_over(
    pdp_temp_val: f64,
    cf: Consolidation,
    elapsed: u64,
    start_pdp_offset: u64,
    pdp_cnt: u64,
) -> f64 {
    let pdp_into_cdp_cnt = (elapsed - start_pdp_offset) % pdp_cnt;
    if pdp_into_cdp_cnt == 0 || pdp_temp_val.is_nan() {
        return match cf {
            Consolidation::Maximum => f64::NEG_INFINITY,
            Consolidation::Minimum => f64::INFINITY,
            Consolidation::Average => 0.0,
            _ => f64::NAN,
        };
    }
    match cf {
        Consolidation::Average => pdp_temp_val * pdp_into_cdp_cnt as f64,
        _ => pdp_temp_val,
    }
}

/// Fold one more finished PDP into an open CDP.
fn calculate_cdp_val(cdp_val: f64, pdp_temp_val: f64, elapsed: u64, cf: Consolidation) -> f64 {
    if cdp_val.is_nan() {
        return match cf {
            Consolidation::Average => pdp_temp_val * elapsed as f64,
            _ => pdp_temp_val,
        };
    }
    match cf {
        Consolidation::Average => cdp_val + pdp_temp_val * elapsed as f64,
        Consolidation::Minimum => pdp_temp_val.min(cdp_val),
        Consolidation::Maximum => pdp_temp_val.max(cdp_val),
        _ => pdp_temp_val,
    }
}

/// Update one (RRA, DS) prep area for this batch of finished PDPs.
#[allow(clippy::too_many_arguments)]
fn update_cdp(
    scratch: &mut [Unival; 10],
    cf: Consolidation,
    pdp_temp_val: f64,
    rra_step_cnt: u64,
    elapsed: u64,
    start_pdp_offset: u64,
    pdp_cnt: u64,
    xff: f64,
) {
    if rra_step_cnt > 0 {
        // at least one row gets written: primary first, the rest are
        // filled from the secondary slot
        if pdp_temp_val.is_nan() {
            let unkn = scratch[cdp_param::UNKN_PDP_CNT].cnt();
            scratch[cdp_param::UNKN_PDP_CNT].set_cnt(unkn + start_pdp_offset);
            scratch[cdp_param::SECONDARY].set_val(f64::NAN);
        } else {
            scratch[cdp_param::SECONDARY].set_val(pdp_temp_val);
        }

        if scratch[cdp_param::UNKN_PDP_CNT].cnt() as f64 > pdp_cnt as f64 * xff {
            scratch[cdp_param::PRIMARY].set_val(f64::NAN);
        } else {
            initialize_cdp_val(scratch, cf, pdp_temp_val, start_pdp_offset, pdp_cnt);
        }
        scratch[cdp_param::VAL].set_val(initialize_carry_over(
            pdp_temp_val,
            cf,
            elapsed,
            start_pdp_offset,
            pdp_cnt,
        ));
        if pdp_temp_val.is_nan() {
            scratch[cdp_param::UNKN_PDP_CNT].set_cnt((elapsed - start_pdp_offset) % pdp_cnt);
        } else {
            scratch[cdp_param::UNKN_PDP_CNT].set_cnt(0);
        }
    } else if pdp_temp_val.is_nan() {
        let unkn = scratch[cdp_param::UNKN_PDP_CNT].cnt();
        scratch[cdp_param::UNKN_PDP_CNT].set_cnt(unkn + elapsed);
    } else {
        let v = calculate_cdp_val(scratch[cdp_param::VAL].val(), pdp_temp_val, elapsed, cf);
        scratch[cdp_param::VAL].set_val(v);
    }
}

/// Bulk-update catch-up for archives that take one PDP per row.
#[allow(clippy::too_many_arguments)]
fn reset_cdp(
    rrd: &mut Rrd,
    elapsed: u64,
    pdp_temp: &[f64],
    last_seasonal_coef: &[f64],
    seasonal_coef: &[f64],
    rra_idx: usize,
    ds_idx: usize,
    cdp_idx: usize,
    cf: Consolidation,
) -> Result<()> {
    match cf {
        Consolidation::Seasonal | Consolidation::DevSeasonal => {
            // keep the cached coefficients consistent with the skip-ahead
            let last = last_seasonal_coef.get(ds_idx).copied().unwrap_or(f64::NAN);
            let next = seasonal_coef.get(ds_idx).copied().unwrap_or(f64::NAN);
            let scratch = &mut rrd.cdp_prep[cdp_idx].scratch;
            scratch[cdp_param::HW_LAST_SEASONAL].set_val(last);
            scratch[cdp_param::HW_SEASONAL].set_val(next);
        }
        Consolidation::HwPredict | Consolidation::MhwPredict => {
            // the algorithm does not learn from batch updates
            let scratch = &mut rrd.cdp_prep[cdp_idx].scratch;
            let null = scratch[cdp_param::NULL_COUNT].cnt();
            scratch[cdp_param::NULL_COUNT].set_cnt(null + elapsed);
            let last_null = scratch[cdp_param::LAST_NULL_COUNT].cnt();
            scratch[cdp_param::LAST_NULL_COUNT].set_cnt(last_null + elapsed - 1);
            scratch[cdp_param::PRIMARY].set_val(f64::NAN);
            scratch[cdp_param::SECONDARY].set_val(f64::NAN);
        }
        Consolidation::DevPredict => {
            let scratch = &mut rrd.cdp_prep[cdp_idx].scratch;
            scratch[cdp_param::PRIMARY].set_val(f64::NAN);
            scratch[cdp_param::SECONDARY].set_val(f64::NAN);
        }
        Consolidation::Failures => {
            // missed bulk values do not count as failures
            let scratch = &mut rrd.cdp_prep[cdp_idx].scratch;
            scratch[cdp_param::PRIMARY].set_val(0.0);
            scratch[cdp_param::SECONDARY].set_val(0.0);
            hw::erase_violations(rrd, cdp_idx, rra_idx)?;
        }
        _ => {
            let scratch = &mut rrd.cdp_prep[cdp_idx].scratch;
            scratch[cdp_param::PRIMARY].set_val(pdp_temp[ds_idx]);
            scratch[cdp_param::SECONDARY].set_val(pdp_temp[ds_idx]);
        }
    }
    Ok(())
}

struct CdpPass {
    rra_step_cnt: Vec<u64>,
    skip_update: Vec<bool>,
    schedule_smooth: bool,
}

/// Walk every archive, sizing this update's row batch and rolling the
/// finished PDPs into the prep areas.
fn update_all_cdp_prep(
    rrd: &mut Rrd,
    file: &RrdFile,
    rra_begin: u64,
    elapsed: u64,
    proc_pdp_cnt: u64,
    pdp_temp: &[f64],
) -> Result<CdpPass> {
    let rra_cnt = rrd.rra_def.len();
    let ds_cnt = rrd.stat_head.ds_cnt as usize;
    let mut pass = CdpPass {
        rra_step_cnt: vec![0; rra_cnt],
        skip_update: vec![false; rra_cnt],
        schedule_smooth: false,
    };

    let mut rra_start = rra_begin;
    for rra_idx in 0..rra_cnt {
        let cf = rrd.rra_def[rra_idx].cf()?;
        let pdp_cnt = rrd.rra_def[rra_idx].pdp_cnt;
        let start_pdp_offset = pdp_cnt - proc_pdp_cnt % pdp_cnt;
        pass.rra_step_cnt[rra_idx] = if start_pdp_offset <= elapsed {
            (elapsed - start_pdp_offset) / pdp_cnt + 1
        } else {
            0
        };

        let mut last_seasonal_coef = Vec::new();
        let mut seasonal_coef = Vec::new();
        if cf == Consolidation::Seasonal || cf == Consolidation::DevSeasonal {
            if pass.rra_step_cnt[rra_idx] > 1 {
                // bulk update: skip ahead in the seasonal ring so the
                // cached coefficients match the next observation
                pass.skip_update[rra_idx] = true;
                last_seasonal_coef =
                    hw::lookup_seasonal(rrd, rra_idx, rra_start, file, elapsed)?;
                seasonal_coef =
                    hw::lookup_seasonal(rrd, rra_idx, rra_start, file, elapsed + 1)?;
            }
            if hw::schedule_smooth(rrd, rra_idx, elapsed) {
                pass.schedule_smooth = true;
            }
        }

        let xff = rrd.rra_def[rra_idx].xff();
        for ds_idx in 0..ds_cnt {
            let cdp_idx = rrd.cdp_idx(rra_idx, ds_idx);
            if pdp_cnt > 1 {
                update_cdp(
                    &mut rrd.cdp_prep[cdp_idx].scratch,
                    cf,
                    pdp_temp[ds_idx],
                    pass.rra_step_cnt[rra_idx],
                    elapsed,
                    start_pdp_offset,
                    pdp_cnt,
                    xff,
                );
            } else if elapsed > 2 {
                reset_cdp(
                    rrd,
                    elapsed,
                    pdp_temp,
                    &last_seasonal_coef,
                    &seasonal_coef,
                    rra_idx,
                    ds_idx,
                    cdp_idx,
                    cf,
                )?;
            }
        }

        rra_start += rrd.rra_def[rra_idx].row_cnt * ds_cnt as u64 * VALUE_SIZE as u64;
    }
    Ok(pass)
}

/// For archives that take one PDP per row, run the per-observation
/// consolidation (including the Holt-Winters chain) for the one or two
/// rows this update emits.
fn update_aberrant_cdps(
    rrd: &mut Rrd,
    file: &RrdFile,
    rra_begin: u64,
    elapsed: u64,
    pdp_temp: &[f64],
) -> Result<()> {
    let ds_cnt = rrd.stat_head.ds_cnt as usize;

    let mut j = elapsed;
    let mut scratch_idx = cdp_param::PRIMARY;
    while j > 0 && j < 3 {
        let mut rra_start = rra_begin;
        for rra_idx in 0..rrd.rra_def.len() {
            if rrd.rra_def[rra_idx].pdp_cnt == 1 {
                let cf = rrd.rra_def[rra_idx].cf()?;
                let seasonal_coef =
                    if cf == Consolidation::Seasonal || cf == Consolidation::DevSeasonal {
                        let offset = if scratch_idx == cdp_param::PRIMARY {
                            elapsed + 1
                        } else {
                            elapsed + 2
                        };
                        hw::lookup_seasonal(rrd, rra_idx, rra_start, file, offset)?
                    } else {
                        Vec::new()
                    };
                for ds_idx in 0..ds_cnt {
                    let cdp_idx = rrd.cdp_idx(rra_idx, ds_idx);
                    hw::update_aberrant_cf(
                        rrd,
                        pdp_temp[ds_idx],
                        cf,
                        cdp_idx,
                        rra_idx,
                        ds_idx,
                        scratch_idx,
                        &seasonal_coef,
                    )?;
                }
            }
            rra_start += rrd.rra_def[rra_idx].row_cnt * ds_cnt as u64 * VALUE_SIZE as u64;
        }
        j -= 1;
        scratch_idx = cdp_param::SECONDARY;
    }
    Ok(())
}

/// Advance each ring and write the batch of rows. In a multi-row emit
/// the first row is the primary value and the rest repeat the secondary
/// value; a non-periodic sample instead blanks everything but the final
/// row.
fn write_to_rras(
    rrd: &mut Rrd,
    file: &mut RrdFile,
    rra_begin: u64,
    pass: &CdpPass,
    periodic: bool,
) -> Result<()> {
    let ds_cnt = rrd.stat_head.ds_cnt as usize;
    let mut rra_start = rra_begin;

    for rra_idx in 0..rrd.rra_def.len() {
        let row_cnt = rrd.rra_def[rra_idx].row_cnt;
        let mut steps = pass.rra_step_cnt[rra_idx];
        let mut scratch_idx = cdp_param::PRIMARY;

        while steps > 0 {
            let cur = (rrd.rra_ptr[rra_idx].cur_row + 1) % row_cnt;
            rrd.rra_ptr[rra_idx].cur_row = cur;

            if !pass.skip_update[rra_idx] {
                let off = rra_start + cur * ds_cnt as u64 * VALUE_SIZE as u64;
                let blank = !periodic && steps > 1;
                let mut row = Vec::with_capacity(ds_cnt);
                for ds_idx in 0..ds_cnt {
                    let cdp_idx = rrd.cdp_idx(rra_idx, ds_idx);
                    row.push(if blank {
                        f64::NAN
                    } else {
                        rrd.cdp_prep[cdp_idx].scratch[scratch_idx].val()
                    });
                }
                file.write_values(off, &row)?;
            }

            scratch_idx = cdp_param::SECONDARY;
            steps -= 1;
        }

        rra_start += row_cnt * ds_cnt as u64 * VALUE_SIZE as u64;
    }
    Ok(())
}

/// Apply one prepared argument. Returns false when the sample was
/// dropped for stepping backwards in time.
fn process_arg(
    rrd: &mut Rrd,
    file: &mut RrdFile,
    rra_begin: u64,
    arg: &PreparedArg<'_>,
    schedule_smooth: &mut bool,
) -> Result<bool> {
    let (now, now_usec) = arg.time;
    let last = rrd.live_head.last_up;
    let last_usec = rrd.live_head.last_up_usec;

    if now < last || (now == last && now_usec <= last_usec) {
        debug!("[update] dropping sample at {now}.{now_usec:06}: not after {last}.{last_usec:06}");
        return Ok(false);
    }

    let interval = (now - last) as f64 + (now_usec - last_usec) as f64 / 1e6;

    let (pdp_new, periodic) = update_pdp_prep(rrd, &arg.updvals, interval)?;

    let steps = calculate_elapsed_steps(rrd, now, now_usec, interval);

    if steps.elapsed == 0 {
        simple_update(rrd, interval, &pdp_new);
    } else {
        let pdp_temp = process_all_pdp_st(
            rrd,
            interval,
            steps.pre_int,
            steps.post_int,
            steps.elapsed,
            &pdp_new,
            now,
        )?;
        let pass = update_all_cdp_prep(
            rrd,
            file,
            rra_begin,
            steps.elapsed,
            steps.proc_pdp_cnt,
            &pdp_temp,
        )?;
        update_aberrant_cdps(rrd, file, rra_begin, steps.elapsed, &pdp_temp)?;
        write_to_rras(rrd, file, rra_begin, &pass, periodic)?;
        if pass.schedule_smooth {
            *schedule_smooth = true;
        }
    }

    rrd.live_head.last_up = now;
    rrd.live_head.last_up_usec = now_usec;
    Ok(true)
}

fn smooth_all_rras(rrd: &mut Rrd, file: &mut RrdFile, rra_begin: u64) -> Result<()> {
    let ds_cnt = rrd.stat_head.ds_cnt;
    let mut rra_start = rra_begin;
    for rra_idx in 0..rrd.rra_def.len() {
        let cf = rrd.rra_def[rra_idx].cf()?;
        if cf == Consolidation::Seasonal || cf == Consolidation::DevSeasonal {
            debug!("[update] running seasonal smoother for rra {rra_idx}");
            hw::apply_smoother(rrd, rra_idx, rra_start, file)?;
        }
        rra_start += rrd.rra_def[rra_idx].row_cnt * ds_cnt * VALUE_SIZE as u64;
    }
    Ok(())
}

fn flush_live_sections(rrd: &Rrd, file: &mut RrdFile) -> Result<()> {
    let len = (rrd.header_size() - rrd.live_head_offset()) as usize;
    let mut buf = vec![0u8; len];
    rrd.encode_live_sections(&mut buf);
    file.write_all_at(rrd.live_head_offset(), &buf)
}

/// Apply update arguments with an injected clock (`N` timestamps and
/// relative offsets resolve against it).
pub fn update_with_clock(
    path: &Path,
    template: Option<&str>,
    args: &[String],
    clock: &dyn Fn() -> (i64, i64),
) -> Result<()> {
    if args.is_empty() {
        return Err(Error::with_detail(
            ErrorKind::MissingArguments,
            "no update arguments",
        ));
    }

    let mut file = RrdFile::open_rw(path)?;
    let mut rrd = Rrd::decode(file.data())?;
    file.lock()?;

    let version = rrd.version();
    let rra_begin = rrd.header_size();
    let tmpl = build_template(&rrd, template)?;

    let mut schedule_smooth = false;
    let mut failure = None;
    for arg in args {
        let prepared = match parse_arg(arg, &rrd, &tmpl, version, clock) {
            Ok(p) => p,
            Err(e) => {
                failure = Some(e);
                break;
            }
        };
        if let Err(e) = process_arg(&mut rrd, &mut file, rra_begin, &prepared, &mut schedule_smooth)
        {
            failure = Some(e);
            break;
        }
    }

    if failure.is_none() && schedule_smooth {
        if let Err(e) = smooth_all_rras(&mut rrd, &mut file, rra_begin) {
            failure = Some(e);
        }
    }

    // arguments processed before a failure stay committed
    flush_live_sections(&rrd, &mut file)?;
    // keep only the header and each archive's hot rows cached
    file.dontneed(&rrd);
    file.close()?;

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Apply a sequence of `<time>:<v>[:<v>...]` arguments to a database.
pub fn update(path: &Path, template: Option<&str>, args: &[String]) -> Result<()> {
    update_with_clock(path, template, args, &wall_clock)
}
