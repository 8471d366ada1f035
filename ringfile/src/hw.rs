//! Holt-Winters aberrant behaviour detection.
//!
//! Five archive kinds cooperate through dependency indices stored in
//! their parameter slots: HWPREDICT (or MHWPREDICT) carries the
//! intercept/slope baseline, SEASONAL the seasonal coefficients,
//! DEVSEASONAL the smoothed seasonal deviations, DEVPREDICT a longer
//! history of those deviations, and FAILURES a sliding window of
//! violation flags. The additive and multiplicative methods differ in
//! seven scalar routines collected in [`HwFunctions`]; everything else
//! is shared.

use std::collections::VecDeque;

use log::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::file::RrdFile;
use crate::format::{cdp_param, rra_param, Consolidation, Rrd, Unival};

/// The method-specific scalar routines plus the identity element of the
/// seasonal coefficient (0 for additive, 1 for multiplicative).
pub struct HwFunctions {
    pub predict: fn(intercept: f64, slope: f64, null_count: u64, seasonal: f64) -> f64,
    pub intercept: fn(alpha: f64, observed: f64, seasonal: f64, coefs: &[Unival; 10]) -> f64,
    pub slope: fn(beta: f64, coefs: &[Unival; 10]) -> f64,
    pub seasonality: fn(gamma: f64, observed: f64, intercept: f64, seasonal: f64) -> f64,
    pub init_seasonality: fn(seasonal: f64, intercept: f64) -> f64,
    pub seasonal_deviation: fn(gamma: f64, prediction: f64, observed: f64, last: f64) -> f64,
    pub init_seasonal_deviation: fn(prediction: f64, observed: f64) -> f64,
    pub identity: f64,
}

fn additive_predict(intercept: f64, slope: f64, null_count: u64, seasonal: f64) -> f64 {
    intercept + slope * null_count as f64 + seasonal
}

fn additive_intercept(alpha: f64, observed: f64, seasonal: f64, coefs: &[Unival; 10]) -> f64 {
    alpha * (observed - seasonal)
        + (1.0 - alpha)
            * (coefs[cdp_param::HW_INTERCEPT].val()
                + coefs[cdp_param::HW_SLOPE].val() * coefs[cdp_param::NULL_COUNT].cnt() as f64)
}

fn additive_seasonality(gamma: f64, observed: f64, intercept: f64, seasonal: f64) -> f64 {
    gamma * (observed - intercept) + (1.0 - gamma) * seasonal
}

fn additive_init_seasonality(seasonal: f64, intercept: f64) -> f64 {
    seasonal - intercept
}

fn multiplicative_predict(intercept: f64, slope: f64, null_count: u64, seasonal: f64) -> f64 {
    (intercept + slope * null_count as f64) * seasonal
}

fn multiplicative_intercept(alpha: f64, observed: f64, seasonal: f64, coefs: &[Unival; 10]) -> f64 {
    if seasonal <= 0.0 {
        return f64::NAN;
    }
    alpha * (observed / seasonal)
        + (1.0 - alpha)
            * (coefs[cdp_param::HW_INTERCEPT].val()
                + coefs[cdp_param::HW_SLOPE].val() * coefs[cdp_param::NULL_COUNT].cnt() as f64)
}

fn multiplicative_seasonality(gamma: f64, observed: f64, intercept: f64, seasonal: f64) -> f64 {
    if intercept <= 0.0 {
        return f64::NAN;
    }
    gamma * (observed / intercept) + (1.0 - gamma) * seasonal
}

fn multiplicative_init_seasonality(seasonal: f64, intercept: f64) -> f64 {
    if intercept <= 0.0 {
        return f64::NAN;
    }
    seasonal / intercept
}

fn common_slope(beta: f64, coefs: &[Unival; 10]) -> f64 {
    beta * (coefs[cdp_param::HW_INTERCEPT].val() - coefs[cdp_param::HW_LAST_INTERCEPT].val())
        + (1.0 - beta) * coefs[cdp_param::HW_SLOPE].val()
}

fn common_seasonal_deviation(gamma: f64, prediction: f64, observed: f64, last: f64) -> f64 {
    gamma * (prediction - observed).abs() + (1.0 - gamma) * last
}

fn common_init_seasonal_deviation(prediction: f64, observed: f64) -> f64 {
    (prediction - observed).abs()
}

pub static ADDITIVE: HwFunctions = HwFunctions {
    predict: additive_predict,
    intercept: additive_intercept,
    slope: common_slope,
    seasonality: additive_seasonality,
    init_seasonality: additive_init_seasonality,
    seasonal_deviation: common_seasonal_deviation,
    init_seasonal_deviation: common_init_seasonal_deviation,
    identity: 0.0,
};

pub static MULTIPLICATIVE: HwFunctions = HwFunctions {
    predict: multiplicative_predict,
    intercept: multiplicative_intercept,
    slope: common_slope,
    seasonality: multiplicative_seasonality,
    init_seasonality: multiplicative_init_seasonality,
    seasonal_deviation: common_seasonal_deviation,
    init_seasonal_deviation: common_init_seasonal_deviation,
    identity: 1.0,
};

/// Dependent-RRA index of an archive, bounds checked.
pub fn hw_dep_idx(rrd: &Rrd, rra_idx: usize) -> Result<usize> {
    let idx = rrd.rra_def[rra_idx].par[rra_param::DEP_IDX].cnt() as usize;
    if idx >= rrd.rra_def.len() {
        return Err(Error::new(ErrorKind::BrokenHwDependency));
    }
    Ok(idx)
}

fn functions_for(cf: Consolidation) -> Result<&'static HwFunctions> {
    match cf {
        Consolidation::HwPredict => Ok(&ADDITIVE),
        Consolidation::MhwPredict => Ok(&MULTIPLICATIVE),
        _ => Err(Error::new(ErrorKind::UnknownConsolidation)),
    }
}

pub fn init_hwpredict_cdp(cdp: &mut crate::format::CdpPrep) {
    cdp.scratch[cdp_param::HW_INTERCEPT].set_val(f64::NAN);
    cdp.scratch[cdp_param::HW_LAST_INTERCEPT].set_val(f64::NAN);
    cdp.scratch[cdp_param::HW_SLOPE].set_val(f64::NAN);
    cdp.scratch[cdp_param::HW_LAST_SLOPE].set_val(f64::NAN);
    cdp.scratch[cdp_param::NULL_COUNT].set_cnt(1);
    cdp.scratch[cdp_param::LAST_NULL_COUNT].set_cnt(1);
}

pub fn init_seasonal_cdp(cdp: &mut crate::format::CdpPrep) {
    cdp.scratch[cdp_param::HW_SEASONAL].set_val(f64::NAN);
    cdp.scratch[cdp_param::HW_LAST_SEASONAL].set_val(f64::NAN);
    cdp.scratch[cdp_param::INIT_SEASONAL].set_cnt(1);
}

/// Read the seasonal coefficients `offset` rows ahead of the write
/// pointer of a SEASONAL/DEVSEASONAL archive.
pub fn lookup_seasonal(
    rrd: &Rrd,
    rra_idx: usize,
    rra_start: u64,
    file: &RrdFile,
    offset: u64,
) -> Result<Vec<f64>> {
    let row_cnt = rrd.rra_def[rra_idx].row_cnt;
    let row_idx = (rrd.rra_ptr[rra_idx].cur_row + offset) % row_cnt;
    let ds_cnt = rrd.stat_head.ds_cnt as usize;
    file.read_values(
        rra_start + row_idx * ds_cnt as u64 * crate::format::VALUE_SIZE as u64,
        ds_cnt,
    )
}

/// Wipe the violation history of a FAILURES prep area.
pub fn erase_violations(rrd: &mut Rrd, cdp_idx: usize, rra_idx: usize) -> Result<()> {
    if rrd.rra_def[rra_idx].cf()? != Consolidation::Failures {
        return Ok(());
    }
    let window = rrd.rra_def[rra_idx].par[rra_param::WINDOW_LEN].cnt();
    let cdp = &mut rrd.cdp_prep[cdp_idx];
    for i in 0..window as usize {
        cdp.set_violation(i, 0);
    }
    Ok(())
}

fn update_hwpredict(
    rrd: &mut Rrd,
    cdp_idx: usize,
    rra_idx: usize,
    ds_idx: usize,
    scratch_idx: usize,
    funcs: &HwFunctions,
) -> Result<()> {
    let alpha = rrd.rra_def[rra_idx].par[rra_param::HW_ALPHA].val();
    let beta = rrd.rra_def[rra_idx].par[rra_param::HW_BETA].val();
    let dep_idx = hw_dep_idx(rrd, rra_idx)?;

    {
        let coefs = &mut rrd.cdp_prep[cdp_idx].scratch;
        coefs[cdp_param::HW_LAST_INTERCEPT] = coefs[cdp_param::HW_INTERCEPT];
        coefs[cdp_param::HW_LAST_SLOPE] = coefs[cdp_param::HW_SLOPE];
        coefs[cdp_param::LAST_NULL_COUNT] = coefs[cdp_param::NULL_COUNT];
    }

    let seasonal_cdp = rrd.cdp_prep[rrd.cdp_idx(dep_idx, ds_idx)];
    let seasonal_coef = if dep_idx < rra_idx {
        seasonal_cdp.scratch[cdp_param::HW_LAST_SEASONAL].val()
    } else {
        seasonal_cdp.scratch[cdp_param::HW_SEASONAL].val()
    };

    let coefs = &mut rrd.cdp_prep[cdp_idx].scratch;
    let prediction;
    if coefs[cdp_param::HW_INTERCEPT].val().is_nan()
        || coefs[cdp_param::HW_SLOPE].val().is_nan()
        || seasonal_coef.is_nan()
    {
        prediction = f64::NAN;
        // bootstrap the baseline from the first real observation
        if coefs[cdp_param::HW_INTERCEPT].val().is_nan()
            && !coefs[scratch_idx].val().is_nan()
        {
            let observed = coefs[scratch_idx].val();
            coefs[cdp_param::HW_INTERCEPT].set_val(observed);
            coefs[cdp_param::HW_LAST_INTERCEPT].set_val(observed);
            coefs[cdp_param::HW_SLOPE].set_val(0.0);
            coefs[cdp_param::HW_LAST_SLOPE].set_val(0.0);
            coefs[cdp_param::NULL_COUNT].set_cnt(1);
            coefs[cdp_param::LAST_NULL_COUNT].set_cnt(1);
        }
    } else {
        prediction = (funcs.predict)(
            coefs[cdp_param::HW_INTERCEPT].val(),
            coefs[cdp_param::HW_SLOPE].val(),
            coefs[cdp_param::NULL_COUNT].cnt(),
            seasonal_coef,
        );
        if coefs[scratch_idx].val().is_nan() {
            let n = coefs[cdp_param::NULL_COUNT].cnt();
            coefs[cdp_param::NULL_COUNT].set_cnt(n + 1);
        } else {
            let observed = coefs[scratch_idx].val();
            let new_intercept = (funcs.intercept)(alpha, observed, seasonal_coef, coefs);
            coefs[cdp_param::HW_INTERCEPT].set_val(new_intercept);
            let new_slope = (funcs.slope)(beta, coefs);
            coefs[cdp_param::HW_SLOPE].set_val(new_slope);
            coefs[cdp_param::NULL_COUNT].set_cnt(1);
        }
    }
    coefs[scratch_idx].set_val(prediction);
    Ok(())
}

fn update_seasonal(
    rrd: &mut Rrd,
    cdp_idx: usize,
    rra_idx: usize,
    ds_idx: usize,
    scratch_idx: usize,
    next_seasonal: &[f64],
    funcs: &HwFunctions,
) -> Result<()> {
    let dep_idx = hw_dep_idx(rrd, rra_idx)?;
    let hw_cdp_idx = rrd.cdp_idx(dep_idx, ds_idx);
    let gamma = rrd.rra_def[rra_idx].par[rra_param::SEASONAL_GAMMA].val();
    let hw_alpha = rrd.rra_def[dep_idx].par[rra_param::HW_ALPHA].val();

    // rotate the cached coefficients toward the incoming row
    let seasonal = rrd.cdp_prep[cdp_idx].scratch[cdp_param::HW_SEASONAL].val();
    rrd.cdp_prep[cdp_idx].scratch[cdp_param::HW_LAST_SEASONAL].set_val(seasonal);
    let incoming = next_seasonal.get(ds_idx).copied().unwrap_or(f64::NAN);
    rrd.cdp_prep[cdp_idx].scratch[cdp_param::HW_SEASONAL].set_val(incoming);

    let observed = rrd.cdp_prep[cdp_idx].scratch[scratch_idx].val();
    if observed.is_nan() {
        rrd.cdp_prep[cdp_idx].scratch[scratch_idx].set_val(seasonal);
        return Ok(());
    }

    let coefs = rrd.cdp_prep[hw_cdp_idx].scratch;
    let out = if dep_idx < rra_idx {
        // the associated HWPREDICT was updated earlier in this pass
        if coefs[cdp_param::HW_LAST_INTERCEPT].val().is_nan()
            || coefs[cdp_param::HW_LAST_SLOPE].val().is_nan()
        {
            f64::NAN
        } else if seasonal.is_nan() {
            (funcs.init_seasonality)(observed, coefs[cdp_param::HW_LAST_INTERCEPT].val())
        } else {
            let intercept = coefs[cdp_param::HW_INTERCEPT].val();
            (funcs.seasonality)(gamma, observed, intercept, seasonal)
        }
    } else {
        // SEASONAL is updated first; derive the new intercept here
        if coefs[cdp_param::HW_INTERCEPT].val().is_nan()
            || coefs[cdp_param::HW_SLOPE].val().is_nan()
        {
            funcs.identity
        } else if seasonal.is_nan() {
            (funcs.init_seasonality)(observed, coefs[cdp_param::HW_INTERCEPT].val())
        } else {
            let intercept = (funcs.intercept)(hw_alpha, observed, seasonal, &coefs);
            (funcs.seasonality)(gamma, observed, intercept, seasonal)
        }
    };
    rrd.cdp_prep[cdp_idx].scratch[scratch_idx].set_val(out);
    Ok(())
}

fn update_devpredict(
    rrd: &mut Rrd,
    cdp_idx: usize,
    rra_idx: usize,
    ds_idx: usize,
    scratch_idx: usize,
) -> Result<()> {
    let dep_idx = hw_dep_idx(rrd, rra_idx)?;
    let seasonal_cdp = rrd.cdp_prep[rrd.cdp_idx(dep_idx, ds_idx)];
    let v = if dep_idx < rra_idx {
        seasonal_cdp.scratch[cdp_param::LAST_SEASONAL_DEVIATION].val()
    } else {
        seasonal_cdp.scratch[cdp_param::SEASONAL_DEVIATION].val()
    };
    rrd.cdp_prep[cdp_idx].scratch[scratch_idx].set_val(v);
    Ok(())
}

fn update_devseasonal(
    rrd: &mut Rrd,
    cdp_idx: usize,
    rra_idx: usize,
    ds_idx: usize,
    scratch_idx: usize,
    next_deviation: &[f64],
    funcs: &HwFunctions,
) -> Result<()> {
    let hw_rra_idx = hw_dep_idx(rrd, rra_idx)?;
    let hw_cdp_idx = rrd.cdp_idx(hw_rra_idx, ds_idx);
    let gamma = rrd.rra_def[rra_idx].par[rra_param::SEASONAL_GAMMA].val();

    let last_dev = rrd.cdp_prep[cdp_idx].scratch[cdp_param::SEASONAL_DEVIATION].val();
    rrd.cdp_prep[cdp_idx].scratch[cdp_param::LAST_SEASONAL_DEVIATION].set_val(last_dev);
    let incoming = next_deviation.get(ds_idx).copied().unwrap_or(f64::NAN);
    rrd.cdp_prep[cdp_idx].scratch[cdp_param::SEASONAL_DEVIATION].set_val(incoming);

    let seasonal_rra_idx = hw_dep_idx(rrd, hw_rra_idx)?;
    let seasonal_cdp = rrd.cdp_prep[rrd.cdp_idx(seasonal_rra_idx, ds_idx)];
    let seasonal_coef = if seasonal_rra_idx < rra_idx {
        seasonal_cdp.scratch[cdp_param::HW_LAST_SEASONAL].val()
    } else {
        seasonal_cdp.scratch[cdp_param::HW_SEASONAL].val()
    };

    let coefs = rrd.cdp_prep[hw_cdp_idx].scratch;
    let prediction = if hw_rra_idx < rra_idx {
        if coefs[cdp_param::HW_LAST_INTERCEPT].val().is_nan()
            || coefs[cdp_param::HW_LAST_SLOPE].val().is_nan()
            || seasonal_coef.is_nan()
        {
            rrd.cdp_prep[cdp_idx].scratch[scratch_idx].set_val(f64::NAN);
            return Ok(());
        } else {
            (funcs.predict)(
                coefs[cdp_param::HW_LAST_INTERCEPT].val(),
                coefs[cdp_param::HW_LAST_SLOPE].val(),
                coefs[cdp_param::LAST_NULL_COUNT].cnt(),
                seasonal_coef,
            )
        }
    } else if coefs[cdp_param::HW_INTERCEPT].val().is_nan()
        || coefs[cdp_param::HW_SLOPE].val().is_nan()
        || seasonal_coef.is_nan()
    {
        rrd.cdp_prep[cdp_idx].scratch[scratch_idx].set_val(f64::NAN);
        return Ok(());
    } else {
        (funcs.predict)(
            coefs[cdp_param::HW_INTERCEPT].val(),
            coefs[cdp_param::HW_SLOPE].val(),
            coefs[cdp_param::NULL_COUNT].cnt(),
            seasonal_coef,
        )
    };

    let observed = rrd.cdp_prep[cdp_idx].scratch[scratch_idx].val();
    let out = if observed.is_nan() {
        last_dev
    } else if last_dev.is_nan() {
        (funcs.init_seasonal_deviation)(prediction, observed)
    } else {
        (funcs.seasonal_deviation)(gamma, prediction, observed, last_dev)
    };
    rrd.cdp_prep[cdp_idx].scratch[scratch_idx].set_val(out);
    Ok(())
}

fn hw_is_violation(observed: f64, prediction: f64, deviation: f64, pos: f64, neg: f64) -> bool {
    observed > prediction + pos * deviation || observed < prediction - neg * deviation
}

fn update_failures(
    rrd: &mut Rrd,
    cdp_idx: usize,
    rra_idx: usize,
    ds_idx: usize,
    scratch_idx: usize,
    funcs: &HwFunctions,
) -> Result<()> {
    // a violation depends on three archives up the chain
    let dev_rra_idx = hw_dep_idx(rrd, rra_idx)?;
    let hw_rra_idx = hw_dep_idx(rrd, dev_rra_idx)?;
    let seasonal_rra_idx = hw_dep_idx(rrd, hw_rra_idx)?;

    let delta_pos = rrd.rra_def[rra_idx].par[rra_param::DELTA_POS].val();
    let delta_neg = rrd.rra_def[rra_idx].par[rra_param::DELTA_NEG].val();
    let window_len = rrd.rra_def[rra_idx].par[rra_param::WINDOW_LEN].cnt();
    let threshold = rrd.rra_def[rra_idx].par[rra_param::FAILURE_THRESHOLD].cnt();

    let dev_cdp = rrd.cdp_prep[rrd.cdp_idx(dev_rra_idx, ds_idx)];
    let deviation = if rra_idx < seasonal_rra_idx {
        dev_cdp.scratch[cdp_param::SEASONAL_DEVIATION].val()
    } else {
        dev_cdp.scratch[cdp_param::LAST_SEASONAL_DEVIATION].val()
    };

    let mut violation = 0u8;
    if !deviation.is_nan() {
        let seasonal_cdp = rrd.cdp_prep[rrd.cdp_idx(seasonal_rra_idx, ds_idx)];
        let seasonal_coef = if rra_idx < seasonal_rra_idx {
            seasonal_cdp.scratch[cdp_param::HW_SEASONAL].val()
        } else {
            seasonal_cdp.scratch[cdp_param::HW_LAST_SEASONAL].val()
        };

        let hw_cdp = rrd.cdp_prep[rrd.cdp_idx(hw_rra_idx, ds_idx)];
        let prediction = if rra_idx < hw_rra_idx {
            (funcs.predict)(
                hw_cdp.scratch[cdp_param::HW_INTERCEPT].val(),
                hw_cdp.scratch[cdp_param::HW_SLOPE].val(),
                hw_cdp.scratch[cdp_param::NULL_COUNT].cnt(),
                seasonal_coef,
            )
        } else {
            (funcs.predict)(
                hw_cdp.scratch[cdp_param::HW_LAST_INTERCEPT].val(),
                hw_cdp.scratch[cdp_param::HW_LAST_SLOPE].val(),
                hw_cdp.scratch[cdp_param::LAST_NULL_COUNT].cnt(),
                seasonal_coef,
            )
        };

        let observed = rrd.cdp_prep[cdp_idx].scratch[scratch_idx].val();
        if observed.is_nan() {
            violation = 1;
        } else if hw_is_violation(observed, prediction, deviation, delta_pos, delta_neg) {
            violation = 1;
        }
    }

    // shift the window and count hits
    let cdp = &mut rrd.cdp_prep[cdp_idx];
    let mut violation_cnt = violation as u64;
    for i in (1..window_len as usize).rev() {
        let prev = cdp.violation(i - 1);
        cdp.set_violation(i, prev);
        violation_cnt += prev as u64;
    }
    cdp.set_violation(0, violation);

    let failed = if violation_cnt < threshold { 0.0 } else { 1.0 };
    cdp.scratch[scratch_idx].set_val(failed);
    Ok(())
}

/// Store the observation into the scratch slot and run the CF-specific
/// update. Plain CFs only store; the value left in the slot is what
/// gets written to the row.
#[allow(clippy::too_many_arguments)]
pub fn update_aberrant_cf(
    rrd: &mut Rrd,
    pdp_val: f64,
    cf: Consolidation,
    cdp_idx: usize,
    rra_idx: usize,
    ds_idx: usize,
    scratch_idx: usize,
    seasonal_coef: &[f64],
) -> Result<()> {
    rrd.cdp_prep[cdp_idx].scratch[scratch_idx].set_val(pdp_val);
    match cf {
        Consolidation::HwPredict => {
            update_hwpredict(rrd, cdp_idx, rra_idx, ds_idx, scratch_idx, &ADDITIVE)
        }
        Consolidation::MhwPredict => {
            update_hwpredict(rrd, cdp_idx, rra_idx, ds_idx, scratch_idx, &MULTIPLICATIVE)
        }
        Consolidation::DevPredict => {
            update_devpredict(rrd, cdp_idx, rra_idx, ds_idx, scratch_idx)
        }
        Consolidation::Seasonal => {
            let funcs = functions_for(rrd.rra_def[hw_dep_idx(rrd, rra_idx)?].cf()?)?;
            update_seasonal(rrd, cdp_idx, rra_idx, ds_idx, scratch_idx, seasonal_coef, funcs)
        }
        Consolidation::DevSeasonal => {
            let funcs = functions_for(rrd.rra_def[hw_dep_idx(rrd, rra_idx)?].cf()?)?;
            update_devseasonal(rrd, cdp_idx, rra_idx, ds_idx, scratch_idx, seasonal_coef, funcs)
        }
        Consolidation::Failures => {
            let dev = hw_dep_idx(rrd, rra_idx)?;
            let hw = hw_dep_idx(rrd, dev)?;
            let funcs = functions_for(rrd.rra_def[hw].cf()?)?;
            update_failures(rrd, cdp_idx, rra_idx, ds_idx, scratch_idx, funcs)
        }
        _ => Ok(()),
    }
}

/// Is this archive due for a seasonal smoothing pass? Also advances the
/// burn-in counter kept in the first data source's prep area.
pub fn schedule_smooth(rrd: &mut Rrd, rra_idx: usize, elapsed_pdp_st: u64) -> bool {
    let cdp_idx = rrd.cdp_idx(rra_idx, 0);
    let cur_row = rrd.rra_ptr[rra_idx].cur_row;
    let row_cnt = rrd.rra_def[rra_idx].row_cnt;
    let smooth_idx = rrd.rra_def[rra_idx].par[rra_param::SEASONAL_SMOOTH_IDX].cnt();

    let init_seasonal = rrd.cdp_prep[cdp_idx].scratch[cdp_param::INIT_SEASONAL].cnt();
    if init_seasonal > crate::format::BURNIN_CYCLES {
        if smooth_idx > cur_row {
            return cur_row + elapsed_pdp_st >= smooth_idx;
        }
        return cur_row + elapsed_pdp_st >= row_cnt
            && cur_row + elapsed_pdp_st >= row_cnt + smooth_idx;
    }
    // mark off one burn-in cycle per full pass over the ring
    if cur_row + elapsed_pdp_st >= row_cnt {
        rrd.cdp_prep[cdp_idx].scratch[cdp_param::INIT_SEASONAL].set_cnt(init_seasonal + 1);
        return true;
    }
    false
}

/// Smooth a full seasonal cycle with an equal-weight moving average
/// whose half-window is 5% of the period (or the stored
/// smoothing-window in version 4 files). For SEASONAL archives the
/// extracted baseline folds back into the HWPREDICT intercepts.
pub fn apply_smoother(
    rrd: &mut Rrd,
    rra_idx: usize,
    rra_start: u64,
    file: &mut RrdFile,
) -> Result<()> {
    let row_len = rrd.stat_head.ds_cnt as usize;
    let row_count = rrd.rra_def[rra_idx].row_cnt as usize;
    let window = if rrd.version() >= 4 {
        rrd.rra_def[rra_idx].par[rra_param::SEASONAL_SMOOTHING_WINDOW].val()
    } else {
        0.05
    };
    let offset = (window / 2.0 * row_count as f64).floor() as usize;
    if offset == 0 {
        return Ok(());
    }

    let mut values = file.read_values(rra_start, row_len * row_count)?;
    if values.iter().any(|v| v.is_nan()) {
        // still uninitialized entries; smoothing would poison the ring
        debug!("[hw] smoother skipped for rra {rra_idx}: seasonal array not fully primed");
        return Ok(());
    }

    let mut buffers: Vec<VecDeque<f64>> = vec![VecDeque::with_capacity(2 * offset + 1); row_len];
    let mut working_average = vec![0.0f64; row_len];
    let mut baseline = vec![0.0f64; row_len];

    let wrap = |i: i64| -> usize { i.rem_euclid(row_count as i64) as usize };

    for i in 0..2 * offset {
        let k = wrap(i as i64 - offset as i64);
        for j in 0..row_len {
            buffers[j].push_back(values[k * row_len + j]);
            working_average[j] += values[k * row_len + j];
        }
    }

    for i in offset..row_count + offset {
        for j in 0..row_len {
            let k = wrap(i as i64);
            working_average[j] += values[k * row_len + j];
            buffers[j].push_back(values[k * row_len + j]);

            // overwrite the center of the window
            let k = wrap(i as i64 - offset as i64);
            values[k * row_len + j] = working_average[j] / (2 * offset + 1) as f64;
            baseline[j] += values[k * row_len + j];

            working_average[j] -= buffers[j].pop_front().unwrap_or(0.0);
        }
    }
    for b in baseline.iter_mut() {
        *b /= row_count as f64;
    }

    if rrd.rra_def[rra_idx].cf()? == Consolidation::Seasonal {
        let dep_idx = hw_dep_idx(rrd, rra_idx)?;
        let init_seasonality = functions_for(rrd.rra_def[dep_idx].cf()?)?.init_seasonality;
        for j in 0..row_len {
            for i in 0..row_count {
                values[i * row_len + j] = init_seasonality(values[i * row_len + j], baseline[j]);
            }
            let cdp_idx = rrd.cdp_idx(dep_idx, j);
            let intercept = rrd.cdp_prep[cdp_idx].scratch[cdp_param::HW_INTERCEPT].val();
            rrd.cdp_prep[cdp_idx].scratch[cdp_param::HW_INTERCEPT].set_val(intercept + baseline[j]);
        }
    }

    file.write_values(rra_start, &values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn additive_and_multiplicative_predictions() {
        assert_eq!(additive_predict(10.0, 2.0, 3, 5.0), 21.0);
        assert_eq!(multiplicative_predict(10.0, 2.0, 3, 2.0), 32.0);
        assert!(multiplicative_intercept(0.5, 4.0, 0.0, &[Unival::default(); 10]).is_nan());
    }

    #[test]
    fn slope_blends_intercept_motion() {
        let mut coefs = [Unival::default(); 10];
        coefs[cdp_param::HW_INTERCEPT].set_val(12.0);
        coefs[cdp_param::HW_LAST_INTERCEPT].set_val(10.0);
        coefs[cdp_param::HW_SLOPE].set_val(1.0);
        // beta * 2 + (1 - beta) * 1 with beta = 0.5
        assert_eq!(common_slope(0.5, &coefs), 1.5);
    }

    #[test]
    fn violation_bounds() {
        assert!(!hw_is_violation(10.0, 10.0, 1.0, 2.0, 2.0));
        assert!(hw_is_violation(13.0, 10.0, 1.0, 2.0, 2.0));
        assert!(hw_is_violation(7.0, 10.0, 1.0, 2.0, 2.0));
    }
}
