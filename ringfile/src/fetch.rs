//! Window reads.
//!
//! A fetch picks the archive that best matches the requested
//! consolidation, window and resolution, snaps the window to the
//! archive's cadence, trims it to the rows the ring retains and
//! materializes a dense block. A window with no retained rows keeps
//! its snapped shape and reads back as NaN. No lock is taken;
//! concurrent readers are safe and a racing writer is serialized at row
//! granularity by the page-aligned writes.

use std::path::Path;

use log::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::file::RrdFile;
use crate::format::{Consolidation, Rrd, VALUE_SIZE};

/// A dense, row-major block of consolidated values. Row `i` is stamped
/// `start + i * step` and covers the preceding `step` seconds.
#[derive(Debug)]
pub struct FetchResult {
    pub start: i64,
    pub end: i64,
    pub step: u64,
    pub ds_names: Vec<String>,
    pub data: Vec<f64>,
}

impl FetchResult {
    pub fn rows(&self) -> usize {
        if self.ds_names.is_empty() {
            0
        } else {
            self.data.len() / self.ds_names.len()
        }
    }

    pub fn row(&self, idx: usize) -> &[f64] {
        let w = self.ds_names.len();
        &self.data[idx * w..(idx + 1) * w]
    }

    pub fn timestamp(&self, idx: usize) -> i64 {
        self.start + idx as i64 * self.step as i64
    }
}

/// Pick the archive for `(cf, start, end, step)`: prefer archives whose
/// retained window covers `start` entirely, closest cadence first;
/// otherwise the one covering the largest part of the window.
fn choose_rra(rrd: &Rrd, cf: Consolidation, start: i64, end: i64, step: u64) -> Result<usize> {
    let mut best_full: Option<(i64, usize)> = None;
    let mut best_part: Option<(i64, i64, usize)> = None;
    let full_match = end - start;

    for (i, def) in rrd.rra_def.iter().enumerate() {
        if def.cf()? != cf {
            continue;
        }
        let cadence = (def.pdp_cnt * rrd.stat_head.pdp_step) as i64;
        let cal_end = rrd.live_head.last_up - rrd.live_head.last_up % cadence;
        let cal_start = cal_end - cadence * def.row_cnt as i64;
        let step_diff = (step as i64 - cadence).abs();

        if cal_start <= start {
            match best_full {
                Some((diff, _)) if step_diff >= diff => {}
                _ => best_full = Some((step_diff, i)),
            }
        } else {
            let covered = full_match - (cal_start - start);
            let better = match best_part {
                None => true,
                Some((best_cov, best_diff, _)) => {
                    covered > best_cov || (covered == best_cov && step_diff < best_diff)
                }
            };
            if better {
                best_part = Some((covered, step_diff, i));
            }
        }
    }

    best_full
        .map(|(_, i)| i)
        .or(best_part.map(|(_, _, i)| i))
        .ok_or_else(|| Error::with_detail(ErrorKind::NoMatchingRra, cf.name()))
}

/// Fetch a window at the given resolution from an already opened file.
pub fn fetch_from(
    file: &RrdFile,
    rrd: &Rrd,
    cf: Consolidation,
    start: i64,
    end: i64,
    step: u64,
) -> Result<FetchResult> {
    let chosen = choose_rra(rrd, cf, start, end, step)?;
    let def = &rrd.rra_def[chosen];
    let ds_cnt = rrd.stat_head.ds_cnt as usize;

    let step = def.pdp_cnt * rrd.stat_head.pdp_step;
    let istep = step as i64;
    let mut start = start - start.rem_euclid(istep);
    let end_rem = end.rem_euclid(istep);
    let mut end = if end_rem == 0 { end } else { end + istep - end_rem };

    // newest retained row is stamped at the last full cadence boundary
    let rra_end_time = rrd.live_head.last_up - rrd.live_head.last_up % istep;
    let rra_start_time = rra_end_time - istep * (def.row_cnt as i64 - 1);

    // trim the block to the rows the ring retains; a window with no
    // retained rows keeps its snapped shape and reads back as NaN
    if start.max(rra_start_time) <= end.min(rra_end_time) {
        start = start.max(rra_start_time);
        end = end.min(rra_end_time);
    }

    let rows = ((end - start) / istep + 1).max(0) as usize;

    debug!(
        "[fetch] rra {chosen} ({}) start {start} end {end} step {step} rows {rows}",
        def.cf_name
    );

    let start_offset = (start - rra_start_time) / istep;

    let rra_base = rrd.rra_start(chosen);
    let row_cnt = def.row_cnt as i64;
    let cur_row = rrd.rra_ptr[chosen].cur_row as i64;

    let mut data = Vec::with_capacity(rows * ds_cnt);
    for n in 0..rows as i64 {
        let i = start_offset + n;
        if i < 0 || i >= row_cnt {
            // outside the retained window
            data.extend(std::iter::repeat(f64::NAN).take(ds_cnt));
            continue;
        }
        // the row after the write pointer is the oldest retained one
        let ptr = (cur_row + 1 + i).rem_euclid(row_cnt);
        let off = rra_base + ptr as u64 * ds_cnt as u64 * VALUE_SIZE as u64;
        data.extend(file.read_values(off, ds_cnt)?);
    }

    Ok(FetchResult {
        start,
        end,
        step,
        ds_names: rrd.ds_def.iter().map(|ds| ds.name.clone()).collect(),
        data,
    })
}

/// Open a file read-only and fetch a window from it.
pub fn fetch(
    path: &Path,
    cf: Consolidation,
    start: i64,
    end: i64,
    step: u64,
) -> Result<FetchResult> {
    let file = RrdFile::open(path, false)?;
    let rrd = Rrd::decode(file.data())?;
    fetch_from(&file, &rrd, cf, start, end, step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::create;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn selection_prefers_full_match_with_closest_cadence() {
        let mut rrd = create::build_schema(
            "t.rrd",
            300,
            1_000_000,
            &strings(&[
                "DS:v:GAUGE:600:U:U",
                "RRA:AVERAGE:0.5:1:100",
                "RRA:AVERAGE:0.5:12:100",
                "RRA:MAX:0.5:1:100",
            ]),
        )
        .unwrap();
        rrd.live_head.last_up = 1_000_000;

        // both retain the one-hour window; 3600s cadence is closer to 3000
        let end = 1_000_000;
        let start = end - 3600;
        let idx = choose_rra(&rrd, Consolidation::Average, start, end, 3000).unwrap();
        assert_eq!(idx, 1);

        // a 300s request picks the fine archive
        let idx = choose_rra(&rrd, Consolidation::Average, start, end, 300).unwrap();
        assert_eq!(idx, 0);

        // CF must match exactly
        let idx = choose_rra(&rrd, Consolidation::Maximum, start, end, 300).unwrap();
        assert_eq!(idx, 2);
        assert_eq!(
            choose_rra(&rrd, Consolidation::Last, start, end, 300)
                .unwrap_err()
                .kind(),
            ErrorKind::NoMatchingRra
        );
    }

    #[test]
    fn partial_match_takes_best_coverage() {
        let mut rrd = create::build_schema(
            "t.rrd",
            300,
            1_000_000,
            &strings(&[
                "DS:v:GAUGE:600:U:U",
                "RRA:AVERAGE:0.5:1:10",
                "RRA:AVERAGE:0.5:1:50",
            ]),
        )
        .unwrap();
        rrd.live_head.last_up = 1_000_000;

        // neither archive retains a 10-day window; the longer one covers
        // more of it
        let end = 1_000_000;
        let start = end - 10 * 86_400;
        let idx = choose_rra(&rrd, Consolidation::Average, start, end, 300).unwrap();
        assert_eq!(idx, 1);
    }
}
