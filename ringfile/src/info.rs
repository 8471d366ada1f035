//! Key/value dump of a database's configuration and prep state.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::error::Result;
use crate::file::RrdFile;
use crate::format::{cdp_param, ds_param, pdp_param, rra_param, Consolidation, DsType, Rrd};
use crate::rpn;

/// One value of the info dump. Counters and floats keep their native
/// representation so the JSON output stays typed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InfoValue {
    Str(String),
    Cnt(u64),
    Val(f64),
}

impl fmt::Display for InfoValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfoValue::Str(s) => write!(f, "\"{s}\""),
            InfoValue::Cnt(c) => write!(f, "{c}"),
            InfoValue::Val(v) => {
                if v.is_nan() {
                    write!(f, "NaN")
                } else {
                    write!(f, "{v:.10e}")
                }
            }
        }
    }
}

/// Produce the ordered key/value description of an open database.
pub fn info_from(rrd: &Rrd, filename: &str) -> Result<Vec<(String, InfoValue)>> {
    let mut out: Vec<(String, InfoValue)> = Vec::new();
    let mut push = |key: String, value: InfoValue| out.push((key, value));

    push("filename".into(), InfoValue::Str(filename.into()));
    push(
        "rrd_version".into(),
        InfoValue::Str(rrd.stat_head.version.clone()),
    );
    push("step".into(), InfoValue::Cnt(rrd.stat_head.pdp_step));
    push(
        "last_update".into(),
        InfoValue::Cnt(rrd.live_head.last_up as u64),
    );
    push("header_size".into(), InfoValue::Cnt(rrd.header_size()));

    for (i, ds) in rrd.ds_def.iter().enumerate() {
        let name = &ds.name;
        push(format!("ds[{name}].index"), InfoValue::Cnt(i as u64));
        push(format!("ds[{name}].type"), InfoValue::Str(ds.dst.clone()));
        match ds.ds_type()? {
            DsType::Compute => {
                let nodes = rpn::expand(&ds.par)?;
                let names: Vec<String> =
                    rrd.ds_def.iter().map(|d| d.name.clone()).collect();
                push(
                    format!("ds[{name}].cdef"),
                    InfoValue::Str(rpn::to_expr_string(&nodes, &names)),
                );
            }
            _ => {
                push(
                    format!("ds[{name}].minimal_heartbeat"),
                    InfoValue::Cnt(ds.par[ds_param::MRHB].cnt()),
                );
                push(format!("ds[{name}].min"), InfoValue::Val(ds.min()));
                push(format!("ds[{name}].max"), InfoValue::Val(ds.max()));
            }
        }
        push(
            format!("ds[{name}].last_ds"),
            InfoValue::Str(rrd.pdp_prep[i].last_ds.clone()),
        );
        push(
            format!("ds[{name}].value"),
            InfoValue::Val(rrd.pdp_prep[i].scratch[pdp_param::VAL].val()),
        );
        push(
            format!("ds[{name}].unknown_sec"),
            InfoValue::Cnt(rrd.pdp_prep[i].scratch[pdp_param::UNKN_SEC_CNT].cnt()),
        );
    }

    for (i, def) in rrd.rra_def.iter().enumerate() {
        let cf = def.cf()?;
        push(format!("rra[{i}].cf"), InfoValue::Str(def.cf_name.clone()));
        push(format!("rra[{i}].rows"), InfoValue::Cnt(def.row_cnt));
        push(
            format!("rra[{i}].cur_row"),
            InfoValue::Cnt(rrd.rra_ptr[i].cur_row),
        );
        push(format!("rra[{i}].pdp_per_row"), InfoValue::Cnt(def.pdp_cnt));
        match cf {
            Consolidation::HwPredict | Consolidation::MhwPredict => {
                push(
                    format!("rra[{i}].alpha"),
                    InfoValue::Val(def.par[rra_param::HW_ALPHA].val()),
                );
                push(
                    format!("rra[{i}].beta"),
                    InfoValue::Val(def.par[rra_param::HW_BETA].val()),
                );
            }
            Consolidation::Seasonal | Consolidation::DevSeasonal => {
                push(
                    format!("rra[{i}].gamma"),
                    InfoValue::Val(def.par[rra_param::SEASONAL_GAMMA].val()),
                );
                if rrd.version() >= 4 {
                    push(
                        format!("rra[{i}].smoothing_window"),
                        InfoValue::Val(def.par[rra_param::SEASONAL_SMOOTHING_WINDOW].val()),
                    );
                }
            }
            Consolidation::Failures => {
                push(
                    format!("rra[{i}].delta_pos"),
                    InfoValue::Val(def.par[rra_param::DELTA_POS].val()),
                );
                push(
                    format!("rra[{i}].delta_neg"),
                    InfoValue::Val(def.par[rra_param::DELTA_NEG].val()),
                );
                push(
                    format!("rra[{i}].failure_threshold"),
                    InfoValue::Cnt(def.par[rra_param::FAILURE_THRESHOLD].cnt()),
                );
                push(
                    format!("rra[{i}].window_length"),
                    InfoValue::Cnt(def.par[rra_param::WINDOW_LEN].cnt()),
                );
            }
            Consolidation::DevPredict => {}
            _ => {
                push(format!("rra[{i}].xff"), InfoValue::Val(def.xff()));
            }
        }

        for ds_idx in 0..rrd.stat_head.ds_cnt as usize {
            let cdp = &rrd.cdp_prep[rrd.cdp_idx(i, ds_idx)];
            match cf {
                Consolidation::HwPredict | Consolidation::MhwPredict => {
                    push(
                        format!("rra[{i}].cdp_prep[{ds_idx}].intercept"),
                        InfoValue::Val(cdp.scratch[cdp_param::HW_INTERCEPT].val()),
                    );
                    push(
                        format!("rra[{i}].cdp_prep[{ds_idx}].slope"),
                        InfoValue::Val(cdp.scratch[cdp_param::HW_SLOPE].val()),
                    );
                    push(
                        format!("rra[{i}].cdp_prep[{ds_idx}].NaN_count"),
                        InfoValue::Cnt(cdp.scratch[cdp_param::NULL_COUNT].cnt()),
                    );
                }
                Consolidation::Seasonal => {
                    push(
                        format!("rra[{i}].cdp_prep[{ds_idx}].seasonal"),
                        InfoValue::Val(cdp.scratch[cdp_param::HW_SEASONAL].val()),
                    );
                }
                Consolidation::DevSeasonal => {
                    push(
                        format!("rra[{i}].cdp_prep[{ds_idx}].deviation"),
                        InfoValue::Val(cdp.scratch[cdp_param::SEASONAL_DEVIATION].val()),
                    );
                }
                Consolidation::DevPredict => {}
                Consolidation::Failures => {
                    let window = def.par[rra_param::WINDOW_LEN].cnt() as usize;
                    let history: String = (0..window)
                        .map(|j| if cdp.violation(j) == 1 { '1' } else { '0' })
                        .collect();
                    push(
                        format!("rra[{i}].cdp_prep[{ds_idx}].history"),
                        InfoValue::Str(history),
                    );
                }
                _ => {
                    push(
                        format!("rra[{i}].cdp_prep[{ds_idx}].value"),
                        InfoValue::Val(cdp.scratch[cdp_param::VAL].val()),
                    );
                    push(
                        format!("rra[{i}].cdp_prep[{ds_idx}].unknown_datapoints"),
                        InfoValue::Cnt(cdp.scratch[cdp_param::UNKN_PDP_CNT].cnt()),
                    );
                }
            }
        }
    }

    Ok(out)
}

/// Open a file read-only and describe it.
pub fn info(path: &Path) -> Result<Vec<(String, InfoValue)>> {
    let file = RrdFile::open(path, false)?;
    let rrd = Rrd::decode(file.data())?;
    info_from(&rrd, &path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_formatting_matches_the_dump_style() {
        assert_eq!(InfoValue::Cnt(300).to_string(), "300");
        assert_eq!(InfoValue::Str("GAUGE".into()).to_string(), "\"GAUGE\"");
        assert_eq!(InfoValue::Val(f64::NAN).to_string(), "NaN");
        assert_eq!(InfoValue::Val(0.5).to_string(), "5.0000000000e-1");
    }
}
