//! End-to-end engine tests: create a file, push samples through the
//! update pipeline, read windows back.

use std::path::PathBuf;

use ringfile::create::create_with;
use ringfile::fetch::fetch;
use ringfile::file::RrdFile;
use ringfile::format::{Consolidation, Rrd};
use ringfile::info::{info, InfoValue};
use ringfile::update::update;
use ringfile::ErrorKind;

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Create a database with `last_up = 1000`, `step = 300` and a fixed
/// initial ring row, the setup shared by most scenarios.
fn setup(dir: &tempfile::TempDir, name: &str, schema: &[&str]) -> PathBuf {
    let path = dir.path().join(name);
    create_with(&path, 300, 1000, false, &strings(schema), |_| 0).unwrap();
    path
}

fn apply(path: &PathBuf, args: &[&str]) {
    update(path, None, &strings(args)).unwrap();
}

fn column(result: &ringfile::FetchResult, ds: usize) -> Vec<f64> {
    (0..result.rows()).map(|r| result.row(r)[ds]).collect()
}

fn assert_series(got: &[f64], want: &[f64]) {
    assert_eq!(got.len(), want.len(), "row count: {got:?} vs {want:?}");
    for (g, w) in got.iter().zip(want) {
        if w.is_nan() {
            assert!(g.is_nan(), "expected NaN, got {g} in {got:?}");
        } else {
            assert!((g - w).abs() < 1e-9, "expected {w}, got {g} in {got:?}");
        }
    }
}

#[test]
fn gauge_average_aligned_ticks() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(&dir, "gauge.rrd", &["DS:g:GAUGE:600:U:U", "RRA:AVERAGE:0.5:1:3"]);
    apply(&path, &["1300:10", "1600:20", "1900:30"]);

    let result = fetch(&path, Consolidation::Average, 1300, 1900, 300).unwrap();
    assert_eq!(result.step, 300);
    assert_eq!(result.start, 1200);
    assert_eq!(result.ds_names, vec!["g"]);
    assert_series(&column(&result, 0), &[10.0, 20.0, 30.0]);
    assert_eq!(result.timestamp(0), 1200);
    assert_eq!(result.timestamp(2), 1800);

    // a window beyond the retained span keeps its shape, all unknown
    let future = fetch(&path, Consolidation::Average, 5000, 5600, 300).unwrap();
    assert_eq!(future.start, 4800);
    assert_series(
        &column(&future, 0),
        &[f64::NAN, f64::NAN, f64::NAN, f64::NAN],
    );
}

#[test]
fn counter_rates_with_unknown_first_window() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(&dir, "counter.rrd", &["DS:c:COUNTER:600:U:U", "RRA:AVERAGE:0.5:1:3"]);
    apply(&path, &["1300:100", "1600:700", "1900:1300"]);

    let result = fetch(&path, Consolidation::Average, 1300, 1900, 300).unwrap();
    assert_series(&column(&result, 0), &[f64::NAN, 2.0, 2.0]);
}

#[test]
fn counter_wrap_adds_two_to_the_32() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(&dir, "wrap.rrd", &["DS:c:COUNTER:600:U:U", "RRA:AVERAGE:0.5:1:3"]);
    apply(&path, &["1300:4294967290", "1600:5"]);

    let result = fetch(&path, Consolidation::Average, 1300, 1600, 300).unwrap();
    // 4294967290 -> 5 wraps to a positive diff of 11 over 300 seconds
    assert_series(&column(&result, 0), &[f64::NAN, 11.0 / 300.0]);
}

#[test]
fn max_consolidation_over_three_pdps() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(&dir, "max.rrd", &["DS:g:GAUGE:600:U:U", "RRA:MAX:0:3:2"]);
    apply(
        &path,
        &["1300:5", "1600:9", "1900:3", "2200:7", "2500:4", "2800:8"],
    );

    let result = fetch(&path, Consolidation::Maximum, 1300, 2800, 900).unwrap();
    assert_eq!(result.step, 900);
    assert_series(&column(&result, 0), &[9.0, 8.0]);
}

#[test]
fn xff_turns_the_primary_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(&dir, "xff.rrd", &["DS:g:GAUGE:600:U:U", "RRA:MAX:0.5:3:2"]);
    apply(
        &path,
        &["1300:U", "1600:U", "1900:7", "2200:U", "2500:4", "2800:8"],
    );

    let result = fetch(&path, Consolidation::Maximum, 1300, 2800, 900).unwrap();
    // two unknown PDPs of three exceed xff 0.5 in the first CDP only
    assert_series(&column(&result, 0), &[f64::NAN, 8.0]);
}

#[test]
fn compute_ds_derives_from_its_operands() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(
        &dir,
        "compute.rrd",
        &[
            "DS:a:GAUGE:600:U:U",
            "DS:b:GAUGE:600:U:U",
            "DS:sum:COMPUTE:a,b,+",
            "RRA:LAST:0.5:1:1",
        ],
    );
    apply(&path, &["1300:2:3"]);

    let result = fetch(&path, Consolidation::Last, 1300, 1300, 300).unwrap();
    assert_eq!(result.ds_names, vec!["a", "b", "sum"]);
    assert_series(&column(&result, 0), &[2.0]);
    assert_series(&column(&result, 1), &[3.0]);
    assert_series(&column(&result, 2), &[5.0]);
}

#[test]
fn archive_selection_snaps_to_the_closest_cadence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("select.rrd");
    create_with(
        &path,
        300,
        1_000_000,
        false,
        &strings(&[
            "DS:v:GAUGE:600:U:U",
            "RRA:AVERAGE:0.5:1:100",
            "RRA:AVERAGE:0.5:12:100",
        ]),
        |_| 0,
    )
    .unwrap();

    let result = fetch(&path, Consolidation::Average, 1_000_000 - 3600, 1_000_000, 3000).unwrap();
    assert_eq!(result.step, 3600);
}

#[test]
fn ring_wraps_and_keeps_the_pointer_in_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ring.rrd");
    create_with(
        &path,
        300,
        1000,
        false,
        &strings(&["DS:g:GAUGE:600:U:U", "RRA:LAST:0.5:1:5"]),
        |_| 3,
    )
    .unwrap();

    for i in 1..=7i64 {
        apply(&path, &[&format!("{}:{}", 1000 + 300 * i, 10 * i)]);
    }

    let file = RrdFile::open(&path, false).unwrap();
    let rrd = Rrd::decode(file.data()).unwrap();
    // seven single-row advances from row 3 in a 5-row ring
    assert_eq!(rrd.rra_ptr[0].cur_row, (3 + 7) % 5);
    assert!(rrd.rra_ptr[0].cur_row < rrd.rra_def[0].row_cnt);

    // raw file order after the wrap: v7 overwrote v2, v6 overwrote v1
    let raw = file.read_values(rrd.rra_start(0), 5).unwrap();
    assert_eq!(raw, vec![70.0, 30.0, 40.0, 50.0, 60.0]);

    // the retained window reads back in time order
    let result = fetch(&path, Consolidation::Last, 1000 + 300 * 3, 1000 + 300 * 7, 300).unwrap();
    assert_series(&column(&result, 0), &[30.0, 40.0, 50.0, 60.0, 70.0]);
}

#[test]
fn non_monotonic_samples_are_dropped_without_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(&dir, "mono.rrd", &["DS:g:GAUGE:600:U:U", "RRA:AVERAGE:0.5:1:3"]);
    apply(&path, &["1300:10"]);

    // stale and duplicate timestamps succeed but change nothing
    apply(&path, &["1200:99"]);
    apply(&path, &["1300:99"]);

    let all = info(&path).unwrap();
    let last_update = all
        .iter()
        .find(|(k, _)| k == "last_update")
        .map(|(_, v)| v.clone())
        .unwrap();
    assert_eq!(last_update, InfoValue::Cnt(1300));

    // and the stored reading is still the accepted one
    let last_ds = all
        .iter()
        .find(|(k, _)| k == "ds[g].last_ds")
        .map(|(_, v)| v.clone())
        .unwrap();
    assert_eq!(last_ds, InfoValue::Str("10".into()));
}

#[test]
fn updates_keep_last_up_strictly_increasing() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(&dir, "strict.rrd", &["DS:g:GAUGE:600:U:U", "RRA:AVERAGE:0.5:1:3"]);
    apply(&path, &["1300.25:1", "1300.50:2"]);

    let file = RrdFile::open(&path, false).unwrap();
    let rrd = Rrd::decode(file.data()).unwrap();
    assert_eq!(rrd.live_head.last_up, 1300);
    assert_eq!(rrd.live_head.last_up_usec, 500_000);

    // an equal (sec, usec) pair is a no-op
    apply(&path, &["1300.50:3"]);
    let file = RrdFile::open(&path, false).unwrap();
    let rrd = Rrd::decode(file.data()).unwrap();
    assert_eq!(rrd.live_head.last_up_usec, 500_000);
}

#[test]
fn template_reorders_and_defaults_to_unknown() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(
        &dir,
        "tmpl.rrd",
        &[
            "DS:a:GAUGE:600:U:U",
            "DS:b:GAUGE:600:U:U",
            "RRA:LAST:0.5:1:1",
        ],
    );
    update(&path, Some("b"), &strings(&["1300:42"])).unwrap();

    let result = fetch(&path, Consolidation::Last, 1300, 1300, 300).unwrap();
    assert_series(&column(&result, 0), &[f64::NAN]); // a unknown
    assert_series(&column(&result, 1), &[42.0]);
}

#[test]
fn malformed_updates_fail_with_specific_kinds() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(&dir, "bad.rrd", &["DS:c:COUNTER:600:U:U", "RRA:AVERAGE:0.5:1:3"]);

    let cases: &[(&str, ErrorKind)] = &[
        ("1300:1.5", ErrorKind::InvalidInteger),
        ("1300:abc", ErrorKind::InvalidInteger),
        ("1300:1:2", ErrorKind::InvalidUpdateArg),
        ("1300", ErrorKind::InvalidUpdateArg),
        ("abc:1", ErrorKind::InvalidTime),
    ];
    for (arg, kind) in cases {
        let err = update(&path, None, &strings(&[arg])).unwrap_err();
        assert_eq!(err.kind(), *kind, "{arg}");
    }

    // committed arguments survive a later failure in the same call
    let err = update(&path, None, &strings(&["1300:100", "1600:oops"])).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInteger);
    let file = RrdFile::open(&path, false).unwrap();
    let rrd = Rrd::decode(file.data()).unwrap();
    assert_eq!(rrd.live_head.last_up, 1300);
}

#[test]
fn non_periodic_gap_blanks_intermediate_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(
        &dir,
        "gap.rrd",
        &[
            "DS:fast:GAUGE:10000:U:U",
            "DS:slow:GAUGE:300:U:U",
            "RRA:AVERAGE:0.5:1:10",
        ],
    );
    apply(&path, &["1300:10:10"]);
    // 1200 seconds of silence: beyond the slow heartbeat, so the whole
    // argument is non-periodic and only the final row keeps a value
    apply(&path, &["2500:20:20"]);

    let result = fetch(&path, Consolidation::Average, 1300, 2500, 300).unwrap();
    let fast = column(&result, 0);
    // rows stamped 1500, 1800, 2100 are blanked, 2400 carries the data
    assert!(fast[1].is_nan() && fast[2].is_nan() && fast[3].is_nan());
    assert!(!fast[4].is_nan());
}

#[test]
fn create_info_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(
        &dir,
        "info.rrd",
        &[
            "DS:in:COUNTER:600:0:1000000",
            "DS:total:COMPUTE:in,8,*",
            "RRA:AVERAGE:0.25:1:600",
            "RRA:MAX:0.5:12:100",
        ],
    );

    let all = info(&path).unwrap();
    let get = |key: &str| {
        all.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| panic!("missing key {key}"))
    };

    assert_eq!(get("rrd_version"), InfoValue::Str("0003".into()));
    assert_eq!(get("step"), InfoValue::Cnt(300));
    assert_eq!(get("last_update"), InfoValue::Cnt(1000));
    assert_eq!(get("ds[in].type"), InfoValue::Str("COUNTER".into()));
    assert_eq!(get("ds[in].minimal_heartbeat"), InfoValue::Cnt(600));
    assert_eq!(get("ds[in].min"), InfoValue::Val(0.0));
    assert_eq!(get("ds[in].max"), InfoValue::Val(1000000.0));
    assert_eq!(get("ds[in].last_ds"), InfoValue::Str("U".into()));
    assert_eq!(get("ds[total].type"), InfoValue::Str("COMPUTE".into()));
    assert_eq!(get("ds[total].cdef"), InfoValue::Str("in,8,*".into()));
    assert_eq!(get("rra[0].cf"), InfoValue::Str("AVERAGE".into()));
    assert_eq!(get("rra[0].rows"), InfoValue::Cnt(600));
    assert_eq!(get("rra[0].pdp_per_row"), InfoValue::Cnt(1));
    assert_eq!(get("rra[0].xff"), InfoValue::Val(0.25));
    assert_eq!(get("rra[1].cf"), InfoValue::Str("MAX".into()));
    assert_eq!(get("rra[1].pdp_per_row"), InfoValue::Cnt(12));

    // header size key matches the decoded geometry
    let file = RrdFile::open(&path, false).unwrap();
    let rrd = Rrd::decode(file.data()).unwrap();
    assert_eq!(get("header_size"), InfoValue::Cnt(rrd.header_size()));
    assert_eq!(file.len() as u64, rrd.total_size());
}

#[test]
fn holt_winters_archives_learn_and_stay_conformant() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hw.rrd");
    create_with(
        &path,
        300,
        1000,
        false,
        &strings(&["DS:v:GAUGE:600:U:U", "RRA:HWPREDICT:20:0.5:0.5:10"]),
        |_| 0,
    )
    .unwrap();

    // feed a steady signal through all five archives
    let mut args = Vec::new();
    for i in 1..=12i64 {
        args.push(format!("{}:100", 1000 + 300 * i));
    }
    update(&path, None, &args).unwrap();

    let file = RrdFile::open(&path, false).unwrap();
    let rrd = Rrd::decode(file.data()).unwrap();
    for (i, ptr) in rrd.rra_ptr.iter().enumerate() {
        assert!(ptr.cur_row < rrd.rra_def[i].row_cnt, "rra {i}");
    }

    let all = info(&path).unwrap();
    let get = |key: &str| {
        all.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| panic!("missing key {key}"))
    };

    // the intercept bootstraps from the observed level
    match get("rra[0].cdp_prep[0].intercept") {
        InfoValue::Val(v) => {
            assert!(!v.is_nan());
            assert!((v - 100.0).abs() < 50.0, "intercept {v}");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(get("rra[0].alpha"), InfoValue::Val(0.5));
    match get("rra[4].cdp_prep[0].history") {
        InfoValue::Str(h) => assert_eq!(h.len(), 9),
        other => panic!("unexpected {other:?}"),
    }

    // a prediction window is fetchable once the ring has content
    let result = fetch(&path, Consolidation::HwPredict, 2500, 4600, 300).unwrap();
    assert_eq!(result.step, 300);
    assert!(result.rows() > 0);
}

#[test]
fn absolute_and_derive_sources() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(
        &dir,
        "kinds.rrd",
        &[
            "DS:abs:ABSOLUTE:600:U:U",
            "DS:der:DERIVE:600:U:U",
            "RRA:AVERAGE:0.5:1:4",
        ],
    );
    apply(&path, &["1300:600:1000", "1600:900:700"]);

    let result = fetch(&path, Consolidation::Average, 1300, 1600, 300).unwrap();
    // ABSOLUTE spreads each reading over its interval: the window
    // stamped 1500 holds 100s at rate 2 plus 200s at rate 3
    assert_series(&column(&result, 0), &[2.0, 800.0 / 300.0]);
    // DERIVE may go negative, no wrap correction
    assert_series(&column(&result, 1), &[f64::NAN, -1.0]);
}

#[test]
fn min_max_rate_policing_discards_outliers() {
    let dir = tempfile::tempdir().unwrap();
    let path = setup(
        &dir,
        "police.rrd",
        &["DS:g:GAUGE:600:0:50", "RRA:LAST:0.5:1:4"],
    );
    apply(&path, &["1300:25", "1600:75"]);

    let result = fetch(&path, Consolidation::Last, 1300, 1600, 300).unwrap();
    // the 75 reading is discarded; the window keeps the carried-over 25
    assert_series(&column(&result, 0), &[25.0, 25.0]);
}
