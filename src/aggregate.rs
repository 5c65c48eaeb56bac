//! Fold the raw per-trial benchmark CSV into one summary row per run
//! configuration. Rows are grouped by (size, toolchain, instrumentation,
//! nodes, cores, benchmark); repeated trials of a configuration are reduced
//! with the reducers in `crate::stats`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use clap::clap_app;
use failure::format_err;
use failure_derive::Fail;
use log::info;
use serde::{Deserialize, Serialize};

use crate::stats;

#[derive(Debug, Fail)]
enum AggregateError {
    #[fail(display = "{} contains no data rows", _0)]
    EmptyInput(String),
}

/// One benchmark trial, as produced by the cluster runs.
#[derive(Debug, Deserialize)]
struct RawRow {
    #[serde(rename = "Size")]
    size: u64,
    toolchain: String,
    instrumentation: String,
    nodes: u32,
    cores: u32,
    benchmark: String,
    #[serde(rename = "Avg Latency(us)")]
    avg_latency: f64,
    #[serde(rename = "P50 Tail Lat(us)")]
    p50: f64,
    #[serde(rename = "P90 Tail Lat(us)")]
    p90: f64,
    #[serde(rename = "P99 Tail Lat(us)")]
    p99: f64,
}

#[derive(Debug, Serialize)]
struct SummaryRow {
    #[serde(rename = "Size")]
    size: u64,
    toolchain: String,
    instrumentation: String,
    nodes: u32,
    cores: u32,
    benchmark: String,
    grand_mean_avg: f64,
    se_avg: f64,
    median_p50: f64,
    mean_p90: f64,
    worst_p90: f64,
    mean_p99: f64,
    worst_p99: f64,
}

// Size leads the key, so the BTreeMap iterates in ascending-size order.
type GroupKey = (u64, String, String, u32, u32, String);

#[derive(Default)]
struct Samples {
    avg: Vec<f64>,
    p50: Vec<f64>,
    p90: Vec<f64>,
    p99: Vec<f64>,
}

pub fn cli_options() -> clap::App<'static, 'static> {
    clap_app! { aggregate =>
        (about: "Fold repeated benchmark trials into per-configuration summary statistics.")
        (@setting ArgRequiredElseHelp)
        (@setting DisableVersion)
        (@arg INPUT: +required +takes_value
         "The raw results CSV.")
        (@arg OUTPUT: +required +takes_value
         "Where to write the aggregated CSV.")
    }
}

pub fn run(sub_m: &clap::ArgMatches<'_>) -> Result<(), failure::Error> {
    let input = sub_m.value_of("INPUT").unwrap();
    let output = sub_m.value_of("OUTPUT").unwrap();

    let rows = read_raw(input)?;
    let raw_count = rows.len();
    let summary = aggregate(rows);
    info!(
        "folded {} trials into {} configurations",
        raw_count,
        summary.len()
    );

    write_summary(output, &summary)
}

fn read_raw<P: AsRef<Path>>(path: P) -> Result<Vec<RawRow>, failure::Error> {
    let path = path.as_ref();
    let mut rdr = csv::Reader::from_path(path)
        .map_err(|e| format_err!("cannot open {}: {}", path.display(), e))?;

    let mut rows = Vec::new();
    for record in rdr.deserialize() {
        let row: RawRow =
            record.map_err(|e| format_err!("malformed row in {}: {}", path.display(), e))?;
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(AggregateError::EmptyInput(path.display().to_string()).into());
    }

    Ok(rows)
}

fn write_summary(path: &str, summary: &[SummaryRow]) -> Result<(), failure::Error> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut wtr =
        csv::Writer::from_path(path).map_err(|e| format_err!("cannot write {}: {}", path, e))?;
    for row in summary {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn aggregate(rows: Vec<RawRow>) -> Vec<SummaryRow> {
    let mut groups: BTreeMap<GroupKey, Samples> = BTreeMap::new();
    for row in rows {
        let key = (
            row.size,
            row.toolchain,
            row.instrumentation,
            row.nodes,
            row.cores,
            row.benchmark,
        );
        let samples = groups.entry(key).or_default();
        samples.avg.push(row.avg_latency);
        samples.p50.push(row.p50);
        samples.p90.push(row.p90);
        samples.p99.push(row.p99);
    }

    groups
        .into_iter()
        .map(
            |((size, toolchain, instrumentation, nodes, cores, benchmark), s)| SummaryRow {
                size,
                toolchain,
                instrumentation,
                nodes,
                cores,
                benchmark,
                grand_mean_avg: stats::mean(&s.avg),
                se_avg: stats::std_err(&s.avg),
                median_p50: stats::median(&s.p50),
                mean_p90: stats::mean(&s.p90),
                worst_p90: stats::max(&s.p90),
                mean_p99: stats::mean(&s.p99),
                worst_p99: stats::max(&s.p99),
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Write;

    const EPS: f64 = 1e-12;

    fn row(size: u64, avg: f64, p50: f64, p90: f64, p99: f64) -> RawRow {
        RawRow {
            size,
            toolchain: "gcc12".into(),
            instrumentation: "scorepOFF".into(),
            nodes: 1,
            cores: 4,
            benchmark: "osu_allgather".into(),
            avg_latency: avg,
            p50,
            p90,
            p99,
        }
    }

    #[test]
    fn repeated_trials_fold_into_one_row() {
        let out = aggregate(vec![
            row(8, 10.0, 1.0, 4.0, 7.0),
            row(8, 20.0, 2.0, 5.0, 8.0),
            row(8, 30.0, 3.0, 6.0, 9.0),
        ]);

        assert_eq!(out.len(), 1);
        let s = &out[0];
        assert!((s.grand_mean_avg - 20.0).abs() < EPS);
        assert!((s.se_avg - 10.0 / 3.0_f64.sqrt()).abs() < EPS);
        assert!((s.median_p50 - 2.0).abs() < EPS);
        assert!((s.mean_p90 - 5.0).abs() < EPS);
        assert!((s.worst_p90 - 6.0).abs() < EPS);
        assert!((s.mean_p99 - 8.0).abs() < EPS);
        assert!((s.worst_p99 - 9.0).abs() < EPS);
    }

    #[test]
    fn single_trial_group_has_nan_standard_error() {
        let out = aggregate(vec![row(8, 12.5, 1.0, 4.0, 7.0)]);

        assert_eq!(out.len(), 1);
        assert!(out[0].se_avg.is_nan());
        assert!((out[0].grand_mean_avg - 12.5).abs() < EPS);
    }

    #[test]
    fn aggregation_is_idempotent_on_single_trial_groups() {
        // One row per key: every mean is the value itself, every max equals
        // its mean, the median is the value.
        let out = aggregate(vec![row(8, 3.5, 1.5, 4.25, 7.75)]);

        let s = &out[0];
        assert!((s.grand_mean_avg - 3.5).abs() < EPS);
        assert!((s.median_p50 - 1.5).abs() < EPS);
        assert!((s.mean_p90 - s.worst_p90).abs() < EPS);
        assert!((s.mean_p99 - s.worst_p99).abs() < EPS);
    }

    #[test]
    fn output_is_sorted_by_size() {
        let out = aggregate(vec![
            row(1024, 9.0, 1.0, 4.0, 7.0),
            row(8, 1.0, 1.0, 4.0, 7.0),
            row(64, 3.0, 1.0, 4.0, 7.0),
        ]);

        let sizes: Vec<u64> = out.iter().map(|s| s.size).collect();
        assert_eq!(sizes, vec![8, 64, 1024]);
    }

    #[test]
    fn distinct_configurations_stay_separate() {
        let mut instrumented = row(8, 5.0, 1.0, 4.0, 7.0);
        instrumented.instrumentation = "scorepON".into();

        let out = aggregate(vec![row(8, 10.0, 1.0, 4.0, 7.0), instrumented]);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn raw_csv_header_names_parse() {
        let data = "\
Size,toolchain,instrumentation,nodes,cores,benchmark,Avg Latency(us),P50 Tail Lat(us),P90 Tail Lat(us),P99 Tail Lat(us)
8,gcc12,scorepOFF,1,4,osu_allgather,1.5,1.2,2.0,3.1
";
        let mut rdr = csv::Reader::from_reader(data.as_bytes());
        let rows: Vec<RawRow> = rdr.deserialize().map(|r| r.unwrap()).collect();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].size, 8);
        assert_eq!(rows[0].toolchain, "gcc12");
        assert!((rows[0].avg_latency - 1.5).abs() < EPS);
        assert!((rows[0].p99 - 3.1).abs() < EPS);
    }

    #[test]
    fn malformed_rows_are_rejected() {
        let data = "\
Size,toolchain,instrumentation,nodes,cores,benchmark,Avg Latency(us),P50 Tail Lat(us),P90 Tail Lat(us),P99 Tail Lat(us)
8,gcc12,scorepOFF,1,4,osu_allgather,not-a-number,1.2,2.0,3.1
";
        let mut rdr = csv::Reader::from_reader(data.as_bytes());
        let rows: Result<Vec<RawRow>, _> = rdr.deserialize().collect();
        assert!(rows.is_err());
    }

    #[test]
    fn header_only_input_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "Size,toolchain,instrumentation,nodes,cores,benchmark,\
             Avg Latency(us),P50 Tail Lat(us),P90 Tail Lat(us),P99 Tail Lat(us)"
        )
        .unwrap();

        let err = read_raw(file.path()).unwrap_err();
        assert!(err.to_string().contains("contains no data rows"));
    }

    #[test]
    fn nan_standard_error_is_written_as_nan_literal() {
        let out = aggregate(vec![row(8, 12.5, 1.0, 4.0, 7.0)]);

        let mut wtr = csv::Writer::from_writer(vec![]);
        for s in &out {
            wtr.serialize(s).unwrap();
        }
        let written = String::from_utf8(wtr.into_inner().unwrap()).unwrap();

        // se_avg of a single trial must surface as NaN in the CSV, not 0
        let data_line = written.lines().nth(1).unwrap();
        assert!(data_line.contains(",NaN,"));
        assert!(!data_line.contains(",0,"));
        assert!(!data_line.contains(",0.0,"));
    }

    #[test]
    fn summary_csv_carries_the_expected_columns() {
        let out = aggregate(vec![row(8, 10.0, 1.0, 4.0, 7.0)]);

        let mut wtr = csv::Writer::from_writer(vec![]);
        for s in &out {
            wtr.serialize(s).unwrap();
        }
        let written = String::from_utf8(wtr.into_inner().unwrap()).unwrap();

        assert!(written.starts_with(
            "Size,toolchain,instrumentation,nodes,cores,benchmark,\
             grand_mean_avg,se_avg,median_p50,mean_p90,worst_p90,mean_p99,worst_p99\n"
        ));
    }
}
