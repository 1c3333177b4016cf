//! ---
//! erc_section: "05-replay-input"
//! erc_subsection: "module"
//! erc_type: "source"
//! erc_scope: "code"
//! erc_description: "Historical power-trace loading and resampling."
//! erc_version: "v0.0.0-prealpha"
//! erc_owner: "tbd"
//! ---
//! Historical power input: a timestamped power-measurement series,
//! resampled onto a fixed interval by averaging. The trace feeds the
//! offline scale-factor search and, in replay mode, acts as the live
//! tick source.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDateTime;
use csv::ReaderBuilder;
use tracing::debug;

const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"];

/// A power trace resampled onto the scheduling interval. Samples are in
/// the source's power unit (kW); normalization against a full-power
/// rating happens at the consumer.
#[derive(Debug, Clone)]
pub struct PowerTrace {
    interval_minutes: u32,
    samples: Vec<f64>,
}

impl PowerTrace {
    /// Load a timestamped CSV and resample it by averaging every
    /// `interval_minutes` bucket. Column names follow the source logger
    /// and are configurable. Rows with unparsable power values are
    /// skipped; empty buckets produce no sample.
    pub fn from_csv(
        path: &Path,
        interval_minutes: u32,
        timestamp_column: &str,
        power_column: &str,
    ) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read power trace {}", path.display()))?;
        Self::from_csv_str(&contents, interval_minutes, timestamp_column, power_column)
            .with_context(|| format!("invalid power trace {}", path.display()))
    }

    fn from_csv_str(
        contents: &str,
        interval_minutes: u32,
        timestamp_column: &str,
        power_column: &str,
    ) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .from_reader(contents.as_bytes());
        let headers = reader.headers().context("missing csv header row")?;
        let ts_index = headers
            .iter()
            .position(|h| h == timestamp_column)
            .ok_or_else(|| anyhow!("timestamp column '{}' not found", timestamp_column))?;
        let power_index = headers
            .iter()
            .position(|h| h == power_column)
            .ok_or_else(|| anyhow!("power column '{}' not found", power_column))?;

        let bucket_seconds = i64::from(interval_minutes) * 60;
        let mut buckets: BTreeMap<i64, (f64, u64)> = BTreeMap::new();
        for (row_index, row) in reader.records().enumerate() {
            let row = row.with_context(|| format!("invalid csv row {}", row_index + 2))?;
            let timestamp = parse_timestamp(
                row.get(ts_index)
                    .ok_or_else(|| anyhow!("row {} missing timestamp", row_index + 2))?,
            )?;
            let Some(power) = row
                .get(power_index)
                .and_then(|field| field.trim().parse::<f64>().ok())
                .filter(|value| value.is_finite())
            else {
                continue;
            };
            let bucket = timestamp.and_utc().timestamp().div_euclid(bucket_seconds);
            let entry = buckets.entry(bucket).or_insert((0.0, 0));
            entry.0 += power;
            entry.1 += 1;
        }

        let samples: Vec<f64> = buckets
            .values()
            .map(|(sum, count)| sum / *count as f64)
            .collect();
        debug!(
            interval_minutes,
            samples = samples.len(),
            "power trace resampled"
        );
        Ok(Self {
            interval_minutes,
            samples,
        })
    }

    /// Build a trace from already-resampled values (tests, synthetic runs).
    pub fn from_samples(interval_minutes: u32, samples: Vec<f64>) -> Self {
        Self {
            interval_minutes,
            samples,
        }
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    pub fn interval_minutes(&self) -> u32 {
        self.interval_minutes
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Peak power across the trace, the plant's raw full-power rating.
    pub fn max_power_kw(&self) -> f64 {
        self.samples.iter().copied().fold(0.0, f64::max)
    }

    /// Total generated energy across the trace.
    pub fn total_generated_kwh(&self) -> f64 {
        self.samples.iter().sum::<f64>() * (f64::from(self.interval_minutes) / 60.0)
    }
}

fn parse_timestamp(field: &str) -> Result<NaiveDateTime> {
    let field = field.trim();
    for format in TIMESTAMP_FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(field, format) {
            return Ok(parsed);
        }
    }
    Err(anyhow!("unparsable timestamp '{}'", field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "TIMESTAMP,InvPDC_kW_Avg";

    #[test]
    fn loads_and_resamples_by_average() {
        let csv = format!(
            "{}\n{}\n{}\n{}\n",
            HEADER,
            "2017-06-04 00:00:00,10.0",
            "2017-06-04 00:01:00,20.0",
            "2017-06-04 00:20:00,30.0"
        );
        let trace =
            PowerTrace::from_csv_str(&csv, 20, "TIMESTAMP", "InvPDC_kW_Avg").expect("parses");
        assert_eq!(trace.samples(), &[15.0, 30.0]);
        assert_eq!(trace.max_power_kw(), 30.0);
    }

    #[test]
    fn skips_unparsable_power_values() {
        let csv = format!(
            "{}\n{}\n{}\n",
            HEADER, "2017-06-04 00:00:00,NAN", "2017-06-04 00:00:30,12.0"
        );
        let trace =
            PowerTrace::from_csv_str(&csv, 1, "TIMESTAMP", "InvPDC_kW_Avg").expect("parses");
        assert_eq!(trace.samples(), &[12.0]);
    }

    #[test]
    fn missing_column_is_an_error() {
        let csv = format!("{}\n{}\n", HEADER, "2017-06-04 00:00:00,1.0");
        assert!(PowerTrace::from_csv_str(&csv, 1, "TIMESTAMP", "Power_kW").is_err());
    }

    #[test]
    fn total_generated_energy() {
        let trace = PowerTrace::from_samples(20, vec![5.0, 15.0, 25.0, 95.0]);
        assert!((trace.total_generated_kwh() - 140.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn loads_from_file() {
        let mut file = NamedTempFile::new().expect("tempfile");
        writeln!(file, "{}", HEADER).expect("write");
        writeln!(file, "2017-06-04 00:00:00,42.0").expect("write");
        file.flush().expect("flush");
        let trace = PowerTrace::from_csv(file.path(), 1, "TIMESTAMP", "InvPDC_kW_Avg")
            .expect("loads");
        assert_eq!(trace.samples(), &[42.0]);
    }
}
