//! Execution time files: per call, how long every rank spent in the
//! collective operation, in seconds.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;

use crate::{
    bandwidth::{CallId, CallMap, Rank, RankMap},
    comm::{CommInstance, JobId, job_id_from_dir},
};

/// call -> rank -> seconds
pub type ExecTimes = CallMap<RankMap<f64>>;

pub fn timing_file_name(operation: &str, instance: CommInstance, job_id: JobId) -> String {
    let CommInstance { lead_rank, comm_id } = instance;
    format!("{operation}_timings.{lead_rank}.{comm_id}.{job_id}")
}

pub fn timing_file_path(
    input_dir: &Path,
    operation: &str,
    instance: CommInstance,
    job_id: JobId,
) -> PathBuf {
    input_dir.join(timing_file_name(operation, instance, job_id))
}

/// The job id can differ from the one of the count files, thus is
/// looked up separately.
pub fn job_id_from_timing_files(
    input_dir: &Path,
    operation: &str,
    instance: CommInstance,
) -> Result<JobId> {
    let CommInstance { lead_rank, comm_id } = instance;
    let re = Regex::new(&format!(
        r"^{}_timings\.{lead_rank}\.{comm_id}\.(?P<job>\d+)$",
        regex::escape(operation)
    ))?;
    job_id_from_dir(
        input_dir,
        &re,
        &format!("{operation} timing files for {instance}"),
    )
}

/// Parse blocks of the form `# Call <id>` followed by lines
/// `<rank>: <seconds>`.
pub fn parse_timings(s: &str, path: &Path) -> Result<ExecTimes> {
    let mut times = ExecTimes::new();
    let mut call: Option<CallId> = None;
    for (i, line) in s.lines().enumerate() {
        let linenum = i + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        (|| -> Result<()> {
            if let Some(id) = line.strip_prefix("# Call ") {
                let id: CallId = id.trim().parse()?;
                times.entry(id).or_default();
                call = Some(id);
            } else if line.starts_with('#') {
                // comment
            } else {
                let call = call.ok_or_else(|| anyhow!("timing given before the first call"))?;
                let (rank, time) = line
                    .split_once(':')
                    .ok_or_else(|| anyhow!("missing ':' after the rank"))?;
                let rank: Rank = rank.trim().parse()?;
                let time: f64 = time.trim().parse()?;
                if !time.is_finite() || time < 0. {
                    bail!("invalid execution time {time}")
                }
                let ranks = times.entry(call).or_default();
                if ranks.insert(rank, time).is_some() {
                    bail!("duplicate execution time for call {call}, rank {rank}")
                }
            }
            Ok(())
        })()
        .with_context(|| anyhow!("{path:?}:{linenum}: {line:?}"))?;
    }
    Ok(times)
}

pub fn load_timings(path: &Path) -> Result<ExecTimes> {
    let s = std::fs::read_to_string(path)
        .with_context(|| anyhow!("reading execution time file {path:?}"))?;
    parse_timings(&s, path)
}
