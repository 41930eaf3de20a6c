//! Runs the bandwidth derivation for every communicator instance of
//! a profiler dump: loads counts and execution times, joins them by
//! call, computes the bandwidths and hands the results on (to be
//! written as reports, or summarized).

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use itertools::EitherOrBoth;
use kstring::KString;
use serde::{Deserialize, Serialize};
use strum_macros::EnumString;

use crate::{
    bandwidth::{BandwidthError, CallsData, ComputeOpts, ZeroTimePolicy, compute_all},
    comm::{CommInstance, JobId, LeadMap},
    config_file::load_config_file,
    counts::{CommCounts, CountsHeader, ReducedCounts, job_id_from_lead_rank},
    debug, info,
    join::{KeyVal, keyval_outer_join_2, keyvals},
    report::write_report,
    timings::{ExecTimes, job_id_from_timing_files, load_timings, timing_file_path},
    warn,
};

pub const DEFAULT_OPERATION: &str = "alltoallv";

/// What to do when a communicator instance fails.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab_case")]
#[serde(rename_all = "kebab-case")]
pub enum OnError {
    /// Stop at the first failing instance
    #[default]
    FailFast,
    /// Report the failure, go on with the next instance
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReportConfig {
    /// The name of the collective operation, as used in the timing
    /// file names
    pub operation: KString,
    pub on_error: OnError,
    pub zero_time: ZeroTimePolicy,
    /// Multiply the count totals with the datatype sizes
    pub scale_by_datatype_size: bool,
    pub parallel: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            operation: KString::from_static(DEFAULT_OPERATION),
            on_error: OnError::default(),
            zero_time: ZeroTimePolicy::default(),
            scale_by_datatype_size: false,
            parallel: false,
        }
    }
}

impl ReportConfig {
    pub fn load(path: &Path) -> Result<Self> {
        load_config_file(path)
    }

    pub fn compute_opts(&self) -> ComputeOpts {
        ComputeOpts {
            zero_time: self.zero_time,
            parallel: self.parallel,
        }
    }
}

/// The bandwidths of one communicator instance.
#[derive(Debug)]
pub struct InstanceBandwidth {
    pub instance: CommInstance,
    pub job_id: JobId,
    pub header: CountsHeader,
    pub calls: CallsData,
}

/// Check that every call with counts has execution times, and that
/// the calls are numbered `0..n` without gaps. Execution times of
/// calls without counts are dropped. Returns `n`.
pub fn align_calls(
    counts: &ReducedCounts,
    exec_times: &mut ExecTimes,
) -> Result<usize, BandwidthError> {
    let mut timings_only = Vec::new();
    for KeyVal { key: call, val } in
        keyval_outer_join_2(keyvals(&counts.send), keyvals(&*exec_times))
    {
        match val {
            EitherOrBoth::Both(_, _) => (),
            EitherOrBoth::Left(_) => {
                return Err(BandwidthError::MissingCallExecutionTimes { call });
            }
            EitherOrBoth::Right(_) => timings_only.push(call),
        }
    }
    for call in timings_only {
        warn!("ignoring execution times of call {call}, there are no counts for it");
        exec_times.remove(&call);
    }

    let num_calls = counts.send.len();
    if let Some(call) = (0..num_calls).find(|call| !counts.send.contains_key(call)) {
        return Err(BandwidthError::MissingCounts { call });
    }
    Ok(num_calls)
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub succeeded: usize,
    /// Only non-empty with `OnError::Continue`
    pub failed: Vec<CommInstance>,
}

pub struct ReportDriver {
    config: ReportConfig,
    input_dir: PathBuf,
    layout_dir: PathBuf,
}

impl ReportDriver {
    /// `layout_dir` is where the communicator layout file is found,
    /// by default `input_dir`.
    pub fn new(config: ReportConfig, input_dir: PathBuf, layout_dir: Option<PathBuf>) -> Self {
        let layout_dir = layout_dir.unwrap_or_else(|| input_dir.clone());
        Self {
            config,
            input_dir,
            layout_dir,
        }
    }

    pub fn lead_map(&self) -> Result<LeadMap> {
        LeadMap::load(&self.layout_dir)
    }

    pub fn compute_instance(&self, instance: CommInstance) -> Result<InstanceBandwidth> {
        let input_dir = &*self.input_dir;
        let CommInstance { lead_rank, .. } = instance;

        let job_id = job_id_from_lead_rank(input_dir, lead_rank)?;
        debug!("{instance}: job id {job_id}");

        let comm_counts = CommCounts::load(input_dir, job_id, lead_rank)?;
        // The number of ranks is the same for all the calls of a
        // communicator, we take it from the first record
        let header = comm_counts
            .header()
            .with_context(|| anyhow!("count file {:?}", comm_counts.path))?;
        let mut counts = comm_counts
            .reduce()
            .with_context(|| anyhow!("count file {:?}", comm_counts.path))?;
        if self.config.scale_by_datatype_size {
            counts.scale_by_datatype_size(&header)?;
        }

        info!("-> Loading execution times...");
        let operation = self.config.operation.as_str();
        let timing_job_id = job_id_from_timing_files(input_dir, operation, instance)?;
        let timing_path = timing_file_path(input_dir, operation, instance, timing_job_id);
        let mut exec_times = load_timings(&timing_path)?;

        info!("-> Calculating bandwidths...");
        let num_calls = align_calls(&counts, &mut exec_times)
            .with_context(|| anyhow!("joining counts with execution times from {timing_path:?}"))?;
        let calls = compute_all(
            num_calls,
            header.comm_size,
            &counts.send,
            &counts.recv,
            &exec_times,
            self.config.compute_opts(),
        )
        .with_context(|| anyhow!("calculating bandwidths"))?;
        debug!("{instance}: {num_calls} calls, {} ranks", header.comm_size);

        Ok(InstanceBandwidth {
            instance,
            job_id,
            header,
            calls,
        })
    }

    /// Compute every instance of the lead map in order and pass the
    /// result to `f`. Failures (of the computation or of `f`) are
    /// handled according to `config.on_error`.
    pub fn for_each_instance(
        &self,
        mut f: impl FnMut(InstanceBandwidth) -> Result<()>,
    ) -> Result<RunSummary> {
        let lead_map = self.lead_map()?;
        if lead_map.is_empty() {
            warn!(
                "no communicators listed in {:?}",
                LeadMap::layout_file_path(&self.layout_dir)
            );
        }

        let mut summary = RunSummary::default();
        for instance in lead_map.instances() {
            info!("Processing {instance}");
            match self.compute_instance(instance).and_then(&mut f) {
                Ok(()) => summary.succeeded += 1,
                Err(e) => match self.config.on_error {
                    OnError::FailFast => {
                        return Err(e.context(format!("processing {instance}")));
                    }
                    OnError::Continue => {
                        warn!("processing {instance} failed: {e:#}");
                        summary.failed.push(instance);
                    }
                },
            }
        }
        Ok(summary)
    }

    /// Write a report per instance into `output_dir`; `on_written` is
    /// called with the path of each written report.
    pub fn write_reports(
        &self,
        output_dir: &Path,
        mut on_written: impl FnMut(&Path),
    ) -> Result<RunSummary> {
        let mut lead_ranks_written = BTreeSet::new();
        self.for_each_instance(|bandwidth| {
            let InstanceBandwidth { instance, calls, .. } = bandwidth;
            info!("-> Saving results...");
            let path = write_report(output_dir, instance.lead_rank, &calls)?;
            if !lead_ranks_written.insert(instance.lead_rank) {
                warn!("{path:?} was overwritten with the data of {instance}");
            }
            on_written(&path);
            Ok(())
        })
    }
}
