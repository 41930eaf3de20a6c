//! Histograms of count magnitudes: every individual send count of a
//! lead rank's count file is put into one of the bins given by a list
//! of thresholds.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};

use crate::{
    comm::{CommId, CommInstance, JobId, LeadMap, LeadRank},
    counts::{CommCounts, Direction, job_id_from_lead_rank},
    info,
    io_utils::tempfile_utils::write_file_atomically,
};

pub const DEFAULT_THRESHOLDS: &str = "200";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BinsError {
    #[error("no bin thresholds given")]
    Empty,
    #[error("invalid bin threshold {0:?}, expecting a positive integer")]
    Invalid(String),
}

/// Parse a comma-separated list of thresholds; the result is sorted
/// and without duplicates.
pub fn parse_thresholds(s: &str) -> Result<Vec<u64>, BinsError> {
    let mut thresholds = s
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|t| match t.parse::<u64>() {
            Ok(0) | Err(_) => Err(BinsError::Invalid(t.into())),
            Ok(v) => Ok(v),
        })
        .collect::<Result<Vec<u64>, BinsError>>()?;
    if thresholds.is_empty() {
        return Err(BinsError::Empty);
    }
    thresholds.sort_unstable();
    thresholds.dedup();
    Ok(thresholds)
}

/// `thresholds.len() + 1` bins: `[0, t0)`, `[t0, t1)`, .., `[tk, ∞)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bins {
    thresholds: Vec<u64>,
    counts: Vec<usize>,
}

impl Bins {
    /// `thresholds` are sorted and deduplicated here; they must be
    /// non-empty and positive.
    pub fn new(mut thresholds: Vec<u64>) -> Result<Self, BinsError> {
        if thresholds.is_empty() {
            return Err(BinsError::Empty);
        }
        if thresholds.contains(&0) {
            return Err(BinsError::Invalid("0".into()));
        }
        thresholds.sort_unstable();
        thresholds.dedup();
        let counts = vec![0; thresholds.len() + 1];
        Ok(Self { thresholds, counts })
    }

    pub fn classify(
        thresholds: Vec<u64>,
        values: impl IntoIterator<Item = u64>,
    ) -> Result<Self, BinsError> {
        let mut bins = Self::new(thresholds)?;
        for v in values {
            bins.add(v);
        }
        Ok(bins)
    }

    pub fn add(&mut self, value: u64) {
        let i = self.thresholds.partition_point(|t| *t <= value);
        self.counts[i] += 1;
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// `(low, high)` of each bin, `high` exclusive, `None` for the
    /// last bin.
    pub fn ranges(&self) -> impl Iterator<Item = (u64, Option<u64>)> + '_ {
        let lows = std::iter::once(0).chain(self.thresholds.iter().copied());
        let highs = self.thresholds.iter().copied().map(Some).chain([None]);
        lows.zip(highs)
    }

    pub fn render(&self, out: &mut impl Write) -> std::io::Result<()> {
        for ((lo, hi), n) in self.ranges().zip(&self.counts) {
            match hi {
                Some(hi) => writeln!(out, "{lo}-{}: {n}", hi - 1)?,
                None => writeln!(out, "{lo}+: {n}")?,
            }
        }
        Ok(())
    }
}

pub fn bins_file_name(job_id: JobId, comm_id: CommId, lead_rank: LeadRank) -> String {
    format!("bins.job{job_id}.comm{comm_id}.rank{lead_rank}.md")
}

/// Classify all send counts of the count file of `instance`.
pub fn bins_for_instance(
    input_dir: &Path,
    instance: CommInstance,
    thresholds: &[u64],
) -> Result<(JobId, Bins)> {
    let job_id = job_id_from_lead_rank(input_dir, instance.lead_rank)?;
    let counts = CommCounts::load(input_dir, job_id, instance.lead_rank)?;
    let bins = Bins::classify(
        thresholds.to_vec(),
        counts.raw(Direction::Send).all_counts(),
    )?;
    Ok((job_id, bins))
}

pub fn save_bins(
    output_dir: &Path,
    job_id: JobId,
    instance: CommInstance,
    bins: &Bins,
) -> Result<PathBuf> {
    let path = output_dir.join(bins_file_name(job_id, instance.comm_id, instance.lead_rank));
    write_file_atomically(&path, |out| bins.render(out))
        .with_context(|| anyhow!("unable to write bins to {path:?}"))?;
    Ok(path)
}

/// Classify and save the counts of every communicator listed in the
/// layout file in `layout_dir`; `on_written` is called with the path
/// of each written file.
pub fn write_all_bins(
    input_dir: &Path,
    layout_dir: &Path,
    output_dir: &Path,
    thresholds: &[u64],
    mut on_written: impl FnMut(&Path),
) -> Result<usize> {
    let lead_map = LeadMap::load(layout_dir)?;
    let mut n = 0;
    for instance in lead_map.instances() {
        info!("Classifying counts of {instance}");
        let (job_id, bins) = bins_for_instance(input_dir, instance, thresholds)
            .with_context(|| anyhow!("processing {instance}"))?;
        let path = save_bins(output_dir, job_id, instance, &bins)?;
        on_written(&path);
        n += 1;
    }
    Ok(n)
}
