//! Which lead rank is responsible for which communicators.

use std::{
    collections::BTreeMap,
    fmt::Display,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;

use crate::bandwidth::Rank;

pub type LeadRank = Rank;
pub type CommId = usize;
pub type JobId = u64;

pub const LAYOUT_FILE_NAME: &str = "communicators.txt";

/// One communicator instance, as identified in the file names of the
/// profiler dumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CommInstance {
    pub lead_rank: LeadRank,
    pub comm_id: CommId,
}

impl Display for CommInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let CommInstance { lead_rank, comm_id } = self;
        write!(f, "lead rank {lead_rank}, communicator {comm_id}")
    }
}

/// Lead rank -> ids of the communicators it leads, both ascending.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LeadMap(BTreeMap<LeadRank, Vec<CommId>>);

impl LeadMap {
    /// Parse lines of the form `<leadRank>: <commId> <commId> ...`.
    pub fn parse(s: &str, path: &Path) -> Result<Self> {
        let mut map: BTreeMap<LeadRank, Vec<CommId>> = BTreeMap::new();
        for (i, line) in s.lines().enumerate() {
            let linenum = i + 1;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (lead, comms) = line
                .split_once(':')
                .ok_or_else(|| anyhow!("{path:?}:{linenum}: missing ':' in {line:?}"))?;
            let lead: LeadRank = lead
                .trim()
                .parse()
                .with_context(|| anyhow!("{path:?}:{linenum}: parsing lead rank {lead:?}"))?;
            let ids = map.entry(lead).or_default();
            for comm in comms.split_whitespace() {
                ids.push(comm.parse().with_context(|| {
                    anyhow!("{path:?}:{linenum}: parsing communicator id {comm:?}")
                })?);
            }
        }
        for ids in map.values_mut() {
            ids.sort();
            ids.dedup();
        }
        if let Some((lead, _)) = map.iter().find(|(_, ids)| ids.is_empty()) {
            bail!("{path:?}: lead rank {lead} has no communicators")
        }
        Ok(LeadMap(map))
    }

    pub fn layout_file_path(layout_dir: &Path) -> PathBuf {
        layout_dir.join(LAYOUT_FILE_NAME)
    }

    pub fn load(layout_dir: &Path) -> Result<Self> {
        let path = Self::layout_file_path(layout_dir);
        let s = std::fs::read_to_string(&path)
            .with_context(|| anyhow!("reading communicator layout file {path:?}"))?;
        Self::parse(&s, &path)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All instances, ordered by lead rank, then communicator id.
    pub fn instances(&self) -> impl Iterator<Item = CommInstance> + '_ {
        self.0.iter().flat_map(|(lead_rank, ids)| {
            ids.iter().map(|comm_id| CommInstance {
                lead_rank: *lead_rank,
                comm_id: *comm_id,
            })
        })
    }
}

/// Find the job id in the names of the files in `dir` that match
/// `re`, which must have a capture group named `job`. All matching
/// files must agree on the job id; `what` describes the files for
/// error messages.
pub fn job_id_from_dir(dir: &Path, re: &Regex, what: &str) -> Result<JobId> {
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir).with_context(|| anyhow!("listing directory {dir:?}"))? {
        let entry = entry.with_context(|| anyhow!("listing directory {dir:?}"))?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        if let Some(captures) = re.captures(file_name) {
            let job = &captures["job"];
            ids.push(
                job.parse::<JobId>()
                    .with_context(|| anyhow!("parsing job id {job:?} in {file_name:?}"))?,
            );
        }
    }
    ids.sort();
    ids.dedup();
    match ids.as_slice() {
        [] => bail!("no {what} found in {dir:?}"),
        [id] => Ok(*id),
        _ => bail!("{what} for multiple jobs found in {dir:?}: job ids {ids:?}"),
    }
}
