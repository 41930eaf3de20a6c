//! Count files: for every call of a collective operation and every
//! rank, the list of counts the rank sent and received (one entry
//! per transfer, i.e. per peer). The lists are kept as they are read
//! (`RawCounts`) and summed into one total per call and rank
//! (`ReducedCounts`) before deriving bandwidths.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use regex::Regex;

use crate::{
    bandwidth::{CallId, CallMap, Rank, RankMap},
    comm::{JobId, LeadRank, job_id_from_dir},
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DatasetError {
    #[error("no count records")]
    NoCountRecords,
    #[error("invalid {what}: 0")]
    Degenerate { what: &'static str },
    #[error("header of count record {record} differs from the one of the first record")]
    HeaderMismatch { record: usize },
    #[error("sum of counts overflows for call {call}, rank {rank}")]
    CountOverflow { call: CallId, rank: Rank },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Recv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountsHeader {
    pub comm_size: usize,
    pub send_datatype_size: u64,
    pub recv_datatype_size: u64,
}

impl CountsHeader {
    pub fn datatype_size(&self, direction: Direction) -> u64 {
        match direction {
            Direction::Send => self.send_datatype_size,
            Direction::Recv => self.recv_datatype_size,
        }
    }

    /// None of the values may be zero.
    pub fn check(self) -> Result<Self, DatasetError> {
        let CountsHeader {
            comm_size,
            send_datatype_size,
            recv_datatype_size,
        } = self;
        if comm_size == 0 {
            return Err(DatasetError::Degenerate {
                what: "number of ranks",
            });
        }
        if send_datatype_size == 0 {
            return Err(DatasetError::Degenerate {
                what: "send datatype size",
            });
        }
        if recv_datatype_size == 0 {
            return Err(DatasetError::Degenerate {
                what: "recv datatype size",
            });
        }
        Ok(self)
    }
}

/// call -> rank -> the individual counts, in file order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RawCounts(CallMap<RankMap<Vec<u64>>>);

impl RawCounts {
    /// Appends to what is already there for `call` and `rank`.
    pub fn push(&mut self, call: CallId, rank: Rank, counts: impl IntoIterator<Item = u64>) {
        self.0
            .entry(call)
            .or_default()
            .entry(rank)
            .or_default()
            .extend(counts);
    }

    pub fn append(&mut self, other: &RawCounts) {
        for (call, ranks) in &other.0 {
            for (rank, counts) in ranks {
                self.push(*call, *rank, counts.iter().copied());
            }
        }
    }

    pub fn get(&self, call: CallId, rank: Rank) -> Option<&[u64]> {
        Some(self.0.get(&call)?.get(&rank)?.as_slice())
    }

    /// Every single count, of all calls and ranks.
    pub fn all_counts(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.values().flat_map(|ranks| ranks.values().flatten().copied())
    }

    /// Sum the counts of each call and rank.
    pub fn reduce(&self) -> Result<CallMap<RankMap<u64>>, DatasetError> {
        self.0
            .iter()
            .map(|(call, ranks)| {
                let totals = ranks
                    .iter()
                    .map(|(rank, counts)| {
                        let total = counts
                            .iter()
                            .try_fold(0u64, |sum, c| sum.checked_add(*c))
                            .ok_or(DatasetError::CountOverflow {
                                call: *call,
                                rank: *rank,
                            })?;
                        Ok((*rank, total))
                    })
                    .collect::<Result<RankMap<u64>, DatasetError>>()?;
                Ok((*call, totals))
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountRecord {
    pub header: CountsHeader,
    pub send: RawCounts,
    pub recv: RawCounts,
}

/// Totals per call and rank; both directions have entries for the
/// same set of calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducedCounts {
    pub send: CallMap<RankMap<u64>>,
    pub recv: CallMap<RankMap<u64>>,
}

impl ReducedCounts {
    /// Turn element counts into bytes.
    pub fn scale_by_datatype_size(&mut self, header: &CountsHeader) -> Result<(), DatasetError> {
        for (direction, totals) in [
            (Direction::Send, &mut self.send),
            (Direction::Recv, &mut self.recv),
        ] {
            let size = header.datatype_size(direction);
            for (call, ranks) in totals.iter_mut() {
                for (rank, total) in ranks.iter_mut() {
                    *total = total
                        .checked_mul(size)
                        .ok_or(DatasetError::CountOverflow {
                            call: *call,
                            rank: *rank,
                        })?;
                }
            }
        }
        Ok(())
    }
}

/// All count records of one lead rank.
#[derive(Debug)]
pub struct CommCounts {
    pub path: Box<Path>,
    pub records: Vec<CountRecord>,
}

#[derive(Default)]
struct RecordBuilder {
    comm_size: Option<usize>,
    send_datatype_size: Option<u64>,
    recv_datatype_size: Option<u64>,
    call: Option<CallId>,
    send: RawCounts,
    recv: RawCounts,
}

impl RecordBuilder {
    fn header(&self) -> Option<CountsHeader> {
        Some(CountsHeader {
            comm_size: self.comm_size?,
            send_datatype_size: self.send_datatype_size?,
            recv_datatype_size: self.recv_datatype_size?,
        })
    }

    fn finish(self) -> Option<CountRecord> {
        Some(CountRecord {
            header: self.header()?,
            send: self.send,
            recv: self.recv,
        })
    }
}

pub const RECORD_START: &str = "# Raw counters";

pub fn count_file_name(job_id: JobId, lead_rank: LeadRank) -> String {
    format!("counts.job{job_id}.rank{lead_rank}.txt")
}

pub fn job_id_from_lead_rank(input_dir: &Path, lead_rank: LeadRank) -> Result<JobId> {
    let re = Regex::new(&format!(r"^counts\.job(?P<job>\d+)\.rank{lead_rank}\.txt$"))?;
    job_id_from_dir(input_dir, &re, &format!("count files for lead rank {lead_rank}"))
}

fn parse_value<T: std::str::FromStr>(s: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s = s.trim();
    s.parse().with_context(|| anyhow!("parsing number {s:?}"))
}

impl CommCounts {
    pub fn file_path(input_dir: &Path, job_id: JobId, lead_rank: LeadRank) -> PathBuf {
        input_dir.join(count_file_name(job_id, lead_rank))
    }

    pub fn load(input_dir: &Path, job_id: JobId, lead_rank: LeadRank) -> Result<Self> {
        let path = Self::file_path(input_dir, job_id, lead_rank);
        let s = std::fs::read_to_string(&path)
            .with_context(|| anyhow!("reading count file {path:?}"))?;
        Self::parse(&s, &path)
    }

    pub fn parse(s: &str, path: &Path) -> Result<Self> {
        let mut records = Vec::new();
        let mut current: Option<RecordBuilder> = None;

        let finish = |builder: RecordBuilder, linenum: usize| -> Result<CountRecord> {
            builder.finish().ok_or_else(|| {
                anyhow!("{path:?}:{linenum}: count record is missing header fields")
            })
        };

        for (i, line) in s.lines().enumerate() {
            let linenum = i + 1;
            let line = line.trim();
            if line == RECORD_START {
                if let Some(builder) = current.take() {
                    records.push(finish(builder, linenum)?);
                }
                current = Some(RecordBuilder::default());
                continue;
            }
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let builder = current.as_mut().ok_or_else(|| {
                anyhow!("{path:?}:{linenum}: data before the first {RECORD_START:?} line")
            })?;

            (|| -> Result<()> {
                if let Some(v) = line.strip_prefix("Number of ranks:") {
                    builder.comm_size = Some(parse_value(v)?);
                } else if let Some(v) = line.strip_prefix("Send datatype size:") {
                    builder.send_datatype_size = Some(parse_value(v)?);
                } else if let Some(v) = line.strip_prefix("Recv datatype size:") {
                    builder.recv_datatype_size = Some(parse_value(v)?);
                } else if let Some(v) = line.strip_prefix("Call ") {
                    builder.call = Some(parse_value(v)?);
                } else if let Some((direction, rest)) = line
                    .strip_prefix("send ")
                    .map(|rest| (Direction::Send, rest))
                    .or_else(|| line.strip_prefix("recv ").map(|rest| (Direction::Recv, rest)))
                {
                    let header = builder
                        .header()
                        .ok_or_else(|| anyhow!("counts given before the record header"))?;
                    let call = builder
                        .call
                        .ok_or_else(|| anyhow!("counts given before the first call"))?;
                    let (rank, counts) = rest
                        .split_once(':')
                        .ok_or_else(|| anyhow!("missing ':' after the rank"))?;
                    let rank: Rank = parse_value(rank)?;
                    if rank >= header.comm_size {
                        bail!(
                            "rank {rank} is out of range for a communicator of size {}",
                            header.comm_size
                        )
                    }
                    let counts = counts
                        .split_whitespace()
                        .map(parse_value::<u64>)
                        .collect::<Result<Vec<u64>>>()?;
                    match direction {
                        Direction::Send => builder.send.push(call, rank, counts),
                        Direction::Recv => builder.recv.push(call, rank, counts),
                    }
                } else {
                    bail!("unknown line {line:?}")
                }
                Ok(())
            })()
            .with_context(|| anyhow!("{path:?}:{linenum}"))?;
        }
        if let Some(builder) = current.take() {
            records.push(finish(builder, s.lines().count())?);
        }

        Ok(CommCounts {
            path: path.into(),
            records,
        })
    }

    /// The header shared by all records, which defines the
    /// communicator size for the whole instance. Records are numbered
    /// from 0 in `HeaderMismatch`.
    pub fn header(&self) -> Result<CountsHeader, DatasetError> {
        let header = self
            .records
            .first()
            .ok_or(DatasetError::NoCountRecords)?
            .header
            .check()?;
        if let Some(record) = self.records.iter().position(|r| r.header != header) {
            return Err(DatasetError::HeaderMismatch { record });
        }
        Ok(header)
    }

    /// The raw counts of all records together.
    pub fn raw(&self, direction: Direction) -> RawCounts {
        let mut raw = RawCounts::default();
        for record in &self.records {
            raw.append(match direction {
                Direction::Send => &record.send,
                Direction::Recv => &record.recv,
            });
        }
        raw
    }

    /// Reduce the raw counts of both directions; calls that only have
    /// counts for one direction get an empty map for the other.
    pub fn reduce(&self) -> Result<ReducedCounts, DatasetError> {
        let mut send = self.raw(Direction::Send).reduce()?;
        let mut recv = self.raw(Direction::Recv).reduce()?;
        let calls: BTreeSet<CallId> = send.keys().chain(recv.keys()).copied().collect();
        for call in calls {
            send.entry(call).or_default();
            recv.entry(call).or_default();
        }
        Ok(ReducedCounts { send, recv })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = "\
# Raw counters
Number of ranks: 2
Send datatype size: 8
Recv datatype size: 4

Call 0
send 0: 1 2
send 1: 3
recv 0: 10
Call 2
send 1: 3 4 5
recv 0:

# Raw counters
Number of ranks: 2
Send datatype size: 8
Recv datatype size: 4
Call 1
recv 1: 7 7
Call 2
send 1: 100
";

    fn parse(s: &str) -> Result<CommCounts> {
        CommCounts::parse(s, Path::new("counts.job1.rank0.txt"))
    }

    #[test]
    fn t_parse() {
        let c = parse(EXAMPLE).unwrap();
        assert_eq!(c.records.len(), 2);
        assert_eq!(
            c.header().unwrap(),
            CountsHeader {
                comm_size: 2,
                send_datatype_size: 8,
                recv_datatype_size: 4
            }
        );
        let r = &c.records[0];
        assert_eq!(r.send.get(0, 0), Some(&[1, 2][..]));
        assert_eq!(r.send.get(2, 1), Some(&[3, 4, 5][..]));
        assert_eq!(r.recv.get(2, 0), Some(&[][..]));
        assert_eq!(r.recv.get(2, 1), None);
    }

    #[test]
    fn t_reduce() {
        let mut raw = RawCounts::default();
        raw.push(2, 1, [3, 4, 5]);
        raw.push(2, 0, []);
        let totals = raw.reduce().unwrap();
        assert_eq!(totals[&2][&1], 12);
        assert_eq!(totals[&2][&0], 0);
    }

    #[test]
    fn t_reduce_across_records() {
        let c = parse(EXAMPLE).unwrap();
        let r = c.reduce().unwrap();
        assert_eq!(r.send.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(r.recv.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2]);
        assert_eq!(r.send[&0], RankMap::from([(0, 3), (1, 3)]));
        assert_eq!(r.send[&1], RankMap::new());
        assert_eq!(r.send[&2], RankMap::from([(1, 112)]));
        assert_eq!(r.recv[&0], RankMap::from([(0, 10)]));
        assert_eq!(r.recv[&1], RankMap::from([(1, 14)]));
        assert_eq!(r.recv[&2], RankMap::from([(0, 0)]));

        let all: Vec<u64> = c.raw(Direction::Send).all_counts().collect();
        assert_eq!(all, vec![1, 2, 3, 3, 4, 5, 100]);
    }

    #[test]
    fn t_scale_by_datatype_size() {
        let c = parse(EXAMPLE).unwrap();
        let mut r = c.reduce().unwrap();
        r.scale_by_datatype_size(&c.header().unwrap()).unwrap();
        assert_eq!(r.send[&0], RankMap::from([(0, 24), (1, 24)]));
        assert_eq!(r.recv[&1], RankMap::from([(1, 56)]));
    }

    #[test]
    fn t_overflow() {
        let mut raw = RawCounts::default();
        raw.push(0, 0, [u64::MAX, 1]);
        assert_eq!(
            raw.reduce(),
            Err(DatasetError::CountOverflow { call: 0, rank: 0 })
        );
    }

    #[test]
    fn t_degenerate() {
        let header = CountsHeader {
            comm_size: 4,
            send_datatype_size: 8,
            recv_datatype_size: 0,
        };
        assert_eq!(
            header.check(),
            Err(DatasetError::Degenerate {
                what: "recv datatype size"
            })
        );
        assert_eq!(
            CountsHeader {
                comm_size: 0,
                ..header
            }
            .check(),
            Err(DatasetError::Degenerate {
                what: "number of ranks"
            })
        );
        let c = parse("").unwrap();
        assert_eq!(c.header(), Err(DatasetError::NoCountRecords));
    }

    #[test]
    fn t_header_mismatch() {
        let c = parse(
            "# Raw counters\nNumber of ranks: 1\nSend datatype size: 4\n\
             Recv datatype size: 4\nCall 0\nsend 0: 10\n\
             # Raw counters\nNumber of ranks: 2\nSend datatype size: 8\n\
             Recv datatype size: 4\nCall 1\nsend 1: 500\n",
        )
        .unwrap();
        assert_eq!(c.header(), Err(DatasetError::HeaderMismatch { record: 1 }));

        // differing datatype size only
        let first_differs = EXAMPLE.replacen("Send datatype size: 8", "Send datatype size: 2", 1);
        let c = parse(&first_differs).unwrap();
        assert_eq!(c.header(), Err(DatasetError::HeaderMismatch { record: 1 }));
    }

    #[test]
    fn t_parse_errors() {
        // data before any record
        assert!(parse("Call 0\n").is_err());
        // counts before header is complete
        assert!(parse("# Raw counters\nNumber of ranks: 2\nCall 0\nsend 0: 1\n").is_err());
        // counts before a call
        assert!(
            parse(
                "# Raw counters\nNumber of ranks: 2\nSend datatype size: 1\n\
                 Recv datatype size: 1\nsend 0: 1\n"
            )
            .is_err()
        );
        // rank out of range
        let e = parse(
            "# Raw counters\nNumber of ranks: 2\nSend datatype size: 1\n\
             Recv datatype size: 1\nCall 0\nsend 2: 1\n",
        )
        .unwrap_err();
        assert!(format!("{e:#}").contains("out of range"), "{e:#}");
        // incomplete header
        assert!(parse("# Raw counters\nNumber of ranks: 2\n").is_err());
        assert!(parse("# Raw counters\nNumber of ranks: x\n").is_err());
        assert!(parse("# Raw counters\nsomething else\n").is_err());
    }
}
