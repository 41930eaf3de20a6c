//! Per-call mean bandwidths across ranks, shown as a table.

use std::io::{IsTerminal, Write};

use anyhow::Result;

use crate::{
    bandwidth::{CallId, CallsData, ScaledRate},
    output_table::terminal::{TerminalTable, TerminalTableOpts},
};

#[derive(Debug, Clone, PartialEq)]
pub struct CallSummary {
    pub call: CallId,
    pub rank_count: usize,
    /// In `BASE_UNIT`
    pub send_mean: f64,
    pub recv_mean: f64,
}

impl CallSummary {
    pub fn scaled(&self) -> Result<(ScaledRate, ScaledRate)> {
        Ok((
            ScaledRate::from_rate(self.send_mean)?,
            ScaledRate::from_rate(self.recv_mean)?,
        ))
    }
}

fn mean(vals: &[f64]) -> f64 {
    if vals.is_empty() {
        0.
    } else {
        vals.iter().sum::<f64>() / vals.len() as f64
    }
}

pub fn summarize(calls: &CallsData) -> Vec<CallSummary> {
    calls
        .iter()
        .map(|(call, d)| CallSummary {
            call,
            rank_count: d.rank_count(),
            send_mean: mean(d.send_bw()),
            recv_mean: mean(d.recv_bw()),
        })
        .collect()
}

const TITLES: &[&str] = &["call", "ranks", "mean send BW", "mean receive BW"];
const WIDTHS: &[usize] = &[7, 7, 18];

pub fn write_summary_rows<O: Write>(
    summaries: &[CallSummary],
    table: &mut TerminalTable<O>,
) -> Result<()> {
    for s in summaries {
        let (send, recv) = s.scaled()?;
        table.write_data_row(
            &[
                s.call.to_string(),
                s.rank_count.to_string(),
                send.to_string(),
                recv.to_string(),
            ],
            None,
        )?;
    }
    Ok(())
}

pub fn write_summary_table<O: Write + IsTerminal>(
    summaries: &[CallSummary],
    opts: TerminalTableOpts,
    out: O,
) -> Result<O> {
    let mut table = TerminalTable::start(WIDTHS, TITLES, opts, out)?;
    write_summary_rows(summaries, &mut table)?;
    table.finish()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use crate::{
        bandwidth::{CallMap, ComputeOpts, RankMap, compute_all},
        output_table::terminal::ColorOpt,
    };

    use super::*;

    fn calls() -> CallsData {
        let send: CallMap<RankMap<u64>> = [
            (0, [(0, 1000), (1, 3000)].into()),
            (1, [(0, 10)].into()),
        ]
        .into();
        let recv: CallMap<RankMap<u64>> = [(0, [(1, 500)].into()), (1, RankMap::new())].into();
        let times: CallMap<RankMap<f64>> = [
            (0, [(0, 1.), (1, 1.)].into()),
            (1, [(0, 2.), (1, 2.)].into()),
        ]
        .into();
        compute_all(2, 2, &send, &recv, &times, ComputeOpts::default()).unwrap()
    }

    #[test]
    fn t_summarize() {
        let s = summarize(&calls());
        assert_eq!(s.len(), 2);
        assert_eq!(s[0].call, 0);
        assert_eq!(s[0].rank_count, 2);
        assert_relative_eq!(s[0].send_mean, 2000.);
        assert_relative_eq!(s[0].recv_mean, 250.);
        assert_relative_eq!(s[1].send_mean, 2.5);
        assert_relative_eq!(s[1].recv_mean, 0.);
    }

    #[test]
    fn t_table_tsv() {
        let opts = TerminalTableOpts {
            tsv: true,
            color: ColorOpt::Never,
        };
        let mut table = TerminalTable::start_with(WIDTHS, TITLES, opts, false, Vec::new()).unwrap();
        write_summary_rows(&summarize(&calls()), &mut table).unwrap();
        let out = table.finish().unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "call\tranks\tmean send BW\tmean receive BW\n\
             0\t2\t2.00 KB/s\t250.00 B/s\n\
             1\t2\t2.50 B/s\t0.00 B/s\n"
        );
    }
}
