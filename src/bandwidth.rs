//! Derivation of per-rank bandwidths for collective calls from the
//! amount of data each rank sent/received and the time it spent in
//! the call.

use std::collections::BTreeMap;

use rayon::iter::{IntoParallelIterator, ParallelIterator};
use serde::{Deserialize, Serialize};
use strum_macros::EnumString;

use crate::units::{ScaleError, scale};

pub type Rank = usize;
pub type CallId = usize;

pub type RankMap<T> = BTreeMap<Rank, T>;
pub type CallMap<T> = BTreeMap<CallId, T>;

/// The unit of the unscaled bandwidths.
pub const BASE_UNIT: &str = "B/s";

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BandwidthError {
    #[error("scaling bandwidth: {0}")]
    Scale(#[from] ScaleError),
    #[error("missing execution time for rank {rank}")]
    MissingExecutionTime { rank: Rank },
    #[error("execution time for rank {rank} is not positive: {time}")]
    NonPositiveExecutionTime { rank: Rank, time: f64 },
    #[error("missing execution times for call {call}")]
    MissingCallExecutionTimes { call: CallId },
    #[error("missing counts for call {call}")]
    MissingCounts { call: CallId },
    #[error("call {call}: {error}")]
    InCall {
        call: CallId,
        error: Box<BandwidthError>,
    },
}

/// What to do with execution times that are zero (or negative, or
/// NaN).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab_case")]
#[serde(rename_all = "kebab-case")]
pub enum ZeroTimePolicy {
    /// Report `NonPositiveExecutionTime`
    #[default]
    Fail,
    /// Divide anyway, giving infinities or NaN
    Ieee,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ComputeOpts {
    pub zero_time: ZeroTimePolicy,
    /// Compute calls on the rayon thread pool
    pub parallel: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaledRate {
    pub value: f64,
    pub unit: &'static str,
}

impl ScaledRate {
    /// Zero stays in `BASE_UNIT` without going through the scaler.
    pub fn from_rate(rate: f64) -> Result<Self, ScaleError> {
        if rate == 0. {
            Ok(ScaledRate {
                value: rate,
                unit: BASE_UNIT,
            })
        } else {
            let scaled = scale(BASE_UNIT, &[rate])?;
            Ok(ScaledRate {
                value: scaled.values[0],
                unit: scaled.unit.as_str(),
            })
        }
    }
}

impl std::fmt::Display for ScaledRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ScaledRate { value, unit } = self;
        write!(f, "{value:.2} {unit}")
    }
}

/// Bandwidths of all ranks for one call. All vectors are indexed by
/// rank and have the same length, the communicator size.
#[derive(Debug, Clone, PartialEq)]
pub struct CallData {
    send_bytes: Vec<u64>,
    recv_bytes: Vec<u64>,
    send_bw: Vec<f64>,
    recv_bw: Vec<f64>,
    scaled_send_bw: Vec<ScaledRate>,
    scaled_recv_bw: Vec<ScaledRate>,
}

impl CallData {
    pub fn rank_count(&self) -> usize {
        self.send_bw.len()
    }

    pub fn send_bytes(&self) -> &[u64] {
        &self.send_bytes
    }

    pub fn recv_bytes(&self) -> &[u64] {
        &self.recv_bytes
    }

    /// In `BASE_UNIT`
    pub fn send_bw(&self) -> &[f64] {
        &self.send_bw
    }

    /// In `BASE_UNIT`
    pub fn recv_bw(&self) -> &[f64] {
        &self.recv_bw
    }

    pub fn scaled_send_bw(&self) -> &[ScaledRate] {
        &self.scaled_send_bw
    }

    pub fn scaled_recv_bw(&self) -> &[ScaledRate] {
        &self.scaled_recv_bw
    }
}

/// Compute the bandwidths for one call. Ranks missing in
/// `send_totals` or `recv_totals` did not transfer anything; ranks
/// missing in `exec_times` are an error.
pub fn compute_call(
    rank_count: usize,
    send_totals: &RankMap<u64>,
    recv_totals: &RankMap<u64>,
    exec_times: &RankMap<f64>,
    zero_time: ZeroTimePolicy,
) -> Result<CallData, BandwidthError> {
    let mut d = CallData {
        send_bytes: Vec::with_capacity(rank_count),
        recv_bytes: Vec::with_capacity(rank_count),
        send_bw: Vec::with_capacity(rank_count),
        recv_bw: Vec::with_capacity(rank_count),
        scaled_send_bw: Vec::with_capacity(rank_count),
        scaled_recv_bw: Vec::with_capacity(rank_count),
    };

    for rank in 0..rank_count {
        let time = *exec_times
            .get(&rank)
            .ok_or(BandwidthError::MissingExecutionTime { rank })?;
        match zero_time {
            ZeroTimePolicy::Fail => {
                if time.is_nan() || time <= 0. {
                    return Err(BandwidthError::NonPositiveExecutionTime { rank, time });
                }
            }
            ZeroTimePolicy::Ieee => (),
        }

        let sent = send_totals.get(&rank).copied().unwrap_or(0);
        let received = recv_totals.get(&rank).copied().unwrap_or(0);
        let send_bw = sent as f64 / time;
        let recv_bw = received as f64 / time;

        d.send_bytes.push(sent);
        d.recv_bytes.push(received);
        d.send_bw.push(send_bw);
        d.recv_bw.push(recv_bw);
        d.scaled_send_bw.push(ScaledRate::from_rate(send_bw)?);
        d.scaled_recv_bw.push(ScaledRate::from_rate(recv_bw)?);
    }
    Ok(d)
}

/// The bandwidths of all calls of one communicator instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CallsData {
    rank_count: usize,
    calls: CallMap<CallData>,
}

impl CallsData {
    pub fn rank_count(&self) -> usize {
        self.rank_count
    }

    pub fn num_calls(&self) -> usize {
        self.calls.len()
    }

    pub fn get(&self, call: CallId) -> Option<&CallData> {
        self.calls.get(&call)
    }

    /// In ascending call id order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (CallId, &CallData)> + '_ {
        self.calls.iter().map(|(call, d)| (*call, d))
    }
}

/// Compute the bandwidths for calls `0..num_calls`, all with the same
/// `rank_count`. Either all calls succeed or an error is
/// returned. With `opts.parallel` the calls are computed on the rayon
/// pool; the result is the same, but if multiple calls fail, which of
/// their errors is reported is not determined.
pub fn compute_all(
    num_calls: usize,
    rank_count: usize,
    send_totals: &CallMap<RankMap<u64>>,
    recv_totals: &CallMap<RankMap<u64>>,
    exec_times: &CallMap<RankMap<f64>>,
    opts: ComputeOpts,
) -> Result<CallsData, BandwidthError> {
    let compute_one = |call: CallId| -> Result<(CallId, CallData), BandwidthError> {
        let send = send_totals
            .get(&call)
            .ok_or(BandwidthError::MissingCounts { call })?;
        let recv = recv_totals
            .get(&call)
            .ok_or(BandwidthError::MissingCounts { call })?;
        let times = exec_times
            .get(&call)
            .ok_or(BandwidthError::MissingCallExecutionTimes { call })?;
        let d = compute_call(rank_count, send, recv, times, opts.zero_time).map_err(|error| {
            BandwidthError::InCall {
                call,
                error: error.into(),
            }
        })?;
        Ok((call, d))
    };

    let calls: Result<CallMap<CallData>, BandwidthError> = if opts.parallel {
        (0..num_calls).into_par_iter().map(&compute_one).collect()
    } else {
        (0..num_calls).map(&compute_one).collect()
    };

    Ok(CallsData {
        rank_count,
        calls: calls?,
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn rankmap<T: Copy>(vals: &[T]) -> RankMap<T> {
        vals.iter().copied().enumerate().collect()
    }

    fn callmap<T: Copy>(calls: &[&[T]]) -> CallMap<RankMap<T>> {
        calls
            .iter()
            .enumerate()
            .map(|(call, vals)| (call, rankmap(vals)))
            .collect()
    }

    #[test]
    fn t_compute_call() {
        let d = compute_call(
            3,
            &rankmap(&[1000, 2000, 0]),
            &rankmap(&[500, 0, 30]),
            &rankmap(&[1., 2., 0.5]),
            ZeroTimePolicy::Fail,
        )
        .unwrap();
        assert_eq!(d.rank_count(), 3);
        assert_eq!(d.send_bytes(), &[1000, 2000, 0]);
        assert_eq!(d.recv_bytes(), &[500, 0, 30]);
        assert_eq!(d.send_bw(), &[1000., 1000., 0.]);
        assert_eq!(d.recv_bw(), &[500., 0., 60.]);

        let units: Vec<_> = d.scaled_send_bw().iter().map(|r| r.unit).collect();
        assert_eq!(units, ["KB/s", "KB/s", "B/s"]);
        assert_relative_eq!(d.scaled_send_bw()[0].value, 1.);
        assert_eq!(
            d.scaled_recv_bw(),
            &[
                ScaledRate {
                    value: 500.,
                    unit: "B/s"
                },
                ScaledRate {
                    value: 0.,
                    unit: "B/s"
                },
                ScaledRate {
                    value: 60.,
                    unit: "B/s"
                }
            ]
        );
    }

    #[test]
    fn t_exact_division() {
        let sends = [7, 13, 1 << 40, 999_999_937];
        let times = [0.3, 1e-6, 17.25, 3.0];
        let d = compute_call(
            4,
            &rankmap(&sends),
            &rankmap(&[0; 4]),
            &rankmap(&times),
            ZeroTimePolicy::Fail,
        )
        .unwrap();
        for rank in 0..4 {
            assert_eq!(d.send_bw()[rank], sends[rank] as f64 / times[rank]);
        }
    }

    #[test]
    fn t_missing_counts_are_zero() {
        let d = compute_call(
            2,
            &RankMap::new(),
            &rankmap(&[4]),
            &rankmap(&[2., 2.]),
            ZeroTimePolicy::Fail,
        )
        .unwrap();
        assert_eq!(d.send_bw(), &[0., 0.]);
        assert_eq!(d.recv_bw(), &[2., 0.]);
        assert_eq!(d.scaled_send_bw()[1].unit, BASE_UNIT);
    }

    #[test]
    fn t_missing_execution_time() {
        let r = compute_call(
            3,
            &rankmap(&[1, 2, 3]),
            &rankmap(&[1, 2, 3]),
            &rankmap(&[1., 1.]),
            ZeroTimePolicy::Fail,
        );
        assert_eq!(r, Err(BandwidthError::MissingExecutionTime { rank: 2 }));
    }

    #[test]
    fn t_zero_time_policies() {
        let sends = rankmap(&[10, 0]);
        let times = rankmap(&[0., 0.]);
        let r = compute_call(2, &sends, &sends, &times, ZeroTimePolicy::Fail);
        assert_eq!(
            r,
            Err(BandwidthError::NonPositiveExecutionTime { rank: 0, time: 0. })
        );

        let d = compute_call(2, &sends, &sends, &times, ZeroTimePolicy::Ieee).unwrap();
        assert_eq!(d.send_bw()[0], f64::INFINITY);
        assert!(d.send_bw()[1].is_nan());
        assert_eq!(d.scaled_send_bw()[0].unit, BASE_UNIT);
    }

    #[test]
    fn t_compute_all() {
        let d = compute_all(
            1,
            2,
            &callmap(&[&[1000, 2000]]),
            &callmap(&[&[500, 0]]),
            &callmap(&[&[1., 2.]]),
            ComputeOpts::default(),
        )
        .unwrap();
        assert_eq!(d.num_calls(), 1);
        let c = d.get(0).unwrap();
        assert_eq!(c.send_bw(), &[1000., 1000.]);
        assert_eq!(c.recv_bw(), &[500., 0.]);
    }

    fn three_calls() -> (
        CallMap<RankMap<u64>>,
        CallMap<RankMap<u64>>,
        CallMap<RankMap<f64>>,
    ) {
        (
            callmap(&[&[1, 2, 3], &[0, 0, 0], &[5000, 7, 123456]]),
            callmap(&[&[3, 2, 1], &[9, 9, 9], &[1, 1_000_000, 0]]),
            callmap(&[&[0.1, 0.2, 0.3], &[1., 1., 1.], &[1e-3, 2e-3, 3e-3]]),
        )
    }

    #[test]
    fn t_compute_all_pure_and_parallel() {
        let (send, recv, times) = three_calls();
        let opts = ComputeOpts::default();
        let a = compute_all(3, 3, &send, &recv, &times, opts).unwrap();
        let b = compute_all(3, 3, &send, &recv, &times, opts).unwrap();
        let bits = |d: &CallsData| -> Vec<u64> {
            d.iter()
                .flat_map(|(_, c)| c.send_bw().iter().chain(c.recv_bw()))
                .map(|v| v.to_bits())
                .collect()
        };
        assert_eq!(bits(&a), bits(&b));
        assert_eq!(a, b);

        let p = compute_all(
            3,
            3,
            &send,
            &recv,
            &times,
            ComputeOpts {
                parallel: true,
                ..opts
            },
        )
        .unwrap();
        assert_eq!(a, p);
        assert_eq!(
            p.iter().map(|(call, _)| call).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn t_compute_all_all_ranks_present() {
        let (send, recv, times) = three_calls();
        let d = compute_all(3, 3, &send, &recv, &times, ComputeOpts::default()).unwrap();
        for (_, c) in d.iter() {
            assert_eq!(c.send_bytes().len(), 3);
            assert_eq!(c.recv_bytes().len(), 3);
            assert_eq!(c.send_bw().len(), 3);
            assert_eq!(c.recv_bw().len(), 3);
            assert_eq!(c.scaled_send_bw().len(), 3);
            assert_eq!(c.scaled_recv_bw().len(), 3);
        }
    }

    #[test]
    fn t_compute_all_fails_as_a_whole() {
        let (send, recv, mut times) = three_calls();
        times.get_mut(&1).unwrap().remove(&2);
        let r = compute_all(3, 3, &send, &recv, &times, ComputeOpts::default());
        assert_eq!(
            r,
            Err(BandwidthError::InCall {
                call: 1,
                error: BandwidthError::MissingExecutionTime { rank: 2 }.into()
            })
        );

        times.remove(&1);
        let r = compute_all(3, 3, &send, &recv, &times, ComputeOpts::default());
        assert_eq!(r, Err(BandwidthError::MissingCallExecutionTimes { call: 1 }));

        let r = compute_all(4, 3, &send, &recv, &times, ComputeOpts::default());
        assert!(r.is_err());
    }
}
