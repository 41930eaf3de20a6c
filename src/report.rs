//! The per-call bandwidth report, one file per lead rank.
//!
//! Format, for every call in ascending order:
//!
//! ```text
//! # Call <id>
//! send BW (B/s)<TAB>receive BW (B/s)
//! <send bandwidth of rank 0><TAB><receive bandwidth of rank 0>
//! ...
//! <empty line>
//! ```
//!
//! Bandwidths are unscaled, with 2 decimals.

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};

use crate::{
    bandwidth::{BASE_UNIT, CallsData},
    comm::LeadRank,
    io_utils::tempfile_utils::write_file_atomically,
};

pub fn output_file_name(lead_rank: LeadRank) -> String {
    format!("bandwidth-percall-comm{lead_rank}.md")
}

/// 2 decimals; infinities and NaN (only possible when zero execution
/// times are let through) are shown as `+Inf`, `-Inf`, `NaN`.
pub fn format_rate(v: f64) -> String {
    if v.is_nan() {
        "NaN".into()
    } else if v.is_infinite() {
        String::from(if v > 0. { "+Inf" } else { "-Inf" })
    } else {
        format!("{v:.2}")
    }
}

pub fn render_report(calls: &CallsData, out: &mut impl Write) -> std::io::Result<()> {
    for (call, d) in calls.iter() {
        writeln!(out, "# Call {call}")?;
        writeln!(out, "send BW ({BASE_UNIT})\treceive BW ({BASE_UNIT})")?;
        for (send, recv) in d.send_bw().iter().zip(d.recv_bw()) {
            writeln!(out, "{}\t{}", format_rate(*send), format_rate(*recv))?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Write the report for `lead_rank` into `output_dir`, returning the
/// path of the file.
pub fn write_report(output_dir: &Path, lead_rank: LeadRank, calls: &CallsData) -> Result<PathBuf> {
    let path = output_dir.join(output_file_name(lead_rank));
    write_file_atomically(&path, |out| render_report(calls, out))
        .with_context(|| anyhow!("unable to write output to {path:?}"))?;
    Ok(path)
}
