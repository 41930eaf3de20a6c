//! Post-processing of the dumps written by the collective profiler:
//! per-rank, per-call bandwidths derived from counts and execution
//! times, and histograms of count magnitudes.

pub mod bandwidth;
pub mod bins;
pub mod comm;
pub mod config_file;
pub mod counts;
pub mod date_and_time;
pub mod driver;
pub mod get_terminal_width;
pub mod io_utils;
pub mod join;
pub mod output_table;
pub mod report;
pub mod summary;
pub mod timings;
pub mod units;
pub mod utillib;
