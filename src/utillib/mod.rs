//! Various utilities

pub mod logging;
