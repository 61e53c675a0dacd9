//! Reporting: summary windows and balance trend.

mod summary;

pub use summary::{signed4, until_next_utc_midnight, SummaryReport, SummaryWindow};
