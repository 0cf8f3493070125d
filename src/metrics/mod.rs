//! Performance metrics over closed positions.

mod calculator;

pub use calculator::PerformanceCalculator;
