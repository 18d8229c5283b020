//! Tail run-length analysis over short numeric series.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunDirection {
    Decreasing,
    Increasing,
}

/// Length of the strictly decreasing run that ends at the last element.
///
/// Counts steps, not elements: `[3, 2, 1]` has 2 decreases. Equal neighbours
/// end the run.
pub fn consecutive_decreases(values: &[f64]) -> usize {
    tail_run(values, RunDirection::Decreasing)
}

/// Length of the strictly increasing run that ends at the last element.
pub fn consecutive_increases(values: &[f64]) -> usize {
    tail_run(values, RunDirection::Increasing)
}

pub fn tail_run(values: &[f64], direction: RunDirection) -> usize {
    values
        .windows(2)
        .rev()
        .take_while(|pair| match direction {
            RunDirection::Decreasing => pair[1] < pair[0],
            RunDirection::Increasing => pair[1] > pair[0],
        })
        .count()
}
