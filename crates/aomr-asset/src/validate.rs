//! Invariant checks shared by decode and encode.
//!
//! Each helper returns a [`Violation`] naming the field; the caller decides
//! which offset it belongs to.

use std::{fmt::Display, ops::RangeInclusive};

use crate::error::Violation;

/// Tolerance used for values that should be exactly one.
pub const UNIT_TOLERANCE: f32 = 1e-3;

pub fn expect_eq<T>(field: &str, expected: T, actual: T) -> Result<(), Violation>
where
    T: PartialEq + Display,
{
    if expected == actual {
        Ok(())
    } else {
        Err(Violation::new(field, expected, actual))
    }
}

pub fn expect_one_of<T>(field: &str, allowed: &[T], actual: T) -> Result<(), Violation>
where
    T: PartialEq + Display,
{
    if allowed.contains(&actual) {
        return Ok(());
    }
    let allowed = allowed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" or ");
    Err(Violation::new(field, allowed, actual))
}

pub fn expect_near(field: &str, expected: f32, actual: f32, tolerance: f32) -> Result<(), Violation> {
    if (expected - actual).abs() <= tolerance {
        Ok(())
    } else {
        Err(Violation::new(
            field,
            format!("{} ± {}", expected, tolerance),
            actual,
        ))
    }
}

pub fn expect_range(field: &str, range: RangeInclusive<f32>, actual: f32) -> Result<(), Violation> {
    if range.contains(&actual) {
        Ok(())
    } else {
        Err(Violation::new(
            field,
            format!("{}..={}", range.start(), range.end()),
            actual,
        ))
    }
}

/// Checks that the components have a euclidean norm of one.
pub fn expect_unit_norm(field: &str, components: &[f32]) -> Result<(), Violation> {
    let norm = components.iter().map(|c| c * c).sum::<f32>().sqrt();
    expect_near(field, 1.0, norm, UNIT_TOLERANCE)
        .map_err(|_| Violation::new(field, "unit norm", format!("norm {}", norm)))
}

pub fn expect_index(field: &str, index: u32, len: usize) -> Result<(), Violation> {
    if (index as usize) < len {
        Ok(())
    } else {
        Err(Violation::new(field, format!("index below {}", len), index))
    }
}

pub fn expect_at_most(field: &str, limit: u64, actual: u64) -> Result<(), Violation> {
    if actual <= limit {
        Ok(())
    } else {
        Err(Violation::new(field, format!("at most {}", limit), actual))
    }
}

/// Checks a declared byte length against `count * stride`.
pub fn expect_byte_length(field: &str, count: u64, stride: u64, actual: u64) -> Result<(), Violation> {
    expect_eq(field, count * stride, actual)
}
