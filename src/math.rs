//! The arithmetic behind the service.
//!
//! All functions are total and side effect free. Counting invocations is the
//! job of the request handlers, not of these functions.

/// Sum of two reals.
pub fn add(a: f64, b: f64) -> f64 {
    a + b
}

/// Difference of two reals.
pub fn subtract(a: f64, b: f64) -> f64 {
    a - b
}

/// Smallest of three integers.
///
/// Only the value is meaningful: when several arguments hold the minimum it is
/// unspecified which of them is returned.
pub fn find_min(a: i64, b: i64, c: i64) -> i64 {
    a.min(b).min(c)
}

/// Largest of three integers.
///
/// Ties behave as for [find_min].
pub fn find_max(a: i64, b: i64, c: i64) -> i64 {
    a.max(b).max(c)
}
