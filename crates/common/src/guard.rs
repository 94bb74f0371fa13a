//! Argument guards
//!
//! Validation helpers raising `Error::IllegalArgument` / `Error::IllegalState`.
//! Every numeric bound is checked against the limit supplied for that bound.

use crate::error::{Error, Result};

/// Optional limits for a numeric argument
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NumberBounds {
    pub lt: Option<f64>,
    pub lte: Option<f64>,
    pub gt: Option<f64>,
    pub gte: Option<f64>,
}

impl NumberBounds {
    pub fn positive() -> Self {
        Self {
            gt: Some(0.0),
            ..Default::default()
        }
    }
}

/// Fail when a required string is missing or blank
pub fn not_empty<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    match value {
        None => Err(Error::IllegalArgument(format!("{} is null or undefined", name))),
        Some(v) if v.trim().is_empty() => {
            Err(Error::IllegalArgument(format!("{} is empty", name)))
        }
        Some(v) => Ok(v),
    }
}

/// Check a number against every supplied bound
pub fn number(value: f64, name: &str, bounds: NumberBounds) -> Result<()> {
    if value.is_nan() {
        return Err(Error::IllegalArgument(format!("{} is not a number", name)));
    }
    if let Some(limit) = bounds.lt {
        if !(value < limit) {
            return Err(Error::IllegalArgument(format!("{} must be < {}", name, limit)));
        }
    }
    if let Some(limit) = bounds.lte {
        if !(value <= limit) {
            return Err(Error::IllegalArgument(format!("{} must be <= {}", name, limit)));
        }
    }
    if let Some(limit) = bounds.gt {
        if !(value > limit) {
            return Err(Error::IllegalArgument(format!("{} must be > {}", name, limit)));
        }
    }
    if let Some(limit) = bounds.gte {
        if !(value >= limit) {
            return Err(Error::IllegalArgument(format!("{} must be >= {}", name, limit)));
        }
    }
    Ok(())
}

/// Fail with an illegal-state error unless `condition` holds
pub fn valid_state(condition: bool, message: &str) -> Result<()> {
    if condition {
        Ok(())
    } else {
        Err(Error::IllegalState(message.to_string()))
    }
}
