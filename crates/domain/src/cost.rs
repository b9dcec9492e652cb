//! Fixed-point cost arithmetic.
//!
//! `Cost` stores USD as an `i64` count of micro-dollars (1 unit =
//! $0.000001). Cumulative spend across many small turns must compare
//! exactly at a budget boundary; summing `f64` dollar amounts would drift
//! just enough to make that comparison unreliable.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cost(i64);

const MICROS_PER_DOLLAR: f64 = 1_000_000.0;

impl Cost {
    pub const ZERO: Cost = Cost(0);

    /// Build a `Cost` from a dollar amount. Only used at the edges (config
    /// parsing, price-table literals, test fixtures) where the source value
    /// is already a decimal literal, not an accumulated total.
    pub fn from_dollars(dollars: f64) -> Self {
        Cost((dollars * MICROS_PER_DOLLAR).round() as i64)
    }

    pub fn from_micros(micros: i64) -> Self {
        Cost(micros)
    }

    pub fn as_dollars(&self) -> f64 {
        self.0 as f64 / MICROS_PER_DOLLAR
    }

    pub fn as_micros(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Cost of `tokens` tokens at `per_million` dollars per million tokens.
    pub fn for_tokens(tokens: u32, per_million_dollars: f64) -> Self {
        let micros = (tokens as f64) * per_million_dollars * MICROS_PER_DOLLAR / 1_000_000.0;
        Cost(micros.round() as i64)
    }

    /// Divide into `n` equal shares, rounding down; used for per-turn and
    /// per-agent averages so they stay exact micro-dollar integers instead
    /// of drifting through a float round-trip. Returns `ZERO` for `n == 0`.
    pub fn div_by(&self, n: u32) -> Cost {
        if n == 0 {
            Cost::ZERO
        } else {
            Cost(self.0 / n as i64)
        }
    }
}

impl Add for Cost {
    type Output = Cost;
    fn add(self, rhs: Cost) -> Cost {
        Cost(self.0 + rhs.0)
    }
}

impl AddAssign for Cost {
    fn add_assign(&mut self, rhs: Cost) {
        self.0 += rhs.0;
    }
}

impl Sub for Cost {
    type Output = Cost;
    fn sub(self, rhs: Cost) -> Cost {
        Cost(self.0 - rhs.0)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.6}", self.as_dollars())
    }
}
