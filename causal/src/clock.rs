//! Clock algebra for causal delivery.
//!
//! Two clock forms are supported:
//!
//! - **Vector**: one counter per process. `clock[p]` is the number of events
//!   of `p` known to the holder.
//! - **Matrix**: one vector per process. `clock[p][q]` is what `p` last
//!   reported about `q`. The holder's own row is its local vector clock and
//!   the other rows are second-hand knowledge carried in message headers.
//!
//! [`ClockModel`] selects how a process timestamps sends, decides
//! deliverability and folds a delivered timestamp into its own clock:
//!
//! | model            | form   | deliverability        | on deliver                          |
//! |------------------|--------|-----------------------|-------------------------------------|
//! | `VectorPartial`  | vector | sender next, rest <=  | copy the sender's entry only        |
//! | `VectorMerge`    | vector | sender next, rest <=  | component-wise max, then own += 1   |
//! | `Matrix`         | matrix | same test on diagonal | cell-wise max, then own diag += 1   |
//!
//! All operations are O(n) for vectors and O(n²) for matrix merges, where n
//! is the membership size.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Per-process counter vector, indexed by membership position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock(Vec<u64>);

impl VectorClock {
    /// All-zero clock for `n` processes.
    pub fn zero(n: usize) -> Self {
        Self(vec![0; n])
    }

    pub fn from_counters(counters: Vec<u64>) -> Self {
        Self(counters)
    }

    /// Counter of the process at `index`, zero when out of range.
    pub fn get(&self, index: usize) -> u64 {
        self.0.get(index).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    /// Increment the counter at `index`, returning the new value.
    pub fn tick(&mut self, index: usize) -> Option<u64> {
        let counter = self.0.get_mut(index)?;
        *counter += 1;
        Some(*counter)
    }

    fn set(&mut self, index: usize, value: u64) -> Option<()> {
        *self.0.get_mut(index)? = value;
        Some(())
    }

    /// Pointwise maximum with another clock of the same width.
    pub fn merge(&mut self, other: &VectorClock) {
        for (mine, theirs) in self.0.iter_mut().zip(&other.0) {
            *mine = (*mine).max(*theirs);
        }
    }

    /// True if every entry is >= the corresponding entry of `other`.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        self.len() == other.len() && self.0.iter().zip(&other.0).all(|(a, b)| a >= b)
    }

    /// True if `self` <= `other` everywhere and strictly less somewhere.
    pub fn happens_before(&self, other: &VectorClock) -> bool {
        other.dominates(self) && self != other
    }

    /// Neither clock happens before the other and they differ.
    pub fn concurrent_with(&self, other: &VectorClock) -> bool {
        self != other && !self.happens_before(other) && !other.happens_before(self)
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, counter) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{counter}")?;
        }
        f.write_str("]")
    }
}

/// N×N table of counters: one vector clock per process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatrixClock(Vec<VectorClock>);

impl MatrixClock {
    pub fn zero(n: usize) -> Self {
        Self(vec![VectorClock::zero(n); n])
    }

    pub fn from_rows(rows: Vec<VectorClock>) -> Self {
        Self(rows)
    }

    /// `p`'s knowledge of `q`'s counter.
    pub fn get(&self, p: usize, q: usize) -> u64 {
        self.0.get(p).map(|row| row.get(q)).unwrap_or(0)
    }

    pub fn row(&self, p: usize) -> Option<&VectorClock> {
        self.0.get(p)
    }

    pub fn rows(&self) -> &[VectorClock] {
        &self.0
    }

    /// Number of processes (rows).
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// The diagonal entries, read as a vector clock.
    pub fn diagonal(&self) -> VectorClock {
        VectorClock((0..self.size()).map(|i| self.get(i, i)).collect())
    }

    fn is_square(&self) -> bool {
        self.0.iter().all(|row| row.len() == self.0.len())
    }

    fn tick_diagonal(&mut self, index: usize) -> Option<u64> {
        self.0.get_mut(index)?.tick(index)
    }

    /// Cell-wise maximum.
    pub fn merge(&mut self, other: &MatrixClock) {
        for (mine, theirs) in self.0.iter_mut().zip(&other.0) {
            mine.merge(theirs);
        }
    }

    pub fn dominates(&self, other: &MatrixClock) -> bool {
        self.size() == other.size() && self.0.iter().zip(&other.0).all(|(a, b)| a.dominates(b))
    }
}

impl fmt::Display for MatrixClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, row) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{row}")?;
        }
        Ok(())
    }
}

/// A live clock or a timestamp snapshot, in either form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clock {
    Vector(VectorClock),
    Matrix(MatrixClock),
}

impl Clock {
    pub fn form(&self) -> &'static str {
        match self {
            Self::Vector(_) => "vector",
            Self::Matrix(_) => "matrix",
        }
    }

    /// Number of processes this clock covers.
    pub fn width(&self) -> usize {
        match self {
            Self::Vector(v) => v.len(),
            Self::Matrix(m) => m.size(),
        }
    }

    pub fn as_vector(&self) -> Option<&VectorClock> {
        match self {
            Self::Vector(v) => Some(v),
            Self::Matrix(_) => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&MatrixClock> {
        match self {
            Self::Vector(_) => None,
            Self::Matrix(m) => Some(m),
        }
    }

    /// The vector that deliverability is decided on: the clock itself for
    /// the vector form, the diagonal for the matrix form.
    pub fn causal_vector(&self) -> VectorClock {
        match self {
            Self::Vector(v) => v.clone(),
            Self::Matrix(m) => m.diagonal(),
        }
    }

    /// Same form, same width, and no entry smaller than in `other`.
    pub fn dominates(&self, other: &Clock) -> bool {
        match (self, other) {
            (Self::Vector(a), Self::Vector(b)) => a.dominates(b),
            (Self::Matrix(a), Self::Matrix(b)) => a.dominates(b),
            _ => false,
        }
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vector(v) => v.fmt(f),
            Self::Matrix(m) => m.fmt(f),
        }
    }
}

/// A clock did not have the shape the model or membership expects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockMismatch {
    #[error("expected a {expected} clock, got a {actual} clock")]
    Form {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("clock covers {actual} processes, expected {expected}")]
    Width { expected: usize, actual: usize },

    #[error("process index {index} outside a clock of width {width}")]
    Index { index: usize, width: usize },
}

/// Timestamp algebra, selected once per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClockModel {
    /// Vector clock; delivery copies only the sender's entry.
    #[default]
    #[serde(alias = "bss")]
    VectorPartial,
    /// Vector clock; delivery merges everything and counts as a local event.
    #[serde(alias = "ses")]
    VectorMerge,
    /// Matrix clock with diagonal-based deliverability; always merges.
    Matrix,
}

impl ClockModel {
    pub const ALL: [ClockModel; 3] = [Self::VectorPartial, Self::VectorMerge, Self::Matrix];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VectorPartial => "vector-partial",
            Self::VectorMerge => "vector-merge",
            Self::Matrix => "matrix",
        }
    }

    /// The clock form this model operates on.
    pub fn form(&self) -> &'static str {
        match self {
            Self::VectorPartial | Self::VectorMerge => "vector",
            Self::Matrix => "matrix",
        }
    }

    /// Initial clock for a membership of `n` processes.
    pub fn zero(&self, n: usize) -> Clock {
        match self {
            Self::VectorPartial | Self::VectorMerge => Clock::Vector(VectorClock::zero(n)),
            Self::Matrix => Clock::Matrix(MatrixClock::zero(n)),
        }
    }

    /// Record a local send at `me` and return the message timestamp.
    ///
    /// The returned snapshot is an independent copy of the advanced clock.
    pub fn advance_on_send(&self, clock: &mut Clock, me: usize) -> Result<Clock, ClockMismatch> {
        let width = clock.width();
        let index = ClockMismatch::Index { index: me, width };

        match (self, &mut *clock) {
            (Self::VectorPartial | Self::VectorMerge, Clock::Vector(v)) => {
                v.tick(me).ok_or(index)?;
            }
            (Self::Matrix, Clock::Matrix(m)) => {
                m.tick_diagonal(me).ok_or(index)?;
            }
            (_, other) => return Err(self.form_mismatch(other)),
        }

        Ok(clock.clone())
    }

    /// Classical causal-delivery test.
    ///
    /// With `i = sender`, deliverable iff `ts[i] == local[i] + 1` and
    /// `ts[k] <= local[k]` for every other `k`. The matrix form applies the
    /// same test to the diagonals; off-diagonal cells never participate.
    pub fn is_deliverable(
        &self,
        local: &Clock,
        timestamp: &Clock,
        sender: usize,
    ) -> Result<bool, ClockMismatch> {
        self.check_shape(local, timestamp, sender)?;

        let (local, timestamp) = match (local, timestamp) {
            (Clock::Vector(l), Clock::Vector(t)) => (l.clone(), t.clone()),
            (Clock::Matrix(l), Clock::Matrix(t)) => (l.diagonal(), t.diagonal()),
            _ => unreachable!("shape checked above"),
        };

        let deliverable = (0..local.len()).all(|k| {
            if k == sender {
                timestamp.get(k) == local.get(k) + 1
            } else {
                timestamp.get(k) <= local.get(k)
            }
        });

        Ok(deliverable)
    }

    /// Fold a delivered timestamp into the receiver's clock.
    pub fn apply_on_deliver(
        &self,
        local: &mut Clock,
        timestamp: &Clock,
        sender: usize,
        me: usize,
    ) -> Result<(), ClockMismatch> {
        self.check_shape(local, timestamp, sender)?;
        let width = local.width();
        let index = ClockMismatch::Index { index: me, width };

        match (self, local, timestamp) {
            (Self::VectorPartial, Clock::Vector(l), Clock::Vector(t)) => {
                l.set(sender, t.get(sender)).ok_or(index)?;
            }
            (Self::VectorMerge, Clock::Vector(l), Clock::Vector(t)) => {
                l.merge(t);
                l.tick(me).ok_or(index)?;
            }
            (Self::Matrix, Clock::Matrix(l), Clock::Matrix(t)) => {
                l.merge(t);
                l.tick_diagonal(me).ok_or(index)?;
            }
            _ => unreachable!("shape checked above"),
        }

        Ok(())
    }

    fn form_mismatch(&self, actual: &Clock) -> ClockMismatch {
        ClockMismatch::Form {
            expected: self.form(),
            actual: actual.form(),
        }
    }

    fn check_shape(
        &self,
        local: &Clock,
        timestamp: &Clock,
        sender: usize,
    ) -> Result<(), ClockMismatch> {
        for clock in [local, timestamp] {
            if clock.form() != self.form() {
                return Err(self.form_mismatch(clock));
            }
            if let Clock::Matrix(m) = clock {
                if !m.is_square() {
                    return Err(ClockMismatch::Width {
                        expected: m.size(),
                        actual: m.rows().iter().map(VectorClock::len).max().unwrap_or(0),
                    });
                }
            }
        }

        if timestamp.width() != local.width() {
            return Err(ClockMismatch::Width {
                expected: local.width(),
                actual: timestamp.width(),
            });
        }

        if sender >= local.width() {
            return Err(ClockMismatch::Index {
                index: sender,
                width: local.width(),
            });
        }

        Ok(())
    }
}

impl fmt::Display for ClockModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClockModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vector-partial" | "bss" => Ok(Self::VectorPartial),
            "vector-merge" | "ses" => Ok(Self::VectorMerge),
            "matrix" => Ok(Self::Matrix),
            other => Err(format!(
                "unknown clock model `{other}` (expected vector-partial, vector-merge or matrix)"
            )),
        }
    }
}
