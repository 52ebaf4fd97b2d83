// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Authoritative values and write sequence numbers.

use core::fmt;

/// Monotonically increasing write sequence number.
///
/// The initial value of an [`Authoritative`] carries `Seq::ZERO`; every
/// write is assigned the next number. Sequence numbers order writes in
/// logical time and are what the scheduler compares to keep deferred commits
/// monotonic.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seq(u64);

impl Seq {
    /// Sequence number of an initial (never written) value.
    pub const ZERO: Self = Self(0);

    /// Creates a sequence number from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next sequence number.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Debug for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A value paired with the sequence number of the write that produced it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Versioned<T> {
    /// The value.
    pub value: T,
    /// Sequence number of the write that produced `value`.
    pub seq: Seq,
}

impl<T> Versioned<T> {
    /// Pairs `value` with `seq`.
    #[must_use]
    pub const fn new(value: T, seq: Seq) -> Self {
        Self { value, seq }
    }

    /// Wraps an initial value (`Seq::ZERO`).
    #[must_use]
    pub const fn initial(value: T) -> Self {
        Self::new(value, Seq::ZERO)
    }
}

/// The live, externally driven value.
///
/// Only [`write`](Self::write) mutates it. Every write bumps the sequence
/// number, including writes of a value equal to the current one.
///
/// # Example
///
/// ```
/// use understory_deferred::{Authoritative, Seq};
///
/// let mut text = Authoritative::new(String::new());
/// assert_eq!(text.seq(), Seq::ZERO);
///
/// let seq = text.write("a".to_string());
/// assert_eq!(seq, Seq::new(1));
/// assert_eq!(text.get(), "a");
/// ```
#[derive(Clone, Debug)]
pub struct Authoritative<T> {
    current: Versioned<T>,
}

impl<T> Authoritative<T> {
    /// Creates an authoritative value holding `initial`.
    #[must_use]
    pub const fn new(initial: T) -> Self {
        Self {
            current: Versioned::initial(initial),
        }
    }

    /// Replaces the value and returns the sequence number of this write.
    pub fn write(&mut self, value: T) -> Seq {
        let seq = self.current.seq.next();
        self.current = Versioned::new(value, seq);
        seq
    }

    /// Returns the current value.
    #[must_use]
    pub fn get(&self) -> &T {
        &self.current.value
    }

    /// Returns the sequence number of the most recent write.
    #[must_use]
    pub fn seq(&self) -> Seq {
        self.current.seq
    }

    /// Returns the current value together with its sequence number.
    #[must_use]
    pub fn versioned(&self) -> &Versioned<T> {
        &self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_bump_sequence_even_for_equal_values() {
        let mut value = Authoritative::new(1_u32);
        assert_eq!(value.write(2), Seq::new(1));
        assert_eq!(value.write(2), Seq::new(2));
        assert_eq!(value.versioned(), &Versioned::new(2, Seq::new(2)));
    }

    #[test]
    fn seq_ordering_follows_raw_value() {
        assert!(Seq::ZERO < Seq::ZERO.next());
        assert_eq!(Seq::new(41).next().get(), 42);
    }
}
