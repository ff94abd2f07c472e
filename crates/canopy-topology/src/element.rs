//! Elements: exact positions on one axis of the coordinate space.
//!
//! An element is a fraction in radix [`RADIX`], one digit per Unicode scalar
//! value. A string maps onto the axis digit by digit, so comparing elements
//! is comparing the strings they were built from lexicographically.
//!
//! # Midpoints
//!
//! Splitting a zone needs a value strictly inside a range. Strings have no
//! natural midpoint, but fractions do: `middle(a, b)` computes `(a + b) / 2`
//! exactly, growing the result by at most one digit. Repeated splitting never
//! runs out of precision and never rounds two distinct ranges onto the same
//! boundary.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{GeometryError, Result};

/// Number of distinct digit values (all Unicode scalar values plus surrogates).
pub const RADIX: u32 = 0x11_0000;

const RADIX_U64: u64 = RADIX as u64;

/// A position on one axis.
///
/// Trailing zero digits are stripped on construction, so two elements
/// denoting the same fraction are equal no matter how they were built.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "RawElement"))]
pub struct Element {
    digits: Vec<u32>,
}

/// Decoded digits, checked and normalized before they become an [`Element`].
#[cfg(feature = "serde")]
#[derive(serde::Deserialize)]
struct RawElement {
    digits: Vec<u32>,
}

#[cfg(feature = "serde")]
impl TryFrom<RawElement> for Element {
    type Error = GeometryError;

    fn try_from(raw: RawElement) -> Result<Self> {
        Self::from_digits(raw.digits)
    }
}

impl Element {
    /// Build an element from the code points of a string.
    pub fn new(value: &str) -> Self {
        Self::normalized(value.chars().map(u32::from).collect())
    }

    /// Build an element from raw digits, most significant first.
    pub fn from_digits(digits: Vec<u32>) -> Result<Self> {
        if let Some(&bad) = digits.iter().find(|&&d| d >= RADIX) {
            return Err(GeometryError::InvalidDigit(bad));
        }
        Ok(Self::normalized(digits))
    }

    fn normalized(mut digits: Vec<u32>) -> Self {
        while digits.last() == Some(&0) {
            digits.pop();
        }
        Self { digits }
    }

    /// The smallest element of any axis.
    pub const fn zero() -> Self {
        Self { digits: Vec::new() }
    }

    /// Digits, most significant first, without trailing zeros.
    pub fn digits(&self) -> &[u32] {
        &self.digits
    }

    /// Whether this is the zero element.
    pub fn is_zero(&self) -> bool {
        self.digits.is_empty()
    }

    #[inline]
    fn digit(&self, index: usize) -> u64 {
        self.digits.get(index).copied().map_or(0, u64::from)
    }

    /// Exact midpoint of two elements.
    ///
    /// For `a < b` the result satisfies `a < middle(a, b) < b`; for equal
    /// inputs it returns the input.
    pub fn middle(a: &Self, b: &Self) -> Self {
        let len = a.digits.len().max(b.digits.len());

        // Add digit-wise from the least significant end.
        let mut sum = vec![0u64; len];
        let mut carry = 0u64;
        for i in (0..len).rev() {
            let total = a.digit(i) + b.digit(i) + carry;
            sum[i] = total % RADIX_U64;
            carry = total / RADIX_U64;
        }

        // Halve from the most significant end; an odd remainder spills into
        // one extra digit worth exactly half a unit.
        let mut digits = Vec::with_capacity(len + 1);
        let mut remainder = carry;
        for value in sum {
            let current = remainder * RADIX_U64 + value;
            digits.push((current / 2) as u32);
            remainder = current % 2;
        }
        if remainder == 1 {
            digits.push(RADIX / 2);
        }

        Self::normalized(digits)
    }

    /// Cyclic range test.
    ///
    /// For `a < b` this is `a <= self < b`. For `a > b` the range wraps past
    /// the end of the axis: `self >= a || self < b`. An empty range (`a == b`)
    /// contains nothing.
    pub fn is_between(&self, a: &Self, b: &Self) -> bool {
        match a.cmp(b) {
            Ordering::Less => a <= self && self < b,
            Ordering::Greater => self >= a || self < b,
            Ordering::Equal => false,
        }
    }

    /// Approximate position as a fraction of one radix unit.
    ///
    /// Only meant for ranking distances and extents; containment and
    /// adjacency always use the exact digits.
    pub fn to_f64(&self) -> f64 {
        let radix = f64::from(RADIX);
        let mut scale = 1.0;
        let mut value = 0.0;
        for &d in self.digits.iter().take(4) {
            scale /= radix;
            value += f64::from(d) * scale;
        }
        value
    }
}

impl From<&str> for Element {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Element {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl FromStr for Element {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &d in &self.digits {
            match char::from_u32(d) {
                Some(c) if c.is_alphanumeric() || c.is_ascii_graphic() || c == ' ' => {
                    write!(f, "{c}")?
                }
                _ => write!(f, "\\u{{{d:x}}}")?,
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Element(\"{self}\")")
    }
}
