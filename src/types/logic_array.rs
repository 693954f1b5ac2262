//! Fixed-size arrays of logic values.

use std::fmt;
use std::ops::Index;

use super::{Logic, Range, ValueError};

/// Resolution behaviors used when converting a [`LogicArray`] with
/// non-`0`/`1` bits to an integer.
///
/// `L` and `H` always resolve to `0` and `1`; these strategies decide the
/// fate of `U`, `X`, `Z`, `W` and `-` bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveX {
    /// Fail with [`ValueError::UnresolvableBit`].
    ValueError,
    /// Resolve every offending bit to `0`.
    Zeros,
    /// Resolve every offending bit to `1`.
    Ones,
    /// Resolve every offending bit randomly.
    Random,
}

lazy_static! {
    static ref RESOLVE_X_DEFAULT: ResolveX = {
        match std::env::var("COCOTB_RESOLVE_X").as_deref() {
            Ok("ZEROS") => ResolveX::Zeros,
            Ok("ONES") => ResolveX::Ones,
            Ok("RANDOM") => ResolveX::Random,
            Ok("VALUE_ERROR") | Err(_) => ResolveX::ValueError,
            Ok(other) => {
                log::warn!("unknown COCOTB_RESOLVE_X value {:?}, using VALUE_ERROR", other);
                ResolveX::ValueError
            }
        }
    };
}

impl ResolveX {
    /// The process-wide default, taken from `COCOTB_RESOLVE_X` at first use.
    pub fn default_strategy() -> ResolveX {
        *RESOLVE_X_DEFAULT
    }

    fn resolve(self, bit: Logic) -> Result<bool, ValueError> {
        match bit.to_bool() {
            Ok(b) => Ok(b),
            Err(err) => match self {
                ResolveX::ValueError => Err(err),
                ResolveX::Zeros => Ok(false),
                ResolveX::Ones => Ok(true),
                ResolveX::Random => Ok(rand::random::<bool>()),
            },
        }
    }
}

/// A fixed-size, arbitrarily-indexed array of [`Logic`] values.
///
/// Bits are stored in left-to-right order; indexing goes through the
/// array's [`Range`], so `a[7]` of a `7 downto 0` array is its leftmost
/// bit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicArray {
    bits: Vec<Logic>,
    range: Range,
}

impl LogicArray {
    /// Parses a binary string literal, e.g. `"01XZ"`.
    ///
    /// When `range` is given its length must match the literal.
    pub fn new(literal: &str, range: Option<Range>) -> Result<LogicArray, ValueError> {
        let bits = literal
            .chars()
            .map(Logic::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let range = match range {
            Some(range) => {
                if range.len() != bits.len() {
                    return Err(ValueError::LengthMismatch {
                        expected: range.len(),
                        got: bits.len(),
                    });
                }
                range
            }
            None => Range::with_width(bits.len().max(1)),
        };
        if bits.is_empty() {
            return Err(ValueError::LengthMismatch { expected: range.len(), got: 0 });
        }
        Ok(LogicArray { bits, range })
    }

    /// An array filled with a single value.
    pub fn filled(bit: Logic, range: Range) -> LogicArray {
        LogicArray { bits: vec![bit; range.len()], range }
    }

    /// Converts an unsigned integer, failing when it does not fit in the
    /// range's width.
    pub fn from_unsigned(value: u64, range: Range) -> Result<LogicArray, ValueError> {
        let width = range.len();
        if width < 64 && value >> width != 0 {
            return Err(ValueError::Overflow { value: value as i64, width });
        }
        let mut bits = Vec::with_capacity(width);
        for pos in (0..width).rev() {
            bits.push(Logic::from(pos < 64 && (value >> pos) & 1 == 1));
        }
        Ok(LogicArray { bits, range })
    }

    /// Converts a signed (two's complement) integer, failing when it does
    /// not fit in the range's width.
    pub fn from_signed(value: i64, range: Range) -> Result<LogicArray, ValueError> {
        let width = range.len();
        if width < 64 {
            let min = -(1i64 << (width - 1));
            let max = (1i64 << (width - 1)) - 1;
            if value < min || value > max {
                return Err(ValueError::Overflow { value, width });
            }
        }
        let mut bits = Vec::with_capacity(width);
        for pos in (0..width).rev() {
            let bit = if pos < 64 { (value >> pos) & 1 == 1 } else { value < 0 };
            bits.push(Logic::from(bit));
        }
        Ok(LogicArray { bits, range })
    }

    /// Builds an array from a simulator binary string, using the
    /// conventional `n-1 downto 0` bounds.
    pub fn from_handle(binstr: &str) -> Result<LogicArray, ValueError> {
        LogicArray::new(binstr, None)
    }

    pub fn range(&self) -> Range {
        self.range
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterates bits in left-to-right order.
    pub fn iter(&self) -> impl Iterator<Item = Logic> + '_ {
        self.bits.iter().copied()
    }

    /// The bit at logical index `index`, per the array's range.
    pub fn get(&self, index: i32) -> Option<Logic> {
        self.range.position_of(index).map(|pos| self.bits[pos])
    }

    /// Replaces the bit at logical index `index`.
    ///
    /// ## Panics
    ///
    /// Panics when `index` lies outside the array's range.
    pub fn set(&mut self, index: i32, bit: Logic) {
        let pos = self
            .range
            .position_of(index)
            .unwrap_or_else(|| panic!("index {} out of range {}", index, self.range));
        self.bits[pos] = bit;
    }

    /// Whether every bit resolves to `0`/`1` (including weak drives).
    pub fn is_resolvable(&self) -> bool {
        self.bits.iter().all(|b| b.is_resolvable())
    }

    /// Resolves to an unsigned integer using the given strategy.
    pub fn to_unsigned(&self, resolve: ResolveX) -> Result<u64, ValueError> {
        if self.len() > 64 {
            return Err(ValueError::Overflow { value: 0, width: self.len() });
        }
        let mut acc = 0u64;
        for bit in &self.bits {
            acc = (acc << 1) | resolve.resolve(*bit)? as u64;
        }
        Ok(acc)
    }

    /// Resolves to a signed (two's complement) integer using the given
    /// strategy.
    pub fn to_signed(&self, resolve: ResolveX) -> Result<i64, ValueError> {
        let raw = self.to_unsigned(resolve)?;
        let width = self.len();
        if width == 64 || raw >> (width - 1) == 0 {
            Ok(raw as i64)
        } else {
            Ok((raw | !mask(width)) as i64)
        }
    }

    /// The canonical binary-string rendering.
    pub fn to_binstr(&self) -> String {
        self.bits.iter().map(|b| b.to_char()).collect()
    }
}

fn mask(width: usize) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

impl Index<i32> for LogicArray {
    type Output = Logic;

    fn index(&self, index: i32) -> &Logic {
        let pos = self
            .range
            .position_of(index)
            .unwrap_or_else(|| panic!("index {} out of range {}", index, self.range));
        &self.bits[pos]
    }
}

impl From<Logic> for LogicArray {
    fn from(bit: Logic) -> LogicArray {
        LogicArray { bits: vec![bit], range: Range::with_width(1) }
    }
}

impl fmt::Display for LogicArray {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_binstr())
    }
}
