//! Value types for logic signals.
//!
//! A small, self-contained model of HDL scalar and vector values:
//! nine-state [`Logic`] scalars, fixed-size arbitrarily-indexed
//! [`LogicArray`] vectors, and the [`Range`] index type shared by both
//! HDL directions (`to` / `downto`).

mod logic;
mod logic_array;
mod range;

pub use self::logic::Logic;
pub use self::logic_array::{LogicArray, ResolveX};
pub use self::range::{Direction, Range};

/// An error converting to or from a logic value.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    /// A character outside the nine-state alphabet `UX01ZWLH-`.
    #[error("invalid logic literal: {0:?}")]
    InvalidLiteral(char),
    /// A value whose length does not match the target.
    #[error("cannot assign value of length {got} to target of length {expected}")]
    LengthMismatch { expected: usize, got: usize },
    /// An integer outside the representable range of the target vector.
    #[error("integer value {value} out of range for a {width}-bit target")]
    Overflow { value: i64, width: usize },
    /// A non-`0`/`1` bit encountered while resolving to an integer.
    #[error("unresolvable bit in binary string: {0:?}")]
    UnresolvableBit(char),
}
