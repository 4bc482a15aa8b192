//! Utility maths functions

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use num_traits::Float;

/// Limit a value to the closed range `[min, max]`.
///
/// NaN is passed through unchanged so that divergence stays visible to the caller.
pub fn clamp<T>(value: T, min: T, max: T) -> T
where
    T: Float
{
    let mut ret = value;

    if ret > max {
        ret = max
    }
    if ret < min {
        ret = min
    }

    ret
}

/// Limit a value to at most `max`.
pub fn clamp_max<T>(value: T, max: T) -> T
where
    T: Float
{
    if value > max { max } else { value }
}

/// Sum the elements of a slice.
pub fn sum<T>(values: &[T]) -> T
where
    T: Float
{
    values.iter().fold(T::zero(), |acc, v| acc + *v)
}
