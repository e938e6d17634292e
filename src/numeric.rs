//! Numeric semantics shared by every arithmetic and conversion instruction.
//!
//! Everything here is a pure function. Rust's native integer and float
//! operators already match the required IEEE-754 behaviour for add, sub,
//! mul, div, sqrt, ceil, floor and trunc; this module covers the cases where
//! they do not: NaN-propagating min/max, round-half-to-even, saturating
//! float-to-int truncation, trapping integer division and sign extension.

use crate::trap::{Result, Trap};

pub const F32_CANONICAL_NAN_BITS: u32 = 0x7FC0_0000;
pub const F32_CANONICAL_NEG_NAN_BITS: u32 = 0xFFC0_0000;
pub const F64_CANONICAL_NAN_BITS: u64 = 0x7FF8_0000_0000_0000;
pub const F64_CANONICAL_NEG_NAN_BITS: u64 = 0xFFF8_0000_0000_0000;

/// Magnitudes at or above these are already integral.
const F32_INTEGRAL_BOUND: f32 = 8_388_608.0; // 2^23
const F64_INTEGRAL_BOUND: f64 = 4_503_599_627_370_496.0; // 2^52

pub fn is_canonical_nan_f32(x: f32) -> bool {
    let bits = x.to_bits();
    bits == F32_CANONICAL_NAN_BITS || bits == F32_CANONICAL_NEG_NAN_BITS
}

pub fn is_canonical_nan_f64(x: f64) -> bool {
    let bits = x.to_bits();
    bits == F64_CANONICAL_NAN_BITS || bits == F64_CANONICAL_NEG_NAN_BITS
}

// ── Rounding ─────────────────────────────────────────────────────────────────

macro_rules! nearest_impl {
    ($name:ident, $ty:ty, $is_canonical:ident, $bound:expr) => {
        /// Rounds to the nearest integer, ties to even. The sign of the
        /// input is kept, so values in `(-0.5, 0)` round to `-0.0`.
        pub fn $name(x: $ty) -> $ty {
            if $is_canonical(x) || x.is_nan() || x.is_infinite() || x == 0.0 {
                return x;
            }
            if x.abs() >= $bound {
                return x;
            }
            if x > 0.0 && x <= 0.5 {
                return 0.0;
            }
            if x < 0.0 && x >= -0.5 {
                return -0.0;
            }
            let whole = x.trunc();
            let frac = x - whole;
            let rounded = if frac.abs() == 0.5 {
                let away = whole + frac.signum();
                if whole % 2.0 == 0.0 {
                    whole
                } else {
                    away
                }
            } else {
                x.round()
            };
            // round() and the tie branch both keep the sign except when the
            // result is zero; restore it there.
            if rounded == 0.0 {
                (0.0 as $ty).copysign(x)
            } else {
                rounded
            }
        }
    };
}

nearest_impl!(nearest_f32, f32, is_canonical_nan_f32, F32_INTEGRAL_BOUND);
nearest_impl!(nearest_f64, f64, is_canonical_nan_f64, F64_INTEGRAL_BOUND);

// ── Min / max ────────────────────────────────────────────────────────────────

macro_rules! minmax_impl {
    ($min:ident, $max:ident, $ty:ty) => {
        /// Any NaN operand yields NaN; `-0.0` is smaller than `0.0`.
        pub fn $min(a: $ty, b: $ty) -> $ty {
            if a.is_nan() || b.is_nan() {
                return <$ty>::NAN;
            }
            if a == 0.0 && b == 0.0 {
                return if a.is_sign_negative() { a } else { b };
            }
            if a < b {
                a
            } else {
                b
            }
        }

        /// Any NaN operand yields NaN; `0.0` is larger than `-0.0`.
        pub fn $max(a: $ty, b: $ty) -> $ty {
            if a.is_nan() || b.is_nan() {
                return <$ty>::NAN;
            }
            if a == 0.0 && b == 0.0 {
                return if a.is_sign_positive() { a } else { b };
            }
            if a > b {
                a
            } else {
                b
            }
        }
    };
}

minmax_impl!(min_f32, max_f32, f32);
minmax_impl!(min_f64, max_f64, f64);

// ── Saturating float → int truncation ────────────────────────────────────────

/// NaN or ≤ 0 → 0, ≥ 2^32 → `u32::MAX`, else truncate toward zero.
pub fn trunc_sat_u32_f64(x: f64) -> u32 {
    if x.is_nan() || x <= 0.0 {
        0
    } else if x >= 4_294_967_296.0 {
        u32::MAX
    } else {
        x.trunc() as u32
    }
}

pub fn trunc_sat_u32_f32(x: f32) -> u32 {
    trunc_sat_u32_f64(f64::from(x))
}

/// NaN or ≤ 0 → 0, ≥ 2^64 → `u64::MAX`, else truncate toward zero.
pub fn trunc_sat_u64_f64(x: f64) -> u64 {
    if x.is_nan() || x <= 0.0 {
        0
    } else if x >= 18_446_744_073_709_551_616.0 {
        u64::MAX
    } else {
        x.trunc() as u64
    }
}

pub fn trunc_sat_u64_f32(x: f32) -> u64 {
    trunc_sat_u64_f64(f64::from(x))
}

/// NaN → 0, otherwise clamp to the `i32` range and truncate toward zero.
pub fn trunc_sat_i32_f64(x: f64) -> i32 {
    if x.is_nan() {
        0
    } else if x <= -2_147_483_648.0 {
        i32::MIN
    } else if x >= 2_147_483_647.0 {
        i32::MAX
    } else {
        x.trunc() as i32
    }
}

pub fn trunc_sat_i32_f32(x: f32) -> i32 {
    trunc_sat_i32_f64(f64::from(x))
}

/// NaN → 0, otherwise clamp to the `i64` range and truncate toward zero.
pub fn trunc_sat_i64_f64(x: f64) -> i64 {
    if x.is_nan() {
        0
    } else if x <= -9_223_372_036_854_775_808.0 {
        i64::MIN
    } else if x >= 9_223_372_036_854_775_808.0 {
        i64::MAX
    } else {
        x.trunc() as i64
    }
}

pub fn trunc_sat_i64_f32(x: f32) -> i64 {
    trunc_sat_i64_f64(f64::from(x))
}

// ── Sign extension ───────────────────────────────────────────────────────────

pub fn extend8_s_i32(x: i32) -> i32 {
    i32::from(x as i8)
}

pub fn extend16_s_i32(x: i32) -> i32 {
    i32::from(x as i16)
}

pub fn extend8_s_i64(x: i64) -> i64 {
    i64::from(x as i8)
}

pub fn extend16_s_i64(x: i64) -> i64 {
    i64::from(x as i16)
}

pub fn extend32_s_i64(x: i64) -> i64 {
    i64::from(x as i32)
}

// ── Integer division ─────────────────────────────────────────────────────────

macro_rules! div_impl {
    ($div_s:ident, $div_u:ident, $rem_s:ident, $rem_u:ident, $s:ty, $u:ty) => {
        pub fn $div_s(a: $s, b: $s) -> Result<$s> {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            a.checked_div(b).ok_or(Trap::IntegerOverflow)
        }

        /// Divides the operands' bit patterns as unsigned magnitudes.
        pub fn $div_u(a: $s, b: $s) -> Result<$s> {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            Ok(((a as $u) / (b as $u)) as $s)
        }

        /// `MIN rem -1` is 0 rather than an overflow.
        pub fn $rem_s(a: $s, b: $s) -> Result<$s> {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            Ok(a.wrapping_rem(b))
        }

        pub fn $rem_u(a: $s, b: $s) -> Result<$s> {
            if b == 0 {
                return Err(Trap::DivisionByZero);
            }
            Ok(((a as $u) % (b as $u)) as $s)
        }
    };
}

div_impl!(i32_div_s, i32_div_u, i32_rem_s, i32_rem_u, i32, u32);
div_impl!(i64_div_s, i64_div_u, i64_rem_s, i64_rem_u, i64, u64);
