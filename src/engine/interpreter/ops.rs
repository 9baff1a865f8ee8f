//! Arithmetic, comparison and conversion on evaluation stack slots.
//!
//! Integer operands of different widths widen to 64 bits, floats of different widths to
//! double precision. Integer arithmetic wraps; signed division by zero is reported as
//! `Ok(None)` so the caller can raise the interpreted fault.

use std::cmp::Ordering;

use crate::{engine::StackSlot, Error, Result};

/// Two-operand arithmetic and bitwise operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

/// Comparisons shared by `ceq`/`cgt`/`clt` and the conditional branches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub(crate) fn holds(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            // NaN compares unequal to everything
            (CompareOp::Ne, None) => true,
            (_, None) => false,
            (CompareOp::Eq, Some(o)) => o == Ordering::Equal,
            (CompareOp::Ne, Some(o)) => o != Ordering::Equal,
            (CompareOp::Lt, Some(o)) => o == Ordering::Less,
            (CompareOp::Le, Some(o)) => o != Ordering::Greater,
            (CompareOp::Gt, Some(o)) => o == Ordering::Greater,
            (CompareOp::Ge, Some(o)) => o != Ordering::Less,
        }
    }
}

/// Target of the `conv.*` instructions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConversionType {
    I4,
    I8,
    R4,
    R8,
}

#[derive(Debug, Clone, Copy)]
enum Number {
    Int { value: i64, wide: bool },
    Float { value: f64, wide: bool },
}

fn number(slot: StackSlot) -> Result<Number> {
    match slot {
        StackSlot::Int32(v) => Ok(Number::Int {
            value: i64::from(v),
            wide: false,
        }),
        StackSlot::Int64(v) => Ok(Number::Int { value: v, wide: true }),
        StackSlot::Float(v) => Ok(Number::Float {
            value: f64::from(v),
            wide: false,
        }),
        StackSlot::Double(v) => Ok(Number::Float { value: v, wide: true }),
        other => Err(Error::InvalidStackState(format!(
            "arithmetic on a {} slot",
            other.kind()
        ))),
    }
}

/// Returns true for the slot kinds arithmetic accepts
pub(crate) fn is_numeric(slot: StackSlot) -> bool {
    matches!(
        slot,
        StackSlot::Int32(_) | StackSlot::Int64(_) | StackSlot::Float(_) | StackSlot::Double(_)
    )
}

fn as_float(n: Number) -> f64 {
    match n {
        Number::Int { value, .. } => value as f64,
        Number::Float { value, .. } => value,
    }
}

fn float_wide(a: Number, b: Number) -> bool {
    !matches!(
        (a, b),
        (Number::Float { wide: false, .. }, Number::Float { wide: false, .. })
    )
}

fn int_slot(value: i64, wide: bool) -> StackSlot {
    if wide {
        StackSlot::Int64(value)
    } else {
        StackSlot::Int32(value as i32)
    }
}

fn float_slot(value: f64, wide: bool) -> StackSlot {
    if wide {
        StackSlot::Double(value)
    } else {
        StackSlot::Float(value as f32)
    }
}

/// Applies `op` to `left` and `right`; `Ok(None)` for integer division by zero
///
/// # Errors
/// Returns [`Error::InvalidStackState`] for non-numeric operands and bitwise operations on
/// floats.
pub(crate) fn binary(op: BinaryOp, left: StackSlot, right: StackSlot) -> Result<Option<StackSlot>> {
    let (a, b) = (number(left)?, number(right)?);
    match (a, b) {
        (Number::Int { value: x, wide: wa }, Number::Int { value: y, wide: wb }) => {
            let wide = wa || wb;
            let result = match op {
                BinaryOp::Add => x.wrapping_add(y),
                BinaryOp::Sub => x.wrapping_sub(y),
                BinaryOp::Mul => x.wrapping_mul(y),
                BinaryOp::Div | BinaryOp::Rem if y == 0 => return Ok(None),
                BinaryOp::Div if wide => x.wrapping_div(y),
                BinaryOp::Div => i64::from((x as i32).wrapping_div(y as i32)),
                BinaryOp::Rem if wide => x.wrapping_rem(y),
                BinaryOp::Rem => i64::from((x as i32).wrapping_rem(y as i32)),
                BinaryOp::And => x & y,
                BinaryOp::Or => x | y,
                BinaryOp::Xor => x ^ y,
                // the shift amount never widens the shifted value
                BinaryOp::Shl if wa => x.wrapping_shl(y as u32),
                BinaryOp::Shl => i64::from((x as i32).wrapping_shl(y as u32)),
                BinaryOp::Shr if wa => x.wrapping_shr(y as u32),
                BinaryOp::Shr => i64::from((x as i32).wrapping_shr(y as u32)),
            };
            let wide = if matches!(op, BinaryOp::Shl | BinaryOp::Shr) { wa } else { wide };
            Ok(Some(int_slot(result, wide)))
        }
        _ => {
            let wide = float_wide(a, b);
            let (x, y) = (as_float(a), as_float(b));
            let result = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                BinaryOp::Rem => x % y,
                _ => {
                    return Err(Error::InvalidStackState(format!(
                        "{:?} on floating point operands",
                        op
                    )))
                }
            };
            Ok(Some(float_slot(result, wide)))
        }
    }
}

/// Arithmetic negation
///
/// # Errors
/// Returns [`Error::InvalidStackState`] for non-numeric operands.
pub(crate) fn negate(slot: StackSlot) -> Result<StackSlot> {
    Ok(match number(slot)? {
        Number::Int { value, wide } => int_slot(value.wrapping_neg(), wide),
        Number::Float { value, wide } => float_slot(-value, wide),
    })
}

/// Orders two numeric slots; `None` if either is NaN
///
/// # Errors
/// Returns [`Error::InvalidStackState`] for non-numeric operands.
pub(crate) fn order(left: StackSlot, right: StackSlot) -> Result<Option<Ordering>> {
    let (a, b) = (number(left)?, number(right)?);
    Ok(match (a, b) {
        (Number::Int { value: x, .. }, Number::Int { value: y, .. }) => Some(x.cmp(&y)),
        _ => as_float(a).partial_cmp(&as_float(b)),
    })
}

/// `conv.*`: truncating conversion between the numeric slot kinds
///
/// # Errors
/// Returns [`Error::InvalidStackState`] for non-numeric operands.
pub(crate) fn convert(slot: StackSlot, to: ConversionType) -> Result<StackSlot> {
    let n = number(slot)?;
    Ok(match (to, n) {
        (ConversionType::I4, Number::Int { value, .. }) => StackSlot::Int32(value as i32),
        (ConversionType::I4, Number::Float { value, .. }) => StackSlot::Int32(value as i32),
        (ConversionType::I8, Number::Int { value, .. }) => StackSlot::Int64(value),
        (ConversionType::I8, Number::Float { value, .. }) => StackSlot::Int64(value as i64),
        (ConversionType::R4, n) => StackSlot::Float(as_float(n) as f32),
        (ConversionType::R8, n) => StackSlot::Double(as_float(n)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int32_arithmetic_wraps() {
        let r = binary(BinaryOp::Add, StackSlot::Int32(i32::MAX), StackSlot::Int32(1)).unwrap();
        assert_eq!(r, Some(StackSlot::Int32(i32::MIN)));
        let r = binary(BinaryOp::Div, StackSlot::Int32(i32::MIN), StackSlot::Int32(-1)).unwrap();
        assert_eq!(r, Some(StackSlot::Int32(i32::MIN)));
    }

    #[test]
    fn mixed_widths_widen() {
        let r = binary(BinaryOp::Mul, StackSlot::Int32(3), StackSlot::Int64(1 << 40)).unwrap();
        assert_eq!(r, Some(StackSlot::Int64(3 << 40)));
        let r = binary(BinaryOp::Add, StackSlot::Float(0.5), StackSlot::Double(0.25)).unwrap();
        assert_eq!(r, Some(StackSlot::Double(0.75)));
        let r = binary(BinaryOp::Add, StackSlot::Float(0.5), StackSlot::Float(0.25)).unwrap();
        assert_eq!(r, Some(StackSlot::Float(0.75)));
    }

    #[test]
    fn division_by_zero_is_reported() {
        assert_eq!(binary(BinaryOp::Rem, StackSlot::Int64(3), StackSlot::Int64(0)).unwrap(), None);
        let r = binary(BinaryOp::Div, StackSlot::Double(1.0), StackSlot::Double(0.0)).unwrap();
        assert_eq!(r, Some(StackSlot::Double(f64::INFINITY)));
    }

    #[test]
    fn shifts_keep_the_left_width() {
        let r = binary(BinaryOp::Shl, StackSlot::Int32(1), StackSlot::Int64(33)).unwrap();
        assert_eq!(r, Some(StackSlot::Int32(2)));
        assert!(binary(BinaryOp::Xor, StackSlot::Float(1.0), StackSlot::Float(1.0)).is_err());
    }

    #[test]
    fn comparisons() {
        let o = order(StackSlot::Int32(-1), StackSlot::Int64(0)).unwrap();
        assert!(CompareOp::Lt.holds(o));
        let nan = order(StackSlot::Double(f64::NAN), StackSlot::Double(1.0)).unwrap();
        assert!(!CompareOp::Eq.holds(nan));
        assert!(CompareOp::Ne.holds(nan));
        assert!(order(StackSlot::Null, StackSlot::Int32(0)).is_err());
    }

    #[test]
    fn conversions_truncate() {
        assert_eq!(convert(StackSlot::Double(-2.75), ConversionType::I4).unwrap(), StackSlot::Int32(-2));
        assert_eq!(convert(StackSlot::Int64(1 << 33), ConversionType::I4).unwrap(), StackSlot::Int32(0));
        assert_eq!(negate(StackSlot::Int32(i32::MIN)).unwrap(), StackSlot::Int32(i32::MIN));
    }
}
