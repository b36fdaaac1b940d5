//! Two's-complement reinterpretation of 256-bit words for the signed
//! opcodes. Words stay unsigned everywhere else.

use primitive_types::U256;
use std::cmp::Ordering;

#[inline]
pub fn is_negative(value: U256) -> bool {
    value.bit(255)
}

#[inline]
pub fn twos_complement(value: U256) -> U256 {
    (!value).overflowing_add(U256::one()).0
}

/// Signed comparison. For equal signs the raw unsigned order is already the
/// signed order; otherwise the negative side is smaller.
pub fn i256_cmp(a: U256, b: U256) -> Ordering {
    match (is_negative(a), is_negative(b)) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.cmp(&b),
    }
}

/// Signed division. Division by zero yields zero; MIN / -1 wraps to MIN.
pub fn i256_div(numerator: U256, denominator: U256) -> U256 {
    if denominator.is_zero() {
        return U256::zero();
    }

    let min = U256::one() << 255;
    if numerator == min && denominator == U256::MAX {
        return min;
    }

    let numerator_negative = is_negative(numerator);
    let denominator_negative = is_negative(denominator);
    let n = if numerator_negative {
        twos_complement(numerator)
    } else {
        numerator
    };
    let d = if denominator_negative {
        twos_complement(denominator)
    } else {
        denominator
    };

    let quotient = n / d;
    if numerator_negative != denominator_negative {
        twos_complement(quotient)
    } else {
        quotient
    }
}

/// Signed remainder; the result takes the sign of the dividend.
pub fn i256_mod(numerator: U256, denominator: U256) -> U256 {
    if denominator.is_zero() {
        return U256::zero();
    }

    let numerator_negative = is_negative(numerator);
    let n = if numerator_negative {
        twos_complement(numerator)
    } else {
        numerator
    };
    let d = if is_negative(denominator) {
        twos_complement(denominator)
    } else {
        denominator
    };

    let remainder = n % d;
    if numerator_negative {
        twos_complement(remainder)
    } else {
        remainder
    }
}

/// Arithmetic right shift. Shifts of 256 or more collapse to all-ones for
/// negative inputs and zero otherwise.
pub fn sar(shift: U256, value: U256) -> U256 {
    let negative = is_negative(value);
    if shift >= U256::from(256) {
        return if negative { U256::MAX } else { U256::zero() };
    }

    let shift = shift.low_u64() as usize;
    if shift == 0 {
        return value;
    }

    let shifted = value >> shift;
    if negative {
        shifted | (U256::MAX << (256 - shift))
    } else {
        shifted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neg(value: u64) -> U256 {
        twos_complement(U256::from(value))
    }

    #[test]
    fn test_twos_complement_roundtrip() {
        let x = U256::from(1234u64);
        assert_eq!(twos_complement(twos_complement(x)), x);
        assert!(is_negative(neg(1)));
    }

    #[test]
    fn test_signed_division() {
        assert_eq!(i256_div(neg(10), U256::from(2)), neg(5));
        assert_eq!(i256_div(neg(10), neg(2)), U256::from(5));
        assert_eq!(i256_div(U256::from(10), neg(2)), neg(5));
        assert_eq!(i256_div(U256::from(10), U256::zero()), U256::zero());

        // MIN / -1 wraps back to MIN
        let min = U256::one() << 255;
        assert_eq!(i256_div(min, U256::MAX), min);
    }

    #[test]
    fn test_signed_modulo_follows_dividend() {
        assert_eq!(i256_mod(neg(10), U256::from(3)), neg(1));
        assert_eq!(i256_mod(U256::from(10), neg(3)), U256::from(1));
        assert_eq!(i256_mod(U256::from(10), U256::zero()), U256::zero());
    }

    #[test]
    fn test_signed_compare() {
        assert_eq!(i256_cmp(neg(1), U256::from(1)), Ordering::Less);
        assert_eq!(i256_cmp(U256::from(1), neg(1)), Ordering::Greater);
        assert_eq!(i256_cmp(neg(2), neg(1)), Ordering::Less);
        assert_eq!(i256_cmp(U256::from(5), U256::from(5)), Ordering::Equal);
    }

    #[test]
    fn test_sar() {
        assert_eq!(sar(U256::from(1), U256::from(4)), U256::from(2));
        assert_eq!(sar(U256::from(1), neg(4)), neg(2));
        // shift of 256 or more saturates on the sign
        assert_eq!(sar(U256::from(256), neg(1)), U256::MAX);
        assert_eq!(sar(U256::from(300), U256::from(7)), U256::zero());
        assert_eq!(sar(U256::zero(), neg(3)), neg(3));
    }
}
