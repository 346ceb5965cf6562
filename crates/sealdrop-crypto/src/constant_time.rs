//! Constant-time comparisons.
//!
//! Execution time depends only on input length, never on content.

use subtle::ConstantTimeEq;

/// Constant-time comparison of byte slices.
///
/// Returns `false` immediately for different lengths; lengths are public.
#[must_use]
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.ct_eq(b).into()
}

/// Timing-safe 32-byte array comparison.
#[must_use]
#[inline(never)]
pub fn verify_32(a: &[u8; 32], b: &[u8; 32]) -> bool {
    ct_eq(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ct_eq() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"ab"));
        assert!(ct_eq(b"", b""));
    }

    #[test]
    fn test_verify_32() {
        let a = [1u8; 32];
        let mut b = a;
        assert!(verify_32(&a, &b));
        b[31] = 0;
        assert!(!verify_32(&a, &b));
    }
}
