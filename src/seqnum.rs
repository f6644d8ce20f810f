//! 48-bit modular sequence number arithmetic.
//!
//! DCCP sequence and acknowledgement numbers live in a 48-bit circular
//! space (24-bit on the wire when the short form is negotiated, extended
//! back to 48 bits on receipt). Comparisons are circular: `a` precedes
//! `b` when the forward distance from `a` to `b` is less than half the
//! space. Validity windows follow RFC 4340 §7.5.

/// Number of bits in a long-form sequence number.
pub const SEQNO_BITS: u32 = 48;
/// Number of bits in a short-form sequence number.
pub const SHORT_SEQNO_BITS: u32 = 24;
/// Largest representable sequence number.
pub const MAX_SEQNO: u64 = (1 << SEQNO_BITS) - 1;
/// Largest representable short-form sequence number.
pub const MAX_SHORT_SEQNO: u64 = (1 << SHORT_SEQNO_BITS) - 1;

const HALF: u64 = 1 << (SEQNO_BITS - 1);

/// Reduces a value into the 48-bit sequence space.
pub fn mask(x: u64) -> u64 {
    x & MAX_SEQNO
}

/// `(a + b) mod 2^48`.
pub fn add(a: u64, b: u64) -> u64 {
    mask(a.wrapping_add(b))
}

/// `(a - b) mod 2^48`, the forward distance from `b` to `a`.
pub fn sub(a: u64, b: u64) -> u64 {
    mask(a.wrapping_sub(b))
}

/// Circular less-than: `a` precedes `b` in the sequence space.
pub fn lt(a: u64, b: u64) -> bool {
    a != b && sub(b, a) < HALF
}

/// Circular less-than-or-equal.
pub fn le(a: u64, b: u64) -> bool {
    sub(b, a) < HALF
}

/// The circular distance between two sequence numbers, whichever
/// direction is shorter.
pub fn distance(a: u64, b: u64) -> u64 {
    sub(a, b).min(sub(b, a))
}

/// Whether `x` lies in the circular interval `[lo, hi]`.
pub fn in_range(lo: u64, hi: u64, x: u64) -> bool {
    sub(x, lo) <= sub(hi, lo)
}

/// Valid SeqNo window for an incoming packet: `GSR - W <= s <= GSS + W`.
pub fn in_seqno_window(gsr: u64, gss: u64, w: u64, s: u64) -> bool {
    in_range(sub(gsr, w), add(gss, w), s)
}

/// Valid AckNo window for an incoming packet: `GAR - W < a <= GSS`.
pub fn in_ackno_window(gar: u64, gss: u64, w: u64, a: u64) -> bool {
    in_range(add(sub(gar, w), 1), gss, a)
}

/// Extends a 24-bit short sequence number into the 48-bit space.
///
/// The naive lift borrows the high 24 bits of `reference`; when the
/// packet sits just across a 24-bit boundary from the reference the high
/// part is corrected by one in the direction that lands closest to the
/// reference.
pub fn extend(short: u64, reference: u64) -> u64 {
    debug_assert!(short <= MAX_SHORT_SEQNO);
    let hi = reference >> SHORT_SEQNO_BITS;
    let mut best = mask(hi << SHORT_SEQNO_BITS) | short;
    for corrected in &[hi.wrapping_sub(1), hi.wrapping_add(1)] {
        let candidate = mask(corrected << SHORT_SEQNO_BITS) | short;
        if distance(candidate, reference) < distance(best, reference) {
            best = candidate;
        }
    }
    best
}
