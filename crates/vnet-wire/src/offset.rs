//! Ring offsets.
//!
//! Every position on a packed ring is tracked as a 16-bit offset: bits 0..=14 hold the slot index
//! and bit 15 holds the wrap counter. All counters start at [`INITIAL_OFF`] (index 0, wrap 1).
//! `ring_size` is always a power of two no larger than 2^15.

pub const WRAP_BIT: u16 = 1 << 15;
pub const INDEX_MASK: u16 = WRAP_BIT - 1;

/// Offset every counter starts at after queue setup.
pub const INITIAL_OFF: u16 = WRAP_BIT;

/// Largest ring a 15-bit index can address.
pub const MAX_RING_SIZE: u16 = WRAP_BIT;

#[inline]
pub fn is_valid_ring_size(ring_size: u16) -> bool {
    ring_size != 0 && ring_size.is_power_of_two() && ring_size <= MAX_RING_SIZE
}

/// Slot index addressed by `off`.
#[inline]
pub fn to_index(off: u16, ring_size: u16) -> u16 {
    off & INDEX_MASK & (ring_size - 1)
}

/// Wrap counter carried by `off`.
#[inline]
pub fn wrap(off: u16) -> bool {
    off & WRAP_BIT != 0
}

/// Advances `base` by `n` slots, flipping the wrap bit when the ring end is crossed.
///
/// `n` must not exceed `ring_size`.
#[inline]
pub fn add(base: u16, n: u16, ring_size: u16) -> u16 {
    debug_assert!(n <= ring_size);
    let mut wrap = base & WRAP_BIT;
    let mut idx = u32::from(base & INDEX_MASK) + u32::from(n);
    if idx >= u32::from(ring_size) {
        idx -= u32::from(ring_size);
        wrap ^= WRAP_BIT;
    }
    wrap | idx as u16
}

/// Forward distance from `b` to `a`.
#[inline]
pub fn diff(a: u16, b: u16, ring_size: u16) -> u16 {
    let (ia, ib) = (a & INDEX_MASK, b & INDEX_MASK);
    if (a ^ b) & WRAP_BIT == 0 {
        ia.wrapping_sub(ib)
    } else {
        ring_size - ib + ia
    }
}

/// Forward distance from `b` to `a`, stopping at the physical end of the ring.
///
/// This is the longest contiguous run starting at `b`.
#[inline]
pub fn diff_no_wrap(a: u16, b: u16, ring_size: u16) -> u16 {
    let (ia, ib) = (a & INDEX_MASK, b & INDEX_MASK);
    if (a ^ b) & WRAP_BIT == 0 {
        ia.wrapping_sub(ib)
    } else {
        ring_size - ib
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_flips_wrap_at_ring_end() {
        assert_eq!(add(INITIAL_OFF, 4, 8), 0x8004);
        assert_eq!(add(0x8006, 2, 8), 0x0000);
        assert_eq!(add(0x8006, 3, 8), 0x0001);
        assert_eq!(add(0x0007, 1, 8), 0x8000);
        assert_eq!(add(0x8003, 8, 8), 0x0003);
    }

    #[test]
    fn diff_across_wrap() {
        assert_eq!(diff(0x0001, 0x8006, 8), 3);
        assert_eq!(diff(0x8006, 0x8006, 8), 0);
        assert_eq!(diff(0x8000, 0x0000, 8), 8);
        assert_eq!(diff_no_wrap(0x0001, 0x8006, 8), 2);
        assert_eq!(diff_no_wrap(0x8005, 0x8001, 8), 4);
    }

    #[test]
    fn index_ignores_wrap() {
        assert_eq!(to_index(0x8005, 8), 5);
        assert_eq!(to_index(0x0005, 8), 5);
        assert!(wrap(INITIAL_OFF));
        assert!(!wrap(0x7fff));
    }

    #[test]
    fn ring_sizes() {
        assert!(is_valid_ring_size(1));
        assert!(is_valid_ring_size(256));
        assert!(is_valid_ring_size(MAX_RING_SIZE));
        assert!(!is_valid_ring_size(0));
        assert!(!is_valid_ring_size(384));
    }

    #[cfg(not(target_arch = "wasm32"))]
    mod prop {
        use super::super::*;
        use proptest::prelude::*;

        fn ring_and_offset() -> impl Strategy<Value = (u16, u16)> {
            (0u32..=15).prop_flat_map(|shift| {
                let sz = 1u16 << shift;
                (Just(sz), any::<bool>(), 0..sz)
                    .prop_map(|(sz, w, idx)| (sz, if w { WRAP_BIT | idx } else { idx }))
            })
        }

        proptest! {
            #[test]
            fn add_then_diff_round_trips(((sz, x), frac) in (ring_and_offset(), 0.0f64..1.0)) {
                let n = ((f64::from(sz)) * frac) as u16;
                prop_assume!(n < sz);
                prop_assert_eq!(diff(add(x, n, sz), x, sz), n);
            }

            #[test]
            fn no_wrap_run_never_crosses_ring_end(((sz, x), frac) in (ring_and_offset(), 0.0f64..1.0)) {
                let n = ((f64::from(sz)) * frac) as u16;
                prop_assume!(n < sz);
                let y = add(x, n, sz);
                let run = diff_no_wrap(y, x, sz);
                prop_assert!(run <= n);
                prop_assert!(u32::from(to_index(x, sz)) + u32::from(run) <= u32::from(sz));
            }
        }
    }
}
