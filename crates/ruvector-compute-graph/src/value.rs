//! Value-type contract for graph computations
//!
//! A graph is monomorphic in its value type: one `Graph<f64>`, one
//! `Graph<Image>`, never a mix. [`GraphValue`] is everything the store,
//! cache, and scheduler need from that type. Numeric types get weighted
//! blending, absolute-difference distance, and decimal-grid quantization;
//! everything else falls back to last-write-wins semantics via the default
//! methods.

use std::fmt::Debug;

/// Contract for values flowing through a computation graph.
///
/// The default method bodies implement the non-numeric semantics: blending
/// is last-write-wins, distance is 0/1 by fingerprint, quantization is the
/// identity. Numeric implementations override all three.
pub trait GraphValue: Clone + Debug + Default + Send + Sync + 'static {
    /// Stable 64-bit fingerprint used as the result-cache key.
    ///
    /// Must be identical for equal values within a process run. Collisions
    /// merely overwrite a cache slot.
    fn fingerprint(&self) -> u64;

    /// Blend `incoming` into `self` with the given weight in `[0, 1]`.
    ///
    /// Weight 0 keeps `self`, weight 1 takes `incoming`.
    fn blend(&self, incoming: &Self, _weight: f64) -> Self {
        incoming.clone()
    }

    /// Distance between two values, used by store compression.
    fn distance(&self, other: &Self) -> f64 {
        if self.fingerprint() == other.fingerprint() {
            0.0
        } else {
            1.0
        }
    }

    /// Re-quantize a value read at `from_level` onto the grid of
    /// `to_level`. Only meaningful when `to_level > from_level`; otherwise
    /// the value is returned unchanged, so `quantize(x, l, l) == x`.
    fn quantize(&self, _from_level: usize, _to_level: usize) -> Self {
        self.clone()
    }
}

/// SplitMix64 finalizer, used to spread raw bit patterns into fingerprints.
#[inline]
fn mix64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// FNV-1a over raw bytes, for variable-length values.
#[inline]
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

macro_rules! impl_graph_value_float {
    ($($t:ty),*) => {$(
        impl GraphValue for $t {
            fn fingerprint(&self) -> u64 {
                // Normalize -0.0 so it fingerprints like 0.0.
                let canonical = if *self == 0.0 { 0.0 } else { *self };
                mix64((canonical as f64).to_bits())
            }

            fn blend(&self, incoming: &Self, weight: f64) -> Self {
                let w = weight.clamp(0.0, 1.0);
                ((*self as f64) * (1.0 - w) + (*incoming as f64) * w) as $t
            }

            fn distance(&self, other: &Self) -> f64 {
                ((*self as f64) - (*other as f64)).abs()
            }

            fn quantize(&self, from_level: usize, to_level: usize) -> Self {
                if to_level <= from_level {
                    return *self;
                }
                let scale = 10f64.powi((to_level - from_level) as i32);
                (((*self as f64) * scale).round() / scale) as $t
            }
        }
    )*};
}

impl_graph_value_float!(f32, f64);

macro_rules! impl_graph_value_int {
    ($($t:ty),*) => {$(
        impl GraphValue for $t {
            fn fingerprint(&self) -> u64 {
                mix64(*self as u64)
            }

            fn blend(&self, incoming: &Self, weight: f64) -> Self {
                let w = weight.clamp(0.0, 1.0);
                ((*self as f64) * (1.0 - w) + (*incoming as f64) * w).round() as $t
            }

            fn distance(&self, other: &Self) -> f64 {
                ((*self as f64) - (*other as f64)).abs()
            }

            // Integer grids are coarser than any decimal refinement.
        }
    )*};
}

impl_graph_value_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl GraphValue for bool {
    fn fingerprint(&self) -> u64 {
        mix64(*self as u64)
    }
}

impl GraphValue for String {
    fn fingerprint(&self) -> u64 {
        fnv1a(self.as_bytes())
    }
}

impl GraphValue for () {
    fn fingerprint(&self) -> u64 {
        0
    }
}
