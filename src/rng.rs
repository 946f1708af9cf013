//! Deterministic RNG for jitter simulation and demo patterns.
//!
//! FNV-1a turns a string seed into state, SplitMix64 generates from it.
//! Stable across runs and platforms, unlike std's randomized hasher, so a
//! jittered session replays identically from its seed.

/// FNV-1a hash of a string to a u64 seed.
pub fn fnv1a64(seed: &str) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in seed.as_bytes() {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

/// SplitMix64 generator.
#[derive(Clone, Debug)]
pub struct DetRng {
    state: u64,
}

impl DetRng {
    pub fn new(seed: &str) -> Self {
        Self { state: fnv1a64(seed) }
    }

    pub fn from_u64(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = self.state;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }

    /// Uniform f64 in [0, 1), from the upper 53 bits.
    pub fn random(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Uniform f64 in [lo, hi). Handy for millisecond jitter bounds.
    pub fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + self.random() * (hi - lo)
    }
}
