//! Windowed min-hash sketching of DNA sequences.
//!
//! A reference target is cut into fixed-stride windows; each window is
//! reduced to the `sketch_size` smallest distinct hash values over its
//! canonical 2-bit k-mers. Queries are sketched the same way, so a feature
//! (hash value) shared between a query and a reference window shows up as a
//! hit location `(target, window)`.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Feature value: a 64-bit k-mer hash.
pub type Feature = u64;

/// Sketch of one window.
pub type Sketch = SmallVec<[Feature; 16]>;

const CANONICAL_BASES: usize = 4;

/// 64-bit finalizer used to spread 2-bit-packed k-mers.
#[inline]
fn hash64(mut x: u64) -> u64 {
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

#[inline]
fn encode_base(b: u8) -> Option<u64> {
    match b {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// Windowed min-hash sketcher with fixed k-mer, sketch, and window geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sketcher {
    kmer_size: u8,
    sketch_size: u16,
    window_size: u32,
    window_stride: u32,
}

impl Default for Sketcher {
    fn default() -> Self {
        Self::new(16, 16, 128, 0)
    }
}

impl Sketcher {
    /// Create a sketcher; `window_stride == 0` selects the default stride
    /// `window_size - kmer_size + 1` (consecutive windows share k-1 bases).
    pub fn new(kmer_size: u8, sketch_size: u16, window_size: u32, window_stride: u32) -> Self {
        let k = kmer_size.clamp(1, 32);
        let stride = if window_stride == 0 {
            window_size.saturating_sub(k as u32 - 1).max(1)
        } else {
            window_stride
        };
        Self {
            kmer_size: k,
            sketch_size: sketch_size.max(1),
            window_size: window_size.max(k as u32),
            window_stride: stride,
        }
    }

    pub fn kmer_size(&self) -> u8 {
        self.kmer_size
    }

    pub fn sketch_size(&self) -> u16 {
        self.sketch_size
    }

    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    pub fn window_stride(&self) -> u32 {
        self.window_stride
    }

    /// Number of sketch windows of a sequence of `len` bases.
    pub fn window_count(&self, len: usize) -> u32 {
        let k = self.kmer_size as usize;
        if len < k {
            return 0;
        }
        ((len - k) / self.window_stride as usize) as u32 + 1
    }

    /// Sketch a single window: the `sketch_size` smallest distinct canonical
    /// k-mer hashes, ascending.
    pub fn sketch_window(&self, seq: &[u8]) -> Sketch {
        let k = self.kmer_size as u32;
        let smax = self.sketch_size as usize;
        let mask = if k == 32 { u64::MAX } else { (1u64 << (2 * k)) - 1 };

        let mut sketch = Sketch::new();
        let mut fwd: u64 = 0;
        let mut rev: u64 = 0;
        let mut filled: u32 = 0;

        for &b in seq {
            match encode_base(b) {
                Some(code) => {
                    fwd = ((fwd << 2) | code) & mask;
                    rev = (rev >> 2) | ((CANONICAL_BASES as u64 - 1 - code) << (2 * (k - 1)));
                    filled += 1;
                }
                None => {
                    // ambiguous base: restart the k-mer
                    filled = 0;
                    fwd = 0;
                    rev = 0;
                    continue;
                }
            }
            if filled < k {
                continue;
            }
            let canonical = fwd.min(rev);
            let h = hash64(canonical);
            if sketch.len() == smax && h >= *sketch.last().unwrap() {
                continue;
            }
            match sketch.binary_search(&h) {
                Ok(_) => {} // already in the sketch
                Err(pos) => {
                    if sketch.len() == smax {
                        sketch.pop();
                    }
                    sketch.insert(pos, h);
                }
            }
        }
        sketch
    }

    /// Sketch every window of `seq`, invoking `f(window_id, sketch)` per
    /// non-empty window.
    pub fn for_each_window_sketch<F>(&self, seq: &[u8], mut f: F)
    where
        F: FnMut(u32, &Sketch),
    {
        let k = self.kmer_size as usize;
        if seq.len() < k {
            return;
        }
        let win = self.window_size as usize;
        let stride = self.window_stride as usize;
        let mut window_id: u32 = 0;
        let mut start = 0usize;
        while start + k <= seq.len() {
            let end = (start + win).min(seq.len());
            let sketch = self.sketch_window(&seq[start..end]);
            if !sketch.is_empty() {
                f(window_id, &sketch);
            }
            window_id += 1;
            start += stride;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sketch_is_sorted_and_bounded() {
        let sk = Sketcher::new(4, 8, 32, 0);
        let seq = b"ACGTACGTTTGACCAGATCAGATTTACGGATC";
        let s = sk.sketch_window(seq);
        assert!(s.len() <= 8);
        assert!(s.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_sketch_reverse_complement_invariant() {
        let sk = Sketcher::new(5, 16, 64, 0);
        let seq = b"ACGGATTACAGGATCACGAT";
        let rc: Vec<u8> = seq
            .iter()
            .rev()
            .map(|b| match b {
                b'A' => b'T',
                b'C' => b'G',
                b'G' => b'C',
                _ => b'A',
            })
            .collect();
        assert_eq!(sk.sketch_window(seq), sk.sketch_window(&rc));
    }

    #[test]
    fn test_ambiguous_bases_reset_kmer() {
        let sk = Sketcher::new(4, 16, 32, 0);
        // only 3 valid bases on each side of the N, k=4 never fills
        let s = sk.sketch_window(b"ACGNTGA");
        assert!(s.is_empty());
    }

    #[test]
    fn test_window_count() {
        let sk = Sketcher::new(16, 16, 128, 113);
        assert_eq!(sk.window_count(0), 0);
        assert_eq!(sk.window_count(15), 0);
        assert_eq!(sk.window_count(16), 1);
        assert_eq!(sk.window_count(128), 1);
        assert_eq!(sk.window_count(129), 2);
        assert_eq!(sk.window_count(300), 3);
    }

    #[test]
    fn test_window_ids_are_strided() {
        let sk = Sketcher::new(4, 4, 8, 8);
        let seq = b"ACGTACGTTTGACCAGATCAGATT";
        let mut ids = Vec::new();
        sk.for_each_window_sketch(seq, |w, _| ids.push(w));
        assert_eq!(ids, vec![0, 1, 2]);
    }
}
