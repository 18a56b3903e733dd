//! Cryptographically strong random bytes.
//!
//! A thin facade over the operating system's CSPRNG. There is no
//! seed to manage and no state to reset across `fork`; every call
//! reads fresh entropy through [`rand::rngs::OsRng`].

use rand::rngs::OsRng;
use rand::RngCore;

/// Fill `buf` with cryptographically strong random bytes.
pub fn fill(buf: &mut [u8]) {
    OsRng.fill_bytes(buf);
}

/// Return `N` fresh random bytes.
pub fn bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    fill(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fill_changes_buffer() {
        let a: [u8; 32] = bytes();
        let b: [u8; 32] = bytes();
        // Two 256-bit draws colliding means the RNG is broken.
        assert_ne!(a, b);
    }

    #[test]
    fn test_fill_covers_whole_slice() {
        let mut buf = [0u8; 64];
        fill(&mut buf);
        assert!(buf.iter().any(|&b| b != 0));
    }
}
