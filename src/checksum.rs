//! Checksum computation utilities.
//!
//! This module provides the [`Checksum`] trait and the CRC-32 implementation
//! used to verify archive data integrity. CRC-32 uses the IEEE 802.3
//! polynomial (the same checksum as ZIP and gzip).
//!
//! # Example
//!
//! ```rust
//! use streampack::checksum::{Checksum, Crc32};
//!
//! let mut crc = Crc32::new();
//! crc.update(b"123456789");
//! assert_eq!(crc.finalize(), 0xCBF43926);
//!
//! // One-shot computation
//! assert_eq!(Crc32::compute(b"123456789"), 0xCBF43926);
//! ```

/// Common trait for rolling checksum computation.
///
/// Implementations expose incremental updates so wrappers such as
/// [`HashStream`] can hash bytes as they pass through a stream.
///
/// [`HashStream`]: crate::stream::HashStream
pub trait Checksum: Default {
    /// The output type of this checksum.
    type Output: Copy + Eq + Into<u64> + std::fmt::Debug;

    /// Creates a new checksum calculator.
    fn new() -> Self;

    /// Updates the checksum with additional data.
    fn update(&mut self, data: &[u8]);

    /// Returns the checksum of everything fed so far.
    fn finalize(&self) -> Self::Output;

    /// Resets the checksum to its initial state.
    fn reset(&mut self);

    /// Computes the checksum of a single slice in one call.
    fn compute(data: &[u8]) -> Self::Output {
        let mut hasher = Self::new();
        hasher.update(data);
        hasher.finalize()
    }
}

/// CRC-32 checksum calculator (IEEE 802.3 polynomial).
///
/// This is the checksum stored in ZIP local and central directory entries
/// and in the gzip footer.
#[derive(Clone, Default)]
pub struct Crc32 {
    hasher: crc32fast::Hasher,
}

impl std::fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Crc32")
            .field("current", &self.hasher.clone().finalize())
            .finish()
    }
}

impl Checksum for Crc32 {
    type Output = u32;

    fn new() -> Self {
        Self {
            hasher: crc32fast::Hasher::new(),
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    fn finalize(&self) -> u32 {
        self.hasher.clone().finalize()
    }

    fn reset(&mut self) {
        self.hasher.reset();
    }
}

impl Crc32 {
    /// Creates a CRC-32 initialized with a previously computed value.
    pub fn with_initial(initial: u32) -> Self {
        Self {
            hasher: crc32fast::Hasher::new_with_initial(initial),
        }
    }
}
