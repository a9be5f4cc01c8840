use std::path::PathBuf;

/// Errors raised while describing, mapping or validating the shared region.
#[derive(Debug, thiserror::Error)]
pub enum ShmError {
    /// A ring capacity is not a power of two (or is too small to be useful).
    #[error("ring {index} capacity {size} must be a power of two >= {min}")]
    NotPowerOfTwo { index: usize, size: usize, min: usize },

    /// The region is smaller than the layout requires.
    #[error("shared region too small ({len} bytes, layout needs {required})")]
    RegionTooSmall { len: usize, required: usize },

    /// The region header does not carry the expected magic value.
    #[error("bad region magic 0x{found:08x} (expected 0x{expected:08x})")]
    BadMagic { found: u32, expected: u32 },

    /// A layout with no rings was requested.
    #[error("region layout has no rings")]
    EmptyLayout,

    /// Failed to open or map a region backing file.
    #[error("failed to map {}: {source}", path.display())]
    Map {
        path: PathBuf,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ShmError>;
