//! Fixed byte layout of the shared region.
//!
//! ```text
//! ┌───────────────┬───────────────┬──────────────────────────────┬───────────────────────────┐
//! │ magic (4B LE) │ access (4B)   │ control: per ring 16 bytes   │ data: per ring out, in    │
//! │ @0            │ @4            │ out_head out_tail in_head    │ each `size` bytes, in     │
//! │               │               │ in_tail (u32 LE each) @8     │ ring order, from DATA_START│
//! └───────────────┴───────────────┴──────────────────────────────┴───────────────────────────┘
//! ```
//!
//! The layout is written from the application side's point of view. The
//! modem's outbound range is the application's inbound range and vice versa;
//! [`Side`] selects which interpretation a ring view uses.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ShmError};
use crate::region::SharedRegion;

/// Value stored at offset 0 once the application side has initialized the region.
pub const REGION_MAGIC: u32 = 0x4D4C_4E4B;

/// Offset of the magic word.
pub const MAGIC_OFFSET: usize = 0;
/// Offset of the access word (reserved for the hardware, zeroed on init).
pub const ACCESS_OFFSET: usize = 4;
/// Offset of the first ring's control block.
pub const CONTROL_OFFSET: usize = 8;
/// Size of one ring's control block.
pub const CONTROL_STRIDE: usize = 16;
/// Data ranges are aligned to this boundary.
pub const DATA_ALIGN: usize = 64;
/// Start of the data ranges for layouts of up to three rings.
pub const DATA_START: usize = 64;
/// Smallest ring capacity accepted.
pub const MIN_RING_SIZE: usize = 16;

pub(crate) const OUT_HEAD: usize = 0;
pub(crate) const OUT_TAIL: usize = 4;
pub(crate) const IN_HEAD: usize = 8;
pub(crate) const IN_TAIL: usize = 12;

/// Which processor's view of the region a ring buffer presents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// The application processor. The region layout is written from this side.
    #[default]
    Application,
    /// The modem. Outbound and inbound ranges are swapped relative to the layout.
    Modem,
}

impl Side {
    /// The processor on the other end of the link.
    pub fn peer(self) -> Side {
        match self {
            Side::Application => Side::Modem,
            Side::Modem => Side::Application,
        }
    }

    /// Short lowercase name used in logs and dumps.
    pub fn name(self) -> &'static str {
        match self {
            Side::Application => "application",
            Side::Modem => "modem",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Placement of one ring inside the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    /// Ring position in the layout (also its channel index).
    pub index: usize,
    /// Capacity of each direction in bytes. Always a power of two.
    pub size: usize,
    /// Application-outbound data range.
    pub out_offset: usize,
    /// Application-inbound data range.
    pub in_offset: usize,
    /// Control block holding the four indices.
    pub control_offset: usize,
}

/// Complete, validated description of the shared region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionLayout {
    rings: Vec<RingLayout>,
    total_len: usize,
}

impl RegionLayout {
    /// Start building a layout.
    pub fn builder() -> LayoutBuilder {
        LayoutBuilder::default()
    }

    /// All rings in index order.
    pub fn rings(&self) -> &[RingLayout] {
        &self.rings
    }

    /// One ring by index.
    pub fn ring(&self, index: usize) -> Option<&RingLayout> {
        self.rings.get(index)
    }

    /// Number of bytes the region must provide.
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// Largest ring capacity in the layout.
    pub fn max_ring_size(&self) -> usize {
        self.rings.iter().map(|r| r.size).max().unwrap_or(0)
    }

    /// Check that `region` is large enough to hold this layout.
    pub fn validate(&self, region: &dyn SharedRegion) -> Result<()> {
        if region.len() < self.total_len {
            return Err(ShmError::RegionTooSmall {
                len: region.len(),
                required: self.total_len,
            });
        }
        Ok(())
    }

    /// Write the header and zero every ring index.
    ///
    /// Data ranges are left untouched; with all indices at zero they hold no
    /// pending bytes.
    pub fn initialize(&self, region: &dyn SharedRegion) -> Result<()> {
        self.validate(region)?;
        region.write_u32(ACCESS_OFFSET, 0);
        for ring in &self.rings {
            region.zero(ring.control_offset, CONTROL_STRIDE);
        }
        region.write_u32(MAGIC_OFFSET, REGION_MAGIC);
        tracing::debug!(rings = self.rings.len(), len = self.total_len, "region initialized");
        Ok(())
    }

    /// Verify the region was initialized by the application side.
    pub fn check_magic(&self, region: &dyn SharedRegion) -> Result<()> {
        self.validate(region)?;
        let found = region.read_u32(MAGIC_OFFSET);
        if found != REGION_MAGIC {
            return Err(ShmError::BadMagic {
                found,
                expected: REGION_MAGIC,
            });
        }
        Ok(())
    }
}

/// Builds a [`RegionLayout`] from per-ring capacities.
#[derive(Debug, Clone, Default)]
pub struct LayoutBuilder {
    sizes: Vec<usize>,
}

impl LayoutBuilder {
    /// Append a ring with the given per-direction capacity.
    pub fn ring(mut self, size: usize) -> Self {
        self.sizes.push(size);
        self
    }

    /// Compute offsets and validate capacities.
    pub fn build(self) -> Result<RegionLayout> {
        if self.sizes.is_empty() {
            return Err(ShmError::EmptyLayout);
        }
        for (index, size) in self.sizes.iter().copied().enumerate() {
            if size < MIN_RING_SIZE || !size.is_power_of_two() {
                return Err(ShmError::NotPowerOfTwo {
                    index,
                    size,
                    min: MIN_RING_SIZE,
                });
            }
        }

        let control_end = CONTROL_OFFSET + CONTROL_STRIDE * self.sizes.len();
        let mut cursor = align_up(control_end, DATA_ALIGN);
        let mut rings = Vec::with_capacity(self.sizes.len());
        for (index, size) in self.sizes.into_iter().enumerate() {
            let out_offset = cursor;
            let in_offset = out_offset + size;
            cursor = in_offset + size;
            rings.push(RingLayout {
                index,
                size,
                out_offset,
                in_offset,
                control_offset: CONTROL_OFFSET + CONTROL_STRIDE * index,
            });
        }

        Ok(RegionLayout {
            rings,
            total_len: cursor,
        })
    }
}

fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::HeapRegion;

    fn three_rings() -> RegionLayout {
        RegionLayout::builder()
            .ring(8 * 1024)
            .ring(64 * 1024)
            .ring(16 * 1024)
            .build()
            .unwrap()
    }

    #[test]
    fn offsets_are_packed_after_control_block() {
        let layout = three_rings();
        let rings = layout.rings();

        assert_eq!(rings[0].out_offset, DATA_START);
        assert_eq!(rings[0].in_offset, DATA_START + 8 * 1024);
        assert_eq!(rings[1].out_offset, DATA_START + 16 * 1024);
        assert_eq!(rings[2].control_offset, CONTROL_OFFSET + 2 * CONTROL_STRIDE);
        assert_eq!(
            layout.total_len(),
            DATA_START + 2 * (8 + 64 + 16) * 1024
        );
        assert_eq!(layout.max_ring_size(), 64 * 1024);
    }

    #[test]
    fn data_ranges_never_overlap() {
        let layout = three_rings();
        let mut ranges: Vec<(usize, usize)> = layout
            .rings()
            .iter()
            .flat_map(|r| [(r.out_offset, r.size), (r.in_offset, r.size)])
            .collect();
        ranges.sort();
        for pair in ranges.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0);
        }
    }

    #[test]
    fn rejects_non_power_of_two() {
        let err = RegionLayout::builder().ring(1000).build().unwrap_err();
        assert!(matches!(err, ShmError::NotPowerOfTwo { index: 0, size: 1000, .. }));
    }

    #[test]
    fn rejects_tiny_ring() {
        let err = RegionLayout::builder().ring(64).ring(8).build().unwrap_err();
        assert!(matches!(err, ShmError::NotPowerOfTwo { index: 1, .. }));
    }

    #[test]
    fn rejects_empty_layout() {
        assert!(matches!(
            RegionLayout::builder().build(),
            Err(ShmError::EmptyLayout)
        ));
    }

    #[test]
    fn validate_rejects_small_region() {
        let layout = three_rings();
        let region = HeapRegion::new(layout.total_len() - 1);
        assert!(matches!(
            layout.validate(&region),
            Err(ShmError::RegionTooSmall { .. })
        ));
    }

    #[test]
    fn initialize_writes_magic_and_zeroes_indices() {
        let layout = three_rings();
        let region = HeapRegion::new(layout.total_len());
        region.write_u32(layout.rings()[1].control_offset + IN_HEAD, 77);

        assert!(matches!(
            layout.check_magic(&region),
            Err(ShmError::BadMagic { found: 0, .. })
        ));

        layout.initialize(&region).unwrap();
        layout.check_magic(&region).unwrap();
        assert_eq!(region.read_u32(layout.rings()[1].control_offset + IN_HEAD), 0);
    }

    #[test]
    fn side_peer_is_symmetric() {
        assert_eq!(Side::Application.peer(), Side::Modem);
        assert_eq!(Side::Modem.peer().peer(), Side::Modem);
        assert_eq!(Side::Modem.to_string(), "modem");
    }
}
