//! Abstraction over physical addresses.

use x86::bits64::paging::{PAddr, BASE_PAGE_SIZE};

/// A representation of physical addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalAddress(PAddr);

impl PhysicalAddress {
    /// Constructs a `PhysicalAddress` from a given physical address.
    pub fn from_pa(pa: u64) -> Self {
        Self(PAddr::from(pa))
    }

    /// Retrieves the physical address.
    pub fn pa(&self) -> u64 {
        self.0.as_u64()
    }

    pub fn is_page_aligned(&self) -> bool {
        self.pa() & (BASE_PAGE_SIZE as u64 - 1) == 0
    }

    /// Whether the address is expressible in `width` bits.
    pub fn fits_width(&self, width: u8) -> bool {
        width >= 64 || self.pa() >> width == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment() {
        assert!(PhysicalAddress::from_pa(0x1000).is_page_aligned());
        assert!(PhysicalAddress::from_pa(0x7_FFFF_F000).is_page_aligned());
        assert!(!PhysicalAddress::from_pa(0x1008).is_page_aligned());
    }

    #[test]
    fn width_limits() {
        let address = PhysicalAddress::from_pa(0xFFFF_F000);
        assert!(address.fits_width(32));
        assert!(!PhysicalAddress::from_pa(0x1_0000_0000).fits_width(32));
        assert!(PhysicalAddress::from_pa(0x1_0000_0000).fits_width(39));
        assert!(PhysicalAddress::from_pa(u64::MAX).fits_width(64));
    }

    #[test]
    fn keeps_the_full_address() {
        assert_eq!(PhysicalAddress::from_pa(0x1234_5000).pa(), 0x1234_5000);
    }
}
