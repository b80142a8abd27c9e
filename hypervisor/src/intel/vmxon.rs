//! A module responsible for managing the VMXON region and entering VMX root operation.
//!
//! The region is allocated, tagged with the VMCS revision identifier and handed to
//! VMXON by physical address. It is never released here: once VMXON succeeds software
//! must not touch it, and on failure it is left allocated.

use {
    crate::{
        error::HypervisorError,
        intel::hardware::Hardware,
        utils::{addresses::PhysicalAddress, alloc::PageAllocator},
    },
    bitfield::{bitfield, BitMut},
    core::ptr::NonNull,
};

pub const PAGE_SIZE: usize = 0x1000;

/// A representation of the VMXON region in memory.
///
/// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 25.11.5 VMXON Region
#[repr(C, align(4096))]
pub struct Vmxon {
    pub revision_id: u32,
    pub data: [u8; PAGE_SIZE - 4],
}

const_assert_eq!(core::mem::size_of::<Vmxon>(), PAGE_SIZE);
const_assert_eq!(core::mem::align_of::<Vmxon>(), PAGE_SIZE);

impl Vmxon {
    /// Writes the revision identifier of `basic` with bit 31 cleared.
    pub fn initialize(&mut self, basic: &VmxBasic) {
        self.revision_id = basic.revision_id();
        self.revision_id.set_bit(31, false);
    }
}

bitfield! {
    /// IA32_VMX_BASIC.
    ///
    /// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: A.1 BASIC VMX INFORMATION
    #[derive(Clone, Copy)]
    pub struct VmxBasic(u64);
    impl Debug;

    pub u32, revision_id, _: 30, 0;
    pub u16, region_size, _: 44, 32;
    // Set when VMXON, VMCS and related structures are limited to 32-bit physical addresses.
    pub physical_address_width_32, _: 48;
}

impl VmxBasic {
    pub fn read<H: Hardware>(hardware: &H) -> Self {
        Self(hardware.read_msr(x86::msr::IA32_VMX_BASIC))
    }
}

/// Handle to a processor in VMX root operation.
///
/// Owns the VMXON region for the rest of the processor's VMX lifetime. Dropping the
/// handle does not free the region.
#[derive(Debug)]
pub struct VmxRoot {
    region: NonNull<Vmxon>,
    physical_address: PhysicalAddress,
    revision_id: u32,
}

impl VmxRoot {
    /// Virtual address of the VMXON region. Not to be dereferenced while in VMX operation.
    pub fn region(&self) -> *const Vmxon {
        self.region.as_ptr()
    }

    pub fn physical_address(&self) -> u64 {
        self.physical_address.pa()
    }

    pub fn revision_id(&self) -> u32 {
        self.revision_id
    }
}

/// Sets up the VMXON region and executes VMXON.
///
/// Must run after [`crate::intel::vmx::enable`] on the same processor. An allocation
/// failure returns before any further hardware access.
///
/// # Panics
///
/// If IA32_VMX_BASIC reports a region larger than a page, or if the region's physical
/// address is unresolvable, not page aligned, or outside the supported width.
pub fn enter_root_operation<H: Hardware, A: PageAllocator>(
    hardware: &mut H,
    allocator: &A,
) -> Result<VmxRoot, HypervisorError> {
    log::info!("Setting up VMXON region");

    let Some(mut region) = allocator.allocate_zeroed_page() else {
        log::error!("Failed to allocate the VMXON region");
        return Err(HypervisorError::AllocationFailed);
    };

    let basic = VmxBasic::read(hardware);
    assert!(
        basic.region_size() as usize <= PAGE_SIZE,
        "VMXON region size {:#x} exceeds one page",
        basic.region_size()
    );

    let physical_address =
        PhysicalAddress::from_pa(allocator.physical_address(region.as_ptr() as u64));
    let width = physical_address_width(hardware, &basic);

    assert!(
        physical_address.pa() != 0
            && physical_address.is_page_aligned()
            && physical_address.fits_width(width),
        "VMXON region at {:p} has unusable physical address {:#x} ({} bit limit)",
        region,
        physical_address.pa(),
        width
    );

    log::info!("VMXON Region Virtual Address: {:p}", region);
    log::info!("VMXON Region Physical Addresss: {:#x}", physical_address.pa());

    // The region is exclusively ours until VMXON hands it to the processor.
    let vmxon_region = unsafe { region.as_mut() };
    vmxon_region.initialize(&basic);
    let revision_id = vmxon_region.revision_id;

    // Enable VMX operation.
    if let Err(error) = hardware.enter_root_operation(physical_address.pa()) {
        log::error!("VMXON failed: {:?}", error);
        return Err(HypervisorError::RootEntryFailed(error));
    }
    log::info!("VMXON successful!");

    Ok(VmxRoot {
        region,
        physical_address,
        revision_id,
    })
}

/// MAXPHYADDR, capped to 32 bits when IA32_VMX_BASIC\[48] is set.
pub fn physical_address_width<H: Hardware>(hardware: &H, basic: &VmxBasic) -> u8 {
    const CPUID_EXTENDED_MAX_LEAF: u32 = 0x8000_0000;
    const CPUID_ADDRESS_SIZES: u32 = 0x8000_0008;
    // Reported when the address-size leaf is absent.
    const DEFAULT_WIDTH: u8 = 36;

    if basic.physical_address_width_32() {
        return 32;
    }

    if hardware.query_identification(CPUID_EXTENDED_MAX_LEAF).eax < CPUID_ADDRESS_SIZES {
        return DEFAULT_WIDTH;
    }

    hardware.query_identification(CPUID_ADDRESS_SIZES).eax as u8
}
