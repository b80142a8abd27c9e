//! Physically contiguous page allocation for VMX structures.

use {crate::intel::vmxon::Vmxon, core::ptr::NonNull};

/// Source of zeroed, page-aligned, physically contiguous memory.
pub trait PageAllocator {
    /// Allocates one zeroed VMXON-sized page. `None` when memory is exhausted.
    fn allocate_zeroed_page(&self) -> Option<NonNull<Vmxon>>;

    /// Converts a virtual address to its physical address. Zero if unresolvable.
    fn physical_address(&self, virtual_address: u64) -> u64;
}

impl<A: PageAllocator + ?Sized> PageAllocator for &A {
    fn allocate_zeroed_page(&self) -> Option<NonNull<Vmxon>> {
        (**self).allocate_zeroed_page()
    }

    fn physical_address(&self, virtual_address: u64) -> u64 {
        (**self).physical_address(virtual_address)
    }
}

#[cfg(windows)]
pub use self::wdk::PhysicalAllocator;

#[cfg(windows)]
mod wdk {
    // Credits to @memN0ps and @not-matthias: https://github.com/not-matthias/kernel-alloc-rs/blob/master/src/lib.rs (WDK)
    use {
        super::PageAllocator,
        crate::intel::vmxon::Vmxon,
        core::ptr::NonNull,
        wdk_sys::{
            ntddk::{MmAllocateContiguousMemorySpecifyCacheNode, MmGetPhysicalAddress},
            MM_ANY_NODE_OK, PHYSICAL_ADDRESS,
            _MEMORY_CACHING_TYPE::MmCached,
        },
    };

    /// Allocates cached, physically contiguous memory with
    /// `MmAllocateContiguousMemorySpecifyCacheNode`.
    ///
    /// Allocations are page aligned and never freed by this crate.
    pub struct PhysicalAllocator;

    impl PageAllocator for PhysicalAllocator {
        fn allocate_zeroed_page(&self) -> Option<NonNull<Vmxon>> {
            let mut boundary: PHYSICAL_ADDRESS = unsafe { core::mem::zeroed() };
            let mut lowest: PHYSICAL_ADDRESS = unsafe { core::mem::zeroed() };
            let mut highest: PHYSICAL_ADDRESS = unsafe { core::mem::zeroed() };

            boundary.QuadPart = 0;
            lowest.QuadPart = 0;
            highest.QuadPart = -1;

            let memory = unsafe {
                MmAllocateContiguousMemorySpecifyCacheNode(
                    core::mem::size_of::<Vmxon>() as _,
                    lowest,
                    highest,
                    boundary,
                    MmCached,
                    MM_ANY_NODE_OK,
                )
            } as *mut Vmxon;

            let memory = NonNull::new(memory)?;

            // Contiguous memory is not zeroed by the memory manager.
            unsafe { core::ptr::write_bytes(memory.as_ptr(), 0, 1) };

            Some(memory)
        }

        fn physical_address(&self, virtual_address: u64) -> u64 {
            unsafe { MmGetPhysicalAddress(virtual_address as _).QuadPart as u64 }
        }
    }
}
