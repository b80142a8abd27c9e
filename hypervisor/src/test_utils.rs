//! Simulated processor and allocator for the bring-up tests.

use {
    crate::{
        intel::{
            hardware::{ControlRegister, Hardware},
            vmx::{FeatureControl, CR4_VMXE},
            vmxon::Vmxon,
        },
        utils::alloc::PageAllocator,
    },
    alloc::{
        alloc::{alloc_zeroed, dealloc, Layout},
        collections::BTreeMap,
        vec::Vec,
    },
    core::{cell::RefCell, ptr::NonNull},
    x86::{
        cpuid::CpuIdResult,
        msr::{
            IA32_FEATURE_CONTROL, IA32_VMX_BASIC, IA32_VMX_CR0_FIXED0, IA32_VMX_CR0_FIXED1,
            IA32_VMX_CR4_FIXED0, IA32_VMX_CR4_FIXED1,
        },
        vmx::VmFail,
    },
};

/// A single Intel core with VMX, in the state firmware usually leaves it.
///
/// Faults the real processor would raise (writing a locked IA32_FEATURE_CONTROL,
/// VMXON without CR4.VMXE or permission) panic.
pub struct MockHardware {
    pub vendor: [u8; 12],
    pub vmx_supported: bool,
    pub max_extended_leaf: u32,
    pub physical_address_bits: u8,
    pub cr0: u64,
    pub cr4: u64,
    msrs: BTreeMap<u32, u64>,
    pub vmxon_result: Result<(), VmFail>,
    pub in_vmx_operation: bool,
    pub control_register_writes: Vec<(ControlRegister, u64)>,
    pub msr_writes: Vec<(u32, u64)>,
    pub vmxon_calls: Vec<u64>,
}

impl MockHardware {
    pub fn intel() -> Self {
        let msrs = BTreeMap::from([
            (IA32_FEATURE_CONTROL, 0x5),
            (IA32_VMX_BASIC, 0x00DA_0400_0000_0004),
            (IA32_VMX_CR0_FIXED0, 0x8000_0021),
            (IA32_VMX_CR0_FIXED1, 0xFFFF_FFFF),
            (IA32_VMX_CR4_FIXED0, 0x2000),
            (IA32_VMX_CR4_FIXED1, 0x0037_27FF),
        ]);

        Self {
            vendor: *b"GenuineIntel",
            vmx_supported: true,
            max_extended_leaf: 0x8000_0008,
            physical_address_bits: 39,
            cr0: 0x8005_0033,
            cr4: 0x0000_06F0,
            msrs,
            vmxon_result: Ok(()),
            in_vmx_operation: false,
            control_register_writes: Vec::new(),
            msr_writes: Vec::new(),
            vmxon_calls: Vec::new(),
        }
    }

    pub fn set_msr(&mut self, msr: u32, value: u64) {
        self.msrs.insert(msr, value);
    }

    fn register(&self, value: &[u8]) -> u32 {
        u32::from_le_bytes([value[0], value[1], value[2], value[3]])
    }
}

impl Hardware for MockHardware {
    fn query_identification(&self, leaf: u32) -> CpuIdResult {
        let mut result = CpuIdResult {
            eax: 0,
            ebx: 0,
            ecx: 0,
            edx: 0,
        };

        match leaf {
            0 => {
                result.eax = 0x16;
                result.ebx = self.register(&self.vendor[0..4]);
                result.edx = self.register(&self.vendor[4..8]);
                result.ecx = self.register(&self.vendor[8..12]);
            }
            1 => {
                result.ecx = 0x7FFA_F3BF & !(1 << 5);
                if self.vmx_supported {
                    result.ecx |= 1 << 5;
                }
            }
            0x8000_0000 => result.eax = self.max_extended_leaf,
            0x8000_0008 => result.eax = u32::from(self.physical_address_bits) | 48 << 8,
            _ => {}
        }

        result
    }

    fn read_control_register(&self, register: ControlRegister) -> u64 {
        match register {
            ControlRegister::Cr0 => self.cr0,
            ControlRegister::Cr4 => self.cr4,
        }
    }

    fn write_control_register(&mut self, register: ControlRegister, value: u64) {
        self.control_register_writes.push((register, value));

        match register {
            ControlRegister::Cr0 => self.cr0 = value,
            ControlRegister::Cr4 => self.cr4 = value,
        }
    }

    fn read_msr(&self, msr: u32) -> u64 {
        match self.msrs.get(&msr) {
            Some(value) => *value,
            None => panic!("#GP: rdmsr of unimplemented MSR {msr:#x}"),
        }
    }

    fn write_msr(&mut self, msr: u32, value: u64) {
        if msr == IA32_FEATURE_CONTROL
            && FeatureControl::from_bits_retain(self.read_msr(msr)).contains(FeatureControl::LOCKED)
        {
            panic!("#GP: write to locked IA32_FEATURE_CONTROL");
        }

        self.msr_writes.push((msr, value));
        self.msrs.insert(msr, value);
    }

    fn enter_root_operation(&mut self, physical_address: u64) -> Result<(), VmFail> {
        if self.cr4 & CR4_VMXE == 0 {
            panic!("#UD: VMXON with CR4.VMXE clear");
        }
        let feature_control = FeatureControl::from_bits_retain(self.read_msr(IA32_FEATURE_CONTROL));
        if !feature_control.permits_vmxon() {
            panic!("#GP: VMXON not permitted by IA32_FEATURE_CONTROL");
        }

        self.vmxon_calls.push(physical_address);
        match self.vmxon_result {
            Err(VmFail::VmFailValid) => return Err(VmFail::VmFailValid),
            Err(VmFail::VmFailInvalid) => return Err(VmFail::VmFailInvalid),
            Ok(()) => {}
        }
        self.in_vmx_operation = true;

        Ok(())
    }
}

/// Hands out heap pages with made-up physical addresses.
///
/// Page `n` maps to `physical_base + n * 0x1000`.
pub struct MockAllocator {
    fail: bool,
    physical_base: u64,
    regions: RefCell<Vec<NonNull<Vmxon>>>,
}

impl MockAllocator {
    pub const PHYSICAL_BASE: u64 = 0x1_2345_6000;

    pub fn new() -> Self {
        Self::with_physical_base(Self::PHYSICAL_BASE)
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            physical_base: Self::PHYSICAL_BASE,
            regions: RefCell::new(Vec::new()),
        }
    }

    pub fn with_physical_base(physical_base: u64) -> Self {
        Self {
            fail: false,
            physical_base,
            regions: RefCell::new(Vec::new()),
        }
    }

    /// Pages handed out and still allocated.
    pub fn allocations(&self) -> usize {
        self.regions.borrow().len()
    }

    pub fn region(&self, index: usize) -> &Vmxon {
        let region = self.regions.borrow()[index];
        unsafe { &*region.as_ptr() }
    }
}

impl PageAllocator for MockAllocator {
    fn allocate_zeroed_page(&self) -> Option<NonNull<Vmxon>> {
        if self.fail {
            return None;
        }

        let region = NonNull::new(unsafe { alloc_zeroed(Layout::new::<Vmxon>()) } as *mut Vmxon)?;
        self.regions.borrow_mut().push(region);

        Some(region)
    }

    fn physical_address(&self, virtual_address: u64) -> u64 {
        self.regions
            .borrow()
            .iter()
            .position(|region| region.as_ptr() as u64 == virtual_address)
            .map_or(0, |index| self.physical_base + (index * 0x1000) as u64)
    }
}

impl Drop for MockAllocator {
    fn drop(&mut self) {
        for region in self.regions.borrow().iter() {
            unsafe { dealloc(region.as_ptr() as *mut u8, Layout::new::<Vmxon>()) };
        }
    }
}
