//! The privileged operations the bring-up pipeline needs from the processor.
//!
//! Every stage of the pipeline is written against [`Hardware`] so that the same code
//! drives the real processor (see [`crate::intel::support::Processor`]) and the
//! simulated one used by the tests.

use x86::{cpuid::CpuIdResult, vmx::VmFail};

/// Control registers touched while entering VMX operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRegister {
    Cr0,
    Cr4,
}

impl ControlRegister {
    /// The `(FIXED0, FIXED1)` capability MSRs constraining this register in VMX operation.
    ///
    /// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: A.7 VMX-FIXED BITS IN CR0, A.8 VMX-FIXED BITS IN CR4
    pub const fn fixed_bit_msrs(self) -> (u32, u32) {
        match self {
            ControlRegister::Cr0 => (x86::msr::IA32_VMX_CR0_FIXED0, x86::msr::IA32_VMX_CR0_FIXED1),
            ControlRegister::Cr4 => (x86::msr::IA32_VMX_CR4_FIXED0, x86::msr::IA32_VMX_CR4_FIXED1),
        }
    }
}

/// Core-local hardware access.
///
/// Implementations act on the logical processor the caller is running on. Nothing here
/// may be cached: every read returns the live value.
pub trait Hardware {
    /// Executes CPUID with the given leaf (sub-leaf 0).
    fn query_identification(&self, leaf: u32) -> CpuIdResult;

    /// Reads CR0 or CR4.
    fn read_control_register(&self, register: ControlRegister) -> u64;

    /// Writes CR0 or CR4.
    fn write_control_register(&mut self, register: ControlRegister, value: u64);

    /// Reads a model-specific register.
    fn read_msr(&self, msr: u32) -> u64;

    /// Writes a model-specific register.
    fn write_msr(&mut self, msr: u32, value: u64);

    /// Executes VMXON with the physical address of a VMXON region.
    ///
    /// `Err(VmFailInvalid)` means CF was set, `Err(VmFailValid)` means ZF was set.
    ///
    /// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 31.2 CONVENTIONS
    fn enter_root_operation(&mut self, physical_address: u64) -> Result<(), VmFail>;
}

impl<H: Hardware + ?Sized> Hardware for &mut H {
    fn query_identification(&self, leaf: u32) -> CpuIdResult {
        (**self).query_identification(leaf)
    }

    fn read_control_register(&self, register: ControlRegister) -> u64 {
        (**self).read_control_register(register)
    }

    fn write_control_register(&mut self, register: ControlRegister, value: u64) {
        (**self).write_control_register(register, value)
    }

    fn read_msr(&self, msr: u32) -> u64 {
        (**self).read_msr(msr)
    }

    fn write_msr(&mut self, msr: u32, value: u64) {
        (**self).write_msr(msr, value)
    }

    fn enter_root_operation(&mut self, physical_address: u64) -> Result<(), VmFail> {
        (**self).enter_root_operation(physical_address)
    }
}
