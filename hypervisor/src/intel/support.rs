//! [`Hardware`] backed by the processor the caller runs on.

use {
    crate::intel::hardware::{ControlRegister, Hardware},
    core::marker::PhantomData,
    x86::{
        cpuid::{cpuid, CpuIdResult},
        vmx::VmFail,
    },
    x86_64::registers::control::{Cr0, Cr4},
};

/// The current logical processor.
///
/// Not `Send`: the value stands for one core's registers and must not follow a
/// thread that migrates.
pub struct Processor {
    _core_local: PhantomData<*mut ()>,
}

impl Processor {
    /// # Safety
    ///
    /// The caller runs at CPL0 and keeps the current thread on the same logical
    /// processor, with migration disabled, for as long as the value lives.
    pub unsafe fn new() -> Self {
        Self {
            _core_local: PhantomData,
        }
    }
}

/// Untyped `mov` to and from one control register.
///
/// Values move as whole 64-bit images so bits without a named flag (CET, PKS, ...)
/// survive a read-modify-write.
trait RawControlRegister {
    fn load() -> u64;

    /// # Safety
    ///
    /// Same as a `mov crN` at CPL0.
    unsafe fn store(value: u64);
}

impl RawControlRegister for Cr0 {
    fn load() -> u64 {
        Cr0::read_raw()
    }

    unsafe fn store(value: u64) {
        Cr0::write_raw(value)
    }
}

impl RawControlRegister for Cr4 {
    fn load() -> u64 {
        Cr4::read_raw()
    }

    unsafe fn store(value: u64) {
        Cr4::write_raw(value)
    }
}

impl Hardware for Processor {
    #[allow(unused_unsafe)]
    fn query_identification(&self, leaf: u32) -> CpuIdResult {
        unsafe { cpuid!(leaf, 0) }
    }

    fn read_control_register(&self, register: ControlRegister) -> u64 {
        match register {
            ControlRegister::Cr0 => Cr0::load(),
            ControlRegister::Cr4 => Cr4::load(),
        }
    }

    fn write_control_register(&mut self, register: ControlRegister, value: u64) {
        match register {
            ControlRegister::Cr0 => unsafe { Cr0::store(value) },
            ControlRegister::Cr4 => unsafe { Cr4::store(value) },
        }
    }

    fn read_msr(&self, msr: u32) -> u64 {
        unsafe { x86::msr::rdmsr(msr) }
    }

    fn write_msr(&mut self, msr: u32, value: u64) {
        unsafe { x86::msr::wrmsr(msr, value) };
    }

    fn enter_root_operation(&mut self, physical_address: u64) -> Result<(), VmFail> {
        unsafe { x86::bits64::vmx::vmxon(physical_address) }
    }
}
