//! Enabling VMX operation on the current processor.
//!
//! The sequence sets CR4.VMXE, makes sure IA32_FEATURE_CONTROL permits VMXON outside
//! SMX, and forces CR0 and CR4 into their VMX fixed-bit values. Each sub-step re-reads
//! the registers it touches. Nothing is rolled back if a later stage fails; the
//! returned [`EnablementReport`] records what was changed.
//!
//! Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 24.7 ENABLING AND ENTERING VMX OPERATION

use {
    crate::{
        error::HypervisorError,
        intel::hardware::{ControlRegister, Hardware},
    },
    bitflags::bitflags,
};

/// CR4.VMXE\[bit 13]
pub const CR4_VMXE: u64 = 1 << 13;

bitflags! {
    /// IA32_FEATURE_CONTROL bits relevant to VMXON.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureControl: u64 {
        /// Once set, the MSR cannot be written until the next power-on reset.
        const LOCKED = 1 << 0;
        const VMXON_INSIDE_SMX = 1 << 1;
        const VMXON_OUTSIDE_SMX = 1 << 2;
    }
}

impl FeatureControl {
    /// Reads IA32_FEATURE_CONTROL, keeping bits outside the known flags.
    pub fn read<H: Hardware>(hardware: &H) -> Self {
        Self::from_bits_retain(hardware.read_msr(x86::msr::IA32_FEATURE_CONTROL))
    }

    /// Whether VMXON may execute outside SMX with this value.
    pub fn permits_vmxon(self) -> bool {
        self.contains(Self::LOCKED | Self::VMXON_OUTSIDE_SMX)
    }
}

/// VMX fixed bits of one control register.
///
/// A bit set in `fixed0` must be 1; a bit clear in `fixed1` must be 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBits {
    pub fixed0: u64,
    pub fixed1: u64,
}

impl FixedBits {
    /// Reads the FIXED0/FIXED1 capability MSRs of `register`.
    pub fn read<H: Hardware>(hardware: &H, register: ControlRegister) -> Self {
        let (fixed0, fixed1) = register.fixed_bit_msrs();

        Self {
            fixed0: hardware.read_msr(fixed0),
            fixed1: hardware.read_msr(fixed1),
        }
    }

    /// Sets the mandatory one bits, then clears the mandatory zero bits.
    pub const fn apply(&self, value: u64) -> u64 {
        (value | self.fixed0) & self.fixed1
    }
}

/// What enabling VMX did to the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnablementReport {
    pub cr0_before: u64,
    pub cr4_before: u64,
    pub cr0_after: u64,
    pub cr4_after: u64,
    pub feature_control: FeatureControl,
    /// This run wrote and locked IA32_FEATURE_CONTROL.
    pub locked_feature_control: bool,
}

impl EnablementReport {
    /// Logs the state left behind when bring-up does not complete.
    pub fn log_residual_state(&self) {
        log::error!(
            "Residual state: CR0 {:#x} -> {:#x}, CR4 {:#x} -> {:#x}",
            self.cr0_before,
            self.cr0_after,
            self.cr4_before,
            self.cr4_after
        );

        if self.locked_feature_control {
            log::error!("IA32_FEATURE_CONTROL stays locked until the next reset");
        }
    }
}

/// Runs the four enablement sub-steps in order.
///
/// All sub-steps are attempted. The only failure is a feature-control MSR that
/// firmware locked with VMXON outside SMX disabled, reported after the sequence so
/// that VMXON is never attempted in that state.
pub fn enable<H: Hardware>(hardware: &mut H) -> Result<EnablementReport, HypervisorError> {
    let cr0_before = hardware.read_control_register(ControlRegister::Cr0);
    let cr4_before = hardware.read_control_register(ControlRegister::Cr4);

    log::info!("Enabling Virtual Machine Extensions (VMX)");
    set_vmx_enable_bit(hardware);

    log::info!("Setting Lock Bit set via IA32_FEATURE_CONTROL");
    let locked_feature_control = set_lock_bit(hardware);

    /* Intel® 64 and IA-32 Architectures Software Developer's Manual: 24.8 RESTRICTIONS ON VMX OPERATION */
    log::info!("Adjusting Control Registers");
    let cr0_after = adjust_control_register(hardware, ControlRegister::Cr0);
    let cr4_after = adjust_control_register(hardware, ControlRegister::Cr4);

    let report = EnablementReport {
        cr0_before,
        cr4_before,
        cr0_after,
        cr4_after,
        feature_control: FeatureControl::read(hardware),
        locked_feature_control,
    };

    if !report.feature_control.permits_vmxon() {
        log::error!(
            "IA32_FEATURE_CONTROL is locked with VMXON outside SMX disabled: {:?}",
            report.feature_control
        );
        report.log_residual_state();
        return Err(HypervisorError::VmxLockedByFirmware);
    }

    Ok(report)
}

/// Sets CR4.VMXE. Returns `false` when it was already set and nothing was written.
pub fn set_vmx_enable_bit<H: Hardware>(hardware: &mut H) -> bool {
    let cr4 = hardware.read_control_register(ControlRegister::Cr4);
    if cr4 & CR4_VMXE != 0 {
        return false;
    }

    hardware.write_control_register(ControlRegister::Cr4, cr4 | CR4_VMXE);
    true
}

/// Locks IA32_FEATURE_CONTROL with VMXON outside SMX enabled, unless it is already
/// locked. A locked MSR is never written. Returns whether a write happened.
pub fn set_lock_bit<H: Hardware>(hardware: &mut H) -> bool {
    let feature_control = FeatureControl::read(hardware);
    if feature_control.contains(FeatureControl::LOCKED) {
        return false;
    }

    // The permission bit goes in with the lock bit: locking without it disables VMXON until reset.
    let value = feature_control | FeatureControl::VMXON_OUTSIDE_SMX | FeatureControl::LOCKED;
    hardware.write_msr(x86::msr::IA32_FEATURE_CONTROL, value.bits());
    true
}

/// Forces `register` into its VMX fixed-bit values and returns the written value.
pub fn adjust_control_register<H: Hardware>(hardware: &mut H, register: ControlRegister) -> u64 {
    let fixed = FixedBits::read(hardware, register);
    let value = fixed.apply(hardware.read_control_register(register));

    hardware.write_control_register(register, value);
    log::debug!("{:?} adjusted to {:#x}", register, value);

    value
}
