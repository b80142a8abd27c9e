use {core::fmt, thiserror_no_std::Error, x86::vmx::VmFail};

/// Terminal failure of a processor bring-up.
///
/// None of these are retried. Control register and MSR changes applied before the
/// failure stay in place.
#[derive(Error, Debug)]
pub enum HypervisorError {
    #[error("Intel CPU not found")]
    CpuUnsupported,
    #[error("VMX is not supported")]
    VmxUnsupported,
    #[error("VMX locked off in BIOS")]
    VmxLockedByFirmware,
    #[error("Failed to allocate the VMXON region")]
    AllocationFailed,
    #[error("Failed to execute VMXON: {0:?}")]
    RootEntryFailed(VmFail),
}

impl HypervisorError {
    /// Non-zero reason code handed back to the host. Zero is reserved for success.
    pub const fn code(&self) -> i32 {
        match self {
            Self::CpuUnsupported => 1,
            Self::VmxUnsupported => 2,
            Self::AllocationFailed => 3,
            Self::RootEntryFailed(_) => 4,
            Self::VmxLockedByFirmware => 5,
        }
    }

    /// The pipeline stage that raised the error.
    pub const fn stage(&self) -> Stage {
        match self {
            Self::CpuUnsupported | Self::VmxUnsupported => Stage::CapabilityProbe,
            Self::VmxLockedByFirmware => Stage::Enablement,
            Self::AllocationFailed | Self::RootEntryFailed(_) => Stage::RootEntry,
        }
    }
}

/// Bring-up stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CapabilityProbe,
    Enablement,
    RootEntry,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::CapabilityProbe => f.write_str("capability probe"),
            Stage::Enablement => f.write_str("VMX enablement"),
            Stage::RootEntry => f.write_str("VMX root entry"),
        }
    }
}
