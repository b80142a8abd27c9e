//! Discovering support for VMX.
//!
//! Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 24.6 DISCOVERING SUPPORT FOR VMX

use crate::{error::HypervisorError, intel::hardware::Hardware};

/// CPUID leaf 0 vendor string of Intel processors.
pub const INTEL_VENDOR: &[u8; 12] = b"GenuineIntel";

/// CPUID.1:ECX.VMX\[bit 5]
const CPUID_FEATURE_ECX_VMX: u32 = 1 << 5;

/// Checks that the processor is an Intel CPU with VMX. Read-only and safe to repeat.
pub fn probe<H: Hardware>(hardware: &H) -> Result<(), HypervisorError> {
    has_intel_cpu(hardware)?;
    log::info!("CPU is Intel");

    has_vmx_support(hardware)?;
    log::info!("Virtual Machine Extension (VMX) technology is supported");

    Ok(())
}

/// Check to see if CPU is Intel (“GenuineIntel”).
pub fn has_intel_cpu<H: Hardware>(hardware: &H) -> Result<(), HypervisorError> {
    if &vendor(hardware) == INTEL_VENDOR {
        Ok(())
    } else {
        Err(HypervisorError::CpuUnsupported)
    }
}

/// Check processor supports for Virtual Machine Extension (VMX) technology - CPUID.1:ECX.VMX\[bit 5] = 1
pub fn has_vmx_support<H: Hardware>(hardware: &H) -> Result<(), HypervisorError> {
    if hardware.query_identification(1).ecx & CPUID_FEATURE_ECX_VMX != 0 {
        Ok(())
    } else {
        Err(HypervisorError::VmxUnsupported)
    }
}

/// The 12-byte vendor string, laid out as EBX, EDX, ECX of leaf 0.
fn vendor<H: Hardware>(hardware: &H) -> [u8; 12] {
    let leaf0 = hardware.query_identification(0);

    let mut vendor = [0u8; 12];
    vendor[0..4].copy_from_slice(&leaf0.ebx.to_le_bytes());
    vendor[4..8].copy_from_slice(&leaf0.edx.to_le_bytes());
    vendor[8..12].copy_from_slice(&leaf0.ecx.to_le_bytes());
    vendor
}
