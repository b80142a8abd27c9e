//! Brings a logical processor into VMX root operation.
//!
//! The bring-up is a strict pipeline:
//!
//! 1. [`intel::capability::probe`] checks for an Intel CPU with VMX.
//! 2. [`intel::vmx::enable`] sets CR4.VMXE, locks IA32_FEATURE_CONTROL and applies the
//!    CR0/CR4 fixed bits.
//! 3. [`intel::vmxon::enter_root_operation`] prepares the VMXON region and executes VMXON.
//!
//! Any failure aborts the pipeline. Register changes made by earlier stages are not
//! rolled back, so a failed bring-up can leave CR4.VMXE set and the feature-control MSR
//! locked.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate static_assertions;

#[cfg(test)]
extern crate alloc;

use {
    error::HypervisorError,
    intel::{capability, hardware::Hardware, vmx, vmxon::VmxRoot},
    utils::alloc::PageAllocator,
};

pub mod error;
pub mod intel;
pub mod utils;

#[cfg(test)]
mod test_utils;
#[cfg(test)]
mod tests;

/// Result of bringing up one processor.
pub type BringUpOutcome = Result<VmxRoot, HypervisorError>;

/// Host-facing code of an outcome: 0 on success, otherwise [`HypervisorError::code`].
pub fn outcome_code(outcome: &BringUpOutcome) -> i32 {
    match outcome {
        Ok(_) => 0,
        Err(error) => error.code(),
    }
}

pub struct Hypervisor<H: Hardware, A: PageAllocator> {
    hardware: H,
    allocator: A,
}

impl<H: Hardware, A: PageAllocator> Hypervisor<H, A> {
    /// Probes the processor behind `hardware`. Nothing is written to it.
    pub fn new(hardware: H, allocator: A) -> Result<Self, HypervisorError> {
        /* Intel® 64 and IA-32 Architectures Software Developer's Manual: 24.6 DISCOVERING SUPPORT FOR VMX */
        capability::probe(&hardware)?;

        Ok(Self {
            hardware,
            allocator,
        })
    }

    /// Enables VMX and enters VMX root operation on the current processor.
    ///
    /// The caller must keep the thread on the processor `hardware` stands for, with
    /// migration disabled, for the whole call. Running on another processor midway
    /// splits the register updates across two cores.
    pub fn virtualize_processor(&mut self) -> BringUpOutcome {
        log::info!("Virtualizing processor");

        /* Intel® 64 and IA-32 Architectures Software Developer's Manual: 24.7 ENABLING AND ENTERING VMX OPERATION */
        let report = vmx::enable(&mut self.hardware)?;

        match intel::vmxon::enter_root_operation(&mut self.hardware, &self.allocator) {
            Ok(root) => {
                log::info!("Processor is in VMX root operation");
                Ok(root)
            }
            Err(error) => {
                report.log_residual_state();
                Err(error)
            }
        }
    }
}

/// Runs the whole pipeline on the current processor.
///
/// Failures are returned, not logged; the caller reports them with
/// [`HypervisorError::stage`] and [`HypervisorError::code`].
///
/// Same precondition as [`Hypervisor::virtualize_processor`].
pub fn bring_up<H: Hardware, A: PageAllocator>(hardware: H, allocator: A) -> BringUpOutcome {
    Hypervisor::new(hardware, allocator)
        .and_then(|mut hypervisor| hypervisor.virtualize_processor())
}
