//! A hypervisor kernel driver.
//!
//! On load it brings the processor it runs on into VMX root operation and reports the
//! outcome to the I/O manager. It does not leave VMX operation on unload.

#![no_std]

// Set up a panic handler for non-test configurations.
#[cfg(not(test))]
extern crate wdk_panic;

// Set up a global allocator for non-test configurations.
#[cfg(not(test))]
#[global_allocator]
static GLOBAL_ALLOCATOR: wdk_alloc::WDKAllocator = wdk_alloc::WDKAllocator;

use {
    hypervisor::{
        bring_up,
        error::HypervisorError,
        intel::{support::Processor, vmxon::VmxRoot},
        outcome_code,
        utils::{
            alloc::PhysicalAllocator,
            processor::{current_processor_index, ProcessorExecutor},
        },
    },
    log::LevelFilter,
    wdk_sys::{DRIVER_OBJECT, NTSTATUS, PUNICODE_STRING, STATUS_SUCCESS},
};

/// Level filter applied to the installed logger.
const LOG_LEVEL: LevelFilter = LevelFilter::Info;

/// I/O base of COM2, used with the `serial-log` feature.
#[cfg(feature = "serial-log")]
const COM_PORT_BASE: u16 = 0x2f8;

/// Severity "error" with the customer bit set; the reason code goes in the low bits.
const CUSTOMER_ERROR_BASE: u32 = 0xE000_0000;

/// VMX root handle of the processor virtualized at load.
///
/// Kept for the lifetime of the driver image so the VMXON region is never released.
static mut VMX_ROOT: Option<VmxRoot> = None;

/// The main entry point for the driver.
///
/// # Returns
///
/// * `STATUS_SUCCESS` if the processor entered VMX root operation.
/// * A customer-defined error status carrying [`HypervisorError::code`] otherwise.
///
/// Reference: WDF expects a symbol with the name DriverEntry.
#[export_name = "DriverEntry"]
pub unsafe extern "system" fn driver_entry(
    driver: &mut DRIVER_OBJECT,
    _registry_path: PUNICODE_STRING,
) -> NTSTATUS {
    init_logger();

    log::info!("Driver Entry called");

    driver.DriverUnload = Some(driver_unload);

    let outcome = {
        let executor = ProcessorExecutor::pin_current();
        log::info!(
            "Running on processor {} (pinned to {})",
            current_processor_index(),
            executor.index()
        );

        // The executor keeps the thread on this processor until it is dropped below.
        let outcome = bring_up(Processor::new(), PhysicalAllocator);
        core::mem::drop(executor);
        outcome
    };

    let status = status_from_code(outcome_code(&outcome));

    match outcome {
        Ok(root) => {
            log::info!(
                "Processor virtualized, VMXON region {:p} at {:#x} (revision {:#x})",
                root.region(),
                root.physical_address(),
                root.revision_id()
            );
            VMX_ROOT = Some(root);
        }
        Err(error) => report_failure(&error, status),
    }

    status
}

/// The unload callback for the driver.
///
/// VMX operation is left as is; leaving it is not supported.
pub extern "C" fn driver_unload(_driver: *mut DRIVER_OBJECT) {
    log::info!("Driver unloaded successfully!");
}

/// Installs the kernel debugger logger, or the COM2 logger with `serial-log`.
fn init_logger() {
    #[cfg(feature = "serial-log")]
    com_logger::builder()
        .base(COM_PORT_BASE)
        .filter(LOG_LEVEL)
        .setup();

    #[cfg(not(feature = "serial-log"))]
    if kernel_log::KernelLogger::init(LOG_LEVEL).is_err() {
        wdk::println!("Failed to install the kernel logger");
    }
}

fn report_failure(error: &HypervisorError, status: NTSTATUS) {
    log::error!(
        "Failed to virtualize processor during {}: {} (code {}, status {:#x})",
        error.stage(),
        error,
        error.code(),
        status
    );
}

/// Maps an outcome code to an `NTSTATUS`. Zero is success.
fn status_from_code(code: i32) -> NTSTATUS {
    if code == 0 {
        STATUS_SUCCESS
    } else {
        (CUSTOMER_ERROR_BASE | code as u32) as NTSTATUS
    }
}
