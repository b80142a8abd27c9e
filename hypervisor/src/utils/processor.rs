//! Keeping execution on one logical processor while its VMX state is changed.

use {
    core::mem::MaybeUninit,
    wdk_sys::{
        ntddk::{
            KeGetCurrentProcessorNumberEx, KeQueryActiveProcessorCountEx,
            KeRevertToUserGroupAffinityThread, KeSetSystemGroupAffinityThread,
        },
        ALL_PROCESSOR_GROUPS, GROUP_AFFINITY, PROCESSOR_NUMBER,
    },
};

/// Returns the number of active logical processors in the entire system.
pub fn processor_count() -> u32 {
    unsafe { KeQueryActiveProcessorCountEx(ALL_PROCESSOR_GROUPS as _) }
}

/// Gets the processor number of the logical processor that the caller is running on.
pub fn current_processor_index() -> u32 {
    unsafe { KeGetCurrentProcessorNumberEx(core::ptr::null_mut()) }
}

/// Pins the calling thread to the processor it is running on until dropped.
pub struct ProcessorExecutor {
    index: u32,
    old_affinity: MaybeUninit<GROUP_AFFINITY>,
}

impl ProcessorExecutor {
    /// Restricts the thread's group affinity to the current processor.
    ///
    /// A thread that migrates between reading the processor number and setting the
    /// affinity is moved back to the processor it was observed on.
    pub fn pin_current() -> Self {
        let mut processor_number: PROCESSOR_NUMBER = unsafe { core::mem::zeroed() };
        let index = unsafe { KeGetCurrentProcessorNumberEx(&mut processor_number) };

        let mut old_affinity: MaybeUninit<GROUP_AFFINITY> = MaybeUninit::uninit();
        let mut affinity: GROUP_AFFINITY = unsafe { core::mem::zeroed() };

        affinity.Group = processor_number.Group;
        affinity.Mask = 1 << processor_number.Number;

        log::info!("Pinning execution to processor {} of {}", index, processor_count());
        unsafe { KeSetSystemGroupAffinityThread(&mut affinity, old_affinity.as_mut_ptr()) };

        Self {
            index,
            old_affinity,
        }
    }

    /// The processor execution is pinned to.
    pub fn index(&self) -> u32 {
        self.index
    }
}

impl Drop for ProcessorExecutor {
    /// Restores the group affinity of the calling thread to its original value.
    fn drop(&mut self) {
        log::info!("Releasing processor {}", self.index);
        unsafe {
            KeRevertToUserGroupAffinityThread(self.old_affinity.as_mut_ptr());
        }
    }
}
