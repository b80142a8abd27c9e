pub mod capability;
pub mod hardware;
#[cfg(target_arch = "x86_64")]
pub mod support;
pub mod vmx;
pub mod vmxon;
