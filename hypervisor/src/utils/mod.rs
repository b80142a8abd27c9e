pub mod addresses;
pub mod alloc;
#[cfg(windows)]
pub mod processor;
