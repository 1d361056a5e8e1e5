#![cfg_attr(not(test), no_std)]

extern crate alloc;
#[macro_use]
extern crate log;

#[macro_use]
pub mod logging;
#[cfg_attr(
    all(target_arch = "aarch64", target_os = "none"),
    path = "arch/aarch64/mod.rs"
)]
#[cfg_attr(
    not(all(target_arch = "aarch64", target_os = "none")),
    path = "arch/host/mod.rs"
)]
pub mod arch;
#[cfg_attr(feature = "board_e2000q", path = "board/e2000q/mod.rs")]
pub mod board;
pub mod drivers;
pub mod gdma;
pub mod interrupt;
pub mod sync;
#[cfg(target_os = "none")]
mod lang;

pub use arch::cpu;
