//! Bare-metal AArch64 glue: exception entry, DAIF control, GIC CPU
//! interface registers, generic timer and the board console.

pub mod console;
pub mod cpu;
pub mod gic;
pub mod interrupt;
pub mod timer;

pub const ARCH: &str = "aarch64";
