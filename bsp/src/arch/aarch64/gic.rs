//! GICv3 CPU interface, accessed through the ICC_* system registers.
//!
//! Registers are named by their encodings so older assemblers accept them.

use core::arch::asm;

macro_rules! sysreg_read {
    ($name:ident, $enc:literal) => {
        #[inline(always)]
        pub fn $name() -> u64 {
            let value: u64;
            unsafe { asm!(concat!("mrs {}, ", $enc), out(reg) value, options(nomem, nostack)) };
            value
        }
    };
}

macro_rules! sysreg_write {
    ($name:ident, $enc:literal) => {
        #[inline(always)]
        pub fn $name(value: u64) {
            unsafe { asm!(concat!("msr ", $enc, ", {}"), in(reg) value, options(nomem, nostack)) };
        }
    };
}

// ICC_IAR1_EL1
sysreg_read!(read_iar1, "S3_0_C12_C12_0");
// ICC_EOIR1_EL1
sysreg_write!(write_eoir1, "S3_0_C12_C12_1");
// ICC_PMR_EL1
sysreg_read!(read_pmr, "S3_0_C4_C6_0");
sysreg_write!(write_pmr, "S3_0_C4_C6_0");
// ICC_BPR1_EL1
sysreg_read!(read_bpr1, "S3_0_C12_C12_3");
sysreg_write!(write_bpr1, "S3_0_C12_C12_3");
// ICC_RPR_EL1
sysreg_read!(read_rpr, "S3_0_C12_C11_3");
// ICC_SGI1R_EL1
sysreg_write!(write_sgi1r, "S3_0_C12_C11_5");
// ICC_CTLR_EL1
sysreg_read!(read_ctlr, "S3_0_C12_C12_4");
sysreg_write!(write_ctlr, "S3_0_C12_C12_4");
// ICC_SRE_EL1
sysreg_read!(read_sre, "S3_0_C12_C12_5");
sysreg_write!(write_sre, "S3_0_C12_C12_5");
// ICC_IGRPEN1_EL1
sysreg_write!(write_igrpen1, "S3_0_C12_C12_7");

pub const SRE_ENABLE: u64 = 1 << 0;
/// ICC_CTLR_EL1.EOImode: 0 means EOIR both drops priority and deactivates.
pub const CTLR_EOIMODE: u64 = 1 << 1;
