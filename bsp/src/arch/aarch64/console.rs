use core::fmt;

use crate::board::UART_BASE;

/// PL011 transmit path. Polls the FIFO-full flag before each byte.
pub struct Pl011Console {
    base: usize,
}

const UARTDR: usize = 0x00;
const UARTFR: usize = 0x18;
const UARTFR_TXFF: u32 = 1 << 5;

impl Pl011Console {
    fn put(&self, byte: u8) {
        unsafe {
            while core::ptr::read_volatile((self.base + UARTFR) as *const u32) & UARTFR_TXFF != 0 {
                core::hint::spin_loop();
            }
            core::ptr::write_volatile((self.base + UARTDR) as *mut u32, byte as u32);
        }
    }
}

impl fmt::Write for Pl011Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            if b == b'\n' {
                self.put(b'\r');
            }
            self.put(b);
        }
        Ok(())
    }
}

pub fn console() -> Pl011Console {
    Pl011Console { base: UART_BASE }
}
