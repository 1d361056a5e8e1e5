#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    kprintln!("\nBSP panic: {}", info);
    crate::cpu::wait_forever();
}
