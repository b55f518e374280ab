pub mod instrument;
pub mod redzone;
pub mod self_check;

pub use instrument::{ActiveInstrument, Instrument, NoInstrument};
pub use redzone::{RED_ZONE_ENABLED, RED_ZONE_SIZE};
pub use self_check::ValidationReport;

/// Abort with a diagnostic message to stderr.
/// This is used when unrecoverable corruption is detected.
#[cold]
#[inline(never)]
pub fn abort_with_message(msg: &str) -> ! {
    unsafe {
        // Write directly to stderr fd (2) -- no allocation needed
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::abort();
    }
}
