//! Process-wide interrupt handling.
//!
//! The handler only flips an atomic flag (and emits a carriage return so
//! the `^C` echo does not wreck the log line in progress); the main loop
//! polls the flag at its tick boundaries and shuts down cleanly. Handlers
//! are installed with `SA_RESTART`: interrupted syscalls (the compositor
//! dispatch read in particular) resume instead of surfacing EINTR errors,
//! keeping an interrupt on the clean-exit path. Sleeps already run to
//! completion either way, and the flag checks bound responsiveness to one
//! tick.

use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::LumoError;

static QUIT: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_interrupt(_: libc::c_int) {
    QUIT.store(true, Ordering::SeqCst);
    // Only async-signal-safe calls are allowed here.
    let carriage_return = b"\r";
    unsafe {
        let _ = libc::write(libc::STDOUT_FILENO, carriage_return.as_ptr().cast(), 1);
    }
}

/// Install the interrupt handler.
pub fn install() -> Result<(), LumoError> {
    let action = SigAction::new(
        SigHandler::Handler(handle_interrupt),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe {
        let _ = sigaction(Signal::SIGINT, &action).map_err(std::io::Error::from)?;
    }
    Ok(())
}

/// Whether an interrupt has been received.
#[must_use]
pub fn quit_requested() -> bool {
    QUIT.load(Ordering::SeqCst)
}
