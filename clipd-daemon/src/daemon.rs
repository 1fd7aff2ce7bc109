//! Single-threaded daemon event loop
//!
//! Each iteration drains pending transport events, then reconciles
//! every selection we do not own. When everything is owned there is
//! nothing to poll and the loop blocks on the next event; otherwise it
//! wakes on a fixed cadence. SIGINT/SIGTERM flip a flag that is
//! checked once per iteration, and an orderly shutdown releases all
//! ownership before disconnecting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};

use clipd_utils::Result;

use crate::engine::Engine;
use crate::transport::Transport;

/// Reconcile cadence while any selection is foreign-owned
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Conversion wait used by the daemon's background fetches
pub const DAEMON_FETCH_TIMEOUT: Duration = Duration::from_millis(10);

/// Conversion wait for one-shot CLI fetches
pub const CLI_FETCH_TIMEOUT: Duration = Duration::from_secs(1);

static RUNNING: AtomicBool = AtomicBool::new(true);

extern "C" fn on_signal(_sig: libc::c_int) {
    RUNNING.store(false, Ordering::SeqCst);
}

fn install_signal_handlers() {
    // SAFETY: on_signal only touches an atomic, which is async-signal-safe
    unsafe {
        libc::signal(libc::SIGINT, on_signal as libc::sighandler_t);
        libc::signal(libc::SIGTERM, on_signal as libc::sighandler_t);
    }
}

fn running() -> bool {
    RUNNING.load(Ordering::SeqCst)
}

/// Run the daemon loop until interrupted
pub fn run<T: Transport>(mut engine: Engine<T>) -> Result<()> {
    install_signal_handlers();
    info!("daemon starting");

    engine.adopt_unowned()?;

    while running() {
        let timeout = if engine.all_owned() {
            // Nothing to poll; sleep until a peer wants something
            None
        } else {
            Some(POLL_INTERVAL)
        };

        if let Some(event) = engine.wait(timeout)? {
            engine.dispatch(event)?;
            // Drain whatever queued up behind it
            while let Some(event) = engine.wait(Some(Duration::ZERO))? {
                engine.dispatch(event)?;
            }
        }

        if !running() {
            break;
        }

        for index in 0..engine.len() {
            let owned = engine
                .registry()
                .get(index)
                .is_some_and(|s| s.owned_by_us());
            if !owned {
                engine.poll_selection(index)?;
            }
        }
    }

    debug!("releasing selections");
    engine.shutdown()?;
    info!("daemon stopped");
    Ok(())
}
