//! OS signal relay.
//!
//! Two-step design: the handler registered for SIGINT/SIGTERM performs a
//! single async-signal-safe atomic store into a process-wide flag, and
//! the orchestrator's wait loop periodically relays that flag into the
//! flow's stop token. Handlers are installed exactly once and never torn
//! down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once, OnceLock};

use weir_core::token::StopToken;

fn signal_flag() -> &'static Arc<AtomicBool> {
    static FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();
    FLAG.get_or_init(|| Arc::new(AtomicBool::new(false)))
}

/// Install interrupt and termination handlers. Idempotent.
pub fn install() {
    static INSTALL: Once = Once::new();
    INSTALL.call_once(|| {
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            if let Err(err) = signal_hook::flag::register(signal, Arc::clone(signal_flag())) {
                tracing::warn!(signal, %err, "failed to install signal handler");
            }
        }
    });
}

/// Copy the signal flag into the stop token. Returns true when a signal
/// had been delivered.
pub fn relay(token: &StopToken) -> bool {
    if signal_flag().load(Ordering::Acquire) {
        token.request_stop();
        true
    } else {
        false
    }
}
