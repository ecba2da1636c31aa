//! Shared diagnostic channel.
//!
//! Failures in the pool and façade layers surface to callers as sentinel
//! values (`None`, `Err`, zero byte counts). The context for those
//! sentinels is reported here: logged through the `log` facade and kept as
//! the calling thread's last error.

use std::cell::RefCell;

use log::{error, warn};

use crate::error::{Error, ErrorKind};

/// Severity of a reported diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Failure,
}

/// A reported diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: ErrorKind,
    pub message: String,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<Diagnostic>> = const { RefCell::new(None) };
}

/// Report `err` and record it as this thread's last error
pub fn report(severity: Severity, err: &Error) {
    let message = err.to_string();
    match severity {
        Severity::Warning => warn!("{}", message),
        Severity::Failure => error!("{}", message),
    }
    let diag = Diagnostic {
        severity,
        kind: err.kind(),
        message,
    };
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(diag));
}

/// Report `err` as a failure and hand it back, for `map_err` chains
pub(crate) fn fail(err: Error) -> Error {
    report(Severity::Failure, &err);
    err
}

/// Last diagnostic reported on this thread
pub fn last_error() -> Option<Diagnostic> {
    LAST_ERROR.with(|slot| slot.borrow().clone())
}

/// Forget this thread's last diagnostic
pub fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}
