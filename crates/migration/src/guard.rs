//! Panic boundary around per-table work.

use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

use futures::FutureExt;
use tracing::error;

use kdvh_common::{MigrationError, MigrationResult, Severity};

use crate::notify::Notifier;
use crate::options::PanicPolicy;

static LAST_BACKTRACE: Mutex<Option<String>> = Mutex::new(None);

/// Chain a hook that records the backtrace of the latest panic, so the
/// boundary can include it in the operator report.
pub fn install_panic_hook() {
    let previous = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if let Ok(mut slot) = LAST_BACKTRACE.lock() {
            *slot = Some(Backtrace::force_capture().to_string());
        }
        previous(info);
    }));
}

fn take_backtrace() -> String {
    LAST_BACKTRACE
        .lock()
        .ok()
        .and_then(|mut slot| slot.take())
        .unwrap_or_else(|| "<no backtrace captured>".to_string())
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Run `work`, catching any panic.
///
/// A caught panic is logged and reported through `notifier`. Under
/// [`PanicPolicy::Abort`] it is then re-raised; under
/// [`PanicPolicy::Continue`] it comes back as [`MigrationError::Panic`].
pub async fn run_guarded<F, T>(
    context: &str,
    notifier: &Notifier,
    policy: PanicPolicy,
    work: F,
) -> MigrationResult<T>
where
    F: Future<Output = T>,
{
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(value) => Ok(value),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            let backtrace = take_backtrace();
            error!(context = %context, panic = %message, "Panic caught at table boundary");

            notifier.notify_panic(context, &message, &backtrace).await;

            match policy {
                PanicPolicy::Abort => panic::resume_unwind(payload),
                PanicPolicy::Continue => Err(MigrationError::Panic {
                    context: context.to_string(),
                    message,
                }),
            }
        }
    }
}

/// Decide whether the run goes on after one table.
///
/// Fatal errors are handed back to end the run. Anything narrower is
/// logged and yields `None`, so the caller moves on to the next table.
pub fn settle<T>(context: &str, outcome: MigrationResult<T>) -> MigrationResult<Option<T>> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.severity() == Severity::Fatal => Err(e),
        Err(e) => {
            error!(
                context = %context,
                kind = e.kind(),
                severity = ?e.severity(),
                error = %e,
                "Table failed, continuing with the next table"
            );
            Ok(None)
        }
    }
}
