//! Bridging suspendable work into callers that cannot `.await`.
//!
//! The adapter and [`Workflow::run_blocking`](crate::workflow::Workflow::run_blocking)
//! ask [`SchedulingContext::current`] once where they are running, then hand
//! the future to [`SchedulingContext::drive`].

use std::future::Future;

use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;

use scholarflow_shared::{Result, ScholarflowError};

/// Where the calling code is running.
#[derive(Debug, Clone)]
pub enum SchedulingContext {
    /// Inside a multi-thread runtime. Work is driven on the existing runtime
    /// after moving the current worker out of the scheduler.
    Suspended(Handle),
    /// Inside a current-thread runtime, which cannot be re-entered. Work is
    /// driven on a dedicated thread with its own runtime.
    CurrentThread(Handle),
    /// No runtime at all.
    Detached,
}

impl SchedulingContext {
    /// Inspect the calling thread.
    pub fn current() -> Self {
        match Handle::try_current() {
            Ok(handle) => match handle.runtime_flavor() {
                RuntimeFlavor::MultiThread => Self::Suspended(handle),
                _ => Self::CurrentThread(handle),
            },
            Err(_) => Self::Detached,
        }
    }

    /// Whether the caller is already inside a runtime.
    pub fn is_inside_runtime(&self) -> bool {
        !matches!(self, Self::Detached)
    }

    /// Run `fut` to completion and return its output, blocking the caller.
    ///
    /// In the current-thread case the outer runtime is parked for the duration,
    /// so `fut` must not wait on tasks spawned onto that runtime.
    pub fn drive<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future + Send,
        F::Output: Send,
    {
        match self {
            Self::Suspended(handle) => {
                debug!("driving future on the existing runtime");
                Ok(tokio::task::block_in_place(|| handle.block_on(fut)))
            }
            Self::CurrentThread(_) => {
                debug!("driving future on a dedicated thread");
                std::thread::scope(|scope| {
                    scope
                        .spawn(move || block_on_fresh(fut))
                        .join()
                        .map_err(|_| ScholarflowError::internal("scheduling thread panicked"))?
                })
            }
            Self::Detached => block_on_fresh(fut),
        }
    }
}

fn block_on_fresh<F: Future>(fut: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| ScholarflowError::internal(format!("failed to build runtime: {e}")))?;
    Ok(runtime.block_on(fut))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn delayed(value: u32) -> u32 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        value
    }

    #[test]
    fn detached_builds_its_own_runtime() {
        let ctx = SchedulingContext::current();
        assert!(matches!(ctx, SchedulingContext::Detached));
        assert!(!ctx.is_inside_runtime());
        assert_eq!(ctx.drive(delayed(3)).unwrap(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn multi_thread_reuses_existing_runtime() {
        let ctx = SchedulingContext::current();
        assert!(matches!(ctx, SchedulingContext::Suspended(_)));
        assert_eq!(ctx.drive(delayed(7)).unwrap(), 7);
    }

    #[tokio::test]
    async fn current_thread_uses_dedicated_thread() {
        let ctx = SchedulingContext::current();
        assert!(matches!(ctx, SchedulingContext::CurrentThread(_)));
        assert_eq!(ctx.drive(delayed(11)).unwrap(), 11);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn nested_drive_from_spawned_task() {
        let value = tokio::spawn(async {
            SchedulingContext::current()
                .drive(async { SchedulingContext::current().drive(delayed(5)) })
        })
        .await
        .unwrap()
        .unwrap()
        .unwrap();
        assert_eq!(value, 5);
    }
}
