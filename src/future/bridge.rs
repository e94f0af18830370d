//! Bridges between [`Future`] and `async` code.

use std::cell::{Cell, RefCell};
use std::future::IntoFuture;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::{Cause, Future, Promise};

/// Awaitable view of a [`Future`], produced by `.await`.
///
/// Awaiting registers a listener; the event loop keeps running other tasks
/// until the future settles.
pub struct Settled<T> {
    rx: oneshot::Receiver<Result<T, Cause>>,
}

impl<T> std::future::Future for Settled<T> {
    type Output = Result<T, Cause>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| {
            received.unwrap_or_else(|_| Err(Cause::msg("promise dropped without being settled")))
        })
    }
}

impl<T: Clone + 'static> IntoFuture for Future<T> {
    type Output = Result<T, Cause>;
    type IntoFuture = Settled<T>;

    fn into_future(self) -> Settled<T> {
        let (tx, rx) = oneshot::channel();
        self.on_complete(move |result| {
            let _ = tx.send(result);
        });
        Settled { rx }
    }
}

/// Run an async computation on the current event loop and expose its outcome.
///
/// Must be called from inside a `LocalSet`, which every worker loop provides.
pub fn from_async<T, F>(computation: F) -> Future<T>
where
    T: Clone + 'static,
    F: std::future::Future<Output = Result<T, Cause>> + 'static,
{
    let promise = Promise::new();
    let future = promise.future();
    tokio::task::spawn_local(async move {
        promise.complete(computation.await);
    });
    future
}

/// Run blocking work off the event loop.
///
/// The returned future settles back on the calling loop thread.
pub fn spawn_blocking<T, E, F>(work: F) -> Future<T>
where
    T: Clone + Send + 'static,
    E: std::error::Error + Send + 'static,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);
    from_async(async move {
        match handle.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(Cause::new(error)),
            Err(join) => Err(Cause::new(join)),
        }
    })
}

/// Succeeds with every value, in input order, once all inputs succeed.
///
/// Fails with the first failure observed.
pub fn join_all<T: Clone + 'static>(futures: Vec<Future<T>>) -> Future<Vec<T>> {
    if futures.is_empty() {
        return Future::succeeded(Vec::new());
    }

    let promise = Promise::new();
    let joined = promise.future();
    let slots: Rc<RefCell<Vec<Option<T>>>> = Rc::new(RefCell::new(vec![None; futures.len()]));
    let remaining = Rc::new(Cell::new(futures.len()));

    for (index, future) in futures.into_iter().enumerate() {
        let promise = promise.clone();
        let slots = Rc::clone(&slots);
        let remaining = Rc::clone(&remaining);
        future.on_complete(move |result| match result {
            Ok(value) => {
                slots.borrow_mut()[index] = Some(value);
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    let values: Vec<T> = std::mem::take(&mut *slots.borrow_mut())
                        .into_iter()
                        .flatten()
                        .collect();
                    promise.succeed(values);
                }
            }
            Err(cause) => {
                promise.fail(cause);
            }
        });
    }

    joined
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::task::LocalSet;

    #[tokio::test]
    async fn await_observes_late_settlement() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let promise: Promise<u32> = Promise::new();
                let future = promise.future();
                tokio::task::spawn_local(async move {
                    tokio::task::yield_now().await;
                    promise.succeed(42);
                });
                assert_eq!(future.await.unwrap(), 42);
            })
            .await;
    }

    #[tokio::test]
    async fn dropped_promise_surfaces_as_failure() {
        let promise: Promise<u32> = Promise::new();
        let future = promise.future();
        let settled = future.into_future();
        drop(promise);
        let cause = settled.await.unwrap_err();
        assert!(cause.to_string().contains("dropped"));
    }

    #[tokio::test]
    async fn from_async_settles_on_the_loop() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let future = from_async(async {
                    tokio::task::yield_now().await;
                    Ok::<_, Cause>("computed".to_string())
                });
                assert!(future.is_pending());
                assert_eq!(future.await.unwrap(), "computed");
            })
            .await;
    }

    #[tokio::test]
    async fn spawn_blocking_reports_errors() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let ok = spawn_blocking(|| Ok::<_, std::io::Error>(3));
                assert_eq!(ok.await.unwrap(), 3);

                let err = spawn_blocking(|| {
                    Err::<u8, _>(std::io::Error::new(std::io::ErrorKind::Other, "disk"))
                });
                assert_eq!(err.await.unwrap_err().to_string(), "disk");
            })
            .await;
    }

    #[test]
    fn join_all_keeps_input_order() {
        let first: Promise<u8> = Promise::new();
        let second: Promise<u8> = Promise::new();
        let joined = join_all(vec![first.future(), second.future()]);

        second.succeed(2);
        assert!(joined.is_pending());
        first.succeed(1);
        assert_eq!(joined.result().unwrap().unwrap(), vec![1, 2]);
    }

    #[test]
    fn join_all_fails_fast() {
        let first: Promise<u8> = Promise::new();
        let joined = join_all(vec![first.future(), Future::failed(Cause::msg("second"))]);
        assert_eq!(joined.result().unwrap().unwrap_err().to_string(), "second");
        first.succeed(1);
        assert!(joined.is_failed());
    }

    #[test]
    fn join_all_of_nothing_succeeds() {
        let joined: Future<Vec<u8>> = join_all(Vec::new());
        assert!(joined.result().unwrap().unwrap().is_empty());
    }
}
