//! Promise and Future halves of a single-threaded result container.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use super::Cause;

/// Callbacks invoked exactly once when a [`Future`] settles.
pub trait Listener<T> {
    /// Called with the value of a succeeded future.
    fn on_success(self: Box<Self>, value: T);

    /// Called with the cause of a failed future.
    fn on_failure(self: Box<Self>, cause: Cause);
}

/// Adapts a closure over the settled result into a [`Listener`].
struct Completion<F>(F);

impl<T, F> Listener<T> for Completion<F>
where
    F: FnOnce(Result<T, Cause>),
{
    fn on_success(self: Box<Self>, value: T) {
        (self.0)(Ok(value))
    }

    fn on_failure(self: Box<Self>, cause: Cause) {
        (self.0)(Err(cause))
    }
}

enum State<T> {
    Pending,
    Succeeded(T),
    Failed(Cause),
}

struct Inner<T> {
    state: State<T>,
    listeners: VecDeque<Box<dyn Listener<T>>>,
    /// Set while listeners are being dispatched; later registrations join the queue.
    notifying: bool,
}

impl<T: Clone> Inner<T> {
    fn outcome(&self) -> Option<Result<T, Cause>> {
        match &self.state {
            State::Pending => None,
            State::Succeeded(value) => Some(Ok(value.clone())),
            State::Failed(cause) => Some(Err(cause.clone())),
        }
    }
}

/// Drains the listener queue of a settled container.
///
/// No borrow is held while a listener runs, so listeners may register further
/// listeners or settle other promises.
fn notify<T: Clone + 'static>(inner: &Rc<RefCell<Inner<T>>>) {
    {
        let mut guard = inner.borrow_mut();
        if guard.notifying {
            return;
        }
        guard.notifying = true;
    }

    loop {
        let next = {
            let mut guard = inner.borrow_mut();
            let outcome = guard.outcome();
            outcome.and_then(|outcome| guard.listeners.pop_front().map(|l| (l, outcome)))
        };

        match next {
            Some((listener, Ok(value))) => listener.on_success(value),
            Some((listener, Err(cause))) => listener.on_failure(cause),
            None => {
                inner.borrow_mut().notifying = false;
                return;
            }
        }
    }
}

/// The writable half of a [`Future`].
pub struct Promise<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T: Clone + 'static> Promise<T> {
    /// Create a pending promise.
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                listeners: VecDeque::new(),
                notifying: false,
            })),
        }
    }

    /// The future observing this promise.
    pub fn future(&self) -> Future<T> {
        Future {
            inner: Rc::clone(&self.inner),
        }
    }

    /// Settle with a value. Returns `false` if already settled.
    pub fn succeed(&self, value: T) -> bool {
        self.settle(State::Succeeded(value))
    }

    /// Settle with a failure. Returns `false` if already settled.
    pub fn fail(&self, cause: Cause) -> bool {
        self.settle(State::Failed(cause))
    }

    /// Settle from a result.
    pub fn complete(&self, result: Result<T, Cause>) -> bool {
        match result {
            Ok(value) => self.succeed(value),
            Err(cause) => self.fail(cause),
        }
    }

    fn settle(&self, state: State<T>) -> bool {
        {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                return false;
            }
            inner.state = state;
        }
        notify(&self.inner);
        true
    }
}

impl<T: Clone + 'static> Default for Promise<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

/// The read-only half of a single-threaded asynchronous result.
pub struct Future<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.try_borrow() {
            Ok(inner) => match inner.state {
                State::Pending => "pending",
                State::Succeeded(_) => "succeeded",
                State::Failed(_) => "failed",
            },
            Err(_) => "busy",
        };
        f.debug_struct("Future").field("state", &state).finish()
    }
}

impl<T: Clone + 'static> Future<T> {
    /// An already succeeded future.
    pub fn succeeded(value: T) -> Self {
        let promise = Promise::new();
        promise.succeed(value);
        promise.future()
    }

    /// An already failed future.
    pub fn failed(cause: Cause) -> Self {
        let promise = Promise::new();
        promise.fail(cause);
        promise.future()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.inner.borrow().state, State::Pending)
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self.inner.borrow().state, State::Succeeded(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.inner.borrow().state, State::Failed(_))
    }

    /// The settled outcome, or `None` while pending.
    pub fn result(&self) -> Option<Result<T, Cause>> {
        self.inner.borrow().outcome()
    }

    /// Register a listener. Runs immediately if already settled.
    pub fn add_listener(&self, listener: Box<dyn Listener<T>>) {
        let settled = {
            let mut inner = self.inner.borrow_mut();
            inner.listeners.push_back(listener);
            !matches!(inner.state, State::Pending)
        };
        if settled {
            notify(&self.inner);
        }
    }

    /// Register a closure over the settled result.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(Result<T, Cause>) + 'static,
    {
        self.add_listener(Box::new(Completion(f)));
    }

    /// Transform the value; failures propagate unchanged.
    pub fn map<U, F>(&self, f: F) -> Future<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> U + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Transform the value with a fallible mapper.
    pub fn try_map<U, F>(&self, f: F) -> Future<U>
    where
        U: Clone + 'static,
        F: FnOnce(T) -> Result<U, Cause> + 'static,
    {
        let promise = Promise::new();
        let derived = promise.future();
        self.on_complete(move |result| {
            promise.complete(result.and_then(f));
        });
        derived
    }

    /// Continue with a new future chosen by outcome.
    ///
    /// The derived future settles with whatever the chosen future settles with.
    /// A mapper returning `Err` fails the derived future with that cause.
    pub fn compose<U, S, E>(&self, on_success: S, on_failure: E) -> Future<U>
    where
        U: Clone + 'static,
        S: FnOnce(T) -> Result<Future<U>, Cause> + 'static,
        E: FnOnce(Cause) -> Result<Future<U>, Cause> + 'static,
    {
        let promise = Promise::new();
        let derived = promise.future();
        self.on_complete(move |result| {
            let next = match result {
                Ok(value) => on_success(value),
                Err(cause) => on_failure(cause),
            };
            match next {
                Ok(next) => next.forward_to(promise),
                Err(cause) => {
                    promise.fail(cause);
                }
            }
        });
        derived
    }

    /// Continue with a new future on success.
    pub fn flat_map<U, S>(&self, on_success: S) -> Future<U>
    where
        U: Clone + 'static,
        S: FnOnce(T) -> Result<Future<U>, Cause> + 'static,
    {
        self.compose(on_success, Err)
    }

    /// Replace a failure with a new future.
    pub fn recover<E>(&self, on_failure: E) -> Future<T>
    where
        E: FnOnce(Cause) -> Result<Future<T>, Cause> + 'static,
    {
        self.compose(|value| Ok(Future::succeeded(value)), on_failure)
    }

    fn forward_to(&self, promise: Promise<T>) {
        self.on_complete(move |result| {
            promise.complete(result);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn recorder() -> (Rc<RefCell<Vec<String>>>, impl Fn(&str) -> Box<dyn Listener<i32>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let make = move |tag: &str| -> Box<dyn Listener<i32>> {
            let sink = Rc::clone(&sink);
            let tag = tag.to_string();
            Box::new(Completion(move |result: Result<i32, Cause>| {
                let entry = match result {
                    Ok(v) => format!("{tag}:ok:{v}"),
                    Err(c) => format!("{tag}:err:{c}"),
                };
                sink.borrow_mut().push(entry);
            }))
        };
        (log, make)
    }

    #[test]
    fn settles_at_most_once() {
        let promise = Promise::new();
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        promise.future().on_complete(move |_| seen.set(seen.get() + 1));

        assert!(promise.succeed(1));
        assert!(!promise.succeed(2));
        assert!(!promise.fail(Cause::msg("late")));

        assert_eq!(calls.get(), 1);
        assert_eq!(promise.future().result().unwrap().unwrap(), 1);
    }

    #[test]
    fn listeners_fire_in_registration_order() {
        let (log, make) = recorder();
        let promise = Promise::new();
        let future = promise.future();
        future.add_listener(make("a"));
        future.add_listener(make("b"));
        future.add_listener(make("c"));

        promise.succeed(7);
        assert_eq!(*log.borrow(), vec!["a:ok:7", "b:ok:7", "c:ok:7"]);
    }

    #[test]
    fn late_listener_runs_immediately() {
        let (log, make) = recorder();
        let future = Future::succeeded(3);
        future.add_listener(make("late"));
        assert_eq!(*log.borrow(), vec!["late:ok:3"]);
    }

    #[test]
    fn listener_added_during_dispatch_keeps_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let promise = Promise::new();
        let future = promise.future();

        let inner_future = future.clone();
        let inner_log = Rc::clone(&log);
        future.on_complete(move |_: Result<i32, Cause>| {
            inner_log.borrow_mut().push("first");
            let nested_log = Rc::clone(&inner_log);
            inner_future.on_complete(move |_| nested_log.borrow_mut().push("nested"));
        });
        let second_log = Rc::clone(&log);
        future.on_complete(move |_| second_log.borrow_mut().push("second"));

        promise.succeed(1);
        assert_eq!(*log.borrow(), vec!["first", "second", "nested"]);
    }

    #[test]
    fn map_propagates_failure_unchanged() {
        let promise: Promise<i32> = Promise::new();
        let mapped = promise.future().map(|v| v * 2);
        promise.fail(Cause::msg("boom"));
        let cause = mapped.result().unwrap().unwrap_err();
        assert_eq!(cause.to_string(), "boom");
    }

    #[test]
    fn try_map_error_fails_derived() {
        let mapped: Future<i32> = Future::succeeded(1).try_map(|_| Err(Cause::msg("mapper")));
        assert!(mapped.is_failed());
    }

    #[test]
    fn compose_forwards_eventual_outcome() {
        let inner: Promise<String> = Promise::new();
        let inner_future = inner.future();
        let composed = Future::succeeded(5).compose(
            move |_| Ok(inner_future),
            |cause| Err(cause),
        );
        assert!(composed.is_pending());

        inner.succeed("done".to_string());
        assert_eq!(composed.result().unwrap().unwrap(), "done");
    }

    #[test]
    fn compose_failure_path_uses_failure_mapper() {
        let composed: Future<i32> = Future::<i32>::failed(Cause::msg("original")).compose(
            |_| Ok(Future::succeeded(0)),
            |cause| Ok(Future::succeeded(cause.to_string().len() as i32)),
        );
        assert_eq!(composed.result().unwrap().unwrap(), 8);
    }

    #[test]
    fn compose_mapper_error_never_leaves_pending() {
        let composed: Future<i32> = Future::<i32>::failed(Cause::msg("original"))
            .compose(|_| Ok(Future::succeeded(0)), |_| Err(Cause::msg("mapper failed")));
        assert!(!composed.is_pending());
        assert_eq!(composed.result().unwrap().unwrap_err().to_string(), "mapper failed");
    }

    #[test]
    fn recover_replaces_failure() {
        let recovered = Future::<i32>::failed(Cause::msg("x")).recover(|_| Ok(Future::succeeded(9)));
        assert_eq!(recovered.result().unwrap().unwrap(), 9);
    }

    #[test]
    fn cause_downcasts_to_source_error() {
        let cause = Cause::new(std::io::Error::new(std::io::ErrorKind::Other, "io"));
        assert!(cause.downcast_ref::<std::io::Error>().is_some());
    }
}
