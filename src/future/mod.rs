//! Single-threaded asynchronous results.
//!
//! # Data Flow
//! ```text
//! Promise::new()  ──▶ promise.future() handed to the caller
//!     │                     │
//!     │ succeed / fail      │ add_listener / map / compose
//!     ▼                     ▼
//! PENDING ──▶ SUCCEEDED(value) | FAILED(cause)   (terminal, at most once)
//!                     │
//!                     └──▶ listeners run in registration order
//! ```
//!
//! # Design Decisions
//! - Confined to one event loop: state lives in `Rc<RefCell<_>>`, so the type is `!Send`
//! - Listeners registered after settlement run immediately on the caller's stack
//! - Composition is listener registration that settles a derived promise
//! - `bridge.rs` connects these futures to `async` code in both directions

mod bridge;
mod promise;

use std::error::Error;
use std::fmt;
use std::rc::Rc;

pub use bridge::{from_async, join_all, spawn_blocking, Settled};
pub use promise::{Future, Listener, Promise};

/// Failure carried by a failed [`Future`].
///
/// Cheap to clone so every listener of a failed future can observe it.
#[derive(Clone)]
pub struct Cause(Rc<dyn Error + 'static>);

impl Cause {
    /// Wrap an error value.
    pub fn new<E>(error: E) -> Self
    where
        E: Error + 'static,
    {
        Self(Rc::new(error))
    }

    /// Build a cause from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::new(Message(message.into()))
    }

    /// Attempt to view the wrapped error as a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: Error + 'static,
    {
        self.0.downcast_ref::<E>()
    }
}

impl fmt::Debug for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl Error for Cause {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.0.source()
    }
}

#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for Message {}
