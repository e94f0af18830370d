//! Ordered execution of a connection's filters.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

use super::{ProtocolFilter, RequestAction};
use crate::future::{Cause, Future};
use crate::protocol::{RequestFrame, ResponseFrame};

type Slot = RefCell<Box<dyn ProtocolFilter>>;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("filter {index} was invoked while it was already running")]
    Reentered { index: usize },
}

/// Result of running a request through the whole chain.
#[derive(Debug, Clone)]
pub enum RequestOutcome {
    /// Send this request to the broker.
    Forward(RequestFrame),
    /// Send this response to the client instead.
    Respond(ResponseFrame),
    /// Nothing to send.
    Drop,
}

/// An immutable, ordered sequence of filter instances for one connection.
pub struct FilterChain {
    filters: Rc<[Slot]>,
}

impl FilterChain {
    pub fn new(filters: Vec<Box<dyn ProtocolFilter>>) -> Self {
        Self {
            filters: filters.into_iter().map(RefCell::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run a client request head to tail.
    pub fn on_client_request(&self, frame: RequestFrame) -> Future<RequestOutcome> {
        request_from(Rc::clone(&self.filters), 0, frame)
    }

    /// Run a broker response tail to head.
    pub fn on_broker_response(&self, frame: ResponseFrame) -> Future<Option<ResponseFrame>> {
        response_before(Rc::clone(&self.filters), self.filters.len(), frame)
    }
}

fn request_from(filters: Rc<[Slot]>, index: usize, frame: RequestFrame) -> Future<RequestOutcome> {
    if index == filters.len() {
        return Future::succeeded(RequestOutcome::Forward(frame));
    }

    let step = match filters[index].try_borrow_mut() {
        Ok(mut filter) => filter.on_client_request(frame),
        Err(_) => return Future::failed(Cause::new(ChainError::Reentered { index })),
    };

    step.flat_map(move |action| {
        Ok(match action {
            RequestAction::Forward(frame) => request_from(filters, index + 1, frame),
            RequestAction::Drop => Future::succeeded(RequestOutcome::Drop),
            RequestAction::Respond(response) => response_before(filters, index, response)
                .map(|response| response.map_or(RequestOutcome::Drop, RequestOutcome::Respond)),
        })
    })
}

/// Runs `frame` through filters `end - 1` down to `0`.
fn response_before(
    filters: Rc<[Slot]>,
    end: usize,
    frame: ResponseFrame,
) -> Future<Option<ResponseFrame>> {
    let Some(index) = end.checked_sub(1) else {
        return Future::succeeded(Some(frame));
    };

    let step = match filters[index].try_borrow_mut() {
        Ok(mut filter) => filter.on_broker_response(frame),
        Err(_) => return Future::failed(Cause::new(ChainError::Reentered { index })),
    };

    step.flat_map(move |response| {
        Ok(match response {
            Some(frame) => response_before(filters, index, frame),
            None => Future::succeeded(None),
        })
    })
}
