//! Single-assignment asynchronous result with continuation scheduling.
//!
//! An [`AsyncResult`] starts `Pending` and leaves that state exactly once,
//! either `Succeeded` or `Failed`. Continuations registered with
//! [`AsyncResult::on_complete`] each run exactly once after that transition.
//!
//! Continuations never run synchronously inside `on_complete`: if the result
//! is already terminal they are scheduled, either as a fresh task on the
//! shared executor ([`ScheduleOn::Caller`]) or behind the other hub jobs
//! ([`ScheduleOn::Hub`]). Within one schedule target they run in
//! registration order.

use core::future::Future;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use futures_lite::FutureExt;
use log::warn;

use crate::error::{Error, Result};
use crate::hub::Hub;
use crate::message::Failure;

/// Where a completion callback runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOn {
    /// On the context that completes the result, or a fresh executor task
    /// if the result is already terminal.
    Caller,
    /// Marshalled onto the hub, never concurrently with other hub jobs.
    Hub,
}

type Continuation<T> = Box<dyn FnOnce(&AsyncResult<T>)>;

enum State<T> {
    Pending,
    Succeeded(T),
    Failed(Failure),
}

struct Inner<T> {
    state: State<T>,
    continuations: Vec<(Continuation<T>, ScheduleOn)>,
}

pub struct AsyncResult<T> {
    inner: Rc<RefCell<Inner<T>>>,
    hub: Rc<Hub>,
}

impl<T> Clone for AsyncResult<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            hub: Rc::clone(&self.hub),
        }
    }
}

impl<T: 'static> AsyncResult<T> {
    pub fn new(hub: &Rc<Hub>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                continuations: Vec::new(),
            })),
            hub: Rc::clone(hub),
        }
    }

    /// A result that is already terminal.
    pub fn completed(hub: &Rc<Hub>, outcome: core::result::Result<T, Failure>) -> Self {
        let result = Self::new(hub);
        let _ = result.complete(outcome);
        result
    }

    /// Transition out of `Pending` and release the continuations.
    pub fn complete(&self, outcome: core::result::Result<T, Failure>) -> Result<()> {
        let continuations = {
            let mut inner = self.inner.borrow_mut();
            if !matches!(inner.state, State::Pending) {
                return Err(Error::AlreadyComplete);
            }
            inner.state = match outcome {
                Ok(value) => State::Succeeded(value),
                Err(failure) => State::Failed(failure),
            };
            std::mem::take(&mut inner.continuations)
        };

        for (callback, on) in continuations {
            match on {
                ScheduleOn::Caller => callback(self),
                ScheduleOn::Hub => {
                    let this = self.clone();
                    self.hub.post(move || callback(&this));
                }
            }
        }
        Ok(())
    }

    /// Run `thunk` and complete with its outcome. A panic inside `thunk`
    /// becomes a `Failed` state. Refuses to run once terminal.
    pub fn run_and_link(
        &self,
        thunk: impl FnOnce() -> core::result::Result<T, Failure>,
    ) -> Result<()> {
        if self.is_complete() {
            return Err(Error::AlreadyComplete);
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(thunk))
            .unwrap_or_else(|payload| Err(Failure::from_panic(&*payload)));
        self.complete(outcome)
    }

    /// Drive a suspending computation and complete with its outcome.
    ///
    /// The returned future is meant to be spawned; it resolves once the
    /// result has transitioned.
    pub fn link<F>(&self, fut: F) -> impl Future<Output = ()> + 'static
    where
        F: Future<Output = core::result::Result<T, Failure>> + 'static,
    {
        let this = self.clone();
        async move {
            let outcome = AssertUnwindSafe(fut)
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(Failure::from_panic(&*payload)));
            if let Err(e) = this.complete(outcome) {
                warn!("async result: linked outcome dropped: {e}");
            }
        }
    }

    /// Register `callback` to run once the result is terminal.
    pub fn on_complete(&self, callback: impl FnOnce(&AsyncResult<T>) + 'static, on: ScheduleOn) {
        if !self.is_complete() {
            self.inner
                .borrow_mut()
                .continuations
                .push((Box::new(callback), on));
            return;
        }

        let this = self.clone();
        match on {
            ScheduleOn::Caller => self.hub.spawn(async move { callback(&this) }),
            ScheduleOn::Hub => self.hub.post(move || callback(&this)),
        }
    }

    pub fn is_complete(&self) -> bool {
        !matches!(self.inner.borrow().state, State::Pending)
    }

    pub fn is_successful(&self) -> bool {
        matches!(self.inner.borrow().state, State::Succeeded(_))
    }

    pub fn failure(&self) -> Option<Failure> {
        match &self.inner.borrow().state {
            State::Failed(failure) => Some(failure.clone()),
            _ => None,
        }
    }
}

impl<T: Clone + 'static> AsyncResult<T> {
    pub fn value(&self) -> Option<T> {
        match &self.inner.borrow().state {
            State::Succeeded(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// `None` while pending.
    pub fn outcome(&self) -> Option<core::result::Result<T, Failure>> {
        match &self.inner.borrow().state {
            State::Pending => None,
            State::Succeeded(value) => Some(Ok(value.clone())),
            State::Failed(failure) => Some(Err(failure.clone())),
        }
    }
}
