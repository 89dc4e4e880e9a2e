//! Terminal stage: turns a decoded [`RequestMessage`] into a handler call.
//!
//! The call runs as its own task, linked to an [`AsyncResult`]. Completion
//! is scheduled on the hub, where the [`ReturnMessage`] is built and handed
//! back up the sink stack. Several calls from one connection may be in
//! flight at once; each one answers as soon as it finishes.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use futures_lite::future;
use futures_lite::FutureExt;
use log::{debug, warn};

use crate::future::{AsyncResult, ScheduleOn};
use crate::handler::Handler;
use crate::hub::Hub;
use crate::message::{Failure, RequestMessage, ReturnMessage, Value};
use crate::sink::{Reply, Request, RequestSink, SinkStack};

pub struct CallBuilderSink {
    handler: Rc<Handler>,
    hub: Rc<Hub>,
    pending: Cell<usize>,
}

impl CallBuilderSink {
    pub fn new(handler: Rc<Handler>, hub: Rc<Hub>) -> Rc<Self> {
        Rc::new(Self {
            handler,
            hub,
            pending: Cell::new(0),
        })
    }

    /// Calls started but not yet answered.
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    fn start_call(self: Rc<Self>, stack: SinkStack, message: RequestMessage) {
        let RequestMessage {
            method,
            args,
            kwargs,
            properties,
        } = message;

        let Some(invocable) = self.handler.resolve(&method) else {
            warn!("[{}] unknown method '{}'", self.handler.name(), method);
            let reply = ReturnMessage::from_outcome(Err(Failure::unknown_method(&method)), &properties);
            stack.deliver_response(Reply::Message(reply));
            return;
        };

        debug!("[{}] calling '{}' with {} args", self.handler.name(), method, args.len());
        // a method may panic while building its future, before there is
        // anything to poll
        let call = panic::catch_unwind(AssertUnwindSafe(|| invocable(args, kwargs))).unwrap_or_else(
            |payload| future::ready(Err(Failure::from_panic(&*payload))).boxed_local(),
        );

        let result: AsyncResult<Value> = AsyncResult::new(&self.hub);
        self.pending.set(self.pending.get() + 1);
        self.hub.spawn(result.link(call));

        let this = Rc::clone(&self);
        result.on_complete(
            move |done| {
                this.pending.set(this.pending.get().saturating_sub(1));
                let outcome = done
                    .outcome()
                    .unwrap_or_else(|| Err(Failure::application("call completed without an outcome")));
                if let Err(failure) = &outcome {
                    debug!("[{}] call failed: {}", this.handler.name(), failure);
                }
                let reply = ReturnMessage::from_outcome(outcome, &properties);
                stack.deliver_response(Reply::Message(reply));
            },
            ScheduleOn::Hub,
        );
    }
}

impl RequestSink for CallBuilderSink {
    fn on_request(self: Rc<Self>, stack: SinkStack, request: Request) {
        match request {
            Request::Message(message) => self.start_call(stack, message),
            Request::Body(body) => {
                warn!(
                    "[{}] got an undecoded body ({} bytes); is a serializer missing?",
                    self.handler.name(),
                    body.len()
                );
                stack.deliver_response(Reply::Error("request was not decoded".to_owned()));
            }
        }
    }
}
