//! Reference serializer stage: dispatch bodies as JSON.
//!
//! Decodes a `Request::Body` into a [`RequestMessage`], pushes itself so it
//! sees the reply, and forwards the decoded call. On the way back it turns
//! the [`ReturnMessage`] into body bytes for the transport. Any other
//! serializer can take its place in the chain.
//!
//! Request body:
//! ```json
//! { "method": "echo", "args": ["x"], "kwargs": {}, "properties": { "SequenceId": 7 } }
//! ```

use std::rc::Rc;

use log::{debug, warn};

use crate::error::Result;
use crate::message::{RequestMessage, ReturnMessage};
use crate::sink::{Context, Reply, Request, RequestSink, ResponseSink, SinkStack};

pub struct JsonSerializerSink {
    next: Rc<dyn RequestSink>,
}

impl JsonSerializerSink {
    pub fn new(next: Rc<dyn RequestSink>) -> Rc<Self> {
        Rc::new(Self { next })
    }

    pub fn decode_request(body: &[u8]) -> Result<RequestMessage> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn encode_request(message: &RequestMessage) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }

    pub fn decode_reply(body: &[u8]) -> Result<ReturnMessage> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn encode_reply(message: &ReturnMessage) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(message)?)
    }
}

impl RequestSink for JsonSerializerSink {
    fn on_request(self: Rc<Self>, mut stack: SinkStack, request: Request) {
        let message = match request {
            Request::Body(body) => match Self::decode_request(&body) {
                Ok(message) => message,
                Err(e) => {
                    warn!("serializer: undecodable request body ({} bytes): {}", body.len(), e);
                    stack.deliver_response(Reply::Error(format!("undecodable request: {e}")));
                    return;
                }
            },
            Request::Message(message) => message,
        };

        debug!("serializer: decoded call to '{}'", message.method);
        let this = Rc::clone(&self) as Rc<dyn ResponseSink>;
        stack.push(this, Box::new(()));
        Rc::clone(&self.next).on_request(stack, Request::Message(message));
    }
}

impl ResponseSink for JsonSerializerSink {
    fn on_response(&self, stack: SinkStack, _context: Context, reply: Reply) {
        let reply = match reply {
            Reply::Message(message) => match Self::encode_reply(&message) {
                Ok(body) => Reply::Body(body),
                Err(e) => {
                    warn!("serializer: cannot encode reply: {}", e);
                    Reply::Error(format!("unencodable reply: {e}"))
                }
            },
            other => other,
        };
        stack.deliver_response(reply);
    }
}
