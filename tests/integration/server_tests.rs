//! End-to-end: acceptor → transport → JSON serializer → call builder,
//! driven through in-memory sockets.

use std::io;
use std::rc::Rc;

use serde_json::json;
use tagmux::call_builder::CallBuilderSink;
use tagmux::config::ServerConfig;
use tagmux::handler::Handler;
use tagmux::hub::Executor;
use tagmux::message::{Failure, FailureKind, Property, RequestMessage, ReturnMessage, Value};
use tagmux::mux::{Acceptor, AcceptorSettings, Frame, MessageType, Tag};
use tagmux::serializer::JsonSerializerSink;

use crate::mock_net::{MockListener, MockPeer, peer_addr, run_until_idle, runtime};

fn handler() -> Handler {
    Handler::builder("itest")
        .sync_method("echo", |args, _| Ok(args.into_iter().next().unwrap_or(Value::Null)))
        .sync_method("fail", |_, _| Err(Failure::application("not today")))
        .method("slow", |args, _| async move {
            for _ in 0..8 {
                futures_lite::future::yield_now().await;
            }
            Ok(args.into_iter().next().unwrap_or(Value::Null))
        })
        .build()
}

struct Server {
    executor: Rc<Executor>,
    listener: MockListener,
    acceptor: Rc<Acceptor<MockListener>>,
}

impl Server {
    fn start(config: &ServerConfig) -> Self {
        let (executor, hub) = runtime();
        let call_builder = CallBuilderSink::new(Rc::new(handler()), Rc::clone(&hub));
        let chain = JsonSerializerSink::new(call_builder);
        let listener = MockListener::new();
        let acceptor = Acceptor::new(
            &config.service,
            listener.clone(),
            chain,
            hub,
            AcceptorSettings::from(config),
        );
        assert!(acceptor.open().is_successful());
        Self {
            executor,
            listener,
            acceptor,
        }
    }

    fn connect(&self, port: u16) -> MockPeer {
        let peer = self.listener.connect(peer_addr(port));
        self.settle();
        peer
    }

    fn settle(&self) {
        run_until_idle(&self.executor);
    }
}

fn test_config() -> ServerConfig {
    ServerConfig {
        service: "itest".to_owned(),
        accept_backoff_ms: 0,
        ..ServerConfig::default()
    }
}

fn dispatch(tag: u32, method: &str, args: Vec<Value>, seq: i32) -> Frame {
    let request = RequestMessage::new(method, args).with_property(Property::SequenceId(seq));
    let body = JsonSerializerSink::encode_request(&request).unwrap();
    Frame::new(Tag(tag), MessageType::Tdispatch, body)
}

fn reply_of(frame: &Frame) -> ReturnMessage {
    assert_eq!(frame.message_type, MessageType::Rdispatch, "frame {frame:?}");
    JsonSerializerSink::decode_reply(&frame.body).unwrap()
}

#[test]
fn echo_reply_keeps_tag_and_sequence_id() {
    let server = Server::start(&test_config());
    let mut peer = server.connect(4001);
    assert_eq!(server.acceptor.connection_count(), 1);

    peer.send_frame(&dispatch(7, "echo", vec![json!("x")], 41));
    server.settle();

    let out = peer.received();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].tag, Tag(7));
    let reply = reply_of(&out[0]);
    assert_eq!(reply.return_value(), Some(&json!("x")));
    assert_eq!(reply.properties.sequence_id(), Some(41));
}

#[test]
fn replies_come_back_in_completion_order() {
    let server = Server::start(&test_config());
    let mut peer = server.connect(4002);

    let mut bytes = dispatch(1, "slow", vec![json!("first")], 1).encode().unwrap();
    bytes.extend(dispatch(2, "echo", vec![json!("second")], 2).encode().unwrap());
    peer.send(&bytes);
    server.settle();

    let out = peer.received();
    let tags: Vec<Tag> = out.iter().map(|f| f.tag).collect();
    assert_eq!(tags, vec![Tag(2), Tag(1)]);
    assert_eq!(reply_of(&out[1]).return_value(), Some(&json!("first")));
}

#[test]
fn ping_is_not_held_behind_a_dispatch() {
    let server = Server::start(&test_config());
    let mut peer = server.connect(4003);

    peer.send_frame(&dispatch(1, "slow", vec![json!(1)], 1));
    peer.send_frame(&Frame::new(Tag(2), MessageType::Tping, Vec::new()));
    server.settle();

    let out = peer.received();
    assert_eq!(out[0], Frame::new(Tag(2), MessageType::Rping, Vec::new()));
    assert_eq!(out[1].tag, Tag(1));
}

#[test]
fn unknown_method_fails_but_connection_survives() {
    let server = Server::start(&test_config());
    let mut peer = server.connect(4004);

    peer.send_frame(&dispatch(3, "missing", Vec::new(), 3));
    server.settle();
    let out = peer.received();
    let failure = reply_of(&out[0]).failure().cloned().unwrap();
    assert_eq!(failure.kind, FailureKind::UnknownMethod);
    assert!(failure.message.contains("missing"));

    peer.send_frame(&dispatch(4, "echo", vec![json!("still here")], 4));
    server.settle();
    assert_eq!(reply_of(&peer.received()[0]).return_value(), Some(&json!("still here")));
}

#[test]
fn handler_error_is_delivered_as_failure() {
    let server = Server::start(&test_config());
    let mut peer = server.connect(4005);

    peer.send_frame(&dispatch(5, "fail", Vec::new(), 5));
    server.settle();

    let reply = reply_of(&peer.received()[0]);
    assert_eq!(reply.failure().unwrap().kind, FailureKind::Application);
    assert_eq!(reply.failure().unwrap().message, "not today");
    assert_eq!(reply.properties.sequence_id(), Some(5));
}

#[test]
fn undecodable_body_gets_rerr_on_its_tag() {
    let server = Server::start(&test_config());
    let mut peer = server.connect(4006);

    peer.send_frame(&Frame::new(Tag(6), MessageType::Tdispatch, b"\xffnope".to_vec()));
    server.settle();

    let out = peer.received();
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].tag, Tag(6));
    assert_eq!(out[0].message_type, MessageType::Rerr);
}

#[test]
fn oversized_frame_closes_only_that_connection() {
    let config = ServerConfig {
        max_frame_size: 128,
        ..test_config()
    };
    let server = Server::start(&config);
    let mut bad = server.connect(4007);
    let mut good = server.connect(4008);
    assert_eq!(server.acceptor.connection_count(), 2);

    bad.send_frame(&dispatch(1, "echo", vec![json!("y".repeat(200))], 1));
    server.settle();
    assert!(bad.received().is_empty());
    assert_eq!(server.acceptor.connection_count(), 1);
    assert!(server.acceptor.connection(&bad.addr).is_none());

    good.send_frame(&dispatch(2, "echo", vec![json!("ok")], 2));
    server.settle();
    assert_eq!(reply_of(&good.received()[0]).return_value(), Some(&json!("ok")));
}

#[test]
fn ping_before_half_close_is_still_answered() {
    let server = Server::start(&test_config());
    let mut peer = server.connect(4011);

    let mut bytes = Frame::new(Tag(3), MessageType::Tping, Vec::new()).encode().unwrap();
    bytes.extend(Frame::new(Tag(4), MessageType::Tinit, b"v1".to_vec()).encode().unwrap());
    peer.send(&bytes);
    peer.finish_sending();
    server.settle();

    assert_eq!(
        peer.received(),
        vec![
            Frame::new(Tag(3), MessageType::Rping, Vec::new()),
            Frame::new(Tag(4), MessageType::Rinit, b"v1".to_vec()),
        ]
    );
    assert_eq!(server.acceptor.connection_count(), 0);
}

#[test]
fn accept_failure_does_not_stop_accepting() {
    let server = Server::start(&test_config());
    server.listener.fail_next_accept(io::ErrorKind::ConnectionAborted);
    server.settle();

    let mut peer = server.connect(4009);
    assert_eq!(server.acceptor.connection_count(), 1);
    peer.send_frame(&dispatch(9, "echo", vec![json!(9)], 9));
    server.settle();
    assert_eq!(reply_of(&peer.received()[0]).return_value(), Some(&json!(9)));
}

#[test]
fn disconnect_removes_registry_entry() {
    let server = Server::start(&test_config());
    let peer = server.connect(4010);
    assert!(server.acceptor.connection(&peer.addr).is_some());

    peer.hang_up();
    server.settle();
    assert_eq!(server.acceptor.connection_count(), 0);
}

#[test]
fn open_twice_listens_once() {
    let server = Server::start(&test_config());
    assert!(server.acceptor.open().is_successful());
    assert_eq!(server.listener.listen_calls(), 1);
    assert_eq!(server.acceptor.label(), "[itest.127.0.0.1:9990]");
}
