//! tagmux-server: mux RPC server exposing a small demo service.
//!
//! ```text
//! tagmux-server [config.json]
//! ```
//!
//! The whole server runs on one `edge_executor::LocalExecutor` driven by
//! `futures_lite::future::block_on`; `async-io-mini` services the socket.

use std::rc::Rc;

use anyhow::{Context, Result};
use futures_lite::future;
use log::{info, warn};

use tagmux::call_builder::CallBuilderSink;
use tagmux::config::ServerConfig;
use tagmux::handler::Handler;
use tagmux::hub::{Executor, Hub};
use tagmux::message::{Failure, Value};
use tagmux::mux::{Acceptor, AcceptorSettings, TcpSocket};
use tagmux::serializer::JsonSerializerSink;

fn demo_handler() -> Handler {
    Handler::builder("demo")
        .sync_method("echo", |args, _| Ok(args.into_iter().next().unwrap_or(Value::Null)))
        .sync_method("add", |args, _| {
            let mut total = 0i64;
            for arg in &args {
                total += arg
                    .as_i64()
                    .ok_or_else(|| Failure::application(format!("not an integer: {arg}")))?;
            }
            Ok(Value::from(total))
        })
        .method("sleep", |args, _| async move {
            let ms = args.first().and_then(Value::as_u64).unwrap_or(0);
            async_io_mini::Timer::after(std::time::Duration::from_millis(ms)).await;
            Ok(Value::from(ms))
        })
        .build()
}

fn main() -> Result<()> {
    // ── 1. Config ─────────────────────────────────────────────
    let config = match std::env::args().nth(1) {
        Some(path) => ServerConfig::load(&path).with_context(|| format!("loading {path}"))?,
        None => ServerConfig::default(),
    };

    // ── 2. Logging ────────────────────────────────────────────
    // RUST_LOG, when set, refines the configured level
    env_logger::Builder::new()
        .filter_level(config.level_filter())
        .parse_default_env()
        .try_init()
        .context("installing logger")?;
    info!("tagmux v{} starting ({})", env!("CARGO_PKG_VERSION"), config.service);

    // ── 3. Executor, hub and sink chain ───────────────────────
    let executor = Rc::new(Executor::new());
    let hub = Hub::start(Rc::clone(&executor));

    let handler = Rc::new(demo_handler());
    info!("[{}] methods: {:?}", handler.name(), handler.methods());
    let call_builder = CallBuilderSink::new(handler, Rc::clone(&hub));
    let chain = JsonSerializerSink::new(call_builder);

    // ── 4. Acceptor ───────────────────────────────────────────
    let acceptor = Acceptor::new(
        &config.service,
        TcpSocket::new(config.bind_addr),
        chain,
        Rc::clone(&hub),
        AcceptorSettings::from(&config),
    );
    let opened = acceptor.open();
    if let Some(failure) = opened.failure() {
        anyhow::bail!("{} could not open: {}", acceptor.label(), failure);
    }
    if let Some(addr) = acceptor.local_addr() {
        info!("{} ready on {}", acceptor.label(), addr);
    } else {
        warn!("{} ready, address unknown", acceptor.label());
    }

    future::block_on(executor.run(future::pending::<()>()));
    Ok(())
}
