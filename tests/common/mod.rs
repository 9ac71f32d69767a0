#![allow(dead_code)]

use std::sync::Arc;

use gale::http::Response;
use gale::transport::{ChannelTransport, Outbound};
use gale::{Dispatcher, Server};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A dispatcher for `server` wired to an in-memory transport.
pub fn connect(server: &Server) -> (Dispatcher, Arc<ChannelTransport>, UnboundedReceiver<Outbound>) {
    init_tracing();
    let (transport, rx) = ChannelTransport::pair();
    let dispatcher = server.connection(transport.clone());
    (dispatcher, transport, rx)
}

/// Everything written so far.
pub fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut out = Vec::new();
    while let Ok(outbound) = rx.try_recv() {
        out.push(outbound);
    }
    out
}

/// The single response written so far; panics on anything else.
pub fn only_response(rx: &mut UnboundedReceiver<Outbound>) -> Response {
    match drain(rx).as_slice() {
        [Outbound::Response(response)] => response.clone(),
        other => panic!("expected exactly one response, got {other:?}"),
    }
}
