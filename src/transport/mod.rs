//! The seam between the dispatch core and the transport that owns the socket.
//!
//! The core never touches I/O directly. Everything it wants to put on the
//! wire goes through [`Transport::send`] as an [`Outbound`] message, and the
//! transport tells the core its write side is done by resolving
//! [`Transport::closed`].
//!
//! [`ChannelTransport`] is a ready-made implementation over a tokio unbounded
//! channel: the socket task drains the receiver and the dispatcher writes into
//! the sender without ever blocking.

use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::error::TransportError;
use crate::http::{Request, Response};
use crate::realtime::EventFrame;

/// Something the core asks the transport to write.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// A complete request/response message.
    Response(Response),
    /// Switch the connection to the named protocol; the transport completes
    /// any handshake the protocol needs using the original request.
    Upgrade {
        protocol: String,
        request: Arc<Request>,
    },
    /// Head of a long-lived push response. Frames follow as [`Outbound::Event`].
    StreamOpen(Response),
    /// One pushed frame on an open stream.
    Event(EventFrame),
    /// One outbound message in bidirectional-event mode.
    Message(String),
    /// Tear the connection down after flushing what was sent before.
    Close,
}

/// The write half of one connection, as seen by the core.
pub trait Transport: Send + Sync + 'static {
    /// Queues `outbound` for writing. Must not block.
    fn send(&self, outbound: Outbound) -> Result<(), TransportError>;

    /// Asks the transport to close the connection.
    fn close(&self);

    /// Resolves once the write side is finished or closed.
    fn closed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
}

/// [`Transport`] backed by an unbounded tokio channel.
///
/// # Examples
///
/// ```
/// use gale::transport::{ChannelTransport, Outbound, Transport};
///
/// let (transport, mut rx) = ChannelTransport::pair();
/// transport.send(Outbound::Message("hi".into())).unwrap();
/// assert_eq!(rx.try_recv().unwrap(), Outbound::Message("hi".into()));
/// ```
#[derive(Debug)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
    shut: watch::Sender<bool>,
}

impl ChannelTransport {
    /// Creates a transport and the receiver the socket task should drain.
    pub fn pair() -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (shut, _) = watch::channel(false);
        let transport = Arc::new(Self { tx, shut });
        (transport, rx)
    }

    /// Returns `true` once [`Transport::close`] was called or the receiver is gone.
    pub fn is_closed(&self) -> bool {
        *self.shut.borrow() || self.tx.is_closed()
    }
}

impl Transport for ChannelTransport {
    fn send(&self, outbound: Outbound) -> Result<(), TransportError> {
        if *self.shut.borrow() {
            return Err(TransportError::Closed);
        }
        self.tx.send(outbound).map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        if self.shut.send_replace(true) {
            return;
        }
        if self.tx.send(Outbound::Close).is_err() {
            debug!("close requested after the receiver went away");
        }
    }

    // Resolves on `close()` or when the receiver goes away, whichever comes
    // first. The sender clone is released as soon as either happens.
    fn closed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        let tx = self.tx.clone();
        let mut shut = self.shut.subscribe();
        Box::pin(async move {
            tokio::select! {
                () = tx.closed() => {}
                _ = shut.wait_for(|done| *done) => {}
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_in_order() {
        let (transport, mut rx) = ChannelTransport::pair();
        transport.send(Outbound::Message("a".into())).unwrap();
        transport.send(Outbound::Message("b".into())).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Outbound::Message("a".into()));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Message("b".into()));
    }

    #[test]
    fn close_is_emitted_once_and_rejects_later_sends() {
        let (transport, mut rx) = ChannelTransport::pair();
        transport.close();
        transport.close();
        assert!(transport.is_closed());
        assert_eq!(
            transport.send(Outbound::Message("late".into())),
            Err(TransportError::Closed)
        );
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_resolves_on_close() {
        let (transport, mut rx) = ChannelTransport::pair();
        let before = transport.closed();
        transport.close();
        before.await;
        // Subscribing after the fact sees the flag right away.
        transport.closed().await;
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
    }

    #[tokio::test]
    async fn closed_resolves_when_receiver_drops() {
        let (transport, rx) = ChannelTransport::pair();
        let closed = transport.closed();
        drop(rx);
        closed.await;
        assert!(transport.is_closed());
        assert_eq!(
            transport.send(Outbound::Close),
            Err(TransportError::Closed)
        );
    }
}
