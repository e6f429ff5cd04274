//! Recognition event channel
//!
//! Producers (the HTTP surface, a backend stream client) hold clones of
//! [`RecognitionSender`]; the session's single consumer task owns the
//! receiver. Events are delivered in send order.

use fras_common::{Error, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

/// A named individual matched by the recognizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    /// Student key of the recognized person
    pub name: String,
}

impl RecognitionEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Message on the consumer's queue
#[derive(Debug)]
pub(crate) enum Inbound {
    Recognition(RecognitionEvent),
    /// Answered once every earlier message has been handled
    Flush(oneshot::Sender<()>),
}

/// Clonable producer handle for one session's recognition channel
#[derive(Debug, Clone)]
pub struct RecognitionSender {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl RecognitionSender {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event; fails once the session stopped consuming
    pub fn send(&self, event: RecognitionEvent) -> Result<()> {
        self.tx
            .send(Inbound::Recognition(event))
            .map_err(|_| closed())
    }

    /// Queue a flush marker behind everything sent so far
    pub(crate) fn flush_marker(&self) -> Result<oneshot::Receiver<()>> {
        let (done, rx) = oneshot::channel();
        self.tx.send(Inbound::Flush(done)).map_err(|_| closed())?;
        Ok(rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn closed() -> Error {
    Error::Precondition("Session is no longer accepting recognitions".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_send_order() {
        let (sender, mut rx) = RecognitionSender::channel();
        let clone = sender.clone();

        sender.send(RecognitionEvent::new("CS/001")).unwrap();
        clone.send(RecognitionEvent::new("CS/002")).unwrap();

        for expected in ["CS/001", "CS/002"] {
            match rx.recv().await.unwrap() {
                Inbound::Recognition(event) => assert_eq!(event.name, expected),
                other => panic!("unexpected message {:?}", other),
            }
        }
        let flushed = sender.flush_marker().unwrap();
        match rx.recv().await.unwrap() {
            Inbound::Flush(done) => done.send(()).unwrap(),
            other => panic!("unexpected message {:?}", other),
        }
        flushed.await.unwrap();
    }

    #[test]
    fn test_send_after_receiver_dropped_is_precondition() {
        let (sender, rx) = RecognitionSender::channel();
        drop(rx);
        assert!(sender.is_closed());
        assert!(matches!(
            sender.send(RecognitionEvent::new("CS/001")),
            Err(Error::Precondition(_))
        ));
    }
}
