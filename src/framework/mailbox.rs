//! Per-actor mailbox: two unbounded queues, one per [`Priority`].
//!
//! Producers never block. The single consumer (the owning actor's run loop)
//! always drains the high lane first; within a lane, order is FIFO, which gives
//! per-sender ordering for free.

use crate::framework::message::{Envelope, Priority};
use tokio::sync::mpsc;

/// Producer half, owned by the actor's control block.
#[derive(Debug)]
pub(crate) struct MailboxSender {
    high: mpsc::UnboundedSender<Envelope>,
    normal: mpsc::UnboundedSender<Envelope>,
}

impl MailboxSender {
    /// Enqueues without blocking. Hands the envelope back if the mailbox is closed.
    pub(crate) fn push(&self, envelope: Envelope) -> Result<(), Envelope> {
        let lane = match envelope.priority {
            Priority::High => &self.high,
            Priority::Normal => &self.normal,
        };
        lane.send(envelope).map_err(|e| e.0)
    }
}

/// Consumer half, owned by the actor's run loop.
#[derive(Debug)]
pub(crate) struct Mailbox {
    high: mpsc::UnboundedReceiver<Envelope>,
    normal: mpsc::UnboundedReceiver<Envelope>,
}

pub(crate) fn channel() -> (MailboxSender, Mailbox) {
    let (high_tx, high_rx) = mpsc::unbounded_channel();
    let (normal_tx, normal_rx) = mpsc::unbounded_channel();
    (
        MailboxSender {
            high: high_tx,
            normal: normal_tx,
        },
        Mailbox {
            high: high_rx,
            normal: normal_rx,
        },
    )
}

impl Mailbox {
    /// Waits for the next envelope. Returns `None` once every producer is gone
    /// and both lanes are drained.
    pub(crate) async fn recv(&mut self) -> Option<Envelope> {
        tokio::select! {
            biased;
            Some(envelope) = self.high.recv() => Some(envelope),
            Some(envelope) = self.normal.recv() => Some(envelope),
            else => None,
        }
    }

    pub(crate) fn try_next(&mut self) -> Option<Envelope> {
        self.high.try_recv().ok().or_else(|| self.normal.try_recv().ok())
    }

    /// Rejects further sends. Already queued envelopes stay readable.
    pub(crate) fn close(&mut self) {
        self.high.close();
        self.normal.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framework::message::Message;

    fn envelope(n: u32, priority: Priority) -> Envelope {
        Envelope::new(None, Message::new(n)).with_priority(priority)
    }

    #[tokio::test]
    async fn high_lane_is_drained_first() {
        let (tx, mut mailbox) = channel();
        tx.push(envelope(1, Priority::Normal)).unwrap();
        tx.push(envelope(2, Priority::High)).unwrap();
        tx.push(envelope(3, Priority::Normal)).unwrap();

        let mut order = Vec::new();
        for _ in 0..3 {
            let env = mailbox.recv().await.unwrap();
            order.push(*env.payload().downcast_ref::<u32>().unwrap());
        }
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[tokio::test]
    async fn recv_ends_when_producers_are_gone() {
        let (tx, mut mailbox) = channel();
        tx.push(envelope(1, Priority::Normal)).unwrap();
        drop(tx);
        assert!(mailbox.recv().await.is_some());
        assert!(mailbox.recv().await.is_none());
    }

    #[test]
    fn closed_mailbox_hands_envelopes_back() {
        let (tx, mut mailbox) = channel();
        tx.push(envelope(1, Priority::Normal)).unwrap();
        mailbox.close();
        assert!(tx.push(envelope(2, Priority::Normal)).is_err());
        assert!(mailbox.try_next().is_some());
        assert!(mailbox.try_next().is_none());
    }
}
