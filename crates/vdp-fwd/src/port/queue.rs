//! Packet queues for asynchronous port writers.
//!
//! A length of zero selects an unbounded queue; otherwise the queue is
//! bounded and a push onto a full queue is refused (tail drop).

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushError {
    Full,
    Closed,
}

pub(crate) enum QueueTx<T> {
    Bounded(mpsc::Sender<T>),
    Unbounded(mpsc::UnboundedSender<T>),
}

pub(crate) enum QueueRx<T> {
    Bounded(mpsc::Receiver<T>),
    Unbounded(mpsc::UnboundedReceiver<T>),
}

pub(crate) fn queue<T>(len: usize) -> (QueueTx<T>, QueueRx<T>) {
    if len == 0 {
        let (tx, rx) = mpsc::unbounded_channel();
        (QueueTx::Unbounded(tx), QueueRx::Unbounded(rx))
    } else {
        let (tx, rx) = mpsc::channel(len);
        (QueueTx::Bounded(tx), QueueRx::Bounded(rx))
    }
}

impl<T> QueueTx<T> {
    pub(crate) fn push(&self, item: T) -> Result<(), PushError> {
        match self {
            QueueTx::Bounded(tx) => tx.try_send(item).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PushError::Full,
                mpsc::error::TrySendError::Closed(_) => PushError::Closed,
            }),
            QueueTx::Unbounded(tx) => tx.send(item).map_err(|_| PushError::Closed),
        }
    }
}

impl<T> QueueRx<T> {
    pub(crate) async fn recv(&mut self) -> Option<T> {
        match self {
            QueueRx::Bounded(rx) => rx.recv().await,
            QueueRx::Unbounded(rx) => rx.recv().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_drops_tail() {
        let (tx, mut rx) = queue(2);
        assert_eq!(tx.push(1), Ok(()));
        assert_eq!(tx.push(2), Ok(()));
        assert_eq!(tx.push(3), Err(PushError::Full));
        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[tokio::test]
    async fn test_unbounded_and_closed() {
        let (tx, rx) = queue(0);
        for i in 0..1000 {
            assert_eq!(tx.push(i), Ok(()));
        }
        drop(rx);
        assert_eq!(tx.push(0), Err(PushError::Closed));
    }
}
