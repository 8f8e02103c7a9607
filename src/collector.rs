use super::model::{Capacity, Outcome};
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use futures::Stream;
use tokio::sync::mpsc;


pub(crate) fn channel<R, E>(capacity: Capacity) -> (OutcomeSender<R, E>, Results<R, E>) {
    let (tx, rx) = match capacity {
        Capacity::Unbounded => {
            let (tx, rx) = mpsc::unbounded_channel();
            (OutcomeSender::Unbounded(tx), OutcomeReceiver::Unbounded(rx))
        }
        Capacity::Bounded(n) => {
            let (tx, rx) = mpsc::channel(n);
            (OutcomeSender::Bounded(tx), OutcomeReceiver::Bounded(rx))
        }
    };
    (tx, Results { rx, received: 0 })
}


/// Publishing side of the collector. Every worker and the supervisor own one
/// clone; the stream ends when the last clone is dropped.
pub(crate) enum OutcomeSender<R, E> {
    Bounded(mpsc::Sender<Outcome<R, E>>),
    Unbounded(mpsc::UnboundedSender<Outcome<R, E>>),
}

impl<R, E> Clone for OutcomeSender<R, E> {
    fn clone(&self) -> Self {
        match self {
            OutcomeSender::Bounded(tx) => OutcomeSender::Bounded(tx.clone()),
            OutcomeSender::Unbounded(tx) => OutcomeSender::Unbounded(tx.clone()),
        }
    }
}

impl<R, E> OutcomeSender<R, E> {
    /// Suspends while a bounded collector is full. Hands the outcome back if
    /// the caller has dropped the result stream.
    pub async fn publish(&self, outcome: Outcome<R, E>) -> Result<(), Outcome<R, E>> {
        match self {
            OutcomeSender::Bounded(tx) => tx.send(outcome).await.map_err(|e| e.0),
            OutcomeSender::Unbounded(tx) => tx.send(outcome).map_err(|e| e.0),
        }
    }

    /// Non-blocking `publish`. A full bounded collector hands the outcome back.
    pub fn try_publish(&self, outcome: Outcome<R, E>) -> Result<(), Outcome<R, E>> {
        match self {
            OutcomeSender::Bounded(tx) => tx.try_send(outcome).map_err(|e| match e {
                mpsc::error::TrySendError::Full(o) | mpsc::error::TrySendError::Closed(o) => o,
            }),
            OutcomeSender::Unbounded(tx) => tx.send(outcome).map_err(|e| e.0),
        }
    }
}


enum OutcomeReceiver<R, E> {
    Bounded(mpsc::Receiver<Outcome<R, E>>),
    Unbounded(mpsc::UnboundedReceiver<Outcome<R, E>>),
}


/// Single-pass stream of outcomes in completion order.
///
/// Completion order depends on which worker finishes first and differs from
/// run to run; it is not the submission order. The stream ends once every
/// worker has terminated and published its last outcome. Callers that know
/// the task count up front may instead read exactly that many with
/// [`Results::take_exact`] and never wait for the end.
pub struct Results<R, E> {
    rx: OutcomeReceiver<R, E>,
    received: usize,
}

impl<R, E> Results<R, E> {
    pub async fn next_outcome(&mut self) -> Option<Outcome<R, E>> {
        let outcome = match &mut self.rx {
            OutcomeReceiver::Bounded(rx) => rx.recv().await,
            OutcomeReceiver::Unbounded(rx) => rx.recv().await,
        };
        if outcome.is_some() {
            self.received += 1;
        }
        outcome
    }

    /// Known-count drain: read exactly `n` outcomes. Returns fewer only if
    /// the stream ended first.
    pub async fn take_exact(&mut self, n: usize) -> Vec<Outcome<R, E>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match self.next_outcome().await {
                Some(outcome) => out.push(outcome),
                None => break,
            }
        }
        out
    }

    /// Drain until the end of the stream.
    pub async fn collect_all(mut self) -> Vec<Outcome<R, E>> {
        let mut out = Vec::new();
        while let Some(outcome) = self.next_outcome().await {
            out.push(outcome);
        }
        out
    }

    /// Outcomes handed out so far.
    #[inline]
    pub fn received(&self) -> usize {
        self.received
    }
}

impl<R, E> Stream for Results<R, E> {
    type Item = Outcome<R, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let polled = match &mut this.rx {
            OutcomeReceiver::Bounded(rx) => rx.poll_recv(cx),
            OutcomeReceiver::Unbounded(rx) => rx.poll_recv(cx),
        };
        if let Poll::Ready(Some(_)) = &polled {
            this.received += 1;
        }
        polled
    }
}
