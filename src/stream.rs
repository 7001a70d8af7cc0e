use crate::subscribers::Subscription;
use futures::{
    channel::mpsc::{self, UnboundedReceiver, UnboundedSender},
    stream::Stream,
};
use std::{
    pin::Pin,
    task::{Context, Poll},
};

/// An async [`Stream`] of a reactive value, emitting the value at creation
/// followed by every settled change. Dropping the stream removes the
/// underlying subscription.
pub struct ValueStream<T> {
    receiver: UnboundedReceiver<T>,
    subscription: Option<Subscription>,
}

impl<T> ValueStream<T> {
    pub(crate) fn new(
        initial: T,
        subscribe: impl FnOnce(UnboundedSender<T>) -> Subscription,
    ) -> Self {
        let (tx, receiver) = mpsc::unbounded();
        _ = tx.unbounded_send(initial);
        let subscription = subscribe(tx);
        Self {
            receiver,
            subscription: Some(subscription),
        }
    }
}

impl<T> Stream for ValueStream<T> {
    type Item = T;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().receiver).poll_next(cx)
    }
}

impl<T> Drop for ValueStream<T> {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}
