use parking_lot::Mutex as PlMutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Waiter outcome codes.
const PENDING: u8 = 0;
const DELIVERED: u8 = 1;
const CLOSED: u8 = 2;

/// A bounded multi-producer multi-consumer channel.
///
/// Capacity 0 makes it a rendezvous channel: every send pairs directly
/// with a receive. Values move by direct handoff whenever a waiter of the
/// opposite side is parked, skipping the buffer entirely; under persistent
/// back-pressure a receive shifts the head sender's value into the slot it
/// just freed, keeping the buffer full and the senders FIFO.
///
/// Cloning the channel is cheap; all clones send into and receive from the
/// same queue.
pub struct Channel<T> {
    inner: Arc<PlMutex<State<T>>>,
}

struct State<T> {
    capacity: usize,
    buffer: VecDeque<T>,
    senders: VecDeque<Arc<SendWaiter<T>>>,
    receivers: VecDeque<Arc<RecvWaiter<T>>>,
    closed: bool,
}

/// A parked sender: carries the value it wants to deliver.
struct SendWaiter<T> {
    value: PlMutex<Option<T>>,
    outcome: AtomicU8,
    waker: PlMutex<Option<Waker>>,
}

/// A parked receiver: carries the slot its value will arrive in.
struct RecvWaiter<T> {
    slot: PlMutex<Option<T>>,
    outcome: AtomicU8,
    waker: PlMutex<Option<Waker>>,
}

impl<T> RecvWaiter<T> {
    /// Hand `value` to this parked receiver and wake it. Channel lock held
    /// by the caller.
    fn deliver(&self, value: T) {
        *self.slot.lock() = Some(value);
        self.outcome.store(DELIVERED, Ordering::Release);
        if let Some(waker) = self.waker.lock().take() {
            waker.wake();
        }
    }
}

impl<T> SendWaiter<T> {
    /// Take the parked sender's value, mark it delivered and wake it.
    /// Channel lock held by the caller.
    fn take(&self) -> T {
        let value = self.value.lock().take().expect("sender waiter without value");
        self.outcome.store(DELIVERED, Ordering::Release);
        if let Some(waker) = self.waker.lock().take() {
            waker.wake();
        }
        value
    }
}

impl<T> Channel<T> {
    /// Create a channel holding up to `capacity` buffered values; 0 means
    /// unbuffered (rendezvous).
    pub fn new(capacity: usize) -> Channel<T> {
        Channel {
            inner: Arc::new(PlMutex::new(State {
                capacity,
                buffer: VecDeque::new(),
                senders: VecDeque::new(),
                receivers: VecDeque::new(),
                closed: false,
            })),
        }
    }

    /// Send a value. Resolves to `true` once the value is buffered or
    /// handed to a receiver, `false` if the channel is (or gets) closed.
    pub fn send(&self, value: T) -> Send<'_, T> {
        Send {
            channel: self,
            value: Some(value),
            waiter: None,
        }
    }

    /// Receive a value. Resolves to `None` once the channel is closed and
    /// drained.
    pub fn recv(&self) -> Recv<'_, T> {
        Recv {
            channel: self,
            waiter: None,
        }
    }

    /// Close the channel. Parked senders resolve to `false`, parked
    /// receivers to `None`; buffered values remain receivable. Closing is
    /// monotonic and idempotent.
    pub fn close(&self) {
        let mut state = self.inner.lock();
        if state.closed {
            return;
        }
        state.closed = true;

        let senders = std::mem::take(&mut state.senders);
        let receivers = std::mem::take(&mut state.receivers);
        drop(state);

        for sender in senders {
            sender.outcome.store(CLOSED, Ordering::Release);
            if let Some(waker) = sender.waker.lock().take() {
                waker.wake();
            }
        }
        for receiver in receivers {
            receiver.outcome.store(CLOSED, Ordering::Release);
            if let Some(waker) = receiver.waker.lock().take() {
                waker.wake();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Channel<T> {
        Channel {
            inner: self.inner.clone(),
        }
    }
}

/// Future returned by [`Channel::send`].
pub struct Send<'a, T> {
    channel: &'a Channel<T>,
    value: Option<T>,
    waiter: Option<Arc<SendWaiter<T>>>,
}

impl<T> Future for Send<'_, T> {
    type Output = bool;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<bool> {
        let this = self.get_mut();

        // Parked: check what the other side (or close) decided.
        if let Some(waiter) = &this.waiter {
            match waiter.outcome.load(Ordering::Acquire) {
                DELIVERED => return Poll::Ready(true),
                CLOSED => return Poll::Ready(false),
                _ => {}
            }
            *waiter.waker.lock() = Some(cx.waker().clone());
            return match waiter.outcome.load(Ordering::Acquire) {
                DELIVERED => Poll::Ready(true),
                CLOSED => Poll::Ready(false),
                _ => Poll::Pending,
            };
        }

        let mut state = this.channel.inner.lock();

        if state.closed {
            return Poll::Ready(false);
        }

        // Direct handoff: a parked receiver takes the value, buffer
        // untouched.
        if let Some(receiver) = state.receivers.pop_front() {
            let value = this.value.take().expect("send polled after completion");
            receiver.deliver(value);
            return Poll::Ready(true);
        }

        if state.buffer.len() < state.capacity {
            let value = this.value.take().expect("send polled after completion");
            state.buffer.push_back(value);
            return Poll::Ready(true);
        }

        // Buffer full (or rendezvous with nobody waiting): park with the
        // value.
        let waiter = Arc::new(SendWaiter {
            value: PlMutex::new(this.value.take()),
            outcome: AtomicU8::new(PENDING),
            waker: PlMutex::new(Some(cx.waker().clone())),
        });
        state.senders.push_back(waiter.clone());
        drop(state);
        this.waiter = Some(waiter);
        Poll::Pending
    }
}

impl<T> Unpin for Send<'_, T> {}

/// Future returned by [`Channel::recv`].
pub struct Recv<'a, T> {
    channel: &'a Channel<T>,
    waiter: Option<Arc<RecvWaiter<T>>>,
}

impl<T> Future for Recv<'_, T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();

        if let Some(waiter) = &this.waiter {
            match waiter.outcome.load(Ordering::Acquire) {
                DELIVERED => return Poll::Ready(waiter.slot.lock().take()),
                CLOSED => return Poll::Ready(None),
                _ => {}
            }
            *waiter.waker.lock() = Some(cx.waker().clone());
            return match waiter.outcome.load(Ordering::Acquire) {
                DELIVERED => Poll::Ready(waiter.slot.lock().take()),
                CLOSED => Poll::Ready(None),
                _ => Poll::Pending,
            };
        }

        let mut state = this.channel.inner.lock();

        if let Some(value) = state.buffer.pop_front() {
            // A freed slot un-parks the head sender; moving its value into
            // the buffer keeps it full under back-pressure and preserves
            // send order.
            if let Some(sender) = state.senders.pop_front() {
                let shifted = sender.take();
                state.buffer.push_back(shifted);
            }
            return Poll::Ready(Some(value));
        }

        // Rendezvous: take straight from a parked sender.
        if let Some(sender) = state.senders.pop_front() {
            return Poll::Ready(Some(sender.take()));
        }

        if state.closed {
            return Poll::Ready(None);
        }

        let waiter = Arc::new(RecvWaiter {
            slot: PlMutex::new(None),
            outcome: AtomicU8::new(PENDING),
            waker: PlMutex::new(Some(cx.waker().clone())),
        });
        state.receivers.push_back(waiter.clone());
        drop(state);
        this.waiter = Some(waiter);
        Poll::Pending
    }
}

impl<T> Unpin for Recv<'_, T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate as weft;
    use crate::runtime::Builder;
    use std::collections::HashSet;
    use std::time::{Duration, Instant};

    #[weft::test(worker_threads = 2)]
    async fn buffered_send_recv_round_trip() {
        let channel = Channel::new(4);
        assert!(channel.send(7u32).await);
        assert_eq!(channel.recv().await, Some(7));
    }

    #[weft::test(worker_threads = 2)]
    async fn closed_channel_rejects_send_and_drains() {
        let channel = Channel::new(4);
        assert!(channel.send(1u32).await);
        channel.close();
        assert!(channel.is_closed());

        // Send fails, but the buffered value is still receivable.
        assert!(!channel.send(2).await);
        assert_eq!(channel.recv().await, Some(1));
        assert_eq!(channel.recv().await, None);
    }

    #[weft::test(worker_threads = 4)]
    async fn back_pressure_keeps_send_order() {
        let channel = Channel::<u32>::new(2);
        let producer = {
            let channel = channel.clone();
            weft::spawn(async move {
                for i in 0..64 {
                    assert!(channel.send(i).await);
                }
            })
        };

        let mut received = Vec::new();
        for _ in 0..64 {
            received.push(channel.recv().await.unwrap());
        }
        producer.await;

        assert_eq!(received, (0..64).collect::<Vec<_>>());
    }

    #[weft::test(worker_threads = 4)]
    async fn multiset_of_received_equals_sent() {
        const PRODUCERS: u32 = 4;
        const PER_PRODUCER: u32 = 250;

        let channel = Channel::<u32>::new(8);
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let channel = channel.clone();
                weft::spawn(async move {
                    for i in 0..PER_PRODUCER {
                        assert!(channel.send(p * PER_PRODUCER + i).await);
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let channel = channel.clone();
                weft::spawn(async move {
                    let mut got = Vec::new();
                    while let Some(v) = channel.recv().await {
                        got.push(v);
                    }
                    got
                })
            })
            .collect();

        for producer in producers {
            producer.await;
        }
        channel.close();

        let mut seen = HashSet::new();
        for consumer in consumers {
            for v in consumer.await {
                assert!(seen.insert(v), "value {v} received twice");
            }
        }
        assert_eq!(seen.len(), (PRODUCERS * PER_PRODUCER) as usize);
    }

    #[weft::test(worker_threads = 2)]
    async fn close_releases_a_blocked_receiver() {
        let channel = Channel::<u32>::new(0);
        let receiver = {
            let channel = channel.clone();
            weft::spawn(async move { channel.recv().await })
        };

        weft::spawn({
            let channel = channel.clone();
            async move {
                weft::time::sleep(Duration::from_millis(10)).await;
                channel.close();
            }
        });

        let start = Instant::now();
        assert_eq!(receiver.await, None);
        assert!(start.elapsed() < Duration::from_millis(500));
    }
}
