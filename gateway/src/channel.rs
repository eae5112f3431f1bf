//! Bounded transactional channel between sources and sinks
//!
//! A [`Channel`] is the only object shared between a source task and a
//! sink task. It holds events in FIFO order up to a fixed capacity.
//!
//! # Transactions
//!
//! ```text
//! put ──► [queue] ──take──► Delivery ──commit──► gone
//!            ▲                  │
//!            └────rollback──────┘
//! ```
//!
//! A taken event still counts as pending until its [`Delivery`] is
//! committed, so the shutdown drain only sees an empty channel once a
//! sink has finished with every event. Rolled-back events go back to the
//! front of the queue and are redelivered first.

use crate::error::ChannelError;
use crate::metrics::Metrics;
use cygnet_core::{ComponentKind, Event, Lifecycle, LifecycleState};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tracing::{debug, info};

/// What `put` does when the channel is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Wait until a sink frees a slot
    #[default]
    Block,
    /// Fail immediately with [`ChannelError::Full`]
    Reject,
}

struct ChannelState {
    queue: VecDeque<Event>,
    in_flight: usize,
    closed: bool,
}

impl ChannelState {
    fn pending(&self) -> usize {
        self.queue.len() + self.in_flight
    }
}

/// Counters for channel monitoring
#[derive(Default)]
pub struct ChannelCounters {
    /// Events accepted by `put`
    pub put: AtomicU64,
    /// Deliveries committed
    pub committed: AtomicU64,
    /// Deliveries rolled back
    pub rolled_back: AtomicU64,
}

/// Bounded FIFO of events with transactional take
pub struct Channel {
    name: String,
    capacity: usize,
    policy: OverflowPolicy,
    lifecycle: Lifecycle,
    state: Mutex<ChannelState>,
    not_empty: Notify,
    not_full: Notify,
    counters: ChannelCounters,
}

impl Channel {
    /// Create a channel holding at most `capacity` pending events
    pub fn new(name: impl Into<String>, capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            name: name.into(),
            capacity,
            policy,
            lifecycle: Lifecycle::new(),
            state: Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(capacity.min(4096)),
                in_flight: 0,
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            counters: ChannelCounters::default(),
        }
    }

    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Always [`ComponentKind::Channel`]
    pub fn kind(&self) -> ComponentKind {
        ComponentKind::Channel
    }

    /// Maximum number of pending events
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflow behaviour
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    /// Monitoring counters
    pub fn counters(&self) -> &ChannelCounters {
        &self.counters
    }

    /// Events queued plus events taken but not yet committed
    pub fn pending(&self) -> usize {
        self.state.lock().pending()
    }

    /// Whether nothing is pending
    pub fn is_drained(&self) -> bool {
        self.pending() == 0
    }

    /// Mark the channel running
    pub fn start(&self) -> Result<(), crate::error::ComponentStartError> {
        self.lifecycle
            .transition(LifecycleState::Starting)
            .and_then(|_| self.lifecycle.transition(LifecycleState::Running))
            .map_err(|e| {
                crate::error::ComponentStartError::new(&self.name, ComponentKind::Channel, e)
            })?;
        if let Some(metrics) = Metrics::get() {
            metrics.set_channel_capacity(&self.name, self.capacity);
        }
        info!(channel = %self.name, capacity = self.capacity, policy = ?self.policy, "Channel started");
        Ok(())
    }

    /// Close the channel
    ///
    /// Further puts fail. Takers keep receiving queued events and get
    /// `None` once the queue is empty.
    pub fn stop(&self) {
        let before = self.state();
        if before == LifecycleState::Idle {
            let _ = self.lifecycle.transition(LifecycleState::Stopped);
        } else if self.lifecycle.transition(LifecycleState::Stopping).is_ok() {
            let _ = self.lifecycle.transition(LifecycleState::Stopped);
        } else {
            return;
        }

        let pending = {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending()
        };
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
        info!(
            channel = %self.name,
            state = %before,
            pending,
            put = self.counters.put.load(Ordering::Relaxed),
            committed = self.counters.committed.load(Ordering::Relaxed),
            rolled_back = self.counters.rolled_back.load(Ordering::Relaxed),
            "Channel stopped"
        );
    }

    /// Put an event at the back of the queue
    ///
    /// With [`OverflowPolicy::Block`] this waits for space; with
    /// [`OverflowPolicy::Reject`] it fails at once when full.
    pub async fn put(&self, event: Event) -> Result<(), ChannelError> {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(ChannelError::Closed {
                        channel: self.name.clone(),
                    });
                }
                if state.pending() < self.capacity {
                    state.queue.push_back(event);
                    let pending = state.pending();
                    drop(state);
                    self.counters.put.fetch_add(1, Ordering::Relaxed);
                    self.record_pending(pending);
                    self.not_empty.notify_one();
                    return Ok(());
                }
                if self.policy == OverflowPolicy::Reject {
                    return Err(ChannelError::Full {
                        channel: self.name.clone(),
                        capacity: self.capacity,
                    });
                }
            }

            debug!(channel = %self.name, "Channel full, waiting for space");
            notified.await;
        }
    }

    /// Put without waiting, regardless of policy
    pub fn try_put(&self, event: Event) -> Result<(), ChannelError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ChannelError::Closed {
                channel: self.name.clone(),
            });
        }
        if state.pending() >= self.capacity {
            return Err(ChannelError::Full {
                channel: self.name.clone(),
                capacity: self.capacity,
            });
        }
        state.queue.push_back(event);
        let pending = state.pending();
        drop(state);
        self.counters.put.fetch_add(1, Ordering::Relaxed);
        self.record_pending(pending);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Take the oldest event, waiting while the channel is empty
    ///
    /// Returns `None` once the channel is closed and empty. Cancelling the
    /// returned future never loses an event.
    pub async fn take(self: &Arc<Self>) -> Option<Delivery> {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(delivery) = self.try_take() {
                return Some(delivery);
            }
            if self.state.lock().closed {
                return None;
            }

            notified.await;
        }
    }

    /// Take the oldest event if one is queued
    pub fn try_take(self: &Arc<Self>) -> Option<Delivery> {
        let mut state = self.state.lock();
        let event = state.queue.pop_front()?;
        state.in_flight += 1;
        Some(Delivery {
            channel: Arc::clone(self),
            event: Some(event),
        })
    }

    fn settle(&self, requeue: Option<Event>) {
        let pending = {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            if let Some(event) = requeue {
                state.queue.push_front(event);
            }
            state.pending()
        };
        self.record_pending(pending);
    }

    fn record_pending(&self, pending: usize) {
        if let Some(metrics) = Metrics::get() {
            metrics.set_channel_pending(&self.name, pending);
        }
    }
}

/// An event taken from a channel, pending until committed
///
/// Dropping a delivery without committing rolls it back.
pub struct Delivery {
    channel: Arc<Channel>,
    event: Option<Event>,
}

impl Delivery {
    /// The taken event
    pub fn event(&self) -> &Event {
        // `event` is only None after commit/rollback consumed self
        match &self.event {
            Some(event) => event,
            None => unreachable!("delivery already settled"),
        }
    }

    /// Name of the channel the event came from
    pub fn channel(&self) -> &str {
        self.channel.name()
    }

    /// Remove the event from the channel for good
    pub fn commit(mut self) {
        self.event = None;
        self.channel.settle(None);
        self.channel.counters.committed.fetch_add(1, Ordering::Relaxed);
        self.channel.not_full.notify_one();
    }

    /// Return the event to the front of the channel
    pub fn rollback(mut self) {
        let event = self.event.take();
        self.requeue(event);
    }

    fn requeue(&self, event: Option<Event>) {
        self.channel.settle(event);
        self.channel
            .counters
            .rolled_back
            .fetch_add(1, Ordering::Relaxed);
        self.channel.not_empty.notify_one();
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(event) = self.event.take() {
            self.requeue(Some(event));
        }
    }
}
