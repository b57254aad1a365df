//! Local bookkeeping of broker subscriptions
//!
//! Several listeners may share one topic filter. The broker only sees one
//! subscription per filter; inbound publishes fan out to every listener
//! registered on a matching filter.
//!
//! [`PendingSubscriptions`] follows each SUBSCRIBE from the request queue to
//! its SUBACK so a registration only completes once the broker granted it.

use super::broker::{CompletionSender, InboundCallback, InboundPublish};
use super::connection::BrokerError;
use super::message_handler::MessageHandler;
use std::collections::{HashMap, VecDeque};

/// Outcome of removing a `(filter, listenerId)` registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unregistration {
    /// No such registration existed
    NotRegistered,
    /// Removed; other listeners still use the filter
    ListenersRemaining(usize),
    /// Removed the last listener; the broker subscription can go
    FilterReleased,
}

struct FilterEntry {
    subscription_id: usize,
    listeners: Vec<(String, InboundCallback)>,
}

/// Filters in use and the callbacks registered on each
#[derive(Default)]
pub struct SubscriptionRegistry {
    filters: HashMap<String, FilterEntry>,
    last_subscription_id: usize,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback, replacing an earlier one with the same listener id
    ///
    /// Returns the MQTT subscription identifier assigned to the filter.
    pub fn register(
        &mut self,
        filter: &str,
        listener_id: &str,
        callback: InboundCallback,
    ) -> usize {
        let next_id = &mut self.last_subscription_id;
        let entry = self
            .filters
            .entry(filter.to_string())
            .or_insert_with(|| {
                *next_id += 1;
                FilterEntry {
                    subscription_id: *next_id,
                    listeners: Vec::new(),
                }
            });

        match entry
            .listeners
            .iter_mut()
            .find(|(id, _)| id == listener_id)
        {
            Some((_, existing)) => *existing = callback,
            None => entry.listeners.push((listener_id.to_string(), callback)),
        }
        entry.subscription_id
    }

    pub fn unregister(&mut self, filter: &str, listener_id: &str) -> Unregistration {
        let Some(entry) = self.filters.get_mut(filter) else {
            return Unregistration::NotRegistered;
        };

        let before = entry.listeners.len();
        entry.listeners.retain(|(id, _)| id != listener_id);
        if entry.listeners.len() == before {
            return Unregistration::NotRegistered;
        }

        if entry.listeners.is_empty() {
            self.filters.remove(filter);
            Unregistration::FilterReleased
        } else {
            Unregistration::ListenersRemaining(entry.listeners.len())
        }
    }

    /// True when `listener_id` is the only listener left on `filter`
    pub fn is_last_listener(&self, filter: &str, listener_id: &str) -> bool {
        self.filters.get(filter).is_some_and(|entry| {
            entry.listeners.len() == 1 && entry.listeners[0].0 == listener_id
        })
    }

    /// Every filter with its subscription identifier, for resubscribing
    pub fn active_filters(&self) -> Vec<(String, usize)> {
        self.filters
            .iter()
            .map(|(filter, entry)| (filter.clone(), entry.subscription_id))
            .collect()
    }

    /// Callbacks that should see `publish`
    ///
    /// Broker-supplied subscription identifiers select filters directly; when
    /// there are none the topic is matched against each filter.
    pub fn callbacks_for(
        &self,
        publish: &InboundPublish,
        subscription_ids: &[usize],
    ) -> Vec<InboundCallback> {
        self.filters
            .iter()
            .filter(|(filter, entry)| {
                if subscription_ids.is_empty() {
                    MessageHandler::topic_matches_filter(filter, &publish.topic)
                } else {
                    subscription_ids.contains(&entry.subscription_id)
                }
            })
            .flat_map(|(_, entry)| entry.listeners.iter().map(|(_, cb)| cb.clone()))
            .collect()
    }

    pub fn listener_count(&self) -> usize {
        self.filters.values().map(|entry| entry.listeners.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }
}

/// A caller waiting for the broker to grant its registration
#[derive(Debug)]
pub struct SubscribeWaiter {
    pub filter: String,
    pub listener_id: String,
    pub completion: CompletionSender,
}

impl SubscribeWaiter {
    pub fn resolve(self, result: Result<(), BrokerError>) {
        let _ = self.completion.send(result);
    }
}

/// One SUBSCRIBE packet and the registrations that depend on it
///
/// Resubscriptions after a reconnect carry the waiters whose SUBACK was lost
/// with the old connection, or none at all.
#[derive(Debug)]
pub struct PendingSubscribe {
    pub filter: String,
    pub waiters: Vec<SubscribeWaiter>,
}

impl PendingSubscribe {
    pub fn resolve(self, result: Result<(), BrokerError>) {
        for waiter in self.waiters {
            waiter.resolve(result.clone());
        }
    }
}

/// SUBSCRIBE packets between the request queue and their SUBACK
///
/// rumqttc writes requests in queue order and reports each written SUBSCRIBE
/// with its packet id, so `queued` is matched front to back against those
/// reports. Acknowledgements are matched by packet id.
#[derive(Debug, Default)]
pub struct PendingSubscriptions {
    queued: VecDeque<PendingSubscribe>,
    in_flight: VecDeque<(u16, PendingSubscribe)>,
    orphaned: Vec<SubscribeWaiter>,
}

impl PendingSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a SUBSCRIBE just handed to the request queue
    pub fn queue(&mut self, pending: PendingSubscribe) {
        self.queued.push_back(pending);
    }

    /// Take back the most recent entry after the request queue refused it
    pub fn unqueue_last(&mut self) -> Option<PendingSubscribe> {
        self.queued.pop_back()
    }

    /// The next queued SUBSCRIBE was written with `packet_id`
    pub fn sent(&mut self, packet_id: u16) -> bool {
        match self.queued.pop_front() {
            Some(pending) => {
                self.in_flight.push_back((packet_id, pending));
                true
            }
            None => false,
        }
    }

    /// The broker granted the SUBSCRIBE with `packet_id`
    pub fn acknowledged(&mut self, packet_id: u16) -> Option<PendingSubscribe> {
        let position = self
            .in_flight
            .iter()
            .position(|(id, _)| *id == packet_id)?;
        self.in_flight.remove(position).map(|(_, pending)| pending)
    }

    /// The broker refused the oldest unacknowledged SUBSCRIBE
    pub fn rejected(&mut self) -> Option<PendingSubscribe> {
        self.in_flight.pop_front().map(|(_, pending)| pending)
    }

    /// The connection dropped; unacknowledged waiters wait for the resubscribe
    ///
    /// Queued requests survive because rumqttc replays its request queue.
    pub fn connection_lost(&mut self) {
        for (_, pending) in self.in_flight.drain(..) {
            self.orphaned.extend(pending.waiters);
        }
    }

    /// Waiters whose SUBACK for `filter` was lost with the previous connection
    pub fn take_orphans(&mut self, filter: &str) -> Vec<SubscribeWaiter> {
        let (matching, rest) = std::mem::take(&mut self.orphaned)
            .into_iter()
            .partition(|waiter| waiter.filter == filter);
        self.orphaned = rest;
        matching
    }

    /// Waiters left over once every active filter has been resubscribed
    pub fn drain_orphans(&mut self) -> Vec<SubscribeWaiter> {
        std::mem::take(&mut self.orphaned)
    }

    pub fn is_empty(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_empty() && self.orphaned.is_empty()
    }
}
