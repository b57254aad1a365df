//! Mock implementations for testing
//!
//! `MockBrokerClient` stands in for a broker connection: it records every
//! request and lets tests inject inbound publishes. `RecordingListener`
//! collects what a transport delivers.

use crate::protocol::{UMessage, UserProperties};
use crate::transport::UListener;
use crate::transport::mqtt::{
    BrokerClient, BrokerError, Completion, InboundCallback, InboundPublish, PublishRequest,
    SubscriptionRegistry,
};
use crate::transport::mqtt::broker::listener_id_of;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub type RecordedRequest = (String, UserProperties);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock broker client for testing
#[derive(Default)]
pub struct MockBrokerClient {
    published: Mutex<Vec<PublishRequest>>,
    subscriptions: Mutex<Vec<RecordedRequest>>,
    unsubscriptions: Mutex<Vec<RecordedRequest>>,
    registry: Mutex<SubscriptionRegistry>,
    should_fail: AtomicBool,
    disconnected: AtomicBool,
}

impl MockBrokerClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client whose every operation completes with an error
    pub fn with_failure() -> Self {
        let client = Self::default();
        client.set_should_fail(true);
        client
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::SeqCst);
    }

    fn outcome(&self) -> Result<(), BrokerError> {
        if self.should_fail.load(Ordering::SeqCst) {
            Err(BrokerError::Client("mock failure".to_string()))
        } else {
            Ok(())
        }
    }

    pub fn published(&self) -> Vec<PublishRequest> {
        lock(&self.published).clone()
    }

    /// Every SUBSCRIBE issued, as `(filter, user properties)`
    pub fn subscriptions(&self) -> Vec<RecordedRequest> {
        lock(&self.subscriptions).clone()
    }

    /// Every UNSUBSCRIBE issued, as `(filter, user properties)`
    pub fn unsubscriptions(&self) -> Vec<RecordedRequest> {
        lock(&self.unsubscriptions).clone()
    }

    /// Number of callbacks currently registered
    pub fn listener_count(&self) -> usize {
        lock(&self.registry).listener_count()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Simulate an inbound publish; returns how many callbacks saw it
    pub fn deliver(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        user_properties: UserProperties,
    ) -> usize {
        let publish = InboundPublish {
            topic: topic.to_string(),
            payload: payload.into(),
            user_properties,
        };
        let callbacks = lock(&self.registry).callbacks_for(&publish, &[]);
        for callback in &callbacks {
            callback(publish.clone());
        }
        callbacks.len()
    }

    pub fn clear_history(&self) {
        lock(&self.published).clear();
        lock(&self.subscriptions).clear();
        lock(&self.unsubscriptions).clear();
    }
}

impl BrokerClient for MockBrokerClient {
    fn publish(&self, request: PublishRequest) -> Completion {
        lock(&self.published).push(request);
        Completion::ready(self.outcome())
    }

    fn subscribe(
        &self,
        filter: &str,
        user_properties: UserProperties,
        on_message: InboundCallback,
    ) -> Completion {
        let outcome = self.outcome();
        if outcome.is_ok() {
            let listener_id = listener_id_of(&user_properties);
            lock(&self.registry).register(filter, listener_id, on_message);
        }
        lock(&self.subscriptions).push((filter.to_string(), user_properties));
        Completion::ready(outcome)
    }

    fn unsubscribe(&self, filter: &str, user_properties: UserProperties) -> Completion {
        let outcome = self.outcome();
        if outcome.is_ok() {
            let listener_id = listener_id_of(&user_properties);
            lock(&self.registry).unregister(filter, listener_id);
        }
        lock(&self.unsubscriptions).push((filter.to_string(), user_properties));
        Completion::ready(outcome)
    }

    fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
        lock(&self.registry).clear();
    }
}

/// Listener that keeps every message it receives
#[derive(Debug, Default)]
pub struct RecordingListener {
    received: Mutex<Vec<UMessage>>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> Vec<UMessage> {
        lock(&self.received).clone()
    }

    pub fn count(&self) -> usize {
        lock(&self.received).len()
    }
}

impl UListener for RecordingListener {
    fn on_receive(&self, message: UMessage) {
        lock(&self.received).push(message);
    }
}
