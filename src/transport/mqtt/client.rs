//! rumqttc-backed broker client
//!
//! Owns the rumqttc event loop on a supervisor task that tracks connection
//! state, retries with backoff, restores subscriptions after every CONNACK and
//! fans inbound publishes out to registered callbacks.
//!
//! A subscribe completes when the broker grants it in a SUBACK. rumqttc
//! reports a refused SUBACK as a poll error, which fails the oldest
//! unacknowledged SUBSCRIBE and drops its listeners.

use super::broker::{
    BrokerClient, Completion, InboundCallback, InboundPublish, PublishRequest, listener_id_of,
};
use super::connection::{BrokerError, ConnectionState, ReconnectConfig, configure_mqtt_options};
use super::health_monitor::{ConnectionEvent, HealthMonitor, ReconnectionDecision};
use super::message_handler::{EventRoute, MessageHandler};
use super::subscriptions::{
    PendingSubscribe, PendingSubscriptions, SubscribeWaiter, SubscriptionRegistry, Unregistration,
};
use crate::config::MqttSection;
use crate::protocol::UserProperties;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::mqttbytes::v5::{PublishProperties, SubscribeProperties, UnsubscribeProperties};
use rumqttc::v5::{AsyncClient, ConnectionError, EventLoop};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, trace, warn};

type SharedRegistry = Arc<RwLock<SubscriptionRegistry>>;
type SharedPending = Arc<Mutex<PendingSubscriptions>>;

/// MQTT5 broker client built on rumqttc
pub struct RumqttcBroker {
    client: AsyncClient,
    subscriptions: SharedRegistry,
    pending: SharedPending,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl RumqttcBroker {
    /// Connect and wait for the first CONNACK
    pub async fn connect(config: &MqttSection) -> Result<Self, BrokerError> {
        HealthMonitor::validate_reconnect_config(&config.reconnect)
            .map_err(BrokerError::ConnectionFailed)?;
        let mqtt_options = configure_mqtt_options(config)?;
        let (client, event_loop) =
            AsyncClient::new(mqtt_options, config.request_channel_capacity);

        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) = Self::setup_connection_channels();
        let subscriptions: SharedRegistry = Arc::new(RwLock::new(SubscriptionRegistry::new()));
        let pending: SharedPending = Arc::new(Mutex::new(PendingSubscriptions::new()));

        info!(
            broker_url = %config.broker_url,
            max_reconnect_ms = ?config.reconnect.calculate_max_total_time(),
            "Starting MQTT event loop"
        );
        let handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            client.clone(),
            subscriptions.clone(),
            pending.clone(),
            state_tx,
            shutdown_rx,
            config.reconnect.clone(),
        ));

        let broker = Self {
            client,
            subscriptions,
            pending,
            state_rx: state_rx.clone(),
            shutdown_tx,
            event_loop_handle: Mutex::new(Some(handle)),
        };

        Self::wait_for_connection_confirmation(
            state_rx,
            Duration::from_millis(config.connect_timeout_ms),
        )
        .instrument(crate::mqtt_span!(operation = "connect", broker_url = %config.broker_url))
        .await?;

        Ok(broker)
    }

    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        (
            watch::channel(ConnectionState::Connecting),
            watch::channel(false),
        )
    }

    /// Wait until the supervisor reports `Connected`
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<ConnectionState>,
        timeout: Duration,
    ) -> Result<(), BrokerError> {
        let wait = async {
            loop {
                let state = state_rx.borrow_and_update().clone();
                match state {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Disconnected(reason) => {
                        return Err(BrokerError::ConnectionFailed(reason));
                    }
                    ConnectionState::PermanentlyDisconnected(reason) => {
                        return Err(BrokerError::ConnectionFailed(format!(
                            "Permanently disconnected: {reason}"
                        )));
                    }
                    ConnectionState::Connecting | ConnectionState::Reconnecting(_) => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(BrokerError::ConnectionFailed(
                        "State channel closed".to_string(),
                    ));
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or_else(|_| {
                Err(BrokerError::ConnectionFailed(
                    "ConnAck timeout - no connection confirmation received".to_string(),
                ))
            })
    }

    async fn run_event_loop(
        mut event_loop: EventLoop,
        client: AsyncClient,
        subscriptions: SharedRegistry,
        pending: SharedPending,
        state_tx: watch::Sender<ConnectionState>,
        mut shutdown_rx: watch::Receiver<bool>,
        reconnect_config: ReconnectConfig,
    ) {
        let mut reconnect_attempts = 0u32;

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping MQTT event loop");
                        break;
                    }
                }
                event = event_loop.poll() => match event {
                    Ok(event) => {
                        let route = MessageHandler::route_mqtt_event(&event);
                        Self::process_event_route(
                            route,
                            &client,
                            &subscriptions,
                            &pending,
                            &state_tx,
                            &mut reconnect_attempts,
                        );
                    }
                    Err(e) => {
                        Self::handle_poll_error(&e, &subscriptions, &pending);
                        Self::transition(&state_tx, ConnectionEvent::NetworkError(e.to_string()));
                        if !Self::handle_reconnection(
                            &mut reconnect_attempts,
                            &reconnect_config,
                            &state_tx,
                            shutdown_rx.clone(),
                        )
                        .await
                        {
                            break;
                        }
                    }
                }
            }
        }
        info!("MQTT event loop stopped");
    }

    fn process_event_route(
        route: EventRoute,
        client: &AsyncClient,
        subscriptions: &SharedRegistry,
        pending: &SharedPending,
        state_tx: &watch::Sender<ConnectionState>,
        reconnect_attempts: &mut u32,
    ) {
        match route {
            EventRoute::ConnectionAcknowledged => {
                Self::transition(state_tx, ConnectionEvent::ConnAckReceived);
                *reconnect_attempts = 0;
                Self::resubscribe(client, subscriptions, pending);
            }
            EventRoute::MessageReceived {
                publish,
                subscription_ids,
            } => Self::dispatch(subscriptions, publish, &subscription_ids),
            EventRoute::Disconnected => {
                // the next poll reconnects; errors on that poll drive the backoff
                Self::transition(state_tx, ConnectionEvent::DisconnectedByBroker);
            }
            EventRoute::SubscribeSent { packet_id } => {
                if !lock(pending).sent(packet_id) {
                    trace!(packet_id, "SUBSCRIBE without a tracked request");
                }
            }
            EventRoute::SubscriptionConfirmed { packet_id, granted } => {
                let Some(confirmed) = lock(pending).acknowledged(packet_id) else {
                    debug!(packet_id, "SUBACK for an untracked request");
                    return;
                };
                if granted {
                    debug!(packet_id, filter = %confirmed.filter, "Subscription confirmed");
                    confirmed.resolve(Ok(()));
                } else {
                    Self::reject_subscription(subscriptions, confirmed, "refused in SUBACK".into());
                }
            }
            EventRoute::InfrastructureEvent(event) => trace!("MQTT event: {}", event),
            EventRoute::OutgoingEvent => {}
        }
    }

    /// Settle pending subscriptions after the event loop lost its connection
    fn handle_poll_error(
        error: &ConnectionError,
        subscriptions: &SharedRegistry,
        pending: &SharedPending,
    ) {
        let refused = {
            let mut pending = lock(pending);
            let refused = MessageHandler::subscribe_refusal(error)
                .and_then(|reason| pending.rejected().map(|entry| (entry, reason)));
            pending.connection_lost();
            refused
        };

        if let Some((entry, reason)) = refused {
            Self::reject_subscription(subscriptions, entry, reason);
        }
    }

    fn reject_subscription(subscriptions: &SharedRegistry, entry: PendingSubscribe, reason: String) {
        warn!(filter = %entry.filter, reason = %reason, "Broker refused subscription");
        Self::drop_listeners(subscriptions, &entry.waiters);
        entry.resolve(Err(BrokerError::SubscriptionRejected(reason)));
    }

    fn drop_listeners(subscriptions: &SharedRegistry, waiters: &[SubscribeWaiter]) {
        let mut registry = subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for waiter in waiters {
            registry.unregister(&waiter.filter, &waiter.listener_id);
        }
    }

    fn transition(state_tx: &watch::Sender<ConnectionState>, event: ConnectionEvent) {
        let next = HealthMonitor::determine_next_state(event);
        state_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            HealthMonitor::log_state_transition(current, &next);
            *current = next;
            true
        });
    }

    /// Returns false when the supervisor should stop
    async fn handle_reconnection(
        reconnect_attempts: &mut u32,
        reconnect_config: &ReconnectConfig,
        state_tx: &watch::Sender<ConnectionState>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> bool {
        let decision = HealthMonitor::should_attempt_reconnection(
            *reconnect_attempts,
            reconnect_config,
            *shutdown_rx.borrow(),
        );

        match decision {
            ReconnectionDecision::Proceed { attempt, delay_ms } => {
                *reconnect_attempts = attempt;
                Self::transition(state_tx, ConnectionEvent::ReconnectionStarted(attempt));
                debug!(attempt, delay_ms, "Waiting before reconnecting");
                Self::interruptible_sleep(shutdown_rx, delay_ms).await
            }
            ReconnectionDecision::AbortShutdownRequested => false,
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                let reason = format!("Max reconnection attempts ({reconnect_attempts}) exceeded");
                Self::transition(state_tx, ConnectionEvent::PermanentFailure(reason));
                false
            }
        }
    }

    /// Returns true if the sleep completed, false if shutdown was requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            changed = shutdown_rx.changed() => changed.is_ok() && !*shutdown_rx.borrow(),
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => true,
        }
    }

    /// Restore every active filter; callers whose SUBACK was lost wait on the new one
    fn resubscribe(client: &AsyncClient, subscriptions: &SharedRegistry, pending: &SharedPending) {
        let filters = subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .active_filters();

        let mut failed = Vec::new();
        let stale = {
            let mut pending = lock(pending);
            for (filter, subscription_id) in filters {
                let waiters = pending.take_orphans(&filter);
                pending.queue(PendingSubscribe {
                    filter: filter.clone(),
                    waiters,
                });
                let properties = SubscribeProperties {
                    id: Some(subscription_id),
                    user_properties: Vec::new(),
                };
                match client.try_subscribe_with_properties(&filter, QoS::AtLeastOnce, properties) {
                    Ok(()) => debug!(filter = %filter, "Re-subscribed"),
                    Err(e) => {
                        error!(filter = %filter, error = %e, "Failed to re-subscribe");
                        failed.extend(pending.unqueue_last().map(|entry| (entry, e.to_string())));
                    }
                }
            }
            pending.drain_orphans()
        };

        for (entry, reason) in failed {
            Self::drop_listeners(subscriptions, &entry.waiters);
            entry.resolve(Err(BrokerError::Client(reason)));
        }
        for waiter in stale {
            waiter.resolve(Err(BrokerError::ConnectionFailed(
                "Connection lost before the subscription was confirmed".to_string(),
            )));
        }
    }

    fn dispatch(subscriptions: &SharedRegistry, publish: InboundPublish, subscription_ids: &[usize]) {
        let callbacks = subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks_for(&publish, subscription_ids);

        if callbacks.is_empty() {
            debug!(topic = %publish.topic, "No listener for inbound publish");
            return;
        }
        for callback in callbacks {
            callback(publish.clone());
        }
    }

    /// Current connection state as seen by the supervisor
    pub fn connection_state(&self) -> ConnectionState {
        self.state_rx.borrow().clone()
    }

    pub fn is_permanently_disconnected(&self) -> bool {
        HealthMonitor::is_terminal(&self.state_rx.borrow())
    }

    fn check_connection_state(&self) -> Result<(), BrokerError> {
        let state = self.state_rx.borrow();
        if HealthMonitor::can_issue_requests(&state) {
            Ok(())
        } else {
            Err(BrokerError::NotConnected {
                state: state.clone(),
            })
        }
    }

    /// Run a client request on the runtime and resolve its completion
    fn spawn_request<F>(&self, request: F) -> Completion
    where
        F: std::future::Future<Output = Result<(), rumqttc::v5::ClientError>> + Send + 'static,
    {
        let (tx, completion) = Completion::channel();
        tokio::spawn(async move {
            let result = request
                .await
                .map_err(|e| BrokerError::Client(e.to_string()));
            let _ = tx.send(result);
        });
        completion
    }

    fn registry(&self) -> std::sync::RwLockWriteGuard<'_, SubscriptionRegistry> {
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// A client whose event loop is never polled, in the given state
    #[cfg(test)]
    fn offline(state: ConnectionState) -> (Self, watch::Sender<ConnectionState>, EventLoop) {
        let options = rumqttc::v5::MqttOptions::new("offline-test", "localhost", 1883);
        let (client, event_loop) = AsyncClient::new(options, 10);
        let (state_tx, state_rx) = watch::channel(state);
        let (shutdown_tx, _) = watch::channel(false);
        let broker = Self {
            client,
            subscriptions: Arc::new(RwLock::new(SubscriptionRegistry::new())),
            pending: Arc::new(Mutex::new(PendingSubscriptions::new())),
            state_rx,
            shutdown_tx,
            event_loop_handle: Mutex::new(None),
        };
        (broker, state_tx, event_loop)
    }
}

fn lock(pending: &SharedPending) -> std::sync::MutexGuard<'_, PendingSubscriptions> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

impl BrokerClient for RumqttcBroker {
    fn publish(&self, request: PublishRequest) -> Completion {
        if let Err(e) = self.check_connection_state() {
            return Completion::ready(Err(e));
        }

        let properties = PublishProperties {
            message_expiry_interval: request.message_expiry_interval,
            user_properties: request.user_properties,
            ..Default::default()
        };
        let client = self.client.clone();
        debug!(topic = %request.topic, "Publishing");
        self.spawn_request(async move {
            client
                .publish_with_properties(
                    request.topic,
                    QoS::AtLeastOnce,
                    false,
                    request.payload,
                    properties,
                )
                .await
        })
    }

    fn subscribe(
        &self,
        filter: &str,
        user_properties: UserProperties,
        on_message: InboundCallback,
    ) -> Completion {
        if let Err(e) = self.check_connection_state() {
            return Completion::ready(Err(e));
        }

        let listener_id = listener_id_of(&user_properties).to_string();
        let subscription_id = self.registry().register(filter, &listener_id, on_message);
        let properties = SubscribeProperties {
            id: Some(subscription_id),
            user_properties,
        };

        let (completion_tx, completion) = Completion::channel();
        let waiter = SubscribeWaiter {
            filter: filter.to_string(),
            listener_id: listener_id.clone(),
            completion: completion_tx,
        };
        debug!(filter = %filter, listener_id = %listener_id, "Subscribing");

        // queued under the lock so the event loop cannot report the write first
        let queued = {
            let mut pending = lock(&self.pending);
            pending.queue(PendingSubscribe {
                filter: filter.to_string(),
                waiters: vec![waiter],
            });
            let queued = self
                .client
                .try_subscribe_with_properties(filter, QoS::AtLeastOnce, properties);
            if queued.is_err() {
                pending.unqueue_last();
            }
            queued
        };

        match queued {
            Ok(()) => completion,
            Err(e) => {
                self.registry().unregister(filter, &listener_id);
                Completion::ready(Err(BrokerError::Client(e.to_string())))
            }
        }
    }

    fn unsubscribe(&self, filter: &str, user_properties: UserProperties) -> Completion {
        let listener_id = listener_id_of(&user_properties).to_string();
        if let Err(e) = self.check_connection_state() {
            return Completion::ready(Err(e));
        }

        let mut registry = self.registry();
        if !registry.is_last_listener(filter, &listener_id) {
            match registry.unregister(filter, &listener_id) {
                Unregistration::NotRegistered => {
                    debug!(filter = %filter, listener_id = %listener_id, "Unsubscribe for unknown listener");
                }
                Unregistration::ListenersRemaining(remaining) => {
                    debug!(filter = %filter, remaining, "Filter still in use, keeping subscription");
                }
                Unregistration::FilterReleased => {}
            }
            return Completion::ready(Ok(()));
        }

        debug!(filter = %filter, "Unsubscribing");
        let properties = UnsubscribeProperties { user_properties };
        if let Err(e) = self.client.try_unsubscribe_with_properties(filter, properties) {
            return Completion::ready(Err(BrokerError::Client(e.to_string())));
        }
        registry.unregister(filter, &listener_id);
        Completion::ready(Ok(()))
    }

    fn disconnect(&self) {
        info!("Disconnecting from MQTT broker");
        self.registry().clear();
        // unresolved subscribes complete as cancelled
        *lock(&self.pending) = PendingSubscriptions::new();
        if let Err(e) = self.client.try_disconnect() {
            warn!(error = %e, "Failed to queue DISCONNECT");
        }
        // let the event loop flush the DISCONNECT before stopping it
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = shutdown_tx.send(true);
        });
    }
}

impl Drop for RumqttcBroker {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);

        let handle = self
            .event_loop_handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_connection_channels() {
        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            RumqttcBroker::setup_connection_channels();

        assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);
        assert!(!*shutdown_rx.borrow());

        state_tx.send(ConnectionState::Connected).unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);

        shutdown_tx.send(true).unwrap();
        assert!(*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_success() {
        let ((state_tx, state_rx), _) = RumqttcBroker::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Connected);
        });

        let result =
            RumqttcBroker::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_already_connected() {
        let ((state_tx, state_rx), _) = RumqttcBroker::setup_connection_channels();
        state_tx.send(ConnectionState::Connected).unwrap();

        let result =
            RumqttcBroker::wait_for_connection_confirmation(state_rx, Duration::from_millis(10))
                .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_timeout() {
        let ((state_tx, state_rx), _) = RumqttcBroker::setup_connection_channels();

        let result =
            RumqttcBroker::wait_for_connection_confirmation(state_rx, Duration::from_millis(10))
                .await;
        drop(state_tx);

        let err = result.unwrap_err().to_string();
        assert!(err.contains("ConnAck"), "{err}");
    }

    #[tokio::test]
    async fn test_wait_for_connection_confirmation_disconnected() {
        let ((state_tx, state_rx), _) = RumqttcBroker::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = state_tx.send(ConnectionState::Disconnected("Test disconnect".to_string()));
        });

        let result =
            RumqttcBroker::wait_for_connection_confirmation(state_rx, Duration::from_millis(500))
                .await;
        assert!(result.unwrap_err().to_string().contains("Test disconnect"));
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_, (_shutdown_tx, shutdown_rx)) = RumqttcBroker::setup_connection_channels();
        assert!(RumqttcBroker::interruptible_sleep(shutdown_rx, 5).await);
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (_, (shutdown_tx, shutdown_rx)) = RumqttcBroker::setup_connection_channels();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        let completed = RumqttcBroker::interruptible_sleep(shutdown_rx, 5_000).await;
        assert!(!completed);
    }

    #[tokio::test]
    async fn test_reconnection_gives_up_after_max_attempts() {
        let ((state_tx, state_rx), (_shutdown_tx, shutdown_rx)) =
            RumqttcBroker::setup_connection_channels();
        let config = ReconnectConfig {
            max_attempts: Some(1),
            backoff_pattern: vec![1],
            sustained_delay: 1,
        };
        let mut attempts = 0;

        assert!(
            RumqttcBroker::handle_reconnection(&mut attempts, &config, &state_tx, shutdown_rx.clone())
                .await
        );
        assert_eq!(*state_rx.borrow(), ConnectionState::Reconnecting(1));

        assert!(
            !RumqttcBroker::handle_reconnection(&mut attempts, &config, &state_tx, shutdown_rx)
                .await
        );
        assert!(HealthMonitor::is_terminal(&state_rx.borrow()));
    }

    #[test]
    fn test_dispatch_reaches_registered_callbacks() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let subscriptions: SharedRegistry = Arc::new(RwLock::new(SubscriptionRegistry::new()));
        let received = Arc::new(AtomicUsize::new(0));
        let counter = received.clone();
        subscriptions.write().unwrap().register(
            "d/+/+/+/+/+/+/+/+",
            "1",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let publish = InboundPublish {
            topic: "d/device1/0100/01/8000////".to_string(),
            payload: bytes::Bytes::from_static(b"x"),
            user_properties: Vec::new(),
        };
        RumqttcBroker::dispatch(&subscriptions, publish.clone(), &[]);
        RumqttcBroker::dispatch(&subscriptions, publish, &[99]);
        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    fn listener(id: &str) -> UserProperties {
        vec![(
            crate::transport::mqtt::LISTENER_ID_PROPERTY.to_string(),
            id.to_string(),
        )]
    }

    fn ignore() -> InboundCallback {
        Arc::new(|_| {})
    }

    #[tokio::test]
    async fn test_subscribe_completes_only_when_granted() {
        use futures::FutureExt;
        use rumqttc::v5::StateError;
        use rumqttc::v5::mqttbytes::v5::SubscribeReasonCode;

        let (broker, state_tx, _event_loop) = RumqttcBroker::offline(ConnectionState::Connected);
        let mut granted = broker.subscribe("a/+", listener("1"), ignore());
        let mut refused = broker.subscribe("b/+", listener("2"), ignore());
        let mut attempts = 0;
        for packet_id in [1, 2] {
            RumqttcBroker::process_event_route(
                EventRoute::SubscribeSent { packet_id },
                &broker.client,
                &broker.subscriptions,
                &broker.pending,
                &state_tx,
                &mut attempts,
            );
        }

        // written but not yet acknowledged
        assert!((&mut granted).now_or_never().is_none());
        assert!((&mut refused).now_or_never().is_none());

        RumqttcBroker::process_event_route(
            EventRoute::SubscriptionConfirmed {
                packet_id: 1,
                granted: true,
            },
            &broker.client,
            &broker.subscriptions,
            &broker.pending,
            &state_tx,
            &mut attempts,
        );
        assert_eq!(granted.await, Ok(()));

        let error = rumqttc::v5::ConnectionError::MqttState(StateError::SubFail {
            reason: SubscribeReasonCode::NotAuthorized,
        });
        RumqttcBroker::handle_poll_error(&error, &broker.subscriptions, &broker.pending);
        assert_eq!(
            refused.await,
            Err(BrokerError::SubscriptionRejected("NotAuthorized".to_string()))
        );

        let filters = broker.subscriptions.read().unwrap().active_filters();
        assert_eq!(filters.len(), 1);
        assert_eq!(filters[0].0, "a/+");
    }

    #[tokio::test]
    async fn test_subscription_lost_with_connection_waits_for_resubscribe() {
        use futures::FutureExt;

        let (broker, state_tx, _event_loop) = RumqttcBroker::offline(ConnectionState::Connected);
        let mut completion = broker.subscribe("a/+", listener("1"), ignore());
        let route = |route| {
            let mut attempts = 0;
            RumqttcBroker::process_event_route(
                route,
                &broker.client,
                &broker.subscriptions,
                &broker.pending,
                &state_tx,
                &mut attempts,
            );
        };
        route(EventRoute::SubscribeSent { packet_id: 1 });

        RumqttcBroker::handle_poll_error(
            &rumqttc::v5::ConnectionError::RequestsDone,
            &broker.subscriptions,
            &broker.pending,
        );
        assert!((&mut completion).now_or_never().is_none());

        route(EventRoute::ConnectionAcknowledged);
        route(EventRoute::SubscribeSent { packet_id: 1 });
        route(EventRoute::SubscriptionConfirmed {
            packet_id: 1,
            granted: true,
        });
        assert_eq!(completion.await, Ok(()));
        assert!(lock(&broker.pending).is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_while_disconnected_keeps_listener() {
        let (broker, state_tx, _event_loop) = RumqttcBroker::offline(ConnectionState::Connected);
        broker.registry().register("a/+", "1", ignore());
        state_tx.send(ConnectionState::Reconnecting(1)).unwrap();

        let result = broker.unsubscribe("a/+", listener("1")).await;
        assert!(matches!(result, Err(BrokerError::NotConnected { .. })));
        assert_eq!(broker.subscriptions.read().unwrap().listener_count(), 1);

        state_tx.send(ConnectionState::Connected).unwrap();
        assert_eq!(broker.unsubscribe("a/+", listener("1")).await, Ok(()));
        assert!(broker.subscriptions.read().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shared_filter_unsubscribe_keeps_remaining_listener() {
        let (broker, _state_tx, _event_loop) = RumqttcBroker::offline(ConnectionState::Connected);
        broker.registry().register("a/+", "1", ignore());
        broker.registry().register("a/+", "2", ignore());

        assert_eq!(broker.unsubscribe("a/+", listener("1")).await, Ok(()));
        assert_eq!(broker.subscriptions.read().unwrap().listener_count(), 1);
        assert_eq!(broker.unsubscribe("a/+", listener("9")).await, Ok(()));
        assert_eq!(broker.subscriptions.read().unwrap().listener_count(), 1);
    }
}
