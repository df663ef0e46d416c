//! Network ingestion path: MQTT broker subscriber.
//!
//! Runs independently of the engine supervisor. Broker settings are
//! re-read on a short interval; a change to host, port or credentials
//! replaces the connection, a topic change only resubscribes, and clearing
//! the broker address disconnects. Payloads go through the same
//! `IngestPipeline` as engine output.
//!
//! Each connection is driven by its own task that owns the `EventLoop`, so
//! a settings reload never interrupts a handshake in progress. Connection
//! errors are logged there and retried after a fixed delay forever.

use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use etherspy_core::{BrokerSettings, ConfigError};
use etherspy_protocol::decode_broker_payload;

use crate::pipeline::{IngestOutcome, IngestPipeline, Origin};
use crate::shutdown::Shutdown;
use crate::store::SettingsStore;

const REQUEST_CAPACITY: usize = 16;
const EVENT_CAPACITY: usize = 64;

/// Broker task timing.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Delay after a connection error.
    pub retry_delay: Duration,
    /// How often broker settings are re-read.
    pub settings_poll: Duration,
    pub keep_alive: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            settings_poll: Duration::from_secs(1),
            keep_alive: Duration::from_secs(60),
        }
    }
}

/// What to do when the desired broker settings differ from the applied ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconcile {
    Keep,
    Connect,
    Reconnect,
    Resubscribe,
    Disconnect,
}

/// Decide how to move from `applied` to `desired` settings.
pub fn reconcile(applied: Option<&BrokerSettings>, desired: Option<&BrokerSettings>) -> Reconcile {
    match (applied, desired) {
        (None, None) => Reconcile::Keep,
        (None, Some(_)) => Reconcile::Connect,
        (Some(_), None) => Reconcile::Disconnect,
        (Some(old), Some(new)) if old == new => Reconcile::Keep,
        (Some(old), Some(new)) if same_connection(old, new) => Reconcile::Resubscribe,
        (Some(_), Some(_)) => Reconcile::Reconnect,
    }
}

fn same_connection(a: &BrokerSettings, b: &BrokerSettings) -> bool {
    a.host == b.host && a.port == b.port && a.user == b.user && a.password == b.password
}

struct Session {
    filter: String,
    client: AsyncClient,
    events: mpsc::Receiver<Event>,
    driver: JoinHandle<()>,
}

enum Wake {
    Shutdown,
    Reload,
    Event(Option<Event>),
}

/// Subscribes to the broker and feeds the ingest pipeline.
pub struct BrokerIngest {
    settings: Arc<dyn SettingsStore>,
    pipeline: IngestPipeline,
    config: BrokerConfig,
}

impl BrokerIngest {
    pub fn new(settings: Arc<dyn SettingsStore>, pipeline: IngestPipeline, config: BrokerConfig) -> Self {
        Self {
            settings,
            pipeline,
            config,
        }
    }

    /// Run until shutdown.
    pub async fn run(self, mut shutdown: Shutdown) {
        let mut applied: Option<BrokerSettings> = None;
        let mut session: Option<Session> = None;
        let mut reload = tokio::time::interval(self.config.settings_poll);
        reload.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let wake = match session.as_mut() {
                Some(active) => tokio::select! {
                    _ = shutdown.wait() => Wake::Shutdown,
                    _ = reload.tick() => Wake::Reload,
                    event = active.events.recv() => Wake::Event(event),
                },
                None => tokio::select! {
                    _ = shutdown.wait() => Wake::Shutdown,
                    _ = reload.tick() => Wake::Reload,
                },
            };

            match wake {
                Wake::Shutdown => break,
                Wake::Reload => self.apply_settings(&mut applied, &mut session).await,
                Wake::Event(Some(Event::Incoming(Packet::ConnAck(_)))) => {
                    if let Some(active) = session.as_ref() {
                        info!("Connected to broker");
                        subscribe(&active.client, &active.filter);
                    }
                }
                Wake::Event(Some(Event::Incoming(Packet::Publish(publish)))) => {
                    self.ingest_payload(&publish.topic, &publish.payload).await;
                }
                Wake::Event(Some(_)) => {}
                Wake::Event(None) => {
                    warn!("Broker connection task ended, reconnecting on next reload");
                    close(session.take());
                    applied = None;
                }
            }
        }

        close(session.take());
        info!("Broker ingestion stopped");
    }

    async fn apply_settings(&self, applied: &mut Option<BrokerSettings>, session: &mut Option<Session>) {
        let desired = match self.settings.load_settings().await {
            Ok(settings) => settings.broker(),
            Err(e) => {
                warn!("Failed to load broker settings: {}", e);
                return;
            }
        };

        match reconcile(applied.as_ref(), desired.as_ref()) {
            Reconcile::Keep => return,
            Reconcile::Disconnect => {
                info!("Broker address cleared, disconnecting");
                close(session.take());
            }
            Reconcile::Resubscribe => {
                if let (Some(active), Some(target)) = (session.as_mut(), desired.as_ref()) {
                    let filter = target.subscription_filter();
                    if filter != active.filter {
                        let _ = active.client.try_unsubscribe(active.filter.clone());
                        subscribe(&active.client, &filter);
                        active.filter = filter;
                    }
                }
            }
            Reconcile::Connect | Reconcile::Reconnect => {
                close(session.take());
                if let Some(target) = desired.as_ref() {
                    match self.open_session(target) {
                        Ok(opened) => *session = Some(opened),
                        Err(e) => warn!("Not connecting to broker: {}", e),
                    }
                }
            }
        }
        *applied = desired;
    }

    fn open_session(&self, target: &BrokerSettings) -> Result<Session, ConfigError> {
        let port = target.port_number()?;
        let client_id: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();

        let mut options = MqttOptions::new(format!("etherspy-{client_id}"), target.host.clone(), port);
        options.set_keep_alive(self.config.keep_alive);
        if let (Some(user), Some(password)) = (&target.user, &target.password) {
            options.set_credentials(user.clone(), password.clone());
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (tx, events) = mpsc::channel(EVENT_CAPACITY);
        info!("Connecting to broker at {}", target.address());
        let driver = tokio::spawn(drive(eventloop, tx, target.address(), self.config.retry_delay));

        Ok(Session {
            filter: target.subscription_filter(),
            client,
            events,
            driver,
        })
    }

    /// Decode and ingest one message payload. Undecodable payloads are
    /// dropped.
    pub async fn ingest_payload(&self, topic: &str, payload: &[u8]) -> Option<IngestOutcome> {
        self.pipeline.stats().record_broker_message();
        match decode_broker_payload(payload) {
            Ok(value) => Some(self.pipeline.ingest(value, Origin::Broker).await),
            Err(e) => {
                trace!(topic, "Dropping broker payload: {}", e);
                self.pipeline.stats().record_malformed();
                None
            }
        }
    }
}

fn subscribe(client: &AsyncClient, filter: &str) {
    match client.try_subscribe(filter, QoS::AtMostOnce) {
        Ok(()) => debug!("Subscribed to {}", filter),
        Err(e) => warn!("Failed to subscribe to {}: {}", filter, e),
    }
}

/// Poll one connection until the session is closed. Only the packets the
/// ingest loop acts on are forwarded.
async fn drive(mut eventloop: EventLoop, events: mpsc::Sender<Event>, address: String, retry_delay: Duration) {
    loop {
        match eventloop.poll().await {
            Ok(event @ Event::Incoming(Packet::ConnAck(_) | Packet::Publish(_))) => {
                if events.send(event).await.is_err() {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Broker connection to {} failed: {}. Retrying in {:?}", address, e, retry_delay);
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}

fn close(session: Option<Session>) {
    if let Some(session) = session {
        let _ = session.client.try_disconnect();
        session.driver.abort();
    }
}
