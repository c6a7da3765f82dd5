//! MQTT [`Broker`] backed by rumqttc.
//!
//! One short session per cycle: connect and wait for CONNACK, publish QoS 1
//! and wait for PUBACK, disconnect.  Between sessions the adapter keeps two
//! pieces of state:
//!
//! - a reconnect backoff that doubles from `backoff_base` to `backoff_max`
//!   after each failed connect and resets on success; while it is running,
//!   `connect` fails fast without touching the network;
//! - an unbounded FIFO offline queue.  Every publish is enqueued first, and
//!   the queue is drained oldest-first (paced by `drain_interval`) whenever a
//!   session is up.  One session spends at most `drain_budget` draining; the
//!   rest of a backlog waits for later sessions, so a long outage never
//!   stretches a control cycle.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::Context;
use rumqttc::{
    AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, TlsConfiguration, Transport,
};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::MqttConfig;
use crate::error::PublishError;
use crate::telemetry::Broker;

/// Request channel capacity between `AsyncClient` and its event loop.
const CLIENT_CAPACITY: usize = 10;

// ---------------------------------------------------------------------------
// Reconnect backoff
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub(crate) struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
    retry_at: Option<Instant>,
}

impl Backoff {
    pub(crate) fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: 0,
            retry_at: None,
        }
    }

    /// Delay after the `failures`-th consecutive failure.
    fn delay(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exp).min(self.max)
    }

    /// Record a failed attempt at `now` and return the wait before the next.
    pub(crate) fn record_failure(&mut self, now: Instant) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let wait = self.delay(self.failures);
        self.retry_at = Some(now + wait);
        wait
    }

    pub(crate) fn record_success(&mut self) {
        self.failures = 0;
        self.retry_at = None;
    }

    /// Time left before another attempt is allowed, if any.
    pub(crate) fn remaining(&self, now: Instant) -> Option<Duration> {
        self.retry_at
            .filter(|&at| at > now)
            .map(|at| at.duration_since(now))
    }
}

// ---------------------------------------------------------------------------
// Offline queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Outbound {
    pub(crate) topic: String,
    pub(crate) payload: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

struct Session {
    client: AsyncClient,
    eventloop: EventLoop,
}

pub struct MqttBroker {
    options: MqttOptions,
    connect_timeout: Duration,
    operation_timeout: Duration,
    drain_interval: Duration,
    drain_budget: Duration,
    backoff: Backoff,
    queue: VecDeque<Outbound>,
    session: Option<Session>,
}

impl MqttBroker {
    pub fn from_config(cfg: &MqttConfig) -> anyhow::Result<Self> {
        let mut options = MqttOptions::new(&cfg.client_id, &cfg.host, cfg.port);
        options.set_keep_alive(Duration::from_secs(cfg.keep_alive_sec));
        options.set_clean_session(true);

        if let Some(tls) = &cfg.tls {
            let ca = std::fs::read(&tls.ca_path)
                .with_context(|| format!("failed to read mqtt CA: {}", tls.ca_path))?;
            let client_auth = match (&tls.cert_path, &tls.key_path) {
                (Some(cert), Some(key)) => Some((
                    std::fs::read(cert)
                        .with_context(|| format!("failed to read mqtt cert: {cert}"))?,
                    std::fs::read(key)
                        .with_context(|| format!("failed to read mqtt key: {key}"))?,
                )),
                _ => None,
            };
            options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth,
            }));
        }

        info!(
            host = %cfg.host,
            port = cfg.port,
            client_id = %cfg.client_id,
            tls = cfg.tls.is_some(),
            "mqtt broker configured"
        );

        Ok(Self {
            options,
            connect_timeout: Duration::from_secs(cfg.connect_timeout_sec),
            operation_timeout: Duration::from_secs(cfg.operation_timeout_sec),
            drain_interval: Duration::from_millis(cfg.drain_interval_ms),
            drain_budget: Duration::from_millis(cfg.drain_budget_ms),
            backoff: Backoff::new(
                Duration::from_secs(cfg.backoff_base_sec),
                Duration::from_secs(cfg.backoff_max_sec),
            ),
            queue: VecDeque::new(),
            session: None,
        })
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// Poll `eventloop` until `done` accepts an event, within `limit`.
async fn poll_until<F>(
    eventloop: &mut EventLoop,
    limit: Duration,
    mut done: F,
) -> Result<(), PublishError>
where
    F: FnMut(&Event) -> bool,
{
    let wait = async {
        loop {
            let event = eventloop.poll().await?;
            if done(&event) {
                return Ok::<(), PublishError>(());
            }
        }
    };
    timeout(limit, wait)
        .await
        .map_err(|_| PublishError::Timeout(limit))?
}

async fn send(session: &mut Session, msg: &Outbound, limit: Duration) -> Result<(), PublishError> {
    session
        .client
        .publish(msg.topic.as_str(), QoS::AtLeastOnce, false, msg.payload.clone())
        .await?;
    poll_until(&mut session.eventloop, limit, |event| {
        matches!(event, Event::Incoming(Packet::PubAck(_)))
    })
    .await
}

impl Broker for MqttBroker {
    async fn connect(&mut self) -> Result<(), PublishError> {
        if self.session.is_some() {
            return Ok(());
        }
        if let Some(wait) = self.backoff.remaining(Instant::now()) {
            return Err(PublishError::BackingOff(wait));
        }

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), CLIENT_CAPACITY);
        let acked = poll_until(&mut eventloop, self.connect_timeout, |event| {
            matches!(event, Event::Incoming(Packet::ConnAck(_)))
        })
        .await;

        match acked {
            Ok(()) => {
                self.backoff.record_success();
                self.session = Some(Session { client, eventloop });
                debug!("mqtt connected");
                Ok(())
            }
            Err(e) => {
                let retry_in = self.backoff.record_failure(Instant::now());
                warn!(?retry_in, "mqtt connect failed: {e}");
                Err(e)
            }
        }
    }

    async fn publish(&mut self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        self.queue.push_back(Outbound {
            topic: topic.to_string(),
            payload,
        });

        let Some(session) = self.session.as_mut() else {
            return Err(PublishError::Offline(self.queue.len()));
        };

        let started = Instant::now();
        while let Some(msg) = self.queue.front() {
            if let Err(e) = send(session, msg, self.operation_timeout).await {
                // The session is no longer trustworthy; the message stays
                // at the head of the queue for the next one.
                self.session = None;
                warn!(queued = self.queued(), "mqtt publish failed: {e}");
                return Err(e);
            }
            self.queue.pop_front();
            if self.queue.is_empty() {
                break;
            }
            if started.elapsed() + self.drain_interval >= self.drain_budget {
                info!(
                    queued = self.queued(),
                    "drain budget spent, backlog left for the next session"
                );
                break;
            }
            debug!(remaining = self.queue.len(), "draining offline queue");
            sleep(self.drain_interval).await;
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), PublishError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        session.client.disconnect().await?;

        // The event loop reports the outgoing DISCONNECT, then errors once
        // the socket closes; either ends the session.
        let wait = async {
            loop {
                match session.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        timeout(self.operation_timeout, wait)
            .await
            .map_err(|_| PublishError::Timeout(self.operation_timeout))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
