//! Single-owner event loop for the relay.
//!
//! Every session forwards its lifecycle and inbound frames into one channel.
//! The dispatcher owns the roster and the message counter and handles each
//! event to completion before taking the next, so neither is shared.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ember_core::protocol::{Inbound, Outbound};
use ember_core::{generate_tornado_effect, ConnectionId, EffectConfig, EffectError};
use metrics::{counter, gauge, histogram};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::connection::ClientConnection;
use super::roster::Roster;
use crate::metrics::{
    CONNECTIONS_ACTIVE, CONNECTIONS_TOTAL, DISCONNECTIONS_TOTAL, EFFECTS_RENDERED_TOTAL,
    EFFECT_ERRORS_TOTAL, EFFECT_RENDER_SECONDS, MALFORMED_MESSAGES_TOTAL, MESSAGES_TOTAL,
    SEND_DROPS_TOTAL,
};

/// Events sent from sessions to the dispatcher.
#[derive(Debug)]
pub enum RelayEvent {
    Connected(Arc<ClientConnection>),
    /// A text frame, or a binary frame holding valid UTF-8.
    Message { id: ConnectionId, text: String },
    /// A frame that cannot be decoded as text.
    Undecodable { id: ConnectionId, reason: String },
    TransportError { id: ConnectionId, error: String },
    Disconnected { id: ConnectionId },
}

/// Counters published after every event and read by `/health`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub connections: usize,
    pub messages: u64,
}

/// Owner of the roster and message counter.
pub struct Relay {
    roster: Roster,
    messages: u64,
    port: u16,
    max_particle_count: u32,
    stats_tx: watch::Sender<RelayStats>,
}

impl Relay {
    /// Create a dispatcher answering echoes with `port`.
    ///
    /// Returns the receiver that observes [`RelayStats`] updates.
    pub fn new(port: u16, max_particle_count: u32) -> (Self, watch::Receiver<RelayStats>) {
        let (stats_tx, stats_rx) = watch::channel(RelayStats::default());
        (Self::with_stats_sender(port, max_particle_count, stats_tx), stats_rx)
    }

    /// Create a dispatcher publishing into an existing stats channel.
    pub fn with_stats_sender(
        port: u16,
        max_particle_count: u32,
        stats_tx: watch::Sender<RelayStats>,
    ) -> Self {
        Self {
            roster: Roster::new(),
            messages: 0,
            port,
            max_particle_count,
            stats_tx,
        }
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            connections: self.roster.len(),
            messages: self.messages,
        }
    }

    /// Drain `events` until cancelled or every sender is gone.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<RelayEvent>,
        stats_interval: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(stats_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        let _ = ticker.tick().await;

        info!(port = self.port, "relay dispatcher started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("relay dispatcher shutting down");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("event channel closed");
                        break;
                    };
                    self.handle_event(event);
                }
                _ = ticker.tick() => self.report_liveness(),
            }
        }

        for conn in self.roster.snapshot() {
            conn.mark_closed();
        }
        self.report_liveness();
    }

    pub fn handle_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected(conn) => self.accept(conn),
            RelayEvent::Message { id, text } => self.on_message(&id, &text),
            RelayEvent::Undecodable { id, reason } => {
                self.messages += 1;
                counter!(MESSAGES_TOTAL).increment(1);
                counter!(MALFORMED_MESSAGES_TOTAL).increment(1);
                warn!(connection_id = %id, %reason, "dropping undecodable frame");
            }
            RelayEvent::TransportError { id, error } => {
                let peer = self.roster.get(&id).map(|c| c.remote_addr);
                warn!(connection_id = %id, ?peer, %error, "connection error");
            }
            RelayEvent::Disconnected { id } => self.on_close(&id),
        }
        let _ = self.stats_tx.send_replace(self.stats());
    }

    fn accept(&mut self, conn: Arc<ClientConnection>) {
        let id = conn.id.clone();
        let remote_addr: SocketAddr = conn.remote_addr;
        if self.roster.add(conn).is_some() {
            warn!(connection_id = %id, "replaced connection with duplicate id");
        }
        counter!(CONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).set(self.roster.len() as f64);
        info!(
            connection_id = %id,
            %remote_addr,
            connections = self.roster.len(),
            "client connected"
        );
    }

    fn on_close(&mut self, id: &ConnectionId) {
        let Some(conn) = self.roster.remove(id) else {
            debug!(connection_id = %id, "close for unknown connection");
            return;
        };
        conn.mark_closed();
        counter!(DISCONNECTIONS_TOTAL).increment(1);
        gauge!(CONNECTIONS_ACTIVE).set(self.roster.len() as f64);
        info!(
            connection_id = %id,
            remote_addr = %conn.remote_addr,
            connected_secs = conn.age().as_secs(),
            dropped = conn.drop_count(),
            connections = self.roster.len(),
            "client disconnected"
        );
    }

    fn on_message(&mut self, id: &ConnectionId, text: &str) {
        self.messages += 1;
        counter!(MESSAGES_TOTAL).increment(1);

        let inbound = match Inbound::parse(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                counter!(MALFORMED_MESSAGES_TOTAL).increment(1);
                warn!(connection_id = %id, error = %e, "dropping malformed message");
                return;
            }
        };

        match inbound {
            Inbound::RenderTornado { effect_id, config } => {
                self.render_tornado(id, effect_id, config.as_ref());
            }
            Inbound::Echo(original) => {
                debug!(connection_id = %id, "echoing message");
                self.send(id, &Outbound::echo(original, self.port));
            }
        }
    }

    fn render_tornado(&mut self, id: &ConnectionId, effect_id: Value, config: Option<&Value>) {
        let config = match self.checked_config(config) {
            Ok(config) => config,
            Err(err) => {
                counter!(EFFECT_ERRORS_TOTAL, "kind" => err.error_kind()).increment(1);
                warn!(connection_id = %id, %effect_id, error = %err, "rejected render request");
                self.send(id, &Outbound::error(effect_id, &err));
                return;
            }
        };

        let started = Instant::now();
        let effect = generate_tornado_effect(&config);
        let elapsed = started.elapsed();
        histogram!(EFFECT_RENDER_SECONDS).record(elapsed.as_secs_f64());
        counter!(EFFECTS_RENDERED_TOTAL).increment(1);

        let render_time = elapsed.as_secs_f64() * 1000.0;
        info!(
            connection_id = %id,
            %effect_id,
            particles = effect.particles.len(),
            render_ms = render_time,
            "rendered fire tornado"
        );

        self.send(id, &Outbound::rendered(effect_id, effect, render_time));

        let EffectConfig {
            position,
            parameters,
        } = config;
        let report = self
            .roster
            .broadcast_except(id, &Outbound::broadcast(position, parameters));
        if report.skipped > 0 {
            counter!(SEND_DROPS_TOTAL).increment(report.skipped as u64);
        }
    }

    fn checked_config(&self, raw: Option<&Value>) -> Result<EffectConfig, EffectError> {
        let config = EffectConfig::from_value(raw)?;
        config.validate(self.max_particle_count)?;
        Ok(config)
    }

    fn send(&self, id: &ConnectionId, message: &Outbound) {
        if !self.roster.send_to(id, message) {
            counter!(SEND_DROPS_TOTAL).increment(1);
        }
    }

    fn report_liveness(&self) {
        let stats = self.stats();
        gauge!(CONNECTIONS_ACTIVE).set(stats.connections as f64);
        info!(
            connections = stats.connections,
            messages = stats.messages,
            "relay alive"
        );
    }
}
