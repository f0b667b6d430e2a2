//! Prometheus Metrics
//!
//! Registry served at `GET /metrics` on the game port.

use std::fmt;

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

use crate::game::events::RoundSummary;

/// Content type of the text exposition.
pub const METRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

const MULTIPLIER_BUCKETS: [f64; 8] = [1.0, 1.5, 2.0, 3.0, 5.0, 10.0, 20.0, 50.0];
const RTP_BUCKETS: [f64; 10] = [0.0, 50.0, 75.0, 90.0, 100.0, 110.0, 125.0, 150.0, 200.0, 300.0];
const PROFIT_BUCKETS: [f64; 13] = [
    0.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 50000.0, 100000.0,
];

/// Message direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    In,
    /// Server to client.
    Out,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct EventLabels {
    direction: String,
    event: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct SideLabels {
    mode: String,
    side: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ModeLabels {
    mode: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ProfitLabels {
    mode: String,
    outcome: String,
}

type HistogramFamily<L> = Family<L, Histogram, fn() -> Histogram>;

fn multiplier_histogram() -> Histogram {
    Histogram::new(MULTIPLIER_BUCKETS.into_iter())
}

fn rtp_histogram() -> Histogram {
    Histogram::new(RTP_BUCKETS.into_iter())
}

fn profit_histogram() -> Histogram {
    Histogram::new(PROFIT_BUCKETS.into_iter())
}

/// Server metrics.
#[derive(Debug)]
pub struct Metrics {
    registry: Registry,
    active_clients: Gauge,
    events: Family<EventLabels, Counter>,
    round_multiplier: HistogramFamily<SideLabels>,
    round_rtp: HistogramFamily<ModeLabels>,
    round_profit: HistogramFamily<ProfitLabels>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create and register every metric.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let active_clients = Gauge::default();
        let events = Family::<EventLabels, Counter>::default();
        let round_multiplier: HistogramFamily<SideLabels> = Family::new_with_constructor(multiplier_histogram);
        let round_rtp: HistogramFamily<ModeLabels> = Family::new_with_constructor(rtp_histogram);
        let round_profit: HistogramFamily<ProfitLabels> = Family::new_with_constructor(profit_histogram);

        registry.register(
            "clash_active_clients",
            "Number of connected WebSocket clients",
            active_clients.clone(),
        );
        // Counters get the `_total` suffix on encode.
        registry.register(
            "clash_events",
            "WebSocket messages by direction and type",
            events.clone(),
        );
        registry.register(
            "clash_round_multiplier",
            "Final multiplier per settled round and side",
            round_multiplier.clone(),
        );
        registry.register(
            "clash_round_rtp_percent",
            "Return to player per settled round",
            round_rtp.clone(),
        );
        registry.register(
            "clash_round_profit",
            "Absolute operator profit or loss per settled round",
            round_profit.clone(),
        );

        Self {
            registry,
            active_clients,
            events,
            round_multiplier,
            round_rtp,
            round_profit,
        }
    }

    /// A client connected.
    pub fn client_connected(&self) {
        self.active_clients.inc();
    }

    /// A client disconnected.
    pub fn client_disconnected(&self) {
        self.active_clients.dec();
    }

    /// Count `n` messages of type `event`.
    pub fn record_event(&self, direction: Direction, event: &str, n: u64) {
        if n == 0 {
            return;
        }
        self.events
            .get_or_create(&EventLabels {
                direction: direction.as_str().to_string(),
                event: event.to_string(),
            })
            .inc_by(n);
    }

    /// Record a settled round.
    pub fn record_round(&self, summary: &RoundSummary) {
        let mode = summary.mode.as_str().to_string();

        for (side, multiplier) in &summary.multipliers {
            self.round_multiplier
                .get_or_create(&SideLabels {
                    mode: mode.clone(),
                    side: side.as_str().to_string(),
                })
                .observe(*multiplier);
        }

        if let Some(rtp) = summary.rtp {
            self.round_rtp.get_or_create(&ModeLabels { mode: mode.clone() }).observe(rtp);
        }

        let outcome = if summary.house_delta.is_negative() { "loss" } else { "profit" };
        self.round_profit
            .get_or_create(&ProfitLabels {
                mode,
                outcome: outcome.to_string(),
            })
            .observe(summary.house_delta.abs().to_f64());
    }

    /// Text exposition of the registry.
    pub fn encode(&self) -> Result<String, fmt::Error> {
        let mut body = String::new();
        encode(&mut body, &self.registry)?;
        Ok(body)
    }
}
