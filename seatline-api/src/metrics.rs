use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use seatline_core::RefreshStats;

pub struct Metrics {
    registry: Registry,
    reservations: IntCounterVec,
    refresh: IntGaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let reservations = IntCounterVec::new(
            Opts::new("seatline_reservations_total", "Seat reservation attempts by outcome"),
            &["outcome"],
        )?;
        let refresh = IntGaugeVec::new(
            Opts::new("seatline_refresh_events", "Analytics refresh counters since process start"),
            &["event"],
        )?;

        registry.register(Box::new(reservations.clone()))?;
        registry.register(Box::new(refresh.clone()))?;

        Ok(Self { registry, reservations, refresh })
    }

    pub fn record_reservation(&self, outcome: &str) {
        self.reservations.with_label_values(&[outcome]).inc();
    }

    /// Text exposition format. Refresh counters are owned by the scheduler and copied in here.
    pub fn render(&self, stats: &RefreshStats) -> Result<String, prometheus::Error> {
        let events = [
            ("runs", stats.runs),
            ("caught_up", stats.caught_up),
            ("timed_out", stats.timed_out),
            ("no_stats", stats.no_stats),
            ("failed", stats.failed),
            ("coalesced", stats.coalesced),
            ("follow_ups", stats.follow_ups),
        ];
        for (event, value) in events {
            self.refresh.with_label_values(&[event]).set(value as i64);
        }

        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
