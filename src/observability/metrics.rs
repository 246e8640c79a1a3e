use prometheus::{
    Encoder, GaugeVec, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub reservations_total: IntCounterVec,
    pub reservation_latency_seconds: HistogramVec,
    pub heartbeats_total: IntCounterVec,
    pub handoffs_total: IntCounterVec,
    pub pending_handoffs: IntGauge,
    pub drone_battery_level: GaugeVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let reservations_total = IntCounterVec::new(
            Opts::new("reservations_total", "Total job reservations by outcome"),
            &["outcome"],
        )
        .expect("valid reservations_total metric");

        let reservation_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "reservation_latency_seconds",
                "Latency of job reservation in seconds",
            ),
            &["outcome"],
        )
        .expect("valid reservation_latency_seconds metric");

        let heartbeats_total = IntCounterVec::new(
            Opts::new("heartbeats_total", "Total drone heartbeats by outcome"),
            &["outcome"],
        )
        .expect("valid heartbeats_total metric");

        let handoffs_total = IntCounterVec::new(
            Opts::new("handoffs_total", "Handoff requests by outcome"),
            &["outcome"],
        )
        .expect("valid handoffs_total metric");

        let pending_handoffs =
            IntGauge::new("pending_handoffs", "Handoff requests waiting for a rescue drone")
                .expect("valid pending_handoffs metric");

        let drone_battery_level = GaugeVec::new(
            Opts::new("drone_battery_level", "Last reported battery percentage"),
            &["drone_id"],
        )
        .expect("valid drone_battery_level metric");

        registry
            .register(Box::new(reservations_total.clone()))
            .expect("register reservations_total");
        registry
            .register(Box::new(reservation_latency_seconds.clone()))
            .expect("register reservation_latency_seconds");
        registry
            .register(Box::new(heartbeats_total.clone()))
            .expect("register heartbeats_total");
        registry
            .register(Box::new(handoffs_total.clone()))
            .expect("register handoffs_total");
        registry
            .register(Box::new(pending_handoffs.clone()))
            .expect("register pending_handoffs");
        registry
            .register(Box::new(drone_battery_level.clone()))
            .expect("register drone_battery_level");

        Self {
            registry,
            reservations_total,
            reservation_latency_seconds,
            heartbeats_total,
            handoffs_total,
            pending_handoffs,
            drone_battery_level,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
