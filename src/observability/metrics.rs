use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub position_pings_total: IntCounterVec,
    pub tracking_upserts_total: IntCounterVec,
    pub ping_fanout_parcels: HistogramVec,
    pub realtime_connections: IntGauge,
    pub parcel_status_transitions_total: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let position_pings_total = IntCounterVec::new(
            Opts::new("position_pings_total", "Agent position pings by outcome"),
            &["outcome"],
        )
        .expect("valid position_pings_total metric");

        let tracking_upserts_total = IntCounterVec::new(
            Opts::new(
                "tracking_upserts_total",
                "Per-parcel current position upserts by outcome",
            ),
            &["outcome"],
        )
        .expect("valid tracking_upserts_total metric");

        let ping_fanout_parcels = HistogramVec::new(
            HistogramOpts::new(
                "ping_fanout_parcels",
                "Number of active parcels a single ping fanned out to",
            )
            .buckets(vec![0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0]),
            &["agent_state"],
        )
        .expect("valid ping_fanout_parcels metric");

        let realtime_connections =
            IntGauge::new("realtime_connections", "Currently open realtime connections")
                .expect("valid realtime_connections metric");

        let parcel_status_transitions_total = IntCounterVec::new(
            Opts::new(
                "parcel_status_transitions_total",
                "Parcel status changes by resulting status",
            ),
            &["status"],
        )
        .expect("valid parcel_status_transitions_total metric");

        registry
            .register(Box::new(position_pings_total.clone()))
            .expect("register position_pings_total");
        registry
            .register(Box::new(tracking_upserts_total.clone()))
            .expect("register tracking_upserts_total");
        registry
            .register(Box::new(ping_fanout_parcels.clone()))
            .expect("register ping_fanout_parcels");
        registry
            .register(Box::new(realtime_connections.clone()))
            .expect("register realtime_connections");
        registry
            .register(Box::new(parcel_status_transitions_total.clone()))
            .expect("register parcel_status_transitions_total");

        Self {
            registry,
            position_pings_total,
            tracking_upserts_total,
            ping_fanout_parcels,
            realtime_connections,
            parcel_status_transitions_total,
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
