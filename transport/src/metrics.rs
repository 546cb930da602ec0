use opentelemetry::{global, metrics::Histogram};

pub(crate) fn dial_histogram() -> Histogram<f64> {
    global::meter("dnsserver")
        .f64_histogram("dnsserver_v2router_dial")
        .with_description("Duration of fresh DNS connection dials.")
        .with_unit("s")
        .build()
}
