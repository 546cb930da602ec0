use opentelemetry::{global, metrics::Counter};

pub(crate) fn reject_counter() -> Counter<u64> {
    global::meter("dnsserver")
        .u64_counter("dnsserver_v2router_reject")
        .with_description("Number of rejected queries per domain.")
        .build()
}

pub(crate) fn upstream_counter() -> Counter<u64> {
    global::meter("dnsserver")
        .u64_counter("dnsserver_v2router_upstream")
        .with_description("Number of accepted responses per upstream.")
        .build()
}

pub(crate) fn connection_cache_hit_counter() -> Counter<u64> {
    global::meter("dnsserver")
        .u64_counter("dnsserver_v2router_connection_cache_hit")
        .with_description("Number of exchanges served over a pooled connection.")
        .build()
}

pub(crate) fn connection_cache_miss_counter() -> Counter<u64> {
    global::meter("dnsserver")
        .u64_counter("dnsserver_v2router_connection_cache_miss")
        .with_description("Number of exchanges that had to dial a fresh connection.")
        .build()
}
