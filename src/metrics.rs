use tracing::trace;

// Trace-level counters; the Prometheus recorder picks up HTTP-layer metrics.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "itemgen.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn batch_elapsed(operation: &'static str, elapsed_ms: u128) {
    trace!(
        target = "itemgen.metrics",
        operation = operation,
        elapsed_ms = elapsed_ms as u64,
        "batch_elapsed"
    );
}
