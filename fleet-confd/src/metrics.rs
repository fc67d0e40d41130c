//! Confd observability metrics, mirroring the teacher workspace's
//! `prism-cluster::metrics` module: thin wrapper functions over the
//! `metrics` facade so call sites stay one-liners and the metric names
//! live in exactly one place.
//!
//! Covers: requests served (by type and status), signed replies sent,
//! dropped datagrams (by drop reason), reload attempts (count + latency),
//! and watch-mode transitions.

use std::time::{Duration, Instant};

/// Record one dispatched confd request.
pub fn record_request(request_type: &str, status: &str) {
    metrics::counter!(
        "fleet_confd_requests_total",
        "type" => request_type.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
}

/// Record a signed reply actually sent back to a client.
pub fn record_reply_signed() {
    metrics::counter!("fleet_confd_replies_signed_total").increment(1);
}

/// Record a datagram dropped before dispatch (bad magic, bad hmac, clock
/// skew, handler timeout) — never incremented for a request that reached
/// `responder::dispatch`, since those always produce a reply.
pub fn record_drop(reason: &str) {
    metrics::counter!("fleet_confd_drops_total", "reason" => reason.to_string()).increment(1);
}

/// Record one reload attempt, successful or not.
pub fn record_reload(result: &str) {
    metrics::counter!("fleet_confd_reloads_total", "result" => result.to_string()).increment(1);
}

/// Record how long a reload took, from read to published snapshot.
pub fn record_reload_duration(duration: Duration) {
    metrics::histogram!("fleet_confd_reload_duration_seconds").record(duration.as_secs_f64());
}

/// Record the current watch mode as a gauge (`1.0` when in `Poll` mode,
/// `0.0` when in `Notify` mode), so a mode flap shows up as a time series
/// rather than only in logs.
pub fn set_poll_mode(is_poll: bool) {
    metrics::gauge!("fleet_confd_poll_mode").set(if is_poll { 1.0 } else { 0.0 });
}

/// Times a single confd request handler and records its outcome on drop
/// via an explicit `success`/`error` call, matching the teacher's
/// `RpcHandlerTimer` pattern.
pub struct RequestTimer {
    request_type: &'static str,
    start: Instant,
}

impl RequestTimer {
    pub fn new(request_type: &'static str) -> Self {
        RequestTimer {
            request_type,
            start: Instant::now(),
        }
    }

    fn finish(self, status: &str) {
        record_request(self.request_type, status);
        metrics::histogram!(
            "fleet_confd_request_duration_seconds",
            "type" => self.request_type.to_string(),
        )
        .record(self.start.elapsed().as_secs_f64());
    }

    pub fn success(self) {
        self.finish("ok");
    }

    pub fn error(self) {
        self.finish("error");
    }
}
