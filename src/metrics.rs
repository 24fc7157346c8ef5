//! Prometheus metrics for the operations this core actually performs:
//! turns processed, active sessions, reruns, prunes, and directives
//! handled. A `lazy_static` registry holds `OnceLock`-initialized
//! instrument cells; outside the `cli` feature, all recording calls
//! become no-ops so the library builds headless.

#[cfg(feature = "cli")]
mod imp {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use lazy_static::lazy_static;
    use prometheus::{Encoder, Histogram, IntCounterVec, IntGauge, Registry, TextEncoder};
    use std::sync::OnceLock;

    lazy_static! {
        static ref REGISTRY: Registry = Registry::new();
    }
    static TURNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
    static ACTIVE_SESSIONS: OnceLock<IntGauge> = OnceLock::new();
    static RERUNS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
    static PRUNES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
    static DIRECTIVES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
    static TURN_LATENCY: OnceLock<Histogram> = OnceLock::new();

    pub fn init_metrics() {
        let turns_total = TURNS_TOTAL.get_or_init(|| {
            IntCounterVec::new(
                prometheus::opts!("turns_total", "Conversation turns processed"),
                &["outcome"],
            )
            .unwrap()
        });
        let active_sessions = ACTIVE_SESSIONS.get_or_init(|| {
            IntGauge::new("active_sessions", "Orchestrators currently cached").unwrap()
        });
        let reruns_total = RERUNS_TOTAL.get_or_init(|| {
            IntCounterVec::new(
                prometheus::opts!("reruns_total", "Model re-runs triggered by directives"),
                &["reason"],
            )
            .unwrap()
        });
        let prunes_total = PRUNES_TOTAL.get_or_init(|| {
            IntCounterVec::new(
                prometheus::opts!("prunes_total", "Memory pruner invocations"),
                &["outcome"],
            )
            .unwrap()
        });
        let directives_total = DIRECTIVES_TOTAL.get_or_init(|| {
            IntCounterVec::new(
                prometheus::opts!("directives_total", "Directives parsed from model replies"),
                &["kind"],
            )
            .unwrap()
        });
        let turn_latency = TURN_LATENCY.get_or_init(|| {
            Histogram::with_opts(prometheus::HistogramOpts::new(
                "turn_latency_seconds",
                "End-to-end latency of one conversation turn",
            ))
            .unwrap()
        });

        REGISTRY.register(Box::new(turns_total.clone())).ok();
        REGISTRY.register(Box::new(active_sessions.clone())).ok();
        REGISTRY.register(Box::new(reruns_total.clone())).ok();
        REGISTRY.register(Box::new(prunes_total.clone())).ok();
        REGISTRY.register(Box::new(directives_total.clone())).ok();
        REGISTRY.register(Box::new(turn_latency.clone())).ok();
    }

    pub fn inc_turn(outcome: &str) {
        if let Some(c) = TURNS_TOTAL.get() {
            c.with_label_values(&[outcome]).inc();
        }
    }
    pub fn inc_session() {
        if let Some(g) = ACTIVE_SESSIONS.get() {
            g.inc();
        }
    }
    pub fn dec_session() {
        if let Some(g) = ACTIVE_SESSIONS.get() {
            g.dec();
        }
    }
    pub fn inc_rerun(reason: &str) {
        if let Some(c) = RERUNS_TOTAL.get() {
            c.with_label_values(&[reason]).inc();
        }
    }
    pub fn inc_prune(outcome: &str) {
        if let Some(c) = PRUNES_TOTAL.get() {
            c.with_label_values(&[outcome]).inc();
        }
    }
    pub fn inc_directive(kind: &str) {
        if let Some(c) = DIRECTIVES_TOTAL.get() {
            c.with_label_values(&[kind]).inc();
        }
    }
    pub fn observe_turn_latency(seconds: f64) {
        if let Some(h) = TURN_LATENCY.get() {
            h.observe(seconds);
        }
    }

    pub async fn get_metrics() -> impl IntoResponse {
        let encoder = TextEncoder::new();
        let metric_families = REGISTRY.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer).unwrap();
        (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            buffer,
        )
    }
}

#[cfg(feature = "cli")]
pub use imp::*;

#[cfg(not(feature = "cli"))]
mod noop {
    pub fn init_metrics() {}
    pub fn inc_turn(_outcome: &str) {}
    pub fn inc_session() {}
    pub fn dec_session() {}
    pub fn inc_rerun(_reason: &str) {}
    pub fn inc_prune(_outcome: &str) {}
    pub fn inc_directive(_kind: &str) {}
    pub fn observe_turn_latency(_seconds: f64) {}
}
#[cfg(not(feature = "cli"))]
pub use noop::*;
