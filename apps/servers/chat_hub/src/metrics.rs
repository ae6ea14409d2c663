use crate::AppState;
use axum::{extract::State, http::StatusCode};
use lazy_static::lazy_static;
use prometheus::{register_int_counter_vec, register_int_gauge_vec, Encoder, IntCounterVec, IntGaugeVec, TextEncoder};
use ws_hub::FanOut;

lazy_static! {
	pub static ref WS_CONNECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
		"ws_connections_total",
		"WebSocket connections by outcome",
		&["outcome"] // "opened", "rejected", "closed"
	)
	.expect("Failed to register WS_CONNECTIONS_TOTAL");

	pub static ref WS_FRAMES_TOTAL: IntCounterVec = register_int_counter_vec!(
		"ws_frames_total",
		"Client frames processed",
		&["type", "result"] // type: "subscribe", "publish", ... result: "ok", error kind
	)
	.expect("Failed to register WS_FRAMES_TOTAL");

	pub static ref WS_FANOUT_TOTAL: IntCounterVec = register_int_counter_vec!(
		"ws_fanout_total",
		"Fan-out results of client publishes",
		&["outcome"] // "enqueued", "dropped", "stale"
	)
	.expect("Failed to register WS_FANOUT_TOTAL");

	static ref HUB_STATS: IntGaugeVec = register_int_gauge_vec!(
		"hub_stats",
		"Hub state and lifetime counters, sampled at scrape time",
		&["stat"]
	)
	.expect("Failed to register HUB_STATS");
}

pub fn record_frame(kind: &str, result: &str) {
	WS_FRAMES_TOTAL.with_label_values(&[kind, result]).inc();
}

pub fn record_fan_out(fan_out: &FanOut) {
	for (outcome, count) in [("enqueued", fan_out.enqueued), ("dropped", fan_out.dropped), ("stale", fan_out.stale)] {
		if count > 0 {
			WS_FANOUT_TOTAL.with_label_values(&[outcome]).inc_by(count as u64);
		}
	}
}

fn sample_hub(state: &AppState) {
	let snapshot = state.hub.metrics();
	let stats = [
		("connections_active", state.hub.connection_count() as u64),
		("topics_active", state.hub.topic_count() as u64),
		("connections_opened", snapshot.connections_opened),
		("connections_rejected", snapshot.connections_rejected),
		("connections_closed", snapshot.connections_closed),
		("published", snapshot.published),
		("enqueued", snapshot.enqueued),
		("dropped", snapshot.dropped),
		("stale_targets", snapshot.stale_targets),
		("delivered", snapshot.delivered),
		("write_failures", snapshot.write_failures),
	];
	for (stat, value) in stats {
		HUB_STATS.with_label_values(&[stat]).set(i64::try_from(value).unwrap_or(i64::MAX));
	}
}

/// Prometheus metrics handler
pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
	sample_hub(&state);

	let encoder = TextEncoder::new();
	let metric_families = prometheus::gather();
	let mut buffer = Vec::new();

	if encoder.encode(&metric_families, &mut buffer).is_err() {
		tracing::error!("Failed to encode metrics");
		return Err(StatusCode::INTERNAL_SERVER_ERROR);
	}

	String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
