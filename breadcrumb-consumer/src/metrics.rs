use axum::{routing::get, Router};
use breadcrumb_common::metrics_consts::{
    ACK_FAILED, EVENTS_RECEIVED, EVENT_PARSE_ERROR, FLUSH_ATTEMPT, FLUSH_TIME, PAIRS_REJECTED,
    RECORDS_VALIDATED, ROWS_DROPPED, ROWS_WRITTEN, STORE_RECONNECT,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Bind a `TcpListener` on the provided bind address to serve a `Router` on it.
pub async fn serve(router: Router, bind: &str) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;

    axum::serve(listener, router).await?;

    Ok(())
}

pub async fn index() -> &'static str {
    "breadcrumb consumer"
}

/// Build a Router for a metrics endpoint.
pub fn setup_metrics_router() -> Router {
    let recorder_handle = setup_metrics_recorder();
    describe_metrics();

    Router::new().route("/", get(index)).route(
        "/metrics",
        get(move || std::future::ready(recorder_handle.render())),
    )
}

pub fn setup_metrics_recorder() -> PrometheusHandle {
    const FLUSH_MILLISECONDS: &[f64] = &[
        5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
    ];

    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(FLUSH_TIME.to_owned()), FLUSH_MILLISECONDS)
        .expect("flush time buckets are not empty")
        .install_recorder()
        .expect("failed to install metrics recorder")
}

fn describe_metrics() {
    metrics::describe_counter!(EVENTS_RECEIVED, "Deliveries taken from the event source");
    metrics::describe_counter!(EVENT_PARSE_ERROR, "Payloads discarded because they did not decode");
    metrics::describe_counter!(PAIRS_REJECTED, "Pairings discarded for implausible speed");
    metrics::describe_counter!(RECORDS_VALIDATED, "Records classified by the validation rules");
    metrics::describe_counter!(ROWS_DROPPED, "Breadcrumb rows dropped for null fields");
    metrics::describe_counter!(ROWS_WRITTEN, "Rows committed to the store");
    metrics::describe_counter!(FLUSH_ATTEMPT, "Flush cycles by result");
    metrics::describe_histogram!(
        FLUSH_TIME,
        metrics::Unit::Milliseconds,
        "Time spent in a flush cycle"
    );
    metrics::describe_counter!(STORE_RECONNECT, "Store reconnect attempts by result");
    metrics::describe_counter!(ACK_FAILED, "Deliveries that could not be acknowledged");
}
