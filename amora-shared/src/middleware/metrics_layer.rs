use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Records request count and latency labelled by route template, so path
/// parameters never become label values.
pub async fn metrics_middleware(
    matched_path: Option<MatchedPath>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let route = matched_path
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    let status = response.status();
    let labels = [
        ("method", method),
        ("route", route),
        ("status_class", status_class(status.as_u16()).to_string()),
    ];

    counter!("http_requests_total", &labels).increment(1);
    histogram!("http_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());

    response
}

pub fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

/// Installs the Prometheus recorder and registers descriptions for the
/// HTTP and domain series.
pub fn init_metrics() -> anyhow::Result<metrics_exporter_prometheus::PrometheusHandle> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    describe_counter!("http_requests_total", "HTTP requests by route and status class");
    describe_histogram!("http_request_duration_seconds", Unit::Seconds, "HTTP request latency");
    describe_counter!("amora_swipes_total", "Swipes recorded, by direction");
    describe_counter!("amora_matches_created_total", "Matches created");
    describe_counter!("amora_messages_sent_total", "Messages appended, by type");
    describe_counter!("amora_ephemeral_views_total", "Ephemeral photo views granted");
    describe_counter!("amora_sanctions_applied_total", "Sanctions applied, by kind and source");
    describe_counter!("amora_sweeper_processed_total", "Records advanced by background sweepers");

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes() {
        assert_eq!(status_class(200), "2xx");
        assert_eq!(status_class(429), "4xx");
        assert_eq!(status_class(503), "5xx");
    }
}
