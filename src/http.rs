use crate::metrics::Metrics;
use crate::monitor::{DashboardState, Monitor};
use crate::state::{format_unix, now_unix, Snapshot};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;

#[derive(Clone)]
pub struct HttpAppState {
    pub metrics: Arc<Metrics>,
    pub monitor: Arc<Mutex<Monitor>>,
}

pub fn build_router(metrics: Arc<Metrics>, monitor: Arc<Mutex<Monitor>>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/state", get(state_handler))
        .route("/api/logs", get(logs_handler))
        .route("/api/run", post(run_handler))
        .with_state(HttpAppState { metrics, monitor })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    state.metrics.inc_scrape_count();
    match state.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

async fn state_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.monitor.lock().await;
    Json(guard.dashboard_state())
}

async fn logs_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    let guard = state.monitor.lock().await;
    Json(guard.log_tails())
}

async fn run_handler(State(state): State<HttpAppState>) -> Response {
    let mut guard = state.monitor.lock().await;
    match guard.run_cycle(now_unix()).await {
        Ok(report) => Json(report).into_response(),
        Err(err) => {
            error!(error = %err, "manual check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

async fn index_handler(State(state): State<HttpAppState>) -> Html<String> {
    let (view, tails) = {
        let guard = state.monitor.lock().await;
        (guard.dashboard_state(), guard.log_tails())
    };
    Html(render_dashboard(&view, &tails))
}

fn render_dashboard(view: &DashboardState, tails: &BTreeMap<String, Vec<String>>) -> String {
    let mut out = String::new();
    out.push_str("<!doctype html>\n<html><head><meta charset=\"utf-8\"><title>hostwatch</title>");
    out.push_str(
        "<style>body{font-family:sans-serif;margin:2em}table{border-collapse:collapse}\
         td,th{border:1px solid #ccc;padding:2px 8px}pre{background:#f4f4f4;padding:8px;\
         max-height:30em;overflow:auto}.hot{color:#b00;font-weight:bold}</style>",
    );
    out.push_str("</head><body><h1>hostwatch</h1>\n");
    out.push_str(
        "<form method=\"post\" action=\"/api/run\"><button type=\"submit\">Run check now</button></form>\n",
    );

    out.push_str("<h2>Last snapshot</h2>\n");
    match &view.last_snapshot {
        Some(s) => {
            let t = &view.thresholds;
            let _ = write!(
                out,
                "<p>{}</p><ul><li>CPU: {}</li><li>Memory: {}</li><li>Disk: {}</li>\
                 <li>Net sent/recv: {} / {}</li></ul>\n",
                escape_html(&format_unix(s.timestamp)),
                percent_cell(s.cpu_percent, t.cpu_percent),
                percent_cell(s.mem_percent, t.mem_percent),
                percent_cell(s.disk_percent, t.disk_percent),
                count_cell(s.net_bytes_sent),
                count_cell(s.net_bytes_recv),
            );
        }
        None => out.push_str("<p>No check has run yet.</p>\n"),
    }
    let _ = writeln!(
        out,
        "<p>Thresholds: CPU {:.1}% / MEM {:.1}% / DISK {:.1}%. Email alerts {}.</p>",
        view.thresholds.cpu_percent,
        view.thresholds.mem_percent,
        view.thresholds.disk_percent,
        if view.email_enabled { "enabled" } else { "disabled" },
    );

    out.push_str("<h2>Recent alerts</h2>\n");
    if view.recent_alerts.is_empty() {
        out.push_str("<p>None.</p>\n");
    } else {
        out.push_str("<ul>\n");
        for alert in &view.recent_alerts {
            let _ = writeln!(
                out,
                "<li>{} [{}] {}</li>",
                escape_html(&format_unix(alert.timestamp)),
                alert.kind,
                escape_html(&alert.message)
            );
        }
        out.push_str("</ul>\n");
    }

    out.push_str("<h2>History</h2>\n");
    out.push_str("<table><tr><th>Time</th><th>CPU</th><th>MEM</th><th>DISK</th></tr>\n");
    for s in view.history.iter().rev() {
        out.push_str(&history_row(s));
    }
    out.push_str("</table>\n");

    out.push_str("<h2>Watched logs</h2>\n");
    for (file, lines) in tails {
        let offset = view.offsets.get(file).copied().unwrap_or(0);
        let _ = writeln!(
            out,
            "<h3>{} <small>(offset {offset})</small></h3>",
            escape_html(file)
        );
        out.push_str("<pre>");
        for line in lines.iter().rev() {
            out.push_str(&escape_html(line));
            out.push('\n');
        }
        out.push_str("</pre>\n");
    }

    out.push_str("</body></html>\n");
    out
}

fn history_row(s: &Snapshot) -> String {
    format!(
        "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
        escape_html(&format_unix(s.timestamp)),
        opt_percent(s.cpu_percent),
        opt_percent(s.mem_percent),
        opt_percent(s.disk_percent),
    )
}

fn percent_cell(value: Option<f64>, ceiling: f64) -> String {
    match value {
        Some(v) if v > ceiling => format!("<span class=\"hot\">{v:.1}%</span>"),
        Some(v) => format!("{v:.1}%"),
        None => "n/a".to_string(),
    }
}

fn opt_percent(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.1}%")).unwrap_or_else(|| "n/a".to_string())
}

fn count_cell(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "n/a".to_string())
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::tests::{test_config, test_monitor};
    use crate::store::{JsonFileStore, MemoryStore};
    use axum::body::to_bytes;
    use axum::http::Request;
    use std::io::Write;
    use tower::ServiceExt;

    fn app_with(monitor: Monitor) -> Router {
        let metrics = Metrics::new().expect("metrics init");
        build_router(metrics, Arc::new(Mutex::new(monitor)))
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn post_run(app: &Router) -> Response {
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/run")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let app = app_with(test_monitor(test_config(vec![], 90.0), 10.0, Box::new(MemoryStore::new())));
        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "ok");
    }

    #[tokio::test]
    async fn manual_run_twice_reports_no_duplicate_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("syslog");
        let mut f = std::fs::File::create(&log).unwrap();
        f.write_all(b"kernel: critical failure\nplain line\n").unwrap();

        let cfg = test_config(vec![log.display().to_string()], 90.0);
        let app = app_with(test_monitor(cfg, 10.0, Box::new(MemoryStore::new())));

        let first = post_run(&app).await;
        assert_eq!(first.status(), StatusCode::OK);
        let first: serde_json::Value = serde_json::from_str(&body_text(first).await).unwrap();
        assert_eq!(first["lines_read"], 2);
        assert_eq!(first["alerts"].as_array().unwrap().len(), 1);
        assert_eq!(first["alerts"][0]["kind"], "log_pattern");

        let second = post_run(&app).await;
        let second: serde_json::Value = serde_json::from_str(&body_text(second).await).unwrap();
        assert_eq!(second["lines_read"], 0);
        assert!(second["alerts"].as_array().unwrap().is_empty());
        assert!(
            second["snapshot"]["timestamp"].as_i64().unwrap()
                >= first["snapshot"]["timestamp"].as_i64().unwrap()
        );
    }

    #[tokio::test]
    async fn manual_run_failure_returns_500() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::open(dir.path().join("missing").join("state.json"));
        let app = app_with(test_monitor(test_config(vec![], 90.0), 10.0, Box::new(store)));

        let response = post_run(&app).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("\"error\""));
    }

    #[tokio::test]
    async fn api_state_and_index_show_last_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        std::fs::write(&log, "<script>error</script>\n").unwrap();
        let cfg = test_config(vec![log.display().to_string()], 90.0);
        let app = app_with(test_monitor(cfg, 95.0, Box::new(MemoryStore::new())));
        post_run(&app).await;

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/state").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let state: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(state["last_snapshot"]["cpu_percent"], 95.0);
        assert_eq!(state["history"].as_array().unwrap().len(), 1);
        assert_eq!(state["thresholds"]["cpu_percent"], 90.0);
        assert!(state.get("smtp").is_none());

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("<span class=\"hot\">95.0%</span>"));
        assert!(html.contains("&lt;script&gt;error&lt;/script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[tokio::test]
    async fn api_logs_returns_last_lines_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("app.log");
        let missing = dir.path().join("gone.log");
        std::fs::write(&log, "first\nsecond\n").unwrap();
        let cfg = test_config(
            vec![log.display().to_string(), missing.display().to_string()],
            90.0,
        );
        let app = app_with(test_monitor(cfg, 10.0, Box::new(MemoryStore::new())));

        let response = app
            .oneshot(Request::builder().uri("/api/logs").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let logs: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(logs[log.display().to_string()], serde_json::json!(["first", "second"]));
        assert_eq!(logs[missing.display().to_string()], serde_json::json!([]));
    }

    #[tokio::test]
    async fn metrics_endpoint_counts_scrapes() {
        let metrics = Metrics::new().expect("metrics init");
        let monitor = test_monitor(test_config(vec![], 90.0), 10.0, Box::new(MemoryStore::new()));
        let app = build_router(metrics, Arc::new(Mutex::new(monitor)));

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("hostwatch_scrape_count_total"));
    }
}
