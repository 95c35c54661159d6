//! Prometheus scrape endpoint.
//!
//! `GET /metrics` renders the collector in the text exposition format,
//! `GET /healthz` answers `ok`, anything else is a 404.

use std::convert::Infallible;
use std::fmt::Write as _;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::collector::MetricsCollector;
use super::types::ScenarioEvent;
use crate::engine::GeneratorState;

const PREFIX: &str = "pg_contention";
const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Accept scrapes on `addr` until `shutdown` fires.
///
/// Bind and accept failures are logged; the engine keeps running without
/// its endpoint.
pub async fn serve(addr: SocketAddr, collector: MetricsCollector, shutdown: CancellationToken) {
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "metrics endpoint could not bind");
            return;
        }
    };
    tracing::info!(%addr, "metrics endpoint listening");

    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!(error = %e, "metrics endpoint accept failed");
                    continue;
                }
            },
        };

        let collector = collector.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let collector = collector.clone();
                async move { handle_request(req, &collector) }
            });
            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(io, service)
                .await
            {
                tracing::debug!(%peer, error = %e, "metrics connection closed with error");
            }
        });
    }

    tracing::info!("metrics endpoint stopped");
}

fn handle_request(
    req: Request<Incoming>,
    collector: &MetricsCollector,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let mut resp = Response::new(Full::new(Bytes::from(render_prometheus(collector))));
            resp.headers_mut()
                .insert(CONTENT_TYPE, hyper::header::HeaderValue::from_static(TEXT_FORMAT));
            resp
        }
        (&Method::GET, "/healthz") => Response::new(Full::new(Bytes::from_static(b"ok\n"))),
        _ => {
            let mut resp = Response::new(Full::new(Bytes::from_static(b"Not Found\n")));
            *resp.status_mut() = StatusCode::NOT_FOUND;
            resp
        }
    };
    Ok(response)
}

/// Render every collected metric in the Prometheus text format.
pub fn render_prometheus(collector: &MetricsCollector) -> String {
    let metrics = collector.get_snapshot();
    let mut out = String::new();

    header(&mut out, "cycles_total", "counter", "Scenario cycles by outcome.");
    for (name, s) in &metrics.scenarios {
        for (outcome, value) in [
            ("started", s.cycles.started),
            ("completed", s.cycles.completed),
            ("failed", s.cycles.failed),
        ] {
            let _ = writeln!(
                out,
                "{PREFIX}_cycles_total{{scenario=\"{name}\",outcome=\"{outcome}\"}} {value}"
            );
        }
    }

    header(&mut out, "errors_total", "counter", "Failed cycles by error kind.");
    for (name, s) in &metrics.scenarios {
        for (kind, value) in &s.errors {
            let _ = writeln!(
                out,
                "{PREFIX}_errors_total{{scenario=\"{name}\",kind=\"{kind}\"}} {value}"
            );
        }
    }

    header(&mut out, "events_total", "counter", "Commits, rollbacks, deadlock aborts, lock waits, timeouts and restarts.");
    for (name, s) in &metrics.scenarios {
        for event in ScenarioEvent::ALL {
            let _ = writeln!(
                out,
                "{PREFIX}_events_total{{scenario=\"{name}\",event=\"{event}\"}} {}",
                s.event_count(event)
            );
        }
    }

    header(&mut out, "generator_state", "gauge", "Current generator state, one-hot.");
    for (name, s) in &metrics.scenarios {
        for state in GeneratorState::ALL {
            let _ = writeln!(
                out,
                "{PREFIX}_generator_state{{scenario=\"{name}\",state=\"{state}\"}} {}",
                u8::from(s.state == state)
            );
        }
    }

    header(&mut out, "cycle_duration_ms", "summary", "Cycle wall time in milliseconds.");
    for name in metrics.scenarios.keys() {
        if let Some(latency) = collector.get_cycle_latency(name) {
            for (quantile, value) in [("0.5", latency.p50), ("0.95", latency.p95), ("0.99", latency.p99)] {
                let _ = writeln!(
                    out,
                    "{PREFIX}_cycle_duration_ms{{scenario=\"{name}\",quantile=\"{quantile}\"}} {value}"
                );
            }
            let _ = writeln!(
                out,
                "{PREFIX}_cycle_duration_ms_sum{{scenario=\"{name}\"}} {:.0}",
                latency.mean * latency.count as f64
            );
            let _ = writeln!(
                out,
                "{PREFIX}_cycle_duration_ms_count{{scenario=\"{name}\"}} {}",
                latency.count
            );
        }
    }

    header(&mut out, "pool_connections", "gauge", "Open connections in the shared pool.");
    let _ = writeln!(out, "{PREFIX}_pool_connections{{state=\"open\"}} {}", metrics.pool.size);
    let _ = writeln!(out, "{PREFIX}_pool_connections{{state=\"idle\"}} {}", metrics.pool.idle);

    header(&mut out, "exhaustion_in_flight", "gauge", "Pool-exhaustion sleepers holding a connection.");
    let _ = writeln!(out, "{PREFIX}_exhaustion_in_flight {}", metrics.pool.in_flight);
    header(&mut out, "exhaustion_in_flight_peak", "gauge", "Highest pool-exhaustion in-flight count seen.");
    let _ = writeln!(out, "{PREFIX}_exhaustion_in_flight_peak {}", metrics.pool.peak_in_flight);

    header(&mut out, "uptime_seconds", "gauge", "Seconds since the collector was created.");
    let _ = writeln!(out, "{PREFIX}_uptime_seconds {}", collector.elapsed_seconds());

    out
}

fn header(out: &mut String, metric: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {PREFIX}_{metric} {help}");
    let _ = writeln!(out, "# TYPE {PREFIX}_{metric} {kind}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_render_includes_counters_and_state() {
        let collector = MetricsCollector::new();
        collector.cycle_started("deadlock_induction");
        collector.cycle_failed("deadlock_induction", "deadlock", Duration::from_millis(2500));
        collector.record_event("deadlock_induction", ScenarioEvent::DeadlockAbort);
        collector.set_state("deadlock_induction", GeneratorState::Cooldown);
        collector.in_flight_inc();

        let text = render_prometheus(&collector);

        assert!(text.contains("# TYPE pg_contention_cycles_total counter"));
        assert!(text.contains(
            "pg_contention_cycles_total{scenario=\"deadlock_induction\",outcome=\"failed\"} 1"
        ));
        assert!(text.contains(
            "pg_contention_errors_total{scenario=\"deadlock_induction\",kind=\"deadlock\"} 1"
        ));
        assert!(text.contains(
            "pg_contention_events_total{scenario=\"deadlock_induction\",event=\"deadlock_abort\"} 1"
        ));
        assert!(text.contains(
            "pg_contention_generator_state{scenario=\"deadlock_induction\",state=\"cooldown\"} 1"
        ));
        assert!(text.contains(
            "pg_contention_generator_state{scenario=\"deadlock_induction\",state=\"work\"} 0"
        ));
        assert!(text.contains("pg_contention_cycle_duration_ms_count{scenario=\"deadlock_induction\"} 1"));
        assert!(text.contains("pg_contention_exhaustion_in_flight 1"));
    }

    #[test]
    fn test_render_with_no_scenarios_still_has_pool_gauges() {
        let text = render_prometheus(&MetricsCollector::new());
        assert!(text.contains("pg_contention_pool_connections{state=\"open\"} 0"));
        assert!(!text.contains("scenario=\""));
    }

    #[tokio::test]
    async fn test_serve_answers_health_and_metrics() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Grab a free port, then hand it to the server
        let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let collector = MetricsCollector::new();
        collector.cycle_started("heavy_write");
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(addr, collector, shutdown.clone()));

        let mut stream = None;
        for _ in 0..50 {
            match tokio::net::TcpStream::connect(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
            }
        }
        let mut stream = stream.expect("metrics endpoint never came up");

        stream
            .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();
        assert!(body.starts_with("HTTP/1.1 200 OK"));
        assert!(body.contains("scenario=\"heavy_write\",outcome=\"started\"} 1"));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /nope HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();
        assert!(body.starts_with("HTTP/1.1 404"));

        shutdown.cancel();
        server.await.unwrap();
    }
}
