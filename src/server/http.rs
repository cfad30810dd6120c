// src/server/http.rs
//! HTTP front end
//!
//! Routes:
//!
//! | Method     | Path                  | Response                                |
//! |------------|-----------------------|-----------------------------------------|
//! | GET, POST  | `/record/{seconds}`   | `Recording #<id> started`               |
//! | GET        | `/stream/{seconds}`   | `text/event-stream`, one message/event  |
//! | GET        | `/guess/{number}`     | hint text                               |
//! | GET        | `/sessions`           | JSON list of running sessions           |
//! | GET        | `/metrics`            | Prometheus exposition                   |
//! | GET        | `/health`             | `ok`                                    |

use crate::capture::archive::ArchiveRecorder;
use crate::capture::configurator::SessionConfigurator;
use crate::capture::streaming::StreamingPipeline;
use crate::instrumentation::flight_recorder::FlightRecorder;
use crate::instrumentation::probes::timed_sleep;
use crate::server::demo::GuessGame;
use crate::utils::config::{EngineConfig, ServerConfig};
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use metrics_exporter_prometheus::PrometheusHandle;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

pub type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// HTTP server exposing the capture modes
pub struct CaptureServer {
    recorder: Arc<FlightRecorder>,
    archives: ArchiveRecorder,
    streams: StreamingPipeline,
    game: GuessGame,
    metrics: Option<PrometheusHandle>,
}

impl CaptureServer {
    pub fn new(
        recorder: Arc<FlightRecorder>,
        archives: ArchiveRecorder,
        streams: StreamingPipeline,
        game: GuessGame,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            recorder,
            archives,
            streams,
            game,
            metrics,
        }
    }

    /// Wire every component from configuration with the default capture table
    pub fn from_config(
        recorder: Arc<FlightRecorder>,
        config: &EngineConfig,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let configurator = SessionConfigurator::default();
        Self::new(
            Arc::clone(&recorder),
            ArchiveRecorder::new(
                Arc::clone(&recorder),
                configurator.clone(),
                config.archive.clone(),
            ),
            StreamingPipeline::new(
                Arc::clone(&recorder),
                configurator,
                config.streaming.clone(),
            ),
            GuessGame::from_config(Arc::clone(&recorder), &config.demo),
            metrics,
        )
    }

    pub fn game(&self) -> &GuessGame {
        &self.game
    }

    /// Bind the configured listen address
    pub async fn bind(config: &ServerConfig) -> Result<TcpListener> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .map_err(|e| {
                EngineError::Configuration(format!(
                    "Invalid listen address {}:{}: {}",
                    config.host, config.port, e
                ))
            })?;

        TcpListener::bind(addr)
            .await
            .map_err(|e| EngineError::Server(format!("Failed to bind {}: {}", addr, e)))
    }

    /// Accept connections until `shutdown` resolves
    pub async fn serve<F>(self: Arc<Self>, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!("Capture server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&self);

                        tokio::spawn(async move {
                            debug!("Accepted connection from {}", peer);

                            let io = TokioIo::new(stream);
                            let service = service_fn(move |req| {
                                let server = Arc::clone(&server);
                                async move { Ok::<_, Infallible>(server.handle_request(req).await) }
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                debug!("Connection from {} ended: {}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                }
            }
        }
    }

    async fn handle_request(self: Arc<Self>, req: Request<Incoming>) -> Response<ResponseBody> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        debug!("{} {}", method, path);

        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        let result = match (&method, segments.as_slice()) {
            (&Method::GET | &Method::POST, ["record", seconds]) => {
                Arc::clone(&self).record(seconds).await
            }
            (&Method::GET, ["stream", seconds]) => self.stream(seconds),
            (&Method::GET, ["guess", number]) => Arc::clone(&self).guess(number).await,
            (&Method::GET, ["sessions"]) => self.sessions(),
            (&Method::GET, ["metrics"]) => Ok(self.metrics()),
            (&Method::GET, ["health"]) => Ok(text(StatusCode::OK, "ok\n")),
            _ => Ok(text(StatusCode::NOT_FOUND, "Not found\n")),
        };

        result.unwrap_or_else(|e| {
            warn!("{} {} failed: {}", method, path, e);
            error_response(&e)
        })
    }

    async fn record(self: Arc<Self>, seconds: &str) -> Result<Response<ResponseBody>> {
        let seconds = parse_number(seconds, "duration")?;

        // clearing stale files and writing the header touch the disk
        let ticket = tokio::task::spawn_blocking(move || self.archives.start(seconds))
            .await
            .map_err(|e| EngineError::Server(format!("Record task failed: {}", e)))??;
        Ok(text(
            StatusCode::OK,
            format!("Recording #{} started\n", ticket.id),
        ))
    }

    fn stream(&self, seconds: &str) -> Result<Response<ResponseBody>> {
        let session = self.streams.start(parse_number(seconds, "duration")?)?;

        let frames = session
            .into_events()
            .map(|frame| Ok::<_, Infallible>(Frame::data(frame)));
        let mut response = Response::new(StreamBody::new(frames).boxed_unsync());
        let headers = response.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        Ok(response)
    }

    async fn guess(self: Arc<Self>, number: &str) -> Result<Response<ResponseBody>> {
        let number = parse_number(number, "guess")?;

        let delay = self.game.answer_delay();
        if !delay.is_zero() {
            timed_sleep(&self.recorder, delay).await;
        }

        // committing may block on a full stream queue
        let hint = tokio::task::spawn_blocking(move || self.game.guess(number))
            .await
            .map_err(|e| EngineError::Server(format!("Guess task failed: {}", e)))?;

        Ok(text(StatusCode::OK, format!("{}\n", hint)))
    }

    fn sessions(&self) -> Result<Response<ResponseBody>> {
        let body = serde_json::to_vec(&self.recorder.active_sessions())
            .map_err(|e| EngineError::Server(format!("Failed to encode sessions: {}", e)))?;

        let mut response = Response::new(full(body));
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(response)
    }

    fn metrics(&self) -> Response<ResponseBody> {
        match &self.metrics {
            Some(handle) => {
                let mut response = Response::new(full(handle.render()));
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; version=0.0.4"));
                response
            }
            None => text(StatusCode::NOT_FOUND, "Metrics are not enabled\n"),
        }
    }
}

fn parse_number(segment: &str, what: &str) -> Result<i64> {
    segment.parse().map_err(|_| {
        EngineError::Configuration(format!("Invalid {} {:?}", what, segment))
    })
}

fn status_of(error: &EngineError) -> StatusCode {
    match error {
        EngineError::Configuration(_) => StatusCode::BAD_REQUEST,
        EngineError::Start(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(error: &EngineError) -> Response<ResponseBody> {
    text(status_of(error), format!("{}\n", error))
}

fn full(body: impl Into<Bytes>) -> ResponseBody {
    Full::new(body.into()).boxed_unsync()
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<ResponseBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_of(&EngineError::Configuration("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(&EngineError::Activation("rejected".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(&EngineError::Start("busy".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("15", "duration").unwrap(), 15);
        assert_eq!(parse_number("-2", "duration").unwrap(), -2);
        assert!(matches!(
            parse_number("soon", "duration"),
            Err(EngineError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_bind_rejects_bad_host() {
        let config = ServerConfig {
            host: "not an address".to_string(),
            port: 0,
        };
        assert!(matches!(
            CaptureServer::bind(&config).await,
            Err(EngineError::Configuration(_))
        ));
    }
}
