#![allow(dead_code)]

use async_trait::async_trait;
use axum::{Router, http::StatusCode, routing::any};
use conn_check::{
    config::Config,
    probe::{Endpoints, ProbeRequest},
    transport::{Transport, TransportError, Transports},
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Serves `status` on `/generate_204` after `delay` and returns the URL.
pub async fn spawn_responder(status: u16, delay: Duration) -> String {
    let app = Router::new().route(
        "/generate_204",
        any(move || async move {
            tokio::time::sleep(delay).await;
            StatusCode::from_u16(status).expect("valid status")
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind responder");
    let addr = listener.local_addr().expect("responder addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}/generate_204")
}

/// A URL on a port nothing listens on.
pub async fn refused_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("http://{addr}/generate_204")
}

/// Default config with the environment proxy ignored, so local responders
/// are reached directly.
pub fn local_config() -> Config {
    let mut cfg = Config::default();
    cfg.system_transport.proxy_from_env = false;
    cfg
}

pub fn real_transports() -> Transports {
    Transports::from_config(&local_config())
}

#[derive(Debug, Clone, Copy)]
pub enum Behaviour {
    Status(u16),
    Fail,
    TimeOut,
    Hang,
    After(Duration, u16),
}

/// Answers by scheme without touching the network.
pub struct FakeTransport {
    http: Behaviour,
    https: Behaviour,
    calls: AtomicUsize,
}

impl FakeTransport {
    pub fn new(http: Behaviour, https: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            http,
            https,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn issue_request(&self, request: &ProbeRequest) -> Result<u16, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behaviour = if request.url.starts_with("https://") {
            self.https
        } else {
            self.http
        };
        match behaviour {
            Behaviour::Status(status) => Ok(status),
            Behaviour::Fail => Err(TransportError::Failed("unreachable".into())),
            Behaviour::TimeOut => Err(TransportError::Timeout(request.timeout)),
            Behaviour::Hang => std::future::pending().await,
            Behaviour::After(delay, status) => {
                tokio::time::sleep(delay).await;
                Ok(status)
            }
        }
    }
}

pub fn fake_endpoints() -> Endpoints {
    Endpoints::new("http://probe.test/generate_204", "https://probe.test/generate_204")
}

pub fn fake_transports(http: Behaviour, https: Behaviour) -> Transports {
    let fake = FakeTransport::new(http, https);
    Transports::new(fake.clone(), fake)
}
