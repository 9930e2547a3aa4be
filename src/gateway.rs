//! Gateway orchestrator — ties settings, registry, traffic log, and the
//! HTTP server into a single manageable unit with a graceful shutdown.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tokio::net::TcpListener;

use crate::auth::{TokenVerifier, UrlSafetyCheck};
use crate::composite::Orchestrator;
use crate::config::Settings;
use crate::error::{GatewayError, Result};
use crate::proxy::{self, Forwarder};
use crate::registry::EndpointRegistry;
use crate::server::{self, AppState};
use crate::traffic::TrafficLogSink;
use crate::GatewayState;

/// The main gateway — coordinates all components
pub struct Gateway {
    settings: Arc<Settings>,
    registry: Arc<EndpointRegistry>,
    verifier: Arc<dyn TokenVerifier>,
    safety: Arc<dyn UrlSafetyCheck>,
    sink: Mutex<Option<Arc<TrafficLogSink>>>,
    state: RwLock<GatewayState>,
    start_time: Instant,
    shutdown: AtomicBool,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl Gateway {
    /// Create a gateway from validated settings and a loaded registry
    pub fn new(
        settings: Settings,
        registry: EndpointRegistry,
        verifier: Arc<dyn TokenVerifier>,
        safety: Arc<dyn UrlSafetyCheck>,
    ) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings: Arc::new(settings),
            registry: Arc::new(registry),
            verifier,
            safety,
            sink: Mutex::new(None),
            state: RwLock::new(GatewayState::Created),
            start_time: Instant::now(),
            shutdown: AtomicBool::new(false),
            handle: Mutex::new(None),
            local_addr: Mutex::new(None),
        })
    }

    /// Start the traffic log pipeline and bind the listener
    pub async fn start(&self) -> Result<()> {
        self.set_state(GatewayState::Starting);

        let sink = Arc::new(TrafficLogSink::start(&self.settings.traffic_log)?);
        *self.sink.lock().unwrap() = Some(sink.clone());

        let client = proxy::build_client(self.settings.proxy.use_default_credentials);
        let forwarder = Forwarder::new(
            client.clone(),
            self.settings.clone(),
            self.registry.clone(),
            self.safety.clone(),
        );
        let orchestrator = Orchestrator::new(
            client,
            self.registry.clone(),
            self.settings.environment.server_name.clone(),
        );

        let app_state = Arc::new(AppState {
            settings: self.settings.clone(),
            registry: self.registry.clone(),
            forwarder,
            orchestrator,
            verifier: self.verifier.clone(),
            sink,
            started_at: self.start_time,
        });

        let listener = TcpListener::bind(&self.settings.listen.address)
            .await
            .map_err(|e| {
                GatewayError::Config(format!(
                    "Failed to bind {}: {}",
                    self.settings.listen.address, e
                ))
            })?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock().unwrap() = Some(addr);

        tracing::info!(
            address = %addr,
            server_name = self.settings.environment.server_name,
            environments = ?self.settings.environment.allowed_environments,
            endpoints = self.registry.len(),
            "Gateway listening"
        );

        let handle = tokio::spawn(server::run(listener, app_state));
        *self.handle.lock().unwrap() = Some(handle);

        self.set_state(GatewayState::Running);
        Ok(())
    }

    /// Stop accepting requests, then drain and flush the traffic log
    pub async fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return; // Already shutting down
        }

        self.set_state(GatewayState::Stopping);
        tracing::info!("Gateway shutting down");

        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }

        let sink = self.sink.lock().unwrap().take();
        if let Some(sink) = sink {
            sink.shutdown().await;
        }

        self.set_state(GatewayState::Stopped);
        tracing::info!("Gateway stopped");
    }

    /// Wait for a shutdown signal (Ctrl+C)
    pub async fn wait_for_shutdown(&self) {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        self.shutdown().await;
    }

    /// Current gateway state
    pub fn state(&self) -> GatewayState {
        self.state.read().unwrap().clone()
    }

    /// Whether the gateway is accepting requests
    pub fn is_running(&self) -> bool {
        self.state() == GatewayState::Running
    }

    /// Whether shutdown has been requested
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Address the listener bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    /// Entries the traffic log evicted under backpressure
    pub fn traffic_log_dropped(&self) -> u64 {
        self.sink
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.dropped())
            .unwrap_or(0)
    }

    fn set_state(&self, new_state: GatewayState) {
        let mut state = self.state.write().unwrap();
        tracing::debug!(from = %*state, to = %new_state, "State transition");
        *state = new_state;
    }
}
