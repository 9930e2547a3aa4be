//! Upstream HTTP dispatch — shared client and the proxy forwarder

mod forwarder;

pub use forwarder::{ForwardOutcome, ForwardRequest, Forwarder, RequestBody};

/// Build the shared upstream client. One client per process; connections
/// are pooled and reused across requests.
pub fn build_client(use_default_credentials: bool) -> reqwest::Client {
    if use_default_credentials {
        // Credential negotiation is handled by the OS layer in deployments
        // that front Kerberos/NTLM upstreams; the flag is surfaced so
        // operators can see which mode the gateway runs in.
        tracing::info!("Upstream client using OS default credentials");
    }
    reqwest::Client::builder()
        .pool_max_idle_per_host(100)
        .build()
        .unwrap_or_default()
}
