//! Executes a single check against a monitor's URL.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Url, redirect::Policy};
use rustls::pki_types::ServerName;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use super::error::{NetworkFailure, ProbeError};
use super::models::{CheckResult, CheckStatus, Monitor};

pub const DEFAULT_CERT_EXPIRY_WARNING_DAYS: i64 = 14;

/// Runs one check. Implementations never fail: every error becomes a `down`
/// result carrying a cause.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, monitor: &Monitor) -> CheckResult;
}

#[derive(Debug, Clone, PartialEq)]
struct CertificateInfo {
    valid: bool,
    days_until_expiry: Option<i64>,
}

pub struct HttpProber {
    client: Client,
    tls: TlsConnector,
    location: Option<String>,
    cert_warning_days: i64,
}

impl HttpProber {
    pub fn new(location: Option<String>, cert_warning_days: i64) -> Result<Self, ProbeError> {
        let client = Client::builder()
            .redirect(Policy::limited(5))
            .user_agent(concat!("uptime-monitor/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProbeError::network(NetworkFailure::Other, e.to_string()))?;

        let mut roots = rustls::RootCertStore::empty();
        let native = rustls_native_certs::load_native_certs();
        for error in &native.errors {
            warn!(error = %error, "Failed to load a native root certificate.");
        }
        let (added, ignored) = roots.add_parsable_certificates(native.certs);
        debug!(added, ignored, "Loaded native root certificates.");

        let config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::aws_lc_rs::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| ProbeError::network(NetworkFailure::Tls, e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

        Ok(Self {
            client,
            tls: TlsConnector::from(Arc::new(config)),
            location,
            cert_warning_days,
        })
    }

    async fn run(&self, monitor: &Monitor, timeout: Duration, result: &mut CheckResult) -> Result<(), ProbeError> {
        let url = Url::parse(&monitor.url)
            .map_err(|e| ProbeError::InvalidResponse(format!("invalid URL: {e}")))?;
        let host = url
            .host_str()
            .ok_or_else(|| ProbeError::InvalidResponse("URL has no host".to_string()))?
            .to_string();
        let port = url.port_or_known_default().unwrap_or(80);

        let resolved = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map(|mut addrs| addrs.next().is_some());
        match resolved {
            Ok(true) => result.dns_ok = Some(true),
            Ok(false) => {
                result.dns_ok = Some(false);
                return Err(ProbeError::network(NetworkFailure::Dns, format!("{host} resolved to no addresses")));
            }
            Err(e) => {
                result.dns_ok = Some(false);
                return Err(ProbeError::network(NetworkFailure::Dns, e.to_string()));
            }
        }

        // `send` resolves once the response head arrives, so this measures
        // connect + TLS + first byte, not the body download.
        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| classify_request_error(&e, timeout))?;
        result.response_time_ms = started.elapsed().as_millis() as u64;

        let status = response.status();
        result.http_status_code = Some(status.as_u16());
        drop(response);

        if status.is_success() || status.is_redirection() {
            Ok(())
        } else {
            Err(ProbeError::InvalidResponse(format!("unexpected status {status}")))
        }
    }

    async fn inspect_certificate(&self, host: &str, port: u16) -> CertificateInfo {
        let invalid = CertificateInfo {
            valid: false,
            days_until_expiry: None,
        };
        let Ok(server_name) = ServerName::try_from(host.to_string()) else {
            return invalid;
        };
        let stream = match TcpStream::connect((host, port)).await {
            Ok(s) => s,
            Err(e) => {
                debug!(host, error = %e, "Certificate inspection could not connect.");
                return invalid;
            }
        };
        let tls = match self.tls.connect(server_name, stream).await {
            Ok(tls) => tls,
            Err(e) => {
                debug!(host, error = %e, "TLS handshake failed during certificate inspection.");
                return invalid;
            }
        };

        let (_, session) = tls.get_ref();
        let days_until_expiry = session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .and_then(|leaf| x509_parser::parse_x509_certificate(leaf.as_ref()).ok())
            .map(|(_, cert)| (cert.validity().not_after.timestamp() - Utc::now().timestamp()) / 86_400);

        CertificateInfo {
            valid: true,
            days_until_expiry,
        }
    }
}

/// Maps a reqwest failure onto the probe error taxonomy.
fn classify_request_error(error: &reqwest::Error, timeout: Duration) -> ProbeError {
    if error.is_timeout() {
        return ProbeError::Timeout(timeout);
    }

    let mut source: Option<&(dyn StdError + 'static)> = error.source();
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return ProbeError::network(NetworkFailure::ConnectionRefused, error.to_string());
            }
            if io.get_ref().is_some_and(|inner| inner.is::<rustls::Error>()) {
                return ProbeError::network(NetworkFailure::Tls, error.to_string());
            }
        }
        if err.downcast_ref::<rustls::Error>().is_some() {
            return ProbeError::network(NetworkFailure::Tls, error.to_string());
        }
        source = err.source();
    }

    ProbeError::network(NetworkFailure::Other, error.to_string())
}

/// Copies certificate details onto the result. `None` means inspection ran
/// out of time. Certificate findings never change the check status.
fn apply_certificate(result: &mut CheckResult, cert: Option<CertificateInfo>, warning_days: i64) {
    match cert {
        Some(cert) => {
            result.ssl_valid = Some(cert.valid);
            result.ssl_days_until_expiry = cert.days_until_expiry;
            if let Some(warning) = expiry_warning(cert.days_until_expiry, warning_days) {
                result.warning = Some(warning);
            }
        }
        None => {
            result.ssl_valid = None;
            result.ssl_days_until_expiry = None;
            result.warning = Some("certificate inspection timed out".to_string());
        }
    }
}

fn expiry_warning(days_until_expiry: Option<i64>, warning_days: i64) -> Option<String> {
    let days = days_until_expiry?;
    (days <= warning_days).then(|| format!("certificate expires in {days} days"))
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, monitor: &Monitor) -> CheckResult {
        let timeout = monitor.probe_timeout();
        let started = Instant::now();
        let mut result = CheckResult::up(monitor.id, Utc::now(), 0);
        result.location = self.location.clone();

        let outcome = match tokio::time::timeout(timeout, self.run(monitor, timeout, &mut result)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProbeError::Timeout(timeout)),
        };

        // Only targets that answered over HTTPS get a certificate look, and
        // only within what is left of the probe timeout.
        let https_target = Url::parse(&monitor.url)
            .ok()
            .filter(|url| url.scheme() == "https")
            .and_then(|url| Some((url.host_str()?.to_string(), url.port_or_known_default()?)));
        if let (Some((host, port)), Some(_)) = (https_target, result.http_status_code) {
            let remaining = timeout.saturating_sub(started.elapsed());
            let cert = tokio::time::timeout(remaining, self.inspect_certificate(&host, port))
                .await
                .ok();
            if cert.is_none() {
                debug!(monitor_id = monitor.id, "Certificate inspection exceeded the probe budget.");
            }
            apply_certificate(&mut result, cert, self.cert_warning_days);
        }

        if let Err(e) = outcome {
            debug!(monitor_id = monitor.id, error = %e, "Probe failed.");
            result.status = CheckStatus::Down;
            result.cause = Some(e.cause());
            if result.response_time_ms == 0 {
                result.response_time_ms = started.elapsed().as_millis() as u64;
            }
        }
        result
    }
}
