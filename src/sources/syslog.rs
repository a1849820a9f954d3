//! Syslog-over-TLS source adapter (spec.md §4.9, §6, C9).
//!
//! Accepts connections iff the TLS handshake completes at the configured
//! minimum version (≥1.2) and, when an allow-list is configured, the peer
//! IP matches one of its CIDR blocks. Each accepted connection is read as
//! newline-delimited RFC-3164/5424 frames with an idle timeout, and runs
//! through its own [`crate::sources::BatchCollector`] before messages are
//! handed to the engine. Connections are bounded by `max_connections`
//! through a counting semaphore rather than a queue — past the limit, new
//! connections are accepted and immediately dropped (matching a TCP
//! listener backlog's natural behavior rather than a bespoke wait queue).

use super::{spawn_batch_collector, IngestSink, SourceAdapter};
use crate::error::AdapterError;
use crate::model::{SourceId, SyslogTlsConfig};
use async_trait::async_trait;
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::Duration;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct SyslogTlsAdapter {
    source_id: SourceId,
    config: SyslogTlsConfig,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl SyslogTlsAdapter {
    pub fn new(source_id: SourceId, config: SyslogTlsConfig) -> Self {
        Self {
            source_id,
            config,
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    fn load_tls_config(&self) -> Result<ServerConfig, AdapterError> {
        let certs = load_certs(&self.config.cert_path)
            .map_err(|e| AdapterError::TlsLoadFailed(format!("cert {}: {e}", self.config.cert_path)))?;
        let key = load_key(&self.config.key_path)
            .map_err(|e| AdapterError::TlsLoadFailed(format!("key {}: {e}", self.config.key_path)))?;

        let mut config = ServerConfig::builder_with_protocol_versions(&[
            &tokio_rustls::rustls::version::TLS12,
            &tokio_rustls::rustls::version::TLS13,
        ])
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| AdapterError::TlsLoadFailed(e.to_string()))?;
        config.alpn_protocols = vec![];
        Ok(config)
    }

    fn allow_list(&self) -> Result<Vec<IpNetwork>, AdapterError> {
        self.config
            .allow_cidrs
            .iter()
            .map(|cidr| {
                cidr.parse::<IpNetwork>()
                    .map_err(|e| AdapterError::TlsLoadFailed(format!("invalid allow_cidrs entry {cidr:?}: {e}")))
            })
            .collect()
    }
}

fn is_allowed(allow_list: &[IpNetwork], peer: IpAddr) -> bool {
    allow_list.is_empty() || allow_list.iter().any(|net| net.contains(peer))
}

#[async_trait]
impl SourceAdapter for SyslogTlsAdapter {
    async fn start(&self, sink: Arc<dyn IngestSink>) -> Result<(), AdapterError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(AdapterError::AlreadyRunning);
        }
        let tls_config = self.load_tls_config()?;
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let allow_list = self.allow_list()?;

        let listener = TcpListener::bind(&self.config.bind_addr).await.map_err(|e| {
            AdapterError::BindFailed { addr: self.config.bind_addr.clone(), message: e.to_string() }
        })?;
        info!(addr = %self.config.bind_addr, source = %self.source_id, "syslog-tls listener bound");

        let source_id = self.source_id;
        let batch_size = self.config.batch_size.max(1);
        let batch_timeout = Duration::from_millis(self.config.batch_timeout_ms.max(1));
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs.max(1));
        let connection_slots = Arc::new(Semaphore::new(self.config.max_connections.max(1)));
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(source = %source_id, "syslog-tls listener shutting down");
                        break;
                    }
                    accepted = listener.accept() => {
                        let (stream, peer_addr) = match accepted {
                            Ok(pair) => pair,
                            Err(err) => {
                                warn!(%err, "syslog-tls accept failed");
                                continue;
                            }
                        };
                        if !is_allowed(&allow_list, peer_addr.ip()) {
                            debug!(peer = %peer_addr, "syslog-tls connection rejected by allow-list");
                            continue;
                        }
                        let Ok(permit) = connection_slots.clone().try_acquire_owned() else {
                            debug!(peer = %peer_addr, "syslog-tls max_connections reached, dropping connection");
                            continue;
                        };
                        let acceptor = acceptor.clone();
                        let sink = sink.clone();
                        let conn_cancel = cancel.clone();
                        tokio::spawn(async move {
                            let _permit = permit;
                            if let Err(err) = handle_connection(
                                acceptor, stream, peer_addr, source_id, batch_size, batch_timeout, idle_timeout, sink, conn_cancel,
                            )
                            .await
                            {
                                debug!(peer = %peer_addr, %err, "syslog-tls connection ended");
                            }
                        });
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(AdapterError::NotRunning);
        }
        self.cancel.cancel();
        Ok(())
    }
}

async fn handle_connection(
    acceptor: TlsAcceptor,
    stream: tokio::net::TcpStream,
    peer_addr: std::net::SocketAddr,
    source_id: SourceId,
    batch_size: usize,
    batch_timeout: Duration,
    idle_timeout: Duration,
    sink: Arc<dyn IngestSink>,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let tls_stream = acceptor.accept(stream).await?;
    debug!(peer = %peer_addr, "syslog-tls handshake complete");

    let (tx, rx) = mpsc::channel::<String>(1024);
    let collector = spawn_batch_collector(source_id, batch_size, batch_timeout, sink, rx);

    let mut reader = BufReader::new(tls_stream).lines();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = tokio::time::timeout(idle_timeout, reader.next_line()) => {
                match line {
                    Ok(Ok(Some(line))) => {
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Ok(Ok(None)) => break,
                    Ok(Err(err)) => return Err(err),
                    Err(_elapsed) => {
                        debug!(peer = %peer_addr, "syslog-tls connection idle timeout");
                        break;
                    }
                }
            }
        }
    }
    drop(tx);
    let _ = collector.await;
    Ok(())
}

fn load_certs(path: &str) -> std::io::Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::certs(&mut reader).collect()
}

fn load_key(path: &str) -> std::io::Result<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "no private key found"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allow_list_permits_any_peer() {
        assert!(is_allowed(&[], "203.0.113.9".parse().unwrap()));
    }

    #[test]
    fn allow_list_matches_cidr() {
        let list = vec!["10.0.0.0/8".parse().unwrap()];
        assert!(is_allowed(&list, "10.1.2.3".parse().unwrap()));
        assert!(!is_allowed(&list, "203.0.113.9".parse().unwrap()));
    }
}
