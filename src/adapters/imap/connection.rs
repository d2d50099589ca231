use std::future::Future;
use std::time::Duration;

use async_imap::error::Error as ImapError;
use async_imap::Session;
use async_native_tls::TlsStream;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info};

use crate::error::{Result, TriageError};

// An IMAP session is generic over the stream type. Ours is TLS over TCP,
// wrapped in the tokio compat layer.
pub type ImapSession = Session<TlsStream<Compat<TcpStream>>>;

/// Runs one IMAP command with a deadline. Expiry counts as a network failure.
pub async fn with_timeout<T, F>(limit: Duration, command: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, ImapError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(classify(command, e)),
        Err(_) => Err(TriageError::Network(format!(
            "{} timed out after {}s",
            command,
            limit.as_secs()
        ))),
    }
}

pub fn classify(command: &str, err: ImapError) -> TriageError {
    match err {
        ImapError::Io(e) => TriageError::Network(format!("{} failed: {}", command, e)),
        ImapError::ConnectionLost => TriageError::Network(format!("{} failed: connection lost", command)),
        other => TriageError::Protocol(format!("{} failed: {}", command, other)),
    }
}

pub async fn connect(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    limit: Duration,
) -> Result<ImapSession> {
    info!(host = %host, port = port, "Connecting to IMAP server");

    let tcp = tokio::time::timeout(limit, TcpStream::connect((host, port)))
        .await
        .map_err(|_| TriageError::Network(format!("TCP connect to {} timed out", host)))?
        .map_err(|e| TriageError::Network(format!("TCP connection failed: {}", e)))?;

    let tcp = tcp.compat();
    let tls = async_native_tls::TlsConnector::new();
    let tls_stream = tokio::time::timeout(limit, tls.connect(host, tcp))
        .await
        .map_err(|_| TriageError::Network(format!("TLS handshake with {} timed out", host)))?
        .map_err(|e| TriageError::Network(format!("TLS handshake failed: {}", e)))?;

    let client = async_imap::Client::new(tls_stream);

    let session = tokio::time::timeout(limit, client.login(username, password))
        .await
        .map_err(|_| TriageError::Network("LOGIN timed out".to_string()))?
        .map_err(|(e, _)| match e {
            ImapError::No(msg) | ImapError::Bad(msg) => {
                TriageError::Auth(format!("Login rejected: {}", msg))
            }
            other => classify("LOGIN", other),
        })?;

    debug!(host = %host, "IMAP login succeeded");
    Ok(session)
}
