use async_imap::Session;
use tokio::net::TcpStream;
use tokio_native_tls::native_tls::TlsConnector;
use tokio_native_tls::TlsStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::error::{Error, Result};

pub type ImapSession = Session<Compat<TlsStream<TcpStream>>>;

/// Open a TLS session and authenticate.
pub async fn connect(
    host: &str,
    port: u16,
    user: &str,
    pass: &str,
    accept_invalid_certs: bool,
) -> Result<ImapSession> {
    let tcp = TcpStream::connect((host, port))
        .await
        .map_err(|e| Error::Network(format!("tcp connect {host}:{port}: {e}")))?;
    let tls = TlsConnector::builder()
        .danger_accept_invalid_certs(accept_invalid_certs)
        .build()?;
    let tls = tokio_native_tls::TlsConnector::from(tls);
    let tls_stream = tls
        .connect(host, tcp)
        .await
        .map_err(|e| Error::Network(format!("tls handshake {host}: {e}")))?;
    let client = async_imap::Client::new(tls_stream.compat());
    let session = client
        .login(user, pass)
        .await
        .map_err(|(e, _)| Error::Network(format!("login failed for {user}: {e}")))?;
    Ok(session)
}
