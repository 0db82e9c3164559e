// QUIC endpoints carrying flow streams between nodes.
use anyhow::{Context, Result, anyhow};
use quinn::{ClientConfig, Connection, Endpoint, RecvStream, SendStream, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub mod tls;

/// Transport-level configuration defaults.
///
/// ```
/// use flow_transport::TransportConfig;
///
/// let config = TransportConfig::default();
/// assert!(config.max_streams > 0);
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    // Every outbox opens one bidi stream, so this bounds concurrent streams per peer.
    pub max_streams: u16,
    pub keep_alive: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_streams: 1024,
            keep_alive: Some(Duration::from_secs(5)),
        }
    }
}

impl TransportConfig {
    fn quinn_transport_config(&self) -> quinn::TransportConfig {
        let mut config = quinn::TransportConfig::default();
        config.max_concurrent_bidi_streams(quinn::VarInt::from_u32(self.max_streams as u32));
        // Flow streams are always bidirectional.
        config.max_concurrent_uni_streams(quinn::VarInt::from_u32(0));
        config.keep_alive_interval(self.keep_alive);
        config
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer_addr: SocketAddr,
}

/// Listening side; consumers accept producer streams here.
#[derive(Debug)]
pub struct QuicServer {
    endpoint: Endpoint,
}

impl QuicServer {
    pub fn bind(
        addr: SocketAddr,
        mut server_config: ServerConfig,
        transport: &TransportConfig,
    ) -> Result<Self> {
        server_config.transport_config(Arc::new(transport.quinn_transport_config()));
        let endpoint = Endpoint::server(server_config, addr).context("bind QUIC server")?;
        Ok(Self { endpoint })
    }

    pub async fn accept(&self) -> Result<QuicConnection> {
        let incoming = self
            .endpoint
            .accept()
            .await
            .ok_or_else(|| anyhow!("QUIC endpoint closed"))?;
        let connection = incoming.await.context("accept QUIC connection")?;
        Ok(QuicConnection::new(connection))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.endpoint
            .local_addr()
            .context("read QUIC local address")
    }
}

/// Dialing side; producers connect to the consumer's node.
#[derive(Debug, Clone)]
pub struct QuicClient {
    endpoint: Endpoint,
}

impl QuicClient {
    pub fn bind(
        addr: SocketAddr,
        mut client_config: ClientConfig,
        transport: &TransportConfig,
    ) -> Result<Self> {
        client_config.transport_config(Arc::new(transport.quinn_transport_config()));
        let mut endpoint = Endpoint::client(addr).context("bind QUIC client")?;
        endpoint.set_default_client_config(client_config);
        Ok(Self { endpoint })
    }

    pub async fn connect(&self, addr: SocketAddr, server_name: &str) -> Result<QuicConnection> {
        let connecting = self
            .endpoint
            .connect(addr, server_name)
            .context("initiate QUIC connection")?;
        let connection = connecting.await.context("establish QUIC connection")?;
        Ok(QuicConnection::new(connection))
    }

    /// Connect, giving up once `timeout` elapses.
    ///
    /// ```no_run
    /// use flow_transport::QuicClient;
    /// use std::time::Duration;
    ///
    /// async fn dial(client: QuicClient) -> anyhow::Result<()> {
    ///     let addr = "127.0.0.1:5000".parse()?;
    ///     let _connection = client
    ///         .connect_timeout(addr, "localhost", Duration::from_secs(1))
    ///         .await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn connect_timeout(
        &self,
        addr: SocketAddr,
        server_name: &str,
        timeout: Duration,
    ) -> Result<QuicConnection> {
        tokio::time::timeout(timeout, self.connect(addr, server_name))
            .await
            .map_err(|_| anyhow!("connection to {addr} timed out after {timeout:?}"))?
    }
}

/// Live QUIC connection; cheap to clone, closed when the last handle and stream drop.
#[derive(Debug, Clone)]
pub struct QuicConnection {
    inner: Connection,
    info: ConnectionInfo,
}

impl QuicConnection {
    fn new(connection: Connection) -> Self {
        let info = ConnectionInfo {
            id: ConnectionId(connection.stable_id() as u64),
            peer_addr: connection.remote_address(),
        };
        Self {
            inner: connection,
            info,
        }
    }

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub async fn open_bi(&self) -> Result<(SendStream, RecvStream)> {
        self.inner.open_bi().await.context("open bidi stream")
    }

    pub async fn accept_bi(&self) -> Result<(SendStream, RecvStream)> {
        self.inner.accept_bi().await.context("accept bidi stream")
    }

    pub fn close(&self, reason: &str) {
        self.inner.close(quinn::VarInt::from_u32(0), reason.as_bytes());
    }
}
