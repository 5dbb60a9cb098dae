//! Listener for lookup connections over TCP or Unix sockets.
//!
//! Binds the configured endpoint, accepts connections, and runs each one
//! as an independent task against the shared dataset.

use crate::config::{Config, Network};
use crate::connection::Connection;
use crate::dataset::Dataset;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UnixListener};
use tracing::{debug, error, info, warn};

/// Pause after a failed accept before trying again
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Listen backlog for TCP sockets
const LISTEN_BACKLOG: i32 = 1024;

/// A bound listening socket.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener, PathBuf),
}

impl Listener {
    /// Bind the endpoint for the given network.
    pub async fn bind(network: Network, endpoint: &str) -> io::Result<Self> {
        match network {
            Network::Unix => {
                let path = PathBuf::from(endpoint);
                let listener = UnixListener::bind(&path)?;
                Ok(Listener::Unix(listener, path))
            }
            Network::Tcp | Network::Tcp4 | Network::Tcp6 => {
                let (host, port) = split_host_port(endpoint)?;
                let listener = if host.is_empty() {
                    bind_unspecified(network, port)?
                } else {
                    let addr = resolve(network, host, port).await?;
                    create_tcp_listener(addr, network == Network::Tcp6)?
                };
                Ok(Listener::Tcp(TcpListener::from_std(listener)?))
            }
        }
    }

    /// Address the listener is bound to, for logging.
    pub fn local_addr(&self) -> io::Result<String> {
        match self {
            Listener::Tcp(listener) => Ok(listener.local_addr()?.to_string()),
            Listener::Unix(_, path) => Ok(path.display().to_string()),
        }
    }
}

/// Server instance
pub struct Server {
    listener: Listener,
    dataset: Arc<Dataset>,
}

impl Server {
    /// Bind the configured endpoint.
    pub async fn bind(config: &Config, dataset: Arc<Dataset>) -> io::Result<Self> {
        let listener = Listener::bind(config.network, &config.endpoint).await?;
        info!(
            network = %config.network,
            address = %listener.local_addr()?,
            "Server listening"
        );
        Ok(Self { listener, dataset })
    }

    #[cfg(test)]
    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// Open sessions are not waited for. A Unix socket file created by
    /// `bind` is removed on the way out.
    pub async fn run(self, shutdown: impl Future) {
        tokio::select! {
            _ = accept_loop(&self.listener, &self.dataset) => {}
            _ = shutdown => {
                info!("Shutting down");
            }
        }

        if let Listener::Unix(_, path) = &self.listener {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Failed to remove socket file");
            }
        }
    }
}

async fn accept_loop(listener: &Listener, dataset: &Arc<Dataset>) {
    loop {
        let accepted = match listener {
            Listener::Tcp(listener) => listener.accept().await.map(|(stream, addr)| {
                spawn_connection(stream, addr.to_string(), Arc::clone(dataset));
            }),
            Listener::Unix(listener, _) => listener.accept().await.map(|(stream, addr)| {
                let peer = addr
                    .as_pathname()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "unix".to_string());
                spawn_connection(stream, peer, Arc::clone(dataset));
            }),
        };

        if let Err(e) = accepted {
            error!(error = %e, "Failed to accept connection");
            tokio::time::sleep(ACCEPT_BACKOFF).await;
        }
    }
}

fn spawn_connection<S>(stream: S, peer: String, dataset: Arc<Dataset>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    debug!(%peer, "New connection");
    tokio::spawn(async move {
        match Connection::new(stream, dataset).run().await {
            Ok(()) => debug!(%peer, "Connection closed"),
            Err(e) => debug!(%peer, error = %e, "Connection error"),
        }
    });
}

/// Split `host:port`. The host may be empty or a bracketed IPv6 literal.
fn split_host_port(endpoint: &str) -> io::Result<(&str, u16)> {
    let invalid = || {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid endpoint '{endpoint}': expected host:port"),
        )
    };

    let (host, port) = endpoint.rsplit_once(':').ok_or_else(invalid)?;
    let port = port.parse().map_err(|_| invalid())?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    Ok((host, port))
}

/// Resolve a host for the requested address family.
async fn resolve(network: Network, host: &str, port: u16) -> io::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .find(|addr| match network {
            Network::Tcp4 => addr.is_ipv4(),
            Network::Tcp6 => addr.is_ipv6(),
            _ => true,
        })
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no {network} address found for '{host}'"),
            )
        })
}

/// Bind all interfaces. Plain `tcp` prefers a dual-stack IPv6 socket and
/// falls back to IPv4 when IPv6 is unavailable.
fn bind_unspecified(network: Network, port: u16) -> io::Result<std::net::TcpListener> {
    let v4 = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let v6 = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    match network {
        Network::Tcp4 => create_tcp_listener(v4, false),
        Network::Tcp6 => create_tcp_listener(v6, true),
        _ => create_tcp_listener(v6, false).or_else(|e| {
            debug!(error = %e, "Dual-stack bind failed, using IPv4");
            create_tcp_listener(v4, false)
        }),
    }
}

/// Create a nonblocking TCP listener with SO_REUSEADDR.
fn create_tcp_listener(addr: SocketAddr, only_v6: bool) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    if addr.is_ipv6() {
        socket.set_only_v6(only_v6)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
