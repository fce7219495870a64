//! Server bootstrap: TLS context, listeners, workers.

pub mod buffer;
pub mod reactor;
mod router;
pub mod session;
pub mod stream;
mod worker;

use crate::config::Config;
use crate::tls::{self, TlsError};
use log::{error, info};
use mio::Waker;
use openssl::ssl::SslContext;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Value of the `server` response header.
pub const SERVER_NAME: &str = concat!("nghttpd h2static/", env!("CARGO_PKG_VERSION"));

/// Listener backlog.
const LISTEN_BACKLOG: i32 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("could not listen on {0}")]
    Listen(String),
}

/// Signals a running server to stop accepting, drain in-flight
/// responses and join its workers.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    wakers: Arc<Mutex<Vec<Arc<Waker>>>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.flag.store(true, Ordering::Release);
        let wakers = match self.wakers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for waker in wakers.iter() {
            let _ = waker.wake();
        }
    }
}

/// The HTTP/2 static file server.
pub struct HttpServer {
    config: Arc<Config>,
    tls: Option<SslContext>,
    listeners: Vec<StdTcpListener>,
    local_addrs: Vec<SocketAddr>,
    shutdown: Arc<AtomicBool>,
    wakers: Arc<Mutex<Vec<Arc<Waker>>>>,
}

impl HttpServer {
    /// Build the server, constructing the TLS context unless `no_tls`.
    pub fn new(config: Config) -> Result<HttpServer, ServerError> {
        let tls = if config.no_tls {
            None
        } else {
            Some(tls::build_server_context(&config)?)
        };
        Ok(HttpServer {
            config: Arc::new(config),
            tls,
            listeners: Vec::new(),
            local_addrs: Vec::new(),
            shutdown: Arc::new(AtomicBool::new(false)),
            wakers: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Bind every address the configuration resolves to. At least one
    /// bind must succeed.
    pub fn bind(&mut self) -> Result<(), ServerError> {
        let addrs = self.resolve_addrs()?;
        for addr in addrs {
            match bind_listener(addr) {
                Ok(listener) => {
                    if let Ok(local) = listener.local_addr() {
                        if self.config.verbose {
                            info!(
                                "{}: listen {}",
                                if local.is_ipv4() { "IPv4" } else { "IPv6" },
                                local
                            );
                        }
                        self.local_addrs.push(local);
                    }
                    self.listeners.push(listener);
                }
                Err(e) => error!("bind {} failed: {}", addr, e),
            }
        }
        if self.listeners.is_empty() {
            let target = format!(
                "{}:{}",
                self.config.address.as_deref().unwrap_or("*"),
                self.config.port
            );
            return Err(ServerError::Listen(target));
        }
        Ok(())
    }

    /// Addresses actually bound; available after [`HttpServer::bind`].
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// A handle that can stop the server from another thread.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: self.shutdown.clone(),
            wakers: self.wakers.clone(),
        }
    }

    /// Run until shut down. Spawns the worker reactors (if more than
    /// one is configured) and hosts the listeners on this thread's
    /// reactor; in single-worker mode that reactor also hosts every
    /// session.
    pub fn run(&mut self) -> Result<(), ServerError> {
        if self.listeners.is_empty() {
            self.bind()?;
        }

        let mut reactor = worker::Reactor::new(
            self.config.clone(),
            self.tls.clone(),
            self.shutdown.clone(),
        )?;
        let waker = Arc::new(reactor.waker()?);
        match self.wakers.lock() {
            Ok(mut guard) => guard.push(waker),
            Err(poisoned) => poisoned.into_inner().push(waker),
        }

        if self.config.num_worker > 1 {
            let dispatcher = worker::spawn_workers(
                &self.config,
                self.tls.as_ref(),
                &self.shutdown,
                &self.wakers,
            )?;
            reactor.set_dispatcher(dispatcher);
        }

        for listener in self.listeners.drain(..) {
            reactor.add_listener(mio::net::TcpListener::from_std(listener))?;
        }

        reactor.run();
        Ok(())
    }

    fn resolve_addrs(&self) -> Result<Vec<SocketAddr>, ServerError> {
        match self.config.address.as_deref() {
            None => Ok(vec![
                SocketAddr::from(([0, 0, 0, 0], self.config.port)),
                SocketAddr::from(([0u16; 8], self.config.port)),
            ]),
            Some(host) => {
                let addrs: Vec<SocketAddr> = (host, self.config.port)
                    .to_socket_addrs()
                    .map_err(ServerError::Io)?
                    .collect();
                if addrs.is_empty() {
                    Err(ServerError::Listen(format!("{}:{}", host, self.config.port)))
                } else {
                    Ok(addrs)
                }
            }
        }
    }
}

fn bind_listener(addr: SocketAddr) -> io::Result<StdTcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        socket.set_only_v6(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;
    Ok(socket.into())
}
