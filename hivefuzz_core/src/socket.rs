use std::net::{SocketAddr, TcpListener};
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SocketError {
    #[error("Failed to bind external input socket on {addr}: {msg}")]
    Bind { addr: String, msg: String },
}

/// External input provider: an out-of-process source feeding inputs over a
/// TCP socket instead of the on-disk corpus.
///
/// The supervisor calls [`SocketProvider::setup`] before workers spawn and
/// [`SocketProvider::cleanup`] during shutdown. In between, workers take the
/// listener directly; the protocol spoken over it is their business.
#[derive(Debug)]
pub struct SocketProvider {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
}

impl SocketProvider {
    pub fn setup(addr: &str) -> Result<Self, SocketError> {
        let listener = TcpListener::bind(addr).map_err(|e| SocketError::Bind {
            addr: addr.to_string(),
            msg: e.to_string(),
        })?;
        let local_addr = listener.local_addr().map_err(|e| SocketError::Bind {
            addr: addr.to_string(),
            msg: e.to_string(),
        })?;
        log::info!("External input socket listening on {local_addr}");
        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Hands the listener to a worker. Returns `None` once cleaned up or if
    /// another worker already took it.
    pub fn take_listener(&self) -> Option<TcpListener> {
        self.listener.lock().ok()?.take()
    }

    /// Closes the listening socket. Safe to call more than once.
    pub fn cleanup(&self) {
        if let Ok(mut guard) = self.listener.lock() {
            if guard.take().is_some() {
                log::info!("External input socket on {} closed", self.local_addr);
            }
        }
    }
}
