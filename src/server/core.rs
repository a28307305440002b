use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, SystemTime};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

use crate::config::ServerConfig;
use crate::error::{ServerError, TransferError};
use crate::server::settings::{PortRange, ServerSettings};
use crate::storage::{self, StorageHandle};
use crate::transfer::{ActiveHandler, DataConnectionHandler, RandomPortSelector, passive};

const RETIRE_POLLS: u32 = 100;
const RETIRE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// The control listener plus the channel that tells blocked accepts it is gone.
struct ListenerSlot {
    listener: Arc<TcpListener>,
    local_addr: SocketAddr,
    // Never sent on; dropping it wakes every subscribed accept.
    closed: watch::Sender<()>,
}

/// Composition root: owns the control listener and the shared storage handle.
pub struct Server {
    listener: Mutex<Option<ListenerSlot>>,
    // Last closed listener, possibly still held by an accept that is waking up.
    retired: Mutex<Option<Weak<TcpListener>>>,
    start_time: SystemTime,
    settings: Arc<ServerSettings>,
    storage: StorageHandle,
}

impl Server {
    /// Resolves the configured storage backend and builds the server.
    ///
    /// Fails without creating a server if the backend cannot be resolved.
    pub fn new(config: &ServerConfig) -> Result<Self, ServerError> {
        let storage = storage::resolve(&config.storage)?;
        Ok(Self::with_storage(config.settings(), storage))
    }

    /// Builds a server around an already resolved storage handle.
    pub fn with_storage(settings: ServerSettings, storage: StorageHandle) -> Self {
        Self {
            listener: Mutex::new(None),
            retired: Mutex::new(None),
            start_time: SystemTime::now(),
            settings: Arc::new(settings),
            storage,
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<ListenerSlot>> {
        self.listener.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn retire(&self, slot: ListenerSlot) {
        let ListenerSlot {
            listener,
            local_addr,
            closed,
        } = slot;
        drop(closed);
        *self.retired.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::downgrade(&listener));
        info!("Closing listener on {}", local_addr);
    }

    /// Waits until the last closed listener is really gone so its port is free.
    async fn await_retired(&self) {
        let retired = self.retired.lock().unwrap_or_else(|e| e.into_inner()).take();
        let Some(retired) = retired else {
            return;
        };
        for _ in 0..RETIRE_POLLS {
            if retired.strong_count() == 0 {
                return;
            }
            tokio::time::sleep(RETIRE_POLL_INTERVAL).await;
        }
        warn!("Previous control listener is still referenced, binding anyway");
    }

    /// Binds the control listener, replacing any listener from an earlier start.
    ///
    /// The previous listener is closed before binding so a fixed control port
    /// can be reused. A bind failure is fatal for the process; the caller is
    /// expected to log it and exit.
    pub async fn start(&self) -> Result<(), ServerError> {
        let previous = self.slot().take();
        if let Some(previous) = previous {
            self.retire(previous);
        }
        self.await_retired().await;

        let control_socket = self.settings.control_socket();
        let listener = TcpListener::bind(&control_socket)
            .await
            .map_err(|e| ServerError::Bind(control_socket.clone(), e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(control_socket, e))?;

        let (closed, _) = watch::channel(());
        let previous = self.slot().replace(ListenerSlot {
            listener: Arc::new(listener),
            local_addr,
            closed,
        });
        if let Some(previous) = previous {
            debug!("Concurrent start replaced listener on {}", previous.local_addr);
        }

        info!("Listening on {}", local_addr);
        Ok(())
    }

    /// Waits for one control connection and returns it with the peer address.
    pub async fn accept_client(&self) -> Result<(TcpStream, String), ServerError> {
        let (listener, mut closed) = {
            let slot = self.slot();
            let slot = slot.as_ref().ok_or(ServerError::NotStarted)?;
            (Arc::clone(&slot.listener), slot.closed.subscribe())
        };

        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer_addr) = accepted.map_err(ServerError::Accept)?;
                debug!("Accepted control connection from {}", peer_addr);
                Ok((stream, peer_addr.to_string()))
            }
            _ = closed.changed() => Err(ServerError::ListenerClosed),
        }
    }

    /// Closes the control listener. Safe to call repeatedly or before `start`.
    pub fn stop(&self) {
        let slot = self.slot().take();
        if let Some(slot) = slot {
            self.retire(slot);
        }
    }

    /// Opens a passive data listener on a random port of `port_range`.
    pub async fn passive_transfer_factory(
        &self,
        listen_host: &str,
        port_range: &PortRange,
    ) -> Result<(DataConnectionHandler, u16), TransferError> {
        let mut selector = RandomPortSelector::new();
        passive::allocate(listen_host, port_range, &mut selector).await
    }

    /// Creates a handler that connects back to `remote_addr` when opened.
    pub fn active_transfer_factory(&self, remote_addr: SocketAddr) -> DataConnectionHandler {
        DataConnectionHandler::Active(ActiveHandler::new(remote_addr))
    }

    pub fn storager(&self) -> StorageHandle {
        Arc::clone(&self.storage)
    }

    pub fn setting(&self) -> Arc<ServerSettings> {
        Arc::clone(&self.settings)
    }

    pub fn start_time(&self) -> SystemTime {
        self.start_time
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed().unwrap_or_default()
    }

    /// Address of the control listener, `None` when not listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.slot().as_ref().map(|slot| slot.local_addr)
    }

    pub fn is_listening(&self) -> bool {
        self.slot().is_some()
    }
}
