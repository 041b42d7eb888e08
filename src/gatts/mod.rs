pub mod connection;
pub mod event;

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use connection::ServerConnection;
use event::GattsEvent;

use crate::{address::BdAddr, ble::BleInner, gap::event::AppResult, peers::PeerDevice};

/// Connection notifications for a [`Server`]. Both run on the event context and must not block.
pub trait ServerCallbacks: Send + Sync {
    fn on_connect(&self, _connection: &ServerConnection) {}

    fn on_disconnect(&self, _connection: &ServerConnection, _cause: u16) {}
}

type GattsHandler = dyn Fn(u8, &GattsEvent) -> AppResult + Send + Sync;

#[derive(Clone)]
pub struct Server(pub Arc<ServerInner>);

pub struct ServerInner {
    pub app_id: u8,
    connections: RwLock<HashMap<u8, ServerConnection>>,
    callbacks: RwLock<Option<Arc<dyn ServerCallbacks>>>,
    event_handler: RwLock<Option<Arc<GattsHandler>>>,
}

impl Server {
    pub(crate) fn new(app_id: u8) -> Self {
        let server = ServerInner {
            app_id,
            connections: RwLock::new(HashMap::new()),
            callbacks: RwLock::new(None),
            event_handler: RwLock::new(None),
        };

        Self(Arc::new(server))
    }

    pub fn app_id(&self) -> u8 {
        self.0.app_id
    }

    pub fn set_callbacks(&self, callbacks: impl ServerCallbacks + 'static) -> anyhow::Result<()> {
        *self
            .0
            .callbacks
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write server callbacks"))? =
            Some(Arc::new(callbacks));

        Ok(())
    }

    /// Handler for raw GATT server events. Its result is handed back to the stack.
    pub fn set_event_handler<F>(&self, handler: F) -> anyhow::Result<()>
    where
        F: Fn(u8, &GattsEvent) -> AppResult + Send + Sync + 'static,
    {
        *self
            .0
            .event_handler
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write gatts event handler"))? =
            Some(Arc::new(handler));

        Ok(())
    }

    pub fn connections(&self) -> anyhow::Result<Vec<ServerConnection>> {
        Ok(self
            .0
            .connections
            .read()
            .map_err(|_| anyhow::anyhow!("Failed to read server connections"))?
            .values()
            .copied()
            .collect())
    }

    pub fn connected_count(&self) -> usize {
        self.0
            .connections
            .read()
            .map(|connections| connections.len())
            .unwrap_or_default()
    }

    pub(crate) fn on_peer_connected(&self, ble: &BleInner, conn_id: u8, address: BdAddr) {
        let connection = ServerConnection::new(conn_id, address);

        match self.0.connections.write() {
            Ok(mut connections) => {
                connections.insert(conn_id, connection);
            }
            Err(_) => log::error!("Failed to write server connections"),
        }

        let added = ble
            .peers
            .write()
            .map_err(|_| anyhow::anyhow!("Failed to write peer registry"))
            .and_then(|mut peers| {
                Ok(peers.add(PeerDevice::Server(Arc::downgrade(&self.0)), conn_id as u16)?)
            });
        if let Err(err) = added {
            log::error!("Failed to register server peer {}: {:?}", conn_id, err);
        }

        if let Some(callbacks) = self.callbacks() {
            callbacks.on_connect(&connection);
        }
    }

    pub(crate) fn on_peer_disconnected(&self, ble: &BleInner, conn_id: u8, cause: u16) {
        let connection = match self.0.connections.write() {
            Ok(mut connections) => connections.remove(&conn_id),
            Err(_) => {
                log::error!("Failed to write server connections");
                None
            }
        };

        match ble.peers.write() {
            Ok(mut peers) => {
                peers.remove(conn_id as u16, false);
            }
            Err(_) => log::error!("Failed to write peer registry"),
        }

        let Some(connection) = connection else {
            log::debug!("Server had no connection {}", conn_id);
            return;
        };

        if let Some(callbacks) = self.callbacks() {
            callbacks.on_disconnect(&connection, cause);
        }
    }

    pub(crate) fn update_mtu(&self, conn_id: u8, mtu: u16) {
        match self.0.connections.write() {
            Ok(mut connections) => {
                if let Some(connection) = connections.get_mut(&conn_id) {
                    connection.mtu = mtu;
                }
            }
            Err(_) => log::error!("Failed to write server connections"),
        }
    }

    pub(crate) fn handle_event(&self, service_id: u8, event: GattsEvent) -> AppResult {
        log::debug!("GATT server event on service {}: {:?}", service_id, event);

        let handler = match self.0.event_handler.read() {
            Ok(handler) => handler.clone(),
            Err(_) => {
                log::error!("Failed to read gatts event handler");
                None
            }
        };

        match handler {
            Some(handler) => handler(service_id, &event),
            None => AppResult::Success,
        }
    }

    fn callbacks(&self) -> Option<Arc<dyn ServerCallbacks>> {
        match self.0.callbacks.read() {
            Ok(callbacks) => callbacks.clone(),
            Err(_) => {
                log::error!("Failed to read server callbacks");
                None
            }
        }
    }
}
