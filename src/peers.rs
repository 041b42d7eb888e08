use std::{collections::HashMap, sync::Weak};

use heapless::FnvIndexMap;

use crate::{error::BleError, gattc::ClientInner, gatts::ServerInner};

/// Default ATT MTU before an exchange completes.
pub const DEFAULT_MTU: u16 = 23;

/// Upper bound for tracked peers across both roles. Must be a power of two.
pub const MAX_PEERS: usize = 8;

/// Non-owning handle to whichever object owns the connection.
#[derive(Clone)]
pub enum PeerDevice {
    Client(Weak<ClientInner>),
    Server(Weak<ServerInner>),
}

impl PeerDevice {
    pub fn is_client(&self) -> bool {
        matches!(self, PeerDevice::Client(_))
    }
}

impl std::fmt::Debug for PeerDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerDevice::Client(client) => write!(f, "Client(alive: {})", client.strong_count() > 0),
            PeerDevice::Server(server) => write!(f, "Server(alive: {})", server.strong_count() > 0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub peer_device: PeerDevice,
    pub connected: bool,
    pub mtu: u16,
}

#[derive(Default)]
pub struct PeerRegistry {
    peers: FnvIndexMap<u16, ConnectionStatus, MAX_PEERS>,
}

impl PeerRegistry {
    /// Registers `peer` for `conn_id`. An existing entry for the id is kept.
    pub fn add(&mut self, peer: PeerDevice, conn_id: u16) -> Result<(), BleError> {
        if self.peers.contains_key(&conn_id) {
            log::debug!("Peer for conn_id {} already registered", conn_id);
            return Ok(());
        }

        let status = ConnectionStatus {
            peer_device: peer,
            connected: true,
            mtu: DEFAULT_MTU,
        };

        self.peers
            .insert(conn_id, status)
            .map_err(|_| BleError::NoCapacity("peer registry"))?;

        Ok(())
    }

    pub fn remove(&mut self, conn_id: u16, is_client: bool) -> Option<ConnectionStatus> {
        match self.peers.get(&conn_id) {
            Some(status) if status.peer_device.is_client() == is_client => {
                self.peers.remove(&conn_id)
            }
            Some(_) => {
                log::debug!(
                    "Peer for conn_id {} has the other role, not removing",
                    conn_id
                );
                None
            }
            None => None,
        }
    }

    pub fn get(&self, conn_id: u16) -> Option<&ConnectionStatus> {
        self.peers.get(&conn_id)
    }

    pub fn set_mtu(&mut self, conn_id: u16, mtu: u16) -> bool {
        match self.peers.get_mut(&conn_id) {
            Some(status) => {
                status.mtu = mtu;
                true
            }
            None => false,
        }
    }

    /// Snapshot of the peers of one role.
    pub fn snapshot(&self, is_client: bool) -> HashMap<u16, ConnectionStatus> {
        self.peers
            .iter()
            .filter(|(_, status)| status.peer_device.is_client() == is_client)
            .map(|(conn_id, status)| (*conn_id, status.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_peer() -> PeerDevice {
        PeerDevice::Client(Weak::new())
    }

    #[test]
    fn add_then_snapshot_shows_connected_peer() {
        let mut registry = PeerRegistry::default();
        registry.add(client_peer(), 3).unwrap();

        let clients = registry.snapshot(true);
        let status = clients.get(&3).unwrap();
        assert!(status.connected);
        assert_eq!(status.mtu, DEFAULT_MTU);
        assert!(registry.snapshot(false).is_empty());
    }

    #[test]
    fn remove_respects_role() {
        let mut registry = PeerRegistry::default();
        registry.add(PeerDevice::Server(Weak::new()), 1).unwrap();

        assert!(registry.remove(1, true).is_none());
        assert!(registry.remove(1, false).is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn full_registry_reports_no_capacity() {
        let mut registry = PeerRegistry::default();
        for conn_id in 0..MAX_PEERS as u16 {
            registry.add(client_peer(), conn_id).unwrap();
        }
        assert_eq!(
            registry.add(client_peer(), 100),
            Err(BleError::NoCapacity("peer registry"))
        );
        assert_eq!(registry.len(), MAX_PEERS);
    }
}
