use crate::uuid::BleUuid;

/// Interface id used before the stack has assigned one, and by events meant for every client.
pub const CLIENT_ID_UNASSIGNED: u8 = 0xff;

pub const GATT_SUCCESS: u16 = 0x00;

/// GATT client events, already decoded by the radio adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GattcEvent {
    Registered {
        status: u16,
    },
    ServiceDiscovered {
        start_handle: u16,
        end_handle: u16,
        uuid: BleUuid,
    },
    CharacteristicDiscovered {
        decl_handle: u16,
        properties: u16,
        value_handle: u16,
        uuid: BleUuid,
    },
    DiscoveryComplete {
        status: u16,
    },
    Notification {
        handle: u16,
        value: Vec<u8>,
        is_notify: bool,
    },
    Disconnected,
    Other(u8),
}

/// True when an event tagged `event_client_id` may concern a client registered as `client_id`.
///
/// Either side may still be unassigned, in which case the event is delivered and the client
/// filters on the connection id itself.
pub fn client_matches(client_id: u8, event_client_id: u8) -> bool {
    client_id == event_client_id
        || client_id == CLIENT_ID_UNASSIGNED
        || event_client_id == CLIENT_ID_UNASSIGNED
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unassigned_matches_both_ways() {
        assert!(client_matches(3, 3));
        assert!(client_matches(CLIENT_ID_UNASSIGNED, 3));
        assert!(client_matches(3, CLIENT_ID_UNASSIGNED));
        assert!(!client_matches(3, 4));
    }
}
