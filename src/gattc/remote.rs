use enumset::{EnumSet, EnumSetType};

use crate::uuid::BleUuid;

/// Characteristic property bits as declared by the peer.
#[derive(Debug, EnumSetType)]
pub enum Property {
    Broadcast,
    Read,
    WriteNoResponse,
    Write,
    Notify,
    Indicate,
    SignedWrite,
    ExtendedProperties,
}

impl Property {
    fn bit(self) -> u16 {
        match self {
            Property::Broadcast => 0x01,
            Property::Read => 0x02,
            Property::WriteNoResponse => 0x04,
            Property::Write => 0x08,
            Property::Notify => 0x10,
            Property::Indicate => 0x20,
            Property::SignedWrite => 0x40,
            Property::ExtendedProperties => 0x80,
        }
    }

    pub fn from_bits(bits: u16) -> EnumSet<Property> {
        EnumSet::<Property>::all()
            .iter()
            .filter(|property| bits & property.bit() != 0)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCharacteristic {
    pub uuid: BleUuid,
    pub decl_handle: u16,
    pub value_handle: u16,
    pub properties: EnumSet<Property>,
}

impl RemoteCharacteristic {
    pub fn can_read(&self) -> bool {
        self.properties.contains(Property::Read)
    }

    pub fn can_write(&self) -> bool {
        self.properties.contains(Property::Write)
    }

    pub fn can_write_no_response(&self) -> bool {
        self.properties.contains(Property::WriteNoResponse)
    }

    pub fn can_notify(&self) -> bool {
        self.properties.contains(Property::Notify)
    }

    pub fn can_indicate(&self) -> bool {
        self.properties.contains(Property::Indicate)
    }

    pub fn can_broadcast(&self) -> bool {
        self.properties.contains(Property::Broadcast)
    }
}

/// A primary service found on the peer, with the characteristics inside its handle range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteService {
    pub uuid: BleUuid,
    pub start_handle: u16,
    pub end_handle: u16,
    pub characteristics: Vec<RemoteCharacteristic>,
}

impl RemoteService {
    pub fn contains_handle(&self, handle: u16) -> bool {
        (self.start_handle..=self.end_handle).contains(&handle)
    }

    pub fn characteristic(&self, uuid: &BleUuid) -> Option<&RemoteCharacteristic> {
        self.characteristics
            .iter()
            .find(|characteristic| characteristic.uuid.matches(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_bits_map_to_set() {
        let properties = Property::from_bits(0x1a);
        assert_eq!(
            properties,
            Property::Read | Property::Write | Property::Notify
        );

        let characteristic = RemoteCharacteristic {
            uuid: BleUuid::uuid16(0x2a19),
            decl_handle: 0x10,
            value_handle: 0x11,
            properties,
        };
        assert!(characteristic.can_read());
        assert!(characteristic.can_notify());
        assert!(!characteristic.can_indicate());
    }

    #[test]
    fn unknown_property_bits_are_ignored() {
        assert_eq!(Property::from_bits(0x00ff), EnumSet::<Property>::all());
        assert!(Property::from_bits(0xff00).is_empty());
        assert_eq!(
            Property::from_bits(0x0144),
            Property::WriteNoResponse | Property::SignedWrite
        );
    }
}
