use std::fmt;

/// Bluetooth SIG base UUID 0000xxxx-0000-1000-8000-00805F9B34FB, little endian.
const BASE_UUID: [u8; 16] = [
    0xfb, 0x34, 0x9b, 0x5f, 0x80, 0x00, 0x00, 0x80, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub enum BleUuid {
    Uuid16(u16),
    Uuid32(u32),
    /// Little endian, as carried in advertisements and attribute PDUs.
    Uuid128([u8; 16]),
}

impl BleUuid {
    pub const fn uuid16(uuid: u16) -> Self {
        Self::Uuid16(uuid)
    }

    pub const fn uuid32(uuid: u32) -> Self {
        Self::Uuid32(uuid)
    }

    pub fn uuid128(uuid: u128) -> Self {
        Self::Uuid128(uuid.to_le_bytes())
    }

    /// Parses a little endian UUID of 2, 4 or 16 bytes.
    pub fn from_le_slice(bytes: &[u8]) -> Option<Self> {
        match bytes.len() {
            2 => Some(Self::Uuid16(u16::from_le_bytes([bytes[0], bytes[1]]))),
            4 => Some(Self::Uuid32(u32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ]))),
            16 => {
                let mut raw = [0u8; 16];
                raw.copy_from_slice(bytes);
                Some(Self::Uuid128(raw))
            }
            _ => None,
        }
    }

    /// Size on the wire: 2, 4 or 16.
    pub fn encoded_len(&self) -> usize {
        match self {
            BleUuid::Uuid16(_) => 2,
            BleUuid::Uuid32(_) => 4,
            BleUuid::Uuid128(_) => 16,
        }
    }

    pub fn append_le(&self, buffer: &mut Vec<u8>) {
        match self {
            BleUuid::Uuid16(short) => buffer.extend_from_slice(&short.to_le_bytes()),
            BleUuid::Uuid32(short) => buffer.extend_from_slice(&short.to_le_bytes()),
            BleUuid::Uuid128(raw) => buffer.extend_from_slice(raw),
        }
    }

    /// Expands to the full 128-bit form.
    pub fn to_uuid128(&self) -> [u8; 16] {
        match self {
            BleUuid::Uuid16(short) => {
                let mut raw = BASE_UUID;
                raw[12..14].copy_from_slice(&short.to_le_bytes());
                raw
            }
            BleUuid::Uuid32(short) => {
                let mut raw = BASE_UUID;
                raw[12..16].copy_from_slice(&short.to_le_bytes());
                raw
            }
            BleUuid::Uuid128(raw) => *raw,
        }
    }

    /// Compares by value, so 0x180F equals its expanded 128-bit form.
    pub fn matches(&self, other: &BleUuid) -> bool {
        self.to_uuid128() == other.to_uuid128()
    }
}

impl fmt::Display for BleUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut b = self.to_uuid128();
        b.reverse();
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13],
            b[14], b[15]
        )
    }
}

impl fmt::Debug for BleUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BleUuid::Uuid16(short) => write!(f, "BleUuid(0x{:04x})", short),
            BleUuid::Uuid32(short) => write!(f, "BleUuid(0x{:08x})", short),
            BleUuid::Uuid128(_) => write!(f, "BleUuid({})", self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_uuid_expands_onto_base() {
        let battery = BleUuid::uuid16(0x180f);
        assert_eq!(battery.to_string(), "0000180f-0000-1000-8000-00805f9b34fb");
        assert!(battery.matches(&BleUuid::Uuid128(battery.to_uuid128())));
        assert!(!battery.matches(&BleUuid::uuid16(0x1810)));
    }

    #[test]
    fn from_le_slice_rejects_odd_sizes() {
        assert_eq!(
            BleUuid::from_le_slice(&[0xaa, 0xfe]),
            Some(BleUuid::uuid16(0xfeaa))
        );
        assert_eq!(BleUuid::from_le_slice(&[0xaa, 0xfe, 0x00]), None);
    }
}
