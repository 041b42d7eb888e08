use std::fmt;

/// Bluetooth device address as delivered by the radio: least significant byte first.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BdAddr([u8; 6]);

impl BdAddr {
    pub const fn from_bytes(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Builds an address from the display order (most significant byte first).
    pub fn from_msb_first(bytes: [u8; 6]) -> Self {
        let mut raw = bytes;
        raw.reverse();
        Self(raw)
    }

    /// Raw wire order.
    pub fn addr(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

// Logs and existing tools expect the MSB-first "aa:bb:cc:dd:ee:ff" form.
impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let a = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[5], a[4], a[3], a[2], a[1], a[0]
        )
    }
}

impl fmt::Debug for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BdAddr({})", self)
    }
}

impl std::str::FromStr for BdAddr {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 6];
        let mut parts = s.split(':');
        for byte in bytes.iter_mut() {
            let part = parts
                .next()
                .ok_or(anyhow::anyhow!("Address {:?} has less than 6 octets", s))?;
            *byte = u8::from_str_radix(part, 16)
                .map_err(|err| anyhow::anyhow!("Invalid octet {:?} in {:?}: {:?}", part, s, err))?;
        }
        if parts.next().is_some() {
            return Err(anyhow::anyhow!("Address {:?} has more than 6 octets", s));
        }

        Ok(Self::from_msb_first(bytes))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddrType {
    #[default]
    Public,
    Random,
    PublicIdentity,
    RandomIdentity,
    Other(u8),
}

impl From<u8> for AddrType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => AddrType::Public,
            0x01 => AddrType::Random,
            0x02 => AddrType::PublicIdentity,
            0x03 => AddrType::RandomIdentity,
            other => AddrType::Other(other),
        }
    }
}

impl From<AddrType> for u8 {
    fn from(value: AddrType) -> Self {
        match value {
            AddrType::Public => 0x00,
            AddrType::Random => 0x01,
            AddrType::PublicIdentity => 0x02,
            AddrType::RandomIdentity => 0x03,
            AddrType::Other(other) => other,
        }
    }
}
