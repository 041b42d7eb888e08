use crate::radio::{BondKind, Confirmation};

/// A bonding request raised by the stack for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BondRequest {
    pub conn_id: u8,
    pub kind: BondKind,
    /// Key to show or compare, for passkey display and numeric comparison.
    pub passkey: Option<u32>,
}

/// Decides how bonding requests are answered.
pub trait SecurityPolicy: Send + Sync {
    fn confirm(&self, request: &BondRequest) -> Confirmation;
}

/// Accepts every request, which is what the stack defaults to.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl SecurityPolicy for AcceptAll {
    fn confirm(&self, _request: &BondRequest) -> Confirmation {
        Confirmation::Accept
    }
}

impl<F> SecurityPolicy for F
where
    F: Fn(&BondRequest) -> Confirmation + Send + Sync,
{
    fn confirm(&self, request: &BondRequest) -> Confirmation {
        self(request)
    }
}
