use crate::codec::{CodecError, Encodable, Entry, le_i64, read_le_i64};

/// Ledger state of one public key on one chain, as of `block_number`.
///
/// Accounts are never deleted; a newer block simply carries a newer snapshot.
/// Balance and nonce rules are enforced where blocks are validated, not here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Account {
    balance: i64,
    nonce: i64,
    note_timestamp: i64,
    effective_power: i64,
    block_number: i64,
}

impl Account {
    pub fn new(balance: i64, nonce: i64, note_timestamp: i64, block_number: i64) -> Self {
        Self {
            balance,
            nonce,
            note_timestamp,
            effective_power: 0,
            block_number,
        }
    }

    pub fn with_effective_power(
        balance: i64,
        nonce: i64,
        note_timestamp: i64,
        effective_power: i64,
        block_number: i64,
    ) -> Self {
        Self {
            balance,
            nonce,
            note_timestamp,
            effective_power,
            block_number,
        }
    }

    /// Populate from an entry. Unknown or missing keys leave fields at zero.
    pub fn from_entry(e: &Entry) -> Self {
        let field = |key: &str| e.bytes_at(key).map(read_le_i64).unwrap_or_default();
        Self {
            balance: field("b"),
            nonce: field("n"),
            note_timestamp: field("t"),
            effective_power: field("p"),
            block_number: field("h"),
        }
    }

    pub fn from_encode(encode: &[u8]) -> Result<Self, CodecError> {
        Ok(Self::from_entry(&Entry::decode(encode)?))
    }

    /// True for an account that no block has touched yet.
    pub fn empty(&self) -> bool {
        self.balance == 0 && self.nonce == 0
    }

    pub fn balance(&self) -> i64 {
        self.balance
    }

    pub fn nonce(&self) -> i64 {
        self.nonce
    }

    pub fn note_timestamp(&self) -> i64 {
        self.note_timestamp
    }

    pub fn effective_power(&self) -> i64 {
        self.effective_power
    }

    pub fn set_effective_power(&mut self, effective_power: i64) {
        self.effective_power = effective_power;
    }

    pub fn block_number(&self) -> i64 {
        self.block_number
    }
}

impl Encodable for Account {
    fn get_entry(&self) -> Entry {
        let mut e = Entry::dict();
        e.insert("b", le_i64(self.balance));
        e.insert("n", le_i64(self.nonce));
        e.insert("t", le_i64(self.note_timestamp));
        e.insert("p", le_i64(self.effective_power));
        e.insert("h", le_i64(self.block_number));
        e
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_means_untouched() {
        assert!(Account::default().empty());
        assert!(Account::new(0, 0, 1_700_000_000, 9).empty());
        assert!(!Account::new(-101, 1, 0, 1).empty());
        assert!(!Account::new(0, 1, 0, 1).empty());
    }

    #[test]
    fn decode_encode_keeps_every_field() {
        let acc = Account::with_effective_power(-101, 1, 1_700_000_300, 4, 1);
        let back = Account::from_encode(&acc.get_encode()).unwrap();
        assert_eq!(back, acc);
    }

    #[test]
    fn missing_keys_default_to_zero() {
        let mut e = Entry::dict();
        e.insert("b", le_i64(55));
        e.insert("zz", Entry::Int(1));
        let acc = Account::from_entry(&e);
        assert_eq!(acc.balance(), 55);
        assert_eq!(acc.nonce(), 0);
        assert_eq!(acc.block_number(), 0);
    }

    #[test]
    fn only_effective_power_is_mutable() {
        let mut acc = Account::new(10, 2, 0, 3);
        acc.set_effective_power(7);
        assert_eq!(acc.effective_power(), 7);
        assert_eq!((acc.balance(), acc.nonce()), (10, 2));
    }
}
