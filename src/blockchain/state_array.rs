use std::fmt;

use super::{Account, Sha256Hash};
use crate::codec::{CodecError, Encodable, Entry};

/// An ordered snapshot of accounts, identified by the hash of its encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateArray {
    accounts: Vec<Account>,
    hash: Sha256Hash,
}

impl StateArray {
    pub fn new(accounts: Vec<Account>) -> Self {
        let mut array = Self {
            accounts,
            hash: Sha256Hash::default(),
        };
        array.hash = Sha256Hash::digest(&array.get_encode());
        array
    }

    /// Populate from a list of account entries. Non-list input yields an
    /// empty array.
    pub fn from_entry(e: &Entry) -> Self {
        let accounts = e
            .as_list()
            .map(|items| items.iter().map(Account::from_entry).collect())
            .unwrap_or_default();
        Self::new(accounts)
    }

    pub fn from_encode(encode: &[u8]) -> Result<Self, CodecError> {
        Ok(Self::from_entry(&Entry::decode(encode)?))
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn sha256(&self) -> &Sha256Hash {
        &self.hash
    }
}

impl Encodable for StateArray {
    fn get_entry(&self) -> Entry {
        Entry::List(self.accounts.iter().map(Encodable::get_entry).collect())
    }
}

impl fmt::Display for StateArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state array {} ({} accounts)", self.hash, self.accounts.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trip_keeps_order_and_hash() {
        let array = StateArray::new(vec![
            Account::new(10, 0, 0, 3),
            Account::with_effective_power(-4, 2, 1_700_000_000, 7, 3),
        ]);
        let back = StateArray::from_encode(&array.get_encode()).unwrap();
        assert_eq!(back, array);
        assert_eq!(back.accounts()[1].effective_power(), 7);
        assert_eq!(Sha256Hash::digest(&back.get_encode()), *back.sha256());

        let swapped = StateArray::new(array.accounts().iter().rev().copied().collect());
        assert_ne!(swapped.sha256(), array.sha256());
    }

    #[test]
    fn non_list_input_is_empty() {
        let array = StateArray::from_entry(&Entry::Int(5));
        assert!(array.accounts().is_empty());
        assert_eq!(array.sha256(), StateArray::new(vec![]).sha256());
    }
}
