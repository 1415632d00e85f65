//! The accounts making up one outcome's orderbook, and the seam through which their
//! data is fetched.
use std::collections::HashMap;

use borsh::BorshDeserialize;
use solana_program::pubkey::Pubkey;

use crate::error::{AoError, AoResult};
use crate::layout::Fixed;

/// Serialized length of [`OrderbookAccounts`].
pub const ORDERBOOK_ACCOUNTS_LEN: usize = 4 * 32;

/// The public keys of an outcome's orderbook accounts.
#[derive(BorshDeserialize, Debug, Copy, Clone, PartialEq, Eq)]
pub struct OrderbookAccounts {
    /// The orderbook's central state
    pub orderbook: Pubkey,
    /// The public key of the orderbook's event queue account
    pub event_queue: Pubkey,
    /// The public key of the orderbook's bids account
    pub bids: Pubkey,
    /// The public key of the orderbook's asks account
    pub asks: Pubkey,
}

impl Fixed for OrderbookAccounts {
    const LEN: usize = ORDERBOOK_ACCOUNTS_LEN;
}

/// Source of raw account data.
///
/// Implementations return one entry per requested address, in request order, with
/// `None` for accounts that do not exist. Accounts fetched in one call are expected to
/// come from the same ledger state.
pub trait AccountFetcher {
    fn fetch_multiple(&self, addresses: &[Pubkey]) -> AoResult<Vec<Option<Vec<u8>>>>;
}

impl AccountFetcher for HashMap<Pubkey, Vec<u8>> {
    fn fetch_multiple(&self, addresses: &[Pubkey]) -> AoResult<Vec<Option<Vec<u8>>>> {
        Ok(addresses.iter().map(|a| self.get(a).cloned()).collect())
    }
}

pub(crate) fn fetch_optional<F: AccountFetcher + ?Sized>(
    fetcher: &F,
    addresses: &[Pubkey],
) -> AoResult<Vec<Option<Vec<u8>>>> {
    let accounts = fetcher.fetch_multiple(addresses)?;
    if accounts.len() != addresses.len() {
        return Err(AoError::FetchFailed(format!(
            "requested {} accounts, received {}",
            addresses.len(),
            accounts.len()
        )));
    }
    Ok(accounts)
}

pub(crate) fn fetch_required<F: AccountFetcher + ?Sized>(
    fetcher: &F,
    addresses: &[Pubkey],
) -> AoResult<Vec<Vec<u8>>> {
    fetch_optional(fetcher, addresses)?
        .into_iter()
        .zip(addresses)
        .map(|(data, address)| data.ok_or(AoError::AccountNotFound(*address)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::read_from;

    struct Truncating(usize);

    impl AccountFetcher for Truncating {
        fn fetch_multiple(&self, addresses: &[Pubkey]) -> AoResult<Vec<Option<Vec<u8>>>> {
            Ok(addresses.iter().take(self.0).map(|_| Some(vec![])).collect())
        }
    }

    #[test]
    fn accounts_layout() {
        let keys: Vec<Pubkey> = (0..4).map(|_| Pubkey::new_unique()).collect();
        let buf: Vec<u8> = keys.iter().flat_map(|k| k.to_bytes()).collect();
        assert_eq!(buf.len(), ORDERBOOK_ACCOUNTS_LEN);
        let accounts: OrderbookAccounts = read_from(&buf).unwrap();
        assert_eq!(accounts.bids, keys[2]);
        assert_eq!(accounts.asks, keys[3]);
        assert_eq!(
            read_from::<OrderbookAccounts>(&buf[..100]),
            Err(AoError::TruncatedBuffer {
                offset: 0,
                needed: ORDERBOOK_ACCOUNTS_LEN,
                len: 100
            })
        );
    }

    #[test]
    fn missing_accounts() {
        let (present, missing) = (Pubkey::new_unique(), Pubkey::new_unique());
        let fetcher = HashMap::from([(present, vec![1u8])]);
        let optional = fetch_optional(&fetcher, &[present, missing]).unwrap();
        assert_eq!(optional, vec![Some(vec![1]), None]);
        assert_eq!(
            fetch_required(&fetcher, &[present, missing]),
            Err(AoError::AccountNotFound(missing))
        );
        assert!(matches!(
            fetch_optional(&Truncating(1), &[present, missing]),
            Err(AoError::FetchFailed(_))
        ));
    }
}
