use solana_program::pubkey::Pubkey;
use thiserror::Error;

pub type AoResult<T = ()> = Result<T, AoError>;

/// Errors raised while decoding orderbook accounts.
///
/// Every decode error is terminal for the buffer that produced it: no
/// partially decoded structure is ever returned alongside one.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AoError {
    #[error("Buffer too short: needed {needed} bytes at offset {offset}, buffer holds {len}")]
    TruncatedBuffer {
        offset: usize,
        needed: usize,
        len: usize,
    },
    #[error("Unknown {kind} tag {tag}")]
    UnknownTag { kind: &'static str, tag: u64 },
    #[error("Invalid node reference {handle} (bump index {bump_index})")]
    InvalidNodeReference { handle: u32, bump_index: u64 },
    #[error("Slab header declares {expected} leaves but {found} are reachable from the root")]
    InvalidLeafCount { expected: u64, found: u64 },
    #[error("Event queue count exceeds its capacity")]
    InvalidQueueLength,
    #[error("Event queue slot size is invalid")]
    InvalidEventSize,
    #[error("Account {0} was not returned by the fetcher")]
    AccountNotFound(Pubkey),
    #[error("Account fetch failed: {0}")]
    FetchFailed(String),
}
