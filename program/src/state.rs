use borsh::BorshDeserialize;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use solana_program::pubkey::Pubkey;

use crate::layout::Fixed;

#[allow(missing_docs)]
pub mod critbit;
#[allow(missing_docs)]
pub mod event_queue;
#[allow(missing_docs)]
pub mod market_state;
#[allow(missing_docs)]
pub mod orderbook;

/// Serialized length of a [`CallbackInfo`].
pub const CALLBACK_INFO_LEN: usize = 33;

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum AccountTag {
    Uninitialized,
    Market,
    EventQueue,
    Bids,
    Asks,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    /// The side on the other end of a match.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

/// Fee level of an order, determined by the owner's token holdings.
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum FeeTier {
    Base,
    Aver1,
    Aver2,
    Aver3,
    Aver4,
    Aver5,
    Free,
}

/// Per-order metadata carried by leaves and events.
#[derive(BorshDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallbackInfo {
    /// The user market account owning the order
    pub user_market: Pubkey,
    /// Raw fee tier byte
    pub fee_tier: u8,
}

impl CallbackInfo {
    pub fn fee_tier(&self) -> Option<FeeTier> {
        FeeTier::from_u8(self.fee_tier)
    }
}

impl Fixed for CallbackInfo {
    const LEN: usize = CALLBACK_INFO_LEN;
}
