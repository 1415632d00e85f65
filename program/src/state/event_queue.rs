use borsh::BorshDeserialize;
use log::{debug, warn};
use num_derive::{FromPrimitive, ToPrimitive};
use solana_program::pubkey::Pubkey;

use crate::error::{AoError, AoResult};
use crate::layout::{decode_from, read_from, Decode, Fixed, Reader};
use crate::state::market_state::{fetch_required, AccountFetcher};

use super::{CallbackInfo, Side};

/// Serialized length of the [`EventQueueHeader`].
pub const EVENT_QUEUE_HEADER_LEN: usize = 33;
/// Length of the register region between the header and the ring.
pub const REGISTER_SIZE: usize = 42;
/// Event slot size used by the program when allocating queues.
pub const EVENT_SLOT_SIZE: usize = 100;
/// The program consumes at most this many events per crank instruction.
pub const MAX_ITERATIONS_FOR_CONSUME_EVENTS: u64 = 5;

const RING_OFFSET: usize = EVENT_QUEUE_HEADER_LEN + REGISTER_SIZE;

#[derive(FromPrimitive, ToPrimitive, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum EventTag {
    Fill,
    Out,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FillEvent {
    #[allow(missing_docs)]
    pub taker_side: Side,
    /// The order id of the maker order
    pub maker_order_id: u128,
    /// The total quote size of the transaction
    pub quote_size: u64,
    /// The total base size of the transaction
    pub base_size: u64,
    pub maker_callback_info: CallbackInfo,
    pub taker_callback_info: CallbackInfo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutEvent {
    #[allow(missing_docs)]
    pub side: Side,
    pub order_id: u128,
    /// The remaining base size of the order
    pub base_size: u64,
    /// Whether the order was removed from the book
    pub delete: bool,
    pub callback_info: CallbackInfo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    Fill(FillEvent),
    Out(OutEvent),
}

impl Event {
    /// The user market whose balances the crank must update for this event.
    pub fn user_market(&self) -> Pubkey {
        match self {
            Event::Fill(fill) => fill.maker_callback_info.user_market,
            Event::Out(out) => out.callback_info.user_market,
        }
    }
}

impl Decode for Event {
    fn decode(reader: &mut Reader<'_>) -> AoResult<Self> {
        let event = match reader.read_tag::<u8, EventTag>("event")? {
            EventTag::Fill => Event::Fill(FillEvent {
                taker_side: reader.read_tag::<u8, Side>("side")?,
                maker_order_id: reader.read()?,
                quote_size: reader.read()?,
                base_size: reader.read()?,
                maker_callback_info: reader.read()?,
                taker_callback_info: reader.read()?,
            }),
            EventTag::Out => Event::Out(OutEvent {
                side: reader.read_tag::<u8, Side>("side")?,
                order_id: reader.read()?,
                base_size: reader.read()?,
                delete: reader.read_bool()?,
                callback_info: reader.read()?,
            }),
        };
        Ok(event)
    }
}

////////////////////////////////////////////////////
// Event Queue

#[derive(BorshDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
/// Describes the current state of the event queue
pub struct EventQueueHeader {
    pub account_tag: u8,
    /// Byte offset of the oldest event within the ring
    pub head: u64,
    /// The current event queue length
    pub count: u64,
    /// Width of one ring slot
    pub event_size: u64,
    pub seq_num: u64,
}

impl Fixed for EventQueueHeader {
    const LEN: usize = EVENT_QUEUE_HEADER_LEN;
}

/// Byte offset, within a ring of `ring_len` bytes, of the event at logical position `index`.
///
/// `head` is itself a byte offset into the ring. `ring_len` must not be zero.
pub fn event_offset(head: u64, index: u64, event_size: u64, ring_len: u64) -> u64 {
    let offset = (index as u128 * event_size as u128 + head as u128) % ring_len as u128;
    offset as u64
}

/// The event queue account contains a serialized header, a register
/// and a circular buffer of serialized events.
///
/// Events are decoded eagerly, oldest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventQueue {
    header: EventQueueHeader,
    capacity: u64,
    events: Vec<Event>,
}

impl EventQueue {
    pub fn from_buffer(buf: &[u8]) -> AoResult<Self> {
        Self::parse(buf).map_err(|e| {
            warn!("Rejected event queue buffer of {} bytes: {}", buf.len(), e);
            e
        })
    }

    fn parse(buf: &[u8]) -> AoResult<Self> {
        let header: EventQueueHeader = read_from(buf)?;
        Reader::at(buf, EVENT_QUEUE_HEADER_LEN).skip(REGISTER_SIZE)?;
        if header.event_size == 0 {
            return Err(AoError::InvalidEventSize);
        }
        let event_size =
            usize::try_from(header.event_size).map_err(|_| AoError::InvalidEventSize)?;
        let ring_len = buf.len() - RING_OFFSET;
        let capacity = (ring_len / event_size) as u64;
        if header.count > 0 && capacity == 0 {
            return Err(AoError::TruncatedBuffer {
                offset: RING_OFFSET,
                needed: event_size,
                len: buf.len(),
            });
        }
        if header.count > capacity {
            return Err(AoError::InvalidQueueLength);
        }

        let events = (0..header.count)
            .map(|index| -> AoResult<Event> {
                let offset =
                    event_offset(header.head, index, header.event_size, ring_len as u64) as usize;
                // A slot running past the end of the ring is not wrapped
                let slot_bytes = Reader::at(buf, RING_OFFSET + offset).read_bytes(event_size)?;
                decode_from(slot_bytes)
            })
            .collect::<AoResult<Vec<Event>>>()?;

        debug!(
            "Decoded event queue with {} events in {} slots (head {}, seq {})",
            events.len(),
            capacity,
            header.head,
            header.seq_num
        );
        Ok(Self {
            header,
            capacity,
            events,
        })
    }

    /// Fetches and decodes several queues in one batch.
    pub fn load_multiple<F: AccountFetcher + ?Sized>(
        fetcher: &F,
        addresses: &[Pubkey],
    ) -> AoResult<Vec<Self>> {
        fetch_required(fetcher, addresses)?
            .iter()
            .map(|data| Self::from_buffer(data))
            .collect()
    }

    pub fn header(&self) -> &EventQueueHeader {
        &self.header
    }

    /// Number of ring slots in the account.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Retrieves the event at position index in the queue.
    pub fn peek_at(&self, index: u64) -> Option<&Event> {
        self.events.get(usize::try_from(index).ok()?)
    }

    /// Returns an iterator over all the queue's events
    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.events.iter()
    }

    /// Number of events a single crank instruction may consume.
    pub fn events_to_crank(&self, max_iterations: u64) -> u64 {
        self.header
            .count
            .min(max_iterations.min(MAX_ITERATIONS_FOR_CONSUME_EVENTS))
    }

    /// User market accounts touched by the events the next crank will consume.
    pub fn user_accounts_to_crank(&self, max_iterations: u64) -> Vec<Pubkey> {
        let n = self.events_to_crank(max_iterations) as usize;
        prepare_user_accounts_list(self.events.iter().take(n).map(Event::user_market).collect())
    }
}

impl<'a> IntoIterator for &'a EventQueue {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Deduplicates and sorts accounts by their raw bytes, the order the program expects.
///
/// The Python and TypeScript clients sort by base58 string instead, which orders
/// accounts differently, and gather the accounts of one more event than they crank.
pub fn prepare_user_accounts_list(mut user_accounts: Vec<Pubkey>) -> Vec<Pubkey> {
    user_accounts.sort_unstable_by(|a, b| a.to_bytes().cmp(&b.to_bytes()));
    user_accounts.dedup();
    user_accounts
}
