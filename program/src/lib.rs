#![warn(missing_docs)]
/*!
Decoder and market views for the on-chain orderbooks of outcome markets.

## Overview

Each outcome of a market owns an orderbook made of three accounts: a bids slab, an asks slab and an
event queue. This library turns the raw data of those accounts into read-only structures and derives
the views a client needs to price and validate orders before submitting them.

Fetching the account data is the caller's business. Anything able to return account data for a batch
of addresses can be plugged in through the [`AccountFetcher`][`state::market_state::AccountFetcher`]
trait.

## Slabs

A [`Slab`][`state::critbit::Slab`] is one side of the book, stored as a critbit tree over a flat
array of node slots. Leaves hold resting orders keyed by order id, the upper 64 bits of which are
the FP32 limit price. [`Slab::from_bytes`][`state::critbit::Slab::from_bytes`] checks that the tree
reachable from the root is well formed, so traversals over a decoded slab always terminate.

## Orderbook views

An [`Orderbook`][`state::orderbook::Orderbook`] pairs the two slabs of an outcome with its decimal
precision. It produces aggregated (L2) and per order (L3) views, best prices and fill estimates.
Binary markets only store the book of their first outcome: the second one is obtained with
[`invert`][`state::orderbook::Orderbook::invert`], which swaps the sides and reports every price `p`
as `1 - p`.

## Processing the queue

The [`EventQueue`][`state::event_queue::EventQueue`] decodes the ring of fill and out events left by
order matching. The user accounts a crank transaction has to pass for the next batch of events are
given by [`user_accounts_to_crank`][`state::event_queue::EventQueue::user_accounts_to_crank`].
*/

#[doc(hidden)]
pub mod error;
/// Fixed layout decoding primitives
#[allow(missing_docs)]
pub mod layout;
/// Describes the different data structures that the program uses to encode state
pub mod state;
/// Utility functions
pub mod utils;

pub use error::{AoError, AoResult};
