use std::sync::Arc;

use log::debug;
use solana_program::pubkey::Pubkey;

use crate::error::{AoError, AoResult};
use crate::state::critbit::{LeafNode, Slab};
use crate::state::market_state::{
    fetch_optional, fetch_required, AccountFetcher, OrderbookAccounts,
};
use crate::state::Side;
use crate::utils::{fp32_to_ticks, ui_scale, weighted_average};

/// Number of price levels walked when estimating a fill.
pub const FILL_ESTIMATION_DEPTH: usize = 100;

/// An aggregated price level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Price {
    pub price: f64,
    pub size: f64,
}

/// A single resting order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlabOrder {
    /// The order id, which is also the key of its leaf
    pub id: u128,
    /// Price in ticks
    pub price: f64,
    /// Price as a fraction of one unit
    pub price_ui: f64,
    pub base_quantity: u64,
    pub base_quantity_ui: f64,
    pub user_market: Pubkey,
    pub fee_tier: u8,
}

/// Outcome of walking the book for a target quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillEstimate {
    /// Size weighted mean price of the consumed levels
    pub avg_price: f64,
    /// Price of the last consumed level
    pub worst_price: f64,
    /// Quantity filled, in the target's denomination
    pub filled: f64,
}

/// Price of a leaf key in ticks of `10^-decimals`.
pub fn price_from_key(key: u128, decimals: u8) -> u64 {
    fp32_to_ticks((key >> 64) as u64, decimals)
}

/// `(ticks, base quantity)` levels in traversal order.
///
/// Consecutive leaves with the same tick price are merged. The walk stops once `depth`
/// levels are complete, so the tree order must already be price order.
pub fn aggregated_levels(
    slab: &Slab,
    depth: usize,
    decimals: u8,
    increasing: bool,
) -> Vec<(u64, u64)> {
    let mut levels: Vec<(u64, u64)> = Vec::with_capacity(depth.min(slab.leaf_count() as usize));
    for leaf in slab.items(!increasing) {
        let price = price_from_key(leaf.key, decimals);
        if let Some((p, size)) = levels.last_mut() {
            if *p == price {
                *size = size.saturating_add(leaf.base_quantity);
                continue;
            }
        }
        if levels.len() == depth {
            break;
        }
        levels.push((price, leaf.base_quantity));
    }
    levels
}

fn convert_price(ticks: u64, decimals: u8, ui_amount: bool, is_inverted: bool) -> f64 {
    let scale = ui_scale(decimals);
    match (ui_amount, is_inverted) {
        (true, false) => ticks as f64 / scale,
        (true, true) => 1f64 - ticks as f64 / scale,
        (false, false) => ticks as f64,
        (false, true) => scale - ticks as f64,
    }
}

fn convert_size(size: u64, decimals: u8, ui_amount: bool) -> f64 {
    if ui_amount {
        size as f64 / ui_scale(decimals)
    } else {
        size as f64
    }
}

fn to_order(leaf: &LeafNode, decimals: u8, is_inverted: bool) -> SlabOrder {
    let ticks = price_from_key(leaf.key, decimals);
    SlabOrder {
        id: leaf.key,
        price: convert_price(ticks, decimals, false, is_inverted),
        price_ui: convert_price(ticks, decimals, true, is_inverted),
        base_quantity: leaf.base_quantity,
        base_quantity_ui: convert_size(leaf.base_quantity, decimals, true),
        user_market: leaf.callback_info.user_market,
        fee_tier: leaf.callback_info.fee_tier,
    }
}

/// Both sides of one outcome's book.
///
/// A view is never mutated: refreshing means loading a new one, and [`Orderbook::invert`]
/// builds a new view over the same slabs.
#[derive(Debug, Clone)]
pub struct Orderbook {
    pub pubkey: Pubkey,
    pub slab_bids: Arc<Slab>,
    pub slab_asks: Arc<Slab>,
    pub slab_bids_pubkey: Pubkey,
    pub slab_asks_pubkey: Pubkey,
    pub decimals: u8,
    /// Set for the mirrored second outcome of a two outcome market
    pub is_inverted: bool,
}

impl Orderbook {
    pub fn new(
        pubkey: Pubkey,
        slab_bids: Slab,
        slab_asks: Slab,
        slab_bids_pubkey: Pubkey,
        slab_asks_pubkey: Pubkey,
        decimals: u8,
        is_inverted: bool,
    ) -> Self {
        Self {
            pubkey,
            slab_bids: Arc::new(slab_bids),
            slab_asks: Arc::new(slab_asks),
            slab_bids_pubkey,
            slab_asks_pubkey,
            decimals,
            is_inverted,
        }
    }

    /// Fetches both slabs of `accounts` in a single batch.
    pub fn load<F: AccountFetcher + ?Sized>(
        fetcher: &F,
        accounts: &OrderbookAccounts,
        decimals: u8,
        is_inverted: bool,
    ) -> AoResult<Self> {
        let data = fetch_required(fetcher, &[accounts.bids, accounts.asks])?;
        let (bids, asks) = match data.as_slice() {
            [bids, asks] => (Slab::from_bytes(bids)?, Slab::from_bytes(asks)?),
            _ => return Err(AoError::FetchFailed("expected two slab accounts".to_string())),
        };
        Ok(Self::new(
            accounts.orderbook,
            bids,
            asks,
            accounts.bids,
            accounts.asks,
            decimals,
            is_inverted,
        ))
    }

    /// Loads several books with one fetch for all their slabs.
    pub fn load_for_accounts<F: AccountFetcher + ?Sized>(
        fetcher: &F,
        books: &[(OrderbookAccounts, u8)],
    ) -> AoResult<Vec<Self>> {
        let addresses: Vec<Pubkey> = books
            .iter()
            .flat_map(|(accounts, _)| [accounts.bids, accounts.asks])
            .collect();
        let data = fetch_required(fetcher, &addresses)?;
        books
            .iter()
            .zip(data.chunks_exact(2))
            .map(|((accounts, decimals), slabs)| -> AoResult<Self> {
                Ok(Self::new(
                    accounts.orderbook,
                    Slab::from_bytes(&slabs[0])?,
                    Slab::from_bytes(&slabs[1])?,
                    accounts.bids,
                    accounts.asks,
                    *decimals,
                    false,
                ))
            })
            .collect()
    }

    /// Missing accounts decode to `None`.
    pub fn load_multiple_slabs<F: AccountFetcher + ?Sized>(
        fetcher: &F,
        slab_addresses: &[Pubkey],
    ) -> AoResult<Vec<Option<Slab>>> {
        fetch_optional(fetcher, slab_addresses)?
            .iter()
            .map(|data| data.as_deref().map(Slab::from_bytes).transpose())
            .collect()
    }

    /// The book of the complementary outcome: sides swapped and prices mirrored.
    /// Inverting twice gives back the original view.
    pub fn invert(&self) -> Self {
        Self {
            pubkey: self.pubkey,
            slab_bids: Arc::clone(&self.slab_asks),
            slab_asks: Arc::clone(&self.slab_bids),
            slab_bids_pubkey: self.slab_asks_pubkey,
            slab_asks_pubkey: self.slab_bids_pubkey,
            decimals: self.decimals,
            is_inverted: !self.is_inverted,
        }
    }

    /// Binary markets store a single book on chain; the second outcome is its inversion.
    pub fn orderbooks_for_market(mut orderbooks: Vec<Self>, number_of_outcomes: u8) -> Vec<Self> {
        if number_of_outcomes == 2 && orderbooks.len() == 1 {
            let inverted = orderbooks[0].invert();
            orderbooks.push(inverted);
        }
        orderbooks
    }

    pub fn get_l2_for_slab(
        slab: &Slab,
        depth: usize,
        increasing: bool,
        decimals: u8,
        ui_amount: bool,
        is_inverted: bool,
    ) -> Vec<Price> {
        aggregated_levels(slab, depth, decimals, increasing)
            .into_iter()
            .map(|(ticks, size)| Price {
                price: convert_price(ticks, decimals, ui_amount, is_inverted),
                size: convert_size(size, decimals, ui_amount),
            })
            .collect()
    }

    pub fn get_l3_for_slab(
        slab: &Slab,
        decimals: u8,
        increasing: bool,
        is_inverted: bool,
    ) -> Vec<SlabOrder> {
        slab.items(!increasing)
            .map(|leaf| to_order(leaf, decimals, is_inverted))
            .collect()
    }

    // Bids are best first when descending.
    // The mirrored slab is an ask slab, best first when ascending.
    fn bids_increasing(&self) -> bool {
        self.is_inverted
    }

    fn asks_increasing(&self) -> bool {
        !self.is_inverted
    }

    pub fn get_bids_l2(&self, depth: usize, ui_amount: bool) -> Vec<Price> {
        Self::get_l2_for_slab(
            &self.slab_bids,
            depth,
            self.bids_increasing(),
            self.decimals,
            ui_amount,
            self.is_inverted,
        )
    }

    pub fn get_asks_l2(&self, depth: usize, ui_amount: bool) -> Vec<Price> {
        Self::get_l2_for_slab(
            &self.slab_asks,
            depth,
            self.asks_increasing(),
            self.decimals,
            ui_amount,
            self.is_inverted,
        )
    }

    pub fn get_bids_l3(&self) -> Vec<SlabOrder> {
        Self::get_l3_for_slab(
            &self.slab_bids,
            self.decimals,
            self.bids_increasing(),
            self.is_inverted,
        )
    }

    pub fn get_asks_l3(&self) -> Vec<SlabOrder> {
        Self::get_l3_for_slab(
            &self.slab_asks,
            self.decimals,
            self.asks_increasing(),
            self.is_inverted,
        )
    }

    pub fn get_best_bid_price(&self, ui_amount: bool) -> Option<Price> {
        self.get_bids_l2(1, ui_amount).into_iter().next()
    }

    pub fn get_best_ask_price(&self, ui_amount: bool) -> Option<Price> {
        self.get_asks_l2(1, ui_amount).into_iter().next()
    }

    fn price_by_order_id(&self, slab: &Slab, order_id: u128, ui_amount: bool) -> Option<Price> {
        let leaf = slab.get(order_id)?;
        Some(Price {
            price: convert_price(
                price_from_key(leaf.key, self.decimals),
                self.decimals,
                ui_amount,
                self.is_inverted,
            ),
            size: convert_size(leaf.base_quantity, self.decimals, ui_amount),
        })
    }

    pub fn get_bid_price_by_order_id(&self, order_id: u128, ui_amount: bool) -> Option<Price> {
        self.price_by_order_id(&self.slab_bids, order_id, ui_amount)
    }

    pub fn get_ask_price_by_order_id(&self, order_id: u128, ui_amount: bool) -> Option<Price> {
        self.price_by_order_id(&self.slab_asks, order_id, ui_amount)
    }

    /// Walks up to [`FILL_ESTIMATION_DEPTH`] levels of the `side` book until `qty` is met.
    ///
    /// A base denominated target is consumed level by level in sizes, a quote
    /// denominated one in `size * price`. Returns `None` when nothing can be filled.
    pub fn estimate_fill(
        &self,
        qty: f64,
        side: Side,
        quote_denominated: bool,
        ui_amount: bool,
    ) -> Option<FillEstimate> {
        if qty.is_nan() || qty <= 0f64 {
            return None;
        }
        let levels = match side {
            Side::Bid => self.get_bids_l2(FILL_ESTIMATION_DEPTH, ui_amount),
            Side::Ask => self.get_asks_l2(FILL_ESTIMATION_DEPTH, ui_amount),
        };
        let accumulator = |p: &Price| {
            if quote_denominated {
                p.size * p.price
            } else {
                p.size
            }
        };

        let mut consumed: Vec<Price> = Vec::new();
        let mut filled = 0f64;
        for level in levels {
            let remaining = qty - filled;
            let available = accumulator(&level);
            if remaining <= available {
                filled += remaining;
                let size = if quote_denominated {
                    remaining / level.price
                } else {
                    remaining
                };
                consumed.push(Price {
                    price: level.price,
                    size,
                });
                break;
            }
            filled += available;
            consumed.push(level);
        }

        let worst_price = consumed.last()?.price;
        let prices: Vec<f64> = consumed.iter().map(|p| p.price).collect();
        let sizes: Vec<f64> = consumed.iter().map(|p| p.size).collect();
        let avg_price = weighted_average(&prices, &sizes)?;
        debug!(
            "Estimated fill of {} over {} levels: avg {} worst {}",
            filled,
            consumed.len(),
            avg_price,
            worst_price
        );
        Some(FillEstimate {
            avg_price,
            worst_price,
            filled,
        })
    }

    /// Estimates filling `base_qty`, accumulating level sizes.
    ///
    /// The Python and TypeScript SDKs swap the accumulators, summing `size` against quote
    /// targets and `size * price` against base ones, so their estimates differ from this one.
    pub fn estimate_avg_fill_for_base_qty(
        &self,
        base_qty: f64,
        side: Side,
        ui_amount: bool,
    ) -> Option<FillEstimate> {
        self.estimate_fill(base_qty, side, false, ui_amount)
    }

    pub fn estimate_avg_fill_for_quote_qty(
        &self,
        quote_qty: f64,
        side: Side,
        ui_amount: bool,
    ) -> Option<FillEstimate> {
        self.estimate_fill(quote_qty, side, true, ui_amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AccountTag, CallbackInfo};
    use crate::utils::fixtures::SlabBuilder;
    use crate::utils::ticks_to_fp32;
    use std::collections::HashMap;

    const DECIMALS: u8 = 2;

    fn key(ticks: u64, seq: u64) -> u128 {
        ((ticks_to_fp32(ticks, DECIMALS) as u128) << 64) | seq as u128
    }

    fn slab(tag: AccountTag, orders: &[(u64, u64)]) -> Slab {
        Slab::from_bytes(&slab_bytes(tag, orders)).unwrap()
    }

    fn slab_bytes(tag: AccountTag, orders: &[(u64, u64)]) -> Vec<u8> {
        let mut builder = SlabBuilder::new(tag);
        for (seq, (ticks, size)) in orders.iter().enumerate() {
            builder.insert_leaf(
                key(*ticks, seq as u64),
                *size,
                CallbackInfo {
                    user_market: Pubkey::new_unique(),
                    fee_tier: 1,
                },
            );
        }
        builder.to_bytes()
    }

    fn book(bids: &[(u64, u64)], asks: &[(u64, u64)]) -> Orderbook {
        Orderbook::new(
            Pubkey::new_unique(),
            slab(AccountTag::Bids, bids),
            slab(AccountTag::Asks, asks),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            DECIMALS,
            false,
        )
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn levels_merge_equal_prices() {
        let s = slab(AccountTag::Asks, &[(50, 10), (50, 5), (51, 3), (53, 1)]);
        assert_eq!(aggregated_levels(&s, 2, DECIMALS, true), vec![(50, 15), (51, 3)]);
        assert_eq!(
            aggregated_levels(&s, 10, DECIMALS, false),
            vec![(53, 1), (51, 3), (50, 15)]
        );
        assert!(aggregated_levels(&s, 0, DECIMALS, true).is_empty());

        let ui = Orderbook::get_l2_for_slab(&s, 2, true, DECIMALS, true, false);
        assert!(close(ui[0].price, 0.50) && close(ui[0].size, 0.15));
        assert!(close(ui[1].price, 0.51) && close(ui[1].size, 0.03));
    }

    #[test]
    fn price_key_round_trip() {
        for ticks in [1, 33, 50, 99] {
            assert_eq!(price_from_key(key(ticks, 7), DECIMALS), ticks);
        }
        assert_eq!(price_from_key(u32::MAX as u128, DECIMALS), 0);
    }

    #[test]
    fn sides_are_best_first() {
        let ob = book(&[(40, 1), (45, 2), (30, 3)], &[(60, 4), (55, 5), (70, 6)]);
        let bids: Vec<f64> = ob.get_bids_l2(10, false).iter().map(|p| p.price).collect();
        let asks: Vec<f64> = ob.get_asks_l2(10, false).iter().map(|p| p.price).collect();
        assert_eq!(bids, vec![45.0, 40.0, 30.0]);
        assert_eq!(asks, vec![55.0, 60.0, 70.0]);
        assert_eq!(ob.get_best_bid_price(false), Some(Price { price: 45.0, size: 2.0 }));
        assert_eq!(ob.get_best_ask_price(false), Some(Price { price: 55.0, size: 5.0 }));

        let l3 = ob.get_bids_l3();
        assert_eq!(l3.len(), 3);
        assert_eq!(l3[0].base_quantity, 2);
        assert!(close(l3[0].price_ui, 0.45));
        assert_eq!(l3[0].fee_tier, 1);
        assert_eq!(ob.get_asks_l3()[0].price, 55.0);
    }

    #[test]
    fn inversion_mirrors_prices() {
        let ob = book(&[(40, 1), (45, 2), (30, 3)], &[(60, 4), (55, 5)]);
        let inverted = ob.invert();
        assert!(inverted.is_inverted);

        let bids = ob.get_bids_l2(10, true);
        let mirrored = inverted.get_asks_l2(10, true);
        assert_eq!(bids.len(), mirrored.len());
        for (b, m) in bids.iter().zip(&mirrored) {
            assert!(close(m.price, 1.0 - b.price));
            assert_eq!(m.size, b.size);
        }
        // The mirrored bids come from the ask slab, still best (highest) first
        let inverted_bids: Vec<f64> = inverted
            .get_bids_l2(10, false)
            .iter()
            .map(|p| p.price)
            .collect();
        assert_eq!(inverted_bids, vec![45.0, 40.0]);
        let l3 = inverted.get_asks_l3();
        assert_eq!(l3[0].price, 55.0);
        assert!(close(l3[0].price_ui, 0.55));

        let back = inverted.invert();
        assert!(!back.is_inverted);
        assert_eq!(back.slab_bids_pubkey, ob.slab_bids_pubkey);
        for (b, o) in back.get_bids_l2(10, true).iter().zip(&bids) {
            assert!(close(b.price, o.price));
        }
    }

    #[test]
    fn price_by_order_id() {
        let ob = book(&[(40, 100)], &[(60, 50)]);
        let id = ob.slab_bids.items(false).next().unwrap().key;
        let p = ob.get_bid_price_by_order_id(id, true).unwrap();
        assert!(close(p.price, 0.40) && close(p.size, 1.0));
        assert_eq!(
            ob.get_bid_price_by_order_id(id, false),
            Some(Price {
                price: 40.0,
                size: 100.0
            })
        );
        assert_eq!(ob.get_ask_price_by_order_id(id, true), None);

        let inverted = ob.invert();
        let p = inverted.get_ask_price_by_order_id(id, true).unwrap();
        assert!(close(p.price, 0.60));
    }

    #[test]
    fn fill_estimation_boundary() {
        let ob = book(&[], &[(40, 1000), (45, 1000)]);
        let fill = ob.estimate_avg_fill_for_base_qty(15.0, Side::Ask, true).unwrap();
        assert!(close(fill.filled, 15.0));
        assert!(close(fill.worst_price, 0.45));
        assert!(close(fill.avg_price, (0.40 * 10.0 + 0.45 * 5.0) / 15.0));

        // Target beyond the book fills what is there
        let fill = ob.estimate_avg_fill_for_base_qty(50.0, Side::Ask, true).unwrap();
        assert!(close(fill.filled, 20.0));
        assert!(close(fill.avg_price, 0.425));

        // 4 quote units exhaust the first level, 1 more buys 1/0.45 base at 0.45
        let fill = ob.estimate_avg_fill_for_quote_qty(5.0, Side::Ask, true).unwrap();
        assert!(close(fill.filled, 5.0));
        assert!(close(fill.worst_price, 0.45));
        let expected = (0.40 * 10.0 + 0.45 * (1.0 / 0.45)) / (10.0 + 1.0 / 0.45);
        assert!(close(fill.avg_price, expected));
    }

    #[test]
    fn empty_book_has_no_prices() {
        let ob = book(&[], &[]);
        assert!(ob.get_bids_l2(5, true).is_empty());
        assert_eq!(ob.get_best_bid_price(true), None);
        assert_eq!(ob.get_best_ask_price(false), None);
        assert_eq!(ob.get_bid_price_by_order_id(0, true), None);
        assert_eq!(ob.estimate_avg_fill_for_base_qty(1.0, Side::Bid, true), None);
        let one_sided = book(&[(40, 10)], &[]);
        assert_eq!(one_sided.estimate_avg_fill_for_base_qty(0.0, Side::Bid, false), None);
        assert!(one_sided.estimate_avg_fill_for_base_qty(1.0, Side::Bid, false).is_some());
    }

    #[test]
    fn load_through_fetcher() {
        let accounts = OrderbookAccounts {
            orderbook: Pubkey::new_unique(),
            event_queue: Pubkey::new_unique(),
            bids: Pubkey::new_unique(),
            asks: Pubkey::new_unique(),
        };
        let mut fetcher = HashMap::new();
        fetcher.insert(accounts.bids, slab_bytes(AccountTag::Bids, &[(40, 10)]));
        assert!(Orderbook::load(&fetcher, &accounts, DECIMALS, false).is_err());

        fetcher.insert(accounts.asks, slab_bytes(AccountTag::Asks, &[(70, 10)]));
        let ob = Orderbook::load(&fetcher, &accounts, DECIMALS, false).unwrap();
        assert!(ob.slab_bids.check(Side::Bid));
        assert!(ob.slab_asks.check(Side::Ask));

        let books = Orderbook::orderbooks_for_market(vec![ob], 2);
        assert_eq!(books.len(), 2);
        assert_eq!(books[1].get_best_ask_price(false).unwrap().price, 60.0);

        let missing = Pubkey::new_unique();
        let slabs = Orderbook::load_multiple_slabs(&fetcher, &[accounts.asks, missing]).unwrap();
        assert!(slabs[0].is_some() && slabs[1].is_none());

        let many = Orderbook::load_for_accounts(&fetcher, &[(accounts, 3)]).unwrap();
        assert_eq!(many[0].decimals, 3);
    }
}
