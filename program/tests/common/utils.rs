use solana_program::pubkey::Pubkey;

pub const DECIMALS: u8 = 6;

/// Little endian account data writer.
#[derive(Default)]
pub struct Writer(pub Vec<u8>);

impl Writer {
    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.0.push(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u128(&mut self, v: u128) -> &mut Self {
        self.0.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn pubkey(&mut self, k: &Pubkey) -> &mut Self {
        self.0.extend_from_slice(k.as_ref());
        self
    }

    pub fn pad_to(&mut self, len: usize) -> &mut Self {
        self.0.resize(len, 0);
        self
    }
}

/// Order id of the `seq`-th order at `ticks`.
pub fn order_id(ticks: u64, seq: u64) -> u128 {
    let fp32 = ((ticks as u128) << 32) / 10u128.pow(DECIMALS as u32);
    (fp32 << 64) | seq as u128
}

pub struct Order {
    pub id: u128,
    pub base_quantity: u64,
    pub owner: Pubkey,
}

/// A slab holding at most two orders: leaves in slots 0 and 1, their parent in slot 2.
pub fn slab_account(tag: u8, market: &Pubkey, orders: &[Order]) -> Vec<u8> {
    assert!(orders.len() <= 2);
    let mut orders: Vec<&Order> = orders.iter().collect();
    orders.sort_by_key(|o| o.id);
    let slots = if orders.len() == 2 { 3 } else { orders.len() };
    let callback_offset = 104 + slots * 40;

    let mut w = Writer::default();
    w.u8(tag)
        .u64(slots as u64)
        .u64(0)
        .u32(0)
        .u64(callback_offset as u64)
        .u64(0)
        .u64(0)
        .u64(slots as u64)
        .u32(if slots == 3 { 2 } else { 0 })
        .u64(orders.len() as u64)
        .pubkey(market)
        .pad_to(104);
    for (i, o) in orders.iter().enumerate() {
        w.u64(2)
            .u128(o.id)
            .u64((callback_offset + i * 33) as u64)
            .u64(o.base_quantity)
            .pad_to(104 + (i + 1) * 40);
    }
    if let [a, b] = orders.as_slice() {
        w.u64(1)
            .u64((a.id ^ b.id).leading_zeros() as u64)
            .u128(b.id)
            .u32(0)
            .u32(1)
            .pad_to(callback_offset);
    }
    for o in &orders {
        w.pubkey(&o.owner).u8(0);
    }
    w.0
}

pub fn fill_event(maker: &Pubkey, taker: &Pubkey, maker_order_id: u128) -> Vec<u8> {
    let mut w = Writer::default();
    w.u8(0)
        .u8(0)
        .u128(maker_order_id)
        .u64(400_000)
        .u64(1_000_000)
        .pubkey(maker)
        .u8(2)
        .pubkey(taker)
        .u8(0);
    w.0
}

pub fn out_event(owner: &Pubkey, order_id: u128) -> Vec<u8> {
    let mut w = Writer::default();
    w.u8(1)
        .u8(1)
        .u128(order_id)
        .u64(0)
        .u8(1)
        .pubkey(owner)
        .u8(0);
    w.0
}

/// Queue of `capacity` 100 byte slots, with `events` written from ring byte `head` onwards.
pub fn event_queue_account(head: u64, capacity: usize, events: &[Vec<u8>]) -> Vec<u8> {
    let mut w = Writer::default();
    w.u8(2)
        .u64(head)
        .u64(events.len() as u64)
        .u64(100)
        .u64(17)
        .pad_to(75 + capacity * 100);
    for (i, event) in events.iter().enumerate() {
        let start = 75 + (head as usize + i * 100) % (capacity * 100);
        w.0[start..start + event.len()].copy_from_slice(event);
    }
    w.0
}
