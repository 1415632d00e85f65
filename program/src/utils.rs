/// FP32 fixed point scale, `2^32`.
pub const FP32_ONE: u128 = 1 << 32;

fn pow10(decimals: u8) -> u128 {
    10u128.checked_pow(decimals as u32).unwrap_or(u128::MAX)
}

/// Rounds an FP32 price to the nearest tick, a tick being `10^-decimals`.
pub fn fp32_to_ticks(price_fp32: u64, decimals: u8) -> u64 {
    let scaled = (price_fp32 as u128).saturating_mul(pow10(decimals));
    let rounded = scaled.saturating_add(FP32_ONE / 2) >> 32;
    u64::try_from(rounded).unwrap_or(u64::MAX)
}

/// FP32 encoding of a tick count. `fp32_to_ticks` maps the result back to `ticks`.
pub fn ticks_to_fp32(ticks: u64, decimals: u8) -> u64 {
    u64::try_from(((ticks as u128) << 32) / pow10(decimals)).unwrap_or(u64::MAX)
}

/// `10^decimals` as a float, the number of ticks in a unit.
pub fn ui_scale(decimals: u8) -> f64 {
    10f64.powi(decimals as i32)
}

/// `Σ(num·weight) / Σ(weight)`, or `None` when the weights sum to zero.
pub fn weighted_average(nums: &[f64], weights: &[f64]) -> Option<f64> {
    debug_assert_eq!(nums.len(), weights.len());
    let (sum, weight_sum) = nums
        .iter()
        .zip(weights)
        .fold((0f64, 0f64), |(s, w_sum), (n, w)| (s + n * w, w_sum + w));
    if weight_sum > 0f64 {
        Some(sum / weight_sum)
    } else {
        None
    }
}

/// Encoders producing account data in the on-chain layout, used to build fixtures.
#[cfg(any(test, feature = "utils"))]
#[allow(missing_docs)]
pub mod fixtures {
    use solana_program::pubkey::Pubkey;

    use crate::state::critbit::{
        FreeNode, InnerNode, LeafNode, Node, NodeHandle, NodeTag, SLAB_PADDED_HEADER_LEN,
        SLOT_SIZE,
    };
    use crate::state::event_queue::{
        Event, EventTag, EVENT_QUEUE_HEADER_LEN, EVENT_SLOT_SIZE, REGISTER_SIZE,
    };
    use crate::state::{AccountTag, CallbackInfo, CALLBACK_INFO_LEN};

    fn write_callback_info(out: &mut Vec<u8>, info: &CallbackInfo) {
        out.extend_from_slice(&info.user_market.to_bytes());
        out.push(info.fee_tier);
    }

    /// Builds a slab by replaying the program's critbit insertions and removals.
    ///
    /// Inner and leaf nodes share one slot array. Callback infos are laid out after the
    /// node slots, one per slot, and leaves point at theirs by absolute offset.
    pub struct SlabBuilder {
        account_tag: AccountTag,
        market_address: Pubkey,
        nodes: Vec<Node>,
        root_node: NodeHandle,
        leaf_count: u64,
        free_list_len: u64,
        free_list_head: NodeHandle,
    }

    impl SlabBuilder {
        pub fn new(account_tag: AccountTag) -> Self {
            Self {
                account_tag,
                market_address: Pubkey::new_unique(),
                nodes: vec![],
                root_node: 0,
                leaf_count: 0,
                free_list_len: 0,
                free_list_head: 0,
            }
        }

        pub fn with_market_address(mut self, market_address: Pubkey) -> Self {
            self.market_address = market_address;
            self
        }

        pub fn root(&self) -> NodeHandle {
            self.root_node
        }

        pub fn free_list_head(&self) -> NodeHandle {
            self.free_list_head
        }

        pub fn leaf_count(&self) -> u64 {
            self.leaf_count
        }

        fn allocate(&mut self, node: Node) -> NodeHandle {
            if self.free_list_len == 0 {
                self.nodes.push(node);
                return (self.nodes.len() - 1) as NodeHandle;
            }
            let key = self.free_list_head;
            match self.nodes[key as usize] {
                Node::Free(FreeNode { next }) => self.free_list_head = next,
                Node::LastFree => {}
                _ => unreachable!(),
            }
            self.free_list_len -= 1;
            self.nodes[key as usize] = node;
            key
        }

        fn free(&mut self, handle: NodeHandle) -> Node {
            let node = if self.free_list_len == 0 {
                Node::LastFree
            } else {
                Node::Free(FreeNode {
                    next: self.free_list_head,
                })
            };
            self.free_list_head = handle;
            self.free_list_len += 1;
            std::mem::replace(&mut self.nodes[handle as usize], node)
        }

        fn new_leaf(key: u128, base_quantity: u64, callback_info: CallbackInfo) -> Node {
            Node::Leaf(LeafNode {
                key,
                callback_info_pt: 0,
                base_quantity,
                callback_info,
            })
        }

        /// Inserts an order, replacing the leaf when the key is already present.
        pub fn insert_leaf(
            &mut self,
            key: u128,
            base_quantity: u64,
            callback_info: CallbackInfo,
        ) -> NodeHandle {
            if self.leaf_count == 0 {
                let handle = self.allocate(Self::new_leaf(key, base_quantity, callback_info));
                self.root_node = handle;
                self.leaf_count = 1;
                return handle;
            }
            let mut root = self.root_node;
            let mut parent_node: Option<NodeHandle> = None;
            let mut previous_critbit = false;
            loop {
                let shared_prefix_len = match &mut self.nodes[root as usize] {
                    Node::Inner(inner) => {
                        let shared_prefix_len = (inner.key ^ key).leading_zeros();
                        if shared_prefix_len as u64 >= inner.prefix_len {
                            parent_node = Some(root);
                            let (child, crit_bit) = inner.walk_down(key);
                            root = child;
                            previous_critbit = crit_bit;
                            continue;
                        }
                        shared_prefix_len
                    }
                    Node::Leaf(leaf) => {
                        if leaf.key == key {
                            // clobber the existing leaf
                            leaf.base_quantity = base_quantity;
                            leaf.callback_info = callback_info;
                            return root;
                        }
                        (leaf.key ^ key).leading_zeros()
                    }
                    _ => unreachable!(),
                };

                // a new inner node becomes the LCA of the new leaf and `root`
                let crit_bit_mask: u128 = (1u128 << 127) >> shared_prefix_len;
                let new_leaf_crit_bit = (crit_bit_mask & key) != 0;

                let new_leaf_handle =
                    self.allocate(Self::new_leaf(key, base_quantity, callback_info));
                let mut children = [0; 2];
                children[new_leaf_crit_bit as usize] = new_leaf_handle;
                children[!new_leaf_crit_bit as usize] = root;
                let new_root_handle = self.allocate(Node::Inner(InnerNode {
                    prefix_len: shared_prefix_len as u64,
                    key,
                    children,
                }));

                match parent_node {
                    Some(p) => match &mut self.nodes[p as usize] {
                        Node::Inner(n) => n.children[previous_critbit as usize] = new_root_handle,
                        _ => unreachable!(),
                    },
                    None => self.root_node = new_root_handle,
                }
                self.leaf_count += 1;
                return new_leaf_handle;
            }
        }

        pub fn remove_by_key(&mut self, search_key: u128) -> Option<LeafNode> {
            if self.leaf_count == 0 {
                return None;
            }
            let mut grandparent_h: Option<(NodeHandle, bool)> = None;
            let mut parent_h: Option<(NodeHandle, bool)> = None;
            let mut child_h = self.root_node;
            loop {
                match &self.nodes[child_h as usize] {
                    Node::Inner(inner) => {
                        let (next, crit_bit) = inner.walk_down(search_key);
                        grandparent_h = parent_h;
                        parent_h = Some((child_h, crit_bit));
                        child_h = next;
                    }
                    Node::Leaf(leaf) if leaf.key == search_key => break,
                    _ => return None,
                }
            }
            let removed = match self.free(child_h) {
                Node::Leaf(l) => l,
                _ => unreachable!(),
            };
            self.leaf_count -= 1;
            match parent_h {
                None => self.root_node = 0,
                Some((p, crit_bit)) => {
                    // replace the parent with the removed leaf's sibling
                    let sibling = match &self.nodes[p as usize] {
                        Node::Inner(n) => n.children[!crit_bit as usize],
                        _ => unreachable!(),
                    };
                    match grandparent_h {
                        Some((g, g_crit_bit)) => match &mut self.nodes[g as usize] {
                            Node::Inner(n) => n.children[g_crit_bit as usize] = sibling,
                            _ => unreachable!(),
                        },
                        None => self.root_node = sibling,
                    }
                    self.free(p);
                }
            }
            Some(removed)
        }

        /// Serializes to account data. `callback_memory_offset` is the end of the node region.
        pub fn to_bytes(&self) -> Vec<u8> {
            let bump_index = self.nodes.len();
            let callback_memory_offset = SLAB_PADDED_HEADER_LEN + bump_index * SLOT_SIZE;
            let len = callback_memory_offset + bump_index * CALLBACK_INFO_LEN;
            let mut out = Vec::with_capacity(len);
            out.push(self.account_tag as u8);
            out.extend_from_slice(&(bump_index as u64).to_le_bytes());
            out.extend_from_slice(&self.free_list_len.to_le_bytes());
            out.extend_from_slice(&self.free_list_head.to_le_bytes());
            out.extend_from_slice(&(callback_memory_offset as u64).to_le_bytes());
            out.extend_from_slice(&0u64.to_le_bytes());
            out.extend_from_slice(&0u64.to_le_bytes());
            out.extend_from_slice(&(bump_index as u64).to_le_bytes());
            out.extend_from_slice(&self.root_node.to_le_bytes());
            out.extend_from_slice(&self.leaf_count.to_le_bytes());
            out.extend_from_slice(&self.market_address.to_bytes());
            out.resize(SLAB_PADDED_HEADER_LEN, 0);

            let mut callback_infos = vec![0u8; bump_index * CALLBACK_INFO_LEN];
            for (handle, node) in self.nodes.iter().enumerate() {
                let slot_start = out.len();
                match node {
                    Node::Uninitialized => {
                        out.extend_from_slice(&(NodeTag::Uninitialized as u64).to_le_bytes())
                    }
                    Node::Inner(inner) => {
                        out.extend_from_slice(&(NodeTag::InnerNode as u64).to_le_bytes());
                        out.extend_from_slice(&inner.prefix_len.to_le_bytes());
                        out.extend_from_slice(&inner.key.to_le_bytes());
                        out.extend_from_slice(&inner.children[0].to_le_bytes());
                        out.extend_from_slice(&inner.children[1].to_le_bytes());
                    }
                    Node::Leaf(leaf) => {
                        let pt = callback_memory_offset + handle * CALLBACK_INFO_LEN;
                        out.extend_from_slice(&(NodeTag::LeafNode as u64).to_le_bytes());
                        out.extend_from_slice(&leaf.key.to_le_bytes());
                        out.extend_from_slice(&(pt as u64).to_le_bytes());
                        out.extend_from_slice(&leaf.base_quantity.to_le_bytes());
                        let mut info = Vec::with_capacity(CALLBACK_INFO_LEN);
                        write_callback_info(&mut info, &leaf.callback_info);
                        let start = handle * CALLBACK_INFO_LEN;
                        callback_infos[start..start + CALLBACK_INFO_LEN].copy_from_slice(&info);
                    }
                    Node::Free(free) => {
                        out.extend_from_slice(&(NodeTag::FreeNode as u64).to_le_bytes());
                        out.extend_from_slice(&free.next.to_le_bytes());
                    }
                    Node::LastFree => {
                        out.extend_from_slice(&(NodeTag::LastFreeNode as u64).to_le_bytes())
                    }
                }
                out.resize(slot_start + SLOT_SIZE, 0);
            }
            out.extend_from_slice(&callback_infos);
            out
        }
    }

    /// Builds an event queue account with a ring of `capacity` slots.
    ///
    /// `head` is a byte offset into the ring, as stored by the program.
    pub struct EventQueueBuilder {
        capacity: usize,
        head: u64,
        seq_num: u64,
        event_size: u64,
        events: Vec<Event>,
    }

    impl EventQueueBuilder {
        pub fn new(capacity: usize, head: u64) -> Self {
            Self {
                capacity,
                head,
                seq_num: 0,
                event_size: EVENT_SLOT_SIZE as u64,
                events: vec![],
            }
        }

        pub fn with_seq_num(mut self, seq_num: u64) -> Self {
            self.seq_num = seq_num;
            self
        }

        pub fn push(&mut self, event: Event) -> &mut Self {
            assert!(self.events.len() < self.capacity, "queue is full");
            self.events.push(event);
            self
        }

        pub fn encode_event(event: &Event) -> Vec<u8> {
            let mut out = Vec::with_capacity(EVENT_SLOT_SIZE);
            match event {
                Event::Fill(fill) => {
                    out.push(EventTag::Fill as u8);
                    out.push(fill.taker_side as u8);
                    out.extend_from_slice(&fill.maker_order_id.to_le_bytes());
                    out.extend_from_slice(&fill.quote_size.to_le_bytes());
                    out.extend_from_slice(&fill.base_size.to_le_bytes());
                    write_callback_info(&mut out, &fill.maker_callback_info);
                    write_callback_info(&mut out, &fill.taker_callback_info);
                }
                Event::Out(o) => {
                    out.push(EventTag::Out as u8);
                    out.push(o.side as u8);
                    out.extend_from_slice(&o.order_id.to_le_bytes());
                    out.extend_from_slice(&o.base_size.to_le_bytes());
                    out.push(o.delete as u8);
                    write_callback_info(&mut out, &o.callback_info);
                }
            }
            out.resize(EVENT_SLOT_SIZE, 0);
            out
        }

        /// Event `i` is written at ring byte `(head + i * event_size) % ring_len`.
        pub fn to_bytes(&self) -> Vec<u8> {
            let base = EVENT_QUEUE_HEADER_LEN + REGISTER_SIZE;
            let mut out = Vec::with_capacity(base + self.capacity * EVENT_SLOT_SIZE);
            out.push(AccountTag::EventQueue as u8);
            out.extend_from_slice(&self.head.to_le_bytes());
            out.extend_from_slice(&(self.events.len() as u64).to_le_bytes());
            out.extend_from_slice(&self.event_size.to_le_bytes());
            out.extend_from_slice(&self.seq_num.to_le_bytes());
            let ring_len = self.capacity * EVENT_SLOT_SIZE;
            out.resize(base + ring_len, 0);
            for (i, event) in self.events.iter().enumerate() {
                let start = base + (self.head as usize + i * EVENT_SLOT_SIZE) % ring_len;
                assert!(start + EVENT_SLOT_SIZE <= out.len(), "event {} overruns the ring", i);
                out[start..start + EVENT_SLOT_SIZE].copy_from_slice(&Self::encode_event(event));
            }
            out
        }
    }
}
