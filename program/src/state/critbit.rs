use borsh::BorshDeserialize;
use log::{debug, warn};
use num_derive::{FromPrimitive, ToPrimitive};
use solana_program::pubkey::Pubkey;
// A Slab contains the data for a slab header and an array of nodes of a critbit tree
// whose leafs contain the data referencing an order of the orderbook.

use crate::error::{AoError, AoResult};
use crate::layout::{Fixed, Reader};
use crate::state::{AccountTag, CallbackInfo, Side};

/// Serialized length of the [`SlabHeader`].
pub const SLAB_HEADER_LEN: usize = 97;
/// Offset of the first node slot. The header is padded to an 8 byte boundary.
pub const SLAB_PADDED_HEADER_LEN: usize = SLAB_HEADER_LEN + 7;
/// A node slot is an 8 byte tag followed by a 32 byte payload.
pub const SLOT_SIZE: usize = 40;

pub type NodeHandle = u32;

#[derive(BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabHeader {
    pub account_tag: u8,
    pub bump_index: u64,
    pub free_list_len: u64,
    pub free_list_head: u32,

    pub callback_memory_offset: u64,
    pub callback_free_list_len: u64,
    pub callback_free_list_head: u64,
    pub callback_bump_index: u64,

    pub root_node: u32,
    pub leaf_count: u64,
    pub market_address: Pubkey,
}

impl Fixed for SlabHeader {
    const LEN: usize = SLAB_HEADER_LEN;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u64)]
pub enum NodeTag {
    Uninitialized,
    InnerNode,
    LeafNode,
    FreeNode,
    LastFreeNode,
}

#[derive(BorshDeserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerNode {
    pub prefix_len: u64,
    pub key: u128,
    pub children: [NodeHandle; 2],
}

impl InnerNode {
    pub(crate) fn walk_down(&self, search_key: u128) -> (NodeHandle, bool) {
        let crit_bit_mask = u32::try_from(self.prefix_len)
            .ok()
            .and_then(|shift| (1u128 << 127).checked_shr(shift))
            .unwrap_or(0);
        let crit_bit = (search_key & crit_bit_mask) != 0;
        (self.children[crit_bit as usize], crit_bit)
    }
}

impl Fixed for InnerNode {
    const LEN: usize = SLOT_SIZE - 8;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeafNode {
    /// The key is the associated order id
    pub key: u128,
    /// Absolute offset of the callback info inside the slab account
    pub callback_info_pt: u64,
    /// The quantity of base asset associated with the underlying order
    pub base_quantity: u64,
    pub callback_info: CallbackInfo,
}

impl LeafNode {
    /// FP32 limit price of the order
    pub fn price(&self) -> u64 {
        (self.key >> 64) as u64
    }

    /// Get the associated order id
    pub fn order_id(&self) -> u128 {
        self.key
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeNode {
    pub next: NodeHandle,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Node {
    Uninitialized,
    Inner(InnerNode),
    Leaf(LeafNode),
    Free(FreeNode),
    LastFree,
}

impl Node {
    /// Decodes the slot starting at `offset`. Leaf callback infos are resolved against `buf`.
    fn deserialize(buf: &[u8], offset: usize) -> AoResult<Self> {
        let mut reader = Reader::at(buf, offset);
        let tag = reader.read_tag::<u64, NodeTag>("node")?;
        let node = match tag {
            NodeTag::Uninitialized => Node::Uninitialized,
            NodeTag::InnerNode => Node::Inner(reader.read()?),
            NodeTag::LeafNode => {
                let key = reader.read()?;
                let callback_info_pt: u64 = reader.read()?;
                let base_quantity = reader.read()?;
                let callback_offset =
                    usize::try_from(callback_info_pt).map_err(|_| AoError::TruncatedBuffer {
                        offset: usize::MAX,
                        needed: crate::state::CALLBACK_INFO_LEN,
                        len: buf.len(),
                    })?;
                let callback_info = Reader::at(buf, callback_offset).read()?;
                Node::Leaf(LeafNode {
                    key,
                    callback_info_pt,
                    base_quantity,
                    callback_info,
                })
            }
            NodeTag::FreeNode => Node::Free(FreeNode {
                next: reader.read()?,
            }),
            NodeTag::LastFreeNode => Node::LastFree,
        };
        Ok(node)
    }

    pub fn key(&self) -> Option<u128> {
        match &self {
            Node::Inner(inner) => Some(inner.key),
            Node::Leaf(leaf) => Some(leaf.key),
            _ => None,
        }
    }

    pub fn children(&self) -> Option<&[NodeHandle; 2]> {
        match &self {
            Node::Inner(InnerNode { children, .. }) => Some(children),
            _ => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match &self {
            Node::Leaf(leaf_ref) => Some(leaf_ref),
            _ => None,
        }
    }

    fn is_tree_node(&self) -> bool {
        matches!(self, Node::Inner(_) | Node::Leaf(_))
    }
}

/// One side of an orderbook, decoded from its account data.
///
/// The node array is owned and read-only; handles are indices into it.
#[derive(Debug, Clone, PartialEq)]
pub struct Slab {
    header: SlabHeader,
    nodes: Vec<Node>,
}

impl Slab {
    /// Decodes the header and the `bump_index` node slots which follow it.
    ///
    /// The tree reachable from the root is checked before returning: every child handle
    /// must reference an inner or leaf slot, no slot may be reached twice, and the number
    /// of reachable leaves must equal the header's leaf count.
    pub fn from_bytes(buf: &[u8]) -> AoResult<Self> {
        Self::parse(buf).map_err(|e| {
            warn!("Rejected slab buffer of {} bytes: {}", buf.len(), e);
            e
        })
    }

    fn parse(buf: &[u8]) -> AoResult<Self> {
        let header: SlabHeader = Reader::new(buf).read()?;
        let slot_count =
            usize::try_from(header.bump_index).map_err(|_| AoError::TruncatedBuffer {
                offset: SLAB_PADDED_HEADER_LEN,
                needed: usize::MAX,
                len: buf.len(),
            })?;
        if slot_count > 0 {
            let needed = slot_count
                .checked_mul(SLOT_SIZE)
                .ok_or(AoError::TruncatedBuffer {
                    offset: SLAB_PADDED_HEADER_LEN,
                    needed: usize::MAX,
                    len: buf.len(),
                })?;
            Reader::at(buf, SLAB_PADDED_HEADER_LEN).skip(needed)?;
        }
        let nodes = (0..slot_count)
            .map(|i| Node::deserialize(buf, SLAB_PADDED_HEADER_LEN + i * SLOT_SIZE))
            .collect::<AoResult<Vec<_>>>()?;

        let slab = Self { header, nodes };
        slab.check_references()?;
        slab.check_reachable_leaves()?;
        debug!(
            "Decoded slab for market {} with {} leaves in {} slots",
            slab.header.market_address, slab.header.leaf_count, slot_count
        );
        Ok(slab)
    }

    fn invalid_reference(&self, handle: NodeHandle) -> AoError {
        AoError::InvalidNodeReference {
            handle,
            bump_index: self.header.bump_index,
        }
    }

    fn tree_node(&self, handle: NodeHandle) -> AoResult<&Node> {
        self.nodes
            .get(handle as usize)
            .filter(|n| n.is_tree_node())
            .ok_or_else(|| self.invalid_reference(handle))
    }

    fn check_references(&self) -> AoResult {
        if self.header.leaf_count > 0 {
            self.tree_node(self.header.root_node)?;
        }
        for node in &self.nodes {
            if let Node::Inner(inner) = node {
                for &child in &inner.children {
                    self.tree_node(child)?;
                }
            }
        }
        Ok(())
    }

    fn check_reachable_leaves(&self) -> AoResult {
        let mut found = 0u64;
        if let Some(root) = self.root() {
            let mut visited = vec![false; self.nodes.len()];
            let mut search_stack = vec![root];
            while let Some(current) = search_stack.pop() {
                // References were checked, so `current` is in bounds
                if std::mem::replace(&mut visited[current as usize], true) {
                    return Err(self.invalid_reference(current));
                }
                match &self.nodes[current as usize] {
                    Node::Inner(inner) => search_stack.extend_from_slice(&inner.children),
                    _ => found += 1,
                }
            }
        }
        if found != self.header.leaf_count {
            return Err(AoError::InvalidLeafCount {
                expected: self.header.leaf_count,
                found,
            });
        }
        Ok(())
    }
}

// Data access methods
impl Slab {
    pub fn header(&self) -> &SlabHeader {
        &self.header
    }

    pub fn leaf_count(&self) -> u64 {
        self.header.leaf_count
    }

    pub fn market_address(&self) -> Pubkey {
        self.header.market_address
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn get_node(&self, handle: NodeHandle) -> Option<&Node> {
        self.nodes.get(handle as usize)
    }

    /// Whether the account tag matches the slab of the given side.
    pub fn check(&self, side: Side) -> bool {
        let expected = match side {
            Side::Bid => AccountTag::Bids,
            Side::Ask => AccountTag::Asks,
        };
        self.header.account_tag == expected as u8
    }

    /// Handles of the recycled slots, in free list order.
    pub fn free_list(&self) -> AoResult<Vec<NodeHandle>> {
        let mut handles = Vec::new();
        let mut next = self.header.free_list_head;
        for remaining in (0..self.header.free_list_len).rev() {
            handles.push(next);
            match self.get_node(next) {
                Some(Node::Free(f)) if remaining > 0 => next = f.next,
                Some(Node::LastFree) if remaining == 0 => break,
                _ => return Err(self.invalid_reference(next)),
            }
        }
        Ok(handles)
    }
}

// Critbit tree walks
impl Slab {
    pub fn root(&self) -> Option<NodeHandle> {
        if self.header.leaf_count == 0 {
            return None;
        }

        Some(self.header.root_node)
    }

    fn find_min_max(&self, find_max: bool) -> Option<NodeHandle> {
        let mut root: NodeHandle = self.root()?;
        loop {
            match self.get_node(root)? {
                Node::Inner(InnerNode { children, .. }) => {
                    root = children[if find_max { 1 } else { 0 }];
                }
                _ => return Some(root),
            }
        }
    }

    pub fn find_min(&self) -> Option<NodeHandle> {
        self.find_min_max(false)
    }

    pub fn find_max(&self) -> Option<NodeHandle> {
        self.find_min_max(true)
    }

    /// In-order walk over the slab's leaves, by increasing key unless `descending`.
    pub fn items(&self, descending: bool) -> SlabIterator<'_> {
        SlabIterator {
            search_stack: self.root().into_iter().collect(),
            slab: self,
            ascending: !descending,
        }
    }

    pub fn get(&self, search_key: u128) -> Option<&LeafNode> {
        let handle = self.find_handle(search_key)?;
        self.get_node(handle)?.as_leaf()
    }

    fn find_handle(&self, search_key: u128) -> Option<NodeHandle> {
        let mut node_handle: NodeHandle = self.root()?;
        loop {
            match self.get_node(node_handle)? {
                Node::Leaf(leaf) => {
                    return if leaf.key == search_key {
                        Some(node_handle)
                    } else {
                        None
                    };
                }
                Node::Inner(inner) => {
                    let common_prefix_len = (search_key ^ inner.key).leading_zeros();
                    if (common_prefix_len as u64) < inner.prefix_len {
                        return None;
                    }
                    node_handle = inner.walk_down(search_key).0;
                }
                _ => return None,
            }
        }
    }

    #[cfg(any(test, feature = "utils"))]
    pub fn find_by_key(&self, search_key: u128) -> Option<NodeHandle> {
        self.find_handle(search_key)
    }
}

#[derive(Debug, Clone)]
pub struct SlabIterator<'a> {
    slab: &'a Slab,
    search_stack: Vec<NodeHandle>,
    ascending: bool,
}

impl<'a> Iterator for SlabIterator<'a> {
    type Item = &'a LeafNode;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(current) = self.search_stack.pop() {
            match self.slab.get_node(current) {
                Some(Node::Inner(n)) => {
                    self.search_stack.push(n.children[self.ascending as usize]);
                    self.search_stack.push(n.children[!self.ascending as usize]);
                }
                Some(Node::Leaf(leaf)) => return Some(leaf),
                // Unreachable for a slab built by `from_bytes`
                _ => return None,
            }
        }
        None
    }
}

/////////////////////////////////////
// Tests
