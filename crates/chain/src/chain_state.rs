//! Local view of the chain: every block this node sealed or accepted.
//!
//! Headers are kept for the whole chain so repeats are recognised and the
//! head can always be linked to. Full bodies are kept only for the most
//! recent blocks.

use std::collections::{HashMap, VecDeque};
use tpschain_core::{Block, BlockHeader, Hash};

/// Bodies kept by [`ChainState::new`].
pub const DEFAULT_RETAINED_BLOCKS: usize = 64;

/// Header index of known blocks, a window of recent bodies and the head.
#[derive(Debug)]
pub struct ChainState {
    headers: HashMap<Hash, BlockHeader>,
    recent: VecDeque<(Hash, Block)>,
    retained: usize,
    head: Option<Hash>,
}

impl Default for ChainState {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainState {
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETAINED_BLOCKS)
    }

    /// Keep at most `retained` full blocks; older ones keep only their header.
    pub fn with_retention(retained: usize) -> Self {
        Self {
            headers: HashMap::new(),
            recent: VecDeque::with_capacity(retained),
            retained,
            head: None,
        }
    }

    /// Number of known blocks.
    pub fn height(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Hash of the head, or the zero hash before the first block.
    pub fn head_hash(&self) -> Hash {
        self.head.unwrap_or(Hash::ZERO)
    }

    pub fn head_header(&self) -> Option<&BlockHeader> {
        self.head.as_ref().and_then(|hash| self.headers.get(hash))
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.headers.contains_key(hash)
    }

    pub fn get_header(&self, hash: &Hash) -> Option<&BlockHeader> {
        self.headers.get(hash)
    }

    /// The full block, if it is still inside the retention window.
    pub fn get_block(&self, hash: &Hash) -> Option<&Block> {
        self.recent
            .iter()
            .find(|(known, _)| known == hash)
            .map(|(_, block)| block)
    }

    /// Number of full blocks currently held.
    pub fn retained_blocks(&self) -> usize {
        self.recent.len()
    }

    /// Store `block` and make it the head. Returns its hash.
    ///
    /// A block that is already known only moves the head.
    pub fn push_head(&mut self, block: Block) -> Hash {
        let hash = block.hash();
        if !self.headers.contains_key(&hash) {
            self.headers.insert(hash, block.header.clone());
            if self.retained > 0 {
                if self.recent.len() == self.retained {
                    self.recent.pop_front();
                }
                self.recent.push_back((hash, block));
            }
        }
        self.head = Some(hash);
        hash
    }
}
