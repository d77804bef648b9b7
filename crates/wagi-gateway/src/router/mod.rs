//! Route lookup.

mod trie;

pub use trie::TrieRouter;
