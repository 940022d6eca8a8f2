//! The tag registry.
//!
//! The completion queue only carries opaque `u64` tokens. `Tagger` mints a
//! fresh token for every operation handed to the runtime and redeems it
//! exactly once when the queue returns it, reconstructing which handle and
//! which operation phase the event belongs to. Tokens are monotone and never
//! reused within an engine lifetime, so a stale token can never alias a live
//! operation.

use crate::util::AtomicData;
use std::collections::HashMap;

/// Opaque value handed to the runtime alongside each asynchronous operation.
pub type Token = u64;

/// Identifies the RPC handle that owns a tag.
pub type HandleId = u64;

/// Owner id used by tags that belong to the engine itself rather than to an
/// RPC handle (connection-change notifications).
pub const NO_OWNER: HandleId = 0;

/// Which operation phase a completion event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagLabel {
    ClientConnectionChange,
    ClientFinished,
    ServerNewRpc,
    ServerWriting,
    ServerDone,
}

/// The application-side meaning of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub owner: HandleId,
    pub label: TagLabel,
}

#[derive(Default)]
struct Registry {
    next_token: Token,
    tags: HashMap<Token, Tag>,
}

/// Mints and redeems tags. Shared between application threads (which mint
/// before starting runtime operations) and the worker thread (which redeems).
#[derive(Default)]
pub struct Tagger {
    registry: AtomicData<Registry>,
}

impl Tagger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new tag and return its token.
    pub fn mint(&self, owner: HandleId, label: TagLabel) -> Token {
        self.registry.use_safely(|r| {
            let token = r.next_token;
            r.next_token += 1;
            r.tags.insert(token, Tag { owner, label });
            token
        })
    }

    /// Remove and return the tag for `token`.
    ///
    /// # Panics
    ///
    /// Panics if the token was never minted or was already redeemed. A
    /// completion event for an unknown token means the engine's state is
    /// corrupt and continuing would risk dispatching into a freed handle.
    pub fn redeem(&self, token: Token) -> Tag {
        self.registry.use_safely(|r| match r.tags.remove(&token) {
            Some(tag) => tag,
            None => panic!("completion token {token} was never minted or was already redeemed"),
        })
    }

    /// Number of minted, not-yet-redeemed tags.
    pub fn len(&self) -> usize {
        self.registry.use_safely(|r| r.tags.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_monotone_and_unique() {
        let tagger = Tagger::new();
        let a = tagger.mint(1, TagLabel::ClientFinished);
        let b = tagger.mint(2, TagLabel::ServerNewRpc);
        let c = tagger.mint(NO_OWNER, TagLabel::ClientConnectionChange);
        assert!(a < b && b < c);
        assert_eq!(tagger.len(), 3);
    }

    #[test]
    fn redeem_returns_the_minted_tag() {
        let tagger = Tagger::new();
        let token = tagger.mint(7, TagLabel::ServerWriting);
        let tag = tagger.redeem(token);
        assert_eq!(tag.owner, 7);
        assert_eq!(tag.label, TagLabel::ServerWriting);
        assert!(tagger.is_empty());
    }

    #[test]
    #[should_panic(expected = "never minted")]
    fn redeeming_twice_is_fatal() {
        let tagger = Tagger::new();
        let token = tagger.mint(1, TagLabel::ServerDone);
        tagger.redeem(token);
        tagger.redeem(token);
    }

    #[test]
    fn tokens_are_not_reused_after_redemption() {
        let tagger = Tagger::new();
        let first = tagger.mint(1, TagLabel::ClientFinished);
        tagger.redeem(first);
        let second = tagger.mint(1, TagLabel::ClientFinished);
        assert_ne!(first, second);
    }
}
