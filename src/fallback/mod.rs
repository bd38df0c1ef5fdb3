//! # Fallback Resolution Chain
//!
//! Used when the primary source returns nothing or only a generic
//! placeholder for a token. Resolvers run in fixed order: local cache,
//! secondary API direct lookup, then derived lookup through the creation
//! event. The first usable answer wins and is tagged with the resolver that
//! produced it; if none answers the chain says so explicitly.

pub mod chain;
pub mod placeholder;
pub mod resolvers;

pub use chain::{AttemptResult, ChainOutcome, FallbackChain, ResolverAttempt};
pub use placeholder::PlaceholderDetector;
pub use resolvers::{
    CacheResolver, DerivedLookupResolver, DirectLookupResolver, Resolver, ResolverResult,
};
