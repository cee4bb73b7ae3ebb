//! Schema resolution: registry client, compiled codecs, and the
//! fetch-coalescing cache.

mod cache;
mod codec;
mod registry;

pub use cache::SchemaCache;
pub use codec::Codec;
