pub mod filter;
pub mod model;
pub mod parser;
pub mod rewrite;

pub use filter::{AdFilter, FilterRule};
pub use model::{Manifest, ManifestEntry, Tag, TagKind};
pub use parser::{parse, serialize};
pub use rewrite::{RewritePolicy, rewrite};
