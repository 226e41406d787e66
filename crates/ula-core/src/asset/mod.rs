//! Asset domain module.
//!
//! # Module Structure
//!
//! - `model`: Asset and AssetList value types
//! - `source`: Manifest source trait (remote asset lists)
//! - `cache`: Local asset book-keeping trait
//! - `resolver`: Download requirement resolution (`AssetResolver`)

mod cache;
mod model;
mod resolver;
mod source;

pub use cache::AssetCache;
pub use model::{
    ALL_ARCHITECTURES, Asset, AssetList, AssetOrigin, ROOTFS_ARCHIVE, SUPPORT_ASSET_TYPE,
};
pub use resolver::{AssetResolver, ResolverError};
pub use source::{ManifestError, ManifestSource};
