//! Storage formats and the fiber-tree codec.
//!
//! - [`format`]: format tags, encoding rules, the [`StorageFormat`] capability surface
//! - [`coord_list`]: explicit coordinate-list storage
//! - [`uncompressed`]: implicit-position storage
//! - [`encoder`]: per-rank columnar encode/decode
//! - [`image`]: binary (optionally zstd-compressed) image of the codec output

pub mod coord_list;
pub mod encoder;
pub mod format;
pub mod image;
pub mod uncompressed;

pub use encoder::{Codec, CodecError, CodecImage, PayloadWord, RankImage};
pub use format::{FormatKind, Handle, StorageFormat};
