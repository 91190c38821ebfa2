//! 上传媒体的内存存储。

pub mod store;

pub use store::{MediaMetadata, MediaStats, MediaStore, StoredMedia};
