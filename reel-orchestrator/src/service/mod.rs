//! Service layer
//!
//! Business logic over the repositories. Services never touch sqlx
//! directly; everything goes through the repository traits so tests can
//! run them against in-memory storage.

pub mod media;

pub use media::MediaService;
