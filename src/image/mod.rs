//! Image management module
//!
//! Makes sure the image a container is created from is present in the
//! runtime's local store before anything else happens.

pub mod fetcher;
pub mod reference;

pub use fetcher::ImageFetcher;
pub use reference::ImageReference;
