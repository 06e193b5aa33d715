//! Raster operations for the Inventory Lens engine.
//!
//! Frames arrive in buffer orientation with rotation metadata while all
//! detection geometry lives in upright display space. This crate owns
//! the mapping between the two, plus JPEG encoding, crop extraction,
//! and annotated thumbnail rendering.

pub mod annotate;
pub mod crop;
pub mod encode;
pub mod error;
pub mod thumbnail;

pub use crop::{crop_region, crop_to_jpeg, map_display_rect_to_raw, PixelRect};
pub use encode::{decode_image_to_frame, frame_to_jpeg};
pub use error::{MediaError, MediaResult};
pub use thumbnail::{ThumbnailConfig, ThumbnailRenderer, THUMBNAIL_MAX_WIDTH};
