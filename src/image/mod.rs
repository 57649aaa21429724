//! Image module: lightweight owned buffers, read-only views, and utilities.
//!
//! Components
//! - `u8`: read-only `ImageU8<'a>` view over 8-bit grayscale buffers and
//!   `RgbU8<'a>` over interleaved 8-bit color buffers.
//! - `f32`: owned `ImageF32` buffer for numeric processing (row-major, stride==w).
//! - `planar`: owned `PlanarImage<T>` holding a stack of identically shaped
//!   planes in one contiguous backing buffer with a constant plane stride.
//! - `traits`: `ImageView`/`ImageViewMut` abstractions with row iterators.
//! - `io`: helpers for loading color images and writing grayscale/JSON output.
//!
//! Design goals
//! - Keep hot loops simple and cache-friendly via row access.
//! - Expose a fast contiguous path (`as_slice`) when `stride == width`.
//! - Make ownership explicit: views borrow external data; owned buffers mutate.
pub mod f32;
pub mod io;
pub mod planar;
pub mod traits;
pub mod u8;

pub use self::f32::ImageF32;
pub use self::planar::PlanarImage;
pub use self::traits::{ImageView, ImageViewMut, Rows, RowsMut};
pub use self::u8::{ImageU8, RgbU8};
