pub mod fits;

pub use fits::{FitsHeader, FitsImage, HeaderValue};
