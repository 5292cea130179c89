pub mod errors;

pub use errors::{BubbleError, BubbleErrorCategory, ComputeResult};
