pub mod binary;
pub mod text;

pub use binary::{BinaryInput, BinaryOutput};
pub use text::TextOutput;
