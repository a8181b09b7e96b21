pub mod aabb;
pub mod interval;
pub mod tensors;

pub use aabb::Aabb;
pub use interval::Interval;
pub use tensors::{Sym3Tensor, SymTensor, TracelessTensor};
