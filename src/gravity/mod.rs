pub mod barnes_hut;
pub mod moments;

pub use barnes_hut::{BarnesHut, BruteForceGravity};
pub use moments::MultipoleMoments;
