pub mod collisions;
pub mod solver;

pub use collisions::{
    merge_bodies, BodyState, CollisionHandler, CollisionHandlerKind, CollisionOutcome,
    ElasticBounceHandler, MergeOrBounceHandler, Merged, OverlapPolicy, PerfectMergingHandler,
};
pub use solver::HardSphereSolver;
