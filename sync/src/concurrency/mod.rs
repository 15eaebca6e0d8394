//! Bounded fan-out for parallel chunk delivery.

mod pool;

pub use pool::SenderPool;
