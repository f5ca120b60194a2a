//! Job queues: a buffer and an active queue per lane.

mod lane;

pub use lane::Lane;
pub(crate) use lane::Lanes;
