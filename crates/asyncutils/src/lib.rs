//! Future combinators shared by the stowaway crates.
//!
//! Nothing in here knows about caches or HTTP. There are exactly two problems
//! solved in this crate:
//! - racing a future against a timer without losing the future (see
//!   [`deadline`]), and
//! - letting concurrent callers share one pending operation instead of each
//!   starting their own (see [`Coalescer`]).

mod coalesce;
mod deadline;

pub use crate::coalesce::{Coalescer, Pending};
pub use crate::deadline::{Deadline, Raced, deadline};
