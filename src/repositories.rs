pub mod ai;
pub mod counters;
pub mod payments;
pub mod store;
pub mod users;
