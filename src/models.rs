pub mod counters;
pub mod referrals;
pub mod surveys;
pub mod upgrades;
pub mod users;
