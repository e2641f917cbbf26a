use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeTier {
    pub daily_limit: u64,
    pub price: u64,
}

pub const UPGRADE_TIERS: [UpgradeTier; 4] = [
    UpgradeTier {
        daily_limit: 500,
        price: 25,
    },
    UpgradeTier {
        daily_limit: 1000,
        price: 45,
    },
    UpgradeTier {
        daily_limit: 2500,
        price: 100,
    },
    UpgradeTier {
        daily_limit: 5000,
        price: 180,
    },
];

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeRequest {
    pub daily_limit: u64,
    pub transaction_code: String,
}
