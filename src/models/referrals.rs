use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub referral_code: String,
    pub referral_url: String,
    pub message: String,
    pub whatsapp_url: String,
    pub sms_url: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralCapture {
    pub referral_code: String,
}
