use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const DEFAULT_PERFORMANCE: u32 = 65;
pub const DEFAULT_ELIGIBILITY: u32 = 40;
pub const DEFAULT_DAILY_LIMIT: u64 = 250;
pub const MAX_SCORE: u32 = 100;

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Profile {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub payout_method: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct UserSettings {
    pub notifications: bool,
    pub email_updates: bool,
    pub dark_mode: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            notifications: true,
            email_updates: false,
            dark_mode: false,
        }
    }
}

/// Per-user counters. Every field defaults so records written by older
/// versions still load.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct Stats {
    #[serde(deserialize_with = "lenient_u64")]
    pub earnings: u64,
    #[serde(deserialize_with = "lenient_u32")]
    pub performance: u32,
    #[serde(deserialize_with = "lenient_u32")]
    pub eligibility: u32,
    #[serde(deserialize_with = "lenient_u64")]
    pub surveys_completed: u64,
    #[serde(deserialize_with = "lenient_u32")]
    pub daily_count: u32,
    #[serde(deserialize_with = "lenient_u64")]
    pub daily_earnings: u64,
    #[serde(deserialize_with = "lenient_date")]
    pub last_activity_date: Option<NaiveDate>,
    #[serde(deserialize_with = "lenient_u64")]
    pub daily_limit: u64,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            earnings: 0,
            performance: DEFAULT_PERFORMANCE,
            eligibility: DEFAULT_ELIGIBILITY,
            surveys_completed: 0,
            daily_count: 0,
            daily_earnings: 0,
            last_activity_date: None,
            daily_limit: DEFAULT_DAILY_LIMIT,
        }
    }
}

impl Stats {
    /// Zeroes the daily counters when the last activity happened on another
    /// day. The daily earnings cap survives the reset.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.last_activity_date == Some(today) {
            return false;
        }

        self.daily_count = 0;
        self.daily_earnings = 0;
        self.last_activity_date = Some(today);
        true
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct EarningsHistoryEntry {
    #[serde(deserialize_with = "lenient_i64")]
    pub id: i64,
    pub date: String,
    #[serde(deserialize_with = "lenient_u64")]
    pub amount: u64,
    pub label: String,
}

/// Reads a number written as an integer, a float or a numeric string.
/// Floats are rounded; anything else reads as `None`.
fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite()).map(f64::round)
}

fn lenient_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number(&value).map_or(0, |n| n.max(0.0) as u64))
}

fn lenient_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number(&value).map_or(0, |n| n.clamp(0.0, u32::MAX as f64) as u32))
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    Ok(number(&value).map_or(0, |n| n as i64))
}

/// Accepts `2026-10-14`, RFC 3339 timestamps and the `Wed Oct 14 2026` form
/// older clients stored. Anything unparseable reads as no activity.
fn lenient_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDate>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let Some(raw) = value.as_str().map(str::trim) else {
        return Ok(None);
    };

    let parsed = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(raw, "%a %b %d %Y").ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.date_naive()));
    Ok(parsed)
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserRecord {
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    /// Plaintext secret left behind by older records. Dropped on the first
    /// successful login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub payment_code: Option<String>,
    pub profile: Profile,
    pub stats: Stats,
    pub history: Vec<EarningsHistoryEntry>,
    pub settings: UserSettings,
    pub referred_by: Option<String>,
}

impl UserRecord {
    pub fn matches(&self, username: &str) -> bool {
        self.username.eq_ignore_ascii_case(username)
    }

    /// Prepends a history entry. Ids are creation timestamps in milliseconds,
    /// bumped so they stay unique within the list.
    pub fn push_history(&mut self, now_millis: i64, date: String, amount: u64, label: String) {
        let id = match self.history.first() {
            Some(latest) if latest.id >= now_millis => latest.id + 1,
            _ => now_millis,
        };

        self.history.insert(
            0,
            EarningsHistoryEntry {
                id,
                date,
                amount,
                label,
            },
        );
    }

    /// Copy safe to hand out over the API.
    pub fn public(&self) -> PublicUser {
        PublicUser {
            username: self.username.clone(),
            payment_code: self.payment_code.clone(),
            profile: self.profile.clone(),
            stats: self.stats.clone(),
            settings: self.settings.clone(),
            referred_by: self.referred_by.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub username: String,
    pub payment_code: Option<String>,
    pub profile: Profile,
    pub stats: Stats,
    pub settings: UserSettings,
    pub referred_by: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub payment_code: Option<String>,
    #[serde(default)]
    pub profile: Option<Profile>,
}

/// Shallow merge patch: every present field replaces the stored one.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserPatch {
    pub payment_code: Option<String>,
    pub profile: Option<Profile>,
    pub settings: Option<UserSettings>,
    #[serde(skip)]
    pub stats: Option<Stats>,
    #[serde(skip)]
    pub history: Option<Vec<EarningsHistoryEntry>>,
}

impl UserPatch {
    pub fn is_empty(&self) -> bool {
        self.payment_code.is_none()
            && self.profile.is_none()
            && self.settings.is_none()
            && self.stats.is_none()
            && self.history.is_none()
    }

    pub fn apply(self, user: &mut UserRecord) {
        if let Some(payment_code) = self.payment_code {
            user.payment_code = Some(payment_code);
        }
        if let Some(profile) = self.profile {
            user.profile = profile;
        }
        if let Some(settings) = self.settings {
            user.settings = settings;
        }
        if let Some(stats) = self.stats {
            user.stats = stats;
        }
        if let Some(history) = self.history {
            user.history = history;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_record_fills_defaults() {
        let raw = r#"{"username":"alice","password":"hunter22","stats":{"earnings":120}}"#;
        let user: UserRecord = serde_json::from_str(raw).unwrap();

        assert_eq!(user.password.as_deref(), Some("hunter22"));
        assert!(user.password_hash.is_none());
        assert_eq!(user.stats.earnings, 120);
        assert_eq!(user.stats.performance, DEFAULT_PERFORMANCE);
        assert_eq!(user.stats.daily_limit, DEFAULT_DAILY_LIMIT);
        assert!(user.history.is_empty());
        assert!(user.settings.notifications);
    }

    #[test]
    fn loose_numbers_and_dates_are_coerced() {
        let raw = r#"{
            "username": "alice",
            "stats": {
                "earnings": 12.5,
                "performance": "70",
                "dailyCount": null,
                "dailyEarnings": -3,
                "lastActivityDate": "Wed Oct 14 2026"
            },
            "history": [{"id": 1.0, "date": "2026-10-14", "amount": "40", "label": "Survey"}]
        }"#;
        let user: UserRecord = serde_json::from_str(raw).unwrap();

        assert_eq!(user.stats.earnings, 13);
        assert_eq!(user.stats.performance, 70);
        assert_eq!(user.stats.daily_count, 0);
        assert_eq!(user.stats.daily_earnings, 0);
        assert_eq!(user.stats.daily_limit, DEFAULT_DAILY_LIMIT);
        assert_eq!(
            user.stats.last_activity_date,
            NaiveDate::from_ymd_opt(2026, 10, 14)
        );
        assert_eq!(user.history[0].amount, 40);
        assert_eq!(user.history[0].id, 1);
    }

    #[test]
    fn unreadable_activity_date_means_no_activity() {
        let raw = r#"{"username": "bob", "stats": {"lastActivityDate": "sometime"}}"#;
        let user: UserRecord = serde_json::from_str(raw).unwrap();
        assert!(user.stats.last_activity_date.is_none());

        let raw = r#"{"username": "bob", "stats": {"lastActivityDate": "2026-10-14T21:30:00+00:00"}}"#;
        let user: UserRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(user.stats.last_activity_date, NaiveDate::from_ymd_opt(2026, 10, 14));
    }

    #[test]
    fn roll_over_resets_daily_counters_but_keeps_cap() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let mut stats = Stats {
            daily_count: 5,
            daily_earnings: 180,
            daily_limit: 1000,
            earnings: 900,
            last_activity_date: today.pred_opt(),
            ..Default::default()
        };

        assert!(stats.roll_over(today));
        assert_eq!(stats.daily_count, 0);
        assert_eq!(stats.daily_earnings, 0);
        assert_eq!(stats.daily_limit, 1000);
        assert_eq!(stats.earnings, 900);
        assert_eq!(stats.last_activity_date, Some(today));

        stats.daily_count = 2;
        assert!(!stats.roll_over(today));
        assert_eq!(stats.daily_count, 2);
    }

    #[test]
    fn history_ids_stay_unique_and_newest_first() {
        let mut user = UserRecord::default();
        user.push_history(1000, "2026-10-15".into(), 10, "first".into());
        user.push_history(1000, "2026-10-15".into(), 20, "second".into());
        user.push_history(900, "2026-10-15".into(), 30, "third".into());

        let ids: Vec<i64> = user.history.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1002, 1001, 1000]);
        assert_eq!(user.history[0].label, "third");
    }

    #[test]
    fn patch_replaces_only_present_fields() {
        let mut user = UserRecord {
            username: "alice".into(),
            ..Default::default()
        };
        user.profile.full_name = Some("Alice".into());

        UserPatch {
            settings: Some(UserSettings {
                dark_mode: true,
                ..Default::default()
            }),
            ..Default::default()
        }
        .apply(&mut user);

        assert_eq!(user.profile.full_name.as_deref(), Some("Alice"));
        assert!(user.settings.dark_mode);
    }

    #[test]
    fn matching_ignores_case() {
        let user = UserRecord {
            username: "Alice".into(),
            ..Default::default()
        };
        assert!(user.matches("alice"));
        assert!(user.matches("ALICE"));
        assert!(!user.matches("alicia"));
    }
}
