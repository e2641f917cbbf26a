use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Surveys started today across every account on this profile.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct GlobalDailyCounter {
    pub date: Option<NaiveDate>,
    pub count: u64,
}

impl GlobalDailyCounter {
    /// Zeroes the counter when it was last stamped on another day.
    /// Returns true when a reset happened.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.date == Some(today) {
            return false;
        }

        self.date = Some(today);
        self.count = 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolls_over_on_new_day_only() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 15).unwrap();
        let yesterday = today.pred_opt().unwrap();
        let mut counter = GlobalDailyCounter {
            date: Some(yesterday),
            count: 42,
        };

        assert!(counter.roll_over(today));
        assert_eq!(counter.count, 0);
        assert_eq!(counter.date, Some(today));

        counter.count = 3;
        assert!(!counter.roll_over(today));
        assert_eq!(counter.count, 3);
    }
}
