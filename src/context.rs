use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use sqlx::PgPool;

use crate::collaborators::{BillingCollaborator, NotificationSender};
use crate::config::SweepPolicy;

/// key: engine-context -> shared handles for one deployment
#[derive(Clone)]
pub struct EngineContext {
    pub pool: PgPool,
    pub billing: Arc<dyn BillingCollaborator>,
    pub notifier: Arc<dyn NotificationSender>,
    pub policy: Arc<SweepPolicy>,
}

impl EngineContext {
    pub fn new(
        pool: PgPool,
        billing: Arc<dyn BillingCollaborator>,
        notifier: Arc<dyn NotificationSender>,
        policy: SweepPolicy,
    ) -> Self {
        Self {
            pool,
            billing,
            notifier,
            policy: Arc::new(policy),
        }
    }
}

/// The as-of date a pass evaluates against, plus the wall clock used for audit stamps.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunClock {
    pub as_of: NaiveDate,
    pub now: DateTime<Utc>,
}

impl RunClock {
    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            as_of: now.date_naive(),
            now,
        }
    }

    pub fn at(as_of: NaiveDate) -> Self {
        Self {
            as_of,
            now: Utc::now(),
        }
    }

    /// Timestamp on the as-of day carrying the current time of day, so backfilled
    /// passes stamp throttles against the day they evaluate.
    pub fn stamp(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.as_of.and_time(self.now.time()))
    }
}

#[cfg(test)]
mod tests {
    use super::RunClock;
    use chrono::{NaiveDate, TimeZone, Utc};

    #[test]
    fn stamp_lands_on_the_as_of_day() {
        let clock = RunClock {
            as_of: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap(),
            now: Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap(),
        };
        let stamp = clock.stamp();
        assert_eq!(stamp.date_naive(), clock.as_of);
        assert_eq!(stamp, Utc.with_ymd_and_hms(2024, 1, 10, 14, 30, 0).unwrap());
    }
}
