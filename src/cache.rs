// src/cache.rs - Staleness-aware memoization of the last result per source.
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Which expiry horizon a lookup is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleCheck {
    Ok,
    Failed,
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    ok_expiry: DateTime<Utc>,
    failed_expiry: DateTime<Utc>,
    payload: T,
}

/// Keeps the last payload per logical source name with two independent
/// expiry horizons. The `failed` horizon lets a source's last known value
/// outlive the `ok` window while the source keeps failing.
#[derive(Debug, Default)]
pub struct StalenessCache<T> {
    entries: HashMap<String, CacheEntry<T>>,
}

impl<T: Clone> StalenessCache<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn put(
        &mut self,
        name: &str,
        ok_expiry: DateTime<Utc>,
        failed_expiry: DateTime<Utc>,
        payload: T,
    ) {
        self.entries.insert(
            name.to_string(),
            CacheEntry {
                ok_expiry,
                failed_expiry,
                payload,
            },
        );
    }

    pub fn get(&self, name: &str, check: StaleCheck, now: DateTime<Utc>) -> Option<T> {
        let entry = self.entries.get(name)?;
        let expiry = match check {
            StaleCheck::Ok => entry.ok_expiry,
            StaleCheck::Failed => entry.failed_expiry,
        };
        if now <= expiry {
            Some(entry.payload.clone())
        } else {
            None
        }
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[test]
    fn test_ok_channel_expires_independently_of_failed_channel() {
        let mut cache = StalenessCache::new();
        cache.put("outside", at(60), at(120), 42u32);

        assert_eq!(cache.get("outside", StaleCheck::Ok, at(59)), Some(42));
        assert_eq!(cache.get("outside", StaleCheck::Ok, at(60)), Some(42));
        assert_eq!(cache.get("outside", StaleCheck::Ok, at(61)), None);

        assert_eq!(cache.get("outside", StaleCheck::Failed, at(61)), Some(42));
        assert_eq!(cache.get("outside", StaleCheck::Failed, at(120)), Some(42));
        assert_eq!(cache.get("outside", StaleCheck::Failed, at(121)), None);
    }

    #[test]
    fn test_put_overwrites_previous_entry() {
        let mut cache = StalenessCache::new();
        cache.put("inside", at(60), at(120), 1u32);
        cache.put("inside", at(90), at(150), 2u32);
        assert_eq!(cache.get("inside", StaleCheck::Ok, at(70)), Some(2));
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut cache = StalenessCache::new();
        cache.put("inside", at(60), at(120), 1u32);
        cache.reset();
        assert_eq!(cache.get("inside", StaleCheck::Ok, at(0)), None);
        assert_eq!(cache.get("inside", StaleCheck::Failed, at(0)), None);
    }

    #[test]
    fn test_unknown_name_is_a_miss() {
        let cache: StalenessCache<u32> = StalenessCache::new();
        assert_eq!(cache.get("nope", StaleCheck::Ok, at(0)), None);
    }
}
