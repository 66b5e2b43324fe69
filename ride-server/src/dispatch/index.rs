//! Driver Index - in-memory driver projection with write-through to `t_driver`
//!
//! The table is the system of record; the map is rebuilt from it by
//! [`DriverIndex::warmup`]. Mutations for one driver are serialized by a
//! keyed lock, persisted first, then published to the map.
//!
//! Never call a mutating method while holding a database transaction: the
//! write-through takes its own pooled connection.

use super::error::{DispatchError, DispatchResult};
use crate::db::repository::driver;
use crate::utils::KeyedLocks;
use parking_lot::RwLock;
use shared::geo::Coordinate;
use shared::models::{DriverProfile, DriverUpsert, DriverWorkStatus};
use shared::util::now_millis;
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;

/// Consecutive failures before the account is locked
pub const MAX_FAILED_LOGINS: u32 = 5;
/// 30 minutes
pub const LOGIN_LOCK_MS: i64 = 30 * 60 * 1000;

#[derive(Clone)]
pub struct DriverIndex {
    pool: SqlitePool,
    drivers: Arc<RwLock<HashMap<String, DriverProfile>>>,
    locks: KeyedLocks,
}

impl std::fmt::Debug for DriverIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverIndex")
            .field("drivers_count", &self.drivers.read().len())
            .finish()
    }
}

impl DriverIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            drivers: Arc::new(RwLock::new(HashMap::new())),
            locks: KeyedLocks::new(),
        }
    }

    /// Reload every profile from the database
    pub async fn warmup(&self) -> DispatchResult<usize> {
        let mut conn = self.pool.acquire().await?;
        let profiles = driver::find_all(&mut conn).await?;
        let count = profiles.len();
        {
            let mut cache = self.drivers.write();
            cache.clear();
            for p in profiles {
                cache.insert(p.driver_id.clone(), p);
            }
        }
        tracing::info!(count, "Driver index loaded");
        Ok(count)
    }

    pub fn get(&self, driver_id: &str) -> Option<DriverProfile> {
        self.drivers.read().get(driver_id).cloned()
    }

    /// Point-in-time copy for candidate selection
    pub fn snapshot(&self) -> Vec<DriverProfile> {
        self.drivers.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.drivers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.read().is_empty()
    }

    /// Lock, load the current profile, let `f` edit it, persist, publish
    async fn mutate<F>(&self, driver_id: &str, f: F) -> DispatchResult<DriverProfile>
    where
        F: FnOnce(&mut DriverProfile) -> DispatchResult<()>,
    {
        let _guard = self.locks.lock(driver_id).await;
        let mut profile = self
            .get(driver_id)
            .ok_or_else(|| DispatchError::DriverNotFound(driver_id.to_string()))?;
        f(&mut profile)?;
        profile.updated_at = now_millis();
        self.persist(profile).await
    }

    async fn persist(&self, profile: DriverProfile) -> DispatchResult<DriverProfile> {
        let mut conn = self.pool.acquire().await?;
        driver::save(&mut conn, &profile).await?;
        self.drivers
            .write()
            .insert(profile.driver_id.clone(), profile.clone());
        Ok(profile)
    }

    /// Register a driver or replace their static attributes.
    ///
    /// Work status, queue and cooldown survive a re-registration. New
    /// drivers start offline.
    pub async fn upsert(&self, data: DriverUpsert) -> DispatchResult<DriverProfile> {
        if data.driver_id.trim().is_empty() {
            return Err(DispatchError::InvalidInput {
                field: "driver_id",
                message: "must not be empty".into(),
            });
        }
        if !(0.0..=5.0).contains(&data.rating) {
            return Err(DispatchError::InvalidInput {
                field: "rating",
                message: format!("{} is outside 0-5", data.rating),
            });
        }
        if let Some(loc) = data.location
            && !loc.is_valid()
        {
            return Err(DispatchError::InvalidInput {
                field: "location",
                message: "coordinate out of range".into(),
            });
        }

        let _guard = self.locks.lock(&data.driver_id).await;
        let now = now_millis();
        let profile = match self.get(&data.driver_id) {
            Some(mut existing) => {
                existing.name = data.name;
                existing.vehicle_category = data.vehicle_category;
                existing.vehicle_level = data.vehicle_level;
                existing.account_status = data.account_status;
                existing.verified = data.verified;
                existing.rating = data.rating;
                existing.max_queue_capacity = data.max_queue_capacity;
                if data.location.is_some() {
                    existing.location = data.location;
                }
                existing.updated_at = now;
                existing
            }
            None => DriverProfile {
                driver_id: data.driver_id,
                name: data.name,
                vehicle_category: data.vehicle_category,
                vehicle_level: data.vehicle_level,
                account_status: data.account_status,
                verified: data.verified,
                work_status: DriverWorkStatus::Offline,
                location: data.location,
                rating: data.rating,
                queued_order_ids: Vec::new(),
                current_order_id: None,
                next_available_at: 0,
                max_queue_capacity: data.max_queue_capacity,
                failed_logins: 0,
                locked_until: 0,
                idle_since: now,
                updated_at: now,
            },
        };
        tracing::debug!(driver_id = %profile.driver_id, "Driver upserted");
        self.persist(profile).await
    }

    pub async fn update_location(&self, driver_id: &str, location: Coordinate) -> DispatchResult<DriverProfile> {
        if !location.is_valid() {
            return Err(DispatchError::InvalidInput {
                field: "location",
                message: "coordinate out of range".into(),
            });
        }
        self.mutate(driver_id, |p| {
            p.location = Some(location);
            Ok(())
        })
        .await
    }

    /// A driver with a ride in hand stays busy even when asking for online
    pub async fn set_work_status(&self, driver_id: &str, status: DriverWorkStatus) -> DispatchResult<DriverProfile> {
        let profile = self
            .mutate(driver_id, |p| {
                p.work_status = match status {
                    DriverWorkStatus::Online if p.current_order_id.is_some() => DriverWorkStatus::Busy,
                    other => other,
                };
                if p.work_status == DriverWorkStatus::Online && p.current_order_id.is_none() {
                    p.idle_since = now_millis();
                }
                Ok(())
            })
            .await?;
        tracing::info!(driver_id, status = ?profile.work_status, "Driver work status changed");
        Ok(profile)
    }

    /// Reject cooldown: no offers until `until`
    pub async fn apply_cooldown(&self, driver_id: &str, until: i64) -> DispatchResult<DriverProfile> {
        self.mutate(driver_id, |p| {
            p.next_available_at = p.next_available_at.max(until);
            Ok(())
        })
        .await
    }

    /// Count a failed login; the fifth in a row locks the account.
    ///
    /// Attempts during an active lock are refused without extending it.
    pub async fn record_login_failure(&self, driver_id: &str) -> DispatchResult<DriverProfile> {
        let now = now_millis();
        let profile = self
            .mutate(driver_id, |p| {
                if p.is_locked(now) {
                    return Err(DispatchError::DriverLocked {
                        driver_id: p.driver_id.clone(),
                        locked_until: p.locked_until,
                    });
                }
                p.failed_logins += 1;
                if p.failed_logins >= MAX_FAILED_LOGINS {
                    p.locked_until = now + LOGIN_LOCK_MS;
                    p.failed_logins = 0;
                }
                Ok(())
            })
            .await?;
        if profile.is_locked(now) {
            tracing::warn!(driver_id, locked_until = profile.locked_until, "Driver locked after failed logins");
        }
        Ok(profile)
    }

    /// Successful login clears the failure counter; refused while locked
    pub async fn record_login_success(&self, driver_id: &str) -> DispatchResult<DriverProfile> {
        let now = now_millis();
        self.mutate(driver_id, |p| {
            if p.is_locked(now) {
                return Err(DispatchError::DriverLocked {
                    driver_id: p.driver_id.clone(),
                    locked_until: p.locked_until,
                });
            }
            p.failed_logins = 0;
            p.locked_until = 0;
            Ok(())
        })
        .await
    }

    /// Take an accepted order: current ride when free, otherwise queued
    pub async fn assign(&self, driver_id: &str, order_id: &str) -> DispatchResult<DriverProfile> {
        self.mutate(driver_id, |p| {
            let already = p.current_order_id.as_deref() == Some(order_id)
                || p.queued_order_ids.iter().any(|id| id == order_id);
            if !already {
                if p.current_order_id.is_none() {
                    p.current_order_id = Some(order_id.to_string());
                } else {
                    p.queued_order_ids.push(order_id.to_string());
                }
            }
            p.work_status = DriverWorkStatus::Busy;
            Ok(())
        })
        .await
    }

    /// Drop an order (completed or cancelled); the next queued one becomes current
    pub async fn release(&self, driver_id: &str, order_id: &str) -> DispatchResult<DriverProfile> {
        self.mutate(driver_id, |p| {
            if p.current_order_id.as_deref() == Some(order_id) {
                p.current_order_id = if p.queued_order_ids.is_empty() {
                    None
                } else {
                    Some(p.queued_order_ids.remove(0))
                };
            } else {
                p.queued_order_ids.retain(|id| id != order_id);
            }
            if p.current_order_id.is_none() {
                if p.work_status == DriverWorkStatus::Busy {
                    p.work_status = DriverWorkStatus::Online;
                }
                p.idle_since = now_millis();
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbService;
    use shared::models::{DriverAccountStatus, VehicleCategory, VehicleLevel};

    fn upsert(id: &str) -> DriverUpsert {
        DriverUpsert {
            driver_id: id.into(),
            name: format!("Driver {id}"),
            vehicle_category: VehicleCategory::Sedan,
            vehicle_level: VehicleLevel::Economy,
            account_status: DriverAccountStatus::Active,
            verified: true,
            location: Some(Coordinate::new(-1.95, 30.06)),
            rating: 4.9,
            max_queue_capacity: 1,
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_dynamic_state_and_warmup_restores() {
        let db = DbService::in_memory().await.unwrap();
        let index = DriverIndex::new(db.pool.clone());

        let created = index.upsert(upsert("D1")).await.unwrap();
        assert_eq!(created.work_status, DriverWorkStatus::Offline);

        index.set_work_status("D1", DriverWorkStatus::Online).await.unwrap();
        index.assign("D1", "ORD1").await.unwrap();

        let mut again = upsert("D1");
        again.rating = 4.2;
        let updated = index.upsert(again).await.unwrap();
        assert_eq!(updated.rating, 4.2);
        assert_eq!(updated.current_order_id.as_deref(), Some("ORD1"));
        assert_eq!(updated.work_status, DriverWorkStatus::Busy);

        let rebuilt = DriverIndex::new(db.pool.clone());
        assert_eq!(rebuilt.warmup().await.unwrap(), 1);
        assert_eq!(rebuilt.get("D1").unwrap().current_order_id.as_deref(), Some("ORD1"));
    }

    #[tokio::test]
    async fn test_assign_queues_and_release_promotes() {
        let db = DbService::in_memory().await.unwrap();
        let index = DriverIndex::new(db.pool.clone());
        index.upsert(upsert("D1")).await.unwrap();
        index.set_work_status("D1", DriverWorkStatus::Online).await.unwrap();

        index.assign("D1", "ORD1").await.unwrap();
        let p = index.assign("D1", "ORD2").await.unwrap();
        assert_eq!(p.queued_order_ids, vec!["ORD2".to_string()]);
        assert!(p.at_capacity());

        let p = index.release("D1", "ORD1").await.unwrap();
        assert_eq!(p.current_order_id.as_deref(), Some("ORD2"));
        assert!(p.queued_order_ids.is_empty());
        assert_eq!(p.work_status, DriverWorkStatus::Busy);

        let p = index.release("D1", "ORD2").await.unwrap();
        assert_eq!(p.current_order_id, None);
        assert_eq!(p.work_status, DriverWorkStatus::Online);
    }

    #[tokio::test]
    async fn test_validation_and_unknown_driver() {
        let db = DbService::in_memory().await.unwrap();
        let index = DriverIndex::new(db.pool.clone());

        let mut bad = upsert("D1");
        bad.rating = 7.0;
        assert!(matches!(
            index.upsert(bad).await,
            Err(DispatchError::InvalidInput { field: "rating", .. })
        ));
        assert!(matches!(
            index.update_location("D9", Coordinate::new(0.0, 0.0)).await,
            Err(DispatchError::DriverNotFound(_))
        ));

        index.upsert(upsert("D1")).await.unwrap();
        assert!(matches!(
            index.update_location("D1", Coordinate::new(95.0, 0.0)).await,
            Err(DispatchError::InvalidInput { field: "location", .. })
        ));
        let p = index.apply_cooldown("D1", 10_000).await.unwrap();
        assert_eq!(p.next_available_at, 10_000);
    }

    #[tokio::test]
    async fn test_fifth_failed_login_locks_driver() {
        let db = DbService::in_memory().await.unwrap();
        let index = DriverIndex::new(db.pool.clone());
        index.upsert(upsert("D1")).await.unwrap();

        for _ in 0..MAX_FAILED_LOGINS - 1 {
            let p = index.record_login_failure("D1").await.unwrap();
            assert_eq!(p.locked_until, 0);
        }
        // 成功登录清零
        let p = index.record_login_success("D1").await.unwrap();
        assert_eq!(p.failed_logins, 0);

        for _ in 0..MAX_FAILED_LOGINS {
            index.record_login_failure("D1").await.unwrap();
        }
        let locked = index.get("D1").unwrap();
        assert!(locked.is_locked(now_millis()));
        assert!(locked.locked_until - now_millis() <= LOGIN_LOCK_MS);

        assert!(matches!(
            index.record_login_success("D1").await,
            Err(DispatchError::DriverLocked { .. })
        ));
        assert!(matches!(
            index.record_login_failure("D1").await,
            Err(DispatchError::DriverLocked { .. })
        ));

        let rebuilt = DriverIndex::new(db.pool.clone());
        rebuilt.warmup().await.unwrap();
        assert_eq!(rebuilt.get("D1").unwrap().locked_until, locked.locked_until);
    }
}
