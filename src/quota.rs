//! Process-wide quota booking.
//!
//! The host runs many resource operations at once. Resources that consume a
//! scarce per-tenant quota book a unit here before calling the vendor, so
//! parallel applies queue up instead of failing with quota errors.
//!
//! Acquisition is FIFO (tokio's semaphore is fair). Multi-quota bookings are
//! acquired in name order, which rules out lock-order deadlocks between two
//! bookings of overlapping quotas.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, OnceLock};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::config::Environment;
use crate::context::OperationContext;
use crate::error::ProviderError;

/// A named cloud quota with its documented per-tenant default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Registry key.
    pub name: &'static str,
    /// Capacity used when the environment does not override it.
    pub default_capacity: u32,
    /// Environment variable overriding the capacity.
    pub env: &'static str,
}

/// Elastic IPs.
pub const FLOATING_IP: Quota = Quota {
    name: "FloatingIP",
    default_capacity: 10,
    env: "OS_QUOTA_FLOATING_IP",
};

/// VPCs (routers).
pub const ROUTER: Quota = Quota {
    name: "Router",
    default_capacity: 5,
    env: "OS_QUOTA_ROUTER",
};

/// Shared bandwidths.
pub const SHARED_BANDWIDTH: Quota = Quota {
    name: "SharedBandwidth",
    default_capacity: 5,
    env: "OS_QUOTA_SHARED_BANDWIDTH",
};

/// Security groups.
pub const SECURITY_GROUP: Quota = Quota {
    name: "SecurityGroup",
    default_capacity: 100,
    env: "OS_QUOTA_SECURITY_GROUP",
};

const KNOWN: &[Quota] = &[FLOATING_IP, ROUTER, SHARED_BANDWIDTH, SECURITY_GROUP];

#[derive(Debug)]
struct Slot {
    capacity: u32,
    semaphore: Arc<Semaphore>,
}

/// Named semaphores with fixed capacities.
#[derive(Debug, Default)]
pub struct QuotaRegistry {
    overrides: HashMap<String, u32>,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
}

impl QuotaRegistry {
    /// A registry using the default capacities.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry whose capacities may be overridden from `env`.
    pub fn from_env(env: &Environment) -> Self {
        let mut registry = Self::new();
        for quota in KNOWN {
            if let Some(capacity) = env.get(quota.env).and_then(|v| v.trim().parse().ok()) {
                registry.overrides.insert(quota.name.to_string(), capacity);
            }
        }
        registry
    }

    /// The registry shared by the whole process.
    pub fn global() -> Arc<QuotaRegistry> {
        static GLOBAL: OnceLock<Arc<QuotaRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(QuotaRegistry::from_env(&Environment::from_process())))
            .clone()
    }

    /// Set the capacity of a quota. Only affects quotas not booked yet.
    pub fn with_capacity(mut self, quota: Quota, capacity: u32) -> Self {
        self.overrides.insert(quota.name.to_string(), capacity);
        self
    }

    /// The configured capacity of `quota`.
    pub fn capacity(&self, quota: Quota) -> u32 {
        self.overrides
            .get(quota.name)
            .copied()
            .unwrap_or(quota.default_capacity)
    }

    /// Units of `quota` not currently booked.
    pub fn available(&self, quota: Quota) -> Result<u32, ProviderError> {
        Ok(self.slot(quota)?.semaphore.available_permits() as u32)
    }

    fn slot(&self, quota: Quota) -> Result<Arc<Slot>, ProviderError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| ProviderError::Sdk("quota registry lock poisoned".to_string()))?;
        let capacity = self.capacity(quota);
        let slot = slots.entry(quota.name.to_string()).or_insert_with(|| {
            Arc::new(Slot {
                capacity,
                semaphore: Arc::new(Semaphore::new(capacity as usize)),
            })
        });
        Ok(slot.clone())
    }

    /// Book one unit of `quota`, waiting until it is available.
    pub async fn book_one(&self, ctx: &OperationContext, quota: Quota) -> Result<Booking, ProviderError> {
        self.book_many(ctx, &[(quota, 1)]).await
    }

    /// Book several quotas at once.
    ///
    /// Either every unit is booked or none is: if the wait is interrupted, the
    /// units acquired so far are released before returning. Requests for more
    /// than a quota's capacity fail immediately.
    pub async fn book_many(
        &self,
        ctx: &OperationContext,
        requests: &[(Quota, u32)],
    ) -> Result<Booking, ProviderError> {
        let mut wanted: BTreeMap<&'static str, (Quota, u32)> = BTreeMap::new();
        for (quota, count) in requests {
            wanted.entry(quota.name).or_insert((*quota, 0)).1 += count;
        }

        let mut slots = Vec::with_capacity(wanted.len());
        for (quota, count) in wanted.into_values() {
            let slot = self.slot(quota)?;
            if count > slot.capacity {
                return Err(ProviderError::Quota(format!(
                    "cannot book {} units of {}: capacity is {}",
                    count, quota.name, slot.capacity
                )));
            }
            slots.push((quota, count, slot));
        }

        let mut booking = Booking::default();
        for (quota, count, slot) in slots {
            if count == 0 {
                continue;
            }
            if slot.semaphore.available_permits() < count as usize {
                debug!(quota = quota.name, count, "waiting for quota");
            }
            let semaphore = slot.semaphore.clone();
            let permit = ctx
                .run(async move {
                    semaphore
                        .acquire_many_owned(count)
                        .await
                        .map_err(|_| ProviderError::Quota(format!("{} registry closed", quota.name)))
                })
                .await?;
            debug!(quota = quota.name, count, "booked quota");
            booking.permits.push((quota.name, permit));
        }
        Ok(booking)
    }
}

/// Units booked by one operation. Dropping the booking releases them.
#[derive(Debug, Default)]
pub struct Booking {
    permits: Vec<(&'static str, OwnedSemaphorePermit)>,
}

impl Booking {
    /// Release every unit. Calling it again does nothing.
    pub fn release(&mut self) {
        for (name, permit) in self.permits.drain(..) {
            debug!(quota = name, count = permit.num_permits(), "released quota");
        }
    }

    /// Whether the booking still holds units.
    pub fn is_held(&self) -> bool {
        !self.permits.is_empty()
    }

    /// Combine two bookings.
    pub fn merge(mut self, mut other: Booking) -> Booking {
        self.permits.append(&mut other.permits);
        self
    }
}

impl Drop for Booking {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn test_capacity_from_environment() {
        let env = Environment::from_pairs([("OS_QUOTA_FLOATING_IP", "1")]);
        let registry = QuotaRegistry::from_env(&env);
        assert_eq!(registry.capacity(FLOATING_IP), 1);
        assert_eq!(registry.capacity(ROUTER), 5);
    }

    #[tokio::test]
    async fn test_release_restores_capacity() {
        let registry = QuotaRegistry::new().with_capacity(ROUTER, 2);
        let ctx = OperationContext::background();
        let mut booking = registry.book_one(&ctx, ROUTER).await.unwrap();
        assert_eq!(registry.available(ROUTER).unwrap(), 1);
        booking.release();
        booking.release();
        assert!(!booking.is_held());
        assert_eq!(registry.available(ROUTER).unwrap(), 2);
        drop(booking);
        assert_eq!(registry.available(ROUTER).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_over_capacity_fails_fast() {
        let registry = QuotaRegistry::new().with_capacity(FLOATING_IP, 1);
        let ctx = OperationContext::background();
        let err = registry
            .book_many(&ctx, &[(FLOATING_IP, 1), (FLOATING_IP, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Quota(_)));
        assert_eq!(registry.available(FLOATING_IP).unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_bookings_never_exceed_capacity() {
        let registry = Arc::new(QuotaRegistry::new().with_capacity(FLOATING_IP, 2));
        let in_use = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let in_use = in_use.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let ctx = OperationContext::background();
                let _booking = registry.book_one(&ctx, FLOATING_IP).await.unwrap();
                let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(1)).await;
                in_use.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(registry.available(FLOATING_IP).unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_booking_releases_partial_units() {
        let registry = QuotaRegistry::new()
            .with_capacity(FLOATING_IP, 1)
            .with_capacity(ROUTER, 1);
        let background = OperationContext::background();
        let _router = registry.book_one(&background, ROUTER).await.unwrap();

        let ctx = OperationContext::new(Duration::from_secs(5));
        let err = registry
            .book_many(&ctx, &[(ROUTER, 1), (FLOATING_IP, 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::DeadlineExceeded(_)));
        // FloatingIP sorts first and was acquired before the Router wait.
        assert_eq!(registry.available(FLOATING_IP).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_merged_bookings_release_together() {
        let registry = QuotaRegistry::new();
        let ctx = OperationContext::background();
        let a = registry.book_one(&ctx, ROUTER).await.unwrap();
        let b = registry.book_one(&ctx, SECURITY_GROUP).await.unwrap();
        let merged = a.merge(b);
        assert_eq!(registry.available(ROUTER).unwrap(), 4);
        drop(merged);
        assert_eq!(registry.available(ROUTER).unwrap(), 5);
        assert_eq!(registry.available(SECURITY_GROUP).unwrap(), 100);
    }
}
