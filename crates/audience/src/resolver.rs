//! Audience resolution against the external customer/segment store.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use reach_core::error::{EngineError, EngineResult};

use crate::types::{Audience, AudienceFilters};

/// External customer/segment store, consumed by the resolver and by the
/// scheduler for recipient address lookup.
#[async_trait]
pub trait CustomerStore: Send + Sync {
    async fn all_customers(&self) -> EngineResult<Vec<String>>;

    async fn resolve_segment(
        &self,
        segment_id: &str,
        filters: Option<&AudienceFilters>,
    ) -> EngineResult<Vec<String>>;

    async fn email_address(&self, customer_id: &str) -> EngineResult<Option<String>>;
}

/// Resolves audience specifications into concrete customer lists.
///
/// Resolution is all-or-nothing: if the customer store is unreachable the
/// whole resolution fails and the campaign start is aborted, never
/// partially started.
#[derive(Clone)]
pub struct AudienceResolver {
    store: Arc<dyn CustomerStore>,
}

impl AudienceResolver {
    pub fn new(store: Arc<dyn CustomerStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn CustomerStore> {
        self.store.clone()
    }

    /// Resolve to an ordered, deduplicated customer id list. First
    /// occurrence wins; an empty result is valid.
    pub async fn resolve(&self, audience: &Audience) -> EngineResult<Vec<String>> {
        let resolved = match audience {
            Audience::Custom { customer_ids } => customer_ids.clone(),
            Audience::Segment {
                segment_id,
                filters,
            } => self
                .store
                .resolve_segment(segment_id, filters.as_ref())
                .await
                .map_err(|e| EngineError::AudienceResolutionFailure(e.to_string()))?,
            Audience::All { filters } => {
                let all = self
                    .store
                    .all_customers()
                    .await
                    .map_err(|e| EngineError::AudienceResolutionFailure(e.to_string()))?;
                match filters {
                    Some(f) if !f.is_empty() => {
                        self.store
                            .resolve_segment("__all__", Some(f))
                            .await
                            .map_err(|e| {
                                EngineError::AudienceResolutionFailure(e.to_string())
                            })?
                    }
                    _ => all,
                }
            }
        };

        let mut seen = HashSet::with_capacity(resolved.len());
        let deduplicated: Vec<String> = resolved
            .into_iter()
            .filter(|id| seen.insert(id.clone()))
            .collect();

        debug!(count = deduplicated.len(), "Audience resolved");
        Ok(deduplicated)
    }
}

// ---------------------------------------------------------------------------
// In-memory customer store for tests and development
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerProfile {
    pub customer_id: String,
    pub email: Option<String>,
    pub order_count: u32,
    pub total_spend: f64,
    pub last_order_at: Option<DateTime<Utc>>,
    pub has_reviewed: bool,
    pub tags: Vec<String>,
    /// Segment ids this customer belongs to.
    pub segments: Vec<String>,
}

impl CustomerProfile {
    pub fn new(customer_id: impl Into<String>) -> Self {
        let customer_id = customer_id.into();
        Self {
            email: Some(format!("{customer_id}@example.com")),
            customer_id,
            order_count: 0,
            total_spend: 0.0,
            last_order_at: None,
            has_reviewed: false,
            tags: Vec::new(),
            segments: Vec::new(),
        }
    }

    fn matches(&self, filters: &AudienceFilters, now: DateTime<Utc>) -> bool {
        if let Some(min) = filters.min_orders {
            if self.order_count < min {
                return false;
            }
        }
        if let Some(max) = filters.max_orders {
            if self.order_count > max {
                return false;
            }
        }
        if let Some(min) = filters.min_spend {
            if self.total_spend < min {
                return false;
            }
        }
        if let Some(max) = filters.max_spend {
            if self.total_spend > max {
                return false;
            }
        }
        if let Some(days) = filters.last_order_within_days {
            let cutoff = now - chrono::Duration::days(i64::from(days));
            match self.last_order_at {
                Some(at) if at >= cutoff => {}
                _ => return false,
            }
        }
        if let Some(reviewed) = filters.has_reviewed {
            if self.has_reviewed != reviewed {
                return false;
            }
        }
        if !filters.tags.is_empty() && !filters.tags.iter().all(|t| self.tags.contains(t)) {
            return false;
        }
        true
    }
}

/// Thread-safe in-memory customer store. Development and test backend for
/// the `CustomerStore` contract; production deployments plug in the real
/// customer data platform.
#[derive(Default)]
pub struct InMemoryCustomerStore {
    profiles: DashMap<String, CustomerProfile>,
    /// When set, every call fails — simulates an unreachable store.
    unreachable: std::sync::atomic::AtomicBool,
}

impl InMemoryCustomerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, profile: CustomerProfile) {
        self.profiles.insert(profile.customer_id.clone(), profile);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable
            .store(unreachable, std::sync::atomic::Ordering::SeqCst);
        info!(unreachable, "Customer store reachability toggled");
    }

    fn check_reachable(&self) -> EngineResult<()> {
        if self.unreachable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(EngineError::Store("customer store unreachable".into()));
        }
        Ok(())
    }

    fn ordered_ids<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&CustomerProfile) -> bool,
    {
        let mut ids: Vec<String> = self
            .profiles
            .iter()
            .filter(|r| predicate(r.value()))
            .map(|r| r.key().clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl CustomerStore for InMemoryCustomerStore {
    async fn all_customers(&self) -> EngineResult<Vec<String>> {
        self.check_reachable()?;
        Ok(self.ordered_ids(|_| true))
    }

    async fn resolve_segment(
        &self,
        segment_id: &str,
        filters: Option<&AudienceFilters>,
    ) -> EngineResult<Vec<String>> {
        self.check_reachable()?;
        let now = Utc::now();
        Ok(self.ordered_ids(|p| {
            let in_segment =
                segment_id == "__all__" || p.segments.iter().any(|s| s == segment_id);
            let filter_ok = filters.map(|f| p.matches(f, now)).unwrap_or(true);
            in_segment && filter_ok
        }))
    }

    async fn email_address(&self, customer_id: &str) -> EngineResult<Option<String>> {
        self.check_reachable()?;
        Ok(self
            .profiles
            .get(customer_id)
            .and_then(|p| p.email.clone()))
    }
}
