//! In-memory store backed by DashMap, for tests and single-process
//! development. Implements every storage contract the engine consumes.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use reach_campaigns::{Campaign, CampaignStats, CampaignStatus, CampaignStore, DripCampaign, StatField};
use reach_core::error::{EngineError, EngineResult};
use reach_journey::{CustomerJourney, JourneyStore, SequenceRef};

use crate::schedule::{ScheduleEntry, ScheduleStore};

#[derive(Default)]
pub struct MemoryStore {
    campaigns: DashMap<Uuid, Campaign>,
    drips: DashMap<Uuid, DripCampaign>,
    journeys: DashMap<Uuid, CustomerJourney>,
    /// (sequence, customer) -> the one non-terminal journey for the pair.
    journey_index: DashMap<String, Uuid>,
    schedule: Mutex<Vec<ScheduleEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn pair_key(sequence: &SequenceRef, customer_id: &str) -> String {
        format!("{}|{}", sequence.key(), customer_id)
    }

    /// All pending schedule entries, in fire order. Test helper.
    pub fn pending_entries(&self) -> Vec<ScheduleEntry> {
        let mut entries = self
            .schedule
            .lock()
            .expect("schedule mutex poisoned")
            .clone();
        entries.sort_by_key(|e| e.fire_at);
        entries
    }
}

#[async_trait]
impl CampaignStore for MemoryStore {
    async fn insert_campaign(&self, campaign: &Campaign) -> EngineResult<()> {
        self.campaigns.insert(campaign.id, campaign.clone());
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> EngineResult<Option<Campaign>> {
        Ok(self.campaigns.get(&id).map(|c| c.clone()))
    }

    async fn list_campaigns(&self) -> EngineResult<Vec<Campaign>> {
        let mut campaigns: Vec<Campaign> =
            self.campaigns.iter().map(|r| r.value().clone()).collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns)
    }

    async fn update_campaign_status(&self, id: Uuid, status: CampaignStatus) -> EngineResult<()> {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or(EngineError::CampaignNotFound(id))?;
        entry.status = status;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_drip_campaign(&self, drip: &DripCampaign) -> EngineResult<()> {
        self.drips.insert(drip.id, drip.clone());
        Ok(())
    }

    async fn get_drip_campaign(&self, id: Uuid) -> EngineResult<Option<DripCampaign>> {
        Ok(self.drips.get(&id).map(|d| d.clone()))
    }

    async fn set_drip_active(&self, id: Uuid, is_active: bool) -> EngineResult<()> {
        let mut entry = self
            .drips
            .get_mut(&id)
            .ok_or(EngineError::DripCampaignNotFound(id))?;
        entry.is_active = is_active;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_stat(&self, id: Uuid, field: StatField, delta: u64) -> EngineResult<()> {
        // Single-field bump under the shard lock; the whole stats record is
        // never rewritten from a stale read.
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or(EngineError::CampaignNotFound(id))?;
        let stats = &mut entry.stats;
        match field {
            StatField::Sent => stats.total_sent += delta,
            StatField::Delivered => stats.total_delivered += delta,
            StatField::Opened => stats.total_opened += delta,
            StatField::Clicked => stats.total_clicked += delta,
            StatField::Converted => stats.total_converted += delta,
        }
        Ok(())
    }

    async fn add_revenue(&self, id: Uuid, amount: f64) -> EngineResult<()> {
        let mut entry = self
            .campaigns
            .get_mut(&id)
            .ok_or(EngineError::CampaignNotFound(id))?;
        entry.stats.revenue += amount;
        Ok(())
    }

    async fn get_stats(&self, id: Uuid) -> EngineResult<Option<CampaignStats>> {
        Ok(self.campaigns.get(&id).map(|c| c.stats.clone()))
    }
}

#[async_trait]
impl JourneyStore for MemoryStore {
    async fn insert(&self, journey: &CustomerJourney) -> EngineResult<()> {
        let key = Self::pair_key(&journey.sequence, &journey.customer_id);

        // The index entry is removed when a journey reaches a terminal
        // state, so an occupied slot means a live duplicate.
        match self.journey_index.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let existing = *occupied.get();
                let live = self
                    .journeys
                    .get(&existing)
                    .map(|j| !j.status.is_terminal())
                    .unwrap_or(false);
                if live {
                    return Err(EngineError::DuplicateJourney {
                        sequence_id: journey.sequence.id(),
                        customer_id: journey.customer_id.clone(),
                    });
                }
                occupied.insert(journey.id);
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(journey.id);
            }
        }

        self.journeys.insert(journey.id, journey.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> EngineResult<Option<CustomerJourney>> {
        Ok(self.journeys.get(&id).map(|j| j.clone()))
    }

    async fn find(
        &self,
        sequence: &SequenceRef,
        customer_id: &str,
    ) -> EngineResult<Option<CustomerJourney>> {
        let key = Self::pair_key(sequence, customer_id);
        if let Some(id) = self.journey_index.get(&key) {
            if let Some(journey) = self.journeys.get(&id) {
                return Ok(Some(journey.clone()));
            }
        }
        // Fall back to the most recent (terminal) journey for the pair.
        Ok(self
            .journeys
            .iter()
            .filter(|r| r.sequence == *sequence && r.customer_id == customer_id)
            .max_by_key(|r| r.started_at)
            .map(|r| r.clone()))
    }

    async fn update(&self, journey: &CustomerJourney) -> EngineResult<()> {
        if !self.journeys.contains_key(&journey.id) {
            return Err(EngineError::JourneyNotFound(journey.id));
        }
        self.journeys.insert(journey.id, journey.clone());

        if journey.status.is_terminal() {
            let key = Self::pair_key(&journey.sequence, &journey.customer_id);
            self.journey_index
                .remove_if(&key, |_, current| *current == journey.id);
        }
        Ok(())
    }

    async fn list_non_terminal(&self) -> EngineResult<Vec<CustomerJourney>> {
        Ok(self
            .journeys
            .iter()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.clone())
            .collect())
    }

    async fn list_non_terminal_for_sequence(
        &self,
        sequence: &SequenceRef,
    ) -> EngineResult<Vec<CustomerJourney>> {
        Ok(self
            .journeys
            .iter()
            .filter(|r| !r.status.is_terminal() && r.sequence == *sequence)
            .map(|r| r.clone())
            .collect())
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn enqueue(&self, entry: &ScheduleEntry) -> EngineResult<()> {
        debug!(
            journey_id = %entry.journey_id,
            step_order = entry.step_order,
            fire_at = %entry.fire_at,
            "Schedule entry enqueued"
        );
        self.schedule
            .lock()
            .expect("schedule mutex poisoned")
            .push(entry.clone());
        Ok(())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<ScheduleEntry>> {
        let mut schedule = self.schedule.lock().expect("schedule mutex poisoned");
        let mut due: Vec<usize> = schedule
            .iter()
            .enumerate()
            .filter(|(_, e)| e.fire_at <= now)
            .map(|(i, _)| i)
            .take(limit)
            .collect();

        let mut claimed = Vec::with_capacity(due.len());
        // Remove back-to-front so indices stay valid.
        due.reverse();
        for index in due {
            claimed.push(schedule.remove(index));
        }
        claimed.sort_by_key(|e| e.fire_at);
        Ok(claimed)
    }

    async fn cancel_journey(&self, journey_id: Uuid) -> EngineResult<usize> {
        let mut schedule = self.schedule.lock().expect("schedule mutex poisoned");
        let before = schedule.len();
        schedule.retain(|e| e.journey_id != journey_id);
        Ok(before - schedule.len())
    }

    async fn has_pending(&self, journey_id: Uuid) -> EngineResult<bool> {
        Ok(self
            .schedule
            .lock()
            .expect("schedule mutex poisoned")
            .iter()
            .any(|e| e.journey_id == journey_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use reach_audience::Audience;
    use reach_campaigns::{CampaignType, Trigger};

    fn journey(sequence: SequenceRef, customer: &str) -> CustomerJourney {
        CustomerJourney::new(sequence, customer, 0, serde_json::Map::new(), Utc::now())
    }

    #[tokio::test]
    async fn test_duplicate_journey_rejected() {
        let store = MemoryStore::new();
        let sequence = SequenceRef::Campaign(Uuid::new_v4());

        let first = journey(sequence, "cust-1");
        store.insert(&first).await.unwrap();

        let duplicate = journey(sequence, "cust-1");
        let err = store.insert(&duplicate).await.unwrap_err();
        assert!(matches!(err, EngineError::DuplicateJourney { .. }));

        // The existing journey is untouched.
        let stored = store.get(first.id).await.unwrap().unwrap();
        assert_eq!(stored.id, first.id);
    }

    #[tokio::test]
    async fn test_terminal_journey_frees_the_pair() {
        let store = MemoryStore::new();
        let sequence = SequenceRef::Campaign(Uuid::new_v4());

        let mut first = journey(sequence, "cust-1");
        store.insert(&first).await.unwrap();

        first
            .transition(reach_journey::JourneyStatus::Completed, Utc::now())
            .unwrap();
        store.update(&first).await.unwrap();

        // A new journey for the pair is now allowed.
        store.insert(&journey(sequence, "cust-1")).await.unwrap();
    }

    #[tokio::test]
    async fn test_claim_due_removes_claimed_entries() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let journey_id = Uuid::new_v4();
        let sequence = SequenceRef::Campaign(Uuid::new_v4());

        store
            .enqueue(&ScheduleEntry::new(journey_id, sequence, "c1", 0, now))
            .await
            .unwrap();
        store
            .enqueue(&ScheduleEntry::new(
                journey_id,
                sequence,
                "c1",
                1,
                now + Duration::hours(24),
            ))
            .await
            .unwrap();

        let claimed = store.claim_due(now, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].step_order, 0);

        // Claimed entries are gone; the future entry remains.
        assert!(store.claim_due(now, 10).await.unwrap().is_empty());
        assert!(store.has_pending(journey_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_journey_drops_pending_entries() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let journey_id = Uuid::new_v4();
        let sequence = SequenceRef::Drip(Uuid::new_v4());

        for order in 0..3 {
            store
                .enqueue(&ScheduleEntry::new(
                    journey_id,
                    sequence,
                    "c1",
                    order,
                    now + Duration::days(i64::from(order)),
                ))
                .await
                .unwrap();
        }

        assert_eq!(store.cancel_journey(journey_id).await.unwrap(), 3);
        assert!(!store.has_pending(journey_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_stat_increments() {
        use std::sync::Arc;

        let store = Arc::new(MemoryStore::new());
        let campaign = Campaign::new(
            "Concurrent",
            CampaignType::Email,
            Trigger::manual(),
            vec![reach_campaigns::Step {
                id: Uuid::new_v4(),
                order: 0,
                step_type: reach_campaigns::StepType::Email,
                delay_hours: 0,
                content: reach_campaigns::StepContent {
                    template_id: "t".into(),
                    subject: "s".into(),
                    body: "b".into(),
                },
                variables: Default::default(),
                conditions: None,
            }],
            Audience::custom(["c1"]),
        );
        store.insert_campaign(&campaign).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let id = campaign.id;
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    store.increment_stat(id, StatField::Sent, 1).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = store.get_stats(campaign.id).await.unwrap().unwrap();
        assert_eq!(stats.total_sent, 800);
    }
}
