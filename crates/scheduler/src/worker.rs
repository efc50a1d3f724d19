//! Polling worker — claims due schedule entries and drives the executor.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use reach_core::clock::Clock;
use reach_core::config::SchedulerConfig;
use reach_core::error::EngineResult;
use reach_journey::{JourneyStatus, JourneyStore};
use reach_store::{ScheduleEntry, ScheduleStore};

use crate::executor::StepExecutor;

pub struct SchedulerWorker {
    executor: Arc<StepExecutor>,
    schedule: Arc<dyn ScheduleStore>,
    journeys: Arc<dyn JourneyStore>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    /// At-most-one in-flight dispatch per journey: a second claim for the
    /// same journey is requeued instead of executed concurrently.
    in_flight: DashMap<Uuid, ()>,
}

impl SchedulerWorker {
    pub fn new(
        executor: Arc<StepExecutor>,
        schedule: Arc<dyn ScheduleStore>,
        journeys: Arc<dyn JourneyStore>,
        config: SchedulerConfig,
    ) -> Self {
        let clock = executor.clock();
        Self {
            executor,
            schedule,
            journeys,
            clock,
            config,
            in_flight: DashMap::new(),
        }
    }

    /// One scheduler tick: claim due entries and execute them. Returns the
    /// number of entries processed.
    pub async fn run_once(&self) -> EngineResult<usize> {
        let now = self.clock.now();
        let due = self
            .schedule
            .claim_due(now, self.config.claim_batch_size)
            .await?;
        let claimed = due.len();

        for entry in due {
            let journey_id = entry.journey_id;
            if self.in_flight.insert(journey_id, ()).is_some() {
                // Another dispatch for this journey is running; put the
                // entry back rather than double-dispatching.
                debug!(journey_id = %journey_id, "Journey busy, requeueing entry");
                self.schedule.enqueue(&entry).await?;
                continue;
            }

            let result = self.executor.execute(entry.clone()).await;
            self.in_flight.remove(&journey_id);

            if let Err(err) = result {
                if err.is_transient() {
                    warn!(
                        journey_id = %journey_id,
                        error = %err,
                        "Transient executor error, requeueing entry"
                    );
                    let mut requeue = entry;
                    requeue.fire_at = now + chrono::Duration::seconds(30);
                    self.schedule.enqueue(&requeue).await?;
                } else {
                    error!(journey_id = %journey_id, error = %err, "Entry dropped after executor error");
                }
            }
        }

        metrics::counter!("scheduler.ticks").increment(1);
        Ok(claimed)
    }

    /// Poll until cancelled.
    pub async fn run(&self) {
        info!(
            tick_ms = self.config.tick_interval_ms,
            batch = self.config.claim_batch_size,
            "Scheduler worker started"
        );
        let mut interval = tokio::time::interval(std::time::Duration::from_millis(
            self.config.tick_interval_ms,
        ));
        loop {
            interval.tick().await;
            if let Err(err) = self.run_once().await {
                error!(error = %err, "Scheduler tick failed");
            }
        }
    }

    /// Restart recovery: every active journey must have a pending schedule
    /// entry; any journey that lost its entry (crash between claim and
    /// completion) is requeued as immediately due, re-derived from the
    /// persisted journey state. Returns the number of entries restored.
    pub async fn recover(&self) -> EngineResult<usize> {
        let now = self.clock.now();
        let mut restored = 0usize;

        for journey in self.journeys.list_non_terminal().await? {
            if journey.status != JourneyStatus::Active {
                continue;
            }
            if self.schedule.has_pending(journey.id).await? {
                continue;
            }
            info!(
                journey_id = %journey.id,
                step_order = journey.current_step,
                "Recovering lost schedule entry"
            );
            self.schedule
                .enqueue(&ScheduleEntry::new(
                    journey.id,
                    journey.sequence,
                    journey.customer_id.clone(),
                    journey.current_step,
                    now,
                ))
                .await?;
            restored += 1;
        }

        if restored > 0 {
            info!(restored, "Schedule recovery complete");
        }
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use chrono::{Duration, Utc};
    use serde_json::json;

    use reach_audience::{Audience, CustomerProfile, InMemoryCustomerStore};
    use reach_campaigns::{
        Campaign, CampaignStatus, CampaignStore, CampaignType, Step, StepContent, StepType, Trigger,
    };
    use reach_core::channels::{capture_channels, CaptureChannel, DeliveryChannels};
    use reach_core::clock::ManualClock;
    use reach_core::events::{capture_sink, CaptureSink, EngineEventType};
    use reach_experiments::{AbTest, ExperimentRegistry, VariantContent};
    use reach_journey::{CustomerJourney, SequenceRef};
    use reach_store::MemoryStore;

    struct Harness {
        store: Arc<MemoryStore>,
        customers: Arc<InMemoryCustomerStore>,
        capture: Arc<CaptureChannel>,
        events: Arc<CaptureSink>,
        experiments: Arc<ExperimentRegistry>,
        clock: Arc<ManualClock>,
        worker: SchedulerWorker,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let customers = Arc::new(InMemoryCustomerStore::new());
        customers.upsert(CustomerProfile::new("42"));
        let (capture, channels) = capture_channels();
        let events = capture_sink();
        let experiments = Arc::new(ExperimentRegistry::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = SchedulerConfig::default();

        let executor = Arc::new(StepExecutor::new(
            store.clone(),
            store.clone(),
            store.clone(),
            experiments.clone(),
            customers.clone(),
            DeliveryChannels {
                email: channels.email,
                message: channels.message,
            },
            events.clone(),
            clock.clone(),
            config.clone(),
        ));
        let worker = SchedulerWorker::new(executor, store.clone(), store.clone(), config);

        Harness {
            store,
            customers,
            capture,
            events,
            experiments,
            clock,
            worker,
        }
    }

    fn step(order: u32, delay_hours: u32) -> Step {
        Step {
            id: Uuid::new_v4(),
            order,
            step_type: StepType::Email,
            delay_hours,
            content: StepContent {
                template_id: format!("step-{order}"),
                subject: format!("Subject {order}"),
                body: "Hello {{name}}".to_string(),
            },
            variables: HashMap::from([("name".to_string(), "there".to_string())]),
            conditions: None,
        }
    }

    /// Two steps at 0h and 24h for customer 42, with the journey already
    /// created at step 0 and its entry enqueued.
    async fn two_step_campaign(h: &Harness) -> (Campaign, CustomerJourney) {
        let campaign = Campaign::new(
            "Post-purchase follow-up",
            CampaignType::Email,
            Trigger::manual(),
            vec![step(0, 0), step(1, 24)],
            Audience::custom(["42"]),
        );
        h.store.insert_campaign(&campaign).await.unwrap();
        h.store
            .update_campaign_status(campaign.id, CampaignStatus::Active)
            .await
            .unwrap();

        let now = h.clock.now();
        let journey = CustomerJourney::new(
            SequenceRef::Campaign(campaign.id),
            "42",
            0,
            serde_json::Map::new(),
            now,
        );
        h.store.insert(&journey).await.unwrap();
        h.store
            .enqueue(&reach_store::ScheduleEntry::new(
                journey.id,
                journey.sequence,
                "42",
                0,
                now,
            ))
            .await
            .unwrap();
        (campaign, journey)
    }

    #[tokio::test]
    async fn test_two_step_flow_to_completion() {
        let h = harness();
        let (campaign, journey) = two_step_campaign(&h).await;

        // Step 0 fires immediately: one dispatch, advance to 1, step 1
        // scheduled +24h.
        assert_eq!(h.worker.run_once().await.unwrap(), 1);
        assert_eq!(h.capture.count(), 1);

        let stored = h.store.get(journey.id).await.unwrap().unwrap();
        assert_eq!(stored.current_step, 1);
        assert_eq!(stored.status, reach_journey::JourneyStatus::Active);

        let pending = h.store.pending_entries();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].step_order, 1);
        assert_eq!(pending[0].fire_at, h.clock.now() + Duration::hours(24));

        // Nothing due before the delay elapses.
        assert_eq!(h.worker.run_once().await.unwrap(), 0);

        // After 24h the second step fires and the journey completes.
        h.clock.advance(Duration::hours(24));
        assert_eq!(h.worker.run_once().await.unwrap(), 1);
        assert_eq!(h.capture.count(), 2);

        let stored = h.store.get(journey.id).await.unwrap().unwrap();
        assert_eq!(stored.status, reach_journey::JourneyStatus::Completed);
        assert_eq!(stored.completed_steps.len(), 2);

        let stats = h.store.get_stats(campaign.id).await.unwrap().unwrap();
        assert_eq!(stats.total_sent, 2);
        assert_eq!(h.events.count_type(EngineEventType::JourneyCompleted), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_between_steps_stops_dispatch() {
        let h = harness();
        let (campaign, journey) = two_step_campaign(&h).await;

        h.worker.run_once().await.unwrap();
        assert_eq!(h.capture.count(), 1);

        // Customer unsubscribes while step 1 is already scheduled.
        let mut stored = h.store.get(journey.id).await.unwrap().unwrap();
        stored
            .transition(reach_journey::JourneyStatus::Unsubscribed, h.clock.now())
            .unwrap();
        h.store.update(&stored).await.unwrap();

        h.clock.advance(Duration::hours(24));
        h.worker.run_once().await.unwrap();

        // Step 1 never dispatched; totals untouched.
        assert_eq!(h.capture.count(), 1);
        let stats = h.store.get_stats(campaign.id).await.unwrap().unwrap();
        assert_eq!(stats.total_sent, 1);
        let stored = h.store.get(journey.id).await.unwrap().unwrap();
        assert_eq!(stored.status, reach_journey::JourneyStatus::Unsubscribed);
    }

    #[tokio::test]
    async fn test_condition_mismatch_skips_but_advances() {
        let h = harness();

        let mut review_step = step(0, 0);
        review_step.conditions = Some(
            json!({"has_reviewed": true})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let campaign = Campaign::new(
            "Review thanks",
            CampaignType::Email,
            Trigger::manual(),
            vec![review_step, step(1, 24)],
            Audience::custom(["42"]),
        );
        h.store.insert_campaign(&campaign).await.unwrap();
        h.store
            .update_campaign_status(campaign.id, CampaignStatus::Active)
            .await
            .unwrap();

        let now = h.clock.now();
        let mut data = serde_json::Map::new();
        data.insert("has_reviewed".to_string(), json!(false));
        let journey =
            CustomerJourney::new(SequenceRef::Campaign(campaign.id), "42", 0, data, now);
        h.store.insert(&journey).await.unwrap();
        h.store
            .enqueue(&reach_store::ScheduleEntry::new(
                journey.id,
                journey.sequence,
                "42",
                0,
                now,
            ))
            .await
            .unwrap();

        h.worker.run_once().await.unwrap();

        // No dispatch, but the journey advanced and recorded the skip.
        assert_eq!(h.capture.count(), 0);
        let stored = h.store.get(journey.id).await.unwrap().unwrap();
        assert_eq!(stored.current_step, 1);
        assert_eq!(stored.completed_steps.len(), 1);
        assert_eq!(h.events.count_type(EngineEventType::StepSkipped), 1);

        let stats = h.store.get_stats(campaign.id).await.unwrap().unwrap();
        assert_eq!(stats.total_sent, 0);
    }

    #[tokio::test]
    async fn test_dispatch_failure_retries_then_pauses() {
        let h = harness();
        let (_campaign, journey) = two_step_campaign(&h).await;

        // Fail every attempt.
        h.capture.fail_next(u32::MAX);

        // First fire: retried with backoff.
        assert_eq!(h.worker.run_once().await.unwrap(), 1);
        let pending = h.store.pending_entries();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempt, 1);
        assert!(pending[0].fire_at > h.clock.now());

        // Journey still at step 0, still active.
        let stored = h.store.get(journey.id).await.unwrap().unwrap();
        assert_eq!(stored.current_step, 0);
        assert_eq!(stored.status, reach_journey::JourneyStatus::Active);

        // Burn through the remaining attempts.
        let max = SchedulerConfig::default().max_dispatch_attempts;
        for _ in 1..max {
            h.clock.advance(Duration::hours(2));
            h.worker.run_once().await.unwrap();
        }

        // Attempts exhausted: journey paused for review, no entry pending.
        let stored = h.store.get(journey.id).await.unwrap().unwrap();
        assert_eq!(stored.status, reach_journey::JourneyStatus::Paused);
        assert!(h.store.pending_entries().is_empty());
        assert_eq!(h.events.count_type(EngineEventType::StepFailed), 1);
        assert_eq!(h.capture.count(), 0);
    }

    #[tokio::test]
    async fn test_paused_campaign_stops_journeys_within_a_tick() {
        let h = harness();
        let (campaign, journey) = two_step_campaign(&h).await;

        h.store
            .update_campaign_status(campaign.id, CampaignStatus::Paused)
            .await
            .unwrap();

        h.worker.run_once().await.unwrap();
        assert_eq!(h.capture.count(), 0);
        let stored = h.store.get(journey.id).await.unwrap().unwrap();
        assert_eq!(stored.current_step, 0);
    }

    #[tokio::test]
    async fn test_recovery_restores_lost_entries() {
        let h = harness();
        let (_campaign, journey) = two_step_campaign(&h).await;

        // Simulate a crash between claim and execution: the entry is gone
        // but the journey is still active at step 0.
        let claimed = h.store.claim_due(h.clock.now(), 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert!(h.store.pending_entries().is_empty());

        assert_eq!(h.worker.recover().await.unwrap(), 1);
        let pending = h.store.pending_entries();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].journey_id, journey.id);
        assert_eq!(pending[0].step_order, 0);

        // The restored entry is due now and executes normally.
        h.worker.run_once().await.unwrap();
        assert_eq!(h.capture.count(), 1);

        // Recovery is idempotent: a journey with a pending entry is left
        // alone.
        assert_eq!(h.worker.recover().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ab_test_variant_content_dispatched() {
        let h = harness();
        let (campaign, journey) = two_step_campaign(&h).await;
        let step_id = campaign.steps[0].id;

        let test = AbTest::new(
            step_id,
            "Subject test",
            VariantContent {
                subject: "Variant A subject".to_string(),
                body: "A body".to_string(),
            },
            VariantContent {
                subject: "Variant B subject".to_string(),
                body: "B body".to_string(),
            },
            0.5,
        );
        let test_id = h.experiments.register(test);
        let expected = h.experiments.assign(test_id, "42", 0.5);

        h.worker.run_once().await.unwrap();

        let dispatches = h.capture.dispatches();
        assert_eq!(dispatches.len(), 1);
        let expected_subject = format!("Variant {} subject", expected.as_str());
        assert_eq!(dispatches[0].subject, expected_subject);

        // The assigned arm's delivered counter moved.
        let stored = h.experiments.get(test_id).unwrap();
        assert_eq!(stored.results_for(expected).delivered, 1);

        let _ = journey;
    }

    #[tokio::test]
    async fn test_missing_email_address_is_retriable_failure() {
        let h = harness();
        let (_campaign, journey) = two_step_campaign(&h).await;

        // Remove the address: profile without email.
        let mut profile = CustomerProfile::new("42");
        profile.email = None;
        h.customers.upsert(profile);

        h.worker.run_once().await.unwrap();
        assert_eq!(h.capture.count(), 0);

        let pending = h.store.pending_entries();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempt, 1);
        let _ = journey;
    }
}
