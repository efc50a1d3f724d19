//! Step execution — everything that happens when a schedule entry fires.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use reach_audience::CustomerStore;
use reach_campaigns::templates::render_step;
use reach_campaigns::{
    Campaign, CampaignStatus, CampaignStore, DripCampaign, SequenceStep, StatField, StepType,
};
use reach_core::channels::DeliveryChannels;
use reach_core::clock::Clock;
use reach_core::config::SchedulerConfig;
use reach_core::error::{EngineError, EngineResult};
use reach_core::events::{make_event, EngineEventType, EventSink};
use reach_experiments::{ExperimentRegistry, Variant};
use reach_journey::{conditions, CustomerJourney, JourneyStatus, JourneyStore, SequenceRef};
use reach_store::{ScheduleEntry, ScheduleStore};

use crate::backoff::backoff_delay;

/// What happened when an entry fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Content dispatched; journey advanced (and possibly completed).
    Dispatched,
    /// Conditions did not hold; no dispatch, journey still advanced.
    Skipped,
    /// Journey or owning sequence is not runnable; entry dropped silently.
    Aborted,
    /// Transient dispatch failure; the same step was requeued with backoff.
    Retried,
    /// Attempts exhausted; step marked failed, journey paused for review.
    Failed,
}

/// The owning sequence, loaded once per firing.
enum Sequence {
    Campaign(Campaign),
    Drip(DripCampaign),
}

impl Sequence {
    fn step_at(&self, order: u32) -> Option<SequenceStep> {
        match self {
            Sequence::Campaign(c) => c.step_at(order),
            Sequence::Drip(d) => d.step_at(order),
        }
    }

    fn next_order_after(&self, order: u32) -> Option<u32> {
        match self {
            Sequence::Campaign(c) => c.next_order_after(order),
            Sequence::Drip(d) => d.next_order_after(order),
        }
    }

    /// Campaign id stats increments roll up to; drip sequences have no
    /// stats block.
    fn stats_campaign_id(&self) -> Option<Uuid> {
        match self {
            Sequence::Campaign(c) => Some(c.id),
            Sequence::Drip(_) => None,
        }
    }

    fn is_runnable(&self) -> bool {
        match self {
            Sequence::Campaign(c) => c.status == CampaignStatus::Active,
            Sequence::Drip(d) => d.is_active,
        }
    }
}

pub struct StepExecutor {
    campaigns: Arc<dyn CampaignStore>,
    journeys: Arc<dyn JourneyStore>,
    schedule: Arc<dyn ScheduleStore>,
    experiments: Arc<ExperimentRegistry>,
    customers: Arc<dyn CustomerStore>,
    channels: DeliveryChannels,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
}

impl StepExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        journeys: Arc<dyn JourneyStore>,
        schedule: Arc<dyn ScheduleStore>,
        experiments: Arc<ExperimentRegistry>,
        customers: Arc<dyn CustomerStore>,
        channels: DeliveryChannels,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            campaigns,
            journeys,
            schedule,
            experiments,
            customers,
            channels,
            events,
            clock,
            config,
        }
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Execute one fired schedule entry.
    ///
    /// The journey status is re-read here, immediately before dispatch,
    /// which closes the race between "timer fires" and "customer
    /// unsubscribes": an entry scheduled before the unsubscribe aborts
    /// without sending.
    pub async fn execute(&self, entry: ScheduleEntry) -> EngineResult<StepOutcome> {
        let now = self.clock.now();

        let Some(mut journey) = self.journeys.get(entry.journey_id).await? else {
            warn!(journey_id = %entry.journey_id, "Schedule entry for unknown journey dropped");
            return Ok(StepOutcome::Aborted);
        };

        if journey.status != JourneyStatus::Active {
            debug!(
                journey_id = %journey.id,
                status = journey.status.as_str(),
                "Journey not active at fire time, entry dropped"
            );
            return Ok(StepOutcome::Aborted);
        }

        // A duplicate fire for a step the journey has already moved past.
        if entry.step_order != journey.current_step {
            debug!(
                journey_id = %journey.id,
                entry_order = entry.step_order,
                current_step = journey.current_step,
                "Stale schedule entry dropped"
            );
            return Ok(StepOutcome::Aborted);
        }

        let sequence = match self.load_sequence(&entry.sequence).await? {
            Some(sequence) => sequence,
            None => {
                warn!(journey_id = %journey.id, "Owning sequence missing, entry dropped");
                return Ok(StepOutcome::Aborted);
            }
        };

        // A paused campaign stops its journeys within one tick.
        if !sequence.is_runnable() {
            debug!(journey_id = %journey.id, "Owning sequence not runnable, entry dropped");
            return Ok(StepOutcome::Aborted);
        }

        let Some(step) = sequence.step_at(entry.step_order) else {
            // Past the end of the sequence; nothing left to do.
            journey.transition(JourneyStatus::Completed, now)?;
            self.journeys.update(&journey).await?;
            return Ok(StepOutcome::Aborted);
        };

        if !conditions::matches(step.conditions.as_ref(), &journey.data) {
            info!(
                journey_id = %journey.id,
                step_id = %step.id,
                "Step conditions not met, skipping dispatch"
            );
            metrics::counter!("scheduler.steps_skipped").increment(1);
            self.events.emit(make_event(
                EngineEventType::StepSkipped,
                sequence.stats_campaign_id(),
                Some(journey.id),
                Some(journey.customer_id.clone()),
                Some(step.id),
            ));
            self.advance(&mut journey, &sequence, &step, now).await?;
            return Ok(StepOutcome::Skipped);
        }

        let (step, experiment_hit) = self.apply_experiment(step, &journey);

        match self.dispatch(&journey, &step).await {
            Ok(()) => {
                metrics::counter!("scheduler.steps_dispatched").increment(1);
                if let Some(campaign_id) = sequence.stats_campaign_id() {
                    self.campaigns
                        .increment_stat(campaign_id, StatField::Sent, 1)
                        .await?;
                }
                if let Some((test_id, variant)) = experiment_hit {
                    self.experiments
                        .record(test_id, variant, |r| r.delivered += 1)?;
                }
                self.events.emit(make_event(
                    EngineEventType::StepDispatched,
                    sequence.stats_campaign_id(),
                    Some(journey.id),
                    Some(journey.customer_id.clone()),
                    Some(step.id),
                ));
                self.advance(&mut journey, &sequence, &step, now).await?;
                Ok(StepOutcome::Dispatched)
            }
            Err(err) if err.is_transient() => self.handle_dispatch_failure(entry, journey, &step, err, now).await,
            Err(err) => Err(err),
        }
    }

    async fn load_sequence(&self, sequence: &SequenceRef) -> EngineResult<Option<Sequence>> {
        Ok(match sequence {
            SequenceRef::Campaign(id) => self
                .campaigns
                .get_campaign(*id)
                .await?
                .map(Sequence::Campaign),
            SequenceRef::Drip(id) => self
                .campaigns
                .get_drip_campaign(*id)
                .await?
                .map(Sequence::Drip),
        })
    }

    /// Swap in variant content when the step carries a running A/B test.
    fn apply_experiment(
        &self,
        mut step: SequenceStep,
        journey: &CustomerJourney,
    ) -> (SequenceStep, Option<(Uuid, Variant)>) {
        let Some(test) = self.experiments.running_test_for_step(step.id) else {
            return (step, None);
        };
        let variant = self
            .experiments
            .assign(test.id, &journey.customer_id, test.split_ratio);
        let content = test.content_for(variant);
        step.content.subject = content.subject.clone();
        step.content.body = content.body.clone();
        debug!(
            step_id = %step.id,
            test_id = %test.id,
            variant = variant.as_str(),
            "A/B variant selected"
        );
        (step, Some((test.id, variant)))
    }

    async fn dispatch(&self, journey: &CustomerJourney, step: &SequenceStep) -> EngineResult<()> {
        let rendered = render_step(step, &journey.data);
        // Stable per-(journey, step) key: a retried send cannot be
        // delivered twice downstream.
        let idempotency_key = format!("{}:{}", journey.id, step.id);

        match step.step_type {
            StepType::Email => {
                let to_address = self.recipient_address(journey).await?;
                self.channels
                    .email
                    .send(
                        &to_address,
                        &rendered.subject,
                        &rendered.body,
                        &step.variables,
                        &idempotency_key,
                    )
                    .await?;
            }
            StepType::Message => {
                self.channels
                    .message
                    .send(
                        &journey.customer_id,
                        &rendered.subject,
                        &rendered.body,
                        &idempotency_key,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    /// The journey's data bag may carry the address (trigger context);
    /// otherwise ask the customer store.
    async fn recipient_address(&self, journey: &CustomerJourney) -> EngineResult<String> {
        if let Some(email) = journey.data.get("email").and_then(|v| v.as_str()) {
            return Ok(email.to_string());
        }
        self.customers
            .email_address(&journey.customer_id)
            .await?
            .ok_or_else(|| {
                EngineError::DispatchFailure(format!(
                    "no email address for customer {}",
                    journey.customer_id
                ))
            })
    }

    /// Record the handled step and either schedule the next one or
    /// complete the journey.
    async fn advance(
        &self,
        journey: &mut CustomerJourney,
        sequence: &Sequence,
        step: &SequenceStep,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        journey.record_step(step.id, step.order, now);

        match sequence.next_order_after(step.order) {
            Some(next_order) => {
                self.journeys.update(journey).await?;
                // The next step's delay counts from this step's completion.
                let next_step = sequence.step_at(next_order).ok_or_else(|| {
                    EngineError::Validation(format!("sequence has no step at order {next_order}"))
                })?;
                self.schedule
                    .enqueue(&ScheduleEntry::new(
                        journey.id,
                        journey.sequence,
                        journey.customer_id.clone(),
                        next_order,
                        now + next_step.delay,
                    ))
                    .await?;
            }
            None => {
                journey.transition(JourneyStatus::Completed, now)?;
                self.journeys.update(journey).await?;
                info!(journey_id = %journey.id, customer_id = %journey.customer_id, "Journey completed");
                self.events.emit(make_event(
                    EngineEventType::JourneyCompleted,
                    sequence.stats_campaign_id(),
                    Some(journey.id),
                    Some(journey.customer_id.clone()),
                    None,
                ));
            }
        }
        Ok(())
    }

    /// A failed step is never silently skipped: the journey stays at the
    /// current step and the entry is requeued with backoff until the
    /// attempt cap, after which the journey is paused for manual review.
    async fn handle_dispatch_failure(
        &self,
        entry: ScheduleEntry,
        mut journey: CustomerJourney,
        step: &SequenceStep,
        err: EngineError,
        now: DateTime<Utc>,
    ) -> EngineResult<StepOutcome> {
        let next_attempt = entry.attempt + 1;
        metrics::counter!("scheduler.dispatch_failures").increment(1);

        if next_attempt < self.config.max_dispatch_attempts {
            let delay = backoff_delay(self.config.retry_base_secs, entry.attempt);
            warn!(
                journey_id = %journey.id,
                step_id = %step.id,
                attempt = next_attempt,
                retry_in_secs = delay.num_seconds(),
                error = %err,
                "Dispatch failed, retrying with backoff"
            );
            let mut retry = entry;
            retry.attempt = next_attempt;
            retry.fire_at = now + delay;
            self.schedule.enqueue(&retry).await?;
            self.events.emit(make_event(
                EngineEventType::StepRetried,
                None,
                Some(journey.id),
                Some(journey.customer_id.clone()),
                Some(step.id),
            ));
            Ok(StepOutcome::Retried)
        } else {
            warn!(
                journey_id = %journey.id,
                step_id = %step.id,
                attempts = next_attempt,
                error = %err,
                "Dispatch attempts exhausted, pausing journey for review"
            );
            journey.transition(JourneyStatus::Paused, now)?;
            self.journeys.update(&journey).await?;
            self.events.emit(make_event(
                EngineEventType::StepFailed,
                None,
                Some(journey.id),
                Some(journey.customer_id.clone()),
                Some(step.id),
            ));
            Ok(StepOutcome::Failed)
        }
    }
}
