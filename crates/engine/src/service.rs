use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use reach_audience::AudienceResolver;
use reach_campaigns::{
    Campaign, CampaignStats, CampaignStatus, CampaignStore, DripCampaign, StatField, TriggerType,
};
use reach_core::clock::Clock;
use reach_core::error::{EngineError, EngineResult};
use reach_core::events::{make_event, EngineEventType, EventSink};
use reach_experiments::{AbTest, ExperimentRegistry, WinnerDecision};
use reach_journey::{conditions, CustomerJourney, JourneyStatus, JourneyStore, SequenceRef};
use reach_store::{ScheduleEntry, ScheduleStore};

/// Engagement feedback from the delivery side (webhooks, pixel hits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementKind {
    Delivered,
    Opened,
    Clicked,
    Converted,
}

impl EngagementKind {
    fn stat_field(self) -> StatField {
        match self {
            EngagementKind::Delivered => StatField::Delivered,
            EngagementKind::Opened => StatField::Opened,
            EngagementKind::Clicked => StatField::Clicked,
            EngagementKind::Converted => StatField::Converted,
        }
    }
}

/// The orchestration engine's outward-facing service object.
pub struct CampaignService {
    campaigns: Arc<dyn CampaignStore>,
    journeys: Arc<dyn JourneyStore>,
    schedule: Arc<dyn ScheduleStore>,
    experiments: Arc<ExperimentRegistry>,
    resolver: AudienceResolver,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl CampaignService {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        journeys: Arc<dyn JourneyStore>,
        schedule: Arc<dyn ScheduleStore>,
        experiments: Arc<ExperimentRegistry>,
        resolver: AudienceResolver,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            campaigns,
            journeys,
            schedule,
            experiments,
            resolver,
            events,
            clock,
        }
    }

    pub fn experiments(&self) -> Arc<ExperimentRegistry> {
        self.experiments.clone()
    }

    // ─── Campaigns ─────────────────────────────────────────────────────────

    pub async fn create_campaign(&self, campaign: Campaign) -> EngineResult<Campaign> {
        campaign.validate()?;
        self.campaigns.insert_campaign(&campaign).await?;
        info!(campaign_id = %campaign.id, name = %campaign.name, "Campaign created");
        self.events.emit(make_event(
            EngineEventType::CampaignCreated,
            Some(campaign.id),
            None,
            None,
            None,
        ));
        Ok(campaign)
    }

    pub async fn get_campaign(&self, id: Uuid) -> EngineResult<Campaign> {
        self.campaigns
            .get_campaign(id)
            .await?
            .ok_or(EngineError::CampaignNotFound(id))
    }

    pub async fn list_campaigns(&self) -> EngineResult<Vec<Campaign>> {
        self.campaigns.list_campaigns().await
    }

    /// Activate a campaign.
    ///
    /// For manual and scheduled triggers the audience is resolved up
    /// front and a journey created per customer — all-or-nothing: if
    /// resolution fails the campaign stays in `Draft` with zero journeys.
    /// Event-triggered campaigns just go live; their journeys arrive via
    /// `execute_campaign_for_customer`. Resuming a paused campaign puts
    /// its stalled journeys back on the schedule.
    pub async fn start_campaign(&self, id: Uuid) -> EngineResult<Campaign> {
        let campaign = self.get_campaign(id).await?;
        let now = self.clock.now();

        match campaign.status {
            CampaignStatus::Draft => {
                let entered = match campaign.trigger.trigger_type {
                    TriggerType::Manual | TriggerType::Scheduled => {
                        // Resolve before any mutation so a failed
                        // resolution aborts the start with no partial
                        // audience.
                        let customers = self.resolver.resolve(&campaign.audience).await?;
                        let start_at = match campaign.trigger.trigger_type {
                            TriggerType::Scheduled => {
                                campaign.trigger.scheduled_at.unwrap_or(now).max(now)
                            }
                            _ => now,
                        };
                        self.campaigns
                            .update_campaign_status(id, CampaignStatus::Active)
                            .await?;

                        let mut entered = 0usize;
                        for customer_id in customers {
                            match self
                                .enter_campaign(
                                    &campaign,
                                    &customer_id,
                                    serde_json::Map::new(),
                                    start_at,
                                )
                                .await
                            {
                                Ok(_) => entered += 1,
                                Err(EngineError::DuplicateJourney { .. }) => {
                                    warn!(
                                        campaign_id = %id,
                                        customer_id = %customer_id,
                                        "Customer already in campaign, skipping"
                                    );
                                }
                                Err(err) => return Err(err),
                            }
                        }
                        entered
                    }
                    _ => {
                        self.campaigns
                            .update_campaign_status(id, CampaignStatus::Active)
                            .await?;
                        0
                    }
                };

                info!(campaign_id = %id, journeys = entered, "Campaign started");
            }
            CampaignStatus::Paused => {
                self.campaigns
                    .update_campaign_status(id, CampaignStatus::Active)
                    .await?;
                let restored = self.reschedule_sequence(SequenceRef::Campaign(id)).await?;
                info!(campaign_id = %id, restored, "Campaign resumed");
            }
            other => {
                return Err(EngineError::InvalidTransition {
                    from: other.as_str().to_string(),
                    to: CampaignStatus::Active.as_str().to_string(),
                })
            }
        }

        self.events.emit(make_event(
            EngineEventType::CampaignStarted,
            Some(id),
            None,
            None,
            None,
        ));
        self.get_campaign(id).await
    }

    pub async fn pause_campaign(&self, id: Uuid) -> EngineResult<Campaign> {
        let campaign = self.get_campaign(id).await?;
        if !campaign.status.can_transition(CampaignStatus::Paused) {
            return Err(EngineError::InvalidTransition {
                from: campaign.status.as_str().to_string(),
                to: CampaignStatus::Paused.as_str().to_string(),
            });
        }
        self.campaigns
            .update_campaign_status(id, CampaignStatus::Paused)
            .await?;
        info!(campaign_id = %id, "Campaign paused");
        self.events.emit(make_event(
            EngineEventType::CampaignPaused,
            Some(id),
            None,
            None,
            None,
        ));
        self.get_campaign(id).await
    }

    pub async fn get_campaign_stats(&self, id: Uuid) -> EngineResult<CampaignStats> {
        self.campaigns
            .get_stats(id)
            .await?
            .ok_or(EngineError::CampaignNotFound(id))
    }

    // ─── Journey entry ─────────────────────────────────────────────────────

    /// Run a trigger event for one customer against an active campaign.
    /// Returns the new journey id, or `None` when the trigger conditions
    /// reject the event payload.
    pub async fn execute_campaign_for_customer(
        &self,
        campaign_id: Uuid,
        customer_id: &str,
        trigger_data: serde_json::Map<String, serde_json::Value>,
    ) -> EngineResult<Option<Uuid>> {
        let campaign = self.get_campaign(campaign_id).await?;
        if campaign.status != CampaignStatus::Active {
            return Err(EngineError::InvalidTransition {
                from: campaign.status.as_str().to_string(),
                to: "executing".to_string(),
            });
        }

        if !conditions::matches(campaign.trigger.conditions.as_ref(), &trigger_data) {
            info!(
                campaign_id = %campaign_id,
                customer_id = %customer_id,
                "Trigger conditions rejected event, no journey created"
            );
            return Ok(None);
        }

        let journey_id = self
            .enter_campaign(&campaign, customer_id, trigger_data, self.clock.now())
            .await?;
        Ok(Some(journey_id))
    }

    async fn enter_campaign(
        &self,
        campaign: &Campaign,
        customer_id: &str,
        data: serde_json::Map<String, serde_json::Value>,
        start_at: DateTime<Utc>,
    ) -> EngineResult<Uuid> {
        let first_order = campaign
            .first_order()
            .ok_or_else(|| EngineError::Validation("campaign has no steps".to_string()))?;
        let first_step = campaign.step_at(first_order).ok_or_else(|| {
            EngineError::Validation("campaign first step missing".to_string())
        })?;

        let now = self.clock.now();
        let journey = CustomerJourney::new(
            SequenceRef::Campaign(campaign.id),
            customer_id,
            first_order,
            data,
            now,
        );
        self.journeys.insert(&journey).await?;

        let trigger_delay = campaign
            .trigger
            .delay_hours
            .map(|h| Duration::hours(i64::from(h)))
            .unwrap_or_else(Duration::zero);
        self.schedule
            .enqueue(&ScheduleEntry::new(
                journey.id,
                journey.sequence,
                customer_id,
                first_order,
                start_at + trigger_delay + first_step.delay,
            ))
            .await?;

        info!(
            campaign_id = %campaign.id,
            customer_id = %customer_id,
            journey_id = %journey.id,
            "Journey started"
        );
        self.events.emit(make_event(
            EngineEventType::JourneyStarted,
            Some(campaign.id),
            Some(journey.id),
            Some(customer_id.to_string()),
            None,
        ));
        Ok(journey.id)
    }

    // ─── Drip campaigns ────────────────────────────────────────────────────

    pub async fn create_drip_campaign(&self, drip: DripCampaign) -> EngineResult<DripCampaign> {
        drip.validate()?;
        self.campaigns.insert_drip_campaign(&drip).await?;
        info!(drip_id = %drip.id, name = %drip.name, "Drip campaign created");
        Ok(drip)
    }

    pub async fn get_drip_campaign(&self, id: Uuid) -> EngineResult<DripCampaign> {
        self.campaigns
            .get_drip_campaign(id)
            .await?
            .ok_or(EngineError::DripCampaignNotFound(id))
    }

    pub async fn set_drip_active(&self, id: Uuid, is_active: bool) -> EngineResult<()> {
        self.campaigns.set_drip_active(id, is_active).await
    }

    /// Explicitly start one customer on a drip sequence.
    pub async fn start_drip_campaign(
        &self,
        drip_id: Uuid,
        customer_id: &str,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> EngineResult<Uuid> {
        let drip = self.get_drip_campaign(drip_id).await?;
        if !drip.is_active {
            return Err(EngineError::Validation(format!(
                "drip campaign '{}' is not active",
                drip.name
            )));
        }

        let first_order = drip
            .first_order()
            .ok_or_else(|| EngineError::Validation("drip campaign has no steps".to_string()))?;
        let first_step = drip
            .step_at(first_order)
            .ok_or_else(|| EngineError::Validation("drip first step missing".to_string()))?;

        let now = self.clock.now();
        let journey =
            CustomerJourney::new(SequenceRef::Drip(drip_id), customer_id, first_order, data, now);
        self.journeys.insert(&journey).await?;

        self.schedule
            .enqueue(&ScheduleEntry::new(
                journey.id,
                journey.sequence,
                customer_id,
                first_order,
                now + first_step.delay,
            ))
            .await?;

        info!(
            drip_id = %drip_id,
            customer_id = %customer_id,
            journey_id = %journey.id,
            "Drip journey started"
        );
        self.events.emit(make_event(
            EngineEventType::JourneyStarted,
            Some(drip_id),
            Some(journey.id),
            Some(customer_id.to_string()),
            None,
        ));
        Ok(journey.id)
    }

    // ─── Journey control ───────────────────────────────────────────────────

    pub async fn get_journey(
        &self,
        sequence: SequenceRef,
        customer_id: &str,
    ) -> EngineResult<CustomerJourney> {
        self.journeys
            .find(&sequence, customer_id)
            .await?
            .ok_or(EngineError::JourneyNotFound(sequence.id()))
    }

    pub async fn pause_journey(&self, journey_id: Uuid) -> EngineResult<()> {
        let mut journey = self.load_journey(journey_id).await?;
        journey.transition(JourneyStatus::Paused, self.clock.now())?;
        self.journeys.update(&journey).await?;
        // Pending entries are dropped; resume re-enters the schedule.
        self.schedule.cancel_journey(journey_id).await?;
        info!(journey_id = %journey_id, "Journey paused");
        self.events.emit(make_event(
            EngineEventType::JourneyPaused,
            Some(journey.sequence.id()),
            Some(journey_id),
            Some(journey.customer_id.clone()),
            None,
        ));
        Ok(())
    }

    /// Resume re-enters the scheduler at `current_step` using the
    /// journey's stored data bag, not the original trigger payload, so
    /// state accumulated before the pause survives.
    pub async fn resume_journey(&self, journey_id: Uuid) -> EngineResult<()> {
        let mut journey = self.load_journey(journey_id).await?;
        let now = self.clock.now();
        journey.transition(JourneyStatus::Active, now)?;

        let step = self.sequence_step(&journey.sequence, journey.current_step).await?;
        match step {
            Some(step) => {
                self.journeys.update(&journey).await?;
                self.schedule
                    .enqueue(&ScheduleEntry::new(
                        journey.id,
                        journey.sequence,
                        journey.customer_id.clone(),
                        journey.current_step,
                        now + step.delay,
                    ))
                    .await?;
            }
            None => {
                // Nothing left to run.
                journey.transition(JourneyStatus::Completed, now)?;
                self.journeys.update(&journey).await?;
            }
        }

        info!(journey_id = %journey_id, "Journey resumed");
        self.events.emit(make_event(
            EngineEventType::JourneyResumed,
            Some(journey.sequence.id()),
            Some(journey_id),
            Some(journey.customer_id.clone()),
            None,
        ));
        Ok(())
    }

    /// Terminal. Pending schedule entries are cancelled here, and the
    /// scheduler additionally re-checks journey status immediately before
    /// any dispatch, so an already-claimed entry cannot send either.
    pub async fn unsubscribe_journey(&self, journey_id: Uuid) -> EngineResult<()> {
        let mut journey = self.load_journey(journey_id).await?;
        journey.transition(JourneyStatus::Unsubscribed, self.clock.now())?;
        self.journeys.update(&journey).await?;
        self.schedule.cancel_journey(journey_id).await?;
        info!(journey_id = %journey_id, customer_id = %journey.customer_id, "Journey unsubscribed");
        self.events.emit(make_event(
            EngineEventType::JourneyUnsubscribed,
            Some(journey.sequence.id()),
            Some(journey_id),
            Some(journey.customer_id.clone()),
            None,
        ));
        Ok(())
    }

    // ─── Experiments ───────────────────────────────────────────────────────

    pub async fn register_ab_test(&self, test: AbTest) -> Uuid {
        self.experiments.register(test)
    }

    pub async fn declare_ab_winner(&self, test_id: Uuid) -> EngineResult<WinnerDecision> {
        self.experiments.declare_winner(test_id)
    }

    // ─── Engagement feedback ───────────────────────────────────────────────

    /// Fold delivery/engagement feedback into campaign stats and, when the
    /// step carries an A/B test, into the deterministic variant's counters.
    pub async fn record_engagement(
        &self,
        campaign_id: Uuid,
        customer_id: &str,
        step_id: Option<Uuid>,
        kind: EngagementKind,
        revenue: Option<f64>,
    ) -> EngineResult<()> {
        self.campaigns
            .increment_stat(campaign_id, kind.stat_field(), 1)
            .await?;
        if let Some(amount) = revenue {
            if kind == EngagementKind::Converted {
                self.campaigns.add_revenue(campaign_id, amount).await?;
            }
        }

        if let Some(step_id) = step_id {
            if let Some(test) = self.experiments.running_test_for_step(step_id) {
                let variant = self
                    .experiments
                    .assign(test.id, customer_id, test.split_ratio);
                self.experiments.record(test.id, variant, |results| match kind {
                    EngagementKind::Delivered => {}
                    EngagementKind::Opened => {}
                    EngagementKind::Clicked => results.clicked += 1,
                    EngagementKind::Converted => results.converted += 1,
                })?;
            }
        }
        Ok(())
    }

    // ─── Internals ─────────────────────────────────────────────────────────

    async fn load_journey(&self, journey_id: Uuid) -> EngineResult<CustomerJourney> {
        self.journeys
            .get(journey_id)
            .await?
            .ok_or(EngineError::JourneyNotFound(journey_id))
    }

    async fn sequence_step(
        &self,
        sequence: &SequenceRef,
        order: u32,
    ) -> EngineResult<Option<reach_campaigns::SequenceStep>> {
        Ok(match sequence {
            SequenceRef::Campaign(id) => self
                .campaigns
                .get_campaign(*id)
                .await?
                .ok_or(EngineError::CampaignNotFound(*id))?
                .step_at(order),
            SequenceRef::Drip(id) => self
                .campaigns
                .get_drip_campaign(*id)
                .await?
                .ok_or(EngineError::DripCampaignNotFound(*id))?
                .step_at(order),
        })
    }

    /// Put every stalled Active journey of a sequence back on the
    /// schedule (used when a paused campaign is resumed).
    async fn reschedule_sequence(&self, sequence: SequenceRef) -> EngineResult<usize> {
        let now = self.clock.now();
        let mut restored = 0usize;
        for journey in self
            .journeys
            .list_non_terminal_for_sequence(&sequence)
            .await?
        {
            if journey.status != JourneyStatus::Active
                || self.schedule.has_pending(journey.id).await?
            {
                continue;
            }
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
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use reach_audience::{Audience, AudienceResolver, CustomerProfile, InMemoryCustomerStore};
    use reach_campaigns::{CampaignType, Step, StepContent, StepType, Trigger};
    use reach_core::clock::{ManualClock, SystemClock};
    use reach_core::events::capture_sink;
    use reach_store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        customers: Arc<InMemoryCustomerStore>,
        service: CampaignService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let customers = Arc::new(InMemoryCustomerStore::new());
        for i in 0..3 {
            customers.upsert(CustomerProfile::new(format!("cust-{i}")));
        }
        let service = CampaignService::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(ExperimentRegistry::new()),
            AudienceResolver::new(customers.clone()),
            capture_sink(),
            Arc::new(SystemClock),
        );
        Fixture {
            store,
            customers,
            service,
        }
    }

    fn step(order: u32, delay_hours: u32) -> Step {
        Step {
            id: Uuid::new_v4(),
            order,
            step_type: StepType::Email,
            delay_hours,
            content: StepContent {
                template_id: "t".to_string(),
                subject: "Subject".to_string(),
                body: "Body".to_string(),
            },
            variables: Default::default(),
            conditions: None,
        }
    }

    fn campaign(audience: Audience, trigger: Trigger) -> Campaign {
        Campaign::new(
            "Test campaign",
            CampaignType::Email,
            trigger,
            vec![step(0, 0), step(1, 24)],
            audience,
        )
    }

    #[tokio::test]
    async fn test_manual_start_creates_one_journey_per_customer() {
        let f = fixture();
        let created = f
            .service
            .create_campaign(campaign(Audience::All { filters: None }, Trigger::manual()))
            .await
            .unwrap();

        let started = f.service.start_campaign(created.id).await.unwrap();
        assert_eq!(started.status, CampaignStatus::Active);

        for i in 0..3 {
            let journey = f
                .service
                .get_journey(SequenceRef::Campaign(created.id), &format!("cust-{i}"))
                .await
                .unwrap();
            assert_eq!(journey.status, JourneyStatus::Active);
            assert_eq!(journey.current_step, 0);
        }
        assert_eq!(f.store.pending_entries().len(), 3);
    }

    #[tokio::test]
    async fn test_audience_failure_aborts_start_entirely() {
        let f = fixture();
        let created = f
            .service
            .create_campaign(campaign(Audience::All { filters: None }, Trigger::manual()))
            .await
            .unwrap();

        f.customers.set_unreachable(true);
        let err = f.service.start_campaign(created.id).await.unwrap_err();
        assert!(matches!(err, EngineError::AudienceResolutionFailure(_)));

        // No partial start: still draft, zero journeys, zero schedule.
        let stored = f.service.get_campaign(created.id).await.unwrap();
        assert_eq!(stored.status, CampaignStatus::Draft);
        assert!(f.store.pending_entries().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_execute_rejected_and_original_untouched() {
        let f = fixture();
        let created = f
            .service
            .create_campaign(campaign(
                Audience::custom(["cust-0"]),
                Trigger::event(TriggerType::Purchase),
            ))
            .await
            .unwrap();
        f.service.start_campaign(created.id).await.unwrap();

        let mut data = serde_json::Map::new();
        data.insert("order_id".to_string(), serde_json::json!("ord-1"));
        let first = f
            .service
            .execute_campaign_for_customer(created.id, "cust-0", data.clone())
            .await
            .unwrap()
            .unwrap();

        let err = f
            .service
            .execute_campaign_for_customer(created.id, "cust-0", data)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DuplicateJourney { .. }));

        let journey = f
            .service
            .get_journey(SequenceRef::Campaign(created.id), "cust-0")
            .await
            .unwrap();
        assert_eq!(journey.id, first);
        assert_eq!(
            journey.data.get("order_id"),
            Some(&serde_json::json!("ord-1"))
        );
    }

    #[tokio::test]
    async fn test_trigger_conditions_gate_entry() {
        let f = fixture();
        let mut trigger = Trigger::event(TriggerType::Purchase);
        trigger.conditions = Some(
            serde_json::json!({"first_purchase": true})
                .as_object()
                .cloned()
                .unwrap(),
        );
        let created = f
            .service
            .create_campaign(campaign(Audience::custom(["cust-0"]), trigger))
            .await
            .unwrap();
        f.service.start_campaign(created.id).await.unwrap();

        let mut data = serde_json::Map::new();
        data.insert("first_purchase".to_string(), serde_json::json!(false));
        let outcome = f
            .service
            .execute_campaign_for_customer(created.id, "cust-0", data)
            .await
            .unwrap();
        assert!(outcome.is_none());

        let mut data = serde_json::Map::new();
        data.insert("first_purchase".to_string(), serde_json::json!(true));
        let outcome = f
            .service
            .execute_campaign_for_customer(created.id, "cust-0", data)
            .await
            .unwrap();
        assert!(outcome.is_some());
    }

    #[tokio::test]
    async fn test_pause_resume_journey_preserves_data() {
        let f = fixture();
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let service = CampaignService::new(
            f.store.clone(),
            f.store.clone(),
            f.store.clone(),
            Arc::new(ExperimentRegistry::new()),
            AudienceResolver::new(f.customers.clone()),
            capture_sink(),
            clock,
        );

        let created = service
            .create_campaign(campaign(
                Audience::custom(["cust-1"]),
                Trigger::event(TriggerType::Signup),
            ))
            .await
            .unwrap();
        service.start_campaign(created.id).await.unwrap();

        let mut data = serde_json::Map::new();
        data.insert("plan".to_string(), serde_json::json!("pro"));
        let journey_id = service
            .execute_campaign_for_customer(created.id, "cust-1", data)
            .await
            .unwrap()
            .unwrap();

        service.pause_journey(journey_id).await.unwrap();
        assert!(f.store.pending_entries().is_empty());
        let paused = f.store.get(journey_id).await.unwrap().unwrap();
        assert_eq!(paused.status, JourneyStatus::Paused);

        // Double pause is an invalid transition.
        let err = service.pause_journey(journey_id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        service.resume_journey(journey_id).await.unwrap();
        let resumed = f.store.get(journey_id).await.unwrap().unwrap();
        assert_eq!(resumed.status, JourneyStatus::Active);
        // Accumulated state survives the pause.
        assert_eq!(resumed.data.get("plan"), Some(&serde_json::json!("pro")));
        assert_eq!(f.store.pending_entries().len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_cancels_pending_work() {
        let f = fixture();
        let created = f
            .service
            .create_campaign(campaign(Audience::custom(["cust-2"]), Trigger::manual()))
            .await
            .unwrap();
        f.service.start_campaign(created.id).await.unwrap();

        let journey = f
            .service
            .get_journey(SequenceRef::Campaign(created.id), "cust-2")
            .await
            .unwrap();
        f.service.unsubscribe_journey(journey.id).await.unwrap();

        assert!(f.store.pending_entries().is_empty());
        let stored = f.store.get(journey.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JourneyStatus::Unsubscribed);

        // Terminal: resume is rejected.
        let err = f.service.resume_journey(journey.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_drip_journey_day_delays() {
        use reach_campaigns::DripStep;

        let f = fixture();
        let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
        let service = CampaignService::new(
            f.store.clone(),
            f.store.clone(),
            f.store.clone(),
            Arc::new(ExperimentRegistry::new()),
            AudienceResolver::new(f.customers.clone()),
            capture_sink(),
            clock.clone(),
        );

        let drip = DripCampaign::new(
            "Onboarding",
            "Day-delayed onboarding emails",
            vec![
                DripStep {
                    id: Uuid::new_v4(),
                    order: 0,
                    step_type: StepType::Email,
                    delay_days: 0,
                    content: StepContent {
                        template_id: "d0".to_string(),
                        subject: "Welcome".to_string(),
                        body: "Hi".to_string(),
                    },
                    variables: Default::default(),
                    conditions: None,
                },
                DripStep {
                    id: Uuid::new_v4(),
                    order: 1,
                    step_type: StepType::Email,
                    delay_days: 3,
                    content: StepContent {
                        template_id: "d1".to_string(),
                        subject: "Tips".to_string(),
                        body: "More".to_string(),
                    },
                    variables: Default::default(),
                    conditions: None,
                },
            ],
        );
        let drip = service.create_drip_campaign(drip).await.unwrap();
        service
            .start_drip_campaign(drip.id, "cust-0", serde_json::Map::new())
            .await
            .unwrap();

        let pending = f.store.pending_entries();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].fire_at, clock.now());

        // Deactivated drip campaigns reject new journeys.
        service.set_drip_active(drip.id, false).await.unwrap();
        let err = service
            .start_drip_campaign(drip.id, "cust-1", serde_json::Map::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_record_engagement_updates_stats_and_variants() {
        let f = fixture();
        let created = f
            .service
            .create_campaign(campaign(Audience::custom(["cust-0"]), Trigger::manual()))
            .await
            .unwrap();
        let step_id = created.steps[0].id;

        let test = reach_experiments::AbTest::new(
            step_id,
            "CTA test",
            reach_experiments::VariantContent {
                subject: "A".to_string(),
                body: "A".to_string(),
            },
            reach_experiments::VariantContent {
                subject: "B".to_string(),
                body: "B".to_string(),
            },
            0.5,
        );
        let test_id = f.service.register_ab_test(test).await;

        f.service
            .record_engagement(
                created.id,
                "cust-0",
                Some(step_id),
                EngagementKind::Clicked,
                None,
            )
            .await
            .unwrap();
        f.service
            .record_engagement(
                created.id,
                "cust-0",
                Some(step_id),
                EngagementKind::Converted,
                Some(49.99),
            )
            .await
            .unwrap();

        let stats = f.service.get_campaign_stats(created.id).await.unwrap();
        assert_eq!(stats.total_clicked, 1);
        assert_eq!(stats.total_converted, 1);
        assert!((stats.revenue - 49.99).abs() < f64::EPSILON);

        let experiments = f.service.experiments();
        let variant = experiments.assign(test_id, "cust-0", 0.5);
        let stored = experiments.get(test_id).unwrap();
        assert_eq!(stored.results_for(variant).clicked, 1);
        assert_eq!(stored.results_for(variant).converted, 1);
    }
}
