//! Redis-backed durable store.
//!
//! Campaigns and journeys are JSON values under prefixed keys, campaign
//! counters are server-side `HINCRBY` fields, and the pending schedule is
//! a sorted set scored by fire time. Claiming an entry is `ZREM` — exactly
//! one worker wins a member, which is what makes duplicate timer fires
//! harmless.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::info;
use uuid::Uuid;

use reach_campaigns::{
    Campaign, CampaignStats, CampaignStatus, CampaignStore, DripCampaign, StatField,
};
use reach_core::config::RedisConfig;
use reach_core::error::{EngineError, EngineResult};
use reach_journey::{CustomerJourney, JourneyStore, SequenceRef};

use crate::schedule::{ScheduleEntry, ScheduleStore};

const SCHEDULE_KEY: &str = "schedule:due";
const NON_TERMINAL_KEY: &str = "journeys:non_terminal";
const CAMPAIGNS_KEY: &str = "campaigns:all";

fn store_err(e: redis::RedisError) -> EngineError {
    EngineError::Store(e.to_string())
}

pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect and verify reachability.
    pub async fn connect(config: &RedisConfig) -> EngineResult<Self> {
        info!(url = %config.url, "Connecting to Redis");
        let client = redis::Client::open(config.url.as_str()).map_err(store_err)?;
        let mut conn = ConnectionManager::new(client).await.map_err(store_err)?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        info!(response = %pong, "Redis connection established");

        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    fn campaign_key(id: Uuid) -> String {
        format!("campaign:{id}")
    }

    fn stats_key(id: Uuid) -> String {
        format!("campaign:stats:{id}")
    }

    fn drip_key(id: Uuid) -> String {
        format!("drip:{id}")
    }

    fn journey_key(id: Uuid) -> String {
        format!("journey:{id}")
    }

    fn current_key(sequence: &SequenceRef, customer_id: &str) -> String {
        format!("journey:current:{}:{customer_id}", sequence.key())
    }

    fn last_key(sequence: &SequenceRef, customer_id: &str) -> String {
        format!("journey:last:{}:{customer_id}", sequence.key())
    }

    fn journey_pending_key(journey_id: Uuid) -> String {
        format!("schedule:journey:{journey_id}")
    }

    async fn get_journey_by_id_key(&self, key: &str) -> EngineResult<Option<CustomerJourney>> {
        let mut conn = self.conn();
        let id: Option<String> = conn.get(key).await.map_err(store_err)?;
        let Some(id) = id else { return Ok(None) };
        let id = Uuid::parse_str(&id).map_err(|e| EngineError::Store(e.to_string()))?;
        self.get(id).await
    }
}

#[async_trait]
impl CampaignStore for RedisStore {
    async fn insert_campaign(&self, campaign: &Campaign) -> EngineResult<()> {
        let json = serde_json::to_string(campaign)?;
        let mut conn = self.conn();
        conn.set::<_, _, ()>(Self::campaign_key(campaign.id), json)
            .await
            .map_err(store_err)?;
        conn.sadd::<_, _, ()>(CAMPAIGNS_KEY, campaign.id.to_string())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get_campaign(&self, id: Uuid) -> EngineResult<Option<Campaign>> {
        let mut conn = self.conn();
        let json: Option<String> = conn
            .get(Self::campaign_key(id))
            .await
            .map_err(store_err)?;
        let Some(json) = json else { return Ok(None) };
        let mut campaign: Campaign = serde_json::from_str(&json)?;
        // Counters live in the stats hash; the JSON copy is stale by design.
        if let Some(stats) = self.get_stats(id).await? {
            campaign.stats = stats;
        }
        Ok(Some(campaign))
    }

    async fn list_campaigns(&self) -> EngineResult<Vec<Campaign>> {
        let mut conn = self.conn();
        let ids: Vec<String> = conn.smembers(CAMPAIGNS_KEY).await.map_err(store_err)?;
        let mut campaigns = Vec::with_capacity(ids.len());
        for id in ids {
            let id = Uuid::parse_str(&id).map_err(|e| EngineError::Store(e.to_string()))?;
            if let Some(campaign) = self.get_campaign(id).await? {
                campaigns.push(campaign);
            }
        }
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns)
    }

    async fn update_campaign_status(&self, id: Uuid, status: CampaignStatus) -> EngineResult<()> {
        let mut campaign = self
            .get_campaign(id)
            .await?
            .ok_or(EngineError::CampaignNotFound(id))?;
        campaign.status = status;
        campaign.updated_at = Utc::now();
        let json = serde_json::to_string(&campaign)?;
        let mut conn = self.conn();
        conn.set::<_, _, ()>(Self::campaign_key(id), json)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn insert_drip_campaign(&self, drip: &DripCampaign) -> EngineResult<()> {
        let json = serde_json::to_string(drip)?;
        let mut conn = self.conn();
        conn.set::<_, _, ()>(Self::drip_key(drip.id), json)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get_drip_campaign(&self, id: Uuid) -> EngineResult<Option<DripCampaign>> {
        let mut conn = self.conn();
        let json: Option<String> = conn.get(Self::drip_key(id)).await.map_err(store_err)?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set_drip_active(&self, id: Uuid, is_active: bool) -> EngineResult<()> {
        let mut drip = self
            .get_drip_campaign(id)
            .await?
            .ok_or(EngineError::DripCampaignNotFound(id))?;
        drip.is_active = is_active;
        drip.updated_at = Utc::now();
        let json = serde_json::to_string(&drip)?;
        let mut conn = self.conn();
        conn.set::<_, _, ()>(Self::drip_key(id), json)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn increment_stat(&self, id: Uuid, field: StatField, delta: u64) -> EngineResult<()> {
        let mut conn = self.conn();
        conn.hincr::<_, _, _, i64>(Self::stats_key(id), field.as_str(), delta as i64)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn add_revenue(&self, id: Uuid, amount: f64) -> EngineResult<()> {
        let mut conn = self.conn();
        redis::cmd("HINCRBYFLOAT")
            .arg(Self::stats_key(id))
            .arg("revenue")
            .arg(amount)
            .query_async::<_, f64>(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get_stats(&self, id: Uuid) -> EngineResult<Option<CampaignStats>> {
        let mut conn = self.conn();
        let exists: bool = conn
            .exists(Self::campaign_key(id))
            .await
            .map_err(store_err)?;
        if !exists {
            return Ok(None);
        }

        let fields: std::collections::HashMap<String, String> = conn
            .hgetall(Self::stats_key(id))
            .await
            .map_err(store_err)?;
        let counter = |name: &str| {
            fields
                .get(name)
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0)
        };
        Ok(Some(CampaignStats {
            total_sent: counter("total_sent"),
            total_delivered: counter("total_delivered"),
            total_opened: counter("total_opened"),
            total_clicked: counter("total_clicked"),
            total_converted: counter("total_converted"),
            revenue: fields
                .get("revenue")
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(0.0),
        }))
    }
}

#[async_trait]
impl JourneyStore for RedisStore {
    async fn insert(&self, journey: &CustomerJourney) -> EngineResult<()> {
        let mut conn = self.conn();
        let current_key = Self::current_key(&journey.sequence, &journey.customer_id);

        // The current-journey key exists only while a non-terminal journey
        // does, so NX doubles as the duplicate check.
        let created: bool = conn
            .set_nx(&current_key, journey.id.to_string())
            .await
            .map_err(store_err)?;
        if !created {
            return Err(EngineError::DuplicateJourney {
                sequence_id: journey.sequence.id(),
                customer_id: journey.customer_id.clone(),
            });
        }

        let json = serde_json::to_string(journey)?;
        conn.set::<_, _, ()>(Self::journey_key(journey.id), json)
            .await
            .map_err(store_err)?;
        conn.set::<_, _, ()>(
            Self::last_key(&journey.sequence, &journey.customer_id),
            journey.id.to_string(),
        )
        .await
        .map_err(store_err)?;
        conn.sadd::<_, _, ()>(NON_TERMINAL_KEY, journey.id.to_string())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> EngineResult<Option<CustomerJourney>> {
        let mut conn = self.conn();
        let json: Option<String> = conn
            .get(Self::journey_key(id))
            .await
            .map_err(store_err)?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn find(
        &self,
        sequence: &SequenceRef,
        customer_id: &str,
    ) -> EngineResult<Option<CustomerJourney>> {
        if let Some(journey) = self
            .get_journey_by_id_key(&Self::current_key(sequence, customer_id))
            .await?
        {
            return Ok(Some(journey));
        }
        self.get_journey_by_id_key(&Self::last_key(sequence, customer_id))
            .await
    }

    async fn update(&self, journey: &CustomerJourney) -> EngineResult<()> {
        let mut conn = self.conn();
        let key = Self::journey_key(journey.id);
        let exists: bool = conn.exists(&key).await.map_err(store_err)?;
        if !exists {
            return Err(EngineError::JourneyNotFound(journey.id));
        }

        let json = serde_json::to_string(journey)?;
        conn.set::<_, _, ()>(&key, json).await.map_err(store_err)?;

        if journey.status.is_terminal() {
            let current_key = Self::current_key(&journey.sequence, &journey.customer_id);
            let current: Option<String> = conn.get(&current_key).await.map_err(store_err)?;
            if current.as_deref() == Some(journey.id.to_string().as_str()) {
                conn.del::<_, ()>(&current_key).await.map_err(store_err)?;
            }
            conn.srem::<_, _, ()>(NON_TERMINAL_KEY, journey.id.to_string())
                .await
                .map_err(store_err)?;
        }
        Ok(())
    }

    async fn list_non_terminal(&self) -> EngineResult<Vec<CustomerJourney>> {
        let mut conn = self.conn();
        let ids: Vec<String> = conn.smembers(NON_TERMINAL_KEY).await.map_err(store_err)?;
        let mut journeys = Vec::with_capacity(ids.len());
        for id in ids {
            let id = Uuid::parse_str(&id).map_err(|e| EngineError::Store(e.to_string()))?;
            if let Some(journey) = self.get(id).await? {
                if !journey.status.is_terminal() {
                    journeys.push(journey);
                }
            }
        }
        Ok(journeys)
    }

    async fn list_non_terminal_for_sequence(
        &self,
        sequence: &SequenceRef,
    ) -> EngineResult<Vec<CustomerJourney>> {
        Ok(self
            .list_non_terminal()
            .await?
            .into_iter()
            .filter(|j| j.sequence == *sequence)
            .collect())
    }
}

#[async_trait]
impl ScheduleStore for RedisStore {
    async fn enqueue(&self, entry: &ScheduleEntry) -> EngineResult<()> {
        let member = serde_json::to_string(entry)?;
        let score = entry.fire_at.timestamp_millis() as f64;
        let mut conn = self.conn();
        conn.zadd::<_, _, _, ()>(SCHEDULE_KEY, &member, score)
            .await
            .map_err(store_err)?;
        conn.sadd::<_, _, ()>(Self::journey_pending_key(entry.journey_id), &member)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> EngineResult<Vec<ScheduleEntry>> {
        let mut conn = self.conn();
        let max_score = now.timestamp_millis() as f64;
        let members: Vec<String> = conn
            .zrangebyscore_limit(SCHEDULE_KEY, "-inf", max_score, 0, limit as isize)
            .await
            .map_err(store_err)?;

        let mut claimed = Vec::with_capacity(members.len());
        for member in members {
            // ZREM returns 1 for exactly one caller per member: the claim.
            let removed: i64 = conn
                .zrem(SCHEDULE_KEY, &member)
                .await
                .map_err(store_err)?;
            if removed != 1 {
                continue;
            }
            let entry: ScheduleEntry = serde_json::from_str(&member)?;
            conn.srem::<_, _, ()>(Self::journey_pending_key(entry.journey_id), &member)
                .await
                .map_err(store_err)?;
            claimed.push(entry);
        }
        Ok(claimed)
    }

    async fn cancel_journey(&self, journey_id: Uuid) -> EngineResult<usize> {
        let mut conn = self.conn();
        let pending_key = Self::journey_pending_key(journey_id);
        let members: Vec<String> = conn.smembers(&pending_key).await.map_err(store_err)?;
        let mut removed = 0usize;
        for member in &members {
            let n: i64 = conn.zrem(SCHEDULE_KEY, member).await.map_err(store_err)?;
            removed += n as usize;
        }
        conn.del::<_, ()>(&pending_key).await.map_err(store_err)?;
        Ok(removed)
    }

    async fn has_pending(&self, journey_id: Uuid) -> EngineResult<bool> {
        let mut conn = self.conn();
        let count: i64 = conn
            .scard(Self::journey_pending_key(journey_id))
            .await
            .map_err(store_err)?;
        Ok(count > 0)
    }
}
