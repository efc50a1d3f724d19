use serde::{Deserialize, Serialize};

/// Declarative audience specification attached to a campaign.
///
/// An audience is a specification, not a materialized list: it is resolved
/// lazily at dispatch time so segment membership reflects current data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Audience {
    /// Every customer visible to the tenant.
    All {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filters: Option<AudienceFilters>,
    },
    /// A named segment stored in the external customer store.
    Segment {
        segment_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filters: Option<AudienceFilters>,
    },
    /// An explicit customer id list.
    Custom { customer_ids: Vec<String> },
}

impl Audience {
    pub fn custom<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Audience::Custom {
            customer_ids: ids.into_iter().map(Into::into).collect(),
        }
    }
}

/// Criteria narrowing an `All` or `Segment` audience.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudienceFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_orders: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_orders: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_spend: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_spend: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_order_within_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_reviewed: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl AudienceFilters {
    pub fn is_empty(&self) -> bool {
        self.min_orders.is_none()
            && self.max_orders.is_none()
            && self.min_spend.is_none()
            && self.max_spend.is_none()
            && self.last_order_within_days.is_none()
            && self.has_reviewed.is_none()
            && self.tags.is_empty()
    }
}
