use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which arm of a test a customer lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    A,
    B,
}

impl Variant {
    pub fn as_str(self) -> &'static str {
        match self {
            Variant::A => "A",
            Variant::B => "B",
        }
    }
}

/// Alternative content for one arm of a test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantContent {
    pub subject: String,
    pub body: String,
}

/// Per-arm delivery and engagement counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct VariantResults {
    pub delivered: u64,
    pub clicked: u64,
    pub converted: u64,
}

impl VariantResults {
    pub fn conversion_rate(&self) -> f64 {
        if self.delivered == 0 {
            0.0
        } else {
            self.converted as f64 / self.delivered as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbTestStatus {
    Running,
    Completed,
}

/// An A/B content experiment attached to a specific step (not the whole
/// campaign). Two variants, a split ratio, and — once completed and
/// significant — a declared winner with a confidence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTest {
    pub id: Uuid,
    /// The step whose content this test overrides.
    pub step_id: Uuid,
    pub name: String,
    pub variant_a: VariantContent,
    pub variant_b: VariantContent,
    /// Fraction of customers assigned to variant A, in [0, 1].
    pub split_ratio: f64,
    pub status: AbTestStatus,
    pub results_a: VariantResults,
    pub results_b: VariantResults,
    /// Minimum deliveries per arm before a winner can be declared.
    pub min_sample_size: u64,
    pub winner: Option<Variant>,
    pub confidence: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AbTest {
    pub fn new(
        step_id: Uuid,
        name: impl Into<String>,
        variant_a: VariantContent,
        variant_b: VariantContent,
        split_ratio: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            step_id,
            name: name.into(),
            variant_a,
            variant_b,
            split_ratio: split_ratio.clamp(0.0, 1.0),
            status: AbTestStatus::Running,
            results_a: VariantResults::default(),
            results_b: VariantResults::default(),
            min_sample_size: 30,
            winner: None,
            confidence: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn content_for(&self, variant: Variant) -> &VariantContent {
        match variant {
            Variant::A => &self.variant_a,
            Variant::B => &self.variant_b,
        }
    }

    pub fn results_for(&self, variant: Variant) -> VariantResults {
        match variant {
            Variant::A => self.results_a,
            Variant::B => self.results_b,
        }
    }
}

/// Outcome of a winner-declaration pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WinnerDecision {
    Winner { variant: Variant, confidence: f64 },
    /// Tie, insufficient samples, or no significant difference.
    Inconclusive { reason: String },
}
