//! Wire and domain types shared by both tiers
//!
//! Field names serialize camelCase to match the relay contract and the
//! provider prompt contracts. All enums are closed sets; an out-of-range
//! value in a response is a parse error, never a silent default.

use serde::{Deserialize, Serialize};

/// Coarse meal slot classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MealType {
    Breakfast,
    Lunch,
    Dinner,
    Snack,
}

/// Five-level caloric density band, used instead of precise calorie counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyBand {
    VeryLight,
    Light,
    Moderate,
    Heavy,
    VeryHeavy,
}

impl EnergyBand {
    /// Human-readable label for logs and summaries.
    pub fn label(&self) -> &'static str {
        match self {
            EnergyBand::VeryLight => "Very Light",
            EnergyBand::Light => "Light",
            EnergyBand::Moderate => "Moderate",
            EnergyBand::Heavy => "Heavy",
            EnergyBand::VeryHeavy => "Very Heavy",
        }
    }
}

/// Model self-reported confidence in the classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

/// Analysis-quality flags the model is asked to set explicitly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisFlags {
    pub mixed_plate: bool,
    pub unclear_portions: bool,
    pub shared_dish: bool,
}

/// The full tier-2 classification of one meal photo.
///
/// Produced once per successful analysis and immutable thereafter; the meal
/// store freezes it into a stored entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub meal_type: MealType,
    pub energy_band: EnergyBand,
    pub confidence: Confidence,
    /// One-sentence explanation of the band choice.
    pub reasoning: String,
    pub flags: AnalysisFlags,
    /// One observation about the macro balance.
    pub insight: String,
}

/// Tier-1 verdict: is the photo food at all?
///
/// A negative verdict is a valid classification, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tier1Verdict {
    pub is_food: bool,
    pub confidence: Confidence,
}

/// An image ready for the wire: base64 data plus its mime type.
///
/// Resizing/compression happens upstream of this crate; callers hand over
/// already-processed bytes encoded as base64.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub data: String,
    pub mime_type: String,
}

impl ImagePayload {
    /// Payload for an already-encoded JPEG.
    pub fn jpeg(data: String) -> Self {
        Self {
            data,
            mime_type: "image/jpeg".into(),
        }
    }
}
