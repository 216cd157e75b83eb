//! Prompt contracts for the two call tiers
//!
//! These are part of the wire contract: the JSON shapes promised here must
//! stay in sync with the types in `model`. Keep edits conservative — the
//! decisiveness instructions in the tier-2 prompt exist because the model
//! otherwise defaults nearly everything to "moderate".

/// Tier-1 pre-filter: minimal-cost binary classification.
pub const TIER1_PROMPT: &str = r#"Look at this image and decide whether it shows food or drink that a person is about to eat.

Return STRICT JSON, nothing else:
{
    "isFood": true | false,
    "confidence": "high" | "medium" | "low"
}

A plate, bowl, packaged snack, or beverage counts as food. Screenshots, documents, pets, scenery, and people without visible food do not."#;

/// Tier-2 detailed analysis: the decisive-classification contract.
pub const TIER2_PROMPT: &str = r#"Analyze this food image for a meal insights app.

GOAL: Classify the "Energy Density" relative to a standard adult meal.
CRITICAL INSTRUCTION: Be decisive. Do NOT default to "moderate".
- If it has obvious carbs, fats, or large portions -> HEAVY.
- If it is mostly veg/lean protein -> LIGHT.
- Only use MODERATE if it's a truly balanced, standard portion.

Return STRICT JSON:
{
    "mealType": "breakfast" | "lunch" | "dinner" | "snack",
    "energyBand": "very_light" (<300kcal) | "light" (300-500) | "moderate" (500-800) | "heavy" (800-1200) | "very_heavy" (>1200),
    "confidence": "high" (clear items) | "medium" (hidden ingredients) | "low" (cluttered/blurry),
    "reasoning": "Short (1 sentence) explanation. Focus on 'Why'. E.g. 'Fried dough and sugar glaze make this very energy dense.'",
    "flags": {
        "mixedPlate": boolean,
        "unclearPortions": boolean,
        "sharedDish": boolean
    },
    "insight": "One interesting observation about the macro balance. E.g. 'High sugar punch for breakfast.'"
}

Flag semantics: mixedPlate when several distinct dishes share the frame, unclearPortions when quantity cannot be judged, sharedDish when the portion is clearly meant for more than one person."#;
