//! Meal persistence collaborator interface
//!
//! The resilience core hands a finished `AnalysisResult` to this seam and
//! otherwise stays out of storage. Entries freeze on save: the analysis
//! never mutates afterwards, only optional user feedback does. Photo files
//! themselves (moves, deletes) are managed by the platform layer; the store
//! keeps paths only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;
use vision::AnalysisResult;

use crate::store::{Result, StateStore};

const STORE_KEY: &str = "meals";

/// Local calibration feedback on a stored analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserFeedback {
    TooLight,
    TooHeavy,
    Accurate,
}

/// One logged meal: a frozen analysis plus its photo reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MealEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    /// Local path only; the photo never leaves the device.
    pub photo_path: String,
    pub result: AnalysisResult,
    pub user_feedback: Option<UserFeedback>,
    pub frozen: bool,
}

/// Storage operations the core consumes. Implementations own ordering
/// (newest first) and durability.
pub trait MealStore: Send + Sync {
    fn save_meal(
        &self,
        result: AnalysisResult,
        photo_path: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<MealEntry>> + Send;

    fn all_meals(&self) -> impl Future<Output = Result<Vec<MealEntry>>> + Send;

    fn meal_by_id(&self, id: Uuid) -> impl Future<Output = Result<Option<MealEntry>>> + Send;

    fn delete_meal(&self, id: Uuid) -> impl Future<Output = Result<()>> + Send;

    fn clear_all(&self) -> impl Future<Output = Result<()>> + Send;
}

/// File-backed store: the whole list is one JSON document, overwritten
/// atomically on every mutation.
pub struct JsonMealStore {
    store: StateStore,
    state: Mutex<Vec<MealEntry>>,
}

impl JsonMealStore {
    /// Load existing entries, or start empty on cold start.
    pub async fn load(store: StateStore) -> Result<Self> {
        let entries = store
            .load::<Vec<MealEntry>>(STORE_KEY)
            .await?
            .unwrap_or_default();
        debug!(meals = entries.len(), "loaded meal store");
        Ok(Self {
            store,
            state: Mutex::new(entries),
        })
    }
}

impl MealStore for JsonMealStore {
    async fn save_meal(
        &self,
        result: AnalysisResult,
        photo_path: &str,
        at: DateTime<Utc>,
    ) -> Result<MealEntry> {
        let entry = MealEntry {
            id: Uuid::new_v4(),
            created_at: at,
            photo_path: photo_path.to_string(),
            result,
            user_feedback: None,
            frozen: true,
        };

        let mut entries = self.state.lock().await;
        entries.insert(0, entry.clone());
        self.store.save(STORE_KEY, &*entries).await?;
        debug!(id = %entry.id, "saved meal entry");
        Ok(entry)
    }

    async fn all_meals(&self) -> Result<Vec<MealEntry>> {
        Ok(self.state.lock().await.clone())
    }

    async fn meal_by_id(&self, id: Uuid) -> Result<Option<MealEntry>> {
        let entries = self.state.lock().await;
        Ok(entries.iter().find(|m| m.id == id).cloned())
    }

    async fn delete_meal(&self, id: Uuid) -> Result<()> {
        let mut entries = self.state.lock().await;
        let before = entries.len();
        entries.retain(|m| m.id != id);
        if entries.len() != before {
            self.store.save(STORE_KEY, &*entries).await?;
            debug!(%id, "deleted meal entry");
        }
        Ok(())
    }

    async fn clear_all(&self) -> Result<()> {
        let mut entries = self.state.lock().await;
        entries.clear();
        self.store.save(STORE_KEY, &*entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision::{AnalysisFlags, Confidence, EnergyBand, MealType};

    fn result(reasoning: &str) -> AnalysisResult {
        AnalysisResult {
            meal_type: MealType::Dinner,
            energy_band: EnergyBand::Moderate,
            confidence: Confidence::High,
            reasoning: reasoning.into(),
            flags: AnalysisFlags::default(),
            insight: "Standard plate.".into(),
        }
    }

    async fn meal_store(dir: &tempfile::TempDir) -> JsonMealStore {
        let store = StateStore::open(dir.path()).await.unwrap();
        JsonMealStore::load(store).await.unwrap()
    }

    #[tokio::test]
    async fn save_freezes_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let meals = meal_store(&dir).await;

        let saved = meals
            .save_meal(result("rice bowl"), "/photos/a.jpg", Utc::now())
            .await
            .unwrap();
        assert!(saved.frozen);
        assert!(saved.user_feedback.is_none());

        // Reload from disk into a new instance
        let meals2 = meal_store(&dir).await;
        let all = meals2.all_meals().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, saved.id);
        assert_eq!(all[0].result.reasoning, "rice bowl");
    }

    #[tokio::test]
    async fn newest_entry_comes_first() {
        let dir = tempfile::tempdir().unwrap();
        let meals = meal_store(&dir).await;

        meals
            .save_meal(result("first"), "/photos/1.jpg", Utc::now())
            .await
            .unwrap();
        meals
            .save_meal(result("second"), "/photos/2.jpg", Utc::now())
            .await
            .unwrap();

        let all = meals.all_meals().await.unwrap();
        assert_eq!(all[0].result.reasoning, "second");
        assert_eq!(all[1].result.reasoning, "first");
    }

    #[tokio::test]
    async fn meal_by_id_finds_and_misses() {
        let dir = tempfile::tempdir().unwrap();
        let meals = meal_store(&dir).await;

        let saved = meals
            .save_meal(result("soup"), "/photos/s.jpg", Utc::now())
            .await
            .unwrap();

        let found = meals.meal_by_id(saved.id).await.unwrap();
        assert_eq!(found.unwrap().result.reasoning, "soup");

        let missing = meals.meal_by_id(Uuid::new_v4()).await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn delete_removes_only_the_target() {
        let dir = tempfile::tempdir().unwrap();
        let meals = meal_store(&dir).await;

        let keep = meals
            .save_meal(result("keep"), "/photos/k.jpg", Utc::now())
            .await
            .unwrap();
        let drop = meals
            .save_meal(result("drop"), "/photos/d.jpg", Utc::now())
            .await
            .unwrap();

        meals.delete_meal(drop.id).await.unwrap();
        // Deleting a missing id is a no-op
        meals.delete_meal(drop.id).await.unwrap();

        let all = meals.all_meals().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, keep.id);
    }

    #[tokio::test]
    async fn clear_all_empties_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let meals = meal_store(&dir).await;

        meals
            .save_meal(result("a"), "/photos/a.jpg", Utc::now())
            .await
            .unwrap();
        meals
            .save_meal(result("b"), "/photos/b.jpg", Utc::now())
            .await
            .unwrap();

        meals.clear_all().await.unwrap();
        assert!(meals.all_meals().await.unwrap().is_empty());

        // Cleared state persists
        let meals2 = meal_store(&dir).await;
        assert!(meals2.all_meals().await.unwrap().is_empty());
    }
}
