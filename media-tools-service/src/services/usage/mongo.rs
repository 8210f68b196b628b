//! MongoDB-backed usage records: collection `usage`, one document per user.

use super::{StoreError, UsageStore};
use crate::models::{ConsumeOutcome, UsageRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, DateTime as BsonDateTime, Document},
    options::{FindOneAndUpdateOptions, IndexOptions, ReturnDocument, UpdateOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const BACKEND: &str = "mongodb";
const COLLECTION: &str = "usage";

#[derive(Debug, Serialize, Deserialize)]
struct UsageDocument {
    user_id: String,
    generations: i64,
    last_reset: BsonDateTime,
    /// Written by the atomic increment pipeline; tells the caller whether its
    /// own increment was applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_accepted: Option<bool>,
}

impl From<UsageDocument> for UsageRecord {
    fn from(doc: UsageDocument) -> Self {
        UsageRecord {
            user_id: doc.user_id,
            generations: doc.generations.clamp(0, i64::from(u32::MAX)) as u32,
            last_reset: doc.last_reset.to_chrono(),
        }
    }
}

#[derive(Clone)]
pub struct MongoUsageStore {
    client: MongoClient,
    db: Database,
}

impl MongoUsageStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        tracing::info!(database = %database, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            StoreError::new(BACKEND, "connect", e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Successfully connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), StoreError> {
        let user_id_index = IndexModel::builder()
            .keys(doc! { "user_id": 1 })
            .options(
                IndexOptions::builder()
                    .name("user_id_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();

        self.usage()
            .create_index(user_id_index, None)
            .await
            .map_err(|e| {
                tracing::error!("Failed to create user_id index: {}", e);
                StoreError::new(BACKEND, "create_index", e)
            })?;

        tracing::info!("Usage collection indexes ready");
        Ok(())
    }

    fn usage(&self) -> Collection<UsageDocument> {
        self.db.collection(COLLECTION)
    }
}

/// Aggregation-pipeline update performing the whole check-and-increment
/// server side, so concurrent callers serialize on the document.
fn increment_pipeline(now: DateTime<Utc>, window: Duration, limit: u32) -> Vec<Document> {
    let now = BsonDateTime::from_chrono(now);
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    let limit = i64::from(limit);

    vec![
        doc! {
            "$set": {
                "_expired": {
                    "$or": [
                        { "$eq": [ { "$type": "$last_reset" }, "missing" ] },
                        { "$gte": [ { "$subtract": [ now, "$last_reset" ] }, window_ms ] }
                    ]
                }
            }
        },
        doc! {
            "$set": {
                "last_accepted": {
                    "$or": [ "$_expired", { "$lt": [ "$generations", limit ] } ]
                },
                "generations": {
                    "$cond": [
                        "$_expired",
                        1_i64,
                        {
                            "$cond": [
                                { "$lt": [ "$generations", limit ] },
                                { "$add": [ "$generations", 1_i64 ] },
                                "$generations"
                            ]
                        }
                    ]
                },
                "last_reset": { "$cond": [ "$_expired", now, "$last_reset" ] }
            }
        },
        doc! { "$unset": "_expired" },
    ]
}

#[async_trait]
impl UsageStore for MongoUsageStore {
    async fn get(&self, user_id: &str) -> Result<Option<UsageRecord>, StoreError> {
        let doc = self
            .usage()
            .find_one(doc! { "user_id": user_id }, None)
            .await
            .map_err(|e| StoreError::new(BACKEND, "find_one", e))?;
        Ok(doc.map(UsageRecord::from))
    }

    async fn put(&self, record: &UsageRecord) -> Result<(), StoreError> {
        let options = UpdateOptions::builder().upsert(true).build();
        self.usage()
            .update_one(
                doc! { "user_id": record.user_id.as_str() },
                doc! {
                    "$set": {
                        "generations": i64::from(record.generations),
                        "last_reset": BsonDateTime::from_chrono(record.last_reset)
                    }
                },
                options,
            )
            .await
            .map_err(|e| StoreError::new(BACKEND, "update_one", e))?;
        Ok(())
    }

    async fn atomic_increment(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        window: Duration,
        limit: u32,
    ) -> Result<ConsumeOutcome, StoreError> {
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let doc = self
            .usage()
            .find_one_and_update(
                doc! { "user_id": user_id },
                increment_pipeline(now, window, limit),
                options,
            )
            .await
            .map_err(|e| StoreError::new(BACKEND, "find_one_and_update", e))?
            .ok_or_else(|| {
                StoreError::new(BACKEND, "find_one_and_update", "upsert returned no document")
            })?;

        let accepted = doc.last_accepted.unwrap_or(false);
        Ok(ConsumeOutcome {
            accepted,
            record: doc.into(),
        })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                StoreError::new(BACKEND, "ping", e)
            })?;
        Ok(())
    }
}
