use bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{AppError, AppResult};

pub const TITLES: &str = "titles";
pub const EPISODES: &str = "episodes";
pub const USERS: &str = "users";
pub const WATCH_RECORDS: &str = "watch_records";

/// Trait for document types that declare their own indexes
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// MongoDB client wrapper holding the application database handle
#[derive(Clone)]
pub struct MongoClient {
    db: Database,
}

impl MongoClient {
    /// Connects and verifies the connection with a ping
    pub async fn connect(uri: &str, db_name: &str) -> AppResult<Self> {
        // Bounded server selection so an unreachable Mongo fails fast
        let timeout_uri = if uri.contains('?') {
            format!("{uri}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000")
        } else {
            format!("{uri}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000")
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| AppError::Dependency(format!("MongoDB connect: {e}")))?;

        let db = client.database(db_name);
        db.run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| AppError::Dependency(format!("MongoDB ping: {e}")))?;

        tracing::info!(db = db_name, "Connected to MongoDB");

        Ok(Self { db })
    }

    /// Typed handle to a named collection
    pub fn collection<T>(&self, name: &str) -> Collection<T>
    where
        T: Serialize + DeserializeOwned + Send + Sync,
    {
        self.db.collection::<T>(name)
    }

    /// Creates the schema-declared indexes for `T`'s collection
    pub async fn apply_indexes<T>(&self, name: &str) -> AppResult<()>
    where
        T: Serialize + DeserializeOwned + Send + Sync + IntoIndexes,
    {
        let indices: Vec<IndexModel> = T::into_indices()
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        if indices.is_empty() {
            return Ok(());
        }

        self.collection::<T>(name)
            .create_indexes(indices)
            .await
            .map_err(|e| AppError::Dependency(format!("Index creation on {name}: {e}")))?;

        Ok(())
    }
}
