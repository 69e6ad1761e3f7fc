use std::future::Future;

use anyhow::{Context, Result};
use mongodb::options::ClientOptions;
use mongodb::{
    Client, Collection, Database as MongoDatabase,
    bson::{Document, doc, oid::ObjectId},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::config::Config;
use crate::data_models::KnowledgeEntry;

/// Collection names as constants for consistency
pub mod collections {
    pub const KNOWLEDGE: &str = "knowledge";
}

/// Main database wrapper providing connection management and collection access.
/// Constructed once at startup and handed to whatever needs it.
#[derive(Debug, Clone)]
pub struct Database {
    client: Client,
    db: MongoDatabase,
}

impl Database {
    /// Create a new Database instance with custom URI and database name.
    /// Useful for testing with a different database.
    pub async fn new(uri: &str, db_name: &str) -> Result<Self> {
        let client_options = ClientOptions::parse(uri)
            .await
            .context("Failed to parse MongoDB connection string")?;

        let client =
            Client::with_options(client_options).context("Failed to create MongoDB client")?;

        // Ping the database to verify connection
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .context("Failed to connect to MongoDB")?;

        log::info!("Connected to MongoDB database: {}", db_name);

        let db = client.database(db_name);

        Ok(Self { client, db })
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.mongo_uri, &config.mongo_db_name).await
    }

    /// Get a typed collection by name
    pub fn collection<T>(&self, name: &str) -> Collection<T>
    where
        T: Send + Sync,
    {
        self.db.collection(name)
    }

    /// Get the underlying MongoDB client (for advanced operations)
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn knowledge(&self) -> Collection<KnowledgeEntry> {
        self.collection(collections::KNOWLEDGE)
    }

    /// Closes the connection pool; call once when the service stops.
    pub async fn shutdown(self) {
        self.client.shutdown().await;
        log::info!("MongoDB connection closed");
    }
}

// =============================================================================
// Generic CRUD operations
// =============================================================================

pub struct Repository<T>
where
    T: Send + Sync,
{
    collection: Collection<T>,
}

impl<T> Repository<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    pub fn new(collection: Collection<T>) -> Self {
        Self { collection }
    }

    /// Insert a single document
    pub async fn insert(&self, doc: &T) -> Result<ObjectId> {
        let result = self
            .collection
            .insert_one(doc)
            .await
            .context("Failed to insert document")?;

        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| anyhow::anyhow!("Failed to get inserted ObjectId"))
    }

    /// Find a document by ObjectId
    pub async fn find_by_id(&self, id: ObjectId) -> Result<Option<T>> {
        let filter = doc! { "_id": id };
        self.collection
            .find_one(filter)
            .await
            .context("Failed to find document by id")
    }

    /// Find all documents matching a filter
    pub async fn find(&self, filter: Document) -> Result<Vec<T>> {
        use futures::TryStreamExt;

        let cursor = self
            .collection
            .find(filter)
            .await
            .context("Failed to execute find query")?;

        cursor
            .try_collect()
            .await
            .context("Failed to collect results")
    }
}

// =============================================================================
// Knowledge store
// =============================================================================

/// Where finished crawls are kept. Every scrape is a fresh insert.
pub trait KnowledgeStore: Send + Sync + 'static {
    fn insert(&self, entry: &KnowledgeEntry) -> impl Future<Output = Result<ObjectId>> + Send;

    fn find_by_id(
        &self,
        id: ObjectId,
    ) -> impl Future<Output = Result<Option<KnowledgeEntry>>> + Send;

    fn find_by_user(
        &self,
        user_id: &str,
    ) -> impl Future<Output = Result<Vec<KnowledgeEntry>>> + Send;
}

/// MongoDB-backed [`KnowledgeStore`] over the `knowledge` collection.
pub struct KnowledgeRepo {
    repo: Repository<KnowledgeEntry>,
}

impl KnowledgeRepo {
    pub fn new(db: &Database) -> Self {
        Self {
            repo: Repository::new(db.knowledge()),
        }
    }
}

impl KnowledgeStore for KnowledgeRepo {
    async fn insert(&self, entry: &KnowledgeEntry) -> Result<ObjectId> {
        let id = self.repo.insert(entry).await?;
        log::info!("Scraped data for {} stored as {}", entry.web_url, id);
        Ok(id)
    }

    async fn find_by_id(&self, id: ObjectId) -> Result<Option<KnowledgeEntry>> {
        self.repo.find_by_id(id).await
    }

    async fn find_by_user(&self, user_id: &str) -> Result<Vec<KnowledgeEntry>> {
        self.repo.find(doc! { "user_id": user_id }).await
    }
}

// =============================================================================
// Test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static TEST_DB_COUNTER: AtomicUsize = AtomicUsize::new(0);

    /// Create a unique test database name
    pub fn unique_test_db_name() -> String {
        let count = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
        let timestamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis();
        format!("site_ingest_test_{}_{}", timestamp, count)
    }

    /// Create a test database instance.
    /// Uses MONGO_URI from environment but creates a unique test database.
    pub async fn create_test_db() -> Result<(Database, String)> {
        dotenvy::dotenv().ok();
        let uri =
            std::env::var("MONGO_URI").unwrap_or_else(|_| "mongodb://localhost:27017".to_string());
        let db_name = unique_test_db_name();
        let db = Database::new(&uri, &db_name).await?;
        Ok((db, db_name))
    }

    /// Clean up a test database by dropping it
    pub async fn cleanup_test_db(db: &Database, db_name: &str) -> Result<()> {
        db.client()
            .database(db_name)
            .drop()
            .await
            .context("Failed to drop test database")?;
        Ok(())
    }
}
