use std::ops::Deref;

use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

use super::types::StoredObject;

/// Thin wrapper around the SurrealDB connection holding the metadata index.
#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connect, authenticate, and select the configured namespace/database.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let client = connect(address).await?;
        client.signin(Root { username, password }).await?;
        client.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client })
    }

    pub async fn ensure_initialized(&self) -> Result<(), Error> {
        self.build_indexes().await
    }

    pub async fn build_indexes(&self) -> Result<(), Error> {
        for statement in [
            "DEFINE INDEX idx_record_tenant ON ingestion_record FIELDS tenant_id",
            "DEFINE INDEX idx_record_status ON ingestion_record FIELDS status",
            "DEFINE INDEX idx_task_state ON ingestion_task FIELDS state",
            "DEFINE INDEX idx_task_scheduled ON ingestion_task FIELDS scheduled_at",
        ] {
            self.client.query(statement).await?;
        }

        Ok(())
    }

    /// Insert a new object; fails when the id is already taken.
    pub async fn store_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .create((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    /// Create-or-replace an object under its id. This is the keyed upsert
    /// the record writer relies on: re-running ingestion for the same key
    /// replaces the prior record instead of duplicating it.
    pub async fn upsert_item<T>(&self, item: T) -> Result<Option<T>, Error>
    where
        T: StoredObject + Send + Sync + 'static,
    {
        self.client
            .upsert((T::table_name(), item.get_id()))
            .content(item)
            .await
    }

    pub async fn get_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select((T::table_name(), id)).await
    }

    pub async fn get_all_stored_items<T>(&self) -> Result<Vec<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.select(T::table_name()).await
    }

    pub async fn delete_item<T>(&self, id: &str) -> Result<Option<T>, Error>
    where
        T: for<'de> StoredObject,
    {
        self.client.delete((T::table_name(), id)).await
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// In-memory engine for tests; callers isolate by picking a fresh
    /// database name per test.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let client = connect("mem://").await?;
        client.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client })
    }
}

#[cfg(test)]
mod tests {
    use crate::stored_object;

    use super::*;
    use uuid::Uuid;

    stored_object!(Dummy, "dummy", {
        name: String
    });

    fn dummy(id: &str, name: &str) -> Dummy {
        let now = Utc::now();
        Dummy {
            id: id.to_string(),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    async fn memory_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[tokio::test]
    async fn indexes_build_cleanly() {
        let db = memory_db().await;
        db.ensure_initialized()
            .await
            .expect("Failed to initialize schema");
    }

    #[tokio::test]
    async fn stored_items_round_trip() {
        let db = memory_db().await;
        let item = dummy("abc", "first");

        let stored = db.store_item(item.clone()).await.expect("Failed to store");
        assert!(stored.is_some());

        let fetched = db.get_item::<Dummy>("abc").await.expect("Failed to fetch");
        assert_eq!(fetched, Some(item.clone()));

        let all = db
            .get_all_stored_items::<Dummy>()
            .await
            .expect("Failed to fetch all");
        assert_eq!(all, vec![item]);
    }

    #[tokio::test]
    async fn deleted_items_are_gone() {
        let db = memory_db().await;
        db.store_item(dummy("abc", "doomed"))
            .await
            .expect("Failed to store");

        let deleted = db
            .delete_item::<Dummy>("abc")
            .await
            .expect("Failed to delete");
        assert!(deleted.is_some());

        let fetched = db
            .get_item::<Dummy>("abc")
            .await
            .expect("Failed fetch post delete");
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_instead_of_duplicating() {
        let db = memory_db().await;

        db.upsert_item(dummy("same-id", "original"))
            .await
            .expect("first upsert");
        db.upsert_item(dummy("same-id", "replacement"))
            .await
            .expect("second upsert");

        let all = db
            .get_all_stored_items::<Dummy>()
            .await
            .expect("Failed to fetch all");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "replacement");
    }
}
