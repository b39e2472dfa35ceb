//! Document sources: the MongoDB reader and the trait the tail loop drives.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bson::{doc, Document};
use futures::stream::BoxStream;
use futures::StreamExt;
use mongodb::options::ClientOptions;
use mongodb::{Client as MongoClient, Database};

use crate::config::SourceOpts;
use crate::cursor::Cursor;

/// Read access to a database of append-mostly collections.
///
/// Implemented by [`MongoSource`] and by the in-memory
/// [`crate::testing::MemorySource`].
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Names of every collection in the database.
    async fn list_collection_names(&self) -> Result<Vec<String>>;

    /// Oldest ObjectId `_id`, or `None` when no document has one.
    ///
    /// Documents with other `_id` types are never tailed and must not fail
    /// the lookup.
    async fn oldest_document_id(&self, collection: &str) -> Result<Option<Cursor>>;

    /// At most `limit` documents with `_id` strictly greater than `after`,
    /// ascending by `_id`. With `after == None` reading starts at the
    /// beginning of the collection. An empty stream is a normal outcome.
    async fn fetch_batch(
        &self,
        collection: &str,
        after: Option<Cursor>,
        limit: usize,
    ) -> Result<BoxStream<'static, Result<Document>>>;
}

/// MongoDB-backed [`DocumentSource`].
pub struct MongoSource {
    client: MongoClient,
    database: Database,
}

impl MongoSource {
    /// Connect using `opts.source_uri`.
    ///
    /// The database is `opts.source_database` when set, otherwise the
    /// default database of the URI.
    pub async fn connect(opts: &SourceOpts) -> Result<Self> {
        tracing::debug!("Parsing MongoDB connection options");
        let mut mongo_options = ClientOptions::parse(&opts.source_uri)
            .await
            .context("Failed to parse MongoDB connection options")?;
        // Add connection timeout to prevent hanging
        mongo_options.connect_timeout = Some(Duration::from_secs(10));
        mongo_options.server_selection_timeout = Some(Duration::from_secs(10));

        let database_name = opts
            .source_database
            .clone()
            .or_else(|| mongo_options.default_database.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "MongoDB database name is required: put it in the URI path or set --database"
                )
            })?;

        let client = MongoClient::with_options(mongo_options)?;
        let database = client.database(&database_name);
        tracing::info!("Using MongoDB database: {}", database_name);

        Ok(Self { client, database })
    }

    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    /// Round-trip to the server so connection problems surface at startup.
    pub async fn ping(&self) -> Result<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .with_context(|| format!("Failed to reach MongoDB database {}", self.database_name()))?;
        Ok(())
    }

    pub fn client(&self) -> &MongoClient {
        &self.client
    }
}

/// Matches documents whose `_id` is an ObjectId.
///
/// Other `_id` types sort before ObjectIds, so the oldest-id lookup must
/// exclude them to find the first tailable document.
fn object_id_filter() -> Document {
    doc! { "_id": { "$type": "objectId" } }
}

#[async_trait]
impl DocumentSource for MongoSource {
    async fn list_collection_names(&self) -> Result<Vec<String>> {
        let names = self
            .database
            .list_collection_names()
            .await
            .with_context(|| format!("Failed to list collections of {}", self.database_name()))?;
        tracing::debug!("Collections: {:?}", names);
        Ok(names)
    }

    async fn oldest_document_id(&self, collection: &str) -> Result<Option<Cursor>> {
        let first = self
            .database
            .collection::<Document>(collection)
            .find_one(object_id_filter())
            .sort(doc! { "_id": 1 })
            .projection(doc! { "_id": 1 })
            .await
            .with_context(|| format!("Failed to read the oldest document of {collection}"))?;

        match first {
            Some(doc) => {
                let oid = doc.get_object_id("_id").with_context(|| {
                    format!("Oldest document of {collection} has no ObjectId _id")
                })?;
                Ok(Some(Cursor::new(oid)))
            }
            None => Ok(None),
        }
    }

    async fn fetch_batch(
        &self,
        collection: &str,
        after: Option<Cursor>,
        limit: usize,
    ) -> Result<BoxStream<'static, Result<Document>>> {
        let filter = match after {
            Some(cursor) => doc! { "_id": { "$gt": cursor.object_id() } },
            None => doc! {},
        };
        tracing::trace!(collection = %collection, filter = %filter, "Fetching batch");

        let cursor = self
            .database
            .collection::<Document>(collection)
            .find(filter)
            .sort(doc! { "_id": 1 })
            .limit(i64::try_from(limit).unwrap_or(i64::MAX))
            .batch_size(u32::try_from(limit).unwrap_or(u32::MAX))
            .await
            .with_context(|| format!("Failed to query collection {collection}"))?;

        Ok(cursor.map(|doc| doc.map_err(anyhow::Error::from)).boxed())
    }
}
