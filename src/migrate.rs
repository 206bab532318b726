use std::collections::HashSet;

use bson::oid::ObjectId;
use mongodb::{options::IndexOptions, IndexModel};
use serde::{Deserialize, Serialize};

use crate::{app::AppState, error::Error, mongo_ext::Collection};

#[derive(Serialize, Deserialize)]
pub struct MigrateModel {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub version: i64,
    pub applied_at: bson::DateTime,
}

#[derive(Clone)]
pub struct MigrationCollection(pub Collection<MigrateModel>);

impl std::ops::Deref for MigrationCollection {
    type Target = Collection<MigrateModel>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MigrationCollection {
    pub async fn insert_version(&self, version: i64) -> Result<(), Error> {
        self.insert_one(
            MigrateModel {
                id: ObjectId::new(),
                version,
                applied_at: bson::DateTime::now(),
            },
            None,
        )
        .await
        .map(|_| ())
        .map_err(Into::into)
    }
}

fn unique(keys: bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

fn unique_sparse(keys: bson::Document) -> IndexModel {
    IndexModel::builder()
        .keys(keys)
        .options(IndexOptions::builder().unique(true).sparse(true).build())
        .build()
}

impl AppState {
    async fn v1_migrate(&self) -> Result<(), Error> {
        self.migrate_collection
            .create_index(unique(bson::doc! { "version": 1 }), None)
            .await?;

        self.user_collection
            .create_index(unique(bson::doc! { "email": 1 }), None)
            .await?;

        // one member profile per user
        self.member_collection
            .create_index(unique(bson::doc! { "userId": 1 }), None)
            .await?;

        self.equipment_collection
            .create_index(unique_sparse(bson::doc! { "serialNumber": 1 }), None)
            .await?;

        self.payment_collection
            .create_index(unique_sparse(bson::doc! { "receiptNumber": 1 }), None)
            .await?;

        self.payment_collection
            .create_index(unique_sparse(bson::doc! { "transactionId": 1 }), None)
            .await?;

        Ok(())
    }

    async fn get_all_migration(&self) -> Result<Vec<MigrateModel>, Error> {
        self.migrate_collection.find_all(None, None).await
    }

    /// Applies every migration version that has not been recorded yet.
    ///
    /// Index creation is idempotent, so a crash between a migration and its record is
    /// repaired by the next run.
    pub async fn run_migration(&self) -> Result<(), Error> {
        let migration: HashSet<i64> = self
            .get_all_migration()
            .await?
            .into_iter()
            .map(|it| it.version)
            .collect();

        macro_rules! migrate {
            ($version:expr, $fun:ident) => {
                if !migration.contains(&$version) {
                    tracing::debug!("running migration version {}", $version);
                    self.$fun().await?;
                    self.migrate_collection.insert_version($version).await?;
                }
            };
        }

        migrate!(1, v1_migrate);

        Ok(())
    }
}
