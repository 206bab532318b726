use std::{
    collections::{HashMap, HashSet},
    ops::Deref,
};

use bson::{oid::ObjectId, Document};
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, FindOptions, ReturnDocument},
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::Error;

const DUPLICATE_KEY: i32 = 11000;

pub struct Collection<T>(pub mongodb::Collection<T>);

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Collection<T> {
    type Target = mongodb::Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> From<mongodb::Collection<T>> for Collection<T> {
    fn from(value: mongodb::Collection<T>) -> Self {
        Self(value)
    }
}

/// Document that carries its own `_id`.
pub trait Identified {
    fn id(&self) -> ObjectId;
}

impl<T> Collection<T>
where
    T: DeserializeOwned + Send + Sync + Unpin,
{
    pub async fn get_one_by_id(&self, id: ObjectId) -> Result<Option<T>, Error> {
        self.find_one(bson::doc! { "_id": id }, None)
            .await
            .map_err(Into::into)
    }

    pub async fn exists_by_id(&self, id: ObjectId) -> Result<bool, Error> {
        self.count_documents(bson::doc! { "_id": id }, None)
            .await
            .map(|it| it > 0)
            .map_err(Into::into)
    }

    /// Drains a `find` cursor. Results are unbounded.
    pub async fn find_all(
        &self,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
    ) -> Result<Vec<T>, Error> {
        let mut cursor = self.find(filter, options).await?;

        let mut vec = vec![];

        while cursor.advance().await? {
            vec.push(cursor.deserialize_current()?);
        }

        Ok(vec)
    }

    /// Returns every matching document sorted by `field`, newest first.
    pub async fn find_all_sorted_desc(
        &self,
        filter: Document,
        field: &str,
    ) -> Result<Vec<T>, Error> {
        self.find_all(
            filter,
            FindOptions::builder().sort(bson::doc! { field: -1 }).build(),
        )
        .await
    }

    pub async fn update_one_returning(
        &self,
        id: ObjectId,
        update: Document,
    ) -> Result<Option<T>, Error> {
        self.find_one_and_update(
            bson::doc! { "_id": id },
            update,
            FindOneAndUpdateOptions::builder()
                .return_document(ReturnDocument::After)
                .build(),
        )
        .await
        .map_err(Into::into)
    }

    /// Runs an aggregation pipeline and decodes every output document into `R`.
    pub async fn aggregate_into<R>(&self, pipeline: Vec<Document>) -> Result<Vec<R>, Error>
    where
        R: DeserializeOwned,
    {
        let mut cursor = self.aggregate(pipeline, None).await?;

        let mut vec = vec![];

        while cursor.advance().await? {
            let document: Document = cursor.deserialize_current()?;
            vec.push(bson::from_document(document)?);
        }

        Ok(vec)
    }

    /// Counts documents matching `filter` grouped by the value of `field`.
    pub async fn count_by(
        &self,
        field: &str,
        filter: impl Into<Option<Document>>,
    ) -> Result<Vec<GroupCount>, Error> {
        let mut pipeline = vec![];
        if let Some(filter) = filter.into() {
            pipeline.push(bson::doc! { "$match": filter });
        }
        pipeline.push(bson::doc! {
            "$group": { "_id": format!("${field}"), "count": { "$sum": 1 } }
        });

        self.aggregate_into(pipeline).await
    }
}

/// `{_id, count}` row of a `$group` stage.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GroupCount {
    #[serde(rename = "_id")]
    pub id: Option<String>,
    pub count: i64,
}

impl GroupCount {
    pub fn new(id: &str, count: i64) -> Self {
        Self {
            id: Some(id.to_string()),
            count,
        }
    }
}

/// Emits one row per known value in order, zero when absent from `rows`. Rows for values
/// outside `known` are kept at the end so the counts still add up to the total.
pub fn fill_counts(known: &[&str], rows: Vec<GroupCount>) -> Vec<GroupCount> {
    let mut filled: Vec<GroupCount> = known.iter().map(|it| GroupCount::new(it, 0)).collect();

    for row in rows {
        match filled
            .iter_mut()
            .find(|it| it.id.is_some() && it.id == row.id)
        {
            Some(it) => it.count += row.count,
            None => filled.push(row),
        }
    }

    filled
}

pub fn count_of(rows: &[GroupCount], id: &str) -> i64 {
    rows.iter()
        .filter(|it| it.id.as_deref() == Some(id))
        .map(|it| it.count)
        .sum()
}

impl<T> Collection<T>
where
    T: DeserializeOwned + Identified + Send + Sync + Unpin,
{
    /// Loads the referenced documents in one query, keyed by id.
    pub async fn find_map_by_ids(
        &self,
        ids: impl IntoIterator<Item = ObjectId>,
    ) -> Result<HashMap<ObjectId, T>, Error> {
        let ids: Vec<ObjectId> = ids.into_iter().collect::<HashSet<_>>().into_iter().collect();

        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        Ok(self
            .find_all(bson::doc! { "_id": { "$in": ids } }, None)
            .await?
            .into_iter()
            .map(|it| (it.id(), it))
            .collect())
    }
}

/// Builds an equality filter from optional query parameters. Absent and empty values are skipped.
pub fn eq_filter<'a>(pairs: impl IntoIterator<Item = (&'a str, Option<String>)>) -> Document {
    let mut filter = Document::new();

    for (key, value) in pairs {
        if let Some(value) = value.filter(|it| !it.is_empty()) {
            filter.insert(key, value);
        }
    }

    filter
}

pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(err)) => err.code == DUPLICATE_KEY,
        ErrorKind::Command(err) => err.code == DUPLICATE_KEY,
        _ => false,
    }
}

/// Maps a duplicate key violation to `duplicate`, leaves every other error as a database error.
pub fn map_duplicate(err: mongodb::error::Error, duplicate: impl FnOnce() -> Error) -> Error {
    if is_duplicate_key(&err) {
        duplicate()
    } else {
        err.into()
    }
}

#[cfg(test)]
mod tests {
    use super::{count_of, eq_filter, fill_counts, GroupCount};

    #[test]
    fn test_fill_counts_covers_every_value() {
        let rows = vec![
            GroupCount::new("in_use", 2),
            GroupCount::new("available", 3),
            GroupCount {
                id: None,
                count: 1,
            },
        ];

        let filled = fill_counts(&["available", "in_use", "maintenance"], rows);

        assert_eq!(
            filled,
            vec![
                GroupCount::new("available", 3),
                GroupCount::new("in_use", 2),
                GroupCount::new("maintenance", 0),
                GroupCount {
                    id: None,
                    count: 1
                },
            ]
        );
        assert_eq!(filled.iter().map(|it| it.count).sum::<i64>(), 6);
        assert_eq!(count_of(&filled, "in_use"), 2);
        assert_eq!(count_of(&filled, "out_of_service"), 0);
    }

    #[test]
    fn test_eq_filter_skips_absent_and_empty() {
        let filter = eq_filter([
            ("membershipStatus", Some("active".to_string())),
            ("membershipType", Some(String::new())),
            ("category", None),
        ]);

        assert_eq!(filter, bson::doc! { "membershipStatus": "active" });
    }
}
