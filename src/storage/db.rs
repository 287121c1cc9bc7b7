use std::path::Path;

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::{
    config::Database,
    storage::{error::StorageError, schema},
};

pub type MillisSinceUnix = i64;

fn open_in_memory() -> Result<rusqlite::Connection, rusqlite::Error> {
    Connection::open_in_memory()
}

fn open_from_file(path: &Path) -> Result<rusqlite::Connection, rusqlite::Error> {
    Connection::open(path)
}

pub fn open(config: &Database) -> Result<rusqlite::Connection, StorageError> {
    let db = match (config.in_memory, &config.path) {
        (true, _) => open_in_memory()?,
        (false, Some(path)) => open_from_file(path)?,
        (false, None) => {
            return Err(StorageError::Internal(anyhow!(
                "database.path is required unless database.in_memory is set"
            )));
        }
    };
    schema::init(&db)?;
    Ok(db)
}

pub fn datetime_to_millis(time: DateTime<Utc>) -> MillisSinceUnix {
    time.timestamp_millis()
}

pub fn millis_to_datetime(millis: MillisSinceUnix) -> anyhow::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or(anyhow!("failed to convert {millis} ms timestamp to datetime"))
}
