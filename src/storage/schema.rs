use rusqlite::Connection;

pub mod tables {
    pub const FILES: &str = "tracks_files";
    pub const CHUNKS: &str = "tracks_chunks";

    pub const ALL_TABLES: &[&str] = &[FILES, CHUNKS];
}

pub mod columns {
    pub const ID: &str = "id";
    pub const FILENAME: &str = "filename";
    pub const LENGTH: &str = "length";
    pub const CHUNK_SIZE: &str = "chunk_size";
    pub const UPLOAD_DATE: &str = "upload_date";
    pub const METADATA: &str = "metadata";
    pub const CHECKSUM: &str = "checksum";

    pub const FILES_ID: &str = "files_id";
    pub const N: &str = "n";
    pub const DATA: &str = "data";
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tracks_files (
    id TEXT PRIMARY KEY,
    filename TEXT NOT NULL,
    length INTEGER NOT NULL,
    chunk_size INTEGER NOT NULL,
    upload_date INTEGER NOT NULL,
    metadata TEXT NOT NULL,
    checksum TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS tracks_chunks (
    files_id TEXT NOT NULL,
    n INTEGER NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (files_id, n)
);
"#;

pub fn init(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA)
}
