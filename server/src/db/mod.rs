pub mod migrations;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Type alias for the shared database connection.
/// rusqlite is synchronous, so it is wrapped in Arc<Mutex> and used from
/// tokio::task::spawn_blocking.
pub type DbPool = Arc<Mutex<Connection>>;

/// File name of the object index inside the data directory.
pub const DB_FILE_NAME: &str = "provenance.db";

/// Initialize the SQLite object index: create the data directory if needed,
/// open (or create) the database file, enable WAL mode, and run migrations.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;

    let db_path = Path::new(data_dir).join(DB_FILE_NAME);
    let mut conn = Connection::open(&db_path)?;

    // WAL lets listing pages read while a deposit is writing
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;

    tracing::info!("Object index initialized at {}", db_path.display());

    Ok(Arc::new(Mutex::new(conn)))
}
