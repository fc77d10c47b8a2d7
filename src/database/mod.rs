/*!
 * Durable storage for translation state.
 *
 * - `store`: the `DocumentStore` trait, key namespaces and an in-memory backend
 * - `sqlite_store`: SQLite backend used by the CLI
 * - `connection` / `schema`: connection handling and schema versioning
 */

pub mod connection;
pub mod schema;
pub mod sqlite_store;
pub mod store;

pub use connection::DatabaseConnection;
pub use sqlite_store::SqliteStore;
pub use store::{DocumentStore, MemoryStore, get_json, keys, put_json};
