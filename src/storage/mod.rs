//! 本地持久化：键值存储、会话映射、用户偏好

pub mod kv;
pub mod mapping;
pub mod prefs;

pub use kv::{KvStore, KvStoreExt, MemoryKv, SqliteKv};
pub use mapping::{MappingEntry, MappingStore};
pub use prefs::{UserInfo, UserPrefs};
