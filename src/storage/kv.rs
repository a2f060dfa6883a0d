//! 命名空间键值存储
//!
//! 会话映射、概念翻译表、用户偏好都存成 (namespace, key) -> 字符串。
//! [`SqliteKv`] 用 Mutex 包一个 rusqlite 连接；[`MemoryKv`] 供测试使用。

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::StoreError;

/// 同步键值存储；所有调用都很短，直接在调用方线程执行
pub trait KvStore: Send + Sync {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError>;

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError>;

    fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError>;

    /// 清空整个命名空间
    fn clear_namespace(&self, namespace: &str) -> Result<(), StoreError>;
}

/// JSON 读写
pub trait KvStoreExt: KvStore {
    fn get_json<T: DeserializeOwned>(&self, namespace: &str, key: &str) -> Result<Option<T>, StoreError> {
        match self.get(namespace, key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize + ?Sized>(&self, namespace: &str, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.put(namespace, key, &raw)
    }
}

impl<S: KvStore + ?Sized> KvStoreExt for S {}

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
    namespace TEXT NOT NULL,
    key       TEXT NOT NULL,
    value     TEXT NOT NULL,
    PRIMARY KEY (namespace, key)
);";

/// SQLite 实现
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl SqliteKv {
    /// 打开（或创建）数据库文件；父目录不存在时自动创建
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!("Key-value store opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&conn)
    }
}

impl KvStore for SqliteKv {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            let value = conn
                .query_row(
                    "SELECT value FROM kv WHERE namespace = ?1 AND key = ?2",
                    rusqlite::params![namespace, key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(value)
        })
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (namespace, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT(namespace, key) DO UPDATE SET value = excluded.value",
                rusqlite::params![namespace, key, value],
            )?;
            Ok(())
        })
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM kv WHERE namespace = ?1 AND key = ?2",
                rusqlite::params![namespace, key],
            )?;
            Ok(())
        })
    }

    fn clear_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM kv WHERE namespace = ?1", rusqlite::params![namespace])?;
            tracing::debug!("Cleared {} entries from namespace {}", n, namespace);
            Ok(())
        })
    }
}

/// 内存实现
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<(String, String), String>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, namespace: &str, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(&(namespace.to_string(), key.to_string())).cloned())
    }

    fn put(&self, namespace: &str, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.insert((namespace.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn remove(&self, namespace: &str, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    fn clear_namespace(&self, namespace: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().map_err(|_| StoreError::Poisoned)?;
        entries.retain(|(ns, _), _| ns != namespace);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn KvStore) {
        assert_eq!(store.get("a", "k").unwrap(), None);
        store.put("a", "k", "v1").unwrap();
        store.put("a", "k", "v2").unwrap();
        store.put("b", "k", "other").unwrap();
        assert_eq!(store.get("a", "k").unwrap().as_deref(), Some("v2"));

        store.clear_namespace("a").unwrap();
        assert_eq!(store.get("a", "k").unwrap(), None);
        assert_eq!(store.get("b", "k").unwrap().as_deref(), Some("other"));

        store.remove("b", "k").unwrap();
        assert_eq!(store.get("b", "k").unwrap(), None);
    }

    #[test]
    fn test_memory_kv() {
        exercise(&MemoryKv::new());
    }

    #[test]
    fn test_sqlite_kv_in_memory() {
        exercise(&SqliteKv::open_in_memory().unwrap());
    }

    #[test]
    fn test_sqlite_kv_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tutor.db");
        {
            let store = SqliteKv::open(&path).unwrap();
            store.put_json("ns", "list", &vec!["Gravity", "Friction"]).unwrap();
        }
        let store = SqliteKv::open(&path).unwrap();
        let list: Option<Vec<String>> = store.get_json("ns", "list").unwrap();
        assert_eq!(list, Some(vec!["Gravity".to_string(), "Friction".to_string()]));
    }

    #[test]
    fn test_get_json_rejects_garbage() {
        let store = MemoryKv::new();
        store.put("ns", "bad", "{not json").unwrap();
        let result: Result<Option<Vec<String>>, _> = store.get_json("ns", "bad");
        assert!(matches!(result, Err(StoreError::Json(_))));
    }
}
