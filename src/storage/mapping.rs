//! 概念 -> (thread, session) 映射
//!
//! 内存缓存在前、持久层在后的写穿透结构。持久层是 `session_map` 命名空间下的一个 JSON 文档，
//! 每次变更都整体读出、修改、写回。只由编排器的单一 actor 修改，因此方法取 `&mut self` 而不加锁。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::StoreError;
use crate::storage::kv::{KvStore, KvStoreExt};

pub const SESSION_MAP_NAMESPACE: &str = "session_map";
pub const SESSION_MAP_KEY: &str = "concept_thread_map";

/// 一个概念对应的会话身份
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub thread: String,
    #[serde(default)]
    pub session: Option<String>,
}

pub struct MappingStore {
    kv: Arc<dyn KvStore>,
    cache: HashMap<String, MappingEntry>,
}

impl MappingStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            cache: HashMap::new(),
        }
    }

    fn read_document(&self) -> Result<BTreeMap<String, MappingEntry>, StoreError> {
        Ok(self
            .kv
            .get_json(SESSION_MAP_NAMESPACE, SESSION_MAP_KEY)?
            .unwrap_or_default())
    }

    fn write_document(&self, doc: &BTreeMap<String, MappingEntry>) -> Result<(), StoreError> {
        self.kv.put_json(SESSION_MAP_NAMESPACE, SESSION_MAP_KEY, doc)
    }

    /// 保存映射；概念或 thread 为空时只记录错误，不做任何修改
    pub fn save(&mut self, concept: &str, thread_id: &str, session_id: Option<&str>) {
        if concept.trim().is_empty() || thread_id.trim().is_empty() {
            tracing::error!(
                "Refusing to save mapping: concept={:?}, thread_id={:?}",
                concept,
                thread_id
            );
            return;
        }

        let entry = MappingEntry {
            thread: thread_id.to_string(),
            session: session_id.map(String::from),
        };
        // 持久层写成功后才进缓存，缓存不领先于持久层
        let result = self.read_document().and_then(|mut doc| {
            doc.insert(concept.to_string(), entry.clone());
            self.write_document(&doc)
        });
        match result {
            Ok(()) => {
                self.cache.insert(concept.to_string(), entry);
                tracing::debug!("Saved mapping {} -> {}", concept, thread_id);
            }
            Err(e) => {
                self.cache.remove(concept);
                tracing::error!("Failed to persist mapping for {}: {}", concept, e);
            }
        }
    }

    /// 先查缓存，未命中再读持久层并回填缓存
    pub fn load(&mut self, concept: &str) -> Option<MappingEntry> {
        if let Some(entry) = self.cache.get(concept) {
            return Some(entry.clone());
        }
        match self.read_document() {
            Ok(doc) => {
                let entry = doc.get(concept).cloned()?;
                self.cache.insert(concept.to_string(), entry.clone());
                Some(entry)
            }
            Err(e) => {
                tracing::warn!("Failed to read session map: {}", e);
                None
            }
        }
    }

    pub fn has(&mut self, concept: &str) -> bool {
        self.load(concept).is_some()
    }

    pub fn delete(&mut self, concept: &str) {
        self.cache.remove(concept);
        let result = self.read_document().and_then(|mut doc| {
            if doc.remove(concept).is_some() {
                self.write_document(&doc)
            } else {
                Ok(())
            }
        });
        if let Err(e) = result {
            tracing::error!("Failed to delete mapping for {}: {}", concept, e);
        }
    }

    pub fn clear_all(&mut self) {
        self.cache.clear();
        if let Err(e) = self.kv.clear_namespace(SESSION_MAP_NAMESPACE) {
            tracing::error!("Failed to clear session map: {}", e);
        }
    }

    /// 丢弃内存缓存（持久层不受影响）
    pub fn evict_cache(&mut self) {
        self.cache.clear();
    }
}
