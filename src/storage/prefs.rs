//! 用户会话偏好（`user_session_prefs`）：姓名、电话、界面语言、上次选择的概念

use std::sync::Arc;

use crate::storage::kv::KvStore;

pub const PREFS_NAMESPACE: &str = "user_session_prefs";

const KEY_USER_NAME: &str = "user_name";
const KEY_USER_PHONE: &str = "user_phone";
const KEY_USER_LANGUAGE: &str = "user_language";
const KEY_USER_CONCEPT: &str = "user_concept";
const KEY_IS_USER_INFO_COMPLETE: &str = "is_user_info_complete";

pub const DEFAULT_LANGUAGE: &str = "en";

/// 已完整填写的用户信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub name: String,
    pub phone: String,
    pub language: String,
    pub concept: Option<String>,
}

/// 偏好读写；存储失败只记日志
#[derive(Clone)]
pub struct UserPrefs {
    kv: Arc<dyn KvStore>,
}

impl UserPrefs {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn get(&self, key: &str) -> Option<String> {
        self.kv.get(PREFS_NAMESPACE, key).unwrap_or_else(|e| {
            tracing::warn!("Failed to read preference {}: {}", key, e);
            None
        })
    }

    fn put(&self, key: &str, value: &str) {
        if let Err(e) = self.kv.put(PREFS_NAMESPACE, key, value) {
            tracing::error!("Failed to write preference {}: {}", key, e);
        }
    }

    fn remove(&self, key: &str) {
        if let Err(e) = self.kv.remove(PREFS_NAMESPACE, key) {
            tracing::error!("Failed to remove preference {}: {}", key, e);
        }
    }

    /// 保存全部用户信息并标记为已完成；concept 为 None 时清除已存的概念
    pub fn save_user_info(&self, name: &str, phone: &str, language: &str, concept: Option<&str>) {
        self.put(KEY_USER_NAME, name);
        self.put(KEY_USER_PHONE, phone);
        self.put(KEY_USER_LANGUAGE, language);
        match concept {
            Some(c) => self.put(KEY_USER_CONCEPT, c),
            None => self.remove(KEY_USER_CONCEPT),
        }
        self.put(KEY_IS_USER_INFO_COMPLETE, "true");
        tracing::debug!("User info saved: {}, language: {}", name, language);
    }

    pub fn save_preferred_concept(&self, concept: &str) {
        self.put(KEY_USER_CONCEPT, concept);
    }

    pub fn update_language(&self, language: &str) {
        self.put(KEY_USER_LANGUAGE, language);
    }

    pub fn user_name(&self) -> Option<String> {
        self.get(KEY_USER_NAME)
    }

    pub fn user_phone(&self) -> Option<String> {
        self.get(KEY_USER_PHONE)
    }

    pub fn language(&self) -> String {
        self.get(KEY_USER_LANGUAGE)
            .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
    }

    pub fn concept(&self) -> Option<String> {
        self.get(KEY_USER_CONCEPT)
    }

    pub fn is_user_info_complete(&self) -> bool {
        self.get(KEY_IS_USER_INFO_COMPLETE).as_deref() == Some("true")
    }

    /// 姓名与电话都存在时返回完整信息
    pub fn user_info(&self) -> Option<UserInfo> {
        Some(UserInfo {
            name: self.user_name()?,
            phone: self.user_phone()?,
            language: self.language(),
            concept: self.concept(),
        })
    }

    pub fn clear(&self) {
        for key in [KEY_USER_NAME, KEY_USER_PHONE, KEY_USER_LANGUAGE, KEY_USER_CONCEPT] {
            self.remove(key);
        }
        self.put(KEY_IS_USER_INFO_COMPLETE, "false");
        tracing::debug!("User info cleared");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::kv::MemoryKv;

    #[test]
    fn test_defaults() {
        let prefs = UserPrefs::new(Arc::new(MemoryKv::new()));
        assert_eq!(prefs.language(), "en");
        assert!(!prefs.is_user_info_complete());
        assert_eq!(prefs.user_info(), None);
    }

    #[test]
    fn test_save_and_clear() {
        let prefs = UserPrefs::new(Arc::new(MemoryKv::new()));
        prefs.save_user_info("Asha", "98450", "kn", Some("Gravity"));
        assert!(prefs.is_user_info_complete());
        assert_eq!(
            prefs.user_info(),
            Some(UserInfo {
                name: "Asha".into(),
                phone: "98450".into(),
                language: "kn".into(),
                concept: Some("Gravity".into()),
            })
        );

        prefs.save_user_info("Asha", "98450", "kn", None);
        assert_eq!(prefs.concept(), None);

        prefs.clear();
        assert_eq!(prefs.user_name(), None);
        assert_eq!(prefs.language(), "en");
        assert!(!prefs.is_user_info_complete());
    }
}
