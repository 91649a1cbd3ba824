use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// The tracked keys and their values (typically the address of the resource a key stands for).
///  The table is only modified by applying replicated log entries.
#[derive(Debug, Default)]
pub struct KeyValueStore {
    data: RwLock<BTreeMap<String, String>>,
}

impl KeyValueStore {
    pub fn new() -> KeyValueStore {
        KeyValueStore::default()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.data.read().await
            .get(key)
            .cloned()
    }

    pub async fn set(&self, key: &str, value: &str) {
        self.data.write().await
            .insert(key.to_string(), value.to_string());
    }

    pub async fn delete(&self, key: &str) {
        self.data.write().await
            .remove(key);
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        self.data.read().await
            .contains_key(key)
    }

    pub async fn snapshot(&self) -> BTreeMap<String, String> {
        self.data.read().await
            .clone()
    }

    pub async fn len(&self) -> usize {
        self.data.read().await
            .len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// serializes the table as a flat JSON object
    pub async fn to_json(&self) -> anyhow::Result<Vec<u8>> {
        Ok(serde_json::to_vec(&*self.data.read().await)?)
    }

    /// replaces the entire table with the contents of a flat JSON object
    pub async fn restore_json(&self, buf: &[u8]) -> anyhow::Result<()> {
        let restored: BTreeMap<String, String> = serde_json::from_slice(buf)?;
        *self.data.write().await = restored;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = KeyValueStore::new();
        assert!(store.is_empty().await);

        store.set("a", "1").await;
        store.set("b", "2").await;
        store.set("a", "3").await;
        assert_eq!(store.get("a").await, Some("3".to_string()));
        assert_eq!(store.len().await, 2);

        store.delete("a").await;
        store.delete("unknown").await;
        assert_eq!(store.get("a").await, None);
        assert!(store.contains_key("b").await);
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let store = KeyValueStore::new();
        store.set("db1", "10.1.1.1:11210").await;
        store.set("db2", "10.1.1.2:11210").await;

        let json = store.to_json().await.unwrap();
        assert_eq!(String::from_utf8(json.clone()).unwrap(), r#"{"db1":"10.1.1.1:11210","db2":"10.1.1.2:11210"}"#);

        let restored = KeyValueStore::new();
        restored.set("stale", "x").await;
        restored.restore_json(&json).await.unwrap();
        assert_eq!(restored.snapshot().await, store.snapshot().await);

        assert!(restored.restore_json(b"[1, 2]").await.is_err());
        assert_eq!(restored.len().await, 2);
    }
}
