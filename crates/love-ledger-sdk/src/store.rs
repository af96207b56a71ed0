use std::collections::BTreeMap;

use serde_json::Value;

/// A stored value together with its write version.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub key: String,
    pub value: Value,
    /// Starts at 1 on first write and increases by one on every overwrite.
    pub version: u64,
}

/// Precondition attached to a write inside a [`RecordStore::commit`] batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// The key must not exist yet.
    Absent,
    /// The key must exist at exactly this version.
    Version(u64),
    /// No precondition.
    Any,
}

impl Expect {
    pub fn matches(self, current: Option<u64>) -> bool {
        match self {
            Expect::Absent => current.is_none(),
            Expect::Version(v) => current == Some(v),
            Expect::Any => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordWrite {
    pub key: String,
    pub value: Value,
    pub expect: Expect,
}

impl RecordWrite {
    pub fn new(key: impl Into<String>, value: Value, expect: Expect) -> Self {
        Self {
            key: key.into(),
            value,
            expect,
        }
    }
}

/// Outcome of a batch commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Commit {
    /// Every write was applied.
    Applied,
    /// A precondition failed on `key`; nothing in the batch was applied.
    Conflict { key: String },
}

/// Key/value persistence backing contract records and the wallet index.
///
/// The `love-ledger-store` crate implements this for its SQLite store;
/// [`MemoryStore`] is the in-process implementation.
pub trait RecordStore: Send + 'static {
    fn get(&mut self, key: &str) -> Result<Option<Record>, String>;

    /// All records whose key starts with `prefix`, ordered by key.
    fn scan_prefix(&mut self, prefix: &str) -> Result<Vec<Record>, String>;

    /// Apply `writes` atomically: either every precondition holds and every
    /// write lands, or nothing changes.
    fn commit(&mut self, writes: Vec<RecordWrite>) -> Result<Commit, String>;

    /// Unconditional single-key write.
    fn set(&mut self, key: &str, value: Value) -> Result<(), String> {
        match self.commit(vec![RecordWrite::new(key, value, Expect::Any)])? {
            Commit::Applied => Ok(()),
            Commit::Conflict { key } => Err(format!("unconditional write conflicted on {key}")),
        }
    }
}

/// In-memory record store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: BTreeMap<String, (Value, u64)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordStore for MemoryStore {
    fn get(&mut self, key: &str) -> Result<Option<Record>, String> {
        Ok(self.records.get(key).map(|(value, version)| Record {
            key: key.to_string(),
            value: value.clone(),
            version: *version,
        }))
    }

    fn scan_prefix(&mut self, prefix: &str) -> Result<Vec<Record>, String> {
        Ok(self
            .records
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, (value, version))| Record {
                key: k.clone(),
                value: value.clone(),
                version: *version,
            })
            .collect())
    }

    fn commit(&mut self, writes: Vec<RecordWrite>) -> Result<Commit, String> {
        for w in &writes {
            let current = self.records.get(&w.key).map(|(_, v)| *v);
            if !w.expect.matches(current) {
                return Ok(Commit::Conflict { key: w.key.clone() });
            }
        }
        for w in writes {
            let version = self.records.get(&w.key).map(|(_, v)| v + 1).unwrap_or(1);
            self.records.insert(w.key, (w.value, version));
        }
        Ok(Commit::Applied)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn versions_increase_per_write() {
        let mut store = MemoryStore::new();
        store.set("a", json!(1)).unwrap();
        store.set("a", json!(2)).unwrap();
        let rec = store.get("a").unwrap().unwrap();
        assert_eq!(rec.value, json!(2));
        assert_eq!(rec.version, 2);
        assert!(store.get("b").unwrap().is_none());
    }

    #[test]
    fn failed_precondition_applies_nothing() {
        let mut store = MemoryStore::new();
        store.set("a", json!("old")).unwrap();

        let outcome = store
            .commit(vec![
                RecordWrite::new("b", json!("new"), Expect::Absent),
                RecordWrite::new("a", json!("new"), Expect::Version(7)),
            ])
            .unwrap();
        assert_eq!(outcome, Commit::Conflict { key: "a".into() });
        assert!(store.get("b").unwrap().is_none());
        assert_eq!(store.get("a").unwrap().unwrap().value, json!("old"));

        let outcome = store
            .commit(vec![RecordWrite::new("a", json!("x"), Expect::Absent)])
            .unwrap();
        assert!(matches!(outcome, Commit::Conflict { .. }));
    }

    #[test]
    fn prefix_scan_is_exact() {
        let mut store = MemoryStore::new();
        store.set("contract_1", json!(1)).unwrap();
        store.set("contract_2", json!(2)).unwrap();
        store.set("contractX", json!(3)).unwrap();
        store.set("wallet_0xa", json!("1")).unwrap();

        let keys: Vec<String> = store
            .scan_prefix("contract_")
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["contract_1", "contract_2"]);
        assert!(store.scan_prefix("nothing_").unwrap().is_empty());
    }
}
