//! # MemorySync
//! An in-process backend with the service's observable behaviour. Keys live in a sorted table, listeners in a
//! slot map keyed by [`ListenerKey`]. Every mutation is pushed synchronously to each listener whose pattern
//! covers the key, so the order a listener observes is exactly the order of mutations.

use std::collections::BTreeMap;
use std::future::{Future, ready};
use std::sync::{Arc, Weak};

use futures::channel::mpsc::{self, UnboundedSender};
use parking_lot::Mutex;

use crate::data_model::{ChangeEvent, DEFAULT_ACL, Listen, ListenerKey, SessionConfig};
use crate::{SyncError, SyncService, Unlisten};

#[derive(Clone, Default)]
pub struct MemorySync {
    table: Arc<Mutex<Table>>,
}

#[derive(Default)]
struct Table {
    entries: BTreeMap<String, Entry>,
    listeners: slotmap::SlotMap<slotmap::DefaultKey, Listener>,
    provider: Option<String>,
}

#[derive(Clone, Debug)]
struct Entry {
    data: Option<serde_json::Value>,
    acl: String,
}

struct Listener {
    pattern: String,
    sender: UnboundedSender<Result<ChangeEvent, SyncError>>,
}

impl Table {
    fn notify(&mut self, change: ChangeEvent) {
        let mut closed = Vec::new();
        for (key, listener) in self.listeners.iter() {
            if !keypath::matches(&listener.pattern, &change.key) {
                continue;
            }
            if listener.sender.unbounded_send(Ok(change.clone())).is_err() {
                closed.push(key);
            }
        }
        // the receiving side went away without unlistening
        for key in closed {
            self.listeners.remove(key);
        }
    }

    fn has_descendants(&self, key: &str) -> bool {
        let prefix = format!("{key}{}", keypath::SEPARATOR);
        self.entries
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }
}

impl MemorySync {
    pub fn new() -> Self {
        Self::default()
    }

    /// The in-process backend accepts any provider, but like the real service it refuses an empty token.
    pub fn authenticate(&self, session: &SessionConfig) -> Result<(), SyncError> {
        if session.token.is_empty() {
            return Err(SyncError::Unauthenticated(session.provider.clone()));
        }
        log::info!(
            "Authenticated with {} as provider {:?}",
            session.endpoint(),
            session.provider
        );
        self.table.lock().provider = Some(session.provider.clone());
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<ChangeEvent> {
        let table = self.table.lock();
        table.entries.get(key).map(|entry| ChangeEvent {
            key: key.to_string(),
            data: entry.data.clone(),
            acl: entry.acl.clone(),
            exists: true,
        })
    }

    pub fn len(&self) -> usize {
        self.table.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn listener_count(&self) -> usize {
        self.table.lock().listeners.len()
    }

    pub fn write_now(&self, key: &str, data: serde_json::Value) -> Result<(), SyncError> {
        keypath::validate(key)?;
        let mut table = self.table.lock();

        for ancestor in keypath::ancestors(key) {
            if table.entries.contains_key(ancestor) {
                continue;
            }
            table.entries.insert(
                ancestor.to_string(),
                Entry {
                    data: None,
                    acl: DEFAULT_ACL.to_string(),
                },
            );
            table.notify(ChangeEvent {
                key: ancestor.to_string(),
                data: None,
                acl: DEFAULT_ACL.to_string(),
                exists: true,
            });
        }

        let acl = table
            .entries
            .get(key)
            .map(|entry| entry.acl.clone())
            .unwrap_or_else(|| DEFAULT_ACL.to_string());
        table.entries.insert(
            key.to_string(),
            Entry {
                data: Some(data.clone()),
                acl: acl.clone(),
            },
        );
        table.notify(ChangeEvent::upsert(key, data, acl));
        Ok(())
    }

    pub fn delete_now(&self, key: &str) -> Result<(), SyncError> {
        keypath::validate(key)?;
        let mut table = self.table.lock();

        if !table.entries.contains_key(key) {
            return Err(SyncError::NotFound(key.to_string()));
        }
        if table.has_descendants(key) {
            return Err(SyncError::HasChildren(key.to_string()));
        }
        let Some(entry) = table.entries.remove(key) else {
            return Err(SyncError::NotFound(key.to_string()));
        };
        table.notify(ChangeEvent::deleted(key, entry.acl));
        Ok(())
    }
}

impl SyncService for MemorySync {
    type Handle = MemoryListenHandle;

    fn write(
        &self,
        key: &str,
        data: serde_json::Value,
    ) -> impl Future<Output = Result<(), SyncError>> {
        ready(self.write_now(key, data))
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), SyncError>> {
        ready(self.delete_now(key))
    }

    fn listen(&self, pattern: &str) -> Result<Listen<Self::Handle>, SyncError> {
        keypath::validate_pattern(pattern)?;
        let (sender, events) = mpsc::unbounded();
        let mut table = self.table.lock();

        // a new listener starts from the current contents
        for (key, entry) in table.entries.iter() {
            if !keypath::matches(pattern, key) {
                continue;
            }
            let _ = sender.unbounded_send(Ok(ChangeEvent {
                key: key.clone(),
                data: entry.data.clone(),
                acl: entry.acl.clone(),
                exists: true,
            }));
        }

        let key = table.listeners.insert(Listener {
            pattern: pattern.to_string(),
            sender,
        });
        log::debug!("Listening to {pattern:?}");

        Ok(Listen {
            events,
            handle: MemoryListenHandle {
                table: Arc::downgrade(&self.table),
                key: Some(ListenerKey(key)),
            },
        })
    }
}

pub struct MemoryListenHandle {
    table: Weak<Mutex<Table>>,
    key: Option<ListenerKey>,
}

impl MemoryListenHandle {
    pub fn is_listening(&self) -> bool {
        self.key.is_some()
    }
}

impl Unlisten for MemoryListenHandle {
    fn unlisten(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        if let Some(table) = self.table.upgrade() {
            // dropping the sender ends the stream
            table.lock().listeners.remove(key.0);
        }
    }
}

impl Drop for MemoryListenHandle {
    fn drop(&mut self) {
        self.unlisten();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use futures::executor::block_on;
    use serde_json::json;

    fn keys(events: &[ChangeEvent]) -> Vec<(&str, bool)> {
        events.iter().map(|e| (e.key.as_str(), e.exists)).collect()
    }

    fn ready_events(listen: &mut Listen<MemoryListenHandle>) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = listen.events.try_next() {
            events.push(event.unwrap());
        }
        events
    }

    #[test]
    fn test_write_creates_missing_ancestors() {
        let sync = MemorySync::new();
        let mut listen = sync.listen("#").unwrap();

        block_on(sync.write("a.b.c", json!({"n": 1}))).unwrap();

        let events = ready_events(&mut listen);
        assert_eq!(keys(&events), vec![("a", true), ("a.b", true), ("a.b.c", true)]);
        assert_eq!(events[0].data, None);
        assert_eq!(events[2].data, Some(json!({"n": 1})));
        assert_eq!(events[2].acl, DEFAULT_ACL);
    }

    #[test]
    fn test_listen_replays_current_contents() {
        let sync = MemorySync::new();
        sync.write_now("team.eng", json!(1)).unwrap();
        sync.write_now("other", json!(2)).unwrap();

        let mut listen = sync.listen("team.#").unwrap();
        let events = ready_events(&mut listen);
        assert_eq!(keys(&events), vec![("team.eng", true)]);
    }

    #[test]
    fn test_delete_rules() {
        let sync = MemorySync::new();
        sync.write_now("a.b", json!({})).unwrap();

        assert_eq!(
            block_on(sync.delete("missing")),
            Err(SyncError::NotFound("missing".to_string()))
        );
        assert_eq!(
            block_on(sync.delete("a")),
            Err(SyncError::HasChildren("a".to_string()))
        );

        let mut listen = sync.listen("a.*").unwrap();
        ready_events(&mut listen);
        block_on(sync.delete("a.b")).unwrap();
        assert_eq!(keys(&ready_events(&mut listen)), vec![("a.b", false)]);
        assert!(sync.get("a.b").is_none());
        assert!(sync.get("a").is_some());
    }

    #[test]
    fn test_sibling_prefix_is_not_a_child() {
        let sync = MemorySync::new();
        sync.write_now("a", json!({})).unwrap();
        sync.write_now("ab.c", json!({})).unwrap();
        assert_eq!(sync.delete_now("a"), Ok(()));
    }

    #[test]
    fn test_invalid_keys_are_rejected() {
        let sync = MemorySync::new();
        assert!(matches!(
            sync.write_now("Node Name", json!({})),
            Err(SyncError::InvalidKey(_))
        ));
        assert!(matches!(sync.listen("a.#.b"), Err(SyncError::InvalidKey(_))));
        assert!(sync.is_empty());
    }

    #[test]
    fn test_unlisten_stops_delivery() {
        let sync = MemorySync::new();
        let mut listen = sync.listen("room/x").unwrap();
        sync.write_now("room/x", json!(1)).unwrap();

        listen.handle.unlisten();
        assert!(!listen.handle.is_listening());
        assert_eq!(sync.listener_count(), 0);
        sync.write_now("room/x", json!(2)).unwrap();

        let events: Vec<_> = block_on(listen.events.collect::<Vec<_>>());
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_dropping_handle_unlistens() {
        let sync = MemorySync::new();
        let listen = sync.listen("#").unwrap();
        assert_eq!(sync.listener_count(), 1);
        drop(listen);
        assert_eq!(sync.listener_count(), 0);
    }

    #[test]
    fn test_authenticate_requires_token() {
        let sync = MemorySync::new();
        let mut session = SessionConfig {
            host: "localhost".to_string(),
            port: 6005,
            use_ssl: false,
            provider: "demo".to_string(),
            token: String::new(),
        };
        assert_eq!(
            sync.authenticate(&session),
            Err(SyncError::Unauthenticated("demo".to_string()))
        );
        session.token = "demoToken".to_string();
        assert_eq!(sync.authenticate(&session), Ok(()));
        assert_eq!(session.endpoint(), "ws://localhost:6005");
    }
}
