#[path = "1-change-event.rs"]
mod change_event;

#[path = "2-session.rs"]
mod session;

#[path = "3-listen.rs"]
mod listen;

#[path = "4-change-buffer.rs"]
mod change_buffer;

#[path = "5-memory-sync.rs"]
mod memory_sync;

pub use change_buffer::*;
pub use change_event::*;
pub use listen::*;
pub use memory_sync::*;
pub use session::*;

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct ListenerKey(pub(crate) slotmap::DefaultKey);

#[cfg(test)]
mod tests {
    use super::*;

    fn change(key: &str) -> ChangeEvent {
        ChangeEvent::upsert(key, serde_json::json!({}), DEFAULT_ACL)
    }

    #[test]
    fn test_empty_buffer() {
        let mut buffer = ChangeBuffer::new(4);
        assert!(buffer.is_empty());
        assert!(buffer.drain(10).is_empty());
    }

    #[test]
    fn test_drain_preserves_arrival_order() {
        let mut buffer = ChangeBuffer::new(8);
        for key in ["c", "a", "b"] {
            buffer.push(change(key));
        }

        let keys: Vec<_> = buffer.drain(8).into_iter().map(|c| c.key).collect();
        assert_eq!(keys, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_drain_respects_batch_size() {
        let mut buffer = ChangeBuffer::new(8);
        for key in ["a", "b", "c", "d", "e"] {
            buffer.push(change(key));
        }

        assert_eq!(buffer.drain(2).len(), 2);
        assert_eq!(buffer.len(), 3);
        let rest: Vec<_> = buffer.drain(10).into_iter().map(|c| c.key).collect();
        assert_eq!(rest, vec!["c", "d", "e"]);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut buffer = ChangeBuffer::new(2);
        assert_eq!(buffer.push(change("a")), None);
        assert_eq!(buffer.push(change("b")), None);
        assert_eq!(buffer.push(change("c")).map(|c| c.key), Some("a".to_string()));

        assert_eq!(buffer.dropped(), 1);
        let keys: Vec<_> = buffer.drain(10).into_iter().map(|c| c.key).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut buffer = ChangeBuffer::new(0);
        buffer.push(change("a"));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_envelope_omits_missing_data() {
        let deleted = ChangeEvent::deleted("a.b", DEFAULT_ACL);
        let json = serde_json::to_value(&deleted).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "key": "a.b", "acl": "$publicCreate", "exists": false })
        );

        let parsed: ChangeEvent = serde_json::from_value(serde_json::json!({
            "key": "a", "data": null, "acl": "$publicCreate", "exists": true
        }))
        .unwrap();
        assert_eq!(parsed.data, None);
    }
}
