use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// One event fanned out to every member of a group.
#[derive(Debug, Clone)]
pub struct GroupEvent {
    pub event_type: String,
    pub payload: serde_json::Value,
}

pub fn notification_group(user_id: i64) -> String {
    format!("notifications:{user_id}")
}

pub fn conversation_group(conversation_id: i64) -> String {
    format!("conversation:{conversation_id}")
}

/// In-process group fan-out over per-group broadcast channels.
///
/// A group springs into existence on the first `join` and is removed again
/// once the last receiver is gone. Events sent to a group nobody has joined
/// are dropped, not queued.
#[derive(Clone)]
pub struct GroupBroker {
    groups: Arc<DashMap<String, broadcast::Sender<GroupEvent>>>,
    capacity: usize,
}

impl GroupBroker {
    pub fn new(capacity: usize) -> Self {
        Self {
            groups: Arc::new(DashMap::new()),
            capacity,
        }
    }

    /// Subscribe to a group, creating it on first join. The subscription
    /// happens while the map entry is held, so a concurrent `leave` cannot
    /// reap the group between creation and subscribe.
    pub fn join(&self, group: &str) -> broadcast::Receiver<GroupEvent> {
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Reap the group if its last receiver is gone. Sessions drop their
    /// receiver first and then call this on the way out.
    pub fn leave(&self, group: &str) {
        self.groups
            .remove_if(group, |_, sender| sender.receiver_count() == 0);
    }

    /// Fan an event out to every current member. Returns how many receivers
    /// the event reached; zero means nobody was listening.
    pub fn broadcast(&self, group: &str, event_type: &str, payload: serde_json::Value) -> usize {
        let Some(sender) = self.groups.get(group) else {
            return 0;
        };
        sender
            .send(GroupEvent {
                event_type: event_type.to_string(),
                payload,
            })
            .unwrap_or(0)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn member_count(&self, group: &str) -> usize {
        self.groups
            .get(group)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for GroupBroker {
    fn default() -> Self {
        Self::new(256)
    }
}
