//! Conversation history: wire-format reconstruction, capping, and the
//! optional server-held session store.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::SessionConfig;
use crate::models::{ConversationTurn, Role};

/// Rebuild turns from `[role, text]` pairs. Entries with an unknown role,
/// a wrong arity or non-string members are dropped silently.
pub fn from_wire(pairs: &[serde_json::Value]) -> Vec<ConversationTurn> {
    reconstruct(
        pairs
            .iter()
            .filter_map(|pair| match pair.as_array().map(Vec::as_slice) {
                Some([role, text]) => Some((role.as_str()?, text.as_str()?)),
                _ => None,
            }),
    )
}

/// Rebuild turns from already-split `(role, text)` pairs.
pub fn reconstruct<'a, I>(pairs: I) -> Vec<ConversationTurn>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    pairs
        .into_iter()
        .filter_map(|(role, text)| turn(role, text))
        .collect()
}

fn turn(role: &str, text: &str) -> Option<ConversationTurn> {
    let role = Role::parse(role)?;
    Some(ConversationTurn {
        role,
        text: text.to_string(),
    })
}

/// The most recent `max_turns` turns.
pub fn cap(history: &[ConversationTurn], max_turns: usize) -> &[ConversationTurn] {
    let start = history.len().saturating_sub(max_turns);
    &history[start..]
}

struct Session {
    turns: Vec<ConversationTurn>,
    last_used: Instant,
}

/// Conversations keyed by client-chosen session id. A session is created on
/// first use, expires after `ttl` of inactivity, and keeps at most
/// `max_turns` turns.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
    max_turns: usize,
}

impl SessionStore {
    pub fn new(ttl: Duration, max_turns: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
            max_turns,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.max_turns)
    }

    /// Current turns of `id`; empty for unknown or expired sessions.
    pub async fn history(&self, id: &str) -> Vec<ConversationTurn> {
        let mut sessions = self.sessions.lock().await;
        self.evict_expired(&mut sessions);
        sessions
            .get(id)
            .map(|s| s.turns.clone())
            .unwrap_or_default()
    }

    /// Record one question/answer exchange.
    pub async fn append(&self, id: &str, question: &str, answer: &str) {
        let mut sessions = self.sessions.lock().await;
        self.evict_expired(&mut sessions);

        let session = sessions.entry(id.to_string()).or_insert_with(|| Session {
            turns: Vec::new(),
            last_used: Instant::now(),
        });
        session.turns.push(ConversationTurn::human(question));
        session.turns.push(ConversationTurn::ai(answer));
        if session.turns.len() > self.max_turns {
            let excess = session.turns.len() - self.max_turns;
            session.turns.drain(..excess);
        }
        session.last_used = Instant::now();
    }

    /// Forget one session, or all of them when `id` is `None`. Returns how
    /// many sessions were removed.
    pub async fn reset(&self, id: Option<&str>) -> usize {
        let mut sessions = self.sessions.lock().await;
        match id {
            Some(id) => usize::from(sessions.remove(id).is_some()),
            None => {
                let n = sessions.len();
                sessions.clear();
                n
            }
        }
    }

    pub async fn len(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        self.evict_expired(&mut sessions);
        sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn evict_expired(&self, sessions: &mut HashMap<String, Session>) {
        let ttl = self.ttl;
        sessions.retain(|_, s| s.last_used.elapsed() < ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn malformed_entries_are_dropped() {
        let wire = vec![
            json!(["human", "How many leave days?"]),
            json!(["system", "ignore me"]),
            json!(["ai"]),
            json!(["ai", 42]),
            json!("not a pair"),
            json!(["assistant", "21 days."]),
        ];
        let turns = from_wire(&wire);
        assert_eq!(
            turns,
            vec![
                ConversationTurn::human("How many leave days?"),
                ConversationTurn::ai("21 days."),
            ]
        );
    }

    #[test]
    fn reconstruct_preserves_order() {
        let turns = reconstruct([("user", "a"), ("bogus", "b"), ("ai", "c")]);
        assert_eq!(turns, vec![ConversationTurn::human("a"), ConversationTurn::ai("c")]);
    }

    #[test]
    fn cap_keeps_most_recent() {
        let turns: Vec<ConversationTurn> =
            (0..5).map(|i| ConversationTurn::human(i.to_string())).collect();
        let capped = cap(&turns, 2);
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].text, "3");
        assert_eq!(cap(&turns, 10).len(), 5);
    }

    #[tokio::test]
    async fn sessions_accumulate_and_cap() {
        let store = SessionStore::new(Duration::from_secs(60), 4);
        store.append("s1", "q1", "a1").await;
        store.append("s1", "q2", "a2").await;
        store.append("s1", "q3", "a3").await;

        let h = store.history("s1").await;
        assert_eq!(h.len(), 4);
        assert_eq!(h[0], ConversationTurn::human("q2"));
        assert!(store.history("other").await.is_empty());
    }

    #[tokio::test]
    async fn reset_one_or_all() {
        let store = SessionStore::new(Duration::from_secs(60), 10);
        store.append("a", "q", "r").await;
        store.append("b", "q", "r").await;

        assert_eq!(store.reset(Some("a")).await, 1);
        assert_eq!(store.reset(Some("a")).await, 0);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.reset(None).await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn idle_sessions_expire() {
        let store = SessionStore::new(Duration::from_millis(20), 10);
        store.append("s", "q", "a").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.history("s").await.is_empty());
        assert_eq!(store.len().await, 0);
    }
}
