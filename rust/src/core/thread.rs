//! Thread view assembly: storage rows merged with the optimistic outbox.

use std::collections::{HashMap, HashSet};

use shepherd_storage_traits::{DirectMessage, GroupMessage};

use crate::state::{MessageDeliveryState, ThreadMessage};

/// An optimistic entry awaiting its server row. Lives in the actor only.
#[derive(Debug, Clone)]
pub(super) struct LocalOutgoing {
    pub(super) body: String,
    pub(super) timestamp: i64,
    pub(super) seq: u64,
}

pub(super) fn direct_to_thread_message(m: &DirectMessage, viewer_id: &str) -> ThreadMessage {
    ThreadMessage {
        id: m.id.clone(),
        sender_id: m.sender_id.clone(),
        sender_name: None,
        body: m.body.clone(),
        timestamp: m.created_at,
        is_mine: m.sender_id == viewer_id,
        delivery: MessageDeliveryState::Sent,
    }
}

pub(super) fn group_to_thread_message(
    m: &GroupMessage,
    viewer_id: &str,
    names: &HashMap<String, String>,
) -> ThreadMessage {
    ThreadMessage {
        id: m.id.clone(),
        sender_id: m.sender_id.clone(),
        sender_name: names.get(&m.sender_id).cloned(),
        body: m.body.clone(),
        timestamp: m.created_at,
        is_mine: m.sender_id == viewer_id,
        delivery: MessageDeliveryState::Sent,
    }
}

/// Inject outbox entries not yet visible in storage, then restore strict
/// ascending order (timestamp, then id for equal-timestamp determinism).
/// Returns the ids that storage already covers.
pub(super) fn merge_outbox(
    msgs: &mut Vec<ThreadMessage>,
    outbox: &HashMap<String, LocalOutgoing>,
    overrides: Option<&HashMap<String, MessageDeliveryState>>,
    viewer_id: &str,
) -> HashSet<String> {
    let present_ids: HashSet<String> = msgs.iter().map(|m| m.id.clone()).collect();
    let mut pending: Vec<(&String, &LocalOutgoing)> = outbox
        .iter()
        .filter(|(id, _)| !present_ids.contains(*id))
        .collect();
    // seq keeps rapid sends in dispatch order even on timestamp ties
    pending.sort_by_key(|(_, lm)| (lm.timestamp, lm.seq));

    for (id, lm) in pending {
        let delivery = overrides
            .and_then(|map| map.get(id))
            .cloned()
            .unwrap_or(MessageDeliveryState::Pending);
        msgs.push(ThreadMessage {
            id: id.clone(),
            sender_id: viewer_id.to_string(),
            sender_name: None,
            body: lm.body.clone(),
            timestamp: lm.timestamp,
            is_mine: true,
            delivery,
        });
    }
    msgs.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    present_ids
}

/// Clock slack when pairing an optimistic entry with its server row. The
/// optimistic timestamp is taken locally while the server assigns its own,
/// so the two can drift.
const ECHO_MATCH_SLACK_SECS: i64 = 300;

fn matches_row(lm: &LocalOutgoing, row: &ThreadMessage) -> bool {
    lm.body == row.body && (row.timestamp - lm.timestamp).abs() <= ECHO_MATCH_SLACK_SECS
}

/// The optimistic entry a stored viewer-authored row corresponds to, if any.
/// Server ids never match temp ids, so the pairing is by body and
/// approximate timestamp; ties go to the closest, oldest entry.
pub(super) fn matching_outbox_entry(
    outbox: &HashMap<String, LocalOutgoing>,
    row: &ThreadMessage,
) -> Option<String> {
    outbox
        .iter()
        .filter(|(_, lm)| matches_row(lm, row))
        .min_by_key(|(_, lm)| ((lm.timestamp - row.timestamp).abs(), lm.seq))
        .map(|(id, _)| id.clone())
}

/// Outbox entries whose server row is already present in `msgs` (the
/// realtime echo can land before the append result). Each stored row
/// retires at most one entry.
pub(super) fn covered_by_storage(
    msgs: &[ThreadMessage],
    outbox: &HashMap<String, LocalOutgoing>,
) -> Vec<String> {
    let mut covered: Vec<String> = Vec::new();
    for row in msgs.iter().filter(|m| m.is_mine) {
        let hit = outbox
            .iter()
            .filter(|(id, lm)| !covered.iter().any(|c| c == *id) && matches_row(lm, row))
            .min_by_key(|(_, lm)| ((lm.timestamp - row.timestamp).abs(), lm.seq))
            .map(|(id, _)| id.clone());
        if let Some(id) = hit {
            covered.push(id);
        }
    }
    covered
}

/// Keep only the newest `page` messages (the thread window).
pub(super) fn truncate_to_newest(msgs: &mut Vec<ThreadMessage>, page: usize) {
    if msgs.len() > page {
        msgs.drain(..msgs.len() - page);
    }
}
