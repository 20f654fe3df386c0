// storage_service/src/entities/proven_tx_req.rs
use crate::entities::EntityIdMap;
use crate::error::StorageError;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProvenTxReqStatus {
    Unknown,
    Nosend,
    Unsent,
    Sending,
    Unmined,
    Callback,
    Unconfirmed,
    Completed,
    Invalid,
    DoubleSpend,
}

impl ProvenTxReqStatus {
    pub const TERMINAL: [ProvenTxReqStatus; 3] = [
        ProvenTxReqStatus::Completed,
        ProvenTxReqStatus::Invalid,
        ProvenTxReqStatus::DoubleSpend,
    ];

    /// Statuses polled for a merkle path on the regular proof schedule.
    pub const AWAITING_PROOF: [ProvenTxReqStatus; 5] = [
        ProvenTxReqStatus::Callback,
        ProvenTxReqStatus::Unmined,
        ProvenTxReqStatus::Sending,
        ProvenTxReqStatus::Unknown,
        ProvenTxReqStatus::Unconfirmed,
    ];

    /// Statuses picked up by the broadcast task.
    pub const AWAITING_BROADCAST: [ProvenTxReqStatus; 2] =
        [ProvenTxReqStatus::Unsent, ProvenTxReqStatus::Sending];

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    fn stage(self) -> u8 {
        match self {
            ProvenTxReqStatus::Unknown | ProvenTxReqStatus::Nosend | ProvenTxReqStatus::Unsent => 0,
            ProvenTxReqStatus::Sending => 1,
            ProvenTxReqStatus::Unmined
            | ProvenTxReqStatus::Callback
            | ProvenTxReqStatus::Unconfirmed => 2,
            ProvenTxReqStatus::Completed
            | ProvenTxReqStatus::Invalid
            | ProvenTxReqStatus::DoubleSpend => 3,
        }
    }

    /// Statuses only move forward; terminal statuses never move.
    pub fn can_transition_to(self, next: ProvenTxReqStatus) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        next.stage() >= self.stage()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProvenTxReqStatus::Unknown => "unknown",
            ProvenTxReqStatus::Nosend => "nosend",
            ProvenTxReqStatus::Unsent => "unsent",
            ProvenTxReqStatus::Sending => "sending",
            ProvenTxReqStatus::Unmined => "unmined",
            ProvenTxReqStatus::Callback => "callback",
            ProvenTxReqStatus::Unconfirmed => "unconfirmed",
            ProvenTxReqStatus::Completed => "completed",
            ProvenTxReqStatus::Invalid => "invalid",
            ProvenTxReqStatus::DoubleSpend => "doubleSpend",
        }
    }
}

impl fmt::Display for ProvenTxReqStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured audit note. `what` names the event, `attrs` carries details.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryNote {
    pub what: String,
    pub attrs: BTreeMap<String, String>,
}

impl HistoryNote {
    pub fn new(what: &str) -> Self {
        Self {
            what: what.to_string(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn attr(mut self, key: &str, value: impl ToString) -> Self {
        self.attrs.insert(key.to_string(), value.to_string());
        self
    }
}

/// Append-only audit log keyed by ISO-8601 millisecond timestamps.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenTxReqHistory {
    pub notes: BTreeMap<String, HistoryNote>,
}

fn history_key(when: DateTime<Utc>) -> String {
    when.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ProvenTxReqHistory {
    /// Adds `note` at `when`, bumping the key 1ms at a time until it sorts
    /// after every existing key. Returns the key used.
    pub fn add_note(&mut self, note: HistoryNote, when: DateTime<Utc>) -> String {
        let mut when = when;
        if let Some(last) = self.notes.keys().next_back() {
            if history_key(when) <= *last {
                if let Ok(last_when) = DateTime::parse_from_rfc3339(last) {
                    when = last_when.with_timezone(&Utc) + Duration::milliseconds(1);
                }
            }
        }
        let mut key = history_key(when);
        while self.notes.contains_key(&key) {
            when += Duration::milliseconds(1);
            key = history_key(when);
        }
        self.notes.insert(key.clone(), note);
        key
    }

    /// Union with notes recorded by another replica; existing keys win.
    pub fn merge(&mut self, other: &ProvenTxReqHistory) {
        for (key, note) in &other.notes {
            self.notes.entry(key.clone()).or_insert_with(|| note.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HistoryNote)> {
        self.notes.iter()
    }

    pub fn last(&self) -> Option<&HistoryNote> {
        self.notes.values().next_back()
    }
}

/// Sorted, deduplicated ids of local transactions waiting on this txid.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenTxReqNotify {
    pub transaction_ids: Vec<u64>,
}

impl ProvenTxReqNotify {
    pub fn add(&mut self, transaction_id: u64) -> bool {
        match self.transaction_ids.binary_search(&transaction_id) {
            Ok(_) => false,
            Err(pos) => {
                self.transaction_ids.insert(pos, transaction_id);
                true
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.transaction_ids.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenTxReq {
    pub proven_tx_req_id: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub txid: String,
    pub status: ProvenTxReqStatus,
    pub attempts: u32,
    pub notified: bool,
    pub batch: Option<String>,
    pub history: ProvenTxReqHistory,
    pub notify: ProvenTxReqNotify,
    pub raw_tx: Vec<u8>,
    pub input_beef: Option<Vec<u8>>,
    pub proven_tx_id: Option<u64>,
}

impl ProvenTxReq {
    pub fn new(txid: &str, raw_tx: Vec<u8>, status: ProvenTxReqStatus, now: DateTime<Utc>) -> Self {
        let mut req = Self {
            proven_tx_req_id: 0,
            created_at: now,
            updated_at: now,
            txid: txid.to_string(),
            status,
            attempts: 0,
            notified: false,
            batch: None,
            history: ProvenTxReqHistory::default(),
            notify: ProvenTxReqNotify::default(),
            raw_tx,
            input_beef: None,
            proven_tx_id: None,
        };
        req.history_note(HistoryNote::new("created").attr("status", status), now);
        req
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn history_note(&mut self, note: HistoryNote, when: DateTime<Utc>) -> String {
        self.history.add_note(note, when)
    }

    pub fn add_notify_transaction_id(&mut self, transaction_id: u64) -> bool {
        self.notify.add(transaction_id)
    }

    /// Moves to `status`, recording the change. Returns false when the status
    /// is unchanged or the move would go backwards.
    pub fn set_status(&mut self, status: ProvenTxReqStatus, now: DateTime<Utc>) -> bool {
        if self.status == status {
            return false;
        }
        if !self.status.can_transition_to(status) {
            self.history_note(
                HistoryNote::new("statusRejected")
                    .attr("old", self.status)
                    .attr("new", status),
                now,
            );
            return false;
        }
        self.history_note(
            HistoryNote::new("status")
                .attr("old", self.status)
                .attr("new", status),
            now,
        );
        self.status = status;
        if status.is_terminal() {
            self.notified = false;
        }
        self.updated_at = now;
        true
    }

    /// `attempts == limit` is still allowed; only exceeding it invalidates.
    pub fn attempts_exceeded(&self, limit: u32) -> bool {
        self.attempts > limit
    }

    /// Snapshot of the mutable fields for a storage update.
    pub fn to_update(&self) -> ProvenTxReqUpdate {
        ProvenTxReqUpdate {
            updated_at: self.updated_at,
            status: Some(self.status),
            attempts: Some(self.attempts),
            notified: Some(self.notified),
            proven_tx_id: self.proven_tx_id,
            history: Some(self.history.clone()),
            notify: Some(self.notify.clone()),
            raw_tx: Some(self.raw_tx.clone()),
        }
    }

    fn map_notify(
        notify: &ProvenTxReqNotify,
        map: &EntityIdMap,
    ) -> Result<ProvenTxReqNotify, StorageError> {
        let mut mapped = ProvenTxReqNotify::default();
        for id in &notify.transaction_ids {
            let local = map.map_transaction_id(*id).ok_or_else(|| {
                StorageError::Merge(format!("No local id for foreign transaction {}", id))
            })?;
            mapped.add(local);
        }
        Ok(mapped)
    }

    fn map_proven_tx_id(
        proven_tx_id: Option<u64>,
        map: &EntityIdMap,
    ) -> Result<Option<u64>, StorageError> {
        match proven_tx_id {
            None => Ok(None),
            Some(id) => map.map_proven_tx_id(id).map(Some).ok_or_else(|| {
                StorageError::Merge(format!("No local id for foreign proven tx {}", id))
            }),
        }
    }

    /// Compares against a copy held by another replica, translating the
    /// other copy's foreign ids through `map`.
    pub fn equals(&self, other: &ProvenTxReq, map: &EntityIdMap) -> bool {
        let notify = match Self::map_notify(&other.notify, map) {
            Ok(notify) => notify,
            Err(_) => return false,
        };
        let proven_tx_id = match Self::map_proven_tx_id(other.proven_tx_id, map) {
            Ok(id) => id,
            Err(_) => return false,
        };
        self.txid == other.txid
            && self.status == other.status
            && self.attempts == other.attempts
            && self.notified == other.notified
            && self.batch == other.batch
            && self.raw_tx == other.raw_tx
            && self.input_beef == other.input_beef
            && self.history == other.history
            && self.notify == notify
            && self.proven_tx_id == proven_tx_id
    }

    /// Merges a newer copy from another replica. The status only moves
    /// forward, so a terminal local status is never replaced, and a record
    /// that was already notified stays notified.
    pub fn merge_existing(
        &mut self,
        incoming: &ProvenTxReq,
        map: &EntityIdMap,
        now: DateTime<Utc>,
    ) -> Result<bool, StorageError> {
        if self.txid != incoming.txid {
            return Err(StorageError::Merge(format!(
                "txid mismatch {} != {}",
                self.txid, incoming.txid
            )));
        }
        if incoming.updated_at <= self.updated_at {
            return Ok(false);
        }
        if !self.status.can_transition_to(incoming.status) {
            return Err(StorageError::Merge(format!(
                "{} cannot move from {} to {}",
                self.txid, self.status, incoming.status
            )));
        }

        let notify = Self::map_notify(&incoming.notify, map)?;
        let proven_tx_id = Self::map_proven_tx_id(incoming.proven_tx_id, map)?;

        if self.status == incoming.status {
            self.notified = self.notified || incoming.notified;
        } else {
            self.history_note(
                HistoryNote::new("mergeStatus")
                    .attr("old", self.status)
                    .attr("new", incoming.status),
                now,
            );
            self.status = incoming.status;
            self.notified = incoming.notified;
        }
        self.attempts = self.attempts.max(incoming.attempts);
        self.history.merge(&incoming.history);
        for id in notify.transaction_ids {
            self.notify.add(id);
        }
        if proven_tx_id.is_some() {
            self.proven_tx_id = proven_tx_id;
        }
        if incoming.batch.is_some() {
            self.batch = incoming.batch.clone();
        }
        if self.raw_tx.is_empty() {
            self.raw_tx = incoming.raw_tx.clone();
        }
        if incoming.input_beef.is_some() {
            self.input_beef = incoming.input_beef.clone();
        }
        self.updated_at = now;
        Ok(true)
    }
}

/// Partial update of a stored Proof Record. `None` fields are left unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenTxReqUpdate {
    pub updated_at: DateTime<Utc>,
    pub status: Option<ProvenTxReqStatus>,
    pub attempts: Option<u32>,
    pub notified: Option<bool>,
    pub proven_tx_id: Option<u64>,
    pub history: Option<ProvenTxReqHistory>,
    pub notify: Option<ProvenTxReqNotify>,
    pub raw_tx: Option<Vec<u8>>,
}

impl ProvenTxReqUpdate {
    pub fn apply(&self, req: &mut ProvenTxReq) {
        req.updated_at = self.updated_at;
        if let Some(status) = self.status {
            req.status = status;
        }
        if let Some(attempts) = self.attempts {
            req.attempts = attempts;
        }
        if let Some(notified) = self.notified {
            req.notified = notified;
        }
        if self.proven_tx_id.is_some() {
            req.proven_tx_id = self.proven_tx_id;
        }
        if let Some(history) = &self.history {
            req.history = history.clone();
        }
        if let Some(notify) = &self.notify {
            req.notify = notify.clone();
        }
        if let Some(raw_tx) = &self.raw_tx {
            req.raw_tx = raw_tx.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(msecs: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_760_000_000_000 + msecs).unwrap()
    }

    #[test]
    fn same_millisecond_notes_get_ordered_keys() {
        let mut history = ProvenTxReqHistory::default();
        let first = history.add_note(HistoryNote::new("a"), at(0));
        let second = history.add_note(HistoryNote::new("b"), at(0));
        let third = history.add_note(HistoryNote::new("c"), at(0));
        assert!(first < second && second < third);
        let whats: Vec<&str> = history.iter().map(|(_, n)| n.what.as_str()).collect();
        assert_eq!(whats, vec!["a", "b", "c"]);
    }

    #[test]
    fn earlier_clock_still_appends_after_last_note() {
        let mut history = ProvenTxReqHistory::default();
        let later = history.add_note(HistoryNote::new("later"), at(50));
        let earlier = history.add_note(HistoryNote::new("earlier"), at(10));
        assert!(later < earlier);
        assert_eq!(history.last().unwrap().what, "earlier");
    }

    #[test]
    fn notify_ids_stay_sorted_and_unique() {
        let mut req = ProvenTxReq::new("aa", vec![1], ProvenTxReqStatus::Unsent, at(0));
        assert!(req.add_notify_transaction_id(7));
        assert!(req.add_notify_transaction_id(3));
        assert!(!req.add_notify_transaction_id(7));
        assert_eq!(req.notify.transaction_ids, vec![3, 7]);
    }

    #[test]
    fn status_change_is_recorded_and_terminal_is_final() {
        let mut req = ProvenTxReq::new("aa", vec![1], ProvenTxReqStatus::Unmined, at(0));
        req.notified = true;
        assert!(req.set_status(ProvenTxReqStatus::Completed, at(1)));
        assert!(!req.notified);
        let note = req.history.last().unwrap();
        assert_eq!(note.what, "status");
        assert_eq!(note.attrs["old"], "unmined");
        assert_eq!(note.attrs["new"], "completed");

        assert!(!req.set_status(ProvenTxReqStatus::Unmined, at(2)));
        assert_eq!(req.status, ProvenTxReqStatus::Completed);
        assert_eq!(req.history.last().unwrap().what, "statusRejected");
    }

    #[test]
    fn attempts_equal_to_limit_are_allowed() {
        let mut req = ProvenTxReq::new("aa", vec![1], ProvenTxReqStatus::Unmined, at(0));
        req.attempts = 144;
        assert!(!req.attempts_exceeded(144));
        req.attempts = 145;
        assert!(req.attempts_exceeded(144));
    }

    fn replica_pair() -> (ProvenTxReq, ProvenTxReq, EntityIdMap) {
        let mut local = ProvenTxReq::new("aa", vec![1], ProvenTxReqStatus::Unmined, at(0));
        local.add_notify_transaction_id(10);
        let mut foreign = local.clone();
        foreign.notify = ProvenTxReqNotify::default();
        foreign.add_notify_transaction_id(110);
        let mut map = EntityIdMap::default();
        map.transaction_ids.insert(110, 10);
        map.proven_tx_ids.insert(500, 5);
        (local, foreign, map)
    }

    #[test]
    fn equals_translates_foreign_ids() {
        let (local, foreign, map) = replica_pair();
        assert!(local.equals(&foreign, &map));
        assert!(!local.equals(&foreign, &EntityIdMap::default()));
    }

    #[test]
    fn merge_takes_newer_terminal_status() {
        let (mut local, mut foreign, map) = replica_pair();
        foreign.set_status(ProvenTxReqStatus::Completed, at(5));
        foreign.proven_tx_id = Some(500);
        assert!(local.merge_existing(&foreign, &map, at(6)).unwrap());
        assert_eq!(local.status, ProvenTxReqStatus::Completed);
        assert_eq!(local.proven_tx_id, Some(5));
        assert!(!local.notified);
    }

    #[test]
    fn merge_refuses_to_leave_terminal_status() {
        let (mut local, mut foreign, map) = replica_pair();
        local.set_status(ProvenTxReqStatus::Invalid, at(1));
        foreign.attempts = 9;
        foreign.updated_at = at(9);
        let err = local.merge_existing(&foreign, &map, at(10)).unwrap_err();
        assert!(matches!(err, StorageError::Merge(_)));
        assert_eq!(local.status, ProvenTxReqStatus::Invalid);
    }

    #[test]
    fn merge_refuses_to_swap_terminal_status() {
        let (mut local, mut foreign, map) = replica_pair();
        local.set_status(ProvenTxReqStatus::Completed, at(1));
        local.notified = true;
        foreign.set_status(ProvenTxReqStatus::Invalid, at(2));
        foreign.updated_at = at(5);
        let err = local.merge_existing(&foreign, &map, at(6)).unwrap_err();
        assert!(matches!(err, StorageError::Merge(_)));
        assert_eq!(local.status, ProvenTxReqStatus::Completed);
        assert!(local.notified);
    }

    #[test]
    fn merge_refuses_backward_move_before_terminal() {
        let (mut local, mut foreign, map) = replica_pair();
        foreign.status = ProvenTxReqStatus::Unsent;
        foreign.updated_at = at(5);
        let err = local.merge_existing(&foreign, &map, at(6)).unwrap_err();
        assert!(matches!(err, StorageError::Merge(_)));
        assert_eq!(local.status, ProvenTxReqStatus::Unmined);
    }

    #[test]
    fn merge_keeps_notified_for_same_terminal_status() {
        let (mut local, mut foreign, map) = replica_pair();
        local.set_status(ProvenTxReqStatus::Completed, at(1));
        local.notified = true;
        foreign.set_status(ProvenTxReqStatus::Completed, at(2));
        foreign.updated_at = at(3);
        assert!(local.merge_existing(&foreign, &map, at(4)).unwrap());
        assert!(local.notified);
    }
}
