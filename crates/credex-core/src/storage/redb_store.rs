//! # redb-backed Ledger Storage
//!
//! The relational store behind every ledger engine and analytics job.
//!
//! redb provides:
//! - ACID transactions (every engine mutation is one write transaction)
//! - A single serialized writer, so "find existing row, branch, write" inside
//!   a write transaction cannot race another writer
//! - MVCC readers for the analytics jobs
//!
//! Records are postcard-encoded. Unique composite keys live in dedicated
//! index tables (`restake_keys`, `doubt_keys`, `negation_edges`, ...).

use crate::primitives::{
    MILLIS_PER_DAY, SEQ_ENDORSEMENT, SEQ_EVENT, SEQ_HISTORY, SEQ_NEGATION, SEQ_POINT,
    SEQ_RATIONALE, SEQ_USER,
};
use crate::{
    Cred, CredEvent, DailyStance, Doubt, DoubtHistory, DoubtId, Endorsement, EndorsementId,
    LedgerError, LedgerResult, Negation, NegationId, Point, PointCluster, PointId, Rationale,
    RationaleId, Restake, RestakeHistory, RestakeId, Slash, SlashHistory, SlashId, SpaceId,
    Snapshot, TopicId, UserId,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use redb::{
    AccessGuard, Database, ReadTransaction, ReadableDatabase, ReadableTable, StorageError,
    TableDefinition, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

// =============================================================================
// TABLES
// =============================================================================

/// UserId -> cred balance
const USERS: TableDefinition<u64, i64> = TableDefinition::new("users");

/// PointId -> Point
const POINTS: TableDefinition<u64, &[u8]> = TableDefinition::new("points");

/// NegationId -> Negation
const NEGATIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("negations");

/// (point, other point) -> NegationId, written in both directions.
/// The `(older, newer)` direction is the uniqueness constraint.
const NEGATION_EDGES: TableDefinition<(u64, u64), u64> = TableDefinition::new("negation_edges");

/// (user, point, endorsement id) -> Endorsement
const ENDORSEMENTS: TableDefinition<(u64, u64, u64), &[u8]> =
    TableDefinition::new("endorsements");

/// RestakeId -> Restake
const RESTAKES: TableDefinition<u64, &[u8]> = TableDefinition::new("restakes");

/// (user, point, negation) -> RestakeId (unique)
const RESTAKE_KEYS: TableDefinition<(u64, u64, u64), u64> = TableDefinition::new("restake_keys");

/// (point, negation, user) -> RestakeId
const RESTAKES_BY_PAIR: TableDefinition<(u64, u64, u64), u64> =
    TableDefinition::new("restakes_by_pair");

/// (restake id, seq) -> RestakeHistory
const RESTAKE_HISTORY: TableDefinition<(u64, u64), &[u8]> =
    TableDefinition::new("restake_history");

/// SlashId -> Slash
const SLASHES: TableDefinition<u64, &[u8]> = TableDefinition::new("slashes");

/// RestakeId -> SlashId (unique)
const SLASH_BY_RESTAKE: TableDefinition<u64, u64> = TableDefinition::new("slash_by_restake");

/// (slash id, seq) -> SlashHistory
const SLASH_HISTORY: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("slash_history");

/// DoubtId -> Doubt
const DOUBTS: TableDefinition<u64, &[u8]> = TableDefinition::new("doubts");

/// (user, point, negation) -> DoubtId (unique)
const DOUBT_KEYS: TableDefinition<(u64, u64, u64), u64> = TableDefinition::new("doubt_keys");

/// (point, negation, user) -> DoubtId
const DOUBTS_BY_PAIR: TableDefinition<(u64, u64, u64), u64> =
    TableDefinition::new("doubts_by_pair");

/// (doubt id, seq) -> DoubtHistory
const DOUBT_HISTORY: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("doubt_history");

/// (timestamp millis, seq) -> CredEvent
const CRED_EVENTS: TableDefinition<(i64, u64), &[u8]> = TableDefinition::new("cred_events");

/// (day, user, point) -> Snapshot
const SNAPSHOTS: TableDefinition<(i32, u64, u64), &[u8]> = TableDefinition::new("snapshots");

/// (day, user, point) -> DailyStance
const DAILY_STANCES: TableDefinition<(i32, u64, u64), &[u8]> =
    TableDefinition::new("daily_stances");

/// (root, point) -> PointCluster
const POINT_CLUSTERS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("point_clusters");

/// (point, root) -> depth below root
const CLUSTER_MEMBERSHIP: TableDefinition<(u64, u64), u32> =
    TableDefinition::new("cluster_membership");

/// RationaleId -> Rationale
const RATIONALES: TableDefinition<u64, &[u8]> = TableDefinition::new("rationales");

/// PointId -> TopicId (zero-or-one topic per point)
const POINT_TOPICS: TableDefinition<u64, u64> = TableDefinition::new("point_topics");

/// Metadata: sequence name -> next value
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

// =============================================================================
// CODEC HELPERS
// =============================================================================

/// Map any redb error into a storage failure.
pub(crate) fn storage(e: impl std::fmt::Display) -> LedgerError {
    LedgerError::Storage(e.to_string())
}

fn encode<T: Serialize>(value: &T) -> LedgerResult<Vec<u8>> {
    postcard::to_allocvec(value).map_err(|e| LedgerError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> LedgerResult<T> {
    postcard::from_bytes(bytes).map_err(|e| LedgerError::Serialization(e.to_string()))
}

fn decode_all<'a, K, T, I>(entries: I) -> LedgerResult<Vec<T>>
where
    K: redb::Key + 'static,
    T: DeserializeOwned,
    I: Iterator<Item = Result<(AccessGuard<'a, K>, AccessGuard<'a, &'static [u8]>), StorageError>>,
{
    let mut out = Vec::new();
    for entry in entries {
        let (_, value) = entry.map_err(storage)?;
        out.push(decode(value.value())?);
    }
    Ok(out)
}

/// Days since 0001-01-01 for 1970-01-01.
const UNIX_EPOCH_DAYS_FROM_CE: i64 = 719_163;

/// Storage key of a calendar day.
#[must_use]
pub fn day_key(day: NaiveDate) -> i32 {
    day.num_days_from_ce()
}

/// First millisecond (UTC) of `day`.
#[must_use]
pub fn day_start_millis(day: NaiveDate) -> i64 {
    (i64::from(day.num_days_from_ce()) - UNIX_EPOCH_DAYS_FROM_CE) * MILLIS_PER_DAY
}

// =============================================================================
// READ ACCESS (shared by read and write transactions)
// =============================================================================

/// Typed queries available inside any transaction.
pub trait LedgerRead {
    fn balance(&self, user: UserId) -> LedgerResult<Option<Cred>>;

    fn point(&self, id: PointId) -> LedgerResult<Option<Point>>;

    fn negation(&self, id: NegationId) -> LedgerResult<Option<Negation>>;

    /// The negation between two points, in either order.
    fn negation_between(&self, a: PointId, b: PointId) -> LedgerResult<Option<NegationId>>;

    /// Points that negate or are negated by `point`, ascending.
    fn counterpoints(&self, point: PointId) -> LedgerResult<Vec<PointId>>;

    fn endorsements(&self, user: UserId, point: PointId) -> LedgerResult<Vec<Endorsement>>;

    fn restake(&self, id: RestakeId) -> LedgerResult<Option<Restake>>;

    fn restake_for(
        &self,
        user: UserId,
        point: PointId,
        negation: PointId,
    ) -> LedgerResult<Option<Restake>>;

    /// Every user's restake on `(point, negation)`.
    fn restakes_on_pair(&self, point: PointId, negation: PointId) -> LedgerResult<Vec<Restake>>;

    fn restakes(&self) -> LedgerResult<Vec<Restake>>;

    fn slash_for_restake(&self, restake: RestakeId) -> LedgerResult<Option<Slash>>;

    fn doubt_for(
        &self,
        user: UserId,
        point: PointId,
        negation: PointId,
    ) -> LedgerResult<Option<Doubt>>;

    fn doubts_on_pair(&self, point: PointId, negation: PointId) -> LedgerResult<Vec<Doubt>>;

    fn restake_history(&self, restake: RestakeId) -> LedgerResult<Vec<RestakeHistory>>;

    fn slash_history(&self, slash: SlashId) -> LedgerResult<Vec<SlashHistory>>;

    fn doubt_history(&self, doubt: DoubtId) -> LedgerResult<Vec<DoubtHistory>>;

    /// Events with `from_ms <= ts < until_ms`, in time order.
    fn events_between(&self, from_ms: i64, until_ms: i64) -> LedgerResult<Vec<CredEvent>>;

    /// Most recent day strictly before `day` that has snapshot rows.
    fn latest_snapshot_day_before(&self, day: NaiveDate) -> LedgerResult<Option<NaiveDate>>;

    fn snapshots_on(&self, day: NaiveDate) -> LedgerResult<Vec<Snapshot>>;

    fn stances_on(&self, day: NaiveDate) -> LedgerResult<Vec<DailyStance>>;

    fn stance(
        &self,
        day: NaiveDate,
        user: UserId,
        point: PointId,
    ) -> LedgerResult<Option<DailyStance>>;

    /// Members of the cluster rooted at `root`, ascending by point id.
    fn cluster(&self, root: PointId) -> LedgerResult<Vec<PointCluster>>;

    /// Roots of every cluster containing `point`, with its depth in each.
    fn cluster_roots_of(&self, point: PointId) -> LedgerResult<Vec<(PointId, u32)>>;

    fn rationale(&self, id: RationaleId) -> LedgerResult<Option<Rationale>>;

    fn rationales(&self) -> LedgerResult<Vec<Rationale>>;

    /// Topic recorded in the `point_topics` index.
    fn indexed_topic_of(&self, point: PointId) -> LedgerResult<Option<TopicId>>;

    /// Sum of the user's endorsement rows on `point`.
    fn endorsement_total(&self, user: UserId, point: PointId) -> LedgerResult<Cred> {
        Ok(self
            .endorsements(user, point)?
            .iter()
            .map(|e| e.cred)
            .sum())
    }

    /// Sum of endorsement rows made no later than `cutoff`.
    fn endorsement_total_until(
        &self,
        user: UserId,
        point: PointId,
        cutoff: DateTime<Utc>,
    ) -> LedgerResult<Cred> {
        Ok(self
            .endorsements(user, point)?
            .iter()
            .filter(|e| e.created_at <= cutoff)
            .map(|e| e.cred)
            .sum())
    }
}

/// Both transaction kinds expose `open_table` returning a `ReadableTable`;
/// the query bodies are identical.
macro_rules! impl_ledger_read {
    ($tx:ty) => {
        impl LedgerRead for $tx {
            fn balance(&self, user: UserId) -> LedgerResult<Option<Cred>> {
                let table = self.txn.open_table(USERS).map_err(storage)?;
                Ok(table.get(user.0).map_err(storage)?.map(|v| v.value()))
            }

            fn point(&self, id: PointId) -> LedgerResult<Option<Point>> {
                let table = self.txn.open_table(POINTS).map_err(storage)?;
                match table.get(id.0).map_err(storage)? {
                    Some(data) => Ok(Some(decode(data.value())?)),
                    None => Ok(None),
                }
            }

            fn negation(&self, id: NegationId) -> LedgerResult<Option<Negation>> {
                let table = self.txn.open_table(NEGATIONS).map_err(storage)?;
                match table.get(id.0).map_err(storage)? {
                    Some(data) => Ok(Some(decode(data.value())?)),
                    None => Ok(None),
                }
            }

            fn negation_between(
                &self,
                a: PointId,
                b: PointId,
            ) -> LedgerResult<Option<NegationId>> {
                let (older, newer) = Negation::canonical_pair(a, b);
                let table = self.txn.open_table(NEGATION_EDGES).map_err(storage)?;
                Ok(table
                    .get((older.0, newer.0))
                    .map_err(storage)?
                    .map(|v| NegationId(v.value())))
            }

            fn counterpoints(&self, point: PointId) -> LedgerResult<Vec<PointId>> {
                let table = self.txn.open_table(NEGATION_EDGES).map_err(storage)?;
                let mut out = Vec::new();
                for entry in table
                    .range((point.0, 0u64)..=(point.0, u64::MAX))
                    .map_err(storage)?
                {
                    let (key, _) = entry.map_err(storage)?;
                    out.push(PointId(key.value().1));
                }
                Ok(out)
            }

            fn endorsements(
                &self,
                user: UserId,
                point: PointId,
            ) -> LedgerResult<Vec<Endorsement>> {
                let table = self.txn.open_table(ENDORSEMENTS).map_err(storage)?;
                decode_all(
                    table
                        .range((user.0, point.0, 0u64)..=(user.0, point.0, u64::MAX))
                        .map_err(storage)?,
                )
            }

            fn restake(&self, id: RestakeId) -> LedgerResult<Option<Restake>> {
                let table = self.txn.open_table(RESTAKES).map_err(storage)?;
                match table.get(id.0).map_err(storage)? {
                    Some(data) => Ok(Some(decode(data.value())?)),
                    None => Ok(None),
                }
            }

            fn restake_for(
                &self,
                user: UserId,
                point: PointId,
                negation: PointId,
            ) -> LedgerResult<Option<Restake>> {
                let keys = self.txn.open_table(RESTAKE_KEYS).map_err(storage)?;
                let id = keys
                    .get((user.0, point.0, negation.0))
                    .map_err(storage)?
                    .map(|v| v.value());
                match id {
                    Some(id) => self.restake(RestakeId(id)),
                    None => Ok(None),
                }
            }

            fn restakes_on_pair(
                &self,
                point: PointId,
                negation: PointId,
            ) -> LedgerResult<Vec<Restake>> {
                let index = self.txn.open_table(RESTAKES_BY_PAIR).map_err(storage)?;
                let mut ids = Vec::new();
                for entry in index
                    .range((point.0, negation.0, 0u64)..=(point.0, negation.0, u64::MAX))
                    .map_err(storage)?
                {
                    let (_, value) = entry.map_err(storage)?;
                    ids.push(RestakeId(value.value()));
                }
                let mut out = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(restake) = self.restake(id)? {
                        out.push(restake);
                    }
                }
                Ok(out)
            }

            fn restakes(&self) -> LedgerResult<Vec<Restake>> {
                let table = self.txn.open_table(RESTAKES).map_err(storage)?;
                decode_all(table.iter().map_err(storage)?)
            }

            fn slash_for_restake(&self, restake: RestakeId) -> LedgerResult<Option<Slash>> {
                let index = self.txn.open_table(SLASH_BY_RESTAKE).map_err(storage)?;
                let id = index.get(restake.0).map_err(storage)?.map(|v| v.value());
                let Some(id) = id else {
                    return Ok(None);
                };
                let table = self.txn.open_table(SLASHES).map_err(storage)?;
                match table.get(id).map_err(storage)? {
                    Some(data) => Ok(Some(decode(data.value())?)),
                    None => Ok(None),
                }
            }

            fn doubt_for(
                &self,
                user: UserId,
                point: PointId,
                negation: PointId,
            ) -> LedgerResult<Option<Doubt>> {
                let keys = self.txn.open_table(DOUBT_KEYS).map_err(storage)?;
                let id = keys
                    .get((user.0, point.0, negation.0))
                    .map_err(storage)?
                    .map(|v| v.value());
                let Some(id) = id else {
                    return Ok(None);
                };
                let table = self.txn.open_table(DOUBTS).map_err(storage)?;
                match table.get(id).map_err(storage)? {
                    Some(data) => Ok(Some(decode(data.value())?)),
                    None => Ok(None),
                }
            }

            fn doubts_on_pair(
                &self,
                point: PointId,
                negation: PointId,
            ) -> LedgerResult<Vec<Doubt>> {
                let index = self.txn.open_table(DOUBTS_BY_PAIR).map_err(storage)?;
                let table = self.txn.open_table(DOUBTS).map_err(storage)?;
                let mut out = Vec::new();
                for entry in index
                    .range((point.0, negation.0, 0u64)..=(point.0, negation.0, u64::MAX))
                    .map_err(storage)?
                {
                    let (_, value) = entry.map_err(storage)?;
                    if let Some(data) = table.get(value.value()).map_err(storage)? {
                        out.push(decode(data.value())?);
                    }
                }
                Ok(out)
            }

            fn restake_history(&self, restake: RestakeId) -> LedgerResult<Vec<RestakeHistory>> {
                let table = self.txn.open_table(RESTAKE_HISTORY).map_err(storage)?;
                decode_all(
                    table
                        .range((restake.0, 0u64)..=(restake.0, u64::MAX))
                        .map_err(storage)?,
                )
            }

            fn slash_history(&self, slash: SlashId) -> LedgerResult<Vec<SlashHistory>> {
                let table = self.txn.open_table(SLASH_HISTORY).map_err(storage)?;
                decode_all(
                    table
                        .range((slash.0, 0u64)..=(slash.0, u64::MAX))
                        .map_err(storage)?,
                )
            }

            fn doubt_history(&self, doubt: DoubtId) -> LedgerResult<Vec<DoubtHistory>> {
                let table = self.txn.open_table(DOUBT_HISTORY).map_err(storage)?;
                decode_all(
                    table
                        .range((doubt.0, 0u64)..=(doubt.0, u64::MAX))
                        .map_err(storage)?,
                )
            }

            fn events_between(&self, from_ms: i64, until_ms: i64) -> LedgerResult<Vec<CredEvent>> {
                if from_ms >= until_ms {
                    return Ok(Vec::new());
                }
                let table = self.txn.open_table(CRED_EVENTS).map_err(storage)?;
                decode_all(
                    table
                        .range((from_ms, 0u64)..(until_ms, 0u64))
                        .map_err(storage)?,
                )
            }

            fn latest_snapshot_day_before(
                &self,
                day: NaiveDate,
            ) -> LedgerResult<Option<NaiveDate>> {
                let table = self.txn.open_table(SNAPSHOTS).map_err(storage)?;
                let mut range = table
                    .range((i32::MIN, 0u64, 0u64)..(day_key(day), 0u64, 0u64))
                    .map_err(storage)?;
                match range.next_back() {
                    Some(entry) => {
                        let (key, _) = entry.map_err(storage)?;
                        let (days, _, _) = key.value();
                        Ok(NaiveDate::from_num_days_from_ce_opt(days))
                    }
                    None => Ok(None),
                }
            }

            fn snapshots_on(&self, day: NaiveDate) -> LedgerResult<Vec<Snapshot>> {
                let table = self.txn.open_table(SNAPSHOTS).map_err(storage)?;
                let key = day_key(day);
                decode_all(
                    table
                        .range((key, 0u64, 0u64)..=(key, u64::MAX, u64::MAX))
                        .map_err(storage)?,
                )
            }

            fn stances_on(&self, day: NaiveDate) -> LedgerResult<Vec<DailyStance>> {
                let table = self.txn.open_table(DAILY_STANCES).map_err(storage)?;
                let key = day_key(day);
                decode_all(
                    table
                        .range((key, 0u64, 0u64)..=(key, u64::MAX, u64::MAX))
                        .map_err(storage)?,
                )
            }

            fn stance(
                &self,
                day: NaiveDate,
                user: UserId,
                point: PointId,
            ) -> LedgerResult<Option<DailyStance>> {
                let table = self.txn.open_table(DAILY_STANCES).map_err(storage)?;
                match table.get((day_key(day), user.0, point.0)).map_err(storage)? {
                    Some(data) => Ok(Some(decode(data.value())?)),
                    None => Ok(None),
                }
            }

            fn cluster(&self, root: PointId) -> LedgerResult<Vec<PointCluster>> {
                let table = self.txn.open_table(POINT_CLUSTERS).map_err(storage)?;
                decode_all(
                    table
                        .range((root.0, 0u64)..=(root.0, u64::MAX))
                        .map_err(storage)?,
                )
            }

            fn cluster_roots_of(&self, point: PointId) -> LedgerResult<Vec<(PointId, u32)>> {
                let table = self.txn.open_table(CLUSTER_MEMBERSHIP).map_err(storage)?;
                let mut out = Vec::new();
                for entry in table
                    .range((point.0, 0u64)..=(point.0, u64::MAX))
                    .map_err(storage)?
                {
                    let (key, depth) = entry.map_err(storage)?;
                    out.push((PointId(key.value().1), depth.value()));
                }
                Ok(out)
            }

            fn rationale(&self, id: RationaleId) -> LedgerResult<Option<Rationale>> {
                let table = self.txn.open_table(RATIONALES).map_err(storage)?;
                match table.get(id.0).map_err(storage)? {
                    Some(data) => Ok(Some(decode(data.value())?)),
                    None => Ok(None),
                }
            }

            fn rationales(&self) -> LedgerResult<Vec<Rationale>> {
                let table = self.txn.open_table(RATIONALES).map_err(storage)?;
                decode_all(table.iter().map_err(storage)?)
            }

            fn indexed_topic_of(&self, point: PointId) -> LedgerResult<Option<TopicId>> {
                let table = self.txn.open_table(POINT_TOPICS).map_err(storage)?;
                Ok(table
                    .get(point.0)
                    .map_err(storage)?
                    .map(|v| TopicId(v.value())))
            }
        }
    };
}

// =============================================================================
// TRANSACTIONS
// =============================================================================

/// A read-only MVCC snapshot of the ledger.
pub struct ReadTx {
    txn: ReadTransaction,
}

/// A write transaction. Committed by [`LedgerStore::write`] when the closure
/// returns `Ok`, aborted otherwise.
pub struct WriteTx {
    txn: WriteTransaction,
}

impl_ledger_read!(ReadTx);
impl_ledger_read!(WriteTx);

impl WriteTx {
    /// Allocate the next value of a metadata sequence (starting at 1).
    pub(crate) fn next_id(&self, sequence: &str) -> LedgerResult<u64> {
        let mut table = self.txn.open_table(METADATA).map_err(storage)?;
        let next = table
            .get(sequence)
            .map_err(storage)?
            .map(|v| v.value())
            .unwrap_or(1);
        table
            .insert(sequence, next.saturating_add(1))
            .map_err(storage)?;
        Ok(next)
    }

    pub fn insert_user(&self, initial_cred: Cred) -> LedgerResult<UserId> {
        let id = UserId(self.next_id(SEQ_USER)?);
        let mut table = self.txn.open_table(USERS).map_err(storage)?;
        table.insert(id.0, initial_cred).map_err(storage)?;
        Ok(id)
    }

    /// Apply `balance = balance + delta` and return the new balance.
    pub fn adjust_balance(&self, user: UserId, delta: Cred) -> LedgerResult<Cred> {
        let mut table = self.txn.open_table(USERS).map_err(storage)?;
        let current = table
            .get(user.0)
            .map_err(storage)?
            .map(|v| v.value())
            .ok_or(LedgerError::UserNotFound(user))?;
        let next = current.saturating_add(delta);
        table.insert(user.0, next).map_err(storage)?;
        Ok(next)
    }

    pub fn insert_point(
        &self,
        content: &str,
        created_by: UserId,
        at: DateTime<Utc>,
        space: SpaceId,
    ) -> LedgerResult<Point> {
        let point = Point {
            id: PointId(self.next_id(SEQ_POINT)?),
            content: content.to_string(),
            created_by,
            created_at: at,
            is_active: true,
            space,
        };
        let bytes = encode(&point)?;
        let mut table = self.txn.open_table(POINTS).map_err(storage)?;
        table.insert(point.id.0, bytes.as_slice()).map_err(storage)?;
        Ok(point)
    }

    /// Insert a negation unless the canonical pair already exists.
    ///
    /// Returns the id of the row now stored for the pair and whether it was
    /// created by this call.
    pub fn insert_negation_if_absent(
        &self,
        older: PointId,
        newer: PointId,
        created_by: UserId,
        is_objection: bool,
        at: DateTime<Utc>,
        space: SpaceId,
    ) -> LedgerResult<(NegationId, bool)> {
        let mut edges = self.txn.open_table(NEGATION_EDGES).map_err(storage)?;
        let existing = edges
            .get((older.0, newer.0))
            .map_err(storage)?
            .map(|v| v.value());
        if let Some(existing) = existing {
            return Ok((NegationId(existing), false));
        }

        let negation = Negation {
            id: NegationId(self.next_id(SEQ_NEGATION)?),
            older_point_id: older,
            newer_point_id: newer,
            created_by,
            is_objection,
            created_at: at,
            space,
        };
        let bytes = encode(&negation)?;
        let mut table = self.txn.open_table(NEGATIONS).map_err(storage)?;
        table
            .insert(negation.id.0, bytes.as_slice())
            .map_err(storage)?;
        edges
            .insert((older.0, newer.0), negation.id.0)
            .map_err(storage)?;
        edges
            .insert((newer.0, older.0), negation.id.0)
            .map_err(storage)?;
        Ok((negation.id, true))
    }

    pub fn insert_endorsement(
        &self,
        user: UserId,
        point: PointId,
        cred: Cred,
        at: DateTime<Utc>,
        space: SpaceId,
    ) -> LedgerResult<Endorsement> {
        let endorsement = Endorsement {
            id: EndorsementId(self.next_id(SEQ_ENDORSEMENT)?),
            user_id: user,
            point_id: point,
            cred,
            created_at: at,
            space,
        };
        self.put_endorsement(&endorsement)?;
        Ok(endorsement)
    }

    pub fn put_endorsement(&self, endorsement: &Endorsement) -> LedgerResult<()> {
        let bytes = encode(endorsement)?;
        let mut table = self.txn.open_table(ENDORSEMENTS).map_err(storage)?;
        table
            .insert(
                (
                    endorsement.user_id.0,
                    endorsement.point_id.0,
                    endorsement.id.0,
                ),
                bytes.as_slice(),
            )
            .map_err(storage)?;
        Ok(())
    }

    pub fn remove_endorsement(&self, endorsement: &Endorsement) -> LedgerResult<()> {
        let mut table = self.txn.open_table(ENDORSEMENTS).map_err(storage)?;
        table
            .remove((
                endorsement.user_id.0,
                endorsement.point_id.0,
                endorsement.id.0,
            ))
            .map_err(storage)?;
        Ok(())
    }

    /// Insert or update a restake together with its unique-key indexes.
    pub fn put_restake(&self, restake: &Restake) -> LedgerResult<()> {
        let bytes = encode(restake)?;
        let mut table = self.txn.open_table(RESTAKES).map_err(storage)?;
        table.insert(restake.id.0, bytes.as_slice()).map_err(storage)?;
        let mut keys = self.txn.open_table(RESTAKE_KEYS).map_err(storage)?;
        keys.insert(
            (restake.user_id.0, restake.point_id.0, restake.negation_id.0),
            restake.id.0,
        )
        .map_err(storage)?;
        let mut by_pair = self.txn.open_table(RESTAKES_BY_PAIR).map_err(storage)?;
        by_pair
            .insert(
                (restake.point_id.0, restake.negation_id.0, restake.user_id.0),
                restake.id.0,
            )
            .map_err(storage)?;
        Ok(())
    }

    pub fn append_restake_history(&self, entry: &RestakeHistory) -> LedgerResult<()> {
        let seq = self.next_id(SEQ_HISTORY)?;
        let bytes = encode(entry)?;
        let mut table = self.txn.open_table(RESTAKE_HISTORY).map_err(storage)?;
        table
            .insert((entry.restake_id.0, seq), bytes.as_slice())
            .map_err(storage)?;
        Ok(())
    }

    pub fn put_slash(&self, slash: &Slash) -> LedgerResult<()> {
        let bytes = encode(slash)?;
        let mut table = self.txn.open_table(SLASHES).map_err(storage)?;
        table.insert(slash.id.0, bytes.as_slice()).map_err(storage)?;
        let mut index = self.txn.open_table(SLASH_BY_RESTAKE).map_err(storage)?;
        index
            .insert(slash.restake_id.0, slash.id.0)
            .map_err(storage)?;
        Ok(())
    }

    pub fn append_slash_history(&self, entry: &SlashHistory) -> LedgerResult<()> {
        let seq = self.next_id(SEQ_HISTORY)?;
        let bytes = encode(entry)?;
        let mut table = self.txn.open_table(SLASH_HISTORY).map_err(storage)?;
        table
            .insert((entry.slash_id.0, seq), bytes.as_slice())
            .map_err(storage)?;
        Ok(())
    }

    /// Insert or update a doubt together with its unique-key indexes.
    pub fn put_doubt(&self, doubt: &Doubt) -> LedgerResult<()> {
        let bytes = encode(doubt)?;
        let mut table = self.txn.open_table(DOUBTS).map_err(storage)?;
        table.insert(doubt.id.0, bytes.as_slice()).map_err(storage)?;
        let mut keys = self.txn.open_table(DOUBT_KEYS).map_err(storage)?;
        keys.insert(
            (doubt.user_id.0, doubt.point_id.0, doubt.negation_id.0),
            doubt.id.0,
        )
        .map_err(storage)?;
        let mut by_pair = self.txn.open_table(DOUBTS_BY_PAIR).map_err(storage)?;
        by_pair
            .insert(
                (doubt.point_id.0, doubt.negation_id.0, doubt.user_id.0),
                doubt.id.0,
            )
            .map_err(storage)?;
        Ok(())
    }

    pub fn append_doubt_history(&self, entry: &DoubtHistory) -> LedgerResult<()> {
        let seq = self.next_id(SEQ_HISTORY)?;
        let bytes = encode(entry)?;
        let mut table = self.txn.open_table(DOUBT_HISTORY).map_err(storage)?;
        table
            .insert((entry.doubt_id.0, seq), bytes.as_slice())
            .map_err(storage)?;
        Ok(())
    }

    pub fn append_event(&self, event: &CredEvent) -> LedgerResult<()> {
        let seq = self.next_id(SEQ_EVENT)?;
        let bytes = encode(event)?;
        let mut table = self.txn.open_table(CRED_EVENTS).map_err(storage)?;
        table
            .insert((event.ts.timestamp_millis(), seq), bytes.as_slice())
            .map_err(storage)?;
        Ok(())
    }

    /// Upsert keyed by `(snap_day, user, point)`.
    pub fn put_snapshot(&self, snapshot: &Snapshot) -> LedgerResult<()> {
        let bytes = encode(snapshot)?;
        let mut table = self.txn.open_table(SNAPSHOTS).map_err(storage)?;
        table
            .insert(
                (
                    day_key(snapshot.snap_day),
                    snapshot.user_id.0,
                    snapshot.point_id.0,
                ),
                bytes.as_slice(),
            )
            .map_err(storage)?;
        Ok(())
    }

    /// Upsert keyed by `(snap_day, user, point)`.
    pub fn put_stance(&self, stance: &DailyStance) -> LedgerResult<()> {
        let bytes = encode(stance)?;
        let mut table = self.txn.open_table(DAILY_STANCES).map_err(storage)?;
        table
            .insert(
                (day_key(stance.snap_day), stance.user_id.0, stance.point_id.0),
                bytes.as_slice(),
            )
            .map_err(storage)?;
        Ok(())
    }

    /// Replace every membership row of the cluster rooted at `root`.
    pub fn replace_cluster(&self, root: PointId, members: &[PointCluster]) -> LedgerResult<()> {
        let stale: Vec<u64> = self.cluster(root)?.iter().map(|m| m.point_id.0).collect();
        let mut table = self.txn.open_table(POINT_CLUSTERS).map_err(storage)?;
        let mut membership = self.txn.open_table(CLUSTER_MEMBERSHIP).map_err(storage)?;
        for point in stale {
            table.remove((root.0, point)).map_err(storage)?;
            membership.remove((point, root.0)).map_err(storage)?;
        }
        for member in members {
            let bytes = encode(member)?;
            table
                .insert((root.0, member.point_id.0), bytes.as_slice())
                .map_err(storage)?;
            membership
                .insert((member.point_id.0, root.0), member.depth)
                .map_err(storage)?;
        }
        Ok(())
    }

    /// Store a rationale. A point keeps the first topic it was indexed under.
    pub fn put_rationale(&self, rationale: &Rationale) -> LedgerResult<()> {
        let bytes = encode(rationale)?;
        let mut table = self.txn.open_table(RATIONALES).map_err(storage)?;
        table
            .insert(rationale.id.0, bytes.as_slice())
            .map_err(storage)?;
        if let Some(topic) = rationale.topic_id {
            let mut topics = self.txn.open_table(POINT_TOPICS).map_err(storage)?;
            for point in rationale.point_ids() {
                let indexed = topics.get(point.0).map_err(storage)?.is_some();
                if !indexed {
                    topics.insert(point.0, topic.0).map_err(storage)?;
                }
            }
        }
        Ok(())
    }

    pub fn next_rationale_id(&self) -> LedgerResult<RationaleId> {
        Ok(RationaleId(self.next_id(SEQ_RATIONALE)?))
    }
}

// =============================================================================
// STORE
// =============================================================================

/// The on-disk ledger database.
pub struct LedgerStore {
    db: Database,
}

impl std::fmt::Debug for LedgerStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerStore").finish_non_exhaustive()
    }
}

impl LedgerStore {
    /// Open or create a ledger database at the given path.
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let db = Database::create(path.as_ref()).map_err(storage)?;

        // Initialize tables if they don't exist
        let write_txn = db.begin_write().map_err(storage)?;
        {
            write_txn.open_table(USERS).map_err(storage)?;
            write_txn.open_table(POINTS).map_err(storage)?;
            write_txn.open_table(NEGATIONS).map_err(storage)?;
            write_txn.open_table(NEGATION_EDGES).map_err(storage)?;
            write_txn.open_table(ENDORSEMENTS).map_err(storage)?;
            write_txn.open_table(RESTAKES).map_err(storage)?;
            write_txn.open_table(RESTAKE_KEYS).map_err(storage)?;
            write_txn.open_table(RESTAKES_BY_PAIR).map_err(storage)?;
            write_txn.open_table(RESTAKE_HISTORY).map_err(storage)?;
            write_txn.open_table(SLASHES).map_err(storage)?;
            write_txn.open_table(SLASH_BY_RESTAKE).map_err(storage)?;
            write_txn.open_table(SLASH_HISTORY).map_err(storage)?;
            write_txn.open_table(DOUBTS).map_err(storage)?;
            write_txn.open_table(DOUBT_KEYS).map_err(storage)?;
            write_txn.open_table(DOUBTS_BY_PAIR).map_err(storage)?;
            write_txn.open_table(DOUBT_HISTORY).map_err(storage)?;
            write_txn.open_table(CRED_EVENTS).map_err(storage)?;
            write_txn.open_table(SNAPSHOTS).map_err(storage)?;
            write_txn.open_table(DAILY_STANCES).map_err(storage)?;
            write_txn.open_table(POINT_CLUSTERS).map_err(storage)?;
            write_txn.open_table(CLUSTER_MEMBERSHIP).map_err(storage)?;
            write_txn.open_table(RATIONALES).map_err(storage)?;
            write_txn.open_table(POINT_TOPICS).map_err(storage)?;
            write_txn.open_table(METADATA).map_err(storage)?;
        }
        write_txn.commit().map_err(storage)?;

        Ok(Self { db })
    }

    /// Run `f` inside one write transaction.
    ///
    /// Commits when `f` returns `Ok`; otherwise every write made by `f` is
    /// rolled back and the error is returned unchanged.
    pub fn write<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&WriteTx) -> LedgerResult<T>,
    {
        let tx = WriteTx {
            txn: self.db.begin_write().map_err(storage)?,
        };
        match f(&tx) {
            Ok(value) => {
                tx.txn.commit().map_err(storage)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = tx.txn.abort() {
                    tracing::warn!(error = %abort, "write transaction abort failed");
                }
                Err(e)
            }
        }
    }

    /// Run `f` against a consistent read snapshot.
    pub fn read<T, F>(&self, f: F) -> LedgerResult<T>
    where
        F: FnOnce(&ReadTx) -> LedgerResult<T>,
    {
        let tx = ReadTx {
            txn: self.db.begin_read().map_err(storage)?,
        };
        f(&tx)
    }

    /// Create a user with an initial cred balance.
    pub fn create_user(&self, initial_cred: Cred) -> LedgerResult<UserId> {
        self.write(|tx| tx.insert_user(initial_cred))
    }

    /// Create an active point.
    pub fn create_point(
        &self,
        content: &str,
        created_by: UserId,
        at: DateTime<Utc>,
    ) -> LedgerResult<PointId> {
        self.write(|tx| {
            tx.insert_point(content, created_by, at, SpaceId::default())
                .map(|p| p.id)
        })
    }

    /// Store a rationale, assigning it a fresh id.
    pub fn create_rationale(&self, mut rationale: Rationale) -> LedgerResult<RationaleId> {
        self.write(|tx| {
            rationale.id = tx.next_rationale_id()?;
            tx.put_rationale(&rationale)?;
            Ok(rationale.id)
        })
    }

    pub fn balance_of(&self, user: UserId) -> LedgerResult<Cred> {
        self.read(|tx| tx.balance(user))?
            .ok_or(LedgerError::UserNotFound(user))
    }
}

// =============================================================================
// TESTS
// =============================================================================
