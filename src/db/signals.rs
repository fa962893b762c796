//! Signal store: persistence, dedup index, and decayed aggregation queries.
//!
//! Rows are fetched with plain SQL; the recency-weighted math runs in Rust
//! so the decay buckets stay bit-for-bit identical everywhere they are used.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Row};

use super::{DbError, PulseDb};
use crate::signals::decay::{age_days, parse_ts, recency_weight};
use crate::types::{
    ScopeChain, ScopeLevel, Signal, SignalBalance, SignalCategory, SignalSource, SignalStatus,
    Valence,
};

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const SIGNAL_COLUMNS: &str = "id, signal_type, category, valence, magnitude, entity_type, entity_id,
    scope_task_id, scope_project_id, scope_retainer_id, scope_brand_id, scope_client_id, scope_person_id,
    source_type, source_id, source_url, source_excerpt,
    detection_confidence, attribution_confidence,
    occurred_at, detected_at, expires_at, status,
    consumed_by_issue_id, balanced_by_signal_id,
    detector_id, detector_version, created_at, updated_at";

fn ts(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    Ok(parse_ts(&raw).unwrap_or(DateTime::<Utc>::MIN_UTC))
}

fn opt_ts(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().and_then(parse_ts))
}

fn signal_from_row(row: &Row) -> rusqlite::Result<Signal> {
    let valence_raw: i8 = row.get(3)?;
    let category_raw: String = row.get(2)?;
    let status_raw: String = row.get(22)?;
    Ok(Signal {
        id: row.get(0)?,
        signal_type: row.get(1)?,
        category: SignalCategory::from_str_lossy(&category_raw),
        valence: Valence::from_i8(valence_raw).unwrap_or(Valence::Neutral),
        magnitude: row.get(4)?,
        entity_type: row.get(5)?,
        entity_id: row.get(6)?,
        scope: ScopeChain {
            task_id: row.get(7)?,
            project_id: row.get(8)?,
            retainer_id: row.get(9)?,
            brand_id: row.get(10)?,
            client_id: row.get(11)?,
            person_id: row.get(12)?,
        },
        source: SignalSource {
            source_type: row.get(13)?,
            source_id: row.get(14)?,
            source_url: row.get(15)?,
            source_excerpt: row.get(16)?,
        },
        detection_confidence: row.get(17)?,
        attribution_confidence: row.get(18)?,
        occurred_at: ts(row, 19)?,
        detected_at: ts(row, 20)?,
        expires_at: opt_ts(row, 21)?,
        status: SignalStatus::from_str_lossy(&status_raw),
        consumed_by_issue_id: row.get(23)?,
        balanced_by_signal_id: row.get(24)?,
        detector_id: row.get(25)?,
        detector_version: row.get(26)?,
        created_at: ts(row, 27)?,
        updated_at: ts(row, 28)?,
    })
}

// ---------------------------------------------------------------------------
// Query inputs / outputs
// ---------------------------------------------------------------------------

/// Facade-level signal listing filter. All fields optional; `limit`/`offset`
/// paginate.
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub status: Option<SignalStatus>,
    pub valence: Option<Valence>,
    pub category: Option<SignalCategory>,
    pub scope: Option<(ScopeLevel, String)>,
    pub entity: Option<(String, String)>,
    pub window_days: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// One scope group returned by the formation query: the active signal set
/// plus recency-weighted aggregates.
#[derive(Debug, Clone, Default)]
pub struct FormationGroup {
    pub scope_id: String,
    pub signal_ids: Vec<String>,
    pub signal_count: usize,
    pub balance: SignalBalance,
    pub category_count: usize,
    pub type_counts: HashMap<String, usize>,
}

// ---------------------------------------------------------------------------
// Store operations
// ---------------------------------------------------------------------------

impl PulseDb {
    /// Append one signal.
    pub fn insert_signal(&self, signal: &Signal) -> Result<(), DbError> {
        self.conn_ref().execute(
            &format!(
                "INSERT INTO signals ({SIGNAL_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                         ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27, ?28, ?29)"
            ),
            params![
                signal.id,
                signal.signal_type,
                signal.category.as_str(),
                signal.valence.as_i8(),
                signal.magnitude,
                signal.entity_type,
                signal.entity_id,
                signal.scope.task_id,
                signal.scope.project_id,
                signal.scope.retainer_id,
                signal.scope.brand_id,
                signal.scope.client_id,
                signal.scope.person_id,
                signal.source.source_type,
                signal.source.source_id,
                signal.source.source_url,
                signal.source.source_excerpt,
                signal.detection_confidence,
                signal.attribution_confidence,
                signal.occurred_at.to_rfc3339(),
                signal.detected_at.to_rfc3339(),
                signal.expires_at.map(|t| t.to_rfc3339()),
                signal.status.as_str(),
                signal.consumed_by_issue_id,
                signal.balanced_by_signal_id,
                signal.detector_id,
                signal.detector_version,
                signal.created_at.to_rfc3339(),
                signal.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Append a detector's batch atomically. Insert plus any immediate
    /// consumption bookkeeping must commit or roll back together.
    pub fn insert_signals(&self, signals: &[Signal]) -> Result<usize, DbError> {
        self.with_transaction(|db| {
            for signal in signals {
                db.insert_signal(signal)?;
            }
            Ok(signals.len())
        })
    }

    /// Fetch one signal by id.
    pub fn get_signal(&self, id: &str) -> Result<Option<Signal>, DbError> {
        match self.conn_ref().query_row(
            &format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE id = ?1"),
            params![id],
            signal_from_row,
        ) {
            Ok(signal) => Ok(Some(signal)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(DbError::Sqlite(e)),
        }
    }

    /// Signals observed on one entity, optionally filtered by status.
    pub fn find_signals_by_entity(
        &self,
        entity_type: &str,
        entity_id: &str,
        status: Option<SignalStatus>,
    ) -> Result<Vec<Signal>, DbError> {
        self.list_signals(&SignalFilter {
            entity: Some((entity_type.to_string(), entity_id.to_string())),
            status,
            ..Default::default()
        })
    }

    /// Signals aggregating under one scope id, optionally filtered.
    pub fn find_signals_by_scope(
        &self,
        level: ScopeLevel,
        scope_id: &str,
        status: Option<SignalStatus>,
        valence: Option<Valence>,
    ) -> Result<Vec<Signal>, DbError> {
        self.list_signals(&SignalFilter {
            scope: Some((level, scope_id.to_string())),
            status,
            valence,
            ..Default::default()
        })
    }

    /// Active signals within a detection window, optionally narrowed to a
    /// type set and scope.
    pub fn find_active_signals(
        &self,
        types: Option<&[&str]>,
        scope: Option<(ScopeLevel, &str)>,
        window_days: i64,
        limit: i64,
    ) -> Result<Vec<Signal>, DbError> {
        let mut sql = format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals
             WHERE status = 'active'
               AND detected_at >= ?1"
        );
        let cutoff = (Utc::now() - chrono::Duration::days(window_days)).to_rfc3339();
        let mut args: Vec<String> = vec![cutoff];

        if let Some(types) = types {
            if !types.is_empty() {
                let placeholders = (0..types.len())
                    .map(|i| format!("?{}", args.len() + i + 1))
                    .collect::<Vec<_>>()
                    .join(", ");
                sql.push_str(&format!(" AND signal_type IN ({placeholders})"));
                args.extend(types.iter().map(|t| t.to_string()));
            }
        }
        if let Some((level, scope_id)) = scope {
            sql.push_str(&format!(" AND {} = ?{}", level.column(), args.len() + 1));
            args.push(scope_id.to_string());
        }
        sql.push_str(&format!(" ORDER BY detected_at DESC LIMIT ?{}", args.len() + 1));
        args.push(limit.to_string());

        let mut stmt = self.conn_ref().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), signal_from_row)?;
        let mut signals = Vec::new();
        for row in rows {
            signals.push(row?);
        }
        Ok(signals)
    }

    /// Facade listing with pagination.
    pub fn list_signals(&self, filter: &SignalFilter) -> Result<Vec<Signal>, DbError> {
        let mut sql = format!("SELECT {SIGNAL_COLUMNS} FROM signals WHERE 1=1");
        let mut args: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            args.push(status.as_str().to_string());
            sql.push_str(&format!(" AND status = ?{}", args.len()));
        }
        if let Some(valence) = filter.valence {
            args.push(valence.as_i8().to_string());
            sql.push_str(&format!(" AND valence = ?{}", args.len()));
        }
        if let Some(category) = filter.category {
            args.push(category.as_str().to_string());
            sql.push_str(&format!(" AND category = ?{}", args.len()));
        }
        if let Some((level, ref scope_id)) = filter.scope {
            args.push(scope_id.clone());
            sql.push_str(&format!(" AND {} = ?{}", level.column(), args.len()));
        }
        if let Some((ref entity_type, ref entity_id)) = filter.entity {
            args.push(entity_type.clone());
            sql.push_str(&format!(" AND entity_type = ?{}", args.len()));
            args.push(entity_id.clone());
            sql.push_str(&format!(" AND entity_id = ?{}", args.len()));
        }
        if let Some(window_days) = filter.window_days {
            args.push((Utc::now() - chrono::Duration::days(window_days)).to_rfc3339());
            sql.push_str(&format!(" AND detected_at >= ?{}", args.len()));
        }

        sql.push_str(" ORDER BY detected_at DESC");
        if let Some(limit) = filter.limit {
            args.push(limit.to_string());
            sql.push_str(&format!(" LIMIT ?{}", args.len()));
            if let Some(offset) = filter.offset {
                args.push(offset.to_string());
                sql.push_str(&format!(" OFFSET ?{}", args.len()));
            }
        }

        let mut stmt = self.conn_ref().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), signal_from_row)?;
        let mut signals = Vec::new();
        for row in rows {
            signals.push(row?);
        }
        Ok(signals)
    }

    /// The dedup index: every (signal_type, entity_id) pair with an active
    /// signal. Detectors load this once per run and skip emission on a hit.
    pub fn load_active_signal_index(&self) -> Result<HashSet<(String, String)>, DbError> {
        let mut stmt = self
            .conn_ref()
            .prepare("SELECT signal_type, entity_id FROM signals WHERE status = 'active'")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut index = HashSet::new();
        for row in rows {
            index.insert(row?);
        }
        Ok(index)
    }

    /// Group active signals of the given types by the requested scope column
    /// and return recency-weighted aggregates per group. Signals whose chain
    /// is not resolved at that level simply never appear.
    pub fn find_for_issue_formation(
        &self,
        types: &[String],
        level: ScopeLevel,
        min_count: usize,
        min_negative_magnitude: f64,
    ) -> Result<Vec<FormationGroup>, DbError> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let column = level.column();
        let placeholders = (1..=types.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT id, signal_type, category, valence, magnitude, detected_at, {column}
             FROM signals
             WHERE status = 'active'
               AND {column} IS NOT NULL
               AND signal_type IN ({placeholders})
             ORDER BY {column}, detected_at"
        );

        let mut stmt = self.conn_ref().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(types.iter()), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i8>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let now = Utc::now();
        let mut groups: HashMap<String, (FormationGroup, HashSet<SignalCategory>)> = HashMap::new();

        for row in rows {
            let (id, signal_type, category_raw, valence_raw, magnitude, detected_raw, scope_id) =
                row?;
            let detected = parse_ts(&detected_raw).unwrap_or(DateTime::<Utc>::MIN_UTC);
            let weight = recency_weight(age_days(detected, now));
            let valence = Valence::from_i8(valence_raw).unwrap_or(Valence::Neutral);
            let category = SignalCategory::from_str_lossy(&category_raw);

            let entry = groups.entry(scope_id.clone()).or_insert_with(|| {
                (
                    FormationGroup {
                        scope_id,
                        ..Default::default()
                    },
                    HashSet::new(),
                )
            });
            let (group, categories) = entry;

            group.signal_ids.push(id);
            group.signal_count += 1;
            *group.type_counts.entry(signal_type).or_insert(0) += 1;
            categories.insert(category);
            match valence {
                Valence::Negative => {
                    group.balance.negative_count += 1;
                    group.balance.negative_magnitude += magnitude * weight;
                }
                Valence::Neutral => group.balance.neutral_count += 1,
                Valence::Positive => {
                    group.balance.positive_count += 1;
                    group.balance.positive_magnitude += magnitude * weight;
                }
            }
        }

        let mut result: Vec<FormationGroup> = groups
            .into_values()
            .map(|(mut group, categories)| {
                group.category_count = categories.len();
                group.balance.net_score =
                    group.balance.positive_magnitude - group.balance.negative_magnitude;
                group
            })
            .filter(|g| {
                g.signal_count >= min_count && g.balance.negative_magnitude >= min_negative_magnitude
            })
            .collect();
        result.sort_by(|a, b| a.scope_id.cmp(&b.scope_id));
        Ok(result)
    }

    /// Fold signals into an issue. Only active rows transition.
    pub fn mark_signals_consumed(&self, ids: &[String], issue_id: &str) -> Result<usize, DbError> {
        let mut updated = 0;
        for id in ids {
            updated += self.conn_ref().execute(
                "UPDATE signals
                 SET status = 'consumed', consumed_by_issue_id = ?2, updated_at = ?3
                 WHERE id = ?1 AND status = 'active'",
                params![id, issue_id, Utc::now().to_rfc3339()],
            )?;
        }
        Ok(updated)
    }

    /// Cancel a signal against an opposite-valence one on the same entity.
    /// The trigger is external; this only exposes the transition.
    pub fn mark_signal_balanced(&self, id: &str, by_id: &str) -> Result<bool, DbError> {
        let updated = self.conn_ref().execute(
            "UPDATE signals
             SET status = 'balanced', balanced_by_signal_id = ?2, updated_at = ?3
             WHERE id = ?1 AND status = 'active'",
            params![id, by_id, Utc::now().to_rfc3339()],
        )?;
        Ok(updated > 0)
    }

    /// Expire an explicit id set.
    pub fn mark_signals_expired(&self, ids: &[String]) -> Result<usize, DbError> {
        let mut updated = 0;
        for id in ids {
            updated += self.conn_ref().execute(
                "UPDATE signals
                 SET status = 'expired', updated_at = ?2
                 WHERE id = ?1 AND status = 'active'",
                params![id, Utc::now().to_rfc3339()],
            )?;
        }
        Ok(updated)
    }

    /// Sweep: expire every active signal whose `expires_at` has passed.
    /// Safe to re-run; already-expired rows never match again.
    pub fn expire_old_signals(&self) -> Result<usize, DbError> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn_ref().execute(
            "UPDATE signals
             SET status = 'expired', updated_at = ?1
             WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at < ?1",
            params![now],
        )?;
        if updated > 0 {
            log::info!("Expired {} stale signal(s)", updated);
        }
        Ok(updated)
    }

    /// Recency-weighted balance over all active signals in one scope.
    pub fn get_balance_for_scope(
        &self,
        level: ScopeLevel,
        scope_id: &str,
    ) -> Result<SignalBalance, DbError> {
        let sql = format!(
            "SELECT valence, magnitude, detected_at FROM signals
             WHERE status = 'active' AND {} = ?1",
            level.column()
        );
        let mut stmt = self.conn_ref().prepare(&sql)?;
        let rows = stmt.query_map(params![scope_id], |row| {
            Ok((
                row.get::<_, i8>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let now = Utc::now();
        let mut balance = SignalBalance::default();
        for row in rows {
            let (valence_raw, magnitude, detected_raw) = row?;
            let detected = parse_ts(&detected_raw).unwrap_or(DateTime::<Utc>::MIN_UTC);
            let weight = recency_weight(age_days(detected, now));
            match Valence::from_i8(valence_raw).unwrap_or(Valence::Neutral) {
                Valence::Negative => {
                    balance.negative_count += 1;
                    balance.negative_magnitude += magnitude * weight;
                }
                Valence::Neutral => balance.neutral_count += 1,
                Valence::Positive => {
                    balance.positive_count += 1;
                    balance.positive_magnitude += magnitude * weight;
                }
            }
        }
        balance.net_score = balance.positive_magnitude - balance.negative_magnitude;
        Ok(balance)
    }

    /// Active signal counts per category, optionally narrowed to a scope and
    /// detection window.
    pub fn count_by_category(
        &self,
        scope: Option<(ScopeLevel, &str)>,
        window_days: i64,
    ) -> Result<HashMap<SignalCategory, i64>, DbError> {
        let mut sql = "SELECT category, COUNT(*) FROM signals
             WHERE status = 'active' AND detected_at >= ?1"
            .to_string();
        let cutoff = (Utc::now() - chrono::Duration::days(window_days)).to_rfc3339();
        let mut args: Vec<String> = vec![cutoff];
        if let Some((level, scope_id)) = scope {
            sql.push_str(&format!(" AND {} = ?2", level.column()));
            args.push(scope_id.to_string());
        }
        sql.push_str(" GROUP BY category");

        let mut stmt = self.conn_ref().prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut counts = HashMap::new();
        for row in rows {
            let (category, count) = row?;
            counts.insert(SignalCategory::from_str_lossy(&category), count);
        }
        Ok(counts)
    }

    /// Negative signals detected after a point in time within one scope.
    /// Feeds the regression sweep; consumed signals still count — they show
    /// the problem came back even if a new issue already claimed them.
    pub fn find_regression_signals(
        &self,
        level: ScopeLevel,
        scope_id: &str,
        after: DateTime<Utc>,
    ) -> Result<Vec<Signal>, DbError> {
        let sql = format!(
            "SELECT {SIGNAL_COLUMNS} FROM signals
             WHERE {} = ?1
               AND valence = -1
               AND status IN ('active', 'consumed')
               AND detected_at > ?2
             ORDER BY detected_at",
            level.column()
        );
        let mut stmt = self.conn_ref().prepare(&sql)?;
        let rows = stmt.query_map(params![scope_id, after.to_rfc3339()], signal_from_row)?;
        let mut signals = Vec::new();
        for row in rows {
            signals.push(row?);
        }
        Ok(signals)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
