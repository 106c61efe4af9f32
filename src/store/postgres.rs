//! PostgreSQL implementation of the narrative store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};

use super::{
    NarrativeQuery, NarrativeStats, NarrativeStore, NarrativeSummary, Page, Pagination, SortField,
    SortOrder, STATS_TOP_N, StatusCounts, TrendingMetric, clamp_limit,
};
use crate::domain::{
    AnalysisResult, AnalysisStatus, CallRecord, Narrative, NarrativeId, SentimentSnapshot,
};
use crate::error::PipelineError;

/// Narrative store backed by `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresNarrativeStore {
    pool: PgPool,
}

impl PostgresNarrativeStore {
    /// Creates a store over the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

async fn insert_row(conn: &mut PgConnection, n: &Narrative) -> Result<bool, PipelineError> {
    let result = sqlx::query(
        "INSERT INTO narratives (id, token_address, token_symbol, analysis_status, \
         sentiment_score, topic_rank, total_calls_detected, interactions, created_at, \
         updated_at, document) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         ON CONFLICT (token_address) DO NOTHING",
    )
    .bind(n.id.as_uuid())
    .bind(&n.token_address)
    .bind(&n.token_symbol)
    .bind(n.analysis_status.as_str())
    .bind(n.sentiment_score.map(i16::from))
    .bind(n.topic_rank.map(i64::from))
    .bind(i64::from(n.total_calls_detected))
    .bind(to_i64(n.social_metrics.interactions))
    .bind(n.created_at)
    .bind(n.updated_at)
    .bind(Json(n))
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn update_row(conn: &mut PgConnection, n: &Narrative) -> Result<(), PipelineError> {
    sqlx::query(
        "UPDATE narratives SET token_symbol = $2, analysis_status = $3, sentiment_score = $4, \
         topic_rank = $5, total_calls_detected = $6, interactions = $7, updated_at = $8, \
         document = $9 WHERE id = $1",
    )
    .bind(n.id.as_uuid())
    .bind(&n.token_symbol)
    .bind(n.analysis_status.as_str())
    .bind(n.sentiment_score.map(i16::from))
    .bind(n.topic_rank.map(i64::from))
    .bind(i64::from(n.total_calls_detected))
    .bind(to_i64(n.social_metrics.interactions))
    .bind(n.updated_at)
    .bind(Json(n))
    .execute(conn)
    .await?;
    Ok(())
}

async fn lock_by_id(
    conn: &mut PgConnection,
    id: NarrativeId,
) -> Result<Option<Narrative>, PipelineError> {
    let row = sqlx::query_scalar::<_, Json<Narrative>>(
        "SELECT document FROM narratives WHERE id = $1 FOR UPDATE",
    )
    .bind(id.as_uuid())
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|Json(n)| n))
}

async fn lock_by_address(
    conn: &mut PgConnection,
    address: &str,
) -> Result<Option<Narrative>, PipelineError> {
    let row = sqlx::query_scalar::<_, Json<Narrative>>(
        "SELECT document FROM narratives WHERE token_address = $1 FOR UPDATE",
    )
    .bind(address)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|Json(n)| n))
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, query: &NarrativeQuery) {
    if let Some(symbol) = query.token_symbol.as_deref().filter(|s| !s.is_empty()) {
        qb.push(" AND POSITION(LOWER(")
            .push_bind(symbol.to_string())
            .push(") IN LOWER(token_symbol)) > 0");
    }
    if let Some(min) = query.min_sentiment {
        qb.push(" AND sentiment_score >= ").push_bind(i16::from(min));
    }
    if let Some(max) = query.max_sentiment {
        qb.push(" AND sentiment_score <= ").push_bind(i16::from(max));
    }
    if let Some(min) = query.min_rank {
        qb.push(" AND topic_rank >= ").push_bind(i64::from(min));
    }
    if let Some(max) = query.max_rank {
        qb.push(" AND topic_rank <= ").push_bind(i64::from(max));
    }
    if let Some(status) = query.status {
        qb.push(" AND analysis_status = ").push_bind(status.as_str());
    }
}

const fn sort_column(field: SortField) -> &'static str {
    match field {
        SortField::UpdatedAt => "updated_at",
        SortField::CreatedAt => "created_at",
        SortField::SentimentScore => "sentiment_score",
        SortField::TopicRank => "topic_rank",
        SortField::TotalCallsDetected => "total_calls_detected",
    }
}

const fn sort_direction(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Asc => "ASC NULLS FIRST",
        SortOrder::Desc => "DESC NULLS LAST",
    }
}

#[async_trait]
impl NarrativeStore for PostgresNarrativeStore {
    async fn record_call(
        &self,
        call: &CallRecord,
        now: DateTime<Utc>,
    ) -> Result<(Narrative, bool), PipelineError> {
        let mut tx = self.pool.begin().await?;

        let fresh = Narrative::from_first_call(call, now);
        if insert_row(&mut tx, &fresh).await? {
            tx.commit().await?;
            return Ok((fresh, true));
        }

        let mut existing = lock_by_address(&mut tx, &call.token_address)
            .await?
            .ok_or_else(|| PipelineError::Internal("narrative vanished during upsert".into()))?;
        existing.record_repeat_call(call, now);
        update_row(&mut tx, &existing).await?;
        tx.commit().await?;
        Ok((existing, false))
    }

    async fn find_by_address(&self, address: &str) -> Result<Option<Narrative>, PipelineError> {
        let row = sqlx::query_scalar::<_, Json<Narrative>>(
            "SELECT document FROM narratives WHERE token_address = $1",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|Json(n)| n))
    }

    async fn find_by_id(&self, id: NarrativeId) -> Result<Option<Narrative>, PipelineError> {
        let row =
            sqlx::query_scalar::<_, Json<Narrative>>("SELECT document FROM narratives WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|Json(n)| n))
    }

    async fn save_analysis(
        &self,
        id: NarrativeId,
        result: &AnalysisResult,
        now: DateTime<Utc>,
    ) -> Result<Narrative, PipelineError> {
        let mut tx = self.pool.begin().await?;
        let mut narrative = lock_by_id(&mut tx, id)
            .await?
            .ok_or_else(|| PipelineError::NarrativeNotFound(id.to_string()))?;
        narrative.apply_analysis(result, now);
        update_row(&mut tx, &narrative).await?;
        tx.commit().await?;
        Ok(narrative)
    }

    async fn mark_failed(
        &self,
        id: NarrativeId,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let mut tx = self.pool.begin().await?;
        let mut narrative = lock_by_id(&mut tx, id)
            .await?
            .ok_or_else(|| PipelineError::NarrativeNotFound(id.to_string()))?;
        narrative.mark_failed(error, now);
        update_row(&mut tx, &narrative).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn mark_processing(
        &self,
        address: &str,
        now: DateTime<Utc>,
    ) -> Result<Narrative, PipelineError> {
        let mut tx = self.pool.begin().await?;
        let mut narrative = lock_by_address(&mut tx, address)
            .await?
            .ok_or_else(|| PipelineError::NarrativeNotFound(address.to_string()))?;
        narrative.begin_processing(now);
        update_row(&mut tx, &narrative).await?;
        tx.commit().await?;
        Ok(narrative)
    }

    async fn latest_snapshot(
        &self,
        address: &str,
    ) -> Result<Option<SentimentSnapshot>, PipelineError> {
        let row = sqlx::query_scalar::<_, Json<SentimentSnapshot>>(
            "SELECT document FROM sentiment_snapshots WHERE token_address = $1 \
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|Json(s)| s))
    }

    async fn append_snapshot(&self, snapshot: &SentimentSnapshot) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO sentiment_snapshots (narrative_id, token_address, created_at, document) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(snapshot.narrative_id.as_uuid())
        .bind(&snapshot.token_address)
        .bind(snapshot.created_at)
        .bind(Json(snapshot))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_snapshots(
        &self,
        address: &str,
        page: u32,
        limit: u32,
    ) -> Result<Page<SentimentSnapshot>, PipelineError> {
        let page = page.max(1);
        let limit = clamp_limit(Some(limit));
        let offset = u64::from(page - 1) * u64::from(limit);

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sentiment_snapshots WHERE token_address = $1")
                .bind(address)
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query_scalar::<_, Json<SentimentSnapshot>>(
            "SELECT document FROM sentiment_snapshots WHERE token_address = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
        )
        .bind(address)
        .bind(i64::from(limit))
        .bind(to_i64(offset))
        .fetch_all(&self.pool)
        .await?;

        let data: Vec<SentimentSnapshot> = rows.into_iter().map(|Json(s)| s).collect();
        let pagination =
            Pagination::new(page, limit, u64::try_from(total).unwrap_or(0), data.len());
        Ok(Page { data, pagination })
    }

    async fn search(&self, query: &NarrativeQuery) -> Result<Page<Narrative>, PipelineError> {
        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM narratives WHERE TRUE");
        push_filters(&mut count, query);
        let total = count.build_query_scalar::<i64>().fetch_one(&self.pool).await?;

        let mut select =
            QueryBuilder::<Postgres>::new("SELECT document FROM narratives WHERE TRUE");
        push_filters(&mut select, query);
        select.push(format!(
            " ORDER BY {} {}, token_address ASC",
            sort_column(query.sort_by),
            sort_direction(query.sort_order)
        ));
        select
            .push(" LIMIT ")
            .push_bind(i64::from(query.limit()))
            .push(" OFFSET ")
            .push_bind(to_i64(query.offset()));

        let rows = select
            .build_query_scalar::<Json<Narrative>>()
            .fetch_all(&self.pool)
            .await?;
        let data: Vec<Narrative> = rows.into_iter().map(|Json(n)| n).collect();
        let pagination = Pagination::new(
            query.page(),
            query.limit(),
            u64::try_from(total).unwrap_or(0),
            data.len(),
        );
        Ok(Page { data, pagination })
    }

    async fn stats(&self) -> Result<NarrativeStats, PipelineError> {
        let counts = sqlx::query_as::<_, (String, i64)>(
            "SELECT analysis_status, COUNT(*) FROM narratives GROUP BY analysis_status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut by_status = StatusCounts::default();
        let mut total = 0u64;
        for (status, count) in counts {
            let count = u64::try_from(count).unwrap_or(0);
            total += count;
            if let Ok(status) = status.parse::<AnalysisStatus>() {
                by_status.add(status, count);
            }
        }

        let average: Option<f64> = sqlx::query_scalar(
            "SELECT AVG(sentiment_score)::float8 FROM narratives \
             WHERE analysis_status = 'completed' AND sentiment_score IS NOT NULL",
        )
        .fetch_one(&self.pool)
        .await?;

        let top_n = i64::try_from(STATS_TOP_N).unwrap_or(10);
        let by_sentiment = sqlx::query_scalar::<_, Json<Narrative>>(
            "SELECT document FROM narratives WHERE sentiment_score IS NOT NULL \
             ORDER BY sentiment_score DESC, token_address ASC LIMIT $1",
        )
        .bind(top_n)
        .fetch_all(&self.pool)
        .await?;
        let by_rank = sqlx::query_scalar::<_, Json<Narrative>>(
            "SELECT document FROM narratives WHERE topic_rank IS NOT NULL \
             ORDER BY topic_rank ASC, token_address ASC LIMIT $1",
        )
        .bind(top_n)
        .fetch_all(&self.pool)
        .await?;

        Ok(NarrativeStats {
            total,
            by_status,
            average_sentiment: average.unwrap_or(0.0),
            top_by_sentiment: by_sentiment
                .iter()
                .map(|Json(n)| NarrativeSummary::from(n))
                .collect(),
            top_by_rank: by_rank
                .iter()
                .map(|Json(n)| NarrativeSummary::from(n))
                .collect(),
        })
    }

    async fn trending(
        &self,
        metric: TrendingMetric,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Narrative>, PipelineError> {
        let order = match metric {
            TrendingMetric::Interactions => "interactions DESC",
            TrendingMetric::SentimentScore => "sentiment_score DESC NULLS LAST",
            TrendingMetric::TopicRank => "topic_rank ASC NULLS LAST",
        };
        let sql = format!(
            "SELECT document FROM narratives \
             WHERE analysis_status = 'completed' AND updated_at >= $1 \
             ORDER BY {order}, token_address ASC LIMIT $2"
        );
        let rows = sqlx::query_scalar::<_, Json<Narrative>>(&sql)
            .bind(since)
            .bind(i64::from(clamp_limit(Some(limit))))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|Json(n)| n).collect())
    }

    async fn delete_by_address(
        &self,
        address: &str,
    ) -> Result<Option<(Narrative, u64)>, PipelineError> {
        let mut tx = self.pool.begin().await?;
        let snapshots = sqlx::query("DELETE FROM sentiment_snapshots WHERE token_address = $1")
            .bind(address)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let deleted = sqlx::query_scalar::<_, Json<Narrative>>(
            "DELETE FROM narratives WHERE token_address = $1 RETURNING document",
        )
        .bind(address)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(deleted.map(|Json(n)| (n, snapshots)))
    }
}
