use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use parcelgate_contracts::AccessTier;
use parcelgate_policy::{CompiledQuery, policy_for};
use tracing::Instrument;

use crate::csv;
use crate::source::{ParcelRow, ParcelSource, SourceError};

const SINGLE_FETCH_CHUNK_ROWS: usize = 1000;

pub const SINGLE_FETCH_ROW_CEILING: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStrategy {
    Keyset { batch_size: usize },
    SingleFetch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportState {
    NotStarted,
    Streaming,
    Completed,
    Aborted,
}

pub struct ExportStream {
    source: Arc<dyn ParcelSource>,
    query: CompiledQuery,
    tier: AccessTier,
    strategy: ExportStrategy,
    row_ceiling: usize,
    cursor: String,
    emitted: usize,
    batches: usize,
    state: ExportState,
    exhausted: bool,
    buffered: VecDeque<ParcelRow>,
    started_at: Instant,
    span: tracing::Span,
}

impl ExportStream {
    pub fn new(
        source: Arc<dyn ParcelSource>,
        query: CompiledQuery,
        tier: AccessTier,
        strategy: ExportStrategy,
        request_id: &str,
    ) -> Self {
        let span = tracing::info_span!(
            "parcels.export",
            request_id = %request_id,
            tier = tier.as_str(),
            rows = tracing::field::Empty,
            batches = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let tier_ceiling = policy_for(tier).export_row_limit;
        let row_ceiling = match strategy {
            ExportStrategy::Keyset { .. } => tier_ceiling,
            ExportStrategy::SingleFetch => tier_ceiling.min(SINGLE_FETCH_ROW_CEILING),
        };

        Self {
            source,
            query,
            tier,
            strategy,
            row_ceiling,
            cursor: String::new(),
            emitted: 0,
            batches: 0,
            state: ExportState::NotStarted,
            exhausted: false,
            buffered: VecDeque::new(),
            started_at: Instant::now(),
            span,
        }
    }

    pub fn state(&self) -> ExportState {
        self.state
    }

    pub fn rows_emitted(&self) -> usize {
        self.emitted
    }

    pub fn batches_fetched(&self) -> usize {
        self.batches
    }

    /// Header line plus the first batch.
    pub async fn start(&mut self) -> Result<Bytes, SourceError> {
        if self.state != ExportState::NotStarted {
            return Err(SourceError::Backend("export already started".to_string()));
        }

        let span = self.span.clone();
        match self.next_rows().instrument(span).await {
            Ok(rows) => {
                self.state = ExportState::Streaming;
                let mut chunk = csv::header_line();
                chunk.push_str(&csv::encode_rows(&rows));
                if rows.is_empty() {
                    self.finish(ExportState::Completed);
                }
                Ok(Bytes::from(chunk))
            }
            Err(err) => {
                self.finish(ExportState::Aborted);
                Err(err)
            }
        }
    }

    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, SourceError>> {
        if self.state != ExportState::Streaming {
            return None;
        }
        if self.exhausted && self.buffered.is_empty() {
            self.finish(ExportState::Completed);
            return None;
        }

        let span = self.span.clone();
        match self.next_rows().instrument(span).await {
            Ok(rows) if rows.is_empty() => {
                self.finish(ExportState::Completed);
                None
            }
            Ok(rows) => Some(Ok(Bytes::from(csv::encode_rows(&rows)))),
            Err(err) => {
                crate::metrics::inc_export_abort();
                self.span.in_scope(|| {
                    tracing::warn!(
                        error = %err,
                        rows = self.emitted,
                        "export aborted after streaming began"
                    );
                });
                self.finish(ExportState::Aborted);
                Some(Err(err))
            }
        }
    }

    pub fn into_body_stream(
        self,
        first: Bytes,
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        futures::stream::once(async move { Ok(first) }).chain(futures::stream::unfold(
            self,
            |mut export| async move {
                match export.next_chunk().await {
                    None => None,
                    Some(Ok(chunk)) => Some((Ok(chunk), export)),
                    Some(Err(err)) => Some((Err(std::io::Error::other(err.to_string())), export)),
                }
            },
        ))
    }

    async fn next_rows(&mut self) -> Result<Vec<ParcelRow>, SourceError> {
        match self.strategy {
            ExportStrategy::Keyset { batch_size } => self.next_keyset_batch(batch_size).await,
            ExportStrategy::SingleFetch => self.next_buffered_chunk().await,
        }
    }

    async fn next_keyset_batch(&mut self, batch_size: usize) -> Result<Vec<ParcelRow>, SourceError> {
        let remaining = self.row_ceiling.saturating_sub(self.emitted);
        if self.exhausted || remaining == 0 {
            self.exhausted = true;
            return Ok(Vec::new());
        }

        let limit = batch_size.min(remaining);
        let page = self.query.after_cursor(&self.cursor);
        let rows = self.source.fetch_export_rows(&page, limit).await?;
        self.record_batch(rows.len());

        if let Some(last) = rows.last() {
            self.cursor = last.id.clone();
        }
        self.emitted += rows.len();

        if rows.len() < limit {
            self.exhausted = true;
        } else if self.emitted >= self.row_ceiling {
            self.exhausted = true;
            self.warn_ceiling_reached();
        }

        Ok(rows)
    }

    async fn next_buffered_chunk(&mut self) -> Result<Vec<ParcelRow>, SourceError> {
        if !self.exhausted {
            let rows = self
                .source
                .fetch_export_rows(&self.query, self.row_ceiling)
                .await?;
            self.record_batch(rows.len());
            if rows.len() >= self.row_ceiling {
                self.warn_ceiling_reached();
            }
            self.buffered = rows.into();
            self.exhausted = true;
        }

        let take = SINGLE_FETCH_CHUNK_ROWS.min(self.buffered.len());
        let rows = self.buffered.drain(..take).collect::<Vec<_>>();
        self.emitted += rows.len();
        Ok(rows)
    }

    fn record_batch(&mut self, rows: usize) {
        self.batches += 1;
        crate::metrics::observe_export_batch(self.tier.as_str(), rows);
        tracing::debug!(batch = self.batches, rows, "export batch fetched");
    }

    fn warn_ceiling_reached(&self) {
        tracing::warn!(
            row_ceiling = self.row_ceiling,
            tier = self.tier.as_str(),
            "export reached its row ceiling; remaining rows are not exported"
        );
    }

    fn finish(&mut self, state: ExportState) {
        self.state = state;
        let outcome = match state {
            ExportState::Completed => "completed",
            ExportState::Aborted => "aborted",
            ExportState::NotStarted | ExportState::Streaming => return,
        };

        let latency_ms = self.started_at.elapsed().as_millis() as u64;
        self.span.record("rows", self.emitted as u64);
        self.span.record("batches", self.batches as u64);
        self.span.record("latency_ms", latency_ms);
        self.span.record("outcome", outcome);
        self.span.in_scope(|| {
            tracing::info!(
                rows = self.emitted,
                batches = self.batches,
                latency_ms,
                outcome,
                "export finished"
            );
        });
    }
}

impl Drop for ExportStream {
    fn drop(&mut self) {
        if self.state == ExportState::Streaming {
            crate::metrics::inc_export_abort();
            self.span.in_scope(|| {
                tracing::warn!(rows = self.emitted, "export dropped before completion");
            });
            self.finish(ExportState::Aborted);
        }
    }
}
