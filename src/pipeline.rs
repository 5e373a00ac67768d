//! Batch pipeline controller.
//!
//! Walks the input rows in order and classifies each one into exactly one
//! bucket:
//! 1. Skip rows already classified by a previous run (resume)
//! 2. Copy the previous row's classification when the CEP repeats
//! 3. Resolve the CEP to an address (a fatal resolver signal aborts the run)
//! 4. Geocode the address, falling back to the address-only bucket
//!
//! Results are persisted once, at the end of the run or on abort.

use chrono::{DateTime, TimeDelta, Utc};

use crate::errors::{AppError, ResolverError};
use crate::models::{
    AddressOnlyRow, Bucket, InputRow, LocatedRow, Lookup, NotFoundRow, ResultRow, ResultSet,
    RunState,
};
use crate::result_store::ResultStore;
use crate::services::{build_geocode_query, AddressResolver, Geocoder};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every input row is classified.
    Completed,
    /// The resolver signalled a fatal condition; later rows were left untouched.
    Aborted(ResolverError),
}

/// Summary of one invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    /// Set when the row loop ends, completed or aborted.
    pub finished_at: DateTime<Utc>,
    /// Highest id already classified when the run started.
    pub resumed_from: u64,
    /// Rows classified during this run, duplicates included.
    pub processed: usize,
    /// Rows classified by copying the previous row.
    pub duplicates: usize,
    pub located: usize,
    pub address_only: usize,
    pub not_found: usize,
    pub outcome: RunOutcome,
    /// Resume point after this run.
    pub state: RunState,
}

impl RunReport {
    fn new(state: RunState) -> Self {
        let now = Utc::now();
        Self {
            started_at: now,
            finished_at: now,
            resumed_from: state.last_processed_id,
            processed: 0,
            duplicates: 0,
            located: 0,
            address_only: 0,
            not_found: 0,
            outcome: RunOutcome::Completed,
            state,
        }
    }

    pub fn elapsed(&self) -> TimeDelta {
        self.finished_at - self.started_at
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self.outcome, RunOutcome::Aborted(_))
    }

    fn record(&mut self, bucket: Bucket) {
        self.processed += 1;
        match bucket {
            Bucket::Located => self.located += 1,
            Bucket::AddressOnly => self.address_only += 1,
            Bucket::NotFound => self.not_found += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Log a progress line every this many input rows.
    pub progress_every: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            progress_every: 100,
        }
    }
}

/// Row classifier over a postal-code resolver and a geocoder.
pub struct Pipeline<R, G> {
    resolver: R,
    geocoder: G,
    options: PipelineOptions,
}

impl<R, G> Pipeline<R, G>
where
    R: AddressResolver,
    G: Geocoder,
{
    pub fn new(resolver: R, geocoder: G) -> Self {
        Self::with_options(resolver, geocoder, PipelineOptions::default())
    }

    pub fn with_options(resolver: R, geocoder: G, options: PipelineOptions) -> Self {
        Self {
            resolver,
            geocoder,
            options,
        }
    }

    pub fn resolver(&self) -> &R {
        &self.resolver
    }

    pub fn geocoder(&self) -> &G {
        &self.geocoder
    }

    /// Loads prior results from `store`, processes `rows` and saves.
    ///
    /// The save happens whether the run completes, aborts, or fails on an
    /// unexpected error, so classified rows are never lost.
    pub async fn run(&self, rows: &[InputRow], store: &ResultStore) -> Result<RunReport, AppError> {
        let loaded = store.load()?;
        let mut results = loaded.results;

        let processed = self.process(rows, &mut results, loaded.state).await;
        let saved = store.save(&results);

        let report = processed?;
        saved?;
        Ok(report)
    }

    /// Classifies every row past `state.last_processed_id` into `results`.
    pub async fn process(
        &self,
        rows: &[InputRow],
        results: &mut ResultSet,
        mut state: RunState,
    ) -> Result<RunReport, AppError> {
        let mut report = RunReport::new(state);
        let total = rows.len();

        if state.last_processed_id > 0 {
            tracing::info!("Resuming after ID {}", state.last_processed_id);
        }

        for (idx, row) in rows.iter().enumerate() {
            if (idx + 1) % self.options.progress_every.max(1) == 0 {
                tracing::info!("[{}/{}] ID {}", idx + 1, total, row.id);
            }

            if row.id <= state.last_processed_id {
                continue;
            }

            let previous = idx.checked_sub(1).map(|i| &rows[i]);
            if let Some(copy) = duplicate_of(previous, row, results, &state) {
                let bucket = copy.bucket();
                tracing::debug!("ID {}: CEP {} repeats, copying {} row", row.id, row.cep, bucket);
                results.push(copy)?;
                state.advance(row.id, bucket);
                report.record(bucket);
                report.duplicates += 1;
                continue;
            }

            let classified = match self.classify(row).await {
                Ok(classified) => classified,
                Err(e) => {
                    tracing::error!("{}, preparing to exit", e);
                    tracing::info!("IDs processed: {}", report.processed);
                    report.outcome = RunOutcome::Aborted(e);
                    break;
                }
            };

            let bucket = classified.bucket();
            tracing::debug!("ID {}: CEP {} -> {}", row.id, row.cep, bucket);
            results.push(classified)?;
            state.advance(row.id, bucket);
            report.record(bucket);
        }

        report.state = state;
        report.finished_at = Utc::now();
        tracing::info!(
            "Run started at {} and took {:.1}s",
            report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            report.elapsed().num_milliseconds() as f64 / 1000.0
        );
        tracing::info!(
            "Run finished: {} rows processed ({} duplicates): {} located, {} address-only, {} not found",
            report.processed,
            report.duplicates,
            report.located,
            report.address_only,
            report.not_found
        );
        Ok(report)
    }

    /// Full lookup of one row: resolver, then geocoder.
    async fn classify(&self, row: &InputRow) -> Result<ResultRow, ResolverError> {
        let address = match self.resolver.resolve(&row.cep).await? {
            Lookup::Found(address) => address,
            Lookup::NotFound => {
                return Ok(ResultRow::NotFound(NotFoundRow {
                    id: row.id,
                    cep: row.cep.clone(),
                }))
            }
        };

        let query = build_geocode_query(&address);
        let classified = match self.geocoder.geocode(&query, &row.cep).await {
            Lookup::Found(coordinate) => ResultRow::Located(LocatedRow {
                id: row.id,
                lat: coordinate.lat,
                lon: coordinate.lon,
                cep: row.cep.clone(),
            }),
            Lookup::NotFound => {
                ResultRow::AddressOnly(AddressOnlyRow::from_address(row.id, &row.cep, address))
            }
        };
        Ok(classified)
    }
}

/// The previous row's classification re-keyed to `row`, when `row` repeats the
/// previous row's CEP and that row is the last one classified.
fn duplicate_of(
    previous: Option<&InputRow>,
    row: &InputRow,
    results: &ResultSet,
    state: &RunState,
) -> Option<ResultRow> {
    let previous = previous?;
    if previous.cep != row.cep || previous.id != state.last_processed_id {
        return None;
    }
    let bucket = state.last_bucket?;
    results
        .get(previous.id)
        .filter(|copy| copy.bucket() == bucket)
        .map(|copy| copy.with_id(row.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(last: u64, bucket: Bucket) -> RunState {
        RunState {
            last_processed_id: last,
            last_bucket: Some(bucket),
        }
    }

    fn classified(id: u64, cep: &str) -> ResultSet {
        let mut set = ResultSet::new();
        set.push(ResultRow::NotFound(NotFoundRow {
            id,
            cep: cep.into(),
        }))
        .unwrap();
        set
    }

    #[test]
    fn test_duplicate_of_copies_last_classified_row() {
        let results = classified(1, "00000000");
        let previous = InputRow::new(1, "00000000");
        let row = InputRow::new(2, "00000000");

        let copy = duplicate_of(Some(&previous), &row, &results, &state(1, Bucket::NotFound));
        assert_eq!(
            copy,
            Some(ResultRow::NotFound(NotFoundRow {
                id: 2,
                cep: "00000000".into()
            }))
        );
    }

    #[test]
    fn test_first_row_is_never_a_duplicate() {
        let results = ResultSet::new();
        let row = InputRow::new(1, "01001000");
        assert_eq!(duplicate_of(None, &row, &results, &RunState::default()), None);
    }

    #[test]
    fn test_different_cep_is_not_a_duplicate() {
        let results = classified(1, "00000000");
        let previous = InputRow::new(1, "00000000");
        let row = InputRow::new(2, "01001000");
        assert_eq!(
            duplicate_of(Some(&previous), &row, &results, &state(1, Bucket::NotFound)),
            None
        );
    }

    #[test]
    fn test_unclassified_previous_row_is_not_copied() {
        // The previous row was never classified (e.g. the input gained a row
        // in the middle since the last run).
        let results = classified(1, "00000000");
        let previous = InputRow::new(2, "00000000");
        let row = InputRow::new(3, "00000000");
        assert_eq!(
            duplicate_of(Some(&previous), &row, &results, &state(1, Bucket::NotFound)),
            None
        );
    }

    #[test]
    fn test_report_counts_buckets() {
        let mut report = RunReport::new(RunState::default());
        report.record(Bucket::Located);
        report.record(Bucket::NotFound);
        report.record(Bucket::NotFound);
        assert_eq!(report.processed, 3);
        assert_eq!(report.located, 1);
        assert_eq!(report.not_found, 2);
        assert!(!report.is_aborted());
    }
}
