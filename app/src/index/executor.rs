// ==============================================================================
// index/executor.rs - Sample Index Query Executor
// ==============================================================================
// Description: Resolves a sample index query to candidate loci and streams
//              the matching variants out of the store
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Stages:
//   1. Region scan when only regions are filtered
//   2. Per-sample lookups combined with AND / OR
//   3. Mendelian error and de novo post-filters
//   4. Negated samples subtracted
//   5. Lazy row fetch + conversion
// ==============================================================================

use super::query::{QueryConstructionError, QueryOperation, SampleIndexQuery};
use super::sample_index::{IndexError, SampleIndex};
use crate::converter::{ConvertError, VariantConverter};
use crate::metadata::MetadataManager;
use crate::models::{in_regions, Locus, StudyId, Variant};
use crate::row_codec::{parse_column_key, RowCodec};
use crate::storage::{StorageError, StoredRow, VariantStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Construction(#[from] QueryConstructionError),

    #[error(transparent)]
    Convert(#[from] ConvertError),
}

/// Lazily converted query results
pub type VariantIter<'a> = Box<dyn Iterator<Item = Result<Variant, QueryError>> + 'a>;

pub struct SampleIndexQueryExecutor {
    store: Arc<dyn VariantStore>,
    index: Arc<SampleIndex>,
    metadata: Arc<dyn MetadataManager>,
    codec: RowCodec,
}

impl SampleIndexQueryExecutor {
    pub fn new(
        store: Arc<dyn VariantStore>,
        index: Arc<SampleIndex>,
        metadata: Arc<dyn MetadataManager>,
        codec: RowCodec,
    ) -> Self {
        Self {
            store,
            index,
            metadata,
            codec,
        }
    }

    /// Run a query; rows are read and converted as the iterator advances
    pub fn execute(&self, query: &SampleIndexQuery) -> Result<VariantIter<'_>, QueryError> {
        let converter = VariantConverter::new(self.metadata.clone(), self.codec.clone())
            .with_returned_samples(query.returned_samples().to_vec());

        // 1. Cheap path; rows holding only other studies are skipped
        if query.empty_or_region_filter() {
            let study_id = query.study_id();
            let rows: Vec<StoredRow> = self
                .store
                .scan(query.regions())?
                .into_iter()
                .filter(|row| holds_study(row, study_id))
                .collect();
            debug!("Region scan of study {} returned {} rows", query.study_name(), rows.len());
            return Ok(Box::new(
                rows.into_iter()
                    .map(move |row| converter.convert_row(&row).map_err(QueryError::from)),
            ));
        }

        let loci = self.candidate_loci(query)?;
        info!(
            "Sample index query on study {} matched {} loci",
            query.study_name(),
            loci.len()
        );

        // 5. Fetch lazily; rows removed since indexing are skipped
        let store = self.store.clone();
        Ok(Box::new(loci.into_iter().filter_map(move |locus| {
            match store.get_row(&locus) {
                Ok(Some(row)) => Some(converter.convert_row(&row).map_err(QueryError::from)),
                Ok(None) => None,
                Err(e) => Some(Err(e.into())),
            }
        })))
    }

    /// Loci matching every index-level filter of the query
    pub fn candidate_loci(&self, query: &SampleIndexQuery) -> Result<BTreeSet<Locus>, QueryError> {
        let study_id = query.study_id();

        // 2. Combine positive samples
        let mut candidates: Option<BTreeSet<Locus>> = None;
        for sample in query.positive_samples() {
            let single = query.for_sample(sample)?;
            let mut matches = self.index.lookup(&single)?;
            if query.only_de_novo() {
                let mut de_novo = BTreeSet::new();
                for locus in matches {
                    if self
                        .index
                        .entry(study_id, single.sample_id, &locus)?
                        .is_some_and(|e| e.de_novo)
                    {
                        de_novo.insert(locus);
                    }
                }
                matches = de_novo;
            }
            candidates = Some(match (candidates, query.operation()) {
                (None, _) => matches,
                (Some(acc), QueryOperation::And) => acc.intersection(&matches).cloned().collect(),
                (Some(mut acc), QueryOperation::Or) => {
                    acc.extend(matches);
                    acc
                }
            });
        }

        // 3. Mendelian errors of any listed sample
        if !query.mendelian_error_set().is_empty() {
            let mut errors = BTreeSet::new();
            for sample in query.mendelian_error_set() {
                if let Some(id) = query.sample_id(sample) {
                    errors.extend(
                        self.index
                            .mendelian_errors(study_id, id)?
                            .into_iter()
                            .filter(|l| in_regions(query.regions(), l)),
                    );
                }
            }
            candidates = Some(match candidates {
                Some(acc) => acc.intersection(&errors).cloned().collect(),
                None => errors,
            });
        }

        let mut loci = candidates.unwrap_or_default();

        // 4. Subtract negated samples
        for sample in query.negated_samples() {
            let excluded = self.index.lookup(&query.for_sample(sample)?)?;
            loci.retain(|l| !excluded.contains(l));
        }
        Ok(loci)
    }
}

/// Whether a stored row carries genotype columns or file cells of `study_id`
fn holds_study(row: &StoredRow, study_id: StudyId) -> bool {
    row.file_cells(study_id).next().is_some()
        || row
            .columns
            .keys()
            .any(|key| parse_column_key(key).is_some_and(|(study, _)| study == study_id))
}
