// ==============================================================================
// converter.rs - Result Reconstruction Converter
// ==============================================================================
// Description: Rebuilds canonical variants with per-study genotype matrices
//              from decoded genotype rows
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use crate::genotype::GenotypeCode;
use crate::metadata::{MetadataError, MetadataManager};
use crate::models::{Locus, SampleId, SamplesPosition, StudyEntry, StudyId, Variant, VariantAnnotation};
use crate::row_codec::{CodecError, RowCodec, StudyGenotypeRow};
use crate::storage::StoredRow;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Metadata lookup failed for study {study_id}: {source}")]
    Metadata {
        study_id: StudyId,
        #[source]
        source: MetadataError,
    },

    #[error("Corrupt annotation at {locus}: {source}")]
    CorruptAnnotation {
        locus: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Sample position cache lock poisoned")]
    LockPoisoned,
}

/// Resolved output layout of one study
#[derive(Debug)]
struct StudyLayout {
    name: String,
    positions: Arc<SamplesPosition>,

    /// Every indexed sample is reported
    complete: bool,
}

/// Converter from stored genotype rows to `Variant`s
///
/// Sample orderings are resolved once per study and cached for the
/// lifetime of the converter.
pub struct VariantConverter {
    metadata: Arc<dyn MetadataManager>,
    codec: RowCodec,

    /// Empty reports every indexed sample
    returned_samples: Vec<String>,
    layouts: RwLock<HashMap<StudyId, Arc<StudyLayout>>>,
}

impl VariantConverter {
    pub fn new(metadata: Arc<dyn MetadataManager>, codec: RowCodec) -> Self {
        Self {
            metadata,
            codec,
            returned_samples: Vec::new(),
            layouts: RwLock::new(HashMap::new()),
        }
    }

    /// Report only these samples, in this order
    pub fn with_returned_samples(mut self, samples: Vec<String>) -> Self {
        self.returned_samples = samples;
        self
    }

    pub fn codec(&self) -> &RowCodec {
        &self.codec
    }

    /// Cached layout of a study; `None` when the study is not in the catalog
    fn layout(&self, study_id: StudyId) -> Result<Option<Arc<StudyLayout>>, ConvertError> {
        if let Some(layout) = self
            .layouts
            .read()
            .map_err(|_| ConvertError::LockPoisoned)?
            .get(&study_id)
        {
            return Ok(Some(layout.clone()));
        }

        let mut layouts = self.layouts.write().map_err(|_| ConvertError::LockPoisoned)?;
        // Another reader may have won the race for the write lock
        if let Some(layout) = layouts.get(&study_id) {
            return Ok(Some(layout.clone()));
        }

        let metadata_err = |source| ConvertError::Metadata { study_id, source };
        let Some(study) = self.metadata.study(study_id).map_err(metadata_err)? else {
            return Ok(None);
        };
        let indexed = self.metadata.indexed_samples(study_id).map_err(metadata_err)?;

        let ordered: Vec<(SampleId, String)> = if self.returned_samples.is_empty() {
            indexed.into_iter().map(|s| (s.id, s.name)).collect()
        } else {
            let by_name: HashMap<&str, SampleId> = indexed.iter().map(|s| (s.name.as_str(), s.id)).collect();
            self.returned_samples
                .iter()
                .filter_map(|name| by_name.get(name.as_str()).map(|&id| (id, name.clone())))
                .collect()
        };

        let layout = Arc::new(StudyLayout {
            name: study.name,
            positions: Arc::new(SamplesPosition::from_ordered(ordered)),
            complete: self.returned_samples.is_empty(),
        });
        debug!("Cached {} sample positions for study {}", layout.positions.len(), study_id);
        layouts.insert(study_id, layout.clone());
        Ok(Some(layout))
    }

    /// Build a variant from decoded study rows
    pub fn convert(
        &self,
        locus: &Locus,
        study_rows: &[StudyGenotypeRow],
        annotation: Option<VariantAnnotation>,
    ) -> Result<Variant, ConvertError> {
        let mut variant = Variant::new(locus.clone());
        variant.annotation = annotation;

        for row in study_rows {
            let Some(layout) = self.layout(row.study_id)? else {
                debug!("Skipping study {} at {}: not in catalog", row.study_id, locus);
                continue;
            };

            let positions = &layout.positions;
            let mut samples_data = vec![vec![GenotypeCode::HomRef.as_str().to_string()]; positions.len()];
            for (code, samples) in &row.calls {
                for &sample in samples {
                    if let Some(pos) = positions.position(sample) {
                        samples_data[pos] = vec![code.output_str().to_string()];
                    }
                }
            }
            if layout.complete {
                self.codec.check_hom_ref(locus, row, positions.len());
            }

            variant.studies.push(StudyEntry {
                study_id: row.study_id,
                study_name: layout.name.clone(),
                format: vec!["GT".to_string()],
                samples_position: positions.clone(),
                samples_data,
            });
        }
        Ok(variant)
    }

    /// Decode and convert a stored row
    pub fn convert_row(&self, row: &StoredRow) -> Result<Variant, ConvertError> {
        let study_rows = self.codec.decode(&row.locus, &row.columns)?;
        let annotation = row
            .annotation
            .as_deref()
            .map(serde_json::from_slice::<VariantAnnotation>)
            .transpose()
            .map_err(|source| ConvertError::CorruptAnnotation {
                locus: row.locus.to_string(),
                source,
            })?;
        self.convert(&row.locus, &study_rows, annotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataManager;
    use crate::row_codec::InvariantMetrics;
    use std::thread;

    fn setup(samples: &[&str]) -> (Arc<InMemoryMetadataManager>, StudyId, Vec<SampleId>) {
        let metadata = Arc::new(InMemoryMetadataManager::new());
        let study = metadata.register_study("study").unwrap();
        let ids: Vec<SampleId> = samples
            .iter()
            .map(|name| metadata.register_sample(study, name).unwrap())
            .collect();
        for &id in &ids {
            metadata.update_sample_metadata(study, id, &mut |s| s.indexed = true).unwrap();
        }
        (metadata, study, ids)
    }

    fn locus() -> Locus {
        Locus::new("1", 100, "A", "T")
    }

    #[test]
    fn test_fills_hom_ref_positions() {
        let (metadata, study, ids) = setup(&["S1", "S2", "S3", "S4"]);
        let metrics = Arc::new(InvariantMetrics::new());
        let converter = VariantConverter::new(metadata, RowCodec::with_metrics(metrics.clone()));

        let mut row = StudyGenotypeRow::new(study);
        row.add_sample(ids[1], GenotypeCode::Het);
        row.add_sample(ids[3], GenotypeCode::Other);
        row.add_sample(ids[0], GenotypeCode::HomRef);
        row.add_sample(ids[2], GenotypeCode::HomRef);

        let variant = converter.convert(&locus(), &[row], None).unwrap();
        let entry = variant.study(study).unwrap();
        assert_eq!(entry.format, vec!["GT"]);
        assert_eq!(entry.samples_position.names(), &["S1", "S2", "S3", "S4"]);
        assert_eq!(entry.sample_genotype("S1"), Some("0/0"));
        assert_eq!(entry.sample_genotype("S2"), Some("0/1"));
        assert_eq!(entry.sample_genotype("S4"), Some("."));
        assert_eq!(metrics.hom_ref_mismatches(), 0);
    }

    #[test]
    fn test_hom_ref_mismatch_is_counted() {
        let (metadata, study, ids) = setup(&["S1", "S2", "S3"]);
        let metrics = Arc::new(InvariantMetrics::new());
        let converter = VariantConverter::new(metadata, RowCodec::with_metrics(metrics.clone()));

        let mut row = StudyGenotypeRow::new(study);
        row.add_sample(ids[0], GenotypeCode::HomAlt);
        row.hom_ref_count = 5;
        let variant = converter.convert(&locus(), &[row], None).unwrap();
        assert_eq!(variant.study(study).unwrap().sample_genotype("S3"), Some("0/0"));
        assert_eq!(metrics.hom_ref_mismatches(), 1);
    }

    #[test]
    fn test_unknown_study_is_skipped() {
        let (metadata, study, ids) = setup(&["S1"]);
        let converter = VariantConverter::new(metadata, RowCodec::new());

        let mut known = StudyGenotypeRow::new(study);
        known.add_sample(ids[0], GenotypeCode::Het);
        let unknown = StudyGenotypeRow::new(42);
        let variant = converter.convert(&locus(), &[unknown, known], None).unwrap();
        assert_eq!(variant.studies.len(), 1);
        assert!(variant.study(42).is_none());
    }

    #[test]
    fn test_returned_samples_subset() {
        let (metadata, study, ids) = setup(&["S1", "S2", "S3"]);
        let metrics = Arc::new(InvariantMetrics::new());
        let converter = VariantConverter::new(metadata, RowCodec::with_metrics(metrics.clone()))
            .with_returned_samples(vec!["S3".to_string(), "S9".to_string(), "S1".to_string()]);

        let mut row = StudyGenotypeRow::new(study);
        row.add_sample(ids[2], GenotypeCode::HomAlt);
        let variant = converter.convert(&locus(), &[row], None).unwrap();
        let entry = variant.study(study).unwrap();
        assert_eq!(entry.samples_position.names(), &["S3", "S1"]);
        assert_eq!(entry.samples_data, vec![vec!["1/1".to_string()], vec!["0/0".to_string()]]);
        // Subsets skip the hom-ref cross-check
        assert_eq!(metrics.hom_ref_mismatches(), 0);
    }

    #[test]
    fn test_repeated_returned_sample_reports_its_call_once() {
        let (metadata, study, ids) = setup(&["S1", "S2"]);
        let converter = VariantConverter::new(metadata, RowCodec::new()).with_returned_samples(vec![
            "S1".to_string(),
            "S2".to_string(),
            "S1".to_string(),
        ]);

        let mut row = StudyGenotypeRow::new(study);
        row.add_sample(ids[0], GenotypeCode::Het);
        let variant = converter.convert(&locus(), &[row], None).unwrap();
        let entry = variant.study(study).unwrap();
        assert_eq!(entry.samples_position.names(), &["S1", "S2"]);
        assert_eq!(entry.sample_genotype("S1"), Some("0/1"));
        assert_eq!(entry.samples_data, vec![vec!["0/1".to_string()], vec!["0/0".to_string()]]);
    }

    #[test]
    fn test_layout_is_cached_across_threads() {
        let (metadata, study, ids) = setup(&["S1", "S2"]);
        let converter = Arc::new(VariantConverter::new(metadata.clone(), RowCodec::new()));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let converter = converter.clone();
                let sample = ids[0];
                thread::spawn(move || {
                    let mut row = StudyGenotypeRow::new(study);
                    row.add_sample(sample, GenotypeCode::Het);
                    row.hom_ref_count = 1;
                    converter.convert(&locus(), &[row], None).unwrap()
                })
            })
            .collect();
        let first = handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>();
        let positions = &first[0].study(study).unwrap().samples_position;
        assert!(first
            .iter()
            .all(|v| Arc::ptr_eq(&v.study(study).unwrap().samples_position, positions)));

        // Samples registered later do not change the cached ordering
        let late = metadata.register_sample(study, "S3").unwrap();
        metadata.update_sample_metadata(study, late, &mut |s| s.indexed = true).unwrap();
        let variant = converter.convert(&locus(), &[StudyGenotypeRow::new(study)], None).unwrap();
        assert_eq!(variant.study(study).unwrap().samples_position.len(), 2);
    }

    #[test]
    fn test_convert_row_with_annotation() {
        let (metadata, study, ids) = setup(&["S1"]);
        let codec = RowCodec::new();
        let converter = VariantConverter::new(metadata, codec.clone());

        let mut row = StudyGenotypeRow::new(study);
        row.add_sample(ids[0], GenotypeCode::Het);
        let mut stored = StoredRow::new(locus());
        stored.columns = codec.encode(&locus(), &row).unwrap();
        stored.annotation = Some(br#"{"clinical_significance":["benign"]}"#.to_vec());
        let variant = converter.convert_row(&stored).unwrap();
        assert_eq!(variant.annotation.unwrap().clinical_significance, vec!["benign"]);

        stored.annotation = Some(b"not json".to_vec());
        assert!(matches!(
            converter.convert_row(&stored),
            Err(ConvertError::CorruptAnnotation { .. })
        ));
    }
}
