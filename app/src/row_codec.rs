// ==============================================================================
// row_codec.rs - Genotype Row Codec
// ==============================================================================
// Description: Per-locus, per-study genotype encoding into wide-column values
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Column layout (one column family per row):
//   "<studyId>_0/0"  -> 4-byte big-endian hom-ref count
//   "<studyId>_<gt>" -> varint-encoded ascending sample ids holding <gt>
//
// Samples absent from every genotype list are implicitly hom-ref.
// ==============================================================================

use crate::encoding::{decode_sample_ids, encode_sample_ids};
use crate::genotype::GenotypeCode;
use crate::models::{Locus, SampleId, StudyId};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Column qualifier → raw cell bytes for one row
pub type ColumnValues = BTreeMap<String, Vec<u8>>;

/// Errors raised by the row codec
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Invalid encode request at {locus} (study {study_id}): {reason}")]
    Encoding {
        locus: String,
        study_id: StudyId,
        reason: String,
    },

    #[error("Corrupt row at {locus}, column '{column}': {reason}")]
    CorruptRow {
        locus: String,
        column: String,
        reason: String,
    },
}

/// Build the column qualifier for a study and genotype
pub fn column_key(study_id: StudyId, genotype: &str) -> String {
    format!("{}_{}", study_id, genotype)
}

/// Split a column qualifier into study id and genotype string
pub fn parse_column_key(key: &str) -> Option<(StudyId, &str)> {
    let (study, genotype) = key.split_once('_')?;
    if genotype.is_empty() {
        return None;
    }
    Some((study.parse().ok()?, genotype))
}

/// Counters for soft-invariant violations
///
/// These never fail a call. They let tests and operators notice encoder
/// regressions that the lenient decode path would otherwise hide.
#[derive(Debug, Default)]
pub struct InvariantMetrics {
    hom_ref_mismatches: AtomicU64,
    unknown_studies: AtomicU64,
}

impl InvariantMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hom_ref_mismatches(&self) -> u64 {
        self.hom_ref_mismatches.load(Ordering::Relaxed)
    }

    pub fn unknown_studies(&self) -> u64 {
        self.unknown_studies.load(Ordering::Relaxed)
    }

    pub(crate) fn record_hom_ref_mismatch(&self) {
        self.hom_ref_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unknown_study(&self) {
        self.unknown_studies.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decoded genotype content of one study at one locus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyGenotypeRow {
    pub study_id: StudyId,
    pub hom_ref_count: u32,
    pub calls: BTreeMap<GenotypeCode, BTreeSet<SampleId>>,
}

impl StudyGenotypeRow {
    pub fn new(study_id: StudyId) -> Self {
        Self {
            study_id,
            hom_ref_count: 0,
            calls: BTreeMap::new(),
        }
    }

    /// Build a row from an explicit sample → genotype assignment
    ///
    /// Hom-ref samples only bump the count.
    pub fn from_assignment(study_id: StudyId, assignment: &BTreeMap<SampleId, GenotypeCode>) -> Self {
        let mut row = Self::new(study_id);
        for (&sample, &code) in assignment {
            if code == GenotypeCode::HomRef {
                row.hom_ref_count += 1;
            } else {
                row.calls.entry(code).or_default().insert(sample);
            }
        }
        row
    }

    /// Record a sample call; returns false, changing nothing, when the
    /// sample is already listed
    pub fn add_sample(&mut self, sample: SampleId, code: GenotypeCode) -> bool {
        if self.genotype_of(sample).is_some() {
            return false;
        }
        if code == GenotypeCode::HomRef {
            self.hom_ref_count += 1;
            return true;
        }
        self.calls.entry(code).or_default().insert(sample);
        true
    }

    /// Genotype of an explicitly listed sample
    pub fn genotype_of(&self, sample: SampleId) -> Option<GenotypeCode> {
        self.calls
            .iter()
            .find(|(_, samples)| samples.contains(&sample))
            .map(|(code, _)| *code)
    }

    /// Samples appearing in any non-hom-ref list
    pub fn listed_samples(&self) -> BTreeSet<SampleId> {
        self.calls.values().flatten().copied().collect()
    }

    pub fn listed_count(&self) -> usize {
        self.calls.values().map(BTreeSet::len).sum()
    }

    /// Samples of `all_samples` not listed anywhere (implicitly hom-ref)
    pub fn hom_ref_samples(&self, all_samples: &[SampleId]) -> Vec<SampleId> {
        let listed = self.listed_samples();
        all_samples
            .iter()
            .copied()
            .filter(|s| !listed.contains(s))
            .collect()
    }

    /// Full sample → genotype mapping over a known sample set
    pub fn assignment(&self, all_samples: &[SampleId]) -> BTreeMap<SampleId, GenotypeCode> {
        all_samples
            .iter()
            .map(|&s| (s, self.genotype_of(s).unwrap_or(GenotypeCode::HomRef)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hom_ref_count == 0 && self.calls.values().all(BTreeSet::is_empty)
    }
}

/// Encoder/decoder for study genotype rows
#[derive(Debug, Clone, Default)]
pub struct RowCodec {
    metrics: Arc<InvariantMetrics>,
    known_studies: Option<BTreeSet<StudyId>>,
}

impl RowCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a metrics sink with other components
    pub fn with_metrics(metrics: Arc<InvariantMetrics>) -> Self {
        Self {
            metrics,
            known_studies: None,
        }
    }

    /// Restrict decoding to studies configured in the catalog
    pub fn with_known_studies(mut self, studies: impl IntoIterator<Item = StudyId>) -> Self {
        self.known_studies = Some(studies.into_iter().collect());
        self
    }

    pub fn metrics(&self) -> &Arc<InvariantMetrics> {
        &self.metrics
    }

    /// Encode one study row into column values
    pub fn encode(&self, locus: &Locus, row: &StudyGenotypeRow) -> Result<ColumnValues, CodecError> {
        let encoding_error = |reason: String| CodecError::Encoding {
            locus: locus.to_string(),
            study_id: row.study_id,
            reason,
        };

        if row.calls.get(&GenotypeCode::HomRef).is_some_and(|s| !s.is_empty()) {
            return Err(encoding_error(
                "samples listed under 0/0; hom-ref is stored only as a count".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        let mut columns = ColumnValues::new();
        columns.insert(
            column_key(row.study_id, GenotypeCode::HomRef.as_str()),
            row.hom_ref_count.to_be_bytes().to_vec(),
        );
        for (code, samples) in &row.calls {
            if *code == GenotypeCode::HomRef || samples.is_empty() {
                continue;
            }
            for sample in samples {
                if !seen.insert(*sample) {
                    return Err(encoding_error(format!(
                        "sample {} listed under more than one genotype",
                        sample
                    )));
                }
            }
            columns.insert(
                column_key(row.study_id, code.as_str()),
                encode_sample_ids(samples.iter().copied()),
            );
        }
        Ok(columns)
    }

    /// Encode a sample → genotype assignment for one study
    pub fn encode_assignment(
        &self,
        locus: &Locus,
        study_id: StudyId,
        assignment: &BTreeMap<SampleId, GenotypeCode>,
    ) -> Result<ColumnValues, CodecError> {
        self.encode(locus, &StudyGenotypeRow::from_assignment(study_id, assignment))
    }

    /// Decode every study present in a row
    ///
    /// Studies unknown to the catalog decode to an empty entry.
    pub fn decode(&self, locus: &Locus, columns: &ColumnValues) -> Result<Vec<StudyGenotypeRow>, CodecError> {
        let mut rows: BTreeMap<StudyId, StudyGenotypeRow> = BTreeMap::new();
        for (key, value) in columns {
            let (study_id, genotype) = parse_column_key(key).ok_or_else(|| CodecError::CorruptRow {
                locus: locus.to_string(),
                column: key.clone(),
                reason: "column key is not <studyId>_<genotype>".to_string(),
            })?;
            let row = rows
                .entry(study_id)
                .or_insert_with(|| StudyGenotypeRow::new(study_id));
            decode_cell(locus, key, genotype, value, row)?;
        }

        let mut decoded = Vec::with_capacity(rows.len());
        for (study_id, row) in rows {
            if let Some(known) = &self.known_studies {
                if !known.contains(&study_id) {
                    self.metrics.record_unknown_study();
                    warn!("Unknown study {} in row {}; decoding as empty entry", study_id, locus);
                    decoded.push(StudyGenotypeRow::new(study_id));
                    continue;
                }
            }
            decoded.push(row);
        }
        Ok(decoded)
    }

    /// Decode one study; an absent study yields an empty entry
    pub fn decode_study(
        &self,
        locus: &Locus,
        study_id: StudyId,
        columns: &ColumnValues,
    ) -> Result<StudyGenotypeRow, CodecError> {
        let prefix = format!("{}_", study_id);
        let mut row = StudyGenotypeRow::new(study_id);
        for (key, value) in columns.range(prefix.clone()..) {
            let Some(genotype) = key.strip_prefix(&prefix) else {
                break;
            };
            if genotype.is_empty() {
                return Err(CodecError::CorruptRow {
                    locus: locus.to_string(),
                    column: key.clone(),
                    reason: "empty genotype in column key".to_string(),
                });
            }
            decode_cell(locus, key, genotype, value, &mut row)?;
        }
        Ok(row)
    }

    /// Cross-check the stored hom-ref count against the implied one
    ///
    /// Returns false on mismatch. Never fails: counts drift during partial
    /// updates, so the mismatch is logged and counted only.
    pub fn check_hom_ref(&self, locus: &Locus, row: &StudyGenotypeRow, sample_count: usize) -> bool {
        let implied = sample_count.saturating_sub(row.listed_count());
        if implied == row.hom_ref_count as usize {
            return true;
        }
        self.metrics.record_hom_ref_mismatch();
        warn!(
            "Hom-ref count mismatch at {} (study {}): stored {}, implied {}",
            locus, row.study_id, row.hom_ref_count, implied
        );
        false
    }
}

fn decode_cell(
    locus: &Locus,
    key: &str,
    genotype: &str,
    value: &[u8],
    row: &mut StudyGenotypeRow,
) -> Result<(), CodecError> {
    let corrupt = |reason: String| CodecError::CorruptRow {
        locus: locus.to_string(),
        column: key.to_string(),
        reason,
    };

    if genotype == GenotypeCode::HomRef.as_str() {
        let bytes: [u8; 4] = value
            .try_into()
            .map_err(|_| corrupt(format!("hom-ref count has {} bytes, expected 4", value.len())))?;
        row.hom_ref_count = u32::from_be_bytes(bytes);
        return Ok(());
    }

    let code = GenotypeCode::parse(genotype);
    if code == GenotypeCode::HomRef {
        return Err(corrupt("sample list stored under a hom-ref genotype".to_string()));
    }
    if code == GenotypeCode::Other && genotype != GenotypeCode::Other.as_str() {
        debug!("Genotype '{}' at {} folded into other bucket", genotype, locus);
    }

    let ids = decode_sample_ids(value).map_err(|e| corrupt(e.to_string()))?;
    for id in ids {
        if !row.add_sample(id, code) {
            return Err(corrupt(format!("sample {} appears in two genotype sets", id)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn locus() -> Locus {
        Locus::new("1", 1000, "A", "G")
    }

    fn assignment(pairs: &[(SampleId, GenotypeCode)]) -> BTreeMap<SampleId, GenotypeCode> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_encode_column_layout() {
        let codec = RowCodec::new();
        let cols = codec
            .encode_assignment(
                &locus(),
                7,
                &assignment(&[
                    (1, GenotypeCode::HomRef),
                    (2, GenotypeCode::Het),
                    (3, GenotypeCode::HomAlt),
                    (4, GenotypeCode::Het),
                    (5, GenotypeCode::HomRef),
                ]),
            )
            .unwrap();

        assert_eq!(cols.get("7_0/0").unwrap(), &2u32.to_be_bytes().to_vec());
        assert_eq!(decode_sample_ids(cols.get("7_0/1").unwrap()).unwrap(), vec![2, 4]);
        assert_eq!(decode_sample_ids(cols.get("7_1/1").unwrap()).unwrap(), vec![3]);
        assert_eq!(cols.len(), 3);
    }

    #[test]
    fn test_round_trip() {
        let codec = RowCodec::new();
        let samples: Vec<SampleId> = (1..=6).collect();
        let original = assignment(&[
            (1, GenotypeCode::HomRef),
            (2, GenotypeCode::Het),
            (3, GenotypeCode::Missing),
            (4, GenotypeCode::Other),
            (5, GenotypeCode::HomAlt),
            (6, GenotypeCode::HomRef),
        ]);
        let cols = codec.encode_assignment(&locus(), 1, &original).unwrap();
        let row = codec.decode_study(&locus(), 1, &cols).unwrap();
        assert_eq!(row.assignment(&samples), original);
        assert_eq!(row.hom_ref_count, 2);
    }

    #[test]
    fn test_encode_rejects_hom_ref_list() {
        let codec = RowCodec::new();
        let mut row = StudyGenotypeRow::new(1);
        row.calls.insert(GenotypeCode::HomRef, [1].into_iter().collect());
        let err = codec.encode(&locus(), &row).unwrap_err();
        assert!(matches!(err, CodecError::Encoding { study_id: 1, .. }));
    }

    #[test]
    fn test_encode_rejects_sample_in_two_sets() {
        let codec = RowCodec::new();
        let mut row = StudyGenotypeRow::new(1);
        row.calls.insert(GenotypeCode::Het, [4].into_iter().collect());
        row.calls.insert(GenotypeCode::HomAlt, [4].into_iter().collect());
        assert!(matches!(
            codec.encode(&locus(), &row),
            Err(CodecError::Encoding { .. })
        ));
    }

    #[test]
    fn test_add_sample_rejects_duplicates() {
        let mut row = StudyGenotypeRow::new(1);
        assert!(row.add_sample(9, GenotypeCode::Het));
        assert!(!row.add_sample(9, GenotypeCode::HomAlt));
        assert!(row.add_sample(10, GenotypeCode::HomRef));
        assert_eq!(row.hom_ref_count, 1);

        // A listed sample never also counts as hom-ref
        assert!(!row.add_sample(9, GenotypeCode::HomRef));
        assert_eq!(row.hom_ref_count, 1);
        assert_eq!(row.genotype_of(9), Some(GenotypeCode::Het));
    }

    #[test]
    fn test_decode_corrupt_payloads() {
        let codec = RowCodec::new();
        let mut cols = ColumnValues::new();
        cols.insert("1_0/0".to_string(), vec![0, 1]);
        assert!(matches!(
            codec.decode(&locus(), &cols),
            Err(CodecError::CorruptRow { .. })
        ));

        let mut cols = ColumnValues::new();
        cols.insert("1_0/1".to_string(), vec![3, 1]);
        assert!(matches!(
            codec.decode(&locus(), &cols),
            Err(CodecError::CorruptRow { .. })
        ));

        let mut cols = ColumnValues::new();
        cols.insert("nostudy".to_string(), vec![0]);
        assert!(matches!(
            codec.decode(&locus(), &cols),
            Err(CodecError::CorruptRow { .. })
        ));

        // Same sample under two keys
        let mut cols = ColumnValues::new();
        cols.insert("1_0/1".to_string(), encode_sample_ids(vec![5u32]));
        cols.insert("1_1/1".to_string(), encode_sample_ids(vec![5u32]));
        assert!(matches!(
            codec.decode(&locus(), &cols),
            Err(CodecError::CorruptRow { .. })
        ));
    }

    #[test]
    fn test_decode_folds_unknown_genotypes_into_other() {
        let codec = RowCodec::new();
        let mut cols = ColumnValues::new();
        cols.insert("1_1/2".to_string(), encode_sample_ids(vec![3u32]));
        cols.insert("1_?".to_string(), encode_sample_ids(vec![1u32]));
        let row = codec.decode_study(&locus(), 1, &cols).unwrap();
        assert_eq!(row.calls.get(&GenotypeCode::Other).unwrap().len(), 2);
    }

    #[test]
    fn test_decode_unknown_study_is_empty() {
        let codec = RowCodec::new().with_known_studies([1]);
        let mut cols = codec
            .encode_assignment(&locus(), 1, &assignment(&[(1, GenotypeCode::Het)]))
            .unwrap();
        cols.extend(
            codec
                .encode_assignment(&locus(), 2, &assignment(&[(1, GenotypeCode::HomAlt)]))
                .unwrap(),
        );

        let rows = codec.decode(&locus(), &cols).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].genotype_of(1), Some(GenotypeCode::Het));
        assert!(rows[1].is_empty());
        assert_eq!(codec.metrics().unknown_studies(), 1);
    }

    #[test]
    fn test_decode_study_absent() {
        let codec = RowCodec::new();
        let cols = codec
            .encode_assignment(&locus(), 11, &assignment(&[(1, GenotypeCode::Het)]))
            .unwrap();
        // "1_" prefix must not pick up study 11
        let row = codec.decode_study(&locus(), 1, &cols).unwrap();
        assert!(row.is_empty());
    }

    #[test]
    fn test_hom_ref_implied_count_mismatch_is_counted() {
        let codec = RowCodec::new();
        let samples: Vec<SampleId> = (1..=10).collect();
        let mut row = StudyGenotypeRow::new(1);
        row.add_sample(2, GenotypeCode::Het);
        row.add_sample(5, GenotypeCode::HomAlt);
        row.add_sample(9, GenotypeCode::Missing);
        row.hom_ref_count = 6;

        let cols = codec.encode(&locus(), &row).unwrap();
        let decoded = codec.decode_study(&locus(), 1, &cols).unwrap();
        assert_eq!(decoded.hom_ref_samples(&samples).len(), 7);
        assert!(!codec.check_hom_ref(&locus(), &decoded, samples.len()));
        assert_eq!(codec.metrics().hom_ref_mismatches(), 1);

        row.hom_ref_count = 7;
        assert!(codec.check_hom_ref(&locus(), &row, samples.len()));
        assert_eq!(codec.metrics().hom_ref_mismatches(), 1);
    }

    #[test]
    fn test_decode_is_idempotent() {
        let codec = RowCodec::new();
        let cols = codec
            .encode_assignment(
                &locus(),
                3,
                &assignment(&[(1, GenotypeCode::Het), (2, GenotypeCode::HomRef)]),
            )
            .unwrap();
        let first = codec.decode(&locus(), &cols).unwrap();
        let second = codec.decode(&locus(), &cols).unwrap();
        assert_eq!(first, second);
    }
}
