// ==============================================================================
// index/sample_index.rs - Sample Index
// ==============================================================================
// Description: Per-sample sorted index of non-reference calls with file and
//              annotation bitmasks, trio flags and Mendelian error positions
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// File index bits:        PASS | QUAL>=20 | QUAL>=40 | SNV
// Annotation index bits:  NON_INTERGENIC | LOF | MISSENSE | PROTEIN_CODING |
//                         RARE_1KG | RARE_GNOMAD | CLINICAL
// ==============================================================================

use super::query::SingleSampleIndexQuery;
use crate::genotype::{is_de_novo, is_mendelian_error, GenotypeCode};
use crate::metadata::{MetadataError, MetadataManager};
use crate::models::{in_regions, FileId, Locus, SampleId, StudyId, VariantAnnotation, VariantType};
use crate::row_codec::{CodecError, RowCodec, StudyGenotypeRow};
use crate::stats::Pedigree;
use crate::storage::{FileCell, StorageError, StoredRow, VariantStore};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, info};

pub const FILE_PASS: u8 = 1 << 0;
pub const FILE_QUAL_20: u8 = 1 << 1;
pub const FILE_QUAL_40: u8 = 1 << 2;
pub const FILE_SNV: u8 = 1 << 3;

pub const ANNOT_NON_INTERGENIC: u8 = 1 << 0;
pub const ANNOT_LOF: u8 = 1 << 1;
pub const ANNOT_MISSENSE: u8 = 1 << 2;
pub const ANNOT_PROTEIN_CODING: u8 = 1 << 3;
pub const ANNOT_RARE_1KG: u8 = 1 << 4;
pub const ANNOT_RARE_GNOMAD: u8 = 1 << 5;
pub const ANNOT_CLINICAL: u8 = 1 << 6;

/// Frequency below which a variant counts as rare
const RARE_FREQUENCY: f64 = 0.01;

const LOF_TERMS: &[&str] = &[
    "transcript_ablation",
    "splice_acceptor_variant",
    "splice_donor_variant",
    "stop_gained",
    "frameshift_variant",
    "stop_lost",
    "start_lost",
    "initiator_codon_variant",
];

#[derive(Error, Debug)]
pub enum IndexError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Study {0} not found")]
    StudyNotFound(StudyId),

    #[error("Corrupt annotation at {locus}: {source}")]
    CorruptAnnotation {
        locus: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Sample index lock poisoned")]
    LockPoisoned,
}

/// Mask/value pair over an index byte; matches when `bits & mask == value`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexMask {
    pub mask: u8,
    pub value: u8,
}

impl IndexMask {
    /// Require every bit of `bits` to be set
    pub fn require(bits: u8) -> Self {
        Self { mask: bits, value: bits }
    }

    pub fn is_empty(&self) -> bool {
        self.mask == 0
    }

    pub fn matches(&self, bits: u8) -> bool {
        bits & self.mask == self.value
    }
}

/// Indexed call of one sample at one locus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleIndexEntry {
    pub genotype: GenotypeCode,
    pub file_index: u8,

    /// Parent genotypes; `None` when the parent is unknown
    pub father: Option<GenotypeCode>,
    pub mother: Option<GenotypeCode>,

    pub mendelian_error: bool,
    pub de_novo: bool,
}

#[derive(Debug, Default)]
struct SampleIndexData {
    calls: BTreeMap<Locus, SampleIndexEntry>,

    // Hom-ref children can carry Mendelian errors without being indexed
    mendelian_errors: BTreeSet<Locus>,
}

type StudyIndex = HashMap<SampleId, SampleIndexData>;

/// File bits of a stored call
pub fn file_index_bits(locus: &Locus, cell: &FileCell) -> u8 {
    let mut bits = 0;
    if cell.filter.as_deref() == Some("PASS") {
        bits |= FILE_PASS;
    }
    if let Some(qual) = cell.qual {
        if qual >= 20.0 {
            bits |= FILE_QUAL_20;
        }
        if qual >= 40.0 {
            bits |= FILE_QUAL_40;
        }
    }
    if locus.variant_type() == VariantType::Snv {
        bits |= FILE_SNV;
    }
    bits
}

/// Annotation bits of a variant
pub fn annotation_index_bits(annotation: &VariantAnnotation) -> u8 {
    let mut bits = 0;
    for ct in &annotation.consequence_types {
        let terms = &ct.sequence_ontology_terms;
        if terms.iter().any(|t| t != "intergenic_variant") {
            bits |= ANNOT_NON_INTERGENIC;
        }
        if terms.iter().any(|t| LOF_TERMS.contains(&t.as_str())) {
            bits |= ANNOT_LOF;
        }
        if terms.iter().any(|t| t == "missense_variant") {
            bits |= ANNOT_MISSENSE;
        }
        if ct.biotype.as_deref() == Some("protein_coding") {
            bits |= ANNOT_PROTEIN_CODING;
        }
    }

    // Absent from a population counts as rare
    let rare_in = |study: &str| {
        annotation
            .population_frequencies
            .iter()
            .filter(|f| f.study.eq_ignore_ascii_case(study))
            .all(|f| f.alt_allele_freq < RARE_FREQUENCY)
    };
    if rare_in("1kG_phase3") {
        bits |= ANNOT_RARE_1KG;
    }
    if rare_in("GNOMAD_GENOMES") {
        bits |= ANNOT_RARE_GNOMAD;
    }
    if !annotation.clinical_significance.is_empty() {
        bits |= ANNOT_CLINICAL;
    }
    bits
}

/// File bits per sample for one study, from the row's file cells
pub fn file_bits_by_sample(
    row: &StoredRow,
    study_id: StudyId,
    file_samples: &HashMap<FileId, Vec<SampleId>>,
) -> HashMap<SampleId, u8> {
    let mut bits = HashMap::new();
    for cell in row.file_cells(study_id) {
        let cell_bits = file_index_bits(&row.locus, cell);
        for &sample in file_samples.get(&cell.file_id).into_iter().flatten() {
            bits.insert(sample, cell_bits);
        }
    }
    bits
}

/// In-process sample index
#[derive(Debug, Default)]
pub struct SampleIndex {
    studies: RwLock<HashMap<StudyId, StudyIndex>>,
    annotations: RwLock<BTreeMap<Locus, u8>>,
}

impl SampleIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-index one study row at `locus`
    ///
    /// Listed samples get an entry; every trio child in `pedigree` is
    /// checked for Mendelian errors, with unlisted samples read as hom-ref.
    pub fn update(
        &self,
        study_id: StudyId,
        locus: &Locus,
        row: &StudyGenotypeRow,
        file_bits: &HashMap<SampleId, u8>,
        pedigree: &Pedigree,
    ) -> Result<(), IndexError> {
        let genotype = |sample: SampleId| row.genotype_of(sample).unwrap_or(GenotypeCode::HomRef);

        let mut studies = self.studies.write().map_err(|_| IndexError::LockPoisoned)?;
        let study = studies.entry(study_id).or_default();
        for data in study.values_mut() {
            data.calls.remove(locus);
            data.mendelian_errors.remove(locus);
        }

        for (&code, samples) in &row.calls {
            for &sample in samples {
                let trio = pedigree.parents(sample);
                let father = trio.and_then(|t| t.father).map(genotype);
                let mother = trio.and_then(|t| t.mother).map(genotype);
                let entry = SampleIndexEntry {
                    genotype: code,
                    file_index: file_bits.get(&sample).copied().unwrap_or(0),
                    father,
                    mother,
                    mendelian_error: is_mendelian_error(code, father, mother),
                    de_novo: is_de_novo(code, father, mother),
                };
                study
                    .entry(sample)
                    .or_default()
                    .calls
                    .insert(locus.clone(), entry);
            }
        }

        for trio in pedigree.trios() {
            let father = trio.father.map(genotype);
            let mother = trio.mother.map(genotype);
            if is_mendelian_error(genotype(trio.child), father, mother) {
                study
                    .entry(trio.child)
                    .or_default()
                    .mendelian_errors
                    .insert(locus.clone());
            }
        }
        Ok(())
    }

    pub fn update_annotation(&self, locus: &Locus, annotation: &VariantAnnotation) -> Result<(), IndexError> {
        let bits = annotation_index_bits(annotation);
        self.annotations
            .write()
            .map_err(|_| IndexError::LockPoisoned)?
            .insert(locus.clone(), bits);
        Ok(())
    }

    /// Annotation bits at a locus; 0 when not annotated
    pub fn annotation_bits(&self, locus: &Locus) -> Result<u8, IndexError> {
        Ok(self
            .annotations
            .read()
            .map_err(|_| IndexError::LockPoisoned)?
            .get(locus)
            .copied()
            .unwrap_or(0))
    }

    pub fn entry(&self, study_id: StudyId, sample: SampleId, locus: &Locus) -> Result<Option<SampleIndexEntry>, IndexError> {
        let studies = self.studies.read().map_err(|_| IndexError::LockPoisoned)?;
        Ok(studies
            .get(&study_id)
            .and_then(|s| s.get(&sample))
            .and_then(|d| d.calls.get(locus))
            .copied())
    }

    /// Loci where a single-sample query matches
    pub fn lookup(&self, query: &SingleSampleIndexQuery) -> Result<BTreeSet<Locus>, IndexError> {
        let annotations = self.annotations.read().map_err(|_| IndexError::LockPoisoned)?;
        let studies = self.studies.read().map_err(|_| IndexError::LockPoisoned)?;
        let Some(data) = studies.get(&query.study_id).and_then(|s| s.get(&query.sample_id)) else {
            return Ok(BTreeSet::new());
        };

        Ok(data
            .calls
            .iter()
            .filter(|(locus, _)| in_regions(&query.regions, locus))
            .filter(|(locus, entry)| {
                let annotation = annotations.get(*locus).copied().unwrap_or(0);
                query.matches(entry, annotation)
            })
            .map(|(locus, _)| locus.clone())
            .collect())
    }

    /// Loci where the sample's call breaks Mendelian inheritance
    pub fn mendelian_errors(&self, study_id: StudyId, sample: SampleId) -> Result<BTreeSet<Locus>, IndexError> {
        let studies = self.studies.read().map_err(|_| IndexError::LockPoisoned)?;
        Ok(studies
            .get(&study_id)
            .and_then(|s| s.get(&sample))
            .map(|d| d.mendelian_errors.clone())
            .unwrap_or_default())
    }

    /// Number of indexed calls of a sample
    pub fn call_count(&self, study_id: StudyId, sample: SampleId) -> Result<usize, IndexError> {
        let studies = self.studies.read().map_err(|_| IndexError::LockPoisoned)?;
        Ok(studies
            .get(&study_id)
            .and_then(|s| s.get(&sample))
            .map_or(0, |d| d.calls.len()))
    }

    /// Drop and re-derive the index of a study from the variant store
    pub fn rebuild(
        &self,
        store: &dyn VariantStore,
        metadata: &dyn MetadataManager,
        codec: &RowCodec,
        study_id: StudyId,
    ) -> Result<usize, IndexError> {
        // 1. Reset
        if metadata.study(study_id)?.is_none() {
            return Err(IndexError::StudyNotFound(study_id));
        }
        self.studies
            .write()
            .map_err(|_| IndexError::LockPoisoned)?
            .remove(&study_id);

        let samples = metadata.samples(study_id)?;
        let pedigree = Pedigree::from_metadata(&samples);
        let mut file_samples: HashMap<FileId, Vec<SampleId>> = HashMap::new();

        // 2. Index every row of the study
        let mut indexed = 0;
        for row in store.scan(&[])? {
            let study_row = codec.decode_study(&row.locus, study_id, &row.columns)?;
            if study_row.is_empty() {
                continue;
            }
            for cell in row.file_cells(study_id) {
                if !file_samples.contains_key(&cell.file_id) {
                    let ids = metadata.file_samples(study_id, cell.file_id)?;
                    file_samples.insert(cell.file_id, ids);
                }
            }
            let bits = file_bits_by_sample(&row, study_id, &file_samples);
            self.update(study_id, &row.locus, &study_row, &bits, &pedigree)?;

            // 3. Annotation bits
            if let Some(blob) = &row.annotation {
                let annotation: VariantAnnotation =
                    serde_json::from_slice(blob).map_err(|source| IndexError::CorruptAnnotation {
                        locus: row.locus.to_string(),
                        source,
                    })?;
                self.update_annotation(&row.locus, &annotation)?;
            }
            indexed += 1;
        }

        debug!("Pedigree with {} trios used for study {}", pedigree.len(), study_id);
        info!("Rebuilt sample index of study {} from {} rows", study_id, indexed);
        Ok(indexed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataManager;
    use crate::models::{ConsequenceType, PopulationFrequency};
    use crate::stats::Trio;
    use crate::storage::InMemoryVariantStore;

    fn locus(pos: u64) -> Locus {
        Locus::new("1", pos, "A", "G")
    }

    fn row(calls: &[(SampleId, GenotypeCode)]) -> StudyGenotypeRow {
        let mut row = StudyGenotypeRow::new(1);
        for &(s, c) in calls {
            row.add_sample(s, c);
        }
        row
    }

    #[test]
    fn test_file_bits() {
        let cell = FileCell {
            study_id: 1,
            file_id: 1,
            qual: Some(35.0),
            filter: Some("PASS".to_string()),
            overlapping: false,
        };
        assert_eq!(file_index_bits(&locus(1), &cell), FILE_PASS | FILE_QUAL_20 | FILE_SNV);

        let indel = Locus::new("1", 1, "A", "AT");
        let cell = FileCell { qual: None, filter: Some("LowQual".to_string()), ..cell };
        assert_eq!(file_index_bits(&indel, &cell), 0);
    }

    #[test]
    fn test_annotation_bits() {
        let annotation = VariantAnnotation {
            consequence_types: vec![ConsequenceType {
                gene_name: Some("BRCA2".to_string()),
                biotype: Some("protein_coding".to_string()),
                sequence_ontology_terms: vec!["stop_gained".to_string()],
            }],
            population_frequencies: vec![PopulationFrequency {
                study: "GNOMAD_GENOMES".to_string(),
                population: "ALL".to_string(),
                alt_allele_freq: 0.2,
            }],
            clinical_significance: vec![],
        };
        let bits = annotation_index_bits(&annotation);
        assert_eq!(bits, ANNOT_NON_INTERGENIC | ANNOT_LOF | ANNOT_PROTEIN_CODING | ANNOT_RARE_1KG);
        assert!(IndexMask::require(ANNOT_LOF).matches(bits));
        assert!(!IndexMask::require(ANNOT_RARE_GNOMAD).matches(bits));
    }

    #[test]
    fn test_update_indexes_only_listed_samples() {
        let index = SampleIndex::new();
        let r = row(&[(1, GenotypeCode::Het), (2, GenotypeCode::HomRef), (3, GenotypeCode::Missing)]);
        index.update(1, &locus(10), &r, &HashMap::new(), &Pedigree::new()).unwrap();

        assert_eq!(index.entry(1, 1, &locus(10)).unwrap().unwrap().genotype, GenotypeCode::Het);
        assert!(index.entry(1, 2, &locus(10)).unwrap().is_none());
        assert_eq!(index.call_count(1, 3).unwrap(), 1);

        // Re-indexing the locus replaces earlier entries
        let r = row(&[(3, GenotypeCode::HomAlt)]);
        index.update(1, &locus(10), &r, &HashMap::new(), &Pedigree::new()).unwrap();
        assert!(index.entry(1, 1, &locus(10)).unwrap().is_none());
        assert_eq!(index.call_count(1, 3).unwrap(), 1);
    }

    #[test]
    fn test_poisoned_lock_is_reported() {
        let index = std::sync::Arc::new(SampleIndex::new());
        let holder = std::sync::Arc::clone(&index);
        let _ = std::thread::spawn(move || {
            let _guard = holder.studies.write().unwrap();
            panic!("writer died holding the lock");
        })
        .join();

        assert!(matches!(index.call_count(1, 1), Err(IndexError::LockPoisoned)));
        assert!(matches!(index.entry(1, 1, &locus(10)), Err(IndexError::LockPoisoned)));
    }

    #[test]
    fn test_trio_flags() {
        let index = SampleIndex::new();
        let mut pedigree = Pedigree::new();
        pedigree.add_trio(Trio { child: 3, father: Some(1), mother: Some(2) });

        // Child het, parents implicitly hom-ref: de novo and Mendelian error
        index.update(1, &locus(10), &row(&[(3, GenotypeCode::Het)]), &HashMap::new(), &pedigree).unwrap();
        let entry = index.entry(1, 3, &locus(10)).unwrap().unwrap();
        assert!(entry.de_novo);
        assert!(entry.mendelian_error);
        assert_eq!(entry.father, Some(GenotypeCode::HomRef));

        // Hom-ref child of two hom-alt parents
        let r = row(&[(1, GenotypeCode::HomAlt), (2, GenotypeCode::HomAlt)]);
        index.update(1, &locus(20), &r, &HashMap::new(), &pedigree).unwrap();
        assert!(index.entry(1, 3, &locus(20)).unwrap().is_none());
        let errors = index.mendelian_errors(1, 3).unwrap();
        assert!(errors.contains(&locus(10)));
        assert!(errors.contains(&locus(20)));
    }

    #[test]
    fn test_rebuild_from_store() {
        let store = InMemoryVariantStore::new();
        let metadata = InMemoryMetadataManager::new();
        let codec = RowCodec::new();
        let study = metadata.register_study("s").unwrap();
        let s1 = metadata.register_sample(study, "S1").unwrap();
        let s2 = metadata.register_sample(study, "S2").unwrap();
        let file = metadata.register_file(study, "a.vcf", &[s1, s2]).unwrap();

        let mut stored = StoredRow::new(locus(10));
        let mut r = StudyGenotypeRow::new(study);
        r.add_sample(s1, GenotypeCode::Het);
        r.add_sample(s2, GenotypeCode::HomRef);
        stored.columns = codec.encode(&locus(10), &r).unwrap();
        stored.files.push(FileCell {
            study_id: study,
            file_id: file,
            qual: Some(50.0),
            filter: Some("PASS".to_string()),
            overlapping: false,
        });
        stored.annotation = Some(br#"{"clinical_significance":["pathogenic"]}"#.to_vec());
        store.put_row(stored).unwrap();

        let index = SampleIndex::new();
        assert_eq!(index.rebuild(&store, &metadata, &codec, study).unwrap(), 1);
        let entry = index.entry(study, s1, &locus(10)).unwrap().unwrap();
        assert_eq!(entry.file_index, FILE_PASS | FILE_QUAL_20 | FILE_QUAL_40 | FILE_SNV);
        assert_ne!(index.annotation_bits(&locus(10)).unwrap() & ANNOT_CLINICAL, 0);

        assert!(matches!(
            index.rebuild(&store, &metadata, &codec, 99),
            Err(IndexError::StudyNotFound(99))
        ));
    }
}
