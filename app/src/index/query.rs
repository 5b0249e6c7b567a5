// ==============================================================================
// index/query.rs - Sample Index Query Model
// ==============================================================================
// Description: Validated sample index query built from a structured filter
//              request, with projection onto single-sample lookups
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use super::sample_index::{
    IndexMask, SampleIndexEntry, FILE_PASS, FILE_QUAL_20, FILE_QUAL_40, FILE_SNV,
};
use crate::genotype::{GenotypeCode, NUM_CODES};
use crate::metadata::{MetadataError, MetadataManager};
use crate::models::{Region, SampleId, StudyId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Parent filter that accepts every genotype code
pub const ALL_GENOTYPES: [bool; NUM_CODES] = [true; NUM_CODES];

#[derive(Error, Debug)]
pub enum QueryConstructionError {
    #[error("Study '{0}' not found")]
    UnknownStudy(String),

    #[error("Sample '{0}' not found in study")]
    UnknownSample(String),

    #[error("Invalid genotype '{genotype}' for sample '{sample}'")]
    InvalidGenotype { sample: String, genotype: String },

    #[error("Genotype 0/0 is not indexed and cannot be requested for sample '{0}'")]
    HomRefNotIndexed(String),

    #[error("Negated samples cannot be combined with OR")]
    NegationWithOr,

    #[error("Negated sample '{0}' has no genotype filter")]
    NegatedWithoutGenotypes(String),

    #[error("At least one non-negated sample is required")]
    NoPositiveSample,

    #[error("Filters other than regions need at least one sample to scan")]
    NoSampleToScan,

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// How per-sample match sets are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryOperation {
    #[default]
    And,
    Or,
}

/// Annotation flags available in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationFlag {
    NonIntergenic,
    LossOfFunction,
    Missense,
    ProteinCoding,
    Rare1kg,
    RareGnomad,
    Clinical,
}

impl AnnotationFlag {
    pub fn bit(self) -> u8 {
        use super::sample_index::*;
        match self {
            AnnotationFlag::NonIntergenic => ANNOT_NON_INTERGENIC,
            AnnotationFlag::LossOfFunction => ANNOT_LOF,
            AnnotationFlag::Missense => ANNOT_MISSENSE,
            AnnotationFlag::ProteinCoding => ANNOT_PROTEIN_CODING,
            AnnotationFlag::Rare1kg => ANNOT_RARE_1KG,
            AnnotationFlag::RareGnomad => ANNOT_RARE_GNOMAD,
            AnnotationFlag::Clinical => ANNOT_CLINICAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualThreshold {
    Q20,
    Q40,
}

/// File constraints shared by every queried sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileFilterRequest {
    pub pass_only: bool,
    pub min_qual: Option<QualThreshold>,
    pub snv_only: bool,
}

impl FileFilterRequest {
    fn mask(&self) -> IndexMask {
        let mut bits = 0;
        if self.pass_only {
            bits |= FILE_PASS;
        }
        match self.min_qual {
            Some(QualThreshold::Q20) => bits |= FILE_QUAL_20,
            Some(QualThreshold::Q40) => bits |= FILE_QUAL_40,
            None => {}
        }
        if self.snv_only {
            bits |= FILE_SNV;
        }
        IndexMask::require(bits)
    }
}

/// Genotypes requested for one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleGenotypeRequest {
    pub sample: String,
    pub genotypes: Vec<String>,
}

/// Accepted parent genotypes for a child sample; `None` accepts all
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParentFilterRequest {
    pub sample: String,
    pub father: Option<Vec<String>>,
    pub mother: Option<Vec<String>>,
}

/// Structured filter handed over by the query planner
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleFilterRequest {
    pub study: String,
    pub regions: Vec<Region>,
    pub samples: Vec<SampleGenotypeRequest>,
    pub negated_samples: Vec<String>,
    pub operation: QueryOperation,
    pub annotation: Vec<AnnotationFlag>,
    pub file: FileFilterRequest,
    pub parents: Vec<ParentFilterRequest>,
    pub mendelian_error: Vec<String>,
    pub only_de_novo: bool,

    /// Samples to report; empty reports every indexed sample
    pub returned_samples: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct SampleFilter {
    name: String,
    id: SampleId,
    genotypes: Vec<GenotypeCode>,
}

/// Validated query over the sample index of one study
#[derive(Debug, Clone, PartialEq)]
pub struct SampleIndexQuery {
    study_id: StudyId,
    study_name: String,
    regions: Vec<Region>,
    samples: Vec<SampleFilter>,
    sample_ids: HashMap<String, SampleId>,
    negated_samples: BTreeSet<String>,
    father_filter: HashMap<String, [bool; NUM_CODES]>,
    mother_filter: HashMap<String, [bool; NUM_CODES]>,
    file_mask: IndexMask,
    annotation_mask: IndexMask,
    mendelian_error_set: BTreeSet<String>,
    only_de_novo: bool,
    operation: QueryOperation,
    returned_samples: Vec<String>,
}

/// A sample query projected onto one sample
#[derive(Debug, Clone, PartialEq)]
pub struct SingleSampleIndexQuery {
    pub study_id: StudyId,
    pub sample: String,
    pub sample_id: SampleId,
    pub regions: Vec<Region>,

    /// Empty accepts any indexed genotype
    pub genotypes: Vec<GenotypeCode>,
    pub negated: bool,
    pub father_filter: [bool; NUM_CODES],
    pub mother_filter: [bool; NUM_CODES],
    pub file_mask: IndexMask,
    pub annotation_mask: IndexMask,
    pub mendelian_error: bool,
    pub only_de_novo: bool,
}

fn parent_accepts(filter: &[bool; NUM_CODES], parent: Option<GenotypeCode>) -> bool {
    match parent {
        Some(code) => filter[code.index()],
        None => filter == &ALL_GENOTYPES,
    }
}

impl SingleSampleIndexQuery {
    /// Genotype, parent, file and annotation checks of one index entry
    pub fn matches(&self, entry: &SampleIndexEntry, annotation_bits: u8) -> bool {
        (self.genotypes.is_empty() || self.genotypes.contains(&entry.genotype))
            && parent_accepts(&self.father_filter, entry.father)
            && parent_accepts(&self.mother_filter, entry.mother)
            && self.file_mask.matches(entry.file_index)
            && self.annotation_mask.matches(annotation_bits)
    }
}

fn genotype_filter(sample: &str, genotypes: &[String]) -> Result<[bool; NUM_CODES], QueryConstructionError> {
    let mut filter = [false; NUM_CODES];
    for gt in genotypes {
        let code = GenotypeCode::parse_strict(gt).map_err(|_| QueryConstructionError::InvalidGenotype {
            sample: sample.to_string(),
            genotype: gt.clone(),
        })?;
        filter[code.index()] = true;
    }
    Ok(filter)
}

impl SampleIndexQuery {
    /// Validate a filter request against the catalog
    ///
    /// Fails before any storage access.
    pub fn build(
        request: &SampleFilterRequest,
        metadata: &dyn MetadataManager,
    ) -> Result<Self, QueryConstructionError> {
        let study = metadata
            .study_by_name(&request.study)?
            .ok_or_else(|| QueryConstructionError::UnknownStudy(request.study.clone()))?;

        let mut sample_ids = HashMap::new();
        let mut resolve = |name: &str| -> Result<SampleId, QueryConstructionError> {
            if let Some(&id) = sample_ids.get(name) {
                return Ok(id);
            }
            let id = metadata
                .resolve_sample_id(study.id, name)?
                .ok_or_else(|| QueryConstructionError::UnknownSample(name.to_string()))?;
            sample_ids.insert(name.to_string(), id);
            Ok(id)
        };

        // 1. Sample genotype filters
        let mut samples = Vec::with_capacity(request.samples.len());
        for req in &request.samples {
            let id = resolve(&req.sample)?;
            let mut genotypes = Vec::with_capacity(req.genotypes.len());
            for gt in &req.genotypes {
                let code = GenotypeCode::parse_strict(gt).map_err(|_| QueryConstructionError::InvalidGenotype {
                    sample: req.sample.clone(),
                    genotype: gt.clone(),
                })?;
                if code == GenotypeCode::HomRef {
                    return Err(QueryConstructionError::HomRefNotIndexed(req.sample.clone()));
                }
                if !genotypes.contains(&code) {
                    genotypes.push(code);
                }
            }
            samples.push(SampleFilter {
                name: req.sample.clone(),
                id,
                genotypes,
            });
        }

        // 2. Negation
        let negated_samples: BTreeSet<String> = request.negated_samples.iter().cloned().collect();
        if !negated_samples.is_empty() && request.operation == QueryOperation::Or {
            return Err(QueryConstructionError::NegationWithOr);
        }
        for name in &negated_samples {
            if !samples.iter().any(|s| &s.name == name) {
                return Err(QueryConstructionError::NegatedWithoutGenotypes(name.clone()));
            }
        }

        // 3. Pedigree filters
        let mut father_filter = HashMap::new();
        let mut mother_filter = HashMap::new();
        for parent in &request.parents {
            resolve(&parent.sample)?;
            if let Some(gts) = &parent.father {
                father_filter.insert(parent.sample.clone(), genotype_filter(&parent.sample, gts)?);
            }
            if let Some(gts) = &parent.mother {
                mother_filter.insert(parent.sample.clone(), genotype_filter(&parent.sample, gts)?);
            }
        }
        let mut mendelian_error_set = BTreeSet::new();
        for name in &request.mendelian_error {
            resolve(name)?;
            mendelian_error_set.insert(name.clone());
        }

        let query = Self {
            study_id: study.id,
            study_name: study.name,
            regions: request.regions.clone(),
            samples,
            sample_ids,
            negated_samples,
            father_filter,
            mother_filter,
            file_mask: request.file.mask(),
            annotation_mask: IndexMask::require(request.annotation.iter().fold(0, |acc, f| acc | f.bit())),
            mendelian_error_set,
            only_de_novo: request.only_de_novo,
            operation: request.operation,
            returned_samples: request.returned_samples.clone(),
        };

        // 4. Something must anchor a non-region query
        let positives = query.positive_samples().count();
        if !query.negated_samples.is_empty() && positives == 0 {
            return Err(QueryConstructionError::NoPositiveSample);
        }
        if !query.empty_or_region_filter() && positives == 0 && query.mendelian_error_set.is_empty() {
            return Err(QueryConstructionError::NoSampleToScan);
        }
        Ok(query)
    }

    pub fn study_id(&self) -> StudyId {
        self.study_id
    }

    pub fn study_name(&self) -> &str {
        &self.study_name
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn operation(&self) -> QueryOperation {
        self.operation
    }

    pub fn only_de_novo(&self) -> bool {
        self.only_de_novo
    }

    pub fn returned_samples(&self) -> &[String] {
        &self.returned_samples
    }

    pub fn mendelian_error_set(&self) -> &BTreeSet<String> {
        &self.mendelian_error_set
    }

    pub fn is_negated(&self, sample: &str) -> bool {
        self.negated_samples.contains(sample)
    }

    pub fn sample_id(&self, sample: &str) -> Option<SampleId> {
        self.sample_ids.get(sample).copied()
    }

    /// Names of samples with a genotype filter, in request order
    pub fn sample_names(&self) -> impl Iterator<Item = &str> {
        self.samples.iter().map(|s| s.name.as_str())
    }

    /// Samples whose matches are included rather than subtracted
    pub fn positive_samples(&self) -> impl Iterator<Item = &str> {
        self.sample_names().filter(move |s| !self.is_negated(s))
    }

    pub fn negated_samples(&self) -> impl Iterator<Item = &str> {
        self.negated_samples.iter().map(String::as_str)
    }

    pub fn get_father_filter(&self, sample: &str) -> [bool; NUM_CODES] {
        self.father_filter.get(sample).copied().unwrap_or(ALL_GENOTYPES)
    }

    pub fn get_mother_filter(&self, sample: &str) -> [bool; NUM_CODES] {
        self.mother_filter.get(sample).copied().unwrap_or(ALL_GENOTYPES)
    }

    /// True when no filter other than regions is active
    pub fn empty_or_region_filter(&self) -> bool {
        self.samples.is_empty()
            && self.negated_samples.is_empty()
            && self.father_filter.is_empty()
            && self.mother_filter.is_empty()
            && self.file_mask.is_empty()
            && self.annotation_mask.is_empty()
            && self.mendelian_error_set.is_empty()
            && !self.only_de_novo
    }

    /// Project the query onto one sample with its requested genotypes
    pub fn for_sample(&self, sample: &str) -> Result<SingleSampleIndexQuery, QueryConstructionError> {
        let genotypes = self
            .samples
            .iter()
            .find(|s| s.name == sample)
            .map(|s| s.genotypes.clone())
            .unwrap_or_default();
        self.for_sample_with(sample, genotypes)
    }

    /// Project the query onto one sample with explicit genotypes; the
    /// sample must be one the query resolved
    pub fn for_sample_with(
        &self,
        sample: &str,
        genotypes: Vec<GenotypeCode>,
    ) -> Result<SingleSampleIndexQuery, QueryConstructionError> {
        let sample_id = self
            .sample_id(sample)
            .ok_or_else(|| QueryConstructionError::UnknownSample(sample.to_string()))?;
        Ok(SingleSampleIndexQuery {
            study_id: self.study_id,
            sample: sample.to_string(),
            sample_id,
            regions: self.regions.clone(),
            genotypes,
            negated: self.is_negated(sample),
            father_filter: self.get_father_filter(sample),
            mother_filter: self.get_mother_filter(sample),
            file_mask: self.file_mask,
            annotation_mask: self.annotation_mask,
            mendelian_error: self.mendelian_error_set.contains(sample),
            only_de_novo: self.only_de_novo,
        })
    }
}
