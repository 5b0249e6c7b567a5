// ==============================================================================
// models.rs - Variant Data Models
// ==============================================================================
// Description: Loci, regions, annotations and reconstructed variant objects
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Numeric sample identifier assigned by the metadata catalog
pub type SampleId = u32;

/// Numeric study identifier assigned by the metadata catalog
pub type StudyId = u32;

/// Numeric file identifier assigned by the metadata catalog
pub type FileId = u32;

/// Errors raised when parsing loci and regions from text
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseLocusError {
    #[error("Invalid locus '{0}' (expected chrom:pos:ref:alt)")]
    InvalidLocus(String),

    #[error("Invalid region '{0}' (expected chrom or chrom:start-end)")]
    InvalidRegion(String),

    #[error("Invalid position '{0}'")]
    InvalidPosition(String),
}

/// Variant classification derived from the reference and alternate alleles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VariantType {
    /// Single nucleotide variant
    Snv,
    /// Multi nucleotide variant (same length, more than one base)
    Mnv,
    /// Insertion or deletion
    Indel,
    /// Reference block / reference confirmation call
    NoVariation,
    /// Symbolic allele such as `<DEL>`
    Symbolic,
}

impl VariantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VariantType::Snv => "SNV",
            VariantType::Mnv => "MNV",
            VariantType::Indel => "INDEL",
            VariantType::NoVariation => "NO_VARIATION",
            VariantType::Symbolic => "SYMBOLIC",
        }
    }
}

/// One row of variant data: (chromosome, position, reference, alternate)
///
/// Ordering is chromosome, then position, then alleles. Stores rely on this
/// ordering for range partitioning.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Locus {
    pub chromosome: String,
    pub position: u64,
    pub reference: String,
    pub alternate: String,
}

impl Locus {
    pub fn new(
        chromosome: impl Into<String>,
        position: u64,
        reference: impl Into<String>,
        alternate: impl Into<String>,
    ) -> Self {
        Self {
            chromosome: chromosome.into(),
            position,
            reference: reference.into(),
            alternate: alternate.into(),
        }
    }

    /// Classify the variant from its alleles
    pub fn variant_type(&self) -> VariantType {
        let alt = self.alternate.as_str();
        if alt.is_empty() || alt == "." || alt == "<*>" || alt == "<NON_REF>" || alt == self.reference {
            return VariantType::NoVariation;
        }
        if alt.starts_with('<') {
            return VariantType::Symbolic;
        }
        match (self.reference.len(), alt.len()) {
            (1, 1) => VariantType::Snv,
            (r, a) if r == a => VariantType::Mnv,
            _ => VariantType::Indel,
        }
    }

    /// Length difference between alleles (0 for non-indels)
    pub fn indel_length(&self) -> usize {
        self.reference.len().abs_diff(self.alternate.len())
    }

    /// True when the SNV is a purine/purine or pyrimidine/pyrimidine change
    pub fn is_transition(&self) -> bool {
        matches!(
            (self.reference.as_str(), self.alternate.as_str()),
            ("A", "G") | ("G", "A") | ("C", "T") | ("T", "C")
        )
    }
}

impl fmt::Display for Locus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.chromosome, self.position, self.reference, self.alternate
        )
    }
}

impl FromStr for Locus {
    type Err = ParseLocusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 3 || parts.len() > 4 || parts[0].is_empty() {
            return Err(ParseLocusError::InvalidLocus(s.to_string()));
        }
        let position = parts[1]
            .parse::<u64>()
            .map_err(|_| ParseLocusError::InvalidPosition(parts[1].to_string()))?;
        let alternate = parts.get(3).copied().unwrap_or("");
        Ok(Locus::new(parts[0], position, parts[2], alternate))
    }
}

/// Genomic interval, inclusive on both ends
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Region {
    pub chromosome: String,
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn new(chromosome: impl Into<String>, start: u64, end: u64) -> Self {
        Self {
            chromosome: chromosome.into(),
            start,
            end,
        }
    }

    /// Region covering a whole chromosome
    pub fn whole_chromosome(chromosome: impl Into<String>) -> Self {
        Self::new(chromosome, 0, u64::MAX)
    }

    pub fn contains(&self, locus: &Locus) -> bool {
        self.chromosome == locus.chromosome && self.start <= locus.position && locus.position <= self.end
    }
}

impl FromStr for Region {
    type Err = ParseLocusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((chrom, range)) = s.split_once(':') else {
            if s.is_empty() {
                return Err(ParseLocusError::InvalidRegion(s.to_string()));
            }
            return Ok(Region::whole_chromosome(s));
        };
        let (start, end) = range
            .split_once('-')
            .ok_or_else(|| ParseLocusError::InvalidRegion(s.to_string()))?;
        let start = start
            .parse::<u64>()
            .map_err(|_| ParseLocusError::InvalidPosition(start.to_string()))?;
        let end = end
            .parse::<u64>()
            .map_err(|_| ParseLocusError::InvalidPosition(end.to_string()))?;
        if chrom.is_empty() || end < start {
            return Err(ParseLocusError::InvalidRegion(s.to_string()));
        }
        Ok(Region::new(chrom, start, end))
    }
}

/// Returns true when no regions are given or any region contains the locus
pub fn in_regions(regions: &[Region], locus: &Locus) -> bool {
    regions.is_empty() || regions.iter().any(|r| r.contains(locus))
}

/// Consequence of a variant on one transcript
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConsequenceType {
    #[serde(default)]
    pub gene_name: Option<String>,

    #[serde(default)]
    pub biotype: Option<String>,

    /// Sequence Ontology terms (e.g., "missense_variant")
    #[serde(default)]
    pub sequence_ontology_terms: Vec<String>,
}

/// Alternate allele frequency in a reference population
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationFrequency {
    pub study: String,
    pub population: String,
    pub alt_allele_freq: f64,
}

/// Annotation blob stored alongside each row (JSON encoded)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct VariantAnnotation {
    #[serde(default)]
    pub consequence_types: Vec<ConsequenceType>,

    #[serde(default)]
    pub population_frequencies: Vec<PopulationFrequency>,

    #[serde(default)]
    pub clinical_significance: Vec<String>,
}

/// Ordered sample names reported for one study, with id → position lookup
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SamplesPosition {
    names: Vec<String>,
    positions: std::collections::HashMap<SampleId, usize>,
}

impl SamplesPosition {
    /// Build from (sample id, sample name) pairs in output order; a repeated
    /// id keeps its first position
    pub fn from_ordered(samples: impl IntoIterator<Item = (SampleId, String)>) -> Self {
        let mut names = Vec::new();
        let mut positions = std::collections::HashMap::new();
        for (id, name) in samples {
            if let std::collections::hash_map::Entry::Vacant(slot) = positions.entry(id) {
                slot.insert(names.len());
                names.push(name);
            }
        }
        Self { names, positions }
    }

    pub fn position(&self, sample_id: SampleId) -> Option<usize> {
        self.positions.get(&sample_id).copied()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Per-study entry of a reconstructed variant
#[derive(Debug, Clone, PartialEq)]
pub struct StudyEntry {
    pub study_id: StudyId,
    pub study_name: String,

    /// Always `["GT"]` for rows reconstructed from the genotype columns
    pub format: Vec<String>,

    pub samples_position: Arc<SamplesPosition>,

    /// One entry per reported sample, one value per format field
    pub samples_data: Vec<Vec<String>>,
}

impl StudyEntry {
    /// Genotype of a sample by name
    pub fn sample_genotype(&self, sample: &str) -> Option<&str> {
        let idx = self.samples_position.names().iter().position(|n| n == sample)?;
        self.samples_data.get(idx)?.first().map(|s| s.as_str())
    }
}

/// Canonical variant object returned by queries
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub locus: Locus,
    pub variant_type: VariantType,
    pub studies: Vec<StudyEntry>,
    pub annotation: Option<VariantAnnotation>,
}

impl Variant {
    pub fn new(locus: Locus) -> Self {
        let variant_type = locus.variant_type();
        Self {
            locus,
            variant_type,
            studies: Vec::new(),
            annotation: None,
        }
    }

    pub fn study(&self, study_id: StudyId) -> Option<&StudyEntry> {
        self.studies.iter().find(|s| s.study_id == study_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variant_type_classification() {
        assert_eq!(Locus::new("1", 100, "A", "T").variant_type(), VariantType::Snv);
        assert_eq!(Locus::new("1", 100, "AC", "TG").variant_type(), VariantType::Mnv);
        assert_eq!(Locus::new("1", 100, "A", "AGT").variant_type(), VariantType::Indel);
        assert_eq!(Locus::new("1", 100, "A", ".").variant_type(), VariantType::NoVariation);
        assert_eq!(Locus::new("1", 100, "A", "<*>").variant_type(), VariantType::NoVariation);
        assert_eq!(Locus::new("1", 100, "A", "<DEL>").variant_type(), VariantType::Symbolic);
    }

    #[test]
    fn test_locus_display_and_parse() {
        let locus = Locus::new("chr1", 100, "A", "T");
        assert_eq!(locus.to_string(), "chr1:100:A:T");
        assert_eq!("chr1:100:A:T".parse::<Locus>().unwrap(), locus);

        // Reference block without alternate
        let block: Locus = "chr1:100:A".parse().unwrap();
        assert_eq!(block.variant_type(), VariantType::NoVariation);

        assert!("chr1".parse::<Locus>().is_err());
        assert!("chr1:x:A:T".parse::<Locus>().is_err());
    }

    #[test]
    fn test_region_parse_and_contains() {
        let region: Region = "1:100-200".parse().unwrap();
        assert!(region.contains(&Locus::new("1", 100, "A", "T")));
        assert!(region.contains(&Locus::new("1", 200, "A", "T")));
        assert!(!region.contains(&Locus::new("1", 201, "A", "T")));
        assert!(!region.contains(&Locus::new("2", 150, "A", "T")));

        let whole: Region = "X".parse().unwrap();
        assert!(whole.contains(&Locus::new("X", 1, "A", "T")));

        assert!("1:200-100".parse::<Region>().is_err());
    }

    #[test]
    fn test_transitions() {
        assert!(Locus::new("1", 1, "A", "G").is_transition());
        assert!(Locus::new("1", 1, "C", "T").is_transition());
        assert!(!Locus::new("1", 1, "A", "C").is_transition());
    }

    #[test]
    fn test_samples_position() {
        let positions = SamplesPosition::from_ordered(vec![(7, "S7".to_string()), (3, "S3".to_string())]);
        assert_eq!(positions.position(7), Some(0));
        assert_eq!(positions.position(3), Some(1));
        assert_eq!(positions.position(1), None);
        assert_eq!(positions.names(), &["S7".to_string(), "S3".to_string()]);
    }
}
