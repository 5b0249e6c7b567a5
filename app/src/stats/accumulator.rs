// ==============================================================================
// stats/accumulator.rs - Sample Stats Accumulator
// ==============================================================================
// Description: Mergeable partial counters and one-shot finalized statistics
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Lifecycle:
//   Partial --update/merge*--> Partial --finalize (once)--> Finalized
//
//   Merging is plain integer/float addition plus key-wise histogram sums,
//   so partials can be combined in any order or grouping.
// ==============================================================================

use super::StatsError;
use crate::genotype::GenotypeCode;
use crate::models::{Locus, SampleId, VariantAnnotation, VariantType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Indel length histogram bucket labels
pub const INDEL_LENGTH_BUCKETS: [&str; 5] = ["<5", "5-10", "10-15", "15-20", ">=20"];

fn indel_bucket(length: usize) -> &'static str {
    match length {
        0..=4 => INDEL_LENGTH_BUCKETS[0],
        5..=9 => INDEL_LENGTH_BUCKETS[1],
        10..=14 => INDEL_LENGTH_BUCKETS[2],
        15..=19 => INDEL_LENGTH_BUCKETS[3],
        _ => INDEL_LENGTH_BUCKETS[4],
    }
}

fn bump(map: &mut BTreeMap<String, u64>, key: &str) {
    *map.entry(key.to_string()).or_insert(0) += 1;
}

fn merge_histogram(into: &mut BTreeMap<String, u64>, from: &BTreeMap<String, u64>) {
    for (key, count) in from {
        *into.entry(key.clone()).or_insert(0) += count;
    }
}

/// One sample's call at one row, as seen by a map task
#[derive(Debug, Clone)]
pub struct SampleCall<'a> {
    pub locus: &'a Locus,
    pub genotype: GenotypeCode,
    pub qual: Option<f64>,
    pub filter: Option<&'a str>,
    pub annotation: Option<&'a VariantAnnotation>,
    pub mendelian_error: bool,
    pub de_novo: bool,
}

/// Raw, mergeable counters for one sample
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PartialSampleStats {
    pub sample_id: SampleId,
    pub sample_name: String,
    pub num_variants: u64,
    pub num_pass: u64,
    pub transitions: u64,
    pub transversions: u64,
    pub genotype_count: BTreeMap<String, u64>,
    pub chromosome_count: BTreeMap<String, u64>,
    pub type_count: BTreeMap<String, u64>,
    pub indel_length_count: BTreeMap<String, u64>,
    pub consequence_type_count: BTreeMap<String, u64>,
    pub biotype_count: BTreeMap<String, u64>,
    pub qual_count: u64,
    pub qual_sum: f64,
    pub qual_sum_sq: f64,
    pub mendelian_error_count: u64,
    pub de_novo_count: u64,
}

impl PartialSampleStats {
    pub fn new(sample_id: SampleId, sample_name: impl Into<String>) -> Self {
        Self {
            sample_id,
            sample_name: sample_name.into(),
            ..Default::default()
        }
    }

    /// Feed one call into the counters
    pub fn update(&mut self, call: &SampleCall<'_>) {
        bump(&mut self.genotype_count, call.genotype.as_str());
        if call.mendelian_error {
            self.mendelian_error_count += 1;
        }
        if call.de_novo {
            self.de_novo_count += 1;
        }
        if !call.genotype.is_variant() {
            return;
        }

        self.num_variants += 1;
        bump(&mut self.chromosome_count, &call.locus.chromosome);

        let variant_type = call.locus.variant_type();
        bump(&mut self.type_count, variant_type.as_str());
        match variant_type {
            VariantType::Snv if call.locus.is_transition() => self.transitions += 1,
            VariantType::Snv => self.transversions += 1,
            VariantType::Indel => bump(&mut self.indel_length_count, indel_bucket(call.locus.indel_length())),
            _ => {}
        }

        if call.filter == Some("PASS") {
            self.num_pass += 1;
        }
        if let Some(qual) = call.qual.filter(|q| q.is_finite()) {
            self.qual_count += 1;
            self.qual_sum += qual;
            self.qual_sum_sq += qual * qual;
        }

        if let Some(annotation) = call.annotation {
            let mut terms = BTreeSet::new();
            let mut biotypes = BTreeSet::new();
            for ct in &annotation.consequence_types {
                terms.extend(ct.sequence_ontology_terms.iter().map(String::as_str));
                if let Some(biotype) = ct.biotype.as_deref() {
                    biotypes.insert(biotype);
                }
            }
            for term in terms {
                bump(&mut self.consequence_type_count, term);
            }
            for biotype in biotypes {
                bump(&mut self.biotype_count, biotype);
            }
        }
    }

    /// Add another partial of the same sample into this one
    pub fn merge(&mut self, other: &PartialSampleStats) -> Result<(), StatsError> {
        if other.sample_id != self.sample_id {
            return Err(StatsError::SampleMismatch {
                expected: self.sample_id,
                found: other.sample_id,
            });
        }
        self.num_variants += other.num_variants;
        self.num_pass += other.num_pass;
        self.transitions += other.transitions;
        self.transversions += other.transversions;
        merge_histogram(&mut self.genotype_count, &other.genotype_count);
        merge_histogram(&mut self.chromosome_count, &other.chromosome_count);
        merge_histogram(&mut self.type_count, &other.type_count);
        merge_histogram(&mut self.indel_length_count, &other.indel_length_count);
        merge_histogram(&mut self.consequence_type_count, &other.consequence_type_count);
        merge_histogram(&mut self.biotype_count, &other.biotype_count);
        self.qual_count += other.qual_count;
        self.qual_sum += other.qual_sum;
        self.qual_sum_sq += other.qual_sum_sq;
        self.mendelian_error_count += other.mendelian_error_count;
        self.de_novo_count += other.de_novo_count;
        Ok(())
    }

    fn to_finalized(&self) -> SampleVariantStats {
        let ti_tv_ratio = if self.transversions == 0 {
            0.0
        } else {
            self.transitions as f64 / self.transversions as f64
        };

        let (mean_quality, std_dev_quality) = if self.qual_count == 0 {
            (0.0, 0.0)
        } else {
            let n = self.qual_count as f64;
            let mean = self.qual_sum / n;
            let variance = (self.qual_sum_sq / n - mean * mean).max(0.0);
            (mean, variance.sqrt())
        };

        let count = |code: GenotypeCode| self.genotype_count.get(code.as_str()).copied().unwrap_or(0);
        let called = count(GenotypeCode::HomRef) + count(GenotypeCode::Het) + count(GenotypeCode::HomAlt);
        let heterozygosity_rate = if called == 0 {
            0.0
        } else {
            count(GenotypeCode::Het) as f64 / called as f64
        };

        let mut indel_length_count = self.indel_length_count.clone();
        for bucket in INDEL_LENGTH_BUCKETS {
            indel_length_count.entry(bucket.to_string()).or_insert(0);
        }

        SampleVariantStats {
            id: self.sample_name.clone(),
            num_variants: self.num_variants,
            chromosome_count: self.chromosome_count.clone(),
            type_count: self.type_count.clone(),
            genotype_count: self.genotype_count.clone(),
            indel_length_count,
            num_pass: self.num_pass,
            transitions: self.transitions,
            transversions: self.transversions,
            ti_tv_ratio,
            mean_quality,
            std_dev_quality,
            // A partitioned pass cannot observe positions absent from every row
            missing_positions: None,
            heterozygosity_rate,
            mendelian_error_count: self.mendelian_error_count,
            de_novo_count: self.de_novo_count,
            consequence_type_count: self.consequence_type_count.clone(),
            biotype_count: self.biotype_count.clone(),
        }
    }
}

/// Finalized per-sample statistics, as persisted in sample metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SampleVariantStats {
    /// Sample name
    pub id: String,
    pub num_variants: u64,
    pub chromosome_count: BTreeMap<String, u64>,
    pub type_count: BTreeMap<String, u64>,
    pub genotype_count: BTreeMap<String, u64>,
    pub indel_length_count: BTreeMap<String, u64>,
    pub num_pass: u64,
    pub transitions: u64,
    pub transversions: u64,
    pub ti_tv_ratio: f64,
    pub mean_quality: f64,
    pub std_dev_quality: f64,

    /// `None` means unknown
    pub missing_positions: Option<u64>,

    pub heterozygosity_rate: f64,
    pub mendelian_error_count: u64,
    pub de_novo_count: u64,
    pub consequence_type_count: BTreeMap<String, u64>,
    pub biotype_count: BTreeMap<String, u64>,
}

impl SampleVariantStats {
    pub fn empty(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Overwrite computed fields of `existing`, keeping `missing_positions`
    pub fn merge_into(self, existing: &mut SampleVariantStats) {
        let missing_positions = existing.missing_positions;
        *existing = SampleVariantStats {
            missing_positions,
            ..self
        };
    }
}

/// Per-sample accumulator state: mergeable until finalized exactly once
#[derive(Debug, Clone, PartialEq)]
pub enum SampleStatsAccumulator {
    Partial(PartialSampleStats),
    Finalized(SampleVariantStats),
}

impl SampleStatsAccumulator {
    pub fn new(sample_id: SampleId, sample_name: impl Into<String>) -> Self {
        SampleStatsAccumulator::Partial(PartialSampleStats::new(sample_id, sample_name))
    }

    fn partial_mut(&mut self) -> Result<&mut PartialSampleStats, StatsError> {
        match self {
            SampleStatsAccumulator::Partial(p) => Ok(p),
            SampleStatsAccumulator::Finalized(stats) => Err(StatsError::AlreadyFinalized(stats.id.clone())),
        }
    }

    pub fn update(&mut self, call: &SampleCall<'_>) -> Result<(), StatsError> {
        self.partial_mut()?.update(call);
        Ok(())
    }

    pub fn merge(&mut self, other: &PartialSampleStats) -> Result<(), StatsError> {
        self.partial_mut()?.merge(other)
    }

    /// Derive the final statistics; a second call fails
    pub fn finalize(&mut self) -> Result<SampleVariantStats, StatsError> {
        let stats = self.partial_mut()?.to_finalized();
        *self = SampleStatsAccumulator::Finalized(stats.clone());
        Ok(stats)
    }

    pub fn is_finalized(&self) -> bool {
        matches!(self, SampleStatsAccumulator::Finalized(_))
    }
}
