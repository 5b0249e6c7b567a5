// ==============================================================================
// loader.rs - VCF Loader
// ==============================================================================
// Description: Loads a VCF into the variant store: multi-allelic split,
//              duplicate resolution, row merge/encode and index update
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// References:
// - VCF 4.3 Spec: https://samtools.github.io/hts-specs/VCFv4.3.pdf
// - noodles-vcf: https://docs.rs/noodles-vcf/0.81.0/noodles_vcf/
// ==============================================================================

use crate::config::DedupConfig;
use crate::dedup::{
    audit_path_for, policy_from_name, CallRecord, DuplicateResolver, DuplicateSummary, OriginalCall,
    ResolverError,
};
use crate::genotype::GenotypeCode;
use crate::index::sample_index::{file_bits_by_sample, IndexError, SampleIndex};
use crate::metadata::{MetadataError, MetadataManager};
use crate::models::{FileId, Locus, SampleId, StudyId, VariantAnnotation};
use crate::row_codec::{CodecError, RowCodec, StudyGenotypeRow};
use crate::stats::Pedigree;
use crate::storage::{FileCell, StorageError, StoredRow, VariantStore};
use noodles_vcf as vcf;
use noodles_vcf::variant::record::AlternateBases;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to open VCF file {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read VCF header: {0}")]
    Header(#[source] std::io::Error),

    #[error("Line {line}: {message}")]
    Record { line: usize, message: String },

    #[error("Line {line}: {locus} is out of order; input must be sorted by chromosome and position")]
    Unsorted { line: usize, locus: String },

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Resolver(#[from] ResolverError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Failed to serialize annotation: {0}")]
    Annotation(#[from] serde_json::Error),
}

/// Outcome of one file load
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub study_id: StudyId,
    pub file_id: FileId,
    pub file: String,
    pub samples: usize,
    pub records_read: u64,
    pub variants_loaded: u64,
    pub duplicates: Option<DuplicateSummary>,
    pub audit_file: Option<PathBuf>,
}

pub struct VcfLoader {
    store: Arc<dyn VariantStore>,
    metadata: Arc<dyn MetadataManager>,
    index: Arc<SampleIndex>,
    codec: RowCodec,
    dedup: DedupConfig,
}

/// Per-load state shared by every written call
struct LoadContext {
    study_id: StudyId,
    file_id: FileId,
    samples: Vec<SampleId>,
    pedigree: Pedigree,
    file_samples: HashMap<FileId, Vec<SampleId>>,
}

impl VcfLoader {
    pub fn new(
        store: Arc<dyn VariantStore>,
        metadata: Arc<dyn MetadataManager>,
        index: Arc<SampleIndex>,
        codec: RowCodec,
        dedup: DedupConfig,
    ) -> Self {
        Self {
            store,
            metadata,
            index,
            codec,
            dedup,
        }
    }

    /// Load a VCF (plain or bgzipped) into `study`
    pub fn load(&self, study: &str, path: impl AsRef<Path>) -> Result<LoadReport, LoadError> {
        let path = path.as_ref();
        let file_name = path.display().to_string();

        // 1. Open and read header
        let mut reader = vcf::io::reader::Builder::default()
            .build_from_path(path)
            .map_err(|source| LoadError::Open {
                path: file_name.clone(),
                source,
            })?;
        let header = reader.read_header().map_err(LoadError::Header)?;

        // 2. Register study, samples and file
        let study_id = self.metadata.register_study(study)?;
        let mut samples = Vec::with_capacity(header.sample_names().len());
        for name in header.sample_names() {
            samples.push(self.metadata.register_sample(study_id, name)?);
        }
        let file_id = self.metadata.register_file(study_id, &file_name, &samples)?;
        info!(
            "Loading {} into study {} (file {}, {} samples)",
            file_name,
            study,
            file_id,
            samples.len()
        );

        let pedigree = Pedigree::from_metadata(&self.metadata.samples(study_id)?);
        let mut ctx = LoadContext {
            study_id,
            file_id,
            samples,
            pedigree,
            file_samples: HashMap::new(),
        };

        let resolver = DuplicateResolver::new(
            file_name.clone(),
            audit_path_for(&self.dedup.audit_dir, &file_name),
            policy_from_name(&self.dedup.policy)?,
        );

        // 3. Stream records, buffering one position at a time
        let mut report = LoadReport {
            study_id,
            file_id,
            file: file_name.clone(),
            samples: ctx.samples.len(),
            ..Default::default()
        };
        let mut pending: Vec<CallRecord> = Vec::new();
        let mut finished_chromosomes: HashSet<String> = HashSet::new();
        for (line, result) in reader.records().enumerate() {
            let record = result.map_err(|e| LoadError::Record {
                line: line + 1,
                message: e.to_string(),
            })?;
            let calls = split_record(&record, ctx.samples.len()).map_err(|message| LoadError::Record {
                line: line + 1,
                message,
            })?;
            report.records_read += 1;

            // Duplicates are only grouped when adjacent, so a locus must
            // never come back once its position has been flushed
            if let (Some(a), Some(b)) = (pending.first(), calls.first()) {
                let out_of_order = if a.locus.chromosome == b.locus.chromosome {
                    b.locus.position < a.locus.position
                } else {
                    finished_chromosomes.contains(&b.locus.chromosome)
                };
                if out_of_order {
                    return Err(LoadError::Unsorted {
                        line: line + 1,
                        locus: b.locus.to_string(),
                    });
                }
                if a.locus.chromosome != b.locus.chromosome {
                    finished_chromosomes.insert(a.locus.chromosome.clone());
                }
            }

            let same_position = match (pending.first(), calls.first()) {
                (Some(a), Some(b)) => a.locus.chromosome == b.locus.chromosome && a.locus.position == b.locus.position,
                _ => true,
            };
            if !same_position {
                report.variants_loaded += self.flush_position(&mut ctx, &resolver, std::mem::take(&mut pending))?;
            }
            pending.extend(calls);
        }
        report.variants_loaded += self.flush_position(&mut ctx, &resolver, pending)?;

        // 4. Close the resolver and mark samples indexed
        report.duplicates = resolver.close()?;
        if report.duplicates.is_some() {
            report.audit_file = Some(resolver.audit_path().to_path_buf());
        }
        for &sample in &ctx.samples {
            self.metadata
                .update_sample_metadata(study_id, sample, &mut |s| s.indexed = true)?;
        }

        info!(
            "Loaded {} variants from {} records of {}",
            report.variants_loaded, report.records_read, file_name
        );
        Ok(report)
    }

    /// Resolve duplicates among the calls of one position and write survivors
    fn flush_position(
        &self,
        ctx: &mut LoadContext,
        resolver: &DuplicateResolver,
        calls: Vec<CallRecord>,
    ) -> Result<u64, LoadError> {
        let mut groups: BTreeMap<Locus, Vec<CallRecord>> = BTreeMap::new();
        for call in calls {
            groups.entry(call.locus.clone()).or_default().push(call);
        }

        let mut written = 0;
        for (_, mut group) in groups {
            let survivor = if group.len() == 1 {
                group.pop()
            } else {
                resolver.resolve(group)?
            };
            if let Some(call) = survivor {
                self.write_call(ctx, call)?;
                written += 1;
            }
        }
        Ok(written)
    }

    fn write_call(&self, ctx: &mut LoadContext, call: CallRecord) -> Result<(), LoadError> {
        let locus = call.locus.clone();

        // 1. Merge with what other files already stored
        let existing = self.store.get_row(&locus)?;
        let mut row = match &existing {
            Some(stored) => self.codec.decode_study(&locus, ctx.study_id, &stored.columns)?,
            None => StudyGenotypeRow::new(ctx.study_id),
        };
        for (&sample, &code) in ctx.samples.iter().zip(&call.genotypes) {
            if !row.add_sample(sample, code) {
                warn!("Sample {} already has a call at {}; keeping the first", sample, locus);
            }
        }

        // 2. Encode and write
        let mut stored = StoredRow::new(locus.clone());
        stored.columns = self.codec.encode(&locus, &row)?;
        stored.files.push(FileCell {
            study_id: ctx.study_id,
            file_id: ctx.file_id,
            qual: call.quality,
            filter: call.filter,
            overlapping: call.original_call.is_some(),
        });
        let mut merged = existing.unwrap_or_else(|| StoredRow::new(locus.clone()));
        merged.merge(stored.clone());
        self.store.put_row(stored)?;

        // 3. Index
        for cell in merged.file_cells(ctx.study_id) {
            if !ctx.file_samples.contains_key(&cell.file_id) {
                let ids = self.metadata.file_samples(ctx.study_id, cell.file_id)?;
                ctx.file_samples.insert(cell.file_id, ids);
            }
        }
        let bits = file_bits_by_sample(&merged, ctx.study_id, &ctx.file_samples);
        self.index.update(ctx.study_id, &locus, &row, &bits, &ctx.pedigree)?;
        debug!("Wrote {} ({} listed samples)", locus, row.listed_count());
        Ok(())
    }

    /// Attach an annotation to a stored variant
    pub fn annotate(&self, locus: &Locus, annotation: &VariantAnnotation) -> Result<(), LoadError> {
        let blob = serde_json::to_vec(annotation)?;
        self.store.set_annotation(locus, &blob)?;
        self.index.update_annotation(locus, annotation)?;
        Ok(())
    }
}

/// Genotype of a sample relative to one alternate allele (1-based)
fn genotype_for_allele(gt: &str, allele: usize) -> GenotypeCode {
    let alleles: Vec<&str> = gt.split(|c| c == '/' || c == '|').collect();
    let mut alt_count = 0;
    let mut other = false;
    for a in &alleles {
        match a.parse::<usize>() {
            Err(_) => return GenotypeCode::Missing,
            Ok(0) => {}
            Ok(n) if n == allele => alt_count += 1,
            Ok(_) => other = true,
        }
    }
    if other || alleles.len() > 2 {
        return GenotypeCode::Other;
    }
    // Haploid calls count as homozygous
    match (alleles.len(), alt_count) {
        (_, 0) => GenotypeCode::HomRef,
        (1, _) | (2, 2) => GenotypeCode::HomAlt,
        _ => GenotypeCode::Het,
    }
}

/// Per-sample GT strings from the raw FORMAT + sample columns
fn sample_genotypes(samples: &str, sample_count: usize) -> Vec<String> {
    let mut columns = samples.split('\t');
    let gt_index = columns
        .next()
        .and_then(|format| format.split(':').position(|k| k == "GT"));
    let mut genotypes: Vec<String> = columns
        .map(|column| {
            gt_index
                .and_then(|i| column.split(':').nth(i))
                .unwrap_or(".")
                .to_string()
        })
        .collect();
    genotypes.resize(sample_count, ".".to_string());
    genotypes
}

/// Split a record into one call per alternate allele
fn split_record(record: &vcf::Record, sample_count: usize) -> Result<Vec<CallRecord>, String> {
    let chromosome = record.reference_sequence_name().to_string();
    let position = match record.variant_start() {
        Some(Ok(pos)) => pos.get() as u64,
        Some(Err(e)) => return Err(format!("Failed to get position: {}", e)),
        None => return Err("Missing position".to_string()),
    };
    let reference = record.reference_bases().to_string();

    let mut alternates = Vec::new();
    for alt in record.alternate_bases().iter() {
        alternates.push(alt.map_err(|e| format!("Failed to get ALT allele: {}", e))?.to_string());
    }
    if alternates.is_empty() {
        alternates.push(".".to_string());
    }

    let quality = record
        .quality_score()
        .transpose()
        .map_err(|e| format!("Invalid QUAL: {}", e))?
        .map(f64::from);
    let filter = match record.filters().as_ref() {
        "" | "." => None,
        f => Some(f.to_string()),
    };
    let genotypes = sample_genotypes(record.samples().as_ref(), sample_count);

    let multi_allelic = alternates.len() > 1;
    let original_id = format!("{}:{}:{}:{}", chromosome, position, reference, alternates.join(","));
    Ok(alternates
        .iter()
        .enumerate()
        .map(|(i, alt)| CallRecord {
            locus: Locus::new(chromosome.clone(), position, reference.clone(), alt.clone()),
            quality,
            filter: filter.clone(),
            original_call: multi_allelic.then(|| OriginalCall {
                variant_id: original_id.clone(),
                allele_index: i as u32 + 1,
            }),
            genotypes: genotypes.iter().map(|gt| genotype_for_allele(gt, i + 1)).collect(),
        })
        .collect())
}
