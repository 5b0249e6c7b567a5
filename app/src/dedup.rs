// ==============================================================================
// dedup.rs - Duplicate Variant Resolver
// ==============================================================================
// Description: Detects, counts and audits colliding calls at one locus of a
//              source file; the surviving call is chosen by a pluggable policy
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Audit file (tab-separated, appended, flushed per line):
//   #VARIANT  QUAL  FILTER  ORIGINAL_CALL  STATUS
//   STATUS is LOADED or DISCARDED
// ==============================================================================

use crate::genotype::GenotypeCode;
use crate::models::{Locus, VariantType};
use csv::{QuoteStyle, WriterBuilder};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Unexpected group of {0} duplicated variants (need at least 2)")]
    IllegalGroup(usize),

    #[error("Policy selected candidate {index} from a group of {size}")]
    IllegalSelection { index: usize, size: usize },

    #[error("Unknown duplicate resolution policy '{0}' (expected maxQual or discard)")]
    UnknownPolicy(String),

    #[error("Audit file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Audit file write error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Audit stream lock poisoned")]
    LockPoisoned,
}

/// Pre-normalization call a record was derived from
#[derive(Debug, Clone, PartialEq)]
pub struct OriginalCall {
    /// `chrom:pos:ref:alt` of the input record
    pub variant_id: String,
    pub allele_index: u32,
}

impl OriginalCall {
    fn is_no_variation(&self) -> bool {
        self.variant_id
            .parse::<Locus>()
            .map(|l| l.variant_type() == VariantType::NoVariation)
            .unwrap_or(false)
    }
}

/// One normalized call from a source file
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub locus: Locus,
    pub quality: Option<f64>,
    pub filter: Option<String>,
    pub original_call: Option<OriginalCall>,

    /// Per-sample genotypes in file column order
    pub genotypes: Vec<GenotypeCode>,
}

impl CallRecord {
    pub fn is_pass(&self) -> bool {
        self.filter.as_deref() == Some("PASS")
    }
}

/// Calls colliding at one locus of one file
pub type DuplicateGroup = Vec<CallRecord>;

/// Chooses the surviving call of a duplicate group
pub trait ResolutionPolicy: Send + Sync {
    /// Index of the survivor, or `None` to discard the whole group
    fn select(&self, candidates: &[CallRecord]) -> Option<usize>;
}

impl<F> ResolutionPolicy for F
where
    F: Fn(&[CallRecord]) -> Option<usize> + Send + Sync,
{
    fn select(&self, candidates: &[CallRecord]) -> Option<usize> {
        self(candidates)
    }
}

/// Highest QUAL wins; PASS breaks ties, then input order
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxQualityPolicy;

impl ResolutionPolicy for MaxQualityPolicy {
    fn select(&self, candidates: &[CallRecord]) -> Option<usize> {
        let key = |c: &CallRecord| (c.quality.unwrap_or(f64::NEG_INFINITY), c.is_pass());
        let mut best: Option<usize> = None;
        for (i, candidate) in candidates.iter().enumerate() {
            let better = match best {
                None => true,
                Some(b) => {
                    let (q, pass) = key(candidate);
                    let (bq, bpass) = key(&candidates[b]);
                    q > bq || (q == bq && pass && !bpass)
                }
            };
            if better {
                best = Some(i);
            }
        }
        best
    }
}

/// Discards every call of a conflicting group
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardAllPolicy;

impl ResolutionPolicy for DiscardAllPolicy {
    fn select(&self, _candidates: &[CallRecord]) -> Option<usize> {
        None
    }
}

/// Built-in policy by configuration name
pub fn policy_from_name(name: &str) -> Result<Box<dyn ResolutionPolicy>, ResolverError> {
    match name {
        "maxQual" => Ok(Box::new(MaxQualityPolicy)),
        "discard" => Ok(Box::new(DiscardAllPolicy)),
        other => Err(ResolverError::UnknownPolicy(other.to_string())),
    }
}

/// Audit file path for a source file inside `dir`
pub fn audit_path_for(dir: &Path, source_file: &str) -> PathBuf {
    let name = Path::new(source_file)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| source_file.to_string());
    dir.join(format!("{}.duplicated.tsv", name))
}

#[derive(Debug, Serialize)]
struct AuditLine<'a> {
    variant: &'a str,
    qual: &'a str,
    filter: &'a str,
    original_call: &'a str,
    status: &'a str,
}

/// Counters reported when the resolver closes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DuplicateSummary {
    pub duplicated_loci: u64,
    pub duplicated_variants: u64,
    pub discarded_variants: u64,
}

/// Resolver shared by the ingestion workers of one source file
pub struct DuplicateResolver {
    source_file: String,
    audit_path: PathBuf,
    policy: Box<dyn ResolutionPolicy>,
    audit: Mutex<Option<csv::Writer<File>>>,
    duplicated_loci: AtomicU64,
    duplicated_variants: AtomicU64,
    discarded_variants: AtomicU64,
}

impl DuplicateResolver {
    pub fn new(source_file: impl Into<String>, audit_path: impl Into<PathBuf>, policy: Box<dyn ResolutionPolicy>) -> Self {
        Self {
            source_file: source_file.into(),
            audit_path: audit_path.into(),
            policy,
            audit: Mutex::new(None),
            duplicated_loci: AtomicU64::new(0),
            duplicated_variants: AtomicU64::new(0),
            discarded_variants: AtomicU64::new(0),
        }
    }

    pub fn audit_path(&self) -> &Path {
        &self.audit_path
    }

    pub fn summary(&self) -> DuplicateSummary {
        DuplicateSummary {
            duplicated_loci: self.duplicated_loci.load(Ordering::SeqCst),
            duplicated_variants: self.duplicated_variants.load(Ordering::SeqCst),
            discarded_variants: self.discarded_variants.load(Ordering::SeqCst),
        }
    }

    /// Resolve a duplicate group to at most one surviving call
    pub fn resolve(&self, group: DuplicateGroup) -> Result<Option<CallRecord>, ResolverError> {
        if group.len() <= 1 {
            return Err(ResolverError::IllegalGroup(group.len()));
        }

        // Reference blocks introduced by normalization are not real conflicts
        let mut group = filter_new_ref_blocks(group);
        if group.len() <= 1 {
            return Ok(group.pop());
        }

        let selected = self.policy.select(&group);
        if let Some(index) = selected {
            if index >= group.len() {
                return Err(ResolverError::IllegalSelection {
                    index,
                    size: group.len(),
                });
            }
        }

        // Counted only once the selection is known to be valid
        let size = group.len() as u64;
        self.duplicated_loci.fetch_add(1, Ordering::SeqCst);
        self.duplicated_variants.fetch_add(size, Ordering::SeqCst);
        warn!(
            "Found {} duplicated variants for file {} in variant {}",
            size, self.source_file, group[0].locus
        );

        let discarded = if selected.is_some() { size - 1 } else { size };
        self.discarded_variants.fetch_add(discarded, Ordering::SeqCst);

        self.write_audit(&group, selected)?;
        Ok(selected.map(|index| group.swap_remove(index)))
    }

    fn write_audit(&self, group: &[CallRecord], selected: Option<usize>) -> Result<(), ResolverError> {
        let mut audit = self.audit.lock().map_err(|_| ResolverError::LockPoisoned)?;
        if audit.is_none() {
            *audit = Some(self.open_audit()?);
        }
        let Some(writer) = audit.as_mut() else {
            return Err(ResolverError::LockPoisoned);
        };

        for (i, record) in group.iter().enumerate() {
            let variant = record.locus.to_string();
            let qual = record.quality.map_or_else(|| ".".to_string(), |q| q.to_string());
            let original = record
                .original_call
                .as_ref()
                .map_or_else(|| variant.clone(), |c| c.variant_id.clone());
            writer.serialize(AuditLine {
                variant: &variant,
                qual: &qual,
                filter: record.filter.as_deref().unwrap_or("."),
                original_call: &original,
                status: if Some(i) == selected { "LOADED" } else { "DISCARDED" },
            })?;
            writer.flush()?;
        }
        Ok(())
    }

    fn open_audit(&self) -> Result<csv::Writer<File>, ResolverError> {
        if let Some(parent) = self.audit_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.audit_path)?;
        let is_new = file.metadata()?.len() == 0;
        let mut writer = WriterBuilder::new()
            .delimiter(b'\t')
            .quote_style(QuoteStyle::Never)
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer.write_record(["#VARIANT", "QUAL", "FILTER", "ORIGINAL_CALL", "STATUS"])?;
            writer.flush()?;
        }
        info!("Opened duplicated variants audit file {:?}", self.audit_path);
        Ok(writer)
    }

    /// Flush the audit stream and report counters; later calls are no-ops
    pub fn close(&self) -> Result<Option<DuplicateSummary>, ResolverError> {
        let mut audit = self.audit.lock().map_err(|_| ResolverError::LockPoisoned)?;
        let Some(mut writer) = audit.take() else {
            return Ok(None);
        };
        writer.flush()?;
        let summary = self.summary();
        warn!(
            "Found {} duplicated variants in {} different locations. {} variants were discarded.",
            summary.duplicated_variants, summary.duplicated_loci, summary.discarded_variants
        );
        info!("Check full list of duplicated variants in file {:?}", self.audit_path);
        Ok(Some(summary))
    }
}

impl Drop for DuplicateResolver {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close duplicated variants audit file: {}", e);
        }
    }
}

/// Keep only calls that really are reference blocks in the input
fn filter_new_ref_blocks(group: DuplicateGroup) -> DuplicateGroup {
    if group[0].locus.variant_type() != VariantType::NoVariation {
        return group;
    }
    group
        .into_iter()
        .filter(|r| r.original_call.as_ref().map_or(true, OriginalCall::is_no_variation))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn record(qual: Option<f64>, filter: &str) -> CallRecord {
        CallRecord {
            locus: Locus::new("chr1", 100, "A", "T"),
            quality: qual,
            filter: Some(filter.to_string()),
            original_call: None,
            genotypes: vec![GenotypeCode::Het],
        }
    }

    fn ref_block(original: &str) -> CallRecord {
        CallRecord {
            locus: Locus::new("chr1", 100, "A", "."),
            quality: None,
            filter: None,
            original_call: Some(OriginalCall {
                variant_id: original.to_string(),
                allele_index: 0,
            }),
            genotypes: vec![GenotypeCode::HomRef],
        }
    }

    fn audit_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_conflict_with_survivor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dups.tsv");
        let resolver = DuplicateResolver::new("in.vcf", &path, Box::new(MaxQualityPolicy));

        let group = vec![
            record(Some(30.0), "PASS"),
            record(Some(45.0), "PASS"),
            record(Some(20.0), "LowQual"),
        ];
        let survivor = resolver.resolve(group).unwrap().unwrap();
        assert_eq!(survivor.quality, Some(45.0));

        let summary = resolver.summary();
        assert_eq!(summary.duplicated_loci, 1);
        assert_eq!(summary.duplicated_variants, 3);
        assert_eq!(summary.discarded_variants, 2);

        let lines = audit_lines(&path);
        assert_eq!(lines[0], "#VARIANT\tQUAL\tFILTER\tORIGINAL_CALL\tSTATUS");
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[1], "chr1:100:A:T\t30\tPASS\tchr1:100:A:T\tDISCARDED");
        assert_eq!(lines[2], "chr1:100:A:T\t45\tPASS\tchr1:100:A:T\tLOADED");
        assert!(lines[3].ends_with("DISCARDED"));
    }

    #[test]
    fn test_conflict_without_survivor() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dups.tsv");
        let resolver = DuplicateResolver::new("in.vcf", &path, Box::new(DiscardAllPolicy));

        let group = vec![record(Some(30.0), "PASS"), record(Some(45.0), "PASS"), record(Some(20.0), "PASS")];
        assert!(resolver.resolve(group).unwrap().is_none());
        assert_eq!(resolver.summary().discarded_variants, 3);
        assert_eq!(audit_lines(&path).len(), 4);
    }

    #[test]
    fn test_new_ref_blocks_dropped_silently() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dups.tsv");
        let resolver = DuplicateResolver::new("in.vcf", &path, Box::new(MaxQualityPolicy));

        // Both blocks were produced from real variants by normalization
        let group = vec![ref_block("chr1:99:CA:C"), ref_block("chr1:98:G:GA")];
        assert!(resolver.resolve(group).unwrap().is_none());
        assert_eq!(resolver.summary(), DuplicateSummary::default());
        assert!(!path.exists());
        assert_eq!(resolver.close().unwrap(), None);
    }

    #[test]
    fn test_real_ref_block_survives_prefilter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dups.tsv");
        let resolver = DuplicateResolver::new("in.vcf", &path, Box::new(MaxQualityPolicy));

        let group = vec![ref_block("chr1:100:A:."), ref_block("chr1:99:CA:C")];
        let kept = resolver.resolve(group).unwrap().unwrap();
        assert_eq!(kept.original_call.unwrap().variant_id, "chr1:100:A:.");
        assert_eq!(resolver.summary().duplicated_loci, 0);
    }

    #[test]
    fn test_illegal_group_and_selection() {
        let dir = tempdir().unwrap();
        let resolver = DuplicateResolver::new("in.vcf", dir.path().join("d.tsv"), Box::new(MaxQualityPolicy));
        assert!(matches!(
            resolver.resolve(vec![record(None, "PASS")]),
            Err(ResolverError::IllegalGroup(1))
        ));
        assert!(matches!(resolver.resolve(vec![]), Err(ResolverError::IllegalGroup(0))));

        let bad_policy = |_: &[CallRecord]| Some(7);
        let resolver = DuplicateResolver::new("in.vcf", dir.path().join("e.tsv"), Box::new(bad_policy));
        assert!(matches!(
            resolver.resolve(vec![record(None, "PASS"), record(None, "PASS")]),
            Err(ResolverError::IllegalSelection { index: 7, size: 2 })
        ));

        // A rejected group leaves no trace in counters or audit
        assert_eq!(resolver.summary(), DuplicateSummary::default());
        assert!(!dir.path().join("e.tsv").exists());
        assert_eq!(resolver.close().unwrap(), None);
    }

    #[test]
    fn test_closure_policy_and_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dups.tsv");
        let last = |c: &[CallRecord]| Some(c.len() - 1);
        let resolver = DuplicateResolver::new("in.vcf", &path, Box::new(last));
        let survivor = resolver
            .resolve(vec![record(Some(1.0), "PASS"), record(Some(2.0), "q10")])
            .unwrap()
            .unwrap();
        assert_eq!(survivor.filter.as_deref(), Some("q10"));

        let summary = resolver.close().unwrap().unwrap();
        assert_eq!(summary.duplicated_loci, 1);
        // Second close is a no-op
        assert_eq!(resolver.close().unwrap(), None);
    }

    #[test]
    fn test_audit_file_is_appended() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dups.tsv");
        for _ in 0..2 {
            let resolver = DuplicateResolver::new("in.vcf", &path, Box::new(MaxQualityPolicy));
            resolver
                .resolve(vec![record(Some(1.0), "PASS"), record(Some(2.0), "PASS")])
                .unwrap();
            resolver.close().unwrap();
        }
        let lines = audit_lines(&path);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines.iter().filter(|l| l.starts_with('#')).count(), 1);
    }

    #[test]
    fn test_max_quality_prefers_pass_on_ties() {
        let group = vec![record(Some(10.0), "LowQual"), record(Some(10.0), "PASS"), record(None, "PASS")];
        assert_eq!(MaxQualityPolicy.select(&group), Some(1));
    }

    #[test]
    fn test_policy_factory() {
        assert!(policy_from_name("maxQual").is_ok());
        assert!(policy_from_name("discard").is_ok());
        assert!(matches!(policy_from_name("random"), Err(ResolverError::UnknownPolicy(_))));
        assert_eq!(
            audit_path_for(Path::new("/tmp"), "/data/in.vcf.gz"),
            PathBuf::from("/tmp/in.vcf.gz.duplicated.tsv")
        );
    }
}
