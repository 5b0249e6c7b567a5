// ==============================================================================
// stats/job.rs - Sample Stats Job Driver
// ==============================================================================
// Description: Plans and runs the per-sample stats aggregation over row
//              partitions (map), merges partials per sample (reduce), then
//              finalizes and persists into sample metadata
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Stages:
//   Map      - one task per partition, owning its own per-sample partials
//   Reduce   - per sample, partials merged in any order
//   Finalize - exactly once per sample
//   Persist  - merged field-by-field into the sample's stored stats
// ==============================================================================

use super::accumulator::{PartialSampleStats, SampleCall, SampleStatsAccumulator, SampleVariantStats};
use super::pedigree::Pedigree;
use super::sink::{JsonLinesStatsSink, StatsSink};
use super::StatsError;
use crate::config::StatsConfig;
use crate::genotype::{is_de_novo, is_mendelian_error, GenotypeCode};
use crate::metadata::{MetadataManager, SampleMetadata};
use crate::models::{FileId, SampleId, StudyId, VariantAnnotation};
use crate::row_codec::RowCodec;
use crate::storage::{Partition, VariantStore};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which samples a job computes stats for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleSelection {
    /// Every indexed sample of the study
    All,
    /// Indexed samples whose stats are absent or were never populated
    Auto,
    Named(Vec<String>),
}

impl SampleSelection {
    /// `all`, `auto`, or a comma-separated list of sample names
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "all" => SampleSelection::All,
            "auto" => SampleSelection::Auto,
            names => SampleSelection::Named(
                names
                    .split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(String::from)
                    .collect(),
            ),
        }
    }
}

/// Resolved inputs of one job run
#[derive(Debug, Clone)]
pub struct StatsJobPlan {
    pub study_id: StudyId,
    pub study_name: String,

    /// Samples receiving stats
    pub targets: Vec<SampleMetadata>,

    /// Targets plus their parents: every sample whose genotype a map task reads
    pub job_samples: Vec<SampleId>,

    /// Serialized pedigree handed to each map task
    pub pedigree_channel: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsProgress {
    pub tasks_done: usize,
    pub tasks_total: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsJobReport {
    pub study: String,
    pub partitions: usize,
    pub rows_processed: u64,
    pub unknown_genotypes: u64,
    pub task_retries: u64,
    pub samples: Vec<String>,
    pub side_output: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct MapOutput {
    partials: BTreeMap<SampleId, PartialSampleStats>,
    rows: u64,
    unknown_genotypes: u64,
}

type ProgressFn = dyn Fn(StatsProgress) + Send + Sync;

/// Distributed per-sample stats job
pub struct SampleStatsJob {
    store: Arc<dyn VariantStore>,
    metadata: Arc<dyn MetadataManager>,
    codec: RowCodec,
    config: StatsConfig,
    sink: Option<Arc<dyn StatsSink>>,
    cancel: Arc<AtomicBool>,
    progress: Option<Arc<ProgressFn>>,
}

impl SampleStatsJob {
    pub fn new(store: Arc<dyn VariantStore>, metadata: Arc<dyn MetadataManager>, config: StatsConfig) -> Self {
        Self {
            store,
            metadata,
            codec: RowCodec::new(),
            config,
            sink: None,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: None,
        }
    }

    pub fn with_codec(mut self, codec: RowCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Send finalized stats to `sink` instead of the configured JSON file
    pub fn with_sink(mut self, sink: Arc<dyn StatsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn with_progress<F>(mut self, progress: F) -> Self
    where
        F: Fn(StatsProgress) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Share an externally owned cancel flag
    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Flag checked before every task and before persisting
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Resolve study, samples and pedigree for a run
    pub fn plan(&self, study: &str, selection: &SampleSelection) -> Result<StatsJobPlan, StatsError> {
        let study_meta = self
            .metadata
            .study_by_name(study)?
            .ok_or_else(|| StatsError::UnknownStudy(study.to_string()))?;

        let targets: Vec<SampleMetadata> = match selection {
            SampleSelection::All => self.metadata.indexed_samples(study_meta.id)?,
            SampleSelection::Auto => self
                .metadata
                .indexed_samples(study_meta.id)?
                .into_iter()
                .filter(|s| s.stats.as_ref().map_or(true, |stats| stats.type_count.is_empty()))
                .collect(),
            SampleSelection::Named(names) => {
                let mut samples = Vec::with_capacity(names.len());
                for name in names {
                    let id = self
                        .metadata
                        .resolve_sample_id(study_meta.id, name)?
                        .ok_or_else(|| StatsError::UnknownSample(name.clone()))?;
                    let sample = self
                        .metadata
                        .sample_metadata(study_meta.id, id)?
                        .ok_or_else(|| StatsError::UnknownSample(name.clone()))?;
                    samples.push(sample);
                }
                samples
            }
        };
        if targets.is_empty() {
            return Err(StatsError::NothingToDo);
        }

        let pedigree = Pedigree::from_metadata(&targets);
        let job_samples: BTreeSet<SampleId> = targets
            .iter()
            .map(|s| s.id)
            .chain(pedigree.parent_ids())
            .collect();

        info!(
            "Planned sample stats for {} samples in study '{}' ({} trios, {} job samples)",
            targets.len(),
            study_meta.name,
            pedigree.len(),
            job_samples.len()
        );

        Ok(StatsJobPlan {
            study_id: study_meta.id,
            study_name: study_meta.name,
            targets,
            job_samples: job_samples.into_iter().collect(),
            pedigree_channel: pedigree.to_side_channel(),
        })
    }

    /// Run map, reduce, finalize and persist for a plan
    pub fn run(&self, plan: &StatsJobPlan) -> Result<StatsJobReport, StatsError> {
        // 1. Split rows into partitions
        let partitions = self.store.partitions(self.config.partitions.max(1))?;
        let total = partitions.len();
        info!(
            "Running sample stats for study '{}' over {} partitions",
            plan.study_name, total
        );

        // 2. Map: one independent task per partition
        let done = AtomicUsize::new(0);
        let retries = AtomicU64::new(0);
        let outputs = partitions
            .par_iter()
            .map(|partition| -> Result<MapOutput, StatsError> {
                let output = self.run_task(plan, partition, &retries)?;
                let tasks_done = done.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some(progress) = &self.progress {
                    progress(StatsProgress {
                        tasks_done,
                        tasks_total: total,
                    });
                }
                Ok(output)
            })
            .collect::<Result<Vec<MapOutput>, StatsError>>()?;

        // 3. Reduce: group partials by sample, merge and finalize once
        let mut report = StatsJobReport {
            study: plan.study_name.clone(),
            partitions: total,
            task_retries: retries.load(Ordering::SeqCst),
            ..Default::default()
        };
        let mut grouped: HashMap<SampleId, Vec<PartialSampleStats>> = HashMap::new();
        for output in outputs {
            report.rows_processed += output.rows;
            report.unknown_genotypes += output.unknown_genotypes;
            for (sample_id, partial) in output.partials {
                grouped.entry(sample_id).or_default().push(partial);
            }
        }

        let finalized = plan
            .targets
            .par_iter()
            .map(|sample| -> Result<(SampleId, SampleVariantStats), StatsError> {
                let mut accumulator = SampleStatsAccumulator::new(sample.id, sample.name.clone());
                for partial in grouped.get(&sample.id).into_iter().flatten() {
                    accumulator.merge(partial)?;
                }
                Ok((sample.id, accumulator.finalize()?))
            })
            .collect::<Result<Vec<(SampleId, SampleVariantStats)>, StatsError>>()?;

        // 4. Persist, unless cancelled before anything was written
        if self.cancel.load(Ordering::SeqCst) {
            warn!("Sample stats job for '{}' cancelled before persisting", plan.study_name);
            return Err(StatsError::Cancelled);
        }

        let sink: Option<Arc<dyn StatsSink>> = match &self.sink {
            Some(sink) => Some(Arc::clone(sink)),
            None if self.config.write_side_output => {
                Some(Arc::new(JsonLinesStatsSink::create(&self.config.output_dir)?))
            }
            None => None,
        };

        for (sample_id, stats) in finalized {
            self.persist(plan.study_id, sample_id, &stats)?;
            if let Some(sink) = &sink {
                sink.write(&stats)?;
            }
            report.samples.push(stats.id);
        }
        if let Some(sink) = &sink {
            report.side_output = sink.finish()?;
        }

        info!(
            "Sample stats complete for '{}': {} samples, {} rows, {} unknown genotypes skipped, {} task retries",
            report.study,
            report.samples.len(),
            report.rows_processed,
            report.unknown_genotypes,
            report.task_retries
        );
        Ok(report)
    }

    fn persist(&self, study_id: StudyId, sample_id: SampleId, stats: &SampleVariantStats) -> Result<(), StatsError> {
        self.metadata
            .update_sample_metadata(study_id, sample_id, &mut |sample| {
                let mut fresh = stats.clone();
                fresh.id = sample.name.clone();
                match sample.stats.as_mut() {
                    Some(existing) => fresh.merge_into(existing),
                    None => sample.stats = Some(fresh),
                }
            })
            .map_err(|source| StatsError::Persist { sample_id, source })
    }

    /// Run one map task with retries; a retried task starts from scratch
    fn run_task(
        &self,
        plan: &StatsJobPlan,
        partition: &Partition,
        retries: &AtomicU64,
    ) -> Result<MapOutput, StatsError> {
        let max_attempts = self.config.max_task_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if self.cancel.load(Ordering::SeqCst) {
                return Err(StatsError::Cancelled);
            }
            match self.map_partition(plan, partition) {
                Ok(output) => return Ok(output),
                Err(e) if attempt < max_attempts => {
                    warn!(
                        "Stats task for partition {} failed (attempt {}/{}): {}",
                        partition.index, attempt, max_attempts, e
                    );
                    retries.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    return Err(StatsError::TaskFailed {
                        partition: partition.index,
                        attempts: attempt,
                        source: Box::new(e),
                    })
                }
            }
        }
    }

    fn map_partition(&self, plan: &StatsJobPlan, partition: &Partition) -> Result<MapOutput, StatsError> {
        // Pedigree is read once per task and reused for every row
        let pedigree = Pedigree::parse(&plan.pedigree_channel)?;
        let mut file_samples: HashMap<FileId, Vec<SampleId>> = HashMap::new();
        let mut output = MapOutput {
            partials: plan
                .targets
                .iter()
                .map(|s| (s.id, PartialSampleStats::new(s.id, s.name.clone())))
                .collect(),
            ..Default::default()
        };

        for row in self.store.scan_partition(partition)? {
            let study_row = self.codec.decode_study(&row.locus, plan.study_id, &row.columns)?;
            if study_row.is_empty() {
                continue;
            }
            output.rows += 1;

            let annotation = row
                .annotation
                .as_deref()
                .map(serde_json::from_slice::<VariantAnnotation>)
                .transpose()
                .map_err(|source| StatsError::CorruptAnnotation {
                    locus: row.locus.to_string(),
                    source,
                })?;

            // Quality and filter only come from calls without overlapping variants
            let mut file_values: HashMap<SampleId, (Option<f64>, Option<&str>)> = HashMap::new();
            for cell in row.file_cells(plan.study_id).filter(|c| !c.overlapping) {
                let samples = match file_samples.entry(cell.file_id) {
                    Entry::Occupied(e) => e.into_mut(),
                    Entry::Vacant(e) => e.insert(self.metadata.file_samples(plan.study_id, cell.file_id)?),
                };
                for sample in samples.iter() {
                    file_values.insert(*sample, (cell.qual, cell.filter.as_deref()));
                }
            }

            let genotypes: HashMap<SampleId, GenotypeCode> = plan
                .job_samples
                .iter()
                .map(|&id| (id, study_row.genotype_of(id).unwrap_or(GenotypeCode::HomRef)))
                .collect();
            let genotype = |id: SampleId| genotypes.get(&id).copied();

            for (sample_id, partial) in output.partials.iter_mut() {
                let Some(gt) = genotype(*sample_id) else {
                    continue;
                };
                if matches!(gt, GenotypeCode::Missing | GenotypeCode::Other) {
                    output.unknown_genotypes += 1;
                    continue;
                }
                let (father, mother) = pedigree
                    .parents(*sample_id)
                    .map(|t| (t.father.and_then(genotype), t.mother.and_then(genotype)))
                    .unwrap_or((None, None));
                let (qual, filter) = file_values.get(sample_id).copied().unwrap_or((None, None));
                partial.update(&SampleCall {
                    locus: &row.locus,
                    genotype: gt,
                    qual,
                    filter,
                    annotation: annotation.as_ref(),
                    mendelian_error: is_mendelian_error(gt, father, mother),
                    de_novo: is_de_novo(gt, father, mother),
                });
            }
        }

        debug!(
            "Partition {} mapped: {} rows, {} unknown genotypes",
            partition.index, output.rows, output.unknown_genotypes
        );
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::InMemoryMetadataManager;
    use crate::models::Locus;
    use crate::storage::{FileCell, InMemoryVariantStore, StoredRow};
    use tempfile::tempdir;

    struct Fixture {
        store: Arc<InMemoryVariantStore>,
        metadata: Arc<InMemoryMetadataManager>,
        study: StudyId,
        samples: Vec<SampleId>,
        file: FileId,
    }

    fn fixture() -> Fixture {
        let metadata = Arc::new(InMemoryMetadataManager::new());
        let study = metadata.register_study("study").unwrap();
        let samples: Vec<SampleId> = ["S1", "S2", "S3"]
            .iter()
            .map(|n| metadata.register_sample(study, n).unwrap())
            .collect();
        for &id in &samples {
            metadata
                .update_sample_metadata(study, id, &mut |s| s.indexed = true)
                .unwrap();
        }
        let file = metadata.register_file(study, "f.vcf", &samples).unwrap();
        Fixture {
            store: Arc::new(InMemoryVariantStore::new()),
            metadata,
            study,
            samples,
            file,
        }
    }

    fn put(f: &Fixture, locus: Locus, gts: [GenotypeCode; 3], qual: f64, overlapping: bool) {
        let assignment: BTreeMap<SampleId, GenotypeCode> =
            f.samples.iter().copied().zip(gts).collect();
        let mut row = StoredRow::new(locus.clone());
        row.columns = RowCodec::new()
            .encode_assignment(&locus, f.study, &assignment)
            .unwrap();
        row.files.push(FileCell {
            study_id: f.study,
            file_id: f.file,
            qual: Some(qual),
            filter: Some("PASS".to_string()),
            overlapping,
        });
        f.store.put_row(row).unwrap();
    }

    fn job(f: &Fixture, partitions: usize) -> SampleStatsJob {
        let config = StatsConfig {
            partitions,
            ..Default::default()
        };
        SampleStatsJob::new(f.store.clone(), f.metadata.clone(), config)
    }

    fn stats_of(f: &Fixture, sample: SampleId) -> SampleVariantStats {
        f.metadata
            .sample_metadata(f.study, sample)
            .unwrap()
            .unwrap()
            .stats
            .unwrap()
    }

    use GenotypeCode::*;

    fn load_cohort(f: &Fixture) {
        put(f, Locus::new("1", 100, "A", "G"), [Het, HomRef, HomAlt], 30.0, false);
        put(f, Locus::new("1", 200, "C", "A"), [HomAlt, Het, HomRef], 50.0, false);
        put(f, Locus::new("2", 300, "T", "C"), [Het, Missing, Het], 70.0, true);
        put(f, Locus::new("2", 400, "G", "GTT"), [HomRef, Het, Other], 10.0, false);
    }

    #[test]
    fn test_stats_job_counts() {
        let f = fixture();
        load_cohort(&f);
        let job = job(&f, 2);
        let plan = job.plan("study", &SampleSelection::All).unwrap();
        let report = job.run(&plan).unwrap();

        assert_eq!(report.rows_processed, 4);
        assert_eq!(report.unknown_genotypes, 2);
        assert_eq!(report.samples, vec!["S1", "S2", "S3"]);

        let s1 = stats_of(&f, f.samples[0]);
        assert_eq!(s1.num_variants, 3);
        assert_eq!(s1.transitions, 2);
        assert_eq!(s1.transversions, 1);
        assert_eq!(s1.ti_tv_ratio, 2.0);
        // The overlapping call contributes no quality
        assert_eq!(s1.mean_quality, 40.0);
        assert_eq!(s1.genotype_count.get("0/1"), Some(&2));
        assert_eq!(s1.missing_positions, None);

        let s2 = stats_of(&f, f.samples[1]);
        assert_eq!(s2.indel_length_count.get("<5"), Some(&1));
        assert_eq!(s2.genotype_count.get("./."), None);
    }

    #[test]
    fn test_partition_count_does_not_change_results() {
        let one = fixture();
        load_cohort(&one);
        let many = fixture();
        load_cohort(&many);

        let j1 = job(&one, 1);
        j1.run(&j1.plan("study", &SampleSelection::All).unwrap()).unwrap();
        let j4 = job(&many, 4);
        j4.run(&j4.plan("study", &SampleSelection::All).unwrap()).unwrap();

        for i in 0..3 {
            assert_eq!(stats_of(&one, one.samples[i]), stats_of(&many, many.samples[i]));
        }
    }

    #[test]
    fn test_mendelian_errors_from_pedigree() {
        let f = fixture();
        let (father, mother, child) = (f.samples[0], f.samples[1], f.samples[2]);
        f.metadata
            .update_sample_metadata(f.study, child, &mut |s| {
                s.father = Some(father);
                s.mother = Some(mother);
            })
            .unwrap();
        put(&f, Locus::new("1", 100, "A", "G"), [HomRef, HomRef, HomAlt], 30.0, false);
        put(&f, Locus::new("1", 200, "A", "G"), [HomRef, HomRef, Het], 30.0, false);
        put(&f, Locus::new("1", 300, "A", "G"), [Het, HomRef, Het], 30.0, false);

        let job = job(&f, 2);
        let plan = job
            .plan("study", &SampleSelection::Named(vec!["S3".to_string()]))
            .unwrap();
        assert_eq!(plan.job_samples, vec![father, mother, child]);
        assert_eq!(plan.pedigree_channel, format!("{},{},{};", child, father, mother));

        job.run(&plan).unwrap();
        let stats = stats_of(&f, child);
        assert_eq!(stats.mendelian_error_count, 2);
        assert_eq!(stats.de_novo_count, 2);
        // Parents were only read, not updated
        assert!(f.metadata.sample_metadata(f.study, father).unwrap().unwrap().stats.is_none());
    }

    #[test]
    fn test_persist_keeps_existing_missing_positions() {
        let f = fixture();
        load_cohort(&f);
        let mut existing = SampleVariantStats::empty("S1");
        existing.missing_positions = Some(12);
        f.metadata
            .update_sample_metadata(f.study, f.samples[0], &mut |s| s.stats = Some(existing.clone()))
            .unwrap();

        let job = job(&f, 3);
        job.run(&job.plan("study", &SampleSelection::All).unwrap()).unwrap();
        let s1 = stats_of(&f, f.samples[0]);
        assert_eq!(s1.missing_positions, Some(12));
        assert_eq!(s1.num_variants, 3);
    }

    #[test]
    fn test_auto_selection() {
        let f = fixture();
        load_cohort(&f);
        let job = job(&f, 2);
        job.run(&job.plan("study", &SampleSelection::Auto).unwrap()).unwrap();
        assert!(matches!(
            job.plan("study", &SampleSelection::Auto),
            Err(StatsError::NothingToDo)
        ));

        // Stats present but empty count as missing
        f.metadata
            .update_sample_metadata(f.study, f.samples[1], &mut |s| {
                s.stats = Some(SampleVariantStats::empty("S2"))
            })
            .unwrap();
        let plan = job.plan("study", &SampleSelection::Auto).unwrap();
        let targets: Vec<SampleId> = plan.targets.iter().map(|s| s.id).collect();
        assert_eq!(targets, vec![f.samples[1]]);
    }

    #[test]
    fn test_plan_errors() {
        let f = fixture();
        let job = job(&f, 2);
        assert!(matches!(
            job.plan("nope", &SampleSelection::All),
            Err(StatsError::UnknownStudy(_))
        ));
        assert!(matches!(
            job.plan("study", &SampleSelection::parse("S1,S9")),
            Err(StatsError::UnknownSample(name)) if name == "S9"
        ));
    }

    #[test]
    fn test_persist_failure_is_fatal() {
        let f = fixture();
        load_cohort(&f);
        let job = job(&f, 2);
        let mut plan = job.plan("study", &SampleSelection::All).unwrap();
        plan.targets[1].id = 999;
        plan.job_samples.push(999);
        assert!(matches!(
            job.run(&plan),
            Err(StatsError::Persist { sample_id: 999, .. })
        ));
    }

    #[test]
    fn test_corrupt_row_fails_task_after_retries() {
        let f = fixture();
        load_cohort(&f);
        let mut bad = StoredRow::new(Locus::new("3", 1, "A", "G"));
        bad.columns.insert(format!("{}_0/1", f.study), vec![9]);
        f.store.put_row(bad).unwrap();

        let job = job(&f, 1);
        let plan = job.plan("study", &SampleSelection::All).unwrap();
        match job.run(&plan) {
            Err(StatsError::TaskFailed { attempts, source, .. }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, StatsError::CorruptRow(_)));
            }
            other => panic!("expected task failure, got {:?}", other),
        }
        // Nothing persisted
        assert!(f.metadata.sample_metadata(f.study, f.samples[0]).unwrap().unwrap().stats.is_none());
    }

    #[test]
    fn test_cancelled_job_persists_nothing() {
        let f = fixture();
        load_cohort(&f);
        let job = job(&f, 2);
        let plan = job.plan("study", &SampleSelection::All).unwrap();
        job.cancel_handle().store(true, Ordering::SeqCst);
        assert!(matches!(job.run(&plan), Err(StatsError::Cancelled)));
        assert!(f.metadata.sample_metadata(f.study, f.samples[0]).unwrap().unwrap().stats.is_none());
    }

    #[test]
    fn test_side_output_and_progress() {
        let f = fixture();
        load_cohort(&f);
        let dir = tempdir().unwrap();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_cb = Arc::clone(&seen);
        let config = StatsConfig {
            partitions: 2,
            write_side_output: true,
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let job = SampleStatsJob::new(f.store.clone(), f.metadata.clone(), config).with_progress(move |p| {
            assert_eq!(p.tasks_total, 2);
            seen_in_cb.fetch_add(1, Ordering::SeqCst);
        });
        let report = job.run(&job.plan("study", &SampleSelection::All).unwrap()).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        let path = report.side_output.unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert_eq!(content.lines().count(), 3);
    }

    #[test]
    fn test_selection_parse() {
        assert_eq!(SampleSelection::parse("all"), SampleSelection::All);
        assert_eq!(SampleSelection::parse(" auto "), SampleSelection::Auto);
        assert_eq!(
            SampleSelection::parse("S1, S2,"),
            SampleSelection::Named(vec!["S1".to_string(), "S2".to_string()])
        );
    }
}
