// ==============================================================================
// main.rs - Variant Storage CLI
// ==============================================================================
// Description: Command line entry point: load VCFs, query the sample index
//              and compute per-sample statistics over a SQLite database
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use variant_storage::config::StorageConfig;
use variant_storage::index::{
    QueryOperation, SampleFilterRequest, SampleGenotypeRequest, SampleIndex, SampleIndexQuery,
    SampleIndexQueryExecutor,
};
use variant_storage::loader::VcfLoader;
use variant_storage::metadata::{MetadataManager, SqliteMetadataManager};
use variant_storage::models::Region;
use variant_storage::row_codec::RowCodec;
use variant_storage::stats::{SampleSelection, SampleStatsJob};
use variant_storage::storage::{SqliteVariantStore, VariantStore};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// SQLite database holding variants and the sample catalog
    #[arg(long, env = "VARIANT_DB_PATH", default_value = "variants.db")]
    db: PathBuf,

    /// Optional JSON configuration file
    #[arg(long, env = "VARIANT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load a VCF file into a study
    Load {
        #[arg(short, long)]
        study: String,

        /// VCF file (.vcf or .vcf.gz)
        vcf: PathBuf,
    },

    /// Query variants through the sample index
    Query {
        #[arg(short, long)]
        study: String,

        /// Region such as 1:100-200 or X (repeatable)
        #[arg(short, long)]
        region: Vec<Region>,

        /// Sample genotype filter NAME:GT[,GT...] (repeatable)
        #[arg(long = "sample")]
        samples: Vec<String>,

        /// Sample whose matches are excluded (repeatable)
        #[arg(long)]
        negate: Vec<String>,

        /// Combine sample filters with OR instead of AND
        #[arg(long)]
        or: bool,

        /// Keep variants with a Mendelian error in this sample (repeatable)
        #[arg(long)]
        mendelian_error: Vec<String>,

        #[arg(long)]
        de_novo: bool,

        /// Samples to report (default: all indexed samples)
        #[arg(long)]
        include: Vec<String>,
    },

    /// Compute and persist per-sample variant statistics
    SampleStats {
        #[arg(short, long)]
        study: String,

        /// all, auto, or a comma-separated list of sample names
        #[arg(long, default_value = "auto")]
        samples: String,
    },
}

/// Parse `NAME:GT[,GT...]`; a bare name accepts any indexed genotype
fn parse_sample_filter(value: &str) -> SampleGenotypeRequest {
    let (sample, genotypes) = value.split_once(':').unwrap_or((value, ""));
    SampleGenotypeRequest {
        sample: sample.to_string(),
        genotypes: genotypes
            .split(',')
            .filter(|g| !g.is_empty())
            .map(String::from)
            .collect(),
    }
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "variant_storage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = StorageConfig::load(args.config.as_deref())?;

    let store: Arc<dyn VariantStore> = Arc::new(
        SqliteVariantStore::open(&args.db)
            .with_context(|| format!("Failed to open variant store {:?}", args.db))?,
    );
    let metadata: Arc<dyn MetadataManager> = Arc::new(
        SqliteMetadataManager::open(&args.db)
            .with_context(|| format!("Failed to open sample catalog {:?}", args.db))?,
    );
    let codec = RowCodec::new();

    match args.command {
        Command::Load { study, vcf } => {
            let loader = VcfLoader::new(
                store,
                metadata,
                Arc::new(SampleIndex::new()),
                codec,
                config.dedup.clone(),
            );
            let report = loader
                .load(&study, &vcf)
                .with_context(|| format!("Failed to load {:?}", vcf))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Query {
            study,
            region,
            samples,
            negate,
            or,
            mendelian_error,
            de_novo,
            include,
        } => {
            let request = SampleFilterRequest {
                study: study.clone(),
                regions: region,
                samples: samples.iter().map(|s| parse_sample_filter(s)).collect(),
                negated_samples: negate,
                operation: if or { QueryOperation::Or } else { QueryOperation::And },
                mendelian_error,
                only_de_novo: de_novo,
                returned_samples: include,
                ..Default::default()
            };
            let query = SampleIndexQuery::build(&request, metadata.as_ref())?;

            // The index lives in memory; derive it from the store
            let index = Arc::new(SampleIndex::new());
            index.rebuild(store.as_ref(), metadata.as_ref(), &codec, query.study_id())?;

            let executor = SampleIndexQueryExecutor::new(store, index, metadata, codec);
            let mut count = 0;
            for variant in executor.execute(&query)? {
                let variant = variant?;
                let mut line = variant.locus.to_string();
                for entry in &variant.studies {
                    for (name, data) in entry.samples_position.names().iter().zip(&entry.samples_data) {
                        line.push_str(&format!("\t{}={}", name, data.join(":")));
                    }
                }
                println!("{}", line);
                count += 1;
            }
            info!("{} variants returned", count);
        }

        Command::SampleStats { study, samples } => {
            let job = SampleStatsJob::new(store, metadata, config.stats.clone()).with_codec(codec);
            let plan = job.plan(&study, &SampleSelection::parse(&samples))?;
            let report = job.run(&plan)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sample_filter() {
        let req = parse_sample_filter("S1:0/1,1/1");
        assert_eq!(req.sample, "S1");
        assert_eq!(req.genotypes, vec!["0/1", "1/1"]);
        assert!(parse_sample_filter("S2").genotypes.is_empty());
    }

    #[test]
    fn test_cli_parses_query() {
        let args = Args::try_parse_from([
            "variant-storage",
            "--db",
            "x.db",
            "query",
            "--study",
            "st",
            "--region",
            "1:100-200",
            "--sample",
            "S1:0/1",
            "--or",
        ])
        .unwrap();
        match args.command {
            Command::Query { region, or, .. } => {
                assert_eq!(region, vec![Region::new("1", 100, 200)]);
                assert!(or);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
