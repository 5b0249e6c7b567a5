// ==============================================================================
// tests/properties.rs - Property Tests
// ==============================================================================
// Description: Codec round trip, idempotent decode and partial-merge
//              associativity over generated inputs
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use proptest::prelude::*;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use variant_storage::genotype::GenotypeCode;
use variant_storage::models::{Locus, SampleId};
use variant_storage::row_codec::RowCodec;
use variant_storage::stats::{PartialSampleStats, SampleCall, SampleStatsAccumulator};

fn genotype_code() -> impl Strategy<Value = GenotypeCode> {
    prop::sample::select(GenotypeCode::ALL.to_vec())
}

fn assignment() -> impl Strategy<Value = BTreeMap<SampleId, GenotypeCode>> {
    prop::collection::btree_map(1u32..5000, genotype_code(), 0..60)
}

/// One row update: (position, ref, alt, genotype, integer QUAL, PASS)
fn update() -> impl Strategy<Value = (u64, &'static str, &'static str, GenotypeCode, Option<u8>, bool)> {
    (
        1u64..1_000_000,
        prop::sample::select(vec!["A", "C", "G", "T", "AT"]),
        prop::sample::select(vec!["A", "C", "G", "T", "CTT", "."]),
        genotype_code(),
        prop::option::of(0u8..100),
        any::<bool>(),
    )
}

type Update = (u64, &'static str, &'static str, GenotypeCode, Option<u8>, bool);

fn accumulate(updates: &[Update]) -> PartialSampleStats {
    let mut partial = PartialSampleStats::new(1, "S1");
    for &(pos, reference, alternate, genotype, qual, pass) in updates {
        let locus = Locus::new("1", pos, reference, alternate);
        partial.update(&SampleCall {
            locus: &locus,
            genotype,
            qual: qual.map(f64::from),
            filter: Some(if pass { "PASS" } else { "LowQual" }),
            annotation: None,
            mendelian_error: false,
            de_novo: false,
        });
    }
    partial
}

// ---------------------------------------------------------------------------
// 1. decode(encode(x)) == x, and decoding twice is identical
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_codec_round_trip(assignment in assignment(), study in 1u32..20) {
        let codec = RowCodec::new();
        let locus = Locus::new("7", 117_559_590, "A", "G");
        let columns = codec.encode_assignment(&locus, study, &assignment).unwrap();

        let first = codec.decode_study(&locus, study, &columns).unwrap();
        let second = codec.decode_study(&locus, study, &columns).unwrap();
        prop_assert_eq!(&first, &second);

        let samples: Vec<SampleId> = assignment.keys().copied().collect();
        prop_assert_eq!(first.assignment(&samples), assignment.clone());
        prop_assert!(codec.check_hom_ref(&locus, &first, samples.len()));
        prop_assert_eq!(codec.metrics().hom_ref_mismatches(), 0);
    }
}

// ---------------------------------------------------------------------------
// 2. Merging partials is order and grouping independent
// ---------------------------------------------------------------------------
proptest! {
    #![proptest_config(ProptestConfig::with_cases(50))]

    #[test]
    fn prop_merge_associativity(
        updates in prop::collection::vec(update(), 0..80),
        split in 0usize..80,
        seed in 0u64..1000,
    ) {
        let split = split.min(updates.len());
        let (left, right) = updates.split_at(split);

        let mut whole = SampleStatsAccumulator::new(1, "S1");
        whole.merge(&accumulate(&updates)).unwrap();
        let expected = whole.finalize().unwrap();

        // Combine each group, then reduce in a shuffled order
        let mut partials = vec![accumulate(left), accumulate(right), PartialSampleStats::new(1, "S1")];
        let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
        partials.shuffle(&mut rng);
        let mut reduced = SampleStatsAccumulator::new(1, "S1");
        for partial in &partials {
            reduced.merge(partial).unwrap();
        }
        let actual = reduced.finalize().unwrap();

        prop_assert_eq!(actual.transitions, expected.transitions);
        prop_assert_eq!(actual.transversions, expected.transversions);
        prop_assert_eq!(&actual.genotype_count, &expected.genotype_count);
        prop_assert_eq!(&actual.type_count, &expected.type_count);
        prop_assert_eq!(actual.num_variants, expected.num_variants);
        prop_assert_eq!(actual.num_pass, expected.num_pass);
        prop_assert!((actual.mean_quality - expected.mean_quality).abs() < 1e-9);
        prop_assert!((actual.std_dev_quality - expected.std_dev_quality).abs() < 1e-6);
        prop_assert!(actual.std_dev_quality >= 0.0);

        // Integer-valued QUALs keep raw sums exact
        let mut a = accumulate(left);
        a.merge(&accumulate(right)).unwrap();
        let mut b = accumulate(right);
        b.merge(&accumulate(left)).unwrap();
        prop_assert_eq!(a, b);
    }
}
