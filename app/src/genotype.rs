// ==============================================================================
// genotype.rs - Genotype Codes and Inheritance Rules
// ==============================================================================
// Description: Small enumerated genotype representation with Mendelian checks
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Codes:
//   - HomRef  "0/0"  (never stored as a sample list, only as a count)
//   - Het     "0/1"  (also 1/0, 0|1, 1|0)
//   - HomAlt  "1/1"  (also 1|1)
//   - Missing "./."  (also ".", .|.)
//   - Other   "?"    (any other well-formed call, e.g. 1/2 on a split site)
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of distinct genotype codes (length of parent filter arrays)
pub const NUM_CODES: usize = 5;

/// Errors raised when a genotype string is not a VCF-style call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenotypeError {
    #[error("Malformed genotype '{0}' (expected alleles separated by '/' or '|')")]
    Malformed(String),
}

/// Per-sample call, reduced to the codes the storage layer distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GenotypeCode {
    HomRef,
    Het,
    HomAlt,
    Missing,
    Other,
}

impl GenotypeCode {
    pub const ALL: [GenotypeCode; NUM_CODES] = [
        GenotypeCode::HomRef,
        GenotypeCode::Het,
        GenotypeCode::HomAlt,
        GenotypeCode::Missing,
        GenotypeCode::Other,
    ];

    /// Position of this code in parent filter arrays
    pub fn index(self) -> usize {
        match self {
            GenotypeCode::HomRef => 0,
            GenotypeCode::Het => 1,
            GenotypeCode::HomAlt => 2,
            GenotypeCode::Missing => 3,
            GenotypeCode::Other => 4,
        }
    }

    /// Canonical string used in storage column keys
    pub fn as_str(self) -> &'static str {
        match self {
            GenotypeCode::HomRef => "0/0",
            GenotypeCode::Het => "0/1",
            GenotypeCode::HomAlt => "1/1",
            GenotypeCode::Missing => "./.",
            GenotypeCode::Other => "?",
        }
    }

    /// String written into reconstructed variants
    pub fn output_str(self) -> &'static str {
        match self {
            GenotypeCode::Other => ".",
            code => code.as_str(),
        }
    }

    /// Lenient parse: anything unrecognised lands in the `Other` bucket
    ///
    /// # Examples
    /// ```
    /// use variant_storage::genotype::GenotypeCode;
    ///
    /// assert_eq!(GenotypeCode::parse("0|1"), GenotypeCode::Het);
    /// assert_eq!(GenotypeCode::parse("1/0"), GenotypeCode::Het);
    /// assert_eq!(GenotypeCode::parse("."), GenotypeCode::Missing);
    /// assert_eq!(GenotypeCode::parse("1/2"), GenotypeCode::Other);
    /// ```
    pub fn parse(gt: &str) -> GenotypeCode {
        match gt {
            "0/0" | "0|0" => GenotypeCode::HomRef,
            "0/1" | "1/0" | "0|1" | "1|0" => GenotypeCode::Het,
            "1/1" | "1|1" => GenotypeCode::HomAlt,
            "./." | "." | ".|." => GenotypeCode::Missing,
            _ => GenotypeCode::Other,
        }
    }

    /// Strict parse used when validating user-supplied filters
    pub fn parse_strict(gt: &str) -> Result<GenotypeCode, GenotypeError> {
        if gt == "?" {
            return Ok(GenotypeCode::Other);
        }
        let well_formed = !gt.is_empty()
            && gt
                .split(|c| c == '/' || c == '|')
                .all(|a| a == "." || (!a.is_empty() && a.bytes().all(|b| b.is_ascii_digit())));
        if !well_formed {
            return Err(GenotypeError::Malformed(gt.to_string()));
        }
        Ok(GenotypeCode::parse(gt))
    }

    /// Biallelic allele pair, when known
    pub fn alleles(self) -> Option<[u8; 2]> {
        match self {
            GenotypeCode::HomRef => Some([0, 0]),
            GenotypeCode::Het => Some([0, 1]),
            GenotypeCode::HomAlt => Some([1, 1]),
            GenotypeCode::Missing | GenotypeCode::Other => None,
        }
    }

    /// True for codes carrying a non-reference allele
    pub fn is_variant(self) -> bool {
        matches!(self, GenotypeCode::Het | GenotypeCode::HomAlt | GenotypeCode::Other)
    }
}

impl fmt::Display for GenotypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn can_transmit(parent: Option<GenotypeCode>, allele: u8) -> bool {
    match parent.and_then(GenotypeCode::alleles) {
        Some(alleles) => alleles.contains(&allele),
        None => true,
    }
}

/// Child genotype inconsistent with parental genotypes
///
/// Each child allele must come from a different parent. Unknown or missing
/// parents impose no constraint, so with both unknown there is never an error.
pub fn is_mendelian_error(
    child: GenotypeCode,
    father: Option<GenotypeCode>,
    mother: Option<GenotypeCode>,
) -> bool {
    let Some([a, b]) = child.alleles() else {
        return false;
    };
    let consistent = (can_transmit(father, a) && can_transmit(mother, b))
        || (can_transmit(father, b) && can_transmit(mother, a));
    !consistent
}

/// Child carries an alternate allele while both parents are known hom-ref
pub fn is_de_novo(
    child: GenotypeCode,
    father: Option<GenotypeCode>,
    mother: Option<GenotypeCode>,
) -> bool {
    matches!(child, GenotypeCode::Het | GenotypeCode::HomAlt)
        && father == Some(GenotypeCode::HomRef)
        && mother == Some(GenotypeCode::HomRef)
}
