// ==============================================================================
// stats/pedigree.rs - Pedigree Side Channel
// ==============================================================================
// Description: Trio relationships shipped to map tasks as a compact string
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Format:
//   childId,fatherId,motherId;childId,fatherId,motherId;...
//   0 marks an unknown parent.
// ==============================================================================

use crate::metadata::SampleMetadata;
use crate::models::SampleId;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PedigreeError {
    #[error("Malformed trio record '{0}' (expected child,father,mother)")]
    MalformedTrio(String),

    #[error("Invalid sample id '{0}' in trio record")]
    InvalidId(String),

    #[error("Sample id 0 is reserved for unknown parents")]
    ReservedChildId,
}

/// Child with its (possibly unknown) parents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trio {
    pub child: SampleId,
    pub father: Option<SampleId>,
    pub mother: Option<SampleId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pedigree {
    trios: BTreeMap<SampleId, Trio>,
}

impl Pedigree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a trio; samples without any known parent are ignored
    pub fn add_trio(&mut self, trio: Trio) {
        if trio.father.is_some() || trio.mother.is_some() {
            self.trios.insert(trio.child, trio);
        }
    }

    /// Trios of the given samples, taken from their catalog records
    pub fn from_metadata<'a>(samples: impl IntoIterator<Item = &'a SampleMetadata>) -> Self {
        let mut pedigree = Self::new();
        for sample in samples {
            pedigree.add_trio(Trio {
                child: sample.id,
                father: sample.father,
                mother: sample.mother,
            });
        }
        pedigree
    }

    pub fn parents(&self, child: SampleId) -> Option<&Trio> {
        self.trios.get(&child)
    }

    pub fn trios(&self) -> impl Iterator<Item = &Trio> {
        self.trios.values()
    }

    /// Every parent id referenced by the pedigree
    pub fn parent_ids(&self) -> impl Iterator<Item = SampleId> + '_ {
        self.trios
            .values()
            .flat_map(|t| t.father.into_iter().chain(t.mother))
    }

    pub fn len(&self) -> usize {
        self.trios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trios.is_empty()
    }

    /// Serialize for the side channel
    pub fn to_side_channel(&self) -> String {
        self.trios
            .values()
            .map(|trio| {
                format!(
                    "{},{},{};",
                    trio.child,
                    trio.father.unwrap_or(0),
                    trio.mother.unwrap_or(0)
                )
            })
            .collect()
    }

    /// Parse a side-channel string
    pub fn parse(channel: &str) -> Result<Self, PedigreeError> {
        let mut pedigree = Self::new();
        for record in channel.split(';').map(str::trim).filter(|r| !r.is_empty()) {
            let fields: Vec<&str> = record.split(',').map(str::trim).collect();
            let [child, father, mother] = fields.as_slice() else {
                return Err(PedigreeError::MalformedTrio(record.to_string()));
            };
            let parse_id = |s: &str| {
                s.parse::<SampleId>()
                    .map_err(|_| PedigreeError::InvalidId(s.to_string()))
            };
            let child = parse_id(*child)?;
            if child == 0 {
                return Err(PedigreeError::ReservedChildId);
            }
            let known = |id: SampleId| (id != 0).then_some(id);
            pedigree.add_trio(Trio {
                child,
                father: known(parse_id(*father)?),
                mother: known(parse_id(*mother)?),
            });
        }
        Ok(pedigree)
    }
}
