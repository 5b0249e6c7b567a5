// ==============================================================================
// index/mod.rs - Sample Index Module
// ==============================================================================
// Description: Sample index, query model and query executor
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

pub mod executor;
pub mod query;
pub mod sample_index;

pub use executor::{QueryError, SampleIndexQueryExecutor, VariantIter};
pub use query::{
    AnnotationFlag, FileFilterRequest, ParentFilterRequest, QualThreshold, QueryConstructionError,
    QueryOperation, SampleFilterRequest, SampleGenotypeRequest, SampleIndexQuery, SingleSampleIndexQuery,
};
pub use sample_index::{IndexError, IndexMask, SampleIndex, SampleIndexEntry};
