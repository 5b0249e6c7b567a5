// ==============================================================================
// lib.rs - Variant Storage Library
// ==============================================================================
// Description: Library interface for genotype row encoding, sample index
//              queries, per-sample statistics and duplicate resolution
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

pub mod config;
pub mod converter;
pub mod dedup;
pub mod encoding;
pub mod genotype;
pub mod index;
pub mod loader;
pub mod metadata;
pub mod models;
pub mod row_codec;
pub mod stats;
pub mod storage;
