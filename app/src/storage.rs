// ==============================================================================
// storage.rs - Wide-Column Variant Store
// ==============================================================================
// Description: Row store keyed by locus with per-study genotype columns,
//              per-file cells and an annotation blob (in-memory and SQLite)
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use crate::models::{FileId, Locus, Region, StudyId};
use crate::row_codec::ColumnValues;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by variant stores
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Partition count must be at least 1")]
    InvalidPartitionCount,

    #[error("Position {0} does not fit the store's integer column")]
    PositionOutOfRange(u64),
}

/// Per-file cell: the call's quality, filter and overlap status in one file
#[derive(Debug, Clone, PartialEq)]
pub struct FileCell {
    pub study_id: StudyId,
    pub file_id: FileId,
    pub qual: Option<f64>,
    pub filter: Option<String>,

    /// Set when the call overlaps another variant in the same file
    pub overlapping: bool,
}

/// Everything the store holds for one locus
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub locus: Locus,
    pub columns: ColumnValues,
    pub files: Vec<FileCell>,
    pub annotation: Option<Vec<u8>>,
}

impl StoredRow {
    pub fn new(locus: Locus) -> Self {
        Self {
            locus,
            columns: ColumnValues::new(),
            files: Vec::new(),
            annotation: None,
        }
    }

    /// Merge `other` into this row: columns and file cells are replaced
    /// by key, the annotation only when `other` carries one
    pub fn merge(&mut self, other: StoredRow) {
        self.columns.extend(other.columns);
        for cell in other.files {
            match self
                .files
                .iter_mut()
                .find(|c| c.study_id == cell.study_id && c.file_id == cell.file_id)
            {
                Some(existing) => *existing = cell,
                None => self.files.push(cell),
            }
        }
        if other.annotation.is_some() {
            self.annotation = other.annotation;
        }
    }

    pub fn file_cells(&self, study_id: StudyId) -> impl Iterator<Item = &FileCell> {
        self.files.iter().filter(move |c| c.study_id == study_id)
    }
}

/// Contiguous key range handed to one map task, `[start, end)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub index: usize,
    pub start: Locus,

    /// Exclusive upper bound; `None` for the last partition
    pub end: Option<Locus>,
}

impl Partition {
    pub fn contains(&self, locus: &Locus) -> bool {
        *locus >= self.start && self.end.as_ref().map_or(true, |end| locus < end)
    }
}

/// Split ordered keys into at most `n` ranges of roughly equal size
fn split_into_partitions(keys: &[Locus], n: usize) -> Result<Vec<Partition>, StorageError> {
    if n == 0 {
        return Err(StorageError::InvalidPartitionCount);
    }
    if keys.is_empty() {
        return Ok(Vec::new());
    }
    let chunk = keys.len().div_ceil(n);
    let starts: Vec<&Locus> = keys.iter().step_by(chunk).collect();
    Ok(starts
        .iter()
        .enumerate()
        .map(|(index, start)| Partition {
            index,
            start: (*start).clone(),
            end: starts.get(index + 1).map(|l| (*l).clone()),
        })
        .collect())
}

/// Wide-column store abstraction
///
/// Rows are ordered by (chromosome, position, reference, alternate).
pub trait VariantStore: Send + Sync {
    /// Write a row, merging with whatever is already stored at the locus
    fn put_row(&self, row: StoredRow) -> Result<(), StorageError>;

    fn get_row(&self, locus: &Locus) -> Result<Option<StoredRow>, StorageError>;

    /// Rows inside any of `regions`; all rows when `regions` is empty
    fn scan(&self, regions: &[Region]) -> Result<Vec<StoredRow>, StorageError>;

    fn partitions(&self, n: usize) -> Result<Vec<Partition>, StorageError>;

    fn scan_partition(&self, partition: &Partition) -> Result<Vec<StoredRow>, StorageError>;

    fn set_annotation(&self, locus: &Locus, annotation: &[u8]) -> Result<(), StorageError>;
}

/// Store backed by an ordered map; used by tests and short-lived jobs
#[derive(Debug, Default)]
pub struct InMemoryVariantStore {
    rows: RwLock<BTreeMap<Locus, StoredRow>>,
}

impl InMemoryVariantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl VariantStore for InMemoryVariantStore {
    fn put_row(&self, row: StoredRow) -> Result<(), StorageError> {
        let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
        match rows.get_mut(&row.locus) {
            Some(existing) => existing.merge(row),
            None => {
                rows.insert(row.locus.clone(), row);
            }
        }
        Ok(())
    }

    fn get_row(&self, locus: &Locus) -> Result<Option<StoredRow>, StorageError> {
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(rows.get(locus).cloned())
    }

    fn scan(&self, regions: &[Region]) -> Result<Vec<StoredRow>, StorageError> {
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        if regions.is_empty() {
            return Ok(rows.values().cloned().collect());
        }
        // Overlapping regions must not yield a row twice
        let mut hits: BTreeMap<&Locus, &StoredRow> = BTreeMap::new();
        for region in regions {
            let from = Locus::new(region.chromosome.clone(), region.start, "", "");
            for (locus, row) in rows.range(from..) {
                if locus.chromosome != region.chromosome || locus.position > region.end {
                    break;
                }
                hits.insert(locus, row);
            }
        }
        Ok(hits.into_values().cloned().collect())
    }

    fn partitions(&self, n: usize) -> Result<Vec<Partition>, StorageError> {
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        let keys: Vec<Locus> = rows.keys().cloned().collect();
        split_into_partitions(&keys, n)
    }

    fn scan_partition(&self, partition: &Partition) -> Result<Vec<StoredRow>, StorageError> {
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(rows
            .range(partition.start.clone()..)
            .take_while(|(locus, _)| partition.contains(locus))
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn set_annotation(&self, locus: &Locus, annotation: &[u8]) -> Result<(), StorageError> {
        let mut rows = self.rows.write().map_err(|_| StorageError::LockPoisoned)?;
        rows.entry(locus.clone())
            .or_insert_with(|| StoredRow::new(locus.clone()))
            .annotation = Some(annotation.to_vec());
        Ok(())
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS variants (
    chromosome TEXT NOT NULL,
    position INTEGER NOT NULL,
    reference TEXT NOT NULL,
    alternate TEXT NOT NULL,
    annotation BLOB,
    PRIMARY KEY (chromosome, position, reference, alternate)
);
CREATE TABLE IF NOT EXISTS variant_columns (
    chromosome TEXT NOT NULL,
    position INTEGER NOT NULL,
    reference TEXT NOT NULL,
    alternate TEXT NOT NULL,
    qualifier TEXT NOT NULL,
    value BLOB NOT NULL,
    PRIMARY KEY (chromosome, position, reference, alternate, qualifier)
);
CREATE TABLE IF NOT EXISTS variant_files (
    chromosome TEXT NOT NULL,
    position INTEGER NOT NULL,
    reference TEXT NOT NULL,
    alternate TEXT NOT NULL,
    study_id INTEGER NOT NULL,
    file_id INTEGER NOT NULL,
    qual REAL,
    filter TEXT,
    overlapping INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (chromosome, position, reference, alternate, study_id, file_id)
);
";

const LOCUS_COLUMNS: &str = "chromosome, position, reference, alternate";

fn sql_position(position: u64) -> Result<i64, StorageError> {
    i64::try_from(position).map_err(|_| StorageError::PositionOutOfRange(position))
}

fn locus_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Locus> {
    Ok(Locus {
        chromosome: row.get(0)?,
        position: u64::try_from(row.get::<_, i64>(1)?).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Integer, Box::new(e))
        })?,
        reference: row.get(2)?,
        alternate: row.get(3)?,
    })
}

/// SQLite-backed store emulating the wide-column layout
pub struct SqliteVariantStore {
    conn: Mutex<Connection>,
}

impl SqliteVariantStore {
    /// Open (or create) a store database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(SCHEMA)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM variants", [], |row| row.get(0))?;
        info!("Variant store ready: {} rows", count);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_row(conn: &Connection, locus: &Locus) -> Result<Option<StoredRow>, StorageError> {
        let pos = sql_position(locus.position)?;
        let annotation: Option<Option<Vec<u8>>> = conn
            .query_row(
                "SELECT annotation FROM variants
                 WHERE chromosome = ?1 AND position = ?2 AND reference = ?3 AND alternate = ?4",
                params![locus.chromosome, pos, locus.reference, locus.alternate],
                |row| row.get(0),
            )
            .optional()?;
        let Some(annotation) = annotation else {
            return Ok(None);
        };

        let mut row = StoredRow::new(locus.clone());
        row.annotation = annotation;

        let mut stmt = conn.prepare_cached(
            "SELECT qualifier, value FROM variant_columns
             WHERE chromosome = ?1 AND position = ?2 AND reference = ?3 AND alternate = ?4",
        )?;
        let cells = stmt.query_map(
            params![locus.chromosome, pos, locus.reference, locus.alternate],
            |r| Ok((r.get::<_, String>(0)?, r.get::<_, Vec<u8>>(1)?)),
        )?;
        for cell in cells {
            let (qualifier, value) = cell?;
            row.columns.insert(qualifier, value);
        }

        let mut stmt = conn.prepare_cached(
            "SELECT study_id, file_id, qual, filter, overlapping FROM variant_files
             WHERE chromosome = ?1 AND position = ?2 AND reference = ?3 AND alternate = ?4
             ORDER BY study_id, file_id",
        )?;
        let files = stmt.query_map(
            params![locus.chromosome, pos, locus.reference, locus.alternate],
            |r| {
                Ok(FileCell {
                    study_id: r.get(0)?,
                    file_id: r.get(1)?,
                    qual: r.get(2)?,
                    filter: r.get(3)?,
                    overlapping: r.get::<_, i64>(4)? != 0,
                })
            },
        )?;
        for file in files {
            row.files.push(file?);
        }
        Ok(Some(row))
    }

    fn load_rows(conn: &Connection, loci: Vec<Locus>) -> Result<Vec<StoredRow>, StorageError> {
        let mut rows = Vec::with_capacity(loci.len());
        for locus in loci {
            if let Some(row) = Self::load_row(conn, &locus)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn query_loci(
        conn: &Connection,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<Locus>, StorageError> {
        let mut stmt = conn.prepare(sql)?;
        let loci = stmt.query_map(params, locus_from_row)?;
        let mut out = Vec::new();
        for locus in loci {
            out.push(locus?);
        }
        Ok(out)
    }
}

impl VariantStore for SqliteVariantStore {
    fn put_row(&self, row: StoredRow) -> Result<(), StorageError> {
        let mut conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let l = &row.locus;
        let pos = sql_position(l.position)?;

        tx.execute(
            "INSERT OR IGNORE INTO variants (chromosome, position, reference, alternate)
             VALUES (?1, ?2, ?3, ?4)",
            params![l.chromosome, pos, l.reference, l.alternate],
        )?;
        if let Some(annotation) = &row.annotation {
            tx.execute(
                "UPDATE variants SET annotation = ?5
                 WHERE chromosome = ?1 AND position = ?2 AND reference = ?3 AND alternate = ?4",
                params![l.chromosome, pos, l.reference, l.alternate, annotation],
            )?;
        }
        for (qualifier, value) in &row.columns {
            tx.execute(
                "INSERT OR REPLACE INTO variant_columns
                 (chromosome, position, reference, alternate, qualifier, value)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![l.chromosome, pos, l.reference, l.alternate, qualifier, value],
            )?;
        }
        for cell in &row.files {
            tx.execute(
                "INSERT OR REPLACE INTO variant_files
                 (chromosome, position, reference, alternate, study_id, file_id, qual, filter, overlapping)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    l.chromosome,
                    pos,
                    l.reference,
                    l.alternate,
                    cell.study_id,
                    cell.file_id,
                    cell.qual,
                    cell.filter,
                    cell.overlapping as i64
                ],
            )?;
        }
        tx.commit()?;
        debug!("Stored row {} ({} columns)", row.locus, row.columns.len());
        Ok(())
    }

    fn get_row(&self, locus: &Locus) -> Result<Option<StoredRow>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        Self::load_row(&conn, locus)
    }

    fn scan(&self, regions: &[Region]) -> Result<Vec<StoredRow>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        let loci = if regions.is_empty() {
            Self::query_loci(
                &conn,
                &format!("SELECT {c} FROM variants ORDER BY {c}", c = LOCUS_COLUMNS),
                &[],
            )?
        } else {
            let mut hits = std::collections::BTreeSet::new();
            for region in regions {
                let start = sql_position(region.start)?;
                let end = sql_position(region.end.min(i64::MAX as u64))?;
                hits.extend(Self::query_loci(
                    &conn,
                    &format!(
                        "SELECT {c} FROM variants
                         WHERE chromosome = ?1 AND position BETWEEN ?2 AND ?3
                         ORDER BY {c}",
                        c = LOCUS_COLUMNS
                    ),
                    &[&region.chromosome, &start, &end],
                )?);
            }
            hits.into_iter().collect()
        };
        Self::load_rows(&conn, loci)
    }

    fn partitions(&self, n: usize) -> Result<Vec<Partition>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        let keys = Self::query_loci(
            &conn,
            &format!("SELECT {c} FROM variants ORDER BY {c}", c = LOCUS_COLUMNS),
            &[],
        )?;
        split_into_partitions(&keys, n)
    }

    fn scan_partition(&self, partition: &Partition) -> Result<Vec<StoredRow>, StorageError> {
        let conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        let s = &partition.start;
        let start_pos = sql_position(s.position)?;
        let loci = match &partition.end {
            Some(e) => {
                let end_pos = sql_position(e.position)?;
                Self::query_loci(
                    &conn,
                    &format!(
                        "SELECT {c} FROM variants
                         WHERE ({c}) >= (?1, ?2, ?3, ?4) AND ({c}) < (?5, ?6, ?7, ?8)
                         ORDER BY {c}",
                        c = LOCUS_COLUMNS
                    ),
                    &[
                        &s.chromosome,
                        &start_pos,
                        &s.reference,
                        &s.alternate,
                        &e.chromosome,
                        &end_pos,
                        &e.reference,
                        &e.alternate,
                    ],
                )?
            }
            None => Self::query_loci(
                &conn,
                &format!(
                    "SELECT {c} FROM variants WHERE ({c}) >= (?1, ?2, ?3, ?4) ORDER BY {c}",
                    c = LOCUS_COLUMNS
                ),
                &[&s.chromosome, &start_pos, &s.reference, &s.alternate],
            )?,
        };
        Self::load_rows(&conn, loci)
    }

    fn set_annotation(&self, locus: &Locus, annotation: &[u8]) -> Result<(), StorageError> {
        let mut row = StoredRow::new(locus.clone());
        row.annotation = Some(annotation.to_vec());
        self.put_row(row)
    }
}
