// ==============================================================================
// metadata.rs - Study and Sample Metadata Catalog
// ==============================================================================
// Description: Sample/study/file lookups consumed by the storage core, with
//              in-memory and SQLite-backed implementations
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================

use crate::models::{FileId, SampleId, StudyId};
use crate::stats::SampleVariantStats;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised by metadata managers
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Study {0} not found")]
    StudyNotFound(StudyId),

    #[error("Sample {sample_id} not found in study {study_id}")]
    SampleNotFound { study_id: StudyId, sample_id: SampleId },

    #[error("File '{name}' already registered in study {study_id}")]
    FileAlreadyRegistered { study_id: StudyId, name: String },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Stats serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Metadata lock poisoned")]
    LockPoisoned,

    #[error("Row id {0} does not fit a catalog id")]
    IdOutOfRange(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyMetadata {
    pub id: StudyId,
    pub name: String,
}

/// Per-sample catalog record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    pub study_id: StudyId,
    pub id: SampleId,
    pub name: String,
    pub father: Option<SampleId>,
    pub mother: Option<SampleId>,

    /// True once the sample's genotypes are in the sample index
    pub indexed: bool,

    /// Persisted per-sample statistics, if computed
    pub stats: Option<SampleVariantStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub study_id: StudyId,
    pub id: FileId,
    pub name: String,

    /// Samples in file column order
    pub samples: Vec<SampleId>,
}

/// Catalog collaborator consumed by the storage core
pub trait MetadataManager: Send + Sync {
    fn study(&self, study_id: StudyId) -> Result<Option<StudyMetadata>, MetadataError>;

    fn study_by_name(&self, name: &str) -> Result<Option<StudyMetadata>, MetadataError>;

    fn resolve_sample_id(&self, study_id: StudyId, name: &str) -> Result<Option<SampleId>, MetadataError>;

    fn sample_metadata(
        &self,
        study_id: StudyId,
        sample_id: SampleId,
    ) -> Result<Option<SampleMetadata>, MetadataError>;

    /// All samples of a study, ordered by id
    fn samples(&self, study_id: StudyId) -> Result<Vec<SampleMetadata>, MetadataError>;

    fn file(&self, study_id: StudyId, file_id: FileId) -> Result<Option<FileMetadata>, MetadataError>;

    /// Apply `merge` to a stored sample record and persist the result
    fn update_sample_metadata(
        &self,
        study_id: StudyId,
        sample_id: SampleId,
        merge: &mut dyn FnMut(&mut SampleMetadata),
    ) -> Result<(), MetadataError>;

    /// Return the id of a study, creating it when unseen
    fn register_study(&self, name: &str) -> Result<StudyId, MetadataError>;

    /// Return the id of a sample, creating it when unseen
    fn register_sample(&self, study_id: StudyId, name: &str) -> Result<SampleId, MetadataError>;

    /// Register a new input file; loading the same file twice is an error
    fn register_file(
        &self,
        study_id: StudyId,
        name: &str,
        samples: &[SampleId],
    ) -> Result<FileId, MetadataError>;

    /// Indexed samples of a study, ordered by id
    fn indexed_samples(&self, study_id: StudyId) -> Result<Vec<SampleMetadata>, MetadataError> {
        Ok(self
            .samples(study_id)?
            .into_iter()
            .filter(|s| s.indexed)
            .collect())
    }

    /// Sample ids of a file, in column order
    fn file_samples(&self, study_id: StudyId, file_id: FileId) -> Result<Vec<SampleId>, MetadataError> {
        Ok(self
            .file(study_id, file_id)?
            .map(|f| f.samples)
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
struct Catalog {
    studies: BTreeMap<StudyId, StudyMetadata>,
    samples: BTreeMap<SampleId, SampleMetadata>,
    files: BTreeMap<FileId, FileMetadata>,
}

/// Catalog held in process memory
#[derive(Debug, Default)]
pub struct InMemoryMetadataManager {
    catalog: RwLock<Catalog>,
}

impl InMemoryMetadataManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataManager for InMemoryMetadataManager {
    fn study(&self, study_id: StudyId) -> Result<Option<StudyMetadata>, MetadataError> {
        let catalog = self.catalog.read().map_err(|_| MetadataError::LockPoisoned)?;
        Ok(catalog.studies.get(&study_id).cloned())
    }

    fn study_by_name(&self, name: &str) -> Result<Option<StudyMetadata>, MetadataError> {
        let catalog = self.catalog.read().map_err(|_| MetadataError::LockPoisoned)?;
        Ok(catalog.studies.values().find(|s| s.name == name).cloned())
    }

    fn resolve_sample_id(&self, study_id: StudyId, name: &str) -> Result<Option<SampleId>, MetadataError> {
        let catalog = self.catalog.read().map_err(|_| MetadataError::LockPoisoned)?;
        Ok(catalog
            .samples
            .values()
            .find(|s| s.study_id == study_id && s.name == name)
            .map(|s| s.id))
    }

    fn sample_metadata(
        &self,
        study_id: StudyId,
        sample_id: SampleId,
    ) -> Result<Option<SampleMetadata>, MetadataError> {
        let catalog = self.catalog.read().map_err(|_| MetadataError::LockPoisoned)?;
        Ok(catalog
            .samples
            .get(&sample_id)
            .filter(|s| s.study_id == study_id)
            .cloned())
    }

    fn samples(&self, study_id: StudyId) -> Result<Vec<SampleMetadata>, MetadataError> {
        let catalog = self.catalog.read().map_err(|_| MetadataError::LockPoisoned)?;
        Ok(catalog
            .samples
            .values()
            .filter(|s| s.study_id == study_id)
            .cloned()
            .collect())
    }

    fn file(&self, study_id: StudyId, file_id: FileId) -> Result<Option<FileMetadata>, MetadataError> {
        let catalog = self.catalog.read().map_err(|_| MetadataError::LockPoisoned)?;
        Ok(catalog
            .files
            .get(&file_id)
            .filter(|f| f.study_id == study_id)
            .cloned())
    }

    fn update_sample_metadata(
        &self,
        study_id: StudyId,
        sample_id: SampleId,
        merge: &mut dyn FnMut(&mut SampleMetadata),
    ) -> Result<(), MetadataError> {
        let mut catalog = self.catalog.write().map_err(|_| MetadataError::LockPoisoned)?;
        let sample = catalog
            .samples
            .get_mut(&sample_id)
            .filter(|s| s.study_id == study_id)
            .ok_or(MetadataError::SampleNotFound { study_id, sample_id })?;
        merge(sample);
        Ok(())
    }

    fn register_study(&self, name: &str) -> Result<StudyId, MetadataError> {
        let mut catalog = self.catalog.write().map_err(|_| MetadataError::LockPoisoned)?;
        if let Some(study) = catalog.studies.values().find(|s| s.name == name) {
            return Ok(study.id);
        }
        let id = catalog.studies.keys().next_back().map_or(1, |id| id + 1);
        catalog.studies.insert(
            id,
            StudyMetadata {
                id,
                name: name.to_string(),
            },
        );
        info!("Registered study '{}' as {}", name, id);
        Ok(id)
    }

    fn register_sample(&self, study_id: StudyId, name: &str) -> Result<SampleId, MetadataError> {
        let mut catalog = self.catalog.write().map_err(|_| MetadataError::LockPoisoned)?;
        if !catalog.studies.contains_key(&study_id) {
            return Err(MetadataError::StudyNotFound(study_id));
        }
        if let Some(sample) = catalog
            .samples
            .values()
            .find(|s| s.study_id == study_id && s.name == name)
        {
            return Ok(sample.id);
        }
        // Id 0 is reserved for "unknown parent" in pedigree strings
        let id = catalog.samples.keys().next_back().map_or(1, |id| id + 1);
        catalog.samples.insert(
            id,
            SampleMetadata {
                study_id,
                id,
                name: name.to_string(),
                father: None,
                mother: None,
                indexed: false,
                stats: None,
            },
        );
        debug!("Registered sample '{}' as {} in study {}", name, id, study_id);
        Ok(id)
    }

    fn register_file(
        &self,
        study_id: StudyId,
        name: &str,
        samples: &[SampleId],
    ) -> Result<FileId, MetadataError> {
        let mut catalog = self.catalog.write().map_err(|_| MetadataError::LockPoisoned)?;
        if !catalog.studies.contains_key(&study_id) {
            return Err(MetadataError::StudyNotFound(study_id));
        }
        if catalog
            .files
            .values()
            .any(|f| f.study_id == study_id && f.name == name)
        {
            return Err(MetadataError::FileAlreadyRegistered {
                study_id,
                name: name.to_string(),
            });
        }
        let id = catalog.files.keys().next_back().map_or(1, |id| id + 1);
        catalog.files.insert(
            id,
            FileMetadata {
                study_id,
                id,
                name: name.to_string(),
                samples: samples.to_vec(),
            },
        );
        Ok(id)
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS studies (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS samples (
    id INTEGER PRIMARY KEY,
    study_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    father INTEGER,
    mother INTEGER,
    indexed INTEGER NOT NULL DEFAULT 0,
    stats TEXT,
    UNIQUE (study_id, name)
);
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY,
    study_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    UNIQUE (study_id, name)
);
CREATE TABLE IF NOT EXISTS file_samples (
    file_id INTEGER NOT NULL,
    sample_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (file_id, position)
);
";

const SAMPLE_COLUMNS: &str = "study_id, id, name, father, mother, indexed, stats";

fn sample_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SampleMetadata> {
    let stats_json: Option<String> = row.get(6)?;
    let stats = stats_json
        .map(|json| serde_json::from_str::<SampleVariantStats>(&json))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e)))?;
    Ok(SampleMetadata {
        study_id: row.get(0)?,
        id: row.get(1)?,
        name: row.get(2)?,
        father: row.get(3)?,
        mother: row.get(4)?,
        indexed: row.get::<_, i64>(5)? != 0,
        stats,
    })
}

/// Catalog persisted in a SQLite database
pub struct SqliteMetadataManager {
    conn: Mutex<Connection>,
}

impl SqliteMetadataManager {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MetadataError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, MetadataError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn load_sample(
        conn: &Connection,
        study_id: StudyId,
        sample_id: SampleId,
    ) -> Result<Option<SampleMetadata>, MetadataError> {
        Ok(conn
            .query_row(
                &format!("SELECT {} FROM samples WHERE study_id = ?1 AND id = ?2", SAMPLE_COLUMNS),
                params![study_id, sample_id],
                sample_from_row,
            )
            .optional()?)
    }

    fn require_study(conn: &Connection, study_id: StudyId) -> Result<(), MetadataError> {
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM studies WHERE id = ?1", params![study_id], |r| r.get(0))
            .optional()?;
        exists.map(|_| ()).ok_or(MetadataError::StudyNotFound(study_id))
    }
}

impl MetadataManager for SqliteMetadataManager {
    fn study(&self, study_id: StudyId) -> Result<Option<StudyMetadata>, MetadataError> {
        let conn = self.conn.lock().map_err(|_| MetadataError::LockPoisoned)?;
        Ok(conn
            .query_row(
                "SELECT id, name FROM studies WHERE id = ?1",
                params![study_id],
                |r| Ok(StudyMetadata { id: r.get(0)?, name: r.get(1)? }),
            )
            .optional()?)
    }

    fn study_by_name(&self, name: &str) -> Result<Option<StudyMetadata>, MetadataError> {
        let conn = self.conn.lock().map_err(|_| MetadataError::LockPoisoned)?;
        Ok(conn
            .query_row(
                "SELECT id, name FROM studies WHERE name = ?1",
                params![name],
                |r| Ok(StudyMetadata { id: r.get(0)?, name: r.get(1)? }),
            )
            .optional()?)
    }

    fn resolve_sample_id(&self, study_id: StudyId, name: &str) -> Result<Option<SampleId>, MetadataError> {
        let conn = self.conn.lock().map_err(|_| MetadataError::LockPoisoned)?;
        Ok(conn
            .query_row(
                "SELECT id FROM samples WHERE study_id = ?1 AND name = ?2",
                params![study_id, name],
                |r| r.get(0),
            )
            .optional()?)
    }

    fn sample_metadata(
        &self,
        study_id: StudyId,
        sample_id: SampleId,
    ) -> Result<Option<SampleMetadata>, MetadataError> {
        let conn = self.conn.lock().map_err(|_| MetadataError::LockPoisoned)?;
        Self::load_sample(&conn, study_id, sample_id)
    }

    fn samples(&self, study_id: StudyId) -> Result<Vec<SampleMetadata>, MetadataError> {
        let conn = self.conn.lock().map_err(|_| MetadataError::LockPoisoned)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM samples WHERE study_id = ?1 ORDER BY id",
            SAMPLE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![study_id], sample_from_row)?;
        let mut samples = Vec::new();
        for sample in rows {
            samples.push(sample?);
        }
        Ok(samples)
    }

    fn file(&self, study_id: StudyId, file_id: FileId) -> Result<Option<FileMetadata>, MetadataError> {
        let conn = self.conn.lock().map_err(|_| MetadataError::LockPoisoned)?;
        let name: Option<String> = conn
            .query_row(
                "SELECT name FROM files WHERE study_id = ?1 AND id = ?2",
                params![study_id, file_id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(name) = name else {
            return Ok(None);
        };
        let mut stmt =
            conn.prepare("SELECT sample_id FROM file_samples WHERE file_id = ?1 ORDER BY position")?;
        let ids = stmt.query_map(params![file_id], |r| r.get::<_, SampleId>(0))?;
        let mut samples = Vec::new();
        for id in ids {
            samples.push(id?);
        }
        Ok(Some(FileMetadata {
            study_id,
            id: file_id,
            name,
            samples,
        }))
    }

    fn update_sample_metadata(
        &self,
        study_id: StudyId,
        sample_id: SampleId,
        merge: &mut dyn FnMut(&mut SampleMetadata),
    ) -> Result<(), MetadataError> {
        let mut conn = self.conn.lock().map_err(|_| MetadataError::LockPoisoned)?;
        let tx = conn.transaction()?;
        let mut sample = Self::load_sample(&tx, study_id, sample_id)?
            .ok_or(MetadataError::SampleNotFound { study_id, sample_id })?;
        merge(&mut sample);
        let stats_json = sample.stats.as_ref().map(serde_json::to_string).transpose()?;
        tx.execute(
            "UPDATE samples SET father = ?3, mother = ?4, indexed = ?5, stats = ?6
             WHERE study_id = ?1 AND id = ?2",
            params![
                study_id,
                sample_id,
                sample.father,
                sample.mother,
                sample.indexed as i64,
                stats_json
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn register_study(&self, name: &str) -> Result<StudyId, MetadataError> {
        let conn = self.conn.lock().map_err(|_| MetadataError::LockPoisoned)?;
        conn.execute("INSERT OR IGNORE INTO studies (name) VALUES (?1)", params![name])?;
        Ok(conn.query_row("SELECT id FROM studies WHERE name = ?1", params![name], |r| r.get(0))?)
    }

    fn register_sample(&self, study_id: StudyId, name: &str) -> Result<SampleId, MetadataError> {
        let conn = self.conn.lock().map_err(|_| MetadataError::LockPoisoned)?;
        Self::require_study(&conn, study_id)?;
        conn.execute(
            "INSERT OR IGNORE INTO samples (study_id, name) VALUES (?1, ?2)",
            params![study_id, name],
        )?;
        Ok(conn.query_row(
            "SELECT id FROM samples WHERE study_id = ?1 AND name = ?2",
            params![study_id, name],
            |r| r.get(0),
        )?)
    }

    fn register_file(
        &self,
        study_id: StudyId,
        name: &str,
        samples: &[SampleId],
    ) -> Result<FileId, MetadataError> {
        let mut conn = self.conn.lock().map_err(|_| MetadataError::LockPoisoned)?;
        Self::require_study(&conn, study_id)?;
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO files (study_id, name) VALUES (?1, ?2)",
            params![study_id, name],
        )?;
        if inserted == 0 {
            return Err(MetadataError::FileAlreadyRegistered {
                study_id,
                name: name.to_string(),
            });
        }
        let rowid = tx.last_insert_rowid();
        let file_id = FileId::try_from(rowid).map_err(|_| MetadataError::IdOutOfRange(rowid))?;
        for (position, sample) in samples.iter().enumerate() {
            tx.execute(
                "INSERT INTO file_samples (file_id, sample_id, position) VALUES (?1, ?2, ?3)",
                params![file_id, sample, position as i64],
            )?;
        }
        tx.commit()?;
        Ok(file_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise_catalog(catalog: &dyn MetadataManager) {
        let study = catalog.register_study("cohort").unwrap();
        assert_eq!(catalog.register_study("cohort").unwrap(), study);
        assert_eq!(catalog.study_by_name("cohort").unwrap().unwrap().id, study);

        let s1 = catalog.register_sample(study, "S1").unwrap();
        let s2 = catalog.register_sample(study, "S2").unwrap();
        assert_ne!(s1, 0);
        assert_eq!(catalog.register_sample(study, "S1").unwrap(), s1);
        assert_eq!(catalog.resolve_sample_id(study, "S2").unwrap(), Some(s2));
        assert_eq!(catalog.resolve_sample_id(study, "S3").unwrap(), None);

        let file = catalog.register_file(study, "a.vcf", &[s2, s1]).unwrap();
        assert_eq!(catalog.file_samples(study, file).unwrap(), vec![s2, s1]);
        assert!(matches!(
            catalog.register_file(study, "a.vcf", &[s1]),
            Err(MetadataError::FileAlreadyRegistered { .. })
        ));

        catalog
            .update_sample_metadata(study, s1, &mut |s| {
                s.indexed = true;
                s.father = Some(s2);
            })
            .unwrap();
        let meta = catalog.sample_metadata(study, s1).unwrap().unwrap();
        assert!(meta.indexed);
        assert_eq!(meta.father, Some(s2));
        assert_eq!(catalog.indexed_samples(study).unwrap().len(), 1);

        assert!(matches!(
            catalog.update_sample_metadata(study, 999, &mut |_| {}),
            Err(MetadataError::SampleNotFound { .. })
        ));
        assert!(matches!(
            catalog.register_sample(999, "X"),
            Err(MetadataError::StudyNotFound(999))
        ));
    }

    #[test]
    fn test_in_memory_catalog() {
        exercise_catalog(&InMemoryMetadataManager::new());
    }

    #[test]
    fn test_sqlite_catalog() {
        let dir = tempdir().unwrap();
        let catalog = SqliteMetadataManager::open(dir.path().join("meta.db")).unwrap();
        exercise_catalog(&catalog);
    }

    #[test]
    fn test_sqlite_file_id_overflow_is_reported() {
        let catalog = SqliteMetadataManager::open_in_memory().unwrap();
        let study = catalog.register_study("s").unwrap();
        catalog
            .conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO files (id, study_id, name) VALUES (?1, ?2, 'big.vcf')",
                params![i64::from(u32::MAX), study],
            )
            .unwrap();
        assert!(matches!(
            catalog.register_file(study, "next.vcf", &[]),
            Err(MetadataError::IdOutOfRange(id)) if id == i64::from(u32::MAX) + 1
        ));
    }

    #[test]
    fn test_sqlite_persists_stats() {
        let catalog = SqliteMetadataManager::open_in_memory().unwrap();
        let study = catalog.register_study("s").unwrap();
        let sample = catalog.register_sample(study, "S1").unwrap();
        let stats = SampleVariantStats::empty("S1");
        catalog
            .update_sample_metadata(study, sample, &mut |s| s.stats = Some(stats.clone()))
            .unwrap();
        let meta = catalog.sample_metadata(study, sample).unwrap().unwrap();
        assert_eq!(meta.stats, Some(stats));
    }
}
