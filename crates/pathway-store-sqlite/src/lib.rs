use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use pathway_core::{ModelBundle, Resource, ResourceId, TrainingSummary, MAPPING_TABLE_VERSION};
use rusqlite::{params, Connection, DatabaseName, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS resources (
  resource_id INTEGER PRIMARY KEY CHECK (resource_id >= 0),
  name TEXT NOT NULL,
  primary_subject TEXT NOT NULL,
  category_tier1 TEXT NOT NULL,
  resource_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS catalog_imports (
  import_id INTEGER PRIMARY KEY AUTOINCREMENT,
  source TEXT NOT NULL,
  catalog_digest TEXT NOT NULL,
  resource_count INTEGER NOT NULL CHECK (resource_count >= 0),
  imported_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS model_bundles (
  bundle_id TEXT PRIMARY KEY,
  mapping_table_version TEXT NOT NULL,
  bundle_format_version TEXT NOT NULL,
  catalog_digest TEXT NOT NULL,
  resource_count INTEGER NOT NULL CHECK (resource_count >= 0),
  trained_at TEXT NOT NULL,
  payload_sha256 TEXT NOT NULL,
  payload_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_resources_subject ON resources(primary_subject);
CREATE INDEX IF NOT EXISTS idx_model_bundles_trained_at ON model_bundles(trained_at);
";

const MIGRATION_002_SQL: &str = r"
CREATE TABLE IF NOT EXISTS training_reports (
  bundle_id TEXT PRIMARY KEY,
  summary_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  FOREIGN KEY (bundle_id) REFERENCES model_bundles(bundle_id)
);
";

pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogImport {
    pub source: String,
    pub catalog_digest: String,
    pub resource_count: usize,
    pub imported_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BundleRecord {
    pub bundle_id: String,
    pub mapping_table_version: String,
    pub bundle_format_version: String,
    pub catalog_digest: String,
    pub resource_count: usize,
    pub trained_at: String,
    pub payload_sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

impl SqliteStore {
    /// Open a SQLite-backed catalog and model store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version < 2 {
            let tx = self.conn.transaction().context("failed to start migration v2 transaction")?;
            tx.execute_batch(MIGRATION_002_SQL).context("failed to apply migration v2")?;
            record_schema_version(&tx, 2)?;
            tx.commit().context("failed to commit migration v2")?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn bootstrap_schema_version(&mut self) -> Result<i64> {
        if table_exists(&self.conn, "training_reports")? {
            // Tables already in v2 shape but missing migration records.
            record_schema_version(&self.conn, 1)?;
            record_schema_version(&self.conn, 2)?;
            return Ok(2);
        }

        if table_exists(&self.conn, "resources")? {
            if !table_has_column(&self.conn, "resources", "resource_json")? {
                return Err(anyhow!(
                    "database schema is invalid: resources has no resource_json column"
                ));
            }
            record_schema_version(&self.conn, 1)?;
            return Ok(1);
        }

        let tx = self.conn.transaction().context("failed to start migration v1 transaction")?;
        tx.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
        record_schema_version(&tx, 1)?;
        tx.commit().context("failed to commit migration v1")?;
        Ok(1)
    }

    /// Replace the stored catalog with `resources` in one transaction.
    ///
    /// # Errors
    /// Returns an error when a resource fails validation or any write fails.
    pub fn replace_catalog(
        &mut self,
        resources: &[Resource],
        source: &str,
    ) -> Result<CatalogImport> {
        for resource in resources {
            resource.validate().map_err(|err| anyhow!("resource validation failed: {err}"))?;
        }
        let catalog_digest = catalog_digest(resources)?;
        let imported_at = now_rfc3339()?;

        let tx = self.conn.transaction().context("failed to start catalog transaction")?;
        tx.execute("DELETE FROM resources", []).context("failed to clear resources")?;
        for resource in resources {
            tx.execute(
                "INSERT INTO resources(
                    resource_id, name, primary_subject, category_tier1, resource_json
                ) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    resource.resource_id.0,
                    resource.name,
                    resource.primary_subject(),
                    resource.category.tier1,
                    serde_json::to_string(resource).context("failed to serialize resource")?,
                ],
            )
            .with_context(|| format!("failed to insert resource {}", resource.resource_id))?;
        }
        tx.execute(
            "INSERT INTO catalog_imports(source, catalog_digest, resource_count, imported_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![source, catalog_digest, to_i64(resources.len())?, imported_at],
        )
        .context("failed to record catalog import")?;
        tx.commit().context("failed to commit catalog transaction")?;

        tracing::info!(resources = resources.len(), source, "catalog replaced");
        Ok(CatalogImport {
            source: source.to_string(),
            catalog_digest,
            resource_count: resources.len(),
            imported_at,
        })
    }

    /// Load every stored resource in ascending id order.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read or decoded from `SQLite`.
    pub fn list_resources(&self) -> Result<Vec<Resource>> {
        let mut stmt = self
            .conn
            .prepare("SELECT resource_id, resource_json FROM resources ORDER BY resource_id ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;

        let mut resources = Vec::new();
        for row in rows {
            let (resource_id, json) = row?;
            let resource: Resource = serde_json::from_str(&json)
                .with_context(|| format!("failed to decode stored resource {resource_id}"))?;
            if i64::from(resource.resource_id.0) != resource_id {
                return Err(anyhow!(
                    "stored resource {resource_id} carries mismatched id {}",
                    resource.resource_id
                ));
            }
            resources.push(resource);
        }
        Ok(resources)
    }

    /// Fetch one stored resource.
    ///
    /// # Errors
    /// Returns an error when lookup or JSON decoding fails.
    pub fn get_resource(&self, resource_id: ResourceId) -> Result<Option<Resource>> {
        let json = self
            .conn
            .query_row(
                "SELECT resource_json FROM resources WHERE resource_id = ?1",
                params![resource_id.0],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        json.map(|json| {
            serde_json::from_str(&json)
                .with_context(|| format!("failed to decode stored resource {resource_id}"))
        })
        .transpose()
    }

    /// Most recent catalog import, if any.
    ///
    /// # Errors
    /// Returns an error when the import log cannot be read.
    pub fn latest_import(&self) -> Result<Option<CatalogImport>> {
        let row = self
            .conn
            .query_row(
                "SELECT source, catalog_digest, resource_count, imported_at
                 FROM catalog_imports
                 ORDER BY import_id DESC
                 LIMIT 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()
            .context("failed to read catalog import log")?;

        row.map(|(source, catalog_digest, resource_count, imported_at)| {
            Ok(CatalogImport {
                source,
                catalog_digest,
                resource_count: to_usize(resource_count)?,
                imported_at,
            })
        })
        .transpose()
    }

    /// Persist a trained bundle together with its training report.
    ///
    /// # Errors
    /// Returns an error when serialization or transaction writes fail.
    pub fn save_bundle(&mut self, bundle: &ModelBundle) -> Result<BundleRecord> {
        let payload_json = serde_json::to_string(bundle).context("failed to serialize bundle")?;
        let payload_sha256 = sha256_hex(payload_json.as_bytes());
        let summary_json =
            serde_json::to_string(&bundle.summary()).context("failed to serialize summary")?;
        let metadata = &bundle.metadata;
        let record = BundleRecord {
            bundle_id: metadata.bundle_id.clone(),
            mapping_table_version: metadata.mapping_table_version.clone(),
            bundle_format_version: metadata.bundle_format_version.clone(),
            catalog_digest: metadata.catalog_digest.clone(),
            resource_count: metadata.resource_count,
            trained_at: rfc3339(metadata.trained_at)?,
            payload_sha256,
        };

        let tx = self.conn.transaction().context("failed to start bundle transaction")?;
        tx.execute(
            "INSERT INTO model_bundles(
                bundle_id, mapping_table_version, bundle_format_version, catalog_digest,
                resource_count, trained_at, payload_sha256, payload_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.bundle_id,
                record.mapping_table_version,
                record.bundle_format_version,
                record.catalog_digest,
                to_i64(record.resource_count)?,
                record.trained_at,
                record.payload_sha256,
                payload_json,
            ],
        )
        .context("failed to persist model bundle")?;
        tx.execute(
            "INSERT INTO training_reports(bundle_id, summary_json, created_at)
             VALUES (?1, ?2, ?3)",
            params![record.bundle_id, summary_json, now_rfc3339()?],
        )
        .context("failed to persist training report")?;
        tx.commit().context("failed to commit bundle transaction")?;

        tracing::info!(bundle_id = record.bundle_id.as_str(), "model bundle saved");
        Ok(record)
    }

    /// Stored bundle rows, newest first.
    ///
    /// # Errors
    /// Returns an error when rows cannot be read.
    pub fn list_bundles(&self) -> Result<Vec<BundleRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT bundle_id, mapping_table_version, bundle_format_version, catalog_digest,
                    resource_count, trained_at, payload_sha256
             FROM model_bundles
             ORDER BY trained_at DESC, bundle_id DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut bundles = Vec::new();
        for row in rows {
            let (
                bundle_id,
                mapping_table_version,
                bundle_format_version,
                catalog_digest,
                resource_count,
                trained_at,
                payload_sha256,
            ) = row?;
            bundles.push(BundleRecord {
                bundle_id,
                mapping_table_version,
                bundle_format_version,
                catalog_digest,
                resource_count: to_usize(resource_count)?,
                trained_at,
                payload_sha256,
            });
        }
        Ok(bundles)
    }

    /// Load the newest bundle, verifying its payload digest and mapping-table version.
    ///
    /// # Errors
    /// Returns an error when the payload was altered, was produced under another
    /// mapping table, or cannot be decoded.
    pub fn latest_bundle(&self) -> Result<Option<ModelBundle>> {
        let bundle_id = self
            .conn
            .query_row(
                "SELECT bundle_id FROM model_bundles
                 ORDER BY trained_at DESC, bundle_id DESC
                 LIMIT 1",
                [],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .context("failed to look up latest bundle")?;
        match bundle_id {
            Some(bundle_id) => self.get_bundle(&bundle_id),
            None => Ok(None),
        }
    }

    /// Load one bundle by id with the same checks as [`Self::latest_bundle`].
    ///
    /// # Errors
    /// Returns an error when verification or decoding fails.
    pub fn get_bundle(&self, bundle_id: &str) -> Result<Option<ModelBundle>> {
        let row = self
            .conn
            .query_row(
                "SELECT mapping_table_version, payload_sha256, payload_json
                 FROM model_bundles WHERE bundle_id = ?1",
                params![bundle_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("failed to read bundle {bundle_id}"))?;
        let Some((mapping_table_version, payload_sha256, payload_json)) = row else {
            return Ok(None);
        };

        if mapping_table_version != MAPPING_TABLE_VERSION {
            return Err(anyhow!(
                "bundle {bundle_id} uses mapping table {mapping_table_version}, \
                 expected {MAPPING_TABLE_VERSION}"
            ));
        }
        let actual = sha256_hex(payload_json.as_bytes());
        if actual != payload_sha256 {
            return Err(anyhow!(
                "bundle {bundle_id} payload digest mismatch: \
                 expected {payload_sha256}, got {actual}"
            ));
        }

        let bundle: ModelBundle = serde_json::from_str(&payload_json)
            .with_context(|| format!("failed to decode bundle {bundle_id}"))?;
        bundle.check_versions().map_err(|err| anyhow!("bundle {bundle_id} rejected: {err}"))?;
        Ok(Some(bundle))
    }

    /// Training report stored alongside a bundle.
    ///
    /// # Errors
    /// Returns an error when lookup or JSON decoding fails.
    pub fn training_report(&self, bundle_id: &str) -> Result<Option<TrainingSummary>> {
        let json = self
            .conn
            .query_row(
                "SELECT summary_json FROM training_reports WHERE bundle_id = ?1",
                params![bundle_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        json.map(|json| {
            serde_json::from_str(&json)
                .with_context(|| format!("failed to decode training report for {bundle_id}"))
        })
        .transpose()
    }

    /// Create a `SQLite` backup file of the current main database.
    ///
    /// # Errors
    /// Returns an error when backup directories cannot be created or backup fails.
    pub fn backup_database(&self, out_file: &Path) -> Result<()> {
        if let Some(parent) = out_file.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory for backup file {}", out_file.display())
            })?;
        }

        self.conn
            .backup(DatabaseName::Main, out_file, None)
            .with_context(|| format!("failed to create sqlite backup at {}", out_file.display()))
    }

    /// Run quick-check, foreign-key-check, and schema status health checks.
    ///
    /// # Errors
    /// Returns an error when any integrity check query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }
}

/// Stable digest of a catalog: sha256 over the JSON of its resources in id order.
///
/// # Errors
/// Returns an error when a resource cannot be serialized.
pub fn catalog_digest(resources: &[Resource]) -> Result<String> {
    let mut ordered = resources.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|resource| resource.resource_id);
    let mut hasher = Sha256::new();
    for resource in ordered {
        let json = serde_json::to_vec(resource).context("failed to serialize resource")?;
        hasher.update(&json);
        hasher.update(b"\n");
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if table_exists(conn, "training_reports")? {
        return Ok((2, true));
    }

    if table_exists(conn, "resources")? {
        return Ok((1, true));
    }

    Ok((0, false))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    rfc3339(OffsetDateTime::now_utc())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn to_i64(value: usize) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("count {value} exceeds sqlite integer range"))
}

fn to_usize(value: i64) -> Result<usize> {
    usize::try_from(value).with_context(|| format!("stored count {value} is negative"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pathway_core::{
        AcademicAttributes, AccessibilityAttributes, BundleIdentity, Category, Connectivity,
        CostCategory, DeliveryMode, DimensionMap, FinancialBarrier, FormatAttributes, GradeRange,
        HiddenCosts, KRange, Predicted, PrerequisiteLevel, StructureType, SubjectTag,
        SupportLevel, TrainingConfig, Transportation,
    };
    use ulid::Ulid;

    const SUBJECTS: [(&str, &str); 3] = [
        ("Biology", "Research Program"),
        ("Engineering", "Competition"),
        ("Mathematics", "Online Course"),
    ];

    fn mk_resource(
        id: u32,
        subject: &str,
        category: &str,
        premium: bool,
        advanced: bool,
    ) -> Resource {
        Resource {
            resource_id: ResourceId(id),
            name: format!("{subject} opportunity {id}"),
            description: format!("{subject} {category} for curious students"),
            url: format!("https://example.org/{id}"),
            category: Category { tier1: category.to_string(), tier2: "General".to_string() },
            subjects: vec![SubjectTag { tier1: subject.to_string(), tier2: None }],
            accessibility: AccessibilityAttributes {
                financial_barrier: Predicted::observed(if premium {
                    FinancialBarrier::Prohibitive
                } else {
                    FinancialBarrier::Low
                }),
                hidden_costs: Predicted::observed(HiddenCosts::None),
                cost_category: Some(if premium {
                    CostCategory::HighCost
                } else {
                    CostCategory::Free
                }),
                delivery_mode: Some(DeliveryMode::Virtual),
                transportation: Some(Transportation::No),
                connectivity: Predicted::observed(Connectivity::Medium),
                rural_accessible: Some(!premium),
            },
            academic: AcademicAttributes {
                prerequisite: Some(if advanced {
                    PrerequisiteLevel::Advanced
                } else {
                    PrerequisiteLevel::Beginner
                }),
                target_grade: Some(GradeRange { min: 9.0, max: 12.0 }),
                weekly_hours: Some(if advanced { 10.0 } else { 2.0 }),
            },
            format: FormatAttributes {
                support_level: Some(SupportLevel::Medium),
                structure_type: Some(StructureType::Flexible),
            },
            search_text: None,
        }
    }

    fn mk_catalog() -> Vec<Resource> {
        let mut resources = Vec::new();
        let mut id = 1;
        for (subject, category) in SUBJECTS {
            for premium in [false, true] {
                for advanced in [false, true] {
                    resources.push(mk_resource(id, subject, category, premium, advanced));
                    id += 1;
                }
            }
        }
        resources
    }

    fn mk_bundle(
        resources: &[Resource],
        bundle_id: &str,
        trained_at: OffsetDateTime,
    ) -> Result<ModelBundle> {
        let range = KRange::new(2, 4);
        let config = TrainingConfig {
            n_init: 2,
            k_ranges: DimensionMap {
                accessibility: range,
                academic: range,
                subject_focus: range,
                format: range,
            },
            ..TrainingConfig::default()
        };
        let identity = BundleIdentity {
            bundle_id: bundle_id.to_string(),
            catalog_digest: catalog_digest(resources)?,
            trained_at,
        };
        ModelBundle::train(resources, &config, identity).map_err(|err| anyhow!("{err}"))
    }

    fn migrated_store() -> Result<SqliteStore> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    // Test IDs: TDB-001
    #[test]
    fn fresh_database_reports_pending_then_migrates() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        let status = store.schema_status()?;
        assert_eq!(status.current_version, 0);
        assert_eq!(status.pending_versions, vec![1, 2]);
        assert!(!status.inferred_from_legacy);

        store.migrate()?;
        let status = store.schema_status()?;
        assert_eq!(status.current_version, LATEST_SCHEMA_VERSION);
        assert!(status.pending_versions.is_empty());

        store.migrate()?;
        assert_eq!(store.schema_status()?.current_version, LATEST_SCHEMA_VERSION);
        Ok(())
    }

    // Test IDs: TDB-002
    #[test]
    fn legacy_catalog_tables_are_inferred_and_upgraded() -> Result<()> {
        let mut store = SqliteStore::open(Path::new(":memory:"))?;
        store.conn.execute_batch(MIGRATION_001_SQL)?;

        let status = store.schema_status()?;
        assert_eq!(status.current_version, 1);
        assert!(status.inferred_from_legacy);
        assert_eq!(status.pending_versions, vec![2]);

        store.migrate()?;
        assert!(table_exists(&store.conn, "training_reports")?);
        let status = store.schema_status()?;
        assert_eq!(status.current_version, 2);
        assert!(!status.inferred_from_legacy);
        Ok(())
    }

    // Test IDs: TDB-003
    #[test]
    fn catalog_round_trips_and_replaces_previous_rows() -> Result<()> {
        let mut store = migrated_store()?;
        let catalog = mk_catalog();
        let import = store.replace_catalog(&catalog, "catalog.csv")?;
        assert_eq!(import.resource_count, 12);
        assert_eq!(import.catalog_digest, catalog_digest(&catalog)?);
        assert_eq!(store.list_resources()?, catalog);
        assert_eq!(store.get_resource(ResourceId(3))?, Some(catalog[2].clone()));
        assert_eq!(store.get_resource(ResourceId(99))?, None);

        let smaller = catalog[..4].to_vec();
        store.replace_catalog(&smaller, "smaller.csv")?;
        assert_eq!(store.list_resources()?.len(), 4);
        let latest = store.latest_import()?.ok_or_else(|| anyhow!("import should be logged"))?;
        assert_eq!(latest.source, "smaller.csv");
        Ok(())
    }

    // Test IDs: TDB-004
    #[test]
    fn invalid_resources_are_rejected_before_any_write() -> Result<()> {
        let mut store = migrated_store()?;
        let mut catalog = mk_catalog();
        catalog[5].name = "  ".to_string();
        let err = match store.replace_catalog(&catalog, "bad.csv") {
            Ok(_) => return Err(anyhow!("blank name should be rejected")),
            Err(err) => err,
        };
        assert!(err.to_string().contains("name MUST be non-empty"));
        assert!(store.list_resources()?.is_empty());
        Ok(())
    }

    #[test]
    fn catalog_digest_ignores_input_order() -> Result<()> {
        let catalog = mk_catalog();
        let mut reversed = catalog.clone();
        reversed.reverse();
        assert_eq!(catalog_digest(&catalog)?, catalog_digest(&reversed)?);

        let mut edited = catalog.clone();
        edited[0].description.push('!');
        assert_ne!(catalog_digest(&catalog)?, catalog_digest(&edited)?);
        Ok(())
    }

    // Test IDs: TDB-005
    #[test]
    fn bundles_round_trip_with_training_reports() -> Result<()> {
        let mut store = migrated_store()?;
        let catalog = mk_catalog();
        let older = mk_bundle(&catalog, "bundle-a", OffsetDateTime::UNIX_EPOCH)?;
        let newer = mk_bundle(
            &catalog,
            "bundle-b",
            OffsetDateTime::UNIX_EPOCH + time::Duration::days(1),
        )?;
        store.save_bundle(&older)?;
        let record = store.save_bundle(&newer)?;
        assert_eq!(record.mapping_table_version, MAPPING_TABLE_VERSION);
        assert_eq!(record.payload_sha256.len(), 64);

        let latest = store.latest_bundle()?.ok_or_else(|| anyhow!("bundle should load"))?;
        assert_eq!(latest.metadata.bundle_id, "bundle-b");
        assert_eq!(latest.indexes, newer.indexes);

        let listed = store.list_bundles()?;
        assert_eq!(
            listed.iter().map(|bundle| bundle.bundle_id.as_str()).collect::<Vec<_>>(),
            vec!["bundle-b", "bundle-a"]
        );
        let report =
            store.training_report("bundle-a")?.ok_or_else(|| anyhow!("report should exist"))?;
        assert_eq!(report, older.summary());
        assert!(store.get_bundle("missing")?.is_none());
        Ok(())
    }

    // Test IDs: TDB-006
    #[test]
    fn tampered_or_foreign_bundles_are_refused() -> Result<()> {
        let mut store = migrated_store()?;
        let catalog = mk_catalog();
        store.save_bundle(&mk_bundle(&catalog, "bundle-a", OffsetDateTime::UNIX_EPOCH)?)?;

        store.conn.execute(
            "UPDATE model_bundles SET payload_json = replace(payload_json, 'bundle-a', 'bundle-z')",
            [],
        )?;
        let err = match store.latest_bundle() {
            Ok(_) => return Err(anyhow!("tampered payload should be rejected")),
            Err(err) => err,
        };
        assert!(err.to_string().contains("digest mismatch"));

        store.conn.execute("UPDATE model_bundles SET mapping_table_version = 'mapping.v0'", [])?;
        let err = match store.get_bundle("bundle-a") {
            Ok(_) => return Err(anyhow!("foreign mapping table should be rejected")),
            Err(err) => err,
        };
        assert!(err.to_string().contains("mapping table"));
        Ok(())
    }

    // Test IDs: TDB-007
    #[test]
    fn integrity_check_reports_clean_database() -> Result<()> {
        let store = migrated_store()?;
        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert!(report.foreign_key_violations.is_empty());
        assert_eq!(report.schema_status.current_version, 2);
        Ok(())
    }

    // Test IDs: TDB-008
    #[test]
    fn file_backed_store_persists_and_backs_up() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("pathway-store-{}", Ulid::new()));
        fs::create_dir_all(&dir)?;
        let db_path = dir.join("pathway.sqlite3");
        {
            let mut store = SqliteStore::open(&db_path)?;
            store.migrate()?;
            store.replace_catalog(&mk_catalog(), "catalog.csv")?;
            store.backup_database(&dir.join("backup").join("copy.sqlite3"))?;
        }

        let reopened = SqliteStore::open(&db_path)?;
        assert_eq!(reopened.list_resources()?.len(), 12);
        let backup = SqliteStore::open(&dir.join("backup").join("copy.sqlite3"))?;
        assert_eq!(backup.list_resources()?.len(), 12);

        let _ = fs::remove_dir_all(&dir);
        Ok(())
    }
}
