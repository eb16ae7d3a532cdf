use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use pathway_core::{
    BundleIdentity, EvaluationReport, ModelBundle, PathwayError, RecommendationPackage,
    RecommendationRequest, Resource, ResourceId, ServingContext, SimilarResource, StudentProfile,
    TrainingSummary, MAPPING_TABLE_VERSION,
};
use pathway_store_sqlite::{catalog_digest, SqliteStore};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

mod catalog;
mod config;

pub use catalog::{parse_catalog, read_catalog, REQUIRED_COLUMNS};
pub use config::PathwayConfig;
pub use pathway_store_sqlite::{BundleRecord, CatalogImport, IntegrityReport, SchemaStatus};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainResult {
    pub bundle: BundleRecord,
    pub summary: TrainingSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelStatus {
    pub mapping_table_version: String,
    pub catalog_resources: usize,
    pub catalog_digest: Option<String>,
    pub latest_bundle: Option<BundleRecord>,
    pub training_report: Option<TrainingSummary>,
    /// Whether the latest bundle was trained on the catalog currently stored.
    pub catalog_matches_bundle: bool,
    pub bundle_count: usize,
}

#[derive(Debug, Clone)]
pub struct PathwayApi {
    db_path: PathBuf,
    config: PathwayConfig,
}

impl PathwayApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path, config: PathwayConfig::default() }
    }

    #[must_use]
    pub fn with_config(db_path: PathBuf, config: PathwayConfig) -> Self {
        Self { db_path, config }
    }

    #[must_use]
    pub fn config(&self) -> &PathwayConfig {
        &self.config
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.db_path)
    }

    fn open_migrated_store(&self) -> Result<SqliteStore> {
        let mut store = self.open_store()?;
        store.migrate()?;
        Ok(store)
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = self.open_store()?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = self.open_store()?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                inferred_from_legacy: before.inferred_from_legacy,
                after_version: None,
                up_to_date: None,
            });
        }

        let planned_versions = before.pending_versions;
        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: planned_versions,
            inferred_from_legacy: before.inferred_from_legacy,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// Run `SQLite` integrity checks.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or checked.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        self.open_store()?.integrity_check()
    }

    /// Copy the database to `out_file`.
    ///
    /// # Errors
    /// Returns an error when the backup cannot be written.
    pub fn backup(&self, out_file: &Path) -> Result<()> {
        self.open_store()?.backup_database(out_file)
    }

    /// Replace the stored catalog with the rows of a CSV file.
    ///
    /// # Errors
    /// Returns an error when the CSV is malformed, any row fails validation, or
    /// persistence fails. Nothing is written unless every row is accepted.
    pub fn import_catalog(&self, csv_path: &Path) -> Result<CatalogImport> {
        let resources = read_catalog(csv_path)?;
        if resources.is_empty() {
            return Err(PathwayError::Schema(format!(
                "catalog {} has no resource rows",
                csv_path.display()
            ))
            .into());
        }
        let mut store = self.open_migrated_store()?;
        store.replace_catalog(&resources, &csv_path.display().to_string())
    }

    /// Stored catalog rows in id order, optionally truncated.
    ///
    /// # Errors
    /// Returns an error when the catalog cannot be read.
    pub fn list_resources(&self, limit: Option<usize>) -> Result<Vec<Resource>> {
        let store = self.open_migrated_store()?;
        let mut resources = store.list_resources()?;
        if let Some(limit) = limit {
            resources.truncate(limit);
        }
        Ok(resources)
    }

    /// Train a new bundle on the stored catalog and persist it with its report.
    ///
    /// # Errors
    /// Returns an error when the catalog is empty, any dimension misses the
    /// clustering quality floor, or persistence fails.
    pub fn train(&self) -> Result<TrainResult> {
        let mut store = self.open_migrated_store()?;
        let resources = store.list_resources()?;
        if resources.is_empty() {
            return Err(anyhow!("catalog is empty; import a catalog before training"));
        }

        let identity = BundleIdentity {
            bundle_id: ulid::Ulid::new().to_string(),
            catalog_digest: catalog_digest(&resources)?,
            trained_at: OffsetDateTime::now_utc(),
        };
        tracing::info!(
            bundle_id = identity.bundle_id.as_str(),
            resources = resources.len(),
            "training model bundle"
        );
        let bundle = ModelBundle::train(&resources, &self.config.training, identity)
            .context("model training failed")?;
        let record = store.save_bundle(&bundle)?;
        Ok(TrainResult { bundle: record, summary: bundle.summary() })
    }

    /// Describe the stored catalog and the latest bundle.
    ///
    /// # Errors
    /// Returns an error when store reads fail.
    pub fn model_status(&self) -> Result<ModelStatus> {
        let store = self.open_migrated_store()?;
        let resources = store.list_resources()?;
        let digest = if resources.is_empty() { None } else { Some(catalog_digest(&resources)?) };
        let bundles = store.list_bundles()?;
        let latest_bundle = bundles.first().cloned();
        let training_report = match &latest_bundle {
            Some(record) => store.training_report(&record.bundle_id)?,
            None => None,
        };
        let catalog_matches_bundle = match (&latest_bundle, &digest) {
            (Some(record), Some(digest)) => record.catalog_digest == *digest,
            _ => false,
        };

        Ok(ModelStatus {
            mapping_table_version: MAPPING_TABLE_VERSION.to_string(),
            catalog_resources: resources.len(),
            catalog_digest: digest,
            latest_bundle,
            training_report,
            catalog_matches_bundle,
            bundle_count: bundles.len(),
        })
    }

    /// Bind the stored catalog to the latest bundle for serving.
    ///
    /// # Errors
    /// Returns an error when no bundle exists, the bundle fails its integrity or
    /// version checks, or it was trained on a different catalog.
    pub fn load_serving_context(&self) -> Result<ServingContext> {
        let store = self.open_migrated_store()?;
        let bundle = store
            .latest_bundle()?
            .ok_or_else(|| anyhow!("no trained model bundle found; run model training first"))?;
        let resources = store.list_resources()?;
        let digest = catalog_digest(&resources)?;
        if digest != bundle.metadata.catalog_digest {
            return Err(PathwayError::Schema(format!(
                "bundle {} was trained on catalog {}, stored catalog is {digest}",
                bundle.metadata.bundle_id, bundle.metadata.catalog_digest
            ))
            .into());
        }

        let context = ServingContext::new(resources, bundle, self.config.engine.clone())?;
        Ok(context)
    }

    /// One-shot recommendation: load the serving context and answer a single request.
    ///
    /// # Errors
    /// Returns an error when the context cannot be loaded or the request is invalid.
    pub fn recommend(&self, request: &RecommendationRequest) -> Result<RecommendationPackage> {
        let context = self.load_serving_context()?;
        let package = context.recommend(request)?;
        Ok(package)
    }

    /// Catalog neighbours of one resource under the latest bundle's text index.
    ///
    /// # Errors
    /// Returns an error when the context cannot be loaded, the id is unknown, or
    /// `limit` is out of range.
    pub fn similar_resources(
        &self,
        resource_id: ResourceId,
        limit: usize,
    ) -> Result<Vec<SimilarResource>> {
        let context = self.load_serving_context()?;
        Ok(context.similar_resources(resource_id, limit)?)
    }

    /// Score the latest bundle's recommendations over a batch of profiles.
    ///
    /// # Errors
    /// Returns an error when the context cannot be loaded or any profile is invalid.
    pub fn evaluate(
        &self,
        profiles: &[StudentProfile],
        top_n: Option<usize>,
    ) -> Result<EvaluationReport> {
        let context = self.load_serving_context()?;
        let report = context
            .evaluate(profiles, top_n)
            .with_context(|| format!("failed to evaluate {} profiles", profiles.len()))?;
        Ok(report)
    }
}
