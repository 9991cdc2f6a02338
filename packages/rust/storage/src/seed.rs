//! Region catalog seeding.
//!
//! The bundled catalog holds the 50 US states with sample counties for a
//! handful of them. Operators can import fuller catalogs from JSON files in
//! the same shape:
//!
//! ```json
//! [{"name": "Delaware", "code": "DE",
//!   "sub_regions": [{"name": "Kent", "external_id": "10001", "population": 181851}]}]
//! ```

use std::collections::HashSet;
use std::path::Path;

use prospector_shared::{ProspectorError, Result};
use serde::Deserialize;
use tracing::{info, instrument};

use crate::Storage;

const BUNDLED_CATALOG: &str = include_str!("../data/us_catalog.json");

/// A region entry in a catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogRegion {
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub sub_regions: Vec<CatalogSubRegion>,
}

/// A sub-region entry in a catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSubRegion {
    pub name: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub population: Option<i64>,
}

/// What a seeding pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedStats {
    pub regions_added: usize,
    pub sub_regions_added: usize,
    pub sub_regions_skipped: usize,
}

/// The catalog compiled into the binary.
pub fn bundled_catalog() -> Result<Vec<CatalogRegion>> {
    serde_json::from_str(BUNDLED_CATALOG)
        .map_err(|e| ProspectorError::parse(format!("bundled catalog: {e}")))
}

/// Read a catalog from a JSON file.
pub fn load_catalog_file(path: &Path) -> Result<Vec<CatalogRegion>> {
    let content = std::fs::read_to_string(path).map_err(|e| ProspectorError::io(path, e))?;
    let catalog: Vec<CatalogRegion> = serde_json::from_str(&content)
        .map_err(|e| ProspectorError::parse(format!("{}: {e}", path.display())))?;

    for region in &catalog {
        if region.code.trim().is_empty() || region.name.trim().is_empty() {
            return Err(ProspectorError::validation(format!(
                "{}: every region needs a name and a code",
                path.display()
            )));
        }
    }
    Ok(catalog)
}

impl Storage {
    /// Merge `catalog` into the database.
    ///
    /// Regions are matched by code and sub-regions by name within their
    /// region; existing rows are left untouched, so re-running a seed is a
    /// no-op.
    #[instrument(skip_all, fields(regions = catalog.len()))]
    pub async fn seed_catalog(&self, catalog: &[CatalogRegion]) -> Result<SeedStats> {
        self.check_writable()?;
        let mut stats = SeedStats::default();

        for entry in catalog {
            let region_id = match self.get_region_by_code(&entry.code).await? {
                Some(region) => region.id,
                None => {
                    stats.regions_added += 1;
                    self.insert_region(&entry.name, &entry.code.to_uppercase())
                        .await?
                }
            };

            let existing: HashSet<String> = self
                .list_sub_regions(region_id)
                .await?
                .into_iter()
                .map(|s| s.name)
                .collect();

            for sub in &entry.sub_regions {
                if existing.contains(&sub.name) {
                    stats.sub_regions_skipped += 1;
                    continue;
                }
                self.insert_sub_region(
                    region_id,
                    &sub.name,
                    sub.external_id.as_deref(),
                    sub.population,
                )
                .await?;
                stats.sub_regions_added += 1;
            }
        }

        info!(
            regions_added = stats.regions_added,
            sub_regions_added = stats.sub_regions_added,
            "catalog seeded"
        );
        Ok(stats)
    }

    /// Load the bundled catalog if the database has no regions yet.
    ///
    /// Returns `None` when the catalog was already populated.
    pub async fn ensure_seeded(&self) -> Result<Option<SeedStats>> {
        if self.count_regions().await? > 0 {
            return Ok(None);
        }
        let catalog = bundled_catalog()?;
        self.seed_catalog(&catalog).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::test_storage;

    #[test]
    fn bundled_catalog_has_all_states() {
        let catalog = bundled_catalog().unwrap();
        assert_eq!(catalog.len(), 50);

        let de = catalog.iter().find(|r| r.code == "DE").unwrap();
        let names: Vec<&str> = de.sub_regions.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["New Castle", "Kent", "Sussex"]);

        for code in ["CA", "TX", "FL", "NY"] {
            let region = catalog.iter().find(|r| r.code == code).unwrap();
            assert!(!region.sub_regions.is_empty(), "{code} has sample counties");
        }
    }

    #[tokio::test]
    async fn ensure_seeded_runs_once() {
        let storage = test_storage().await;
        let stats = storage.ensure_seeded().await.unwrap().expect("first seed");
        assert_eq!(stats.regions_added, 50);
        assert_eq!(stats.sub_regions_added, 27);

        assert!(storage.ensure_seeded().await.unwrap().is_none());
        assert_eq!(storage.count_regions().await.unwrap(), 50);

        let de = storage.get_region_by_code("DE").await.unwrap().unwrap();
        let units = storage.list_sub_regions(de.id).await.unwrap();
        let names: Vec<&str> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["Kent", "New Castle", "Sussex"]);
        assert_eq!(units[0].external_id.as_deref(), Some("10001"));
    }

    #[tokio::test]
    async fn seed_merges_into_existing_regions() {
        let storage = test_storage().await;
        storage.insert_region("Delaware", "DE").await.unwrap();

        let catalog: Vec<CatalogRegion> = serde_json::from_str(
            r#"[{"name": "Delaware", "code": "de",
                 "sub_regions": [{"name": "Kent"}, {"name": "Sussex", "population": 237378}]}]"#,
        )
        .unwrap();

        let first = storage.seed_catalog(&catalog).await.unwrap();
        assert_eq!(first.regions_added, 0);
        assert_eq!(first.sub_regions_added, 2);

        let second = storage.seed_catalog(&catalog).await.unwrap();
        assert_eq!(second.sub_regions_added, 0);
        assert_eq!(second.sub_regions_skipped, 2);
    }

    #[test]
    fn load_catalog_file_validates_entries() {
        let dir = std::env::temp_dir().join(format!("prospector_seed_{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();

        let good = dir.join("good.json");
        std::fs::write(
            &good,
            r#"[{"name": "Rhode Island", "code": "RI", "sub_regions": [{"name": "Bristol", "external_id": "44001"}]}]"#,
        )
        .unwrap();
        let catalog = load_catalog_file(&good).unwrap();
        assert_eq!(catalog[0].sub_regions[0].external_id.as_deref(), Some("44001"));

        let bad = dir.join("bad.json");
        std::fs::write(&bad, r#"[{"name": "Nowhere", "code": " "}]"#).unwrap();
        assert!(matches!(
            load_catalog_file(&bad),
            Err(ProspectorError::Validation { .. })
        ));

        let missing = dir.join("missing.json");
        assert!(matches!(
            load_catalog_file(&missing),
            Err(ProspectorError::Io { .. })
        ));
    }
}
