//! Region / sub-region catalog queries.

use libsql::params;
use prospector_shared::{ProspectorError, Region, RegionId, Result, SubRegion, SubRegionId};

use crate::{Storage, now, storage_err};

impl Storage {
    /// Insert a region. Returns its row id.
    pub async fn insert_region(&self, name: &str, code: &str) -> Result<RegionId> {
        self.check_writable()?;
        let mut rows = self
            .conn
            .query(
                "INSERT INTO regions (name, code, created_at) VALUES (?1, ?2, ?3) RETURNING id",
                params![name, code, now().as_str()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => row.get::<i64>(0).map_err(storage_err),
            None => Err(ProspectorError::Storage(format!(
                "insert of region {code} returned no id"
            ))),
        }
    }

    /// Insert a sub-region under `region_id`. Returns its row id.
    pub async fn insert_sub_region(
        &self,
        region_id: RegionId,
        name: &str,
        external_id: Option<&str>,
        population: Option<i64>,
    ) -> Result<SubRegionId> {
        self.check_writable()?;
        let mut rows = self
            .conn
            .query(
                "INSERT INTO sub_regions (region_id, name, external_id, population, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5) RETURNING id",
                params![region_id, name, external_id, population, now().as_str()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => row.get::<i64>(0).map_err(storage_err),
            None => Err(ProspectorError::Storage(format!(
                "insert of sub-region {name} returned no id"
            ))),
        }
    }

    /// Get a region by id.
    pub async fn get_region(&self, id: RegionId) -> Result<Option<Region>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, code FROM regions WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_region(&row)?)),
            None => Ok(None),
        }
    }

    /// Get a region by its code (case-insensitive).
    pub async fn get_region_by_code(&self, code: &str) -> Result<Option<Region>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, name, code FROM regions WHERE code = ?1 COLLATE NOCASE",
                params![code],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_region(&row)?)),
            None => Ok(None),
        }
    }

    /// List all regions by name.
    pub async fn list_regions(&self) -> Result<Vec<Region>> {
        let mut rows = self
            .conn
            .query("SELECT id, name, code FROM regions ORDER BY name", params![])
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_region(&row)?);
        }
        Ok(results)
    }

    /// Number of regions in the catalog.
    pub async fn count_regions(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM regions", params![]).await
    }

    /// All sub-regions of a region, lexicographically by name.
    pub async fn list_sub_regions(&self, region_id: RegionId) -> Result<Vec<SubRegion>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, region_id, name, external_id, population
                 FROM sub_regions WHERE region_id = ?1 ORDER BY name",
                params![region_id],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(SubRegion {
                id: row.get::<i64>(0).map_err(storage_err)?,
                region_id: row.get::<i64>(1).map_err(storage_err)?,
                name: row.get::<String>(2).map_err(storage_err)?,
                external_id: row.get::<String>(3).ok(),
                population: row.get::<i64>(4).ok(),
            });
        }
        Ok(results)
    }

    /// Number of sub-regions in a region (the job's total unit count).
    pub async fn count_sub_regions(&self, region_id: RegionId) -> Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM sub_regions WHERE region_id = ?1",
            params![region_id],
        )
        .await
    }
}

fn row_to_region(row: &libsql::Row) -> Result<Region> {
    Ok(Region {
        id: row.get::<i64>(0).map_err(storage_err)?,
        name: row.get::<String>(1).map_err(storage_err)?,
        code: row.get::<String>(2).map_err(storage_err)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::test_util::test_storage;

    #[tokio::test]
    async fn region_crud() {
        let storage = test_storage().await;
        let id = storage.insert_region("Delaware", "DE").await.expect("insert");

        let region = storage.get_region(id).await.unwrap().expect("region");
        assert_eq!(region.name, "Delaware");
        assert_eq!(region.code, "DE");

        let by_code = storage.get_region_by_code("de").await.unwrap().expect("by code");
        assert_eq!(by_code.id, id);

        assert!(storage.get_region(id + 100).await.unwrap().is_none());
        assert_eq!(storage.count_regions().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_region_code_rejected() {
        let storage = test_storage().await;
        storage.insert_region("Delaware", "DE").await.unwrap();
        assert!(storage.insert_region("Delaware again", "DE").await.is_err());
    }

    #[tokio::test]
    async fn sub_regions_are_ordered_by_name() {
        let storage = test_storage().await;
        let de = storage.insert_region("Delaware", "DE").await.unwrap();
        for name in ["Sussex", "Kent", "New Castle"] {
            storage.insert_sub_region(de, name, None, None).await.unwrap();
        }
        storage
            .insert_sub_region(de, "Appoquinimink", Some("10099"), Some(42))
            .await
            .unwrap();

        let units = storage.list_sub_regions(de).await.unwrap();
        let names: Vec<&str> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, ["Appoquinimink", "Kent", "New Castle", "Sussex"]);
        assert_eq!(units[0].external_id.as_deref(), Some("10099"));
        assert_eq!(units[0].population, Some(42));
        assert_eq!(units[1].external_id, None);

        assert_eq!(storage.count_sub_regions(de).await.unwrap(), 4);
    }
}
