//! Result store: confidence-gated upserts keyed by `(job_id, sub_region_id)`.

use std::collections::HashSet;

use libsql::params;
use prospector_shared::{
    GeneralContact, JobId, PersonnelContact, ProspectorError, Result, ResultRecord, ResultRow,
    SubRegionId,
};

use crate::{Storage, now, parse_ts, storage_err};

const RESULT_ROW_COLUMNS: &str = "r.job_id, r.sub_region_id, s.name, g.name, r.kind,
    r.organization_name, r.description,
    r.personnel_name, r.personnel_title, r.personnel_phone, r.personnel_email,
    r.contact_phone, r.contact_email, r.contact_website,
    r.address, r.notes, r.confidence, r.source_urls, r.raw_response, r.failure_reason,
    r.created_at, r.updated_at";

impl Storage {
    /// Write `record` unless a stored result for the same key has equal or
    /// higher confidence.
    ///
    /// The insert and the gate are one statement, so concurrent writers for
    /// the same key converge on the highest confidence regardless of order.
    /// Returns `true` if the row was inserted or replaced.
    pub async fn upsert_result(&self, record: &ResultRecord) -> Result<bool> {
        self.check_writable()?;
        let ts = now();
        let source_urls = serde_json::to_string(&record.source_urls)
            .map_err(|e| ProspectorError::Storage(format!("encode source_urls: {e}")))?;

        let affected = self
            .conn
            .execute(
                "INSERT INTO results (
                    job_id, sub_region_id, kind, organization_name, description,
                    personnel_name, personnel_title, personnel_phone, personnel_email,
                    contact_phone, contact_email, contact_website,
                    address, notes, confidence, source_urls, raw_response, failure_reason,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10,
                         ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?19)
                 ON CONFLICT(job_id, sub_region_id) DO UPDATE SET
                   kind = excluded.kind,
                   organization_name = excluded.organization_name,
                   description = excluded.description,
                   personnel_name = excluded.personnel_name,
                   personnel_title = excluded.personnel_title,
                   personnel_phone = excluded.personnel_phone,
                   personnel_email = excluded.personnel_email,
                   contact_phone = excluded.contact_phone,
                   contact_email = excluded.contact_email,
                   contact_website = excluded.contact_website,
                   address = excluded.address,
                   notes = excluded.notes,
                   confidence = excluded.confidence,
                   source_urls = excluded.source_urls,
                   raw_response = excluded.raw_response,
                   failure_reason = excluded.failure_reason,
                   updated_at = excluded.updated_at
                 WHERE excluded.confidence > results.confidence",
                params![
                    record.job_id.to_string(),
                    record.sub_region_id,
                    record.kind.as_str(),
                    record.organization_name.as_deref(),
                    record.description.as_deref(),
                    record.personnel.name.as_deref(),
                    record.personnel.title.as_deref(),
                    record.personnel.phone.as_deref(),
                    record.personnel.email.as_deref(),
                    record.contact.phone.as_deref(),
                    record.contact.email.as_deref(),
                    record.contact.website.as_deref(),
                    record.address.as_deref(),
                    record.notes.as_deref(),
                    record.confidence,
                    source_urls,
                    record.raw_response.as_deref(),
                    record.failure_reason.as_deref(),
                    ts.as_str(),
                ],
            )
            .await
            .map_err(storage_err)?;

        Ok(affected > 0)
    }

    /// The stored result for one key.
    pub async fn get_result(
        &self,
        job_id: &JobId,
        sub_region_id: SubRegionId,
    ) -> Result<Option<ResultRow>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RESULT_ROW_COLUMNS}
                     FROM results r
                     JOIN sub_regions s ON s.id = r.sub_region_id
                     JOIN regions g ON g.id = s.region_id
                     WHERE r.job_id = ?1 AND r.sub_region_id = ?2"
                ),
                params![job_id.to_string(), sub_region_id],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(Some(row_to_result(&row)?)),
            None => Ok(None),
        }
    }

    /// All results of a job, one per sub-region, ordered by sub-region name.
    pub async fn list_results(&self, job_id: &JobId) -> Result<Vec<ResultRow>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {RESULT_ROW_COLUMNS}
                     FROM results r
                     JOIN sub_regions s ON s.id = r.sub_region_id
                     JOIN regions g ON g.id = s.region_id
                     WHERE r.job_id = ?1
                     ORDER BY s.name"
                ),
                params![job_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let mut results = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            results.push(row_to_result(&row)?);
        }
        Ok(results)
    }

    /// Sub-regions that already hold a result for `job_id`.
    pub async fn result_sub_region_ids(&self, job_id: &JobId) -> Result<HashSet<SubRegionId>> {
        let mut rows = self
            .conn
            .query(
                "SELECT sub_region_id FROM results WHERE job_id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        let mut ids = HashSet::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            ids.insert(row.get::<i64>(0).map_err(storage_err)?);
        }
        Ok(ids)
    }

    /// Distinct sub-regions with a result (of any kind) for `job_id`.
    pub async fn count_results(&self, job_id: &JobId) -> Result<u64> {
        self.count(
            "SELECT COUNT(DISTINCT sub_region_id) FROM results WHERE job_id = ?1",
            params![job_id.to_string()],
        )
        .await
    }

    /// Results that name an organization.
    pub async fn count_organizations(&self, job_id: &JobId) -> Result<u64> {
        self.count(
            "SELECT COUNT(*) FROM results
             WHERE job_id = ?1 AND kind = 'found' AND organization_name IS NOT NULL",
            params![job_id.to_string()],
        )
        .await
    }
}

fn row_to_result(row: &libsql::Row) -> Result<ResultRow> {
    let kind: String = row.get(4).map_err(storage_err)?;
    let source_urls: String = row.get(17).map_err(storage_err)?;
    let created_at: String = row.get(20).map_err(storage_err)?;
    let updated_at: String = row.get(21).map_err(storage_err)?;

    Ok(ResultRow {
        job_id: row.get::<String>(0).map_err(storage_err)?,
        sub_region_id: row.get::<i64>(1).map_err(storage_err)?,
        sub_region: row.get::<String>(2).map_err(storage_err)?,
        region: row.get::<String>(3).map_err(storage_err)?,
        kind: kind.parse()?,
        organization_name: row.get::<String>(5).ok(),
        description: row.get::<String>(6).ok(),
        personnel: PersonnelContact {
            name: row.get::<String>(7).ok(),
            title: row.get::<String>(8).ok(),
            phone: row.get::<String>(9).ok(),
            email: row.get::<String>(10).ok(),
        },
        contact: GeneralContact {
            phone: row.get::<String>(11).ok(),
            email: row.get::<String>(12).ok(),
            website: row.get::<String>(13).ok(),
        },
        address: row.get::<String>(14).ok(),
        notes: row.get::<String>(15).ok(),
        confidence: row.get::<f64>(16).map_err(storage_err)?,
        source_urls: serde_json::from_str(&source_urls)
            .map_err(|e| ProspectorError::Storage(format!("decode source_urls: {e}")))?,
        raw_response: row.get::<String>(18).ok(),
        failure_reason: row.get::<String>(19).ok(),
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}
