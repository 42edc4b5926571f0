//! Persistence layer. [`Store`] is the one seam the dispatcher and its
//! helpers go through to reach Postgres; [`PgStore`] is the only
//! implementation, using runtime-built queries (`query_as::<_, T>`) rather
//! than the compile-time `query!`/`query_as!` macros, since those require a
//! live database or a checked-in `.sqlx` cache at build time.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::models::{
    Artifact, ContentArtifact, ContentGuard, Distribution, Domain, Publication, Remote,
    RemoteArtifact, Repository, RepositoryVersion,
};

/// A directory entry as surfaced to the listing renderer: a relative
/// name, its last-modified time, and its size if the entry is a file.
#[derive(Debug, Clone)]
pub struct ListingEntry {
    pub name: String,
    pub last_modified: OffsetDateTime,
    pub size: Option<i64>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get_domain(&self, name: &str) -> Result<Option<Domain>>;
    async fn get_content_guard(&self, id: Uuid) -> Result<Option<ContentGuard>>;

    /// Finds the distribution whose `base_path` is the longest prefix match
    /// among `candidates`, which the caller has already produced in
    /// longest-first order.
    async fn find_distribution(&self, domain_id: Uuid, candidates: &[String]) -> Result<Option<Distribution>>;

    async fn list_distributions(&self, domain_id: Uuid, hide_guarded: bool) -> Result<Vec<Distribution>>;

    async fn get_repository(&self, id: Uuid) -> Result<Option<Repository>>;
    async fn get_publication(&self, id: Uuid) -> Result<Option<Publication>>;
    async fn get_remote(&self, id: Uuid) -> Result<Option<Remote>>;
    async fn get_repository_version(&self, id: Uuid) -> Result<Option<RepositoryVersion>>;

    /// Latest repository version, regardless of publication.
    async fn latest_repository_version(&self, repository_id: Uuid) -> Result<Option<RepositoryVersion>>;

    /// Latest complete, non-checkpoint publication for a repository.
    async fn latest_publication(&self, repository_id: Uuid) -> Result<Option<Publication>>;

    /// Latest checkpoint publication at or before `at`.
    async fn latest_checkpoint_publication(
        &self,
        repository_id: Uuid,
        at_or_before: OffsetDateTime,
    ) -> Result<Option<Publication>>;

    /// All checkpoint publication timestamps for a repository, newest first;
    /// used to render the checkpoint index listing.
    async fn list_checkpoint_timestamps(&self, repository_id: Uuid) -> Result<Vec<OffsetDateTime>>;

    /// Resolves `relative_path` against a publication's published artifacts. More than
    /// one row is treated as an error rather than resolved to an arbitrary pick.
    async fn published_artifact(
        &self,
        publication_id: Uuid,
        relative_path: &str,
    ) -> Result<Vec<ContentArtifact>>;

    /// Resolves `relative_path` directly against the content of a repository version,
    /// bypassing publication.
    async fn version_content_artifact(
        &self,
        repository_version_id: Uuid,
        relative_path: &str,
    ) -> Result<Vec<ContentArtifact>>;

    async fn list_directory_under_publication(
        &self,
        publication_id: Uuid,
        prefix: &str,
    ) -> Result<Vec<ListingEntry>>;

    async fn list_directory_under_version(
        &self,
        repository_version_id: Uuid,
        prefix: &str,
    ) -> Result<Vec<ListingEntry>>;

    /// Remote artifacts for a content artifact, ordered by ACS priority, excluding
    /// ones still inside their failure cooldown.
    async fn remote_artifacts_for(
        &self,
        content_artifact_id: Uuid,
        cooldown: Duration,
    ) -> Result<Vec<RemoteArtifact>>;

    async fn find_remote_artifact_by_url(&self, remote_id: Uuid, url: &str) -> Result<Option<RemoteArtifact>>;

    async fn mark_remote_artifact_failed(&self, id: Uuid, at: OffsetDateTime) -> Result<()>;

    /// Finds or creates the artifact row for a downloaded blob, converging concurrent
    /// first-fetches on one row keyed by `(domain_id, sha256)`.
    async fn save_artifact(&self, domain_id: Uuid, storage_path: &str, size: i64, sha256: &str) -> Result<Artifact>;

    /// Attaches a freshly-saved artifact to the content artifact that was missing one,
    /// ignoring a unique-violation race against a concurrent identical save.
    async fn attach_artifact_to_content_artifact(&self, content_artifact_id: Uuid, artifact_id: Uuid) -> Result<()>;

    /// Records (or updates the size of) a remote artifact discovered while streaming,
    /// ignoring a unique-violation race.
    async fn save_remote_artifact(
        &self,
        remote_id: Uuid,
        content_artifact_id: Uuid,
        url: &str,
        size: Option<i64>,
    ) -> Result<()>;

    /// Looks up an artifact by its content-address directly.
    async fn find_artifact_by_sha256(&self, domain_id: Uuid, sha256: &str) -> Result<Option<Artifact>>;

    async fn get_artifact(&self, id: Uuid) -> Result<Option<Artifact>>;
    async fn get_content_artifact(&self, id: Uuid) -> Result<Option<ContentArtifact>>;

    /// Creates the `Content` row (minimally, a single-artifact content unit) plus its
    /// one `ContentArtifact`, used for first pull-through of a never-seen relative path.
    /// Returns the created `ContentArtifact`.
    async fn create_content_artifact(
        &self,
        domain_id: Uuid,
        relative_path: &str,
        artifact_id: Uuid,
    ) -> Result<ContentArtifact>;

    /// Finds an existing `ContentArtifact` for `relative_path` under any content unit
    /// already linked into `repository_version_id`, used to detect the unique-violation
    /// race in persistence's "New" branch (a concurrent first pull-through of the same path).
    async fn find_content_artifact_by_path(
        &self,
        repository_version_id: Uuid,
        relative_path: &str,
    ) -> Result<Option<ContentArtifact>>;

    /// Links a content unit into a repository version's content set, so pull-through
    /// fetches become visible to subsequent listing/pass-through lookups.
    async fn add_content_to_repository_version(
        &self,
        repository_version_id: Uuid,
        content_id: Uuid,
    ) -> Result<()>;
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_domain(row: sqlx::postgres::PgRow) -> Result<Domain> {
    use crate::models::StorageKind;
    let kind: String = row.try_get("storage_kind")?;
    let storage_kind = match kind.as_str() {
        "local" => StorageKind::Local,
        "s3" => StorageKind::S3,
        "azure" => StorageKind::Azure,
        "gcs" => StorageKind::Gcs,
        other => anyhow::bail!("unknown storage_kind {other}"),
    };
    Ok(Domain {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        storage_kind,
        redirect_to_object_storage: row.try_get("redirect_to_object_storage")?,
        storage_settings: row.try_get("storage_settings")?,
    })
}

fn row_to_distribution(row: sqlx::postgres::PgRow) -> Result<Distribution> {
    use crate::models::DistributionKind;
    let kind: String = row.try_get("kind")?;
    let kind = match kind.as_str() {
        "standard" => DistributionKind::Standard,
        "artifact" => DistributionKind::Artifact,
        other => anyhow::bail!("unknown distribution kind {other}"),
    };
    Ok(Distribution {
        id: row.try_get("id")?,
        domain_id: row.try_get("domain_id")?,
        base_path: row.try_get("base_path")?,
        kind,
        hidden: row.try_get("hidden")?,
        checkpoint: row.try_get("checkpoint")?,
        serve_from_publication: row.try_get("serve_from_publication")?,
        content_guard_id: row.try_get("content_guard_id")?,
        publication_id: row.try_get("publication_id")?,
        repository_id: row.try_get("repository_id")?,
        repository_version_id: row.try_get("repository_version_id")?,
        remote_id: row.try_get("remote_id")?,
    })
}

fn row_to_publication(row: sqlx::postgres::PgRow) -> Result<Publication> {
    Ok(Publication {
        id: row.try_get("id")?,
        repository_version_id: row.try_get("repository_version_id")?,
        pass_through: row.try_get("pass_through")?,
        checkpoint: row.try_get("checkpoint")?,
        complete: row.try_get("complete")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_remote(row: sqlx::postgres::PgRow) -> Result<Remote> {
    use crate::models::RemotePolicy;
    let policy: String = row.try_get("policy")?;
    let policy = match policy.as_str() {
        "immediate" => RemotePolicy::Immediate,
        "on_demand" => RemotePolicy::OnDemand,
        "streamed" => RemotePolicy::Streamed,
        other => anyhow::bail!("unknown remote policy {other}"),
    };
    Ok(Remote {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        base_url: row.try_get("base_url")?,
        policy,
        content_type: row.try_get("content_type")?,
    })
}

fn row_to_content_artifact(row: sqlx::postgres::PgRow) -> Result<ContentArtifact> {
    let artifact = match row.try_get::<Option<Uuid>, _>("artifact_id")? {
        Some(id) => Some(Artifact {
            id,
            domain_id: row.try_get("a_domain_id")?,
            storage_path: row.try_get("storage_path")?,
            size: row.try_get("a_size")?,
            sha256: row.try_get("sha256")?,
        }),
        None => None,
    };
    Ok(ContentArtifact {
        id: row.try_get("id")?,
        content_id: row.try_get("content_id")?,
        relative_path: row.try_get("relative_path")?,
        artifact_id: row.try_get("artifact_id")?,
        artifact,
    })
}

const CONTENT_ARTIFACT_JOIN: &str = "\
    SELECT ca.id, ca.content_id, ca.relative_path, ca.artifact_id, \
           a.domain_id AS a_domain_id, a.storage_path, a.size AS a_size, a.sha256 \
    FROM content_artifacts ca LEFT JOIN artifacts a ON a.id = ca.artifact_id";

#[async_trait]
impl Store for PgStore {
    async fn get_domain(&self, name: &str) -> Result<Option<Domain>> {
        let row = sqlx::query("SELECT * FROM domains WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_domain).transpose()
    }

    async fn get_content_guard(&self, id: Uuid) -> Result<Option<ContentGuard>> {
        let row = sqlx::query("SELECT * FROM content_guards WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => {
                use crate::models::ContentGuardKind;
                let kind: String = row.try_get("kind")?;
                let kind = match kind.as_str() {
                    "bearer_token" => ContentGuardKind::BearerToken,
                    other => anyhow::bail!("unknown content guard kind {other}"),
                };
                Some(ContentGuard {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    kind,
                    config: row.try_get("config")?,
                })
            }
            None => None,
        })
    }

    async fn find_distribution(&self, domain_id: Uuid, candidates: &[String]) -> Result<Option<Distribution>> {
        // `candidates` is already ordered longest-prefix-first; take the first hit.
        for base_path in candidates {
            let row = sqlx::query("SELECT * FROM distributions WHERE domain_id = $1 AND base_path = $2")
                .bind(domain_id)
                .bind(base_path)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                return Ok(Some(row_to_distribution(row)?));
            }
        }
        Ok(None)
    }

    async fn list_distributions(&self, domain_id: Uuid, hide_guarded: bool) -> Result<Vec<Distribution>> {
        let rows = sqlx::query(
            "SELECT * FROM distributions WHERE domain_id = $1 AND kind != 'artifact' \
             AND ($2 = false OR content_guard_id IS NULL) ORDER BY base_path",
        )
        .bind(domain_id)
        .bind(hide_guarded)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(row_to_distribution).collect()
    }

    async fn get_repository(&self, id: Uuid) -> Result<Option<Repository>> {
        let row = sqlx::query("SELECT * FROM repositories WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(Repository {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                pull_through_supported: row.try_get("pull_through_supported")?,
            }),
            None => None,
        })
    }

    async fn get_publication(&self, id: Uuid) -> Result<Option<Publication>> {
        let row = sqlx::query("SELECT * FROM publications WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_publication).transpose()
    }

    async fn get_remote(&self, id: Uuid) -> Result<Option<Remote>> {
        let row = sqlx::query("SELECT * FROM remotes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_remote).transpose()
    }

    async fn get_repository_version(&self, id: Uuid) -> Result<Option<RepositoryVersion>> {
        let row = sqlx::query("SELECT * FROM repository_versions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(RepositoryVersion {
                id: row.try_get("id")?,
                repository_id: row.try_get("repository_id")?,
                number: row.try_get("number")?,
            }),
            None => None,
        })
    }

    async fn latest_repository_version(&self, repository_id: Uuid) -> Result<Option<RepositoryVersion>> {
        let row = sqlx::query(
            "SELECT * FROM repository_versions WHERE repository_id = $1 ORDER BY number DESC LIMIT 1",
        )
        .bind(repository_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(row) => Some(RepositoryVersion {
                id: row.try_get("id")?,
                repository_id: row.try_get("repository_id")?,
                number: row.try_get("number")?,
            }),
            None => None,
        })
    }

    async fn latest_publication(&self, repository_id: Uuid) -> Result<Option<Publication>> {
        let row = sqlx::query(
            "SELECT p.* FROM publications p \
             JOIN repository_versions rv ON rv.id = p.repository_version_id \
             WHERE rv.repository_id = $1 AND p.checkpoint = false AND p.complete = true \
             ORDER BY p.created_at DESC LIMIT 1",
        )
        .bind(repository_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_publication).transpose()
    }

    async fn latest_checkpoint_publication(
        &self,
        repository_id: Uuid,
        at_or_before: OffsetDateTime,
    ) -> Result<Option<Publication>> {
        let row = sqlx::query(
            "SELECT p.* FROM publications p \
             JOIN repository_versions rv ON rv.id = p.repository_version_id \
             WHERE rv.repository_id = $1 AND p.checkpoint = true AND p.created_at <= $2 \
             ORDER BY p.created_at DESC LIMIT 1",
        )
        .bind(repository_id)
        .bind(at_or_before)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_publication).transpose()
    }

    async fn list_checkpoint_timestamps(&self, repository_id: Uuid) -> Result<Vec<OffsetDateTime>> {
        let rows = sqlx::query(
            "SELECT p.created_at FROM publications p \
             JOIN repository_versions rv ON rv.id = p.repository_version_id \
             WHERE rv.repository_id = $1 AND p.checkpoint = true \
             ORDER BY p.created_at DESC",
        )
        .bind(repository_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| Ok(row.try_get::<OffsetDateTime, _>("created_at")?))
            .collect()
    }

    async fn published_artifact(
        &self,
        publication_id: Uuid,
        relative_path: &str,
    ) -> Result<Vec<ContentArtifact>> {
        let sql = format!(
            "{CONTENT_ARTIFACT_JOIN} JOIN published_artifacts pa ON pa.content_artifact_id = ca.id \
             WHERE pa.publication_id = $1 AND pa.relative_path = $2"
        );
        let rows = sqlx::query(&sql)
            .bind(publication_id)
            .bind(relative_path)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_content_artifact).collect()
    }

    async fn version_content_artifact(
        &self,
        repository_version_id: Uuid,
        relative_path: &str,
    ) -> Result<Vec<ContentArtifact>> {
        let sql = format!(
            "{CONTENT_ARTIFACT_JOIN} JOIN repository_version_content rvc ON rvc.content_id = ca.content_id \
             WHERE rvc.repository_version_id = $1 AND ca.relative_path = $2"
        );
        let rows = sqlx::query(&sql)
            .bind(repository_version_id)
            .bind(relative_path)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_content_artifact).collect()
    }

    async fn list_directory_under_publication(
        &self,
        publication_id: Uuid,
        prefix: &str,
    ) -> Result<Vec<ListingEntry>> {
        let rows = sqlx::query(
            "SELECT pa.relative_path, pa.pulp_created, \
             COALESCE(a.size, (SELECT ra.size FROM remote_artifacts ra \
                                WHERE ra.content_artifact_id = ca.id AND ra.size IS NOT NULL LIMIT 1)) AS size \
             FROM published_artifacts pa \
             JOIN content_artifacts ca ON ca.id = pa.content_artifact_id \
             LEFT JOIN artifacts a ON a.id = ca.artifact_id \
             WHERE pa.publication_id = $1 AND pa.relative_path LIKE $2",
        )
        .bind(publication_id)
        .bind(format!("{prefix}%"))
        .fetch_all(&self.pool)
        .await?;
        rows_to_listing(rows, prefix)
    }

    async fn list_directory_under_version(
        &self,
        repository_version_id: Uuid,
        prefix: &str,
    ) -> Result<Vec<ListingEntry>> {
        let rows = sqlx::query(
            "SELECT ca.relative_path, ca.pulp_created, \
             COALESCE(a.size, (SELECT ra.size FROM remote_artifacts ra \
                                WHERE ra.content_artifact_id = ca.id AND ra.size IS NOT NULL LIMIT 1)) AS size \
             FROM repository_version_content rvc \
             JOIN content_artifacts ca ON ca.content_id = rvc.content_id \
             LEFT JOIN artifacts a ON a.id = ca.artifact_id \
             WHERE rvc.repository_version_id = $1 AND ca.relative_path LIKE $2",
        )
        .bind(repository_version_id)
        .bind(format!("{prefix}%"))
        .fetch_all(&self.pool)
        .await?;
        rows_to_listing(rows, prefix)
    }

    async fn remote_artifacts_for(
        &self,
        content_artifact_id: Uuid,
        cooldown: Duration,
    ) -> Result<Vec<RemoteArtifact>> {
        let cutoff = OffsetDateTime::now_utc() - cooldown;
        let rows = sqlx::query(
            "SELECT * FROM remote_artifacts WHERE content_artifact_id = $1 \
             AND (failed_at IS NULL OR failed_at < $2) ORDER BY acs_priority ASC",
        )
        .bind(content_artifact_id)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(RemoteArtifact {
                    id: row.try_get("id")?,
                    remote_id: row.try_get("remote_id")?,
                    content_artifact_id: row.try_get("content_artifact_id")?,
                    url: row.try_get("url")?,
                    size: row.try_get("size")?,
                    failed_at: row.try_get("failed_at")?,
                    acs_priority: row.try_get("acs_priority")?,
                    expected_sha256: row.try_get("expected_sha256")?,
                })
            })
            .collect()
    }

    async fn find_remote_artifact_by_url(&self, remote_id: Uuid, url: &str) -> Result<Option<RemoteArtifact>> {
        let row = sqlx::query("SELECT * FROM remote_artifacts WHERE remote_id = $1 AND url = $2")
            .bind(remote_id)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(RemoteArtifact {
                id: row.try_get("id")?,
                remote_id: row.try_get("remote_id")?,
                content_artifact_id: row.try_get("content_artifact_id")?,
                url: row.try_get("url")?,
                size: row.try_get("size")?,
                failed_at: row.try_get("failed_at")?,
                acs_priority: row.try_get("acs_priority")?,
                expected_sha256: row.try_get("expected_sha256")?,
            }),
            None => None,
        })
    }

    async fn mark_remote_artifact_failed(&self, id: Uuid, at: OffsetDateTime) -> Result<()> {
        sqlx::query("UPDATE remote_artifacts SET failed_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn save_artifact(&self, domain_id: Uuid, storage_path: &str, size: i64, sha256: &str) -> Result<Artifact> {
        // Converge concurrent first-fetches of the same content on one row.
        let row = sqlx::query(
            "INSERT INTO artifacts (domain_id, storage_path, size, sha256) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (domain_id, sha256) DO UPDATE SET storage_path = artifacts.storage_path \
             RETURNING *",
        )
        .bind(domain_id)
        .bind(storage_path)
        .bind(size)
        .bind(sha256)
        .fetch_one(&self.pool)
        .await?;
        Ok(Artifact {
            id: row.try_get("id")?,
            domain_id: row.try_get("domain_id")?,
            storage_path: row.try_get("storage_path")?,
            size: row.try_get("size")?,
            sha256: row.try_get("sha256")?,
        })
    }

    async fn attach_artifact_to_content_artifact(&self, content_artifact_id: Uuid, artifact_id: Uuid) -> Result<()> {
        // A concurrent request may have already attached an artifact; keep whichever won.
        sqlx::query(
            "UPDATE content_artifacts SET artifact_id = $2 WHERE id = $1 AND artifact_id IS NULL",
        )
        .bind(content_artifact_id)
        .bind(artifact_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_remote_artifact(
        &self,
        remote_id: Uuid,
        content_artifact_id: Uuid,
        url: &str,
        size: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO remote_artifacts (remote_id, content_artifact_id, url, size) \
             VALUES ($1, $2, $3, $4) ON CONFLICT (remote_id, url) DO UPDATE SET size = EXCLUDED.size",
        )
        .bind(remote_id)
        .bind(content_artifact_id)
        .bind(url)
        .bind(size)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_artifact_by_sha256(&self, domain_id: Uuid, sha256: &str) -> Result<Option<Artifact>> {
        let row = sqlx::query("SELECT * FROM artifacts WHERE domain_id = $1 AND sha256 = $2")
            .bind(domain_id)
            .bind(sha256)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(Artifact {
                id: row.try_get("id")?,
                domain_id: row.try_get("domain_id")?,
                storage_path: row.try_get("storage_path")?,
                size: row.try_get("size")?,
                sha256: row.try_get("sha256")?,
            }),
            None => None,
        })
    }

    async fn get_artifact(&self, id: Uuid) -> Result<Option<Artifact>> {
        let row = sqlx::query("SELECT * FROM artifacts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => Some(Artifact {
                id: row.try_get("id")?,
                domain_id: row.try_get("domain_id")?,
                storage_path: row.try_get("storage_path")?,
                size: row.try_get("size")?,
                sha256: row.try_get("sha256")?,
            }),
            None => None,
        })
    }

    async fn get_content_artifact(&self, id: Uuid) -> Result<Option<ContentArtifact>> {
        let sql = format!("{CONTENT_ARTIFACT_JOIN} WHERE ca.id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.map(row_to_content_artifact).transpose()
    }

    async fn create_content_artifact(
        &self,
        domain_id: Uuid,
        relative_path: &str,
        artifact_id: Uuid,
    ) -> Result<ContentArtifact> {
        let mut tx = self.pool.begin().await?;
        let content_id: Uuid = sqlx::query_scalar(
            "INSERT INTO content_units (domain_id) VALUES ($1) RETURNING id",
        )
        .bind(domain_id)
        .fetch_one(&mut *tx)
        .await?;
        let row = sqlx::query(
            "INSERT INTO content_artifacts (content_id, relative_path, artifact_id) \
             VALUES ($1, $2, $3) RETURNING id, content_id, relative_path, artifact_id",
        )
        .bind(content_id)
        .bind(relative_path)
        .bind(artifact_id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(ContentArtifact {
            id: row.try_get("id")?,
            content_id: row.try_get("content_id")?,
            relative_path: row.try_get("relative_path")?,
            artifact_id: row.try_get("artifact_id")?,
            artifact: None,
        })
    }

    async fn find_content_artifact_by_path(
        &self,
        repository_version_id: Uuid,
        relative_path: &str,
    ) -> Result<Option<ContentArtifact>> {
        let sql = format!(
            "{CONTENT_ARTIFACT_JOIN} JOIN repository_version_content rvc ON rvc.content_id = ca.content_id \
             WHERE rvc.repository_version_id = $1 AND ca.relative_path = $2"
        );
        let row = sqlx::query(&sql)
            .bind(repository_version_id)
            .bind(relative_path)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_content_artifact).transpose()
    }

    async fn add_content_to_repository_version(
        &self,
        repository_version_id: Uuid,
        content_id: Uuid,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO repository_version_content (repository_version_id, content_id) \
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(repository_version_id)
        .bind(content_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn rows_to_listing(rows: Vec<sqlx::postgres::PgRow>, prefix: &str) -> Result<Vec<ListingEntry>> {
    // Paths are flat relative strings; fold everything past the next `/` after
    // `prefix` into a single collapsed directory entry.
    use std::collections::BTreeMap;
    let mut entries: BTreeMap<String, ListingEntry> = BTreeMap::new();
    for row in rows {
        let relative_path: String = row.try_get("relative_path")?;
        let last_modified: OffsetDateTime = row.try_get("pulp_created")?;
        let size: Option<i64> = row.try_get("size")?;
        let rest = &relative_path[prefix.len()..];
        match rest.find('/') {
            Some(slash) => {
                let dir_name = format!("{}/", &rest[..slash]);
                let entry = entries.entry(dir_name.clone()).or_insert_with(|| ListingEntry {
                    name: dir_name,
                    last_modified,
                    size: None,
                });
                if last_modified > entry.last_modified {
                    entry.last_modified = last_modified;
                }
            }
            None => {
                entries.insert(
                    rest.to_string(),
                    ListingEntry {
                        name: rest.to_string(),
                        last_modified,
                        size,
                    },
                );
            }
        }
    }
    Ok(entries.into_values().collect())
}
