//! Dispatcher: the one place that walks a request through resolution, guard checks,
//! scope selection, and content serving in order. Everything it calls returns a
//! [`DispatchOutcome`] or a [`GatewayError`]; this module never touches axum types
//! beyond the ones already threaded through those two.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::cache::{self, ResponseCache};
use crate::config::Settings;
use crate::conn::ConnectionAbort;
use crate::error::GatewayError;
use crate::guard;
use crate::listing;
use crate::metrics::Metrics;
use crate::mirror::{self, MirrorCandidate};
use crate::models::{ContentArtifact, Distribution, DistributionKind, Domain};
use crate::outcome::{BodyPolicy, DispatchOutcome};
use crate::persister::PersistTarget;
use crate::resolver::{self, CheckpointOutcome, ResolveOutcome};
use crate::responder;
use crate::store::{ListingEntry, Store};
use crate::streamer::CacheRebuild;

pub struct DispatchContext {
    pub store: Arc<dyn Store>,
    pub client: reqwest::Client,
    pub metrics: Arc<Metrics>,
    pub blob: Arc<BlobStore>,
    pub settings: Arc<Settings>,
    pub cache: Option<ResponseCache>,
}

/// Where a resolved relative path's content actually lives, after a publication, a
/// pass-through publication, or a bare repository version have all been folded into the
/// same shape.
struct ContentScope {
    publication_id: Option<Uuid>,
    pass_through: bool,
    repository_version_id: Uuid,
    repository_id: Uuid,
    remote_id: Option<Uuid>,
}

fn external_path(settings: &Settings, domain: &Domain, path: &str) -> String {
    let mut out = settings.content_path_prefix.trim_end_matches('/').to_string();
    if settings.domain_enabled {
        out.push('/');
        out.push_str(&domain.name);
    }
    out.push('/');
    out.push_str(path.trim_start_matches('/'));
    out
}

fn redirect_to(location: String) -> DispatchOutcome {
    DispatchOutcome::Redirect {
        location,
        status: axum::http::StatusCode::MOVED_PERMANENTLY,
        extra_headers: vec![],
    }
}

/// Entry point: resolves `path` (already stripped of the content prefix) against `domain`
/// and serves whatever it ultimately names.
#[allow(clippy::too_many_arguments)]
pub async fn dispatch(
    ctx: &DispatchContext,
    domain: &Domain,
    path: &str,
    method: Method,
    headers: &HeaderMap,
    range_header: Option<&str>,
    query: &str,
    abort: Option<ConnectionAbort>,
) -> Result<DispatchOutcome, GatewayError> {
    let body_policy = if method == Method::HEAD { BodyPolicy::HeadersOnly } else { BodyPolicy::Full };

    let resolved = resolver::resolve(&ctx.store, domain.id, path)
        .await
        .map_err(GatewayError::Internal)?;

    let (distribution, rel_path) = match resolved {
        ResolveOutcome::Resolved { distribution, rel_path, trailing_slash_present } => {
            if rel_path.is_empty() && !trailing_slash_present {
                return Ok(redirect_to(external_path(&ctx.settings, domain, &format!("{}/", distribution.base_path.trim_matches('/')))));
            }
            (distribution, rel_path)
        }
        ResolveOutcome::NeedsListing => return render_distribution_root_listing(ctx, domain, path, body_policy).await,
        ResolveOutcome::NeedsRedirect(location) => return Ok(redirect_to(external_path(&ctx.settings, domain, &location))),
        ResolveOutcome::NotFound => return Err(GatewayError::path_not_resolved(path)),
    };

    // Guard gate, checked before anything about the distribution's content is touched.
    if let Some(guard_id) = distribution.content_guard_id {
        let content_guard = ctx
            .store
            .get_content_guard(guard_id)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("dangling content_guard_id on distribution")))?;
        guard::check(Some(&content_guard), headers).map_err(|reason| GatewayError::Forbidden { reason })?;
    }

    // If the response cache is enabled, a successful on-demand fetch further down this
    // call stack rebuilds a 4.F-shaped response for the saved artifact and hands it to
    // the cache under the same key this very request would be looked up by next time.
    let cache_rebuild = ctx.cache.clone().map(|cache| CacheRebuild {
        cache,
        domain: domain.clone(),
        blob: ctx.blob.clone(),
        base_path: distribution.base_path.clone(),
        full_path: cache::cache_scope(&ctx.settings, domain, path),
        method: method.as_str().to_string(),
        query: query.to_string(),
    });

    // Dispatch step 2: a distribution kind may serve `rel_path` itself rather than
    // through a publication or repository version (the synthetic artifact-by-digest
    // distribution is the only such kind today).
    let capabilities = distribution.capabilities();
    let outcome = if let Some(outcome) = capabilities.content_handler(ctx, domain, &rel_path, path, range_header, body_policy).await? {
        outcome
    } else if distribution.checkpoint {
        dispatch_checkpoint(ctx, domain, &distribution, &rel_path, method, range_header, abort, body_policy, path, cache_rebuild).await?
    } else {
        let scope = resolve_scope(ctx, &distribution, None).await?;
        serve_scope(ctx, domain, &distribution, &scope, &rel_path, method, range_header, abort, body_policy, path, cache_rebuild).await?
    };

    Ok(with_extra_headers(outcome, capabilities.content_headers_for(&rel_path)))
}

/// Merges distribution-kind-specific headers onto whichever response shape `outcome`
/// turned out to be; a no-op for the `Html` variant, which carries no header list.
fn with_extra_headers(outcome: DispatchOutcome, headers: Vec<(HeaderName, HeaderValue)>) -> DispatchOutcome {
    if headers.is_empty() {
        return outcome;
    }
    match outcome {
        DispatchOutcome::File { mut extra_headers, absolute_path, filename, content_type, total_size, range, body_policy } => {
            extra_headers.extend(headers);
            DispatchOutcome::File { extra_headers, absolute_path, filename, content_type, total_size, range, body_policy }
        }
        DispatchOutcome::Redirect { mut extra_headers, location, status } => {
            extra_headers.extend(headers);
            DispatchOutcome::Redirect { extra_headers, location, status }
        }
        DispatchOutcome::Streamed(mut response) => {
            for (name, value) in headers {
                response.headers_mut().insert(name, value);
            }
            DispatchOutcome::Streamed(response)
        }
        other @ DispatchOutcome::Html { .. } => other,
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_checkpoint(
    ctx: &DispatchContext,
    domain: &Domain,
    distribution: &Distribution,
    rel_path: &str,
    method: Method,
    range_header: Option<&str>,
    abort: Option<ConnectionAbort>,
    body_policy: BodyPolicy,
    path: &str,
    cache_rebuild: Option<CacheRebuild>,
) -> Result<DispatchOutcome, GatewayError> {
    let repository_id = distribution
        .repository_id
        .ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("checkpoint distribution missing repository_id")))?;

    match resolver::resolve_checkpoint(&ctx.store, repository_id, rel_path)
        .await
        .map_err(GatewayError::Internal)?
    {
        CheckpointOutcome::Resolved { publication_id, rel_path: remainder } => {
            let scope = resolve_scope(ctx, distribution, Some(publication_id)).await?;
            serve_scope(ctx, domain, distribution, &scope, &remainder, method, range_header, abort, body_policy, path, cache_rebuild).await
        }
        CheckpointOutcome::NeedsRedirect(location) => {
            Ok(redirect_to(external_path(&ctx.settings, domain, &format!("{}/{location}", distribution.base_path.trim_matches('/')))))
        }
        CheckpointOutcome::NeedsListing => {
            let timestamps = ctx
                .store
                .list_checkpoint_timestamps(repository_id)
                .await
                .map_err(GatewayError::Internal)?;
            let entries: Vec<ListingEntry> = timestamps
                .into_iter()
                .map(|at| ListingEntry {
                    name: format!("{}/", resolver::format_checkpoint_timestamp(at)),
                    last_modified: at,
                    size: None,
                })
                .collect();
            let title = external_path(&ctx.settings, domain, path);
            let has_parent = !distribution.base_path.trim_matches('/').is_empty();
            let html = listing::render_listing(&title, has_parent, &entries).map_err(|err| GatewayError::Internal(err.into()))?;
            Ok(DispatchOutcome::Html { body: html, body_policy })
        }
        CheckpointOutcome::NotFound => Err(GatewayError::path_not_resolved(path)),
    }
}

async fn resolve_scope(
    ctx: &DispatchContext,
    distribution: &Distribution,
    checkpoint_publication_id: Option<Uuid>,
) -> Result<ContentScope, GatewayError> {
    // A distribution can carry both a publication and a repository/version; `serve_from_publication`
    // picks which one wins when it isn't a checkpoint distribution (where the resolved checkpoint
    // publication always wins, regardless of the flag).
    let publication_id = checkpoint_publication_id
        .or_else(|| distribution.serve_from_publication.then_some(distribution.publication_id).flatten());

    if let Some(publication_id) = publication_id {
        let publication = ctx
            .store
            .get_publication(publication_id)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("dangling publication_id on distribution")))?;
        let repository_version = ctx
            .store
            .get_repository_version(publication.repository_version_id)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("dangling repository_version_id on publication")))?;
        return Ok(ContentScope {
            publication_id: Some(publication_id),
            pass_through: publication.pass_through,
            repository_version_id: repository_version.id,
            repository_id: repository_version.repository_id,
            remote_id: distribution.remote_id,
        });
    }

    let repository_version_id = if let Some(id) = distribution.repository_version_id {
        id
    } else if let Some(repository_id) = distribution.repository_id {
        ctx.store
            .latest_repository_version(repository_id)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or_else(|| GatewayError::path_not_resolved_with_reason("", "repository has no versions"))?
            .id
    } else {
        return Err(GatewayError::Internal(anyhow::anyhow!(
            "distribution has neither a publication nor a repository configured"
        )));
    };

    let repository_version = ctx
        .store
        .get_repository_version(repository_version_id)
        .await
        .map_err(GatewayError::Internal)?
        .ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("dangling repository_version_id on distribution")))?;
    Ok(ContentScope {
        publication_id: None,
        pass_through: false,
        repository_version_id,
        repository_id: repository_version.repository_id,
        remote_id: distribution.remote_id,
    })
}

#[allow(clippy::too_many_arguments)]
async fn serve_scope(
    ctx: &DispatchContext,
    domain: &Domain,
    distribution: &Distribution,
    scope: &ContentScope,
    rel_path: &str,
    method: Method,
    range_header: Option<&str>,
    abort: Option<ConnectionAbort>,
    body_policy: BodyPolicy,
    original_path: &str,
    cache_rebuild: Option<CacheRebuild>,
) -> Result<DispatchOutcome, GatewayError> {
    // Directory listing (index.html substitution, or a rendered listing) takes precedence
    // over an exact relative-path match: a path that happens to name both a directory
    // prefix and a content unit is served as a listing, never the file.
    if let Some(outcome) = try_directory_listing(ctx, domain, distribution, scope, rel_path, range_header, body_policy, original_path).await? {
        return Ok(outcome);
    }

    let rows = content_rows(ctx, scope, rel_path).await?;
    match rows.len() {
        1 => {
            let content_artifact = rows.into_iter().next().expect("len checked above");
            serve_content_artifact(ctx, domain, scope, content_artifact, rel_path, method, range_header, abort, body_policy, cache_rebuild).await
        }
        0 => pull_through(ctx, domain, scope, rel_path, method, range_header, abort, body_policy, original_path, cache_rebuild).await,
        _ => Err(GatewayError::Ambiguous { path: rel_path.to_string() }),
    }
}

/// Looks up `rel_path` within `scope`. When the scope carries a publication, the curated
/// `published_artifact` rows are tried first; a pass-through publication additionally
/// consults the version's raw content only once that first lookup comes up empty, rather
/// than skipping it outright. More than one row total (across both lookups) is ambiguous.
async fn content_rows(ctx: &DispatchContext, scope: &ContentScope, rel_path: &str) -> Result<Vec<ContentArtifact>, GatewayError> {
    if let Some(publication_id) = scope.publication_id {
        let published = ctx.store.published_artifact(publication_id, rel_path).await.map_err(GatewayError::Internal)?;
        if !published.is_empty() || !scope.pass_through {
            return Ok(published);
        }
        return ctx.store.version_content_artifact(scope.repository_version_id, rel_path).await.map_err(GatewayError::Internal);
    }
    ctx.store.version_content_artifact(scope.repository_version_id, rel_path).await.map_err(GatewayError::Internal)
}

/// Directory entries under `prefix`. When the scope carries a publication, its curated
/// listing is always fetched; a pass-through publication additionally merges in the
/// version's raw content entries rather than using one listing source or the other.
async fn list_directory(ctx: &DispatchContext, scope: &ContentScope, prefix: &str) -> Result<Vec<ListingEntry>, GatewayError> {
    if let Some(publication_id) = scope.publication_id {
        let mut entries = ctx.store.list_directory_under_publication(publication_id, prefix).await.map_err(GatewayError::Internal)?;
        if scope.pass_through {
            let version_entries = ctx
                .store
                .list_directory_under_version(scope.repository_version_id, prefix)
                .await
                .map_err(GatewayError::Internal)?;
            merge_listing_entries(&mut entries, version_entries);
        }
        return Ok(entries);
    }
    ctx.store.list_directory_under_version(scope.repository_version_id, prefix).await.map_err(GatewayError::Internal)
}

/// Folds `incoming` into `base`, by name, keeping the newest `last_modified` and preferring
/// whichever side actually knows a size.
fn merge_listing_entries(base: &mut Vec<ListingEntry>, incoming: Vec<ListingEntry>) {
    for entry in incoming {
        match base.iter_mut().find(|e| e.name == entry.name) {
            Some(existing) => {
                if entry.last_modified > existing.last_modified {
                    existing.last_modified = entry.last_modified;
                }
                if existing.size.is_none() {
                    existing.size = entry.size;
                }
            }
            None => base.push(entry),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn serve_content_artifact(
    ctx: &DispatchContext,
    domain: &Domain,
    scope: &ContentScope,
    content_artifact: ContentArtifact,
    rel_path: &str,
    method: Method,
    range_header: Option<&str>,
    abort: Option<ConnectionAbort>,
    body_policy: BodyPolicy,
    cache_rebuild: Option<CacheRebuild>,
) -> Result<DispatchOutcome, GatewayError> {
    if let Some(artifact) = &content_artifact.artifact {
        return responder::respond(domain, &ctx.blob, &ctx.metrics, artifact, &content_artifact.relative_path, range_header, body_policy)
            .await;
    }

    let cooldown = Duration::from_secs(ctx.settings.remote_content_fetch_failure_cooldown);
    let remote_artifacts = ctx
        .store
        .remote_artifacts_for(content_artifact.id, cooldown)
        .await
        .map_err(GatewayError::Internal)?;
    if remote_artifacts.is_empty() {
        return Err(GatewayError::NotFound);
    }

    let mut candidates = Vec::with_capacity(remote_artifacts.len());
    for remote_artifact in remote_artifacts {
        let remote = ctx
            .store
            .get_remote(remote_artifact.remote_id)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("dangling remote_id on remote_artifact")))?;
        candidates.push(MirrorCandidate { url: remote_artifact.url.clone(), remote, remote_artifact: Some(remote_artifact) });
    }

    let _ = scope;
    mirror::fetch(
        ctx.store.clone(),
        ctx.client.clone(),
        ctx.metrics.clone(),
        abort,
        candidates,
        PersistTarget::Existing { content_artifact },
        domain.id,
        rel_path,
        range_header,
        method,
        &ctx.settings.artifact_storage_root,
        cache_rebuild,
    )
    .await
}

/// Step 4a/4b: index.html substitution, then a rendered listing if `rel_path` has any
/// entries nested under it. Returns `None` when there is nothing to list, meaning the
/// caller should fall through to an exact-match lookup (and from there, pull-through).
#[allow(clippy::too_many_arguments)]
async fn try_directory_listing(
    ctx: &DispatchContext,
    domain: &Domain,
    distribution: &Distribution,
    scope: &ContentScope,
    rel_path: &str,
    range_header: Option<&str>,
    body_policy: BodyPolicy,
    original_path: &str,
) -> Result<Option<DispatchOutcome>, GatewayError> {
    let prefix = if rel_path.is_empty() || rel_path.ends_with('/') {
        rel_path.to_string()
    } else {
        format!("{rel_path}/")
    };
    let entries = list_directory(ctx, scope, &prefix).await?;
    let entries = distribution.capabilities().content_handler_list_directory(entries);

    if entries.is_empty() {
        return Ok(None);
    }

    if !rel_path.is_empty() && !rel_path.ends_with('/') {
        return Ok(Some(redirect_to(external_path(&ctx.settings, domain, &format!("{}/{rel_path}/", distribution.base_path.trim_matches('/'))))));
    }

    if entries.iter().any(|e| e.name == "index.html") {
        let index_path = format!("{prefix}index.html");
        let rows = content_rows(ctx, scope, &index_path).await?;
        if let Some(content_artifact) = rows.into_iter().next() {
            if let Some(artifact) = &content_artifact.artifact {
                let response = responder::respond(domain, &ctx.blob, &ctx.metrics, artifact, &index_path, range_header, body_policy).await?;
                return Ok(Some(response));
            }
        }
    }

    let title = external_path(&ctx.settings, domain, original_path);
    let has_parent = !rel_path.trim_matches('/').is_empty();
    let html = listing::render_listing(&title, has_parent, &entries).map_err(|err| GatewayError::Internal(err.into()))?;
    Ok(Some(DispatchOutcome::Html { body: html, body_policy }))
}

/// Step 6: nothing local matches `rel_path` and nothing is nested under it either, so the
/// only remaining possibility is a never-before-seen path under a pull-through repository.
/// A `RemoteArtifact` already on file for this exact URL (a retry after a prior fetch)
/// is served/re-streamed through its existing `ContentArtifact` rather than treated as a
/// brand-new fetch, so its known size and failure-cooldown state are not discarded.
#[allow(clippy::too_many_arguments)]
async fn pull_through(
    ctx: &DispatchContext,
    domain: &Domain,
    scope: &ContentScope,
    rel_path: &str,
    method: Method,
    range_header: Option<&str>,
    abort: Option<ConnectionAbort>,
    body_policy: BodyPolicy,
    original_path: &str,
    cache_rebuild: Option<CacheRebuild>,
) -> Result<DispatchOutcome, GatewayError> {
    let repository = ctx
        .store
        .get_repository(scope.repository_id)
        .await
        .map_err(GatewayError::Internal)?
        .ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("dangling repository_id")))?;
    if !repository.pull_through_supported {
        return Err(GatewayError::path_not_resolved(original_path));
    }
    let Some(remote_id) = scope.remote_id else {
        return Err(GatewayError::path_not_resolved(original_path));
    };
    let remote = ctx
        .store
        .get_remote(remote_id)
        .await
        .map_err(GatewayError::Internal)?
        .ok_or_else(|| GatewayError::path_not_resolved(original_path))?;

    let url = format!("{}/{}", remote.base_url.trim_end_matches('/'), rel_path.trim_start_matches('/'));

    if let Some(remote_artifact) = ctx
        .store
        .find_remote_artifact_by_url(remote_id, &url)
        .await
        .map_err(GatewayError::Internal)?
    {
        let content_artifact = ctx
            .store
            .get_content_artifact(remote_artifact.content_artifact_id)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("dangling content_artifact_id on remote_artifact")))?;

        if let Some(artifact) = &content_artifact.artifact {
            return responder::respond(domain, &ctx.blob, &ctx.metrics, artifact, &content_artifact.relative_path, range_header, body_policy)
                .await;
        }

        let candidates = vec![MirrorCandidate { remote, remote_artifact: Some(remote_artifact), url }];
        return mirror::fetch(
            ctx.store.clone(),
            ctx.client.clone(),
            ctx.metrics.clone(),
            abort,
            candidates,
            PersistTarget::Existing { content_artifact },
            domain.id,
            rel_path,
            range_header,
            method,
            &ctx.settings.artifact_storage_root,
            cache_rebuild,
        )
        .await;
    }

    let repository_version = ctx
        .store
        .get_repository_version(scope.repository_version_id)
        .await
        .map_err(GatewayError::Internal)?;
    let candidates = vec![MirrorCandidate { remote, remote_artifact: None, url: url.clone() }];
    let target = PersistTarget::New {
        domain_id: domain.id,
        repository_version,
        relative_path: rel_path.to_string(),
    };

    mirror::fetch(
        ctx.store.clone(),
        ctx.client.clone(),
        ctx.metrics.clone(),
        abort,
        candidates,
        target,
        domain.id,
        rel_path,
        range_header,
        method,
        &ctx.settings.artifact_storage_root,
        cache_rebuild,
    )
    .await
}

async fn render_distribution_root_listing(
    ctx: &DispatchContext,
    domain: &Domain,
    path: &str,
    body_policy: BodyPolicy,
) -> Result<DispatchOutcome, GatewayError> {
    let distributions = ctx
        .store
        .list_distributions(domain.id, ctx.settings.hide_guarded_distributions)
        .await
        .map_err(GatewayError::Internal)?;
    let trimmed = path.trim_matches('/');
    let entries: Vec<ListingEntry> = distributions
        .into_iter()
        .filter(|d| !d.hidden)
        .filter_map(|d| {
            let base = d.base_path.trim_matches('/');
            let rest = if trimmed.is_empty() { base } else { base.strip_prefix(&format!("{trimmed}/"))? };
            let next_segment = rest.split('/').next()?;
            Some(ListingEntry {
                name: format!("{next_segment}/"),
                last_modified: time::OffsetDateTime::now_utc(),
                size: None,
            })
        })
        .collect();
    let mut deduped: Vec<ListingEntry> = Vec::new();
    for entry in entries {
        if !deduped.iter().any(|e| e.name == entry.name) {
            deduped.push(entry);
        }
    }
    let title = external_path(&ctx.settings, domain, path);
    let has_parent = !trimmed.is_empty();
    let html = listing::render_listing(&title, has_parent, &deduped).map_err(|err| GatewayError::Internal(err.into()))?;
    Ok(DispatchOutcome::Html { body: html, body_policy })
}

#[test]
fn test_external_path_without_domain() {
    let settings_toml = r#"
        bind_addr = "127.0.0.1:8080"
        db_pgconn = "postgres://localhost/pulp"
        redis_url = "redis://localhost"
        content_path_prefix = "/pulp/content/"
    "#;
    let settings: Settings = toml::from_str(settings_toml).unwrap();
    let domain = Domain {
        id: uuid::Uuid::new_v4(),
        name: "default".to_string(),
        storage_kind: crate::models::StorageKind::Local,
        redirect_to_object_storage: false,
        storage_settings: serde_json::json!({}),
    };
    assert_eq!(external_path(&settings, &domain, "repo/pool/"), "/pulp/content/repo/pool/");
}

/// Minimal in-memory [`Store`] for exercising [`dispatch`] without a database. Every
/// method a given test doesn't care about returns an empty/`None` result; tests override
/// behavior by constructing the fake with the rows they need already populated.
#[cfg(test)]
struct FakeStore {
    distribution: Option<Distribution>,
    artifact: Option<crate::models::Artifact>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl Store for FakeStore {
    async fn get_domain(&self, _name: &str) -> anyhow::Result<Option<Domain>> {
        Ok(None)
    }
    async fn get_content_guard(&self, _id: Uuid) -> anyhow::Result<Option<crate::models::ContentGuard>> {
        Ok(None)
    }
    async fn find_distribution(&self, _domain_id: Uuid, _candidates: &[String]) -> anyhow::Result<Option<Distribution>> {
        Ok(self.distribution.clone())
    }
    async fn list_distributions(&self, _domain_id: Uuid, _hide_guarded: bool) -> anyhow::Result<Vec<Distribution>> {
        Ok(vec![])
    }
    async fn get_repository(&self, _id: Uuid) -> anyhow::Result<Option<crate::models::Repository>> {
        Ok(None)
    }
    async fn get_publication(&self, _id: Uuid) -> anyhow::Result<Option<crate::models::Publication>> {
        Ok(None)
    }
    async fn get_remote(&self, _id: Uuid) -> anyhow::Result<Option<crate::models::Remote>> {
        Ok(None)
    }
    async fn get_repository_version(&self, _id: Uuid) -> anyhow::Result<Option<crate::models::RepositoryVersion>> {
        Ok(None)
    }
    async fn latest_repository_version(&self, _repository_id: Uuid) -> anyhow::Result<Option<crate::models::RepositoryVersion>> {
        Ok(None)
    }
    async fn latest_publication(&self, _repository_id: Uuid) -> anyhow::Result<Option<crate::models::Publication>> {
        Ok(None)
    }
    async fn latest_checkpoint_publication(
        &self,
        _repository_id: Uuid,
        _at_or_before: time::OffsetDateTime,
    ) -> anyhow::Result<Option<crate::models::Publication>> {
        Ok(None)
    }
    async fn list_checkpoint_timestamps(&self, _repository_id: Uuid) -> anyhow::Result<Vec<time::OffsetDateTime>> {
        Ok(vec![])
    }
    async fn published_artifact(&self, _publication_id: Uuid, _relative_path: &str) -> anyhow::Result<Vec<ContentArtifact>> {
        Ok(vec![])
    }
    async fn version_content_artifact(&self, _repository_version_id: Uuid, _relative_path: &str) -> anyhow::Result<Vec<ContentArtifact>> {
        Ok(vec![])
    }
    async fn list_directory_under_publication(&self, _publication_id: Uuid, _prefix: &str) -> anyhow::Result<Vec<ListingEntry>> {
        Ok(vec![])
    }
    async fn list_directory_under_version(&self, _repository_version_id: Uuid, _prefix: &str) -> anyhow::Result<Vec<ListingEntry>> {
        Ok(vec![])
    }
    async fn remote_artifacts_for(
        &self,
        _content_artifact_id: Uuid,
        _cooldown: std::time::Duration,
    ) -> anyhow::Result<Vec<crate::models::RemoteArtifact>> {
        Ok(vec![])
    }
    async fn find_remote_artifact_by_url(&self, _remote_id: Uuid, _url: &str) -> anyhow::Result<Option<crate::models::RemoteArtifact>> {
        Ok(None)
    }
    async fn mark_remote_artifact_failed(&self, _id: Uuid, _at: time::OffsetDateTime) -> anyhow::Result<()> {
        Ok(())
    }
    async fn save_artifact(&self, _domain_id: Uuid, _storage_path: &str, _size: i64, _sha256: &str) -> anyhow::Result<crate::models::Artifact> {
        unreachable!("not exercised by the artifact-by-digest path")
    }
    async fn attach_artifact_to_content_artifact(&self, _content_artifact_id: Uuid, _artifact_id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }
    async fn save_remote_artifact(
        &self,
        _remote_id: Uuid,
        _content_artifact_id: Uuid,
        _url: &str,
        _size: Option<i64>,
    ) -> anyhow::Result<()> {
        Ok(())
    }
    async fn find_artifact_by_sha256(&self, _domain_id: Uuid, _sha256: &str) -> anyhow::Result<Option<crate::models::Artifact>> {
        Ok(self.artifact.clone())
    }
    async fn get_artifact(&self, _id: Uuid) -> anyhow::Result<Option<crate::models::Artifact>> {
        Ok(self.artifact.clone())
    }
    async fn get_content_artifact(&self, _id: Uuid) -> anyhow::Result<Option<ContentArtifact>> {
        Ok(None)
    }
    async fn create_content_artifact(&self, _domain_id: Uuid, _relative_path: &str, _artifact_id: Uuid) -> anyhow::Result<ContentArtifact> {
        unreachable!("not exercised by the artifact-by-digest path")
    }
    async fn find_content_artifact_by_path(&self, _repository_version_id: Uuid, _relative_path: &str) -> anyhow::Result<Option<ContentArtifact>> {
        Ok(None)
    }
    async fn add_content_to_repository_version(&self, _repository_version_id: Uuid, _content_id: Uuid) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
fn test_settings() -> Settings {
    toml::from_str(
        r#"
        bind_addr = "127.0.0.1:8080"
        db_pgconn = "postgres://localhost/pulp"
        redis_url = "redis://localhost"
        content_path_prefix = "/pulp/content/"
        "#,
    )
    .unwrap()
}

#[tokio::test]
async fn test_dispatch_serves_artifact_distribution_by_digest() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("a.deb"), b"hello world").unwrap();

    let domain = Domain {
        id: uuid::Uuid::new_v4(),
        name: "default".to_string(),
        storage_kind: crate::models::StorageKind::Local,
        redirect_to_object_storage: false,
        storage_settings: serde_json::json!({ "root": tmp.path().to_str().unwrap() }),
    };
    let sha256 = "e".repeat(64);
    let artifact = crate::models::Artifact {
        id: uuid::Uuid::new_v4(),
        domain_id: domain.id,
        storage_path: "a.deb".to_string(),
        size: 11,
        sha256: sha256.clone(),
    };
    let distribution = Distribution {
        id: uuid::Uuid::new_v4(),
        domain_id: domain.id,
        base_path: "artifacts".to_string(),
        kind: DistributionKind::Artifact,
        hidden: false,
        checkpoint: false,
        serve_from_publication: false,
        content_guard_id: None,
        publication_id: None,
        repository_id: None,
        repository_version_id: None,
        remote_id: None,
    };
    let store: Arc<dyn Store> = Arc::new(FakeStore { distribution: Some(distribution), artifact: Some(artifact) });
    let ctx = DispatchContext {
        store,
        client: reqwest::Client::new(),
        metrics: Arc::new(Metrics::default()),
        blob: Arc::new(BlobStore::new(None)),
        settings: Arc::new(test_settings()),
        cache: None,
    };

    let outcome = dispatch(&ctx, &domain, &format!("artifacts/{sha256}"), Method::GET, &HeaderMap::new(), None, "", None)
        .await
        .unwrap();

    match outcome {
        DispatchOutcome::File { total_size, .. } => assert_eq!(total_size, 11),
        _ => panic!("expected a local file response"),
    }
}

#[tokio::test]
async fn test_dispatch_not_found_when_no_distribution_matches() {
    let domain = Domain {
        id: uuid::Uuid::new_v4(),
        name: "default".to_string(),
        storage_kind: crate::models::StorageKind::Local,
        redirect_to_object_storage: false,
        storage_settings: serde_json::json!({}),
    };
    let store: Arc<dyn Store> = Arc::new(FakeStore { distribution: None, artifact: None });
    let ctx = DispatchContext {
        store,
        client: reqwest::Client::new(),
        metrics: Arc::new(Metrics::default()),
        blob: Arc::new(BlobStore::new(None)),
        settings: Arc::new(test_settings()),
        cache: None,
    };

    let err = dispatch(&ctx, &domain, "nope/at/all", Method::GET, &HeaderMap::new(), None, "", None)
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::PathNotResolved { .. }));
}
