//! Per-distribution-kind content serving, replacing the original's subclass dispatch
//! (`Distribution.cast()`) with one small trait and a kind-to-impl match.

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};

use crate::dispatcher::DispatchContext;
use crate::error::GatewayError;
use crate::models::{Distribution, DistributionKind, Domain};
use crate::outcome::{BodyPolicy, DispatchOutcome};
use crate::responder;
use crate::store::ListingEntry;

#[async_trait]
pub trait DistributionCapabilities: Send + Sync {
    /// Tries to serve `rel_path` directly, without ever touching a publication or
    /// repository version. `None` means this distribution kind has nothing special to
    /// do here and the generic scope-resolution path should run instead.
    async fn content_handler(
        &self,
        ctx: &DispatchContext,
        domain: &Domain,
        rel_path: &str,
        path: &str,
        range_header: Option<&str>,
        body_policy: BodyPolicy,
    ) -> Result<Option<DispatchOutcome>, GatewayError>;

    /// Lets a distribution kind fold synthetic entries into a rendered directory
    /// listing before it is shown to the client. Default: no overlay.
    fn content_handler_list_directory(&self, entries: Vec<ListingEntry>) -> Vec<ListingEntry> {
        entries
    }

    /// Extra headers this distribution kind always wants set on a served response.
    fn content_headers_for(&self, rel_path: &str) -> Vec<(HeaderName, HeaderValue)> {
        let _ = rel_path;
        Vec::new()
    }
}

/// A plain distribution: publication, repository (version), and/or remote as configured.
pub struct StandardCapabilities;

#[async_trait]
impl DistributionCapabilities for StandardCapabilities {
    async fn content_handler(
        &self,
        _ctx: &DispatchContext,
        _domain: &Domain,
        _rel_path: &str,
        _path: &str,
        _range_header: Option<&str>,
        _body_policy: BodyPolicy,
    ) -> Result<Option<DispatchOutcome>, GatewayError> {
        Ok(None)
    }
}

/// The synthetic distribution that serves a single artifact directly by its digest.
pub struct ArtifactCapabilities;

#[async_trait]
impl DistributionCapabilities for ArtifactCapabilities {
    async fn content_handler(
        &self,
        ctx: &DispatchContext,
        domain: &Domain,
        rel_path: &str,
        path: &str,
        range_header: Option<&str>,
        body_policy: BodyPolicy,
    ) -> Result<Option<DispatchOutcome>, GatewayError> {
        let sha256 = rel_path.trim_matches('/');
        let artifact = ctx
            .store
            .find_artifact_by_sha256(domain.id, sha256)
            .await
            .map_err(GatewayError::Internal)?
            .ok_or_else(|| GatewayError::path_not_resolved(path))?;
        let outcome = responder::respond(domain, &ctx.blob, &ctx.metrics, &artifact, sha256, range_header, body_policy).await?;
        Ok(Some(outcome))
    }

    /// Never listed; the dispatcher excludes this kind before a listing is ever built.
    fn content_handler_list_directory(&self, _entries: Vec<ListingEntry>) -> Vec<ListingEntry> {
        Vec::new()
    }
}

impl Distribution {
    pub fn capabilities(&self) -> Box<dyn DistributionCapabilities> {
        match self.kind {
            DistributionKind::Standard => Box::new(StandardCapabilities),
            DistributionKind::Artifact => Box::new(ArtifactCapabilities),
        }
    }
}
