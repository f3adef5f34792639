//! Write-policy handler (C4, §4.3): routes writes across a local
//! (cache-path) backend and an optional remote backend. Remote failures
//! under `optimistic` never fail the call — they surface through the
//! remote backend's own `pending_changes_stream`/`sync_status_stream`
//! (§4.3), so this handler only fires the remote write and forgets it.

use crate::backend::SharedBackend;
use crate::cache::config::WritePolicy;
use crate::common::{Entity, EntityId};
use crate::error::{BackendError, Result};
use std::sync::Arc;
use tracing::warn;

pub struct WritePolicyHandler<T: Entity, ID: EntityId> {
    local: SharedBackend<T, ID>,
    remote: Option<SharedBackend<T, ID>>,
    default_policy: WritePolicy,
}

impl<T: Entity, ID: EntityId> WritePolicyHandler<T, ID> {
    pub fn new(
        local: SharedBackend<T, ID>,
        remote: Option<SharedBackend<T, ID>>,
        default_policy: WritePolicy,
    ) -> Self {
        Self { local, remote, default_policy }
    }

    fn effective_policy(&self, policy: Option<WritePolicy>) -> WritePolicy {
        policy.unwrap_or(self.default_policy)
    }

    fn require_remote(&self) -> Result<&SharedBackend<T, ID>> {
        self.remote
            .as_ref()
            .ok_or_else(|| BackendError::new("write policy requires a remote backend, none configured").into())
    }

    /// `save(item, policy?)` (§4.3).
    pub async fn save(&self, item: T, policy: Option<WritePolicy>) -> Result<T> {
        match self.effective_policy(policy) {
            WritePolicy::Optimistic => {
                let saved = self.local.save(item).await?;
                if let Some(remote) = &self.remote {
                    let remote = Arc::clone(remote);
                    let pending = saved.clone();
                    tokio::spawn(async move {
                        if let Err(e) = remote.save(pending).await {
                            warn!(error = %e, "optimistic remote save failed, tracked via backend's pending changes");
                        }
                    });
                }
                Ok(saved)
            }
            WritePolicy::CacheOnly => self.local.save(item).await,
            WritePolicy::RemoteFirst => {
                let remote = self.require_remote()?;
                let saved = remote.save(item).await?;
                if let Err(e) = self.local.save(saved.clone()).await {
                    warn!(error = %e, "remote_first local mirror failed, remote write already committed");
                }
                Ok(saved)
            }
            WritePolicy::RemoteOnly => self.require_remote()?.save(item).await,
        }
    }

    pub async fn save_all(&self, items: Vec<T>, policy: Option<WritePolicy>) -> Result<Vec<T>> {
        match self.effective_policy(policy) {
            WritePolicy::Optimistic => {
                let saved = self.local.save_all(items).await?;
                if let Some(remote) = &self.remote {
                    let remote = Arc::clone(remote);
                    let pending = saved.clone();
                    tokio::spawn(async move {
                        if let Err(e) = remote.save_all(pending).await {
                            warn!(error = %e, "optimistic remote save_all failed, tracked via backend's pending changes");
                        }
                    });
                }
                Ok(saved)
            }
            WritePolicy::CacheOnly => self.local.save_all(items).await,
            WritePolicy::RemoteFirst => {
                let remote = self.require_remote()?;
                let saved = remote.save_all(items).await?;
                if let Err(e) = self.local.save_all(saved.clone()).await {
                    warn!(error = %e, "remote_first local mirror failed, remote write already committed");
                }
                Ok(saved)
            }
            WritePolicy::RemoteOnly => self.require_remote()?.save_all(items).await,
        }
    }

    pub async fn delete(&self, id: &ID, policy: Option<WritePolicy>) -> Result<()> {
        match self.effective_policy(policy) {
            WritePolicy::Optimistic => {
                self.local.delete(id).await?;
                if let Some(remote) = &self.remote {
                    let remote = Arc::clone(remote);
                    let id = id.clone();
                    tokio::spawn(async move {
                        if let Err(e) = remote.delete(&id).await {
                            warn!(error = %e, "optimistic remote delete failed, tracked via backend's pending changes");
                        }
                    });
                }
                Ok(())
            }
            WritePolicy::CacheOnly => self.local.delete(id).await,
            WritePolicy::RemoteFirst => {
                let remote = self.require_remote()?;
                remote.delete(id).await?;
                if let Err(e) = self.local.delete(id).await {
                    warn!(error = %e, "remote_first local mirror failed, remote delete already committed");
                }
                Ok(())
            }
            WritePolicy::RemoteOnly => self.require_remote()?.delete(id).await,
        }
    }
}
