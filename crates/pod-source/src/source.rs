//! Pod watch source backed by the Kubernetes API.

use crate::pod::PodSnapshot;
use async_trait::async_trait;
use futures::{StreamExt, future};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, WatchEvent, WatchParams};
use kube::Client;
use tracing::{debug, warn};
use watch_hub::{SourceError, SourceEvent, WatchSource, WatchStream};

/// Watches pods in a namespace. The partition key is the namespace name.
#[derive(Clone)]
pub struct PodWatchSource {
    client: Client,
}

impl std::fmt::Debug for PodWatchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PodWatchSource").finish_non_exhaustive()
    }
}

impl PodWatchSource {
    /// Creates a source that lists and watches pods through `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl WatchSource for PodWatchSource {
    type Resource = PodSnapshot;

    async fn list(&self, namespace: &str) -> Result<Vec<PodSnapshot>, SourceError> {
        let pods = self
            .api(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| SourceError::List {
                partition: namespace.to_string(),
                message: e.to_string(),
            })?;

        debug!("Listed {} pod(s) in namespace {}", pods.items.len(), namespace);
        Ok(pods.items.iter().map(PodSnapshot::from_pod).collect())
    }

    async fn watch(&self, namespace: &str) -> Result<WatchStream<PodSnapshot>, SourceError> {
        let api = self.api(namespace);
        let watch_error = |message: String| SourceError::Watch {
            partition: namespace.to_string(),
            message,
        };

        // Start from the current resourceVersion so only changes made after
        // this point are streamed; existing pods are covered by list().
        let current = api
            .list_metadata(&ListParams::default().limit(1))
            .await
            .map_err(|e| watch_error(e.to_string()))?;
        let version = current.metadata.resource_version.unwrap_or_default();

        let events = api
            .watch(&WatchParams::default(), &version)
            .await
            .map_err(|e| watch_error(e.to_string()))?;

        debug!("Opened pod watch for namespace {} at version {:?}", namespace, version);
        Ok(events
            .filter_map(|event| future::ready(translate(event)))
            .boxed())
    }
}

/// Maps a raw watch event onto a hub source event, skipping bookmarks.
fn translate(
    event: Result<WatchEvent<Pod>, kube::Error>,
) -> Option<Result<SourceEvent<PodSnapshot>, SourceError>> {
    match event {
        Ok(WatchEvent::Added(pod)) => Some(Ok(SourceEvent::Created(PodSnapshot::from_pod(&pod)))),
        Ok(WatchEvent::Modified(pod)) => {
            Some(Ok(SourceEvent::Modified(PodSnapshot::from_pod(&pod))))
        }
        Ok(WatchEvent::Deleted(pod)) => Some(Ok(SourceEvent::Deleted(PodSnapshot::from_pod(&pod)))),
        Ok(WatchEvent::Bookmark(_)) => None,
        Ok(WatchEvent::Error(e)) => {
            warn!("Pod watch returned an error event: {:?}", e);
            Some(Err(SourceError::Stream(format!("{:?}", e))))
        }
        Err(e) => Some(Err(SourceError::Stream(e.to_string()))),
    }
}
