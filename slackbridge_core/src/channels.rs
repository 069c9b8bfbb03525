//! Channel id to channel name resolution.

use futures::future::join_all;
use tracing::{debug, warn};

use crate::gateway::SlackApi;

/// A channel that resolved to a searchable name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub id: String,
    pub name: String,
}

/// Resolve every id independently, keeping input order.
///
/// Failures are logged per channel and dropped; an empty result tells the
/// caller to fall back to an unscoped search.
pub async fn resolve_channel_names(api: &dyn SlackApi, channel_ids: &[String]) -> Vec<ResolvedChannel> {
    let lookups = channel_ids.iter().map(|id| async move {
        match api.channel_name(id).await {
            Ok(name) => {
                debug!(channel_id = %id, channel_name = %name, "Resolved channel name");
                Some(ResolvedChannel {
                    id: id.clone(),
                    name,
                })
            }
            Err(e) => {
                warn!(
                    event = "channel_resolution_failed",
                    channel_id = %id,
                    error_kind = e.kind().as_str(),
                    error = %e,
                    "Skipping channel that could not be resolved"
                );
                None
            }
        }
    });

    join_all(lookups).await.into_iter().flatten().collect()
}
