//! Non-destructive queue inspection
//!
//! Counts a queue's current contents through the boundary's browse snapshot
//! without consuming anything. Single-threaded by design; used standalone in
//! browse mode and as the sizing step before a purge.

use crate::error::Result;
use broker_client::{Broker, Credentials, Endpoint, Session};
use std::sync::Arc;
use tracing::info;

/// Count the messages currently on `queue`, optionally logging them.
///
/// Delivery state and ordering are untouched; running this twice in a row
/// reports the same depth.
pub async fn browse_queue(
    broker: &Arc<dyn Broker>,
    credentials: &Credentials,
    endpoint: &Endpoint,
    queue: &str,
    print_every: u64,
    print_each: bool,
) -> Result<u64> {
    let mut session = broker.connect(endpoint, credentials).await?;
    let snapshot = session.browse(queue).await?;

    let mut count = 0u64;
    for message in &snapshot {
        count += 1;
        if print_each {
            info!(
                "browsed message {} on {}: {}",
                message.sequence, queue, message.body
            );
        }
        if count % print_every == 0 {
            info!("browsed {} messages on {}", count, queue);
        }
    }
    session.close().await?;
    Ok(count)
}
