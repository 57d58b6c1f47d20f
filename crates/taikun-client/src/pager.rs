//! Offset pagination.
//!
//! Every list endpoint answers with a window of rows plus the total the
//! platform believes exists. The next offset is always the number of rows
//! accumulated so far, which tolerates short and long pages alike.

use std::future::Future;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use taikun_core::{Error, Result};

/// One window of a list endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub total_count: i64,
}

impl<T> Page<T> {
    pub const fn new(data: Vec<T>, total_count: i64) -> Self {
        Self { data, total_count }
    }
}

/// Fetch pages until the accumulated rows reach the announced total.
///
/// A total that shrinks below what was already accumulated terminates the
/// loop, and the result is cut to the last announced total. An empty page
/// short of the total also terminates. Any fetch error propagates with no
/// partial result.
pub async fn collect_pages<T, F, Fut>(cancel: &CancellationToken, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut accumulated: Vec<T> = Vec::new();
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let offset = accumulated.len();
        let page = fetch(offset).await?;
        let total = usize::try_from(page.total_count).unwrap_or(0);
        let received = page.data.len();
        accumulated.extend(page.data);
        debug!(offset, received, total, "Fetched page");

        if accumulated.len() >= total {
            accumulated.truncate(total);
            return Ok(accumulated);
        }
        if received == 0 {
            warn!(
                offset,
                total,
                accumulated = accumulated.len(),
                "Empty page before reaching total, stopping"
            );
            return Ok(accumulated);
        }
    }
}
