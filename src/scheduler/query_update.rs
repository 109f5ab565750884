use futures_util::stream::{FuturesUnordered, StreamExt};
use std::future::Future;

use crate::error::{AppError, Result};

/// Issues an uncertified (query) and a certified (update) read concurrently.
///
/// `on_load` runs for each successful read as soon as it resolves, tagged with its
/// `certified` flag. A failure of one read never suppresses the other. A query
/// response arriving after the certified one was applied is dropped. Errors
/// returned by `on_load` abort the round.
pub async fn query_and_update<T, Req, Fut, OnLoad, OnUpdateError>(
    request: Req,
    mut on_load: OnLoad,
    mut on_update_error: OnUpdateError,
) -> Result<()>
where
    Req: Fn(bool) -> Fut,
    Fut: Future<Output = Result<T>>,
    OnLoad: FnMut(T, bool) -> Result<()>,
    OnUpdateError: FnMut(AppError),
{
    let mut pending: FuturesUnordered<_> = [false, true]
        .into_iter()
        .map(|certified| {
            let call = request(certified);
            async move { (certified, call.await) }
        })
        .collect();

    let mut certified_done = false;
    while let Some((certified, result)) = pending.next().await {
        match result {
            Ok(_) if certified_done => {
                tracing::debug!("Query response resolved after certified response, ignored");
            }
            Ok(response) => on_load(response, certified)?,
            Err(err) if certified => on_update_error(err),
            Err(err) => tracing::warn!("Query call failed: {}", err),
        }
        certified_done |= certified;
    }

    Ok(())
}
