use std::future::Future;
use std::time::Duration;

/// Run the RPC produced by `task_gen` up to `max_retry` times. Each attempt is
/// given `deadline` to finish.
pub(crate) async fn retry_rpc<Func, Fut, T>(
    max_retry: usize,
    deadline: Duration,
    mut task_gen: Func,
) -> std::io::Result<T>
where
    Fut: Future<Output = std::io::Result<T>> + Send + 'static,
    Func: FnMut(usize) -> Fut,
{
    let mut last_error = None;
    for i in 0..max_retry {
        if i != 0 {
            tokio::time::sleep(Duration::from_millis((1 << i) * 10)).await;
        }
        match tokio::time::timeout(deadline, task_gen(i)).await {
            Ok(Ok(reply)) => return Ok(reply),
            Ok(Err(e)) => last_error = Some(e),
            Err(_) => {}
        }
    }
    Err(last_error.unwrap_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("Timed out after {} retries", max_retry),
        )
    }))
}

/// Whether `count` servers form a majority of a cluster of `cluster_size`.
pub(crate) fn is_quorum(count: usize, cluster_size: usize) -> bool {
    count > cluster_size / 2
}
