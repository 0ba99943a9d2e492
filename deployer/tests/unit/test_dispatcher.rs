//! Dispatcher budget and fairness tests

use std::time::Duration;

use crmdeploy::authn::credential::fingerprint;
use crmdeploy::authn::CredentialKey;
use crmdeploy::dispatch::{DispatchOptions, Dispatcher};
use crmdeploy::errors::RemoteError;
use futures::future::join_all;
use tokio::time::Instant;

fn dispatcher() -> Dispatcher {
    Dispatcher::new(DispatchOptions {
        max_requests: 2,
        window: Duration::from_secs(1),
        ..Default::default()
    })
}

/// Submit `calls` requests at once, returning when the last one was admitted
async fn admit_all(
    dispatcher: &Dispatcher,
    key: &CredentialKey,
    start: Instant,
    calls: usize,
) -> Duration {
    join_all((0..calls).map(|_| {
        dispatcher.submit(key, || async { Ok::<_, RemoteError>(start.elapsed()) })
    }))
    .await
    .into_iter()
    .map(Result::unwrap)
    .max()
    .unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn test_budget_is_enforced_per_window() {
    let dispatcher = dispatcher();
    let key = fingerprint("pat-one");
    let start = Instant::now();

    let admitted = join_all((0..5).map(|_| {
        dispatcher.submit(&key, || async { Ok::<_, RemoteError>(start.elapsed()) })
    }))
    .await;

    let mut elapsed: Vec<Duration> = admitted.into_iter().map(Result::unwrap).collect();
    elapsed.sort();
    assert!(elapsed[1] < Duration::from_secs(1));
    assert!(elapsed[2] >= Duration::from_secs(1));
    assert!(elapsed[4] >= Duration::from_secs(2));

    let stats = dispatcher.stats(&key);
    assert_eq!(stats.admitted, 5);
    assert!(stats.throttled >= 1);
    assert_eq!(stats.waiting, 0);
}

#[tokio::test(start_paused = true)]
async fn test_credentials_do_not_share_a_budget() {
    let dispatcher = dispatcher();
    let first = fingerprint("pat-first");
    let second = fingerprint("pat-second");
    let start = Instant::now();

    let (first_done, second_done) = tokio::join!(
        admit_all(&dispatcher, &first, start, 4),
        admit_all(&dispatcher, &second, start, 4)
    );

    // each credential needs two windows on its own, running both side by side costs nothing
    assert!(first_done < Duration::from_secs(2));
    assert!(second_done < Duration::from_secs(2));
    assert_eq!(dispatcher.stats(&first).admitted, 4);
    assert_eq!(dispatcher.stats(&second).admitted, 4);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_credential_has_empty_stats() {
    let dispatcher = dispatcher();
    let stats = dispatcher.stats(&fingerprint("never-used"));
    assert_eq!(stats.admitted, 0);
    assert_eq!(stats.rate_limited, 0);
}
