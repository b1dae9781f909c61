//! Request coalescing.
//!
//! At most one fill per fully-qualified cache key runs in this process at a
//! time; concurrent callers for the same key wait and share the leader's
//! outcome. Nothing is cached past the in-flight window.

use crate::error::{Error, Result};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use tokio::sync::broadcast;

type FlightResult = std::result::Result<Bytes, Error>;

/// Keyed single-flight group.
pub(crate) struct SingleFlight {
    inflight: DashMap<String, broadcast::Sender<FlightResult>>,
}

/// Removes the in-flight entry if the leader never completed, so a dropped
/// leader does not strand later callers.
struct FlightGuard<'a> {
    inflight: &'a DashMap<String, broadcast::Sender<FlightResult>>,
    key: &'a str,
    done: bool,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.inflight.remove(self.key);
        }
    }
}

impl SingleFlight {
    pub(crate) fn new() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }

    /// Run `fill` for `key`, or wait for the in-flight fill of the same key
    /// and share its outcome.
    ///
    /// If the leader is dropped before completing, waiters observe the
    /// closed channel and re-elect a leader among themselves.
    pub(crate) async fn run<F, Fut>(&self, key: &str, fill: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>>,
    {
        let mut fill = Some(fill);

        loop {
            let waiter = match self.inflight.entry(key.to_string()) {
                Entry::Occupied(entry) => Some(entry.get().subscribe()),
                Entry::Vacant(entry) => {
                    let (tx, _) = broadcast::channel(1);
                    entry.insert(tx);
                    None
                }
            };

            match waiter {
                Some(mut rx) => match rx.recv().await {
                    Ok(result) => return result,
                    // Leader dropped without publishing; try again.
                    Err(_) => continue,
                },
                None => {
                    let mut guard = FlightGuard {
                        inflight: &self.inflight,
                        key,
                        done: false,
                    };

                    let fill = fill.take().expect("single flight leader runs once");
                    let result = fill().await;
                    guard.done = true;

                    // Remove the entry before publishing so late callers
                    // start a fresh flight instead of waiting on a channel
                    // that will never fire again.
                    if let Some((_, tx)) = self.inflight.remove(key) {
                        let _ = tx.send(result.clone());
                    }

                    return result;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_fill() {
        let flight = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let flight = flight.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                flight
                    .run("ca:p:k", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Bytes::from_static(b"value"))
                    })
                    .await
            }));
        }

        for task in tasks {
            let result = task.await.unwrap().unwrap();
            assert_eq!(result, Bytes::from_static(b"value"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_coalesce() {
        let flight = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let a = {
            let flight = flight.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                flight
                    .run("ca:p:a", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(Bytes::from_static(b"a"))
                    })
                    .await
            })
        };
        let b = {
            let flight = flight.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                flight
                    .run("ca:p:b", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(Bytes::from_static(b"b"))
                    })
                    .await
            })
        };

        assert_eq!(a.await.unwrap().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(b.await.unwrap().unwrap(), Bytes::from_static(b"b"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_followers_share_leader_error() {
        let flight = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let flight = flight.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                flight
                    .run("ca:p:k", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Err(Error::Transport("backend down".into()))
                    })
                    .await
            }));
        }

        for task in tasks {
            let err = task.await.unwrap().unwrap_err();
            assert!(matches!(err, Error::Transport(m) if m == "backend down"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_calls_fill_each_time() {
        let flight = SingleFlight::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let result = flight
                .run("ca:p:k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Bytes::from_static(b"v"))
                })
                .await
                .unwrap();
            assert_eq!(result, Bytes::from_static(b"v"));
        }

        // The group does not cache results beyond the in-flight window.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dropped_leader_re_elects() {
        let flight = Arc::new(SingleFlight::new());

        // Leader that never completes; dropped via task abort.
        let leader = {
            let flight = flight.clone();
            tokio::spawn(async move {
                flight
                    .run("ca:p:k", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(Bytes::from_static(b"never"))
                    })
                    .await
            })
        };

        // Give the leader time to claim the key.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let follower = {
            let flight = flight.clone();
            tokio::spawn(async move {
                flight
                    .run("ca:p:k", || async { Ok(Bytes::from_static(b"rescued")) })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();

        let result = follower.await.unwrap().unwrap();
        assert_eq!(result, Bytes::from_static(b"rescued"));
    }
}
