use crate::error::ReprovisionError;
use nimbus_providers::ApiErrorKind;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub timeout: Duration,
}

impl PollSettings {
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Number of fetches before giving up (at least one).
    pub fn max_polls(&self) -> u32 {
        if self.interval.is_zero() {
            return (self.timeout.as_millis().max(1)).min(u32::MAX as u128) as u32;
        }
        let polls = self.timeout.as_millis() / self.interval.as_millis();
        polls.clamp(1, u32::MAX as u128) as u32
    }
}

/// Wait budgets for every blocking phase of a run.
#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub stop: PollSettings,
    pub replace: PollSettings,
    pub start: PollSettings,
    pub reattach: PollSettings,
    pub ssh_warmup: Duration,
    pub ssh_attempts: u32,
    pub ssh_backoff: Duration,
    pub ssh_timeout: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        let every = Duration::from_secs(15);
        Self {
            stop: PollSettings::new(every, Duration::from_secs(600)),
            replace: PollSettings::new(every, Duration::from_secs(1200)),
            start: PollSettings::new(every, Duration::from_secs(600)),
            reattach: PollSettings::new(every, Duration::from_secs(90)),
            ssh_warmup: Duration::from_secs(30),
            ssh_attempts: 5,
            ssh_backoff: every,
            ssh_timeout: Duration::from_secs(10),
        }
    }
}

impl Timings {
    /// No sleeping. Poll counts stay bounded (20 per phase).
    pub fn instant() -> Self {
        let fast = PollSettings::new(Duration::ZERO, Duration::from_millis(20));
        Self {
            stop: fast,
            replace: fast,
            start: fast,
            reattach: fast,
            ssh_warmup: Duration::ZERO,
            ssh_attempts: 2,
            ssh_backoff: Duration::ZERO,
            ssh_timeout: Duration::from_secs(1),
        }
    }
}

/// Fetch with `poll_fn` until `predicate` holds, sleeping `interval` between fetches.
///
/// Returns the first accepted value. Authentication failures end the wait
/// immediately; any other fetch error is logged and the loop keeps going,
/// since the control plane is known to flap during volume swaps.
pub async fn await_state<T, F, Fut, P>(
    what: &str,
    settings: PollSettings,
    mut poll_fn: F,
    mut predicate: P,
) -> Result<T, ReprovisionError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
    P: FnMut(&T) -> bool,
{
    let max = settings.max_polls();
    for attempt in 1..=max {
        match poll_fn().await {
            Ok(value) if predicate(&value) => {
                tracing::debug!("{} reached after {} poll(s)", what, attempt);
                return Ok(value);
            }
            Ok(_) => tracing::debug!("waiting for {} ({}/{})", what, attempt, max),
            Err(e) => {
                let err = ReprovisionError::from_provider(e);
                if matches!(err.provider_kind(), Some(ApiErrorKind::Auth)) {
                    return Err(err);
                }
                if let ReprovisionError::DependencyMissing(_) = err {
                    return Err(err);
                }
                tracing::warn!("poll for {} failed ({}/{}): {}", what, attempt, max, err);
            }
        }
        if attempt < max && !settings.interval.is_zero() {
            tokio::time::sleep(settings.interval).await;
        }
    }
    Err(ReprovisionError::Timeout {
        what: what.to_string(),
        waited: settings.timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_providers::ProviderError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn production_budgets() {
        let t = Timings::default();
        assert_eq!(t.stop.max_polls(), 40);
        assert_eq!(t.replace.max_polls(), 80);
        assert_eq!(t.ssh_attempts, 5);
    }

    #[tokio::test]
    async fn returns_first_matching_value() {
        let counter = &AtomicU32::new(0);
        let got = await_state(
            "counter",
            PollSettings::new(Duration::ZERO, Duration::from_millis(10)),
            || async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) },
            |v| *v == 3,
        )
        .await
        .unwrap();
        assert_eq!(got, 3);
    }

    #[tokio::test]
    async fn times_out_when_predicate_never_holds() {
        let err = await_state(
            "nothing",
            PollSettings::new(Duration::ZERO, Duration::from_millis(5)),
            || async { Ok(false) },
            |v| *v,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReprovisionError::Timeout { .. }));
    }

    #[tokio::test]
    async fn transient_errors_keep_polling() {
        let counter = &AtomicU32::new(0);
        let got = await_state(
            "flaky",
            PollSettings::new(Duration::ZERO, Duration::from_millis(10)),
            || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ProviderError::from_output("get", r#"{"status":500,"message":"internal"}"#).into())
                } else {
                    Ok(7)
                }
            },
            |v| *v == 7,
        )
        .await
        .unwrap();
        assert_eq!(got, 7);
    }

    #[tokio::test]
    async fn auth_errors_stop_polling() {
        let err = await_state(
            "auth",
            PollSettings::new(Duration::ZERO, Duration::from_millis(10)),
            || async {
                Err::<u32, _>(
                    ProviderError::from_output("get", r#"{"status":401,"code":"NotAuthenticated","message":"x"}"#).into(),
                )
            },
            |_| true,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ReprovisionError::Auth(_)));
    }
}
