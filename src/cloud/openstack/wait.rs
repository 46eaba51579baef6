//! Resource state polling
//!
//! Every create/delete in the driver blocks on [`wait_for_state`] until the
//! resource reaches a target state, lands in a failure state, disappears,
//! or the wall-clock budget runs out.

use super::wire::{WireServer, WireSnapshot, WireVolume};
use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Poll budget for a single wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Wall-clock ceiling for the whole wait
    pub timeout: Duration,
    /// Sleep between polls, clamped to the remaining budget
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3600),
            interval: Duration::from_secs(2),
        }
    }
}

/// Anything with a backend status string
pub trait HasStatus {
    fn status(&self) -> &str;
}

impl HasStatus for WireVolume {
    fn status(&self) -> &str {
        &self.status
    }
}

impl HasStatus for WireSnapshot {
    fn status(&self) -> &str {
        &self.status
    }
}

impl HasStatus for WireServer {
    fn status(&self) -> &str {
        &self.status
    }
}

/// Poll `fetch` until the resource settles.
///
/// `target == None` waits for the resource to disappear. States are compared
/// uppercased. Returns `(true, resource)` on reaching the target (or
/// disappearing when that is the goal) and `(false, resource)` when the
/// resource lands in one of `failure_states` or vanishes unexpectedly.
/// Transient fetch errors keep polling; anything else is returned at once.
pub async fn wait_for_state<T, F, Fut>(
    kind: &str,
    id: &str,
    target: Option<&str>,
    failure_states: &[&str],
    config: &PollConfig,
    mut fetch: F,
) -> Result<(bool, Option<T>)>
where
    T: HasStatus,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + config.timeout;
    let target_label = target.unwrap_or("deleted");

    loop {
        match fetch().await {
            Ok(None) => {
                if target.is_none() {
                    info!("{} {} is gone", kind, id);
                    return Ok((true, None));
                }
                warn!("{} {} vanished while waiting for {}", kind, id, target_label);
                return Ok((false, None));
            }
            Ok(Some(resource)) => {
                let state = resource.status().to_uppercase();
                if target == Some(state.as_str()) {
                    info!("{} {} reached {}", kind, id, state);
                    return Ok((true, Some(resource)));
                }
                if failure_states.contains(&state.as_str()) {
                    warn!("{} {} entered {} while waiting for {}", kind, id, state, target_label);
                    return Ok((false, Some(resource)));
                }
                debug!("{} {} is {}, waiting for {}", kind, id, state, target_label);
            }
            Err(e) if e.is_transient() => {
                warn!("Transient error polling {} {}: {}", kind, id, e);
            }
            Err(e) => return Err(e),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(Error::ResourceTimeout {
                kind: kind.to_string(),
                id: id.to_string(),
                target: target_label.to_string(),
                seconds: config.timeout.as_secs(),
            });
        }
        tokio::time::sleep(config.interval.min(deadline - now)).await;
    }
}
