//! Shared utility functions.

use std::future::Future;
use std::time::Duration;

use tokio::time::timeout;

use crate::{Error, Result};

/// Run `fut` on its own Tokio task under a deadline.
///
/// A panic inside `fut` surfaces as `Error::TaskJoin`. On expiry the task
/// is aborted at its next suspension point and `Error::Timeout` is returned.
pub async fn spawn_with_timeout<F, T>(duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(fut);
    match timeout(duration, &mut handle).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(join_err)) if join_err.is_panic() => Err(Error::TaskJoin(format!(
            "panicked: {}",
            panic_message(join_err.into_panic().as_ref())
        ))),
        Ok(Err(join_err)) => Err(Error::TaskJoin(join_err.to_string())),
        Err(_) => {
            handle.abort();
            Err(Error::Timeout(duration))
        }
    }
}

/// Render a panic payload the way `std` prints it.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `serde` adapter writing a `Duration` as fractional seconds.
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
