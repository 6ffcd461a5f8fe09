use std::{
    sync::mpsc::{sync_channel, RecvTimeoutError},
    thread,
    time::Duration,
};

use anyhow::{bail, Context, Result};

/// Run `call` on a watchdog thread and give up on it after
/// `timeout`. A call that overruns is left to finish on its
/// own; its result is discarded.
pub fn call_with_deadline<T, F>(what: &str, timeout: Duration, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let (tx, rx) = sync_channel(1);
    thread::Builder::new()
        .name(format!("watchdog: {}", what))
        .spawn(move || {
            // the receiver is gone once the deadline passed
            let _ = tx.send(call());
        })
        .with_context(|| format!("spawning {}", what))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => bail!("{} timed out after {}s", what, timeout.as_secs_f64()),
        Err(RecvTimeoutError::Disconnected) => bail!("{} panicked", what),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_results_through() -> Result<()> {
        assert_eq!(call_with_deadline("add", Duration::from_secs(5), || Ok(2 + 2))?, 4);
        let err = call_with_deadline::<(), _>("fail", Duration::from_secs(5), || bail!("boom"))
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
        Ok(())
    }

    #[test]
    fn slow_calls_time_out() {
        let err = call_with_deadline("mosaic", Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            Ok(())
        })
        .unwrap_err();
        assert!(err.to_string().contains("mosaic timed out"));
    }

    #[test]
    fn panics_are_errors() {
        let err = call_with_deadline::<(), _>("convert", Duration::from_secs(5), || panic!("bad frame"))
            .unwrap_err();
        assert_eq!(err.to_string(), "convert panicked");
    }
}
