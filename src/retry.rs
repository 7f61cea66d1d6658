use std::fmt::Display;
use std::time::Duration;

/// Run `op` up to `attempts` times (at least once), sleeping `delay` between failed attempts.
/// The closure gets the 1-based attempt number. Returns the first success or the last error.
pub fn retry<T, E, F>(attempts: usize, delay: Duration, mut op: F) -> Result<T, E>
where
    E: Display,
    F: FnMut(usize) -> Result<T, E>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                log::warn!("Attempt {}/{} failed: {}", attempt, attempts, e);
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => {
                log::warn!("Giving up after {} attempts: {}", attempts, e);
                return Err(e);
            }
        }
    }
}
