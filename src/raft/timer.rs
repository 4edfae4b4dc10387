use rand::Rng;
use std::time::Duration;

/// Draw a random election timeout within the configured inclusive range.
/// Each replica draws once at init and keeps the value for its lifetime.
pub fn random_election_timeout(min: Duration, max: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let millis = rng.gen_range(min.as_millis()..=max.as_millis());
    Duration::from_millis(millis as u64)
}
