use rand::distr::Alphanumeric;
use rand::Rng;

const SUFFIX_LEN: usize = 10;

/// Build a mutation id of the form `<millis>-<10 lowercase alphanumerics>`.
///
/// The id is also used as the dedupe key on the backend (idempotency header
/// for HTTP replays, document id for queued creates), so it only uses
/// characters every document store accepts and stays well under 36 chars.
pub fn new_mutation_id(now_ms: u64) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("{now_ms}-{suffix}")
}
