use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Header carrying the correlation id of every outbound request.
pub const REQUEST_ID_HEADER: &str = "x-applitools-eyes-client-request-id";

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Identifier attached to a single outbound request for log correlation.
///
/// Rendered as `"{sequence}--{token}"` where `sequence` is a process-wide
/// counter and `token` a random UUID-v4 shaped string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorrelationId {
    sequence: u64,
    token: String,
}

impl CorrelationId {
    /// Allocates the next id. Safe to call from concurrent operations.
    pub fn next() -> Self {
        let sequence = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
        Self {
            sequence,
            token: random_guid(),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}--{}", self.sequence, self.token)
    }
}

fn random_guid() -> String {
    let mut bytes = rand::random::<u128>().to_be_bytes();
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    let hex: String = bytes.iter().map(|byte| format!("{byte:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
