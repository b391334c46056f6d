//! Identifier generation.

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Produce 16 well-distributed random bytes.
///
/// Mixes the current timestamp, process ID, thread ID and an atomic counter
/// through SHA-256, so two calls within the same nanosecond still differ.
fn entropy_bytes() -> [u8; 16] {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let thread_id = format!("{:?}", std::thread::current().id());
    let counter = COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(timestamp.to_le_bytes());
    hasher.update(std::process::id().to_le_bytes());
    hasher.update(thread_id.as_bytes());
    hasher.update(counter.to_le_bytes());

    let hash = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&hash[..16]);
    out
}

/// Format 16 bytes in the 8-4-4-4-12 layout used for cell and notebook IDs.
fn format_id(bytes: &[u8; 16]) -> String {
    let hex = hex::encode(bytes);
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

/// Generate a new cell ID, e.g. `3f2b9c1e-04d7-8a55-91c2-5e0f7d3a1b6c`.
pub fn generate_cell_id() -> String {
    format_id(&entropy_bytes())
}

/// Generate a new notebook ID (same format as cell IDs).
pub fn generate_notebook_id() -> String {
    format_id(&entropy_bytes())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_unique() {
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let id = generate_cell_id();
            assert!(seen.insert(id.clone()), "duplicate id produced: {}", id);
        }
    }

    #[test]
    fn generated_id_layout() {
        let id = generate_notebook_id();
        assert_eq!(id.len(), 36, "unexpected length: {}", id);
        let groups: Vec<usize> = id.split('-').map(str::len).collect();
        assert_eq!(groups, vec![8, 4, 4, 4, 12]);
        assert!(id.chars().all(|c| c == '-' || c.is_ascii_hexdigit()));
    }
}
