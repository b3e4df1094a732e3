use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

/// One-time credentials for the remote-desktop display.
///
/// Letters are drawn from the thread-local generator of `rand`, which is a CSPRNG seeded
/// from the OS.
#[derive(Debug, Default)]
pub struct SecretGenerator {
    issued: AtomicU64,
}

impl SecretGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `length` lowercase ASCII letters.
    pub fn generate(&self, length: usize) -> String {
        self.issued.fetch_add(1, Ordering::Relaxed);
        let mut rng = rand::rng();
        (0..length)
            .map(|_| char::from(rng.random_range(b'a'..=b'z')))
            .collect()
    }

    /// Number of credentials generated so far.
    pub fn issued(&self) -> u64 {
        self.issued.load(Ordering::Relaxed)
    }
}
