use chrono::prelude::*;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Produces document identifiers: seconds since the unix epoch as at least 8 hex digits,
/// followed by 16 hex digits drawn from a private random source.
///
/// Each collection owns one generator, so identifier sequences are independent per collection.
pub struct ObjectIdGenerator {
    rng: Mutex<StdRng>,
}

impl ObjectIdGenerator {
    /// A fixed seed makes the random half of the identifiers reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        ObjectIdGenerator { rng: Mutex::new(rng) }
    }

    pub fn next_id(&self) -> String {
        self.next_id_at(Utc::now().timestamp())
    }

    pub fn next_id_at(&self, seconds: i64) -> String {
        let random = self.rng.lock().next_u64();
        format!("{:08x}{:016x}", seconds.max(0), random)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_format() {
        let id = ObjectIdGenerator::new(Some(1)).next_id_at(0x61c2_3f00);
        assert_eq!(id.len(), 24);
        assert!(id.starts_with("61c23f00"));
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_small_timestamps_are_padded() {
        let id = ObjectIdGenerator::new(Some(1)).next_id_at(0xff);
        assert!(id.starts_with("000000ff"));
        assert_eq!(id.len(), 24);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let a = ObjectIdGenerator::new(Some(42));
        let b = ObjectIdGenerator::new(Some(42));
        for _ in 0..10 {
            assert_eq!(a.next_id_at(1), b.next_id_at(1));
        }
        assert_ne!(ObjectIdGenerator::new(Some(43)).next_id_at(1), ObjectIdGenerator::new(Some(42)).next_id_at(1));
    }

    #[test]
    fn test_current_time_prefix() {
        let before = Utc::now().timestamp();
        let id = ObjectIdGenerator::new(None).next_id();
        let seconds = i64::from_str_radix(&id[..id.len() - 16], 16).unwrap();
        assert!(seconds >= before && seconds <= Utc::now().timestamp());
    }

    #[test]
    fn test_unique_across_threads() {
        let generator = Arc::new(ObjectIdGenerator::new(None));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = generator.clone();
                std::thread::spawn(move || (0..10_000).map(|_| generator.next_id_at(0)).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 40_000);
    }
}
