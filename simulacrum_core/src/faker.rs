//! Deterministic fake data for scenarios.
//!
//! Everything here is driven by seeded ChaCha8 streams, so the same seed
//! and the same call sequence always produce the same values:
//!
//! - [`Faker`]: names, emails, passwords and other content
//! - [`IdGenerator`]: simulation and record ids, shared and advancing
//!
//! Scenario invocations get a fresh `Faker` seeded with the scenario seed
//! (same content every time) that draws its ids from the simulation's
//! `IdGenerator` (distinct ids every time, identical across processes that
//! replay the same calls with the same orchestrator seed).

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

const FIRST_NAMES: &[&str] = &[
    "Ada", "Alan", "Barbara", "Brian", "Carla", "Claude", "Dennis", "Donald", "Edsger", "Ellen",
    "Frances", "Grace", "Hedy", "Ivan", "Joan", "John", "Ken", "Leslie", "Linus", "Margaret",
    "Niklaus", "Radia", "Rob", "Sophie", "Tim", "Whitfield", "Yukihiro",
];

const LAST_NAMES: &[&str] = &[
    "Allen", "Backus", "Cerf", "Dijkstra", "Engelbart", "Floyd", "Goldberg", "Hamilton",
    "Hopper", "Kahn", "Knuth", "Lamport", "Liskov", "Lovelace", "McCarthy", "Perlman", "Pike",
    "Ritchie", "Shaw", "Spector", "Thompson", "Torvalds", "Turing", "Wilson", "Wirth",
];

const EMAIL_DOMAINS: &[&str] = &["example.com", "example.org", "example.net", "mail.test"];

const PASSWORD_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

const PASSWORD_LEN: usize = 15;

/// Mixes a master seed into an independent sub-seed.
///
/// `master * golden_ratio + salt * prime`, so nearby seeds and salts do
/// not produce correlated streams.
pub fn derive_seed(master: u64, salt: u64) -> u64 {
    master
        .wrapping_mul(0x9e3779b97f4a7c15)
        .wrapping_add(salt.wrapping_mul(0x517cc1b727220a95))
}

/// Shared, advancing source of ids.
///
/// Clones share the same stream.
#[derive(Clone)]
pub struct IdGenerator {
    rng: Arc<Mutex<ChaCha8Rng>>,
}

impl IdGenerator {
    /// Creates a generator; `None` seeds from OS entropy.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    /// Returns the next random UUID.
    pub fn next_uuid(&self) -> Uuid {
        let mut bytes = [0u8; 16];
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .fill_bytes(&mut bytes);
        uuid::Builder::from_random_bytes(bytes).into_uuid()
    }

    /// Returns the next id as 32 lowercase hex characters.
    pub fn next_id(&self) -> String {
        self.next_uuid().simple().to_string()
    }

    /// Returns the next raw 64-bit value (used to derive child generators).
    pub fn next_u64(&self) -> u64 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_u64()
    }

    /// Splits off an independent generator whose seed comes from this one.
    pub fn fork(&self) -> IdGenerator {
        IdGenerator::new(Some(self.next_u64()))
    }
}

impl std::fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdGenerator").finish_non_exhaustive()
    }
}

/// Seeded fake-data generator.
pub struct Faker {
    /// Seed the content stream was started from
    seed: u64,

    /// Content stream (names, emails, passwords)
    rng: ChaCha8Rng,

    /// Id stream
    ids: IdGenerator,
}

impl Faker {
    /// Creates a faker with its own id stream derived from `seed`.
    pub fn new(seed: u64) -> Self {
        Self::with_ids(seed, IdGenerator::new(Some(derive_seed(seed, 1))))
    }

    /// Creates a faker drawing ids from a shared generator.
    pub fn with_ids(seed: u64, ids: IdGenerator) -> Self {
        Self {
            seed,
            rng: ChaCha8Rng::seed_from_u64(seed),
            ids,
        }
    }

    /// Returns the content seed.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns a first name.
    pub fn first_name(&mut self) -> String {
        self.word(FIRST_NAMES)
    }

    /// Returns a last name.
    pub fn last_name(&mut self) -> String {
        self.word(LAST_NAMES)
    }

    /// Returns `"First Last"`.
    pub fn name(&mut self) -> String {
        let first = self.first_name();
        let last = self.last_name();
        format!("{} {}", first, last)
    }

    /// Returns a lowercase email address derived from `name`.
    pub fn email(&mut self, name: &str) -> String {
        let local: Vec<String> = name
            .split_whitespace()
            .map(|part| {
                part.chars()
                    .filter(|c| c.is_ascii_alphanumeric())
                    .collect::<String>()
            })
            .filter(|part| !part.is_empty())
            .collect();
        let local = if local.is_empty() {
            self.username()
        } else {
            local.join(".")
        };
        let domain = self.word(EMAIL_DOMAINS);
        format!("{}@{}", local, domain).to_lowercase()
    }

    /// Returns a username such as `grace_hopper42`.
    pub fn username(&mut self) -> String {
        let first = self.first_name();
        let last = self.last_name();
        let n: u8 = self.rng.gen_range(0..100);
        format!("{}_{}{}", first, last, n).to_lowercase()
    }

    /// Returns an alphanumeric password.
    pub fn password(&mut self) -> String {
        (0..PASSWORD_LEN)
            .map(|_| PASSWORD_CHARS[self.rng.gen_range(0..PASSWORD_CHARS.len())] as char)
            .collect()
    }

    /// Returns a number in `[low, high)`.
    pub fn number(&mut self, low: u64, high: u64) -> u64 {
        if low >= high {
            return low;
        }
        self.rng.gen_range(low..high)
    }

    /// Returns one element of `items`, `None` if it is empty.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        items.get(self.rng.gen_range(0..items.len()))
    }

    fn word(&mut self, words: &[&str]) -> String {
        self.pick(words).map(|w| w.to_string()).unwrap_or_default()
    }

    /// Returns a UUID from the id stream.
    pub fn uuid(&mut self) -> Uuid {
        self.ids.next_uuid()
    }

    /// Returns an id (32 hex characters) from the id stream.
    pub fn id(&mut self) -> String {
        self.ids.next_id()
    }
}

impl std::fmt::Debug for Faker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Faker").field("seed", &self.seed).finish_non_exhaustive()
    }
}
