//! Agent name generation: deterministic adjective-animal pairs seeded by
//! SHA-256, with entropy added for fresh registrations.

use rand::Rng;
use sha2::{Digest, Sha256};

const ADJECTIVES: &[&str] = &[
    "agile", "amber", "ancient", "bold", "brave", "breezy", "bright", "brisk", "calm", "candid",
    "cheery", "chilly", "clever", "cosmic", "crafty", "curious", "daring", "dapper", "deft",
    "dusty", "eager", "earnest", "electric", "fearless", "feisty", "fierce", "fluffy", "frosty",
    "fuzzy", "gentle", "giddy", "glossy", "golden", "grumpy", "happy", "hasty", "humble", "jazzy",
    "jolly", "keen", "lively", "loyal", "lucky", "mellow", "merry", "mighty", "nimble", "noble",
    "peppy", "perky", "plucky", "polite", "proud", "quirky", "rapid", "rustic", "sassy", "shiny",
    "silent", "sleepy", "sly", "sneaky", "snappy", "spry", "stormy", "sturdy", "sunny", "swift",
    "turbo", "witty",
];

const ANIMALS: &[&str] = &[
    "alpaca", "badger", "bat", "beaver", "bison", "bobcat", "camel", "caribou", "cheetah",
    "cobra", "condor", "coyote", "crane", "cricket", "dingo", "dolphin", "donkey", "eagle",
    "falcon", "ferret", "finch", "flamingo", "fox", "gazelle", "gecko", "gibbon", "giraffe",
    "heron", "hippo", "hornet", "ibex", "iguana", "jackal", "jaguar", "koala", "lemur",
    "leopard", "llama", "lobster", "lynx", "macaw", "magpie", "mantis", "marmot", "meerkat",
    "mongoose", "moose", "narwhal", "newt", "ocelot", "octopus", "osprey", "otter", "owl",
    "panther", "pelican", "penguin", "possum", "puffin", "quail", "rabbit", "raccoon", "raven",
    "salmon", "sparrow", "stork", "toucan", "viper", "walrus", "wombat",
];

/// Derive a stable adjective-animal name from an arbitrary seed.
#[must_use]
pub fn generate_name(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    let adj_idx = u64::from_be_bytes(digest[0..8].try_into().unwrap()) as usize % ADJECTIVES.len();
    let animal_idx = u64::from_be_bytes(digest[8..16].try_into().unwrap()) as usize % ANIMALS.len();
    format!("{}-{}", ADJECTIVES[adj_idx], ANIMALS[animal_idx])
}

/// Generate a fresh name for a new registration. Each call mixes CSPRNG
/// entropy into the seed; `attempt` lets callers retry past collisions with
/// names that already exist.
#[must_use]
pub fn generate_unique_name(project_path: &str, agent_type: &str, attempt: u32) -> String {
    let entropy: u64 = rand::thread_rng().gen();
    generate_name(&format!("{project_path}:{agent_type}:{entropy:016x}:{attempt}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_name_deterministic() {
        assert_eq!(generate_name("test-seed-123"), generate_name("test-seed-123"));
    }

    #[test]
    fn test_generate_name_format() {
        let name = generate_name("any-seed");
        let parts: Vec<&str> = name.split('-').collect();
        assert_eq!(parts.len(), 2, "expected adjective-animal, got {name}");
        assert!(parts[0].chars().all(|c| c.is_ascii_alphabetic()));
        assert!(parts[1].chars().all(|c| c.is_ascii_alphabetic()));
    }

    #[test]
    fn test_generate_name_lowercase() {
        for i in 0..20 {
            let name = generate_name(&format!("seed-{i}"));
            assert_eq!(name, name.to_lowercase());
        }
    }

    #[test]
    fn test_different_seeds_mostly_distinct() {
        let names: HashSet<String> = (0..50).map(|i| generate_name(&format!("seed-{i}"))).collect();
        // 4900 combinations; a few collisions in 50 draws are tolerable.
        assert!(names.len() >= 40, "too many collisions: {}", names.len());
    }

    #[test]
    fn test_generate_unique_name_has_entropy() {
        let names: HashSet<String> =
            (0..20).map(|_| generate_unique_name("project", "opencode", 0)).collect();
        assert!(names.len() >= 18, "expected near-unique names, got {}", names.len());
    }
}
