//! Tunnel identifier validation and generation
//!
//! Identifiers double as DNS labels on the public side, so they are limited to
//! 4-63 lowercase alphanumerics and hyphens, without a leading or trailing
//! hyphen. Generated identifiers read like `brave-otter-42`.

use rand::seq::SliceRandom;
use rand::Rng;

const MIN_LEN: usize = 4;
const MAX_LEN: usize = 63;

const ADJECTIVES: &[&str] = &[
    "amber", "bold", "brave", "bright", "calm", "clever", "cosmic", "crisp", "dusty", "eager",
    "fancy", "fuzzy", "gentle", "giant", "glad", "golden", "happy", "hidden", "jolly", "kind",
    "lively", "lucky", "mellow", "misty", "nimble", "noble", "polite", "proud", "quick", "quiet",
    "rapid", "shiny", "silent", "silly", "smooth", "sunny", "swift", "tidy", "vivid", "witty",
];

const ANIMALS: &[&str] = &[
    "badger", "bat", "bear", "beaver", "bison", "cat", "cobra", "crab", "crane", "deer", "dingo",
    "dog", "eagle", "eel", "falcon", "ferret", "fox", "frog", "gecko", "goat", "goose", "hawk",
    "heron", "ibis", "koala", "lemur", "lion", "lynx", "mole", "moose", "newt", "otter", "owl",
    "panda", "puma", "quail", "raven", "seal", "shrew", "sloth", "swan", "tiger", "toad", "wolf",
    "yak", "zebra",
];

/// Check a requested identifier, describing the first problem found.
pub fn validate_id(id: &str) -> Result<(), String> {
    if id.len() < MIN_LEN {
        return Err(format!(
            "Tunnel id too short (minimum {} characters)",
            MIN_LEN
        ));
    }

    if id.len() > MAX_LEN {
        return Err(format!(
            "Tunnel id too long (max {} characters): {}",
            MAX_LEN,
            id.len()
        ));
    }

    if id.starts_with('-') || id.ends_with('-') {
        return Err("Tunnel id cannot start or end with hyphen".to_string());
    }

    if let Some(ch) = id
        .chars()
        .find(|ch| !(ch.is_ascii_lowercase() || ch.is_ascii_digit() || *ch == '-'))
    {
        return Err(format!(
            "Tunnel id contains invalid character '{}' (only lowercase letters, digits and hyphens allowed)",
            ch
        ));
    }

    Ok(())
}

/// Generate a random human-readable identifier.
///
/// Uniqueness is not guaranteed; callers retry on collision.
pub fn generate_id<R: Rng + ?Sized>(rng: &mut R) -> String {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("swift");
    let animal = ANIMALS.choose(rng).copied().unwrap_or("otter");
    let number: u16 = rng.gen_range(0..1000);
    format!("{}-{}-{}", adjective, animal, number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_valid_ids() {
        assert!(validate_id("my-tunnel").is_ok());
        assert!(validate_id("abcd").is_ok());
        assert!(validate_id("a1b2-c3d4").is_ok());
        assert!(validate_id(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_invalid_ids() {
        assert!(validate_id("abc").is_err());
        assert!(validate_id(&"a".repeat(64)).is_err());
        assert!(validate_id("-tunnel").is_err());
        assert!(validate_id("tunnel-").is_err());
        assert!(validate_id("My-Tunnel").is_err());
        assert!(validate_id("my_tunnel").is_err());
        assert!(validate_id("my.tunnel").is_err());
        assert!(validate_id("").is_err());
    }

    #[test]
    fn test_validate_id_reports_reason() {
        let err = validate_id("bad_id").unwrap_err();
        assert!(err.contains("'_'"));

        let err = validate_id("-abc").unwrap_err();
        assert!(err.contains("hyphen"));
    }

    #[test]
    fn test_generated_ids_are_valid() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let id = generate_id(&mut rng);
            assert!(validate_id(&id).is_ok(), "generated invalid id {}", id);
            assert_eq!(id.split('-').count(), 3);
        }
    }

    #[test]
    fn test_generation_is_random() {
        let mut rng = StdRng::seed_from_u64(42);
        let ids: std::collections::HashSet<String> =
            (0..50).map(|_| generate_id(&mut rng)).collect();
        assert!(ids.len() > 40);
    }
}
