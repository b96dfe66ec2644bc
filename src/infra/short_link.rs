use super::error::RepError;
use super::store::RecipeStore;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::warn;

pub const SHORT_LINK_LENGTH: usize = 6;
pub const MAX_SHORT_LINK_ATTEMPTS: u32 = 10;

pub fn generate_short_link<R: Rng + ?Sized>(rng: &mut R) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(SHORT_LINK_LENGTH)
        .map(char::from)
        .collect()
}

/// Draws codes until one is unused in `store`.
///
/// The check is advisory: two callers can still pick the same free code, so
/// the insert that follows must rely on the store rejecting the duplicate.
pub fn generate_unique_short_link(store: &dyn RecipeStore) -> Result<String, RepError> {
    generate_unique_short_link_with(store, &mut rand::thread_rng())
}

pub fn generate_unique_short_link_with<R: Rng + ?Sized>(
    store: &dyn RecipeStore,
    rng: &mut R,
) -> Result<String, RepError> {
    for attempt in 1..=MAX_SHORT_LINK_ATTEMPTS {
        let code = generate_short_link(rng);
        if !store.short_link_exists(&code)? {
            return Ok(code);
        }
        warn!(attempt, code = %code, "short link collision");
    }
    Err(RepError::ShortLinkExhausted(MAX_SHORT_LINK_ATTEMPTS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::integrity::tests::{add_ingredient, add_tag, add_user, draft, ScriptedRep};
    use crate::infra::integrity::validate_recipe;
    use crate::infra::memory::InMemoryRep;
    use crate::infra::types::Recipe;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_short_link_shape() {
        let code = generate_short_link(&mut rand::thread_rng());
        assert_eq!(code.len(), SHORT_LINK_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_thousand_short_links_are_distinct() {
        let repo = InMemoryRep::new();
        let codes: HashSet<String> = (0..1000)
            .map(|_| generate_unique_short_link(&repo).unwrap())
            .collect();
        assert_eq!(codes.len(), 1000);
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let a = generate_short_link(&mut StdRng::seed_from_u64(7));
        let b = generate_short_link(&mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_taken_codes_are_skipped() {
        let repo = InMemoryRep::new();
        let alice = add_user(&repo, "alice");
        let tag = add_tag(&repo, "soup");
        let salt = add_ingredient(&repo, "Salt", "g");
        let fields = validate_recipe(&repo, draft(&[&tag], &[(&salt, 1)])).unwrap();

        let mut replay = StdRng::seed_from_u64(42);
        let first = generate_short_link(&mut replay);
        let second = generate_short_link(&mut replay);
        let third = generate_short_link(&mut replay);
        for code in [&first, &second] {
            repo.insert_recipe(Recipe::new(alice.id, code.clone(), fields.clone()))
                .unwrap();
        }

        let code = generate_unique_short_link_with(&repo, &mut StdRng::seed_from_u64(42)).unwrap();
        assert_eq!(code, third);
    }

    #[test]
    #[should_panic(expected = "ShortLinkExhausted(10)")]
    fn test_every_code_taken_gives_up() {
        let repo = ScriptedRep::default();
        repo.all_links_taken.store(true, Ordering::SeqCst);
        generate_unique_short_link(&repo).unwrap();
    }
}
