//! Property-based tests for cache key determinism

use proptest::prelude::*;
use termforge::cache::CacheKey;
use termforge::model::ModelTier;

fn tier() -> impl Strategy<Value = ModelTier> {
    prop_oneof![
        Just(ModelTier::Economy),
        Just(ModelTier::Standard),
        Just(ModelTier::Premium),
    ]
}

#[test]
fn test_cache_key_determinism_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(".*", ".*", any::<u32>(), tier(), ".*"),
            |(term_id, column_id, version, tier, prompt)| {
                let a = CacheKey::compute(&term_id, &column_id, version, tier, &prompt);
                let b = CacheKey::compute(&term_id, &column_id, version, tier, &prompt);
                prop_assert_eq!(&a, &b);
                prop_assert_eq!(a.as_str().len(), 64);
                Ok(())
            },
        )
        .unwrap();
}

#[test]
fn test_cache_key_prompt_sensitivity_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &("[a-z0-9]{1,12}", ".*", ".*", any::<u32>()),
            |(term_id, prompt1, prompt2, version)| {
                prop_assume!(prompt1 != prompt2);
                let a = CacheKey::compute(&term_id, "col", version, ModelTier::Standard, &prompt1);
                let b = CacheKey::compute(&term_id, "col", version, ModelTier::Standard, &prompt2);
                prop_assert_ne!(a, b);
                Ok(())
            },
        )
        .unwrap();
}

#[test]
fn test_cache_key_version_sensitivity_property() {
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(&(any::<u32>(), any::<u32>(), ".*"), |(v1, v2, prompt)| {
            prop_assume!(v1 != v2);
            let a = CacheKey::compute("t", "col", v1, ModelTier::Economy, &prompt);
            let b = CacheKey::compute("t", "col", v2, ModelTier::Economy, &prompt);
            prop_assert_ne!(a, b);
            Ok(())
        })
        .unwrap();
}
