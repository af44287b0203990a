//! Property tests for pattern matching and decision determinism

mod common;

use common::*;
use proptest::prelude::*;
use realm_authz::permission::{PermissionLevel, PermissionRecord};
use realm_authz::policy::{Effect, Pattern, PolicyEvaluator};
use realm_authz::{AccessRequest, DecisionEngine, DecisionSource, EngineConfig, FixedClock, Statement};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

/// Values drawn from an alphabet that includes regex metacharacters
fn value_strategy() -> impl Strategy<Value = String> {
    "[a-z0-9:._+?()\\[\\]|^$\\\\-]{0,12}"
}

fn insert_star(pattern: &str, position: usize) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let at = position % (chars.len() + 1);
    let mut out: String = chars[..at].iter().collect();
    out.push('*');
    out.extend(&chars[at..]);
    out
}

proptest! {
    #[test]
    fn prop_literal_pattern_matches_itself(value in value_strategy()) {
        let pattern = Pattern::new(value.clone()).unwrap();
        prop_assert!(pattern.matches(&value));
    }

    #[test]
    fn prop_wildcard_closure(
        value in value_strategy(),
        first in 0usize..64,
        second in 0usize..64,
    ) {
        let one = insert_star(&value, first);
        prop_assert!(Pattern::new(one.clone()).unwrap().matches(&value));

        let two = insert_star(&one, second);
        prop_assert!(Pattern::new(two).unwrap().matches(&value));
    }

    #[test]
    fn prop_metacharacters_are_literal(value in "[a-z]{1,6}", other in "[a-z]{1,6}") {
        let dotted = format!("{}.{}", value, other);
        let pattern = Pattern::new(dotted.clone()).unwrap();
        prop_assert!(pattern.matches(&dotted));
        let altered = format!("{}x{}", value, other);
        prop_assert!(!pattern.matches(&altered));
    }

    #[test]
    fn prop_pattern_match_ignores_context(
        action in "[a-z]{1,8}",
        resource in "[a-z:]{1,10}",
        key in "[a-z:]{1,8}",
        noise in "[a-z0-9]{0,8}",
    ) {
        let statement = Statement::new(
            "s1",
            "p1",
            Effect::Allow,
            [format!("{}*", &action[..1])],
            [resource.clone()],
        )
        .unwrap();

        let bare = AccessRequest::new(USER, REALM, action.clone(), resource.clone());
        let noisy = AccessRequest::new(USER, REALM, action, resource)
            .with_context(key, json!(noise));

        let evaluator = PolicyEvaluator::new();
        prop_assert!(evaluator.statement_matches(&statement, &bare));
        prop_assert_eq!(
            evaluator.statement_matches(&statement, &bare),
            evaluator.statement_matches(&statement, &noisy)
        );
    }
}

fn decision_engine() -> DecisionEngine {
    let store = Arc::new(base_store());
    add_policy(&store, "p-read", Effect::Allow, &["read"], &["posts*"], None);
    add_policy(&store, "p-deny", Effect::Deny, &["delete"], &["*"], None);
    store.bind_role_policy(EDITOR_ROLE, "p-read");
    store.bind_user_policy(USER, "p-deny");
    store.insert_permission(
        PermissionRecord::for_user("perm-wiki", USER, REALM, "wiki", PermissionLevel::Readwrite)
            .with_actions(["update"]),
    );

    DecisionEngine::new(EngineConfig::default(), store.clone(), store)
        .with_clock(Arc::new(FixedClock::new(now())))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_decisions_are_deterministic(
        action in prop::sample::select(vec!["read", "update", "delete", "create", "manage"]),
        resource in prop::sample::select(vec!["posts", "posts:1", "wiki", "reports"]),
    ) {
        let engine = decision_engine();
        let principal = principal();
        let context: HashMap<_, _> = principal.context();

        let first = tokio_test::block_on(engine.check(Some(&principal), action, resource, &context)).unwrap();
        let second = tokio_test::block_on(engine.check(Some(&principal), action, resource, &context)).unwrap();
        prop_assert_eq!(&first, &second);

        if action == "delete" {
            prop_assert_eq!(first.source, DecisionSource::DenyPolicy);
        }
        if !first.allowed {
            prop_assert!(matches!(first.source, DecisionSource::DenyPolicy | DecisionSource::DefaultDeny));
        }
    }
}
