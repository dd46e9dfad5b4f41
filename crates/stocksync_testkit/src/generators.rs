//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records, remote changes and
//! push scenarios (writes interleaved with drains and remote failures).

use proptest::prelude::*;
use stocksync_core::{ChangeEvent, ChangeType, Record};

/// Domains the generators draw from.
pub const DOMAINS: [&str; 2] = ["products", "inventory"];

/// Strategy for record keys.
pub fn code_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][0-9]{1,3}").expect("Invalid regex")
}

/// Strategy for records keyed by `code`.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    (
        code_strategy(),
        prop::string::string_regex("[a-z]{1,12}").expect("Invalid regex"),
        0i64..10_000,
    )
        .prop_map(|(code, name, qty)| {
            Record::new()
                .with("code", code)
                .with("name", name)
                .with("qty", qty)
        })
}

/// Strategy for remote changes to one domain.
pub fn change_event_strategy(domain: &'static str) -> impl Strategy<Value = ChangeEvent> {
    (
        prop_oneof![
            Just(ChangeType::Insert),
            Just(ChangeType::Update),
            Just(ChangeType::Delete),
        ],
        record_strategy(),
    )
        .prop_map(move |(change_type, record)| match change_type {
            ChangeType::Insert => ChangeEvent::insert(domain, record),
            ChangeType::Update => ChangeEvent::update(domain, None, record),
            ChangeType::Delete => ChangeEvent::delete(domain, record),
        })
}

/// One step of a push scenario.
#[derive(Debug, Clone)]
pub enum PushStep {
    /// Write a record to a domain (index into [`DOMAINS`]).
    Write {
        /// Domain index.
        domain: usize,
        /// Record key.
        code: String,
    },
    /// Make the next `n` upserts fail.
    FailNext(usize),
    /// Drain every domain.
    Drain,
}

/// Strategy for push scenarios.
pub fn push_plan_strategy(max_steps: usize) -> impl Strategy<Value = Vec<PushStep>> {
    let step = prop_oneof![
        5 => (0..DOMAINS.len(), code_strategy())
            .prop_map(|(domain, code)| PushStep::Write { domain, code }),
        1 => (1usize..3).prop_map(PushStep::FailNext),
        2 => Just(PushStep::Drain),
    ];
    prop::collection::vec(step, 1..max_steps.max(2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn generated_records_have_keys() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let record = record_strategy()
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert!(record.key_for("code").is_some());
        }
    }

    #[test]
    fn generated_changes_have_subjects() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let event = change_event_strategy("products")
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert_eq!(event.domain, "products");
            assert!(event.subject().is_some());
        }
    }

    #[test]
    fn plans_are_bounded() {
        let mut runner = TestRunner::default();
        for _ in 0..20 {
            let plan = push_plan_strategy(10)
                .new_tree(&mut runner)
                .unwrap()
                .current();
            assert!(!plan.is_empty());
            assert!(plan.len() < 10);
        }
    }
}
