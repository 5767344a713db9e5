use dbmind_advisor::index_advisor::compress::{templatize, PLACEHOLDER};
use dbmind_advisor::index_advisor::filter::filter_redundant_indexes;
use dbmind_advisor::index_advisor::{IndexFactory, IndexKind};
use proptest::collection::vec as prop_vec;
use proptest::prelude::*;
use proptest::string::string_regex;
use std::collections::HashSet;

fn statement() -> impl Strategy<Value = String> {
    string_regex(
        "select [a-z]{1,5} from [a-z]{1,5} where [a-z]{1,3} (=|>|<) ([0-9]{1,4}|'[a-z ]{0,4}'|\\([0-9]{1,3}(, [0-9]{1,3}){0,3}\\))",
    )
    .unwrap()
}

fn kind() -> impl Strategy<Value = IndexKind> {
    prop_oneof![
        Just(IndexKind::Ordinary),
        Just(IndexKind::Local),
        Just(IndexKind::Global),
    ]
}

// (table, columns, kind, benefit)
fn candidate() -> impl Strategy<Value = (String, Vec<String>, IndexKind, u8)> {
    (
        prop_oneof![Just("public.t".to_string()), Just("public.u".to_string())],
        prop_vec(prop_oneof![Just("a"), Just("b"), Just("c")], 1..4)
            .prop_map(|cols| cols.into_iter().map(str::to_string).collect::<Vec<String>>()),
        kind(),
        0u8..4,
    )
}

// Property: templating a template changes nothing, and no literal survives
proptest! {
    #[test]
    fn prop_templatize_idempotent(sql in statement()) {
        let template = templatize(&sql);
        prop_assert_eq!(templatize(&template), template.clone());
        prop_assert!(!template.chars().any(|c| c.is_ascii_digit()));
        prop_assert!(!template.contains('\''));
        prop_assert!(template.contains(PLACEHOLDER));
    }
}

// Property: after the redundancy filter no surviving pair is prefix-related
proptest! {
    #[test]
    fn prop_redundancy_filter_leaves_no_prefix_pairs(candidates in prop_vec(candidate(), 1..12)) {
        let factory = IndexFactory::new();
        let mut ids = Vec::new();
        for (table, columns, kind, benefit) in &candidates {
            let id = factory.get_index(table, columns, *kind);
            factory.index(id).update_stats(|s| s.benefit = f64::from(*benefit));
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        let before = ids.clone();
        filter_redundant_indexes(&factory, &mut ids);

        prop_assert!(!ids.is_empty());
        prop_assert!(ids.iter().all(|id| before.contains(id)));
        for (position, a) in ids.iter().enumerate() {
            for b in ids.iter().skip(position + 1) {
                let (x, y) = (factory.index(*a), factory.index(*b));
                prop_assert!(!x.is_prefix_of(&y) && !y.is_prefix_of(&x), "{} and {} both kept", x, y);
            }
        }
    }
}

// Property: equal keys intern to one handle, distinct keys to distinct handles
proptest! {
    #[test]
    fn prop_factory_interning(candidates in prop_vec(candidate(), 0..20)) {
        let factory = IndexFactory::new();
        let ids: Vec<_> = candidates
            .iter()
            .map(|(table, columns, kind, _)| factory.get_index(table, columns, *kind))
            .collect();
        let distinct_keys: HashSet<_> = candidates
            .iter()
            .map(|(table, columns, kind, _)| (table.clone(), columns.clone(), *kind))
            .collect();
        let distinct_ids: HashSet<_> = ids.iter().copied().collect();

        prop_assert_eq!(factory.len(), distinct_keys.len());
        prop_assert_eq!(distinct_ids.len(), distinct_keys.len());
        for ((table, columns, kind, _), id) in candidates.iter().zip(&ids) {
            prop_assert_eq!(factory.get_index(table, columns, *kind), *id);
            let index = factory.index(*id);
            prop_assert_eq!(index.columns(), columns.as_slice());
            prop_assert_eq!(index.kind(), *kind);
        }
    }
}
