//! Ordered Identifier Tests
//!
//! Order invariant and uniqueness of generated identifiers, plus the
//! nesting sequence that ends in a renumbering advisory.

#[cfg(test)]
mod identifier_tests {
    use hyperlit_core::db::{NoLiveIdentifiers, OrderedIdentifier};
    use hyperlit_core::NodeIdentifier;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn id(raw: &str) -> NodeIdentifier {
        NodeIdentifier::parse(raw).unwrap()
    }

    #[test]
    fn test_nesting_until_renumbering_is_advised() {
        let ids = OrderedIdentifier::default();

        let first = ids
            .generate_between(Some(&id("1")), Some(&id("2")), &NoLiveIdentifiers)
            .unwrap();
        assert_eq!(first.id, id("1.1"));
        assert!(!first.needs_renumbering);

        let second = ids
            .generate_between(Some(&id("1")), Some(&first.id), &NoLiveIdentifiers)
            .unwrap();
        assert!(second.id > id("1") && second.id < first.id);
        assert!(!ids.needs_renumbering(Some(&id("1")), Some(&second.id)));

        let third = ids
            .generate_between(Some(&id("1")), Some(&second.id), &NoLiveIdentifiers)
            .unwrap();
        assert!(third.id > id("1") && third.id < second.id);
        assert!(ids.needs_renumbering(Some(&id("1")), Some(&third.id)));
    }

    #[test]
    fn test_rapid_insertion_at_one_point_never_duplicates() {
        let ids = OrderedIdentifier::default();
        let before = id("10");
        let mut after = id("11");
        let mut live: HashSet<NodeIdentifier> = [before.clone(), after.clone()].into();

        for _ in 0..500 {
            let generated = ids
                .generate_between(Some(&before), Some(&after), &live)
                .unwrap();
            assert!(generated.id > before && generated.id < after);
            assert!(live.insert(generated.id.clone()), "duplicate {}", generated.id);
            after = generated.id;
        }
    }

    #[test]
    fn test_rapid_appending_never_duplicates() {
        let ids = OrderedIdentifier::default();
        let mut before = id("3.7");
        let after = id("4");
        let mut live: HashSet<NodeIdentifier> = [before.clone(), after.clone()].into();

        for _ in 0..500 {
            let generated = ids
                .generate_between(Some(&before), Some(&after), &live)
                .unwrap();
            assert!(generated.id > before && generated.id < after);
            assert!(live.insert(generated.id.clone()));
            before = generated.id;
        }
    }

    fn identifier() -> impl Strategy<Value = NodeIdentifier> {
        prop_oneof![
            (0u64..1_000_000).prop_map(NodeIdentifier::Integer),
            (0u64..1_000, "[0-9]{0,14}[1-9]")
                .prop_map(|(int, digits)| NodeIdentifier::decimal(int, &digits)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]

        #[test]
        fn prop_generated_identifier_sorts_between(a in identifier(), b in identifier()) {
            prop_assume!(a != b);
            let (before, after) = if a < b { (a, b) } else { (b, a) };
            let ids = OrderedIdentifier::default();

            let generated = ids
                .generate_between(Some(&before), Some(&after), &NoLiveIdentifiers)
                .unwrap();
            prop_assert!(before < generated.id);
            prop_assert!(generated.id < after);
        }

        #[test]
        fn prop_open_ended_generation_respects_the_neighbor(n in identifier()) {
            let ids = OrderedIdentifier::default();
            let above = ids.generate_between(Some(&n), None, &NoLiveIdentifiers).unwrap();
            prop_assert!(above.id > n);
            if n > NodeIdentifier::Integer(1) {
                let below = ids.generate_between(None, Some(&n), &NoLiveIdentifiers).unwrap();
                prop_assert!(below.id < n);
            }
        }
    }
}
