//! Property-based invariant tests for hop path resolution.
//!
//! 1. Both renderings are deterministic for any hop sequence.
//! 2. Removing field names from UI-only hops never changes the value path.
//! 3. Every hop contributes to the instance path.
//! 4. Rendered paths parse back to the same structured key.

use proptest::prelude::*;
use tform_core::{
    ComponentKind, Hop, InstancePath, ValuePath, resolve_instance_path, resolve_value_path,
};

// ── Strategies ────────────────────────────────────────────────────────────

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,6}"
}

fn kind_strategy() -> impl Strategy<Value = ComponentKind> {
    prop_oneof![
        Just(ComponentKind::Container),
        Just(ComponentKind::ObjectField),
        Just(ComponentKind::ArrayField),
    ]
}

fn hop_strategy() -> impl Strategy<Value = Hop> {
    (name_strategy(), kind_strategy(), 0usize..20).prop_map(|(name, kind, index)| {
        let hop = Hop::new(name.clone(), kind);
        match kind {
            ComponentKind::Container => hop,
            ComponentKind::ArrayField => hop.with_field(name).with_index(index),
            _ => hop.with_field(name),
        }
    })
}

fn hops_strategy() -> impl Strategy<Value = Vec<Hop>> {
    prop::collection::vec(hop_strategy(), 0..8)
}

proptest! {
    #[test]
    fn renderings_are_deterministic(hops in hops_strategy(), leaf in name_strategy()) {
        prop_assert_eq!(
            resolve_value_path(Some(&leaf), &hops),
            resolve_value_path(Some(&leaf), &hops)
        );
        prop_assert_eq!(
            resolve_instance_path(&leaf, &hops),
            resolve_instance_path(&leaf, &hops)
        );
    }

    #[test]
    fn containers_are_transparent_to_values(hops in hops_strategy(), leaf in name_strategy()) {
        let data_only: Vec<Hop> = hops
            .iter()
            .filter(|hop| hop.field_name.is_some())
            .cloned()
            .collect();
        prop_assert_eq!(
            resolve_value_path(Some(&leaf), &hops),
            resolve_value_path(Some(&leaf), &data_only)
        );
    }

    #[test]
    fn every_hop_reaches_the_instance_path(hops in hops_strategy(), leaf in name_strategy()) {
        let path = InstancePath::from_hops(&leaf, &hops);
        let components = path
            .segments()
            .iter()
            .filter(|segment| matches!(segment, tform_core::InstanceSegment::Component(_)))
            .count();
        prop_assert_eq!(components, hops.len() + 1);
    }

    #[test]
    fn rendered_paths_parse_back(hops in hops_strategy(), leaf in name_strategy()) {
        let value = ValuePath::from_hops(Some(&leaf), &hops);
        prop_assert_eq!(value.to_string().parse::<ValuePath>().unwrap(), value);

        let instance = InstancePath::from_hops(&leaf, &hops);
        prop_assert_eq!(instance.to_string().parse::<InstancePath>().unwrap(), instance);
    }
}
