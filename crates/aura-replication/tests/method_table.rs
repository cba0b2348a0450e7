//! Method numbering properties.

#![allow(clippy::unwrap_used)]

use aura_replication::method::Slot;
use aura_replication::{ControlOp, MethodSpec, MethodTable, Replicated, ReturnKind};
use proptest::prelude::*;

/// Interface of `flags.len()` methods; `true` entries carry metadata.
fn interface(flags: &[bool]) -> Vec<MethodSpec> {
    flags
        .iter()
        .enumerate()
        .map(|(i, replicated)| {
            let name: &'static str = Box::leak(format!("method_{i}").into_boxed_str());
            if *replicated {
                MethodSpec::replicated(name, ReturnKind::Unit, Replicated::new())
            } else {
                MethodSpec::local(name, ReturnKind::Value)
            }
        })
        .collect()
}

proptest! {
    #[test]
    fn replicated_methods_are_numbered_in_declaration_order(
        flags in prop::collection::vec(any::<bool>(), 0..40)
    ) {
        let methods = interface(&flags);
        let table = MethodTable::build(&methods).unwrap();
        let replicated: Vec<&MethodSpec> =
            methods.iter().filter(|m| m.replicated.is_some()).collect();

        prop_assert_eq!(table.len(), replicated.len());
        prop_assert_eq!(table.total_len(), replicated.len() + 5);
        for (id, spec) in replicated.iter().enumerate() {
            prop_assert_eq!(table.id_of(spec.name), Some(id as u16));
            prop_assert_eq!(table.slot(id as u16), Some(Slot::Method(*spec)));
        }
        for spec in methods.iter().filter(|m| m.replicated.is_none()) {
            prop_assert_eq!(table.id_of(spec.name), None);
        }
    }

    #[test]
    fn control_ids_follow_the_methods(
        flags in prop::collection::vec(any::<bool>(), 0..40)
    ) {
        let table = MethodTable::build(&interface(&flags)).unwrap();
        let n = table.len() as u16;

        for (offset, op) in ControlOp::ALL.into_iter().enumerate() {
            prop_assert_eq!(table.control_id(op), n + offset as u16);
            prop_assert_eq!(table.slot(n + offset as u16), Some(Slot::Control(op)));
        }
        prop_assert_eq!(table.slot(n + 5), None);
    }

    #[test]
    fn tables_built_twice_agree(
        flags in prop::collection::vec(any::<bool>(), 0..40)
    ) {
        let methods = interface(&flags);
        let first = MethodTable::build(&methods).unwrap();
        let second = MethodTable::build(&methods).unwrap();
        prop_assert_eq!(first.methods(), second.methods());
    }
}

#[test]
fn duplicate_names_are_rejected() {
    let methods = [
        MethodSpec::replicated("put", ReturnKind::Unit, Replicated::new()),
        MethodSpec::local("put", ReturnKind::Unit),
    ];
    assert!(MethodTable::build(&methods).is_err());
}
