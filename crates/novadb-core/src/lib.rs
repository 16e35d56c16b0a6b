//! Core data model, identifiers, canonical values and error taxonomy
//! shared by every novadb crate.

pub mod domain;
pub mod error;
pub mod id;
pub mod value;

pub use domain::{
    Commit, EntityRecord, HnswNodeState, HnswSystemState, MetadataDict, Noun, NounType, Ref,
    RefKind, Signature, Verb, VerbType, VersionRecord,
};
pub use error::{ErrorContext, NovaError, Result};
pub use id::{EntityId, ObjectId};
pub use value::{path_to_string, PathSegment, Value};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support {
    //! Proptest strategies for fuzzing the core types, grounded in the
    //! teacher's `gitnext_core::proptest_support` module.
    use super::*;
    use proptest::prelude::*;

    pub fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<f64>().prop_filter("finite", |f| f.is_finite()).prop_map(Value::Num),
            "[a-z0-9]{0,8}".prop_map(Value::Str),
        ];
        leaf.prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Arr),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(Value::Obj),
            ]
        })
    }

    pub fn arb_noun_type() -> impl Strategy<Value = NounType> {
        proptest::sample::select(NounType::ALL.to_vec())
    }

    pub fn arb_verb_type() -> impl Strategy<Value = VerbType> {
        proptest::sample::select(VerbType::ALL.to_vec())
    }
}
