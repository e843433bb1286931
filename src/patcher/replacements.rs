//! The fixed table of deprecated overloads that have a replacement.

use std::collections::HashMap;

use crate::{
    metadata::signatures::ELEMENT_TYPE,
    patcher::{signature::SignatureKey, types::TypeSig},
};

/// Maps a deprecated signature key to the key of its replacement.
///
/// Deprecated overloads without an entry are reported but never rewritten.
#[derive(Debug, Clone)]
pub struct ReplacementTable {
    entries: HashMap<SignatureKey, SignatureKey>,
}

fn list_of(argument: TypeSig) -> TypeSig {
    TypeSig::GenericInst(
        Box::new(TypeSig::class("System.Collections.Generic", "List`1")),
        vec![argument],
    )
}

fn string() -> TypeSig {
    TypeSig::primitive(ELEMENT_TYPE::STRING).unwrap_or_else(|| TypeSig::class("System", "String"))
}

impl ReplacementTable {
    /// Builds a table from explicit pairs.
    #[must_use]
    pub fn new(entries: impl IntoIterator<Item = (SignatureKey, SignatureKey)>) -> Self {
        ReplacementTable {
            entries: entries.into_iter().collect(),
        }
    }

    /// The REPOLib registration overloads. Every one is replaced by the overload with the same
    /// parameters that returns a `PrefabRef`.
    #[must_use]
    pub fn builtin() -> Self {
        let valuables = TypeSig::class("REPOLib.Modules", "Valuables");
        let items = TypeSig::class("REPOLib.Modules", "Items");
        let game_object = TypeSig::class("UnityEngine", "GameObject");
        let valuable_object = TypeSig::class("", "ValuableObject");
        let level_valuables = list_of(TypeSig::class("", "LevelValuables"));
        let level_names = list_of(string());

        let valuable = |parameters: Vec<TypeSig>| {
            SignatureKey::new(valuables.clone(), "RegisterValuable", parameters)
        };

        let keys = [
            valuable(vec![game_object.clone()]),
            valuable(vec![game_object.clone(), level_valuables.clone()]),
            valuable(vec![game_object, level_names.clone()]),
            valuable(vec![valuable_object.clone()]),
            valuable(vec![valuable_object.clone(), level_valuables]),
            valuable(vec![valuable_object, level_names]),
            SignatureKey::new(
                items,
                "RegisterItem",
                vec![TypeSig::class("", "ItemAttributes")],
            ),
        ];

        Self::new(keys.into_iter().map(|key| (key.clone(), key)))
    }

    /// The replacement for `key`, if it has one.
    #[must_use]
    pub fn lookup(&self, key: &SignatureKey) -> Option<&SignatureKey> {
        self.entries.get(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ReplacementTable {
    fn default() -> Self {
        Self::builtin()
    }
}
