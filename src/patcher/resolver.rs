//! Finds replacement methods in the reference library.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::{
    patcher::{
        logging::LogSink,
        module::{MethodReference, ModuleProvider, ModuleView},
        signature::SignatureKey,
    },
    Result,
};

/// Looks up methods of the installed library by signature key.
///
/// The library is opened read-only for every lookup and released before returning, unless
/// caching is enabled, in which case each key is looked up once per resolver. A missing
/// library is reported with a single warning; afterwards every lookup fails silently.
pub struct ReferenceResolver<'a, P: ModuleProvider> {
    provider: &'a P,
    path: PathBuf,
    wrapper_suffix: String,
    log: &'a dyn LogSink,
    missing: bool,
    cache: Option<HashMap<SignatureKey, Option<MethodReference>>>,
}

impl<'a, P: ModuleProvider> ReferenceResolver<'a, P> {
    /// A resolver for the library at `path`. Matching methods must return a type whose full name
    /// ends with `wrapper_suffix`.
    pub fn new(
        provider: &'a P,
        path: impl Into<PathBuf>,
        wrapper_suffix: &str,
        log: &'a dyn LogSink,
        cache: bool,
    ) -> Self {
        ReferenceResolver {
            provider,
            path: path.into(),
            wrapper_suffix: wrapper_suffix.to_string(),
            log,
            missing: false,
            cache: cache.then(HashMap::new),
        }
    }

    /// The library location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the library was found missing.
    #[must_use]
    pub fn is_missing(&self) -> bool {
        self.missing
    }

    /// The method of the library with signature `key` that returns the wrapper type.
    ///
    /// The first matching method in type and declaration order wins.
    pub fn resolve(&mut self, key: &SignatureKey) -> Option<MethodReference> {
        if let Some(cached) = self.cache.as_ref().and_then(|cache| cache.get(key)) {
            return cached.clone();
        }

        let resolved = self.lookup(key);
        if let Some(cache) = &mut self.cache {
            cache.insert(key.clone(), resolved.clone());
        }
        resolved
    }

    fn lookup(&mut self, key: &SignatureKey) -> Option<MethodReference> {
        if self.missing {
            return None;
        }

        if !self.provider.exists(&self.path) {
            self.missing = true;
            self.log.warning(&format!(
                "{} not found; cannot resolve new API methods.",
                self.path.display()
            ));
            return None;
        }

        match self.search(key) {
            Ok(found) => {
                if found.is_none() {
                    self.log.warning(&format!(
                        "No method matching {} returning {} in {}",
                        key,
                        self.wrapper_suffix,
                        self.path.display()
                    ));
                }
                found
            }
            Err(error) => {
                self.log.error(&format!(
                    "Failed to read reference library \"{}\": {}",
                    self.path.display(),
                    error
                ));
                None
            }
        }
    }

    fn search(&self, key: &SignatureKey) -> Result<Option<MethodReference>> {
        let library = self.provider.open_read(&self.path)?;

        for definition in library.types()? {
            for method in definition.methods.iter().filter(|method| method.name == key.name) {
                let Some(reference) = library.resolve_method(method.token)? else {
                    continue;
                };

                self.log.debug(&format!("Candidate in reference library: {reference}"));

                if reference.key() == *key
                    && reference
                        .return_type
                        .full_name()
                        .ends_with(&self.wrapper_suffix)
                {
                    return Ok(Some(reference));
                }
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        patcher::{logging::LogLevel, logging::RecordingSink, types::TypeSig},
        test::{prefab_ref, FixtureProvider, ModuleBuilder},
    };

    fn key() -> SignatureKey {
        SignatureKey::new(
            TypeSig::class("REPOLib.Modules", "Valuables"),
            "RegisterValuable",
            vec![TypeSig::class("UnityEngine", "GameObject")],
        )
    }

    fn library() -> ModuleBuilder {
        let mut builder = ModuleBuilder::new("REPOLib");
        // the old overload first, so the return type filter has to skip it
        builder.method(
            "REPOLib.Modules",
            "Valuables",
            "RegisterValuable",
            TypeSig::void(),
            vec![TypeSig::class("UnityEngine", "GameObject")],
        );
        builder.method(
            "REPOLib.Modules",
            "Valuables",
            "RegisterValuable",
            prefab_ref(),
            vec![TypeSig::class("UnityEngine", "GameObject")],
        );
        builder
    }

    #[test]
    fn finds_wrapper_returning_overload() {
        let provider = FixtureProvider::new();
        provider.insert("plugins/Zehs-REPOLib/REPOLib.dll", library());
        let sink = RecordingSink::new();

        let mut resolver = ReferenceResolver::new(
            &provider,
            "plugins/Zehs-REPOLib/REPOLib.dll",
            "PrefabRef",
            &sink,
            false,
        );
        let resolved = resolver.resolve(&key()).unwrap();

        assert_eq!(resolved.return_type, prefab_ref());
        assert_eq!(resolved.key(), key());
        assert_eq!(sink.count(LogLevel::Warning), 0);

        resolver.resolve(&key());
        assert_eq!(provider.read_opens(), 2);
    }

    #[test]
    fn caching_opens_once() {
        let provider = FixtureProvider::new();
        provider.insert("REPOLib.dll", library());
        let sink = RecordingSink::new();

        let mut resolver = ReferenceResolver::new(&provider, "REPOLib.dll", "PrefabRef", &sink, true);
        assert!(resolver.resolve(&key()).is_some());
        assert!(resolver.resolve(&key()).is_some());
        assert_eq!(provider.read_opens(), 1);
    }

    #[test]
    fn missing_library_warns_once() {
        let provider = FixtureProvider::new();
        let sink = RecordingSink::new();

        let mut resolver = ReferenceResolver::new(&provider, "nowhere/REPOLib.dll", "PrefabRef", &sink, false);
        assert!(resolver.resolve(&key()).is_none());
        assert!(resolver.resolve(&key()).is_none());

        assert!(resolver.is_missing());
        assert_eq!(sink.count(LogLevel::Warning), 1);
        assert_eq!(provider.read_opens(), 0);
    }

    #[test]
    fn no_matching_method() {
        let provider = FixtureProvider::new();
        let mut only_old = ModuleBuilder::new("REPOLib");
        only_old.method(
            "REPOLib.Modules",
            "Valuables",
            "RegisterValuable",
            TypeSig::void(),
            vec![TypeSig::class("UnityEngine", "GameObject")],
        );
        provider.insert("REPOLib.dll", only_old);
        let sink = RecordingSink::new();

        let mut resolver = ReferenceResolver::new(&provider, "REPOLib.dll", "PrefabRef", &sink, false);
        assert!(resolver.resolve(&key()).is_none());
        assert!(!resolver.is_missing());
    }
}
