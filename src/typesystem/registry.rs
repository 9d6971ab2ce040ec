//! Concurrent store of named type definitions.
//!
//! The registry is shared between the native-facing layout queries, which may arrive on
//! any engine thread, and the replay driver. Definitions live in a [`DashMap`] so lookups
//! never take a global lock, and computed layouts are memoized in a [`LayoutCache`] that is
//! cleared whenever a definition changes.

use std::sync::Arc;

use dashmap::DashMap;
use rayon::prelude::*;

use crate::{
    typesystem::{
        layout::{self, LayoutCache, TypeLayout},
        TypeDef, TypeKind, TypeName, TypeSig,
    },
    Error, Result,
};

/// Deepest base-class chain followed before the hierarchy is considered cyclic.
const MAX_HIERARCHY_DEPTH: usize = 64;

/// Framework types every delegate derives from.
const DELEGATE_BASES: [&str; 2] = ["System.MulticastDelegate", "System.Delegate"];

/// An instance field as seen on a concrete type, generic arguments substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    /// Field name
    pub name: String,
    /// Field type with the instantiation's arguments applied
    pub sig: TypeSig,
    /// The type in the hierarchy that declares the field
    pub declaring: TypeName,
}

/// Store of [`TypeDef`]s keyed by [`TypeName`].
#[derive(Default)]
pub struct TypeRegistry {
    types: DashMap<TypeName, Arc<TypeDef>>,
    layouts: LayoutCache,
}

impl TypeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a definition.
    ///
    /// Replacing a definition drops every memoized layout, since any of them may embed the
    /// old shape.
    pub fn register(&self, def: TypeDef) -> Arc<TypeDef> {
        let def = Arc::new(def);
        if self.types.insert(def.name.clone(), def.clone()).is_some() {
            log::debug!("replaced definition of {}", def.name);
            self.layouts.clear();
        }
        def
    }

    /// Look up a definition by name.
    #[must_use]
    pub fn get(&self, name: &TypeName) -> Option<Arc<TypeDef>> {
        self.types.get(name).map(|entry| entry.value().clone())
    }

    /// Look up a definition, checking that it lives in `module`.
    ///
    /// An empty `module` matches any module.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if the type is unknown or defined elsewhere.
    pub fn get_in_module(&self, name: &TypeName, module: &str) -> Result<Arc<TypeDef>> {
        let def = self.expect(name)?;
        if !module.is_empty() && !def.module.eq_ignore_ascii_case(module) {
            return Err(Error::TypeNotFound(format!(
                "{} in module {} of {}",
                name.name, module, name.assembly
            )));
        }
        Ok(def)
    }

    /// Look up a definition that must exist.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if the type is unknown.
    pub fn expect(&self, name: &TypeName) -> Result<Arc<TypeDef>> {
        self.get(name)
            .ok_or_else(|| Error::TypeNotFound(format!("{} in {}", name.name, name.assembly)))
    }

    /// Number of registered definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// True if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Check that every named type mentioned by `sig` is registered.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] for the first unknown type.
    pub fn resolve(&self, sig: &TypeSig) -> Result<()> {
        match sig {
            TypeSig::Named { name, args } => {
                self.expect(name)?;
                args.iter().try_for_each(|arg| self.resolve(arg))
            }
            TypeSig::SzArray(element) | TypeSig::Array { element, .. } => self.resolve(element),
            TypeSig::Primitive(_)
            | TypeSig::String
            | TypeSig::Object
            | TypeSig::GenericParam(_) => Ok(()),
        }
    }

    /// The kind of a named signature, `None` for built-in types.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if the named type is unknown.
    pub fn kind_of(&self, sig: &TypeSig) -> Result<Option<TypeKind>> {
        match sig {
            TypeSig::Named { name, .. } => Ok(Some(self.expect(name)?.kind)),
            _ => Ok(None),
        }
    }

    /// True if values of `sig` are held through a reference.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] for unknown named types and [`Error::Malformed`] for an
    /// unsubstituted generic parameter.
    pub fn is_reference(&self, sig: &TypeSig) -> Result<bool> {
        match sig {
            TypeSig::String | TypeSig::Object | TypeSig::SzArray(_) | TypeSig::Array { .. } => {
                Ok(true)
            }
            TypeSig::Primitive(_) => Ok(false),
            TypeSig::Named { name, .. } => Ok(self.expect(name)?.kind.is_reference()),
            TypeSig::GenericParam(index) => {
                Err(malformed_error!("Unsubstituted generic parameter !{}", index))
            }
        }
    }

    /// True if values of `sig` are stored inline: primitives, enums and structs.
    ///
    /// # Errors
    /// Same as [`TypeRegistry::is_reference`].
    pub fn is_value_type(&self, sig: &TypeSig) -> Result<bool> {
        self.is_reference(sig).map(|is_reference| !is_reference)
    }

    /// True if `sig` is a delegate type or derives from one.
    ///
    /// The framework delegate bases count even when they are not registered. A chain that
    /// reaches an unknown type without passing a delegate is not a delegate.
    #[must_use]
    pub fn is_delegate(&self, sig: &TypeSig) -> bool {
        let mut current = sig.clone();
        for _ in 0..MAX_HIERARCHY_DEPTH {
            let TypeSig::Named { name, .. } = &current else {
                return false;
            };
            if DELEGATE_BASES.contains(&name.name.as_str()) {
                return true;
            }

            let Some(def) = self.get(name) else {
                return false;
            };
            if def.kind == TypeKind::Delegate {
                return true;
            }
            match &def.base {
                Some(base) => current = base.clone(),
                None => return false,
            }
        }
        false
    }

    /// All instance fields of `sig`, inherited fields first, with generic arguments applied.
    ///
    /// Built-in types and arrays have no fields.
    ///
    /// # Errors
    /// Returns [`Error::TypeNotFound`] if any type in the hierarchy is unknown and
    /// [`Error::Malformed`] if the hierarchy is cyclic.
    pub fn instance_fields(&self, sig: &TypeSig) -> Result<Vec<ResolvedField>> {
        let mut chain = Vec::new();
        let mut current = sig.clone();

        while let TypeSig::Named { name, args } = &current {
            if chain.len() >= MAX_HIERARCHY_DEPTH {
                return Err(malformed_error!("Cyclic base class chain at {}", name));
            }

            let def = self.expect(name)?;
            let base = def.base.as_ref().map(|base| base.substitute(args));
            chain.push((def, args.clone()));

            match base {
                Some(base) => current = base,
                None => break,
            }
        }

        let mut fields = Vec::new();
        for (def, args) in chain.iter().rev() {
            for field in def.instance_fields() {
                fields.push(ResolvedField {
                    name: field.name.clone(),
                    sig: field.sig.substitute(args),
                    declaring: def.name.clone(),
                });
            }
        }
        Ok(fields)
    }

    /// The instance layout of `sig`, memoized.
    ///
    /// # Errors
    /// Propagates resolution and malformed-type errors from the layout engine.
    pub fn layout(&self, sig: &TypeSig) -> Result<Arc<TypeLayout>> {
        self.layout_with(sig, &mut Vec::new())
    }

    /// Memoized layout of `sig` while the layouts in `in_progress` are being computed.
    pub(super) fn layout_with(
        &self,
        sig: &TypeSig,
        in_progress: &mut Vec<TypeSig>,
    ) -> Result<Arc<TypeLayout>> {
        if let Some(layout) = self.layouts.get(sig) {
            return Ok(layout);
        }
        if in_progress.contains(sig) {
            return Err(malformed_error!("{} contains itself by value", sig));
        }

        log::trace!("computing layout of {}", sig);
        in_progress.push(sig.clone());
        let computed = layout::compute(self, sig, in_progress);
        in_progress.pop();

        Ok(self.layouts.insert(sig.clone(), Arc::new(computed?)))
    }

    /// Compute the layouts of `sigs` in parallel, filling the cache.
    ///
    /// # Errors
    /// Returns the first error encountered.
    pub fn prewarm(&self, sigs: &[TypeSig]) -> Result<()> {
        sigs.par_iter()
            .map(|sig| self.layout(sig).map(|_| ()))
            .collect::<Result<Vec<()>>>()?;
        Ok(())
    }

    /// Number of memoized layouts.
    #[must_use]
    pub fn cached_layouts(&self) -> usize {
        self.layouts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::sample_registry;
    use crate::typesystem::{PrimitiveKind, TypeDefBuilder};

    #[test]
    fn inherited_fields_come_first() {
        let registry = sample_registry();
        let fields = registry
            .instance_fields(&TypeSig::named("Tests", "Tests.Derived"))
            .unwrap();

        let names: Vec<_> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["baseValue", "baseName", "extra"]);
        assert_eq!(fields[0].declaring.name, "Tests.Base");
    }

    #[test]
    fn generic_fields_are_substituted() {
        let registry = sample_registry();
        let list = TypeSig::generic("Tests", "Tests.Stack`1", vec![TypeSig::String]);

        let fields = registry.instance_fields(&list).unwrap();
        assert_eq!(fields[0].name, "items");
        assert_eq!(fields[0].sig, TypeSig::sz_array(TypeSig::String));
        assert_eq!(fields[1].sig, TypeSig::Primitive(PrimitiveKind::I4));
    }

    #[test]
    fn unknown_type() {
        let registry = TypeRegistry::new();
        let sig = TypeSig::named("Tests", "Tests.Missing");

        assert!(matches!(
            registry.instance_fields(&sig),
            Err(Error::TypeNotFound(_))
        ));
        assert!(matches!(
            registry.resolve(&TypeSig::sz_array(sig.clone())),
            Err(Error::TypeNotFound(_))
        ));
        assert!(!registry.is_delegate(&sig));
    }

    #[test]
    fn cyclic_hierarchy() {
        let registry = TypeRegistry::new();
        registry.register(
            TypeDefBuilder::class("Tests", "Tests.A")
                .base(TypeSig::named("Tests", "Tests.B"))
                .build(),
        );
        registry.register(
            TypeDefBuilder::class("Tests", "Tests.B")
                .base(TypeSig::named("Tests", "Tests.A"))
                .build(),
        );

        assert!(matches!(
            registry.instance_fields(&TypeSig::named("Tests", "Tests.A")),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn module_check() {
        let registry = sample_registry();
        let name = TypeName::new("Tests", "Tests.Base");

        assert!(registry.get_in_module(&name, "Tests.dll").is_ok());
        assert!(registry.get_in_module(&name, "").is_ok());
        assert!(matches!(
            registry.get_in_module(&name, "Other.dll"),
            Err(Error::TypeNotFound(_))
        ));
    }

    #[test]
    fn reference_classification() {
        let registry = sample_registry();

        assert!(registry.is_reference(&TypeSig::String).unwrap());
        assert!(registry.is_reference(&TypeSig::sz_array(PrimitiveKind::I4.into())).unwrap());
        assert!(!registry.is_reference(&PrimitiveKind::R8.into()).unwrap());
        assert!(registry.is_reference(&TypeSig::named("Tests", "Tests.Callback")).unwrap());
        assert!(!registry.is_reference(&TypeSig::named("Tests", "Tests.Pair")).unwrap());
        assert!(registry.is_delegate(&TypeSig::named("Tests", "Tests.Callback")));
        assert!(registry.is_reference(&TypeSig::GenericParam(0)).is_err());
    }

    #[test]
    fn delegates_through_base_chain() {
        let registry = sample_registry();
        registry.register(
            TypeDefBuilder::class("Tests", "Tests.Handler")
                .base(TypeSig::named("mscorlib", "System.MulticastDelegate"))
                .build(),
        );
        registry.register(
            TypeDefBuilder::class("Tests", "Tests.NamedCallback")
                .base(TypeSig::named("Tests", "Tests.Callback"))
                .build(),
        );

        assert!(registry.is_delegate(&TypeSig::named("Tests", "Tests.Handler")));
        assert!(registry.is_delegate(&TypeSig::named("Tests", "Tests.NamedCallback")));
        assert!(registry.is_delegate(&TypeSig::named("mscorlib", "System.Delegate")));
        assert!(!registry.is_delegate(&TypeSig::named("Tests", "Tests.Derived")));
        assert!(!registry.is_delegate(&TypeSig::Object));
    }

    #[test]
    fn replacing_clears_layouts() {
        let registry = sample_registry();
        let sig = TypeSig::named("Tests", "Tests.Base");

        registry.layout(&sig).unwrap();
        assert_eq!(registry.cached_layouts(), 1);

        registry.register(TypeDefBuilder::class("Tests", "Tests.Base").build());
        assert_eq!(registry.cached_layouts(), 0);
        assert!(registry.layout(&sig).unwrap().ref_offsets.is_empty());
    }

    #[test]
    fn prewarm() {
        let registry = sample_registry();
        let sigs = vec![
            TypeSig::named("Tests", "Tests.Base"),
            TypeSig::named("Tests", "Tests.Derived"),
            TypeSig::named("Tests", "Tests.Pair"),
        ];

        registry.prewarm(&sigs).unwrap();
        assert!(registry.cached_layouts() >= 3);

        assert!(registry
            .prewarm(&[TypeSig::named("Tests", "Tests.Missing")])
            .is_err());
    }
}
