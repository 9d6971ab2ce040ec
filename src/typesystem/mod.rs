//! Runtime type model shared by the layout introspector, the value graph and the replay host.
//!
//! Types are referenced through [`TypeSig`], a resolved signature that is either built in
//! (primitives, `System.String`, `System.Object`), an array shape, a generic parameter, or a
//! [`TypeName`] registered in a [`TypeRegistry`] together with its [`TypeDef`].
//!
//! # Key Components
//!
//! - [`crate::typesystem::PrimitiveKind`] - the primitive value types and their sizes
//! - [`crate::typesystem::TypeSig`] - a reference to any runtime type
//! - [`crate::typesystem::TypeDef`] / [`crate::typesystem::TypeDefBuilder`] - definition of a named type
//! - [`crate::typesystem::TypeRegistry`] - concurrent store of definitions, field enumeration and layouts
//! - [`crate::typesystem::descriptor`] - the binary type descriptor exchanged with the native engine
//! - [`crate::typesystem::layout`] - instance layout computation
//!
//! # Examples
//!
//! ```rust
//! use clrbridge::typesystem::{TypeDefBuilder, TypeRegistry, TypeSig, PrimitiveKind};
//!
//! let registry = TypeRegistry::new();
//! registry.register(
//!     TypeDefBuilder::class("Tests", "Tests.Node")
//!         .field("value", TypeSig::Primitive(PrimitiveKind::I4))
//!         .field("next", TypeSig::named("Tests", "Tests.Node"))
//!         .build(),
//! );
//!
//! let layout = registry.layout(&TypeSig::named("Tests", "Tests.Node"))?;
//! assert_eq!(layout.ref_offsets, vec![0]);
//! # Ok::<(), clrbridge::Error>(())
//! ```

pub mod descriptor;
pub mod layout;
mod primitives;
mod registry;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use descriptor::TypeDescriptor;
pub use layout::{FieldLayout, TypeLayout};
pub use primitives::{PrimitiveKind, ELEMENT_TYPE, POINTER_SIZE};
pub use registry::{ResolvedField, TypeRegistry};

/// The identity of a named type: its defining assembly and namespace-qualified name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeName {
    /// Simple name of the defining assembly, e.g. `System.Private.CoreLib`
    pub assembly: String,
    /// Namespace-qualified name, nested types joined with `+`, generic arity suffixed with `` `n ``
    pub name: String,
}

impl TypeName {
    /// Create a new type name
    pub fn new(assembly: impl Into<String>, name: impl Into<String>) -> Self {
        TypeName {
            assembly: assembly.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A resolved reference to a runtime type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeSig {
    /// A primitive value type
    Primitive(PrimitiveKind),
    /// `System.String`
    String,
    /// `System.Object`
    Object,
    /// A registered class, struct, enum, delegate or interface, possibly instantiated
    Named {
        /// The generic type definition or plain type
        name: TypeName,
        /// Generic arguments, empty for non-generic types
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<TypeSig>,
    },
    /// Single-dimension array with a zero lower bound
    SzArray(Box<TypeSig>),
    /// Any other array shape
    Array {
        /// Element type
        element: Box<TypeSig>,
        /// Number of dimensions
        rank: u32,
    },
    /// Generic parameter of the enclosing type definition
    GenericParam(u32),
}

impl TypeSig {
    /// A non-generic named type.
    pub fn named(assembly: impl Into<String>, name: impl Into<String>) -> Self {
        TypeSig::Named {
            name: TypeName::new(assembly, name),
            args: Vec::new(),
        }
    }

    /// A generic instantiation of a named type.
    pub fn generic(
        assembly: impl Into<String>,
        name: impl Into<String>,
        args: Vec<TypeSig>,
    ) -> Self {
        TypeSig::Named {
            name: TypeName::new(assembly, name),
            args,
        }
    }

    /// `element[]`
    #[must_use]
    pub fn sz_array(element: TypeSig) -> Self {
        TypeSig::SzArray(Box::new(element))
    }

    /// `element[,...]` with `rank` dimensions.
    #[must_use]
    pub fn array(element: TypeSig, rank: u32) -> Self {
        TypeSig::Array {
            element: Box::new(element),
            rank,
        }
    }

    /// The type name of a named signature.
    #[must_use]
    pub fn type_name(&self) -> Option<&TypeName> {
        match self {
            TypeSig::Named { name, .. } => Some(name),
            _ => None,
        }
    }

    /// True for both array shapes.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, TypeSig::SzArray(_) | TypeSig::Array { .. })
    }

    /// Element type of an array signature.
    #[must_use]
    pub fn element(&self) -> Option<&TypeSig> {
        match self {
            TypeSig::SzArray(element) | TypeSig::Array { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Replace generic parameters with the given arguments.
    ///
    /// Parameters without a matching argument are kept as they are.
    #[must_use]
    pub fn substitute(&self, args: &[TypeSig]) -> TypeSig {
        if args.is_empty() {
            return self.clone();
        }

        match self {
            TypeSig::GenericParam(index) => args
                .get(*index as usize)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            TypeSig::Named { name, args: inner } => TypeSig::Named {
                name: name.clone(),
                args: inner.iter().map(|arg| arg.substitute(args)).collect(),
            },
            TypeSig::SzArray(element) => TypeSig::SzArray(Box::new(element.substitute(args))),
            TypeSig::Array { element, rank } => TypeSig::Array {
                element: Box::new(element.substitute(args)),
                rank: *rank,
            },
            TypeSig::Primitive(_) | TypeSig::String | TypeSig::Object => self.clone(),
        }
    }
}

impl From<PrimitiveKind> for TypeSig {
    fn from(kind: PrimitiveKind) -> Self {
        TypeSig::Primitive(kind)
    }
}

impl fmt::Display for TypeSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeSig::Primitive(kind) => write!(f, "{kind}"),
            TypeSig::String => f.write_str("System.String"),
            TypeSig::Object => f.write_str("System.Object"),
            TypeSig::Named { name, args } => {
                write!(f, "{name}")?;
                if !args.is_empty() {
                    f.write_str("<")?;
                    for (index, arg) in args.iter().enumerate() {
                        if index > 0 {
                            f.write_str(", ")?;
                        }
                        write!(f, "{arg}")?;
                    }
                    f.write_str(">")?;
                }
                Ok(())
            }
            TypeSig::SzArray(element) => write!(f, "{element}[]"),
            TypeSig::Array { element, rank } => {
                if *rank == 1 {
                    write!(f, "{element}[*]")
                } else {
                    write!(f, "{element}[{}]", ",".repeat(*rank as usize - 1))
                }
            }
            TypeSig::GenericParam(index) => write!(f, "!{index}"),
        }
    }
}

/// The category of a named type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Reference type with automatic layout
    Class,
    /// Value type
    Struct,
    /// Enumeration over an integral primitive
    Enum(PrimitiveKind),
    /// Subclass of `System.MulticastDelegate`
    Delegate,
    /// Interface; only ever seen as a declared field type
    Interface,
}

impl TypeKind {
    /// True for kinds whose instances live on the heap and are held through references.
    #[must_use]
    pub fn is_reference(self) -> bool {
        matches!(self, TypeKind::Class | TypeKind::Delegate | TypeKind::Interface)
    }
}

/// How the fields of a type are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayoutKind {
    /// Runtime-chosen order: references first, then value fields by descending alignment
    #[default]
    Auto,
    /// Declaration order, with an optional packing cap on field alignment
    Sequential {
        /// Maximum alignment of any field
        pack: Option<u32>,
    },
    /// Every field carries an explicit offset
    Explicit {
        /// Declared minimum size
        size: Option<u32>,
    },
}

/// A declared field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Declared type, may refer to generic parameters of the declaring type
    pub sig: TypeSig,
    /// Static fields are not part of the instance layout
    pub is_static: bool,
    /// Offset for explicit layout
    pub offset: Option<u32>,
}

/// Definition of a named type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDef {
    /// Identity
    pub name: TypeName,
    /// Name of the module that defines the type
    pub module: String,
    /// Category
    pub kind: TypeKind,
    /// Base class; `None` means `System.Object` for classes and `System.ValueType` for structs
    pub base: Option<TypeSig>,
    /// Field placement strategy
    pub layout: LayoutKind,
    /// Number of generic parameters
    pub generic_params: u32,
    /// Declared fields in declaration order
    pub fields: Vec<FieldDef>,
}

impl TypeDef {
    /// The non-static fields declared by this type itself.
    pub fn instance_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|field| !field.is_static)
    }
}

/// Fluent construction of a [`TypeDef`].
pub struct TypeDefBuilder {
    def: TypeDef,
}

impl TypeDefBuilder {
    fn new(assembly: &str, name: &str, kind: TypeKind, layout: LayoutKind) -> Self {
        TypeDefBuilder {
            def: TypeDef {
                name: TypeName::new(assembly, name),
                module: format!("{assembly}.dll"),
                kind,
                base: None,
                layout,
                generic_params: 0,
                fields: Vec::new(),
            },
        }
    }

    /// Start a class definition.
    #[must_use]
    pub fn class(assembly: &str, name: &str) -> Self {
        Self::new(assembly, name, TypeKind::Class, LayoutKind::Auto)
    }

    /// Start a struct definition.
    #[must_use]
    pub fn structure(assembly: &str, name: &str) -> Self {
        Self::new(
            assembly,
            name,
            TypeKind::Struct,
            LayoutKind::Sequential { pack: None },
        )
    }

    /// Start an enum definition.
    #[must_use]
    pub fn enumeration(assembly: &str, name: &str, underlying: PrimitiveKind) -> Self {
        Self::new(
            assembly,
            name,
            TypeKind::Enum(underlying),
            LayoutKind::Sequential { pack: None },
        )
    }

    /// Start a delegate definition.
    #[must_use]
    pub fn delegate(assembly: &str, name: &str) -> Self {
        Self::new(assembly, name, TypeKind::Delegate, LayoutKind::Auto)
    }

    /// Start an interface definition.
    #[must_use]
    pub fn interface(assembly: &str, name: &str) -> Self {
        Self::new(assembly, name, TypeKind::Interface, LayoutKind::Auto)
    }

    /// Override the defining module name.
    #[must_use]
    pub fn module(mut self, module: &str) -> Self {
        self.def.module = module.to_string();
        self
    }

    /// Set the base class.
    #[must_use]
    pub fn base(mut self, base: TypeSig) -> Self {
        self.def.base = Some(base);
        self
    }

    /// Set the field layout strategy.
    #[must_use]
    pub fn layout(mut self, layout: LayoutKind) -> Self {
        self.def.layout = layout;
        self
    }

    /// Set the number of generic parameters.
    #[must_use]
    pub fn generic_params(mut self, count: u32) -> Self {
        self.def.generic_params = count;
        self
    }

    /// Add an instance field.
    #[must_use]
    pub fn field(mut self, name: &str, sig: TypeSig) -> Self {
        self.def.fields.push(FieldDef {
            name: name.to_string(),
            sig,
            is_static: false,
            offset: None,
        });
        self
    }

    /// Add an instance field at an explicit offset.
    #[must_use]
    pub fn field_at(mut self, name: &str, sig: TypeSig, offset: u32) -> Self {
        self.def.fields.push(FieldDef {
            name: name.to_string(),
            sig,
            is_static: false,
            offset: Some(offset),
        });
        self
    }

    /// Add a static field.
    #[must_use]
    pub fn static_field(mut self, name: &str, sig: TypeSig) -> Self {
        self.def.fields.push(FieldDef {
            name: name.to_string(),
            sig,
            is_static: true,
            offset: None,
        });
        self
    }

    /// Finish the definition.
    #[must_use]
    pub fn build(self) -> TypeDef {
        self.def
    }
}
