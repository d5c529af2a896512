// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2015-2026 Nautech Systems Pty Ltd. All rights reserved.
//  https://nautechsystems.io
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Stable 128-bit type identity.
//!
//! Serialization must round-trip values across independently compiled
//! modules, so type identity cannot rely on anything the compiler is free to
//! change between builds (vtable addresses, `std::any::TypeId` hashes).
//! [`TypeUuid`] is a 128-bit id that is either declared as a literal,
//! derived from a printable name ([`TypeUuid::from_name`]), or composed from
//! other ids ([`TypeUuid::combine`]). Name derivation and composition both
//! use UUIDv5, so a dynamically computed id always matches a statically
//! declared one built from the same inputs.
//!
//! Generic types compose their id from the template id and each argument id:
//! `id(Tmpl<A₁..Aₙ>) = id(Tmpl) ⊕ id(A₁) ⊕ … ⊕ id(Aₙ)`. Smart-pointer
//! types resolve under one of three [`IdTag`] rules so legacy documents
//! which stored pointee ids keep loading.

use std::{
    borrow::Cow,
    fmt::{Debug, Display},
    ops::{Add, AddAssign},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace under which printable type names are hashed into ids.
const TYPE_NAME_NAMESPACE: Uuid = Uuid::from_u128(0x8f4e_51bb_49ab_4c5a_91d4_60b8_2c1e_7d03);

/// Sentinel combined into a pointee id to form the canonical id of a
/// pointer type, so `Box<T>` and `T` fields stay distinguishable.
pub const POINTER_SENTINEL: TypeUuid =
    TypeUuid::from_u128(0x26fe_1e92_1dc2_472f_929f_fd10_9c06_ca43);

/// Resolver rule applied when a type id is requested.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum IdTag {
    /// A smart-pointer type resolves to its pointee's id (legacy document
    /// compatibility).
    PointerRemoved,
    /// A smart-pointer type resolves to the pointee id combined with
    /// [`POINTER_SENTINEL`]; every other type resolves to its own id.
    Canonical,
    /// A generic type resolves to the id of the template itself, independent
    /// of its arguments.
    Generic,
}

bitflags::bitflags! {
    /// Coarse classification of a reflected type.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
    pub struct TypeTraits: u32 {
        const IS_SIGNED = 1;
        const IS_UNSIGNED = 1 << 1;
        const IS_ENUM = 1 << 2;
        const IS_POINTER = 1 << 3;
    }
}

/// A stable 128-bit type identifier.
///
/// `TypeUuid` values are comparable, hashable, orderable and composable.
/// The canonical id of a concrete type is bit-identical at every call site
/// of the same build, which is what makes documents written by one module
/// loadable by another.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeUuid(Uuid);

impl TypeUuid {
    /// The null id.
    pub const NIL: Self = Self(Uuid::nil());

    /// Creates an id from a 128-bit literal.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Creates an id from 16 raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Derives an id from a printable type name.
    ///
    /// The same name always yields the same id, so ids computed at runtime
    /// (e.g. for a document written by an older build) match statically
    /// declared ones.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&TYPE_NAME_NAMESPACE, name.as_bytes()))
    }

    /// Returns the id raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// Returns whether this is the null id.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// Concatenates another id onto this one.
    ///
    /// This is the `⊕` operator of the composition rule: the result is the
    /// UUIDv5 of `other`'s bytes in the namespace of `self`. Composition is
    /// deterministic and order-sensitive.
    #[must_use]
    pub fn combine(&self, other: &Self) -> Self {
        Self(Uuid::new_v5(&self.0, other.0.as_bytes()))
    }
}

impl Add for TypeUuid {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.combine(&rhs)
    }
}

impl AddAssign for TypeUuid {
    fn add_assign(&mut self, rhs: Self) {
        *self = self.combine(&rhs);
    }
}

impl Display for TypeUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.braced())
    }
}

impl Debug for TypeUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.braced())
    }
}

impl FromStr for TypeUuid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim_start_matches('{').trim_end_matches('}')).map(Self)
    }
}

impl Default for TypeUuid {
    fn default() -> Self {
        Self::NIL
    }
}

/// Compile-time type information for reflected types.
///
/// Every type that participates in reflection or typed dispatch implements
/// this. The blanket impls below cover the primitives and the container
/// shapes (`Vec`, `Option`, `Box`); user types implement it directly or via
/// [`enum_type_info!`](crate::enum_type_info).
pub trait TypeInfo: 'static {
    /// Stable printable name; composed `"Tmpl<A, B>"` form for generics.
    fn type_name() -> Cow<'static, str>;

    /// Resolves the id under the given tag.
    fn type_uuid_tagged(tag: IdTag) -> TypeUuid;

    /// The canonical id.
    #[must_use]
    fn type_uuid() -> TypeUuid {
        Self::type_uuid_tagged(IdTag::Canonical)
    }

    /// Coarse classification flags.
    fn type_traits() -> TypeTraits {
        TypeTraits::empty()
    }

    /// Size of the type in bytes.
    fn type_size() -> usize
    where
        Self: Sized,
    {
        std::mem::size_of::<Self>()
    }
}

macro_rules! impl_primitive_type_info {
    ($(($ty:ty, $name:literal, $uuid:literal, $traits:expr)),* $(,)?) => {
        $(
            impl TypeInfo for $ty {
                fn type_name() -> Cow<'static, str> {
                    Cow::Borrowed($name)
                }

                fn type_uuid_tagged(_tag: IdTag) -> TypeUuid {
                    TypeUuid::from_u128($uuid)
                }

                fn type_traits() -> TypeTraits {
                    $traits
                }
            }
        )*
    };
}

impl_primitive_type_info!(
    (i8, "i8", 0x2974_9acc_debe_4eb4_85f9_95e0_7eba_7d05, TypeTraits::IS_SIGNED),
    (i16, "i16", 0xc437_7bff_0aca_48d0_84dd_7d75_3259_76f6, TypeTraits::IS_SIGNED),
    (i32, "i32", 0x4f29_f2cb_c9b3_4d9f_9f5a_27c1_7f4b_805a, TypeTraits::IS_SIGNED),
    (i64, "i64", 0x8a63_2f56_99e0_41d3_a0a2_3d87_42c6_5478, TypeTraits::IS_SIGNED),
    (u8, "u8", 0x7766_0d0c_50a1_4b1c_b04e_2c9f_12a1_2a9c, TypeTraits::IS_UNSIGNED),
    (u16, "u16", 0xd1b1_30d5_b2c0_47bd_9ecb_35c3_185d_4c5d, TypeTraits::IS_UNSIGNED),
    (u32, "u32", 0x43da_906e_7645_4e2a_b05c_2886_14ee_3be4, TypeTraits::IS_UNSIGNED),
    (u64, "u64", 0xd693_6d04_0bae_4e47_9a3e_31b5_2b74_1b35, TypeTraits::IS_UNSIGNED),
    (f32, "f32", 0xea2c_3e90_afde_4b87_8b53_4bcf_7f2e_2b9b, TypeTraits::empty()),
    (f64, "f64", 0x1103_27f4_9e3e_4b33_560a_2e54_3b45_1b15, TypeTraits::empty()),
    (bool, "bool", 0xa0ca_880c_afe4_43cb_b0e3_2e55_1f50_cbe2, TypeTraits::empty()),
    (char, "char", 0x3ab0_037f_af8f_48ce_8d2c_3b9c_29dc_1b7a, TypeTraits::empty()),
    ((), "unit", 0x41cf_b048_9b31_476c_8def_7d12_9c45_b0a2, TypeTraits::empty()),
);

impl TypeInfo for String {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("String")
    }

    fn type_uuid_tagged(_tag: IdTag) -> TypeUuid {
        TypeUuid::from_u128(0x03aa_ab3f_5c47_4736_8f25_2c06_58f0_0aab)
    }
}

const VEC_GENERIC: TypeUuid = TypeUuid::from_u128(0xa60e_3e61_1ff6_4982_b6b8_f1ee_f323_b789);
const OPTION_GENERIC: TypeUuid = TypeUuid::from_u128(0x03e1_64a9_80b9_4a93_b3c9_0c27_b6ee_4a78);
const BOX_GENERIC: TypeUuid = TypeUuid::from_u128(0xaceb_5d21_1d24_4f57_8e26_7a25_5cd1_9e5b);

impl<T: TypeInfo> TypeInfo for Vec<T> {
    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("Vec<{}>", T::type_name()))
    }

    fn type_uuid_tagged(tag: IdTag) -> TypeUuid {
        match tag {
            IdTag::Generic => VEC_GENERIC,
            tag => VEC_GENERIC.combine(&T::type_uuid_tagged(tag)),
        }
    }
}

impl<T: TypeInfo> TypeInfo for Option<T> {
    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("Option<{}>", T::type_name()))
    }

    fn type_uuid_tagged(tag: IdTag) -> TypeUuid {
        match tag {
            IdTag::Generic => OPTION_GENERIC,
            tag => OPTION_GENERIC.combine(&T::type_uuid_tagged(tag)),
        }
    }
}

impl<T: TypeInfo> TypeInfo for Box<T> {
    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("Box<{}>", T::type_name()))
    }

    fn type_uuid_tagged(tag: IdTag) -> TypeUuid {
        match tag {
            IdTag::PointerRemoved => T::type_uuid_tagged(IdTag::PointerRemoved),
            IdTag::Canonical => T::type_uuid_tagged(IdTag::Canonical).combine(&POINTER_SENTINEL),
            IdTag::Generic => BOX_GENERIC,
        }
    }

    fn type_traits() -> TypeTraits {
        T::type_traits() | TypeTraits::IS_POINTER
    }
}

/// Implements [`TypeInfo`] for an enum.
///
/// The three-argument form falls back to the underlying integral type's id,
/// which is the rule applied to enums registered without an id of their own.
/// The four-argument form declares a dedicated id literal.
#[macro_export]
macro_rules! enum_type_info {
    ($ty:ty, $name:literal, $underlying:ty) => {
        impl $crate::typeid::TypeInfo for $ty {
            fn type_name() -> ::std::borrow::Cow<'static, str> {
                ::std::borrow::Cow::Borrowed($name)
            }

            fn type_uuid_tagged(tag: $crate::typeid::IdTag) -> $crate::typeid::TypeUuid {
                <$underlying as $crate::typeid::TypeInfo>::type_uuid_tagged(tag)
            }

            fn type_traits() -> $crate::typeid::TypeTraits {
                $crate::typeid::TypeTraits::IS_ENUM
                    | <$underlying as $crate::typeid::TypeInfo>::type_traits()
            }
        }
    };
    ($ty:ty, $name:literal, $underlying:ty, $uuid:literal) => {
        impl $crate::typeid::TypeInfo for $ty {
            fn type_name() -> ::std::borrow::Cow<'static, str> {
                ::std::borrow::Cow::Borrowed($name)
            }

            fn type_uuid_tagged(_tag: $crate::typeid::IdTag) -> $crate::typeid::TypeUuid {
                $crate::typeid::TypeUuid::from_u128($uuid)
            }

            fn type_traits() -> $crate::typeid::TypeTraits {
                $crate::typeid::TypeTraits::IS_ENUM
                    | <$underlying as $crate::typeid::TypeInfo>::type_traits()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_nil_and_default() {
        assert!(TypeUuid::NIL.is_nil());
        assert_eq!(TypeUuid::default(), TypeUuid::NIL);
        assert!(!i32::type_uuid().is_nil());
    }

    #[rstest]
    fn test_canonical_id_is_stable() {
        // Two independent resolutions of the same type are bit-identical
        assert_eq!(i32::type_uuid().as_bytes(), i32::type_uuid().as_bytes());
        assert_eq!(
            Vec::<Option<u64>>::type_uuid(),
            Vec::<Option<u64>>::type_uuid()
        );
    }

    #[rstest]
    fn test_from_name_is_deterministic() {
        let a = TypeUuid::from_name("Transform");
        let b = TypeUuid::from_name("Transform");
        assert_eq!(a, b);
        assert_ne!(a, TypeUuid::from_name("transform"));
    }

    #[rstest]
    fn test_combine_matches_composition_rule() {
        // id(Vec<i32>) == id(Vec) ⊕ id(i32)
        let composed = Vec::<i32>::type_uuid_tagged(IdTag::Generic).combine(&i32::type_uuid());
        assert_eq!(Vec::<i32>::type_uuid(), composed);
    }

    #[rstest]
    fn test_combine_is_order_sensitive() {
        let a = i32::type_uuid();
        let b = u32::type_uuid();
        assert_ne!(a.combine(&b), b.combine(&a));
    }

    #[rstest]
    fn test_add_operator_is_combine() {
        let a = i32::type_uuid();
        let b = u32::type_uuid();
        assert_eq!(a + b, a.combine(&b));

        let mut c = a;
        c += b;
        assert_eq!(c, a.combine(&b));
    }

    #[rstest]
    fn test_pointer_tag_rules() {
        // PointerRemoved: Box<T> resolves to T
        assert_eq!(
            Box::<i32>::type_uuid_tagged(IdTag::PointerRemoved),
            i32::type_uuid()
        );
        // Canonical: pointee combined with the sentinel
        assert_eq!(
            Box::<i32>::type_uuid(),
            i32::type_uuid().combine(&POINTER_SENTINEL)
        );
        assert_ne!(Box::<i32>::type_uuid(), i32::type_uuid());
        // Generic: independent of the argument
        assert_eq!(
            Box::<i32>::type_uuid_tagged(IdTag::Generic),
            Box::<u64>::type_uuid_tagged(IdTag::Generic)
        );
    }

    #[rstest]
    fn test_generic_tag_ignores_arguments() {
        assert_eq!(
            Vec::<i32>::type_uuid_tagged(IdTag::Generic),
            Vec::<String>::type_uuid_tagged(IdTag::Generic)
        );
        assert_ne!(Vec::<i32>::type_uuid(), Vec::<String>::type_uuid());
    }

    #[rstest]
    fn test_composed_names() {
        assert_eq!(Vec::<i32>::type_name(), "Vec<i32>");
        assert_eq!(Option::<Box<u8>>::type_name(), "Option<Box<u8>>");
    }

    #[rstest]
    fn test_primitive_ids_are_distinct() {
        let ids = [
            i8::type_uuid(),
            i16::type_uuid(),
            i32::type_uuid(),
            i64::type_uuid(),
            u8::type_uuid(),
            u16::type_uuid(),
            u32::type_uuid(),
            u64::type_uuid(),
            f32::type_uuid(),
            f64::type_uuid(),
            bool::type_uuid(),
            char::type_uuid(),
            String::type_uuid(),
        ];
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[rstest]
    fn test_type_traits() {
        assert!(i32::type_traits().contains(TypeTraits::IS_SIGNED));
        assert!(u8::type_traits().contains(TypeTraits::IS_UNSIGNED));
        assert!(Box::<i32>::type_traits().contains(TypeTraits::IS_POINTER));
        assert!(f64::type_traits().is_empty());
    }

    #[rstest]
    fn test_display_roundtrip() {
        let id = i32::type_uuid();
        let text = id.to_string();
        assert!(text.starts_with('{') && text.ends_with('}'));
        assert_eq!(text.parse::<TypeUuid>().unwrap(), id);
    }

    #[rstest]
    fn test_serde_roundtrip() {
        let id = Vec::<f32>::type_uuid();
        let json = serde_json::to_string(&id).unwrap();
        let back: TypeUuid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[derive(Debug, PartialEq)]
    enum Facing {
        _North,
        _South,
    }

    enum_type_info!(Facing, "Facing", u32);

    #[rstest]
    fn test_enum_falls_back_to_underlying_id() {
        assert_eq!(Facing::type_uuid(), u32::type_uuid());
        assert!(Facing::type_traits().contains(TypeTraits::IS_ENUM));
        assert!(Facing::type_traits().contains(TypeTraits::IS_UNSIGNED));
    }
}
