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

//! Runtime-typed field slots.
//!
//! A [`DynamicField`] carries a value whose type is chosen at runtime, with
//! the type id stored alongside the pointer. Traversal synthesizes a
//! pointer element with the runtime id, so documents record the concrete
//! stored type and reload it polymorphically.

use std::{any::Any, fmt::Debug};

use velcro_core::typeid::{IdTag, TypeInfo, TypeTraits, TypeUuid};

/// A slot holding a value of runtime-selected reflected type.
#[derive(Default)]
pub struct DynamicField {
    type_uuid: TypeUuid,
    value: Option<Box<dyn Any>>,
}

impl Debug for DynamicField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(DynamicField))
            .field("type_uuid", &self.type_uuid)
            .field("occupied", &self.value.is_some())
            .finish()
    }
}

impl DynamicField {
    /// Creates an empty [`DynamicField`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a field holding `value`.
    #[must_use]
    pub fn with_value<T: TypeInfo + Any>(value: T) -> Self {
        Self {
            type_uuid: T::type_uuid(),
            value: Some(Box::new(value)),
        }
    }

    /// Stores `value`, replacing any previous content.
    pub fn set<T: TypeInfo + Any>(&mut self, value: T) {
        self.type_uuid = T::type_uuid();
        self.value = Some(Box::new(value));
    }

    /// Stores an already-boxed value under an explicit runtime id.
    pub(crate) fn set_boxed(&mut self, type_uuid: TypeUuid, value: Box<dyn Any>) {
        self.type_uuid = type_uuid;
        self.value = Some(value);
    }

    /// Empties the slot.
    pub fn clear(&mut self) {
        self.type_uuid = TypeUuid::NIL;
        self.value = None;
    }

    /// Returns whether the slot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
    }

    /// The runtime id of the stored value, nil when empty.
    #[must_use]
    pub fn value_uuid(&self) -> TypeUuid {
        self.type_uuid
    }

    /// Borrows the stored value as `T`.
    #[must_use]
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.value.as_deref().and_then(<dyn Any>::downcast_ref)
    }

    /// Mutably borrows the stored value as `T`.
    #[must_use]
    pub fn get_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.value.as_deref_mut().and_then(<dyn Any>::downcast_mut)
    }

    pub(crate) fn value(&self) -> Option<&dyn Any> {
        self.value.as_deref()
    }
}

impl TypeInfo for DynamicField {
    fn type_name() -> std::borrow::Cow<'static, str> {
        std::borrow::Cow::Borrowed("DynamicField")
    }

    fn type_uuid_tagged(_tag: IdTag) -> TypeUuid {
        TypeUuid::from_u128(0x63da_b36a_6f9f_42cd_9c10_1a3f_8e05_1c27)
    }

    fn type_traits() -> TypeTraits {
        TypeTraits::IS_POINTER
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_empty_field() {
        let field = DynamicField::new();
        assert!(field.is_empty());
        assert!(field.value_uuid().is_nil());
        assert!(field.get::<i32>().is_none());
    }

    #[rstest]
    fn test_set_and_get() {
        let mut field = DynamicField::new();
        field.set(42i32);

        assert!(!field.is_empty());
        assert_eq!(field.value_uuid(), i32::type_uuid());
        assert_eq!(field.get::<i32>(), Some(&42));
        assert!(field.get::<u32>().is_none());

        *field.get_mut::<i32>().unwrap() = 7;
        assert_eq!(field.get::<i32>(), Some(&7));
    }

    #[rstest]
    fn test_replace_changes_runtime_id() {
        let mut field = DynamicField::with_value(1.5f64);
        assert_eq!(field.value_uuid(), f64::type_uuid());

        field.set("text".to_string());
        assert_eq!(field.value_uuid(), String::type_uuid());
        assert_eq!(field.get::<String>().map(String::as_str), Some("text"));
    }

    #[rstest]
    fn test_clear() {
        let mut field = DynamicField::with_value(9u8);
        field.clear();
        assert!(field.is_empty());
        assert!(field.value_uuid().is_nil());
    }
}
