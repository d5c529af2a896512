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

//! Container adapters for composite reflected types.
//!
//! A [`DataContainer`] lets the traversal walk, grow and clear a composite
//! value without knowing its concrete shape. `Vec<T>` is the growable
//! sequence, `Option<T>` a capacity-one container, and `Box<T>` a fixed
//! single-slot indirection (the smart-pointer shape of a reflected field).

use std::{any::Any, marker::PhantomData};

use ustr::Ustr;
use velcro_core::typeid::{TypeInfo, TypeUuid};

use super::class_data::ElementFlags;

/// Uniform access to the elements of a composite value.
pub trait DataContainer: 'static {
    /// Canonical id of the stored element type.
    fn element_uuid(&self) -> TypeUuid;

    /// Name document children of this container carry.
    fn element_name(&self) -> Ustr {
        Ustr::from("element")
    }

    /// Flags synthesized onto the per-element metadata.
    fn element_flags(&self) -> ElementFlags {
        ElementFlags::empty()
    }

    /// Whether the container's occupancy cannot change.
    fn is_fixed_size(&self) -> bool {
        false
    }

    /// Whether existing slots can be addressed by index.
    fn is_index_addressable(&self) -> bool {
        true
    }

    /// Number of stored elements.
    fn size(&self, obj: &dyn Any) -> usize;

    /// Visits each element in order until the callback returns false.
    fn enumerate(&self, obj: &dyn Any, f: &mut dyn FnMut(&dyn Any) -> bool);

    /// Borrows the element at `index`.
    fn get_element_ref<'a>(&self, obj: &'a dyn Any, index: usize) -> Option<&'a dyn Any>;

    /// Removes every element.
    fn clear(&self, obj: &mut dyn Any);

    /// Makes room for one more element and returns the slot, or `None`
    /// when the container cannot grow.
    fn reserve_element<'a>(&self, obj: &'a mut dyn Any) -> Option<&'a mut dyn Any>;

    /// Mutably borrows the element at `index`.
    fn get_element_by_index<'a>(&self, obj: &'a mut dyn Any, index: usize)
    -> Option<&'a mut dyn Any>;

    /// Commits a previously reserved slot. Containers with direct storage
    /// have nothing to do here.
    fn store_element(&self, _obj: &mut dyn Any, _index: usize) {}

    /// Removes the element at `index`; returns whether one was removed.
    fn remove_element(&self, obj: &mut dyn Any, index: usize) -> bool;
}

/// Container adapter for `Vec<T>`.
pub struct VecContainer<T>(PhantomData<T>);

impl<T> Default for VecContainer<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T> VecContainer<T> {
    /// Creates a new [`VecContainer`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: TypeInfo + Default + 'static> DataContainer for VecContainer<T> {
    fn element_uuid(&self) -> TypeUuid {
        T::type_uuid()
    }

    fn size(&self, obj: &dyn Any) -> usize {
        obj.downcast_ref::<Vec<T>>().map_or(0, Vec::len)
    }

    fn enumerate(&self, obj: &dyn Any, f: &mut dyn FnMut(&dyn Any) -> bool) {
        let Some(vec) = obj.downcast_ref::<Vec<T>>() else {
            log::error!("VecContainer: object is not a {}", Vec::<T>::type_name());
            return;
        };
        for item in vec {
            if !f(item) {
                break;
            }
        }
    }

    fn get_element_ref<'a>(&self, obj: &'a dyn Any, index: usize) -> Option<&'a dyn Any> {
        obj.downcast_ref::<Vec<T>>()
            .and_then(|vec| vec.get(index))
            .map(|item| item as &dyn Any)
    }

    fn clear(&self, obj: &mut dyn Any) {
        if let Some(vec) = obj.downcast_mut::<Vec<T>>() {
            vec.clear();
        }
    }

    fn reserve_element<'a>(&self, obj: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        let vec = obj.downcast_mut::<Vec<T>>()?;
        vec.push(T::default());
        vec.last_mut().map(|item| item as &mut dyn Any)
    }

    fn get_element_by_index<'a>(
        &self,
        obj: &'a mut dyn Any,
        index: usize,
    ) -> Option<&'a mut dyn Any> {
        obj.downcast_mut::<Vec<T>>()
            .and_then(|vec| vec.get_mut(index))
            .map(|item| item as &mut dyn Any)
    }

    fn remove_element(&self, obj: &mut dyn Any, index: usize) -> bool {
        match obj.downcast_mut::<Vec<T>>() {
            Some(vec) if index < vec.len() => {
                vec.remove(index);
                true
            }
            _ => false,
        }
    }
}

/// Container adapter for `Option<T>`: capacity one, empty or occupied.
pub struct OptionContainer<T>(PhantomData<T>);

impl<T> Default for OptionContainer<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T> OptionContainer<T> {
    /// Creates a new [`OptionContainer`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: TypeInfo + Default + 'static> DataContainer for OptionContainer<T> {
    fn element_uuid(&self) -> TypeUuid {
        T::type_uuid()
    }

    fn size(&self, obj: &dyn Any) -> usize {
        obj.downcast_ref::<Option<T>>()
            .map_or(0, |option| usize::from(option.is_some()))
    }

    fn enumerate(&self, obj: &dyn Any, f: &mut dyn FnMut(&dyn Any) -> bool) {
        if let Some(Some(value)) = obj.downcast_ref::<Option<T>>() {
            f(value);
        }
    }

    fn get_element_ref<'a>(&self, obj: &'a dyn Any, index: usize) -> Option<&'a dyn Any> {
        if index != 0 {
            return None;
        }
        obj.downcast_ref::<Option<T>>()
            .and_then(Option::as_ref)
            .map(|value| value as &dyn Any)
    }

    fn clear(&self, obj: &mut dyn Any) {
        if let Some(option) = obj.downcast_mut::<Option<T>>() {
            *option = None;
        }
    }

    fn reserve_element<'a>(&self, obj: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        let option = obj.downcast_mut::<Option<T>>()?;
        if option.is_some() {
            return None;
        }
        *option = Some(T::default());
        option.as_mut().map(|value| value as &mut dyn Any)
    }

    fn get_element_by_index<'a>(
        &self,
        obj: &'a mut dyn Any,
        index: usize,
    ) -> Option<&'a mut dyn Any> {
        if index != 0 {
            return None;
        }
        obj.downcast_mut::<Option<T>>()
            .and_then(Option::as_mut)
            .map(|value| value as &mut dyn Any)
    }

    fn remove_element(&self, obj: &mut dyn Any, index: usize) -> bool {
        match obj.downcast_mut::<Option<T>>() {
            Some(option) if index == 0 && option.is_some() => {
                *option = None;
                true
            }
            _ => false,
        }
    }
}

/// Container adapter for `Box<T>`: one always-occupied slot.
pub struct BoxContainer<T>(PhantomData<T>);

impl<T> Default for BoxContainer<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T> BoxContainer<T> {
    /// Creates a new [`BoxContainer`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: TypeInfo + Default + 'static> DataContainer for BoxContainer<T> {
    fn element_uuid(&self) -> TypeUuid {
        T::type_uuid()
    }

    fn is_fixed_size(&self) -> bool {
        true
    }

    fn size(&self, _obj: &dyn Any) -> usize {
        1
    }

    fn enumerate(&self, obj: &dyn Any, f: &mut dyn FnMut(&dyn Any) -> bool) {
        if let Some(boxed) = obj.downcast_ref::<Box<T>>() {
            f(boxed.as_ref());
        }
    }

    fn get_element_ref<'a>(&self, obj: &'a dyn Any, index: usize) -> Option<&'a dyn Any> {
        if index != 0 {
            return None;
        }
        obj.downcast_ref::<Box<T>>()
            .map(|boxed| boxed.as_ref() as &dyn Any)
    }

    fn clear(&self, _obj: &mut dyn Any) {
        // A box always holds a value
    }

    fn reserve_element<'a>(&self, obj: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        obj.downcast_mut::<Box<T>>()
            .map(|boxed| boxed.as_mut() as &mut dyn Any)
    }

    fn get_element_by_index<'a>(
        &self,
        obj: &'a mut dyn Any,
        index: usize,
    ) -> Option<&'a mut dyn Any> {
        if index != 0 {
            return None;
        }
        obj.downcast_mut::<Box<T>>()
            .map(|boxed| boxed.as_mut() as &mut dyn Any)
    }

    fn remove_element(&self, _obj: &mut dyn Any, _index: usize) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_vec_container_walks_and_grows() {
        let container = VecContainer::<i32>::new();
        let mut values = vec![1i32, 2, 3];

        assert_eq!(container.size(&values), 3);
        assert_eq!(container.element_uuid(), i32::type_uuid());

        let mut seen = Vec::new();
        container.enumerate(&values, &mut |item| {
            seen.push(*item.downcast_ref::<i32>().unwrap());
            true
        });
        assert_eq!(seen, vec![1, 2, 3]);

        let slot = container.reserve_element(&mut values).unwrap();
        *slot.downcast_mut::<i32>().unwrap() = 4;
        assert_eq!(values, vec![1, 2, 3, 4]);

        assert!(container.remove_element(&mut values, 0));
        assert_eq!(values, vec![2, 3, 4]);

        container.clear(&mut values);
        assert!(values.is_empty());
    }

    #[rstest]
    fn test_vec_container_enumeration_is_cancelable() {
        let container = VecContainer::<i32>::new();
        let values = vec![1i32, 2, 3];

        let mut seen = 0;
        container.enumerate(&values, &mut |_| {
            seen += 1;
            false
        });
        assert_eq!(seen, 1);
    }

    #[rstest]
    fn test_option_container_capacity_one() {
        let container = OptionContainer::<u32>::new();
        let mut value: Option<u32> = None;

        assert_eq!(container.size(&value), 0);
        // Empty option enumerates nothing
        container.enumerate(&value, &mut |_| panic!("unexpected element"));

        let slot = container.reserve_element(&mut value).unwrap();
        *slot.downcast_mut::<u32>().unwrap() = 9;
        assert_eq!(value, Some(9));
        assert_eq!(container.size(&value), 1);

        // A second reservation fails; the slot is occupied
        assert!(container.reserve_element(&mut value).is_none());

        assert!(container.remove_element(&mut value, 0));
        assert_eq!(value, None);
    }

    #[rstest]
    fn test_box_container_single_slot() {
        let container = BoxContainer::<String>::new();
        let mut value = Box::new("before".to_string());

        assert_eq!(container.size(&value), 1);
        assert!(container.is_fixed_size());

        let slot = container.get_element_by_index(&mut value, 0).unwrap();
        *slot.downcast_mut::<String>().unwrap() = "after".to_string();
        assert_eq!(*value, "after");

        assert!(container.get_element_by_index(&mut value, 1).is_none());
        assert!(!container.remove_element(&mut value, 0));
    }

    #[rstest]
    fn test_container_rejects_foreign_object() {
        let container = VecContainer::<i32>::new();
        let not_a_vec = 5u8;
        assert_eq!(container.size(&not_a_vec), 0);
        assert!(container.get_element_ref(&not_a_vec, 0).is_none());
    }
}
