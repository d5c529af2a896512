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

//! Registered type metadata.
//!
//! A [`ClassData`] describes one reflected type: its identity, version,
//! ordered fields (base classes first), and the hooks the traversal
//! consults (factory, leaf serializer, container adapter, serialize
//! events, version upgrades). Field access is through safe projection
//! functions captured at registration, one pair per [`ClassElement`].

use std::{any::Any, fmt::Debug, rc::Rc};

use ustr::Ustr;
use velcro_core::{TypeUuid, crc::crc32};

use super::{
    container::DataContainer,
    context::SerializeContext,
    element::DataElementNode,
    error::ErrorHandler,
    serializer::DataSerializer,
    upgrade::UpgradeHandler,
};

/// Version sentinel marking a class as deprecated; instances of it are
/// converted or dropped on load.
pub const VERSION_DEPRECATED: u32 = u32::MAX;

bitflags::bitflags! {
    /// Flags describing one reflected field.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct ElementFlags: u32 {
        /// The field is an indirection; the document stores the pointee.
        const POINTER = 1;
        /// The field embeds a reflected base class.
        const BASE_CLASS = 1 << 1;
        /// Loading does not default-initialize the field when absent.
        const NO_DEFAULT_VALUE = 1 << 2;
        /// The field is a runtime-typed slot.
        const DYNAMIC_FIELD = 1 << 3;
        /// The field exists for editor tooling only.
        const UI_ELEMENT = 1 << 4;
    }
}

/// Key of an attribute, the CRC-32 of its name.
pub type AttributeId = u32;

/// Shared attribute payload; reference counted so registrations can share
/// one value.
pub type AttributeValue = Rc<dyn Any>;

/// Creates instances of a registered type.
pub type FactoryFn = Rc<dyn Fn() -> Box<dyn Any>>;

/// Mutates a document node from an older version into the current layout.
/// Returns whether the node is usable afterwards.
pub type VersionConverterFn =
    Rc<dyn Fn(&SerializeContext, &mut DataElementNode, &mut ErrorHandler) -> bool>;

/// Safe field projection pair captured at registration.
pub struct FieldAccess {
    get_fn: Box<dyn Fn(&dyn Any) -> Option<&dyn Any>>,
    get_mut_fn: Box<dyn Fn(&mut dyn Any) -> Option<&mut dyn Any>>,
}

impl FieldAccess {
    /// Captures the projections for field `F` of enclosing type `C`.
    #[must_use]
    pub fn new<C: Any, F: Any>(get: fn(&C) -> &F, get_mut: fn(&mut C) -> &mut F) -> Self {
        Self {
            get_fn: Box::new(move |obj| obj.downcast_ref::<C>().map(|c| get(c) as &dyn Any)),
            get_mut_fn: Box::new(move |obj| {
                obj.downcast_mut::<C>().map(|c| get_mut(c) as &mut dyn Any)
            }),
        }
    }

    /// Projects the field out of `obj`; `None` when `obj` is not the
    /// enclosing type.
    #[must_use]
    pub fn get<'a>(&self, obj: &'a dyn Any) -> Option<&'a dyn Any> {
        (self.get_fn)(obj)
    }

    /// Mutable projection.
    #[must_use]
    pub fn get_mut<'a>(&self, obj: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        (self.get_mut_fn)(obj)
    }
}

/// One reflected field of a class.
pub struct ClassElement {
    pub name: Ustr,
    pub name_crc: u32,
    pub type_uuid: TypeUuid,
    pub data_size: usize,
    pub flags: ElementFlags,
    pub attributes: Vec<(AttributeId, AttributeValue)>,
    /// `None` for elements synthesized during traversal (container items,
    /// runtime-typed values), which have no enclosing projection.
    pub(crate) access: Option<FieldAccess>,
}

impl ClassElement {
    pub(crate) fn new(
        name: &str,
        type_uuid: TypeUuid,
        data_size: usize,
        flags: ElementFlags,
        access: FieldAccess,
    ) -> Self {
        Self {
            name: Ustr::from(name),
            name_crc: crc32(name),
            type_uuid,
            data_size,
            flags,
            attributes: Vec::new(),
            access: Some(access),
        }
    }

    pub(crate) fn synthesized(name: Ustr, type_uuid: TypeUuid, flags: ElementFlags) -> Self {
        Self {
            name,
            name_crc: crc32(name.as_str()),
            type_uuid,
            data_size: 0,
            flags,
            attributes: Vec::new(),
            access: None,
        }
    }

    /// Projects this field out of an instance of the enclosing class.
    /// Synthesized elements have no projection.
    #[must_use]
    pub fn get<'a>(&self, obj: &'a dyn Any) -> Option<&'a dyn Any> {
        self.access.as_ref().and_then(|access| access.get(obj))
    }

    /// Mutable projection.
    #[must_use]
    pub fn get_mut<'a>(&self, obj: &'a mut dyn Any) -> Option<&'a mut dyn Any> {
        self.access.as_ref().and_then(|access| access.get_mut(obj))
    }

    /// Finds an attribute by id.
    #[must_use]
    pub fn find_attribute(&self, id: AttributeId) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(attr_id, _)| *attr_id == id)
            .map(|(_, value)| value)
    }
}

impl Debug for ClassElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(ClassElement))
            .field("name", &self.name)
            .field("type_uuid", &self.type_uuid)
            .field("flags", &self.flags)
            .finish()
    }
}

/// A leaf serializer in either disposition: owned by the registration or
/// borrowed from a static.
pub enum SerializerRef {
    Owned(Box<dyn DataSerializer>),
    Static(&'static dyn DataSerializer),
}

impl SerializerRef {
    /// Borrows the serializer regardless of disposition.
    #[must_use]
    pub fn get(&self) -> &dyn DataSerializer {
        match self {
            Self::Owned(serializer) => serializer.as_ref(),
            Self::Static(serializer) => *serializer,
        }
    }
}

/// Hooks invoked around traversal and cloning of instances of a class.
pub trait SerializeEvents: 'static {
    /// Instance is about to be read.
    fn on_read_begin(&self, _obj: &dyn Any) {}

    /// Reading finished.
    fn on_read_end(&self, _obj: &dyn Any) {}

    /// Instance is about to be written.
    fn on_write_begin(&self, _obj: &mut dyn Any) {}

    /// Writing finished.
    fn on_write_end(&self, _obj: &mut dyn Any) {}

    /// The instance was just produced by the clone engine.
    fn on_post_clone(&self, _obj: &mut dyn Any) {}
}

/// Metadata for one registered type.
pub struct ClassData {
    pub name: Ustr,
    pub type_uuid: TypeUuid,
    pub version: u32,
    /// Size of the type in bytes.
    pub size: usize,
    pub(crate) factory: Option<FactoryFn>,
    pub(crate) serializer: Option<SerializerRef>,
    pub(crate) container: Option<Rc<dyn DataContainer>>,
    pub(crate) event_handler: Option<Rc<dyn SerializeEvents>>,
    pub(crate) persistent_id: Option<fn(&dyn Any) -> u64>,
    pub(crate) do_save: Option<fn(&dyn Any) -> bool>,
    pub(crate) version_converter: Option<VersionConverterFn>,
    pub elements: Vec<ClassElement>,
    pub(crate) upgrades: UpgradeHandler,
    pub attributes: Vec<(AttributeId, AttributeValue)>,
}

impl ClassData {
    /// Creates a bare [`ClassData`] with no hooks or fields.
    #[must_use]
    pub fn new(name: &str, type_uuid: TypeUuid, size: usize) -> Self {
        Self {
            name: Ustr::from(name),
            type_uuid,
            version: 0,
            size,
            factory: None,
            serializer: None,
            container: None,
            event_handler: None,
            persistent_id: None,
            do_save: None,
            version_converter: None,
            elements: Vec::new(),
            upgrades: UpgradeHandler::new(),
            attributes: Vec::new(),
        }
    }

    /// Returns whether this class carries the deprecation sentinel.
    #[must_use]
    pub fn is_deprecated(&self) -> bool {
        self.version == VERSION_DEPRECATED
    }

    /// Borrows the leaf serializer, if any.
    #[must_use]
    pub fn serializer(&self) -> Option<&dyn DataSerializer> {
        self.serializer.as_ref().map(SerializerRef::get)
    }

    /// Borrows the container adapter, if any.
    #[must_use]
    pub fn container(&self) -> Option<&Rc<dyn DataContainer>> {
        self.container.as_ref()
    }

    /// Finds a field by name CRC.
    #[must_use]
    pub fn find_element(&self, name_crc: u32) -> Option<&ClassElement> {
        self.elements.iter().find(|e| e.name_crc == name_crc)
    }

    /// Finds a class-level attribute by id.
    #[must_use]
    pub fn find_attribute(&self, id: AttributeId) -> Option<&AttributeValue> {
        self.attributes
            .iter()
            .find(|(attr_id, _)| *attr_id == id)
            .map(|(_, value)| value)
    }

    /// Creates a fresh instance through the factory hook.
    #[must_use]
    pub fn create_instance(&self) -> Option<Box<dyn Any>> {
        self.factory.as_ref().map(|factory| factory())
    }

    /// Returns whether an instance should be written out, consulting the
    /// do-save hook.
    #[must_use]
    pub fn should_save(&self, obj: &dyn Any) -> bool {
        self.do_save.map_or(true, |hook| hook(obj))
    }

    /// Returns the persistent id of an instance, if the class defines one.
    #[must_use]
    pub fn persistent_id(&self, obj: &dyn Any) -> Option<u64> {
        self.persistent_id.map(|hook| hook(obj))
    }
}

impl Debug for ClassData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct(stringify!(ClassData))
            .field("name", &self.name)
            .field("type_uuid", &self.type_uuid)
            .field("version", &self.version)
            .field("elements", &self.elements.len())
            .field("has_serializer", &self.serializer.is_some())
            .field("has_container", &self.container.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use velcro_core::TypeInfo;

    use super::*;
    use crate::reflect::serializer::leaf_serializer;

    #[derive(Default)]
    struct Sample {
        health: i32,
    }

    fn health_element() -> ClassElement {
        ClassElement::new(
            "health",
            i32::type_uuid(),
            std::mem::size_of::<i32>(),
            ElementFlags::empty(),
            FieldAccess::new::<Sample, i32>(|s| &s.health, |s| &mut s.health),
        )
    }

    #[rstest]
    fn test_field_access_projects_typed_field() {
        let mut sample = Sample { health: 30 };
        let element = health_element();

        let field = element.get(&sample).unwrap();
        assert_eq!(field.downcast_ref::<i32>(), Some(&30));

        *element
            .get_mut(&mut sample)
            .unwrap()
            .downcast_mut::<i32>()
            .unwrap() = 45;
        assert_eq!(sample.health, 45);
    }

    #[rstest]
    fn test_field_access_rejects_foreign_object() {
        let element = health_element();
        let not_a_sample = 9u8;
        assert!(element.get(&not_a_sample).is_none());
    }

    #[rstest]
    fn test_element_name_crc_matches_runtime_hash() {
        let element = health_element();
        assert_eq!(element.name_crc, velcro_core::crc::crc32("health"));
    }

    #[rstest]
    fn test_class_data_lookup_and_factory() {
        let mut class_data = ClassData::new("Sample", TypeUuid::from_name("Sample"), 4);
        class_data.factory = Some(Rc::new(|| Box::new(Sample::default())));
        class_data.elements.push(health_element());

        assert!(class_data.find_element(crc32("health")).is_some());
        assert!(class_data.find_element(crc32("missing")).is_none());

        let instance = class_data.create_instance().unwrap();
        assert!(instance.downcast_ref::<Sample>().is_some());
    }

    #[rstest]
    fn test_serializer_dispositions() {
        let owned = SerializerRef::Owned(Box::new(
            crate::reflect::serializer::LeafSerializer::<i32>::INSTANCE,
        ));
        let borrowed = SerializerRef::Static(leaf_serializer::<i32>());

        assert!(owned.get().compare(&1i32, &1i32));
        assert!(borrowed.get().compare(&1i32, &1i32));
    }

    #[rstest]
    fn test_deprecated_sentinel() {
        let mut class_data = ClassData::new("Old", TypeUuid::from_name("Old"), 0);
        assert!(!class_data.is_deprecated());
        class_data.version = VERSION_DEPRECATED;
        assert!(class_data.is_deprecated());
    }

    #[rstest]
    fn test_attributes_by_crc() {
        let mut class_data = ClassData::new("Sample", TypeUuid::from_name("Sample"), 4);
        class_data
            .attributes
            .push((crc32("category"), Rc::new("gameplay".to_string())));

        let value = class_data.find_attribute(crc32("category")).unwrap();
        assert_eq!(
            value.downcast_ref::<String>().map(String::as_str),
            Some("gameplay")
        );
        assert!(class_data.find_attribute(crc32("other")).is_none());
    }
}
