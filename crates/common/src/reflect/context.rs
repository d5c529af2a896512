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

//! The reflection type graph.
//!
//! A [`SerializeContext`] owns every [`ClassData`] registered with it and
//! drives the operations that need the whole graph: depth-first instance
//! enumeration, the clone engine, downcasting along reflected base chains,
//! and structural comparison. Generic specializations register through
//! [`GenericClassInfo`] so the same shape can be injected into several
//! contexts by a module registry.

use std::{
    any::Any,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use ahash::{AHashMap, AHashSet};
use ustr::Ustr;
use velcro_core::{
    crc::crc32,
    typeid::{IdTag, TypeInfo, TypeUuid},
};

use super::{
    class_data::{ClassData, ClassElement, ElementFlags, FactoryFn, SerializerRef},
    container::{BoxContainer, OptionContainer, VecContainer},
    dynamic::DynamicField,
    error::{DbgStackEntry, ErrorHandler},
    serializer::{ByteOrder, LeafValue, leaf_serializer},
};

bitflags::bitflags! {
    /// Advisory access flags for one traversal.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
    pub struct AccessFlags: u32 {
        /// The traversal reads the instance.
        const FOR_READ = 1;
        /// The traversal will write the instance back.
        const FOR_WRITE = 1 << 1;
        /// Defer the end event; the caller keeps the instance held.
        const HOLD = 1 << 2;
    }
}

/// Callback invoked when the traversal enters a value. Returning false
/// skips the subtree.
pub type BeginElemFn<'a> = &'a mut dyn FnMut(&dyn Any, &ClassData, Option<&ClassElement>) -> bool;

/// Callback invoked when the traversal leaves a value. Returning false
/// cancels the remaining traversal.
pub type EndElemFn<'a> = &'a mut dyn FnMut() -> bool;

/// Registration record for one generic specialization.
///
/// Carries the specialized, template and legacy (pointer-removed) ids plus
/// a constructor for the class metadata, so a per-module registry can
/// inject the same specialization into any number of contexts.
pub struct GenericClassInfo {
    pub specialized_uuid: TypeUuid,
    pub generic_uuid: TypeUuid,
    pub legacy_uuid: TypeUuid,
    pub element_uuids: Vec<TypeUuid>,
    pub(crate) make_class_data: Rc<dyn Fn() -> ClassData>,
}

impl GenericClassInfo {
    /// Specialization record for `Vec<T>`.
    #[must_use]
    pub fn for_vec<T: TypeInfo + Default + 'static>() -> Self {
        Self {
            specialized_uuid: Vec::<T>::type_uuid(),
            generic_uuid: Vec::<T>::type_uuid_tagged(IdTag::Generic),
            legacy_uuid: Vec::<T>::type_uuid_tagged(IdTag::PointerRemoved),
            element_uuids: vec![T::type_uuid()],
            make_class_data: Rc::new(|| {
                let name = Vec::<T>::type_name();
                let mut class_data =
                    ClassData::new(&name, Vec::<T>::type_uuid(), std::mem::size_of::<Vec<T>>());
                class_data.factory = Some(Rc::new(|| Box::new(Vec::<T>::new())));
                class_data.container = Some(Rc::new(VecContainer::<T>::new()));
                class_data
            }),
        }
    }

    /// Specialization record for `Option<T>`.
    #[must_use]
    pub fn for_option<T: TypeInfo + Default + 'static>() -> Self {
        Self {
            specialized_uuid: Option::<T>::type_uuid(),
            generic_uuid: Option::<T>::type_uuid_tagged(IdTag::Generic),
            legacy_uuid: Option::<T>::type_uuid_tagged(IdTag::PointerRemoved),
            element_uuids: vec![T::type_uuid()],
            make_class_data: Rc::new(|| {
                let name = Option::<T>::type_name();
                let mut class_data = ClassData::new(
                    &name,
                    Option::<T>::type_uuid(),
                    std::mem::size_of::<Option<T>>(),
                );
                class_data.factory = Some(Rc::new(|| Box::new(Option::<T>::None)));
                class_data.container = Some(Rc::new(OptionContainer::<T>::new()));
                class_data
            }),
        }
    }

    /// Specialization record for `Box<T>`, the reflected pointer shape.
    #[must_use]
    pub fn for_box<T: TypeInfo + Default + 'static>() -> Self {
        Self {
            specialized_uuid: Box::<T>::type_uuid(),
            generic_uuid: Box::<T>::type_uuid_tagged(IdTag::Generic),
            legacy_uuid: Box::<T>::type_uuid_tagged(IdTag::PointerRemoved),
            element_uuids: vec![T::type_uuid()],
            make_class_data: Rc::new(|| {
                let name = Box::<T>::type_name();
                let mut class_data =
                    ClassData::new(&name, Box::<T>::type_uuid(), std::mem::size_of::<Box<T>>());
                class_data.factory = Some(Rc::new(|| Box::new(Box::new(T::default()))));
                class_data.container = Some(Rc::new(BoxContainer::<T>::new()));
                class_data
            }),
        }
    }
}

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Owns the reflection graph and the operations over it.
pub struct SerializeContext {
    id: u64,
    classes: AHashMap<TypeUuid, ClassData>,
    name_to_uuid: AHashMap<u32, TypeUuid>,
    any_creators: AHashMap<TypeUuid, FactoryFn>,
    generic_specializations: AHashMap<TypeUuid, Vec<TypeUuid>>,
    legacy_to_canonical: AHashMap<TypeUuid, TypeUuid>,
    attached_modules: AHashSet<u64>,
}

impl Default for SerializeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SerializeContext {
    /// Creates a new empty [`SerializeContext`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            classes: AHashMap::new(),
            name_to_uuid: AHashMap::new(),
            any_creators: AHashMap::new(),
            generic_specializations: AHashMap::new(),
            legacy_to_canonical: AHashMap::new(),
            attached_modules: AHashSet::new(),
        }
    }

    /// Unique id of this context, used by module registries to track
    /// where their infos are reflected.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    // ---------------------------------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------------------------------

    /// Inserts a class into the graph. A registration for the same id
    /// replaces the previous one with a logged warning.
    pub fn register_type(&mut self, class_data: ClassData, creator: Option<FactoryFn>) {
        let uuid = class_data.type_uuid;
        if self.classes.contains_key(&uuid) {
            log::warn!(
                "SerializeContext: re-registering type '{}' ({uuid})",
                class_data.name,
            );
        }
        self.name_to_uuid
            .insert(crc32(class_data.name.as_str()), uuid);
        if let Some(factory) = creator.or_else(|| class_data.factory.clone()) {
            self.any_creators.insert(uuid, factory);
        }
        self.classes.insert(uuid, class_data);
    }

    /// Removes a class and every index entry pointing at it.
    pub fn unregister_type(&mut self, uuid: TypeUuid) -> bool {
        let Some(class_data) = self.classes.remove(&uuid) else {
            return false;
        };
        self.name_to_uuid.remove(&crc32(class_data.name.as_str()));
        self.any_creators.remove(&uuid);
        self.legacy_to_canonical
            .retain(|_, canonical| *canonical != uuid);
        self.generic_specializations.retain(|_, specialized| {
            specialized.retain(|candidate| *candidate != uuid);
            !specialized.is_empty()
        });
        true
    }

    /// Registers a generic specialization record.
    pub fn register_generic(&mut self, info: GenericClassInfo) {
        self.register_generic_info(&info);
    }

    pub(crate) fn register_generic_info(&mut self, info: &GenericClassInfo) {
        self.register_type((info.make_class_data)(), None);
        self.legacy_to_canonical
            .entry(info.legacy_uuid)
            .or_insert(info.specialized_uuid);
        let specializations = self
            .generic_specializations
            .entry(info.legacy_uuid)
            .or_default();
        if !specializations.contains(&info.specialized_uuid) {
            specializations.push(info.specialized_uuid);
        }
    }

    /// Registers `Vec<T>`.
    pub fn register_vec<T: TypeInfo + Default + 'static>(&mut self) {
        self.register_generic(GenericClassInfo::for_vec::<T>());
    }

    /// Registers `Option<T>`.
    pub fn register_option<T: TypeInfo + Default + 'static>(&mut self) {
        self.register_generic(GenericClassInfo::for_option::<T>());
    }

    /// Registers `Box<T>`.
    pub fn register_box<T: TypeInfo + Default + 'static>(&mut self) {
        self.register_generic(GenericClassInfo::for_box::<T>());
    }

    /// Registers a primitive with the shared leaf serializer.
    pub fn register_leaf<T: LeafValue + TypeInfo>(&mut self) {
        let name = T::type_name();
        let mut class_data = ClassData::new(&name, T::type_uuid(), std::mem::size_of::<T>());
        class_data.factory = Some(Rc::new(|| Box::new(T::default())));
        class_data.serializer = Some(SerializerRef::Static(leaf_serializer::<T>()));
        self.register_type(class_data, None);
    }

    /// Installs a deprecated class record: on load, instances run the
    /// converter if one is given, otherwise they are dropped with a
    /// warning.
    pub fn class_deprecate(
        &mut self,
        name: &str,
        uuid: TypeUuid,
        converter: Option<super::class_data::VersionConverterFn>,
    ) {
        let mut class_data = ClassData::new(name, uuid, 0);
        class_data.version = super::class_data::VERSION_DEPRECATED;
        class_data.version_converter = converter;
        self.register_type(class_data, None);
    }

    pub(crate) fn attach_module(&mut self, module_id: u64) {
        self.attached_modules.insert(module_id);
    }

    pub(crate) fn detach_module(&mut self, module_id: u64) {
        self.attached_modules.remove(&module_id);
    }

    /// Number of module registries currently reflected into this context.
    #[must_use]
    pub fn attached_module_count(&self) -> usize {
        self.attached_modules.len()
    }

    // ---------------------------------------------------------------------------------------------
    // Lookup
    // ---------------------------------------------------------------------------------------------

    /// Maps a possibly-legacy id to the canonical id known to this graph.
    #[must_use]
    pub fn resolve_uuid(&self, uuid: TypeUuid) -> TypeUuid {
        if self.classes.contains_key(&uuid) {
            return uuid;
        }
        self.legacy_to_canonical.get(&uuid).copied().unwrap_or(uuid)
    }

    /// Finds the class record for an id, following legacy mappings.
    #[must_use]
    pub fn find_class_data(&self, uuid: TypeUuid) -> Option<&ClassData> {
        self.classes.get(&self.resolve_uuid(uuid))
    }

    /// Finds a registered id by type name.
    #[must_use]
    pub fn find_class_uuid(&self, name: &str) -> Option<TypeUuid> {
        self.name_to_uuid.get(&crc32(name)).copied()
    }

    /// Specializations sharing a legacy id.
    #[must_use]
    pub fn find_generic_specializations(&self, legacy_uuid: TypeUuid) -> &[TypeUuid] {
        self.generic_specializations
            .get(&legacy_uuid)
            .map_or(&[], Vec::as_slice)
    }

    /// Iterates every registered class.
    pub fn classes(&self) -> impl Iterator<Item = &ClassData> {
        self.classes.values()
    }

    /// Creates an instance of a registered type.
    #[must_use]
    pub fn create_any(&self, uuid: TypeUuid) -> Option<Box<dyn Any>> {
        self.any_creators
            .get(&self.resolve_uuid(uuid))
            .map(|factory| factory())
    }

    // ---------------------------------------------------------------------------------------------
    // Base-class walking
    // ---------------------------------------------------------------------------------------------

    /// Visits the reflected base classes of `uuid` transitively, until the
    /// callback returns false.
    pub fn enumerate_base(&self, uuid: TypeUuid, callback: &mut dyn FnMut(&ClassData) -> bool) {
        self.enumerate_base_inner(uuid, callback);
    }

    fn enumerate_base_inner(
        &self,
        uuid: TypeUuid,
        callback: &mut dyn FnMut(&ClassData) -> bool,
    ) -> bool {
        let Some(class_data) = self.find_class_data(uuid) else {
            return true;
        };
        for element in &class_data.elements {
            if !element.flags.contains(ElementFlags::BASE_CLASS) {
                continue;
            }
            if let Some(base) = self.find_class_data(element.type_uuid) {
                if !callback(base) {
                    return false;
                }
            }
            if !self.enumerate_base_inner(element.type_uuid, callback) {
                return false;
            }
        }
        true
    }

    /// Visits every registered class whose base chain contains
    /// `base_uuid`, until the callback returns false.
    pub fn enumerate_derived(
        &self,
        base_uuid: TypeUuid,
        callback: &mut dyn FnMut(&ClassData) -> bool,
    ) {
        for class_data in self.classes.values() {
            if class_data.type_uuid != base_uuid
                && self.can_downcast(class_data.type_uuid, base_uuid)
                && !callback(class_data)
            {
                break;
            }
        }
    }

    /// Returns whether `from` reaches `to` along reflected base chains.
    #[must_use]
    pub fn can_downcast(&self, from: TypeUuid, to: TypeUuid) -> bool {
        if self.resolve_uuid(from) == self.resolve_uuid(to) {
            return true;
        }
        let Some(class_data) = self.find_class_data(from) else {
            return false;
        };
        class_data
            .elements
            .iter()
            .filter(|e| e.flags.contains(ElementFlags::BASE_CLASS))
            .any(|e| self.can_downcast(e.type_uuid, to))
    }

    /// Projects `obj` (an instance of `from`) to its reflected base `to`.
    #[must_use]
    pub fn downcast<'a>(
        &self,
        obj: &'a dyn Any,
        from: TypeUuid,
        to: TypeUuid,
    ) -> Option<&'a dyn Any> {
        if self.resolve_uuid(from) == self.resolve_uuid(to) {
            return Some(obj);
        }
        let class_data = self.find_class_data(from)?;
        for element in &class_data.elements {
            if !element.flags.contains(ElementFlags::BASE_CLASS) {
                continue;
            }
            if let Some(base) = element.get(obj) {
                if let Some(found) = self.downcast(base, element.type_uuid, to) {
                    return Some(found);
                }
            }
        }
        None
    }

    // ---------------------------------------------------------------------------------------------
    // Enumeration
    // ---------------------------------------------------------------------------------------------

    /// Walks an instance depth-first.
    ///
    /// `begin` runs when a value is entered; returning false skips its
    /// subtree. `end` runs when the value is left; returning false cancels
    /// the remaining traversal. Returns whether the traversal ran to
    /// completion.
    pub fn enumerate_instance(
        &self,
        obj: &dyn Any,
        type_uuid: TypeUuid,
        begin: BeginElemFn<'_>,
        end: EndElemFn<'_>,
        access: AccessFlags,
        errors: &mut ErrorHandler,
    ) -> bool {
        self.enumerate_element(obj, type_uuid, None, begin, end, access, errors)
    }

    #[allow(clippy::too_many_arguments)]
    fn enumerate_element(
        &self,
        obj: &dyn Any,
        type_uuid: TypeUuid,
        element: Option<&ClassElement>,
        begin: BeginElemFn<'_>,
        end: EndElemFn<'_>,
        access: AccessFlags,
        errors: &mut ErrorHandler,
    ) -> bool {
        // Runtime-typed slot: traverse the stored value under a synthesized
        // pointer element carrying the runtime id
        if type_uuid == DynamicField::type_uuid() {
            let Some(field) = obj.downcast_ref::<DynamicField>() else {
                errors.report_error("value does not match its dynamic-field element");
                return true;
            };
            let Some(value) = field.value() else {
                // Empty slot: nothing to visit, not an error
                return true;
            };
            let name = element.map_or_else(|| Ustr::from("element"), |e| e.name);
            let synthesized = ClassElement::synthesized(
                name,
                field.value_uuid(),
                ElementFlags::POINTER | ElementFlags::DYNAMIC_FIELD,
            );
            return self.enumerate_element(
                value,
                field.value_uuid(),
                Some(&synthesized),
                begin,
                end,
                access,
                errors,
            );
        }

        let Some(class_data) = self.find_class_data(type_uuid) else {
            errors.report_error(&format!("unknown type {type_uuid} during enumeration"));
            return true;
        };

        errors.push(DbgStackEntry {
            uuid: class_data.type_uuid,
            class_name: class_data.name,
            element_name: element.map(|e| e.name),
        });

        if let Some(events) = &class_data.event_handler {
            events.on_read_begin(obj);
        }

        let mut keep_going = true;
        if begin(obj, class_data, element) {
            if let Some(container) = class_data.container() {
                let item_element = ClassElement::synthesized(
                    container.element_name(),
                    container.element_uuid(),
                    container.element_flags(),
                );
                let mut canceled = false;
                container.enumerate(obj, &mut |item| {
                    if !self.enumerate_element(
                        item,
                        item_element.type_uuid,
                        Some(&item_element),
                        begin,
                        end,
                        access,
                        errors,
                    ) {
                        canceled = true;
                        return false;
                    }
                    true
                });
                keep_going = !canceled;
            } else {
                for child_element in &class_data.elements {
                    let Some(child) = child_element.get(obj) else {
                        errors.report_error(&format!(
                            "failed to project element '{}'",
                            child_element.name,
                        ));
                        continue;
                    };
                    if !self.enumerate_element(
                        child,
                        child_element.type_uuid,
                        Some(child_element),
                        begin,
                        end,
                        access,
                        errors,
                    ) {
                        keep_going = false;
                        break;
                    }
                }
            }
        }

        if !end() {
            keep_going = false;
        }

        if let Some(events) = &class_data.event_handler {
            if !access.contains(AccessFlags::HOLD) {
                events.on_read_end(obj);
            }
        }

        errors.pop();
        keep_going
    }

    // ---------------------------------------------------------------------------------------------
    // Clone
    // ---------------------------------------------------------------------------------------------

    /// Clones `src` into a fresh factory-created instance.
    #[must_use]
    pub fn clone_object(&self, src: &dyn Any, type_uuid: TypeUuid) -> Option<Box<dyn Any>> {
        let mut errors = ErrorHandler::new();
        let class_data = self.find_class_data(type_uuid)?;
        let mut target = class_data.create_instance()?;
        self.clone_value(target.as_mut(), src, type_uuid, &mut errors);
        if errors.error_count() > 0 {
            log::warn!(
                "clone of '{}' completed with {} error(s)",
                class_data.name,
                errors.error_count(),
            );
        }
        Some(target)
    }

    /// Clones `src` over a live destination instance.
    pub fn clone_object_inplace(
        &self,
        dst: &mut dyn Any,
        src: &dyn Any,
        type_uuid: TypeUuid,
    ) -> bool {
        let mut errors = ErrorHandler::new();
        self.clone_value(dst, src, type_uuid, &mut errors);
        errors.error_count() == 0
    }

    pub(crate) fn clone_value(
        &self,
        dst: &mut dyn Any,
        src: &dyn Any,
        type_uuid: TypeUuid,
        errors: &mut ErrorHandler,
    ) {
        if type_uuid == DynamicField::type_uuid() {
            let Some(src_field) = src.downcast_ref::<DynamicField>() else {
                errors.report_error("clone source does not match its dynamic-field element");
                return;
            };
            let Some(dst_field) = dst.downcast_mut::<DynamicField>() else {
                errors.report_error("clone target does not match its dynamic-field element");
                return;
            };
            dst_field.clear();
            if let Some(value) = src_field.value() {
                let runtime_uuid = src_field.value_uuid();
                let Some(mut instance) = self.create_any(runtime_uuid) else {
                    errors.report_error(&format!(
                        "no factory for runtime type {runtime_uuid}; element skipped",
                    ));
                    return;
                };
                self.clone_value(instance.as_mut(), value, runtime_uuid, errors);
                dst_field.set_boxed(runtime_uuid, instance);
            }
            return;
        }

        let Some(class_data) = self.find_class_data(type_uuid) else {
            errors.report_error(&format!("unknown type {type_uuid} during clone"));
            return;
        };

        errors.push(DbgStackEntry {
            uuid: class_data.type_uuid,
            class_name: class_data.name,
            element_name: None,
        });

        if let Some(events) = &class_data.event_handler {
            events.on_write_begin(dst);
        }

        if let Some(serializer) = class_data.serializer() {
            if !serializer.clone_value(src, dst) {
                // Save-then-load through a scratch buffer
                let mut scratch = Vec::new();
                let result = serializer
                    .save(src, &mut scratch, ByteOrder::Little)
                    .and_then(|_| {
                        serializer.load(dst, &scratch, ByteOrder::Little, class_data.version)
                    });
                if let Err(e) = result {
                    errors.report_error(&format!("leaf clone failed: {e}"));
                }
            }
        } else if let Some(container) = class_data.container() {
            container.clear(dst);
            let element_uuid = container.element_uuid();
            let mut index = 0;
            container.enumerate(src, &mut |item| {
                match container.reserve_element(dst) {
                    Some(slot) => {
                        self.clone_value(slot, item, element_uuid, errors);
                        container.store_element(dst, index);
                    }
                    None => {
                        errors.report_error("failed to reserve container element; skipped");
                    }
                }
                index += 1;
                true
            });
        } else {
            for element in &class_data.elements {
                let Some(src_field) = element.get(src) else {
                    errors.report_error(&format!("failed to project element '{}'", element.name));
                    continue;
                };
                let Some(dst_field) = element.get_mut(dst) else {
                    errors.report_error(&format!(
                        "clone target does not match element '{}'",
                        element.name,
                    ));
                    continue;
                };
                self.clone_value(dst_field, src_field, element.type_uuid, errors);
            }
        }

        if let Some(events) = &class_data.event_handler {
            events.on_write_end(dst);
            events.on_post_clone(dst);
        }

        errors.pop();
    }

    // ---------------------------------------------------------------------------------------------
    // Comparison
    // ---------------------------------------------------------------------------------------------

    /// Structurally compares two instances of the same registered type.
    #[must_use]
    pub fn compare_values(&self, a: &dyn Any, b: &dyn Any, type_uuid: TypeUuid) -> bool {
        if type_uuid == DynamicField::type_uuid() {
            return match (
                a.downcast_ref::<DynamicField>(),
                b.downcast_ref::<DynamicField>(),
            ) {
                (Some(a), Some(b)) => {
                    a.value_uuid() == b.value_uuid()
                        && match (a.value(), b.value()) {
                            (Some(a_value), Some(b_value)) => {
                                self.compare_values(a_value, b_value, a.value_uuid())
                            }
                            (None, None) => true,
                            _ => false,
                        }
                }
                _ => false,
            };
        }

        let Some(class_data) = self.find_class_data(type_uuid) else {
            return false;
        };
        if let Some(serializer) = class_data.serializer() {
            return serializer.compare(a, b);
        }
        if let Some(container) = class_data.container() {
            let len = container.size(a);
            if len != container.size(b) {
                return false;
            }
            let element_uuid = container.element_uuid();
            return (0..len).all(|index| {
                match (
                    container.get_element_ref(a, index),
                    container.get_element_ref(b, index),
                ) {
                    (Some(a_item), Some(b_item)) => {
                        self.compare_values(a_item, b_item, element_uuid)
                    }
                    _ => false,
                }
            });
        }
        class_data
            .elements
            .iter()
            .all(|element| match (element.get(a), element.get(b)) {
                (Some(a_field), Some(b_field)) => {
                    self.compare_values(a_field, b_field, element.type_uuid)
                }
                _ => false,
            })
    }
}
