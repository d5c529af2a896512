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

//! Fluent class registration.
//!
//! `ctx.class::<T>()` opens a builder; chained calls describe the type and
//! the registration lands in the context when the builder drops:
//!
//! ```ignore
//! ctx.class::<Transform>()
//!     .version(2)
//!     .field("position", |t: &Transform| &t.position, |t| &mut t.position)
//!     .field("scale", |t: &Transform| &t.scale, |t| &mut t.scale);
//! ```
//!
//! A class either has fields or a custom leaf serializer, never both; the
//! builder enforces the exclusion when it finalizes.

use std::{any::Any, rc::Rc};

use velcro_core::{
    crc::crc32,
    typeid::{TypeInfo, TypeTraits},
};

use super::{
    class_data::{
        AttributeValue, ClassData, ClassElement, ElementFlags, FieldAccess, SerializeEvents,
        SerializerRef, VERSION_DEPRECATED, VersionConverterFn,
    },
    container::DataContainer,
    context::SerializeContext,
    dynamic::DynamicField,
    error::ErrorHandler,
    serializer::DataSerializer,
    upgrade::{FieldUpgrade, NodeConvertFn},
};

impl SerializeContext {
    /// Opens a registration builder for `T`. The class registers when the
    /// builder goes out of scope.
    pub fn class<T: TypeInfo + Default + Any>(&mut self) -> ClassBuilder<'_, T> {
        let name = T::type_name();
        let mut class_data = ClassData::new(&name, T::type_uuid(), std::mem::size_of::<T>());
        class_data.factory = Some(Rc::new(|| Box::new(T::default())));
        ClassBuilder {
            context: self,
            class_data: Some(class_data),
            _marker: std::marker::PhantomData::<T>,
        }
    }
}

/// In-progress registration of class `T`.
pub struct ClassBuilder<'a, T: TypeInfo + Default + Any> {
    context: &'a mut SerializeContext,
    class_data: Option<ClassData>,
    _marker: std::marker::PhantomData<T>,
}

impl<T: TypeInfo + Default + Any> ClassBuilder<'_, T> {
    fn data(&mut self) -> &mut ClassData {
        self.class_data
            .as_mut()
            .expect("ClassBuilder already finalized")
    }

    /// Sets the class version. The deprecation sentinel is reserved for
    /// [`SerializeContext::class_deprecate`].
    pub fn version(mut self, version: u32) -> Self {
        if version == VERSION_DEPRECATED {
            log::error!(
                "ClassBuilder<{}>: the deprecated sentinel cannot be set as a version",
                T::type_name(),
            );
            return self;
        }
        self.data().version = version;
        self
    }

    /// Sets the class version with a converter run against nodes stored at
    /// older versions.
    pub fn version_with_converter(
        mut self,
        version: u32,
        converter: impl Fn(&SerializeContext, &mut super::element::DataElementNode, &mut ErrorHandler) -> bool
        + 'static,
    ) -> Self {
        let converter: VersionConverterFn = Rc::new(converter);
        {
            let data = self.data();
            data.version_converter = Some(converter);
        }
        self.version(version)
    }

    /// Reflects one field through its projection pair.
    pub fn field<F: TypeInfo + Any>(
        mut self,
        name: &str,
        get: fn(&T) -> &F,
        get_mut: fn(&mut T) -> &mut F,
    ) -> Self {
        if self.data().serializer.is_some() {
            log::error!(
                "ClassBuilder<{}>: field '{name}' ignored, the class has a custom serializer",
                T::type_name(),
            );
            return self;
        }
        let mut flags = ElementFlags::empty();
        if F::type_traits().contains(TypeTraits::IS_POINTER) {
            flags |= ElementFlags::POINTER;
        }
        if F::type_uuid() == DynamicField::type_uuid() {
            flags |= ElementFlags::POINTER | ElementFlags::DYNAMIC_FIELD;
        }
        let element = ClassElement::new(
            name,
            F::type_uuid(),
            std::mem::size_of::<F>(),
            flags,
            FieldAccess::new::<T, F>(get, get_mut),
        );
        self.data().elements.push(element);
        self
    }

    /// Reflects an embedded reflected base class. Base elements precede
    /// fields in the element order.
    pub fn base<B: TypeInfo + Any>(
        mut self,
        get: fn(&T) -> &B,
        get_mut: fn(&mut T) -> &mut B,
    ) -> Self {
        let name = B::type_name().into_owned();
        let element = ClassElement::new(
            &name,
            B::type_uuid(),
            std::mem::size_of::<B>(),
            ElementFlags::BASE_CLASS,
            FieldAccess::new::<T, B>(get, get_mut),
        );
        let data = self.data();
        let insert_at = data
            .elements
            .iter()
            .position(|e| !e.flags.contains(ElementFlags::BASE_CLASS))
            .unwrap_or(data.elements.len());
        data.elements.insert(insert_at, element);
        self
    }

    /// Installs an owned leaf serializer; mutually exclusive with fields.
    pub fn serializer_owned(mut self, serializer: Box<dyn DataSerializer>) -> Self {
        self.set_serializer(SerializerRef::Owned(serializer));
        self
    }

    /// Installs a borrowed static leaf serializer; mutually exclusive with
    /// fields.
    pub fn serializer_static(mut self, serializer: &'static dyn DataSerializer) -> Self {
        self.set_serializer(SerializerRef::Static(serializer));
        self
    }

    fn set_serializer(&mut self, serializer: SerializerRef) {
        if !self.data().elements.is_empty() {
            log::error!(
                "ClassBuilder<{}>: serializer ignored, the class already reflects fields",
                T::type_name(),
            );
            return;
        }
        self.data().serializer = Some(serializer);
    }

    /// Installs the serialize-event hooks.
    pub fn event_handler(mut self, handler: Rc<dyn SerializeEvents>) -> Self {
        self.data().event_handler = Some(handler);
        self
    }

    /// Installs a container adapter.
    pub fn data_container(mut self, container: Rc<dyn DataContainer>) -> Self {
        self.data().container = Some(container);
        self
    }

    /// Installs the persistent-id hook.
    pub fn persistent_id(mut self, hook: fn(&dyn Any) -> u64) -> Self {
        self.data().persistent_id = Some(hook);
        self
    }

    /// Installs the do-save filter hook.
    pub fn serializer_do_save(mut self, hook: fn(&dyn Any) -> bool) -> Self {
        self.data().do_save = Some(hook);
        self
    }

    /// Attaches a class-level attribute.
    pub fn attribute(mut self, name: &str, value: impl Any) -> Self {
        let value: AttributeValue = Rc::new(value);
        self.data().attributes.push((crc32(name), value));
        self
    }

    /// Attaches an attribute to the most recently reflected field.
    pub fn field_attribute(mut self, name: &str, value: impl Any) -> Self {
        let id = crc32(name);
        let value: AttributeValue = Rc::new(value);
        match self.data().elements.last_mut() {
            Some(element) => element.attributes.push((id, value)),
            None => log::error!(
                "ClassBuilder<{}>: field attribute '{name}' has no preceding field",
                T::type_name(),
            ),
        }
        self
    }

    /// Adds flags to the most recently reflected field.
    ///
    /// [`ElementFlags::NO_DEFAULT_VALUE`] keeps the live value of a field
    /// absent from a loaded document; [`ElementFlags::UI_ELEMENT`] marks a
    /// field as editor-only, excluded from documents entirely.
    pub fn field_flags(mut self, flags: ElementFlags) -> Self {
        match self.data().elements.last_mut() {
            Some(element) => element.flags |= flags,
            None => log::error!(
                "ClassBuilder<{}>: field flags have no preceding field",
                T::type_name(),
            ),
        }
        self
    }

    /// Registers a rename step: documents stored in `[from_version,
    /// to_version)` have the field `old_name` renamed to `new_name` on
    /// load.
    pub fn name_change_upgrade(
        mut self,
        from_version: u32,
        to_version: u32,
        old_name: &str,
        new_name: &str,
    ) -> Self {
        self.data()
            .upgrades
            .add(FieldUpgrade::rename(old_name, new_name, from_version, to_version));
        self
    }

    /// Registers a type-change step: on load, the field is re-read as
    /// `From`, converted, and stored back as `To`. The field is addressed
    /// by its post-rename name at the same step.
    pub fn type_change_upgrade<From, To>(
        mut self,
        field: &str,
        from_version: u32,
        to_version: u32,
        convert: impl Fn(From) -> To + 'static,
    ) -> Self
    where
        From: TypeInfo + Default + Any,
        To: TypeInfo + Any,
    {
        let convert_fn: NodeConvertFn = Rc::new(move |ctx, node, errors| {
            let Some(value) = node.get_data::<From>(ctx, errors) else {
                errors.report_error(&format!(
                    "type upgrade could not read '{}' as {}",
                    node.element.name,
                    From::type_name(),
                ));
                return false;
            };
            let converted = convert(value);
            node.convert::<To>(ctx);
            node.set_data(ctx, &converted, errors)
        });
        self.data().upgrades.add(FieldUpgrade::type_change(
            field,
            from_version,
            to_version,
            From::type_uuid(),
            To::type_uuid(),
            convert_fn,
        ));
        self
    }
}

impl<T: TypeInfo + Default + Any> Drop for ClassBuilder<'_, T> {
    fn drop(&mut self) {
        let Some(class_data) = self.class_data.take() else {
            return;
        };
        if class_data.serializer.is_some() && !class_data.elements.is_empty() {
            log::error!(
                "ClassBuilder<{}>: a class cannot have both a custom serializer and fields; \
                 registration dropped",
                T::type_name(),
            );
            debug_assert!(false, "serializer and field list are mutually exclusive");
            return;
        }
        self.context.register_type(class_data, None);
    }
}
