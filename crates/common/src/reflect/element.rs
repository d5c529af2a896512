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

//! Serialized document trees.
//!
//! A [`DataElementNode`] is one node of a persistent document: a
//! [`DataElement`] record (name, type id, version, payload) plus ordered
//! children. Trees are built from live objects by driving the enumeration
//! machinery ([`DataElementNode::set_data`]) and hydrate live objects back
//! ([`DataElementNode::get_data`]); version upgrades and converters run on
//! the load path before hydration.
//!
//! Leaf payloads come in three categories: binary (little-endian), binary
//! big-endian (bytes reversed per numeric field, never stream-wide), and
//! UTF-8 text. The stream form of a leaf is a `u32` little-endian size tag
//! followed by the payload.

use std::{any::Any, cell::RefCell};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use ustr::Ustr;
use velcro_core::{TypeUuid, crc::crc32, typeid::TypeInfo};

use super::{
    class_data::ElementFlags,
    context::{AccessFlags, SerializeContext},
    dynamic::DynamicField,
    error::{DbgStackEntry, ErrorHandler},
    serializer::ByteOrder,
};

/// Payload encoding of one document leaf.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum DataCategory {
    Text,
    Binary,
    BinaryBigEndian,
}

impl DataCategory {
    /// Byte order of the binary categories; `None` for text.
    #[must_use]
    pub fn byte_order(self) -> Option<ByteOrder> {
        match self {
            Self::Text => None,
            Self::Binary => Some(ByteOrder::Little),
            Self::BinaryBigEndian => Some(ByteOrder::Big),
        }
    }

    fn to_tag(self) -> u8 {
        match self {
            Self::Text => 0,
            Self::Binary => 1,
            Self::BinaryBigEndian => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, StreamError> {
        match tag {
            0 => Ok(Self::Text),
            1 => Ok(Self::Binary),
            2 => Ok(Self::BinaryBigEndian),
            other => Err(StreamError::UnknownCategory(other)),
        }
    }
}

/// Decoding failure of a document stream.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("document stream truncated: needed {needed} bytes, had {remaining}")]
    Truncated { needed: usize, remaining: usize },
    #[error("unknown data category tag {0}")]
    UnknownCategory(u8),
    #[error("element name is not UTF-8")]
    InvalidName(#[from] std::str::Utf8Error),
    #[error("{0} trailing bytes after document stream")]
    TrailingBytes(usize),
}

/// One value-or-subtree record of a persistent document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataElement {
    pub name: Ustr,
    pub name_crc: u32,
    pub type_uuid: TypeUuid,
    pub version: u32,
    pub category: DataCategory,
    pub buffer: Vec<u8>,
}

impl DataElement {
    /// Creates an empty binary element.
    #[must_use]
    pub fn new(name: &str, type_uuid: TypeUuid) -> Self {
        Self {
            name: Ustr::from(name),
            name_crc: crc32(name),
            type_uuid,
            version: 0,
            category: DataCategory::Binary,
            buffer: Vec::new(),
        }
    }

    /// Renames the element, keeping the CRC key in sync.
    pub fn rename(&mut self, name: &str) {
        self.name = Ustr::from(name);
        self.name_crc = crc32(name);
    }

    /// The size-tagged stream form of the payload: a `u32` little-endian
    /// length followed by the payload bytes.
    #[must_use]
    pub fn stream_bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(4 + self.buffer.len());
        out.extend_from_slice(&u32::try_from(self.buffer.len()).unwrap_or(0).to_le_bytes());
        out.extend_from_slice(&self.buffer);
        Bytes::from(out)
    }
}

/// A document node: one element record plus ordered children.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataElementNode {
    pub element: DataElement,
    pub children: Vec<DataElementNode>,
}

impl DataElementNode {
    /// Creates an empty node.
    #[must_use]
    pub fn new(name: &str, type_uuid: TypeUuid) -> Self {
        Self {
            element: DataElement::new(name, type_uuid),
            children: Vec::new(),
        }
    }

    // ---------------------------------------------------------------------------------------------
    // Subelement management
    // ---------------------------------------------------------------------------------------------

    /// Appends an empty child and returns its index.
    pub fn add_element(&mut self, name: &str, type_uuid: TypeUuid) -> usize {
        self.children.push(Self::new(name, type_uuid));
        self.children.len() - 1
    }

    /// Resets the child at `index` to an empty node of the given identity.
    pub fn replace_element(&mut self, index: usize, name: &str, type_uuid: TypeUuid) -> bool {
        match self.children.get_mut(index) {
            Some(child) => {
                *child = Self::new(name, type_uuid);
                true
            }
            None => false,
        }
    }

    /// Removes the child at `index`.
    pub fn remove_element(&mut self, index: usize) -> bool {
        if index < self.children.len() {
            self.children.remove(index);
            true
        } else {
            false
        }
    }

    /// Finds a direct child by name CRC.
    #[must_use]
    pub fn find_element(&self, name_crc: u32) -> Option<usize> {
        self.children
            .iter()
            .position(|child| child.element.name_crc == name_crc)
    }

    /// Mutably borrows a direct child by name CRC.
    #[must_use]
    pub fn find_sub_element(&mut self, name_crc: u32) -> Option<&mut DataElementNode> {
        self.children
            .iter_mut()
            .find(|child| child.element.name_crc == name_crc)
    }

    // ---------------------------------------------------------------------------------------------
    // Typed access
    // ---------------------------------------------------------------------------------------------

    /// Reads the node as a `T`, running version upgrades first. The stored
    /// id must resolve to `T`'s id in the owning context.
    #[must_use]
    pub fn get_data<T: TypeInfo + Default + Any>(
        &mut self,
        ctx: &SerializeContext,
        errors: &mut ErrorHandler,
    ) -> Option<T> {
        let stored = ctx.resolve_uuid(self.element.type_uuid);
        let target = ctx.resolve_uuid(T::type_uuid());
        if stored != target {
            errors.report_error(&format!(
                "node stores type {stored} but {} ({target}) was requested",
                T::type_name(),
            ));
            return None;
        }
        let mut value = T::default();
        self.get_data_hierarchy(ctx, &mut value, errors)
            .then_some(value)
    }

    /// Rebuilds the node (and its subtree) from `value`, discarding any
    /// previous children. The node keeps its name.
    pub fn set_data<T: TypeInfo + Any>(
        &mut self,
        ctx: &SerializeContext,
        value: &T,
        errors: &mut ErrorHandler,
    ) -> bool {
        self.set_data_hierarchy(ctx, value, T::type_uuid(), errors)
    }

    /// Mutates the node to represent type `T`: children and payload are
    /// discarded and the version resets to `T`'s current class version.
    pub fn convert<T: TypeInfo + Any>(&mut self, ctx: &SerializeContext) {
        self.children.clear();
        self.element.buffer.clear();
        self.element.category = DataCategory::Binary;
        self.element.type_uuid = T::type_uuid();
        self.element.version = ctx
            .find_class_data(T::type_uuid())
            .map_or(0, |class_data| class_data.version);
    }

    /// As [`DataElementNode::convert`], also renaming the node.
    pub fn convert_named<T: TypeInfo + Any>(&mut self, ctx: &SerializeContext, name: &str) {
        self.convert::<T>(ctx);
        self.element.rename(name);
    }

    // ---------------------------------------------------------------------------------------------
    // Hydration (load path)
    // ---------------------------------------------------------------------------------------------

    /// Populates a live object from this subtree.
    ///
    /// Upgrades and version converters run first when the stored version is
    /// older than the registered one. Data errors are reported through
    /// `errors` and skip the offending element; the rest of the subtree
    /// still loads.
    pub fn get_data_hierarchy(
        &mut self,
        ctx: &SerializeContext,
        obj: &mut dyn Any,
        errors: &mut ErrorHandler,
    ) -> bool {
        let uuid = ctx.resolve_uuid(self.element.type_uuid);
        let Some(class_data) = ctx.find_class_data(uuid) else {
            errors.report_error(&format!("unknown type {uuid} during load"));
            return false;
        };

        if class_data.is_deprecated() {
            match &class_data.version_converter {
                Some(convert) => {
                    let converted = convert(ctx, self, errors);
                    if !converted || ctx.resolve_uuid(self.element.type_uuid) == uuid {
                        errors.report_warning(&format!(
                            "instance of deprecated class '{}' dropped",
                            class_data.name,
                        ));
                        return false;
                    }
                    return self.get_data_hierarchy(ctx, obj, errors);
                }
                None => {
                    errors.report_warning(&format!(
                        "instance of deprecated class '{}' dropped",
                        class_data.name,
                    ));
                    return false;
                }
            }
        }

        if self.element.version < class_data.version {
            if !class_data.upgrades.is_empty() {
                class_data
                    .upgrades
                    .apply(ctx, self, self.element.version, errors);
            }
            if let Some(convert) = &class_data.version_converter {
                convert(ctx, self, errors);
            }
            self.element.version = class_data.version;
        }

        errors.push(DbgStackEntry {
            uuid,
            class_name: class_data.name,
            element_name: Some(self.element.name),
        });

        let ok = if let Some(serializer) = class_data.serializer() {
            let result = match self.element.category {
                DataCategory::Text => match std::str::from_utf8(&self.element.buffer) {
                    Ok(text) => {
                        let mut scratch = Vec::new();
                        serializer.text_to_data(text, &mut scratch).and_then(|_| {
                            serializer.load(obj, &scratch, ByteOrder::Little, self.element.version)
                        })
                    }
                    Err(e) => Err(anyhow::anyhow!("text payload is not UTF-8: {e}")),
                },
                DataCategory::Binary => serializer.load(
                    obj,
                    &self.element.buffer,
                    ByteOrder::Little,
                    self.element.version,
                ),
                DataCategory::BinaryBigEndian => serializer.load(
                    obj,
                    &self.element.buffer,
                    ByteOrder::Big,
                    self.element.version,
                ),
            };
            match result {
                Ok(()) => true,
                Err(e) => {
                    errors.report_error(&format!("failed to load leaf: {e}"));
                    false
                }
            }
        } else if let Some(container) = class_data.container() {
            container.clear(obj);
            let element_uuid = container.element_uuid();
            let index_addressable = container.is_index_addressable();
            for (index, child) in self.children.iter_mut().enumerate() {
                let child_uuid = ctx.resolve_uuid(child.element.type_uuid);
                if child_uuid != element_uuid
                    && element_uuid != DynamicField::type_uuid()
                    && !ctx.can_downcast(child_uuid, element_uuid)
                {
                    errors.report_error(&format!(
                        "sub-element type {child_uuid} does not match container element \
                         {element_uuid}; skipped",
                    ));
                    continue;
                }
                let slot = if index_addressable && index < container.size(&*obj) {
                    container.get_element_by_index(obj, index)
                } else {
                    container.reserve_element(obj)
                };
                match slot {
                    Some(slot) => {
                        child.get_data_hierarchy(ctx, slot, errors);
                        container.store_element(obj, index);
                    }
                    None => {
                        errors.report_error("failed to reserve container element; skipped");
                    }
                }
            }
            true
        } else {
            let mut seen = Vec::with_capacity(self.children.len());
            for child in &mut self.children {
                let Some(element) = class_data.find_element(child.element.name_crc) else {
                    errors.report_warning(&format!(
                        "unknown field '{}' skipped",
                        child.element.name,
                    ));
                    continue;
                };
                seen.push(element.name_crc);
                if element.flags.contains(ElementFlags::DYNAMIC_FIELD) {
                    let Some(field_obj) = element.get_mut(obj) else {
                        errors.report_error(&format!(
                            "object does not match element '{}'",
                            element.name,
                        ));
                        continue;
                    };
                    let Some(field) = field_obj.downcast_mut::<DynamicField>() else {
                        errors.report_error(&format!(
                            "element '{}' is not a dynamic field",
                            element.name,
                        ));
                        continue;
                    };
                    let runtime_uuid = ctx.resolve_uuid(child.element.type_uuid);
                    match ctx.create_any(runtime_uuid) {
                        Some(mut instance) => {
                            child.get_data_hierarchy(ctx, instance.as_mut(), errors);
                            field.set_boxed(runtime_uuid, instance);
                        }
                        None => errors.report_error(&format!(
                            "no factory for runtime type {runtime_uuid}; element skipped",
                        )),
                    }
                    continue;
                }
                match element.get_mut(obj) {
                    Some(field) => {
                        child.get_data_hierarchy(ctx, field, errors);
                    }
                    None => errors.report_error(&format!(
                        "object does not match element '{}'",
                        element.name,
                    )),
                }
            }
            // Reflected fields absent from the document reset to their type
            // default; NO_DEFAULT_VALUE keeps the live value and UI-only
            // fields are never stored to begin with
            for element in &class_data.elements {
                if seen.contains(&element.name_crc)
                    || element
                        .flags
                        .intersects(ElementFlags::NO_DEFAULT_VALUE | ElementFlags::UI_ELEMENT)
                {
                    continue;
                }
                let Some(fresh) = ctx.create_any(element.type_uuid) else {
                    continue;
                };
                if let Some(field) = element.get_mut(obj) {
                    ctx.clone_value(field, fresh.as_ref(), element.type_uuid, errors);
                }
            }
            true
        };

        errors.pop();
        ok
    }

    // ---------------------------------------------------------------------------------------------
    // Tree building (save path)
    // ---------------------------------------------------------------------------------------------

    /// Rebuilds the subtree from a live object by driving the enumeration
    /// machinery and saving each leaf to its payload buffer.
    pub fn set_data_hierarchy(
        &mut self,
        ctx: &SerializeContext,
        obj: &dyn Any,
        type_uuid: TypeUuid,
        errors: &mut ErrorHandler,
    ) -> bool {
        match Self::build_tree(ctx, self.element.name, obj, type_uuid, errors) {
            Some(node) => {
                *self = node;
                true
            }
            None => {
                errors.report_error(&format!("failed to build document node for {type_uuid}"));
                false
            }
        }
    }

    fn build_tree(
        ctx: &SerializeContext,
        root_name: Ustr,
        obj: &dyn Any,
        type_uuid: TypeUuid,
        errors: &mut ErrorHandler,
    ) -> Option<DataElementNode> {
        // Two callbacks share the build stack; entries remember whether the
        // do-save hook kept the subtree
        let stack: RefCell<Vec<(DataElementNode, bool)>> = RefCell::new(Vec::new());
        let finished: RefCell<Option<DataElementNode>> = RefCell::new(None);

        ctx.enumerate_instance(
            obj,
            type_uuid,
            &mut |obj, class_data, element| {
                let name = element.map_or(root_name, |e| e.name);
                let mut node = DataElementNode::new(name.as_str(), class_data.type_uuid);
                node.element.version = class_data.version;
                // Editor-only fields never land in documents
                let ui_only = element.is_some_and(|e| e.flags.contains(ElementFlags::UI_ELEMENT));
                let keep = !ui_only && class_data.should_save(obj);
                if keep {
                    if let Some(serializer) = class_data.serializer() {
                        if serializer
                            .save(obj, &mut node.element.buffer, ByteOrder::Little)
                            .is_err()
                        {
                            // The traversal carries its own error reporting;
                            // an empty payload marks the failure here
                            node.element.buffer.clear();
                        }
                    }
                }
                stack.borrow_mut().push((node, keep));
                keep
            },
            &mut || {
                let (node, keep) = stack
                    .borrow_mut()
                    .pop()
                    .expect("unbalanced document traversal");
                if keep {
                    let mut stack = stack.borrow_mut();
                    match stack.last_mut() {
                        Some((parent, _)) => parent.children.push(node),
                        None => *finished.borrow_mut() = Some(node),
                    }
                }
                true
            },
            AccessFlags::FOR_READ,
            errors,
        );

        finished.into_inner()
    }

    // ---------------------------------------------------------------------------------------------
    // Stream form
    // ---------------------------------------------------------------------------------------------

    /// Serializes the node tree to its binary stream form.
    #[must_use]
    pub fn to_stream(&self) -> Bytes {
        let mut out = Vec::new();
        self.write_stream(&mut out);
        Bytes::from(out)
    }

    /// Appends the node tree's binary stream form to `out`.
    pub fn write_stream(&self, out: &mut Vec<u8>) {
        let name = self.element.name.as_str().as_bytes();
        out.extend_from_slice(&u16::try_from(name.len()).unwrap_or(0).to_le_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(&self.element.name_crc.to_le_bytes());
        out.extend_from_slice(self.element.type_uuid.as_bytes());
        out.extend_from_slice(&self.element.version.to_le_bytes());
        out.push(self.element.category.to_tag());
        out.extend_from_slice(
            &u32::try_from(self.element.buffer.len())
                .unwrap_or(0)
                .to_le_bytes(),
        );
        out.extend_from_slice(&self.element.buffer);
        out.extend_from_slice(&u32::try_from(self.children.len()).unwrap_or(0).to_le_bytes());
        for child in &self.children {
            child.write_stream(out);
        }
    }

    /// Reads a node tree back from its binary stream form.
    ///
    /// # Errors
    ///
    /// Returns an error on a truncated or malformed stream.
    pub fn read_stream(data: &[u8]) -> Result<Self, StreamError> {
        let mut cursor = data;
        let node = Self::read_node(&mut cursor)?;
        if !cursor.is_empty() {
            return Err(StreamError::TrailingBytes(cursor.len()));
        }
        Ok(node)
    }

    fn read_node(cursor: &mut &[u8]) -> Result<Self, StreamError> {
        let name_len = usize::from(u16::from_le_bytes(take::<2>(cursor)?));
        let name_bytes = take_slice(cursor, name_len)?;
        let name = std::str::from_utf8(name_bytes)?;
        let name_crc = u32::from_le_bytes(take::<4>(cursor)?);
        let type_uuid = TypeUuid::from_bytes(take::<16>(cursor)?);
        let version = u32::from_le_bytes(take::<4>(cursor)?);
        let category = DataCategory::from_tag(take::<1>(cursor)?[0])?;
        let payload_len = u32::from_le_bytes(take::<4>(cursor)?) as usize;
        let buffer = take_slice(cursor, payload_len)?.to_vec();
        let child_count = u32::from_le_bytes(take::<4>(cursor)?) as usize;

        let mut node = Self::new(name, type_uuid);
        node.element.name_crc = name_crc;
        node.element.version = version;
        node.element.category = category;
        node.element.buffer = buffer;
        node.children.reserve(child_count.min(1024));
        for _ in 0..child_count {
            node.children.push(Self::read_node(cursor)?);
        }
        Ok(node)
    }
}

fn take<const N: usize>(cursor: &mut &[u8]) -> Result<[u8; N], StreamError> {
    let bytes = take_slice(cursor, N)?;
    Ok(bytes.try_into().expect("slice length checked"))
}

fn take_slice<'a>(cursor: &mut &'a [u8], len: usize) -> Result<&'a [u8], StreamError> {
    if cursor.len() < len {
        return Err(StreamError::Truncated {
            needed: len,
            remaining: cursor.len(),
        });
    }
    let (head, tail) = cursor.split_at(len);
    *cursor = tail;
    Ok(head)
}
