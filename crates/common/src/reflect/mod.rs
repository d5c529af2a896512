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

//! Reflection and serialization.
//!
//! Types register into a [`SerializeContext`] through the fluent builder
//! (`ctx.class::<T>()`), describing fields via safe projection pairs, leaf
//! serializers, container adapters and version upgrades. The context then
//! drives the generic operations: depth-first enumeration, deep cloning,
//! structural comparison, downcasting along reflected base chains, and the
//! document tree ([`DataElementNode`]) used for persistence.

pub mod builder;
pub mod class_data;
pub mod container;
pub mod context;
pub mod dynamic;
pub mod element;
pub mod error;
pub mod module;
pub mod serializer;
pub mod upgrade;

pub use self::{
    builder::ClassBuilder,
    class_data::{
        AttributeId, AttributeValue, ClassData, ClassElement, ElementFlags, FactoryFn,
        SerializeEvents, SerializerRef, VERSION_DEPRECATED, VersionConverterFn,
    },
    container::{BoxContainer, DataContainer, OptionContainer, VecContainer},
    context::{AccessFlags, GenericClassInfo, SerializeContext},
    dynamic::DynamicField,
    element::{DataCategory, DataElement, DataElementNode, StreamError},
    error::{DbgStackEntry, ErrorHandler},
    module::ModuleClassRegistry,
    serializer::{ByteOrder, DataSerializer, LeafSerializer, LeafValue, leaf_serializer},
    upgrade::{FieldUpgrade, UpgradeHandler, UpgradeKind},
};
