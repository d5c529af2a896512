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

//! Foundation layer for the velcro runtime.
//!
//! This crate provides the cross-module primitives every other velcro crate
//! builds on:
//!
//! - [`typeid`]: stable 128-bit type identity ([`TypeUuid`]) with template
//!   composition, and the [`TypeInfo`] contract reflected types implement.
//! - [`crc`]: CRC-32 name keys used for field and attribute lookup.
//! - [`memory`]: the pluggable allocator facade and its singleton storage
//!   policies.
//! - [`correctness`]: condition checking helpers shared across the
//!   workspace.
//!
//! The crate is deliberately small and dependency-light; higher-level
//! infrastructure (event bus, reflection) lives in `velcro-common`.

#![deny(unsafe_code)]

pub mod correctness;
pub mod crc;
pub mod memory;
pub mod typeid;

pub use crate::typeid::{IdTag, TypeInfo, TypeTraits, TypeUuid};
