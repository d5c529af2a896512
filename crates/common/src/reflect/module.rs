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

//! Per-module generic class registries.
//!
//! Each code module owns a [`ModuleClassRegistry`] holding the generic
//! specializations it instantiated. Registering the module into a
//! [`SerializeContext`] injects every specialization; unregistering removes
//! them again, which is what keeps the reflection graph consistent when a
//! module is torn down while contexts remain alive. Contexts created after
//! the registry simply register late.
//!
//! In a single-binary target the registry collapses to one process-wide
//! instance, but the register/unregister lifecycle is kept explicit: a
//! registry dropped while still reflected into live contexts is a
//! programming error and is loudly logged.

use std::sync::atomic::{AtomicU64, Ordering};

use ahash::{AHashMap, AHashSet};
use velcro_core::TypeUuid;

use super::context::{GenericClassInfo, SerializeContext};

static NEXT_MODULE_ID: AtomicU64 = AtomicU64::new(1);

/// Holds the generic class infos a module instantiated and tracks the
/// contexts they are reflected into.
pub struct ModuleClassRegistry {
    id: u64,
    infos: AHashMap<TypeUuid, GenericClassInfo>,
    registered_contexts: AHashSet<u64>,
}

impl Default for ModuleClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleClassRegistry {
    /// Creates a new empty [`ModuleClassRegistry`] instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_MODULE_ID.fetch_add(1, Ordering::Relaxed),
            infos: AHashMap::new(),
            registered_contexts: AHashSet::new(),
        }
    }

    /// Unique id of this registry.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Inserts a generic class info, keyed by its specialized id.
    pub fn add_generic_class_info(&mut self, info: GenericClassInfo) {
        if self.infos.contains_key(&info.specialized_uuid) {
            log::warn!(
                "ModuleClassRegistry: replacing generic class info {}",
                info.specialized_uuid,
            );
        }
        if !self.registered_contexts.is_empty() {
            // Late additions would leave already-registered contexts
            // out of sync
            log::warn!(
                "ModuleClassRegistry: info {} added after context registration",
                info.specialized_uuid,
            );
        }
        self.infos.insert(info.specialized_uuid, info);
    }

    /// Finds a generic class info by specialized or legacy id.
    #[must_use]
    pub fn find_generic_class_info(&self, uuid: TypeUuid) -> Option<&GenericClassInfo> {
        self.infos
            .get(&uuid)
            .or_else(|| self.infos.values().find(|info| info.legacy_uuid == uuid))
    }

    /// Number of stored infos.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Returns whether the registry holds no infos.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Reflects every stored info into `ctx` and records the back-link.
    pub fn register_serialize_context(&mut self, ctx: &mut SerializeContext) {
        if !self.registered_contexts.insert(ctx.id()) {
            log::warn!(
                "ModuleClassRegistry: context {} already registered",
                ctx.id(),
            );
            return;
        }
        for info in self.infos.values() {
            ctx.register_generic_info(info);
        }
        ctx.attach_module(self.id);
    }

    /// Removes every stored info from `ctx` and breaks the back-link.
    pub fn unregister_serialize_context(&mut self, ctx: &mut SerializeContext) {
        if !self.registered_contexts.remove(&ctx.id()) {
            return;
        }
        for info in self.infos.values() {
            ctx.unregister_type(info.specialized_uuid);
        }
        ctx.detach_module(self.id);
    }

    /// Number of contexts this registry is currently reflected into.
    #[must_use]
    pub fn registered_context_count(&self) -> usize {
        self.registered_contexts.len()
    }
}

impl Drop for ModuleClassRegistry {
    fn drop(&mut self) {
        if !self.registered_contexts.is_empty() {
            log::error!(
                "ModuleClassRegistry {} dropped while reflected into {} context(s); \
                 unregister contexts before module teardown",
                self.id,
                self.registered_contexts.len(),
            );
            debug_assert!(
                false,
                "module registry dropped with live context registrations"
            );
        }
    }
}
