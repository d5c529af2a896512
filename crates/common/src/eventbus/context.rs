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

//! Per-bus context state.
//!
//! One [`BusContext`] exists per bus type per thread. It owns the address
//! map, the router list, the deferred-delivery queue, and the dispatch
//! callstack. Dispatch never holds the context borrow while handler code
//! runs: handler lists are snapshotted out first, and each entry carries a
//! shared liveness flag so a handler disconnected mid-dispatch is skipped by
//! the in-flight snapshot.

use std::{any::TypeId, cell::Cell, cmp::Ordering, collections::VecDeque, rc::Rc};

use ahash::AHashMap;
use indexmap::IndexMap;
use smallvec::SmallVec;

use super::{
    router::{EventRouter, RouterEntry},
    traits::{AddressPolicy, EventBusTraits, HandlerPolicy},
};

/// Identity of a connected handler: the thin pointer of its `Rc` allocation.
pub(super) type HandlerKey = usize;

pub(super) fn handler_key<I: ?Sized>(handler: &Rc<I>) -> HandlerKey {
    Rc::as_ptr(handler).cast::<()>() as usize
}

/// A connected handler plus its shared liveness flag.
pub(super) struct HandlerEntry<E: EventBusTraits> {
    pub handler: Rc<E::Interface>,
    pub key: HandlerKey,
    pub active: Rc<Cell<bool>>,
}

impl<E: EventBusTraits> Clone for HandlerEntry<E> {
    fn clone(&self) -> Self {
        Self {
            handler: Rc::clone(&self.handler),
            key: self.key,
            active: Rc::clone(&self.active),
        }
    }
}

pub(super) struct Address<E: EventBusTraits> {
    pub handlers: Vec<HandlerEntry<E>>,
}

impl<E: EventBusTraits> Address<E> {
    fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

/// One frame of the per-thread dispatch callstack.
pub(super) struct CallstackFrame<E: EventBusTraits> {
    pub bus_id: Option<E::BusId>,
    pub reverse: bool,
    pub queued: bool,
}

/// A deferred call captured by the queueing API.
pub(super) enum QueuedCall<E: EventBusTraits> {
    Broadcast {
        call: Box<dyn Fn(&E::Interface)>,
        reverse: bool,
    },
    Event {
        id: E::BusId,
        call: Box<dyn Fn(&E::Interface)>,
        reverse: bool,
    },
    Function(Box<dyn FnOnce()>),
}

pub(super) struct BusContext<E: EventBusTraits> {
    pub addresses: IndexMap<E::BusId, Address<E>>,
    /// Ids each handler is currently connected at.
    pub connections: AHashMap<HandlerKey, SmallVec<[E::BusId; 1]>>,
    pub routers: Vec<RouterEntry<E>>,
    pub queue: VecDeque<QueuedCall<E>>,
    pub queueing_active: bool,
    pub dispatch_depth: usize,
    pub callstack: Vec<CallstackFrame<E>>,
}

impl<E: EventBusTraits> BusContext<E> {
    pub fn new() -> Self {
        Self::validate_traits();
        Self {
            addresses: IndexMap::new(),
            connections: AHashMap::new(),
            routers: Vec::new(),
            queue: VecDeque::new(),
            queueing_active: E::ENABLE_QUEUE && E::QUEUEING_ACTIVE_BY_DEFAULT,
            dispatch_depth: 0,
            callstack: Vec::new(),
        }
    }

    /// Coherence checks over the traits configuration, the runtime port of
    /// the compile-time assertions the traits family used to carry.
    fn validate_traits() {
        let id_is_unit = TypeId::of::<E::BusId>() == TypeId::of::<()>();
        match E::ADDRESS_POLICY {
            AddressPolicy::Single => {
                if !id_is_unit {
                    log::warn!(
                        "Bus {}: Single address policy with a non-unit BusId; the id is unused",
                        std::any::type_name::<E>(),
                    );
                }
            }
            AddressPolicy::ById | AddressPolicy::ByIdAndOrdered => {
                if id_is_unit {
                    log::error!(
                        "Bus {}: ById address policy requires a non-unit BusId",
                        std::any::type_name::<E>(),
                    );
                    debug_assert!(false, "ById address policy requires a non-unit BusId");
                }
            }
        }
    }

    /// Connects `handler` at `id`, enforcing the handler-lifecycle and
    /// address-level policies. Returns whether a new connection was made.
    pub fn connect(&mut self, handler: Rc<E::Interface>, id: E::BusId) -> bool {
        let key = handler_key(&handler);

        if !E::MULTI_CONNECT {
            if let Some(ids) = self.connections.get(&key) {
                if ids.contains(&id) {
                    log::debug!(
                        "Bus {}: handler already connected at this id",
                        std::any::type_name::<E>(),
                    );
                    return false;
                }
                log::error!(
                    "Bus {}: handler connected at a different id; disconnecting first",
                    std::any::type_name::<E>(),
                );
                debug_assert!(false, "handler connected at a different id");
                self.remove_handler(key, None);
            }
        }

        let address = self
            .addresses
            .entry(id)
            .or_insert_with(Address::<E>::new);

        match E::HANDLER_POLICY {
            HandlerPolicy::Single => {
                if !address.handlers.is_empty() {
                    log::warn!(
                        "Bus {}: single-handler address already occupied; connect refused",
                        std::any::type_name::<E>(),
                    );
                    return false;
                }
            }
            HandlerPolicy::Multiple | HandlerPolicy::MultipleAndOrdered => {}
        }

        let entry = HandlerEntry {
            handler,
            key,
            active: Rc::new(Cell::new(true)),
        };

        match E::HANDLER_POLICY {
            HandlerPolicy::MultipleAndOrdered => {
                let position = address.handlers.iter().position(|existing| {
                    E::compare_handlers(&entry.handler, &existing.handler) == Ordering::Less
                });
                match position {
                    Some(index) => address.handlers.insert(index, entry),
                    None => address.handlers.push(entry),
                }
            }
            _ => address.handlers.push(entry),
        }

        self.connections.entry(key).or_default().push(id);
        true
    }

    /// Marks the handler's entries inactive so an in-flight dispatch
    /// snapshot stops delivering to it, and returns the affected ids.
    /// Entries stay in the container until [`BusContext::remove_handler`].
    pub fn deactivate_handler(&mut self, key: HandlerKey, id: Option<E::BusId>) -> SmallVec<[E::BusId; 1]> {
        let Some(ids) = self.connections.get(&key) else {
            return SmallVec::new();
        };
        let affected: SmallVec<[E::BusId; 1]> = match id {
            Some(id) if ids.contains(&id) => std::iter::once(id).collect(),
            Some(_) => SmallVec::new(),
            None => ids.clone(),
        };
        for id in &affected {
            if let Some(address) = self.addresses.get_mut(id) {
                for entry in address.handlers.iter_mut().filter(|e| e.key == key) {
                    entry.active.set(false);
                }
            }
        }
        affected
    }

    /// Removes the handler's entries from the address container and prunes
    /// empty addresses.
    pub fn remove_handler(&mut self, key: HandlerKey, id: Option<E::BusId>) {
        let Some(ids) = self.connections.get_mut(&key) else {
            return;
        };
        let removed: SmallVec<[E::BusId; 1]> = match id {
            Some(id) => {
                ids.retain(|existing| *existing != id);
                std::iter::once(id).collect()
            }
            None => std::mem::take(ids),
        };
        if ids.is_empty() {
            self.connections.remove(&key);
        }
        for id in removed {
            if let Some(address) = self.addresses.get_mut(&id) {
                address.handlers.retain(|e| e.key != key);
                if address.handlers.is_empty() {
                    self.addresses.shift_remove(&id);
                }
            }
        }
    }

    pub fn is_connected(&self, key: HandlerKey) -> bool {
        self.connections.contains_key(&key)
    }

    pub fn is_connected_id(&self, key: HandlerKey, id: &E::BusId) -> bool {
        self.connections
            .get(&key)
            .is_some_and(|ids| ids.contains(id))
    }

    pub fn handler_count(&self) -> usize {
        self.addresses.values().map(|a| a.handlers.len()).sum()
    }

    /// Snapshots the handlers at one address.
    pub fn snapshot_address(&self, id: &E::BusId) -> SmallVec<[HandlerEntry<E>; 16]> {
        self.addresses
            .get(id)
            .map(|a| a.handlers.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshots every handler in broadcast visit order.
    pub fn snapshot_all(&self) -> SmallVec<[HandlerEntry<E>; 16]> {
        let mut buf = SmallVec::new();
        if matches!(E::ADDRESS_POLICY, AddressPolicy::ByIdAndOrdered) {
            let mut keys: SmallVec<[E::BusId; 8]> = self.addresses.keys().copied().collect();
            keys.sort_by(|a, b| E::compare_ids(a, b));
            for key in keys {
                if let Some(address) = self.addresses.get(&key) {
                    buf.extend(address.handlers.iter().cloned());
                }
            }
        } else {
            for address in self.addresses.values() {
                buf.extend(address.handlers.iter().cloned());
            }
        }
        buf
    }

    /// Attaches a router, keeping the list sorted by order (ties connect
    /// after existing routers of the same order).
    pub fn router_connect(&mut self, entry: RouterEntry<E>) -> bool {
        if self.dispatch_depth > 0 {
            log::error!(
                "Bus {}: router connect during dispatch is forbidden",
                std::any::type_name::<E>(),
            );
            debug_assert!(false, "router connect during dispatch");
            return false;
        }
        let position = self.routers.iter().position(|r| entry.order < r.order);
        match position {
            Some(index) => self.routers.insert(index, entry),
            None => self.routers.push(entry),
        }
        true
    }

    pub fn router_disconnect(&mut self, key: HandlerKey) -> bool {
        if self.dispatch_depth > 0 {
            log::error!(
                "Bus {}: router disconnect during dispatch is forbidden",
                std::any::type_name::<E>(),
            );
            debug_assert!(false, "router disconnect during dispatch");
            return false;
        }
        let before = self.routers.len();
        self.routers.retain(|r| r.key != key);
        self.routers.len() != before
    }

    pub fn snapshot_routers(&self) -> SmallVec<[Rc<dyn EventRouter<E>>; 4]> {
        self.routers.iter().map(|r| Rc::clone(&r.router)).collect()
    }
}
