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

//! Address-partitioned event buses for intra-process dispatch.
//!
//! # Dispatch model
//!
//! - **Broadcast**: deliver to every handler at every address.
//! - **Addressed** (`event`): deliver to the handlers grouped under one
//!   [`EventBusTraits::BusId`].
//! - **Queued**: capture the call and replay it from
//!   [`execute_queued_events`], preserving enqueue order.
//!
//! A bus is a marker type implementing [`EventBusTraits`]; the trait
//! selects address partitioning, handler ordering and queueing. Handlers
//! are `Rc` trait objects of the bus interface, identified by their
//! allocation, and dispatch invokes a caller-supplied closure once per
//! receiving handler.
//!
//! # Storage
//!
//! Contexts live in thread-local storage, one per bus type per thread, so
//! dispatch needs no synchronization and each thread's callstack tracking
//! is isolated. Delivery is always synchronous on the calling thread;
//! cross-thread hand-off goes through the queue, which the receiving side
//! drains explicitly.
//!
//! Dispatch snapshots the handler list out of the context before invoking
//! anything, so handler code may freely connect, disconnect, or re-enter
//! the bus. Each connection carries a shared liveness flag; disconnecting
//! mid-dispatch flips the flag and the in-flight snapshot skips the
//! handler.

mod api;
mod context;
pub mod macros;
pub mod router;
pub mod stubs;
pub mod traits;

use std::{any::TypeId, cell::RefCell, rc::Rc};

use ahash::AHashMap;

use self::context::BusContext;
pub use self::{
    api::*,
    router::{EventRouter, RouterContext, RouterResult, forward_event, forward_event_result,
        router_connect, router_disconnect},
    traits::{AddressPolicy, EventBusTraits, HandlerPolicy},
};

// One context per bus type per thread, keyed by the bus marker type.
// Box<dyn Any> storage with downcast on access follows the typed-router
// registry pattern; contexts are created on first use and live until the
// thread (or an explicit reset) tears them down.
thread_local! {
    static BUS_CONTEXTS: RefCell<AHashMap<TypeId, Rc<dyn std::any::Any>>> =
        RefCell::new(AHashMap::new());
}

/// Gets or creates the calling thread's context for bus `E`.
///
/// # Panics
///
/// Panics if the stored context type doesn't match `E` (internal bug).
fn get_or_create_context<E: EventBusTraits>() -> Rc<RefCell<BusContext<E>>> {
    BUS_CONTEXTS.with(|contexts| {
        contexts
            .borrow_mut()
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Rc::new(RefCell::new(BusContext::<E>::new())))
            .clone()
            .downcast::<RefCell<BusContext<E>>>()
            .ok()
            .expect("BusContext type mismatch - this is a bug")
    })
}

/// Returns the calling thread's context for bus `E` if one exists.
fn try_context<E: EventBusTraits>() -> Option<Rc<RefCell<BusContext<E>>>> {
    BUS_CONTEXTS.with(|contexts| {
        contexts
            .borrow()
            .get(&TypeId::of::<E>())
            .cloned()
            .map(|ctx| {
                ctx.downcast::<RefCell<BusContext<E>>>()
                    .ok()
                    .expect("BusContext type mismatch - this is a bug")
            })
    })
}

/// Drops the calling thread's context for bus `E`, releasing every
/// connection, router and queued call. Connected handlers simply stop
/// receiving events.
pub fn reset_context<E: EventBusTraits>() {
    BUS_CONTEXTS.with(|contexts| {
        contexts.borrow_mut().remove(&TypeId::of::<E>());
    });
}
