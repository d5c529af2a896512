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

//! Bus configuration traits.
//!
//! A bus is declared as a zero-sized marker type implementing
//! [`EventBusTraits`]. The trait pins the handler interface, the address
//! partitioning, handler ordering, and queueing behavior; one context is
//! materialized per implementing type.

use std::{cmp::Ordering, fmt::Debug, hash::Hash, rc::Rc};

/// How handlers are partitioned across bus addresses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AddressPolicy {
    /// One implicit address; every handler receives every event.
    Single,
    /// Handlers group under a [`EventBusTraits::BusId`]; broadcast visits
    /// addresses in insertion order.
    ById,
    /// As [`AddressPolicy::ById`], but broadcast visits addresses in
    /// [`EventBusTraits::compare_ids`] order.
    ByIdAndOrdered,
}

/// How many handlers an address holds and in what order they are invoked.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HandlerPolicy {
    /// At most one handler per address; further connects are refused.
    Single,
    /// Any number of handlers, invoked in connection order.
    Multiple,
    /// Any number of handlers, kept in [`EventBusTraits::compare_handlers`]
    /// order. Handlers comparing equal stay in connection order.
    MultipleAndOrdered,
}

/// Static configuration of a bus.
///
/// Implementors are marker types: the type itself is the bus. The
/// associated `Interface` is the handler trait object events are delivered
/// to; dispatch functions take a closure invoked once per receiving
/// handler.
///
/// ```ignore
/// trait CollisionEvents {
///     fn on_contact(&self, impulse: f32);
/// }
///
/// struct CollisionBus;
///
/// impl EventBusTraits for CollisionBus {
///     type Interface = dyn CollisionEvents;
///     type BusId = u64;
///     const ADDRESS_POLICY: AddressPolicy = AddressPolicy::ById;
/// }
/// ```
pub trait EventBusTraits: 'static {
    /// The handler interface delivered on this bus.
    type Interface: ?Sized + 'static;

    /// The address key type; use `()` for single-address buses.
    type BusId: Copy + Eq + Hash + Ord + Debug + Default + 'static;

    /// Address partitioning for this bus.
    const ADDRESS_POLICY: AddressPolicy = AddressPolicy::Single;

    /// Handler storage policy for each address.
    const HANDLER_POLICY: HandlerPolicy = HandlerPolicy::Multiple;

    /// Whether one handler may hold connections at several ids at once.
    /// When false, connecting an already-connected handler to a different
    /// id disconnects it first (and reconnecting to the same id is a
    /// no-op).
    const MULTI_CONNECT: bool = false;

    /// Whether the deferred-delivery queue is compiled in for this bus.
    const ENABLE_QUEUE: bool = false;

    /// Initial state of the queueing switch when the queue is enabled.
    const QUEUEING_ACTIVE_BY_DEFAULT: bool = true;

    /// Handler ordering for [`HandlerPolicy::MultipleAndOrdered`]. The
    /// default compares everything equal, which degrades to connection
    /// order.
    fn compare_handlers(_a: &Self::Interface, _b: &Self::Interface) -> Ordering {
        Ordering::Equal
    }

    /// Address visit order for [`AddressPolicy::ByIdAndOrdered`] broadcast.
    fn compare_ids(a: &Self::BusId, b: &Self::BusId) -> Ordering {
        a.cmp(b)
    }

    /// Connection hook, run after the handler lands in the address
    /// container. A bus can replay late-join state to the new handler here;
    /// the current bus id is observable through
    /// [`current_bus_id`](super::current_bus_id).
    fn on_connect(_handler: &Rc<Self::Interface>, _id: &Self::BusId) {}

    /// Disconnection hook, run after the handler stops receiving events but
    /// before it leaves the address container.
    fn on_disconnect(_handler: &Rc<Self::Interface>, _id: &Self::BusId) {}
}
