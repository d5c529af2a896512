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

//! Dispatch macros.
//!
//! Sugar over the typed dispatch functions for the common case of invoking
//! one interface method: `ebus_event!(MyBus, 7, on_thing, a, b)` desugars to
//! `event::<MyBus>(7, |h| { h.on_thing(a, b); })`. The `ebus_dbg_*`
//! variants compile to nothing outside debug builds.

/// Broadcasts one interface method call on the bus.
#[macro_export]
macro_rules! ebus_broadcast {
    ($bus:ty, $method:ident $(, $arg:expr)* $(,)?) => {
        $crate::eventbus::broadcast::<$bus>(|handler| {
            handler.$method($($arg),*);
        })
    };
}

/// Broadcasts one interface method call in reverse handler order.
#[macro_export]
macro_rules! ebus_broadcast_reverse {
    ($bus:ty, $method:ident $(, $arg:expr)* $(,)?) => {
        $crate::eventbus::broadcast_reverse::<$bus>(|handler| {
            handler.$method($($arg),*);
        })
    };
}

/// Dispatches one interface method call to the handlers at an address.
#[macro_export]
macro_rules! ebus_event {
    ($bus:ty, $id:expr, $method:ident $(, $arg:expr)* $(,)?) => {
        $crate::eventbus::event::<$bus>($id, |handler| {
            handler.$method($($arg),*);
        })
    };
}

/// Dispatches one interface method call to an address in reverse order.
#[macro_export]
macro_rules! ebus_event_reverse {
    ($bus:ty, $id:expr, $method:ident $(, $arg:expr)* $(,)?) => {
        $crate::eventbus::event_reverse::<$bus>($id, |handler| {
            handler.$method($($arg),*);
        })
    };
}

/// Broadcasts a method call, collecting the return value into `$result`.
#[macro_export]
macro_rules! ebus_broadcast_result {
    ($bus:ty, $result:expr, $method:ident $(, $arg:expr)* $(,)?) => {
        $crate::eventbus::broadcast_result::<$bus, _>(
            |handler| handler.$method($($arg),*),
            &mut $result,
        )
    };
}

/// Addressed dispatch collecting the return value into `$result`.
#[macro_export]
macro_rules! ebus_event_result {
    ($bus:ty, $result:expr, $id:expr, $method:ident $(, $arg:expr)* $(,)?) => {
        $crate::eventbus::event_result::<$bus, _>(
            $id,
            |handler| handler.$method($($arg),*),
            &mut $result,
        )
    };
}

/// Queues a broadcast for the next [`execute_queued_events`](crate::eventbus::execute_queued_events).
#[macro_export]
macro_rules! ebus_queue_broadcast {
    ($bus:ty, $method:ident $(, $arg:expr)* $(,)?) => {
        $crate::eventbus::queue_broadcast::<$bus>(move |handler| {
            handler.$method($($arg.clone()),*);
        })
    };
}

/// Queues an addressed dispatch for the next
/// [`execute_queued_events`](crate::eventbus::execute_queued_events).
#[macro_export]
macro_rules! ebus_queue_event {
    ($bus:ty, $id:expr, $method:ident $(, $arg:expr)* $(,)?) => {
        $crate::eventbus::queue_event::<$bus>($id, move |handler| {
            handler.$method($($arg.clone()),*);
        })
    };
}

/// Queues an arbitrary function for the next
/// [`execute_queued_events`](crate::eventbus::execute_queued_events).
#[macro_export]
macro_rules! ebus_queue_function {
    ($bus:ty, $function:expr) => {
        $crate::eventbus::queue_function::<$bus>($function)
    };
}

/// As [`ebus_broadcast!`], elided outside debug builds.
#[macro_export]
macro_rules! ebus_dbg_broadcast {
    ($($args:tt)*) => {
        if cfg!(debug_assertions) {
            $crate::ebus_broadcast!($($args)*);
        }
    };
}

/// As [`ebus_event!`], elided outside debug builds.
#[macro_export]
macro_rules! ebus_dbg_event {
    ($($args:tt)*) => {
        if cfg!(debug_assertions) {
            $crate::ebus_event!($($args)*);
        }
    };
}
