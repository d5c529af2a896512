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

//! Public API functions for connecting handlers and dispatching events.
//!
//! All functions operate on the calling thread's context for the bus type
//! `E`. Dispatch is synchronous: every receiving handler runs before the
//! dispatch call returns. Deferred delivery goes through the `queue_*`
//! family and is replayed by [`execute_queued_events`].
//!
//! Dispatch never holds the context borrow while handler code runs, so
//! handlers may freely connect, disconnect, re-dispatch the same bus, or
//! dispatch other buses from inside a callback.

use std::{cell::RefCell, rc::Rc};

use smallvec::SmallVec;

use super::{
    context::{CallstackFrame, HandlerEntry, QueuedCall, handler_key},
    get_or_create_context,
    router::{RouterContext, RouterResult},
    traits::EventBusTraits,
    try_context,
};

// -------------------------------------------------------------------------------------------------
// Connection
// -------------------------------------------------------------------------------------------------

/// Connects `handler` at the default address.
pub fn connect<E: EventBusTraits>(handler: Rc<E::Interface>) {
    connect_id::<E>(handler, E::BusId::default());
}

/// Connects `handler` at `id`.
///
/// The connection hook [`EventBusTraits::on_connect`] runs after the
/// handler lands in the address container, under a transient callstack
/// frame so the hook can observe the bus id and replay late-join state.
pub fn connect_id<E: EventBusTraits>(handler: Rc<E::Interface>, id: E::BusId) {
    let ctx = get_or_create_context::<E>();
    let connected = ctx.borrow_mut().connect(Rc::clone(&handler), id);
    if connected {
        ctx.borrow_mut().callstack.push(CallstackFrame {
            bus_id: Some(id),
            reverse: false,
            queued: false,
        });
        E::on_connect(&handler, &id);
        ctx.borrow_mut().callstack.pop();
    }
}

/// Disconnects `handler` from every address it is connected at.
///
/// An in-flight dispatch stops delivering to the handler immediately; the
/// disconnection hook runs before the handler leaves the address container.
pub fn disconnect<E: EventBusTraits>(handler: &Rc<E::Interface>) {
    let Some(ctx) = try_context::<E>() else {
        return;
    };
    let key = handler_key(handler);
    let ids = ctx.borrow_mut().deactivate_handler(key, None);
    for id in &ids {
        E::on_disconnect(handler, id);
    }
    ctx.borrow_mut().remove_handler(key, None);
}

/// Disconnects `handler` from the single address `id`.
pub fn disconnect_id<E: EventBusTraits>(handler: &Rc<E::Interface>, id: E::BusId) {
    let Some(ctx) = try_context::<E>() else {
        return;
    };
    let key = handler_key(handler);
    let ids = ctx.borrow_mut().deactivate_handler(key, Some(id));
    for id in &ids {
        E::on_disconnect(handler, id);
    }
    ctx.borrow_mut().remove_handler(key, Some(id));
}

/// Returns whether `handler` is connected anywhere on the bus.
#[must_use]
pub fn is_connected<E: EventBusTraits>(handler: &Rc<E::Interface>) -> bool {
    try_context::<E>().is_some_and(|ctx| ctx.borrow().is_connected(handler_key(handler)))
}

/// Returns whether `handler` is connected at `id`.
#[must_use]
pub fn is_connected_id<E: EventBusTraits>(handler: &Rc<E::Interface>, id: &E::BusId) -> bool {
    try_context::<E>().is_some_and(|ctx| ctx.borrow().is_connected_id(handler_key(handler), id))
}

/// Returns whether the bus has any connected handler.
#[must_use]
pub fn has_handlers<E: EventBusTraits>() -> bool {
    handler_count::<E>() > 0
}

/// Returns whether the address `id` has any connected handler.
#[must_use]
pub fn has_handlers_id<E: EventBusTraits>(id: &E::BusId) -> bool {
    try_context::<E>().is_some_and(|ctx| {
        ctx.borrow()
            .addresses
            .get(id)
            .is_some_and(|a| !a.handlers.is_empty())
    })
}

/// Returns the total number of connected handlers.
#[must_use]
pub fn handler_count<E: EventBusTraits>() -> usize {
    try_context::<E>().map_or(0, |ctx| ctx.borrow().handler_count())
}

// -------------------------------------------------------------------------------------------------
// Dispatch
// -------------------------------------------------------------------------------------------------

fn deliver<E: EventBusTraits>(
    entries: &[HandlerEntry<E>],
    reverse: bool,
    call: &dyn Fn(&E::Interface),
) {
    if reverse {
        for entry in entries.iter().rev() {
            if entry.active.get() {
                call(&*entry.handler);
            }
        }
    } else {
        for entry in entries {
            if entry.active.get() {
                call(&*entry.handler);
            }
        }
    }
}

fn run_dispatch<E: EventBusTraits>(
    id: Option<E::BusId>,
    reverse: bool,
    queued: bool,
    call: &dyn Fn(&E::Interface),
) {
    let ctx = get_or_create_context::<E>();
    {
        let mut c = ctx.borrow_mut();
        c.dispatch_depth += 1;
        c.callstack.push(CallstackFrame {
            bus_id: id,
            reverse,
            queued,
        });
    }

    let routers = ctx.borrow().snapshot_routers();
    let mut stop = false;
    let mut skip_listeners = false;
    if !routers.is_empty() {
        let router_ctx = RouterContext::<E> {
            bus_id: id,
            reverse,
            queued,
        };
        for router in &routers {
            match router.route(call, &router_ctx) {
                RouterResult::ContinueProcess => {}
                RouterResult::SkipListeners => skip_listeners = true,
                RouterResult::StopProcessing => {
                    stop = true;
                    break;
                }
            }
        }
    }

    if !stop && !skip_listeners {
        let entries: SmallVec<[HandlerEntry<E>; 16]> = match id {
            Some(id) => ctx.borrow().snapshot_address(&id),
            None => ctx.borrow().snapshot_all(),
        };
        deliver(&entries, reverse, call);
    }

    {
        let mut c = ctx.borrow_mut();
        c.callstack.pop();
        c.dispatch_depth -= 1;
    }
}

/// Dispatches `call` to every handler at every address.
pub fn broadcast<E: EventBusTraits>(call: impl Fn(&E::Interface)) {
    run_dispatch::<E>(None, false, false, &call);
}

/// As [`broadcast`], visiting handlers in reverse order.
pub fn broadcast_reverse<E: EventBusTraits>(call: impl Fn(&E::Interface)) {
    run_dispatch::<E>(None, true, false, &call);
}

/// Dispatches `call` to the handlers at address `id`.
pub fn event<E: EventBusTraits>(id: E::BusId, call: impl Fn(&E::Interface)) {
    run_dispatch::<E>(Some(id), false, false, &call);
}

/// As [`event`], visiting handlers in reverse order.
pub fn event_reverse<E: EventBusTraits>(id: E::BusId, call: impl Fn(&E::Interface)) {
    run_dispatch::<E>(Some(id), true, false, &call);
}

fn run_dispatch_result<E: EventBusTraits, R>(
    id: Option<E::BusId>,
    reverse: bool,
    call: impl FnMut(&E::Interface) -> R,
    result: &mut R,
) {
    // Each handler's return overwrites the collector; with zero handlers
    // the collector is left untouched.
    let state = RefCell::new((call, result));
    run_dispatch::<E>(id, reverse, false, &|handler| {
        let mut state = state.borrow_mut();
        let (call, result) = &mut *state;
        **result = call(handler);
    });
}

/// Broadcast collecting a return value; the last handler's value wins.
pub fn broadcast_result<E: EventBusTraits, R>(
    call: impl FnMut(&E::Interface) -> R,
    result: &mut R,
) {
    run_dispatch_result::<E, R>(None, false, call, result);
}

/// As [`broadcast_result`], visiting handlers in reverse order.
pub fn broadcast_result_reverse<E: EventBusTraits, R>(
    call: impl FnMut(&E::Interface) -> R,
    result: &mut R,
) {
    run_dispatch_result::<E, R>(None, true, call, result);
}

/// Addressed dispatch collecting a return value; the last handler's value
/// wins.
pub fn event_result<E: EventBusTraits, R>(
    id: E::BusId,
    call: impl FnMut(&E::Interface) -> R,
    result: &mut R,
) {
    run_dispatch_result::<E, R>(Some(id), false, call, result);
}

/// As [`event_result`], visiting handlers in reverse order.
pub fn event_result_reverse<E: EventBusTraits, R>(
    id: E::BusId,
    call: impl FnMut(&E::Interface) -> R,
    result: &mut R,
) {
    run_dispatch_result::<E, R>(Some(id), true, call, result);
}

// -------------------------------------------------------------------------------------------------
// Queued delivery
// -------------------------------------------------------------------------------------------------

fn enqueue<E: EventBusTraits>(item: QueuedCall<E>) {
    if !E::ENABLE_QUEUE {
        log::error!(
            "Bus {}: queueing is not enabled for this bus",
            std::any::type_name::<E>(),
        );
        debug_assert!(false, "queueing is not enabled for this bus");
        return;
    }
    let ctx = get_or_create_context::<E>();
    let mut c = ctx.borrow_mut();
    if !c.queueing_active {
        log::warn!(
            "Bus {}: queueing is switched off; call dropped",
            std::any::type_name::<E>(),
        );
        return;
    }
    c.queue.push_back(item);
}

/// Defers a broadcast until [`execute_queued_events`].
pub fn queue_broadcast<E: EventBusTraits>(call: impl Fn(&E::Interface) + 'static) {
    enqueue::<E>(QueuedCall::Broadcast {
        call: Box::new(call),
        reverse: false,
    });
}

/// Defers a reverse broadcast until [`execute_queued_events`].
pub fn queue_broadcast_reverse<E: EventBusTraits>(call: impl Fn(&E::Interface) + 'static) {
    enqueue::<E>(QueuedCall::Broadcast {
        call: Box::new(call),
        reverse: true,
    });
}

/// Defers an addressed dispatch until [`execute_queued_events`].
pub fn queue_event<E: EventBusTraits>(id: E::BusId, call: impl Fn(&E::Interface) + 'static) {
    enqueue::<E>(QueuedCall::Event {
        id,
        call: Box::new(call),
        reverse: false,
    });
}

/// Defers a reverse addressed dispatch until [`execute_queued_events`].
pub fn queue_event_reverse<E: EventBusTraits>(
    id: E::BusId,
    call: impl Fn(&E::Interface) + 'static,
) {
    enqueue::<E>(QueuedCall::Event {
        id,
        call: Box::new(call),
        reverse: true,
    });
}

/// Defers an arbitrary function until [`execute_queued_events`].
pub fn queue_function<E: EventBusTraits>(function: impl FnOnce() + 'static) {
    enqueue::<E>(QueuedCall::Function(Box::new(function)));
}

/// Drains the queue in FIFO order, re-invoking each deferred call.
///
/// Calls queued by handlers during the flush are drained in the same pass.
/// Replayed dispatches carry the queued flag on their callstack frame so
/// routers can distinguish them.
pub fn execute_queued_events<E: EventBusTraits>() {
    let Some(ctx) = try_context::<E>() else {
        return;
    };
    loop {
        let next = ctx.borrow_mut().queue.pop_front();
        let Some(item) = next else {
            break;
        };
        match item {
            QueuedCall::Broadcast { call, reverse } => {
                run_dispatch::<E>(None, reverse, true, &*call);
            }
            QueuedCall::Event { id, call, reverse } => {
                run_dispatch::<E>(Some(id), reverse, true, &*call);
            }
            QueuedCall::Function(function) => function(),
        }
    }
}

/// Switches queueing on or off; while off, `queue_*` calls are dropped
/// with a logged warning.
pub fn allow_function_queuing<E: EventBusTraits>(allowed: bool) {
    get_or_create_context::<E>().borrow_mut().queueing_active = allowed;
}

/// Returns whether queueing is currently switched on.
#[must_use]
pub fn is_function_queuing_allowed<E: EventBusTraits>() -> bool {
    try_context::<E>().is_some_and(|ctx| ctx.borrow().queueing_active)
}

/// Discards every queued call without invoking it.
pub fn clear_queued_events<E: EventBusTraits>() {
    if let Some(ctx) = try_context::<E>() {
        ctx.borrow_mut().queue.clear();
    }
}

/// Returns the number of calls waiting in the queue.
#[must_use]
pub fn queued_event_count<E: EventBusTraits>() -> usize {
    try_context::<E>().map_or(0, |ctx| ctx.borrow().queue.len())
}

// -------------------------------------------------------------------------------------------------
// Callstack queries
// -------------------------------------------------------------------------------------------------

/// Returns whether the same bus and id appear at least twice on this
/// thread's dispatch callstack, which indicates handler code re-entered the
/// bus it is being called from. Pass `None` to test broadcast frames.
#[must_use]
pub fn has_reentrant_bus_use<E: EventBusTraits>(id: Option<&E::BusId>) -> bool {
    try_context::<E>().is_some_and(|ctx| {
        ctx.borrow()
            .callstack
            .iter()
            .filter(|frame| match (id, frame.bus_id.as_ref()) {
                (Some(a), Some(b)) => a == b,
                (None, None) => true,
                _ => false,
            })
            .count()
            >= 2
    })
}

/// Returns the id of the innermost dispatch on this thread, `None` outside
/// dispatch or during a broadcast.
#[must_use]
pub fn current_bus_id<E: EventBusTraits>() -> Option<E::BusId> {
    try_context::<E>().and_then(|ctx| ctx.borrow().callstack.last().and_then(|f| f.bus_id))
}

/// Returns whether a dispatch is live on this thread.
#[must_use]
pub fn is_in_dispatch<E: EventBusTraits>() -> bool {
    dispatch_depth::<E>() > 0
}

/// Returns the number of nested dispatches live on this thread.
#[must_use]
pub fn dispatch_depth<E: EventBusTraits>() -> usize {
    try_context::<E>().map_or(0, |ctx| ctx.borrow().dispatch_depth)
}

#[cfg(test)]
mod tests {
    use std::{
        cell::{Cell, RefCell},
        cmp::Ordering,
        rc::Rc,
    };

    use rand::{Rng, SeedableRng, rngs::StdRng};
    use rstest::rstest;

    use super::*;
    use crate::eventbus::{
        stubs::RecordingLog,
        traits::{AddressPolicy, HandlerPolicy},
    };

    trait TestEvents {
        fn on_event(&self, tag: &str);

        fn sort_key(&self) -> i32 {
            0
        }

        fn value(&self) -> i32 {
            0
        }
    }

    struct Recorder {
        name: &'static str,
        key: i32,
        log: RecordingLog,
    }

    impl Recorder {
        fn new(name: &'static str, log: &RecordingLog) -> Rc<dyn TestEvents> {
            Self::with_key(name, 0, log)
        }

        fn with_key(name: &'static str, key: i32, log: &RecordingLog) -> Rc<dyn TestEvents> {
            Rc::new(Self {
                name,
                key,
                log: log.clone(),
            })
        }
    }

    impl TestEvents for Recorder {
        fn on_event(&self, tag: &str) {
            self.log.push(format!("{}:{tag}", self.name));
        }

        fn sort_key(&self) -> i32 {
            self.key
        }

        fn value(&self) -> i32 {
            self.key
        }
    }

    struct BasicBus;

    impl EventBusTraits for BasicBus {
        type Interface = dyn TestEvents;
        type BusId = ();
    }

    struct IdBus;

    impl EventBusTraits for IdBus {
        type Interface = dyn TestEvents;
        type BusId = u64;
        const ADDRESS_POLICY: AddressPolicy = AddressPolicy::ById;
        const ENABLE_QUEUE: bool = true;
    }

    struct OrderedBus;

    impl EventBusTraits for OrderedBus {
        type Interface = dyn TestEvents;
        type BusId = ();
        const HANDLER_POLICY: HandlerPolicy = HandlerPolicy::MultipleAndOrdered;

        fn compare_handlers(a: &Self::Interface, b: &Self::Interface) -> Ordering {
            a.sort_key().cmp(&b.sort_key())
        }
    }

    struct OrderedIdBus;

    impl EventBusTraits for OrderedIdBus {
        type Interface = dyn TestEvents;
        type BusId = u64;
        const ADDRESS_POLICY: AddressPolicy = AddressPolicy::ByIdAndOrdered;
    }

    struct SingleBus;

    impl EventBusTraits for SingleBus {
        type Interface = dyn TestEvents;
        type BusId = ();
        const HANDLER_POLICY: HandlerPolicy = HandlerPolicy::Single;
    }

    struct MultiConnectBus;

    impl EventBusTraits for MultiConnectBus {
        type Interface = dyn TestEvents;
        type BusId = u64;
        const ADDRESS_POLICY: AddressPolicy = AddressPolicy::ById;
        const MULTI_CONNECT: bool = true;
    }

    #[rstest]
    fn test_broadcast_with_no_handlers_returns_cleanly() {
        broadcast::<BasicBus>(|h| h.on_event("nobody"));
        assert!(!has_handlers::<BasicBus>());
        assert_eq!(dispatch_depth::<BasicBus>(), 0);
    }

    #[rstest]
    fn test_result_untouched_with_no_handlers() {
        let mut result = 17;
        broadcast_result::<BasicBus, i32>(|h| h.value(), &mut result);
        assert_eq!(result, 17);
    }

    #[rstest]
    fn test_broadcast_invokes_in_connection_order() {
        let log = RecordingLog::new();
        let a = Recorder::new("a", &log);
        let b = Recorder::new("b", &log);
        connect::<BasicBus>(a.clone());
        connect::<BasicBus>(b.clone());

        broadcast::<BasicBus>(|h| h.on_event("x"));
        assert_eq!(log.take(), vec!["a:x", "b:x"]);

        broadcast_reverse::<BasicBus>(|h| h.on_event("y"));
        assert_eq!(log.take(), vec!["b:y", "a:y"]);
    }

    #[rstest]
    fn test_connect_then_disconnect_leaves_no_handlers() {
        let log = RecordingLog::new();
        let handler = Recorder::new("h", &log);
        connect::<BasicBus>(handler.clone());
        assert!(has_handlers::<BasicBus>());
        assert!(is_connected::<BasicBus>(&handler));

        disconnect::<BasicBus>(&handler);
        assert!(!has_handlers::<BasicBus>());
        assert!(!is_connected::<BasicBus>(&handler));

        broadcast::<BasicBus>(|h| h.on_event("x"));
        assert!(log.take().is_empty());
    }

    #[rstest]
    fn test_reconnect_same_id_is_noop() {
        let log = RecordingLog::new();
        let handler = Recorder::new("h", &log);
        connect_id::<IdBus>(handler.clone(), 3);
        connect_id::<IdBus>(handler.clone(), 3);

        assert_eq!(handler_count::<IdBus>(), 1);
        event::<IdBus>(3, |h| h.on_event("x"));
        assert_eq!(log.take(), vec!["h:x"]);
    }

    #[rstest]
    fn test_connect_to_different_id_disconnects_first() {
        let log = RecordingLog::new();
        let handler = Recorder::new("h", &log);
        connect_id::<IdBus>(handler.clone(), 1);
        connect_id::<IdBus>(handler.clone(), 2);

        assert!(!is_connected_id::<IdBus>(&handler, &1));
        assert!(is_connected_id::<IdBus>(&handler, &2));
        assert_eq!(handler_count::<IdBus>(), 1);
    }

    #[rstest]
    fn test_multi_connect_holds_several_ids() {
        let log = RecordingLog::new();
        let handler = Recorder::new("h", &log);
        connect_id::<MultiConnectBus>(handler.clone(), 1);
        connect_id::<MultiConnectBus>(handler.clone(), 2);

        assert!(is_connected_id::<MultiConnectBus>(&handler, &1));
        assert!(is_connected_id::<MultiConnectBus>(&handler, &2));

        event::<MultiConnectBus>(1, |h| h.on_event("one"));
        event::<MultiConnectBus>(2, |h| h.on_event("two"));
        assert_eq!(log.take(), vec!["h:one", "h:two"]);

        disconnect::<MultiConnectBus>(&handler);
        assert!(!has_handlers::<MultiConnectBus>());
    }

    #[rstest]
    fn test_single_handler_policy_refuses_second_connect() {
        let log = RecordingLog::new();
        let first = Recorder::new("first", &log);
        let second = Recorder::new("second", &log);
        connect::<SingleBus>(first.clone());
        connect::<SingleBus>(second.clone());

        assert_eq!(handler_count::<SingleBus>(), 1);
        assert!(!is_connected::<SingleBus>(&second));

        broadcast::<SingleBus>(|h| h.on_event("x"));
        assert_eq!(log.take(), vec!["first:x"]);
    }

    #[rstest]
    fn test_event_targets_only_its_address() {
        let log = RecordingLog::new();
        let five = Recorder::new("five", &log);
        let nine = Recorder::new("nine", &log);
        connect_id::<IdBus>(five.clone(), 5);
        connect_id::<IdBus>(nine.clone(), 9);

        event::<IdBus>(5, |h| h.on_event("x"));
        assert_eq!(log.take(), vec!["five:x"]);

        broadcast::<IdBus>(|h| h.on_event("all"));
        assert_eq!(log.take(), vec!["five:all", "nine:all"]);
    }

    #[rstest]
    fn test_ordered_handlers_invoke_in_comparator_order() {
        // Handlers attach in 3, 1, 2 order; the comparator sorts them
        let log = RecordingLog::new();
        let h3 = Recorder::with_key("h3", 3, &log);
        let h1 = Recorder::with_key("h1", 1, &log);
        let h2 = Recorder::with_key("h2", 2, &log);
        connect::<OrderedBus>(h3.clone());
        connect::<OrderedBus>(h1.clone());
        connect::<OrderedBus>(h2.clone());

        broadcast::<OrderedBus>(|h| h.on_event("x"));
        assert_eq!(log.take(), vec!["h1:x", "h2:x", "h3:x"]);

        broadcast_reverse::<OrderedBus>(|h| h.on_event("y"));
        assert_eq!(log.take(), vec!["h3:y", "h2:y", "h1:y"]);
    }

    #[rstest]
    fn test_ordered_addresses_visit_in_id_order() {
        let log = RecordingLog::new();
        let h9 = Recorder::new("h9", &log);
        let h2 = Recorder::new("h2", &log);
        let h5 = Recorder::new("h5", &log);
        connect_id::<OrderedIdBus>(h9.clone(), 9);
        connect_id::<OrderedIdBus>(h2.clone(), 2);
        connect_id::<OrderedIdBus>(h5.clone(), 5);

        broadcast::<OrderedIdBus>(|h| h.on_event("x"));
        assert_eq!(log.take(), vec!["h2:x", "h5:x", "h9:x"]);
    }

    #[rstest]
    fn test_broadcast_result_last_handler_wins() {
        let log = RecordingLog::new();
        let a = Recorder::with_key("a", 10, &log);
        let b = Recorder::with_key("b", 20, &log);
        connect::<BasicBus>(a.clone());
        connect::<BasicBus>(b.clone());

        let mut result = 0;
        broadcast_result::<BasicBus, i32>(|h| h.value(), &mut result);
        assert_eq!(result, 20);

        broadcast_result_reverse::<BasicBus, i32>(|h| h.value(), &mut result);
        assert_eq!(result, 10);
    }

    struct Reentrant {
        fired: Cell<bool>,
        observed_inner: Rc<Cell<bool>>,
    }

    struct ReentrantBus;

    impl EventBusTraits for ReentrantBus {
        type Interface = dyn TestEvents;
        type BusId = u64;
        const ADDRESS_POLICY: AddressPolicy = AddressPolicy::ById;
    }

    impl TestEvents for Reentrant {
        fn on_event(&self, tag: &str) {
            if tag == "outer" && !self.fired.get() {
                self.fired.set(true);
                event::<ReentrantBus>(5, |h| h.on_event("inner"));
            } else if tag == "inner" {
                self.observed_inner
                    .set(has_reentrant_bus_use::<ReentrantBus>(Some(&5)));
            }
        }
    }

    #[rstest]
    fn test_reentrancy_detected_from_inner_invocation() {
        let observed_inner = Rc::new(Cell::new(false));
        let handler = Rc::new(Reentrant {
            fired: Cell::new(false),
            observed_inner: observed_inner.clone(),
        });
        connect_id::<ReentrantBus>(handler.clone(), 5);

        assert!(!has_reentrant_bus_use::<ReentrantBus>(Some(&5)));
        event::<ReentrantBus>(5, |h| h.on_event("outer"));

        assert!(observed_inner.get());
        // Settled again once the dispatch chain unwinds
        assert!(!has_reentrant_bus_use::<ReentrantBus>(Some(&5)));
        assert_eq!(dispatch_depth::<ReentrantBus>(), 0);
    }

    #[rstest]
    fn test_reentrancy_not_visible_from_other_threads() {
        let seen = std::thread::spawn(|| has_reentrant_bus_use::<ReentrantBus>(Some(&5)))
            .join()
            .unwrap();
        assert!(!seen);
    }

    #[rstest]
    fn test_current_bus_id_inside_dispatch() {
        let observed = Rc::new(RefCell::new(None));
        let observed_in_handler = observed.clone();
        struct Probe {
            observed: Rc<RefCell<Option<u64>>>,
        }
        impl TestEvents for Probe {
            fn on_event(&self, _tag: &str) {
                *self.observed.borrow_mut() = current_bus_id::<IdBus>();
            }
        }
        let handler = Rc::new(Probe {
            observed: observed_in_handler,
        });
        connect_id::<IdBus>(handler.clone(), 7);

        event::<IdBus>(7, |h| h.on_event("x"));
        assert_eq!(*observed.borrow(), Some(7));
        assert_eq!(current_bus_id::<IdBus>(), None);
    }

    #[rstest]
    fn test_queued_delivery_preserves_enqueue_order() {
        let log = RecordingLog::new();
        let handler = Recorder::new("h", &log);
        connect_id::<IdBus>(handler.clone(), 1);

        queue_event::<IdBus>(1, |h| h.on_event("a"));
        queue_broadcast::<IdBus>(|h| h.on_event("b"));
        queue_event::<IdBus>(1, |h| h.on_event("c"));
        assert_eq!(queued_event_count::<IdBus>(), 3);
        assert!(log.take().is_empty());

        execute_queued_events::<IdBus>();
        assert_eq!(log.take(), vec!["h:a", "h:b", "h:c"]);
        assert_eq!(queued_event_count::<IdBus>(), 0);
    }

    #[rstest]
    fn test_queue_function_runs_in_order() {
        let log = RecordingLog::new();
        let handler = Recorder::new("h", &log);
        connect_id::<IdBus>(handler.clone(), 1);

        queue_event::<IdBus>(1, |h| h.on_event("before"));
        let fn_log = log.clone();
        queue_function::<IdBus>(move || fn_log.push("function".to_string()));

        execute_queued_events::<IdBus>();
        assert_eq!(log.take(), vec!["h:before", "function"]);
    }

    #[rstest]
    fn test_queueing_switch_drops_calls() {
        let log = RecordingLog::new();
        let handler = Recorder::new("h", &log);
        connect_id::<IdBus>(handler.clone(), 1);

        allow_function_queuing::<IdBus>(false);
        assert!(!is_function_queuing_allowed::<IdBus>());
        queue_event::<IdBus>(1, |h| h.on_event("dropped"));
        assert_eq!(queued_event_count::<IdBus>(), 0);

        allow_function_queuing::<IdBus>(true);
        queue_event::<IdBus>(1, |h| h.on_event("kept"));
        execute_queued_events::<IdBus>();
        assert_eq!(log.take(), vec!["h:kept"]);
    }

    #[rstest]
    fn test_clear_queued_events() {
        let log = RecordingLog::new();
        let handler = Recorder::new("h", &log);
        connect_id::<IdBus>(handler.clone(), 1);

        queue_event::<IdBus>(1, |h| h.on_event("never"));
        clear_queued_events::<IdBus>();
        execute_queued_events::<IdBus>();
        assert!(log.take().is_empty());
    }

    struct Disconnector {
        victim: RefCell<Option<Rc<dyn TestEvents>>>,
        log: RecordingLog,
    }

    impl TestEvents for Disconnector {
        fn on_event(&self, tag: &str) {
            self.log.push(format!("disconnector:{tag}"));
            if let Some(victim) = self.victim.borrow_mut().take() {
                disconnect::<BasicBus>(&victim);
            }
        }
    }

    #[rstest]
    fn test_disconnect_during_dispatch_skips_pending_handler() {
        let log = RecordingLog::new();
        let victim = Recorder::new("victim", &log);
        let disconnector = Rc::new(Disconnector {
            victim: RefCell::new(Some(victim.clone())),
            log: log.clone(),
        });
        connect::<BasicBus>(disconnector.clone());
        connect::<BasicBus>(victim.clone());

        broadcast::<BasicBus>(|h| h.on_event("x"));
        // The victim was disconnected by the first handler mid-dispatch
        assert_eq!(log.take(), vec!["disconnector:x"]);
        assert!(!is_connected::<BasicBus>(&victim));

        broadcast::<BasicBus>(|h| h.on_event("y"));
        assert_eq!(log.take(), vec!["disconnector:y"]);
    }

    struct Connector {
        extra: RefCell<Option<Rc<dyn TestEvents>>>,
        log: RecordingLog,
    }

    impl TestEvents for Connector {
        fn on_event(&self, tag: &str) {
            self.log.push(format!("connector:{tag}"));
            if let Some(extra) = self.extra.borrow_mut().take() {
                connect::<BasicBus>(extra);
            }
        }
    }

    #[rstest]
    fn test_connect_during_dispatch_joins_next_event() {
        let log = RecordingLog::new();
        let late = Recorder::new("late", &log);
        let connector = Rc::new(Connector {
            extra: RefCell::new(Some(late.clone())),
            log: log.clone(),
        });
        connect::<BasicBus>(connector.clone());

        broadcast::<BasicBus>(|h| h.on_event("first"));
        assert_eq!(log.take(), vec!["connector:first"]);

        broadcast::<BasicBus>(|h| h.on_event("second"));
        assert_eq!(log.take(), vec!["connector:second", "late:second"]);
    }

    struct LateJoinBus;

    impl EventBusTraits for LateJoinBus {
        type Interface = dyn TestEvents;
        type BusId = u64;
        const ADDRESS_POLICY: AddressPolicy = AddressPolicy::ById;

        fn on_connect(handler: &Rc<Self::Interface>, id: &Self::BusId) {
            // Replay the current address to the newly connected handler
            handler.on_event(&format!("late-join:{id}"));
            assert_eq!(current_bus_id::<LateJoinBus>(), Some(*id));
        }
    }

    #[rstest]
    fn test_connection_hook_replays_late_join_state() {
        let log = RecordingLog::new();
        let handler = Recorder::new("h", &log);
        connect_id::<LateJoinBus>(handler.clone(), 11);
        assert_eq!(log.take(), vec!["h:late-join:11"]);
    }

    #[rstest]
    fn subscription_model_fuzz() {
        // Reference-model check of the connection bookkeeping
        let mut rng = StdRng::seed_from_u64(7);
        let log = RecordingLog::new();

        let handlers: Vec<Rc<dyn TestEvents>> = (0..16)
            .map(|_| Recorder::new("fuzz", &log))
            .collect();
        let ids: Vec<u64> = (0..8).collect();
        let mut model: Vec<(usize, u64)> = Vec::new();

        for _ in 0..10_000 {
            let handler_index = rng.random_range(0..handlers.len());
            let id = ids[rng.random_range(0..ids.len())];
            let handler = handlers[handler_index].clone();

            match rng.random_range(0..3) {
                0 => {
                    // Multi-connect appends a distinct entry even at an
                    // already-connected id
                    connect_id::<MultiConnectBus>(handler.clone(), id);
                    model.push((handler_index, id));
                }
                1 => {
                    disconnect_id::<MultiConnectBus>(&handler, id);
                    model.retain(|(h, i)| !(*h == handler_index && *i == id));
                }
                _ => {
                    let expected = model.iter().any(|(h, i)| *h == handler_index && *i == id);
                    assert_eq!(
                        is_connected_id::<MultiConnectBus>(&handler, &id),
                        expected,
                    );
                    assert_eq!(handler_count::<MultiConnectBus>(), model.len());
                }
            }
        }

        for handler in &handlers {
            disconnect::<MultiConnectBus>(handler);
        }
        assert!(!has_handlers::<MultiConnectBus>());
    }
}
