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

//! Event routers.
//!
//! A router sees every dispatch on its bus before the normal handler list
//! (after it, for reverse dispatch) and can suppress delivery or re-emit
//! the call onto a different bus. Routers form an ordered sequence; lower
//! order values run first.

use std::rc::Rc;

use super::{
    api::{
        broadcast, broadcast_result, broadcast_result_reverse, broadcast_reverse, event,
        event_result, event_result_reverse, event_reverse, queue_broadcast,
        queue_broadcast_reverse, queue_event, queue_event_reverse,
    },
    context::{HandlerKey, handler_key},
    get_or_create_context,
    traits::EventBusTraits,
};

/// Verdict a router returns for one dispatch.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RouterResult {
    /// Continue with the remaining routers and the handler list.
    ContinueProcess,
    /// Run the remaining routers but skip the handler list.
    SkipListeners,
    /// Abort immediately; no further router or handler sees the event.
    StopProcessing,
}

/// Dispatch state visible to a router.
#[derive(Debug)]
pub struct RouterContext<E: EventBusTraits> {
    /// Address the event targets, `None` for broadcast.
    pub bus_id: Option<E::BusId>,
    /// Whether this is a reverse-order dispatch.
    pub reverse: bool,
    /// Whether the event is being replayed from the queue.
    pub queued: bool,
}

/// Receives dispatches ahead of the handler list.
pub trait EventRouter<E: EventBusTraits>: 'static {
    /// Observes one dispatch. `call` is the event invocation itself; a
    /// router that wants to deliver the event to its own interface applies
    /// `call` to it.
    fn route(&self, call: &dyn Fn(&E::Interface), ctx: &RouterContext<E>) -> RouterResult;
}

pub(super) struct RouterEntry<E: EventBusTraits> {
    pub order: i32,
    pub key: HandlerKey,
    pub router: Rc<dyn EventRouter<E>>,
}

/// Attaches `router` to the bus at the given order. Lower orders run first;
/// equal orders run in attach order. Forbidden while the bus is in dispatch.
pub fn router_connect<E: EventBusTraits>(router: Rc<dyn EventRouter<E>>, order: i32) {
    let key = handler_key(&router);
    let ctx = get_or_create_context::<E>();
    ctx.borrow_mut().router_connect(RouterEntry {
        order,
        key,
        router,
    });
}

/// Detaches `router` from the bus. Forbidden while the bus is in dispatch.
pub fn router_disconnect<E: EventBusTraits>(router: &Rc<dyn EventRouter<E>>) {
    let key = handler_key(router);
    let ctx = get_or_create_context::<E>();
    ctx.borrow_mut().router_disconnect(key);
}

/// Re-emits the current call onto bus `D`, picking the direct or queued
/// API and the forward or reverse variant from the routing state.
///
/// `id` addresses the target bus; pass `None` to broadcast.
pub fn forward_event<S: EventBusTraits, D: EventBusTraits>(
    ctx: &RouterContext<S>,
    id: Option<D::BusId>,
    call: impl Fn(&D::Interface) + 'static,
) {
    if ctx.queued && D::ENABLE_QUEUE {
        match (id, ctx.reverse) {
            (Some(id), false) => queue_event::<D>(id, call),
            (Some(id), true) => queue_event_reverse::<D>(id, call),
            (None, false) => queue_broadcast::<D>(call),
            (None, true) => queue_broadcast_reverse::<D>(call),
        }
        return;
    }
    match (id, ctx.reverse) {
        (Some(id), false) => event::<D>(id, call),
        (Some(id), true) => event_reverse::<D>(id, call),
        (None, false) => broadcast::<D>(call),
        (None, true) => broadcast_reverse::<D>(call),
    }
}

/// As [`forward_event`], collecting a result from the target handlers.
///
/// Result-returning forwarding is only supported on the direct path; a call
/// routed out of a queued replay is dropped with a debug log.
pub fn forward_event_result<S: EventBusTraits, D: EventBusTraits, R>(
    ctx: &RouterContext<S>,
    id: Option<D::BusId>,
    call: impl FnMut(&D::Interface) -> R,
    result: &mut R,
) {
    if ctx.queued {
        log::debug!("forward_event_result: queued result forwarding is unsupported; call dropped");
        return;
    }
    match (id, ctx.reverse) {
        (Some(id), false) => event_result::<D, R>(id, call, result),
        (Some(id), true) => event_result_reverse::<D, R>(id, call, result),
        (None, false) => broadcast_result::<D, R>(call, result),
        (None, true) => broadcast_result_reverse::<D, R>(call, result),
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use rstest::rstest;

    use super::*;
    use crate::eventbus::{
        connect_id, execute_queued_events, queue_event, stubs::RecordingLog,
        traits::AddressPolicy,
    };

    trait PingEvents {
        fn on_ping(&self, tag: &str);
    }

    struct PingRecorder {
        name: &'static str,
        log: RecordingLog,
    }

    impl PingRecorder {
        fn new(name: &'static str, log: &RecordingLog) -> Rc<dyn PingEvents> {
            Rc::new(Self {
                name,
                log: log.clone(),
            })
        }
    }

    impl PingEvents for PingRecorder {
        fn on_ping(&self, tag: &str) {
            self.log.push(format!("{}:{tag}", self.name));
        }
    }

    struct SourceBus;

    impl EventBusTraits for SourceBus {
        type Interface = dyn PingEvents;
        type BusId = u64;
        const ADDRESS_POLICY: AddressPolicy = AddressPolicy::ById;
        const ENABLE_QUEUE: bool = true;
    }

    struct TargetBus;

    impl EventBusTraits for TargetBus {
        type Interface = dyn PingEvents;
        type BusId = u64;
        const ADDRESS_POLICY: AddressPolicy = AddressPolicy::ById;
        const ENABLE_QUEUE: bool = true;
    }

    struct VerdictRouter {
        name: &'static str,
        verdict: RouterResult,
        log: RecordingLog,
    }

    impl VerdictRouter {
        fn new(
            name: &'static str,
            verdict: RouterResult,
            log: &RecordingLog,
        ) -> Rc<dyn EventRouter<SourceBus>> {
            Rc::new(Self {
                name,
                verdict,
                log: log.clone(),
            })
        }
    }

    impl EventRouter<SourceBus> for VerdictRouter {
        fn route(
            &self,
            _call: &dyn Fn(&(dyn PingEvents + 'static)),
            _ctx: &RouterContext<SourceBus>,
        ) -> RouterResult {
            self.log.push(format!("router:{}", self.name));
            self.verdict
        }
    }

    #[rstest]
    fn test_routers_run_in_order_before_handlers() {
        let log = RecordingLog::new();
        let handler = PingRecorder::new("h", &log);
        connect_id::<SourceBus>(handler.clone(), 1);

        let low = VerdictRouter::new("low", RouterResult::ContinueProcess, &log);
        let high = VerdictRouter::new("high", RouterResult::ContinueProcess, &log);
        // Attach out of order; the order key sorts them
        router_connect::<SourceBus>(high.clone(), 10);
        router_connect::<SourceBus>(low.clone(), 0);

        crate::eventbus::event::<SourceBus>(1, |h| h.on_ping("x"));
        assert_eq!(log.take(), vec!["router:low", "router:high", "h:x"]);

        router_disconnect::<SourceBus>(&low);
        router_disconnect::<SourceBus>(&high);
    }

    #[rstest]
    fn test_stop_processing_suppresses_everything() {
        let log = RecordingLog::new();
        let handler = PingRecorder::new("h", &log);
        connect_id::<SourceBus>(handler.clone(), 1);

        let stopper = VerdictRouter::new("stopper", RouterResult::StopProcessing, &log);
        let after = VerdictRouter::new("after", RouterResult::ContinueProcess, &log);
        router_connect::<SourceBus>(stopper.clone(), 0);
        router_connect::<SourceBus>(after.clone(), 1);

        crate::eventbus::event::<SourceBus>(1, |h| h.on_ping("x"));
        assert_eq!(log.take(), vec!["router:stopper"]);

        router_disconnect::<SourceBus>(&stopper);
        router_disconnect::<SourceBus>(&after);
    }

    #[rstest]
    fn test_skip_listeners_still_runs_remaining_routers() {
        let log = RecordingLog::new();
        let handler = PingRecorder::new("h", &log);
        connect_id::<SourceBus>(handler.clone(), 1);

        let skipper = VerdictRouter::new("skipper", RouterResult::SkipListeners, &log);
        let after = VerdictRouter::new("after", RouterResult::ContinueProcess, &log);
        router_connect::<SourceBus>(skipper.clone(), 0);
        router_connect::<SourceBus>(after.clone(), 1);

        crate::eventbus::event::<SourceBus>(1, |h| h.on_ping("x"));
        assert_eq!(log.take(), vec!["router:skipper", "router:after"]);

        router_disconnect::<SourceBus>(&skipper);
        router_disconnect::<SourceBus>(&after);
    }

    struct ForwardingRouter;

    impl EventRouter<SourceBus> for ForwardingRouter {
        fn route(
            &self,
            call: &dyn Fn(&(dyn PingEvents + 'static)),
            ctx: &RouterContext<SourceBus>,
        ) -> RouterResult {
            // Both buses share the interface; re-apply the call on the target
            let forwarded = Rc::new(RefCell::new(Vec::new()));
            call(&CaptureProbe {
                captured: forwarded.clone(),
            });
            for tag in forwarded.borrow().iter().cloned().collect::<Vec<_>>() {
                forward_event::<SourceBus, TargetBus>(ctx, Some(100), move |h| {
                    h.on_ping(&tag);
                });
            }
            RouterResult::ContinueProcess
        }
    }

    struct CaptureProbe {
        captured: Rc<RefCell<Vec<String>>>,
    }

    impl PingEvents for CaptureProbe {
        fn on_ping(&self, tag: &str) {
            self.captured.borrow_mut().push(tag.to_string());
        }
    }

    #[rstest]
    fn test_forward_event_direct_path() {
        let log = RecordingLog::new();
        let target = PingRecorder::new("target", &log);
        connect_id::<TargetBus>(target.clone(), 100);

        let router: Rc<dyn EventRouter<SourceBus>> = Rc::new(ForwardingRouter);
        router_connect::<SourceBus>(router.clone(), 0);

        crate::eventbus::event::<SourceBus>(1, |h| h.on_ping("hello"));
        assert_eq!(log.take(), vec!["target:hello"]);

        router_disconnect::<SourceBus>(&router);
    }

    #[rstest]
    fn test_forward_from_queued_replay_stays_queued() {
        let log = RecordingLog::new();
        let target = PingRecorder::new("target", &log);
        connect_id::<TargetBus>(target.clone(), 100);

        let router: Rc<dyn EventRouter<SourceBus>> = Rc::new(ForwardingRouter);
        router_connect::<SourceBus>(router.clone(), 0);

        queue_event::<SourceBus>(1, |h| h.on_ping("deferred"));
        execute_queued_events::<SourceBus>();
        // The forward happened during a queued replay, so it was queued on
        // the target rather than dispatched inline
        assert!(log.take().is_empty());

        execute_queued_events::<TargetBus>();
        assert_eq!(log.take(), vec!["target:deferred"]);

        router_disconnect::<SourceBus>(&router);
    }

    #[rstest]
    fn test_forward_event_result_dropped_when_queued() {
        let queued_ctx = RouterContext::<SourceBus> {
            bus_id: Some(1),
            reverse: false,
            queued: true,
        };
        let mut result = 41;
        forward_event_result::<SourceBus, TargetBus, i32>(
            &queued_ctx,
            Some(100),
            |_h| 99,
            &mut result,
        );
        assert_eq!(result, 41);
    }

    struct MidDispatchAttacher {
        other: RefCell<Option<Rc<dyn EventRouter<SourceBus>>>>,
    }

    impl EventRouter<SourceBus> for MidDispatchAttacher {
        fn route(
            &self,
            _call: &dyn Fn(&(dyn PingEvents + 'static)),
            _ctx: &RouterContext<SourceBus>,
        ) -> RouterResult {
            if let Some(other) = self.other.borrow_mut().take() {
                // Structural change during dispatch is refused
                router_connect::<SourceBus>(other, 5);
            }
            RouterResult::ContinueProcess
        }
    }

    #[rstest]
    fn test_router_connect_during_dispatch_is_refused() {
        let log = RecordingLog::new();
        let handler = PingRecorder::new("h", &log);
        connect_id::<SourceBus>(handler.clone(), 1);

        let late = VerdictRouter::new("late", RouterResult::ContinueProcess, &log);
        let attacher: Rc<dyn EventRouter<SourceBus>> = Rc::new(MidDispatchAttacher {
            other: RefCell::new(Some(late)),
        });
        router_connect::<SourceBus>(attacher.clone(), 0);

        crate::eventbus::event::<SourceBus>(1, |h| h.on_ping("x"));
        assert_eq!(log.take(), vec!["h:x"]);

        // The refused router never attached; only the attacher runs
        crate::eventbus::event::<SourceBus>(1, |h| h.on_ping("y"));
        assert_eq!(log.take(), vec!["h:y"]);

        router_disconnect::<SourceBus>(&attacher);
    }
}
