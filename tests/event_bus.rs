//! Event bus behavior over real (threaded) dispatchers, including recursive
//! notification between consumers.

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam::channel;
use dispatch_core::bus::{Event, EventBus, KeySelector, WildcardSelector};
use dispatch_core::dispatch::{
    BackpressurePolicy, Dispatcher, ProducerMode, RingBufferDispatcher, ThreadPoolDispatcher,
    WaitKind, WorkQueueDispatcher,
};

type BusEvent = Event<u32>;

/// A consumer for "ping" re-notifies "pong" and vice versa; four hops must
/// complete without deadlock and none may run on the notifying thread.
fn run_ping_pong(bus: Arc<EventBus<u32>>) {
    let (hops_tx, hops_rx) = channel::unbounded::<(u32, ThreadId)>();

    let ping_bus = bus.clone();
    let ping_tx = hops_tx.clone();
    bus.on(KeySelector::new("ping"), move |event| {
        let hop = *event.payload();
        ping_tx.send((hop, thread::current().id())).unwrap();
        if hop < 4 {
            ping_bus.notify("pong", hop + 1)?;
        }
        Ok(())
    });

    let pong_bus = bus.clone();
    let pong_tx = hops_tx;
    bus.on(KeySelector::new("pong"), move |event| {
        let hop = *event.payload();
        pong_tx.send((hop, thread::current().id())).unwrap();
        if hop < 4 {
            pong_bus.notify("ping", hop + 1)?;
        }
        Ok(())
    });

    let notifier = thread::current().id();
    bus.notify("ping", 1).unwrap();

    let mut hops = Vec::new();
    for _ in 0..4 {
        let (hop, executed_on) = hops_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("ping-pong stalled");
        assert_ne!(executed_on, notifier, "hop {hop} ran on the notifying thread");
        hops.push(hop);
    }
    hops.sort_unstable();
    assert_eq!(hops, vec![1, 2, 3, 4]);

    assert!(bus.dispatcher().await_and_shutdown(Duration::from_secs(5)));
}

#[test]
fn ping_pong_over_a_thread_pool_bus() {
    let dispatcher: Arc<ThreadPoolDispatcher<BusEvent>> =
        Arc::new(ThreadPoolDispatcher::new("ping-pong-pool", 2, 32).unwrap());
    run_ping_pong(EventBus::new("ping-pong-pool-bus", dispatcher));
}

#[test]
fn ping_pong_over_a_work_queue_bus() {
    let dispatcher: Arc<WorkQueueDispatcher<BusEvent>> = Arc::new(
        WorkQueueDispatcher::new(
            "ping-pong-work-queue",
            32,
            2,
            WaitKind::Blocking,
            BackpressurePolicy::Block,
        )
        .unwrap(),
    );
    run_ping_pong(EventBus::new("ping-pong-work-queue-bus", dispatcher));
}

#[test]
fn ping_pong_over_a_ring_buffer_bus() {
    // Recursive notify from the consumer thread is an ordinary producer
    // claim; the single-consumer ring must not deadlock on itself.
    let dispatcher: Arc<RingBufferDispatcher<BusEvent>> = Arc::new(
        RingBufferDispatcher::new(
            "ping-pong-ring",
            32,
            ProducerMode::Multi,
            WaitKind::Blocking,
            BackpressurePolicy::Block,
        )
        .unwrap(),
    );
    run_ping_pong(EventBus::new("ping-pong-ring-bus", dispatcher));
}

#[test]
fn consumers_matched_by_one_notify_run_in_registration_order_on_a_ring() {
    // A single-consumer ring executes in publish order, and the bus
    // publishes matches in registration order.
    let dispatcher: Arc<RingBufferDispatcher<BusEvent>> =
        Arc::new(RingBufferDispatcher::with_defaults("ordered-bus-ring").unwrap());
    let bus = EventBus::new("ordered-bus", dispatcher);
    let (tx, rx) = channel::unbounded();

    for label in ["first", "second", "third"] {
        let tx = tx.clone();
        bus.on(WildcardSelector::new("audit.*"), move |_event| {
            tx.send(label).unwrap();
            Ok(())
        });
    }

    assert_eq!(bus.notify("audit.created", 1).unwrap(), 3);
    assert!(bus.dispatcher().await_and_shutdown(Duration::from_secs(5)));
    let order: Vec<&str> = rx.try_iter().collect();
    assert_eq!(order, vec!["first", "second", "third"]);
}

#[test]
fn request_reply_round_trip_over_a_thread_pool() {
    let dispatcher: Arc<ThreadPoolDispatcher<BusEvent>> =
        Arc::new(ThreadPoolDispatcher::new("rpc-pool", 2, 16).unwrap());
    let bus = EventBus::new("rpc-bus", dispatcher);
    let (reply_tx, reply_rx) = channel::bounded(1);

    bus.receive(KeySelector::new("square.request"), |event| {
        Ok(event.payload() * event.payload())
    });
    bus.on(KeySelector::new("square.reply"), move |event| {
        reply_tx.send(*event.payload()).unwrap();
        Ok(())
    });

    bus.send("square.request", 12, "square.reply").unwrap();
    assert_eq!(reply_rx.recv_timeout(Duration::from_secs(5)).unwrap(), 144);
    assert!(bus.dispatcher().await_and_shutdown(Duration::from_secs(5)));
}

#[test]
fn from_config_wires_the_configured_dispatcher() -> anyhow::Result<()> {
    let mut config = dispatch_core::config::DispatchConfig::default();
    config.bus.dispatcher = dispatch_core::config::DispatcherKind::WorkQueue;
    config.work_queue.capacity = 16;
    config.work_queue.consumers = 2;

    let bus: Arc<EventBus<u32>> = EventBus::from_config("configured-bus", &config)?;
    let (tx, rx) = channel::bounded(1);
    bus.on(KeySelector::new("configured.event"), move |event| {
        tx.send(*event.payload()).unwrap();
        Ok(())
    });

    bus.notify("configured.event", 5)?;
    assert_eq!(rx.recv_timeout(Duration::from_secs(5))?, 5);
    assert!(bus.dispatcher().await_and_shutdown(Duration::from_secs(5)));
    Ok(())
}

#[test]
fn notify_after_dispatcher_shutdown_is_rejected() {
    let dispatcher: Arc<ThreadPoolDispatcher<BusEvent>> =
        Arc::new(ThreadPoolDispatcher::new("closing-bus-pool", 1, 4).unwrap());
    let bus = EventBus::new("closing-bus", dispatcher);
    bus.on(KeySelector::new("k"), |_| Ok(()));

    assert!(bus.dispatcher().await_and_shutdown(Duration::from_secs(5)));
    assert!(bus.notify("k", 1).is_err());
}
