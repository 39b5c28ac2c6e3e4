// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: DSP bridge transport end-to-end against a simulated DSP
//! INTENT: Channel, message, power, reset and trace paths through the public API
//! DEPS: dsp-bridge (sim module), bridge-hal HeapWindow / RecordingMapper
//! TESTS: input/output round trip, EOS once, output round-robin, message batching,
//!        exit ack, corrupt counts, power overflow policies, reset -> ConnectionLost,
//!        reset via workers, reload, failed reload, fault reporting, late data after
//!        cancel, trace lines, workers, client resource release, concurrent slot
//!        ownership

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bridge_hal::MapAttrs;
use bridge_sync::PushOutcome;
use common::Rig;
use dsp_bridge::isr::{MBX_DEH_RESET, MBX_PM_HIBERNATE_EN, MBX_PM_OPP_REQ};
use dsp_bridge::sim::SimOutput;
use dsp_bridge::{
    BridgeConfig, ChannelNotify, ChannelState, ClientResources, CompletionStatus, DeviceStatus, Direction, DspMsg,
    Error, ExitNotify, IrqOutcome, PowerOverflow, PowerRequest, Resource, StaticSymbols, Wait, Workers, MSG_EXIT_ACK,
};
use parking_lot::Mutex;

#[test]
fn image_load_maps_expected_windows() {
    let rig = Rig::standard();
    let regions = rig.transport.regions();
    assert_eq!(regions.channel.ctrl, 0);
    assert_eq!(regions.message.input_ctrl, 0x2000);
    assert_eq!(regions.message.output_ctrl - regions.message.input_ctrl, 0x400);
    let entries = rig.mmu.entries();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].host_physical, common::HOST_PHYSICAL);
    assert_eq!(entries[0].target_virtual, 0x4000);
    assert!(entries.iter().all(|m| m.attrs.contains(MapAttrs::LOCKED)));
    assert_eq!(rig.transport.device_status(), DeviceStatus::Running);
}

#[test]
fn input_round_trip() {
    let rig = Rig::standard();
    rig.transport.open_channel(1, Direction::Input).unwrap();
    rig.transport.submit(1, Direction::Input, vec![0; 64], 0).unwrap();
    assert_eq!(rig.dsp.host_free_mask(), 1 << 1);

    assert!(rig.dsp.send_input(1, b"hello host", 0x55));
    rig.signal();

    let done = rig.transport.take_completion(1).unwrap().expect("completion");
    assert_eq!(done.status, CompletionStatus::Complete);
    assert_eq!(done.data, b"hello host");
    assert_eq!(done.len, 10);
    assert!(!rig.dsp.input_full());
    assert_eq!(rig.dsp.host_free_mask(), 0);
    assert!(rig.mailbox.data_signals() >= 1);
    assert_eq!(rig.transport.stats().bytes_in, 10);
}

#[test]
fn output_is_sent_immediately_when_slot_and_dsp_are_free() {
    let rig = Rig::standard();
    rig.transport.open_channel(2, Direction::Output).unwrap();
    rig.dsp.set_free_mask(1 << 2);
    rig.transport.submit(2, Direction::Output, b"start".to_vec(), 3).unwrap();

    assert_eq!(rig.dsp.take_output(), Some(SimOutput { channel: 2, data: b"start".to_vec(), arg: 3 }));
    let done = rig.transport.take_completion(2).unwrap().unwrap();
    assert_eq!(done.status, CompletionStatus::Complete);
    assert_eq!(done.len, 5);
}

#[test]
fn end_of_stream_is_reported_once() {
    let rig = Rig::standard();
    rig.transport.open_channel(0, Direction::Input).unwrap();
    rig.transport.submit(0, Direction::Input, vec![0; 16], 0).unwrap();
    rig.transport.submit(0, Direction::Input, vec![0; 16], 0).unwrap();

    assert!(rig.dsp.send_input(0, b"", 0));
    rig.signal();
    assert!(rig.dsp.send_input(0, b"", 0));
    rig.signal();

    let done = rig.transport.take_completion(0).unwrap().unwrap();
    assert_eq!(done.status, CompletionStatus::EndOfStream);
    assert!(rig.transport.take_completion(0).unwrap().is_none());
    assert_eq!(rig.transport.pending_requests(0).unwrap(), 1);
    assert!(rig.transport.channel_state(0).unwrap().contains(ChannelState::EOS));
    assert_eq!(rig.transport.stats().eos_repeats, 1);
}

#[test]
fn output_round_robin_across_ready_channels() {
    let rig = Rig::standard();
    for id in [0, 2, 5] {
        rig.transport.open_channel(id, Direction::Output).unwrap();
        for _ in 0..2 {
            rig.transport.submit(id, Direction::Output, vec![id as u8; 8], id).unwrap();
        }
    }
    assert!(rig.dsp.take_output().is_none());
    rig.dsp.set_free_mask(u32::MAX);

    let mut order = Vec::new();
    for _ in 0..6 {
        rig.signal();
        let out = rig.dsp.take_output().expect("slot filled");
        assert_eq!(out.data, vec![out.channel as u8; 8]);
        order.push(out.channel);
    }
    assert_eq!(order, vec![0, 2, 5, 0, 2, 5]);
    rig.signal();
    assert!(rig.dsp.take_output().is_none());
}

#[test]
fn outbound_messages_split_at_capacity() {
    let config = BridgeConfig { max_queue_messages: 128, ..BridgeConfig::default() };
    let rig = Rig::new(config);
    let capacity = rig.transport.regions().message.capacity;
    let _queue = rig.transport.register_destination(3, None).unwrap();
    for cmd in 0..=capacity as u32 {
        rig.transport.send(3, DspMsg { cmd, arg1: 1, arg2: 2 }, Wait::NonBlocking).unwrap();
    }

    rig.signal();
    let first = rig.dsp.take_messages();
    assert_eq!(first.len(), capacity);
    assert!(first.iter().enumerate().all(|(i, (dest, msg))| *dest == 3 && msg.cmd == i as u32));
    rig.signal();
    assert_eq!(rig.dsp.take_messages(), vec![(3, DspMsg { cmd: capacity as u32, arg1: 1, arg2: 2 })]);
}

#[test]
fn inbound_messages_reach_queue_and_exit_ack_calls_back() {
    let rig = Rig::standard();
    let acks = Arc::new(Mutex::new(Vec::new()));
    let sink = acks.clone();
    let on_exit: ExitNotify = Arc::new(move |id, status| sink.lock().push((id, status)));
    let queue = rig.transport.register_destination(5, Some(on_exit)).unwrap();

    let batch = [
        (5, DspMsg { cmd: 0x10, arg1: 1, arg2: 2 }),
        (5, DspMsg { cmd: MSG_EXIT_ACK, arg1: 7, arg2: 0 }),
    ];
    assert!(rig.dsp.post_messages(&batch));
    rig.signal();

    assert_eq!(queue.get(Wait::Timeout(Duration::from_secs(1))).unwrap(), batch[0].1);
    assert_eq!(queue.try_get(), Err(Error::WouldBlock));
    assert_eq!(*acks.lock(), vec![(5, 7)]);
    assert!(!rig.dsp.inbound_pending());
}

#[test]
fn oversized_inbound_count_is_ignored() {
    let rig = Rig::standard();
    let capacity = rig.transport.regions().message.capacity as u32;
    rig.dsp.post_raw_message_count(capacity + 1);
    rig.signal();
    assert!(rig.dsp.inbound_pending());
    assert_eq!(rig.transport.stats().corrupt_units, 1);
}

#[test]
fn corrupt_input_header_is_drained() {
    let rig = Rig::standard();
    rig.dsp.send_raw_input(40, 4);
    rig.signal();
    assert!(!rig.dsp.input_full());
    assert_eq!(rig.transport.stats().corrupt_units, 1);
}

fn power_rig(policy: PowerOverflow) -> Rig {
    Rig::new(BridgeConfig { power_queue_capacity: 2, power_overflow: policy, ..BridgeConfig::default() })
}

#[test]
fn power_queue_drop_newest() {
    let rig = power_rig(PowerOverflow::DropNewest);
    let outcomes: Vec<IrqOutcome> = [1u16, 2, 3].into_iter().map(|i| rig.interrupt(MBX_PM_OPP_REQ | i)).collect();
    assert_eq!(
        outcomes,
        vec![
            IrqOutcome::PowerQueued(PushOutcome::Stored),
            IrqOutcome::PowerQueued(PushOutcome::Stored),
            IrqOutcome::PowerQueued(PushOutcome::Dropped),
        ]
    );
    assert_eq!(rig.transport.run_power(), 2);
    assert_eq!(
        *rig.power.requests.lock(),
        vec![PowerRequest::OperatingPoint(1), PowerRequest::OperatingPoint(2)]
    );
    assert_eq!(rig.transport.stats().power_overflows, 1);
}

#[test]
fn power_queue_overwrite_keeps_newest() {
    let rig = power_rig(PowerOverflow::Overwrite);
    for i in [1, 2, 3] {
        rig.interrupt(MBX_PM_OPP_REQ | i);
    }
    rig.transport.run_power();
    assert_eq!(
        *rig.power.requests.lock(),
        vec![PowerRequest::OperatingPoint(2), PowerRequest::OperatingPoint(3)]
    );
    assert_eq!(rig.transport.stats().power_overflows, 1);
}

#[test]
fn hibernate_and_invalid_operating_point() {
    let rig = Rig::standard();
    rig.interrupt(MBX_PM_HIBERNATE_EN);
    rig.interrupt(MBX_PM_OPP_REQ | 9);
    assert_eq!(rig.transport.run_power(), 2);
    assert_eq!(*rig.power.requests.lock(), vec![PowerRequest::HibernateEnable]);
    assert_eq!(rig.transport.stats().power_failures, 1);
}

#[test]
fn reset_fails_outstanding_requests_until_reload() {
    let rig = Rig::standard();
    rig.transport.open_channel(1, Direction::Output).unwrap();
    rig.transport.submit(1, Direction::Output, b"queued".to_vec(), 0).unwrap();

    assert_eq!(rig.interrupt(MBX_DEH_RESET), IrqOutcome::Reset);
    assert_eq!(rig.transport.device_status(), DeviceStatus::Lost);
    assert_eq!(
        rig.transport.submit(1, Direction::Output, b"more".to_vec(), 0),
        Err(Error::ConnectionLost)
    );
    let done = rig.transport.take_completion(1).unwrap().unwrap();
    assert_eq!(done.status, CompletionStatus::ConnectionLost);
    assert_eq!(done.data, b"queued");
    assert_eq!(rig.transport.stats().resets, 1);

    rig.transport.reload(&rig.image.symbols()).unwrap();
    assert_eq!(rig.transport.device_status(), DeviceStatus::Running);
    rig.dsp.set_free_mask(1 << 1);
    rig.transport.submit(1, Direction::Output, b"again".to_vec(), 0).unwrap();
    assert_eq!(rig.dsp.take_output().unwrap().data, b"again");
}

#[test]
fn blocked_receiver_sees_reset() {
    let rig = Rig::standard();
    let queue = rig.transport.register_destination(8, None).unwrap();
    let waiter = thread::spawn(move || queue.get(Wait::Blocking));
    thread::sleep(Duration::from_millis(20));
    rig.interrupt(MBX_DEH_RESET);
    assert_eq!(waiter.join().unwrap(), Err(Error::ConnectionLost));
    assert_eq!(
        rig.transport.send(8, DspMsg::default(), Wait::NonBlocking),
        Err(Error::ConnectionLost)
    );
}

#[test]
fn reset_notifies_waiting_channels_through_workers() {
    let rig = Rig::standard();
    let workers = Workers::spawn(rig.transport.clone()).unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = hits.clone();
    let notify: ChannelNotify = Arc::new(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    rig.transport.open_channel_with_notify(2, Direction::Input, notify).unwrap();
    rig.transport.submit(2, Direction::Input, vec![0; 16], 0).unwrap();

    assert_eq!(rig.interrupt(MBX_DEH_RESET), IrqOutcome::Reset);
    let deadline = Instant::now() + Duration::from_secs(5);
    while hits.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "reset never reached the channel");
        thread::sleep(Duration::from_millis(1));
    }
    let done = rig.transport.take_completion(2).unwrap().unwrap();
    assert_eq!(done.status, CompletionStatus::ConnectionLost);
    workers.shutdown();
}

#[test]
fn failed_reload_leaves_device_lost() {
    let rig = Rig::standard();
    rig.transport.open_channel(1, Direction::Output).unwrap();
    rig.transport.submit(1, Direction::Output, b"queued".to_vec(), 0).unwrap();

    assert!(matches!(rig.transport.reload(&StaticSymbols::new()), Err(Error::Symbol(_))));
    assert_eq!(rig.transport.device_status(), DeviceStatus::Lost);
    assert!(rig.mmu.entries().is_empty());
    assert_eq!(
        rig.transport.submit(1, Direction::Output, b"more".to_vec(), 0),
        Err(Error::ConnectionLost)
    );
    let done = rig.transport.take_completion(1).unwrap().unwrap();
    assert_eq!(done.status, CompletionStatus::ConnectionLost);
    assert_eq!(done.data, b"queued");

    rig.transport.reload(&rig.image.symbols()).unwrap();
    assert_eq!(rig.transport.device_status(), DeviceStatus::Running);
    assert_eq!(rig.mmu.entries().len(), 3);
    rig.dsp.set_free_mask(1 << 1);
    rig.transport.submit(1, Direction::Output, b"again".to_vec(), 0).unwrap();
    assert_eq!(rig.dsp.take_output().unwrap().data, b"again");
}

#[test]
fn fault_statuses_reach_the_sink() {
    let rig = Rig::standard();
    assert_eq!(rig.interrupt(0x0105), IrqOutcome::Deferred);
    assert_eq!(rig.interrupt(0x0042), IrqOutcome::Deferred);
    rig.transport.run_deferred();
    assert_eq!(*rig.faults.statuses.lock(), vec![0x0105]);
    assert_eq!(rig.transport.stats().faults, 1);
}

#[test]
fn unclaimed_interrupt_is_not_ours() {
    let rig = Rig::standard();
    assert_eq!(rig.transport.handle_interrupt(), IrqOutcome::NotOurs);
    assert_eq!(rig.transport.stats().foreign_interrupts, 1);
}

#[test]
fn late_input_after_cancel_is_dropped() {
    let rig = Rig::standard();
    let notified = Arc::new(AtomicUsize::new(0));
    let hits = notified.clone();
    let notify: ChannelNotify = Arc::new(move |_| {
        hits.fetch_add(1, Ordering::SeqCst);
    });
    rig.transport.open_channel_with_notify(4, Direction::Input, notify).unwrap();
    rig.transport.submit(4, Direction::Input, vec![0; 8], 0).unwrap();
    assert_eq!(rig.transport.cancel(4), Ok(1));
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(rig.transport.take_completion(4).unwrap().unwrap().status, CompletionStatus::Cancelled);

    assert!(rig.dsp.send_input(4, b"late", 0));
    rig.signal();
    assert!(!rig.dsp.input_full());
    assert_eq!(rig.transport.stats().late_drops, 1);
    assert!(rig.transport.take_completion(4).unwrap().is_none());
}

#[test]
fn trace_lines_are_extracted() {
    let rig = Rig::new(BridgeConfig { trace: true, ..BridgeConfig::default() });
    rig.dsp.write_trace("dsp boot\nheap ok\npartial");
    rig.signal();
    assert_eq!(rig.transport.stats().trace_lines, 2);
    rig.dsp.write_trace(" line\n");
    rig.signal();
    assert_eq!(rig.transport.stats().trace_lines, 3);
}

#[test]
fn workers_service_interrupts() {
    let rig = Rig::standard();
    let workers = Workers::spawn(rig.transport.clone()).unwrap();
    rig.transport.open_channel(6, Direction::Input).unwrap();
    rig.transport.submit(6, Direction::Input, vec![0; 4], 0).unwrap();
    assert!(rig.dsp.send_input(6, b"ping", 0));
    rig.interrupt(dsp_bridge::isr::MBX_PCPY_CLASS);
    rig.interrupt(MBX_PM_HIBERNATE_EN);

    let deadline = Instant::now() + Duration::from_secs(5);
    let done = loop {
        if let Some(done) = rig.transport.take_completion(6).unwrap() {
            break done;
        }
        assert!(Instant::now() < deadline, "deferred worker never ran");
        thread::sleep(Duration::from_millis(1));
    };
    assert_eq!(done.data, b"ping");
    while rig.power.requests.lock().is_empty() {
        assert!(Instant::now() < deadline, "power worker never ran");
        thread::sleep(Duration::from_millis(1));
    }
    workers.shutdown();
    assert_eq!(Workers::spawn(rig.transport.clone()).err(), Some(Error::InvalidState));
}

#[test]
fn client_resources_release_everything() {
    let rig = Rig::standard();
    let mut client = ClientResources::new();
    rig.transport.open_channel(3, Direction::Input).unwrap();
    client.track(Resource::Channel(3));
    let _queue = rig.transport.register_destination(12, None).unwrap();
    client.track(Resource::Destination(12));
    rig.transport.submit(3, Direction::Input, vec![0; 4], 0).unwrap();

    assert_eq!(client.release_all(&rig.transport), 2);
    assert!(client.is_empty());
    assert_eq!(rig.transport.channel_state(3).unwrap(), ChannelState::empty());
    assert_eq!(rig.dsp.host_free_mask(), 0);
    assert_eq!(rig.transport.deregister_destination(12), Err(Error::NoSuchDestination(12)));
}

#[test]
fn slot_ownership_holds_under_concurrency() {
    const ROUNDS: u32 = 300;
    let rig = Rig::standard();
    rig.transport.open_channel(1, Direction::Input).unwrap();
    for _ in 0..ROUNDS {
        rig.transport.submit(1, Direction::Input, vec![0; 32], 0).unwrap();
    }

    let dsp = rig.dsp.clone();
    let producer = thread::spawn(move || {
        for round in 0..ROUNDS {
            let payload = format!("round-{round:04}");
            while !dsp.send_input(1, payload.as_bytes(), round) {
                thread::yield_now();
            }
        }
    });

    let mut received = 0;
    let deadline = Instant::now() + Duration::from_secs(10);
    while received < ROUNDS {
        rig.transport.run_deferred();
        while let Some(done) = rig.transport.take_completion(1).unwrap() {
            assert_eq!(done.data, format!("round-{:04}", done.arg).into_bytes());
            assert_eq!(done.arg, received);
            received += 1;
        }
        assert!(Instant::now() < deadline, "stalled at {received}");
        thread::yield_now();
    }
    producer.join().unwrap();
}
