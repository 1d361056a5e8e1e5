mod common;

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use allocators::PoolError;
use common::{gdma_config, Bench, DmaBuf, FakeGdmaHw, LockEvent, GDMA_IRQS, SHARED_IRQ};
use soc_bsp::{
    drivers::{
        dma::{ChanHwConfig, ChanStatus, GdmaHwError},
        irq::SpiRouting,
        GdmaHw,
    },
    gdma::{
        bdl::Transaction,
        config::{GdmaCaps, GDMA_IRQ_PRIORITY},
        ChanEvent, ChanEventHandler, ChanId, ChanState, GdmaError, GdmaInstance, GdmaRequest,
    },
    sync::Timeout,
};

const POOL: usize = 4096;
const WAIT: Timeout = Timeout::DEFAULT;

fn counting(hits: &Arc<AtomicUsize>) -> Arc<dyn ChanEventHandler> {
    let hits = hits.clone();
    Arc::new(move |_chan: ChanId| {
        hits.fetch_add(1, Ordering::SeqCst);
    })
}

/// `n` copies of `chunk` bytes from `src` to `dst`, back to back.
fn copies(src: &DmaBuf, dst: &mut DmaBuf, n: usize, chunk: u32) -> Vec<Transaction> {
    let dst_base = dst.0.as_mut_ptr() as usize;
    (0..n)
        .map(|i| Transaction {
            src: src.addr() + i * chunk as usize,
            dst: dst_base + i * chunk as usize,
            len: chunk,
        })
        .collect()
}

#[test]
fn init_brings_up_vectors_once() {
    let bench = Bench::new(gdma_config(POOL));
    let first = bench.gdma.init(0).unwrap();
    let second = bench.gdma.init(0).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(first.is_ready());
    assert_eq!(bench.hw.configure_calls.load(Ordering::SeqCst), 1);
    assert_eq!(bench.hw.start_calls.load(Ordering::SeqCst), 1);
    assert_eq!(first.config().irq_priority, GDMA_IRQ_PRIORITY);

    let gic = bench.irq.gic();
    for &irq in GDMA_IRQS.iter() {
        assert_eq!(bench.irq.vectors().name(irq), Some("gdma"));
        assert!(gic.is_enabled(irq));
        assert_eq!(bench.irq.priority(irq), Ok(GDMA_IRQ_PRIORITY));
        assert_eq!(gic.routing_of(irq), Some(SpiRouting::Affinity(0)));
    }
}

#[test]
fn init_and_deinit_leave_the_scheduler_running() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    bench.gdma.init(0).unwrap();
    bench.gdma.deinit(&dma).unwrap();

    assert_eq!(bench.rtos.suspended(), 0);
    assert_eq!(bench.rtos.suspend_calls.load(Ordering::SeqCst), 3);
    assert_eq!(bench.rtos.deepest.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_start_rolls_everything_back() {
    let bench = Bench::new(gdma_config(POOL));
    bench.hw.fail_start.store(true, Ordering::SeqCst);

    assert_eq!(
        bench.gdma.init(0).err(),
        Some(GdmaError::Hw(GdmaHwError::Timeout))
    );
    assert!(bench.gdma.instance(0).is_none());
    assert_eq!(bench.hw.deconfigure_calls.load(Ordering::SeqCst), 1);
    for &irq in GDMA_IRQS.iter() {
        assert!(!bench.irq.vectors().is_installed(irq));
        assert!(!bench.irq.gic().is_enabled(irq));
    }
    assert_eq!(bench.rtos.suspended(), 0);

    bench.hw.fail_start.store(false, Ordering::SeqCst);
    assert!(bench.gdma.init(0).unwrap().is_ready());
    assert_eq!(bench.hw.configure_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn unusable_configurations_are_rejected() {
    let mut no_chans = gdma_config(POOL);
    no_chans.chan_count = 0;
    let bench = Bench::new(no_chans);
    assert_eq!(bench.gdma.init(0).err(), Some(GdmaError::InvalidConfig));
    assert_eq!(bench.hw.configure_calls.load(Ordering::SeqCst), 0);

    let bench = Bench::new(gdma_config(0));
    assert_eq!(
        bench.gdma.init(0).err(),
        Some(GdmaError::PoolInit(PoolError::InvalidRange))
    );
    assert_eq!(bench.hw.deconfigure_calls.load(Ordering::SeqCst), 1);

    let bench = Bench::new(gdma_config(POOL));
    bench.hw.fail_configure.store(true, Ordering::SeqCst);
    assert_eq!(
        bench.gdma.init(0).err(),
        Some(GdmaError::Hw(GdmaHwError::Timeout))
    );
}

#[test]
fn init_needs_a_locker() {
    let bench = Bench::new(gdma_config(POOL));
    bench.rtos.no_lockers.store(true, Ordering::SeqCst);
    assert_eq!(bench.gdma.init(0).err(), Some(GdmaError::LockerUnavailable));
    assert_eq!(bench.hw.deconfigure_calls.load(Ordering::SeqCst), 1);
    assert!(!bench.irq.vectors().is_installed(GDMA_IRQS[0]));
}

#[test]
fn descriptor_list_copy_completes_through_the_interrupt() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    let src = DmaBuf::filled(7);
    let mut dst = DmaBuf::filled(0);
    let txs = copies(&src, &mut dst, 2, 512);

    let done = Arc::new(AtomicUsize::new(0));
    let bdl_end = Arc::new(AtomicUsize::new(0));
    let request = GdmaRequest {
        transactions: &txs,
        done_handler: Some(counting(&done)),
    };
    dma.setup_channel(0, &request, WAIT).unwrap();
    dma.register_event_handler(0, ChanEvent::BdlEnd, Some(counting(&bdl_end)))
        .unwrap();
    assert_eq!(dma.channel_state(0), ChanState::Configured);
    assert_eq!(dma.pool_free_bytes(WAIT), Ok(POOL - 64));

    dma.start_channel(0, WAIT).unwrap();
    assert_eq!(dma.channel_state(0), ChanState::Transferring);
    assert_eq!(done.load(Ordering::SeqCst), 0);

    bench.hw.complete(0);
    bench.deliver(GDMA_IRQS[0]);

    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert_eq!(bdl_end.load(Ordering::SeqCst), 1);
    assert_eq!(dma.channel_state(0), ChanState::Configured);
    assert_eq!(&dst.0[..], &src.0[..]);

    // the list stays in place for another run
    dma.start_channel(0, WAIT).unwrap();
    bench.hw.complete(0);
    bench.deliver(GDMA_IRQS[0]);
    assert_eq!(done.load(Ordering::SeqCst), 2);
}

#[test]
fn descriptors_are_written_as_requested() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    let src = DmaBuf::filled(1);
    let mut dst = DmaBuf::filled(0);
    let txs = copies(&src, &mut dst, 3, 256);
    dma.setup_channel(1, &GdmaRequest { transactions: &txs, done_handler: None }, WAIT)
        .unwrap();

    let config = bench.hw.chan_config(1).unwrap();
    match config.mode {
        soc_bsp::drivers::dma::ChanMode::Bdl { list_addr, entries } => {
            assert_eq!(entries, 3);
            assert_eq!(list_addr % 128, 0);
        }
        other => panic!("unexpected mode {:?}", other),
    }
    assert_eq!(config.irq_events, ChanStatus::all());
}

#[test]
fn revoke_returns_every_byte() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    let src = DmaBuf::filled(3);
    let mut dst = DmaBuf::filled(0);
    let txs = copies(&src, &mut dst, 4, 64);
    let request = GdmaRequest {
        transactions: &txs,
        done_handler: None,
    };

    dma.setup_channel(3, &request, WAIT).unwrap();
    assert_eq!(dma.pool_free_bytes(WAIT), Ok(POOL - 128));
    dma.start_channel(3, WAIT).unwrap();
    dma.revoke_channel(3, WAIT).unwrap();

    assert_eq!(dma.pool_free_bytes(WAIT), Ok(POOL));
    assert_eq!(dma.channel_state(3), ChanState::Unconfigured);
    assert!(!bench.hw.is_allocated(3));
    assert!(!bench.hw.is_running(3));

    // revoking again is harmless, and the channel can be reused
    dma.revoke_channel(3, WAIT).unwrap();
    dma.setup_channel(3, &request, WAIT).unwrap();
}

#[test]
fn setup_rejects_bad_requests() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    let src = DmaBuf::filled(3);
    let mut dst = DmaBuf::filled(0);
    let txs = copies(&src, &mut dst, 1, 64);

    assert_eq!(
        dma.setup_channel(0, &GdmaRequest::default(), WAIT),
        Err(GdmaError::InvalidRequest)
    );
    assert_eq!(dma.channel_state(0), ChanState::Unconfigured);

    let request = GdmaRequest {
        transactions: &txs,
        done_handler: None,
    };
    dma.setup_channel(0, &request, WAIT).unwrap();
    assert_eq!(
        dma.setup_channel(0, &request, WAIT),
        Err(GdmaError::ChannelBusy)
    );
}

#[test]
fn bad_entry_leaves_the_channel_for_revoke() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    let src = DmaBuf::filled(3);
    let mut dst = DmaBuf::filled(0);
    let mut txs = copies(&src, &mut dst, 2, 64);
    txs[1].src += 4;
    let request = GdmaRequest {
        transactions: &txs,
        done_handler: None,
    };

    assert_eq!(
        dma.setup_channel(0, &request, WAIT),
        Err(GdmaError::InvalidBdlEntry)
    );
    assert_eq!(dma.channel_state(0), ChanState::Indeterminate);
    assert_eq!(
        dma.start_channel(0, WAIT),
        Err(GdmaError::ChannelNotConfigured)
    );
    assert_eq!(
        dma.setup_channel(0, &request, WAIT),
        Err(GdmaError::ChannelBusy)
    );
    assert_eq!(dma.pool_free_bytes(WAIT), Ok(POOL - 64));
    assert!(bench.hw.is_allocated(0));

    dma.revoke_channel(0, WAIT).unwrap();
    assert_eq!(dma.channel_state(0), ChanState::Unconfigured);
    assert_eq!(dma.pool_free_bytes(WAIT), Ok(POOL));
    assert!(!bench.hw.is_allocated(0));
}

#[test]
fn exhausted_pool_fails_cleanly() {
    let bench = Bench::new(gdma_config(256));
    let dma = bench.gdma.init(0).unwrap();
    let src = DmaBuf::filled(3);
    let mut dst = DmaBuf::filled(0);
    let txs = copies(&src, &mut dst, 8, 16);
    let request = GdmaRequest {
        transactions: &txs,
        done_handler: None,
    };

    dma.setup_channel(0, &request, WAIT).unwrap();
    assert_eq!(dma.pool_free_bytes(WAIT), Ok(0));
    assert_eq!(
        dma.setup_channel(1, &request, WAIT),
        Err(GdmaError::AllocateFail)
    );
    assert_eq!(dma.channel_state(1), ChanState::Unconfigured);
    assert!(!bench.hw.is_allocated(1));

    dma.revoke_channel(0, WAIT).unwrap();
    dma.setup_channel(1, &request, WAIT).unwrap();
}

#[test]
fn refused_channel_gives_its_memory_back() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    bench
        .hw
        .allocate_chan(2, &ChanHwConfig::direct(0, 0, 16))
        .unwrap();
    let src = DmaBuf::filled(3);
    let mut dst = DmaBuf::filled(0);
    let txs = copies(&src, &mut dst, 2, 64);

    assert_eq!(
        dma.setup_channel(
            2,
            &GdmaRequest {
                transactions: &txs,
                done_handler: None
            },
            WAIT
        ),
        Err(GdmaError::Hw(GdmaHwError::ChanInUse(2)))
    );
    assert_eq!(dma.pool_free_bytes(WAIT), Ok(POOL));
    assert_eq!(dma.channel_state(2), ChanState::Unconfigured);
}

#[test]
fn start_and_stop_follow_the_channel_state() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    let src = DmaBuf::filled(3);
    let mut dst = DmaBuf::filled(0);
    let txs = copies(&src, &mut dst, 1, 64);

    assert_eq!(
        dma.start_channel(0, WAIT),
        Err(GdmaError::ChannelNotConfigured)
    );
    assert_eq!(
        dma.stop_channel(0, WAIT),
        Err(GdmaError::ChannelNotConfigured)
    );

    dma.setup_channel(
        0,
        &GdmaRequest {
            transactions: &txs,
            done_handler: None,
        },
        WAIT,
    )
    .unwrap();
    dma.stop_channel(0, WAIT).unwrap();
    dma.start_channel(0, WAIT).unwrap();
    assert_eq!(dma.start_channel(0, WAIT), Err(GdmaError::ChannelBusy));
    assert!(bench.hw.is_running(0));

    dma.stop_channel(0, WAIT).unwrap();
    assert_eq!(dma.channel_state(0), ChanState::Configured);
    assert!(!bench.hw.is_running(0));
    dma.start_channel(0, WAIT).unwrap();
}

#[test]
fn failed_start_keeps_the_channel_configured() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    let src = DmaBuf::filled(3);
    let mut dst = DmaBuf::filled(0);
    let txs = copies(&src, &mut dst, 1, 64);
    dma.setup_channel(
        0,
        &GdmaRequest {
            transactions: &txs,
            done_handler: None,
        },
        WAIT,
    )
    .unwrap();
    // yank the hardware allocation from under the channel
    bench.hw.deallocate_chan(0).unwrap();

    assert_eq!(
        dma.start_channel(0, WAIT),
        Err(GdmaError::Hw(GdmaHwError::ChanNotAllocated(0)))
    );
    assert_eq!(dma.channel_state(0), ChanState::Configured);
}

#[test]
fn direct_transfer_copies_without_descriptors() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    let src = DmaBuf::filled(9);
    let mut dst = DmaBuf::filled(0);
    let tx = copies(&src, &mut dst, 1, 1024)[0];
    let done = Arc::new(AtomicUsize::new(0));

    dma.configure_channel(1, &tx, Some(counting(&done)), WAIT)
        .unwrap();
    assert_eq!(dma.pool_free_bytes(WAIT), Ok(POOL));
    dma.start_channel(1, WAIT).unwrap();
    bench.hw.complete(1);
    bench.deliver(GDMA_IRQS[1]);

    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert_eq!(&dst.0[..], &src.0[..]);

    let bad = Transaction { len: 0, ..tx };
    assert_eq!(
        dma.configure_channel(2, &bad, None, WAIT),
        Err(GdmaError::InvalidBdlEntry)
    );
}

#[test]
fn direct_transfer_needs_the_capability() {
    let mut config = gdma_config(POOL);
    config.caps = GdmaCaps::BDL;
    let bench = Bench::new(config);
    let dma = bench.gdma.init(0).unwrap();
    let src = DmaBuf::filled(9);
    let mut dst = DmaBuf::filled(0);
    let tx = copies(&src, &mut dst, 1, 64)[0];
    assert_eq!(
        dma.configure_channel(0, &tx, None, WAIT),
        Err(GdmaError::InvalidRequest)
    );
}

#[test]
fn shared_vector_serves_every_pending_channel() {
    let mut config = gdma_config(POOL);
    config.irqs = &SHARED_IRQ;
    let bench = Bench::new(config);
    let dma = bench.gdma.init(0).unwrap();
    assert!(bench.irq.vectors().is_installed(SHARED_IRQ[0]));
    assert!(!bench.irq.vectors().is_installed(GDMA_IRQS[0]));

    let src = DmaBuf::filled(5);
    let mut dst_a = DmaBuf::filled(0);
    let mut dst_b = DmaBuf::filled(0);
    let tx_a = copies(&src, &mut dst_a, 1, 256)[0];
    let tx_b = copies(&src, &mut dst_b, 1, 512)[0];
    let done = Arc::new(AtomicUsize::new(0));

    dma.configure_channel(0, &tx_a, Some(counting(&done)), WAIT)
        .unwrap();
    dma.configure_channel(2, &tx_b, Some(counting(&done)), WAIT)
        .unwrap();
    dma.start_channel(0, WAIT).unwrap();
    dma.start_channel(2, WAIT).unwrap();
    bench.hw.complete(0);
    bench.hw.complete(2);
    bench.deliver(SHARED_IRQ[0]);

    assert_eq!(done.load(Ordering::SeqCst), 2);
    assert_eq!(dma.channel_state(0), ChanState::Configured);
    assert_eq!(dma.channel_state(2), ChanState::Configured);
    assert_eq!(&dst_b.0[..512], &src.0[..512]);
}

#[test]
fn busy_event_leaves_the_state_alone() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    let busy = Arc::new(AtomicUsize::new(0));
    let src = DmaBuf::filled(9);
    let mut dst = DmaBuf::filled(0);
    let tx = copies(&src, &mut dst, 1, 64)[0];
    dma.configure_channel(3, &tx, None, WAIT).unwrap();
    dma.register_event_handler(3, ChanEvent::Busy, Some(counting(&busy)))
        .unwrap();
    dma.start_channel(3, WAIT).unwrap();

    bench.hw.signal(3, ChanStatus::BUSY);
    bench.deliver(GDMA_IRQS[3]);
    assert_eq!(busy.load(Ordering::SeqCst), 1);
    assert_eq!(dma.channel_state(3), ChanState::Transferring);

    // removing the handler silences the event
    dma.register_event_handler(3, ChanEvent::Busy, None).unwrap();
    bench.hw.signal(3, ChanStatus::BUSY);
    bench.deliver(GDMA_IRQS[3]);
    assert_eq!(busy.load(Ordering::SeqCst), 1);
}

#[test]
fn control_operations_are_serialised() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    bench.hw.allocate_delay_ms.store(30, Ordering::SeqCst);

    let workers: Vec<_> = (0..2)
        .map(|chan| {
            let dma = dma.clone();
            thread::spawn(move || {
                let src = DmaBuf::filled(chan as u8);
                let mut dst = DmaBuf::filled(0);
                let txs = copies(&src, &mut dst, 2, 64);
                dma.setup_channel(
                    chan,
                    &GdmaRequest {
                        transactions: &txs,
                        done_handler: None,
                    },
                    WAIT,
                )
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap().unwrap();
    }

    assert_eq!(bench.hw.max_inside.load(Ordering::SeqCst), 1);
    let log = bench.rtos.lock_log();
    assert!(log.chunks(2).all(|pair| matches!(
        pair,
        [LockEvent::Acquired(a), LockEvent::Released(b)] if a == b
    )));
}

/// Runs `setup_channel(0)` on another thread; returns once it holds the
/// instance lock.
fn hold_lock_in_setup(
    bench: &Bench,
    dma: &Arc<GdmaInstance<FakeGdmaHw>>,
    ms: usize,
) -> thread::JoinHandle<Result<(), GdmaError>> {
    bench.hw.allocate_delay_ms.store(ms, Ordering::SeqCst);
    let holder = {
        let dma = dma.clone();
        thread::spawn(move || {
            let src = DmaBuf::filled(1);
            let mut dst = DmaBuf::filled(0);
            let txs = copies(&src, &mut dst, 1, 64);
            dma.setup_channel(
                0,
                &GdmaRequest {
                    transactions: &txs,
                    done_handler: None,
                },
                WAIT,
            )
        })
    };
    while !bench.hw.busy() {
        thread::sleep(Duration::from_millis(1));
    }
    holder
}

#[test]
fn held_lock_times_out() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    let holder = hold_lock_in_setup(&bench, &dma, 300);

    assert_eq!(dma.start_channel(1, Timeout(10)), Err(GdmaError::LockTimeout));
    assert_eq!(dma.pool_free_bytes(Timeout(10)), Err(GdmaError::LockTimeout));
    holder.join().unwrap().unwrap();
    assert!(bench.rtos.lock_log().contains(&LockEvent::TimedOut(0)));
    assert_eq!(dma.channel_state(0), ChanState::Configured);
}

#[test]
fn deinit_releases_everything() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    let src = DmaBuf::filled(3);
    let mut dst = DmaBuf::filled(0);
    let txs = copies(&src, &mut dst, 2, 64);
    let done = Arc::new(AtomicUsize::new(0));
    dma.setup_channel(
        0,
        &GdmaRequest {
            transactions: &txs,
            done_handler: Some(counting(&done)),
        },
        WAIT,
    )
    .unwrap();
    dma.start_channel(0, WAIT).unwrap();

    bench.gdma.deinit(&dma).unwrap();
    assert!(!dma.is_ready());
    assert!(bench.gdma.instance(0).is_none());
    assert_eq!(bench.hw.stop_calls.load(Ordering::SeqCst), 1);
    assert_eq!(bench.hw.deconfigure_calls.load(Ordering::SeqCst), 1);
    for &irq in GDMA_IRQS.iter() {
        assert!(!bench.irq.vectors().is_installed(irq));
        assert!(!bench.irq.gic().is_enabled(irq));
    }
    assert_eq!(dma.channel_state(0), ChanState::Unconfigured);

    assert_eq!(bench.gdma.deinit(&dma), Err(GdmaError::NotInit));
    assert_eq!(
        dma.setup_channel(0, &GdmaRequest::default(), WAIT),
        Err(GdmaError::NotInit)
    );
    assert_eq!(
        dma.register_event_handler(0, ChanEvent::TransEnd, None),
        Err(GdmaError::NotInit)
    );
    assert_eq!(done.load(Ordering::SeqCst), 0);

    let again = bench.gdma.init(0).unwrap();
    assert!(!Arc::ptr_eq(&dma, &again));
    assert_eq!(again.pool_free_bytes(WAIT), Ok(POOL));
}

#[test]
fn deinit_reports_a_failed_stop_but_finishes() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    bench.hw.fail_stop.store(true, Ordering::SeqCst);

    assert_eq!(
        bench.gdma.deinit(&dma),
        Err(GdmaError::Hw(GdmaHwError::Timeout))
    );
    assert!(!dma.is_ready());
    assert!(bench.gdma.instance(0).is_none());
    assert_eq!(bench.hw.deconfigure_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn deinit_waits_for_control_operations() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    bench.hw.stop_delay_ms.store(150, Ordering::SeqCst);
    let holder = hold_lock_in_setup(&bench, &dma, 150);

    // queues on the lock while deinit is stopping the engine
    let waiter = {
        let dma = dma.clone();
        let hw = bench.hw.clone();
        thread::spawn(move || {
            while hw.stop_calls.load(Ordering::SeqCst) == 0 {
                thread::sleep(Duration::from_millis(1));
            }
            let src = DmaBuf::filled(2);
            let mut dst = DmaBuf::filled(0);
            let tx = copies(&src, &mut dst, 1, 256)[0];
            dma.configure_channel(1, &tx, None, WAIT)
        })
    };

    assert_eq!(bench.gdma.deinit(&dma), Ok(()));
    assert_eq!(holder.join().unwrap(), Ok(()));
    assert_eq!(waiter.join().unwrap(), Err(GdmaError::NotInit));

    assert!(!dma.is_ready());
    assert_eq!(bench.hw.deconfigure_calls.load(Ordering::SeqCst), 1);
    for chan in 0..2 {
        assert_eq!(dma.channel_state(chan), ChanState::Unconfigured);
        assert!(!bench.hw.is_allocated(chan));
    }
}

#[test]
fn deinit_leaves_a_busy_instance_alone() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    let holder = hold_lock_in_setup(&bench, &dma, 1300);

    assert_eq!(bench.gdma.deinit(&dma), Err(GdmaError::LockTimeout));
    assert!(dma.is_ready());
    assert!(bench.gdma.instance(0).is_some());
    assert_eq!(bench.hw.stop_calls.load(Ordering::SeqCst), 0);
    assert_eq!(bench.hw.deconfigure_calls.load(Ordering::SeqCst), 0);
    for &irq in GDMA_IRQS.iter() {
        assert!(bench.irq.vectors().is_installed(irq));
    }

    assert_eq!(holder.join().unwrap(), Ok(()));
    assert_eq!(dma.channel_state(0), ChanState::Configured);
    assert_eq!(bench.gdma.deinit(&dma), Ok(()));
    assert!(!bench.hw.is_allocated(0));
}

#[test]
#[should_panic(expected = "has no channel")]
fn unknown_channel_panics() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    dma.channel_state(GDMA_IRQS.len());
}

#[test]
fn handler_runs_once_per_completion() {
    let bench = Bench::new(gdma_config(POOL));
    let dma = bench.gdma.init(0).unwrap();
    let src = DmaBuf::filled(3);
    let mut dst = DmaBuf::filled(0);
    let txs = copies(&src, &mut dst, 1, 64);
    let fired = Arc::new(AtomicBool::new(false));
    let f = fired.clone();
    let handler: Arc<dyn ChanEventHandler> = Arc::new(move |chan: ChanId| {
        assert_eq!(chan, 0);
        assert!(!f.swap(true, Ordering::SeqCst), "completion reported twice");
    });
    dma.setup_channel(
        0,
        &GdmaRequest {
            transactions: &txs,
            done_handler: Some(handler),
        },
        WAIT,
    )
    .unwrap();
    dma.start_channel(0, WAIT).unwrap();
    bench.hw.complete(0);
    bench.deliver(GDMA_IRQS[0]);
    // a stray interrupt with nothing latched
    bench.deliver(GDMA_IRQS[0]);
    assert!(fired.load(Ordering::SeqCst));
}
