use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::{Duration, Instant};

use scheduler::{Clock, RuntimeClock, Scheduler};
use tracing_test::traced_test;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    Poll,
    Report,
}

/// Virtual time: idling advances the clock, and shutdown comes after a fixed number of idles.
#[derive(Clone)]
struct ManualClock {
    now: Rc<Cell<Instant>>,
    idles_left: Rc<Cell<usize>>,
    idled: Rc<RefCell<Vec<Duration>>>,
}

impl ManualClock {
    fn new(idles: usize) -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
            idles_left: Rc::new(Cell::new(idles)),
            idled: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn advance(&self, duration: Duration) {
        self.now.set(self.now.get() + duration);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }

    fn idle(&mut self, duration: Duration) -> bool {
        self.idled.borrow_mut().push(duration);
        if self.idles_left.get() == 0 {
            return false;
        }
        self.idles_left.set(self.idles_left.get() - 1);
        self.advance(duration);
        true
    }
}

#[test]
fn tasks_fire_at_start_then_every_interval() {
    let mut scheduler = Scheduler::new();
    scheduler
        .every(Job::Poll, Duration::from_secs(2))
        .every(Job::Report, Duration::from_secs(5));
    let start = Instant::now();

    assert_eq!(scheduler.due(start), vec![Job::Poll, Job::Report]);
    assert!(scheduler.due(start + Duration::from_millis(1_999)).is_empty());
    assert_eq!(scheduler.due(start + Duration::from_secs(2)), vec![Job::Poll]);
    assert_eq!(scheduler.due(start + Duration::from_secs(4)), vec![Job::Poll]);
    assert_eq!(
        scheduler.due(start + Duration::from_secs(5)),
        vec![Job::Report]
    );
    assert_eq!(
        scheduler.next_deadline(),
        Some(start + Duration::from_secs(6))
    );
}

#[test]
fn overrun_skips_missed_ticks() {
    let mut scheduler = Scheduler::new();
    scheduler.every(Job::Poll, Duration::from_secs(2));
    let start = Instant::now();

    scheduler.due(start);
    let late = start + Duration::from_secs(7);
    assert_eq!(scheduler.due(late), vec![Job::Poll]);
    assert!(scheduler.due(late + Duration::from_secs(1)).is_empty());
    assert_eq!(scheduler.next_deadline(), Some(late + Duration::from_secs(2)));
}

#[test]
fn run_calls_handler_and_stops_on_shutdown() {
    let mut scheduler = Scheduler::new();
    scheduler
        .every(Job::Poll, Duration::from_secs(2))
        .every(Job::Report, Duration::from_secs(3));
    let mut clock = ManualClock::new(3);
    let calls = RefCell::new(Vec::new());

    scheduler.run(&mut clock, |job| calls.borrow_mut().push(*job));

    // t=0 both, t=2 poll, t=3 report, t=4 poll
    assert_eq!(
        calls.into_inner(),
        vec![Job::Poll, Job::Report, Job::Poll, Job::Report, Job::Poll]
    );
    assert_eq!(
        *clock.idled.borrow(),
        vec![
            Duration::from_secs(2),
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(2)
        ]
    );
}

#[test]
fn slow_task_delays_next_tick_without_burst() {
    let mut scheduler = Scheduler::new();
    scheduler.every(Job::Poll, Duration::from_secs(2));
    let mut clock = ManualClock::new(2);
    let slow = clock.clone();
    let mut count = 0;

    scheduler.run(&mut clock, |_| {
        count += 1;
        slow.advance(Duration::from_secs(5));
    });

    assert_eq!(count, 3);
    assert_eq!(
        *clock.idled.borrow(),
        vec![Duration::ZERO, Duration::ZERO, Duration::ZERO]
    );
}

#[test]
fn runtime_clock_stops_when_shutdown_completes() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let mut clock = RuntimeClock::with_shutdown(Rc::new(runtime), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
    });

    assert!(clock.idle(Duration::from_millis(1)));
    assert!(!clock.idle(Duration::from_secs(5)));
    assert!(!clock.idle(Duration::from_millis(1)));
}

#[test]
#[traced_test]
fn empty_scheduler_idles_until_shutdown() {
    let mut scheduler: Scheduler<Job> = Scheduler::default();
    let mut clock = ManualClock::new(1);
    let mut calls = 0;

    scheduler.run(&mut clock, |_| calls += 1);

    assert_eq!(calls, 0);
    assert_eq!(
        *clock.idled.borrow(),
        vec![Duration::from_secs(1), Duration::from_secs(1)]
    );
    assert!(logs_contain("scheduler stopped"));
}
