//! Collection worker.
//!
//! A [`Collector`] owns one [`CounterSource`] on a dedicated thread. Callers on any
//! thread send a request with a reply channel and block until the worker answers,
//! so the native query is only ever touched by one thread and requests are served
//! in the order they were sent.
//!
//! ```text
//!  caller ──┐
//!  caller ──┼──► mpsc::Sender<Request> ──► worker thread ──► CounterSource
//!  caller ──┘        (read lock)               │
//!     ▲                                        │
//!     └──────────── reply channel ◄────────────┘
//! ```

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::collector::error::{BindError, BindReport, CollectError};
use crate::collector::pdh::{Session, SessionOptions};
use crate::collector::perflib::PerflibCollector;
use crate::collector::query::QuerySpec;
use crate::collector::traits::{PdhApi, PerfDataSource};
use crate::model::CounterValues;

/// Something that produces one set of counter values per cycle.
pub trait CounterSource: Send {
    /// Name used in logs and the worker thread name.
    fn name(&self) -> &str;

    fn collect(&mut self) -> Result<CounterValues, CollectError>;

    /// Drops transient state after a faulted cycle.
    fn reset(&mut self);

    /// Releases native resources. Called once when the worker stops.
    fn close(&mut self);
}

type Reply = Result<CounterValues, CollectError>;

struct Request {
    reply: Sender<Reply>,
}

struct WorkerHandle {
    requests: Sender<Request>,
    closed: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Thread-safe handle to a collection worker.
pub struct Collector {
    name: String,
    worker: RwLock<Option<WorkerHandle>>,
}

impl Collector {
    /// Moves `source` onto a new worker thread.
    pub fn spawn<S: CounterSource + 'static>(source: S) -> io::Result<Self> {
        let name = source.name().to_string();
        let (requests, inbox) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));

        let thread = thread::Builder::new()
            .name(format!("collector-{}", name))
            .spawn({
                let closed = Arc::clone(&closed);
                move || run(source, inbox, closed)
            })?;

        debug!(name = %name, "collection worker started");
        Ok(Self {
            name,
            worker: RwLock::new(Some(WorkerHandle {
                requests,
                closed,
                thread,
            })),
        })
    }

    /// Binds `spec` against the live query API and starts a worker for it.
    pub fn bind<P: PdhApi + 'static>(
        api: P,
        spec: &QuerySpec,
        options: &SessionOptions,
    ) -> Result<BindReport<Self>, BindError> {
        let (session, failures) = Session::bind(api, spec, options)?.into_parts();
        let collector = Self::spawn(session).map_err(BindError::Spawn)?;
        Ok(BindReport {
            value: collector,
            failures,
        })
    }

    /// Starts a worker reading `spec` from raw performance data.
    pub fn perflib<S: PerfDataSource + 'static>(source: S, spec: QuerySpec) -> io::Result<Self> {
        Self::spawn(PerflibCollector::new(source, spec))
    }

    /// Binds `spec` against `pdh.dll`.
    #[cfg(windows)]
    pub fn open(spec: &QuerySpec, options: &SessionOptions) -> Result<BindReport<Self>, BindError> {
        Self::bind(crate::collector::pdh::NativePdh::new(), spec, options)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.worker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Runs one collection cycle on the worker and waits for its result.
    pub fn collect(&self) -> Result<CounterValues, CollectError> {
        let (reply, response) = mpsc::channel();
        {
            let worker = self.worker.read().unwrap_or_else(PoisonError::into_inner);
            let worker = worker.as_ref().ok_or(CollectError::NotInitialized)?;
            worker
                .requests
                .send(Request { reply })
                .map_err(|_| CollectError::NotInitialized)?;
        }
        response.recv().unwrap_or(Err(CollectError::NotInitialized))
    }

    /// Like [`collect`](Self::collect), replacing `dest` only on success.
    pub fn collect_into(&self, dest: &mut CounterValues) -> Result<(), CollectError> {
        *dest = self.collect()?;
        Ok(())
    }

    /// Stops the worker and closes the source.
    ///
    /// Requests still queued, and the one in flight, complete with
    /// `NotInitialized`. Waits for an in-flight native call to return.
    pub fn close(&self) {
        let handle = {
            let mut worker = self.worker.write().unwrap_or_else(PoisonError::into_inner);
            let handle = worker.take();
            if let Some(handle) = &handle {
                handle.closed.store(true, Ordering::SeqCst);
            }
            handle
        };

        let Some(WorkerHandle {
            requests, thread, ..
        }) = handle
        else {
            return;
        };
        drop(requests);
        if thread.join().is_err() {
            warn!(name = %self.name, "collection worker panicked during shutdown");
        }
        info!(name = %self.name, "collector closed");
    }
}

impl Drop for Collector {
    fn drop(&mut self) {
        self.close();
    }
}

fn run<S: CounterSource>(mut source: S, inbox: Receiver<Request>, closed: Arc<AtomicBool>) {
    let name = source.name().to_string();

    while let Ok(request) = inbox.recv() {
        if closed.load(Ordering::SeqCst) {
            let _ = request.reply.send(Err(CollectError::NotInitialized));
            continue;
        }

        let result = match panic::catch_unwind(AssertUnwindSafe(|| source.collect())) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(name = %name, message = %message, "collection cycle faulted, resetting");
                source.reset();
                Err(CollectError::WorkerFault(message))
            }
        };

        let result = if closed.load(Ordering::SeqCst) {
            Err(CollectError::NotInitialized)
        } else {
            result
        };
        if request.reply.send(result).is_err() {
            debug!(name = %name, "caller dropped before reply");
        }
    }

    source.close();
    debug!(name = %name, "collection worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::counter_types::PERF_COUNTER_COUNTER;
    use crate::collector::mock::{MockCounter, MockItem, MockPdh, MockPerfData};
    use crate::collector::query::CounterSpec;
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn options() -> SessionOptions {
        SessionOptions::default().os_build(19045)
    }

    fn counting_mock() -> MockPdh {
        let pdh = MockPdh::new();
        pdh.add_counter(
            "\\System\\Context Switches/sec",
            MockCounter::new(PERF_COUNTER_COUNTER).item(MockItem::new("", 0).step(1)),
        );
        pdh
    }

    fn counting_spec() -> QuerySpec {
        QuerySpec::new("System").counter(CounterSpec::new("Context Switches/sec"))
    }

    fn switches(values: &CounterValues) -> f64 {
        values["------"]["Context Switches/sec"].first
    }

    #[test]
    fn test_collect_through_worker() {
        let pdh = counting_mock();
        let collector = Collector::bind(pdh.clone(), &counting_spec(), &options())
            .unwrap()
            .value;

        assert_eq!(switches(&collector.collect().unwrap()), 2.0);
        assert_eq!(switches(&collector.collect().unwrap()), 3.0);
        assert_eq!(collector.name(), "System");
    }

    #[test]
    fn test_concurrent_collects_are_serialized() {
        let pdh = counting_mock();
        pdh.collect_delay(Duration::from_millis(5));
        let collector = Arc::new(
            Collector::bind(pdh.clone(), &counting_spec(), &options())
                .unwrap()
                .value,
        );

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || switches(&collector.collect().unwrap()) as i64)
            })
            .collect();
        let seen: BTreeSet<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(seen, (2..=9).collect::<BTreeSet<_>>());
        assert_eq!(pdh.max_concurrency(), 1);
        assert_eq!(pdh.collect_calls(), 9);
    }

    #[test]
    fn test_fault_completes_request_and_worker_recovers() {
        let pdh = counting_mock();
        let collector = Collector::bind(pdh.clone(), &counting_spec(), &options())
            .unwrap()
            .value;

        pdh.panic_on_next_collect();
        match collector.collect() {
            Err(CollectError::WorkerFault(message)) => {
                assert!(message.contains("injected"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(collector.collect().is_ok());
    }

    #[test]
    fn test_close_during_collect_returns_not_initialized() {
        let pdh = counting_mock();
        let collector = Arc::new(
            Collector::bind(pdh.clone(), &counting_spec(), &options())
                .unwrap()
                .value,
        );

        let gate = pdh.hold_next_collect();
        let pending = {
            let collector = Arc::clone(&collector);
            thread::spawn(move || collector.collect())
        };
        gate.wait_entered();

        let closing = {
            let collector = Arc::clone(&collector);
            thread::spawn(move || collector.close())
        };
        while collector.is_open() {
            thread::sleep(Duration::from_millis(1));
        }
        gate.release();

        assert!(matches!(
            pending.join().unwrap(),
            Err(CollectError::NotInitialized)
        ));
        closing.join().unwrap();
        assert_eq!(pdh.open_queries(), 0);
    }

    #[test]
    fn test_collect_after_close() {
        let pdh = counting_mock();
        let collector = Collector::bind(pdh.clone(), &counting_spec(), &options())
            .unwrap()
            .value;
        collector.close();
        collector.close();

        assert!(matches!(
            collector.collect(),
            Err(CollectError::NotInitialized)
        ));
        assert_eq!(pdh.open_queries(), 0);
    }

    #[test]
    fn test_collect_into_replaces_destination() {
        let collector = Collector::bind(counting_mock(), &counting_spec(), &options())
            .unwrap()
            .value;
        let mut values = CounterValues::new();
        values.insert("stale".to_string(), Default::default());

        collector.collect_into(&mut values).unwrap();
        assert!(!values.contains_key("stale"));
        assert_eq!(switches(&values), 2.0);
    }

    #[test]
    fn test_bind_failure_spawns_nothing() {
        let result = Collector::bind(MockPdh::new(), &counting_spec(), &options());
        assert!(matches!(result, Err(BindError::NoCounters { .. })));
    }

    #[test]
    fn test_perflib_through_worker() {
        let spec = QuerySpec::new("Memory").counter(CounterSpec::new("Available Bytes"));
        let collector = Collector::spawn(
            PerflibCollector::new(MockPerfData::typical_system(), spec)
                .with_name_tables(Arc::new(crate::collector::perflib::NameTables::new())),
        )
        .unwrap();

        let values = collector.collect().unwrap();
        assert_eq!(values["------"]["Available Bytes"].first, (6u64 << 30) as f64);
    }
}
