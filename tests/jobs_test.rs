//! Compile job concurrency tests
//!
//! A gated worker holds every job open until the test releases it, so the tests can pile up
//! concurrent requests against a job that is known to be running.

mod common;

use common::{QuizTree, OSPF_QUIZ};
use mantra_core::{
    codec::{CompileContext, DocumentCompiler},
    index::{TestId, TestIndexEntry, TestStatus, LOG_NAME},
    jobs::{CompileRequest, CompileWorker, JobState},
    service::Mantra,
    MantraError,
};
use parking_lot::{Condvar, Mutex};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Barrier,
    },
    thread,
    time::Duration,
};
use test_log::test;

/// Runs the real compiler once the gate opens.
#[derive(Default)]
struct GatedCompiler {
    open: Mutex<bool>,
    opened: Condvar,
    runs: AtomicUsize,
}

impl GatedCompiler {
    fn release(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }
}

impl CompileWorker for GatedCompiler {
    fn compile(
        &self,
        ctx: &CompileContext,
        entry: &TestIndexEntry,
    ) -> Result<TestIndexEntry, MantraError> {
        {
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
        }
        self.runs.fetch_add(1, Ordering::SeqCst);
        DocumentCompiler.compile_document(ctx, entry)
    }
}

fn gated_service(tree: &QuizTree) -> (Arc<Mantra>, Arc<GatedCompiler>) {
    let worker = Arc::new(GatedCompiler::default());
    let mantra = Mantra::with_worker(tree.config.clone(), worker.clone()).unwrap();
    (Arc::new(mantra), worker)
}

#[test]
fn simultaneous_requests_share_one_job() {
    let tree = QuizTree::new(&[("net/ospf.md", OSPF_QUIZ)]);
    let (mantra, worker) = gated_service(&tree);
    let test_id = TestId::derive("ospf.md", "net");
    mantra.sync().unwrap();

    const CALLERS: usize = 16;
    let barrier = Arc::new(Barrier::new(CALLERS));
    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let mantra = mantra.clone();
            let barrier = barrier.clone();
            let test_id = test_id.clone();
            thread::spawn(move || {
                barrier.wait();
                mantra.request_compile(&test_id).unwrap()
            })
        })
        .collect();
    let requests: Vec<CompileRequest> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let started = requests
        .iter()
        .filter(|r| matches!(r, CompileRequest::Started(_)))
        .count();
    assert_eq!(started, 1);
    assert_eq!(requests.len() - started, CALLERS - 1);

    let dst_dir = mantra.entry(&test_id).unwrap().dst_dir;
    let logs = std::fs::read_dir(&dst_dir)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name() == LOG_NAME)
        .count();
    assert_eq!(logs, 1);
    let report = mantra.query_status(&test_id).unwrap();
    assert!(report.running);
    assert!(report.state == JobState::Starting || report.state == JobState::Running);

    worker.release();
    assert!(mantra.wait(&test_id, Duration::from_secs(30)));
    assert_eq!(worker.runs.load(Ordering::SeqCst), 1);

    let report = mantra.query_status(&test_id).unwrap();
    assert_eq!(report.state, JobState::Done);
    assert!(!report.running);
    assert_eq!(report.status, Some(TestStatus::Playable));
    assert!(!dst_dir.join(LOG_NAME).exists());
}

#[test]
fn second_request_joins_and_observes_completion() {
    let tree = QuizTree::new(&[("net/ospf.md", OSPF_QUIZ)]);
    let (mantra, worker) = gated_service(&tree);
    let test_id = TestId::derive("ospf.md", "net");

    let first = mantra.request_compile(&test_id).unwrap();
    let second = mantra.request_compile(&test_id).unwrap();
    assert_eq!(first, CompileRequest::Started(test_id.clone()));
    assert_eq!(second, CompileRequest::Joined(test_id.clone()));

    let log = mantra.entry(&test_id).unwrap().dst_dir.join(LOG_NAME);
    assert!(log.exists());
    // the job log already carries the start banner while the worker waits
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    while !std::fs::read_to_string(&log)
        .unwrap_or_default()
        .contains("Compile target")
    {
        assert!(std::time::Instant::now() < deadline);
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!mantra.wait(&test_id, Duration::from_millis(50)));

    worker.release();
    assert!(mantra.wait(&test_id, Duration::from_secs(30)));
    assert!(!mantra.query_status(&test_id).unwrap().running);
}

#[test]
fn different_tests_compile_concurrently() {
    let tree = QuizTree::new(&[
        ("net/ospf.md", OSPF_QUIZ),
        ("net/bgp.md", OSPF_QUIZ),
        ("os/sched.md", OSPF_QUIZ),
    ]);
    let (mantra, worker) = gated_service(&tree);
    let ids: Vec<TestId> = mantra.sync().unwrap().iter().map(|e| e.test_id.clone()).collect();
    for id in &ids {
        assert!(matches!(
            mantra.request_compile(id).unwrap(),
            CompileRequest::Started(_)
        ));
    }
    for id in &ids {
        assert!(mantra.query_status(id).unwrap().running);
    }
    worker.release();
    for id in &ids {
        assert!(mantra.wait(id, Duration::from_secs(30)));
    }
    assert_eq!(worker.runs.load(Ordering::SeqCst), 3);
    assert_eq!(
        mantra.sync().unwrap().with_status(TestStatus::Playable).count(),
        3
    );
}
