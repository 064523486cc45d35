//! First-come-first-served task coordinator
//!
//! The coordinator keeps the local table fresh from the feed, claims at most
//! one available task at a time, and gives a task up as soon as a table
//! snapshot shows another drone owning it. Claim authority lies with the
//! external arbiter: a claim is just an assertion on the feed, and the next
//! snapshot says whether it stuck.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use dispatch_protocol::{ClaimAssertion, ClaimState, Task, TaskTable};

use crate::collab::TaskFeed;
use crate::error::DispatchError;
use crate::executor::{RunOutcome, StepExecutor};
use crate::log::EventLog;
use crate::plan::StepPlanner;
use crate::step::Step;
use crate::table::SharedTaskTable;

#[derive(Debug, Default)]
struct ClaimBook {
    current: BTreeSet<String>,
    finished: BTreeSet<String>,
    scanning: bool,
    /// Task that starts and follows the executor for the held claim or the
    /// safe landing. At most one is live.
    driver: Option<JoinHandle<()>>,
}

/// Clears the scanning flag however the scan ends.
struct ScanGuard<'a>(&'a Mutex<ClaimBook>);

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut book) = self.0.lock() {
            book.scanning = false;
        }
    }
}

/// Claims tasks for one drone and drives its executor.
pub struct TaskCoordinator {
    drone_id: String,
    table: Arc<SharedTaskTable>,
    feed: Arc<dyn TaskFeed>,
    executor: Arc<StepExecutor>,
    planner: Arc<dyn StepPlanner>,
    log: Arc<dyn EventLog>,
    book: Mutex<ClaimBook>,
}

impl TaskCoordinator {
    pub fn new(
        drone_id: impl Into<String>,
        table: Arc<SharedTaskTable>,
        feed: Arc<dyn TaskFeed>,
        executor: Arc<StepExecutor>,
        planner: Arc<dyn StepPlanner>,
        log: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            drone_id: drone_id.into(),
            table,
            feed,
            executor,
            planner,
            log,
            book: Mutex::new(ClaimBook::default()),
        }
    }

    pub fn drone_id(&self) -> &str {
        &self.drone_id
    }

    pub fn table(&self) -> &Arc<SharedTaskTable> {
        &self.table
    }

    pub fn executor(&self) -> &Arc<StepExecutor> {
        &self.executor
    }

    fn book(&self) -> MutexGuard<'_, ClaimBook> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Ids this drone believes it owns.
    pub fn current_tasks(&self) -> BTreeSet<String> {
        self.book().current.clone()
    }

    /// Ids this drone has completed.
    pub fn finished_tasks(&self) -> BTreeSet<String> {
        self.book().finished.clone()
    }

    /// Start the feed pumps and the reconciliation loop.
    pub fn spawn(self: &Arc<Self>) -> CoordinatorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task_lists = {
            let coordinator = Arc::clone(self);
            let mut lists = self.feed.subscribe_task_lists();
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        received = lists.recv() => match received {
                            Ok(tasks) => {
                                coordinator.table.merge(&tasks);
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                debug!(skipped, "task list pump lagged");
                            }
                            Err(RecvError::Closed) => break,
                        },
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };

        let tables = {
            let coordinator = Arc::clone(self);
            let mut tables = self.feed.subscribe_tables();
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        received = tables.recv() => match received {
                            Ok(table) => {
                                coordinator.table.apply_remote(table);
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                debug!(skipped, "table pump lagged");
                            }
                            Err(RecvError::Closed) => break,
                        },
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };

        let reconcile = {
            let coordinator = Arc::clone(self);
            let mut snapshots = self.table.observe();
            let mut shutdown = shutdown_rx;
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        snapshot = snapshots.next() => match snapshot {
                            Some(table) => {
                                coordinator.check_responsibility(&table);
                            }
                            None => break,
                        },
                        _ = shutdown.changed() => break,
                    }
                }
            })
        };

        CoordinatorHandle {
            shutdown_tx,
            tasks: vec![task_lists, tables, reconcile],
        }
    }

    /// Wait for an available task and claim it if this drone has none.
    ///
    /// A scan started while another scan is pending, or while a task is
    /// held, does nothing. Returns the claimed id.
    pub async fn scan_for_task(self: &Arc<Self>) -> Option<String> {
        {
            let mut book = self.book();
            if book.scanning || !book.current.is_empty() {
                debug!(drone = %self.drone_id, "scan skipped");
                return None;
            }
            book.scanning = true;
        }
        let _guard = ScanGuard(&self.book);
        self.log.add("Starting scan");

        let table = self
            .table
            .observe()
            .first_matching(|table| self.first_claimable(table).is_some())
            .await?;

        let task_id = {
            let book = self.book();
            if !book.current.is_empty() {
                return None;
            }
            drop(book);
            self.first_claimable(&table)?
        };

        self.claim_task(&task_id);
        Some(task_id)
    }

    fn first_claimable(&self, table: &TaskTable) -> Option<String> {
        let book = self.book();
        table
            .available_ids()
            .find(|id| !book.finished.contains(*id))
            .map(str::to_string)
    }

    /// Assert a claim on `task_id` and start flying it.
    pub fn claim_task(self: &Arc<Self>, task_id: &str) {
        self.log.add(&format!("Claim task, task_id: {}", task_id));

        self.feed
            .publish_claim(ClaimAssertion::claim(task_id, &self.drone_id));
        self.book().current.insert(task_id.to_string());

        let task = self
            .table
            .task(task_id)
            .unwrap_or_else(|| Task::new(task_id));
        let steps = self.planner.plan(&task);

        self.executor.stop_and_clear_task();
        self.executor.add_all(steps);

        let coordinator = Arc::clone(self);
        let task_id = task_id.to_string();
        // Any previous driver has finished its run or is the caller.
        let mut book = self.book();
        book.driver = Some(tokio::spawn(async move {
            let ticket = match coordinator.executor.start_task().await {
                Ok(ticket) => ticket,
                Err(e) => {
                    coordinator.release_task(&task_id, &e).await;
                    return;
                }
            };
            if ticket.finished().await == RunOutcome::Completed {
                coordinator.finish_task(&task_id).await;
            }
        }));
    }

    /// Give back a claim whose sequence could not be started, then look for
    /// work again after one ready-retry delay.
    async fn release_task(self: &Arc<Self>, task_id: &str, error: &DispatchError) {
        self.log
            .add(&format!("Could not start task {}: {}", task_id, error));
        if !self.book().current.remove(task_id) {
            return;
        }
        self.log.add(&format!("Releasing task {}", task_id));
        self.feed
            .publish_claim(ClaimAssertion::release(task_id, &self.drone_id));

        tokio::time::sleep(self.executor.config().ready_retry.delay_for(0)).await;
        self.scan_for_task().await;
    }

    async fn finish_task(self: &Arc<Self>, task_id: &str) {
        {
            let mut book = self.book();
            if !book.current.remove(task_id) {
                return;
            }
            book.finished.insert(task_id.to_string());
        }
        self.log.add(&format!("Finished task {}", task_id));
        self.feed
            .publish_claim(ClaimAssertion::finish(task_id, &self.drone_id));
        self.scan_for_task().await;
    }

    /// Drop every held task that the table now assigns to another drone.
    ///
    /// Tasks missing from the table, available, or attributed to this drone
    /// are kept. Returns the abandoned ids.
    pub fn check_responsibility(self: &Arc<Self>, table: &TaskTable) -> Vec<String> {
        let abandoned: Vec<(String, Option<String>)> = {
            let mut book = self.book();
            let lost: Vec<(String, Option<String>)> = book
                .current
                .iter()
                .filter_map(|id| {
                    let claim = table.get(id)?;
                    if claim.state == ClaimState::Available || claim.is_held_by(&self.drone_id) {
                        return None;
                    }
                    Some((id.clone(), claim.drone_id.clone()))
                })
                .collect();
            for (id, _) in &lost {
                book.current.remove(id);
            }
            lost
        };

        for (task_id, owner) in &abandoned {
            self.log.add(&format!(
                "Giving up task {} to drone {}",
                task_id,
                owner.as_deref().unwrap_or("unknown")
            ));
            self.abandon();
        }

        abandoned.into_iter().map(|(id, _)| id).collect()
    }

    /// Stop the current sequence, land, then look for new work.
    fn abandon(self: &Arc<Self>) {
        if let Some(driver) = self.book().driver.take() {
            driver.abort();
        }
        self.executor.stop_and_clear_task();
        self.executor.add(Step::land());

        let coordinator = Arc::clone(self);
        let mut book = self.book();
        book.driver = Some(tokio::spawn(async move {
            match coordinator.executor.start_task().await {
                Ok(ticket) => {
                    ticket.finished().await;
                }
                Err(e) => coordinator
                    .log
                    .add(&format!("Could not start safe landing: {}", e)),
            }
            coordinator.scan_for_task().await;
        }));
    }
}

/// Running coordinator loops.
pub struct CoordinatorHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl CoordinatorHandle {
    /// Stop the loops and wait for them to exit.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
    }
}

impl Drop for CoordinatorHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
