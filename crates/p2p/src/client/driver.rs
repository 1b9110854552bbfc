//! Heartbeat driver for the pool.
//!
//! Ticks quickly while the pool reports outstanding work and idles otherwise,
//! waking early when something changes.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{Notify, mpsc, oneshot},
    task::JoinHandle,
    time::sleep,
};
use tracing::{debug, trace};

use crate::client::pool::{Command, PoolStatus};

/// Background task posting [`Command::Heartbeat`] to the pool.
#[derive(Debug)]
pub struct StateMachine {
    notify: Arc<Notify>,
    task: JoinHandle<()>,
}

impl StateMachine {
    pub(crate) fn spawn(
        commands: mpsc::UnboundedSender<Command>,
        status: Arc<PoolStatus>,
        notify: Arc<Notify>,
        heartbeat_interval: Duration,
        idle_interval: Duration,
    ) -> Self {
        let task = tokio::spawn(drive(
            commands,
            status,
            notify.clone(),
            heartbeat_interval,
            idle_interval,
        ));
        Self { notify, task }
    }

    /// Wakes the driver if it is idling.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    /// Whether the driver task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the driver.
    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for StateMachine {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn drive(
    commands: mpsc::UnboundedSender<Command>,
    status: Arc<PoolStatus>,
    notify: Arc<Notify>,
    heartbeat_interval: Duration,
    idle_interval: Duration,
) {
    while status.is_running() {
        let (reply, more) = oneshot::channel();
        if commands.send(Command::Heartbeat { reply }).is_err() {
            break;
        }
        let more = more.await.unwrap_or(false);
        if !status.is_running() {
            break;
        }

        if more {
            trace!("More work pending, next tick in {:?}", heartbeat_interval);
            sleep(heartbeat_interval).await;
        } else {
            tokio::select! {
                _ = notify.notified() => trace!("Driver triggered"),
                _ = sleep(idle_interval) => {}
            }
        }
    }
    debug!("State machine driver stopped");
}
