//! Single-shot coalescing flush timer.
//!
//! # Purpose
//! Bounds how long pipelined requests may sit in the sender's buffered
//! writer: each non-flush submission arms the timer, and when it fires the
//! sender injects a synthetic `Flush`.
//!
//! # Design notes
//! `set` while armed is a no-op, so a burst of submissions produces at most
//! one fire per armed interval. Fires are delivered on a capacity-1 channel
//! with `try_send`; an unconsumed fire absorbs later ones. Dropping the
//! handle stops the timer task.
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

pub(crate) struct FlushTimer {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

enum Command {
    Set,
    Unset,
}

impl FlushTimer {
    /// Spawn the timer task. The returned receiver yields one unit per fire.
    pub(crate) fn spawn(interval: Duration) -> (Self, mpsc::Receiver<()>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (fire_tx, fire_rx) = mpsc::channel(1);
        tokio::spawn(run_timer(interval, cmd_rx, fire_tx));
        (Self { cmd_tx }, fire_rx)
    }

    /// Arm the timer; no-op while already armed.
    pub(crate) fn set(&self) {
        let _ = self.cmd_tx.send(Command::Set);
    }

    /// Cancel an armed fire; a later `set` re-arms.
    pub(crate) fn unset(&self) {
        let _ = self.cmd_tx.send(Command::Unset);
    }
}

async fn run_timer(
    interval: Duration,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    fire_tx: mpsc::Sender<()>,
) {
    let mut deadline: Option<Instant> = None;
    loop {
        match deadline {
            Some(at) => tokio::select! {
                command = cmd_rx.recv() => match command {
                    // Already armed; coalesce.
                    Some(Command::Set) => {}
                    Some(Command::Unset) => deadline = None,
                    None => return,
                },
                _ = sleep_until(at) => {
                    // Capacity-1 channel: an unconsumed fire absorbs this one.
                    let _ = fire_tx.try_send(());
                    deadline = None;
                }
            },
            None => match cmd_rx.recv().await {
                Some(Command::Set) => deadline = Some(Instant::now() + interval),
                Some(Command::Unset) => {}
                None => return,
            },
        }
    }
}
