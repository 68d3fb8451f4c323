// src/progress.rs

//! Background progress ticker
//!
//! Workers bump atomic counters in a shared `Progress`; one ticker thread
//! wakes on an interval (or when notified) and redraws from them. The
//! condition variable only serves prompt shutdown and wakeups, no data
//! travels through it.

use std::io::{IsTerminal, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Default redraw interval
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Counters shared between a worker and the ticker
#[derive(Debug, Default)]
pub struct Progress {
    current: AtomicU64,
    total: AtomicU64,
}

impl Progress {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn advance(&self, amount: u64) {
        self.current.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.current.store(0, Ordering::Relaxed);
        self.total.store(0, Ordering::Relaxed);
    }

    /// `(current, total)`; total is 0 when unknown
    pub fn snapshot(&self) -> (u64, u64) {
        (
            self.current.load(Ordering::Relaxed),
            self.total.load(Ordering::Relaxed),
        )
    }
}

struct Shared {
    stop: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

/// Owns the ticker thread; dropping it stops and joins the thread
pub struct ProgressTicker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressTicker {
    /// Start a thread calling `render(current, total)` every `interval`
    pub fn spawn<R>(progress: Arc<Progress>, interval: Duration, mut render: R) -> Self
    where
        R: FnMut(u64, u64) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            stop: AtomicBool::new(false),
            lock: Mutex::new(()),
            wake: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let handle = thread::spawn(move || {
            loop {
                let (current, total) = progress.snapshot();
                render(current, total);

                let Ok(guard) = worker.lock.lock() else {
                    break;
                };
                if worker.stop.load(Ordering::Acquire) {
                    break;
                }
                if worker.wake.wait_timeout(guard, interval).is_err() {
                    break;
                }
                if worker.stop.load(Ordering::Acquire) {
                    break;
                }
            }
            // Final frame so the last state is always drawn
            let (current, total) = progress.snapshot();
            render(current, total);
        });

        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Ticker that draws a bar on stderr, or nothing when stderr is not a terminal
    pub fn stderr(progress: Arc<Progress>, label: &str) -> Option<Self> {
        if !std::io::stderr().is_terminal() {
            return None;
        }
        let label = label.to_string();
        Some(Self::spawn(progress, TICK_INTERVAL, move |current, total| {
            let mut err = std::io::stderr().lock();
            let _ = write!(err, "\r{} {}", label, render_bar(current, total, 24));
            let _ = err.flush();
        }))
    }

    /// Redraw now instead of waiting for the interval
    pub fn notify(&self) {
        self.shared.wake.notify_one();
    }

    /// Signal shutdown and wait for the thread
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Ok(_guard) = self.shared.lock.lock() {
            self.shared.stop.store(true, Ordering::Release);
            self.shared.wake.notify_all();
        } else {
            self.shared.stop.store(true, Ordering::Release);
        }

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                debug!("Progress ticker thread panicked");
            }
        }
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Bar of `width` cells plus percentage, or a byte count when total is unknown
pub fn render_bar(current: u64, total: u64, width: usize) -> String {
    if total == 0 {
        return format!("{} bytes", current);
    }
    let ratio = (current as f64 / total as f64).min(1.0);
    let filled = (ratio * width as f64).round() as usize;
    let empty = width.saturating_sub(filled);
    format!(
        "{}{} {:>3}%",
        "▓".repeat(filled),
        "░".repeat(empty),
        (ratio * 100.0).round() as u64
    )
}
