use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Interval between detail panel extrapolation ticks.
pub const TICK_PERIOD: Duration = Duration::from_millis(50);

/// Tick notification from a view's timer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickEvent;

/// A view's periodic timer. The owning view holds the handle; dropping it
/// stops the timer thread and joins it, so no tick can fire for a view that
/// has already closed.
pub struct TickerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl TickerHandle {
    pub fn spawn(sender: Sender<TickEvent>) -> Self {
        Self::with_period(sender, TICK_PERIOD)
    }

    pub fn with_period(sender: Sender<TickEvent>, period: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread = std::thread::spawn(move || loop {
            std::thread::sleep(period);
            if thread_stop.load(Ordering::Relaxed) {
                break;
            }
            if sender.send(TickEvent).is_err() {
                // Receiving side hung up; stop ticking.
                break;
            }
        });
        Self {
            stop,
            thread: Some(thread),
        }
    }
}

impl Drop for TickerHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
