//! The wait/interrupt primitive.
//!
//! Blocks the calling thread until at least one buffer is ready or a
//! timeout elapses, using whichever of two strategies the device was
//! opened with: plain polling of the status register, or blocking on a
//! GPIO interrupt-ready line with a cancellation signal able to unwind
//! it from another thread. Only one thread may be inside [`Wait::wait`]
//! at a time; a concurrent caller gets [`Error::Busy`] immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, Once};
use std::time::{Duration, Instant};

use log::debug;
use nix::sys::pthread::{pthread_kill, pthread_self, Pthread};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use crate::error::{Error, Result};
use crate::port::InterruptPort;

/// Signal used to unwind a blocked interrupt-mode wait from another
/// thread. Requires a no-op handler (installed lazily, once per
/// process) so its default disposition doesn't terminate the process
/// when delivered outside of the blocking syscall's signal mask window.
const WAKEUP_SIGNAL: Signal = Signal::SIGUSR1;

/// Stand-in for "no deadline, wait forever," expressed as a long-but-finite
/// duration so it composes with the same timeout arithmetic as every
/// other call. A cancellation always unwinds a wait well before this
/// elapses.
pub const FOREVER: Duration = Duration::from_secs(365 * 24 * 3600);

static WAKEUP_HANDLER_INSTALLED: Once = Once::new();

extern "C" fn noop_handler(_: std::os::raw::c_int) {}

fn ensure_wakeup_handler_installed() {
    WAKEUP_HANDLER_INSTALLED.call_once(|| {
        let action = SigAction::new(
            SigHandler::Handler(noop_handler),
            SaFlags::empty(),
            SigSet::empty(),
        );
        // SAFETY: installs a handler that only returns; no shared state
        // is touched from signal context.
        unsafe {
            let _ = sigaction(WAKEUP_SIGNAL, &action);
        }
    });
}

/// The cancellable wait gate owned by [`crate::device::Device`].
pub struct Wait {
    lock: Mutex<()>,
    cancel: AtomicBool,
    waiting_thread: Mutex<Option<Pthread>>,
    poll_interval: Duration,
}

impl Wait {
    pub fn new(poll_interval: Duration) -> Self {
        Wait {
            lock: Mutex::new(()),
            cancel: AtomicBool::new(false),
            waiting_thread: Mutex::new(None),
            poll_interval,
        }
    }

    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    /// Sets the cancellation flag and, if a thread is currently inside
    /// [`Self::wait`], delivers [`WAKEUP_SIGNAL`] to it so a blocking
    /// syscall unwinds. Safe to call from any thread at any time; a
    /// cancellation that arrives after the wait it targeted has already
    /// returned is harmless; the flag is simply cleared the next time
    /// `wait` is entered.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(tid) = *self.waiting_thread.lock().unwrap() {
            debug!("cancel_wait: signalling waiting thread");
            let _ = pthread_kill(tid, WAKEUP_SIGNAL);
        }
    }

    /// Waits until `status_read` reports a non-empty mask or `timeout`
    /// elapses. `interrupt`, if it holds a `Some`, selects the
    /// GPIO-backed strategy; otherwise the status register is polled at
    /// the configured interval.
    ///
    /// `interrupt` is a lock the caller still owns (e.g.
    /// [`crate::device::Device`]'s own interrupt-port mutex) rather than
    /// an already-acquired guard: this call only ever locks it for the
    /// duration of a single `wait_readable`/`rearm` port call, and always
    /// releases it before invoking `status_read`, so a thread blocked
    /// here never holds both this mutex and whatever lock `status_read`
    /// itself needs at the same time.
    pub fn wait<I: InterruptPort>(
        &self,
        timeout: Duration,
        mut status_read: impl FnMut() -> Result<u8>,
        interrupt: &Mutex<Option<I>>,
    ) -> Result<u8> {
        let _guard = self.lock.try_lock().map_err(|_| Error::Busy)?;
        ensure_wakeup_handler_installed();

        if self.cancel.swap(false, Ordering::SeqCst) {
            return Err(Error::Again);
        }

        *self.waiting_thread.lock().unwrap() = Some(pthread_self());
        let has_interrupt = interrupt.lock().unwrap().is_some();
        let result = if has_interrupt {
            self.wait_interrupt_backed(timeout, &mut status_read, interrupt)
        } else {
            self.wait_poll(timeout, &mut status_read)
        };
        *self.waiting_thread.lock().unwrap() = None;
        result
    }

    fn wait_poll(
        &self,
        timeout: Duration,
        status_read: &mut impl FnMut() -> Result<u8>,
    ) -> Result<u8> {
        let deadline = Instant::now() + timeout;
        loop {
            let mask = status_read()?;
            if mask != 0 {
                return Ok(mask);
            }
            if self.cancel.swap(false, Ordering::SeqCst) {
                return Err(Error::Intr);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            if self.poll_interval.is_zero() {
                std::thread::yield_now();
            } else {
                std::thread::sleep(self.poll_interval.min(deadline - now));
            }
        }
    }

    fn wait_interrupt_backed<I: InterruptPort>(
        &self,
        timeout: Duration,
        status_read: &mut impl FnMut() -> Result<u8>,
        interrupt: &Mutex<Option<I>>,
    ) -> Result<u8> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(0);
            }
            // Locked only for this one port call, and never while
            // `status_read` runs: that is what keeps this mutex and
            // whatever lock `status_read` takes from ever being held
            // by this thread at the same time.
            let readable = {
                let mut guard = interrupt.lock().unwrap();
                let port = guard.as_mut().expect("has_interrupt checked Some on entry");
                port.wait_readable(deadline - now)
            };
            match readable {
                Ok(true) => {
                    {
                        let mut guard = interrupt.lock().unwrap();
                        let port = guard.as_mut().expect("has_interrupt checked Some on entry");
                        port.rearm()?;
                    }
                    return status_read();
                }
                Ok(false) => return Ok(0),
                Err(Error::Intr) => {
                    if self.cancel.swap(false, Ordering::SeqCst) {
                        return Err(Error::Intr);
                    }
                    // Spurious wakeup (some other signal, or a race
                    // between cancel() storing the flag and us
                    // observing it): loop and recompute the remaining
                    // deadline.
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::fake::FakeInterruptPort;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn poll_mode_returns_ready_mask_once_set() {
        let wait = Arc::new(Wait::new(Duration::from_micros(200)));
        let ready = Arc::new(AtomicBool::new(false));

        let w = wait.clone();
        let r = ready.clone();
        let handle = thread::spawn(move || {
            w.wait::<FakeInterruptPort>(
                Duration::from_millis(100),
                || Ok(if r.load(Ordering::SeqCst) { 0x1 } else { 0 }),
                &Mutex::new(None),
            )
        });

        thread::sleep(Duration::from_millis(5));
        ready.store(true, Ordering::SeqCst);
        assert_eq!(handle.join().unwrap().unwrap(), 0x1);
    }

    #[test]
    fn poll_mode_times_out_with_empty_mask() {
        let wait = Wait::new(Duration::from_micros(200));
        let result =
            wait.wait::<FakeInterruptPort>(Duration::from_millis(10), || Ok(0), &Mutex::new(None));
        assert_eq!(result.unwrap(), 0);
    }

    #[test]
    fn cancel_before_wait_returns_again() {
        let wait = Wait::new(Duration::from_micros(200));
        wait.cancel();
        let result = wait.wait::<FakeInterruptPort>(FOREVER, || Ok(0), &Mutex::new(None));
        assert!(matches!(result, Err(Error::Again)));
    }

    #[test]
    fn concurrent_wait_returns_busy() {
        let wait = Arc::new(Wait::new(Duration::from_micros(200)));
        let w = wait.clone();
        let handle =
            thread::spawn(move || w.wait::<FakeInterruptPort>(FOREVER, || Ok(0), &Mutex::new(None)));
        thread::sleep(Duration::from_millis(5));

        let second = wait.wait::<FakeInterruptPort>(
            Duration::from_millis(1),
            || Ok(0),
            &Mutex::new(None),
        );
        assert!(matches!(second, Err(Error::Busy)));

        wait.cancel();
        let _ = handle.join();
    }

    #[test]
    fn interrupt_backed_wait_is_cancellable() {
        let wait = Arc::new(Wait::new(Duration::from_micros(200)));
        let gpio = FakeInterruptPort::new();

        let w = wait.clone();
        let gpio_for_thread = gpio.clone();
        let handle = thread::spawn(move || {
            let interrupt = Mutex::new(Some(gpio_for_thread));
            w.wait(FOREVER, || Ok(0), &interrupt)
        });

        thread::sleep(Duration::from_millis(5));
        gpio.interrupt();
        wait.cancel();

        let result = handle.join().unwrap();
        assert!(matches!(result, Err(Error::Intr)));
    }
}
