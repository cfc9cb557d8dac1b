use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Once, OnceLock, Weak};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::bridge::event_pump::{PumpHandle, RawPadEvent};
use crate::pad::PadInput;

// Buffer for the pump -> dispatch channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Observer for controller attach/detach transitions.
///
/// Registered through [`ControllerInputManager::set_observer`] as a `Weak`
/// reference; the manager never keeps the observer alive, and a dropped
/// observer is silently skipped.
pub trait ControllerObserver: Send + Sync {
    fn controller_connected(&self, manager: &ControllerInputManager);
    fn controller_disconnected(&self, manager: &ControllerInputManager);
}

type PauseHandler = Box<dyn Fn(&ControllerInputManager) + Send + Sync>;

static SHARED: OnceLock<ControllerInputManager> = OnceLock::new();

/// Bridges the platform gamepad API to the emulator's pad-input encoding.
///
/// Process-wide singleton; obtain it through [`ControllerInputManager::shared`].
/// The emulator core polls [`current_input`](Self::current_input) once per
/// frame, while gamepad events arrive asynchronously through the event pump.
/// The polling path reads one atomic plus a watch snapshot and never
/// contends with notification delivery.
pub struct ControllerInputManager {
    connected: AtomicBool,
    swap_ab: AtomicBool,

    // Pause-button latch, so holds and repeats cannot re-fire the handler
    pause_down: AtomicBool,

    // Current NES button snapshot; written only by the dispatch task
    snapshot_tx: watch::Sender<PadInput>,
    snapshot_rx: watch::Receiver<PadInput>,

    observer: Mutex<Option<Weak<dyn ControllerObserver>>>,
    pause_handler: Mutex<Option<PauseHandler>>,

    pump_start: Once,
}

impl ControllerInputManager {
    /// Returns the process-wide instance, constructing it on first access.
    ///
    /// The first call also spawns the gamepad event pump and its dispatch
    /// task, so it must happen inside a tokio runtime. Construction itself
    /// never fails: if the platform backend is unavailable the manager
    /// simply stays disconnected.
    pub fn shared() -> &'static ControllerInputManager {
        let manager = SHARED.get_or_init(ControllerInputManager::new);
        manager.start_event_pump();
        manager
    }

    fn new() -> Self {
        let (snapshot_tx, snapshot_rx) = watch::channel(PadInput::NEUTRAL);
        Self {
            connected: AtomicBool::new(false),
            swap_ab: AtomicBool::new(false),
            pause_down: AtomicBool::new(false),
            snapshot_tx,
            snapshot_rx,
            observer: Mutex::new(None),
            pause_handler: Mutex::new(None),
            pump_start: Once::new(),
        }
    }

    fn start_event_pump(&'static self) {
        self.pump_start.call_once(|| {
            let (event_sender, mut event_receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

            let _pump_handle = match PumpHandle::spawn(None, event_sender) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!("Controller event pump unavailable, staying disconnected: {}", e);
                    return;
                }
            };

            info!("Spawning pad event dispatch task");
            tokio::spawn(async move {
                while let Some(event) = event_receiver.recv().await {
                    self.handle_event(event);
                }
                warn!("Pad event channel closed, dispatch task exiting");
            });
        });
    }

    /// Current pad state in the emulator's native bit layout.
    ///
    /// Returns [`PadInput::NEUTRAL`] while no controller is attached. Sits
    /// on the per-frame hot path.
    pub fn current_input(&self) -> PadInput {
        if !self.connected.load(Ordering::Acquire) {
            return PadInput::NEUTRAL;
        }
        let pad = *self.snapshot_rx.borrow();
        if self.swap_ab.load(Ordering::Relaxed) {
            pad.with_swapped_ab()
        } else {
            pad
        }
    }

    /// Whether a native controller is currently attached.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn swap_ab(&self) -> bool {
        self.swap_ab.load(Ordering::Relaxed)
    }

    /// Exchange the A and B bits during translation. Takes effect on the
    /// next [`current_input`](Self::current_input) call.
    pub fn set_swap_ab(&self, swap: bool) {
        debug!("Swap A/B set to {}", swap);
        self.swap_ab.store(swap, Ordering::Relaxed);
    }

    /// Register the connect/disconnect observer, replacing any previous one.
    pub fn set_observer(&self, observer: Weak<dyn ControllerObserver>) {
        *self.observer.lock() = Some(observer);
    }

    /// Register the pause callback, replacing (and releasing) any previous
    /// one. Invoked exactly once per pause-button press edge, with this
    /// manager as argument.
    pub fn set_pause_handler<F>(&self, handler: F)
    where
        F: Fn(&ControllerInputManager) + Send + Sync + 'static,
    {
        *self.pause_handler.lock() = Some(Box::new(handler));
    }

    // Single point of mutation for connection state and the snapshot; only
    // the dispatch task calls this.
    fn handle_event(&self, event: RawPadEvent) {
        match event {
            RawPadEvent::Connected { name, timestamp } => {
                if self.connected.load(Ordering::Acquire) {
                    debug!("Redundant connect signal ignored");
                    return;
                }
                info!(
                    "Controller connected: {} at {}",
                    name,
                    timestamp.format("%H:%M:%S%.3f")
                );
                self.connected.store(true, Ordering::Release);
                self.notify_observer(true);
            }
            RawPadEvent::Disconnected { timestamp } => {
                if !self.connected.load(Ordering::Acquire) {
                    debug!("Redundant disconnect signal ignored");
                    return;
                }
                info!(
                    "Controller disconnected at {}",
                    timestamp.format("%H:%M:%S%.3f")
                );
                self.snapshot_tx.send_replace(PadInput::NEUTRAL);
                self.pause_down.store(false, Ordering::Release);
                self.connected.store(false, Ordering::Release);
                self.notify_observer(false);
            }
            RawPadEvent::Button {
                button, pressed, ..
            } => {
                if !self.connected.load(Ordering::Acquire) {
                    debug!("Button event while disconnected, ignoring");
                    return;
                }
                self.snapshot_tx.send_modify(|pad| pad.set(button, pressed));
            }
            RawPadEvent::PauseChanged { pressed, .. } => {
                if !self.connected.load(Ordering::Acquire) {
                    debug!("Pause event while disconnected, ignoring");
                    return;
                }
                if pressed {
                    if !self.pause_down.swap(true, Ordering::AcqRel) {
                        info!("Pause pressed, invoking pause handler");
                        self.invoke_pause_handler();
                    }
                } else {
                    self.pause_down.store(false, Ordering::Release);
                }
            }
        }
    }

    fn notify_observer(&self, connected: bool) {
        let observer = self.observer.lock().clone();
        let Some(weak) = observer else {
            debug!("No observer registered, skipping notification");
            return;
        };
        match weak.upgrade() {
            Some(observer) => {
                if connected {
                    observer.controller_connected(self);
                } else {
                    observer.controller_disconnected(self);
                }
            }
            None => debug!("Observer no longer exists, skipping notification"),
        }
    }

    fn invoke_pause_handler(&self) {
        // The handler runs outside the lock so it may re-register itself.
        let handler = self.pause_handler.lock().take();
        let Some(handler) = handler else {
            debug!("No pause handler registered");
            return;
        };
        handler(self);
        let mut slot = self.pause_handler.lock();
        if slot.is_none() {
            *slot = Some(handler);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pad::PadButton;
    use chrono::Local;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn connect() -> RawPadEvent {
        RawPadEvent::Connected {
            name: "Test Pad".to_string(),
            timestamp: Local::now(),
        }
    }

    fn disconnect() -> RawPadEvent {
        RawPadEvent::Disconnected {
            timestamp: Local::now(),
        }
    }

    fn button(button: PadButton, pressed: bool) -> RawPadEvent {
        RawPadEvent::Button {
            button,
            pressed,
            timestamp: Local::now(),
        }
    }

    fn pause(pressed: bool) -> RawPadEvent {
        RawPadEvent::PauseChanged {
            pressed,
            timestamp: Local::now(),
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        connects: AtomicUsize,
        disconnects: AtomicUsize,
    }

    impl ControllerObserver for CountingObserver {
        fn controller_connected(&self, manager: &ControllerInputManager) {
            assert!(manager.is_connected());
            self.connects.fetch_add(1, Ordering::SeqCst);
        }

        fn controller_disconnected(&self, manager: &ControllerInputManager) {
            assert!(!manager.is_connected());
            self.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn notifications_follow_true_edges_only() {
        let manager = ControllerInputManager::new();
        let observer = Arc::new(CountingObserver::default());
        manager.set_observer(Arc::downgrade(&(Arc::clone(&observer) as Arc<dyn ControllerObserver>)));

        manager.handle_event(connect());
        manager.handle_event(connect()); // redundant, must not re-notify
        manager.handle_event(disconnect());
        manager.handle_event(disconnect()); // redundant
        manager.handle_event(connect());

        assert_eq!(observer.connects.load(Ordering::SeqCst), 2);
        assert_eq!(observer.disconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_observer_is_skipped_silently() {
        let manager = ControllerInputManager::new();
        {
            let observer = Arc::new(CountingObserver::default());
            manager.set_observer(Arc::downgrade(&(Arc::clone(&observer) as Arc<dyn ControllerObserver>)));
        }
        manager.handle_event(connect());
        manager.handle_event(disconnect());
        assert!(!manager.is_connected());
    }

    #[test]
    fn no_observer_registered_is_a_noop() {
        let manager = ControllerInputManager::new();
        manager.handle_event(connect());
        manager.handle_event(disconnect());
        assert!(!manager.is_connected());
    }

    #[test]
    fn disconnected_yields_neutral_regardless_of_prior_state() {
        let manager = ControllerInputManager::new();
        manager.handle_event(connect());
        manager.handle_event(button(PadButton::A, true));
        manager.handle_event(button(PadButton::Right, true));

        let pad = manager.current_input();
        assert!(pad.is_pressed(PadButton::A));
        assert!(pad.is_pressed(PadButton::Right));

        manager.handle_event(disconnect());
        assert_eq!(manager.current_input(), PadInput::NEUTRAL);

        // The cached snapshot was cleared, not just masked
        manager.handle_event(connect());
        assert_eq!(manager.current_input(), PadInput::NEUTRAL);
    }

    #[test]
    fn buttons_while_disconnected_are_dropped() {
        let manager = ControllerInputManager::new();
        manager.handle_event(button(PadButton::Start, true));
        manager.handle_event(connect());
        assert_eq!(manager.current_input(), PadInput::NEUTRAL);
    }

    #[test]
    fn swap_ab_takes_effect_on_next_query() {
        let manager = ControllerInputManager::new();
        manager.handle_event(connect());
        manager.handle_event(button(PadButton::A, true));
        manager.handle_event(button(PadButton::Up, true));

        let pad = manager.current_input();
        assert!(pad.is_pressed(PadButton::A));
        assert!(!pad.is_pressed(PadButton::B));

        manager.set_swap_ab(true);
        let pad = manager.current_input();
        assert!(!pad.is_pressed(PadButton::A));
        assert!(pad.is_pressed(PadButton::B));
        assert!(pad.is_pressed(PadButton::Up));

        manager.set_swap_ab(false);
        assert!(manager.current_input().is_pressed(PadButton::A));
    }

    #[test]
    fn pause_handler_fires_once_per_press_edge() {
        let manager = ControllerInputManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        manager.set_pause_handler(move |m| {
            assert!(m.is_connected());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.handle_event(connect());
        manager.handle_event(pause(true));
        manager.handle_event(pause(true)); // held / repeated, no re-fire
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        manager.handle_event(pause(false));
        manager.handle_event(pause(true));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn pause_handler_replacement_releases_previous() {
        let manager = ControllerInputManager::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = first.clone();
        manager.set_pause_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = second.clone();
        manager.set_pause_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.handle_event(connect());
        manager.handle_event(pause(true));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pause_while_disconnected_is_ignored() {
        let manager = ControllerInputManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        manager.set_pause_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.handle_event(pause(true));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn disconnect_resets_the_pause_latch() {
        let manager = ControllerInputManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        manager.set_pause_handler(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.handle_event(connect());
        manager.handle_event(pause(true));
        manager.handle_event(disconnect());
        manager.handle_event(connect());
        manager.handle_event(pause(true));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shared_returns_the_identical_instance() {
        let first = ControllerInputManager::shared();
        let second = ControllerInputManager::shared();
        assert!(std::ptr::eq(first, second));
    }
}
