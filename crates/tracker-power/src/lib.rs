//! Power-loss signal.
//!
//! A single process-wide flag, set from a GPIO interrupt on a falling
//! edge of the monitored VBUS line and polled once per event-loop
//! iteration. There is no queue: the event is idempotent and the loop
//! checks it every time around, so a boolean edge observation is enough
//! (see the teacher's own `state::StateMachine`, which likewise reduces
//! asynchronous inputs to plain state rather than messages).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracker_hal::{Edge, Gpio, HalError};

/// GPIO pin carrying the VBUS-present signal, matching
/// `POWER_MGMT_VBUS_GPIO` in the original firmware.
pub const VBUS_GPIO_PIN: u32 = 24;

/// Edge-triggered power-loss flag.
///
/// Cleared by [`PowerSignal::init`]; set by the registered GPIO interrupt
/// callback on a falling edge of [`VBUS_GPIO_PIN`]. The flag is the sole
/// piece of state shared between interrupt and loop contexts, so it is an
/// `Arc<AtomicBool>` rather than anything requiring a lock.
#[derive(Clone)]
pub struct PowerSignal {
    shutdown_requested: Arc<AtomicBool>,
}

impl Default for PowerSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl PowerSignal {
    pub fn new() -> Self {
        Self {
            shutdown_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Initializes the monitored input and registers the falling-edge
    /// interrupt callback that raises the shutdown flag. Clears any
    /// previously-latched flag.
    pub fn init(&self, gpio: &mut impl Gpio) -> Result<(), HalError> {
        self.shutdown_requested.store(false, Ordering::SeqCst);
        gpio.init_input(VBUS_GPIO_PIN)?;

        let flag = self.shutdown_requested.clone();
        gpio.set_irq(
            VBUS_GPIO_PIN,
            Edge::Falling,
            Box::new(move |pin, _events| {
                warn!(pin, "power loss interrupt: VBUS falling edge");
                flag.store(true, Ordering::SeqCst);
            }),
        )?;

        info!(pin = VBUS_GPIO_PIN, "power management initialized");
        Ok(())
    }

    /// True once the falling-edge interrupt has fired. The event loop
    /// polls this at the top of every iteration.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Polls VBUS directly rather than relying on the latched interrupt
    /// flag, mirroring `power_mgmt_is_vbus_present` in the original
    /// firmware's bring-up tooling.
    pub fn is_vbus_present(&self, gpio: &impl Gpio) -> bool {
        gpio.read(VBUS_GPIO_PIN)
    }
}
