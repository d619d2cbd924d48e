//! The callback contract between the core and a gadget (function) driver.

use crate::control::SetupPacket;
use crate::gadget::{UsbGadget, UsbSpeed};
use crate::udc::UdcCore;
use crate::Result;

/// A driver for the device function running on top of a gadget.
///
/// A driver binds exclusively to one gadget through
/// [`UsbGadget::bind_driver`]; the gadget stays bound until
/// [`UsbGadget::unbind_driver`]. After a successful bind the core delivers
/// bus-level events through the remaining callbacks.
///
/// Execution context matters: `setup`, `disconnect`, `suspend`, `resume`
/// and `reset` are delivered from the controller's event path, which on
/// real hardware runs with interrupts off. They must not block or sleep.
/// `bind` and `unbind` run in a context that is allowed to block, and
/// `unbind` is the only place guaranteed safe for releasing resources that
/// need blocking teardown.
pub trait GadgetDriver<U: UdcCore> {
    /// Short name of the function, for diagnostics.
    fn function(&self) -> &str;

    /// The highest speed this driver can handle.
    fn max_speed(&self) -> UsbSpeed;

    /// Called once when the driver is attached to the gadget.
    ///
    /// The driver examines capabilities, claims endpoints (usually through
    /// [`UsbGadget::ep_autoconfig`]) and stores its state with
    /// [`UsbGadget::set_driver_data`]. It must not depend on the device
    /// being connected yet. If the gadget is dual-role and acting as the
    /// B-peripheral, the driver has to include OTG descriptors in its
    /// configuration or fail the bind.
    fn bind(&mut self, gadget: &mut UsbGadget<U>) -> Result<()>;

    /// Called when the driver is detached. All driver-held resources must
    /// be released before returning. May block.
    fn unbind(&mut self, gadget: &mut UsbGadget<U>);

    /// Handles a control request the controller did not handle in
    /// hardware.
    ///
    /// The driver must queue exactly one response on the control endpoint,
    /// a zero-length one if there is nothing to say, or return an error to
    /// have the endpoint answer with a protocol stall.
    fn setup(&mut self, gadget: &mut UsbGadget<U>, ctrl: &SetupPacket) -> Result<()>;

    /// The host went away. Delivered after the controller has already
    /// stopped all transfers and the endpoint queues have drained with
    /// [`Shutdown`](crate::UsbError::Shutdown) completions.
    fn disconnect(&mut self, gadget: &mut UsbGadget<U>);

    /// The bus was suspended.
    fn suspend(&mut self, gadget: &mut UsbGadget<U>) {
        let _ = gadget;
    }

    /// The bus resumed from suspend.
    fn resume(&mut self, gadget: &mut UsbGadget<U>) {
        let _ = gadget;
    }

    /// The host issued a bus reset; the device is back at the Default
    /// state and will be enumerated again.
    fn reset(&mut self, gadget: &mut UsbGadget<U>);
}
