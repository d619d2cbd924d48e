//! Contracts implemented by controller (UDC) drivers.
//!
//! The core adds no hardware logic of its own: every endpoint operation is
//! forwarded, unchanged in meaning, to an [`EndpointOps`] implementation,
//! and every device-wide operation to a [`UdcCore`] implementation. One
//! implementation of each exists per controller family; dispatch is fixed
//! per device instance and never switches at runtime.
//!
//! Mandatory operations must be provided by every conformant controller
//! driver. Optional operations carry default implementations returning
//! [`UsbError::NotSupported`], so callers degrade gracefully instead of
//! crashing into missing hardware features.

use crate::endpoint::{EndpointDescriptor, SsCompanionDescriptor};
use crate::request::Request;
use crate::{Result, UsbDirection, UsbError};

/// Hardware operations backing one endpoint.
///
/// Most of these run under the caller's configuration-change serialization;
/// only the giveback path (driven by the controller's own event handler)
/// runs concurrently with anything, and that path goes through
/// [`UsbEndpoint::complete_head`](crate::endpoint::UsbEndpoint::complete_head)
/// rather than this trait.
pub trait EndpointOps {
    /// Programs the hardware for the given descriptor. The core has
    /// already validated the descriptor against the endpoint capabilities
    /// and the packet size ceiling; this can still fail for
    /// controller-specific reasons such as exhausted FIFO memory.
    fn enable(
        &mut self,
        desc: &EndpointDescriptor,
        comp: Option<&SsCompanionDescriptor>,
    ) -> Result<()>;

    /// Stops all hardware activity on the endpoint. Outstanding requests
    /// are completed by the core after this returns.
    fn disable(&mut self) -> Result<()>;

    /// Creates a request shaped for this endpoint. Override to pre-size
    /// buffers or seed controller bookkeeping into the request.
    fn alloc_request(&mut self) -> Request {
        Request::new()
    }

    /// Accepts a request for transfer, typically by arming DMA or a FIFO.
    /// Called before the request joins the endpoint queue; returning an
    /// error refuses the submission and the request goes back to the
    /// submitter untouched.
    ///
    /// The request must be turned into one or more packets, never merged
    /// with adjacent requests, with the first buffer byte on a packet
    /// boundary.
    fn submit(&mut self, req: &mut Request) -> Result<()>;

    /// Stops the hardware from transferring `req` so the core can complete
    /// it as cancelled. Hardware that cannot unlink the head of a started
    /// write FIFO must report an error here rather than pretend; the core
    /// then leaves the request queued.
    fn cancel(&mut self, req: &mut Request) -> Result<()>;

    /// Sets or clears the hardware halt condition. When clearing, the
    /// data toggle resets to DATA0. May fail with [`UsbError::Busy`] when
    /// asked to halt an IN endpoint whose FIFO still holds bytes the host
    /// has not collected.
    fn set_halt(&mut self, value: bool) -> Result<()>;

    /// Halts the endpoint in a way the host cannot clear, for controllers
    /// with dedicated wedge support. The default falls back to a plain
    /// halt; the core tracks the wedge either way.
    fn set_wedge(&mut self) -> Result<()> {
        self.set_halt(true)
    }

    /// Number of unclaimed bytes in the endpoint FIFO.
    fn fifo_status(&self) -> Result<usize> {
        Err(UsbError::NotSupported)
    }

    /// Discards unclaimed bytes in the endpoint FIFO.
    fn fifo_flush(&mut self) -> Result<()> {
        Err(UsbError::NotSupported)
    }
}

/// Snapshot of the OTG/HNP feature bits negotiated with the host, read from
/// the controller by [`UdcCore::refresh_otg`].
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OtgState {
    /// The host enabled HNP on this port.
    pub b_hnp_enable: bool,

    /// The host supports HNP at this port.
    pub a_hnp_support: bool,

    /// The host supports HNP, but only on a different root port.
    pub a_alt_hnp_support: bool,
}

/// Device-wide operations implemented by a controller driver.
///
/// The associated [`EndpointOps`] type ties a controller's endpoints to it,
/// so a [`UsbGadget`](crate::gadget::UsbGadget) is homogeneous over one
/// controller family.
pub trait UdcCore: Sized {
    /// Per-endpoint operations type of this controller family.
    type EndpointOps: EndpointOps;

    /// A gadget driver has bound; start accepting bus events and deliver
    /// them to the gadget. Mandatory.
    fn start(&mut self) -> Result<()>;

    /// The gadget driver is going away; stop all activity. Mandatory.
    fn stop(&mut self);

    /// Asserts or releases the D+/D- pullup that announces the device to
    /// the host.
    fn pullup(&mut self, is_on: bool) -> Result<()> {
        let _ = is_on;
        Err(UsbError::NotSupported)
    }

    /// Notifies the controller that an external transceiver detected a
    /// VBUS session starting or ending.
    fn vbus_session(&mut self, is_active: bool) -> Result<()> {
        let _ = is_active;
        Err(UsbError::NotSupported)
    }

    /// Constrains how much current the device may draw from VBUS, in
    /// milliamperes.
    fn vbus_draw(&mut self, milliamps: u16) -> Result<()> {
        let _ = milliamps;
        Err(UsbError::NotSupported)
    }

    /// Signals remote wakeup to the host.
    fn wakeup(&mut self) -> Result<()> {
        Err(UsbError::NotSupported)
    }

    /// Sends a function remote wakeup notification for one interface.
    /// Only reachable at SuperSpeed; the core enforces the speed gate.
    fn func_wakeup(&mut self, interface_id: u8) -> Result<()> {
        let _ = interface_id;
        Err(UsbError::NotSupported)
    }

    /// Updates the self-powered bit the hardware reports in GET_STATUS.
    fn set_selfpowered(&mut self, is_selfpowered: bool) -> Result<()> {
        let _ = is_selfpowered;
        Err(UsbError::NotSupported)
    }

    /// Full hardware teardown and re-initialization, logically a VBUS low
    /// followed by VBUS high. Recovery hammer for a wedged controller.
    fn restart(&mut self) -> Result<()> {
        Err(UsbError::NotSupported)
    }

    /// The current USB frame number from the last SOF packet.
    fn frame_number(&self) -> Result<u16> {
        Err(UsbError::NotSupported)
    }

    /// Reads the current HNP negotiation bits from the hardware. Called by
    /// the core right before configuration-set and suspend events reach
    /// the gadget driver. `None` means the controller has nothing to
    /// report and the gadget keeps its current flags.
    fn refresh_otg(&mut self) -> Option<OtgState> {
        None
    }

    /// Maps a request's buffer or scatter list for DMA in the given
    /// direction, filling in the request's mapping bookkeeping. Not called
    /// for pre-mapped requests.
    fn map_request(&mut self, req: &mut Request, dir: UsbDirection) -> Result<()> {
        let _ = (req, dir);
        Ok(())
    }

    /// Reverses [`map_request`](UdcCore::map_request).
    fn unmap_request(&mut self, req: &mut Request, dir: UsbDirection) {
        let _ = (req, dir);
    }

    /// Increments the runtime power-management usage counter of the
    /// controller's parent device, keeping it powered. Pass-through to the
    /// platform's power-management layer.
    fn pm_get(&mut self) -> Result<()> {
        Ok(())
    }

    /// Decrements the runtime power-management usage counter, allowing the
    /// parent device to suspend again.
    fn pm_put(&mut self) {}
}
