//! The gadget: a whole peripheral USB device.
//!
//! A [`UsbGadget`] packages a controller backend, the control endpoint and
//! the general-purpose endpoint list behind the interfaces a gadget driver
//! programs against. It owns the device-wide state: link speed, the USB
//! device state chain, the connection/activation bits and the OTG
//! negotiation flags, plus the exclusive binding to one
//! [`GadgetDriver`].
//!
//! Controller drivers construct a gadget through [`GadgetBuilder`] at probe
//! time and afterwards feed bus events into the `handle_*` entry points
//! from their event path.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::any::Any;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::control::SetupPacket;
use crate::driver::GadgetDriver;
use crate::endpoint::UsbEndpoint;
use crate::request::Request;
use crate::udc::UdcCore;
use crate::{Result, UsbDirection, UsbError};

/// USB link speeds, lowest to highest.
#[repr(u8)]
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, IntoPrimitive, TryFromPrimitive,
)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbSpeed {
    /// Enumeration has not happened yet.
    Unknown = 0,
    /// Low speed (1.5 Mbit/s).
    Low = 1,
    /// Full speed (12 Mbit/s).
    Full = 2,
    /// High speed (480 Mbit/s).
    High = 3,
    /// SuperSpeed (5 Gbit/s).
    Super = 4,
    /// SuperSpeed Plus (10 Gbit/s).
    SuperPlus = 5,
}

/// The USB device state chain (USB 2.0 section 9.1.1).
///
/// States progress forward through the chain during enumeration;
/// `Suspended` overlays any powered-or-later state and the gadget returns
/// to the state it held before the suspend.
#[repr(u8)]
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, IntoPrimitive, TryFromPrimitive,
)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbDeviceState {
    /// No host connection.
    NotAttached = 0,
    /// Attached to a port, no bus power yet.
    Attached = 1,
    /// Bus power present, not yet reset.
    Powered = 2,
    /// Reset by the host, answering on the default address.
    Default = 3,
    /// The host assigned a device address.
    Addressed = 4,
    /// A configuration is active; class traffic may flow.
    Configured = 5,
    /// The bus is suspended.
    Suspended = 6,
}

/// OTG capabilities of a dual-role port, declared by the controller driver
/// and immutable afterwards.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OtgCaps {
    /// Supported OTG revision, BCD (for example `0x0200`).
    pub otg_rev: u16,
    /// Host Negotiation Protocol supported.
    pub hnp_support: bool,
    /// Session Request Protocol supported.
    pub srp_support: bool,
    /// Attach Detection Protocol supported.
    pub adp_support: bool,
}

/// OTG role and HNP negotiation state.
///
/// Meaningful only on a dual-role gadget acting as the B-peripheral
/// (`is_a_peripheral == false`). The negotiation bits are refreshed from
/// the controller right before SET_CONFIGURATION setup dispatch and before
/// suspend notifications.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OtgFlags {
    /// The A-end of the cable is plugged in here and HNP swapped roles, so
    /// this device acts as A-peripheral rather than B-peripheral.
    pub is_a_peripheral: bool,
    /// The host enabled HNP on this port.
    pub b_hnp_enable: bool,
    /// The host supports HNP at this port.
    pub a_hnp_support: bool,
    /// The host supports HNP only on a different root port.
    pub a_alt_hnp_support: bool,
}

/// Hardware oddities a controller driver declares at probe time. Read-only
/// to the gadget driver, which adapts its behavior around them.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct GadgetQuirks {
    /// OUT buffers must be sized to a multiple of the endpoint's maximum
    /// packet size.
    pub ep_out_aligned_size: bool,
    /// Interface alternate settings are not supported.
    pub altset_not_supp: bool,
    /// Protocol stalls are not supported.
    pub stall_not_supp: bool,
    /// Zero-length packets are not supported.
    pub zlp_not_supp: bool,
}

/// Device-side representation of a whole USB peripheral.
pub struct UsbGadget<U: UdcCore> {
    udc: U,
    name: &'static str,
    ep0: UsbEndpoint<U::EndpointOps>,
    eps: Vec<UsbEndpoint<U::EndpointOps>>,
    speed: UsbSpeed,
    max_speed: UsbSpeed,
    state: UsbDeviceState,
    pre_suspend_state: UsbDeviceState,
    is_selfpowered: bool,
    remote_wakeup_enabled: bool,
    deactivated: bool,
    connected: bool,
    sg_supported: bool,
    otg_caps: Option<OtgCaps>,
    otg_flags: OtgFlags,
    quirks: GadgetQuirks,
    driver: Option<Box<dyn GadgetDriver<U>>>,
    driver_data: Option<Box<dyn Any + Send>>,
}

impl<U: UdcCore> UsbGadget<U> {
    /// Identifies the controller hardware, for diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Speed of the current host connection.
    pub fn speed(&self) -> UsbSpeed {
        self.speed
    }

    /// The highest speed the controller can run. The hardware must also
    /// support every slower speed.
    pub fn max_speed(&self) -> UsbSpeed {
        self.max_speed
    }

    /// Whether the controller handles both high and full speed.
    pub fn is_dualspeed(&self) -> bool {
        self.max_speed >= UsbSpeed::High
    }

    /// Whether the controller handles SuperSpeed.
    pub fn is_superspeed(&self) -> bool {
        self.max_speed >= UsbSpeed::Super
    }

    /// Current state in the USB device state chain.
    pub fn state(&self) -> UsbDeviceState {
        self.state
    }

    /// Whether the device currently declares itself self-powered.
    pub fn is_selfpowered(&self) -> bool {
        self.is_selfpowered
    }

    /// Whether the host has enabled the remote-wakeup feature.
    pub fn remote_wakeup_enabled(&self) -> bool {
        self.remote_wakeup_enabled
    }

    /// Records the host toggling the remote-wakeup feature. For the layer
    /// handling standard SET_FEATURE/CLEAR_FEATURE requests.
    pub fn set_remote_wakeup_enabled(&mut self, enabled: bool) {
        self.remote_wakeup_enabled = enabled;
    }

    /// Whether the pullup is (or on activation, will be) asserted.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Whether the gadget is deactivated and keeping itself invisible to
    /// the host regardless of the connection intent.
    pub fn is_deactivated(&self) -> bool {
        self.deactivated
    }

    /// Whether the controller can take scatter lists in requests.
    pub fn sg_supported(&self) -> bool {
        self.sg_supported
    }

    /// Whether the port is dual-role (OTG) capable.
    pub fn is_otg(&self) -> bool {
        self.otg_caps.is_some()
    }

    /// The OTG capabilities declared by the controller, if any.
    pub fn otg_caps(&self) -> Option<&OtgCaps> {
        self.otg_caps.as_ref()
    }

    /// The OTG role and negotiation flags. See [`OtgFlags`] for when these
    /// carry meaning.
    pub fn otg_flags(&self) -> OtgFlags {
        self.otg_flags
    }

    /// Records an HNP role switch. For controller drivers.
    pub fn set_a_peripheral(&mut self, is_a_peripheral: bool) {
        self.otg_flags.is_a_peripheral = is_a_peripheral;
    }

    /// The controller's declared hardware quirks.
    pub fn quirks(&self) -> GadgetQuirks {
        self.quirks
    }

    /// Whether the hardware supports interface alternate settings.
    pub fn is_altset_supported(&self) -> bool {
        !self.quirks.altset_not_supp
    }

    /// Whether the hardware supports protocol stalls.
    pub fn is_stall_supported(&self) -> bool {
        !self.quirks.stall_not_supp
    }

    /// Whether the hardware supports zero-length packets.
    pub fn is_zlp_supported(&self) -> bool {
        !self.quirks.zlp_not_supp
    }

    /// Rounds `len` up to `ep`'s packet size when the controller requires
    /// aligned OUT buffers, and returns it unchanged otherwise.
    pub fn ep_align_maybe(&self, ep: &UsbEndpoint<U::EndpointOps>, len: usize) -> usize {
        if self.quirks.ep_out_aligned_size {
            ep.align(len)
        } else {
            len
        }
    }

    /// The control endpoint.
    pub fn ep0(&self) -> &UsbEndpoint<U::EndpointOps> {
        &self.ep0
    }

    /// The control endpoint, mutably; this is where setup responses are
    /// queued.
    pub fn ep0_mut(&mut self) -> &mut UsbEndpoint<U::EndpointOps> {
        &mut self.ep0
    }

    /// The general-purpose endpoints, in controller order. The control
    /// endpoint is not in this list.
    pub fn eps(&self) -> &[UsbEndpoint<U::EndpointOps>] {
        &self.eps
    }

    /// The general-purpose endpoints, mutably.
    pub fn eps_mut(&mut self) -> &mut [UsbEndpoint<U::EndpointOps>] {
        &mut self.eps
    }

    /// Finds a general-purpose endpoint by its stable name.
    pub fn find_ep_by_name(&mut self, name: &str) -> Option<&mut UsbEndpoint<U::EndpointOps>> {
        self.eps.iter_mut().find(|ep| ep.name() == name)
    }

    /// The controller backend.
    pub fn udc(&self) -> &U {
        &self.udc
    }

    /// The controller backend, mutably.
    pub fn udc_mut(&mut self) -> &mut U {
        &mut self.udc
    }

    /// Stores the driver's opaque state. Set once from
    /// [`GadgetDriver::bind`]; cleared automatically at unbind.
    pub fn set_driver_data(&mut self, data: Box<dyn Any + Send>) {
        self.driver_data = Some(data);
    }

    /// Borrows the driver state stored at bind time, downcast to `T`.
    pub fn driver_data<T: 'static>(&self) -> Option<&T> {
        self.driver_data.as_ref()?.downcast_ref()
    }

    /// Borrows the driver state mutably, downcast to `T`.
    pub fn driver_data_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.driver_data.as_mut()?.downcast_mut()
    }

    /// Moves the device to `state`. For controller drivers; gadget drivers
    /// observe the state but never set it.
    pub fn set_state(&mut self, state: UsbDeviceState) {
        gadget_debug!("{}: usb state {}", self.name, state as u8);
        self.state = state;
    }

    /// Asserts the pullup, making the device visible to the host once a
    /// VBUS session is active.
    ///
    /// On a deactivated gadget only the connection intent is recorded; the
    /// hardware pullup follows when [`activate`](UsbGadget::activate) runs.
    /// Fails with [`UsbError::NotSupported`] when the controller has no
    /// pullup control.
    pub fn connect(&mut self) -> Result<()> {
        if self.deactivated {
            // The gadget will be connected automatically on activation.
            self.connected = true;
            return Ok(());
        }

        self.udc.pullup(true)?;
        self.connected = true;
        gadget_debug!("{}: connect", self.name);
        Ok(())
    }

    /// Releases the pullup, which the host sees as a disconnect. Same
    /// deactivation short-circuit as [`connect`](UsbGadget::connect).
    pub fn disconnect(&mut self) -> Result<()> {
        if self.deactivated {
            // The gadget will stay disconnected after activation.
            self.connected = false;
            return Ok(());
        }

        self.udc.pullup(false)?;
        self.connected = false;
        gadget_debug!("{}: disconnect", self.name);
        Ok(())
    }

    /// Makes the gadget invisible to the host until
    /// [`activate`](UsbGadget::activate), remembering the current
    /// connection intent. Useful while a not-yet-ready function driver
    /// sets itself up. Idempotent.
    pub fn deactivate(&mut self) -> Result<()> {
        if self.deactivated {
            return Ok(());
        }

        if self.connected {
            self.disconnect()?;
            // Remember to reconnect on activation.
            self.connected = true;
        }

        self.deactivated = true;
        Ok(())
    }

    /// Undoes [`deactivate`](UsbGadget::deactivate), restoring exactly the
    /// connection intent that existed beforehand. Idempotent.
    pub fn activate(&mut self) -> Result<()> {
        if !self.deactivated {
            return Ok(());
        }

        self.deactivated = false;

        if self.connected {
            return self.connect();
        }

        Ok(())
    }

    /// Notifies the controller that an external transceiver detected a
    /// VBUS session starting.
    pub fn vbus_connect(&mut self) -> Result<()> {
        self.udc.vbus_session(true)
    }

    /// Notifies the controller that the VBUS session ended.
    pub fn vbus_disconnect(&mut self) -> Result<()> {
        self.udc.vbus_session(false)
    }

    /// Tells the controller how much current the device may draw, in
    /// milliamperes; twice the configuration descriptor's `bMaxPower`
    /// value.
    pub fn vbus_draw(&mut self, milliamps: u16) -> Result<()> {
        self.udc.vbus_draw(milliamps)
    }

    /// Tries to wake the host with remote-wakeup signaling.
    pub fn wakeup(&mut self) -> Result<()> {
        self.udc.wakeup()
    }

    /// Sends a function remote wakeup notification for `interface_id`.
    ///
    /// Function suspend exists only at SuperSpeed, so this fails with
    /// [`UsbError::NotSupported`] at any lower link speed no matter what
    /// the controller could do.
    pub fn func_wakeup(&mut self, interface_id: u8) -> Result<()> {
        if self.speed < UsbSpeed::Super {
            return Err(UsbError::NotSupported);
        }

        self.udc.func_wakeup(interface_id)
    }

    /// Declares whether the device currently runs from its own power
    /// supply, updating what the hardware reports in GET_STATUS.
    pub fn set_selfpowered(&mut self, is_selfpowered: bool) -> Result<()> {
        self.udc.set_selfpowered(is_selfpowered)?;
        self.is_selfpowered = is_selfpowered;
        Ok(())
    }

    /// Full hardware teardown and re-initialization, logically forcing
    /// VBUS low and then high again. Recovery from a wedged controller.
    pub fn restart(&mut self) -> Result<()> {
        self.udc.restart()
    }

    /// The current USB frame number, from the last SOF packet.
    pub fn frame_number(&self) -> Result<u16> {
        self.udc.frame_number()
    }

    /// Maps a request for DMA in the given direction, unless the
    /// submitter already mapped it.
    pub fn map_request(&mut self, req: &mut Request, dir: UsbDirection) -> Result<()> {
        if req.dma_pre_mapped {
            return Ok(());
        }

        self.udc.map_request(req, dir)
    }

    /// Reverses [`map_request`](UsbGadget::map_request); skipped for
    /// pre-mapped requests whose mapping belongs to the submitter.
    pub fn unmap_request(&mut self, req: &mut Request, dir: UsbDirection) {
        if req.dma_pre_mapped {
            return;
        }

        self.udc.unmap_request(req, dir);
    }

    /// Keeps the controller's parent device powered while the function
    /// driver needs it. Pass-through to the platform power-management
    /// layer; pair with [`autopm_put`](UsbGadget::autopm_put).
    pub fn autopm_get(&mut self) -> Result<()> {
        self.udc.pm_get()
    }

    /// Releases an [`autopm_get`](UsbGadget::autopm_get) reference.
    pub fn autopm_put(&mut self) {
        self.udc.pm_put();
    }

    /// Binds `driver` to this gadget. Binding is exclusive; a second bind
    /// fails with [`UsbError::Busy`] until the first driver unbinds.
    ///
    /// The driver's `bind` callback runs first; only when it succeeds does
    /// the controller start delivering bus events. A `bind` failure leaves
    /// the gadget unbound, and a controller start failure unwinds the
    /// driver with `unbind`.
    pub fn bind_driver(&mut self, mut driver: Box<dyn GadgetDriver<U>>) -> Result<()> {
        if self.driver.is_some() {
            return Err(UsbError::Busy);
        }

        driver.bind(self)?;

        if let Err(err) = self.udc.start() {
            driver.unbind(self);
            self.driver_data = None;
            return Err(err);
        }

        self.driver = Some(driver);
        Ok(())
    }

    /// Unbinds the current driver.
    ///
    /// The pullup drops first so the host sees the device leave, the
    /// controller stops, and then the driver's `unbind` releases its
    /// resources. The stored driver data is dropped last. Fails with
    /// [`UsbError::NotFound`] when no driver is bound.
    pub fn unbind_driver(&mut self) -> Result<()> {
        let mut driver = self.driver.take().ok_or(UsbError::NotFound)?;

        let _ = self.disconnect();
        driver.unbind(self);
        self.udc.stop();
        self.driver_data = None;

        Ok(())
    }

    /// Whether a gadget driver is currently bound.
    pub fn has_driver(&self) -> bool {
        self.driver.is_some()
    }

    fn refresh_otg_flags(&mut self) {
        // Negotiation bits only carry meaning for a dual-role device
        // currently acting as the B-peripheral.
        if self.otg_caps.is_none() || self.otg_flags.is_a_peripheral {
            return;
        }

        if let Some(state) = self.udc.refresh_otg() {
            self.otg_flags.b_hnp_enable = state.b_hnp_enable;
            self.otg_flags.a_hnp_support = state.a_hnp_support;
            self.otg_flags.a_alt_hnp_support = state.a_alt_hnp_support;
        }
    }

    /// Delivers a setup packet the controller did not handle in hardware.
    ///
    /// For controller drivers, from the event path. Opens the control
    /// endpoint's one-response window and dispatches to the driver; when
    /// the driver rejects the request, the control endpoint answers with a
    /// protocol stall and this returns [`UsbError::Stalled`]. OTG
    /// negotiation flags are refreshed before a SET_CONFIGURATION reaches
    /// the driver.
    pub fn handle_setup(&mut self, ctrl: &SetupPacket) -> Result<()> {
        let mut driver = self.driver.take().ok_or(UsbError::NotEnabled)?;

        if ctrl.is_set_configuration() {
            self.refresh_otg_flags();
        }

        self.ep0.begin_setup();

        let res = driver.setup(self, ctrl);
        self.driver = Some(driver);

        match res {
            Ok(()) => Ok(()),
            Err(_) => {
                let _ = self.ep0.protocol_stall();
                Err(UsbError::Stalled)
            }
        }
    }

    /// Delivers a bus reset. The device is back at the Default state,
    /// running at the speed the reset handshake negotiated.
    pub fn handle_reset(&mut self, speed: UsbSpeed) -> Result<()> {
        let mut driver = self.driver.take().ok_or(UsbError::NotEnabled)?;

        self.speed = speed;
        self.remote_wakeup_enabled = false;
        self.set_state(UsbDeviceState::Default);

        driver.reset(self);
        self.driver = Some(driver);
        Ok(())
    }

    /// Delivers a bus suspend. The state held right now is restored on
    /// resume. OTG negotiation flags refresh before the driver hears
    /// about the suspend.
    pub fn handle_suspend(&mut self) -> Result<()> {
        if self.state == UsbDeviceState::Suspended {
            return Ok(());
        }

        let mut driver = self.driver.take().ok_or(UsbError::NotEnabled)?;

        self.refresh_otg_flags();
        self.pre_suspend_state = self.state;
        self.set_state(UsbDeviceState::Suspended);

        driver.suspend(self);
        self.driver = Some(driver);
        Ok(())
    }

    /// Delivers a bus resume, restoring the state held before the
    /// suspend.
    pub fn handle_resume(&mut self) -> Result<()> {
        if self.state != UsbDeviceState::Suspended {
            return Ok(());
        }

        let mut driver = self.driver.take().ok_or(UsbError::NotEnabled)?;

        self.set_state(self.pre_suspend_state);

        driver.resume(self);
        self.driver = Some(driver);
        Ok(())
    }

    /// Delivers a host disconnect.
    ///
    /// The controller must already have stopped all transfers (disabling
    /// its endpoints drained their queues with
    /// [`Shutdown`](UsbError::Shutdown)); the core drains any leftover
    /// control response the same way before the driver is told.
    pub fn handle_disconnect(&mut self) -> Result<()> {
        let mut driver = self.driver.take().ok_or(UsbError::NotEnabled)?;

        self.ep0.nuke(UsbError::Shutdown);
        self.speed = UsbSpeed::Unknown;
        self.set_state(UsbDeviceState::NotAttached);

        driver.disconnect(self);
        self.driver = Some(driver);
        Ok(())
    }

    /// Records a VBUS session change observed by the controller, moving
    /// the device to Powered or back to NotAttached.
    pub fn handle_vbus(&mut self, is_active: bool) {
        if is_active {
            self.set_state(UsbDeviceState::Powered);
        } else {
            self.set_state(UsbDeviceState::NotAttached);
        }
    }
}

/// Builds a [`UsbGadget`]. For controller drivers at probe time.
pub struct GadgetBuilder<U: UdcCore> {
    gadget: UsbGadget<U>,
}

impl<U: UdcCore> GadgetBuilder<U> {
    /// Starts a gadget from its backend, hardware name and control
    /// endpoint.
    pub fn new(name: &'static str, udc: U, ep0: UsbEndpoint<U::EndpointOps>) -> GadgetBuilder<U> {
        GadgetBuilder {
            gadget: UsbGadget {
                udc,
                name,
                ep0,
                eps: Vec::new(),
                speed: UsbSpeed::Unknown,
                max_speed: UsbSpeed::Full,
                state: UsbDeviceState::NotAttached,
                pre_suspend_state: UsbDeviceState::NotAttached,
                is_selfpowered: false,
                remote_wakeup_enabled: false,
                deactivated: false,
                connected: false,
                sg_supported: false,
                otg_caps: None,
                otg_flags: OtgFlags::default(),
                quirks: GadgetQuirks::default(),
                driver: None,
                driver_data: None,
            },
        }
    }

    /// Adds a general-purpose endpoint. Endpoints keep the order they are
    /// added in.
    pub fn endpoint(mut self, ep: UsbEndpoint<U::EndpointOps>) -> GadgetBuilder<U> {
        self.gadget.eps.push(ep);
        self
    }

    /// Sets the highest speed the controller can run.
    pub fn max_speed(mut self, speed: UsbSpeed) -> GadgetBuilder<U> {
        self.gadget.max_speed = speed;
        self
    }

    /// Declares the controller's hardware quirks.
    pub fn quirks(mut self, quirks: GadgetQuirks) -> GadgetBuilder<U> {
        self.gadget.quirks = quirks;
        self
    }

    /// Declares the port dual-role capable.
    pub fn otg_caps(mut self, caps: OtgCaps) -> GadgetBuilder<U> {
        self.gadget.otg_caps = Some(caps);
        self
    }

    /// Declares scatter-gather support.
    pub fn sg_supported(mut self, supported: bool) -> GadgetBuilder<U> {
        self.gadget.sg_supported = supported;
        self
    }

    /// Finishes the gadget.
    pub fn build(self) -> UsbGadget<U> {
        self.gadget
    }
}
