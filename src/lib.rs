//! Device-side USB (gadget) core.
//!
//! A USB peripheral is built out of three layers. At the bottom sits a
//! hardware-specific *controller driver* (UDC driver) that talks to the
//! device controller's registers and DMA engines. At the top sits a mostly
//! hardware-independent *gadget driver* that implements the actual device
//! function (serial port, mass storage, ...). This crate is the layer in
//! between: it defines the request/endpoint I/O model and the device state
//! machines that let any gadget driver run on top of any controller driver.
//!
//! Controller drivers implement the [`udc::UdcCore`] and [`udc::EndpointOps`]
//! contracts and construct a [`gadget::UsbGadget`] with one
//! [`endpoint::UsbEndpoint`] per hardware endpoint. Gadget drivers implement
//! [`driver::GadgetDriver`] and perform I/O by queueing [`request::Request`]s
//! on endpoints. Requests transfer ownership into the endpoint queue when
//! submitted and are handed back, exactly once, through their completion
//! handler.

#![no_std]

extern crate alloc;

#[macro_use]
mod macros;

pub mod autoconf;
pub mod control;
pub mod descriptor;
pub mod driver;
pub mod dummy_udc;
pub mod endpoint;
pub mod gadget;
pub mod request;
pub mod udc;

/// Errors returned by gadget core operations and reported through request
/// completion statuses.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbError {
    /// The operation is not implemented by the controller driver.
    NotSupported,

    /// An argument was rejected, for example enabling an endpoint whose
    /// descriptor carries a zero max packet size.
    InvalidArgument,

    /// I/O was attempted on an endpoint that is not enabled, or an event was
    /// delivered while no gadget driver is bound.
    NotEnabled,

    /// The operation cannot be performed right now. Returned when halting an
    /// IN endpoint that still has requests queued or bytes in a hardware
    /// FIFO, when a control endpoint already holds its one response, or when
    /// binding a driver to a gadget that already has one.
    Busy,

    /// The referenced request is not queued on this endpoint, either because
    /// it already completed or because it never was.
    NotFound,

    /// The transfer was aborted because the device was disconnected or the
    /// endpoint was disabled while the request was outstanding.
    Shutdown,

    /// The transfer was removed from the queue by [`dequeue`].
    ///
    /// [`dequeue`]: crate::endpoint::UsbEndpoint::dequeue
    Cancelled,

    /// An OUT transfer finished short of the requested length while the
    /// request had [`short_not_ok`] set.
    ///
    /// [`short_not_ok`]: crate::request::Request::short_not_ok
    ShortTransfer,

    /// A control request was rejected and the control endpoint answered the
    /// host with a protocol stall.
    Stalled,

    /// A controller-specific hardware fault.
    DeviceError,
}

/// Result type for gadget core operations.
pub type Result<T> = core::result::Result<T, UsbError>;

/// Direction of USB traffic, named from the host's point of view as the USB
/// specification does: IN moves data towards the host, OUT towards the
/// device.
///
/// The discriminant values match the direction bit of an endpoint address
/// and of `bmRequestType`, so the enum can be ORed into either.
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UsbDirection {
    /// Host to device.
    Out = 0x00,

    /// Device to host.
    In = 0x80,
}

/// Convenience re-exports for gadget (function) drivers.
pub mod prelude {
    pub use crate::control::{Recipient, RequestType, SetupPacket};
    pub use crate::driver::GadgetDriver;
    pub use crate::endpoint::{
        EndpointAddress, EndpointDescriptor, EndpointType, SsCompanionDescriptor, UsbEndpoint,
    };
    pub use crate::gadget::{UsbDeviceState, UsbGadget, UsbSpeed};
    pub use crate::request::{Completion, QueueError, Request, RequestBuf, RequestTag};
    pub use crate::{Result, UsbDirection, UsbError};
}

/// Convenience re-exports for controller (UDC) drivers.
pub mod udc_prelude {
    pub use crate::endpoint::{
        EndpointAddress, EndpointDescriptor, EndpointType, EpCaps, SsCompanionDescriptor,
        UsbEndpoint,
    };
    pub use crate::gadget::{
        GadgetBuilder, GadgetQuirks, OtgCaps, OtgFlags, UsbDeviceState, UsbGadget, UsbSpeed,
    };
    pub use crate::request::Request;
    pub use crate::udc::{EndpointOps, OtgState, UdcCore};
    pub use crate::{Result, UsbDirection, UsbError};
}
