//! Control requests as delivered to a gadget driver's `setup` callback.

use core::convert::TryFrom;

use num_enum::TryFromPrimitive;

use crate::{Result, UsbDirection, UsbError};

/// Control request type, bits 5..6 of `bmRequestType`.
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestType {
    /// A USB standard request.
    Standard = 0,
    /// A class-specific request.
    Class = 1,
    /// A vendor-specific request.
    Vendor = 2,
    /// Reserved.
    Reserved = 3,
}

/// Control request recipient, bits 0..4 of `bmRequestType`.
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Recipient {
    /// The whole device.
    Device = 0,
    /// An interface; `index` carries the interface number.
    Interface = 1,
    /// An endpoint; `index` carries the endpoint address.
    Endpoint = 2,
    /// Something else defined by the class.
    Other = 3,
}

/// A SETUP packet, with the 16-bit fields already in host byte order.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SetupPacket {
    /// Transfer direction of the data stage.
    pub direction: UsbDirection,
    /// Standard, class or vendor request.
    pub request_type: RequestType,
    /// Who the request is addressed to.
    pub recipient: Recipient,
    /// Request code; meaning depends on the fields above.
    pub request: u8,
    /// `wValue`.
    pub value: u16,
    /// `wIndex`.
    pub index: u16,
    /// Length of the data stage: exact for OUT requests, an upper bound
    /// for IN requests.
    pub length: u16,
}

impl SetupPacket {
    /// Decodes the eight bytes of a SETUP packet.
    ///
    /// Fails with [`UsbError::InvalidArgument`] when `bmRequestType` uses a
    /// reserved recipient encoding.
    pub fn parse(buf: &[u8; 8]) -> Result<SetupPacket> {
        let rt = buf[0];

        let direction = if rt & 0x80 != 0 {
            UsbDirection::In
        } else {
            UsbDirection::Out
        };

        let request_type =
            RequestType::try_from((rt >> 5) & 0b11).map_err(|_| UsbError::InvalidArgument)?;
        let recipient = Recipient::try_from(rt & 0x1f).map_err(|_| UsbError::InvalidArgument)?;

        Ok(SetupPacket {
            direction,
            request_type,
            recipient,
            request: buf[1],
            value: u16::from_le_bytes([buf[2], buf[3]]),
            index: u16::from_le_bytes([buf[4], buf[5]]),
            length: u16::from_le_bytes([buf[6], buf[7]]),
        })
    }

    /// Whether this is a standard SET_CONFIGURATION request. The core uses
    /// this to refresh OTG negotiation state before dispatching.
    pub fn is_set_configuration(&self) -> bool {
        self.request_type == RequestType::Standard
            && self.recipient == Recipient::Device
            && self.request == standard_request::SET_CONFIGURATION
    }
}

/// Standard request codes (USB 2.0 section 9.4).
pub mod standard_request {
    pub const GET_STATUS: u8 = 0;
    pub const CLEAR_FEATURE: u8 = 1;
    pub const SET_FEATURE: u8 = 3;
    pub const SET_ADDRESS: u8 = 5;
    pub const GET_DESCRIPTOR: u8 = 6;
    pub const SET_DESCRIPTOR: u8 = 7;
    pub const GET_CONFIGURATION: u8 = 8;
    pub const SET_CONFIGURATION: u8 = 9;
    pub const GET_INTERFACE: u8 = 10;
    pub const SET_INTERFACE: u8 = 11;
    pub const SYNCH_FRAME: u8 = 12;
}

/// Feature selectors for SET_FEATURE/CLEAR_FEATURE (USB 2.0 table 9-6 and
/// the OTG supplement).
pub mod feature {
    pub const ENDPOINT_HALT: u16 = 0;
    pub const DEVICE_REMOTE_WAKEUP: u16 = 1;
    pub const TEST_MODE: u16 = 2;
    pub const B_HNP_ENABLE: u16 = 3;
    pub const A_HNP_SUPPORT: u16 = 4;
    pub const A_ALT_HNP_SUPPORT: u16 = 5;
}
