//! Descriptor and string serialization helpers.
//!
//! Pure byte-blob construction, consumed by `setup()` implementations that
//! answer GET_DESCRIPTOR requests. Logically independent of the I/O core.

use crate::endpoint::{EndpointDescriptor, SsCompanionDescriptor};
use crate::gadget::OtgCaps;
use crate::{Result, UsbError};

/// Standard descriptor type codes.
pub mod descriptor_type {
    pub const DEVICE: u8 = 1;
    pub const CONFIGURATION: u8 = 2;
    pub const STRING: u8 = 3;
    pub const INTERFACE: u8 = 4;
    pub const ENDPOINT: u8 = 5;
    pub const DEVICE_QUALIFIER: u8 = 6;
    pub const OTHER_SPEED_CONFIGURATION: u8 = 7;
    pub const OTG: u8 = 9;
    pub const SS_ENDPOINT_COMPANION: u8 = 48;
}

/// String descriptor language IDs.
pub mod lang_id {
    pub const ENGLISH_US: u16 = 0x0409;
}

/// Writes descriptors into a byte buffer, keeping track of the position.
pub struct DescriptorWriter<'a> {
    buf: &'a mut [u8],
    position: usize,
}

impl<'a> DescriptorWriter<'a> {
    /// Starts writing at the beginning of `buf`.
    pub fn new(buf: &'a mut [u8]) -> DescriptorWriter<'a> {
        DescriptorWriter { buf, position: 0 }
    }

    /// Number of bytes written so far.
    pub fn position(&self) -> usize {
        self.position
    }

    fn write_header(&mut self, length: usize, descriptor_type: u8) -> Result<()> {
        if self.position + length + 2 > self.buf.len() || length + 2 > usize::from(u8::MAX) {
            return Err(UsbError::InvalidArgument);
        }

        self.buf[self.position] = (length + 2) as u8;
        self.buf[self.position + 1] = descriptor_type;
        self.position += 2;

        Ok(())
    }

    /// Writes a descriptor of the given type. `descriptor` is the payload
    /// after the two header bytes, which are filled in automatically.
    pub fn write(&mut self, descriptor_type: u8, descriptor: &[u8]) -> Result<()> {
        self.write_header(descriptor.len(), descriptor_type)?;

        self.buf[self.position..self.position + descriptor.len()].copy_from_slice(descriptor);
        self.position += descriptor.len();

        Ok(())
    }

    /// Writes a string descriptor, encoding `string` as UTF-16LE.
    pub fn string(&mut self, string: &str) -> Result<()> {
        let length = string.encode_utf16().count() * 2;

        self.write_header(length, descriptor_type::STRING)?;

        for unit in string.encode_utf16() {
            let bytes = unit.to_le_bytes();
            self.buf[self.position] = bytes[0];
            self.buf[self.position + 1] = bytes[1];
            self.position += 2;
        }

        Ok(())
    }

    /// Writes an interface descriptor.
    pub fn interface(
        &mut self,
        number: u8,
        alternate_setting: u8,
        num_endpoints: u8,
        class: u8,
        sub_class: u8,
        protocol: u8,
        string_index: u8,
    ) -> Result<()> {
        self.write(
            descriptor_type::INTERFACE,
            &[
                number,
                alternate_setting,
                num_endpoints,
                class,
                sub_class,
                protocol,
                string_index,
            ],
        )
    }

    /// Writes an endpoint descriptor.
    pub fn endpoint(&mut self, desc: &EndpointDescriptor) -> Result<()> {
        let mps = desc.max_packet_size;

        self.write(
            descriptor_type::ENDPOINT,
            &[
                desc.address.into(),
                desc.ep_type as u8,
                mps as u8,
                (mps >> 8) as u8,
                desc.interval,
            ],
        )
    }

    /// Writes a SuperSpeed endpoint companion descriptor. `bmAttributes`
    /// carries the stream exponent for bulk endpoints and the transaction
    /// multiplier for isochronous ones; pass whichever applies.
    pub fn ss_companion(&mut self, comp: &SsCompanionDescriptor) -> Result<()> {
        let attributes = comp.max_streams | (comp.mult & 0x3);

        self.write(
            descriptor_type::SS_ENDPOINT_COMPANION,
            &[
                comp.max_burst,
                attributes,
                comp.bytes_per_interval as u8,
                (comp.bytes_per_interval >> 8) as u8,
            ],
        )
    }

    /// Writes an OTG descriptor from the port's declared capabilities.
    /// Dual-role gadgets acting as the B-peripheral must carry one in
    /// every configuration.
    pub fn otg(&mut self, caps: &OtgCaps) -> Result<()> {
        let mut attributes = 0u8;
        if caps.srp_support {
            attributes |= 0x01;
        }
        if caps.hnp_support {
            attributes |= 0x02;
        }
        if caps.adp_support {
            attributes |= 0x04;
        }

        self.write(
            descriptor_type::OTG,
            &[attributes, caps.otg_rev as u8, (caps.otg_rev >> 8) as u8],
        )
    }
}

/// A string and the descriptor id it answers to.
#[derive(Copy, Clone)]
pub struct UsbString<'a> {
    /// The nonzero string descriptor id.
    pub id: u8,
    /// The string, in UTF-8.
    pub s: &'a str,
}

/// All the strings of one language.
#[derive(Copy, Clone)]
pub struct GadgetStrings<'a> {
    /// Language id, `0x0409` for en-US.
    pub language: u16,
    /// The strings with their ids.
    pub strings: &'a [UsbString<'a>],
}

/// Serializes the string descriptor for `id` from `table` into `buf`,
/// returning the number of bytes written.
///
/// Id zero produces the language id descriptor. An unknown id fails with
/// [`UsbError::NotFound`].
pub fn get_string(table: &GadgetStrings<'_>, id: u8, buf: &mut [u8]) -> Result<usize> {
    let mut writer = DescriptorWriter::new(buf);

    if id == 0 {
        writer.write(descriptor_type::STRING, &table.language.to_le_bytes())?;
        return Ok(writer.position());
    }

    let entry = table
        .strings
        .iter()
        .find(|s| s.id == id)
        .ok_or(UsbError::NotFound)?;

    writer.string(entry.s)?;
    Ok(writer.position())
}

/// The configuration-level fields of a configuration descriptor.
#[derive(Copy, Clone)]
pub struct ConfigDescriptor {
    /// `bNumInterfaces`.
    pub num_interfaces: u8,
    /// `bConfigurationValue`.
    pub configuration_value: u8,
    /// `iConfiguration` string id.
    pub i_configuration: u8,
    /// `bmAttributes`; the always-one bit is added automatically.
    pub attributes: u8,
    /// `bMaxPower`, in 2 mA units.
    pub max_power: u8,
}

/// Assembles a complete configuration descriptor blob from the
/// configuration fields and the already-serialized descriptor runs of each
/// function, filling in `wTotalLength`. Returns the total length.
pub fn config_buf(config: &ConfigDescriptor, buf: &mut [u8], functions: &[&[u8]]) -> Result<usize> {
    let total: usize = 9 + functions.iter().map(|f| f.len()).sum::<usize>();

    if total > buf.len() || total > usize::from(u16::MAX) {
        return Err(UsbError::InvalidArgument);
    }

    buf[0] = 9;
    buf[1] = descriptor_type::CONFIGURATION;
    buf[2] = total as u8;
    buf[3] = (total >> 8) as u8;
    buf[4] = config.num_interfaces;
    buf[5] = config.configuration_value;
    buf[6] = config.i_configuration;
    buf[7] = config.attributes | 0x80;
    buf[8] = config.max_power;

    let mut position = 9;
    for function in functions {
        buf[position..position + function.len()].copy_from_slice(function);
        position += function.len();
    }

    Ok(total)
}
