#![allow(unused_variables)]

//! Dummy controller backend with no functionality.
//!
//! Documentation examples can build a gadget around this backend just to
//! make them compile.

use crate::endpoint::{EndpointDescriptor, SsCompanionDescriptor};
use crate::request::Request;
use crate::udc::{EndpointOps, UdcCore};
use crate::Result;

/// Dummy device-wide backend.
pub struct DummyUdc;

impl DummyUdc {
    /// Creates a new `DummyUdc`.
    pub fn new() -> Self {
        Self
    }
}

impl Default for DummyUdc {
    fn default() -> Self {
        Self::new()
    }
}

impl UdcCore for DummyUdc {
    type EndpointOps = DummyEpOps;

    fn start(&mut self) -> Result<()> {
        unimplemented!()
    }

    fn stop(&mut self) {
        unimplemented!()
    }
}

/// Dummy per-endpoint backend.
pub struct DummyEpOps;

impl EndpointOps for DummyEpOps {
    fn enable(
        &mut self,
        desc: &EndpointDescriptor,
        comp: Option<&SsCompanionDescriptor>,
    ) -> Result<()> {
        unimplemented!()
    }

    fn disable(&mut self) -> Result<()> {
        unimplemented!()
    }

    fn submit(&mut self, req: &mut Request) -> Result<()> {
        unimplemented!()
    }

    fn cancel(&mut self, req: &mut Request) -> Result<()> {
        unimplemented!()
    }

    fn set_halt(&mut self, value: bool) -> Result<()> {
        unimplemented!()
    }
}
