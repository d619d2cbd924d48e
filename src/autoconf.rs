//! Endpoint auto-selection.
//!
//! Given an endpoint descriptor a function driver would like to use, find
//! an unclaimed hardware endpoint whose capabilities can carry it, claim
//! it, and fill the hardware address back into the descriptor. This keeps
//! function drivers portable across controllers with very different
//! endpoint layouts.

use crate::endpoint::{
    EndpointAddress, EndpointDescriptor, SsCompanionDescriptor, UsbEndpoint,
};
use crate::gadget::UsbGadget;
use crate::udc::{EndpointOps, UdcCore};

/// Whether `ep`'s capabilities can carry a transfer described by `desc`
/// (and `comp` for stream/burst demands).
///
/// An endpoint that is already claimed or enabled never matches.
pub fn ep_matches<E: EndpointOps>(
    ep: &UsbEndpoint<E>,
    desc: &EndpointDescriptor,
    comp: Option<&SsCompanionDescriptor>,
) -> bool {
    if ep.is_claimed() || ep.is_enabled() {
        return false;
    }

    if !ep.caps().supports_type(desc.ep_type)
        || !ep.caps().supports_dir(desc.address.direction())
    {
        return false;
    }

    let maxpacket = desc.max_packet();
    if maxpacket == 0 || maxpacket > ep.maxpacket_limit() {
        return false;
    }

    if let Some(comp) = comp {
        if comp.max_streams > ep.max_streams() {
            return false;
        }

        if comp.max_burst > 0 && ep.maxburst() == 0 {
            return false;
        }
    }

    true
}

impl<U: UdcCore> UsbGadget<U> {
    /// Selects and claims an unclaimed endpoint compatible with `desc`.
    ///
    /// On success the descriptor's address is rewritten to the selected
    /// hardware endpoint's number, keeping the direction the descriptor
    /// asked for, and the endpoint is marked claimed so later calls skip
    /// it. Returns `None` when no capable endpoint remains.
    pub fn ep_autoconfig(
        &mut self,
        desc: &mut EndpointDescriptor,
    ) -> Option<&mut UsbEndpoint<U::EndpointOps>> {
        self.ep_autoconfig_ss(desc, None)
    }

    /// Like [`ep_autoconfig`](UsbGadget::ep_autoconfig), but also honors a
    /// SuperSpeed companion descriptor's stream and burst demands.
    pub fn ep_autoconfig_ss(
        &mut self,
        desc: &mut EndpointDescriptor,
        comp: Option<&SsCompanionDescriptor>,
    ) -> Option<&mut UsbEndpoint<U::EndpointOps>> {
        let pos = self
            .eps()
            .iter()
            .position(|ep| ep_matches(ep, desc, comp))?;

        let ep = &mut self.eps_mut()[pos];
        desc.address = EndpointAddress::from_parts(ep.address().number(), desc.address.direction());
        ep.claim();

        Some(ep)
    }

    /// Returns a previously auto-selected endpoint to the unclaimed pool.
    pub fn ep_autoconfig_release(&mut self, addr: EndpointAddress) {
        if let Some(ep) = self.eps_mut().iter_mut().find(|ep| ep.address() == addr) {
            ep.release_claim();
        }
    }

    /// Releases every auto-selection on this gadget, for when a
    /// configuration is rebuilt from scratch.
    pub fn ep_autoconfig_reset(&mut self) {
        for ep in self.eps_mut() {
            ep.release_claim();
        }
    }
}
