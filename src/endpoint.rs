//! Endpoints and their lifecycle state machine.
//!
//! A [`UsbEndpoint`] is the addressable I/O object of the gadget core. The
//! controller driver constructs one per hardware endpoint at probe time
//! (plus the dedicated control endpoint), the gadget driver claims and
//! enables endpoints when a configuration is selected, and all I/O flows
//! through the per-endpoint FIFO of outstanding [`Request`]s.
//!
//! The lifecycle is Disabled → Enabled, with Halted orthogonal on enabled
//! non-control endpoints: a halted endpoint stays enabled and keeps its
//! queue, it just stops streaming data until the halt clears.

use alloc::collections::VecDeque;

use heapless::String;

use crate::request::{self, QueueError, Request, RequestTag};
use crate::udc::EndpointOps;
use crate::{Result, UsbDirection, UsbError};

/// A USB endpoint address: a number plus a direction bit.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointAddress(u8);

impl From<u8> for EndpointAddress {
    #[inline]
    fn from(addr: u8) -> EndpointAddress {
        EndpointAddress(addr)
    }
}

impl From<EndpointAddress> for u8 {
    #[inline]
    fn from(addr: EndpointAddress) -> u8 {
        addr.0
    }
}

impl EndpointAddress {
    const INBIT: u8 = UsbDirection::In as u8;

    /// Constructs an address from an endpoint number and direction.
    #[inline]
    pub fn from_parts(number: u8, dir: UsbDirection) -> EndpointAddress {
        EndpointAddress(number | dir as u8)
    }

    /// The direction bit of the address.
    #[inline]
    pub fn direction(&self) -> UsbDirection {
        if (self.0 & Self::INBIT) != 0 {
            UsbDirection::In
        } else {
            UsbDirection::Out
        }
    }

    /// The endpoint number, without the direction bit.
    #[inline]
    pub fn number(&self) -> u8 {
        self.0 & !Self::INBIT
    }
}

/// USB endpoint transfer type. Discriminants match the `bmAttributes`
/// transfer type bits.
#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointType {
    /// Control endpoint. Bidirectional, reserved for endpoint zero.
    Control = 0b00,

    /// Isochronous endpoint, for time-critical unreliable data.
    Isochronous = 0b01,

    /// Bulk endpoint, for large amounts of best-effort reliable data.
    Bulk = 0b10,

    /// Interrupt endpoint, for small amounts of time-critical reliable
    /// data.
    Interrupt = 0b11,
}

/// What a hardware endpoint can do.
///
/// Built by the controller driver when the endpoint is constructed and
/// read-only to everything else; the auto-selection policy and
/// [`UsbEndpoint::enable`] check descriptors against these facts.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EpCaps {
    /// Supports control transfers (endpoint zero).
    pub type_control: bool,
    /// Supports isochronous transfers.
    pub type_iso: bool,
    /// Supports bulk transfers.
    pub type_bulk: bool,
    /// Supports interrupt transfers.
    pub type_int: bool,
    /// Supports the IN direction.
    pub dir_in: bool,
    /// Supports the OUT direction.
    pub dir_out: bool,
}

impl EpCaps {
    /// Capabilities of a control-only endpoint.
    pub const fn control() -> EpCaps {
        EpCaps {
            type_control: true,
            type_iso: false,
            type_bulk: false,
            type_int: false,
            dir_in: true,
            dir_out: true,
        }
    }

    /// Capabilities of a fully generic data endpoint: all non-control
    /// transfer types in the given directions.
    pub const fn data(dir_in: bool, dir_out: bool) -> EpCaps {
        EpCaps {
            type_control: false,
            type_iso: true,
            type_bulk: true,
            type_int: true,
            dir_in,
            dir_out,
        }
    }

    /// Whether the endpoint supports the given transfer type.
    pub fn supports_type(&self, ep_type: EndpointType) -> bool {
        match ep_type {
            EndpointType::Control => self.type_control,
            EndpointType::Isochronous => self.type_iso,
            EndpointType::Bulk => self.type_bulk,
            EndpointType::Interrupt => self.type_int,
        }
    }

    /// Whether the endpoint supports the given direction.
    pub fn supports_dir(&self, dir: UsbDirection) -> bool {
        match dir {
            UsbDirection::In => self.dir_in,
            UsbDirection::Out => self.dir_out,
        }
    }
}

/// The endpoint descriptor fields that configure an endpoint.
///
/// `max_packet_size` is the raw `wMaxPacketSize` value, including the
/// high-bandwidth transaction bits for isochronous and interrupt endpoints.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointDescriptor {
    /// Endpoint address.
    pub address: EndpointAddress,

    /// Endpoint transfer type.
    pub ep_type: EndpointType,

    /// Raw `wMaxPacketSize` value.
    pub max_packet_size: u16,

    /// Poll interval for interrupt and isochronous endpoints.
    pub interval: u8,
}

impl EndpointDescriptor {
    /// The maximum packet size in bytes, without the high-bandwidth bits.
    pub fn max_packet(&self) -> u16 {
        self.max_packet_size & 0x7ff
    }

    /// Additional transactions per microframe encoded in the
    /// high-bandwidth bits (0 to 2).
    pub fn high_bandwidth_mult(&self) -> u8 {
        ((self.max_packet_size >> 11) & 0x3) as u8
    }
}

/// SuperSpeed endpoint companion descriptor fields relevant to endpoint
/// configuration.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SsCompanionDescriptor {
    /// `bMaxBurst`: packets per burst minus one.
    pub max_burst: u8,

    /// Stream count exponent for bulk endpoints; the endpoint uses
    /// 2^`max_streams` streams. Zero means streams are not used.
    pub max_streams: u8,

    /// Transaction multiplier for SuperSpeed isochronous endpoints.
    pub mult: u8,

    /// `wBytesPerInterval` for periodic endpoints.
    pub bytes_per_interval: u16,
}

// Response bookkeeping for control endpoints; data endpoints stay Idle.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
enum ControlPhase {
    Idle,
    AwaitingResponse,
    Responded,
    Stalled,
}

/// Device-side representation of a USB endpoint.
///
/// Owns the capability facts, the negotiated configuration, the
/// enabled/halted state and the FIFO of outstanding requests, and forwards
/// each operation to the controller driver's [`EndpointOps`].
///
/// Concurrency is the caller's problem by contract: configuration-changing
/// operations (`enable`, `disable`, `set_halt`) must not race I/O
/// submission on the same endpoint. The core does not lock.
pub struct UsbEndpoint<E: EndpointOps> {
    ops: E,
    name: String<16>,
    address: EndpointAddress,
    caps: EpCaps,
    maxpacket: u16,
    maxpacket_limit: u16,
    max_streams: u8,
    mult: u8,
    maxburst: u8,
    desc: Option<EndpointDescriptor>,
    comp_desc: Option<SsCompanionDescriptor>,
    enabled: bool,
    claimed: bool,
    halted: bool,
    wedged: bool,
    accelerated: bool,
    control_phase: ControlPhase,
    queue: VecDeque<Request>,
}

impl<E: EndpointOps> UsbEndpoint<E> {
    /// Creates an endpoint. Called by controller drivers at probe time.
    ///
    /// `name` identifies the endpoint in diagnostics, in the style of
    /// `"ep1in-bulk"` or `"ep-a"`; names longer than the internal limit are
    /// truncated. `maxpacket_limit` is the hardware ceiling for the packet
    /// size this endpoint can ever be configured with.
    pub fn new(
        name: &str,
        address: EndpointAddress,
        caps: EpCaps,
        maxpacket_limit: u16,
        ops: E,
    ) -> UsbEndpoint<E> {
        let mut ep_name = String::new();
        let _ = ep_name.push_str(name);

        UsbEndpoint {
            ops,
            name: ep_name,
            address,
            caps,
            maxpacket: maxpacket_limit,
            maxpacket_limit,
            max_streams: 0,
            mult: 0,
            maxburst: 0,
            desc: None,
            comp_desc: None,
            enabled: false,
            claimed: false,
            halted: false,
            wedged: false,
            accelerated: false,
            control_phase: ControlPhase::Idle,
            queue: VecDeque::new(),
        }
    }

    /// Stable name of the endpoint.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Endpoint address. For generic endpoints the direction bit becomes
    /// meaningful once a descriptor selects one.
    pub fn address(&self) -> EndpointAddress {
        self.address
    }

    /// Capability facts of this endpoint.
    pub fn caps(&self) -> EpCaps {
        self.caps
    }

    /// The negotiated maximum packet size.
    pub fn maxpacket(&self) -> u16 {
        self.maxpacket
    }

    /// The hardware maximum packet size ceiling.
    pub fn maxpacket_limit(&self) -> u16 {
        self.maxpacket_limit
    }

    /// Resets the hardware packet size ceiling, and with it the current
    /// negotiated value. For controller drivers, during initialization
    /// only.
    pub fn set_maxpacket_limit(&mut self, limit: u16) {
        self.maxpacket_limit = limit;
        self.maxpacket = limit;
    }

    /// Stream count exponent supported by the hardware (bulk streams).
    pub fn max_streams(&self) -> u8 {
        self.max_streams
    }

    /// Declares hardware stream support. For controller drivers, during
    /// initialization only.
    pub fn set_max_streams(&mut self, max_streams: u8) {
        self.max_streams = max_streams;
    }

    /// Isochronous transaction multiplier supported by the hardware.
    pub fn mult(&self) -> u8 {
        self.mult
    }

    /// Declares the hardware isochronous multiplier. For controller
    /// drivers, during initialization only.
    pub fn set_mult(&mut self, mult: u8) {
        self.mult = mult;
    }

    /// Maximum burst size supported by the hardware (SuperSpeed).
    pub fn maxburst(&self) -> u8 {
        self.maxburst
    }

    /// Declares the hardware burst ceiling. For controller drivers, during
    /// initialization only.
    pub fn set_maxburst(&mut self, maxburst: u8) {
        self.maxburst = maxburst;
    }

    /// Whether this endpoint runs in a hardware-accelerated transfer mode.
    /// The acceleration extensions themselves live in the controller
    /// driver; the core only records the marker.
    pub fn is_accelerated(&self) -> bool {
        self.accelerated
    }

    /// Marks the endpoint as hardware-accelerated. For controller drivers.
    pub fn set_accelerated(&mut self, accelerated: bool) {
        self.accelerated = accelerated;
    }

    /// Whether the endpoint is currently enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the endpoint is currently halted.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Whether the endpoint is halted and resisting host-initiated clears.
    pub fn is_wedged(&self) -> bool {
        self.wedged
    }

    /// Whether the endpoint has been claimed by configuration logic.
    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    /// The descriptor the endpoint is configured with. `Some` exactly while
    /// the endpoint is enabled.
    pub fn descriptor(&self) -> Option<&EndpointDescriptor> {
        self.desc.as_ref()
    }

    /// The companion descriptor used at enable time, if any.
    pub fn companion_descriptor(&self) -> Option<&SsCompanionDescriptor> {
        self.comp_desc.as_ref()
    }

    /// Number of requests currently outstanding.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Rounds `len` up to a multiple of the negotiated packet size.
    pub fn align(&self, len: usize) -> usize {
        let maxpacket = usize::from(self.maxpacket);
        if maxpacket == 0 {
            return len;
        }
        (len + maxpacket - 1) / maxpacket * maxpacket
    }

    fn is_control(&self) -> bool {
        self.caps.type_control
    }

    /// Configures the endpoint and makes it usable for I/O.
    ///
    /// Not valid for the control endpoint, which needs no enabling. The
    /// descriptor must fit the endpoint's capabilities and carry a non-zero
    /// maximum packet size no larger than the hardware ceiling. Calling
    /// this on an endpoint that is already enabled is a successful no-op.
    ///
    /// On a controller-driver failure the endpoint remains disabled.
    pub fn enable(
        &mut self,
        desc: &EndpointDescriptor,
        comp: Option<&SsCompanionDescriptor>,
    ) -> Result<()> {
        if self.is_control() {
            return Err(UsbError::InvalidArgument);
        }

        if self.enabled {
            return Ok(());
        }

        // Controller drivers can't handle endpoints with maxpacket size 0.
        let maxpacket = desc.max_packet();
        if maxpacket == 0 || maxpacket > self.maxpacket_limit {
            return Err(UsbError::InvalidArgument);
        }

        if !self.caps.supports_type(desc.ep_type)
            || !self.caps.supports_dir(desc.address.direction())
        {
            return Err(UsbError::InvalidArgument);
        }

        if let Some(comp) = comp {
            if comp.max_streams > self.max_streams {
                return Err(UsbError::InvalidArgument);
            }
        }

        self.ops.enable(desc, comp)?;

        self.desc = Some(*desc);
        self.comp_desc = comp.copied();
        self.maxpacket = maxpacket;
        self.address = desc.address;
        self.enabled = true;

        gadget_debug!(
            "{}: enabled, maxpacket {}",
            self.name.as_str(),
            maxpacket
        );

        Ok(())
    }

    /// Takes the endpoint out of service.
    ///
    /// Before this returns, every outstanding request on the endpoint has
    /// completed with [`UsbError::Shutdown`]. No other party may be
    /// queueing on the endpoint concurrently; serializing configuration
    /// changes against submission is the caller's responsibility. Calling
    /// this on an endpoint that is already disabled is a successful no-op.
    pub fn disable(&mut self) -> Result<()> {
        if self.is_control() {
            return Err(UsbError::InvalidArgument);
        }

        if !self.enabled {
            return Ok(());
        }

        self.ops.disable()?;

        self.enabled = false;
        self.desc = None;
        self.comp_desc = None;
        self.halted = false;
        self.wedged = false;
        self.nuke(UsbError::Shutdown);

        gadget_debug!("{}: disabled", self.name.as_str());

        Ok(())
    }

    /// Completes every outstanding request with `error`, in FIFO order.
    pub(crate) fn nuke(&mut self, error: UsbError) {
        while let Some(req) = self.queue.pop_front() {
            let actual = req.actual;
            request::give_back(self.address, req, Err(error), actual);
        }
    }

    /// Creates a request shaped for this endpoint.
    ///
    /// Going through the endpoint lets the controller driver pre-size
    /// buffers or embed per-request bookkeeping, so submitters should
    /// prefer this over [`Request::new`].
    pub fn alloc_request(&mut self) -> Request {
        self.ops.alloc_request()
    }

    /// Submits a request, transferring its ownership into the endpoint
    /// queue until the completion handler hands it back.
    ///
    /// Requests queue in FIFO order and complete in that same order. The
    /// controller turns each request into one or more USB packets; adjacent
    /// requests are never merged into one packet, and the first byte of the
    /// request's buffer always lands on a packet boundary in both
    /// directions.
    ///
    /// Control endpoints are different: they accept exactly one response
    /// per setup event. Queueing without a pending setup fails with
    /// [`UsbError::InvalidArgument`], a second response fails with
    /// [`UsbError::Busy`], and after a protocol stall the queue refuses
    /// with [`UsbError::Stalled`] until the next setup event.
    ///
    /// On failure the request never left the caller; it comes back inside
    /// the [`QueueError`].
    pub fn queue(&mut self, mut req: Request) -> core::result::Result<RequestTag, QueueError> {
        if let Err(error) = self.queue_checks(&req) {
            return Err(QueueError {
                error,
                request: req,
            });
        }

        req.status = None;
        req.actual = 0;

        if let Err(error) = self.ops.submit(&mut req) {
            return Err(QueueError {
                error,
                request: req,
            });
        }

        if self.is_control() {
            self.control_phase = ControlPhase::Responded;
        }

        gadget_trace!(
            "{}: queued {} bytes",
            self.name.as_str(),
            req.length
        );

        let tag = req.tag();
        self.queue.push_back(req);
        Ok(tag)
    }

    fn queue_checks(&self, req: &Request) -> Result<()> {
        if self.is_control() {
            match self.control_phase {
                ControlPhase::AwaitingResponse => {}
                ControlPhase::Responded => return Err(UsbError::Busy),
                ControlPhase::Stalled => return Err(UsbError::Stalled),
                ControlPhase::Idle => return Err(UsbError::InvalidArgument),
            }
        } else if !self.enabled {
            return Err(UsbError::NotEnabled);
        }

        if req.length > req.buf.capacity() {
            return Err(UsbError::InvalidArgument);
        }

        if req.stream_id != 0 && self.max_streams == 0 {
            return Err(UsbError::InvalidArgument);
        }

        Ok(())
    }

    /// Cancels an outstanding request.
    ///
    /// Cancellation is synchronous and total: when this returns `Ok`, the
    /// request has already completed with [`UsbError::Cancelled`] and been
    /// handed back through its completion handler. A request that is not
    /// outstanding fails with [`UsbError::NotFound`].
    ///
    /// Some hardware cannot unlink the head of a write FIFO it has already
    /// started transmitting except by disconnecting entirely; such a
    /// controller reports its error here and the request stays queued.
    pub fn dequeue(&mut self, tag: RequestTag) -> Result<()> {
        let pos = self
            .queue
            .iter()
            .position(|r| r.tag() == tag)
            .ok_or(UsbError::NotFound)?;

        self.ops.cancel(&mut self.queue[pos])?;

        if let Some(req) = self.queue.remove(pos) {
            let actual = req.actual;
            request::give_back(self.address, req, Err(UsbError::Cancelled), actual);
        }

        Ok(())
    }

    fn halt_checks(&self) -> Result<()> {
        if !self.is_control() {
            if !self.enabled {
                return Err(UsbError::NotEnabled);
            }

            if self.desc.map(|d| d.ep_type) == Some(EndpointType::Isochronous) {
                return Err(UsbError::InvalidArgument);
            }
        }

        Ok(())
    }

    /// Sets or clears the halt (stall) condition.
    ///
    /// Halting an IN endpoint fails with [`UsbError::Busy`] while requests
    /// are still queued; the controller driver may additionally report
    /// `Busy` while its FIFO still holds bytes the host has not collected.
    /// Not valid for isochronous endpoints, which have no halt state.
    ///
    /// Clearing the halt also clears a wedge and resets the endpoint's
    /// data toggle; the controller driver owns the toggle reset.
    pub fn set_halt(&mut self, value: bool) -> Result<()> {
        self.halt_checks()?;

        if value {
            if self.address.direction() == UsbDirection::In && !self.queue.is_empty() {
                return Err(UsbError::Busy);
            }

            self.ops.set_halt(true)?;
            self.halted = true;
        } else {
            self.ops.set_halt(false)?;
            self.halted = false;
            self.wedged = false;
        }

        gadget_debug!("{}: halt {}", self.name.as_str(), value);

        Ok(())
    }

    /// Halts the endpoint and marks it so a host-initiated clear does not
    /// take effect; only [`set_halt(false)`](UsbEndpoint::set_halt) clears
    /// a wedged endpoint.
    ///
    /// Controllers without a dedicated wedge operation fall back to a
    /// plain halt; the core still tracks the wedge.
    pub fn set_wedge(&mut self) -> Result<()> {
        self.halt_checks()?;

        if self.address.direction() == UsbDirection::In && !self.queue.is_empty() {
            return Err(UsbError::Busy);
        }

        self.ops.set_wedge()?;
        self.halted = true;
        self.wedged = true;

        Ok(())
    }

    /// Handles a host-initiated CLEAR_FEATURE(ENDPOINT_HALT).
    ///
    /// For the configuration layer that processes standard requests. On a
    /// wedged endpoint this is a successful no-op and the halt stays in
    /// place.
    pub fn clear_halt_from_host(&mut self) -> Result<()> {
        if self.wedged {
            return Ok(());
        }

        self.ops.set_halt(false)?;
        self.halted = false;
        Ok(())
    }

    /// Number of bytes sitting unclaimed in the endpoint's hardware FIFO,
    /// for example after an aborted transfer. Fails with
    /// [`UsbError::NotSupported`] on controllers without FIFO inspection.
    pub fn fifo_status(&self) -> Result<usize> {
        self.ops.fifo_status()
    }

    /// Discards any unclaimed bytes in the endpoint's hardware FIFO.
    /// Must only be used while the endpoint is not mid-protocol. Fails
    /// with [`UsbError::NotSupported`] on controllers without FIFO
    /// control.
    pub fn fifo_flush(&mut self) -> Result<()> {
        self.ops.fifo_flush()
    }

    /// Completes the request at the head of the queue and hands it back to
    /// its submitter.
    ///
    /// This is the controller driver's giveback path, called from its
    /// event handler when the hardware finishes (or faults) the oldest
    /// transfer. Only the head can complete, which keeps completion order
    /// equal to submission order on every backend.
    ///
    /// A successful OUT transfer whose `actual` falls short of the
    /// requested length is upgraded to [`UsbError::ShortTransfer`] when
    /// the request asked for that with `short_not_ok`. The completion
    /// handler runs before this returns, so on an error the submitter can
    /// dequeue dependent requests before the controller resumes the
    /// queue.
    pub fn complete_head(&mut self, status: Result<()>, actual: usize) -> Result<()> {
        let req = self.queue.pop_front().ok_or(UsbError::NotFound)?;

        let status = match status {
            Ok(()) if req.short_not_ok && actual < req.length => Err(UsbError::ShortTransfer),
            other => other,
        };

        if self.is_control() && self.control_phase == ControlPhase::Responded {
            self.control_phase = ControlPhase::Idle;
        }

        request::give_back(self.address, req, status, actual);
        Ok(())
    }

    /// Direct access to the controller driver's per-endpoint state.
    pub fn ops(&self) -> &E {
        &self.ops
    }

    /// Mutable access to the controller driver's per-endpoint state.
    pub fn ops_mut(&mut self) -> &mut E {
        &mut self.ops
    }

    pub(crate) fn claim(&mut self) {
        self.claimed = true;
    }

    pub(crate) fn release_claim(&mut self) {
        self.claimed = false;
    }

    /// Opens the one-response window for a new setup event on a control
    /// endpoint. A pending stall from the previous transaction clears, as
    /// control halts do on new setup packets.
    pub(crate) fn begin_setup(&mut self) {
        self.control_phase = ControlPhase::AwaitingResponse;
        self.halted = false;
    }

    /// Answers the current setup transaction with a protocol stall and
    /// closes the response window until the next setup event.
    pub(crate) fn protocol_stall(&mut self) -> Result<()> {
        self.control_phase = ControlPhase::Stalled;
        self.halted = true;
        self.ops.set_halt(true)
    }
}
