//! I/O requests and their completion contract.
//!
//! A [`Request`] describes one transfer on one endpoint: a buffer, a logical
//! length, per-transfer flags and a completion handler. Requests are created
//! through [`UsbEndpoint::alloc_request`](crate::endpoint::UsbEndpoint::alloc_request)
//! so the controller driver can shape them up front, filled in by the
//! submitter, and then moved into the endpoint queue by
//! [`queue`](crate::endpoint::UsbEndpoint::queue). While a request is
//! outstanding it is owned by the controller side and the submitter holds no
//! reference to it; ownership returns to the submitter through the single
//! [`Completion::complete`] call.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::fmt;

use portable_atomic::{AtomicU32, Ordering};

use crate::endpoint::EndpointAddress;
use crate::{Result, UsbError};

// Tags stay unique for the lifetime of the program so a stale tag can never
// alias a newer request.
static NEXT_TAG: AtomicU32 = AtomicU32::new(1);

/// Names a request after its ownership has moved into an endpoint queue.
///
/// The tag is assigned when the request is created and never changes, so the
/// submitter can keep it across `queue` and use it to
/// [`dequeue`](crate::endpoint::UsbEndpoint::dequeue) the request later.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequestTag(u32);

impl RequestTag {
    fn next() -> RequestTag {
        RequestTag(NEXT_TAG.fetch_add(1, Ordering::Relaxed))
    }
}

/// The transfer buffer of a request.
pub enum RequestBuf {
    /// One contiguous buffer.
    Contiguous(Vec<u8>),

    /// A scatter list, for controllers that advertise scatter-gather
    /// support. The entry count is the vector length.
    Scatter(Vec<Vec<u8>>),
}

impl RequestBuf {
    /// Total capacity in bytes over all segments.
    pub fn capacity(&self) -> usize {
        match self {
            RequestBuf::Contiguous(buf) => buf.len(),
            RequestBuf::Scatter(sg) => sg.iter().map(|s| s.len()).sum(),
        }
    }

    /// Number of scatter entries; `1` for a contiguous buffer.
    pub fn num_sgs(&self) -> usize {
        match self {
            RequestBuf::Contiguous(_) => 1,
            RequestBuf::Scatter(sg) => sg.len(),
        }
    }
}

/// Completion handler of a request.
///
/// The controller driver invokes this exactly once per `queue` call, from
/// its event-delivery path. That path runs with interrupts off on most
/// hardware: the handler must not block, sleep or call back into operations
/// that may do either. Follow-on work that needs to block has to be handed
/// to a different execution context.
///
/// The request is passed back by value; whatever the handler does with it
/// (requeue it, pool it, drop it) is the submitter's business. The endpoint
/// queue does not advance past a failed request until this call returns, so
/// the handler gets a chance to dequeue now-invalid dependent requests
/// first.
pub trait Completion: Send + Sync {
    /// Called when the request finishes, is cancelled, or is shut down.
    fn complete(&self, ep: EndpointAddress, req: Request);
}

/// Describes one I/O request on an endpoint.
///
/// All fields except the tag are owned by whichever side currently holds the
/// request: the submitter until `queue`, the controller side until the
/// completion call, the submitter again afterwards. The submitter must not
/// retain references into a queued request.
pub struct Request {
    /// Transfer buffer. For IN transfers the first `length` bytes are sent;
    /// for OUT transfers up to `length` bytes are received into it.
    pub buf: RequestBuf,

    /// Logical transfer length in bytes. Must not exceed the buffer
    /// capacity.
    pub length: usize,

    /// Bus address of an already-mapped buffer. Meaningful only together
    /// with [`dma_pre_mapped`](Request::dma_pre_mapped).
    pub dma: Option<u64>,

    /// The submitter already mapped the buffer for DMA and keeps the
    /// mapping alive for the duration of the transfer; the controller
    /// driver must skip its own mapping step.
    pub dma_pre_mapped: bool,

    /// Number of scatter entries the controller driver has mapped.
    /// Controller bookkeeping; drivers above the controller leave it alone.
    pub num_mapped_sgs: usize,

    /// Hint that no completion interrupt is needed for this request.
    /// Useful with deep queues handled directly by DMA hardware; the
    /// completion handler still runs.
    pub no_interrupt: bool,

    /// When writing, terminate the transfer with a short packet, adding a
    /// zero-length packet if the data happens to fill the last packet
    /// completely.
    pub zero: bool,

    /// When reading, treat a short transfer as an error: the completion
    /// status becomes [`UsbError::ShortTransfer`] even though the data that
    /// did arrive is valid.
    pub short_not_ok: bool,

    /// Bulk stream identifier, when USB 3.x streams are in use. Zero for
    /// ordinary transfers.
    pub stream_id: u16,

    /// Completion handler. A request without one is dropped when it
    /// completes, which is only useful for fire-and-forget transfers whose
    /// outcome nobody inspects.
    pub completion: Option<Arc<dyn Completion>>,

    /// Opaque value for the submitter, carried through untouched.
    pub context: Option<Box<dyn Any + Send>>,

    /// Outcome of the last submission; `None` while owned by the submitter
    /// before the first queue, and while outstanding.
    pub status: Option<Result<()>>,

    /// Bytes actually transferred. For OUT transfers this may be less than
    /// `length`; for IN transfers some of the counted bytes may still sit
    /// in a device-side FIFO when the request completes.
    pub actual: usize,

    tag: RequestTag,
}

impl Request {
    /// Creates an empty request.
    ///
    /// Most submitters should prefer
    /// [`UsbEndpoint::alloc_request`](crate::endpoint::UsbEndpoint::alloc_request),
    /// which lets the controller driver pre-shape the request.
    pub fn new() -> Request {
        Request {
            buf: RequestBuf::Contiguous(Vec::new()),
            length: 0,
            dma: None,
            dma_pre_mapped: false,
            num_mapped_sgs: 0,
            no_interrupt: false,
            zero: false,
            short_not_ok: false,
            stream_id: 0,
            completion: None,
            context: None,
            status: None,
            actual: 0,
            tag: RequestTag::next(),
        }
    }

    /// Creates a request around `buf`, with the logical length set to the
    /// whole buffer.
    pub fn with_buffer(buf: Vec<u8>) -> Request {
        let mut req = Request::new();
        req.length = buf.len();
        req.buf = RequestBuf::Contiguous(buf);
        req
    }

    /// The tag naming this request across the ownership transfer.
    pub fn tag(&self) -> RequestTag {
        self.tag
    }
}

impl Default for Request {
    fn default() -> Request {
        Request::new()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("tag", &self.tag)
            .field("length", &self.length)
            .field("stream_id", &self.stream_id)
            .field("status", &self.status)
            .field("actual", &self.actual)
            .finish()
    }
}

/// Error returned by [`queue`](crate::endpoint::UsbEndpoint::queue), handing
/// the rejected request back to the caller.
pub struct QueueError {
    /// Why the submission was refused.
    pub error: UsbError,

    /// The request, unchanged; ownership never left the caller.
    pub request: Request,
}

impl fmt::Debug for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueError")
            .field("error", &self.error)
            .field("request", &self.request)
            .finish()
    }
}

/// Hands a finished request back to its submitter.
///
/// Fills in the output fields and runs the completion handler. Runs on the
/// controller's event path; see [`Completion`] for the context rules.
pub(crate) fn give_back(ep: EndpointAddress, mut req: Request, status: Result<()>, actual: usize) {
    req.status = Some(status);
    req.actual = actual;

    gadget_trace!(
        "ep{} giveback, actual {}, ok {}",
        ep.number(),
        actual,
        status.is_ok()
    );

    if let Some(completion) = req.completion.clone() {
        completion.complete(ep, req);
    }
}
