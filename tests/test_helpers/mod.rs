//! Shared mock controller backend for the integration tests.
//!
//! The mock records every backend call and can be scripted to fail
//! specific operations, standing in for the hardware-specific behavior a
//! real UDC driver would have. Behavior handles are shared `Arc`s so tests
//! can keep poking at the backend after it has moved into an endpoint or
//! gadget.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use usb_gadget_core::prelude::*;
use usb_gadget_core::udc::OtgState;
use usb_gadget_core::udc_prelude::*;

#[derive(Default)]
pub struct EpBehavior {
    pub calls: Vec<String>,
    pub enable_error: Option<UsbError>,
    pub submit_error: Option<UsbError>,
    pub cancel_error: Option<UsbError>,
    pub halt_error: Option<UsbError>,
    /// `Some` simulates hardware with FIFO inspection support.
    pub fifo: Option<usize>,
    /// Packets each submitted request was segmented into.
    pub packets: Vec<usize>,
    pub maxpacket: u16,
}

pub struct MockEpOps {
    pub shared: Arc<Mutex<EpBehavior>>,
}

impl EndpointOps for MockEpOps {
    fn enable(
        &mut self,
        desc: &EndpointDescriptor,
        _comp: Option<&SsCompanionDescriptor>,
    ) -> Result<()> {
        let mut b = self.shared.lock().unwrap();
        if let Some(err) = b.enable_error {
            return Err(err);
        }
        b.maxpacket = desc.max_packet();
        b.calls.push(format!("enable {}", desc.max_packet()));
        Ok(())
    }

    fn disable(&mut self) -> Result<()> {
        let mut b = self.shared.lock().unwrap();
        b.calls.push("disable".into());
        Ok(())
    }

    fn submit(&mut self, req: &mut Request) -> Result<()> {
        let mut b = self.shared.lock().unwrap();
        if let Some(err) = b.submit_error {
            return Err(err);
        }
        // Requests are segmented into whole packets and never share one
        // with a neighbour, so the per-request count is just the ceiling.
        let maxpacket = usize::from(b.maxpacket.max(1));
        b.packets.push((req.length + maxpacket - 1) / maxpacket);
        b.calls.push(format!("submit {}", req.length));
        Ok(())
    }

    fn cancel(&mut self, _req: &mut Request) -> Result<()> {
        let mut b = self.shared.lock().unwrap();
        if let Some(err) = b.cancel_error {
            return Err(err);
        }
        b.calls.push("cancel".into());
        Ok(())
    }

    fn set_halt(&mut self, value: bool) -> Result<()> {
        let mut b = self.shared.lock().unwrap();
        if let Some(err) = b.halt_error {
            return Err(err);
        }
        b.calls.push(format!("halt {}", value));
        Ok(())
    }

    fn fifo_status(&self) -> Result<usize> {
        self.shared.lock().unwrap().fifo.ok_or(UsbError::NotSupported)
    }
}

#[derive(Default)]
pub struct UdcBehavior {
    pub calls: Vec<String>,
    /// Last value passed to `pullup`.
    pub pullup: Option<bool>,
    pub supports_pullup: bool,
    pub supports_vbus: bool,
    pub supports_wakeup: bool,
    pub supports_func_wakeup: bool,
    pub supports_restart: bool,
    pub otg: Option<OtgState>,
    pub start_error: Option<UsbError>,
}

pub struct MockUdc {
    pub shared: Arc<Mutex<UdcBehavior>>,
}

impl UdcCore for MockUdc {
    type EndpointOps = MockEpOps;

    fn start(&mut self) -> Result<()> {
        let mut b = self.shared.lock().unwrap();
        if let Some(err) = b.start_error {
            return Err(err);
        }
        b.calls.push("start".into());
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.lock().unwrap().calls.push("stop".into());
    }

    fn pullup(&mut self, is_on: bool) -> Result<()> {
        let mut b = self.shared.lock().unwrap();
        if !b.supports_pullup {
            return Err(UsbError::NotSupported);
        }
        b.pullup = Some(is_on);
        b.calls.push(format!("pullup {}", is_on));
        Ok(())
    }

    fn vbus_session(&mut self, is_active: bool) -> Result<()> {
        let mut b = self.shared.lock().unwrap();
        if !b.supports_vbus {
            return Err(UsbError::NotSupported);
        }
        b.calls.push(format!("vbus_session {}", is_active));
        Ok(())
    }

    fn vbus_draw(&mut self, milliamps: u16) -> Result<()> {
        let mut b = self.shared.lock().unwrap();
        if !b.supports_vbus {
            return Err(UsbError::NotSupported);
        }
        b.calls.push(format!("vbus_draw {}", milliamps));
        Ok(())
    }

    fn wakeup(&mut self) -> Result<()> {
        let mut b = self.shared.lock().unwrap();
        if !b.supports_wakeup {
            return Err(UsbError::NotSupported);
        }
        b.calls.push("wakeup".into());
        Ok(())
    }

    fn func_wakeup(&mut self, interface_id: u8) -> Result<()> {
        let mut b = self.shared.lock().unwrap();
        if !b.supports_func_wakeup {
            return Err(UsbError::NotSupported);
        }
        b.calls.push(format!("func_wakeup {}", interface_id));
        Ok(())
    }

    fn set_selfpowered(&mut self, is_selfpowered: bool) -> Result<()> {
        let mut b = self.shared.lock().unwrap();
        b.calls.push(format!("selfpowered {}", is_selfpowered));
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        let mut b = self.shared.lock().unwrap();
        if !b.supports_restart {
            return Err(UsbError::NotSupported);
        }
        b.calls.push("restart".into());
        Ok(())
    }

    fn refresh_otg(&mut self) -> Option<OtgState> {
        self.shared.lock().unwrap().otg
    }
}

/// One recorded completion.
pub struct CompletionEvent {
    pub ep: EndpointAddress,
    pub tag: RequestTag,
    pub status: Option<Result<()>>,
    pub actual: usize,
}

/// Completion handler that records every giveback and keeps the returned
/// requests for inspection or reuse.
#[derive(Default)]
pub struct Recorder {
    pub events: Mutex<Vec<CompletionEvent>>,
    pub returned: Mutex<Vec<Request>>,
}

impl Recorder {
    pub fn new() -> Arc<Recorder> {
        Arc::new(Recorder::default())
    }

    pub fn statuses(&self) -> Vec<Option<Result<()>>> {
        self.events.lock().unwrap().iter().map(|e| e.status).collect()
    }

    pub fn tags(&self) -> Vec<RequestTag> {
        self.events.lock().unwrap().iter().map(|e| e.tag).collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

impl Completion for Recorder {
    fn complete(&self, ep: EndpointAddress, req: Request) {
        self.events.lock().unwrap().push(CompletionEvent {
            ep,
            tag: req.tag(),
            status: req.status,
            actual: req.actual,
        });
        self.returned.lock().unwrap().push(req);
    }
}

pub fn mock_ep(
    name: &str,
    addr: u8,
    caps: EpCaps,
    maxpacket_limit: u16,
) -> (UsbEndpoint<MockEpOps>, Arc<Mutex<EpBehavior>>) {
    let shared = Arc::new(Mutex::new(EpBehavior::default()));
    let ep = UsbEndpoint::new(
        name,
        addr.into(),
        caps,
        maxpacket_limit,
        MockEpOps {
            shared: shared.clone(),
        },
    );
    (ep, shared)
}

pub fn bulk_desc(addr: u8, max_packet_size: u16) -> EndpointDescriptor {
    EndpointDescriptor {
        address: addr.into(),
        ep_type: EndpointType::Bulk,
        max_packet_size,
        interval: 0,
    }
}

pub fn iso_desc(addr: u8, max_packet_size: u16) -> EndpointDescriptor {
    EndpointDescriptor {
        address: addr.into(),
        ep_type: EndpointType::Isochronous,
        max_packet_size,
        interval: 1,
    }
}

/// Builds a request carrying `len` bytes that reports to `recorder`.
pub fn recorded_request(len: usize, recorder: &Arc<Recorder>) -> Request {
    let mut req = Request::with_buffer(vec![0u8; len]);
    req.completion = Some(recorder.clone());
    req
}

/// A gadget with a control endpoint, one bulk IN and one bulk OUT
/// endpoint, running on the mock backend at SuperSpeed capability.
pub fn mock_gadget() -> (
    UsbGadget<MockUdc>,
    Arc<Mutex<UdcBehavior>>,
    Arc<Mutex<EpBehavior>>,
) {
    let udc_shared = Arc::new(Mutex::new(UdcBehavior {
        supports_pullup: true,
        ..UdcBehavior::default()
    }));

    let (ep0, ep0_shared) = mock_ep("ep0", 0x80, EpCaps::control(), 64);
    let (ep_in, _) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 1024);
    let (ep_out, _) = mock_ep("ep2out-bulk", 0x02, EpCaps::data(false, true), 1024);

    let gadget = GadgetBuilder::new(
        "mock-udc",
        MockUdc {
            shared: udc_shared.clone(),
        },
        ep0,
    )
    .max_speed(UsbSpeed::Super)
    .endpoint(ep_in)
    .endpoint(ep_out)
    .build();

    (gadget, udc_shared, ep0_shared)
}

/// What the test driver's `setup` callback should do.
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum SetupAction {
    /// Queue one zero-length response on ep0.
    Respond,
    /// Reject the request so ep0 answers with a protocol stall.
    Reject,
    /// Return success without queueing anything.
    Ignore,
}

/// Gadget driver that records its callbacks.
pub struct TestDriver {
    pub log: Arc<Mutex<Vec<String>>>,
    pub setup_action: Arc<Mutex<SetupAction>>,
    pub bind_error: Option<UsbError>,
}

impl TestDriver {
    pub fn new() -> (Box<TestDriver>, Arc<Mutex<Vec<String>>>) {
        let (driver, log, _) = TestDriver::with_shared_action();
        (driver, log)
    }

    /// Like [`TestDriver::new`], but also hands out the setup-action
    /// handle so a test can change the behavior after the driver has
    /// bound.
    pub fn with_shared_action() -> (
        Box<TestDriver>,
        Arc<Mutex<Vec<String>>>,
        Arc<Mutex<SetupAction>>,
    ) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let setup_action = Arc::new(Mutex::new(SetupAction::Respond));
        let driver = Box::new(TestDriver {
            log: log.clone(),
            setup_action: setup_action.clone(),
            bind_error: None,
        });
        (driver, log, setup_action)
    }
}

impl GadgetDriver<MockUdc> for TestDriver {
    fn function(&self) -> &str {
        "test-function"
    }

    fn max_speed(&self) -> UsbSpeed {
        UsbSpeed::Super
    }

    fn bind(&mut self, _gadget: &mut UsbGadget<MockUdc>) -> Result<()> {
        self.log.lock().unwrap().push("bind".into());
        match self.bind_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn unbind(&mut self, _gadget: &mut UsbGadget<MockUdc>) {
        self.log.lock().unwrap().push("unbind".into());
    }

    fn setup(&mut self, gadget: &mut UsbGadget<MockUdc>, ctrl: &SetupPacket) -> Result<()> {
        self.log.lock().unwrap().push(format!("setup {}", ctrl.request));

        let action = *self.setup_action.lock().unwrap();
        match action {
            SetupAction::Respond => {
                let req = gadget.ep0_mut().alloc_request();
                gadget.ep0_mut().queue(req).map_err(|e| e.error)?;
                Ok(())
            }
            SetupAction::Reject => Err(UsbError::InvalidArgument),
            SetupAction::Ignore => Ok(()),
        }
    }

    fn disconnect(&mut self, _gadget: &mut UsbGadget<MockUdc>) {
        self.log.lock().unwrap().push("disconnect".into());
    }

    fn suspend(&mut self, gadget: &mut UsbGadget<MockUdc>) {
        let flags = gadget.otg_flags();
        self.log
            .lock()
            .unwrap()
            .push(format!("suspend hnp {}", flags.b_hnp_enable));
    }

    fn resume(&mut self, _gadget: &mut UsbGadget<MockUdc>) {
        self.log.lock().unwrap().push("resume".into());
    }

    fn reset(&mut self, _gadget: &mut UsbGadget<MockUdc>) {
        self.log.lock().unwrap().push("reset".into());
    }
}

/// A standard SET_CONFIGURATION(1) setup packet.
pub fn set_configuration_packet() -> SetupPacket {
    SetupPacket::parse(&[0x00, 9, 1, 0, 0, 0, 0, 0]).unwrap()
}

/// A vendor IN request with the given request code.
pub fn vendor_in_packet(request: u8) -> SetupPacket {
    SetupPacket::parse(&[0xc0, request, 0, 0, 0, 0, 4, 0]).unwrap()
}
