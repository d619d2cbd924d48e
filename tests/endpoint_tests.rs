//! Endpoint lifecycle, queueing, cancellation and halt behavior.

mod test_helpers;

use rand::Rng;
use std::sync::Arc;

use test_helpers::*;
use usb_gadget_core::prelude::*;
use usb_gadget_core::udc_prelude::EpCaps;

#[test]
fn enable_rejects_zero_maxpacket() {
    let (mut ep, shared) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);

    let err = ep.enable(&bulk_desc(0x81, 0), None).unwrap_err();

    assert_eq!(err, UsbError::InvalidArgument);
    assert!(!ep.is_enabled());
    assert!(shared.lock().unwrap().calls.is_empty());
}

#[test]
fn enable_rejects_maxpacket_above_hardware_limit() {
    let (mut ep, _) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 64);

    let err = ep.enable(&bulk_desc(0x81, 512), None).unwrap_err();

    assert_eq!(err, UsbError::InvalidArgument);
    assert!(!ep.is_enabled());
}

#[test]
fn enable_rejects_unsupported_type_and_direction() {
    let (mut ep, _) = mock_ep("ep1in-int", 0x81, EpCaps::data(true, false), 64);

    // OUT descriptor on an IN-only endpoint
    let err = ep.enable(&bulk_desc(0x01, 64), None).unwrap_err();
    assert_eq!(err, UsbError::InvalidArgument);

    // control type on a data endpoint
    let desc = EndpointDescriptor {
        address: 0x81.into(),
        ep_type: EndpointType::Control,
        max_packet_size: 64,
        interval: 0,
    };
    assert_eq!(ep.enable(&desc, None).unwrap_err(), UsbError::InvalidArgument);
}

#[test]
fn enable_is_idempotent() {
    let (mut ep, shared) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);

    ep.enable(&bulk_desc(0x81, 512), None).unwrap();
    ep.enable(&bulk_desc(0x81, 512), None).unwrap();

    assert!(ep.is_enabled());
    assert_eq!(ep.maxpacket(), 512);
    assert_eq!(shared.lock().unwrap().calls, vec!["enable 512"]);
}

#[test]
fn enable_backend_failure_leaves_endpoint_disabled() {
    let (mut ep, shared) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    shared.lock().unwrap().enable_error = Some(UsbError::DeviceError);

    let err = ep.enable(&bulk_desc(0x81, 512), None).unwrap_err();

    assert_eq!(err, UsbError::DeviceError);
    assert!(!ep.is_enabled());
    assert!(ep.descriptor().is_none());
}

#[test]
fn disable_is_idempotent() {
    let (mut ep, shared) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);

    ep.enable(&bulk_desc(0x81, 512), None).unwrap();
    ep.disable().unwrap();
    ep.disable().unwrap();

    assert!(!ep.is_enabled());
    assert!(ep.descriptor().is_none());
    let calls = shared.lock().unwrap().calls.clone();
    assert_eq!(calls, vec!["enable 512", "disable"]);
}

#[test]
fn disable_completes_outstanding_requests_with_shutdown() {
    let (mut ep, _) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    let recorder = Recorder::new();

    ep.enable(&bulk_desc(0x81, 512), None).unwrap();

    let mut tags = Vec::new();
    for _ in 0..3 {
        tags.push(ep.queue(recorded_request(8, &recorder)).unwrap());
    }

    ep.disable().unwrap();

    // every outstanding request completed, in order, before disable returned
    assert_eq!(ep.pending(), 0);
    assert_eq!(recorder.tags(), tags);
    assert_eq!(
        recorder.statuses(),
        vec![Some(Err(UsbError::Shutdown)); 3]
    );
}

#[test]
fn queue_requires_enabled_endpoint() {
    let (mut ep, _) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    let recorder = Recorder::new();

    let err = ep.queue(recorded_request(8, &recorder)).unwrap_err();

    assert_eq!(err.error, UsbError::NotEnabled);
    // the request never left the caller
    assert_eq!(err.request.length, 8);
    assert_eq!(recorder.count(), 0);
}

#[test]
fn queue_rejects_length_beyond_buffer() {
    let (mut ep, _) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    ep.enable(&bulk_desc(0x81, 512), None).unwrap();

    let mut req = Request::with_buffer(vec![0u8; 8]);
    req.length = 64;

    let err = ep.queue(req).unwrap_err();
    assert_eq!(err.error, UsbError::InvalidArgument);
}

#[test]
fn queue_rejects_streams_without_hardware_support() {
    let (mut ep, _) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    ep.enable(&bulk_desc(0x81, 512), None).unwrap();

    let mut req = Request::with_buffer(vec![0u8; 8]);
    req.stream_id = 4;

    let err = ep.queue(req).unwrap_err();
    assert_eq!(err.error, UsbError::InvalidArgument);
}

#[test]
fn refused_submit_hands_the_request_back() {
    let (mut ep, shared) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    ep.enable(&bulk_desc(0x81, 512), None).unwrap();

    shared.lock().unwrap().submit_error = Some(UsbError::Busy);
    let err = ep.queue(Request::with_buffer(vec![1, 2, 3])).unwrap_err();
    assert_eq!(err.error, UsbError::Busy);
    assert_eq!(ep.pending(), 0);

    // the returned request is usable as-is once the backend recovers
    shared.lock().unwrap().submit_error = None;
    ep.queue(err.request).unwrap();
    assert_eq!(ep.pending(), 1);
}

#[test]
fn completions_preserve_submission_order() {
    let (mut ep, _) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    let recorder = Recorder::new();

    ep.enable(&bulk_desc(0x81, 512), None).unwrap();

    let mut tags = Vec::new();
    for len in 1..=5 {
        tags.push(ep.queue(recorded_request(len * 16, &recorder)).unwrap());
    }

    for len in 1..=5 {
        ep.complete_head(Ok(()), len * 16).unwrap();
    }

    assert_eq!(recorder.tags(), tags);
    assert_eq!(recorder.statuses(), vec![Some(Ok(())); 5]);
}

#[test]
fn complete_head_on_empty_queue_fails() {
    let (mut ep, _) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    ep.enable(&bulk_desc(0x81, 512), None).unwrap();

    assert_eq!(ep.complete_head(Ok(()), 0).unwrap_err(), UsbError::NotFound);
}

#[test]
fn dequeue_completes_with_cancelled_before_returning() {
    let (mut ep, _) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    let recorder = Recorder::new();

    ep.enable(&bulk_desc(0x81, 512), None).unwrap();
    let first = ep.queue(recorded_request(32, &recorder)).unwrap();
    let second = ep.queue(recorded_request(32, &recorder)).unwrap();

    ep.dequeue(second).unwrap();

    // the cancellation completion already fired
    assert_eq!(recorder.tags(), vec![second]);
    assert_eq!(recorder.statuses(), vec![Some(Err(UsbError::Cancelled))]);
    assert_eq!(ep.pending(), 1);

    // the untouched head still completes normally
    ep.complete_head(Ok(()), 32).unwrap();
    assert_eq!(recorder.tags(), vec![second, first]);
}

#[test]
fn dequeue_of_completed_request_fails_not_found() {
    let (mut ep, _) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    let recorder = Recorder::new();

    ep.enable(&bulk_desc(0x81, 512), None).unwrap();
    let tag = ep.queue(recorded_request(8, &recorder)).unwrap();
    ep.complete_head(Ok(()), 8).unwrap();

    assert_eq!(ep.dequeue(tag).unwrap_err(), UsbError::NotFound);
}

#[test]
fn dequeue_of_unknown_request_fails_not_found() {
    let (mut ep, _) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    ep.enable(&bulk_desc(0x81, 512), None).unwrap();

    let stranger = Request::new().tag();
    assert_eq!(ep.dequeue(stranger).unwrap_err(), UsbError::NotFound);
}

#[test]
fn dequeue_respects_backend_refusal() {
    let (mut ep, shared) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    let recorder = Recorder::new();

    ep.enable(&bulk_desc(0x81, 512), None).unwrap();
    let tag = ep.queue(recorded_request(8, &recorder)).unwrap();

    // hardware that cannot unlink a started write FIFO head reports it
    shared.lock().unwrap().cancel_error = Some(UsbError::DeviceError);
    assert_eq!(ep.dequeue(tag).unwrap_err(), UsbError::DeviceError);

    // the request stayed queued and never completed
    assert_eq!(ep.pending(), 1);
    assert_eq!(recorder.count(), 0);
}

#[test]
fn set_halt_busy_while_in_requests_pending() {
    let (mut ep, _) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    let recorder = Recorder::new();

    ep.enable(&bulk_desc(0x81, 512), None).unwrap();
    ep.queue(recorded_request(8, &recorder)).unwrap();

    assert_eq!(ep.set_halt(true).unwrap_err(), UsbError::Busy);
    assert!(!ep.is_halted());

    ep.complete_head(Ok(()), 8).unwrap();
    ep.set_halt(true).unwrap();
    assert!(ep.is_halted());
}

#[test]
fn set_halt_propagates_backend_busy() {
    let (mut ep, shared) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    ep.enable(&bulk_desc(0x81, 512), None).unwrap();

    // hardware FIFO still holds bytes the host has not collected
    shared.lock().unwrap().halt_error = Some(UsbError::Busy);
    assert_eq!(ep.set_halt(true).unwrap_err(), UsbError::Busy);
    assert!(!ep.is_halted());
}

#[test]
fn set_halt_rejects_isochronous_endpoints() {
    let (mut ep, _) = mock_ep("ep3in-iso", 0x83, EpCaps::data(true, false), 1024);
    ep.enable(&iso_desc(0x83, 1024), None).unwrap();

    assert_eq!(ep.set_halt(true).unwrap_err(), UsbError::InvalidArgument);
}

#[test]
fn wedge_resists_host_clear_until_driver_clears() {
    let (mut ep, _) = mock_ep("ep2out-bulk", 0x02, EpCaps::data(false, true), 512);
    ep.enable(&bulk_desc(0x02, 512), None).unwrap();

    ep.set_wedge().unwrap();
    assert!(ep.is_halted());
    assert!(ep.is_wedged());

    // host CLEAR_FEATURE(ENDPOINT_HALT) bounces off
    ep.clear_halt_from_host().unwrap();
    assert!(ep.is_halted());
    assert!(ep.is_wedged());

    // explicit driver clear wins
    ep.set_halt(false).unwrap();
    assert!(!ep.is_halted());
    assert!(!ep.is_wedged());
}

#[test]
fn wedge_falls_back_to_halt_without_dedicated_support() {
    let (mut ep, shared) = mock_ep("ep2out-bulk", 0x02, EpCaps::data(false, true), 512);
    ep.enable(&bulk_desc(0x02, 512), None).unwrap();

    ep.set_wedge().unwrap();

    // the default set_wedge routed through set_halt(true)
    let calls = shared.lock().unwrap().calls.clone();
    assert!(calls.contains(&"halt true".to_string()));
    assert!(ep.is_wedged());
}

#[test]
fn host_clear_halt_works_on_plain_halt() {
    let (mut ep, _) = mock_ep("ep2out-bulk", 0x02, EpCaps::data(false, true), 512);
    ep.enable(&bulk_desc(0x02, 512), None).unwrap();

    ep.set_halt(true).unwrap();
    ep.clear_halt_from_host().unwrap();
    assert!(!ep.is_halted());
}

#[test]
fn fifo_operations_degrade_to_not_supported() {
    let (mut ep, shared) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);

    assert_eq!(ep.fifo_status().unwrap_err(), UsbError::NotSupported);
    assert_eq!(ep.fifo_flush().unwrap_err(), UsbError::NotSupported);

    shared.lock().unwrap().fifo = Some(17);
    assert_eq!(ep.fifo_status().unwrap(), 17);
}

#[test]
fn short_read_with_short_not_ok_becomes_an_error() {
    let (mut ep, _) = mock_ep("ep2out-bulk", 0x02, EpCaps::data(false, true), 512);
    let recorder = Recorder::new();

    ep.enable(&bulk_desc(0x02, 512), None).unwrap();

    let mut req = recorded_request(512, &recorder);
    req.short_not_ok = true;
    ep.queue(req).unwrap();

    ep.complete_head(Ok(()), 100).unwrap();

    assert_eq!(
        recorder.statuses(),
        vec![Some(Err(UsbError::ShortTransfer))]
    );
    // the bytes that did arrive are still reported
    assert_eq!(recorder.events.lock().unwrap()[0].actual, 100);
}

#[test]
fn short_read_without_flag_succeeds() {
    let (mut ep, _) = mock_ep("ep2out-bulk", 0x02, EpCaps::data(false, true), 512);
    let recorder = Recorder::new();

    ep.enable(&bulk_desc(0x02, 512), None).unwrap();
    ep.queue(recorded_request(512, &recorder)).unwrap();
    ep.complete_head(Ok(()), 100).unwrap();

    assert_eq!(recorder.statuses(), vec![Some(Ok(()))]);
}

#[test]
fn requests_are_packetized_without_merging() {
    let (mut ep, shared) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    let recorder = Recorder::new();

    ep.enable(&bulk_desc(0x81, 512), None).unwrap();

    ep.queue(recorded_request(1500, &recorder)).unwrap();
    ep.complete_head(Ok(()), 1500).unwrap();

    // 1500 bytes in 512-byte packets: three packets, nothing merged
    assert_eq!(shared.lock().unwrap().packets, vec![3]);
    assert_eq!(recorder.events.lock().unwrap()[0].actual, 1500);

    // each queued request gets its own whole packets
    let mut rng = rand::thread_rng();
    let mut expected = vec![3];
    for _ in 0..16 {
        let len = rng.gen_range(1..4096);
        ep.queue(recorded_request(len, &recorder)).unwrap();
        ep.complete_head(Ok(()), len).unwrap();
        expected.push((len + 511) / 512);
    }
    assert_eq!(shared.lock().unwrap().packets, expected);
}

#[test]
fn align_rounds_to_packet_multiples() {
    let (mut ep, _) = mock_ep("ep2out-bulk", 0x02, EpCaps::data(false, true), 512);
    ep.enable(&bulk_desc(0x02, 512), None).unwrap();

    assert_eq!(ep.align(1), 512);
    assert_eq!(ep.align(512), 512);
    assert_eq!(ep.align(513), 1024);
}

#[test]
fn queue_arriving_after_disable_loses_cleanly() {
    // The core does not lock submission against disable; callers serialize
    // configuration changes themselves. A submission that does arrive
    // after the disable loses, it does not resurrect the endpoint.
    let (mut ep, _) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    let recorder = Recorder::new();

    ep.enable(&bulk_desc(0x81, 512), None).unwrap();
    ep.queue(recorded_request(8, &recorder)).unwrap();
    ep.disable().unwrap();

    assert_eq!(recorder.statuses(), vec![Some(Err(UsbError::Shutdown))]);

    let late = ep.queue(recorded_request(8, &recorder)).unwrap_err();
    assert_eq!(late.error, UsbError::NotEnabled);
    assert_eq!(ep.pending(), 0);
}

#[test]
fn alloc_request_goes_through_the_backend() {
    let (mut ep, _) = mock_ep("ep1in-bulk", 0x81, EpCaps::data(true, false), 512);
    let recorder = Recorder::new();

    let mut req = ep.alloc_request();
    req.buf = RequestBuf::Contiguous(vec![0u8; 8]);
    req.length = 8;
    req.completion = Some(recorder.clone() as Arc<dyn Completion>);

    ep.enable(&bulk_desc(0x81, 512), None).unwrap();
    ep.queue(req).unwrap();
    ep.complete_head(Ok(()), 8).unwrap();

    assert_eq!(recorder.count(), 1);
}
