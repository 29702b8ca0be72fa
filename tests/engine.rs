use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread;

use ddc_engine::packet::{checksum, Direction};
use ddc_engine::{
    DdcError, DisplayHandle, DisplayId, DisplayLockRegistry, DisplayPath, DisplayRef, LockMode,
    PacketError, RetryPolicy, UnsupportedConvention, UnsupportedReason,
};

#[derive(Debug)]
enum Step {
    Write(io::Result<()>),
    Read(io::Result<Vec<u8>>),
}

/// Scripted port: every write and read consumes the next step, and a
/// call past the end of the script fails the test.
#[derive(Debug)]
struct MockPort {
    script: VecDeque<Step>,
    writes: Vec<Vec<u8>>,
}

impl MockPort {
    fn new(script: Vec<Step>) -> Self {
        MockPort {
            script: script.into(),
            writes: Vec::new(),
        }
    }

    fn script_consumed(&self) -> bool {
        self.script.is_empty()
    }
}

impl ddc_engine::DdcPort for MockPort {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.writes.push(data.to_vec());
        match self.script.pop_front() {
            Some(Step::Write(res)) => res,
            other => panic!("unexpected write {:02x?}, script has {:?}", data, other),
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.script.pop_front() {
            Some(Step::Read(Ok(bytes))) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            Some(Step::Read(Err(e))) => Err(e),
            other => panic!("unexpected read, script has {:?}", other),
        }
    }
}

fn frame_reply(payload: &[u8]) -> Vec<u8> {
    let mut raw = vec![0x6e, 0x80 | payload.len() as u8];
    raw.extend_from_slice(payload);
    let cs = checksum(Direction::DisplayToHost, raw[1..].iter().cloned());
    raw.push(cs);
    raw
}

fn vcp_reply(feature: u8, result: u8, mh: u8, ml: u8, sh: u8, sl: u8) -> Vec<u8> {
    let kind = if result == 0 { 0x01 } else { 0x00 };
    frame_reply(&[0x02, result, feature, kind, mh, ml, sh, sl])
}

fn vcp_zero_reply(feature: u8) -> Vec<u8> {
    frame_reply(&[0x02, 0x00, feature, 0x00, 0x00, 0x00, 0x00, 0x00])
}

fn null_reply() -> Vec<u8> {
    frame_reply(&[])
}

fn fragment_reply(opcode: u8, offset: u16, data: &[u8]) -> Vec<u8> {
    let mut payload = vec![opcode, (offset >> 8) as u8, offset as u8];
    payload.extend_from_slice(data);
    frame_reply(&payload)
}

fn exchange(reply: Vec<u8>) -> Vec<Step> {
    vec![Step::Write(Ok(())), Step::Read(Ok(reply))]
}

fn display(bus: u32) -> Arc<DisplayRef> {
    DisplayRef::new(DisplayPath::I2c(bus), DisplayId::default(), true)
}

fn registry() -> &'static DisplayLockRegistry {
    Box::leak(Box::new(DisplayLockRegistry::new()))
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_write_only_tries: 2,
        max_write_read_tries: 3,
        max_multi_part_tries: 2,
        max_verify_tries: 2,
    }
}

fn handle(script: Vec<Step>) -> DisplayHandle<MockPort> {
    let mut handle =
        DisplayHandle::open(MockPort::new(script), display(0), registry(), LockMode::Poll)
            .unwrap();
    handle.set_retry_policy(fast_policy());
    handle
}

#[test]
fn read_brightness() {
    let mut h = handle(exchange(vcp_reply(0x10, 0x00, 0x00, 0x64, 0x00, 0x32)));
    let value = h.get_nontable_value(0x10).unwrap();
    assert_eq!(value.maximum, 100);
    assert_eq!(value.value, 50);

    // the request on the wire, checksum included
    assert_eq!(h.port_ref().writes[0], vec![0x51, 0x82, 0x01, 0x10, 0xac]);
    assert!(h.port_ref().script_consumed());
    assert_eq!(h.retry_stats().write_read.successes(), &[1][..]);
}

#[test]
fn corrupt_reply_is_retried() {
    let mut corrupt = vcp_reply(0x10, 0x00, 0x00, 0x64, 0x00, 0x32);
    *corrupt.last_mut().unwrap() ^= 0x01;

    let mut script = exchange(corrupt);
    script.extend(exchange(vcp_reply(0x10, 0x00, 0x00, 0x64, 0x00, 0x32)));
    let mut h = handle(script);

    let value = h.get_nontable_value(0x10).unwrap();
    assert_eq!(value.value, 50);
    assert_eq!(h.retry_stats().write_read.successes(), &[0, 1][..]);
    // the failure raised the adaptive multiplier
    assert!(h.display().sleep_multiplier() > 1.0);
}

#[test]
fn exhausted_retries_accumulate_causes() {
    let mut script = Vec::new();
    for _ in 0..3 {
        let mut corrupt = vcp_reply(0x10, 0x00, 0x00, 0x64, 0x00, 0x32);
        *corrupt.last_mut().unwrap() ^= 0x01;
        script.extend(exchange(corrupt));
    }
    let mut h = handle(script);

    let err = h.get_nontable_value(0x10).unwrap_err();
    match err {
        DdcError::RetriesExhausted { tries, causes } => {
            assert_eq!(tries, 3);
            assert_eq!(causes.len(), 3);
            assert!(causes.iter().all(|e| matches!(
                e,
                DdcError::Packet(PacketError::ChecksumMismatch { .. })
            )));
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
    assert_eq!(h.retry_stats().write_read.failures(), 1);
}

#[test]
fn disconnect_aborts_without_retry() {
    let script = vec![Step::Write(Err(io::Error::from_raw_os_error(libc::ENXIO)))];
    let mut h = handle(script);

    let err = h.get_nontable_value(0x10).unwrap_err();
    assert!(matches!(err, DdcError::Disconnected(_)));
    // exactly one write went out
    assert_eq!(h.port_ref().writes.len(), 1);
}

#[test]
fn structural_mismatch_aborts_without_retry() {
    // a table-read reply to a VCP query is wrong-shaped, not noise
    let mut h = handle(exchange(fragment_reply(0xe4, 0, &[1, 2, 3])));
    let err = h.get_nontable_value(0x10).unwrap_err();
    assert!(matches!(
        err,
        DdcError::Packet(PacketError::UnexpectedOpcode { .. })
    ));
    assert_eq!(h.port_ref().writes.len(), 1);
}

#[test]
fn unsupported_reported_by_flag() {
    let mut h = handle(exchange(vcp_reply(0xdd, 0x01, 0, 0, 0, 0)));
    let err = h.get_nontable_value(0xdd).unwrap_err();
    assert!(matches!(
        err,
        DdcError::Unsupported(UnsupportedReason::ReportedByFlag)
    ));
}

#[test]
fn null_convention_determined_and_applied() {
    let mut script = Vec::new();
    // communication check against the luminance feature
    script.extend(exchange(vcp_reply(0x10, 0x00, 0x00, 0x64, 0x00, 0x32)));
    // probe of an unassigned feature answered with nulls every time
    for _ in 0..3 {
        script.extend(exchange(null_reply()));
    }
    // later read of a feature this display does not implement
    script.extend(exchange(null_reply()));

    let mut h = handle(script);
    h.determine_unsupported_convention().unwrap();
    assert_eq!(
        h.display().convention(),
        Some(UnsupportedConvention::NullMessage)
    );

    let err = h.get_nontable_value(0x2f).unwrap_err();
    assert!(matches!(
        err,
        DdcError::Unsupported(UnsupportedReason::NullResponse)
    ));
    assert!(h.port_ref().script_consumed());

    // probing is idempotent, no further traffic
    h.determine_unsupported_convention().unwrap();
    assert!(h.port_ref().script_consumed());
}

#[test]
fn zero_payload_convention_determined_and_applied() {
    let mut script = Vec::new();
    script.extend(exchange(vcp_reply(0x10, 0x00, 0x00, 0x64, 0x00, 0x32)));
    // probe answered with a well-formed but all-zero reply
    script.extend(exchange(vcp_zero_reply(0xdd)));
    // later read of an unimplemented feature
    script.extend(exchange(vcp_zero_reply(0x2f)));

    let mut h = handle(script);
    h.determine_unsupported_convention().unwrap();
    assert_eq!(
        h.display().convention(),
        Some(UnsupportedConvention::ZeroPayload)
    );

    let err = h.get_nontable_value(0x2f).unwrap_err();
    assert!(matches!(
        err,
        DdcError::Unsupported(UnsupportedReason::ZeroPayload)
    ));
}

#[test]
fn flag_convention_determined_from_first_probe() {
    let mut script = Vec::new();
    script.extend(exchange(vcp_reply(0x10, 0x00, 0x00, 0x64, 0x00, 0x32)));
    script.extend(exchange(vcp_reply(0xdd, 0x01, 0, 0, 0, 0)));

    let mut h = handle(script);
    h.determine_unsupported_convention().unwrap();
    assert_eq!(
        h.display().convention(),
        Some(UnsupportedConvention::ResultFlag)
    );
    assert!(h.port_ref().script_consumed());
}

#[test]
fn convention_probe_leaves_multiplier_untouched() {
    let mut script = Vec::new();
    script.extend(exchange(vcp_reply(0x10, 0x00, 0x00, 0x64, 0x00, 0x32)));
    // probe of an unassigned feature answered with nulls every time
    for _ in 0..3 {
        script.extend(exchange(null_reply()));
    }

    let mut h = handle(script);
    h.determine_unsupported_convention().unwrap();
    assert_eq!(
        h.display().convention(),
        Some(UnsupportedConvention::NullMessage)
    );
    // the deliberate probe failures must not raise the adaptive delay
    assert_eq!(h.display().sleep_multiplier(), 1.0);
    assert!(h.port_ref().script_consumed());
}

#[test]
fn capabilities_reassembled_from_fragments() {
    let caps = b"(prot(monitor)type(lcd)model(P2720)cmds(01 02 03 07 0C E3 F3)vcp(02 10 12))";
    let mut script = Vec::new();
    let mut offset = 0usize;
    for chunk in caps.chunks(32) {
        script.extend(exchange(fragment_reply(0xe3, offset as u16, chunk)));
        offset += chunk.len();
    }
    script.extend(exchange(fragment_reply(0xe3, offset as u16, &[])));

    let mut h = handle(script);
    assert_eq!(h.get_capabilities().unwrap(), caps);
    assert!(h.port_ref().script_consumed());
}

#[test]
fn fragment_offset_mismatch_aborts() {
    let mut script = Vec::new();
    script.extend(exchange(fragment_reply(0xe3, 0, b"0123456789abcdef")));
    // display echoes the wrong position for the second fragment
    script.extend(exchange(fragment_reply(0xe3, 8, b"junk")));

    let mut h = handle(script);
    let err = h.get_capabilities().unwrap_err();
    assert!(matches!(
        err,
        DdcError::FragmentOffsetMismatch { expected: 16, actual: 8 }
    ));
    assert!(h.port_ref().script_consumed());
}

#[test]
fn table_write_carves_and_terminates() {
    let value: Vec<u8> = (0..60).collect();
    let script = vec![
        Step::Write(Ok(())),
        Step::Write(Ok(())),
        Step::Write(Ok(())),
        Step::Write(Ok(())),
    ];
    let mut h = handle(script);
    h.set_verify_writes(false);
    h.set_table_value(0x73, &value).unwrap();

    let writes = &h.port_ref().writes;
    assert_eq!(writes.len(), 4);
    // each fragment: [0x51][len|0x80][0xe7][code][offset hi][offset lo][data..][cs]
    let offsets: Vec<u16> = writes
        .iter()
        .map(|w| ((w[4] as u16) << 8) | w[5] as u16)
        .collect();
    assert_eq!(offsets, vec![0, 28, 56, 60]);
    assert_eq!(writes[0].len(), 3 + 4 + 28);
    assert_eq!(writes[2].len(), 3 + 4 + 4);
    // zero-length terminator
    assert_eq!(writes[3].len(), 3 + 4);
}

#[test]
fn table_read_null_means_unsupported() {
    let mut script = Vec::new();
    for _ in 0..3 {
        script.extend(exchange(null_reply()));
    }
    let mut h = handle(script);
    let err = h.get_table_value(0x73).unwrap_err();
    assert!(matches!(
        err,
        DdcError::Unsupported(UnsupportedReason::NullResponse)
    ));
}

#[test]
fn zeroed_later_fragment_is_noise_not_unsupported() {
    // a zeroed bus after the first fragment arrived is a failed read,
    // not an unsupported-feature signal
    let mut script = Vec::new();
    script.extend(exchange(fragment_reply(0xe4, 0, b"0123456789abcdef")));
    for _ in 0..3 {
        script.extend(exchange(vec![0u8; 11]));
    }

    let mut h = handle(script);
    let err = h.get_table_value(0x73).unwrap_err();
    assert!(matches!(err, DdcError::RetriesExhausted { .. }));
    assert!(err.all_causes_zero());
    assert!(h.port_ref().script_consumed());
}

#[test]
fn verified_write_accepts_matching_readback() {
    let mut script = vec![Step::Write(Ok(()))];
    script.extend(exchange(vcp_reply(0x10, 0x00, 0x00, 0x64, 0x00, 0x32)));
    let mut h = handle(script);
    h.set_nontable_value(0x10, 50).unwrap();
    assert!(h.port_ref().script_consumed());
}

#[test]
fn verified_write_reports_mismatch() {
    let mut script = Vec::new();
    for _ in 0..2 {
        script.push(Step::Write(Ok(())));
        script.extend(exchange(vcp_reply(0x10, 0x00, 0x00, 0x64, 0x00, 0x28)));
    }
    let mut h = handle(script);

    let err = h.set_nontable_value(0x10, 50).unwrap_err();
    match err {
        DdcError::RetriesExhausted { causes, .. } => {
            assert_eq!(causes.len(), 2);
            assert!(causes.iter().all(|e| matches!(
                e,
                DdcError::VerifyFailed { feature: 0x10, expected: 50, actual: 40 }
            )));
        }
        other => panic!("expected RetriesExhausted, got {:?}", other),
    }
}

#[test]
fn unverifiable_features_skip_readback() {
    // input select may switch away mid-write, reading back is futile
    let mut h = handle(vec![Step::Write(Ok(()))]);
    h.set_nontable_value(0x60, 0x0f).unwrap();
    assert!(h.port_ref().script_consumed());
}

#[test]
fn save_current_settings_on_the_wire() {
    let mut h = handle(vec![Step::Write(Ok(()))]);
    h.save_current_settings().unwrap();
    assert_eq!(h.port_ref().writes[0], vec![0x51, 0x81, 0x0c, 0xb2]);
}

#[test]
fn timing_report_decoded() {
    let mut h = handle(exchange(frame_reply(&[0x4e, 0x00, 0x1a, 0x8c, 0x17, 0x70])));
    let report = h.get_timing_report().unwrap();
    assert_eq!(report.horizontal_frequency, 0x1a8c);
    assert_eq!(report.vertical_frequency, 0x1770);
}

#[test]
fn mccs_version_read_once() {
    let mut h = handle(exchange(vcp_reply(0xdf, 0x00, 0x00, 0x00, 0x02, 0x01)));
    let version = h.mccs_version().unwrap();
    assert_eq!((version.major, version.minor), (2, 1));
    // cached, no further traffic
    let again = h.mccs_version().unwrap();
    assert_eq!(version, again);
    assert!(h.port_ref().script_consumed());
}

#[test]
fn open_display_is_exclusive_per_path() {
    let registry = registry();
    let dref = display(7);

    let first =
        DisplayHandle::open(MockPort::new(Vec::new()), dref.clone(), registry, LockMode::Poll)
            .unwrap();

    // same thread may not open the same display twice
    assert!(matches!(
        DisplayHandle::open(MockPort::new(Vec::new()), dref.clone(), registry, LockMode::Poll),
        Err(DdcError::AlreadyLockedByThread(_))
    ));

    // another thread times out while the handle is held
    let contender = {
        let dref = dref.clone();
        thread::spawn(move || {
            DisplayHandle::open(MockPort::new(Vec::new()), dref, registry, LockMode::Poll)
                .map(|_| ())
        })
    };
    assert!(matches!(
        contender.join().unwrap(),
        Err(DdcError::DisplayLocked(_))
    ));

    // dropping the handle releases the lock
    drop(first);
    let reopened =
        DisplayHandle::open(MockPort::new(Vec::new()), dref, registry, LockMode::Poll);
    assert!(reopened.is_ok());
}
