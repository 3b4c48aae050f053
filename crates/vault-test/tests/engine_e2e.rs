//! End-to-end tests for the credential pipeline, parameters, and
//! cancellation, driving the engine against the emulated device.

use vault_common::types::{KnockSensitivity, Param};
use vault_common::{ErrorCode, VaultError};
use vault_proto::CommandId;
use vault_test::{capture, result_slot, taken, unlocked_engine};

#[test]
fn test_version_parse_on_unlock() {
    let engine = unlocked_engine(4, "v1.2_mini");
    let state = engine.state();
    let state = state.read();
    let version = state.version.as_ref().expect("version loaded");

    assert_eq!(version.flash_mb, 4);
    assert_eq!(version.hw_version, "v1.2_mini");
    assert!(version.is_fw_1_2);
    assert!(version.is_mini);
    // minis on 1.2+ also load their serial number
    assert_eq!(state.serial, Some(0x0001_0203));
    // and the change numbers arrive after the date is set
    assert_eq!(state.cred_change_number, 1);
    assert_eq!(state.data_change_number, 1);
}

#[test]
fn test_knock_sensitivity_mapping() {
    let device = {
        let mut d = vault_emul::EmulDevice::new(4, "v1.2_mini");
        d.set_param(vault_common::types::Param::MiniKnockThres.as_u8(), 11);
        d
    };
    let mut engine = vault_engine::VaultEngine::new(device);
    engine.tick(std::time::Instant::now());
    engine.pump();
    assert_eq!(
        engine.state().read().params.knock_sensitivity,
        KnockSensitivity::Low
    );

    // setter maps back to the raw threshold
    engine.update_knock_sensitivity(KnockSensitivity::High);
    engine.pump();
    let sent = engine
        .transport_mut()
        .wire_log()
        .iter()
        .rev()
        .find(|p| p.cmd_byte() == CommandId::SetParam.as_u8())
        .expect("set_param sent");
    assert_eq!(
        sent.payload(),
        &[vault_common::types::Param::MiniKnockThres.as_u8(), 5]
    );

    engine.load_parameters();
    engine.pump();
    assert_eq!(
        engine.state().read().params.knock_sensitivity,
        KnockSensitivity::High
    );
}

#[test]
fn test_display_parameters_mirrored() {
    let device = {
        let mut d = vault_emul::EmulDevice::new(32, "v1.2");
        d.set_param(Param::ScreenSaverSpeed.as_u8(), 3);
        d.set_param(Param::InvertedScreenAtBoot.as_u8(), 1);
        d.set_param(Param::MiniLedAnimMask.as_u8(), 0x0F);
        d
    };
    let mut engine = vault_engine::VaultEngine::new(device);
    engine.tick(std::time::Instant::now());
    engine.pump();

    let state = engine.state();
    let state = state.read();
    // a 32 Mb part's size flows through the version reply
    assert_eq!(state.version.as_ref().expect("version loaded").flash_mb, 32);
    assert_eq!(state.params.screensaver_speed, 3);
    assert!(state.params.inverted_screen);
    assert_eq!(state.params.led_anim_mask, 0x0F);
}

#[test]
fn test_set_then_get_credential_roundtrip() {
    let mut engine = unlocked_engine(4, "v1.2_mini");

    let set_result = result_slot();
    let set_cb = capture(&set_result);
    engine.set_credential("example.org", "alice", "hunter2", "mail account", true, set_cb);
    engine.pump();
    taken(&set_result).expect("set_credential should succeed");

    let get_result = result_slot();
    let get_cb = capture(&get_result);
    engine.get_credential("example.org", "alice", "", "", get_cb);
    engine.pump();
    let credential = taken(&get_result).expect("get_credential should succeed");

    assert_eq!(credential.service, "example.org");
    assert_eq!(credential.login, "alice");
    assert_eq!(credential.password, "hunter2");
    assert_eq!(credential.description, "mail account");
}

#[test]
fn test_get_credential_fallback_service() {
    let mut engine = unlocked_engine(4, "v1.2");
    engine
        .transport_mut()
        .add_credential("old.example.org", "bob", "pw", "");

    let result = result_slot();
    engine.get_credential("new.example.org", "", "old.example.org", "", capture(&result));
    engine.pump();
    let credential = taken(&result).expect("fallback should match");
    assert_eq!(credential.service, "old.example.org");
    assert_eq!(credential.login, "bob");
}

#[test]
fn test_get_credential_login_mismatch() {
    let mut engine = unlocked_engine(4, "v1.2");
    engine
        .transport_mut()
        .add_credential("example.org", "alice", "pw", "");

    let result = result_slot();
    engine.get_credential("example.org", "mallory", "", "", capture(&result));
    engine.pump();
    let err = taken(&result).expect_err("login mismatch must fail");
    assert_eq!(err.code(), ErrorCode::InputInvalid);
}

#[test]
fn test_get_credential_password_denied() {
    let mut engine = unlocked_engine(4, "v1.2");
    let device = engine.transport_mut();
    device.add_credential("example.org", "alice", "pw", "");
    device.refuse(CommandId::GetPassword);

    let result = result_slot();
    engine.get_credential("example.org", "", "", "", capture(&result));
    engine.pump();
    let err = taken(&result).expect_err("denied password must fail");
    assert_eq!(err.code(), ErrorCode::DeviceRefused);
}

#[test]
fn test_missing_description_is_tolerated() {
    let mut engine = unlocked_engine(4, "v1.2");
    engine
        .transport_mut()
        .add_credential("example.org", "alice", "pw", "");

    let result = result_slot();
    engine.get_credential("example.org", "", "", "", capture(&result));
    engine.pump();
    let credential = taken(&result).expect("absent description is not fatal");
    assert_eq!(credential.description, "");
    assert_eq!(credential.password, "pw");
}

#[test]
fn test_overlong_description_is_user_visible_error() {
    let mut engine = unlocked_engine(4, "v1.2_mini");
    let description = "d".repeat(40);

    let result = result_slot();
    engine.set_credential("svc", "alice", "pw", &description, true, capture(&result));
    engine.pump();
    let err = taken(&result).expect_err("overlong description must fail");
    assert_eq!(err.code(), ErrorCode::InputInvalid);
}

#[test]
fn test_empty_service_rejected_before_any_packet() {
    let mut engine = unlocked_engine(4, "v1.2");
    let sent_before = engine.transport_mut().wire_log().len();

    let result = result_slot();
    engine.set_credential("", "alice", "pw", "", false, capture(&result));
    let err = taken(&result).expect_err("empty service must fail");
    assert_eq!(err.code(), ErrorCode::InputInvalid);
    assert_eq!(engine.transport_mut().wire_log().len(), sent_before);
}

#[test]
fn test_get_random_returns_32_bytes() {
    let mut engine = unlocked_engine(4, "v1.2");
    let result = result_slot();
    engine.get_random(capture(&result));
    engine.pump();
    let bytes = taken(&result).expect("random bytes");
    assert_eq!(bytes.len(), 32);
}

#[test]
fn test_get_uid() {
    let mut engine = unlocked_engine(4, "v1.2");
    let result = result_slot();
    engine.get_uid([0x11; 16], capture(&result));
    engine.pump();
    assert_eq!(taken(&result).expect("uid"), 0xDEAD_BEEF_CAFE_0001);
}

#[test]
fn test_cancel_running_request_goes_out_of_band() {
    let mut engine = unlocked_engine(4, "v1.2_mini");
    engine
        .transport_mut()
        .add_credential("example.org", "alice", "pw", "");

    let result = result_slot();
    engine.get_credential("example.org", "", "", "req-7", capture(&result));

    // step frame by frame until the password query is on the wire
    while engine
        .transport_mut()
        .wire_log()
        .last()
        .map(vault_proto::Packet::cmd_byte)
        != Some(CommandId::GetPassword.as_u8())
    {
        assert!(engine.pump_one(), "ran out of frames before GET_PASSWORD");
    }

    // cancel while the password reply is still pending
    engine.cancel_request("req-7");
    assert!(
        engine.transport_mut().cancel_seen(),
        "cancel packet must bypass the queue"
    );
    assert!(result.borrow().is_none(), "job must not be done yet");

    engine.pump();
    let err = taken(&result).expect_err("cancelled request must fail");
    assert!(matches!(err, VaultError::Cancelled));
}

#[test]
fn test_cancel_ignored_below_fw_1_2() {
    let mut engine = unlocked_engine(1, "v1.1");
    engine
        .transport_mut()
        .add_credential("example.org", "alice", "pw", "");

    let result = result_slot();
    engine.get_credential("example.org", "", "", "req-1", capture(&result));
    engine.cancel_request("req-1");
    assert!(!engine.transport_mut().cancel_seen());

    engine.pump();
    // the request completes normally
    taken(&result).expect("request unaffected by ignored cancel");
}
