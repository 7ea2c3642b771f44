//! Mail server scenarios: init validation, archive round-trip, request
//! matching, rate limiting, and failure containment.

use std::sync::Arc;

use susurrus_mailserver::{MailServer, MailServerError};
use susurrus_protocol::{bloom_from_topic, full_node_bloom, Overlay, Topic};
use susurrus_store::ArchiveKey;

use crate::harness::{
    create_raw_request, create_request, generate_envelope, generate_envelope_at, peer,
    test_config, MockOverlay, TEST_BIRTH, TEST_PASSWORD, TEST_POW, TEST_TOPIC,
};

#[tokio::test]
async fn test_init_requires_data_dir() {
    let overlay = MockOverlay::new();
    let config = test_config(std::path::Path::new(""), 0);

    let err = MailServer::init(overlay, &config).unwrap_err();
    assert!(matches!(err, MailServerError::DirectoryNotProvided));
    assert_eq!(err.to_string(), "directory not provided");
}

#[tokio::test]
async fn test_init_requires_password() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), 0);
    config.password = String::new();

    let err = MailServer::init(overlay, &config).unwrap_err();
    assert!(matches!(err, MailServerError::PasswordNotProvided));
    assert_eq!(err.to_string(), "password not provided");
}

#[tokio::test]
async fn test_init_surfaces_open_db_error() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();

    // A path below a regular file cannot be created as a directory.
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();
    let config = test_config(&blocker.join("db"), 0);

    let err = MailServer::init(overlay, &config).unwrap_err();
    assert!(matches!(err, MailServerError::OpenDb(_)));
    assert!(err.to_string().starts_with("open DB: "));
}

#[tokio::test]
async fn test_init_limiter_follows_config() {
    let overlay = MockOverlay::new();

    let dir = tempfile::tempdir().unwrap();
    let with_limit = MailServer::init(overlay.clone(), &test_config(dir.path(), 5)).unwrap();
    assert!(with_limit.limiter_active());
    with_limit.close();

    let dir = tempfile::tempdir().unwrap();
    let without = MailServer::init(overlay.clone(), &test_config(dir.path(), 0)).unwrap();
    assert!(!without.limiter_active());
    without.close();

    // Init published the PoW floor to the overlay.
    assert!((overlay.minimum_pow() - TEST_POW).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_archive_roundtrip() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();
    let server = MailServer::init(overlay, &test_config(dir.path(), 0)).unwrap();

    let env = generate_envelope();
    server.archive(&env);

    let key = ArchiveKey::new(env.expiry - env.ttl, &env.hash());
    let stored = server.archive_store().get(&key).unwrap().unwrap();
    assert_eq!(stored, env.to_wire().unwrap());

    server.close();
}

#[tokio::test]
async fn test_request_matching() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();
    let server = Arc::new(MailServer::init(overlay.clone(), &test_config(dir.path(), 0)).unwrap());

    let env = generate_envelope();
    let birth = env.birth();
    server.archive(&env);

    // Window and bloom both match: the envelope comes back.
    let request = create_request(TEST_PASSWORD, birth, birth, bloom_from_topic(&env.topic));
    server.deliver_mail(&peer("alice"), &request);
    let sent = overlay.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, peer("alice"));
    assert_eq!(sent[0].1.hash(), env.hash());
    overlay.clear_sent();

    // Window above the only archived envelope: nothing.
    let request = create_request(
        TEST_PASSWORD,
        birth + 1,
        birth + 1,
        bloom_from_topic(&env.topic),
    );
    server.deliver_mail(&peer("alice"), &request);
    assert!(overlay.sent().is_empty());

    // Right window, foreign topic bloom: nothing.
    let request = create_request(
        TEST_PASSWORD,
        birth,
        birth + 1,
        bloom_from_topic(&Topic([0xFF, 0x00, 0x00, 0x00])),
    );
    server.deliver_mail(&peer("alice"), &request);
    assert!(overlay.sent().is_empty());

    // The full-node bloom matches any topic.
    let request = create_request(TEST_PASSWORD, birth, birth, full_node_bloom());
    server.deliver_mail(&peer("alice"), &request);
    assert_eq!(overlay.sent().len(), 1);

    server.close();
}

#[tokio::test]
async fn test_process_request_accumulates_without_peer() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();
    let server = MailServer::init(overlay.clone(), &test_config(dir.path(), 0)).unwrap();

    let env = generate_envelope();
    server.archive(&env);

    let mail = server.process_request(None, env.birth(), env.birth(), &full_node_bloom());
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0], env);
    assert!(overlay.sent().is_empty());

    server.close();
}

#[tokio::test]
async fn test_delivery_in_birth_order() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();
    let server = MailServer::init(overlay.clone(), &test_config(dir.path(), 0)).unwrap();

    // Archive out of order; the scan must return ascending birth.
    for (i, payload) in [(2u32, "two"), (0, "zero"), (1, "one")] {
        server.archive(&generate_envelope_at(TEST_TOPIC, payload.as_bytes(), TEST_BIRTH + i));
    }

    let mail = server.process_request(None, TEST_BIRTH, TEST_BIRTH + 2, &full_node_bloom());
    let births: Vec<u32> = mail.iter().map(|e| e.birth()).collect();
    assert_eq!(births, vec![TEST_BIRTH, TEST_BIRTH + 1, TEST_BIRTH + 2]);

    server.close();
}

#[tokio::test]
async fn test_validation_rejects_bad_windows() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();
    let server = MailServer::init(overlay.clone(), &test_config(dir.path(), 0)).unwrap();

    let env = generate_envelope();
    let birth = env.birth();
    server.archive(&env);

    // upper below lower
    let request = create_request(TEST_PASSWORD, birth + 4, birth - 1, full_node_bloom());
    server.deliver_mail(&peer("alice"), &request);
    assert!(overlay.sent().is_empty());

    // window wider than one day
    let request = create_request(TEST_PASSWORD, birth, birth + 86_401, full_node_bloom());
    server.deliver_mail(&peer("alice"), &request);
    assert!(overlay.sent().is_empty());

    // truncated payload
    let request = create_raw_request(TEST_PASSWORD, &[0u8; 71]);
    server.deliver_mail(&peer("alice"), &request);
    assert!(overlay.sent().is_empty());

    server.close();
}

#[tokio::test]
async fn test_wrong_password_is_dropped() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();
    let server = MailServer::init(overlay.clone(), &test_config(dir.path(), 0)).unwrap();

    let env = generate_envelope();
    server.archive(&env);

    let request = create_request(
        "not the password",
        env.birth(),
        env.birth(),
        full_node_bloom(),
    );
    server.deliver_mail(&peer("mallory"), &request);
    assert!(overlay.sent().is_empty());

    server.close();
}

#[tokio::test]
async fn test_pow_floor_drops_weak_requests() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path(), 0);
    config.minimum_pow = 1e12; // unreachable floor
    let server = MailServer::init(overlay.clone(), &config).unwrap();

    let env = generate_envelope();
    server.archive(&env);

    let request = create_request(TEST_PASSWORD, env.birth(), env.birth(), full_node_bloom());
    server.deliver_mail(&peer("alice"), &request);
    assert!(overlay.sent().is_empty());

    server.close();
}

#[tokio::test]
async fn test_rate_limit_drops_second_request() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();
    let server = MailServer::init(overlay.clone(), &test_config(dir.path(), 5)).unwrap();

    let env = generate_envelope();
    server.archive(&env);

    let request = create_request(TEST_PASSWORD, env.birth(), env.birth(), full_node_bloom());
    server.deliver_mail(&peer("alice"), &request);
    server.deliver_mail(&peer("alice"), &request);
    assert_eq!(overlay.sent().len(), 1, "second request within cooldown must be dropped");

    // A different peer is not affected.
    server.deliver_mail(&peer("bob"), &request);
    assert_eq!(overlay.sent().len(), 2);

    server.close();
}

#[tokio::test]
async fn test_manage_peer_limits_admits_once() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();
    let server = MailServer::init(overlay, &test_config(dir.path(), 5)).unwrap();

    assert!(server.manage_peer_limits(&peer("p")));
    assert!(!server.manage_peer_limits(&peer("p")));
    assert!(server.manage_peer_limits(&peer("q")));

    server.close();
}

#[tokio::test]
async fn test_send_failure_aborts_only_that_request() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();
    let server = MailServer::init(overlay.clone(), &test_config(dir.path(), 0)).unwrap();

    for (i, payload) in ["a", "b", "c"].iter().enumerate() {
        server.archive(&generate_envelope_at(
            TEST_TOPIC,
            payload.as_bytes(),
            TEST_BIRTH + i as u32,
        ));
    }

    // The second send fails: the scan stops after the first delivery.
    overlay.fail_sends_after(1);
    let request = create_request(TEST_PASSWORD, TEST_BIRTH, TEST_BIRTH + 2, full_node_bloom());
    server.deliver_mail(&peer("alice"), &request);
    assert_eq!(overlay.sent().len(), 1);

    // Future requests are served normally.
    overlay.allow_sends();
    overlay.clear_sent();
    server.deliver_mail(&peer("alice"), &request);
    assert_eq!(overlay.sent().len(), 3);

    server.close();
}

#[tokio::test]
async fn test_overlay_callbacks_drive_registered_server() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();
    let server = Arc::new(MailServer::init(overlay.clone(), &test_config(dir.path(), 0)).unwrap());
    overlay.register_server(server.clone());

    let hooks = overlay.registered_server().unwrap();
    let env = generate_envelope();
    hooks.archive(&env);

    let request = create_request(TEST_PASSWORD, env.birth(), env.birth(), full_node_bloom());
    hooks.deliver_mail(&peer("alice"), &request);

    let sent = overlay.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].1, env);

    server.close();
}

#[tokio::test]
async fn test_undecodable_value_is_skipped() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();
    let server = MailServer::init(overlay.clone(), &test_config(dir.path(), 0)).unwrap();

    let env = generate_envelope();
    server.archive(&env);

    // Plant garbage next to it inside the window.
    let junk_key = ArchiveKey::new(TEST_BIRTH, &[0u8; 32]);
    server
        .archive_store()
        .put(&junk_key, b"not an envelope frame")
        .unwrap();

    let mail = server.process_request(None, TEST_BIRTH, TEST_BIRTH, &full_node_bloom());
    assert_eq!(mail.len(), 1);
    assert_eq!(mail[0], env);

    server.close();
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();
    let server = MailServer::init(overlay, &test_config(dir.path(), 5)).unwrap();
    server.close();
    server.close();
}

/// Archived envelopes survive a restart: a fresh server over the same
/// data dir serves the old mail.
#[tokio::test]
async fn test_archive_survives_restart() {
    let overlay = MockOverlay::new();
    let dir = tempfile::tempdir().unwrap();
    let env = generate_envelope();

    {
        let server = MailServer::init(overlay.clone(), &test_config(dir.path(), 0)).unwrap();
        server.archive(&env);
        server.close();
    }

    let server = MailServer::init(overlay, &test_config(dir.path(), 0)).unwrap();
    let mail = server.process_request(None, env.birth(), env.birth(), &full_node_bloom());
    assert_eq!(mail, vec![env]);

    server.close();
}
