//! Handler replacement and bot shutdown.

#![allow(clippy::unwrap_used)]

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::{eventually, logged_in_bot, new_bot, test_config, FakeServer, LoginBehavior};
use tim_protocol::{GroupId, HandlerState, LoginResult, ProtocolError};

#[tokio::test]
async fn test_reinitialize_survives_close_failure() {
    let server = FakeServer::mute();
    server.fail_shutdown.store(true, Ordering::SeqCst);
    let bot = logged_in_bot(&server).await;
    let old = bot.network();

    // The old transport refuses to shut down.
    assert!(old.close("external").await.is_err());
    assert_eq!(old.state(), HandlerState::Closed);

    let result = bot
        .reinitialize_network_handler(Some("forced"))
        .await
        .unwrap();
    assert_eq!(result, LoginResult::Success);

    let current = bot.network();
    assert!(!Arc::ptr_eq(&old, &current));
    assert_eq!(current.state(), HandlerState::Active);
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn test_reinitialize_with_failing_close_inside() {
    let server = FakeServer::mute();
    server.fail_shutdown.store(true, Ordering::SeqCst);
    let bot = logged_in_bot(&server).await;
    let old = bot.network();

    // Here the close failure happens inside reinitialization itself.
    let result = bot.reinitialize_network_handler(None).await.unwrap();
    assert!(result.is_success());
    assert_eq!(old.state(), HandlerState::Closed);
    assert_eq!(bot.network().state(), HandlerState::Active);
}

#[tokio::test]
async fn test_failed_login_still_installs_new_handler() {
    let server = FakeServer::mute();
    let bot = logged_in_bot(&server).await;
    let old = bot.network();

    server.set_login(LoginBehavior::Status(0x03));
    let result = bot.reinitialize_network_handler(Some("retry")).await.unwrap();
    assert_eq!(result, LoginResult::Blocked);

    let current = bot.network();
    assert!(!Arc::ptr_eq(&old, &current));
    assert_eq!(current.state(), HandlerState::Closed);
    assert_eq!(old.state(), HandlerState::Closed);
}

#[tokio::test]
async fn test_close_is_terminal() {
    let server = FakeServer::mute();
    let bot = logged_in_bot(&server).await;
    bot.contacts().get_qq(1).await;
    bot.contacts().get_group(GroupId(2)).await;

    bot.close().await;
    assert!(bot.is_closed());
    assert_eq!(bot.network().state(), HandlerState::Closed);
    assert!(bot.contacts().qqs().is_empty());
    assert!(bot.contacts().groups().is_empty());

    assert!(bot.login().await.is_err());
    // second close is a no-op
    bot.close().await;
}

#[tokio::test]
async fn test_close_with_failing_transport_completes() {
    let server = FakeServer::mute();
    server.fail_shutdown.store(true, Ordering::SeqCst);
    let bot = logged_in_bot(&server).await;

    bot.close().await;
    assert!(bot.is_closed());
    assert_eq!(bot.network().state(), HandlerState::Closed);
}

#[tokio::test]
async fn test_concurrent_reinitializations_leave_one_active_handler() {
    let server = FakeServer::mute();
    let bot = new_bot(&server, test_config());

    let a = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.reinitialize_network_handler(Some("a")).await })
    };
    let b = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.reinitialize_network_handler(Some("b")).await })
    };
    assert!(a.await.unwrap().unwrap().is_success());
    assert!(b.await.unwrap().unwrap().is_success());

    assert_eq!(bot.network().state(), HandlerState::Active);
    assert_eq!(server.connections(), 2);
}

#[tokio::test]
async fn test_close_beats_queued_reinitialization() {
    let server = FakeServer::mute();
    server.login_delay_ms.store(300, Ordering::SeqCst);
    let bot = new_bot(&server, test_config());

    // Holds the reinitialization lock for the whole login delay.
    let first = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.reinitialize_network_handler(Some("first")).await })
    };
    assert!(eventually(|| server.connections() == 1).await);

    // Passes the closed check, then waits for the lock.
    let queued = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.reinitialize_network_handler(Some("queued")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let closing = {
        let bot = bot.clone();
        tokio::spawn(async move { bot.close().await })
    };

    assert!(first.await.unwrap().unwrap().is_success());
    assert!(matches!(
        queued.await.unwrap(),
        Err(ProtocolError::InvalidState(_))
    ));
    closing.await.unwrap();

    assert!(bot.is_closed());
    assert_eq!(bot.network().state(), HandlerState::Closed);
    assert_eq!(server.connections(), 1);
}
