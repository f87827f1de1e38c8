mod common;

use common::{AuthReply, MockServer, Reply};
use rcon_console::errors::{AuthError, RconProtocolError};
use rcon_console::{CommandClient, ConnectionSettings, ConnectionState, RconConfig, RconError};
use std::time::{Duration, Instant};

fn echo(command: &str) -> Reply {
    match command {
        "players" => Reply::text("3 players online"),
        "hang" => Reply::Silent,
        "crash" => Reply::Close,
        "garble" => Reply::Malformed,
        "bye" => Reply::ThenClose("bye".to_string()),
        "cvarlist" => Reply::Fragments(vec![
            "sv_cheats 0\n".to_string(),
            "sv_gravity 800\n".to_string(),
            "mp_timelimit 30\n".to_string(),
        ]),
        other => Reply::Fragments(vec![format!("{other}:1 "), format!("{other}:2")]),
    }
}

fn quick_timeouts() -> RconConfig {
    RconConfig::builder()
        .connect_timeout(Duration::from_secs(2))
        .auth_timeout(Duration::from_secs(2))
        .response_timeout(Duration::from_millis(300))
        .build()
}

async fn connected_client(server: &MockServer, config: RconConfig) -> CommandClient {
    let client = CommandClient::new(config);
    client.connect(server.settings()).await.unwrap();
    client
}

#[tokio::test]
async fn test_single_fragment_response() {
    let server = MockServer::start(echo).await;
    let client = connected_client(&server, RconConfig::default()).await;

    assert_eq!(client.state(), ConnectionState::Ready);
    assert_eq!(client.execute("players").await.unwrap(), "3 players online");
}

#[tokio::test]
async fn test_fragments_are_joined_in_order() {
    let server = MockServer::start(echo).await;
    let client = connected_client(&server, RconConfig::default()).await;

    let result = client.execute_result("cvarlist").await.unwrap();
    assert_eq!(result.command, "cvarlist");
    assert_eq!(
        result.output,
        "sv_cheats 0\nsv_gravity 800\nmp_timelimit 30\n"
    );

    // nothing from the first command leaks into the next one
    assert_eq!(client.execute("status").await.unwrap(), "status:1 status:2");
}

#[tokio::test]
async fn test_wrong_password_fails_auth() {
    let server = MockServer::start(echo).await;
    let client = CommandClient::new(RconConfig::default());

    let mut settings = server.settings();
    settings.password = "wrong".to_string();

    assert!(matches!(
        client.connect(settings).await,
        Err(RconError::Authentication(AuthError::Rejected))
    ));
    assert_eq!(client.state(), ConnectionState::Failed);
    assert!(matches!(
        client.execute("players").await,
        Err(RconError::NotConnected)
    ));
}

#[tokio::test]
async fn test_concurrent_commands_keep_submission_order() {
    let server = MockServer::start(echo).await;
    let client = connected_client(&server, RconConfig::default()).await;
    let (a, b, c) = (client.clone(), client.clone(), client.clone());

    // join! polls in order on the first pass, which is when each call enqueues
    let (help, list, say) = tokio::join!(
        a.execute_result("help"),
        b.execute_result("list"),
        c.execute_result("say hi"),
    );
    let (help, list, say) = (help.unwrap(), list.unwrap(), say.unwrap());

    assert_eq!(help.output, "help:1 help:2");
    assert_eq!(list.output, "list:1 list:2");
    assert_eq!(say.output, "say hi:1 say hi:2");
    assert_eq!(server.commands(), ["help", "list", "say hi"]);
    assert!(help.timestamp <= list.timestamp);
    assert!(list.timestamp <= say.timestamp);
}

#[tokio::test]
async fn test_response_timeout_keeps_connection() {
    let server = MockServer::start(echo).await;
    let config = quick_timeouts();
    let client = connected_client(&server, config).await;

    let started = Instant::now();
    let result = client.execute("hang").await;

    assert!(matches!(result, Err(RconError::ResponseTimeout(d)) if d == config.response_timeout));
    assert!(started.elapsed() >= config.response_timeout);
    assert_eq!(client.state(), ConnectionState::Ready);

    assert_eq!(client.execute("players").await.unwrap(), "3 players online");
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_connection_lost_reaches_queued_callers() {
    let server = MockServer::start(echo).await;
    let client = connected_client(&server, RconConfig::default()).await;

    let (crash, next, last) = tokio::join!(
        client.execute("crash"),
        client.execute("status"),
        client.execute("players"),
    );

    assert!(matches!(crash, Err(RconError::ConnectionLost(_))));
    assert!(matches!(next, Err(RconError::ConnectionLost(_))));
    assert!(matches!(last, Err(RconError::ConnectionLost(_))));
    assert_eq!(client.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_disconnect_fails_pending_and_queued() {
    let server = MockServer::start(echo).await;
    let config = RconConfig::builder()
        .response_timeout(Duration::from_secs(30))
        .build();
    let client = connected_client(&server, config).await;

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.execute("hang").await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let queued = tokio::spawn({
        let client = client.clone();
        async move { client.execute("players").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.disconnect().await;

    assert!(matches!(
        pending.await.unwrap(),
        Err(RconError::ConnectionLost(_))
    ));
    assert!(matches!(
        queued.await.unwrap(),
        Err(RconError::ConnectionLost(_))
    ));
    assert_eq!(client.state(), ConnectionState::Disconnected);

    assert!(matches!(
        client.execute("players").await,
        Err(RconError::NotConnected)
    ));
    assert_eq!(server.commands(), ["hang"]);
}

#[tokio::test]
async fn test_execute_without_connect() {
    let client = CommandClient::new(RconConfig::default());

    assert!(matches!(
        client.execute("players").await,
        Err(RconError::NotConnected)
    ));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_is_idempotent_for_same_settings() {
    let server = MockServer::start(echo).await;
    let client = connected_client(&server, RconConfig::default()).await;

    client.connect(server.settings()).await.unwrap();
    client.connect(server.settings()).await.unwrap();

    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_connect_with_new_settings_replaces_connection() {
    let first = MockServer::start(echo).await;
    let second = MockServer::start(|_: &str| Reply::text("from second")).await;
    let client = connected_client(&first, RconConfig::default()).await;

    client.connect(second.settings()).await.unwrap();

    assert_eq!(client.execute("players").await.unwrap(), "from second");
    assert!(first.commands().is_empty());
}

#[tokio::test]
async fn test_connect_refused() {
    let server = MockServer::start(echo).await;
    let port = server.addr.port();
    drop(server);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = CommandClient::new(quick_timeouts());
    let result = client
        .connect(ConnectionSettings::new("127.0.0.1", port, "secret"))
        .await;

    assert!(matches!(result, Err(RconError::Connect { .. })));
    assert_eq!(client.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_send_command_keeps_session() {
    let server = MockServer::start(echo).await;
    let client = CommandClient::new(RconConfig::default());

    let first = client.send_command(server.settings(), "players").await;
    let second = client.send_command(server.settings(), "status").await;

    assert!(first.success);
    assert_eq!(first.data, "3 players online");
    assert!(second.success);
    assert_eq!(second.data, "status:1 status:2");
    assert_eq!(server.connections(), 1);
}

#[tokio::test]
async fn test_negative_auth_id_is_rejected() {
    let server = MockServer::start_with_auth(AuthReply::Id(-7), echo).await;
    let client = CommandClient::new(RconConfig::default());

    assert!(matches!(
        client.connect(server.settings()).await,
        Err(RconError::Authentication(AuthError::Rejected))
    ));
    assert_eq!(client.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_server_assigned_auth_id_is_accepted() {
    let server = MockServer::start_with_auth(AuthReply::Id(42), echo).await;
    let client = connected_client(&server, RconConfig::default()).await;

    assert_eq!(client.state(), ConnectionState::Ready);
    assert_eq!(client.execute("players").await.unwrap(), "3 players online");
}

#[tokio::test]
async fn test_socket_closed_during_auth() {
    let server = MockServer::start_with_auth(AuthReply::Close, echo).await;
    let client = CommandClient::new(RconConfig::default());

    assert!(matches!(
        client.connect(server.settings()).await,
        Err(RconError::Authentication(AuthError::Handshake(_)))
    ));
    assert_eq!(client.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn test_malformed_frame_fails_connection() {
    let server = MockServer::start(echo).await;
    let client = connected_client(&server, RconConfig::default()).await;

    let (garble, next, last) = tokio::join!(
        client.execute("garble"),
        client.execute("status"),
        client.execute("players"),
    );

    assert!(matches!(
        garble,
        Err(RconError::Malformed(RconProtocolError::MissingTerminator))
    ));
    assert!(matches!(next, Err(RconError::ConnectionLost(_))));
    assert!(matches!(last, Err(RconError::ConnectionLost(_))));
    assert_eq!(client.state(), ConnectionState::Failed);
    assert_eq!(server.commands(), ["garble"]);
}

#[tokio::test]
async fn test_socket_closed_while_idle() {
    let server = MockServer::start(echo).await;
    let client = connected_client(&server, RconConfig::default()).await;

    assert_eq!(client.execute("bye").await.unwrap(), "bye");
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(
        client.execute("players").await,
        Err(RconError::ConnectionLost(_))
    ));
    assert_eq!(client.state(), ConnectionState::Failed);
    assert_eq!(server.commands(), ["bye"]);
}

#[tokio::test]
async fn test_expired_timer_still_sends_whole_command() {
    let server = MockServer::start(echo).await;
    let config = RconConfig::builder()
        .response_timeout(Duration::ZERO)
        .build();
    let client = connected_client(&server, config).await;

    for _ in 0..2 {
        assert!(matches!(
            client.execute("hang").await,
            Err(RconError::ResponseTimeout(_))
        ));
        assert_eq!(client.state(), ConnectionState::Ready);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // both frames of each command reached the server intact
    assert_eq!(server.commands(), ["hang", "hang"]);
}
