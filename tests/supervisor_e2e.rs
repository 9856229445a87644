use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use whatsapp_bot_session::botcore::config::BotConfig;
use whatsapp_bot_session::botcore::disconnect::DisconnectReason;
use whatsapp_bot_session::botcore::events::{
    ConnectionPhase, ConnectionUpdate, IncomingMessage, MessageContent, MessageKey,
    OutgoingMessage, STATUS_BROADCAST_JID, TransportEvent, user_jid,
};
use whatsapp_bot_session::test_utils::{
    MockCall, MockSession, MockTransportFactory, TEST_OWNER, test_config,
};
use whatsapp_bot_session::{ConnectionSupervisor, ExitReason, SupervisorError};

const SECOND: Duration = Duration::from_millis(1_000);

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

struct Harness {
    factory: Arc<MockTransportFactory>,
    sessions: mpsc::UnboundedReceiver<MockSession>,
    run: JoinHandle<Result<ExitReason, SupervisorError>>,
    shutdown: CancellationToken,
}

fn start(
    config: BotConfig,
    factory: MockTransportFactory,
    sessions: mpsc::UnboundedReceiver<MockSession>,
) -> Harness {
    let factory = Arc::new(factory);
    let supervisor = ConnectionSupervisor::builder()
        .with_config(config)
        .with_transport_factory(factory.clone())
        .build()
        .unwrap();
    let shutdown = supervisor.shutdown_token();
    Harness {
        factory,
        sessions,
        run: tokio::spawn(supervisor.run()),
        shutdown,
    }
}

fn start_registered(config: BotConfig) -> Harness {
    let (factory, sessions) = MockTransportFactory::new(true);
    start(config, factory, sessions)
}

impl Harness {
    async fn next_session(&mut self) -> MockSession {
        self.sessions.recv().await.unwrap()
    }

    async fn stop(self) {
        self.shutdown.cancel();
        assert_eq!(self.run.await.unwrap().unwrap(), ExitReason::Shutdown);
    }
}

async fn open(session: &MockSession) {
    session
        .emit(TransportEvent::ConnectionUpdate(ConnectionUpdate::open()))
        .await;
}

async fn close(session: &MockSession, code: Option<u16>) {
    session
        .emit(TransportEvent::ConnectionUpdate(ConnectionUpdate::closed(
            code,
            Some("stream errored".to_string()),
        )))
        .await;
}

fn status(id: &str) -> IncomingMessage {
    IncomingMessage {
        key: MessageKey {
            remote_jid: STATUS_BROADCAST_JID.to_string(),
            id: id.to_string(),
            from_me: false,
            participant: Some(user_jid("15551112222")),
        },
        push_name: None,
        content: MessageContent::Text("hello".to_string()),
    }
}

#[tokio::test(start_paused = true)]
async fn heartbeats_stop_when_the_connection_closes() {
    let mut harness = start_registered(test_config());
    let session = harness.next_session().await;

    let opened_at = Instant::now();
    open(&session).await;

    sleep_until(opened_at + ms(90_000)).await;
    close(&session, Some(428)).await;

    sleep_until(opened_at + ms(200_000)).await;
    let offsets: Vec<Duration> = session
        .transport
        .heartbeat_times()
        .into_iter()
        .map(|at| at - opened_at)
        .collect();
    assert_eq!(offsets, vec![Duration::ZERO, ms(60_000)]);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn recoverable_close_reconnects_exactly_once_after_the_delay() {
    let mut harness = start_registered(test_config());
    let first = harness.next_session().await;
    open(&first).await;
    sleep(SECOND).await;

    let closed_at = Instant::now();
    close(&first, Some(515)).await;

    let second = harness.next_session().await;
    assert_eq!(Instant::now() - closed_at, ms(5_000));
    assert_eq!(second.params.generation, 2);

    sleep(ms(120_000)).await;
    assert_eq!(harness.factory.attempts(), 2);
    assert!(harness.sessions.try_recv().is_err());

    // Nothing sent through the old transport once it was replaced.
    let sent_before = first.transport.calls().len();
    open(&second).await;
    sleep(ms(130_000)).await;
    assert_eq!(first.transport.calls().len(), sent_before);
    assert_eq!(second.transport.heartbeat_times().len(), 3);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn close_without_error_is_recoverable() {
    let mut harness = start_registered(test_config());
    let first = harness.next_session().await;
    first
        .emit(TransportEvent::ConnectionUpdate(ConnectionUpdate {
            connection: ConnectionPhase::Close,
            last_disconnect: None,
        }))
        .await;

    let second = harness.next_session().await;
    assert_eq!(second.params.generation, 2);
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn dropped_event_stream_counts_as_a_close() {
    let mut harness = start_registered(test_config());
    let first = harness.next_session().await;
    drop(first);

    let started = Instant::now();
    let second = harness.next_session().await;
    assert_eq!(Instant::now() - started, ms(5_000));
    assert_eq!(second.params.generation, 2);
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn logged_out_ends_the_run_without_reconnecting() {
    let mut harness = start_registered(test_config());
    let session = harness.next_session().await;
    open(&session).await;
    sleep(SECOND).await;

    close(&session, Some(401)).await;
    let exit = harness.run.await.unwrap().unwrap();
    assert_eq!(
        exit,
        ExitReason::LoggedOut {
            reason: DisconnectReason::LoggedOut
        }
    );
    assert_eq!(exit.exit_code(), 0);
    assert_eq!(harness.factory.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_construction_is_retried_until_it_succeeds() {
    let (factory, sessions) = MockTransportFactory::new(true);
    factory.fail_creations(2);
    let started = Instant::now();
    let mut harness = start(test_config(), factory, sessions);

    let session = harness.next_session().await;
    assert_eq!(Instant::now() - started, ms(10_000));
    assert_eq!(harness.factory.attempts(), 3);
    assert_eq!(session.params.generation, 3);
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn unregistered_session_waits_before_requesting_a_code() {
    let (factory, sessions) = MockTransportFactory::new(false);
    let mut harness = start(test_config(), factory, sessions);
    let session = harness.next_session().await;
    let created_at = Instant::now();

    sleep(ms(15_000)).await;
    let calls = session.transport.timed_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0 - created_at, ms(10_000));
    assert_eq!(
        calls[0].1,
        MockCall::RequestPairingCode("15550000002".to_string())
    );

    // The phone confirms and the transport opens.
    open(&session).await;
    sleep(SECOND).await;
    assert_eq!(session.transport.heartbeat_times().len(), 1);
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_pairing_recycles_the_session() {
    let (factory, sessions) = MockTransportFactory::new(false);
    factory.fail_pairing_requests(u32::MAX);
    let mut harness = start(test_config(), factory, sessions);

    let first = harness.next_session().await;
    let created_at = Instant::now();

    let second = harness.next_session().await;
    // 10s settle, four 3s backoffs, then the 5s reconnect delay.
    assert_eq!(Instant::now() - created_at, ms(10_000 + 4 * 3_000 + 5_000));
    assert_eq!(second.params.generation, 2);

    sleep(SECOND).await;
    let calls = first.transport.calls();
    assert_eq!(
        calls
            .iter()
            .filter(|c| matches!(c, MockCall::RequestPairingCode(_)))
            .count(),
        5
    );
    assert_eq!(calls.last(), Some(&MockCall::End));

    // The replacement session gets a full attempt budget of its own.
    sleep(ms(22_000)).await;
    assert_eq!(
        second
            .transport
            .count(|c| matches!(c, MockCall::RequestPairingCode(_))),
        5
    );

    harness.stop().await;
}

fn pairing_requests(session: &MockSession) -> usize {
    session
        .transport
        .count(|c| matches!(c, MockCall::RequestPairingCode(_)))
}

#[tokio::test(start_paused = true)]
async fn close_during_pairing_leaves_a_full_budget_for_the_next_session() {
    let (factory, sessions) = MockTransportFactory::new(false);
    factory.fail_pairing_requests(u32::MAX);
    let mut harness = start(test_config(), factory, sessions);

    let first = harness.next_session().await;
    // Rounds at 10s, 13s and 16s after creation.
    sleep(ms(17_000)).await;
    assert_eq!(pairing_requests(&first), 3);
    close(&first, Some(428)).await;

    let second = harness.next_session().await;
    let created_at = Instant::now();
    sleep_until(created_at + ms(24_000)).await;
    assert_eq!(pairing_requests(&second), 5);
    assert_eq!(harness.factory.attempts(), 2);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn session_linked_elsewhere_skips_pairing_after_recycle() {
    let (factory, sessions) = MockTransportFactory::new(false);
    factory.fail_pairing_requests(u32::MAX);
    let mut harness = start(test_config(), factory, sessions);

    let first = harness.next_session().await;
    harness.factory.set_registered(true);

    let second = harness.next_session().await;
    assert_eq!(pairing_requests(&first), 5);
    open(&second).await;
    sleep(ms(30_000)).await;

    assert_eq!(pairing_requests(&second), 0);
    assert_eq!(second.transport.heartbeat_times().len(), 1);
    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn revoke_right_after_its_message_is_forwarded() {
    let config = BotConfig {
        anti_delete: true,
        ..test_config()
    };
    let mut harness = start_registered(config);
    let session = harness.next_session().await;

    let key = MessageKey {
        remote_jid: user_jid("15559990000"),
        id: "M1".to_string(),
        from_me: false,
        participant: None,
    };
    let text = IncomingMessage {
        key: key.clone(),
        push_name: None,
        content: MessageContent::Text("meet at 6".to_string()),
    };
    let revoke = IncomingMessage {
        key: MessageKey {
            id: "M2".to_string(),
            ..key.clone()
        },
        push_name: None,
        content: MessageContent::Revoke { key },
    };
    session.emit(TransportEvent::MessagesUpsert(vec![text])).await;
    session
        .emit(TransportEvent::MessagesUpsert(vec![revoke]))
        .await;
    sleep(SECOND).await;

    let forwarded = session.transport.calls().into_iter().any(|c| {
        matches!(
            c,
            MockCall::SendMessage { to, message: OutgoingMessage::Text(body), .. }
                if to == user_jid(TEST_OWNER) && body.contains("meet at 6")
        )
    });
    assert!(forwarded);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn redelivered_status_is_viewed_once_across_reconnects() {
    let mut harness = start_registered(test_config());
    let first = harness.next_session().await;
    open(&first).await;

    let batch = TransportEvent::MessagesUpsert(vec![status("S1")]);
    first.emit(batch.clone()).await;
    first.emit(batch.clone()).await;
    sleep(SECOND).await;

    close(&first, Some(408)).await;
    let second = harness.next_session().await;
    open(&second).await;
    second.emit(batch).await;
    second
        .emit(TransportEvent::MessagesUpsert(vec![status("S2")]))
        .await;
    sleep(SECOND).await;

    let reads = |s: &MockSession| {
        s.transport
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::ReadMessages(keys) => Some(keys[0].id.clone()),
                _ => None,
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(reads(&first), vec!["S1".to_string()]);
    assert_eq!(reads(&second), vec!["S2".to_string()]);

    harness.stop().await;
}

#[tokio::test(start_paused = true)]
async fn credential_updates_are_persisted() {
    let mut harness = start_registered(test_config());
    let session = harness.next_session().await;

    session.emit(TransportEvent::CredentialsUpdate).await;
    sleep(SECOND).await;
    assert_eq!(session.transport.calls(), vec![MockCall::SaveCredentials]);

    harness.stop().await;
}
