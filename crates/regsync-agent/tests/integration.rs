use regsync_agent::{
    DiscoveryClient, DiscoveryConfig, DiscoveryRequest, DiscoverySession, ProtocolError,
    RegistrationClient, RegistrationEvent, RegistrationHandler, ReplicationReceiver,
    ReplicationSender, ReplicationUpdate,
};
use regsync_channel::{ChannelConfig, ChannelError, MessageConnection};
use regsync_core::{
    ChangeNotification, Delta, FieldChange, InstanceInfo, Interest, Origin, Source, Status,
};
use regsync_proto::{frame_batch, Message};
use std::time::Duration;

fn connected() -> (MessageConnection, MessageConnection) {
    MessageConnection::pair(ChannelConfig::default().with_ack_timeout(Duration::from_secs(5)))
}

fn instance(id: &str, app: &str, status: Status) -> InstanceInfo {
    InstanceInfo::builder()
        .with_id(id)
        .with_app(app)
        .with_vip_address(format!("{app}.vip"))
        .with_status(status)
        .build()
        .unwrap()
}

#[tokio::test]
async fn register_heartbeat_unregister() {
    let (client, server) = connected();
    let mut client = RegistrationClient::new(client).unwrap();
    let mut handler = RegistrationHandler::new(server).unwrap();

    let registry = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(event) = handler.next_event().await.unwrap() {
            let done = event == RegistrationEvent::Unregistered;
            events.push(event);
            if done {
                break;
            }
        }
        events
    });

    let registered = instance("id#1", "billing", Status::Starting);
    client.register(registered.clone()).await.unwrap();
    assert!(client.is_registered());

    client.heartbeat().unwrap();

    let up = registered.to_builder().with_status(Status::Up).build().unwrap();
    client.register(up.clone()).await.unwrap();
    assert_eq!(client.instance(), Some(&up));

    client.unregister().await.unwrap();
    assert!(!client.is_registered());
    assert_eq!(client.heartbeat(), Err(ProtocolError::LifecycleEnded));

    // The connection outlives the lifecycle.
    assert!(client.connection().is_open());

    assert_eq!(
        registry.await.unwrap(),
        vec![
            RegistrationEvent::Registered(registered),
            RegistrationEvent::Heartbeat,
            RegistrationEvent::Registered(up),
            RegistrationEvent::Unregistered,
        ]
    );
}

#[tokio::test]
async fn replication_full_sync_then_incremental() {
    let (a, b) = connected();
    let mut sender = ReplicationSender::new(a, Source::new(Origin::Local, "node-a", 5)).unwrap();
    let mut receiver =
        ReplicationReceiver::new(b, Source::new(Origin::Local, "node-b", 1)).unwrap();

    let registry = vec![
        instance("id#1", "billing", Status::Up),
        instance("id#2", "billing", Status::Up),
        instance("id#3", "search", Status::Down),
    ];

    let peer = tokio::spawn(async move {
        let hello = receiver
            .accept_handshake(|hello| Ok(hello.registry_version > 0))
            .await
            .unwrap();
        assert_eq!(hello.source.node_id, "node-a");

        let mut updates = Vec::new();
        while let Some(event) = receiver.next_event().await.unwrap() {
            assert_eq!(event.source.node_id, "node-a");
            updates.push(event.update);
        }
        updates
    });

    let reply = sender.handshake(42).await.unwrap();
    assert!(reply.full_sync_requested);
    assert_eq!(sender.peer().map(|s| s.node_id.as_str()), Some("node-b"));

    assert_eq!(sender.send_snapshot(registry.clone()).await.unwrap(), 3);
    assert_eq!(
        sender.send_snapshot(registry.clone()).await,
        Err(ProtocolError::SnapshotNotRequested)
    );

    sender.heartbeat().unwrap();
    sender.delete_instance("id#2").unwrap().await.unwrap();
    let changed = instance("id#3", "search", Status::Up);
    sender.add_instance(changed.clone()).unwrap().await.unwrap();
    sender.connection().close();

    let mut expected: Vec<ReplicationUpdate> =
        registry.into_iter().map(ReplicationUpdate::Add).collect();
    expected.extend([
        ReplicationUpdate::Heartbeat,
        ReplicationUpdate::Delete("id#2".to_string()),
        ReplicationUpdate::Add(changed),
    ]);
    assert_eq!(peer.await.unwrap(), expected);
}

#[tokio::test]
async fn replication_without_full_sync_streams_immediately() {
    let (a, b) = connected();
    let mut sender = ReplicationSender::new(a, Source::new(Origin::Local, "node-a", 0)).unwrap();
    let mut receiver =
        ReplicationReceiver::new(b, Source::new(Origin::Local, "node-b", 0)).unwrap();

    let peer = tokio::spawn(async move {
        receiver.accept_handshake(|_| Ok(false)).await.unwrap();
        receiver.next_event().await.unwrap()
    });

    let reply = sender.handshake(0).await.unwrap();
    assert!(!reply.full_sync_requested);
    sender.delete_instance("id#9").unwrap().await.unwrap();

    let event = peer.await.unwrap().unwrap();
    assert_eq!(event.update, ReplicationUpdate::Delete("id#9".to_string()));
}

#[tokio::test]
async fn discovery_interest_switching_converges_the_view() {
    let (client, server) = connected();
    let mut client = DiscoveryClient::new(client, &DiscoveryConfig::default()).unwrap();
    let mut session = DiscoverySession::new(server).unwrap();

    let registry = vec![
        instance("id#1", "billing", Status::Up),
        instance("id#2", "billing", Status::Up),
        instance("id#3", "search", Status::Up),
    ];
    let server_registry = registry.clone();

    let server = tokio::spawn(async move {
        // Initial interest: billing.
        let Some(DiscoveryRequest::Interest(interest)) = session.next_request().await.unwrap()
        else {
            panic!("expected interest registration");
        };
        session
            .switch_interest(interest, &server_registry)
            .await
            .unwrap();

        // Interest widened to billing + search.
        let Some(DiscoveryRequest::Interest(interest)) = session.next_request().await.unwrap()
        else {
            panic!("expected interest registration");
        };
        session
            .switch_interest(interest, &server_registry)
            .await
            .unwrap();

        // A billing instance goes down, one search instance leaves.
        let down = server_registry[0]
            .to_builder()
            .with_status(Status::Down)
            .build()
            .unwrap();
        session
            .apply_changes([
                ChangeNotification::Modify(down),
                ChangeNotification::Delete("id#3".to_string()),
                ChangeNotification::Add(instance("id#4", "other", Status::Up)),
            ])
            .await
            .unwrap();

        assert_eq!(session.next_request().await, Ok(Some(DiscoveryRequest::Unregister)));
        session.switch_interest(Interest::None, &server_registry).await.unwrap();
        session
    });

    client
        .register_interest(Interest::for_application("billing"))
        .await
        .unwrap();
    assert!(!client.view().is_settled());

    let batch = client.next_batch().await.unwrap().unwrap();
    assert_eq!(batch.updates.len(), 2);
    assert!(client.view().is_settled());
    assert_eq!(client.view().len(), 2);

    let widened = Interest::for_application("billing") | Interest::for_application("search");
    client.register_interest(widened.clone()).await.unwrap();
    let batch = client.next_batch().await.unwrap().unwrap();
    assert_eq!(batch.interest, Some(widened));
    assert_eq!(batch.updates, vec![Message::AddInstance(registry[2].clone())]);
    assert_eq!(client.view().len(), 3);

    let batch = client.next_batch().await.unwrap().unwrap();
    assert_eq!(batch.updates.len(), 2);
    assert_eq!(client.view().len(), 2);
    assert_eq!(client.view().get("id#1").map(InstanceInfo::status), Some(Status::Down));
    assert!(client.view().get("id#3").is_none());
    assert!(client.view().get("id#4").is_none());

    client.unregister_interest().await.unwrap();
    let batch = client.next_batch().await.unwrap().unwrap();
    assert_eq!(batch.interest, Some(Interest::None));
    assert!(client.view().is_empty());
    assert!(client.view().is_settled());

    server.await.unwrap();
}

#[tokio::test]
async fn empty_initial_view_still_settles() {
    let (client, server) = connected();
    let mut client = DiscoveryClient::new(client, &DiscoveryConfig::default()).unwrap();
    let mut session = DiscoverySession::new(server).unwrap();

    let server = tokio::spawn(async move {
        let Some(DiscoveryRequest::Interest(interest)) = session.next_request().await.unwrap()
        else {
            panic!("expected interest registration");
        };
        session
            .switch_interest(interest, std::iter::empty::<&InstanceInfo>())
            .await
            .unwrap()
    });

    client
        .register_interest(Interest::for_vip("nothing.vip"))
        .await
        .unwrap();
    let batch = client.next_batch().await.unwrap().unwrap();

    assert!(batch.updates.is_empty());
    assert!(client.view().is_settled());
    assert_eq!(server.await.unwrap(), 0);
}

#[tokio::test]
async fn status_delta_then_reset_over_the_wire() {
    let (client, server) = connected();
    let mut client = DiscoveryClient::new(client, &DiscoveryConfig::default()).unwrap();
    let mut server_in = server.incoming().unwrap();

    let registered = client.register_interest(Interest::FullRegistry);
    let serve = async {
        assert_eq!(
            server_in.next().await.unwrap(),
            Some(Message::InterestRegistration(Interest::FullRegistry))
        );
        server.acknowledge().unwrap();

        let deltas = Delta::builder("id#1");
        let batch = frame_batch(
            &Interest::FullRegistry,
            [
                Message::AddInstance(instance("id#1", "billing", Status::Up)),
                Message::UpdateInstanceInfo(
                    deltas.with_change(FieldChange::Status(Some(Status::Down))),
                ),
            ],
        );
        for message in batch {
            let _ = server.submit_with_ack(message);
        }
        let reset = frame_batch(
            &Interest::FullRegistry,
            [Message::UpdateInstanceInfo(
                deltas.with_change(FieldChange::Status(None)),
            )],
        );
        for message in reset {
            let _ = server.submit_with_ack(message);
        }
    };
    let (registered, ()) = tokio::join!(registered, serve);
    registered.unwrap();

    client.next_batch().await.unwrap().unwrap();
    assert_eq!(
        client.view().get("id#1").map(InstanceInfo::status),
        Some(Status::Down)
    );

    client.next_batch().await.unwrap().unwrap();
    assert_eq!(
        client.view().get("id#1").map(InstanceInfo::status),
        Some(Status::Unknown)
    );
}

#[tokio::test]
async fn malformed_interest_closes_the_session() {
    let (client, server) = connected();
    let mut session = DiscoverySession::new(server).unwrap();

    let malformed = Interest::Composite([Interest::None, Interest::FullRegistry].into());
    let ack = client.submit_with_ack(Message::InterestRegistration(malformed));

    assert!(matches!(
        session.next_request().await,
        Err(ProtocolError::MalformedInterest(_))
    ));
    assert!(ack.await.is_err());
}

#[tokio::test]
async fn unbracketed_update_is_rejected_when_buffered() {
    let (client, server) = connected();
    let mut client = DiscoveryClient::new(client, &DiscoveryConfig { buffered: true }).unwrap();

    let ack = server.submit_with_ack(Message::DeleteInstance("id#1".to_string()));

    assert!(matches!(
        client.next_batch().await,
        Err(ProtocolError::StreamState(_))
    ));
    assert!(!client.connection().is_open());
    // The rejected update was never acknowledged.
    assert!(matches!(ack.await, Err(ChannelError::Connection(_))));
}

#[tokio::test]
async fn interest_switch_racing_a_registry_change_does_not_stall() {
    let (client, server) = MessageConnection::pair(
        ChannelConfig::default().with_ack_timeout(Duration::from_secs(1)),
    );
    let mut client = DiscoveryClient::new(client, &DiscoveryConfig::default()).unwrap();
    let mut session = DiscoverySession::new(server).unwrap();

    let server = tokio::spawn(async move {
        let Some(DiscoveryRequest::Interest(interest)) = session.next_request().await.unwrap()
        else {
            panic!("expected interest registration");
        };
        session
            .switch_interest(interest, std::iter::empty::<&InstanceInfo>())
            .await
            .unwrap();
        // The client is already waiting on its next registration.
        let flushed = session
            .apply_changes([ChangeNotification::Add(instance("id#1", "billing", Status::Up))])
            .await;
        let request = session.next_request().await;
        (flushed, request, session)
    });

    client
        .register_interest(Interest::for_application("billing"))
        .await
        .unwrap();
    let search = Interest::for_application("search");
    client.register_interest(search.clone()).await.unwrap();

    let (flushed, request, _session) = server.await.unwrap();
    assert_eq!(flushed, Ok(1));
    assert_eq!(request, Ok(Some(DiscoveryRequest::Interest(search))));

    // Both batches were taken in while the second registration was pending.
    let batch = client.next_batch().await.unwrap().unwrap();
    assert!(batch.updates.is_empty());
    let batch = client.next_batch().await.unwrap().unwrap();
    assert_eq!(batch.updates.len(), 1);
    assert!(client.view().get("id#1").is_some());
    assert!(!client.view().is_settled());
}
