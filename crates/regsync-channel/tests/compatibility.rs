//! Transport compatibility: every message variant crosses a connected pair
//! intact, in both directions, with and without acknowledgement.

use regsync_channel::{ChannelConfig, MessageConnection};
use regsync_core::{
    AwsDataCenterInfo, BasicDataCenterInfo, Delta, FieldChange, InstanceInfo, Interest, Origin,
    ServicePort, Source, Status, StreamStateNotification,
};
use regsync_proto::{Message, ReplicationHello, ReplicationHelloReply};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

fn config() -> ChannelConfig {
    ChannelConfig::default().with_ack_timeout(Duration::from_secs(5))
}

fn full_instance() -> InstanceInfo {
    InstanceInfo::builder()
        .with_id("id#full")
        .with_app("regsync-discovery")
        .with_app_group("regsync")
        .with_asg("regsync-discovery-v002")
        .with_vip_address("regsync-discovery")
        .with_secure_vip_address("regsync-discovery-secure")
        .with_ports([ServicePort::new(8080), ServicePort::secure(8443).named("tls")])
        .with_status(Status::OutOfService)
        .with_homepage_url("http://discovery/")
        .with_status_page_url("http://discovery/status")
        .with_health_check_urls([
            Some("http://discovery/health".to_string()),
            None,
            Some(String::new()),
        ])
        .with_meta("zone", "a")
        .with_data_center_info(
            AwsDataCenterInfo::new("eu-west-1", "eu-west-1b", "i-42")
                .with_instance_type("m5.large")
                .with_public("54.0.0.1", "ec2-54-0-0-1"),
        )
        .build()
        .unwrap()
}

fn null_laden_instance() -> InstanceInfo {
    InstanceInfo::builder()
        .with_id("id#nulls")
        .with_ports([None::<ServicePort>, None])
        .with_health_check_urls([None::<String>])
        .with_data_center_info(BasicDataCenterInfo::new("dc1", "host-1"))
        .build()
        .unwrap()
}

fn every_variant() -> Vec<Message> {
    let source = Source::new(Origin::Local, "node-a", 7);
    let deltas = Delta::builder("id#full");

    vec![
        Message::Register(full_instance()),
        Message::Unregister,
        Message::Heartbeat,
        Message::ReplicationHello(ReplicationHello::new(source.clone(), 12)),
        Message::ReplicationHelloReply(ReplicationHelloReply::new(source, false)),
        Message::InterestRegistration(Interest::None),
        Message::InterestRegistration(Interest::for_instance("id#full")),
        Message::InterestRegistration(Interest::for_application("a")),
        Message::InterestRegistration(Interest::for_applications(["a", "b", "c"])),
        Message::InterestRegistration(Interest::for_vip("v")),
        Message::InterestRegistration(Interest::for_secure_vip("sv")),
        Message::InterestRegistration(
            Interest::for_applications(["a", "b"])
                | Interest::for_secure_vip("sv")
                | Interest::for_vip("v"),
        ),
        Message::InterestRegistration(Interest::FullRegistry),
        Message::UnregisterInterestSet,
        Message::AddInstance(full_instance()),
        Message::AddInstance(null_laden_instance()),
        Message::DeleteInstance("id#gone".to_string()),
    ]
    .into_iter()
    .chain(
        every_field_change()
            .into_iter()
            .map(|change| Message::UpdateInstanceInfo(deltas.with_change(change))),
    )
    .chain([
        Message::StreamStateUpdate(StreamStateNotification::buffer_start(
            Interest::for_application("a"),
        )),
        Message::StreamStateUpdate(StreamStateNotification::buffer_end(
            Interest::for_application("a"),
        )),
    ])
    .collect()
}

/// Every field with a payload, plus clears of the optional ones.
fn every_field_change() -> Vec<FieldChange> {
    vec![
        FieldChange::Application(Some("regsync-discovery".to_string())),
        FieldChange::Application(None),
        FieldChange::ApplicationGroup(Some("regsync".to_string())),
        FieldChange::Asg(Some("regsync-discovery-v003".to_string())),
        FieldChange::VipAddress(Some("regsync-discovery".to_string())),
        FieldChange::SecureVipAddress(Some("regsync-discovery-secure".to_string())),
        FieldChange::Ports(Some(BTreeSet::from([
            ServicePort::new(80),
            ServicePort::secure(443).named("tls"),
        ]))),
        FieldChange::Ports(None),
        FieldChange::Status(Some(Status::Down)),
        FieldChange::Status(None),
        FieldChange::HomepageUrl(Some("http://discovery/".to_string())),
        FieldChange::StatusPageUrl(Some("http://discovery/status".to_string())),
        FieldChange::StatusPageUrl(None),
        FieldChange::HealthcheckUrls(Some(BTreeSet::from([
            "http://discovery/health".to_string(),
            "https://discovery/health".to_string(),
        ]))),
        FieldChange::HealthcheckUrls(None),
        FieldChange::MetaData(Some(BTreeMap::from([
            ("zone".to_string(), "b".to_string()),
            ("weight".to_string(), "3".to_string()),
        ]))),
        FieldChange::MetaData(None),
        FieldChange::DataCenterInfo(Some(BasicDataCenterInfo::new("dc2", "host-2").into())),
        FieldChange::DataCenterInfo(Some(
            AwsDataCenterInfo::new("us-east-1", "us-east-1a", "i-7")
                .with_private("10.0.0.7", "ip-10-0-0-7")
                .into(),
        )),
        FieldChange::DataCenterInfo(None),
    ]
}

async fn exchange(sender: &MessageConnection, receiver: &MessageConnection) {
    let mut incoming = receiver.incoming().unwrap();

    for message in every_variant() {
        sender.submit(message.clone()).unwrap();
        assert_eq!(incoming.next().await.unwrap(), Some(message));
    }

    for message in every_variant() {
        let ack = sender.submit_with_ack(message.clone());
        assert_eq!(incoming.next().await.unwrap(), Some(message));
        receiver.acknowledge().unwrap();
        ack.await.unwrap();
    }
}

#[tokio::test]
async fn client_to_server() {
    let (client, server) = MessageConnection::pair(config());
    exchange(&client, &server).await;
}

#[tokio::test]
async fn server_to_client() {
    let (client, server) = MessageConnection::pair(config());
    exchange(&server, &client).await;
}

#[tokio::test]
async fn null_laden_sets_arrive_empty() {
    let (client, server) = MessageConnection::pair(config());
    let mut incoming = server.incoming().unwrap();

    client
        .submit(Message::AddInstance(null_laden_instance()))
        .unwrap();

    let Some(Message::AddInstance(received)) = incoming.next().await.unwrap() else {
        panic!("expected AddInstance");
    };
    assert!(received.ports().is_empty());
    assert!(received.health_check_urls().is_empty());
    assert_eq!(
        received,
        InstanceInfo::builder()
            .with_id("id#nulls")
            .with_data_center_info(BasicDataCenterInfo::new("dc1", "host-1"))
            .build()
            .unwrap()
    );
}

#[tokio::test]
async fn interleaved_acks_in_both_directions() {
    let (client, server) = MessageConnection::pair(config());
    let mut client_in = client.incoming().unwrap();
    let mut server_in = server.incoming().unwrap();

    let up = client.submit_with_ack(Message::Unregister);
    let down = server.submit_with_ack(Message::DeleteInstance("x".to_string()));

    assert_eq!(server_in.next().await.unwrap(), Some(Message::Unregister));
    assert_eq!(
        client_in.next().await.unwrap(),
        Some(Message::DeleteInstance("x".to_string()))
    );

    client.acknowledge().unwrap();
    server.acknowledge().unwrap();
    up.await.unwrap();
    down.await.unwrap();
}
