//! GET, GETNEXT and GETBULK against the in-process agent.

mod common;

use common::*;
use snmp_query::{Credential, Error, ErrorStatus, Retry, Session, Value, Version};
use std::time::Duration;

async fn session(agent: &FakeAgent, credential: Credential) -> Session {
    init_tracing();
    Session::builder(agent.target(), credential)
        .retry(Retry::fixed(2, Duration::from_secs(1)))
        .connect()
        .await
        .unwrap()
}

#[tokio::test]
async fn get_sys_name_returns_one_octet_string() {
    let agent = FakeAgent::start().await;
    let session = session(&agent, Credential::v2c(COMMUNITY)).await;

    let result = session.get(&[sys_name()]).await.unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result[0].oid, sys_name());
    assert!(matches!(result[0].value, Value::OctetString(_)));
    assert_eq!(result[0].value.as_str(), Some("edge-router-1"));
    assert_eq!(session.in_flight(), 0);
}

#[tokio::test]
async fn get_one_returns_the_value() {
    let agent = FakeAgent::start().await;
    let session = session(&agent, Credential::v1(COMMUNITY)).await;
    assert_eq!(
        session.get_one(&sys_uptime()).await.unwrap(),
        Value::TimeTicks(123_456)
    );
}

#[tokio::test]
async fn v1_missing_object_is_remote_no_such_name() {
    let agent = FakeAgent::start().await;
    let session = session(&agent, Credential::v1(COMMUNITY)).await;

    let err = session.get(&[nonexistent_oid()]).await.unwrap_err();
    match err {
        Error::Remote {
            status,
            index,
            oid,
            target,
        } => {
            assert_eq!(status, ErrorStatus::NoSuchName);
            assert_eq!(index, 1);
            assert_eq!(oid, Some(nonexistent_oid()));
            assert_eq!(target, Some(agent.addr()));
        }
        other => panic!("expected Remote, got {other:?}"),
    }
    // Remote errors are final: one request, no retry.
    assert_eq!(agent.received().len(), 1);
}

#[tokio::test]
async fn v1_error_index_points_at_failing_binding() {
    let agent = FakeAgent::start().await;
    let session = session(&agent, Credential::v1(COMMUNITY)).await;

    let err = session
        .get(&[sys_descr(), nonexistent_oid(), sys_name()])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Remote { status: ErrorStatus::NoSuchName, index: 2, .. }
    ));
}

#[tokio::test]
async fn v2c_missing_object_is_an_exception_value() {
    let agent = FakeAgent::start().await;
    let session = session(&agent, Credential::v2c(COMMUNITY)).await;

    let result = session.get(&[sys_name(), nonexistent_oid()]).await.unwrap();
    assert_eq!(result[1].value, Value::NoSuchObject);

    // get_one reports the same condition as noSuchName at index 1.
    assert!(matches!(
        session.get_one(&nonexistent_oid()).await,
        Err(Error::Remote { status: ErrorStatus::NoSuchName, index: 1, .. })
    ));
}

#[tokio::test]
async fn get_next_returns_successors_in_order() {
    let agent = FakeAgent::start().await;
    let session = session(&agent, Credential::v2c(COMMUNITY)).await;

    let result = session
        .get_next(&[system_subtree(), sys_contact()])
        .await
        .unwrap();
    assert_eq!(result[0].oid, sys_descr());
    assert_eq!(result[1].oid, sys_name());
}

#[tokio::test]
async fn get_bulk_honours_non_repeaters() {
    let agent = FakeAgent::start().await;
    let session = session(&agent, Credential::v2c(COMMUNITY)).await;

    let result = session
        .get_bulk(&[system_subtree(), if_descr()], 1, 3)
        .await
        .unwrap();
    assert_eq!(result.len(), 4);
    assert_eq!(result[0].oid, sys_descr());
    assert_eq!(result[1].oid, if_descr().child(1));
    assert_eq!(result[2].oid, if_descr().child(2));
    assert_eq!(result[3].oid, if_descr().child(3));
}

#[tokio::test]
async fn get_many_splits_large_requests() {
    let agent = FakeAgent::start().await;
    init_tracing();
    let session = Session::builder(agent.target(), Credential::v2c(COMMUNITY))
        .max_oids_per_request(2)
        .connect()
        .await
        .unwrap();

    let oids = [sys_descr(), sys_uptime(), sys_contact(), sys_name(), sys_location()];
    let result = session.get_many(&oids).await.unwrap();
    assert_eq!(result.len(), 5);
    assert_eq!(result[3].value.as_str(), Some("edge-router-1"));
    assert_eq!(agent.received().len(), 3);
}

#[tokio::test]
async fn session_reports_its_endpoints() {
    let agent = FakeAgent::start().await;
    let session = session(&agent, Credential::v2c(COMMUNITY)).await;
    assert_eq!(session.peer_addr(), agent.addr());
    assert_ne!(session.local_addr().port(), 0);
    assert_eq!(session.version(), Version::V2c);
}
