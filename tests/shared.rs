//! Many sessions over one shared UDP socket.

mod common;

use common::*;
use snmp_query::{Credential, SharedSession, SharedUdpTransport, Session};

#[tokio::test]
async fn sessions_share_one_socket() {
    init_tracing();
    let first = FakeAgent::start().await;
    let second = FakeAgent::start().await;
    let shared = SharedUdpTransport::bind("127.0.0.1:0").await.unwrap();

    let sessions: Vec<SharedSession> = [&first, &second]
        .iter()
        .map(|agent| {
            Session::builder(agent.target(), Credential::v2c(COMMUNITY))
                .build(shared.handle(agent.addr()))
                .unwrap()
        })
        .collect();
    assert_eq!(sessions[0].local_addr(), sessions[1].local_addr());

    let (name, descr) = (sys_name(), sys_descr());
    let (a, b) = tokio::join!(sessions[0].get_one(&name), sessions[1].get_one(&descr));
    assert_eq!(a.unwrap().as_str(), Some("edge-router-1"));
    assert_eq!(b.unwrap().as_str(), Some("Fake agent 1.0"));

    // Both handles drew from the same counter.
    assert_ne!(first.request_ids()[0], second.request_ids()[0]);
}

#[tokio::test]
async fn shared_walks_run_concurrently() {
    init_tracing();
    let agent = FakeAgent::start().await;
    let shared = SharedUdpTransport::bind("127.0.0.1:0").await.unwrap();
    let session = Session::builder(agent.target(), Credential::v2c(COMMUNITY))
        .build(shared.handle(agent.addr()))
        .unwrap();

    let (system, table) = tokio::join!(
        session.walk(system_subtree()).unwrap().collect(),
        session.table_walk(vec![if_descr(), if_type()]).collect(),
    );
    assert_eq!(system.unwrap().len(), 6);
    assert_eq!(table.unwrap().len(), 3);
}
