//! Two nodes over loopback: group creation, key bootstrap through
//! the overlay, concealed search, and the mutually authenticated
//! transfer path.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use trella_overlay::{
    FileHandle, GetEvent, JoinStatus, Node, NodeCallbacks,
};

const GROUP: &str = "G";
const ALPHA_CONTENTS: &[u8] = b"the first file in the group";

async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>, what: &str) -> T {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect(what)
        .expect(what)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn secure_group_search_and_transfer() {
    trella_integration_tests::init_tracing();

    // Two identities, each trusting the other's certificate — the
    // out-of-band provisioning the mutual-auth transfer relies on.
    let (store_a, id_a) = trella_integration_tests::store_with_local("Alice");
    let (store_b, id_b) = trella_integration_tests::store_with_local("Bob");
    trella_integration_tests::trust_peer(&store_a, &id_b);
    trella_integration_tests::trust_peer(&store_b, &id_a);

    let node_a = Node::new(store_a, Ipv4Addr::LOCALHOST, NodeCallbacks::default());
    let node_b = Node::new(store_b, Ipv4Addr::LOCALHOST, NodeCallbacks::default());

    let port_a = node_a.add_port(0).await.expect("node A port");

    // Node A creates the group (nobody answers its key search) and
    // shares a directory into it.
    let (join_a_tx, mut join_a_rx) = mpsc::unbounded_channel();
    node_a
        .join_group(
            GROUP,
            Duration::from_millis(300),
            Arc::new(move |_, status| {
                let _ = join_a_tx.send(status);
            }),
            Some(Arc::new(|_, peer| peer == "Bob")),
        )
        .await
        .expect("node A join");
    assert_eq!(
        recv_within(&mut join_a_rx, "node A join status").await,
        JoinStatus::Created
    );

    let share_dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(share_dir.path().join("alpha.txt"), ALPHA_CONTENTS).expect("write alpha.txt");
    node_a.add_share(share_dir.path(), Some("txt"), Some(GROUP));

    // Node B peers with A and joins the group; the key file travels
    // RSA-sealed over the authenticated path.
    node_b
        .add_host(Ipv4Addr::LOCALHOST, port_a)
        .await
        .expect("node B host");

    let (join_b_tx, mut join_b_rx) = mpsc::unbounded_channel();
    node_b
        .join_group(
            GROUP,
            Duration::from_secs(3),
            Arc::new(move |_, status| {
                let _ = join_b_tx.send(status);
            }),
            None,
        )
        .await
        .expect("node B join");
    assert_eq!(
        recv_within(&mut join_b_rx, "node B join status").await,
        JoinStatus::Ok
    );
    assert_eq!(
        node_b.group_key(GROUP).expect("B has the key").export(),
        node_a.group_key(GROUP).expect("A has the key").export(),
    );

    // A concealed search finds the shared file.
    let (hit_tx, mut hit_rx) = mpsc::unbounded_channel();
    node_b
        .search(
            "alpha",
            Some(GROUP),
            1,
            Arc::new(move |file: FileHandle| {
                let _ = hit_tx.send(file);
            }),
        )
        .expect("node B search");

    let hit = recv_within(&mut hit_rx, "search hit").await;
    assert_eq!(hit.name, "alpha.txt");
    assert_eq!(hit.group.as_deref(), Some(GROUP));
    assert_eq!(hit.size, ALPHA_CONTENTS.len() as u64);

    // The authenticated group transfer returns exactly the original
    // bytes after decryption under the group key.
    let (got_tx, mut got_rx) = mpsc::unbounded_channel();
    let get_id = node_b.get(
        hit,
        None,
        Arc::new(move |_, event| match event {
            GetEvent::Done { data, size } => {
                let _ = got_tx.send(Ok((data, size)));
            }
            GetEvent::Error => {
                let _ = got_tx.send(Err(()));
            }
            GetEvent::Progress { .. } => {}
        }),
    );

    let (data, size) = recv_within(&mut got_rx, "transfer completion")
        .await
        .expect("transfer succeeded");
    assert_eq!(size, ALPHA_CONTENTS.len() as u64);
    assert_eq!(data.as_deref(), Some(ALPHA_CONTENTS));
    node_b.get_wait(get_id).await;

    node_b.shutdown();
    node_a.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn public_search_cannot_see_group_files() {
    trella_integration_tests::init_tracing();

    let (store_a, _id_a) = trella_integration_tests::store_with_local("Alice");
    let (store_b, _id_b) = trella_integration_tests::store_with_local("Bob");

    let node_a = Node::new(store_a, Ipv4Addr::LOCALHOST, NodeCallbacks::default());
    let node_b = Node::new(store_b, Ipv4Addr::LOCALHOST, NodeCallbacks::default());

    let port_a = node_a.add_port(0).await.expect("node A port");

    let (join_tx, mut join_rx) = mpsc::unbounded_channel();
    node_a
        .join_group(
            "hidden",
            Duration::from_millis(200),
            Arc::new(move |_, status| {
                let _ = join_tx.send(status);
            }),
            None,
        )
        .await
        .expect("node A join");
    recv_within(&mut join_rx, "group creation").await;

    let share_dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(share_dir.path().join("secret.txt"), b"members only").expect("write");
    let public_dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(public_dir.path().join("open.txt"), b"anyone").expect("write");
    node_a.add_share(share_dir.path(), Some("txt"), Some("hidden"));
    node_a.add_share(public_dir.path(), Some("txt"), None);

    node_b
        .add_host(Ipv4Addr::LOCALHOST, port_a)
        .await
        .expect("node B host");

    // A public wildcard search sees the public file only.
    let (hit_tx, mut hit_rx) = mpsc::unbounded_channel();
    node_b
        .search(
            "*.txt",
            None,
            7,
            Arc::new(move |file: FileHandle| {
                let _ = hit_tx.send(file);
            }),
        )
        .expect("search");

    let hit = recv_within(&mut hit_rx, "public hit").await;
    assert_eq!(hit.name, "open.txt");
    assert!(hit.group.is_none());

    // Nothing else shows up.
    let extra = tokio::time::timeout(Duration::from_millis(500), hit_rx.recv()).await;
    assert!(extra.is_err(), "group-tagged file leaked into a public search");

    node_b.shutdown();
    node_a.shutdown();
}
