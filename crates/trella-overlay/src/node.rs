//! The node: composition root of the overlay.
//!
//! A [`Node`] owns the store, the authenticator, the shared-file
//! collection, and the tables of ports, peers, groups, shares,
//! in-flight searches, and in-flight transfers. One tokio task runs
//! per listening port (accept loop), per peer (reader loop), per
//! upload, and per download; teardown aborts workers before
//! reclaiming shared state.
//!
//! Callbacks fire from worker tasks and may overlap; they must be
//! re-entrant (calling back into the node from a callback is fine).

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use trella_auth::Authenticator;
use trella_collection::Collection;
use trella_crypto::SessionKey;
use trella_encoding::base64;
use trella_identity::Identity;
use trella_store::Store;
use trella_transport::{Connection, Direction, Listener, Mode};

use crate::auth_http::AuthTokens;
use crate::wire::{
    self, Packet, PacketKind, ReplyEntry, ReplyPayload, SearchPayload, GUID_SIZE,
};
use crate::{transfer, OverlayError, Result, PORT_DEFAULT, SECURE_PREFIX};

/// Search-hit callback, one invocation per reply entry.
pub type SearchCallback = Arc<dyn Fn(FileHandle) + Send + Sync>;

/// Transfer-progress callback.
pub type GetCallback = Arc<dyn Fn(&FileHandle, GetEvent) + Send + Sync>;

/// Group-join outcome callback.
pub type JoinCallback = Arc<dyn Fn(&str, JoinStatus) + Send + Sync>;

/// Membership gate: `(group, peer common name) -> admit`.
pub type AcceptCallback = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

/// Peer open/close callbacks.
#[derive(Default, Clone)]
pub struct NodeCallbacks {
    pub host_open: Option<Arc<dyn Fn(&HostInfo) + Send + Sync>>,
    pub host_close: Option<Arc<dyn Fn(&HostInfo) + Send + Sync>>,
}

/// Download lifecycle events.
#[derive(Debug, Clone)]
pub enum GetEvent {
    /// Bytes landed (streaming transfers only).
    Progress { transferred: u64 },
    /// Transfer complete. `data` carries the bytes for in-memory
    /// transfers, `None` when saved to a path.
    Done { data: Option<Vec<u8>>, size: u64 },
    /// Transfer failed; the file handle is still usable for a retry.
    Error,
}

/// Group-join outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    /// Key acquired from an existing member.
    Ok,
    /// No member answered; a fresh key was created and published.
    Created,
    /// The key fetch failed.
    Error,
}

/// A search hit: one remote file, addressed by the peer's collection
/// ref.
#[derive(Debug, Clone)]
pub struct FileHandle {
    pub name: String,
    pub size: u64,
    pub ref_id: u32,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub speed: u32,
    pub group: Option<String>,
}

/// A connected peer, as reported to the open/close callbacks.
#[derive(Debug, Clone)]
pub struct HostInfo {
    pub id: u64,
    pub ip: Ipv4Addr,
    pub port: u16,
    pub direction: Direction,
}

struct Host {
    info: HostInfo,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

struct Group {
    key: Option<SessionKey>,
    responses: u32,
    accept: Option<AcceptCallback>,
}

struct Share {
    path: PathBuf,
    extensions: Option<String>,
    group: Option<String>,
}

/// A shared directory, as reported to front ends.
#[derive(Debug, Clone)]
pub struct ShareInfo {
    pub path: PathBuf,
    pub extensions: Option<String>,
    pub group: Option<String>,
}

struct SearchEntry {
    callback: SearchCallback,
    context: u64,
    group: Option<String>,
}

#[derive(Default)]
struct State {
    ports: HashMap<u16, JoinHandle<()>>,
    hosts: HashMap<u64, Host>,
    groups: HashMap<String, Group>,
    shares: Vec<Share>,
    searches: HashMap<[u8; GUID_SIZE], SearchEntry>,
    gets: HashMap<u64, JoinHandle<()>>,
}

/// One overlay node.
pub struct Node {
    store: Arc<Store>,
    auth: Arc<Authenticator>,
    collection: Arc<Collection>,
    tokens: AuthTokens,
    callbacks: NodeCallbacks,
    advertised_ip: Ipv4Addr,
    advertised_port: AtomicU16,
    next_id: AtomicU64,
    state: Mutex<State>,
}

impl Node {
    /// Build a node over `store`. `advertised_ip` is the address
    /// peers are told to fetch from in search replies.
    pub fn new(store: Arc<Store>, advertised_ip: Ipv4Addr, callbacks: NodeCallbacks) -> Arc<Self> {
        let auth = Arc::new(Authenticator::new(store.clone()));
        Arc::new(Self {
            store,
            auth,
            collection: Arc::new(Collection::new()),
            tokens: AuthTokens::new(),
            callbacks,
            advertised_ip,
            advertised_port: AtomicU16::new(PORT_DEFAULT),
            next_id: AtomicU64::new(1),
            state: Mutex::new(State::default()),
        })
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The transfer authenticator.
    pub fn auth(&self) -> &Arc<Authenticator> {
        &self.auth
    }

    /// The shared-file collection.
    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    pub(crate) fn tokens(&self) -> &AuthTokens {
        &self.tokens
    }

    /// The local identity (the store's first identity with a private
    /// key), when one exists.
    pub fn local_identity(&self) -> Option<Identity> {
        self.auth.local_identity().cloned()
    }

    /// The address advertised in search replies.
    pub fn advertised_ip(&self) -> Ipv4Addr {
        self.advertised_ip
    }

    /// The port advertised in search replies (the last bound port).
    pub fn advertised_port(&self) -> u16 {
        self.advertised_port.load(Ordering::Relaxed)
    }

    // ----------------------------------------------------------------
    // Ports
    // ----------------------------------------------------------------

    /// Open a listening port (0 means the default overlay port,
    /// moving up while busy) and start its accept loop. Returns the
    /// bound port.
    pub async fn add_port(self: &Arc<Self>, port: u16) -> Result<u16> {
        let want = if port == 0 { PORT_DEFAULT } else { port };
        let listener = Listener::bind(Mode::Raw, want).await?;
        let bound = listener.port();
        self.advertised_port.store(bound, Ordering::Relaxed);

        let node = self.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept(true).await {
                    Ok(conn) => {
                        let node = node.clone();
                        match conn.mode() {
                            Mode::Http => {
                                tokio::spawn(transfer::serve_upload(node, conn));
                            }
                            Mode::Raw => {
                                tokio::spawn(async move {
                                    if let Err(e) = node.register_inbound(conn).await {
                                        tracing::debug!(error = %e, "inbound peer rejected");
                                    }
                                });
                            }
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "accept failed");
                    }
                }
            }
        });

        self.lock().ports.insert(bound, task);
        tracing::info!(port = bound, "overlay port open");
        Ok(bound)
    }

    /// Close a listening port and kill its accept loop. Peers already
    /// accepted stay up.
    pub fn remove_port(&self, port: u16) -> Result<()> {
        let task = self
            .lock()
            .ports
            .remove(&port)
            .ok_or(OverlayError::Unknown("port"))?;
        task.abort();
        Ok(())
    }

    /// Close every listening port.
    pub fn remove_all_ports(&self) {
        for (_, task) in self.lock().ports.drain() {
            task.abort();
        }
    }

    // ----------------------------------------------------------------
    // Hosts (overlay peers)
    // ----------------------------------------------------------------

    /// Dial a peer and run the Gnutella handshake. A misformed
    /// banner aborts with no retry.
    pub async fn add_host(self: &Arc<Self>, ip: Ipv4Addr, port: u16) -> Result<u64> {
        let mut conn = Connection::connect(Mode::Raw, ip, port, None).await?;
        conn.write_all(wire::CONNECT_REQUEST).await?;

        let mut banner = vec![0u8; wire::CONNECT_RESPONSE.len()];
        let n = conn.read_all(&mut banner).await?;
        if &banner[..n] != wire::CONNECT_RESPONSE {
            return Err(OverlayError::BadHandshake);
        }
        Ok(self.register_host(conn))
    }

    async fn register_inbound(self: &Arc<Self>, mut conn: Connection) -> Result<()> {
        let mut banner = vec![0u8; wire::CONNECT_REQUEST.len()];
        let n = conn.read_all(&mut banner).await?;
        if &banner[..n] != wire::CONNECT_REQUEST {
            return Err(OverlayError::BadHandshake);
        }
        conn.write_all(wire::CONNECT_RESPONSE).await?;
        self.register_host(conn);
        Ok(())
    }

    fn register_host(self: &Arc<Self>, conn: Connection) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let info = HostInfo {
            id,
            ip: conn.peer_ip(),
            port: conn.peer_port(),
            direction: conn.direction(),
        };
        let (mut read, mut write) = conn.into_split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

        let writer = tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                if write.write_all(&bytes).await.is_err() {
                    break;
                }
            }
        });

        let node = self.clone();
        let reply_tx = tx.clone();
        let reader = tokio::spawn(async move {
            loop {
                match wire::read_packet(&mut read).await {
                    Ok(Some(packet)) => node.dispatch(&packet, &reply_tx),
                    Ok(None) => break,
                    Err(e) => {
                        tracing::debug!(host = id, error = %e, "peer stream failed");
                        break;
                    }
                }
            }
            node.drop_host(id);
        });

        let host = Host {
            info: info.clone(),
            tx,
            reader,
            writer,
        };
        self.lock().hosts.insert(id, host);
        tracing::info!(host = id, ip = %info.ip, port = info.port, "peer connected");

        if let Some(open) = &self.callbacks.host_open {
            open(&info);
        }
        id
    }

    /// Disconnect a peer and kill its workers.
    pub fn remove_host(&self, id: u64) -> Result<()> {
        let host = self
            .lock()
            .hosts
            .remove(&id)
            .ok_or(OverlayError::Unknown("host"))?;
        host.reader.abort();
        host.writer.abort();
        if let Some(close) = &self.callbacks.host_close {
            close(&host.info);
        }
        Ok(())
    }

    /// Disconnect every peer.
    pub fn remove_all_hosts(&self) {
        let hosts: Vec<Host> = {
            let mut state = self.lock();
            state.hosts.drain().map(|(_, h)| h).collect()
        };
        for host in hosts {
            host.reader.abort();
            host.writer.abort();
            if let Some(close) = &self.callbacks.host_close {
                close(&host.info);
            }
        }
    }

    /// Snapshot of connected peers.
    pub fn hosts(&self) -> Vec<HostInfo> {
        self.lock().hosts.values().map(|h| h.info.clone()).collect()
    }

    /// Reader-loop exit path: reclaim state and report the close.
    fn drop_host(&self, id: u64) {
        let host = self.lock().hosts.remove(&id);
        if let Some(host) = host {
            host.writer.abort();
            tracing::info!(host = id, "peer disconnected");
            if let Some(close) = &self.callbacks.host_close {
                close(&host.info);
            }
        }
    }

    // ----------------------------------------------------------------
    // Search
    // ----------------------------------------------------------------

    /// Originate a flood search.
    ///
    /// With a `group`, the query is rewritten to
    /// `/secure/<group>/<base64(encrypted query)>` under the group
    /// key, so only members can read it. Replies arrive through
    /// `callback`, possibly several times from several peers;
    /// `context` tags the search for [`Node::search_stop`].
    pub fn search(
        &self,
        query: &str,
        group: Option<&str>,
        context: u64,
        callback: SearchCallback,
    ) -> Result<()> {
        let wire_query = match group {
            Some(name) => {
                let key = self
                    .group_key(name)
                    .ok_or(OverlayError::Unknown("group"))?;
                let sealed = key.encrypt(query.as_bytes())?;
                format!("{SECURE_PREFIX}{name}/{}", base64::encode_compact(&sealed))
            }
            None => query.to_owned(),
        };

        let mut guid = [0u8; GUID_SIZE];
        trella_crypto::random::fill(&mut guid);

        let payload = SearchPayload {
            speed: 0,
            query: wire_query,
        };
        let bytes = Packet::originate(guid, PacketKind::Search, payload.encode()).encode();

        let mut state = self.lock();
        state.searches.insert(
            guid,
            SearchEntry {
                callback,
                context,
                group: group.map(str::to_owned),
            },
        );
        for host in state.hosts.values() {
            let _ = host.tx.send(bytes.clone());
        }
        drop(state);

        tracing::debug!(guid = %hex::encode(guid), query, "search originated");
        Ok(())
    }

    /// Drop pending searches tagged with `context` (0 drops all).
    /// Replies arriving afterwards are discarded silently; no worker
    /// is killed.
    pub fn search_stop(&self, context: u64) {
        self.lock()
            .searches
            .retain(|_, s| context != 0 && s.context != context);
    }

    fn dispatch(self: &Arc<Self>, packet: &Packet, reply: &mpsc::UnboundedSender<Vec<u8>>) {
        match packet.kind {
            PacketKind::Search => self.handle_search_request(packet, reply),
            PacketKind::SearchReply => self.handle_search_reply(packet),
            PacketKind::Ping | PacketKind::Pong | PacketKind::Push => {
                // Accepted, not forwarded: this node only originates
                // and terminates.
            }
            PacketKind::Other(kind) => {
                tracing::trace!(kind, "unknown packet type dropped");
            }
        }
    }

    /// Answer a SEARCH from the local collection.
    fn handle_search_request(&self, packet: &Packet, reply: &mpsc::UnboundedSender<Vec<u8>>) {
        let Ok(search) = SearchPayload::decode(&packet.payload) else {
            return;
        };

        // Resolve the query: group-sealed, key-file, or public.
        let mut group_key: Option<SessionKey> = None;
        let mut wanted_label: Option<String> = None;
        let mut is_key = false;
        let pattern = match parse_secure_query(&search.query) {
            Some((_, "key")) => {
                is_key = true;
                search.query.clone()
            }
            Some((group_name, sealed)) => {
                let Some(key) = self.group_key(group_name) else {
                    return; // unknown group: drop silently
                };
                let cipher = base64::decode_str(sealed);
                let Ok(plain) = key.decrypt(&cipher) else {
                    return; // not sealed under our key: drop silently
                };
                group_key = Some(key);
                wanted_label = Some(group_name.to_owned());
                widen(&String::from_utf8_lossy(&plain))
            }
            None => widen(&search.query),
        };

        let mut entries = Vec::new();
        let mut cursor = None;
        while let Some(entry) = self.collection.find(&pattern, cursor) {
            cursor = Some(entry.id());
            if entry.label() != wanted_label.as_deref() {
                continue;
            }
            entries.push(ReplyEntry {
                ref_id: entry.id(),
                size: entry.size() as u32,
                name: if is_key {
                    "key".to_owned()
                } else {
                    entry.name().to_owned()
                },
            });
        }
        if entries.is_empty() {
            return;
        }

        let mut trailer = [0u8; GUID_SIZE];
        trella_crypto::random::fill(&mut trailer);
        let payload = ReplyPayload {
            port: self.advertised_port(),
            ip: self.advertised_ip,
            speed: 0,
            entries,
            trailer,
        }
        .encode();

        let payload = match &group_key {
            Some(key) => match key.encrypt(&payload) {
                Ok(sealed) => sealed,
                Err(_) => return,
            },
            None => payload,
        };

        let bytes = Packet::originate(packet.guid, PacketKind::SearchReply, payload).encode();
        let _ = reply.send(bytes);
    }

    /// Deliver a SEARCH-REPLY to its originating search.
    fn handle_search_reply(&self, packet: &Packet) {
        let (callback, group) = {
            let state = self.lock();
            let Some(entry) = state.searches.get(&packet.guid) else {
                return; // unknown guid: drop silently
            };
            (entry.callback.clone(), entry.group.clone())
        };

        let payload = match &group {
            Some(name) => {
                let Some(key) = self.group_key(name) else {
                    return;
                };
                let Ok(plain) = key.decrypt(&packet.payload) else {
                    return;
                };
                plain
            }
            None => packet.payload.clone(),
        };

        let Ok(reply) = ReplyPayload::decode(&payload) else {
            return;
        };
        for entry in reply.entries {
            callback(FileHandle {
                name: entry.name,
                size: u64::from(entry.size),
                ref_id: entry.ref_id,
                ip: reply.ip,
                port: reply.port,
                speed: reply.speed,
                group: group.clone(),
            });
        }
    }

    // ----------------------------------------------------------------
    // Groups
    // ----------------------------------------------------------------

    /// Join (or create) the secure group `name`.
    ///
    /// Searches the overlay for the group's key file and waits
    /// `wait` for members to answer. A reply triggers an
    /// authenticated fetch of the RSA-sealed key
    /// ([`JoinStatus::Ok`] / [`JoinStatus::Error`] via `join`); with
    /// no reply, a fresh key is generated and published into the
    /// collection as `/secure/<name>/key` ([`JoinStatus::Created`]).
    /// `accept` becomes the group's membership gate for later key
    /// requests.
    pub async fn join_group(
        self: &Arc<Self>,
        name: &str,
        wait: Duration,
        join: JoinCallback,
        accept: Option<AcceptCallback>,
    ) -> Result<()> {
        let already_keyed = {
            let mut state = self.lock();
            let group = state.groups.entry(name.to_owned()).or_insert(Group {
                key: None,
                responses: 0,
                accept: None,
            });
            group.accept = accept;
            group.responses = 0;
            group.key.is_some()
        };
        if already_keyed {
            join(name, JoinStatus::Ok);
            return Ok(());
        }

        let key_name = format!("{SECURE_PREFIX}{name}/key");
        let fetch_ctx = self.next_id.fetch_add(1, Ordering::Relaxed) | (1 << 63);

        // Any member advertising the key file triggers a sealed
        // fetch; the first fetched key wins.
        let node = self.clone();
        let group_name = name.to_owned();
        let join_from_fetch = join.clone();
        let finder: SearchCallback = Arc::new(move |mut file: FileHandle| {
            if file.name != "key" {
                return;
            }
            {
                let mut state = node.lock();
                let Some(group) = state.groups.get_mut(&group_name) else {
                    return;
                };
                if group.key.is_some() {
                    return;
                }
                group.responses += 1;
            }
            file.group = Some(group_name.clone());

            let fetch_node = node.clone();
            let fetch_group = group_name.clone();
            let join = join_from_fetch.clone();
            let fetcher: GetCallback = Arc::new(move |_file, event| match event {
                GetEvent::Done {
                    data: Some(data), ..
                } => match SessionKey::from_slice(&data) {
                    Ok(key) => {
                        if fetch_node.adopt_group_key(&fetch_group, key) {
                            join(&fetch_group, JoinStatus::Ok);
                        }
                    }
                    Err(_) => join(&fetch_group, JoinStatus::Error),
                },
                GetEvent::Error => join(&fetch_group, JoinStatus::Error),
                _ => {}
            });
            node.get(file, None, fetcher);
        });

        self.search(&key_name, None, fetch_ctx, finder)?;
        tokio::time::sleep(wait).await;

        let outcome = {
            let state = self.lock();
            state
                .groups
                .get(name)
                .map(|g| (g.key.is_some(), g.responses))
        };
        let Some((have_key, responses)) = outcome else {
            return Ok(()); // group left while joining
        };
        if have_key || responses > 0 {
            return Ok(()); // resolution arrives through the fetch path
        }

        self.search_stop(fetch_ctx);
        let key = SessionKey::generate();
        self.collection
            .add_data(&key_name, key.export().to_vec(), None);
        {
            let mut state = self.lock();
            if let Some(group) = state.groups.get_mut(name) {
                group.key = Some(key);
            }
        }
        tracing::info!(group = name, "group created");
        join(name, JoinStatus::Created);
        Ok(())
    }

    /// Leave a group, destroying its key.
    pub fn leave_group(&self, name: &str) -> Result<()> {
        self.lock()
            .groups
            .remove(name)
            .map(|_| ())
            .ok_or(OverlayError::Unknown("group"))
    }

    /// Leave every group.
    pub fn leave_all_groups(&self) {
        self.lock().groups.clear();
    }

    /// The group's session key, once the join resolved.
    pub fn group_key(&self, name: &str) -> Option<SessionKey> {
        self.lock().groups.get(name).and_then(|g| g.key.clone())
    }

    pub(crate) fn group_accept(&self, name: &str) -> Option<AcceptCallback> {
        self.lock().groups.get(name).and_then(|g| g.accept.clone())
    }

    /// Install the fetched key, once. Publishes the key file so this
    /// node answers later key searches too.
    fn adopt_group_key(&self, name: &str, key: SessionKey) -> bool {
        let adopted = {
            let mut state = self.lock();
            match state.groups.get_mut(name) {
                Some(group) if group.key.is_none() => {
                    group.key = Some(key.clone());
                    true
                }
                _ => false,
            }
        };
        if adopted {
            self.collection.add_data(
                &format!("{SECURE_PREFIX}{name}/key"),
                key.export().to_vec(),
                None,
            );
            tracing::info!(group = name, "group key acquired");
        }
        adopted
    }

    // ----------------------------------------------------------------
    // Shares
    // ----------------------------------------------------------------

    /// Share a directory with `group` (`None` = the open network).
    /// Files matching the extension filter are advertised only to
    /// searches in the same group.
    pub fn add_share(&self, path: impl AsRef<Path>, extensions: Option<&str>, group: Option<&str>) {
        self.collection
            .add_source(path.as_ref(), extensions, group);
        self.lock().shares.push(Share {
            path: path.as_ref().to_path_buf(),
            extensions: extensions.map(str::to_owned),
            group: group.map(str::to_owned),
        });
        self.rescan_shares();
    }

    /// Stop sharing a directory.
    pub fn remove_share(&self, path: impl AsRef<Path>) {
        self.collection.remove_source(path.as_ref());
        self.lock().shares.retain(|s| s.path != path.as_ref());
        self.rescan_shares();
    }

    /// Re-tag an existing share with a new filter and group.
    pub fn update_share(
        &self,
        path: impl AsRef<Path>,
        extensions: Option<&str>,
        group: Option<&str>,
    ) {
        let path = path.as_ref();
        self.collection.remove_source(path);
        self.collection.add_source(path, extensions, group);
        {
            let mut state = self.lock();
            if let Some(share) = state.shares.iter_mut().find(|s| s.path == path) {
                share.extensions = extensions.map(str::to_owned);
                share.group = group.map(str::to_owned);
            }
        }
        self.rescan_shares();
    }

    /// Snapshot of the shared directories.
    pub fn shares(&self) -> Vec<ShareInfo> {
        self.lock()
            .shares
            .iter()
            .map(|s| ShareInfo {
                path: s.path.clone(),
                extensions: s.extensions.clone(),
                group: s.group.clone(),
            })
            .collect()
    }

    /// Remove every share.
    pub fn remove_all_shares(&self) {
        let paths: Vec<PathBuf> = self.lock().shares.drain(..).map(|s| s.path).collect();
        for path in paths {
            self.collection.remove_source(&path);
        }
        self.rescan_shares();
    }

    /// Rewalk every shared directory.
    pub fn rescan_shares(&self) {
        self.collection.rescan();
    }

    // ----------------------------------------------------------------
    // Transfers
    // ----------------------------------------------------------------

    /// Fetch a search hit.
    ///
    /// With `save_path`, bytes stream to disk and `callback` sees
    /// [`GetEvent::Progress`] along the way; otherwise the whole
    /// payload is delivered in [`GetEvent::Done`]. Group files
    /// decrypt under the group key; a group's `key` file arrives
    /// RSA-sealed to this node and is unsealed with the local
    /// private key. Returns an id for [`Node::get_stop`] /
    /// [`Node::get_wait`].
    pub fn get(
        self: &Arc<Self>,
        file: FileHandle,
        save_path: Option<PathBuf>,
        callback: GetCallback,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let node = self.clone();
        let task = tokio::spawn(async move {
            transfer::download(&node, &file, save_path, &callback).await;
        });
        let mut state = self.lock();
        state.gets.retain(|_, t| !t.is_finished());
        state.gets.insert(id, task);
        id
    }

    /// Kill an in-flight download.
    pub fn get_stop(&self, id: u64) {
        if let Some(task) = self.lock().gets.remove(&id) {
            task.abort();
        }
    }

    /// Wait for a download to finish (however it finishes).
    pub async fn get_wait(&self, id: u64) {
        let task = self.lock().gets.remove(&id);
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    // ----------------------------------------------------------------
    // Teardown
    // ----------------------------------------------------------------

    /// Kill every worker and drop all shared state, in reverse
    /// dependency order. Idempotent.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        for (_, task) in state.gets.drain() {
            task.abort();
        }
        state.searches.clear();
        for (_, host) in state.hosts.drain() {
            host.reader.abort();
            host.writer.abort();
        }
        for (_, task) in state.ports.drain() {
            task.abort();
        }
        state.groups.clear();
        state.shares.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Split a `/secure/<group>/<rest>` query.
fn parse_secure_query(query: &str) -> Option<(&str, &str)> {
    query.strip_prefix(SECURE_PREFIX)?.split_once('/')
}

/// Queries without wildcards match as substrings; queries with
/// wildcards are taken as-is.
fn widen(query: &str) -> String {
    if query.contains(['*', '?', '\\']) {
        query.to_owned()
    } else {
        format!("*{query}*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_secure_query() {
        assert_eq!(
            parse_secure_query("/secure/G/key"),
            Some(("G", "key"))
        );
        assert_eq!(
            parse_secure_query("/secure/band/QUJD"),
            Some(("band", "QUJD"))
        );
        assert_eq!(parse_secure_query("alpha"), None);
        assert_eq!(parse_secure_query("/secure/nogroup"), None);
    }

    #[test]
    fn test_widen() {
        assert_eq!(widen("alpha"), "*alpha*");
        assert_eq!(widen("alpha*"), "alpha*");
        assert_eq!(widen("a?c"), "a?c");
    }
}
