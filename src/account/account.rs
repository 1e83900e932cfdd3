//-
// Copyright (c) 2026, the Popsync authors
//
// This file is part of Popsync.
//
// Popsync is free software: you can redistribute it and/or modify it under
// the terms of  the GNU General Public  License as published  by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Popsync is distributed in the hope  that it will be useful,  but WITHOUT
// ANY WARRANTY;  without even  the implied  warranty of  MERCHANTABILITY or
// FITNESS FOR  A PARTICULAR PURPOSE.  See the  GNU General  Public License
// for more details.
//
// You should have received a copy of the GNU General Public License along
// with Popsync. If not, see <http://www.gnu.org/licenses/>.

//! The account: owner of everything with a lifetime.
//!
//! One `Account` owns the task queue, the local stores, the connection,
//! and the shared cancellation token. Callers talk to it from any
//! thread; all real work is enqueued and runs on the account's single
//! worker, which is the only thread that ever touches the stores or the
//! wire. Results come back through completion callbacks and the observer
//! registry, never by blocking the caller.

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel;
use log::{info, warn};

use super::config::{AccountConfig, Security};
use super::prompt::{request_password, PromptRequest};
use crate::net::{CancellableStream, ClientIo, TlsContext};
use crate::protocol::ProtocolEngine;
use crate::queue::{TaskFlags, TaskOutcome, TaskQueue};
use crate::store::blob_cache::{BlobCache, DiskBlobCache};
use crate::store::model::{ChangeSet, Counts, MessageFlags, Uid};
use crate::store::seen_log::SeenLog;
use crate::store::summary::Summary;
use crate::support::cancellation::CancellationToken;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;
use crate::sync::classify::HeuristicClassifier;
use crate::sync::engine::{SyncEngine, SyncStats};
use crate::sync::fetch::{ensure_message, Completeness};

/// Credentials handed to the connector once the transport is up.
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// Builds a protocol engine over an established transport.
///
/// The account owns connection establishment (TCP, TLS, credential
/// prompting); what happens on the wire after that is the connector's
/// business.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        io: ClientIo,
        credentials: &Credentials,
        token: &CancellationToken,
    ) -> Result<Box<dyn ProtocolEngine + Send>, Error>;
}

/// Identifies a registered observer for `unregister_observer`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObserverHandle(u64);

type Observer = Box<dyn Fn(&ChangeSet) + Send>;

/// Enqueue-only connection surface.
pub trait Connectable {
    fn connect(&self) -> Result<(), Error>;
    fn disconnect(&self) -> Result<(), Error>;
}

/// Enqueue-only folder surface.
pub trait SyncableFolder {
    /// Reconcile with the server without touching remote state.
    fn refresh(&self) -> Result<(), Error>;
    /// Reconcile, optionally pushing local deletions to the server.
    fn sync(&self, expunge: bool) -> Result<(), Error>;
    fn get_message(
        &self,
        uid: Uid,
        on_done: Box<dyn FnOnce(Result<Vec<u8>, Error>) + Send>,
    ) -> Result<(), Error>;
}

struct FolderState {
    summary: Summary,
    seen_log: SeenLog,
    cache: DiskBlobCache,
    engine: Option<Box<dyn ProtocolEngine + Send>>,
}

/// Caller-facing view of the summary, republished whenever the summary
/// changes. Reads go through this, never through the state lock, so they
/// return immediately even while a pass has the stores borrowed.
#[derive(Default)]
struct Snapshot {
    counts: Counts,
    uids: Vec<Uid>,
}

struct AccountShared {
    config: AccountConfig,
    connector: Box<dyn Connector>,
    prompts: channel::Sender<PromptRequest>,
    tls: TlsContext,
    state: Mutex<FolderState>,
    snapshot: Mutex<Snapshot>,
    observers: Mutex<HashMap<u64, Observer>>,
    log_prefix: LogPrefix,
}

pub struct Account {
    shared: Arc<AccountShared>,
    queue: TaskQueue,
    next_observer_id: AtomicU64,
}

impl Account {
    /// Open (or create) the account's local state under `root` and start
    /// its worker.
    pub fn new(
        name: &str,
        config: AccountConfig,
        root: impl AsRef<Path>,
        connector: Box<dyn Connector>,
        prompts: channel::Sender<PromptRequest>,
    ) -> Result<Self, Error> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;

        let summary = Summary::open(root.join("summary"))?;
        let seen_log = SeenLog::new(root.join("seen"));
        let cache = DiskBlobCache::new(root.join("cache"))?;

        let snapshot = Snapshot {
            counts: summary.counts(),
            uids: summary.uids(),
        };

        let log_prefix = LogPrefix::new("pop3".to_owned());
        log_prefix.set_account(name.to_owned());
        log_prefix.set_host(config.host.clone());

        // Built once; reconnects reuse the same trust store
        let tls = TlsContext::new(config.verify_certificates)?;

        let shared = Arc::new(AccountShared {
            config,
            connector,
            prompts,
            tls,
            state: Mutex::new(FolderState {
                summary,
                seen_log,
                cache,
                engine: None,
            }),
            snapshot: Mutex::new(snapshot),
            observers: Mutex::new(HashMap::new()),
            log_prefix,
        });

        Ok(Account {
            shared,
            queue: TaskQueue::new(format!("popsync-{}", name)),
            next_observer_id: AtomicU64::new(1),
        })
    }

    /// Register a callback for summary change notifications.
    ///
    /// Callbacks run on the worker thread between checkpoint batches.
    /// They may read `counts` and `uids`, which are served from a
    /// snapshot, but must not mutate the account synchronously.
    pub fn register_observer(
        &self,
        observer: impl Fn(&ChangeSet) + Send + 'static,
    ) -> ObserverHandle {
        let id = self.next_observer_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .observers
            .lock()
            .unwrap()
            .insert(id, Box::new(observer));
        ObserverHandle(id)
    }

    pub fn unregister_observer(&self, handle: ObserverHandle) {
        self.shared.observers.lock().unwrap().remove(&handle.0);
    }

    /// Aggregate counts as of the last published snapshot.
    ///
    /// Served without touching the stores, so this never waits on an
    /// in-flight pass; during one it reflects the latest change batch.
    pub fn counts(&self) -> Counts {
        self.shared.snapshot.lock().unwrap().counts
    }

    /// UIDs as of the last published snapshot, in summary order.
    pub fn uids(&self) -> Vec<Uid> {
        self.shared.snapshot.lock().unwrap().uids.clone()
    }

    /// Set a message's flags in the summary and mirror them into the
    /// cache metadata, so they survive even if the record is expunged.
    pub fn set_message_flags(
        &self,
        uid: &Uid,
        flags: MessageFlags,
    ) -> Result<(), Error> {
        let mut state = self.shared.state.lock().unwrap();
        if !state.summary.contains(uid) {
            return Err(Error::NotFound(uid.to_string()));
        }

        state.summary.set_flags(uid, flags);
        state.cache.set_flags(uid, flags)?;

        self.shared.snapshot.lock().unwrap().counts =
            state.summary.counts();
        Ok(())
    }

    /// Enqueue a sync pass.
    pub fn enqueue_sync(
        &self,
        expunge: bool,
        on_done: impl FnOnce(Result<SyncStats, Error>) + Send + 'static,
    ) -> Result<(), Error> {
        let shared = Arc::clone(&self.shared);
        self.queue.launch(
            "sync",
            TaskFlags::SYNC | TaskFlags::CANCELLABLE,
            move |token| run_sync(&shared, expunge, token),
            move |outcome| match outcome {
                TaskOutcome::Done(result) => on_done(result),
                TaskOutcome::Cancelled => on_done(Err(Error::Cancelled)),
            },
        )
    }

    /// Enqueue retrieval of one message body.
    ///
    /// Fetches jump the queue: a user waiting to read one message beats
    /// a background sync pass that is not even running yet.
    pub fn enqueue_fetch(
        &self,
        uid: Uid,
        completeness: Completeness,
        on_done: impl FnOnce(Result<Vec<u8>, Error>) + Send + 'static,
    ) -> Result<(), Error> {
        let shared = Arc::clone(&self.shared);
        self.queue.launch(
            "fetch",
            TaskFlags::FETCH
                | TaskFlags::PRIORITY
                | TaskFlags::CANCELLABLE,
            move |token| run_fetch(&shared, &uid, completeness, token),
            move |outcome| match outcome {
                TaskOutcome::Done(result) => on_done(result),
                TaskOutcome::Cancelled => on_done(Err(Error::Cancelled)),
            },
        )
    }

    /// Cancel queued and running tasks matching `tags`.
    pub fn cancel_matching(&self, tags: TaskFlags) {
        self.queue.cancel_matching(tags);
    }

    /// Stop the worker, draining queued tasks through their cancellation
    /// callbacks.
    pub fn shutdown(&mut self) {
        self.queue.shutdown();
    }
}

impl Connectable for Account {
    fn connect(&self) -> Result<(), Error> {
        let shared = Arc::clone(&self.shared);
        self.queue.launch(
            "connect",
            TaskFlags::CANCELLABLE,
            move |token| {
                let result = ensure_connected(&shared, token);
                if let Err(ref e) = result {
                    warn!("{} connect failed: {}", shared.log_prefix, e);
                }
                result
            },
            |_| (),
        )
    }

    fn disconnect(&self) -> Result<(), Error> {
        let shared = Arc::clone(&self.shared);
        self.queue.launch(
            "disconnect",
            TaskFlags::empty(),
            move |_| {
                // Dropping the engine closes its connection
                shared.state.lock().unwrap().engine = None;
            },
            |_| (),
        )
    }
}

impl SyncableFolder for Account {
    fn refresh(&self) -> Result<(), Error> {
        self.enqueue_sync(false, |_| ())
    }

    fn sync(&self, expunge: bool) -> Result<(), Error> {
        self.enqueue_sync(expunge, |_| ())
    }

    fn get_message(
        &self,
        uid: Uid,
        on_done: Box<dyn FnOnce(Result<Vec<u8>, Error>) + Send>,
    ) -> Result<(), Error> {
        let completeness = self.shared.config.policy().completeness;
        self.enqueue_fetch(uid, completeness, on_done)
    }
}

/// Whether an error leaves the connection unusable.
fn connection_dead(e: &Error) -> bool {
    !matches!(e, Error::Protocol(..) | Error::NotFound(..))
}

fn ensure_connected(
    shared: &AccountShared,
    token: &CancellationToken,
) -> Result<(), Error> {
    if shared.state.lock().unwrap().engine.is_some() {
        return Ok(());
    }

    let config = &shared.config;
    info!(
        "{} connecting to {}:{}",
        shared.log_prefix, config.host, config.port
    );

    let io = establish_io(shared, token)?;
    let credentials = obtain_credentials(shared)?;
    let engine = shared.connector.connect(io, &credentials, token)?;

    shared.state.lock().unwrap().engine = Some(engine);
    Ok(())
}

fn establish_io(
    shared: &AccountShared,
    token: &CancellationToken,
) -> Result<ClientIo, Error> {
    let config = &shared.config;
    let stream = CancellableStream::connect(
        (config.host.as_str(), config.port),
        config.connect_timeout(),
        config.io_timeout(),
    )?;

    match config.security {
        Security::None => Ok(ClientIo::Plain(stream)),
        Security::Tls => {
            let tcp = stream.into_blocking_inner()?;
            Ok(ClientIo::Tls(shared.tls.connect(
                &config.host,
                tcp,
                token,
                config.io_timeout(),
            )?))
        }
    }
}

fn obtain_credentials(
    shared: &AccountShared,
) -> Result<Credentials, Error> {
    let config = &shared.config;
    let password = match config.password {
        Some(ref password) => password.clone(),
        None => request_password(
            &shared.prompts,
            &config.user,
            &config.host,
            false,
        )?,
    };

    Ok(Credentials {
        user: config.user.clone(),
        password,
    })
}

fn run_sync(
    shared: &AccountShared,
    expunge: bool,
    token: &CancellationToken,
) -> Result<SyncStats, Error> {
    ensure_connected(shared, token)?;
    let policy = shared.config.policy();

    let mut guard = shared.state.lock().unwrap();
    let state = &mut *guard;
    let mut engine = match state.engine.take() {
        Some(engine) => engine,
        None => return Err(Error::Protocol("not connected".to_owned())),
    };

    // Publish each batch to the snapshot before the observers hear of
    // it, so a callback reading `counts` sees its own batch applied
    let mut notify = |changes: ChangeSet, counts: Counts| {
        {
            let mut snapshot = shared.snapshot.lock().unwrap();
            snapshot.counts = counts;
            snapshot
                .uids
                .retain(|uid| !changes.removed.contains(uid));
            snapshot.uids.extend(changes.added.iter().cloned());
        }

        for observer in shared.observers.lock().unwrap().values() {
            observer(&changes);
        }
    };

    let result = SyncEngine {
        engine: engine.as_mut(),
        summary: &mut state.summary,
        seen_log: &mut state.seen_log,
        cache: &mut state.cache,
        classifier: &HeuristicClassifier,
        policy: &policy,
        notify: &mut notify,
        log_prefix: &shared.log_prefix,
    }
    .sync(expunge, token);

    match result {
        Err(ref e) if connection_dead(e) => {
            // The connection state is unknowable; start fresh next time
            state.engine = None;
        }
        _ => state.engine = Some(engine),
    }

    // Even a failed pass may have mutated the summary before dying
    *shared.snapshot.lock().unwrap() = Snapshot {
        counts: state.summary.counts(),
        uids: state.summary.uids(),
    };

    result
}

fn run_fetch(
    shared: &AccountShared,
    uid: &Uid,
    completeness: Completeness,
    token: &CancellationToken,
) -> Result<Vec<u8>, Error> {
    ensure_connected(shared, token)?;
    let strict = shared.config.strict_retrieval;

    let mut guard = shared.state.lock().unwrap();
    let state = &mut *guard;
    let mut engine = match state.engine.take() {
        Some(engine) => engine,
        None => return Err(Error::Protocol("not connected".to_owned())),
    };

    let result = (|| {
        let seq = state
            .summary
            .get(uid)
            .map(|r| r.sequence_id)
            .ok_or_else(|| Error::NotFound(uid.to_string()))?;

        ensure_message(
            engine.as_mut(),
            &mut state.cache,
            uid,
            seq,
            completeness,
            strict,
            token,
        )?;

        let mut reader = state
            .cache
            .open(uid)?
            .ok_or(Error::CorruptCacheEntry)?;
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        Ok(body)
    })();

    match result {
        Err(ref e) if connection_dead(e) => state.engine = None,
        _ => state.engine = Some(engine),
    }

    result
}
