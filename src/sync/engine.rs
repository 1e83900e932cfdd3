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

//! One sync pass: Listing, Reconciling, Fetching, Checkpointing.
//!
//! The pass is restartable by construction. Summary mutations are
//! checkpointed at bounded intervals, seen-log registrations are durable
//! the moment they happen, and cache entries commit individually, so an
//! abort at any point (error, cancellation, power loss) leaves state a
//! later pass picks up from; no step is ever un-done.
//!
//! A `Protocol` error fails only the message that provoked it; the pass
//! gives up when such failures recur back to back. Everything else ends
//! the pass immediately.

use std::collections::HashSet;

use log::{debug, info, warn};

use super::classify::AttachmentClassifier;
use super::fetch::Completeness;
use super::uid::synthesize_uid;
use crate::protocol::{Capa, CollectSink, FetchKind, ProtocolEngine};
use crate::store::blob_cache::BlobCache;
use crate::store::model::{
    ChangeSet, Counts, MessageFlags, MessageRecord, SeqId, Uid,
};
use crate::store::seen_log::SeenLog;
use crate::store::summary::Summary;
use crate::support::cancellation::CancellationToken;
use crate::support::error::Error;
use crate::support::log_prefix::LogPrefix;

/// New/removed messages accumulated before observers are told.
const NOTIFY_BATCH: usize = 20;
/// Header fetches between summary checkpoints.
const CHECKPOINT_INTERVAL: usize = 1000;
/// Back-to-back per-message protocol failures before the pass gives up.
const MAX_CONSECUTIVE_FAILURES: u32 = 2;
/// How much of a cached entry to read when looking for its date.
const DATE_PROBE_BYTES: u64 = 8192;

/// Retrieval and retention policy for one account's folder.
#[derive(Clone, Debug)]
pub struct SyncPolicy {
    /// How much of a message body `get_message` materializes.
    pub completeness: Completeness,
    /// Whether a cached entry of the wrong completeness is re-fetched.
    pub strict_retrieval: bool,
    /// Delete messages older than this many days from the server.
    pub delete_after_days: Option<u32>,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        SyncPolicy {
            completeness: Completeness::Full,
            strict_retrieval: false,
            delete_after_days: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// Messages in the remote listing.
    pub listed: usize,
    /// New messages whose records were synthesized this pass.
    pub added: usize,
    /// Records dropped because the message is gone remotely and locally.
    pub removed: usize,
    /// Messages deleted remotely because they carried `\Deleted`.
    pub expunged: usize,
    /// Messages deleted remotely by the retention sweep.
    pub deleted_old: usize,
}

struct RemoteEntry {
    seq: SeqId,
    uid: Uid,
    size: u32,
    /// Header probe already performed (UID synthesis path).
    headers: Option<Vec<Vec<u8>>>,
}

/// Drives one account's folder through a sync pass.
///
/// Borrows all its collaborators; the account owns them and lends them
/// to the worker for the duration of the pass.
pub struct SyncEngine<'a> {
    pub engine: &'a mut dyn ProtocolEngine,
    pub summary: &'a mut Summary,
    pub seen_log: &'a mut SeenLog,
    pub cache: &'a mut dyn BlobCache,
    pub classifier: &'a dyn AttachmentClassifier,
    pub policy: &'a SyncPolicy,
    /// Called with each change batch and the counts as of that batch, so
    /// the owner can publish a consistent view without touching the
    /// summary mid-pass.
    pub notify: &'a mut dyn FnMut(ChangeSet, Counts),
    pub log_prefix: &'a LogPrefix,
}

impl<'a> SyncEngine<'a> {
    /// Run one pass. With `expunge`, locally-deleted messages are removed
    /// from the server before the final checkpoint.
    pub fn sync(
        &mut self,
        expunge: bool,
        token: &CancellationToken,
    ) -> Result<SyncStats, Error> {
        self.seen_log.open()?;
        let result = self.run(expunge, token);
        self.seen_log.close();

        match &result {
            Ok(stats) => info!(
                "{} sync pass done: {} listed, {} added, {} removed, \
                 {} expunged, {} aged out",
                self.log_prefix,
                stats.listed,
                stats.added,
                stats.removed,
                stats.expunged,
                stats.deleted_old
            ),
            Err(Error::Cancelled) => {
                info!("{} sync pass cancelled", self.log_prefix)
            }
            Err(e) => warn!("{} sync pass failed: {}", self.log_prefix, e),
        }

        result
    }

    fn run(
        &mut self,
        expunge: bool,
        token: &CancellationToken,
    ) -> Result<SyncStats, Error> {
        let mut stats = SyncStats::default();
        let mut changes = ChangeSet::default();

        debug!("{} listing", self.log_prefix);
        let remote = self.listing(token)?;
        stats.listed = remote.len();

        debug!(
            "{} reconciling {} remote against {} local",
            self.log_prefix,
            remote.len(),
            self.summary.len()
        );
        let remote_uids: HashSet<Uid> =
            remote.iter().map(|e| e.uid.clone()).collect();
        let to_fetch =
            self.reconcile(remote, &remote_uids, &mut changes, &mut stats)?;

        debug!(
            "{} fetching {} new messages",
            self.log_prefix,
            to_fetch.len()
        );
        self.fetch_new(to_fetch, &mut changes, &mut stats, token)?;

        if expunge {
            self.expunge(&remote_uids, &mut changes, &mut stats, token)?;
        }
        if let Some(days) = self.policy.delete_after_days {
            self.delete_old(
                days,
                &remote_uids,
                &mut changes,
                &mut stats,
                token,
            )?;
        }

        // Checkpointing. A cancel arriving from here on is honoured next
        // pass; tearing down mid-checkpoint buys nothing.
        if !changes.is_empty() {
            (self.notify)(changes.take(), self.summary.counts());
        }
        self.summary.save()?;

        Ok(stats)
    }

    /// Build the remote view: sequence id, UID, and size per message.
    fn listing(
        &mut self,
        token: &CancellationToken,
    ) -> Result<Vec<RemoteEntry>, Error> {
        let entries = self.engine.list(token)?;

        if self.engine.capabilities().contains(Capa::UIDL) {
            let uids = self.engine.uid_list(token)?;
            if uids.len() != entries.len() {
                return Err(Error::Protocol(format!(
                    "listing sizes disagree: {} vs {}",
                    entries.len(),
                    uids.len()
                )));
            }

            return entries
                .iter()
                .zip(uids)
                .map(|(entry, (useq, uid))| {
                    if entry.sequence_id != useq {
                        return Err(Error::Protocol(
                            "listing order disagrees".to_owned(),
                        ));
                    }
                    Ok(RemoteEntry {
                        seq: entry.sequence_id,
                        uid: Uid(uid),
                        size: entry.size,
                        headers: None,
                    })
                })
                .collect();
        }

        // No UIDL; identity comes from hashing each header block
        debug!("{} no UIDL capability, synthesizing UIDs", self.log_prefix);
        let mut remote = Vec::with_capacity(entries.len());
        for entry in entries {
            let headers = self.probe_headers(entry.sequence_id, token)?;
            let uid = synthesize_uid(&headers)?;
            remote.push(RemoteEntry {
                seq: entry.sequence_id,
                uid,
                size: entry.size,
                headers: Some(headers),
            });
        }

        Ok(remote)
    }

    /// Header block for `seq`: a TOP when the server offers it, the
    /// header part of a full retrieval otherwise.
    fn probe_headers(
        &mut self,
        seq: SeqId,
        token: &CancellationToken,
    ) -> Result<Vec<Vec<u8>>, Error> {
        let kind = if self.engine.capabilities().contains(Capa::TOP) {
            FetchKind::Headers
        } else {
            FetchKind::Full
        };

        let mut sink = CollectSink::default();
        self.engine.fetch(seq, kind, &mut sink, token)?;

        let mut lines = sink.lines;
        if let Some(separator) = lines.iter().position(|l| l.is_empty()) {
            lines.truncate(separator);
        }

        Ok(lines)
    }

    /// Sort the remote listing against local state, drop records for
    /// messages gone from both sides, and return the entries that need
    /// fetching.
    fn reconcile(
        &mut self,
        remote: Vec<RemoteEntry>,
        remote_uids: &HashSet<Uid>,
        changes: &mut ChangeSet,
        stats: &mut SyncStats,
    ) -> Result<Vec<RemoteEntry>, Error> {
        let mut to_fetch = Vec::new();

        for entry in remote {
            if self.summary.contains(&entry.uid) {
                self.summary.update_size(&entry.uid, entry.size);
                self.summary.update_sequence_id(&entry.uid, entry.seq);
            } else if self.seen_log.contains(&entry.uid)? {
                // Materialized once already; the record was removed on
                // purpose and must not resurrect
                debug!(
                    "{} skipping previously seen {}",
                    self.log_prefix, entry.uid
                );
            } else {
                to_fetch.push(entry);
            }
        }

        for uid in self.summary.uids() {
            if !remote_uids.contains(&uid) && !self.cache.exists(&uid) {
                // Gone from the server with no local copy: the message
                // no longer exists anywhere we can see
                self.summary.remove(&uid);
                changes.removed.push(uid);
                stats.removed += 1;
            }
        }

        Ok(to_fetch)
    }

    /// Synthesize records for newly discovered messages.
    fn fetch_new(
        &mut self,
        to_fetch: Vec<RemoteEntry>,
        changes: &mut ChangeSet,
        stats: &mut SyncStats,
        token: &CancellationToken,
    ) -> Result<(), Error> {
        let mut consecutive_failures = 0u32;
        let mut since_checkpoint = 0usize;

        for entry in to_fetch {
            if token.interrupted() {
                return Err(Error::Cancelled);
            }

            let headers = match entry.headers {
                Some(headers) => headers,
                None => match self.probe_headers(entry.seq, token) {
                    Ok(headers) => headers,
                    Err(e) if !e.is_pass_fatal() => {
                        warn!(
                            "{} failed to probe seq {}: {}",
                            self.log_prefix, entry.seq.0, e
                        );
                        consecutive_failures += 1;
                        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES
                        {
                            return Err(e);
                        }
                        continue;
                    }
                    Err(e) => return Err(e),
                },
            };
            consecutive_failures = 0;

            let has_attachments =
                self.classifier.has_attachments(&headers, entry.size);
            let mut flags = MessageFlags::empty();
            flags.set(MessageFlags::ATTACHMENTS, has_attachments);

            self.summary.add(MessageRecord {
                uid: entry.uid.clone(),
                sequence_id: entry.seq,
                size: entry.size,
                flags,
                has_attachments,
            })?;
            self.seen_log.register(&entry.uid)?;
            changes.added.push(entry.uid);
            stats.added += 1;

            if changes.len() >= NOTIFY_BATCH {
                (self.notify)(changes.take(), self.summary.counts());
            }

            since_checkpoint += 1;
            if since_checkpoint >= CHECKPOINT_INTERVAL {
                self.summary.save()?;
                since_checkpoint = 0;
            }
        }

        Ok(())
    }

    /// Remove locally-deleted messages from the server.
    fn expunge(
        &mut self,
        remote_uids: &HashSet<Uid>,
        changes: &mut ChangeSet,
        stats: &mut SyncStats,
        token: &CancellationToken,
    ) -> Result<(), Error> {
        let doomed: Vec<(Uid, SeqId)> = self
            .summary
            .records()
            .filter(|r| r.flags.contains(MessageFlags::DELETED))
            .map(|r| (r.uid.clone(), r.sequence_id))
            .collect();

        for (uid, seq) in doomed {
            if token.interrupted() {
                return Err(Error::Cancelled);
            }

            // Only messages the current connection actually lists can be
            // addressed by sequence id
            if remote_uids.contains(&uid) {
                self.engine.delete(seq, token)?;
            }

            self.cache.remove(&uid)?;
            self.summary.remove(&uid);
            changes.removed.push(uid);
            stats.expunged += 1;
        }

        Ok(())
    }

    /// Retention sweep: delete messages older than `days` from the
    /// server and drop their local state.
    ///
    /// A message's age comes from the `Date` header of its cached entry;
    /// messages with no cached entry or no parseable date are left alone
    /// rather than guessed at.
    fn delete_old(
        &mut self,
        days: u32,
        remote_uids: &HashSet<Uid>,
        changes: &mut ChangeSet,
        stats: &mut SyncStats,
        token: &CancellationToken,
    ) -> Result<(), Error> {
        let cutoff =
            chrono::Utc::now() - chrono::Duration::days(i64::from(days));

        let candidates: Vec<(Uid, SeqId)> = self
            .summary
            .records()
            .map(|r| (r.uid.clone(), r.sequence_id))
            .collect();

        for (uid, seq) in candidates {
            if token.interrupted() {
                return Err(Error::Cancelled);
            }
            if !remote_uids.contains(&uid) {
                continue;
            }

            let date = match self.cached_date(&uid)? {
                Some(date) => date,
                None => continue,
            };
            if date >= cutoff {
                continue;
            }

            debug!("{} deleting {} (dated {})", self.log_prefix, uid, date);
            self.engine.delete(seq, token)?;
            self.cache.remove(&uid)?;
            self.summary.remove(&uid);
            changes.removed.push(uid);
            stats.deleted_old += 1;
        }

        Ok(())
    }

    /// The `Date` header of a cached entry, if the entry exists and the
    /// date parses.
    fn cached_date(
        &mut self,
        uid: &Uid,
    ) -> Result<Option<chrono::DateTime<chrono::Utc>>, Error> {
        use std::io::Read;

        let reader = match self.cache.open(uid)? {
            Some(reader) => reader,
            None => return Ok(None),
        };

        let mut head = Vec::new();
        reader.take(DATE_PROBE_BYTES).read_to_end(&mut head)?;

        for line in head.split(|&b| b == b'\n') {
            let line = match line.last() {
                Some(b'\r') => &line[..line.len() - 1],
                _ => line,
            };
            if line.is_empty() {
                break;
            }
            if line.len() > 5 && line[..5].eq_ignore_ascii_case(b"date:") {
                let value = String::from_utf8_lossy(&line[5..]);
                return Ok(chrono::DateTime::parse_from_rfc2822(
                    value.trim(),
                )
                .ok()
                .map(|d| d.with_timezone(&chrono::Utc)));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;
    use crate::protocol::script::{ScriptedEngine, ScriptedMessage};
    use crate::store::blob_cache::{CacheWriter, DiskBlobCache};

    struct Fixture {
        dir: TempDir,
        summary: Summary,
        seen_log: SeenLog,
        cache: DiskBlobCache,
        policy: SyncPolicy,
        notifications: Vec<ChangeSet>,
        log_prefix: LogPrefix,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let summary = Summary::open(dir.path().join("summary")).unwrap();
            let seen_log = SeenLog::new(dir.path().join("seen"));
            let cache = DiskBlobCache::new(dir.path().join("cache")).unwrap();

            Fixture {
                dir,
                summary,
                seen_log,
                cache,
                policy: SyncPolicy::default(),
                notifications: Vec::new(),
                log_prefix: LogPrefix::new("test".to_owned()),
            }
        }

        fn sync(
            &mut self,
            engine: &mut ScriptedEngine,
            expunge: bool,
        ) -> Result<SyncStats, Error> {
            let token = CancellationToken::new();
            self.sync_with_token(engine, expunge, &token)
        }

        fn sync_with_token(
            &mut self,
            engine: &mut ScriptedEngine,
            expunge: bool,
            token: &CancellationToken,
        ) -> Result<SyncStats, Error> {
            let notifications = &mut self.notifications;
            let mut notify = |changes: ChangeSet, _: Counts| {
                notifications.push(changes);
            };

            SyncEngine {
                engine,
                summary: &mut self.summary,
                seen_log: &mut self.seen_log,
                cache: &mut self.cache,
                classifier: &crate::sync::classify::HeuristicClassifier,
                policy: &self.policy,
                notify: &mut notify,
                log_prefix: &self.log_prefix,
            }
            .sync(expunge, token)
        }

        fn cache_body(&mut self, uid: &str, body: &str) {
            let mut w =
                self.cache.begin_write(&Uid::from(uid)).unwrap();
            w.write_all(body.as_bytes()).unwrap();
            w.commit().unwrap();
        }

        fn summary_bytes(&self) -> Vec<u8> {
            fs::read(self.dir.path().join("summary")).unwrap()
        }
    }

    fn message(uid: &str, size: u32) -> ScriptedMessage {
        ScriptedMessage::new(
            uid,
            size,
            &format!("Subject: message {}\nFrom: a@b\n\nbody", uid),
        )
    }

    #[test]
    fn first_pass_populates_summary() {
        let mut fx = Fixture::new();
        let mut engine = ScriptedEngine::new(vec![
            message("a", 100),
            message("b", 200),
        ]);

        let stats = fx.sync(&mut engine, false).unwrap();
        assert_eq!(2, stats.listed);
        assert_eq!(2, stats.added);
        assert_eq!(0, stats.removed);

        assert_eq!(2, fx.summary.len());
        assert_eq!(100, fx.summary.get(&Uid::from("a")).unwrap().size);

        // Headers only; bodies are fetched on demand
        assert!(engine
            .fetches
            .iter()
            .all(|&(_, kind)| FetchKind::Headers == kind));

        // Both are now in the seen log
        fx.seen_log.open().unwrap();
        assert!(fx.seen_log.contains(&Uid::from("a")).unwrap());
        assert!(fx.seen_log.contains(&Uid::from("b")).unwrap());
    }

    #[test]
    fn uncached_absent_message_is_removed() {
        // Local {A, B}, remote {B, C}, A not cached: end with {B, C},
        // A's removal notified
        let mut fx = Fixture::new();
        let mut engine = ScriptedEngine::new(vec![
            message("a", 100),
            message("b", 200),
        ]);
        fx.sync(&mut engine, false).unwrap();

        let mut engine = ScriptedEngine::new(vec![
            message("b", 200),
            message("c", 300),
        ]);
        let stats = fx.sync(&mut engine, false).unwrap();
        assert_eq!(1, stats.added);
        assert_eq!(1, stats.removed);

        assert!(!fx.summary.contains(&Uid::from("a")));
        assert!(fx.summary.contains(&Uid::from("b")));
        assert!(fx.summary.contains(&Uid::from("c")));

        let removed: Vec<&Uid> = fx
            .notifications
            .iter()
            .flat_map(|c| c.removed.iter())
            .collect();
        assert_eq!(vec![&Uid::from("a")], removed);
    }

    #[test]
    fn cached_absent_message_is_retained() {
        let mut fx = Fixture::new();
        let mut engine = ScriptedEngine::new(vec![message("a", 100)]);
        fx.sync(&mut engine, false).unwrap();
        fx.cache_body("a", "Subject: message a\r\n\r\nbody");

        let mut engine = ScriptedEngine::new(vec![]);
        let stats = fx.sync(&mut engine, false).unwrap();
        assert_eq!(0, stats.removed);
        assert!(fx.summary.contains(&Uid::from("a")));
    }

    #[test]
    fn seen_log_prevents_resurrection() {
        let mut fx = Fixture::new();
        let mut engine = ScriptedEngine::new(vec![message("a", 100)]);
        fx.sync(&mut engine, false).unwrap();

        // The message goes away and comes back (or its record was
        // dropped while it stayed on the server)
        let mut engine = ScriptedEngine::new(vec![]);
        fx.sync(&mut engine, false).unwrap();
        assert!(!fx.summary.contains(&Uid::from("a")));

        let mut engine = ScriptedEngine::new(vec![message("a", 100)]);
        let stats = fx.sync(&mut engine, false).unwrap();
        assert_eq!(0, stats.added);
        assert!(!fx.summary.contains(&Uid::from("a")));
    }

    #[test]
    fn second_pass_is_idempotent() {
        let mut fx = Fixture::new();
        let mut engine = ScriptedEngine::new(vec![
            message("a", 100),
            message("b", 200),
        ]);
        fx.sync(&mut engine, false).unwrap();
        let checkpoint = fx.summary_bytes();
        let fetches_after_first = engine.fetches.len();

        let stats = fx.sync(&mut engine, false).unwrap();
        assert_eq!(0, stats.added);
        assert_eq!(0, stats.removed);
        // No new per-message work at all
        assert_eq!(fetches_after_first, engine.fetches.len());
        // And the checkpoint was not rewritten
        assert_eq!(checkpoint, fx.summary_bytes());
    }

    #[test]
    fn size_change_dirties_and_updates() {
        let mut fx = Fixture::new();
        let mut engine = ScriptedEngine::new(vec![message("a", 100)]);
        fx.sync(&mut engine, false).unwrap();

        let mut engine = ScriptedEngine::new(vec![message("a", 999)]);
        fx.sync(&mut engine, false).unwrap();
        assert_eq!(999, fx.summary.get(&Uid::from("a")).unwrap().size);

        let reloaded =
            Summary::open(fx.dir.path().join("summary")).unwrap();
        assert_eq!(999, reloaded.get(&Uid::from("a")).unwrap().size);
    }

    #[test]
    fn notifications_are_batched() {
        let mut fx = Fixture::new();
        let messages: Vec<ScriptedMessage> = (0..45)
            .map(|i| message(&format!("u{:02}", i), 100))
            .collect();
        let mut engine = ScriptedEngine::new(messages);

        fx.sync(&mut engine, false).unwrap();

        let sizes: Vec<usize> =
            fx.notifications.iter().map(ChangeSet::len).collect();
        assert_eq!(vec![20, 20, 5], sizes);
    }

    #[test]
    fn synthesized_uids_without_uidl() {
        let mut fx = Fixture::new();
        let mut engine = ScriptedEngine::new(vec![
            message("ignored-uid-1", 100),
            message("ignored-uid-2", 200),
        ]);
        engine.capa = Capa::TOP;

        let stats = fx.sync(&mut engine, false).unwrap();
        assert_eq!(2, stats.added);

        // The records are keyed by header hash, not the scripted UIDs
        assert!(!fx.summary.contains(&Uid::from("ignored-uid-1")));
        for uid in fx.summary.uids() {
            assert_eq!(24, uid.as_str().len());
        }

        // Stable across passes
        let fetches = engine.fetches.len();
        let stats = fx.sync(&mut engine, false).unwrap();
        assert_eq!(0, stats.added);
        assert_eq!(0, stats.removed);
        // The probe for UID synthesis recurs, but nothing new is fetched
        assert_eq!(fetches + 2, engine.fetches.len());
    }

    #[test]
    fn single_protocol_failure_skips_the_message() {
        let mut fx = Fixture::new();
        let mut engine = ScriptedEngine::new(vec![
            message("a", 100),
            message("b", 200),
        ]);
        // LIST and UIDL succeed; the first header probe fails
        engine.fail_next_fetches = 1;

        let stats = fx.sync(&mut engine, false).unwrap();
        assert_eq!(1, stats.added);
        assert_eq!(1, fx.summary.len());
    }

    #[test]
    fn recurring_protocol_failures_abort_the_pass() {
        let mut fx = Fixture::new();
        let mut engine = ScriptedEngine::new(vec![
            message("a", 100),
            message("b", 200),
            message("c", 300),
        ]);
        engine.fail_next_fetches = 2;

        assert_matches!(
            Err(Error::Protocol(..)),
            fx.sync(&mut engine, false)
        );
        // The seen log was still closed on the way out
        assert!(!fx.seen_log.is_open());
    }

    #[test]
    fn cancellation_aborts_without_losing_checkpoint() {
        let mut fx = Fixture::new();
        let mut engine = ScriptedEngine::new(vec![message("a", 100)]);
        fx.sync(&mut engine, false).unwrap();
        let checkpoint = fx.summary_bytes();

        let mut engine = ScriptedEngine::new(vec![
            message("a", 100),
            message("b", 200),
        ]);
        let token = CancellationToken::new();
        token.cancel();
        assert_matches!(
            Err(Error::Cancelled),
            fx.sync_with_token(&mut engine, false, &token)
        );

        // On-disk state is exactly the last checkpoint
        assert_eq!(checkpoint, fx.summary_bytes());
    }

    #[test]
    fn expunge_deletes_flagged_messages() {
        let mut fx = Fixture::new();
        let mut engine = ScriptedEngine::new(vec![
            message("a", 100),
            message("b", 200),
        ]);
        fx.sync(&mut engine, false).unwrap();

        fx.cache_body("a", "Subject: message a\r\n\r\nbody");
        fx.summary
            .set_flags(&Uid::from("a"), MessageFlags::DELETED);

        let stats = fx.sync(&mut engine, true).unwrap();
        assert_eq!(1, stats.expunged);

        assert_eq!(vec![SeqId(1)], engine.deleted);
        assert!(!fx.summary.contains(&Uid::from("a")));
        assert!(!fx.cache.exists(&Uid::from("a")));
        assert!(fx.summary.contains(&Uid::from("b")));
    }

    #[test]
    fn retention_sweep_deletes_old_messages() {
        let mut fx = Fixture::new();
        fx.policy.delete_after_days = Some(30);

        let mut engine = ScriptedEngine::new(vec![
            message("old", 100),
            message("new", 200),
            message("undated", 300),
        ]);
        fx.sync(&mut engine, false).unwrap();

        fx.cache_body(
            "old",
            "Date: Mon, 2 Jan 2006 15:04:05 +0000\r\n\r\nancient",
        );
        let recent = chrono::Utc::now().to_rfc2822();
        fx.cache_body("new", &format!("Date: {}\r\n\r\nfresh", recent));
        fx.cache_body("undated", "Subject: no date here\r\n\r\nbody");

        let stats = fx.sync(&mut engine, false).unwrap();
        assert_eq!(1, stats.deleted_old);

        assert_eq!(vec![SeqId(1)], engine.deleted);
        assert!(!fx.summary.contains(&Uid::from("old")));
        assert!(fx.summary.contains(&Uid::from("new")));
        assert!(fx.summary.contains(&Uid::from("undated")));
    }

    #[test]
    fn attachment_classification_feeds_the_record() {
        let mut fx = Fixture::new();
        let mut engine = ScriptedEngine::new(vec![
            ScriptedMessage::new(
                "plain",
                100,
                "Subject: plain\n\nbody",
            ),
            ScriptedMessage::new(
                "attached",
                100,
                "Subject: files\nContent-Disposition: attachment; \
                 filename=a.pdf\n\nbody",
            ),
        ]);

        fx.sync(&mut engine, false).unwrap();

        assert!(
            !fx.summary.get(&Uid::from("plain")).unwrap().has_attachments
        );
        let attached = fx.summary.get(&Uid::from("attached")).unwrap();
        assert!(attached.has_attachments);
        assert!(attached.flags.contains(MessageFlags::ATTACHMENTS));
    }
}
