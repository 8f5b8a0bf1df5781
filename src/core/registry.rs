use std::net::IpAddr;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::entry::{IpEntry, ListKind, DEFAULT_HOST, EXPIRES_NEVER};
use crate::db::Store;
use crate::error::{BlockdError, BlockdResult};
use crate::notify::Notifier;

/// Ranges seeded into a fresh database. These should always be allowed
/// and never blocked.
const DEFAULT_ALLOW_RANGES: &[&str] = &["127.0.0.1/16", "10.0.0.1/16", "::1/128"];
const DEFAULT_ALLOW_REASON: &str = "Default allowed ranges (local network)";

struct Lists {
    allow: Vec<IpEntry>,
    block: Vec<IpEntry>,
}

impl Lists {
    fn get(&self, kind: ListKind) -> &Vec<IpEntry> {
        match kind {
            ListKind::Allow => &self.allow,
            ListKind::Block => &self.block,
        }
    }

    fn get_mut(&mut self, kind: ListKind) -> &mut Vec<IpEntry> {
        match kind {
            ListKind::Allow => &mut self.allow,
            ListKind::Block => &mut self.block,
        }
    }
}

/// The allow and block registries, persistence-backed and kept consistent
/// as a pair.
///
/// Both lists live behind one mutex: the overlap check inside `add` and the
/// mutation that follows are observed atomically, so two callers can never
/// concurrently install entries that each individually passed the check.
/// Every mutation, whether from the management surface or the background
/// scheduler, funnels through `add`/`remove` here.
pub struct Registries {
    store: Store,
    notifier: Option<Notifier>,
    inner: Mutex<Lists>,
}

impl Registries {
    /// Load both registries from the store. A freshly initialized database
    /// is seeded with the default allow ranges (never expiring).
    pub async fn load(
        store: Store,
        notifier: Option<Notifier>,
        fresh: bool,
    ) -> BlockdResult<Self> {
        let allow = load_list(&store, ListKind::Allow).await?;
        let block = load_list(&store, ListKind::Block).await?;
        let registries = Self {
            store,
            notifier,
            inner: Mutex::new(Lists { allow, block }),
        };

        if fresh {
            for range in DEFAULT_ALLOW_RANGES {
                let entry =
                    IpEntry::new(range, DEFAULT_ALLOW_REASON, DEFAULT_HOST, 0, EXPIRES_NEVER)?;
                registries.add(ListKind::Allow, entry, false).await?;
            }
        }
        Ok(registries)
    }

    /// Add an entry to the given registry.
    ///
    /// The entry is checked for overlap against every entry of *both*
    /// registries. Without `force` the first overlap fails the call with
    /// `Conflict`; with `force` every overlapping entry is removed (and
    /// audited) before the new entry is installed.
    ///
    /// The store write is the authoritative commit: if it fails, the
    /// in-memory list is left untouched.
    pub async fn add(&self, kind: ListKind, entry: IpEntry, force: bool) -> BlockdResult<()> {
        let mut lists = self.inner.lock().await;

        let mut overrides: Vec<(ListKind, IpEntry)> = Vec::new();
        for list_kind in [ListKind::Allow, ListKind::Block] {
            for existing in lists.get(list_kind) {
                if !entry.overlaps(existing) {
                    continue;
                }
                if !force {
                    return Err(BlockdError::Conflict {
                        ip: entry.ip.clone(),
                        kind: list_kind,
                        conflicting: existing.clone(),
                    });
                }
                overrides.push((list_kind, existing.clone()));
            }
        }

        // Forced override cascade: drop every overlapping entry first, each
        // removal written through to the store and audited.
        for (list_kind, existing) in &overrides {
            self.store.delete_entry(*list_kind, &existing.ip).await?;
            lists.get_mut(*list_kind).retain(|e| e.ip != existing.ip);
            self.audit(
                &existing.ip,
                &format!(
                    "IP {} removed from the {} list: overridden by {}",
                    existing.ip, list_kind, entry.ip
                ),
            )
            .await;
            info!(ip = %existing.ip, kind = %list_kind, overridden_by = %entry.ip,
                  "conflicting entry removed by forced add");
        }

        self.store.insert_entry(kind, &entry).await?;
        self.audit(
            &entry.ip,
            &format!(
                "IP {} added to the {} list: {}",
                entry.ip, kind, entry.reason
            ),
        )
        .await;
        if let Some(notifier) = &self.notifier {
            notifier.publish(kind, &entry);
        }
        metrics::counter!("blockd_entries_added_total", 1);
        lists.get_mut(kind).push(entry);
        Ok(())
    }

    /// Convenience for the management surface: parse, stamp and add.
    pub async fn add_ip(
        &self,
        kind: ListKind,
        ip: &str,
        reason: &str,
        host: Option<&str>,
        expires: i64,
        force: bool,
    ) -> BlockdResult<()> {
        let now = chrono::Utc::now().timestamp();
        let entry = IpEntry::new(ip, reason, host.unwrap_or(DEFAULT_HOST), now, expires)?;
        self.add(kind, entry, force).await
    }

    /// Remove the entry whose literal address text matches `ip`.
    /// Idempotent: removing an absent address is a no-op.
    pub async fn remove(&self, kind: ListKind, ip: &str) -> BlockdResult<()> {
        let mut lists = self.inner.lock().await;
        let list = lists.get_mut(kind);
        let Some(position) = list.iter().position(|e| e.ip == ip) else {
            return Ok(());
        };

        self.store.delete_entry(kind, ip).await?;
        let entry = list.remove(position);
        self.audit(
            &entry.ip,
            &format!("IP {} removed from the {} list.", entry.ip, kind),
        )
        .await;
        metrics::counter!("blockd_entries_removed_total", 1);
        Ok(())
    }

    /// Snapshot of one registry for iteration. Restartable and safe to use
    /// concurrently with mutations, which never observe it.
    pub async fn snapshot(&self, kind: ListKind) -> Vec<IpEntry> {
        self.inner.lock().await.get(kind).clone()
    }

    /// Whether any entry of either registry covers the address.
    pub async fn covers(&self, addr: &IpAddr) -> bool {
        let lists = self.inner.lock().await;
        lists.allow.iter().chain(lists.block.iter()).any(|e| e.contains_addr(addr))
    }

    // Audit failures are logged rather than propagated: by the time we
    // audit, the list mutation itself has already been committed.
    async fn audit(&self, ip: &str, event: &str) {
        if let Err(e) = self.store.append_audit(ip, event).await {
            warn!(ip = %ip, error = %e, "could not append audit record");
        }
    }
}

async fn load_list(store: &Store, kind: ListKind) -> BlockdResult<Vec<IpEntry>> {
    let mut entries = Vec::new();
    for row in store.fetch_entries(kind).await? {
        match IpEntry::new(&row.ip, &row.reason, &row.host, row.timestamp, row.expires) {
            Ok(entry) => entries.push(entry),
            // A row that no longer parses cannot conflict-check; skip it
            // rather than refuse to start.
            Err(e) => warn!(ip = %row.ip, kind = %kind, error = %e,
                            "skipping unparseable persisted entry"),
        }
    }
    Ok(entries)
}
