use std::net::IpAddr;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::context::Context;
use crate::core::entry::{IpEntry, ListKind, DEFAULT_HOST};
use crate::core::rule::RateRule;
use crate::error::BlockdError;

const GRACE_ALLOW_REASON: &str =
    "Temporarily allow-listed to flush the expired block on enforcement hosts";

/// Perpetual background loop: every wake-up runs the expiry sweep and then
/// the rule evaluation sweep, starting immediately at process start.
///
/// The loop has no terminal state except shutdown, which is only observed
/// between sweeps so an in-flight sweep always finishes.
pub async fn run(ctx: std::sync::Arc<Context>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker =
        tokio::time::interval(Duration::from_secs(ctx.settings.sweep_interval_seconds));

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                info!("scheduler shutting down");
                return;
            }
        }
        expiry_sweep(&ctx).await;
        rule_sweep(&ctx).await;
        metrics::counter!("blockd_sweeps_total", 1);
    }
}

/// Remove every entry whose expiry has passed. An expired block entry gets
/// a short-lived grace-allow entry for the same address, bridging the
/// propagation delay until enforcement elsewhere catches up.
pub async fn expiry_sweep(ctx: &Context) {
    let now = chrono::Utc::now().timestamp();

    for kind in [ListKind::Allow, ListKind::Block] {
        for entry in ctx.registries.snapshot(kind).await {
            if !entry.is_expired(now) {
                continue;
            }
            info!(ip = %entry.ip, kind = %kind, "expiring list entry");
            if let Err(e) = ctx.registries.remove(kind, &entry.ip).await {
                warn!(ip = %entry.ip, error = %e, "could not remove expired entry");
                continue;
            }
            metrics::counter!("blockd_entries_expired_total", 1);

            if kind == ListKind::Block {
                grace_allow(ctx, &entry, now).await;
            }
        }
    }
}

async fn grace_allow(ctx: &Context, expired: &IpEntry, now: i64) {
    let expires = now + ctx.settings.grace_allow_seconds;
    let entry = match IpEntry::new(&expired.ip, GRACE_ALLOW_REASON, DEFAULT_HOST, now, expires) {
        Ok(entry) => entry,
        Err(e) => {
            warn!(ip = %expired.ip, error = %e, "could not build grace-allow entry");
            return;
        }
    };
    match ctx.registries.add(ListKind::Allow, entry, false).await {
        Ok(()) => debug!(ip = %expired.ip, "grace-allow entry added"),
        // Already covered by an allow entry: the address is unblocked
        // either way, nothing to do.
        Err(BlockdError::Conflict { .. }) => {}
        Err(e) => warn!(ip = %expired.ip, error = %e, "could not add grace-allow entry"),
    }
}

/// Evaluate every persisted rule and block the offenders that are not yet
/// covered by either registry. A failure on one rule never prevents the
/// remaining rules from being evaluated in the same pass.
pub async fn rule_sweep(ctx: &Context) {
    let rows = match ctx.store.fetch_rules().await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "could not fetch rules, retrying next pass");
            return;
        }
    };

    for row in rows {
        let rule = match RateRule::from_stored(&row) {
            Ok(rule) => rule,
            Err(e) => {
                warn!(rule = row.id, error = %e, "skipping misconfigured rule");
                continue;
            }
        };

        for offender in ctx.engine.evaluate(&rule).await {
            block_offender(ctx, &rule, &offender.ip, offender.value).await;
        }
    }
}

async fn block_offender(ctx: &Context, rule: &RateRule, ip: &str, value: u64) {
    let addr: IpAddr = match ip.parse() {
        Ok(addr) => addr,
        Err(_) => {
            warn!(ip = %ip, rule = rule.id, "backend returned an unparseable address");
            return;
        }
    };
    // Allow-listed addresses are never auto-blocked; already-blocked
    // addresses need no second entry.
    if ctx.registries.covers(&addr).await {
        return;
    }

    let now = chrono::Utc::now().timestamp();
    let reason = format!("{} ({} >= {})", rule.description, value, rule.limit);
    let entry = match IpEntry::new(
        ip,
        &reason,
        DEFAULT_HOST,
        now,
        now + ctx.settings.default_expire_seconds,
    ) {
        Ok(entry) => entry,
        Err(e) => {
            warn!(ip = %ip, error = %e, "could not build block entry");
            return;
        }
    };

    match ctx.registries.add(ListKind::Block, entry, false).await {
        Ok(()) => {
            info!(ip = %ip, reason = %reason, "found new offender, auto-blocked");
            metrics::counter!("blockd_offenders_blocked_total", 1);
        }
        // Another actor installed a covering entry between the check and
        // the insert; only this one insertion is abandoned.
        Err(BlockdError::Conflict { .. }) => {}
        Err(e) => warn!(ip = %ip, error = %e, "could not block offender"),
    }
}
