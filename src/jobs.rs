use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::{
    audit::{self, report, Window},
    state::AppState,
    tokens,
};

/// Background maintenance loop: token GC plus audit-log retention, on a
/// fixed interval from config.
pub fn spawn(state: AppState) {
    let interval = std::time::Duration::from_secs(state.config.sweep_interval_secs);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_maintenance(&state).await;
        }
    });
}

/// One sweep pass. Each step is independent; a failure in one is logged
/// and does not stop the others.
pub async fn run_maintenance(state: &AppState) {
    match tokens::repo::sweep_expired(&state.db).await {
        Ok(n) if n > 0 => info!(deleted = n, "expired tokens swept"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "expired-token sweep failed"),
    }

    match tokens::repo::sweep_revoked(&state.db).await {
        Ok(n) if n > 0 => info!(deleted = n, "revoked tokens swept"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "revoked-token sweep failed"),
    }

    match audit::repo::prune_older_than(&state.db, state.config.log_retention_days).await {
        Ok(n) if n > 0 => info!(deleted = n, "old login logs pruned"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "login-log prune failed"),
    }

    report_suspicious_activity(state).await;
    log_summary(state).await;
}

/// Batch abuse report over the trailing day of failures. Detection only;
/// nothing is blocked here.
async fn report_suspicious_activity(state: &AppState) {
    let failed = match audit::repo::failed_since(&state.db, Window::hours(24)).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!(error = %e, "failed-login fetch failed");
            return;
        }
    };
    let report =
        report::suspicious_activity(&failed, state.config.suspicious_failed_threshold as i64);
    for group in &report.ips {
        warn!(
            ip = %group.key,
            failed = group.failed_attempts,
            last_attempt = %group.last_attempt,
            "suspicious failed-login activity from ip"
        );
        // Pull the most recent attempts for the flagged address so the
        // sweep log carries enough to investigate without a DB session.
        match audit::repo::by_ip(&state.db, &group.key, 1, 10).await {
            Ok(page) => {
                for log in &page.items {
                    info!(
                        ip = %group.key,
                        user_id = ?log.user_id,
                        login_at = %log.login_at,
                        error = log.error_message.as_deref().unwrap_or(""),
                        "recent attempt from flagged ip"
                    );
                }
            }
            Err(e) => warn!(ip = %group.key, error = %e, "flagged-ip history fetch failed"),
        }
    }
    for group in &report.users {
        warn!(
            user_id = %group.key,
            failed = group.failed_attempts,
            last_attempt = %group.last_attempt,
            "suspicious failed-login activity for user"
        );
    }
}

async fn log_summary(state: &AppState) {
    match tokens::repo::token_stats(&state.db, None).await {
        Ok(stats) => info!(
            total = stats.total,
            active = stats.active,
            expired = stats.expired,
            revoked = stats.revoked,
            "token store summary"
        ),
        Err(e) => warn!(error = %e, "token summary failed"),
    }

    match audit::repo::logs_since(&state.db, Window::days(1)).await {
        Ok(rows) => {
            let stats = report::system_stats(&rows);
            info!(
                logins = stats.total_logins,
                successful = stats.successful_logins,
                failed = stats.failed_logins,
                unique_users = stats.unique_users,
                unique_ips = stats.unique_ips,
                "daily login summary"
            );
        }
        Err(e) => warn!(error = %e, "login summary failed"),
    }
}
