//! Pure aggregations over fetched audit rows. Keeping these off the
//! database makes them trivially testable and keeps the SQL surface small.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::{LoginLog, LoginMethod};

#[derive(Debug, Clone, Serialize)]
pub struct UserLoginStats {
    pub total_logins: i64,
    pub successful_logins: i64,
    pub failed_logins: i64,
    pub methods: HashMap<LoginMethod, i64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_login_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemLoginStats {
    pub total_logins: i64,
    pub successful_logins: i64,
    pub failed_logins: i64,
    pub unique_users: i64,
    pub unique_ips: i64,
    pub methods: HashMap<LoginMethod, i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousGroup {
    pub key: String,
    pub failed_attempts: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_attempt: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousActivity {
    pub ips: Vec<SuspiciousGroup>,
    pub users: Vec<SuspiciousGroup>,
}

pub fn user_stats(logs: &[LoginLog]) -> UserLoginStats {
    let mut methods: HashMap<LoginMethod, i64> = HashMap::new();
    let mut successful = 0i64;
    let mut last_login_at = None;
    for log in logs {
        if let Some(method) = log.login_method {
            *methods.entry(method).or_default() += 1;
        }
        if log.success {
            successful += 1;
            if last_login_at.map_or(true, |t| log.login_at > t) {
                last_login_at = Some(log.login_at);
            }
        }
    }
    UserLoginStats {
        total_logins: logs.len() as i64,
        successful_logins: successful,
        failed_logins: logs.len() as i64 - successful,
        methods,
        last_login_at,
    }
}

pub fn system_stats(logs: &[LoginLog]) -> SystemLoginStats {
    let mut methods: HashMap<LoginMethod, i64> = HashMap::new();
    let mut users: HashSet<Uuid> = HashSet::new();
    let mut ips: HashSet<&str> = HashSet::new();
    let mut successful = 0i64;
    for log in logs {
        if let Some(method) = log.login_method {
            *methods.entry(method).or_default() += 1;
        }
        if log.success {
            successful += 1;
        }
        if let Some(user_id) = log.user_id {
            users.insert(user_id);
        }
        if let Some(ip) = log.ip_address.as_deref() {
            ips.insert(ip);
        }
    }
    SystemLoginStats {
        total_logins: logs.len() as i64,
        successful_logins: successful,
        failed_logins: logs.len() as i64 - successful,
        unique_users: users.len() as i64,
        unique_ips: ips.len() as i64,
        methods,
    }
}

/// Groups failed attempts by source IP and by user id, reporting every
/// group that reaches `threshold` failures within the supplied rows.
/// Callers control the time window by what they fetch.
pub fn suspicious_activity(failed: &[LoginLog], threshold: i64) -> SuspiciousActivity {
    let mut by_ip: HashMap<&str, (i64, OffsetDateTime)> = HashMap::new();
    let mut by_user: HashMap<Uuid, (i64, OffsetDateTime)> = HashMap::new();
    for log in failed.iter().filter(|l| !l.success) {
        if let Some(ip) = log.ip_address.as_deref() {
            let entry = by_ip.entry(ip).or_insert((0, log.login_at));
            entry.0 += 1;
            if log.login_at > entry.1 {
                entry.1 = log.login_at;
            }
        }
        if let Some(user_id) = log.user_id {
            let entry = by_user.entry(user_id).or_insert((0, log.login_at));
            entry.0 += 1;
            if log.login_at > entry.1 {
                entry.1 = log.login_at;
            }
        }
    }

    let mut ips: Vec<SuspiciousGroup> = by_ip
        .into_iter()
        .filter(|(_, (count, _))| *count >= threshold)
        .map(|(key, (failed_attempts, last_attempt))| SuspiciousGroup {
            key: key.to_owned(),
            failed_attempts,
            last_attempt,
        })
        .collect();
    let mut users: Vec<SuspiciousGroup> = by_user
        .into_iter()
        .filter(|(_, (count, _))| *count >= threshold)
        .map(|(key, (failed_attempts, last_attempt))| SuspiciousGroup {
            key: key.to_string(),
            failed_attempts,
            last_attempt,
        })
        .collect();
    ips.sort_by(|a, b| b.failed_attempts.cmp(&a.failed_attempts));
    users.sort_by(|a, b| b.failed_attempts.cmp(&a.failed_attempts));

    SuspiciousActivity { ips, users }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn log(
        user_id: Option<Uuid>,
        method: LoginMethod,
        success: bool,
        ip: Option<&str>,
        at: OffsetDateTime,
    ) -> LoginLog {
        LoginLog {
            id: Uuid::new_v4(),
            user_id,
            login_method: Some(method),
            success,
            error_message: if success { None } else { Some("boom".into()) },
            ip_address: ip.map(str::to_owned),
            user_agent: None,
            location: None,
            login_at: at,
        }
    }

    #[test]
    fn user_stats_counts_and_last_login() {
        let user = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let logs = vec![
            log(Some(user), LoginMethod::Google, true, None, now - Duration::hours(2)),
            log(Some(user), LoginMethod::TokenRefresh, true, None, now),
            log(Some(user), LoginMethod::Google, false, None, now - Duration::hours(1)),
        ];
        let stats = user_stats(&logs);
        assert_eq!(stats.total_logins, 3);
        assert_eq!(stats.successful_logins, 2);
        assert_eq!(stats.failed_logins, 1);
        assert_eq!(stats.methods[&LoginMethod::Google], 2);
        assert_eq!(stats.last_login_at, Some(now));
    }

    #[test]
    fn method_breakdown_skips_untagged_events() {
        let user = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let mut logs = vec![
            log(Some(user), LoginMethod::Google, true, None, now),
            log(Some(user), LoginMethod::TokenRefresh, true, None, now),
        ];
        // Administrative row (global sign-out) carries no login method.
        let mut admin = log(Some(user), LoginMethod::Google, true, None, now);
        admin.login_method = None;
        logs.push(admin);

        let stats = user_stats(&logs);
        assert_eq!(stats.total_logins, 3);
        assert_eq!(stats.methods.values().sum::<i64>(), 2);
        assert_eq!(stats.methods[&LoginMethod::Google], 1);

        let system = system_stats(&logs);
        assert_eq!(system.methods.values().sum::<i64>(), 2);
    }

    #[test]
    fn system_stats_dedupes_users_and_ips() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let logs = vec![
            log(Some(a), LoginMethod::Google, true, Some("10.0.0.1"), now),
            log(Some(a), LoginMethod::Google, true, Some("10.0.0.1"), now),
            log(Some(b), LoginMethod::Google, false, Some("10.0.0.2"), now),
            log(None, LoginMethod::Google, false, Some("10.0.0.2"), now),
        ];
        let stats = system_stats(&logs);
        assert_eq!(stats.total_logins, 4);
        assert_eq!(stats.unique_users, 2);
        assert_eq!(stats.unique_ips, 2);
        assert_eq!(stats.failed_logins, 2);
    }

    #[test]
    fn five_failures_from_one_ip_is_suspicious() {
        let now = OffsetDateTime::now_utc();
        let logs: Vec<LoginLog> = (0..5)
            .map(|i| {
                log(
                    None,
                    LoginMethod::Google,
                    false,
                    Some("198.51.100.7"),
                    now - Duration::minutes(i),
                )
            })
            .collect();
        let report = suspicious_activity(&logs, 5);
        assert_eq!(report.ips.len(), 1);
        assert_eq!(report.ips[0].key, "198.51.100.7");
        assert_eq!(report.ips[0].failed_attempts, 5);
        assert_eq!(report.ips[0].last_attempt, now);
        assert!(report.users.is_empty());
    }

    #[test]
    fn four_failures_stays_below_threshold() {
        let now = OffsetDateTime::now_utc();
        let user = Uuid::new_v4();
        let logs: Vec<LoginLog> = (0..4)
            .map(|_| log(Some(user), LoginMethod::Google, false, Some("198.51.100.8"), now))
            .collect();
        let report = suspicious_activity(&logs, 5);
        assert!(report.ips.is_empty());
        assert!(report.users.is_empty());
    }

    #[test]
    fn successful_rows_never_count_toward_suspicion() {
        let now = OffsetDateTime::now_utc();
        let logs: Vec<LoginLog> = (0..6)
            .map(|_| log(None, LoginMethod::Google, true, Some("198.51.100.9"), now))
            .collect();
        let report = suspicious_activity(&logs, 5);
        assert!(report.ips.is_empty());
    }
}
