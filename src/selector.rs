//! Selector (spec §4.3, component C3).
//!
//! Picks the bounded, ordered candidate list of repositories due for a
//! nightly scan, plus any inter-project group whose members are all
//! selected. Pure function of "now" plus a registry snapshot — no state of
//! its own, matching the teacher's preference for stateless query helpers
//! over `ConfigRegistry`/`db` (e.g. `db::get_by_priority`-shaped reads).

use chrono::{DateTime, Datelike, Utc};

use crate::config::{ConfigRegistry, Repository, RepositoryGroup, ScanFrequency};

/// A repository picked for tonight's run, plus why.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub repository: Repository,
}

/// An inter-project group whose member list was fully selected.
#[derive(Debug, Clone)]
pub struct GroupCandidate {
    pub group: RepositoryGroup,
}

fn is_due(repo: &Repository, now: DateTime<Utc>) -> bool {
    if !repo.enabled {
        return false;
    }
    match repo.scan_frequency {
        ScanFrequency::Daily => true,
        ScanFrequency::Weekly => now.weekday() == chrono::Weekday::Mon,
        ScanFrequency::Monthly => now.day() == 1,
        ScanFrequency::OnDemand => false,
    }
}

/// Order by priority (critical > high > medium > low), then by
/// `last_scanned_at` ascending with never-scanned repositories first
/// (spec §4.3 step 2).
fn candidate_order(a: &Repository, b: &Repository) -> std::cmp::Ordering {
    b.priority
        .rank()
        .cmp(&a.priority.rank())
        .then_with(|| match (a.last_scanned_at, b.last_scanned_at) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(x), Some(y)) => x.cmp(&y),
        })
}

/// Produce tonight's bounded, ordered candidate list plus any fully
/// selected inter-project groups (spec §4.3).
pub async fn select_nightly(registry: &ConfigRegistry, now: DateTime<Utc>) -> (Vec<Candidate>, Vec<GroupCandidate>) {
    let scan_config = registry.scan_config().await;
    let mut due: Vec<Repository> = registry
        .all_repositories()
        .await
        .into_iter()
        .filter(|r| is_due(r, now))
        .collect();

    due.sort_by(candidate_order);
    due.truncate(scan_config.max_repositories_per_night);

    let selected_names: std::collections::HashSet<&str> =
        due.iter().map(|r| r.name.as_str()).collect();

    // A group is only produced when every member was actually selected
    // tonight, not merely enabled (spec §4.3 "fully selected") — a member
    // truncated by `maxRepositoriesPerNight`, not due this week/month, or
    // on-demand-only must hold the whole group back.
    let groups = registry
        .all_groups()
        .await
        .into_iter()
        .filter(|g| g.enabled)
        .filter(|g| g.repositories.iter().all(|name| selected_names.contains(name.as_str())))
        .map(|group| GroupCandidate { group })
        .collect();

    (
        due.into_iter().map(|repository| Candidate { repository }).collect(),
        groups,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, Priority, RegistryDocument, ScanConfig, ScanType};
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn repo(name: &str, priority: Priority, frequency: ScanFrequency, last_scanned: Option<DateTime<Utc>>) -> Repository {
        Repository {
            name: name.into(),
            path: PathBuf::from(format!("/tmp/{name}")),
            priority,
            scan_frequency: frequency,
            enabled: true,
            tags: vec![],
            exclude_patterns: vec![],
            last_scanned_at: last_scanned,
            scan_history: vec![],
        }
    }

    async fn registry_with(repos: Vec<Repository>, groups: Vec<RepositoryGroup>, max_per_night: usize) -> ConfigRegistry {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("repositories.json");
        let doc = RegistryDocument {
            scan_config: ScanConfig {
                enabled: true,
                schedule: "0 2 * * *".into(),
                max_repositories_per_night: max_per_night,
                max_concurrent_scans: 2,
                scan_timeout: 600,
                retry_attempts: 3,
                retry_delay_ms: 500,
                run_on_startup: false,
            },
            cache_config: CacheConfig::default(),
            repositories: repos,
            repository_groups: groups,
        };
        std::fs::write(&path, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
        // Registry keeps its own TempDir alive via the returned struct's path only,
        // so leak the dir for the lifetime of the test process.
        std::mem::forget(dir);
        ConfigRegistry::load(path).await.unwrap()
    }

    #[tokio::test]
    async fn priority_then_never_scanned_first() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 2, 0, 0).unwrap();
        let registry = registry_with(
            vec![
                repo("low-prio", Priority::Low, ScanFrequency::Daily, None),
                repo("crit-old", Priority::Critical, ScanFrequency::Daily, Some(now - chrono::Duration::days(5))),
                repo("crit-never", Priority::Critical, ScanFrequency::Daily, None),
            ],
            vec![],
            10,
        )
        .await;

        let (candidates, _) = select_nightly(&registry, now).await;
        let names: Vec<_> = candidates.iter().map(|c| c.repository.name.clone()).collect();
        assert_eq!(names, vec!["crit-never", "crit-old", "low-prio"]);
    }

    #[tokio::test]
    async fn truncates_to_max_per_night() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 2, 0, 0).unwrap();
        let registry = registry_with(
            vec![
                repo("a", Priority::High, ScanFrequency::Daily, None),
                repo("b", Priority::High, ScanFrequency::Daily, None),
                repo("c", Priority::High, ScanFrequency::Daily, None),
            ],
            vec![],
            2,
        )
        .await;

        let (candidates, _) = select_nightly(&registry, now).await;
        assert_eq!(candidates.len(), 2);
    }

    #[tokio::test]
    async fn on_demand_never_selected_by_scheduler() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 2, 0, 0).unwrap();
        let registry = registry_with(
            vec![repo("manual", Priority::Critical, ScanFrequency::OnDemand, None)],
            vec![],
            10,
        )
        .await;

        let (candidates, _) = select_nightly(&registry, now).await;
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn weekly_only_fires_on_monday() {
        let monday = Utc.with_ymd_and_hms(2026, 7, 27, 2, 0, 0).unwrap();
        let tuesday = Utc.with_ymd_and_hms(2026, 7, 28, 2, 0, 0).unwrap();
        let registry = registry_with(
            vec![repo("weekly", Priority::Medium, ScanFrequency::Weekly, None)],
            vec![],
            10,
        )
        .await;

        let (mon_candidates, _) = select_nightly(&registry, monday).await;
        let (tue_candidates, _) = select_nightly(&registry, tuesday).await;
        assert_eq!(mon_candidates.len(), 1);
        assert_eq!(tue_candidates.len(), 0);
    }

    #[tokio::test]
    async fn group_selected_only_when_members_fully_selected() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 2, 0, 0).unwrap();
        let registry = registry_with(
            vec![
                repo("a", Priority::High, ScanFrequency::Daily, None),
                repo("b", Priority::High, ScanFrequency::Daily, None),
            ],
            vec![RepositoryGroup {
                name: "pair".into(),
                repositories: vec!["a".into(), "b".into()],
                scan_type: ScanType::Inter,
                enabled: true,
            }],
            10,
        )
        .await;

        let (_, groups) = select_nightly(&registry, now).await;
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group.name, "pair");
    }

    #[tokio::test]
    async fn group_withheld_when_a_member_is_enabled_but_not_selected_tonight() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 2, 0, 0).unwrap();
        let registry = registry_with(
            vec![
                repo("a", Priority::High, ScanFrequency::Daily, None),
                // Enabled, but on-demand repositories are never due, so
                // this member never lands in tonight's selected set.
                repo("b", Priority::High, ScanFrequency::OnDemand, None),
            ],
            vec![RepositoryGroup {
                name: "pair".into(),
                repositories: vec!["a".into(), "b".into()],
                scan_type: ScanType::Inter,
                enabled: true,
            }],
            10,
        )
        .await;

        let (candidates, groups) = select_nightly(&registry, now).await;
        assert_eq!(candidates.len(), 1);
        assert!(groups.is_empty(), "group must be withheld when any member was not actually selected");
    }
}
