//! Playbook catalog
//!
//! The built-in library ships embedded in the binary; a directory of
//! additional YAML playbooks can be layered on top (same id wins for
//! the directory copy). Playbooks are read-only once loaded.

use std::collections::HashMap;
use std::path::Path;

use tracing::{info, warn};

use crate::dsl::Playbook;
use crate::{PlaybookError, Result};

const BUILTIN: &[(&str, &str)] = &[
    ("block_source_ip", include_str!("../library/block_source_ip.yml")),
    ("enable_account_lockout", include_str!("../library/enable_account_lockout.yml")),
    ("monitor_brute_force", include_str!("../library/monitor_brute_force.yml")),
    ("monitor_ssh_activity", include_str!("../library/monitor_ssh_activity.yml")),
    ("disable_ssh", include_str!("../library/disable_ssh.yml")),
    ("disable_rdp", include_str!("../library/disable_rdp.yml")),
    ("monitor_rdp_activity", include_str!("../library/monitor_rdp_activity.yml")),
    ("isolate_host", include_str!("../library/isolate_host.yml")),
    ("reset_passwords", include_str!("../library/reset_passwords.yml")),
    ("monitor_credential_access", include_str!("../library/monitor_credential_access.yml")),
    ("isolate_service", include_str!("../library/isolate_service.yml")),
    ("patch_vulnerability", include_str!("../library/patch_vulnerability.yml")),
    ("enable_waf", include_str!("../library/enable_waf.yml")),
    ("remove_web_shell", include_str!("../library/remove_web_shell.yml")),
    ("scan_web_directories", include_str!("../library/scan_web_directories.yml")),
    ("harden_web_server", include_str!("../library/harden_web_server.yml")),
    ("collect_forensic_evidence", include_str!("../library/collect_forensic_evidence.yml")),
    ("notify_stakeholders", include_str!("../library/notify_stakeholders.yml")),
    ("isolate_infected_hosts", include_str!("../library/isolate_infected_hosts.yml")),
    ("kill_processes", include_str!("../library/kill_processes.yml")),
    ("restore_from_backup", include_str!("../library/restore_from_backup.yml")),
    ("monitor_dns_traffic", include_str!("../library/monitor_dns_traffic.yml")),
    ("block_dns_queries", include_str!("../library/block_dns_queries.yml")),
    ("update_dns_filters", include_str!("../library/update_dns_filters.yml")),
    ("block_outbound_traffic", include_str!("../library/block_outbound_traffic.yml")),
    ("monitor_data_exfiltration", include_str!("../library/monitor_data_exfiltration.yml")),
];

pub struct PlaybookCatalog {
    playbooks: HashMap<String, Playbook>,
}

impl PlaybookCatalog {
    /// Catalog with only the embedded library.
    pub fn builtin() -> Self {
        let mut playbooks = HashMap::new();
        for (id, yaml) in BUILTIN {
            match Playbook::from_yaml(yaml) {
                Ok(playbook) => {
                    playbooks.insert(playbook.id.clone(), playbook);
                }
                Err(e) => warn!("builtin playbook {id} failed to parse: {e}"),
            }
        }
        info!("loaded {} builtin playbooks", playbooks.len());
        Self { playbooks }
    }

    /// Layer `*.yml` files from a directory over the builtin library.
    pub fn with_directory(mut self, dir: &Path) -> Self {
        let Ok(entries) = std::fs::read_dir(dir) else {
            warn!("playbook directory {dir:?} not readable, using builtins only");
            return self;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("yml") {
                continue;
            }
            match std::fs::read_to_string(&path).map_err(|e| e.to_string()).and_then(|yaml| {
                Playbook::from_yaml(&yaml).map_err(|e| e.to_string())
            }) {
                Ok(playbook) => {
                    self.playbooks.insert(playbook.id.clone(), playbook);
                }
                Err(e) => warn!("playbook {path:?} failed to load: {e}"),
            }
        }
        self
    }

    pub fn get(&self, id: &str) -> Result<&Playbook> {
        self.playbooks
            .get(id)
            .ok_or_else(|| PlaybookError::NotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.playbooks.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.playbooks.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.playbooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.playbooks.is_empty()
    }
}

impl Default for PlaybookCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::RiskTier;

    #[test]
    fn builtin_library_loads_completely() {
        let catalog = PlaybookCatalog::builtin();
        assert_eq!(catalog.len(), BUILTIN.len());
        for (id, _) in BUILTIN {
            assert!(catalog.contains(id), "missing builtin playbook {id}");
        }
    }

    #[test]
    fn lookup_returns_parsed_playbook() {
        let catalog = PlaybookCatalog::builtin();
        let isolate = catalog.get("isolate_host").unwrap();
        assert_eq!(isolate.risk_tier, RiskTier::High);
        assert!(isolate.reversible);
        assert_eq!(isolate.steps.len(), 2);

        let restore = catalog.get("restore_from_backup").unwrap();
        assert!(!restore.reversible);
        assert_eq!(restore.risk_tier, RiskTier::High);
    }

    #[test]
    fn unknown_playbook_is_not_found() {
        let catalog = PlaybookCatalog::builtin();
        assert!(matches!(
            catalog.get("no_such_playbook"),
            Err(PlaybookError::NotFound(_))
        ));
    }

    #[test]
    fn ids_are_sorted() {
        let ids = PlaybookCatalog::builtin().ids();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
