//! Action executor
//!
//! The fixed capability set playbook steps may invoke. Each capability
//! enforces its required-parameter contract and returns a structured
//! JSON result. The bodies here simulate the integration side effects;
//! wiring to real EDR/firewall/identity systems happens outside the
//! core.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::{PlaybookError, Result};

/// All capability names, in registry order.
pub const CAPABILITIES: &[&str] = &[
    "isolate_host",
    "block_ip",
    "kill_process",
    "collect_evidence",
    "notify_stakeholders",
    "reset_password",
    "disable_user",
    "quarantine_file",
    "update_firewall",
    "scan_system",
    "backup_system",
    "restore_from_backup",
    "log_action",
    "wait",
];

#[derive(Debug, Default)]
pub struct ActionExecutor;

impl ActionExecutor {
    pub fn new() -> Self {
        Self
    }

    fn required<'a>(
        params: &'a Map<String, Value>,
        action: &str,
        names: &[&str],
    ) -> Result<&'a Value> {
        for name in names {
            if let Some(value) = params.get(*name) {
                if !value.is_null() {
                    return Ok(value);
                }
            }
        }
        Err(PlaybookError::MissingParameter {
            action: action.to_string(),
            parameter: names[0].to_string(),
        })
    }

    fn required_str<'a>(
        params: &'a Map<String, Value>,
        action: &str,
        names: &[&str],
    ) -> Result<&'a str> {
        Self::required(params, action, names)?
            .as_str()
            .ok_or_else(|| PlaybookError::MissingParameter {
                action: action.to_string(),
                parameter: names[0].to_string(),
            })
    }

    /// Execute one capability. Unknown actions fail fast.
    pub async fn execute(&self, action: &str, params: &Map<String, Value>) -> Result<Value> {
        info!("executing action {action}");
        match action {
            "isolate_host" => {
                let hostname = Self::required_str(params, action, &["hostname", "host"])?;
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!({
                    "action": "isolate_host",
                    "hostname": hostname,
                    "status": "isolated",
                    "isolation_rules": [
                        format!("Block all inbound traffic to {hostname}"),
                        format!("Block all outbound traffic from {hostname}"),
                        "Allow management traffic on port 22",
                    ],
                }))
            }
            "block_ip" => {
                let ip = Self::required_str(params, action, &["ip_address", "ip"])?;
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(json!({
                    "action": "block_ip",
                    "ip_address": ip,
                    "status": "blocked",
                    "firewall_rule": format!("DENY {ip}/32"),
                }))
            }
            "kill_process" => {
                let hostname = Self::required_str(params, action, &["hostname", "host"])?;
                let target = params
                    .get("pid")
                    .filter(|v| !v.is_null())
                    .cloned()
                    .or_else(|| {
                        params
                            .get("process_name")
                            .or_else(|| params.get("process"))
                            .filter(|v| !v.is_null())
                            .cloned()
                    })
                    .ok_or_else(|| PlaybookError::MissingParameter {
                        action: action.to_string(),
                        parameter: "process_name".to_string(),
                    })?;
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!({
                    "action": "kill_process",
                    "hostname": hostname,
                    "process": target,
                    "status": "terminated",
                }))
            }
            "collect_evidence" => {
                let hostname = Self::required_str(params, action, &["hostname", "host"])?;
                let evidence_types = params
                    .get("evidence_types")
                    .cloned()
                    .unwrap_or_else(|| json!(["memory", "disk", "network"]));
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(json!({
                    "action": "collect_evidence",
                    "hostname": hostname,
                    "evidence_collected": evidence_types,
                    "evidence_location": format!(
                        "/forensics/{hostname}_{}",
                        Utc::now().format("%Y%m%d_%H%M%S")
                    ),
                    "status": "collected",
                }))
            }
            "notify_stakeholders" => {
                let message = params
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Security incident detected");
                let recipients = params
                    .get("recipients")
                    .cloned()
                    .unwrap_or_else(|| json!(["security-team@company.com"]));
                let severity = params
                    .get("severity")
                    .and_then(Value::as_str)
                    .unwrap_or("medium");
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(json!({
                    "action": "notify_stakeholders",
                    "message": message,
                    "recipients": recipients,
                    "severity": severity,
                    "notification_id": format!("notify_{}", Utc::now().format("%Y%m%d_%H%M%S")),
                    "status": "sent",
                }))
            }
            "reset_password" => {
                let username = Self::required_str(params, action, &["username", "user"])?;
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(json!({
                    "action": "reset_password",
                    "username": username,
                    "status": "reset",
                }))
            }
            "disable_user" => {
                let username = Self::required_str(params, action, &["username", "user"])?;
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(json!({
                    "action": "disable_user",
                    "username": username,
                    "status": "disabled",
                }))
            }
            "quarantine_file" => {
                let target = Self::required_str(params, action, &["file_path", "file_hash"])?;
                let hostname = params.get("hostname").and_then(Value::as_str);
                tokio::time::sleep(Duration::from_millis(40)).await;
                Ok(json!({
                    "action": "quarantine_file",
                    "target": target,
                    "hostname": hostname,
                    "quarantine_location": format!(
                        "/quarantine/{}_{}",
                        target.replace('/', "_"),
                        Utc::now().format("%Y%m%d_%H%M%S")
                    ),
                    "status": "quarantined",
                }))
            }
            "update_firewall" => {
                let rules = params
                    .get("rules")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let action_type = params
                    .get("action")
                    .and_then(Value::as_str)
                    .unwrap_or("add");
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!({
                    "action": "update_firewall",
                    "rules_modified": rules.len(),
                    "action_type": action_type,
                    "status": "updated",
                }))
            }
            "scan_system" => {
                let hostname = Self::required_str(params, action, &["hostname", "host"])?;
                let scan_type = params
                    .get("scan_type")
                    .and_then(Value::as_str)
                    .unwrap_or("full");
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(json!({
                    "action": "scan_system",
                    "hostname": hostname,
                    "scan_type": scan_type,
                    "threats_found": 0,
                    "status": "completed",
                }))
            }
            "backup_system" => {
                let hostname = Self::required_str(params, action, &["hostname", "host"])?;
                let backup_type = params
                    .get("backup_type")
                    .and_then(Value::as_str)
                    .unwrap_or("incremental");
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(json!({
                    "action": "backup_system",
                    "hostname": hostname,
                    "backup_type": backup_type,
                    "backup_location": format!(
                        "/backups/{hostname}_{}",
                        Utc::now().format("%Y%m%d_%H%M%S")
                    ),
                    "status": "completed",
                }))
            }
            "restore_from_backup" => {
                let hostname = Self::required_str(params, action, &["hostname", "host"])?;
                let backup_id = params.get("backup_id").and_then(Value::as_str);
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(json!({
                    "action": "restore_from_backup",
                    "hostname": hostname,
                    "backup_id": backup_id,
                    "status": "restored",
                }))
            }
            "log_action" => {
                let message = params
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Action logged");
                let level = params.get("level").and_then(Value::as_str).unwrap_or("info");
                info!("playbook log: {message}");
                Ok(json!({
                    "action": "log_action",
                    "message": message,
                    "level": level,
                    "timestamp": Utc::now().to_rfc3339(),
                    "status": "logged",
                }))
            }
            "wait" => {
                let duration = params
                    .get("duration")
                    .and_then(Value::as_f64)
                    .unwrap_or(1.0);
                tokio::time::sleep(Duration::from_secs_f64(duration.max(0.0))).await;
                Ok(json!({
                    "action": "wait",
                    "duration": duration,
                    "status": "completed",
                }))
            }
            other => Err(PlaybookError::UnknownAction(other.to_string())),
        }
    }
}
