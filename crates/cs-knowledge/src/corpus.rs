//! Built-in corpus slices
//!
//! A curated slice of the security corpus used for offline operation
//! and tests: common ATT&CK techniques, a few CVEs, sigma rules, and
//! CISA KEV entries. Production deployments replace this with feed
//! loaders; the document shape is identical.

use serde_json::json;

use crate::types::{doc_types, KnowledgeDocument};

struct TechniqueRow {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    tactic: &'static str,
    platforms: &'static [&'static str],
    data_sources: &'static [&'static str],
}

const TECHNIQUES: &[TechniqueRow] = &[
    TechniqueRow {
        id: "T1110",
        name: "Brute Force",
        description: "Adversaries may use brute force techniques to gain access to accounts when passwords are unknown or when password hashes are obtained.",
        tactic: "Credential Access",
        platforms: &["Linux", "Windows", "macOS"],
        data_sources: &["Authentication Logs", "Network Traffic"],
    },
    TechniqueRow {
        id: "T1021.004",
        name: "Remote Services: SSH",
        description: "Adversaries may use Valid Accounts to log into remote machines using Secure Shell (SSH). The adversary may then perform actions as the logged-on user.",
        tactic: "Lateral Movement",
        platforms: &["Linux", "macOS"],
        data_sources: &["Authentication Logs", "Network Traffic"],
    },
    TechniqueRow {
        id: "T1021.001",
        name: "Remote Services: Remote Desktop Protocol",
        description: "Adversaries may use Valid Accounts to log into a computer using the Remote Desktop Protocol (RDP).",
        tactic: "Lateral Movement",
        platforms: &["Windows"],
        data_sources: &["Authentication Logs", "Network Traffic"],
    },
    TechniqueRow {
        id: "T1078",
        name: "Valid Accounts",
        description: "Adversaries may obtain and abuse credentials of existing accounts as a means of gaining Initial Access, Persistence, Privilege Escalation, or Defense Evasion.",
        tactic: "Defense Evasion",
        platforms: &["Linux", "Windows", "macOS", "SaaS", "IaaS", "Network"],
        data_sources: &["Authentication Logs", "Windows Event Logs"],
    },
    TechniqueRow {
        id: "T1003",
        name: "OS Credential Dumping",
        description: "Adversaries may attempt to dump credentials to obtain account login and credential material, normally in the form of a hash or a clear text password.",
        tactic: "Credential Access",
        platforms: &["Linux", "Windows", "macOS"],
        data_sources: &["Process Monitoring", "File Monitoring", "API Monitoring"],
    },
    TechniqueRow {
        id: "T1047",
        name: "Windows Management Instrumentation",
        description: "Adversaries may abuse Windows Management Instrumentation (WMI) to execute malicious commands and payloads.",
        tactic: "Execution",
        platforms: &["Windows"],
        data_sources: &["Authentication Logs", "Network Traffic", "Process Monitoring"],
    },
    TechniqueRow {
        id: "T1190",
        name: "Exploit Public-Facing Application",
        description: "Adversaries may attempt to take advantage of a weakness in an Internet-facing computer or program using software, data, or commands in order to cause unintended or unanticipated behavior.",
        tactic: "Initial Access",
        platforms: &["Linux", "Windows", "macOS", "Network"],
        data_sources: &["Application Logs", "Network Traffic"],
    },
    TechniqueRow {
        id: "T1505.003",
        name: "Server Software Component: Web Shell",
        description: "Adversaries may backdoor web servers with web shells to establish persistent access to systems.",
        tactic: "Persistence",
        platforms: &["Linux", "Windows", "macOS", "Network"],
        data_sources: &["File Monitoring", "Network Traffic", "Process Monitoring"],
    },
    TechniqueRow {
        id: "T1486",
        name: "Data Encrypted for Impact",
        description: "Adversaries may encrypt data on target systems or on large numbers of systems in a network to interrupt availability to system and network resources.",
        tactic: "Impact",
        platforms: &["Linux", "Windows", "macOS"],
        data_sources: &["File Monitoring", "Process Monitoring"],
    },
    TechniqueRow {
        id: "T1041",
        name: "Exfiltration Over C2 Channel",
        description: "Adversaries may steal data by exfiltrating it over an existing command and control channel.",
        tactic: "Exfiltration",
        platforms: &["Linux", "Windows", "macOS"],
        data_sources: &["Network Traffic", "Process Monitoring"],
    },
    TechniqueRow {
        id: "T1071.004",
        name: "Application Layer Protocol: DNS",
        description: "Adversaries may communicate using the Domain Name System (DNS) application layer protocol to avoid detection and network filtering by blending in with existing traffic.",
        tactic: "Command and Control",
        platforms: &["Linux", "Windows", "macOS"],
        data_sources: &["Network Traffic", "Packet Capture"],
    },
];

fn technique_documents() -> Vec<KnowledgeDocument> {
    TECHNIQUES
        .iter()
        .map(|row| {
            KnowledgeDocument::new(
                format!("attack_{}", row.id),
                row.name,
                row.description,
                doc_types::ATTACK_TECHNIQUE,
                "attack",
            )
            .with_url(format!(
                "https://attack.mitre.org/techniques/{}/",
                row.id.replace('.', "/")
            ))
            .with_metadata("attack_id", json!(row.id))
            .with_metadata("tactic", json!(row.tactic))
            .with_metadata("platforms", json!(row.platforms))
            .with_metadata("data_sources", json!(row.data_sources))
        })
        .collect()
}

fn cve_documents() -> Vec<KnowledgeDocument> {
    vec![
        KnowledgeDocument::new(
            "cve_CVE-2021-44228",
            "CVE-2021-44228",
            "Apache Log4j2 JNDI features used in configuration, log messages, and parameters do not protect against attacker controlled LDAP and other JNDI related endpoints, allowing remote code execution.",
            doc_types::CVE,
            "nvd",
        )
        .with_metadata("cve_id", json!("CVE-2021-44228"))
        .with_metadata("cvss_score", json!(10.0))
        .with_metadata("cvss_vector", json!("CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:C/C:H/I:H/A:H"))
        .with_metadata("cwe", json!("CWE-502"))
        .with_metadata("affected_products", json!(["Apache Log4j 2.0-2.14.1"])),
        KnowledgeDocument::new(
            "cve_CVE-2023-4863",
            "CVE-2023-4863",
            "Heap buffer overflow in libwebp allows a remote attacker to perform an out of bounds memory write via a crafted HTML page.",
            doc_types::CVE,
            "nvd",
        )
        .with_metadata("cve_id", json!("CVE-2023-4863"))
        .with_metadata("cvss_score", json!(8.8))
        .with_metadata("cvss_vector", json!("CVSS:3.1/AV:N/AC:L/PR:N/UI:R/S:U/C:H/I:H/A:H"))
        .with_metadata("cwe", json!("CWE-787"))
        .with_metadata("affected_products", json!(["libwebp before 1.3.2"])),
        KnowledgeDocument::new(
            "cve_CVE-2019-0708",
            "CVE-2019-0708",
            "A remote code execution vulnerability exists in Remote Desktop Services when an unauthenticated attacker connects to the target system using RDP and sends specially crafted requests.",
            doc_types::CVE,
            "nvd",
        )
        .with_metadata("cve_id", json!("CVE-2019-0708"))
        .with_metadata("cvss_score", json!(9.8))
        .with_metadata("cvss_vector", json!("CVSS:3.0/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H"))
        .with_metadata("cwe", json!("CWE-416"))
        .with_metadata("affected_products", json!(["Windows 7", "Windows Server 2008"])),
    ]
}

fn sigma_documents() -> Vec<KnowledgeDocument> {
    vec![
        KnowledgeDocument::new(
            "sigma_ssh_brute_force",
            "SSH Brute Force Attempts",
            "Detects multiple failed SSH authentication attempts from the same source address within a short timeframe.",
            doc_types::SIGMA_RULE,
            "sigma",
        )
        .with_metadata("rule_id", json!("f2e5c6df-3a9c-4c7b-9c1a-2f5e8a0b1c2d"))
        .with_metadata("level", json!("high"))
        .with_metadata("tags", json!(["attack.t1110", "attack.credential_access"]))
        .with_metadata("logsource", json!({"product": "linux", "service": "sshd"})),
        KnowledgeDocument::new(
            "sigma_lsass_access",
            "Suspicious LSASS Process Access",
            "Detects processes opening handles to lsass.exe with memory read permissions, a common precursor to credential dumping.",
            doc_types::SIGMA_RULE,
            "sigma",
        )
        .with_metadata("rule_id", json!("a1b2c3d4-5e6f-4a7b-8c9d-0e1f2a3b4c5d"))
        .with_metadata("level", json!("critical"))
        .with_metadata("tags", json!(["attack.t1003", "attack.credential_access"]))
        .with_metadata("logsource", json!({"product": "windows", "category": "process_access"})),
        KnowledgeDocument::new(
            "sigma_dns_tunneling",
            "Potential DNS Tunneling",
            "Detects hosts issuing an unusually high volume of long DNS TXT queries, indicative of DNS tunneling command channels.",
            doc_types::SIGMA_RULE,
            "sigma",
        )
        .with_metadata("rule_id", json!("0d9c8b7a-6f5e-4d3c-2b1a-9e8d7c6b5a4f"))
        .with_metadata("level", json!("medium"))
        .with_metadata("tags", json!(["attack.t1071.004", "attack.command_and_control"]))
        .with_metadata("logsource", json!({"product": "linux", "category": "dns"})),
    ]
}

fn kev_documents() -> Vec<KnowledgeDocument> {
    vec![
        KnowledgeDocument::new(
            "kev_CVE-2021-44228",
            "Apache Log4j2 Remote Code Execution Vulnerability",
            "Apache Log4j2 contains a remote code execution vulnerability actively exploited in the wild. Apply updates per vendor instructions.",
            doc_types::CISA_KEV,
            "cisa_kev",
        )
        .with_metadata("cve_id", json!("CVE-2021-44228"))
        .with_metadata("known_ransomware_use", json!(true))
        .with_metadata("due_date", json!("2021-12-24")),
        KnowledgeDocument::new(
            "kev_CVE-2019-0708",
            "Microsoft Remote Desktop Services Remote Code Execution Vulnerability",
            "Microsoft Remote Desktop Services contains an unauthenticated remote code execution vulnerability (BlueKeep) actively exploited in the wild.",
            doc_types::CISA_KEV,
            "cisa_kev",
        )
        .with_metadata("cve_id", json!("CVE-2019-0708"))
        .with_metadata("known_ransomware_use", json!(true))
        .with_metadata("due_date", json!("2022-01-10")),
    ]
}

/// The full built-in corpus slice.
pub fn demo_documents() -> Vec<KnowledgeDocument> {
    let mut docs = technique_documents();
    docs.extend(cve_documents());
    docs.extend(sigma_documents());
    docs.extend(kev_documents());
    docs
}

/// Tactic lookup for the built-in techniques; the analyst's fallback
/// when retrieval is unavailable.
pub fn tactic_for_technique(technique_id: &str) -> Option<&'static str> {
    TECHNIQUES
        .iter()
        .find(|row| row.id == technique_id)
        .map(|row| row.tactic)
        .or_else(|| {
            // Sub-technique falls back to its parent's tactic.
            let parent = technique_id.split('.').next()?;
            TECHNIQUES
                .iter()
                .find(|row| row.id == parent)
                .map(|row| row.tactic)
        })
}

/// Technique name lookup for the built-in slice.
pub fn name_for_technique(technique_id: &str) -> Option<&'static str> {
    TECHNIQUES
        .iter()
        .find(|row| row.id == technique_id)
        .map(|row| row.name)
}
