//! Device identity
//!
//! Resolves the stable device identifier announced to the relay. Resolution
//! order: persisted id file, DMI product serial (Linux), then a generated
//! UUID which is persisted so the device keeps the same identity across
//! restarts. The id is an opaque string everywhere else.

use std::path::Path;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::relay::{AccountAnnouncement, AccountRecord};

/// Resolve the device id, persisting a generated one if nothing exists yet
pub fn device_id(id_file: &Path) -> String {
    if let Ok(content) = std::fs::read_to_string(id_file) {
        let trimmed = content.trim();
        if !trimmed.is_empty() {
            debug!("Device id loaded from {}", id_file.display());
            return trimmed.to_string();
        }
    }

    if let Some(serial) = dmi_serial() {
        persist(id_file, &serial);
        return serial;
    }

    let generated = Uuid::new_v4().to_string();
    warn!("No persisted device id or hardware serial; generated {}", generated);
    persist(id_file, &generated);
    generated
}

/// Hardware serial from DMI, when the platform exposes one
fn dmi_serial() -> Option<String> {
    if cfg!(target_os = "linux") {
        let content = std::fs::read_to_string("/sys/class/dmi/id/product_serial").ok()?;
        let trimmed = content.trim();
        if trimmed.is_empty() || trimmed == "None" {
            return None;
        }
        return Some(trimmed.to_string());
    }
    None
}

fn persist(id_file: &Path, id: &str) {
    if let Some(parent) = id_file.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(id_file, id) {
        warn!("Failed to persist device id to {}: {}", id_file.display(), e);
    }
}

/// Build the identity announcement: each account gets a derived device name
/// of the form `<device>-<account record id>`.
pub fn build_announcement(device: &str, accounts: &[AccountRecord]) -> AccountAnnouncement {
    let accounts = accounts
        .iter()
        .map(|acc| AccountRecord {
            id: acc.id.clone(),
            account_id: acc.account_id.clone(),
            device_name: format!("{}-{}", device, acc.id),
        })
        .collect();

    AccountAnnouncement {
        device_name: device.to_string(),
        accounts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_id_reads_persisted_file() {
        let dir = tempfile::tempdir().unwrap();
        let id_file = dir.path().join("device_id");
        std::fs::write(&id_file, "SN-12345\n").unwrap();

        assert_eq!(device_id(&id_file), "SN-12345");
    }

    #[test]
    fn test_device_id_is_stable_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let id_file = dir.path().join("nested").join("device_id");

        let first = device_id(&id_file);
        let second = device_id(&id_file);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_announcement_derives_per_account_device_names() {
        let accounts = vec![
            AccountRecord {
                id: "1".to_string(),
                account_id: "gg-100".to_string(),
                device_name: String::new(),
            },
            AccountRecord {
                id: "2".to_string(),
                account_id: "gg-200".to_string(),
                device_name: String::new(),
            },
        ];

        let announcement = build_announcement("SN-9", &accounts);
        assert_eq!(announcement.device_name, "SN-9");
        assert_eq!(announcement.accounts[0].device_name, "SN-9-1");
        assert_eq!(announcement.accounts[1].device_name, "SN-9-2");
        assert_eq!(announcement.accounts[1].account_id, "gg-200");
    }
}
