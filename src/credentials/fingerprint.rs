//! Machine fingerprint used to derive the store key.
//!
//! The key is never persisted: it is recomputed from hardware and account
//! signals on every run. When any signal changes (new network card, renamed
//! host, different user) the old store no longer decrypts and gets reset.

use super::encryption::KEY_SIZE;
use sha2::{Digest, Sha256};
use sysinfo::{CpuRefreshKind, Networks, RefreshKind, System};

/// Interfaces that come and go with containers and VMs.
const VOLATILE_INTERFACE_PREFIXES: [&str; 7] = ["lo", "veth", "docker", "br-", "virbr", "vnet", "tun"];

/// Machine-identifying signals, in a fixed order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint {
    pub cpu: String,
    pub mac_address: String,
    pub hostname: String,
    pub os_name: String,
    pub kernel_version: String,
    pub arch: String,
    pub user: String,
}

impl Fingerprint {
    /// Collect the signals from the running machine.
    ///
    /// Missing signals become empty strings; the fingerprint is still
    /// deterministic as long as the same signals stay missing.
    pub fn collect() -> Self {
        let system = System::new_with_specifics(
            RefreshKind::nothing().with_cpu(CpuRefreshKind::everything()),
        );
        let cpu = system
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .unwrap_or_default();

        Self {
            cpu,
            mac_address: primary_mac_address(),
            hostname: System::host_name().unwrap_or_default(),
            os_name: System::name().unwrap_or_default(),
            kernel_version: System::kernel_version().unwrap_or_default(),
            arch: std::env::consts::ARCH.to_string(),
            user: current_user(),
        }
    }

    /// SHA-256 over the `_`-joined signals.
    pub fn derive_key(&self) -> [u8; KEY_SIZE] {
        let combined = [
            self.cpu.as_str(),
            self.mac_address.as_str(),
            self.hostname.as_str(),
            self.os_name.as_str(),
            self.kernel_version.as_str(),
            self.arch.as_str(),
            self.user.as_str(),
        ]
        .join("_");

        let digest = Sha256::digest(combined.as_bytes());
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&digest);
        key
    }

    /// Hex digest of the key, safe to log for comparing machines.
    pub fn key_id(&self) -> String {
        let key = self.derive_key();
        hex::encode(&Sha256::digest(key)[..4])
    }
}

/// Lowest MAC address among stable interfaces.
fn primary_mac_address() -> String {
    let networks = Networks::new_with_refreshed_list();
    let mut macs: Vec<String> = networks
        .iter()
        .filter(|(name, _)| {
            !VOLATILE_INTERFACE_PREFIXES
                .iter()
                .any(|prefix| name.starts_with(prefix))
        })
        .map(|(_, data)| data.mac_address())
        .filter(|mac| !mac.is_unspecified())
        .map(|mac| mac.to_string())
        .collect();
    macs.sort();
    macs.into_iter().next().unwrap_or_default()
}

fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}
