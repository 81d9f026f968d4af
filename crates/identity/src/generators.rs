use chrono::Datelike;
use privarion_backends::CommandExecutor;
use privarion_core::{IdentityType, PrivarionError};
use rand::Rng;
use std::sync::Arc;

use crate::strategy::{GenerationStrategy, STEALTH_VENDOR_OUIS};
use crate::validators::{is_valid_hostname, is_valid_mac};

const HOSTNAME_PREFIXES: [&str; 6] = ["dev", "mac", "host", "node", "work", "corp"];
const SERIAL_PLANTS: [&str; 4] = ["C0", "F1", "G8", "DN"];
const SERIAL_ALNUM: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn random_alnum(rng: &mut impl Rng, len: usize) -> String {
    (0..len)
        .map(|_| SERIAL_ALNUM[rng.gen_range(0..SERIAL_ALNUM.len())] as char)
        .collect()
}

/// Deterministic, side-effect-free generators for spoofed identity values,
/// plus host-capture helpers backed by a [`CommandExecutor`].
pub struct HardwareIdentifierEngine {
    executor: Arc<dyn CommandExecutor>,
}

impl HardwareIdentifierEngine {
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    #[must_use]
    pub fn generate_mac(&self, strategy: &GenerationStrategy) -> String {
        let mut rng = rand::thread_rng();
        match strategy {
            GenerationStrategy::VendorBased(vendor_hex) => {
                let prefix = Self::parse_vendor_prefix(vendor_hex).unwrap_or(STEALTH_VENDOR_OUIS[0]);
                self.mac_with_prefix(&mut rng, prefix)
            }
            GenerationStrategy::Stealth => {
                let prefix = STEALTH_VENDOR_OUIS[rng.gen_range(0..STEALTH_VENDOR_OUIS.len())];
                self.mac_with_prefix(&mut rng, prefix)
            }
            GenerationStrategy::Custom(pattern) => {
                let candidate = Self::fill_mac_pattern(pattern, &mut rng);
                if is_valid_mac(&candidate) {
                    candidate
                } else {
                    self.generate_mac(&GenerationStrategy::Realistic)
                }
            }
            GenerationStrategy::Random | GenerationStrategy::Realistic => {
                let mut bytes = [0u8; 6];
                rng.fill(&mut bytes);
                bytes[0] |= 0x02;
                bytes[0] &= 0xFE;
                Self::format_mac(&bytes)
            }
        }
    }

    fn mac_with_prefix(&self, rng: &mut impl Rng, prefix: [u8; 3]) -> String {
        let mut bytes = [0u8; 6];
        bytes[..3].copy_from_slice(&prefix);
        rng.fill(&mut bytes[3..]);
        Self::format_mac(&bytes)
    }

    fn format_mac(bytes: &[u8; 6]) -> String {
        bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":")
    }

    fn parse_vendor_prefix(vendor_hex: &str) -> Option<[u8; 3]> {
        let mut out = [0u8; 3];
        let parts: Vec<&str> = vendor_hex.split(':').collect();
        if parts.len() != 3 {
            return None;
        }
        for (i, part) in parts.iter().enumerate() {
            out[i] = u8::from_str_radix(part, 16).ok()?;
        }
        Some(out)
    }

    fn fill_mac_pattern(pattern: &str, rng: &mut impl Rng) -> String {
        let mut segments: Vec<String> = pattern.split(':').map(str::to_string).collect();
        while segments.len() < 6 {
            segments.push(format!("{:02X}", rng.gen_range(0..=255u8)));
        }
        segments.truncate(6);
        segments.join(":")
    }

    #[must_use]
    pub fn generate_hostname(&self, strategy: &GenerationStrategy) -> String {
        let mut rng = rand::thread_rng();
        let candidate = match strategy {
            GenerationStrategy::Custom(pattern) => pattern.clone(),
            _ => {
                let prefix = HOSTNAME_PREFIXES[rng.gen_range(0..HOSTNAME_PREFIXES.len())];
                let number: u32 = rng.gen_range(1..=9999);
                format!("{prefix}-{number:04}")
            }
        };
        if is_valid_hostname(&candidate) {
            candidate
        } else {
            format!("host-{:04}", rng.gen_range(1..=9999))
        }
    }

    #[must_use]
    pub fn generate_serial(&self, strategy: &GenerationStrategy) -> String {
        let mut rng = rand::thread_rng();
        match strategy {
            GenerationStrategy::Realistic => {
                let plant = SERIAL_PLANTS[rng.gen_range(0..SERIAL_PLANTS.len())];
                let year = chrono::Utc::now().year() % 10;
                let week = rng.gen_range(1..=52);
                let unique = random_alnum(&mut rng, 3);
                let model = random_alnum(&mut rng, 3);
                format!("{plant}{year}{week:02}{unique}{model}")
            }
            _ => random_alnum(&mut rng, 12),
        }
    }

    /// Current hostname, read via `hostname`.
    pub async fn capture_hostname(&self) -> Result<String, PrivarionError> {
        let out = self.executor.exec("hostname", &[]).await?;
        Ok(out.stdout.trim().to_string())
    }

    /// Host serial number, read via `system_profiler SPHardwareDataType`.
    pub async fn capture_serial(&self) -> Result<String, PrivarionError> {
        let out = self
            .executor
            .exec(
                "system_profiler",
                &["SPHardwareDataType".to_string()],
            )
            .await?;
        out.stdout
            .lines()
            .find_map(|line| line.split_once(": ").map(|(_, v)| v.trim().to_string()))
            .ok_or_else(|| PrivarionError::Io("serial number not found in system_profiler output".into()))
    }

    /// Boot volume UUID, read via `diskutil info /`.
    pub async fn capture_disk_uuid(&self) -> Result<String, PrivarionError> {
        let out = self
            .executor
            .exec("diskutil", &["info".to_string(), "/".to_string()])
            .await?;
        out.stdout
            .lines()
            .find(|l| l.contains("Volume UUID"))
            .and_then(|l| l.split_once(": "))
            .map(|(_, v)| v.trim().to_string())
            .ok_or_else(|| PrivarionError::Io("disk UUID not found in diskutil output".into()))
    }

    /// Network interface names, read via `ifconfig -l`.
    pub async fn capture_interfaces(&self) -> Result<Vec<String>, PrivarionError> {
        let out = self.executor.exec("ifconfig", &["-l".to_string()]).await?;
        Ok(out.stdout.split_whitespace().map(str::to_string).collect())
    }

    /// Close-form realistic generation for identity types not covered by the
    /// dedicated MAC/hostname/serial generators.
    #[must_use]
    pub fn generate_for(&self, identity_type: IdentityType, strategy: &GenerationStrategy) -> String {
        let mut rng = rand::thread_rng();
        match identity_type {
            IdentityType::MacAddress => self.generate_mac(strategy),
            IdentityType::Hostname => self.generate_hostname(strategy),
            IdentityType::SerialNumber => self.generate_serial(strategy),
            IdentityType::DiskUuid | IdentityType::VolumeUuid | IdentityType::BootVolumeUuid => {
                uuid::Uuid::new_v4().to_string().to_uppercase()
            }
            IdentityType::NetworkInterface => format!("en{}", rng.gen_range(0..10)),
            IdentityType::SystemVersion => format!("14.{}.{}", rng.gen_range(0..7), rng.gen_range(0..4)),
            IdentityType::KernelVersion => format!("23.{}.0", rng.gen_range(0..7)),
            IdentityType::UserId | IdentityType::GroupId => rng.gen_range(501..=600).to_string(),
            IdentityType::ProcessId | IdentityType::ParentProcessId => {
                rng.gen_range(100..=65_000).to_string()
            }
            IdentityType::Architecture => {
                if rng.gen_bool(0.5) { "arm64" } else { "x86_64" }.to_string()
            }
            IdentityType::Username => format!("user{}", rng.gen_range(1000..9999)),
            IdentityType::HomeDirectory => format!("/Users/user{}", rng.gen_range(1000..9999)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use privarion_backends::RecordingCommandExecutor;

    fn engine() -> HardwareIdentifierEngine {
        HardwareIdentifierEngine::new(Arc::new(RecordingCommandExecutor::new()))
    }

    #[test]
    fn random_mac_has_local_bit_set_and_multicast_clear() {
        let engine = engine();
        for _ in 0..20 {
            let mac = engine.generate_mac(&GenerationStrategy::Random);
            assert!(is_valid_mac(&mac));
            let first_byte = u8::from_str_radix(&mac[0..2], 16).unwrap();
            assert_eq!(first_byte & 0x02, 0x02);
            assert_eq!(first_byte & 0x01, 0x00);
        }
    }

    #[test]
    fn vendor_based_mac_uses_oui_prefix() {
        let engine = engine();
        let mac = engine.generate_mac(&GenerationStrategy::VendorBased("00:1B:63".into()));
        assert!(mac.starts_with("00:1B:63"));
    }

    #[test]
    fn stealth_mac_uses_one_of_the_allowlisted_ouis() {
        let engine = engine();
        for _ in 0..20 {
            let mac = engine.generate_mac(&GenerationStrategy::Stealth);
            let prefix_bytes: Vec<u8> = mac
                .split(':')
                .take(3)
                .map(|b| u8::from_str_radix(b, 16).unwrap())
                .collect();
            assert!(STEALTH_VENDOR_OUIS.contains(&[prefix_bytes[0], prefix_bytes[1], prefix_bytes[2]]));
        }
    }

    #[test]
    fn custom_mac_pattern_falls_back_when_invalid() {
        let engine = engine();
        let mac = engine.generate_mac(&GenerationStrategy::Custom("zz:zz".into()));
        assert!(is_valid_mac(&mac));
    }

    #[test]
    fn generated_hostname_passes_validator() {
        let engine = engine();
        for _ in 0..20 {
            let hostname = engine.generate_hostname(&GenerationStrategy::Realistic);
            assert!(is_valid_hostname(&hostname));
        }
    }

    #[test]
    fn realistic_serial_has_expected_length() {
        let engine = engine();
        let serial = engine.generate_serial(&GenerationStrategy::Realistic);
        assert_eq!(serial.len(), 11);
    }

    #[tokio::test]
    async fn capture_hostname_trims_output() {
        let executor = Arc::new(RecordingCommandExecutor::new());
        executor.script("hostname", &[], privarion_backends::CommandOutput::success("dev-mac\n"));
        let engine = HardwareIdentifierEngine::new(executor);
        assert_eq!(engine.capture_hostname().await.unwrap(), "dev-mac");
    }
}
