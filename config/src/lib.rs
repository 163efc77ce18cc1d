// Licensed under the Apache-2.0 license

use anyhow::{bail, ensure, Context, Result};
use coproc_host_ipcq::layout::{CMD_SLOTS, REGION_SIZE, RSP_SLOTS};
use coproc_host_ipcq::{AddressMap, AllocPolicy, IpcqConfig, PendingConfig};
use coproc_host_mailbox::{DeliveryMode, MailboxConfig};
use coproc_host_osal::Duration;
use coproc_host_session::DeviceConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File looked up by [`CoprocConfig::load_default`]
pub const CONFIG_FILE_NAME: &str = "coproc-config.toml";

/// Upper bound for waits and watchdogs (one hour)
pub const MAX_TIMEOUT_MS: u64 = 60 * 60 * 1000;

/// Upper bound for poll and retry intervals (one second)
pub const MAX_INTERVAL_US: u64 = 1_000_000;

/// Configuration for the whole coprocessor host stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoprocConfig {
    pub mailbox: MailboxSection,
    pub queue: QueueSection,
    pub memory: MemorySection,
    pub timeouts: TimeoutSection,
    #[serde(default)]
    pub trace: TraceSection,
    pub sessions: SessionSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailboxMode {
    Interrupt,
    Polled,
}

/// Mailbox delivery and post retry budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailboxSection {
    pub mode: MailboxMode,
    pub poll_interval_us: u64,
    pub post_spin_polls: u32,
    pub post_sleep_retries: u32,
    pub post_retry_interval_us: u64,
}

/// Slot counts and allocation back-off
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSection {
    pub cmd_slots: usize,
    pub rsp_slots: usize,
    pub alloc_retries: u32,
    pub alloc_retry_interval_ms: u64,
    pub active_wait_us: u64,
    pub reserved_records: usize,
    pub overflow_limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    /// Window at the top of the coprocessor's memory
    Split,
    /// Coprocessor addresses equal host offsets
    Direct,
}

/// Shared memory window placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySection {
    pub window: WindowKind,
    pub coproc_mem_size: u32,
    pub shmem_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSection {
    pub wait_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_watchdog_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSection {
    /// Transactions kept in the history ring, 0 disables it
    pub transaction_log: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSection {
    pub max_sessions: usize,
}

impl CoprocConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: CoprocConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML configuration")?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {:?}", path.as_ref()))?;

        Ok(config)
    }

    /// Search the current directory and its parents for `coproc-config.toml`,
    /// falling back to the defaults when none is found.
    pub fn load_default() -> Result<Self> {
        let mut current_dir = std::env::current_dir()?;

        loop {
            let config_path = current_dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                return Self::from_file(config_path);
            }

            if let Some(parent) = current_dir.parent() {
                current_dir = parent.to_path_buf();
            } else {
                break;
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize configuration to TOML")?;

        std::fs::write(path.as_ref(), contents)
            .with_context(|| format!("Failed to write config file: {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Reject values the compiled layout or the runtime cannot honour
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.queue.cmd_slots == CMD_SLOTS,
            "queue.cmd_slots is {} but the shared layout has {} command slots",
            self.queue.cmd_slots,
            CMD_SLOTS
        );
        ensure!(
            self.queue.rsp_slots == RSP_SLOTS,
            "queue.rsp_slots is {} but the shared layout has {} response slots",
            self.queue.rsp_slots,
            RSP_SLOTS
        );
        ensure!(
            self.queue.reserved_records > 0,
            "queue.reserved_records must be non-zero"
        );
        ensure!(
            self.sessions.max_sessions > 0,
            "sessions.max_sessions must be non-zero"
        );
        ensure!(
            self.queue.alloc_retries > 0,
            "queue.alloc_retries must be at least 1"
        );
        if self.mailbox.mode == MailboxMode::Polled && self.mailbox.poll_interval_us == 0 {
            bail!("mailbox.poll_interval_us must be non-zero in polled mode");
        }

        for (name, us) in [
            ("mailbox.poll_interval_us", self.mailbox.poll_interval_us),
            ("mailbox.post_retry_interval_us", self.mailbox.post_retry_interval_us),
            ("queue.active_wait_us", self.queue.active_wait_us),
        ] {
            ensure!(us <= MAX_INTERVAL_US, "{} is {} (max {})", name, us, MAX_INTERVAL_US);
        }
        let interval_ms = self.queue.alloc_retry_interval_ms;
        ensure!(
            interval_ms <= MAX_INTERVAL_US / 1000,
            "queue.alloc_retry_interval_ms is {} (max {})",
            interval_ms,
            MAX_INTERVAL_US / 1000
        );
        for (name, ms) in [
            ("timeouts.wait_ms", Some(self.timeouts.wait_ms)),
            ("timeouts.default_watchdog_ms", self.timeouts.default_watchdog_ms),
        ] {
            if let Some(ms) = ms {
                ensure!(ms <= MAX_TIMEOUT_MS, "{} is {} (max {})", name, ms, MAX_TIMEOUT_MS);
            }
        }

        self.address_map()?;
        Ok(())
    }

    pub fn mailbox_config(&self) -> MailboxConfig {
        let mode = match self.mailbox.mode {
            MailboxMode::Interrupt => DeliveryMode::Interrupt,
            MailboxMode::Polled => DeliveryMode::Polled {
                interval: Duration::from_micros(self.mailbox.poll_interval_us),
            },
        };
        MailboxConfig {
            mode,
            post_spin_polls: self.mailbox.post_spin_polls,
            post_sleep_retries: self.mailbox.post_sleep_retries,
            post_retry_interval: Duration::from_micros(self.mailbox.post_retry_interval_us),
        }
    }

    pub fn ipcq_config(&self) -> IpcqConfig {
        IpcqConfig {
            alloc: AllocPolicy {
                active_wait: Duration::from_micros(self.queue.active_wait_us),
                retries: self.queue.alloc_retries,
                retry_interval: Duration::from_millis(self.queue.alloc_retry_interval_ms),
                ..AllocPolicy::default()
            },
            pending: PendingConfig {
                reserved_records: self.queue.reserved_records,
                overflow_limit: self.queue.overflow_limit,
            },
            wait_timeout: Duration::from_millis(self.timeouts.wait_ms),
            default_watchdog: self.timeouts.default_watchdog_ms.map(Duration::from_millis),
            transaction_log: self.trace.transaction_log,
        }
    }

    /// Address map for the full queue region
    pub fn address_map(&self) -> Result<AddressMap> {
        let map = match self.memory.window {
            WindowKind::Split => AddressMap::split(
                self.memory.coproc_mem_size,
                self.memory.shmem_size,
                REGION_SIZE,
            ),
            WindowKind::Direct => AddressMap::direct(REGION_SIZE),
        };
        map.with_context(|| "Shared memory window does not fit the queue layout")
    }

    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            max_sessions: self.sessions.max_sessions,
        }
    }
}

impl Default for CoprocConfig {
    fn default() -> Self {
        let mailbox = MailboxConfig::default();
        let ipcq = IpcqConfig::default();
        Self {
            mailbox: MailboxSection {
                mode: MailboxMode::Interrupt,
                poll_interval_us: 100,
                post_spin_polls: mailbox.post_spin_polls,
                post_sleep_retries: mailbox.post_sleep_retries,
                post_retry_interval_us: mailbox.post_retry_interval.as_micros(),
            },
            queue: QueueSection {
                cmd_slots: CMD_SLOTS,
                rsp_slots: RSP_SLOTS,
                alloc_retries: ipcq.alloc.retries,
                alloc_retry_interval_ms: ipcq.alloc.retry_interval.as_millis(),
                active_wait_us: ipcq.alloc.active_wait.as_micros(),
                reserved_records: ipcq.pending.reserved_records,
                overflow_limit: ipcq.pending.overflow_limit,
            },
            memory: MemorySection {
                window: WindowKind::Split,
                coproc_mem_size: 0x0010_0000,
                shmem_size: 0x1000,
            },
            timeouts: TimeoutSection {
                wait_ms: ipcq.wait_timeout.as_millis(),
                default_watchdog_ms: None,
            },
            trace: TraceSection::default(),
            sessions: SessionSection {
                max_sessions: DeviceConfig::default().max_sessions,
            },
        }
    }
}
