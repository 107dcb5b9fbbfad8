use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::collections::HashMap;

/// All snipgate parameters. Loaded from the `snipgate_config` table at startup when a
/// database is configured; environment variables `SNIPGATE_<KEY>` override either source.
/// First boot writes defaults; subsequent boots read existing values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnipgateCfg {
    // admission
    pub max_payload_lines: usize,
    pub display_truncate_chars: usize,

    // proposal deadlines (secs)
    pub proposal_expiry_secs: u64,
    pub extension_secs: u64,

    // watchdog
    pub watchdog_poll_secs: u64,
    pub watchdog_warn_secs: u64,
    pub watchdog_hard_timeout_secs: u64,
    pub force_terminate_on_hard_timeout: bool,

    // reaper
    pub reaper_poll_secs: u64,

    // execution
    pub payload_memory_mb: u64,
    pub max_output_bytes: usize,

    // conversation
    pub history_turns: usize,
    pub history_threads: usize,

    // channels
    pub inbound_buffer: usize,
    pub outbound_buffer: usize,

    // shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for SnipgateCfg {
    fn default() -> Self {
        Self {
            max_payload_lines: 250,
            display_truncate_chars: 1000,
            proposal_expiry_secs: 300,
            extension_secs: 300,
            watchdog_poll_secs: 5,
            watchdog_warn_secs: 10,
            watchdog_hard_timeout_secs: 3600,
            force_terminate_on_hard_timeout: false,
            reaper_poll_secs: 30,
            payload_memory_mb: 256,
            max_output_bytes: 64 * 1024,
            history_turns: 20,
            history_threads: 512,
            inbound_buffer: 64,
            outbound_buffer: 256,
            shutdown_timeout_secs: 10,
        }
    }
}

impl SnipgateCfg {
    /// Load config from `snipgate_config` table. If table is empty, seed with defaults.
    pub async fn load(pool: &PgPool) -> Result<Self, sqlx::Error> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT key, value FROM snipgate_config")
                .fetch_all(pool)
                .await?;

        if rows.is_empty() {
            let cfg = Self::default();
            cfg.seed(pool).await?;
            return Ok(cfg);
        }

        let map: HashMap<String, String> = rows.into_iter().collect();
        Ok(Self::from_map(&map))
    }

    /// Write all current values into `snipgate_config`, leaving existing keys alone.
    async fn seed(&self, pool: &PgPool) -> Result<(), sqlx::Error> {
        for (key, value, desc) in &self.to_entries() {
            sqlx::query(
                "INSERT INTO snipgate_config (key, value, description) VALUES ($1, $2, $3) \
                 ON CONFLICT (key) DO NOTHING",
            )
            .bind(key)
            .bind(value)
            .bind(desc)
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    /// Overlay `SNIPGATE_<KEY>` environment variables.
    pub fn apply_env(self) -> Self {
        let overrides: HashMap<String, String> = self
            .to_entries()
            .into_iter()
            .filter_map(|(key, _, _)| {
                let var = format!("SNIPGATE_{}", key.to_ascii_uppercase());
                std::env::var(var).ok().map(|v| (key.to_owned(), v))
            })
            .collect();
        self.overlay(&overrides)
    }

    /// Clamp values that would make a ticker spin or an extension a no-op.
    pub fn sanitize(mut self) -> Self {
        self.watchdog_poll_secs = self.watchdog_poll_secs.max(1);
        self.reaper_poll_secs = self.reaper_poll_secs.max(1);
        self.extension_secs = self.extension_secs.max(1);
        self.inbound_buffer = self.inbound_buffer.max(1);
        self.outbound_buffer = self.outbound_buffer.max(1);
        self.history_threads = self.history_threads.max(1);
        self
    }

    pub fn expiry_window(&self) -> TimeDelta {
        secs(self.proposal_expiry_secs)
    }

    pub fn extension(&self) -> TimeDelta {
        secs(self.extension_secs)
    }

    pub fn warn_threshold(&self) -> TimeDelta {
        secs(self.watchdog_warn_secs)
    }

    pub fn hard_timeout(&self) -> TimeDelta {
        secs(self.watchdog_hard_timeout_secs)
    }

    fn from_map(m: &HashMap<String, String>) -> Self {
        Self::default().overlay(m)
    }

    fn overlay(self, m: &HashMap<String, String>) -> Self {
        let d = self;
        Self {
            max_payload_lines: get_or(m, "max_payload_lines", d.max_payload_lines),
            display_truncate_chars: get_or(m, "display_truncate_chars", d.display_truncate_chars),
            proposal_expiry_secs: get_or(m, "proposal_expiry_secs", d.proposal_expiry_secs),
            extension_secs: get_or(m, "extension_secs", d.extension_secs),
            watchdog_poll_secs: get_or(m, "watchdog_poll_secs", d.watchdog_poll_secs),
            watchdog_warn_secs: get_or(m, "watchdog_warn_secs", d.watchdog_warn_secs),
            watchdog_hard_timeout_secs: get_or(m, "watchdog_hard_timeout_secs", d.watchdog_hard_timeout_secs),
            force_terminate_on_hard_timeout: get_or(m, "force_terminate_on_hard_timeout", d.force_terminate_on_hard_timeout),
            reaper_poll_secs: get_or(m, "reaper_poll_secs", d.reaper_poll_secs),
            payload_memory_mb: get_or(m, "payload_memory_mb", d.payload_memory_mb),
            max_output_bytes: get_or(m, "max_output_bytes", d.max_output_bytes),
            history_turns: get_or(m, "history_turns", d.history_turns),
            history_threads: get_or(m, "history_threads", d.history_threads),
            inbound_buffer: get_or(m, "inbound_buffer", d.inbound_buffer),
            outbound_buffer: get_or(m, "outbound_buffer", d.outbound_buffer),
            shutdown_timeout_secs: get_or(m, "shutdown_timeout_secs", d.shutdown_timeout_secs),
        }
    }

    fn to_entries(&self) -> Vec<(&'static str, String, &'static str)> {
        vec![
            ("max_payload_lines", self.max_payload_lines.to_string(), "Max logical lines in a proposed payload"),
            ("display_truncate_chars", self.display_truncate_chars.to_string(), "Payload chars shown in a proposal notice"),
            ("proposal_expiry_secs", self.proposal_expiry_secs.to_string(), "Proposal expiry window seconds"),
            ("extension_secs", self.extension_secs.to_string(), "Extension increment seconds"),
            ("watchdog_poll_secs", self.watchdog_poll_secs.to_string(), "Watchdog poll interval seconds"),
            ("watchdog_warn_secs", self.watchdog_warn_secs.to_string(), "Unattended age before warning seconds"),
            ("watchdog_hard_timeout_secs", self.watchdog_hard_timeout_secs.to_string(), "Unattended age before forced termination seconds"),
            ("force_terminate_on_hard_timeout", self.force_terminate_on_hard_timeout.to_string(), "Terminate process on hard timeout"),
            ("reaper_poll_secs", self.reaper_poll_secs.to_string(), "Expiry reaper poll interval seconds"),
            ("payload_memory_mb", self.payload_memory_mb.to_string(), "Address space cap for payload processes MB"),
            ("max_output_bytes", self.max_output_bytes.to_string(), "Payload output bytes kept in memory"),
            ("history_turns", self.history_turns.to_string(), "Conversation turns kept per thread"),
            ("history_threads", self.history_threads.to_string(), "Threads with conversation history kept"),
            ("inbound_buffer", self.inbound_buffer.to_string(), "Inbound message channel capacity"),
            ("outbound_buffer", self.outbound_buffer.to_string(), "Outbound message channel capacity"),
            ("shutdown_timeout_secs", self.shutdown_timeout_secs.to_string(), "Graceful shutdown timeout seconds"),
        ]
    }
}

fn secs(n: u64) -> TimeDelta {
    i64::try_from(n)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

fn get_or<T: std::str::FromStr>(map: &HashMap<String, String>, key: &str, default: T) -> T {
    map.get(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
