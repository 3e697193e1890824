//! Configuration types deserialized from `tracex.toml`.

use serde::Deserialize;
use tracex_common::ContentHash;
use tracex_filter::TagFilter;

use crate::error::ConfigError;

/// The top-level instrumentation configuration parsed from `tracex.toml`.
///
/// Every section is optional; an empty file yields tracing enabled for all
/// methods, Android `Trace` hooks, stored archive entries, and a worker pool
/// sized to the machine.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceConfig {
    /// Which methods receive trace markers.
    #[serde(default)]
    pub trace: TraceRules,
    /// The static methods called at method entry and exit.
    #[serde(default)]
    pub hooks: TraceHooks,
    /// How the merged output archive is written.
    #[serde(default)]
    pub archive: ArchiveSettings,
    /// Worker pool sizing.
    #[serde(default)]
    pub executor: ExecutorConfig,
}

/// Include/exclude rule lists and the master switch.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceRules {
    /// When `false`, every unit passes through untouched.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Regexes selecting `container#method` tags. Empty selects everything.
    #[serde(default)]
    pub include: Vec<String>,
    /// Regexes rejecting tags. Always wins over `include`.
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl Default for TraceRules {
    fn default() -> Self {
        Self {
            enabled: true,
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }
}

/// The external begin/end primitive invoked by instrumented methods.
///
/// `begin` must be a static `(Ljava/lang/String;)V` method and `end` a
/// static `()V` method on the class `owner` (internal form, `/`-separated).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceHooks {
    /// Internal name of the class declaring both hooks.
    #[serde(default = "default_owner")]
    pub owner: String,
    /// Name of the method called with the trace tag at entry.
    #[serde(default = "default_begin")]
    pub begin: String,
    /// Name of the method called before every exit.
    #[serde(default = "default_end")]
    pub end: String,
}

impl TraceHooks {
    /// Descriptor of the begin hook.
    pub const BEGIN_DESCRIPTOR: &'static str = "(Ljava/lang/String;)V";
    /// Descriptor of the end hook.
    pub const END_DESCRIPTOR: &'static str = "()V";
}

impl Default for TraceHooks {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            begin: default_begin(),
            end: default_end(),
        }
    }
}

/// Compression applied to every entry written into the output archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMode {
    /// Entries are stored uncompressed.
    #[default]
    Stored,
    /// Entries are deflated at [`ArchiveSettings::level`].
    Deflate,
}

/// Output archive settings. Fixed per run so output bytes are reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveSettings {
    /// Entry compression method.
    #[serde(default)]
    pub compression: CompressionMode,
    /// Deflate level, 0-9. Ignored for stored entries.
    #[serde(default = "default_level")]
    pub level: u32,
}

impl Default for ArchiveSettings {
    fn default() -> Self {
        Self {
            compression: CompressionMode::Stored,
            level: default_level(),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// Number of worker threads; `0` means the available parallelism.
    #[serde(default)]
    pub jobs: usize,
}

impl TraceConfig {
    /// Compiles the rule lists into a [`TagFilter`].
    ///
    /// Returns [`TagFilter::disabled`] when tracing is switched off, so the
    /// patterns are only checked when they will be used.
    pub fn filter(&self) -> Result<TagFilter, ConfigError> {
        if !self.trace.enabled {
            return Ok(TagFilter::disabled());
        }
        Ok(TagFilter::new(&self.trace.include, &self.trace.exclude)?)
    }

    /// Digest of every setting that affects output bytes.
    ///
    /// A change in this value invalidates all cached transformation results.
    pub fn settings_fingerprint(&self, filter: &TagFilter) -> ContentHash {
        let rules = filter.fingerprint();
        let compression: &[u8] = match self.archive.compression {
            CompressionMode::Stored => b"stored",
            CompressionMode::Deflate => b"deflate",
        };
        let level = self.archive.level.to_le_bytes();
        ContentHash::from_parts([
            rules.as_bytes().as_slice(),
            self.hooks.owner.as_bytes(),
            self.hooks.begin.as_bytes(),
            self.hooks.end.as_bytes(),
            compression,
            level.as_slice(),
        ])
    }
}

fn default_true() -> bool {
    true
}

fn default_owner() -> String {
    "android/os/Trace".to_string()
}

fn default_begin() -> String {
    "beginSection".to_string()
}

fn default_end() -> String {
    "endSection".to_string()
}

fn default_level() -> u32 {
    6
}
