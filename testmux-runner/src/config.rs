// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the multiplexer and run session.
//!
//! The built-in defaults live in `default-config.toml`. A user-provided TOML file is layered on
//! top of them, so it only needs to name the keys it changes.

use crate::{
    errors::{ConfigParseError, ConfigParseErrorKind},
    session::{FinalizedPolicy, SessionSettings},
    state::RecordLimits,
};
use bytesize::ByteSize;
use camino::Utf8Path;
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::{collections::BTreeSet, time::Duration};
use tokio::sync::Semaphore;
use tracing::warn;

/// Trait for handling configuration warnings.
///
/// Warnings don't stop the config from loading. [`DefaultConfigWarnings`] logs them through
/// `tracing`; tests and embedders can collect them instead.
pub trait ConfigWarnings {
    /// Handle unknown configuration keys.
    fn unknown_config_keys(&mut self, config_file: Option<&Utf8Path>, unknown: &BTreeSet<String>);
}

/// Default implementation of [`ConfigWarnings`] that logs warnings using the tracing crate.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultConfigWarnings;

impl ConfigWarnings for DefaultConfigWarnings {
    fn unknown_config_keys(&mut self, config_file: Option<&Utf8Path>, unknown: &BTreeSet<String>) {
        let mut unknown_str = String::new();
        if unknown.len() == 1 {
            // Print this on the same line.
            unknown_str.push_str("key: ");
            unknown_str.extend(unknown.iter().map(String::as_str));
        } else {
            unknown_str.push_str("keys:\n");
            for ignored_key in unknown {
                unknown_str.push('\n');
                unknown_str.push_str("  - ");
                unknown_str.push_str(ignored_key);
            }
        }

        match config_file {
            Some(config_file) => warn!(
                "in config file {config_file}, ignoring unknown configuration {unknown_str}"
            ),
            None => warn!("ignoring unknown configuration {unknown_str}"),
        }
    }
}

/// Configuration for a [`Multiplexer`](crate::mux::Multiplexer) and its
/// [`RunSession`](crate::session::RunSession).
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MuxConfig {
    mux: MuxSection,
    session: SessionSection,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct MuxSection {
    channel_capacity: usize,
    #[serde(with = "humantime_serde")]
    submit_timeout: Duration,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SessionSection {
    finalized_policy: FinalizedPolicy,
    max_attachment_bytes: ByteSize,
}

impl MuxConfig {
    /// The default configuration, embedded at build time.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Loads the default configuration, with `config_file` layered on top if given.
    pub fn from_sources(
        config_file: Option<&Utf8Path>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let mut builder = Self::make_default_config();
        if let Some(config_file) = config_file {
            builder = builder.add_source(File::new(config_file.as_str(), FileFormat::Toml));
        }
        Self::build_and_validate(&builder, config_file, warnings)
    }

    /// Loads the default configuration with TOML `contents` layered on top.
    ///
    /// Errors and warnings are reported without a file name.
    pub fn from_toml_str(
        contents: &str,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let builder =
            Self::make_default_config().add_source(File::from_str(contents, FileFormat::Toml));
        Self::build_and_validate(&builder, None, warnings)
    }

    /// The number of events that can be queued between producers and the dispatcher.
    pub fn channel_capacity(&self) -> usize {
        self.mux.channel_capacity
    }

    /// How long [`Producer::submit`](crate::mux::Producer::submit) waits for queue space.
    pub fn submit_timeout(&self) -> Duration {
        self.mux.submit_timeout
    }

    /// What to do when a finalized test reports another status.
    pub fn finalized_policy(&self) -> FinalizedPolicy {
        self.session.finalized_policy
    }

    /// The per-record attachment budget.
    pub fn max_attachment_bytes(&self) -> ByteSize {
        self.session.max_attachment_bytes
    }

    /// Returns the settings for a run session.
    pub fn session_settings(&self) -> SessionSettings {
        let max_bytes = self.session.max_attachment_bytes.as_u64();
        SessionSettings {
            finalized_policy: self.session.finalized_policy,
            limits: RecordLimits {
                max_attachment_bytes: Some(usize::try_from(max_bytes).unwrap_or(usize::MAX)),
            },
        }
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_validate(
        builder: &ConfigBuilder<DefaultState>,
        config_file: Option<&Utf8Path>,
        warnings: &mut impl ConfigWarnings,
    ) -> Result<Self, ConfigParseError> {
        let (config, unknown) = Self::build_and_deserialize_config(builder)
            .map_err(|kind| ConfigParseError::new(config_file, kind))?;

        if !unknown.is_empty() {
            warnings.unknown_config_keys(config_file, &unknown);
        }

        if config.mux.channel_capacity == 0 {
            return Err(ConfigParseError::new(
                config_file,
                ConfigParseErrorKind::InvalidChannelCapacity,
            ));
        }
        if config.mux.channel_capacity > Semaphore::MAX_PERMITS {
            return Err(ConfigParseError::new(
                config_file,
                ConfigParseErrorKind::ChannelCapacityTooLarge {
                    capacity: config.mux.channel_capacity,
                    max: Semaphore::MAX_PERMITS,
                },
            ));
        }

        Ok(config)
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(Self, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: Self = serde_path_to_error::deserialize(ignored_de).map_err(|error| {
            // serde_path_to_error already reports the key, so drop it from the config error.
            let path = error.path().clone();
            let error = match error.into_inner() {
                ConfigError::At { error, .. } => *error,
                other => other,
            };
            ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                path, error,
            )))
        })?;

        Ok((config, ignored))
    }
}
