// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::Result;
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::{collections::BTreeSet, time::Duration};
use testmux_runner::{
    config::{ConfigWarnings, DefaultConfigWarnings, MuxConfig},
    errors::ConfigParseErrorKind,
    session::FinalizedPolicy,
};

#[derive(Default)]
struct TestConfigWarnings {
    unknown: Vec<(Option<String>, BTreeSet<String>)>,
}

impl ConfigWarnings for TestConfigWarnings {
    fn unknown_config_keys(
        &mut self,
        config_file: Option<&camino::Utf8Path>,
        unknown: &BTreeSet<String>,
    ) {
        self.unknown
            .push((config_file.map(|file| file.to_string()), unknown.clone()));
    }
}

#[test]
fn load_from_file() -> Result<()> {
    test_init();

    let dir = Utf8TempDir::new()?;
    let config_file = dir.path().join("testmux.toml");
    std::fs::write(
        &config_file,
        indoc! {r#"
            [mux]
            channel-capacity = 16
            unknown-key = true

            [session]
            max-attachment-bytes = "1KiB"
        "#},
    )?;

    let mut warnings = TestConfigWarnings::default();
    let config = MuxConfig::from_sources(Some(config_file.as_path()), &mut warnings)?;

    assert_eq!(config.channel_capacity(), 16);
    assert_eq!(config.submit_timeout(), Duration::from_secs(5));
    assert_eq!(config.finalized_policy(), FinalizedPolicy::Discard);
    assert_eq!(
        config.session_settings().limits.max_attachment_bytes,
        Some(1024)
    );
    assert_eq!(
        warnings.unknown,
        vec![(
            Some(config_file.to_string()),
            BTreeSet::from(["mux.unknown-key".to_owned()])
        )]
    );

    Ok(())
}

#[test]
fn missing_file_is_an_error() -> Result<()> {
    test_init();

    let dir = Utf8TempDir::new()?;
    let config_file = dir.path().join("does-not-exist.toml");

    let err = MuxConfig::from_sources(Some(config_file.as_path()), &mut DefaultConfigWarnings)
        .expect_err("file is missing");
    assert_eq!(err.config_file(), Some(config_file.as_path()));
    assert!(
        matches!(err.kind(), ConfigParseErrorKind::BuildError(_)),
        "{err:?}"
    );

    Ok(())
}

#[test]
fn invalid_capacity_in_file() -> Result<()> {
    test_init();

    let dir = Utf8TempDir::new()?;
    let config_file = dir.path().join("testmux.toml");
    std::fs::write(&config_file, "[mux]\nchannel-capacity = 0\n")?;

    let err = MuxConfig::from_sources(Some(config_file.as_path()), &mut DefaultConfigWarnings)
        .expect_err("capacity is zero");
    assert!(matches!(
        err.kind(),
        ConfigParseErrorKind::InvalidChannelCapacity
    ));
    assert_eq!(
        err.to_string(),
        format!("failed to parse testmux config at `{config_file}`")
    );

    Ok(())
}
