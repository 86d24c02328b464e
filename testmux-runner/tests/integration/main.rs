// Copyright (c) The testmux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod basic;
mod config_file;
mod fixtures;
mod legacy;
