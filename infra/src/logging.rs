// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use tracing_subscriber::filter::targets::Targets;
use tracing_subscriber::prelude::*;

/// Configure structured (JSON) logging for a binary.
///
/// `debug` raises the default filter directive to `debug` when `RUST_LOG` is unset;
/// `RUST_LOG`, if set, always wins.
pub fn setup_logging(debug: bool) {
    // Note: This cannot use `EnvFilter` because EnvFilter filters globally even if it only
    // used in a tracing stack!
    let filter_layer = {
        let default_directive = if debug { "debug" } else { "info" };
        let directive = std::env::var("RUST_LOG")
            .ok()
            .unwrap_or_else(|| default_directive.to_owned());
        directive
            .parse::<Targets>()
            .expect("Failed to parse RUST_LOG")
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_filter(filter_layer);

    tracing_subscriber::registry().with(fmt_layer).init();
}
