/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use anyhow::Result;
use dbgc_cli::{cli_main, init_env_logger};

fn main() -> Result<()> {
    init_env_logger()?;
    cli_main(std::env::args_os())
}
