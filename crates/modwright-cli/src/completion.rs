use std::io;

use clap::CommandFactory;
use clap_complete::{generate, Shell};

use crate::dispatch::Cli;

pub fn write_completions(shell: Shell, out: &mut dyn io::Write) {
    let mut command = Cli::command();
    generate(shell, &mut command, "modwright", out);
}
