use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::LevelFilter;

use crate::model::TaskId;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Engine config file. Written with defaults if it doesn't exist.
    #[arg(long, short = 'c', env = "SSH_BACKUP_CONFIG", default_value = "ssh_backup.toml")]
    pub config: PathBuf,

    /// State file holding tasks, servers and destinations. Overrides the
    /// `store` setting of the config.
    #[arg(long, short = 's', env = "SSH_BACKUP_STORE")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub action: Action,
}

#[derive(Subcommand, Debug)]
pub enum Action {
    /// Run the given backup tasks, each on its own thread.
    Run {
        /// Ids of the tasks to run.
        #[arg(required = true, num_args = 1..)]
        task_ids: Vec<TaskId>,
    },
}
