use std::collections::BTreeSet;
use std::thread;

use clap::Parser;
use ssh_backup_lib::cli::{Action, Cli};
use ssh_backup_lib::config::EngineConfig;
use ssh_backup_lib::destinations::DriverFactory;
use ssh_backup_lib::notify::LogNotifier;
use ssh_backup_lib::remote::SshSessionFactory;
use ssh_backup_lib::runner::{RunState, Services, TaskRunner};
use ssh_backup_lib::store::JsonStore;

fn main() {
    let cli = Cli::parse();

    // init logger
    let mut env_logger = env_logger::builder();
    if let Some(level) = cli.verbose {
        env_logger.filter_level(level);
    }
    env_logger.try_init().expect("env_logger should not fail");

    let config = match EngineConfig::load_or_init(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };

    let store_path = cli.store.as_ref().unwrap_or(&config.store);
    let store = match JsonStore::open(store_path) {
        Ok(store) => store,
        Err(e) => {
            log::error!(target: "store", "Opening {} failed: {e}", store_path.display());
            return;
        }
    };

    let sessions = SshSessionFactory;
    let destinations = DriverFactory {
        store: &store,
        sessions: &sessions,
        default_auth: config.ssh.auth(),
        connect_timeout: config.connect_timeout(),
    };
    let notifier = LogNotifier;
    let services = Services {
        store: &store,
        sessions: &sessions,
        destinations: &destinations,
        notifier: &notifier,
        config: &config,
    };

    let Action::Run { task_ids } = cli.action;
    // a task never runs twice at once
    let task_ids: BTreeSet<_> = task_ids.into_iter().collect();

    thread::scope(|scope| {
        let runs: Vec<_> = task_ids
            .into_iter()
            .map(|task_id| {
                let run = thread::Builder::new()
                    .name(format!("task-{task_id}"))
                    .spawn_scoped(scope, move || TaskRunner::new(services).handle(task_id));
                (task_id, run)
            })
            .collect();

        for (task_id, run) in runs {
            match run.map(|handle| handle.join()) {
                Ok(Ok(RunState::Finalized)) => {
                    log::info!(target: "runner", "Backup task {task_id} done")
                }
                Ok(Ok(state)) => {
                    log::error!(target: "runner", "Backup task {task_id} stopped while {state}")
                }
                Ok(Err(_)) => log::error!(target: "runner", "Backup task {task_id} panicked"),
                Err(e) => {
                    log::error!(target: "runner", "Spawning a thread for backup task {task_id} failed: {e}")
                }
            }
        }
    });
}
