//! `kpm commit`, `kpm push` and `kpm pull`.

use super::{fail, print_json};
use kpm_core::repository::{open_publisher, Direction, FileSystemPublisher};
use kpm_core::{CommitOutcome, Config, TransmitOutcome};
use miette::Result;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct SyncResult<'a, T: Serialize> {
    ok: bool,
    command: &'a str,
    repository: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote: Option<&'a str>,
    outcome: T,
}

pub fn commit(config: &Config, repo: &Path, json: bool) -> Result<()> {
    let publisher = FileSystemPublisher::new(repo);
    let outcome = match kpm_core::commit(&publisher, &config.lock) {
        Ok(outcome) => outcome,
        Err(e) => return fail("commit", e, json),
    };

    if json {
        return print_json(&SyncResult {
            ok: true,
            command: "commit",
            repository: repo.display().to_string(),
            remote: None,
            outcome,
        });
    }

    match outcome {
        CommitOutcome::UpToDate => println!("Nothing to commit in {}", repo.display()),
        CommitOutcome::Committed {
            index,
            added,
            removed,
        } => println!(
            "Committed change {index} in {}: {added} added, {removed} removed",
            repo.display()
        ),
    }
    Ok(())
}

pub fn push(config: &Config, local: &Path, remote: &str, json: bool) -> Result<()> {
    transmit(Direction::Push, config, local, remote, json)
}

pub fn pull(config: &Config, local: &Path, remote: &str, json: bool) -> Result<()> {
    transmit(Direction::Pull, config, local, remote, json)
}

fn transmit(
    direction: Direction,
    config: &Config,
    local: &Path,
    remote: &str,
    json: bool,
) -> Result<()> {
    let command = direction.as_str();
    let publisher = FileSystemPublisher::new(local);
    let result = open_publisher(remote).and_then(|other| match direction {
        Direction::Push => kpm_core::push(&publisher, other.as_ref(), &config.lock),
        Direction::Pull => kpm_core::pull(&publisher, other.as_ref(), &config.lock),
    });
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => return fail(command, e, json),
    };

    if json {
        return print_json(&SyncResult {
            ok: true,
            command,
            repository: local.display().to_string(),
            remote: Some(remote),
            outcome,
        });
    }

    let (verb, preposition) = match direction {
        Direction::Push => ("Pushed", "to"),
        Direction::Pull => ("Pulled", "from"),
    };
    match outcome {
        TransmitOutcome::UpToDate => println!("{} is up to date with {remote}", local.display()),
        TransmitOutcome::Transmitted {
            index,
            added,
            removed,
        } => println!(
            "{verb} {added} added, {removed} removed {preposition} {remote} (change {index})"
        ),
    }
    Ok(())
}
