use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};

use crate::build::Orchestrator;
use crate::error::{BuildError, WatchError};
use crate::queue::{PathMapper, RebuildTarget, WatchQueue};

const ENOSPC: i32 = 28;
const EMFILE: i32 = 24;

enum Message {
    Events(DebounceEventResult),
    Done(RebuildTarget, Result<Vec<String>, BuildError>),
}

/// Watch handle or descriptor exhaustion is fatal, the user has to raise
/// the limit and restart.
fn classify(error: notify::Error, root: &Utf8Path) -> WatchError {
    let exhausted = match &error.kind {
        notify::ErrorKind::MaxFilesWatch => true,
        notify::ErrorKind::Io(e) => matches!(e.raw_os_error(), Some(ENOSPC | EMFILE)),
        _ => false,
    };

    if exhausted {
        WatchError::Exhausted(root.to_owned())
    } else {
        WatchError::Notify(error)
    }
}

fn changed_paths(events: &[notify_debouncer_full::DebouncedEvent]) -> Vec<Utf8PathBuf> {
    let mut paths: Vec<Utf8PathBuf> = events
        .iter()
        .filter(|de| {
            matches!(
                de.event.kind,
                EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
            )
        })
        .flat_map(|de| &de.event.paths)
        .filter_map(|path: &PathBuf| Utf8PathBuf::try_from(path.clone()).ok())
        .collect();

    paths.sort();
    paths.dedup();
    paths
}

/// Builds everything once, then rebuilds whatever changes until the watcher
/// fails. Rebuild failures are reported and the watcher keeps running.
pub fn watch(orchestrator: &mut Orchestrator) -> Result<(), WatchError> {
    let packages_root = orchestrator.config().packages_root();
    let routes_root = orchestrator.config().routes_root();

    let (tx, rx) = channel();
    let events = tx.clone();
    let mut debouncer = new_debouncer(Duration::from_millis(250), None, move |result| {
        let _ = events.send(Message::Events(result));
    })?;

    for root in [&packages_root, &routes_root] {
        if !root.is_dir() {
            continue;
        }

        debouncer
            .watch(root.as_std_path(), RecursiveMode::Recursive)
            .map_err(|e| classify(e, root))?;
    }

    match orchestrator.build_all() {
        Ok(_) => {}
        Err(e @ (BuildError::Graph(_) | BuildError::Manifest(_))) => return Err(e.into()),
        Err(e) => tracing::error!("initial build failed, waiting for changes:\n{e}"),
    }

    let mapper = PathMapper::new(orchestrator.catalog(), orchestrator.routes());

    thread::scope(|scope| {
        let (job_tx, job_rx) = channel::<RebuildTarget>();

        scope.spawn(move || worker(orchestrator, job_rx, tx));

        let result = event_loop(&rx, &job_tx, &mapper, &packages_root);
        drop(job_tx);
        result
    })
}

fn worker(orchestrator: &mut Orchestrator, jobs: Receiver<RebuildTarget>, done: Sender<Message>) {
    while let Ok(target) = jobs.recv() {
        let result = orchestrator.rebuild(&target);
        if done.send(Message::Done(target, result)).is_err() {
            break;
        }
    }
}

fn event_loop(
    rx: &Receiver<Message>,
    jobs: &Sender<RebuildTarget>,
    mapper: &PathMapper,
    root: &Utf8Path,
) -> Result<(), WatchError> {
    let mut queue = WatchQueue::new();

    loop {
        let next = match rx.recv().map_err(|_| WatchError::Disconnected)? {
            Message::Events(Ok(events)) => {
                let mut next = None;

                for path in changed_paths(&events) {
                    let Some(target) = mapper.target_for(&path) else {
                        tracing::debug!("ignoring {path}");
                        continue;
                    };

                    tracing::debug!("{path} -> {target}");
                    if let Some(target) = queue.notify(target) {
                        next = Some(target);
                    }
                }

                next
            }
            Message::Events(Err(errors)) => {
                for error in errors {
                    match classify(error, root) {
                        fatal @ WatchError::Exhausted(_) => return Err(fatal),
                        other => tracing::warn!("{other}"),
                    }
                }

                None
            }
            Message::Done(target, result) => {
                match result {
                    Ok(rebuilt) => tracing::info!("{target}: refreshed {} targets", rebuilt.len()),
                    Err(e) => tracing::error!("Encountered an error while rebuilding {target}:\n{e}"),
                }

                queue.complete()
            }
        };

        if let Some(target) = next {
            jobs.send(target).map_err(|_| WatchError::Disconnected)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::time::Instant;

    use notify::Event;
    use notify::event::ModifyKind;
    use notify_debouncer_full::DebouncedEvent;

    use super::*;
    use crate::compile::fixture::Workspace;

    fn changed(path: Utf8PathBuf) -> Message {
        let event = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(path.into_std_path_buf());
        Message::Events(Ok(vec![DebouncedEvent::new(event, Instant::now())]))
    }

    fn package(name: &str) -> RebuildTarget {
        RebuildTarget::Package(name.into())
    }

    #[test]
    fn test_changes_during_rebuild_coalesce() {
        let ws = Workspace::new();
        ws.write("packages/core/package.json", r#"{ "name": "@acme/core" }"#);
        ws.write("packages/ui/package.json", r#"{ "name": "@acme/ui" }"#);
        let (_, _, catalog, _) = ws.load();
        let mapper = PathMapper::new(&catalog, &[]);
        let root = ws.path("packages");

        let (tx, rx) = channel();
        let (job_tx, job_rx) = channel();

        tx.send(changed(ws.path("packages/core/src/index.js"))).unwrap();
        // Both arrive while core is rebuilding.
        tx.send(changed(ws.path("packages/ui/src/a.js"))).unwrap();
        tx.send(changed(ws.path("packages/ui/src/b.js"))).unwrap();
        tx.send(changed(ws.path("packages/core/package.json"))).unwrap();
        tx.send(Message::Done(package("@acme/core"), Ok(vec!["@acme/core".into()]))).unwrap();
        tx.send(Message::Done(package("@acme/ui"), Ok(vec!["@acme/ui".into()]))).unwrap();
        drop(tx);

        let result = event_loop(&rx, &job_tx, &mapper, &root);
        assert!(matches!(result, Err(WatchError::Disconnected)));

        drop(job_tx);
        let jobs: Vec<_> = job_rx.iter().collect();
        assert_eq!(jobs, vec![package("@acme/core"), package("@acme/ui")]);
    }

    #[test]
    fn test_failed_rebuild_keeps_watching() {
        let ws = Workspace::new();
        ws.write("packages/core/package.json", r#"{ "name": "@acme/core" }"#);
        let (_, _, catalog, _) = ws.load();
        let mapper = PathMapper::new(&catalog, &[]);
        let root = ws.path("packages");

        let (tx, rx) = channel();
        let (job_tx, job_rx) = channel();

        let failure = BuildError::Package("@acme/core".into(), anyhow::anyhow!("syntax error"));
        tx.send(changed(ws.path("packages/core/src/index.js"))).unwrap();
        tx.send(Message::Done(package("@acme/core"), Err(failure))).unwrap();
        tx.send(changed(ws.path("packages/core/src/index.js"))).unwrap();
        drop(tx);

        let result = event_loop(&rx, &job_tx, &mapper, &root);
        assert!(matches!(result, Err(WatchError::Disconnected)));

        drop(job_tx);
        let jobs: Vec<_> = job_rx.iter().collect();
        assert_eq!(jobs, vec![package("@acme/core"), package("@acme/core")]);
    }

    #[test]
    fn test_exhaustion_is_fatal() {
        let root = Utf8Path::new("/ws/packages");

        let max = notify::Error::new(notify::ErrorKind::MaxFilesWatch);
        assert!(matches!(classify(max, root), WatchError::Exhausted(_)));

        let enospc = notify::Error::io(io::Error::from_raw_os_error(ENOSPC));
        assert!(matches!(classify(enospc, root), WatchError::Exhausted(_)));

        let other = notify::Error::generic("boom");
        assert!(matches!(classify(other, root), WatchError::Notify(_)));
    }
}
