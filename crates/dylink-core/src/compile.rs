//! Parallel compile stage: every source compiled into an object by one of
//! `worker_count` shells running at the same time.

use std::path::{Path, PathBuf};

use crate::artifacts;
use crate::config::BuildConfig;
use crate::error::{Error, Result, Stage};
use crate::partition::WorkerTask;
use crate::recipe::Recipe;
use crate::session::{SessionResult, SessionSpec, ShellSession};

/// Compile all of the recipe's sources in `dir`.
///
/// All sessions are started and fed before any is waited on. Afterwards
/// workers are checked in ascending id order and the first failing one is
/// reported; its output is saved to `log_cpu<id>.txt`.
///
/// Returns the object paths in source order.
pub fn compile_objects<R: Recipe + ?Sized>(
    recipe: &R,
    dir: &Path,
    worker_count: usize,
    config: &BuildConfig,
) -> Result<Vec<PathBuf>> {
    let spec = SessionSpec::for_recipe(recipe, dir, config);
    let tasks = WorkerTask::from_sources(recipe, worker_count);

    // Fan out
    let mut sessions = Vec::with_capacity(tasks.len());
    for task in &tasks {
        let mut session = ShellSession::start(task.worker, &spec)?;
        for command in &task.commands {
            session.submit(command);
        }
        sessions.push(session);
    }
    tracing::debug!(
        "started {} compile workers for {} sources",
        sessions.len(),
        recipe.sources().len()
    );

    // Fan in
    let results: Vec<Result<SessionResult>> =
        sessions.into_iter().map(ShellSession::finish).collect();

    for (worker, result) in results.into_iter().enumerate() {
        check_worker(dir, worker, Stage::Compile, result)?;
    }

    Ok(recipe.objects())
}

/// Turn a finished session into a verdict, saving the worker log on failure.
pub(crate) fn check_worker(
    dir: &Path,
    worker: usize,
    stage: Stage,
    result: Result<SessionResult>,
) -> Result<()> {
    let result = match result {
        Ok(result) => result,
        Err(err) => {
            if let Some(output) = err.captured_output() {
                artifacts::write_worker_log(dir, worker, output)?;
            }
            return Err(err);
        }
    };

    let Some((command, code)) = result.first_failure() else {
        return Ok(());
    };

    let log = artifacts::write_worker_log(dir, worker, &result.output)?;
    tracing::debug!(
        "worker #{} failed during {}: command {} exited with {}",
        worker,
        stage,
        command,
        code
    );

    Err(Error::CommandFailed {
        worker,
        stage,
        command,
        code,
        log,
        output: result.output,
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::platform::{Shell, ShellFlavor};
    use crate::recipe::{SourceFile, TemplateRecipe};
    use std::fs;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;

    fn recipe(object_command: &str, sources: &[&str]) -> TemplateRecipe {
        TemplateRecipe {
            shell: Shell::new("/bin/sh"),
            init_command: String::new(),
            object_command: object_command.to_string(),
            library_command: "cat {objects} > {library}".to_string(),
            target: "model".to_string(),
            object_ext: ".o".to_string(),
            library_ext: ".so".to_string(),
            sources: sources.iter().map(|s| SourceFile::new(*s)).collect(),
        }
    }

    fn config() -> BuildConfig {
        BuildConfig {
            flavor: ShellFlavor::Posix,
            ..Default::default()
        }
    }

    #[test]
    fn test_all_succeed() {
        let temp = TempDir::new().unwrap();
        let recipe = recipe("echo {source} > {object}", &["a.c", "b.c", "c.c", "d.c"]);

        let objects = compile_objects(&recipe, temp.path(), 2, &config()).unwrap();

        assert_eq!(objects.len(), 4);
        for object in &objects {
            assert!(temp.path().join(object).exists());
        }
        assert!(!artifacts::log_file(temp.path(), 0).exists());
        assert!(!artifacts::log_file(temp.path(), 1).exists());
        // Status files are cleaned up by the builder, not this stage
        assert!(artifacts::status_file(temp.path(), 0).exists());
    }

    #[test]
    fn test_single_failure_reported_with_log() {
        let temp = TempDir::new().unwrap();
        let recipe = recipe(
            "if [ {source} = c.c ]; then echo broken {source}; false; else touch {object}; fi",
            &["a.c", "b.c", "c.c", "d.c"],
        );

        // c.c is source 2, so it lands on worker 0 of 2
        let err = compile_objects(&recipe, temp.path(), 2, &config()).unwrap_err();
        match err {
            Error::CommandFailed {
                worker,
                stage,
                command,
                code,
                log,
                output,
            } => {
                assert_eq!(worker, 0);
                assert_eq!(stage, Stage::Compile);
                assert_eq!(command, 1);
                assert_eq!(code, 1);
                assert!(output.contains("broken c.c"));
                let saved = fs::read_to_string(log).unwrap();
                assert!(saved.contains("broken c.c"));
            }
            other => panic!("expected command failure, got {:?}", other),
        }
        assert!(!artifacts::log_file(temp.path(), 1).exists());
    }

    #[test]
    fn test_lowest_failing_worker_wins() {
        let temp = TempDir::new().unwrap();
        let recipe = recipe("echo failing {source}; false", &["a.c", "b.c", "c.c"]);

        let err = compile_objects(&recipe, temp.path(), 3, &config()).unwrap_err();
        assert_eq!(err.worker(), Some(0));
        assert!(artifacts::log_file(temp.path(), 0).exists());
        assert!(!artifacts::log_file(temp.path(), 1).exists());
    }

    #[test]
    fn test_empty_workers_are_not_failures() {
        let temp = TempDir::new().unwrap();
        let recipe = recipe("touch {object}", &["a.c", "b.c", "c.c"]);

        let objects = compile_objects(&recipe, temp.path(), 8, &config()).unwrap();
        assert_eq!(objects.len(), 3);
        for worker in 0..8 {
            assert!(artifacts::status_file(temp.path(), worker).exists());
            assert!(!artifacts::log_file(temp.path(), worker).exists());
        }
    }

    #[test]
    fn test_no_sources() {
        let temp = TempDir::new().unwrap();
        let recipe = recipe("touch {object}", &[]);

        let objects = compile_objects(&recipe, temp.path(), 2, &config()).unwrap();
        assert!(objects.is_empty());
    }

    #[test]
    fn test_workers_run_concurrently() {
        let temp = TempDir::new().unwrap();
        let recipe = recipe("sleep 1 && touch {object}", &["a.c", "b.c", "c.c", "d.c"]);

        let start = Instant::now();
        compile_objects(&recipe, temp.path(), 4, &config()).unwrap();

        // Serial execution would take at least 4 seconds
        assert!(start.elapsed() < Duration::from_millis(3500));
    }

    #[test]
    fn test_timeout_applies_to_each_worker_from_spawn() {
        let temp = TempDir::new().unwrap();
        let recipe = recipe(
            "if [ {source} = a.c ]; then sleep 0.6; else sleep 3; fi; touch {object}",
            &["a.c", "b.c"],
        );
        let config = config().with_timeout(Duration::from_millis(1200));

        // Worker 1 is waited on after worker 0, but its clock started at spawn
        let start = Instant::now();
        let err = compile_objects(&recipe, temp.path(), 2, &config).unwrap_err();

        assert!(start.elapsed() < Duration::from_millis(2500));
        match err {
            Error::Timeout { worker, .. } => assert_eq!(worker, 1),
            other => panic!("expected timeout, got {:?}", other),
        }
        assert!(temp.path().join("a.o").exists());
        assert!(!temp.path().join("b.o").exists());
    }

    #[test]
    fn test_shell_exit_logged_as_failure() {
        let temp = TempDir::new().unwrap();
        let recipe = recipe("echo leaving; exit 0", &["a.c"]);

        let err = compile_objects(&recipe, temp.path(), 1, &config()).unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { worker: 0, .. }));
        let saved = fs::read_to_string(artifacts::log_file(temp.path(), 0)).unwrap();
        assert!(saved.contains("leaving"));
    }
}
