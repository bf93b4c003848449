//! Provisioning and teardown pipelines.
//!
//! `up` walks [`Step::PIPELINE`]; each step declares whether its failure is
//! fatal and which completed steps a fatal failure undoes. Teardown probes
//! every resource by name and keeps going past individual failures.

use crate::concurrency::{shutdown_requested, ProjectLock};
use crate::hooks::{run_hooks, EnvContext};
use crate::identity::{Environment, LiveEnvironment, Resolver};
use crate::lifecycle::{EnvState, Lifecycle};
use crate::ports::{allocate, PortSet, Sibling};
use crate::tracker::IssueTracker;
use crate::vcs::{BranchSource, Vcs};
use crate::CoreError;
use serde::Serialize;
use sprig_adapters::{
    container_names, create_containers, database_name, delete_containers, select_browser,
    select_database, select_migrator, select_storage, AdapterError, BrowserBackend, Capability,
    DatabaseBackend, DbConnection, DebugEndpoint, DebugRegistry, DropOutcome, MigrationEnv,
    Migrator, StorageBackend, StorageConnection,
};
use sprig_schema::{Config, HookStage};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Editor debug configuration written next to the sources.
const DEBUG_CONFIG_PATH: &str = ".vscode/launch.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    Fatal,
    BestEffort,
}

/// One stage of the provisioning pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    InfraReady,
    PreSetupHook,
    Worktree,
    Database,
    PostDatabaseHook,
    Storage,
    Build,
    Migrations,
    PostMigrateHook,
    CopyFiles,
    PostSetupHook,
    TerminalTitle,
    Browser,
    AutoOpen,
}

impl Step {
    pub const PIPELINE: [Step; 14] = [
        Step::InfraReady,
        Step::PreSetupHook,
        Step::Worktree,
        Step::Database,
        Step::PostDatabaseHook,
        Step::Storage,
        Step::Build,
        Step::Migrations,
        Step::PostMigrateHook,
        Step::CopyFiles,
        Step::PostSetupHook,
        Step::TerminalTitle,
        Step::Browser,
        Step::AutoOpen,
    ];

    pub fn policy(self) -> Policy {
        match self {
            Step::InfraReady | Step::Worktree | Step::Database | Step::Build | Step::Migrations => {
                Policy::Fatal
            }
            _ => Policy::BestEffort,
        }
    }

    /// Completed steps a fatal failure of this step undoes, in pipeline order.
    pub fn rolls_back(self) -> &'static [Step] {
        match self {
            Step::Database => &[Step::Worktree],
            Step::Build | Step::Migrations => &[Step::Worktree, Step::Database],
            _ => &[],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Step::InfraReady => "database server",
            Step::PreSetupHook => "pre-setup hook",
            Step::Worktree => "worktree",
            Step::Database => "database",
            Step::PostDatabaseHook => "post-database hook",
            Step::Storage => "storage containers",
            Step::Build => "build",
            Step::Migrations => "migrations",
            Step::PostMigrateHook => "post-migrate hook",
            Step::CopyFiles => "copy files",
            Step::PostSetupHook => "post-setup hook",
            Step::TerminalTitle => "terminal title",
            Step::Browser => "browser",
            Step::AutoOpen => "open",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Started,
    Done(Option<String>),
    Skipped(String),
    Warning(String),
    Failed(String),
}

/// Progress notifications for whoever renders them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Step { step: Step, status: StepStatus },
    /// A rollback action is about to run.
    Undo(String),
    /// A teardown action completed.
    Removed(String),
    Warning(String),
    /// Suggested terminal title for the new environment.
    Title(String),
}

pub trait Observer {
    fn event(&self, event: &Event);
}

/// Observer that discards everything.
pub struct Silent;

impl Observer for Silent {
    fn event(&self, _event: &Event) {}
}

/// Backends selected once from configuration.
pub struct Adapters {
    pub database: Box<dyn DatabaseBackend>,
    pub migrator: Option<Box<dyn Migrator>>,
    pub storage: Option<Box<dyn StorageBackend>>,
    pub browser: Option<Box<dyn BrowserBackend>>,
}

impl Adapters {
    pub fn from_config(config: &Config, state_dir: &Path) -> Result<Self, CoreError> {
        Ok(Self {
            database: select_database(&config.database().backend, state_dir)?,
            migrator: config
                .migrations()
                .map(|m| select_migrator(m, state_dir))
                .transpose()?,
            storage: config
                .storage()
                .map(|s| select_storage(&s.backend, state_dir))
                .transpose()?,
            browser: config
                .browser()
                .map(|b| select_browser(&b.backend, state_dir))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpOptions {
    /// Run auto-open commands after provisioning.
    pub open: bool,
    /// Replaces the configured `[open] commands` when set.
    pub open_command: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpReport {
    pub env: Environment,
    pub ports: PortSet,
    pub debug_port: Option<u16>,
    pub database: String,
    pub containers: Vec<String>,
    pub browser_started: bool,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownReport {
    pub env: Environment,
    pub removed: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum DownOutcome {
    /// Nothing matched the query; nothing was touched.
    NotFound(String),
    Removed(DownReport),
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowserSession {
    pub env: String,
    pub debug_port: u16,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvStatus {
    pub name: String,
    pub branch: String,
    pub worktree: PathBuf,
    pub ports: Option<PortSet>,
    pub debug_port: Option<u16>,
    pub database: String,
    /// `None` when the database server could not be asked.
    pub database_exists: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrateAction {
    Run,
    Add(String),
    Remove,
    List,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrateOutcome {
    Applied,
    Added(String),
    Removed,
    Listed(Vec<String>),
    /// The configured tool has no such operation.
    NotSupported(String),
}

enum StepOutcome {
    Done(Option<String>),
    Skipped(String),
    Warned(String),
}

/// Something a fatal failure may have to undo.
enum Undo {
    Worktree {
        path: PathBuf,
        branch: String,
        created_branch: bool,
    },
    Database(String),
}

impl Undo {
    fn step(&self) -> Step {
        match self {
            Undo::Worktree { .. } => Step::Worktree,
            Undo::Database(_) => Step::Database,
        }
    }
}

struct Run<'o> {
    ctx: EnvContext,
    options: &'o UpOptions,
    lock: Option<ProjectLock>,
    completed: Vec<Undo>,
    containers: Vec<String>,
    browser_started: bool,
    warnings: Vec<String>,
}

pub struct Orchestrator<'a> {
    config: &'a Config,
    vcs: &'a dyn Vcs,
    tracker: &'a dyn IssueTracker,
    adapters: Adapters,
    observer: &'a dyn Observer,
    state_dir: PathBuf,
    source: PathBuf,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a Config,
        vcs: &'a dyn Vcs,
        tracker: &'a dyn IssueTracker,
        adapters: Adapters,
        observer: &'a dyn Observer,
    ) -> Result<Self, CoreError> {
        Ok(Self {
            state_dir: state_dir(vcs)?,
            source: vcs.main_root().to_path_buf(),
            config,
            vcs,
            tracker,
            adapters,
            observer,
        })
    }

    /// Checkout new branches start from and `pre-setup` runs in. Defaults to
    /// the primary checkout.
    #[must_use]
    pub fn with_source(mut self, source: PathBuf) -> Self {
        self.source = source;
        self
    }

    pub fn config(&self) -> &Config {
        self.config
    }

    pub fn vcs(&self) -> &dyn Vcs {
        self.vcs
    }

    pub fn tracker(&self) -> &dyn IssueTracker {
        self.tracker
    }

    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(self.config, self.vcs, self.tracker)
    }

    pub(crate) fn emit(&self, event: Event) {
        self.observer.event(&event);
    }

    fn emit_step(&self, step: Step, status: StepStatus) {
        self.emit(Event::Step { step, status });
    }

    fn conn(&self) -> DbConnection {
        DbConnection::from_section(self.config.database())
    }

    fn storage_conn(&self) -> StorageConnection {
        self.config
            .storage()
            .map(StorageConnection::from_section)
            .unwrap_or_default()
    }

    fn registry(&self) -> Option<DebugRegistry> {
        self.config.registry_path().map(DebugRegistry::new)
    }

    fn context(&self, env: Environment, ports: PortSet) -> Result<EnvContext, CoreError> {
        Ok(EnvContext {
            database: database_name(&self.config.database_prefix(), &env.name),
            debug_port: ports.debug_port(self.config.debug_port_base())?,
            source: self.source.clone(),
            env,
            ports,
        })
    }

    fn context_for(&self, live: &LiveEnvironment, siblings: &[Sibling]) -> Result<EnvContext, CoreError> {
        let ports = allocate(
            siblings,
            &live.env.name,
            self.config.ports(),
            self.config.project_name(),
        )?;
        self.context(live.env.clone(), ports)
    }

    fn siblings(&self) -> Result<(Vec<LiveEnvironment>, Vec<Sibling>), CoreError> {
        let live = self.resolver().live()?;
        let siblings = live.iter().map(LiveEnvironment::sibling).collect();
        Ok((live, siblings))
    }

    /// Provision a new environment from a branch name or issue number.
    pub fn up(&self, raw: &str, options: &UpOptions) -> Result<UpReport, CoreError> {
        let mut lifecycle = Lifecycle::new(EnvState::Requested);
        let env = self.resolver().resolve(raw)?;
        lifecycle.advance(EnvState::Resolved)?;

        if env.worktree.exists() {
            return Err(CoreError::Conflict(format!(
                "{} already exists",
                env.worktree.display()
            )));
        }

        let lock = ProjectLock::acquire(&ProjectLock::path(&self.state_dir))?;
        let (live, siblings) = self.siblings()?;
        if live.iter().any(|l| l.env.name == env.name) {
            return Err(CoreError::Conflict(format!(
                "environment '{}' already exists",
                env.name
            )));
        }
        let ports = allocate(
            &siblings,
            &env.name,
            self.config.ports(),
            self.config.project_name(),
        )?;
        info!(
            "provisioning {} on ports {}/{}/{}",
            env.name, ports.https, ports.http, ports.vite
        );

        let mut run = Run {
            ctx: self.context(env, ports)?,
            options,
            lock: Some(lock),
            completed: Vec::new(),
            containers: Vec::new(),
            browser_started: false,
            warnings: Vec::new(),
        };
        lifecycle.advance(EnvState::Provisioning)?;

        for step in Step::PIPELINE {
            if shutdown_requested() {
                return Err(self.abort(step, CoreError::Interrupted, run, &mut lifecycle));
            }
            self.emit_step(step, StepStatus::Started);
            match self.perform(step, &mut run) {
                Ok(StepOutcome::Done(detail)) => self.emit_step(step, StepStatus::Done(detail)),
                Ok(StepOutcome::Skipped(reason)) => {
                    self.emit_step(step, StepStatus::Skipped(reason));
                }
                Ok(StepOutcome::Warned(message)) => {
                    warn!("{step}: {message}");
                    run.warnings.push(format!("{step}: {message}"));
                    self.emit_step(step, StepStatus::Warning(message));
                }
                Err(e) if step.policy() == Policy::BestEffort => {
                    let message = best_effort_message(&e);
                    warn!("{step}: {message}");
                    run.warnings.push(format!("{step}: {message}"));
                    self.emit_step(step, StepStatus::Warning(message));
                }
                Err(e) => return Err(self.abort(step, e, run, &mut lifecycle)),
            }
        }
        lifecycle.advance(EnvState::Active)?;

        let debug_port = self.config.browser().map(|_| run.ctx.debug_port);
        Ok(UpReport {
            database: run.ctx.database.clone(),
            ports: run.ctx.ports,
            env: run.ctx.env,
            debug_port,
            containers: run.containers,
            browser_started: run.browser_started,
            warnings: run.warnings,
        })
    }

    /// Report the failure, undo what it requires, and produce the error the
    /// caller surfaces. An interrupt undoes every completed step.
    fn abort(
        &self,
        step: Step,
        error: CoreError,
        run: Run<'_>,
        lifecycle: &mut Lifecycle,
    ) -> CoreError {
        let interrupted = matches!(error, CoreError::Interrupted);
        self.emit_step(step, StepStatus::Failed(error.to_string()));
        if let Err(e) = lifecycle.advance(EnvState::RollingBack) {
            warn!("{e}");
        }
        let wanted = step.rolls_back();
        for undo in run.completed.into_iter().rev() {
            if interrupted || wanted.contains(&undo.step()) {
                self.undo(undo);
            }
        }
        if let Err(e) = lifecycle.advance(EnvState::Removed) {
            warn!("{e}");
        }
        drop(run.lock);
        if interrupted {
            error
        } else {
            CoreError::StepFailed {
                step,
                source: Box::new(error),
            }
        }
    }

    fn undo(&self, undo: Undo) {
        match undo {
            Undo::Worktree {
                path,
                branch,
                created_branch,
            } => {
                self.emit(Event::Undo(format!("removing worktree {}", path.display())));
                if let Err(e) = self.vcs.remove_worktree(&path, true) {
                    self.rollback_warning(&format!("remove worktree {}", path.display()), &e);
                }
                if created_branch {
                    self.emit(Event::Undo(format!("deleting branch {branch}")));
                    if let Err(e) = self.vcs.delete_branch(&branch, true) {
                        self.rollback_warning(&format!("delete branch {branch}"), &e);
                    }
                }
            }
            Undo::Database(name) => {
                self.emit(Event::Undo(format!("dropping database {name}")));
                if let Err(e) = self.adapters.database.drop_database(&name, &self.conn()) {
                    self.rollback_warning(&format!("drop database {name}"), &CoreError::from(e));
                }
            }
        }
    }

    fn rollback_warning(&self, action: &str, error: &CoreError) {
        warn!("rollback could not {action}: {error}");
        self.emit(Event::Warning(format!(
            "rollback could not {action}: {error}; clean it up by hand"
        )));
    }

    fn perform(&self, step: Step, run: &mut Run<'_>) -> Result<StepOutcome, CoreError> {
        let ctx = &run.ctx;
        let worktree = ctx.env.worktree.clone();
        match step {
            Step::InfraReady => {
                let wait = Duration::from_secs(self.config.database().wait_seconds);
                self.adapters.database.wait_ready(&self.conn(), wait)?;
                Ok(StepOutcome::Done(None))
            }
            Step::PreSetupHook => self.hook(HookStage::PreSetup, &ctx.source, ctx),
            Step::Worktree => {
                let branch = ctx.env.branch.as_str();
                let source = if self.vcs.local_branch_exists(branch)? {
                    BranchSource::Local
                } else if let Some(remote) = self.vcs.remote_branch(branch)? {
                    BranchSource::Remote(remote)
                } else {
                    BranchSource::New {
                        from: self.vcs.head(&ctx.source)?,
                    }
                };
                self.vcs.add_worktree(&worktree, branch, &source)?;
                run.completed.push(Undo::Worktree {
                    path: worktree.clone(),
                    branch: branch.to_owned(),
                    created_branch: source != BranchSource::Local,
                });
                // allocation is visible to others once the worktree exists
                run.lock = None;
                Ok(StepOutcome::Done(Some(worktree.display().to_string())))
            }
            Step::Database => {
                let db = ctx.database.clone();
                self.adapters.database.create_database(&db, &self.conn())?;
                run.completed.push(Undo::Database(db.clone()));
                Ok(StepOutcome::Done(Some(db)))
            }
            Step::PostDatabaseHook => self.hook(HookStage::PostDatabase, &worktree, ctx),
            Step::Storage => {
                let (Some(storage), Some(section)) = (&self.adapters.storage, self.config.storage())
                else {
                    return Ok(StepOutcome::Skipped("no [storage] section".to_owned()));
                };
                let results = create_containers(
                    storage.as_ref(),
                    &section.containers,
                    &ctx.env.name,
                    &self.storage_conn(),
                );
                let mut failures = Vec::new();
                for r in results {
                    match r.result {
                        Ok(()) => run.containers.push(r.container),
                        Err(e) => failures.push(format!(
                            "{}: {}",
                            r.container,
                            best_effort_message(&CoreError::from(e))
                        )),
                    }
                }
                if failures.is_empty() {
                    Ok(StepOutcome::Done(Some(run.containers.join(", "))))
                } else {
                    Ok(StepOutcome::Warned(failures.join("; ")))
                }
            }
            Step::Build => match self.config.build_command() {
                Some(command) => {
                    ctx.run_command("build", command, &worktree)?;
                    Ok(StepOutcome::Done(None))
                }
                None => Ok(StepOutcome::Skipped("no build command".to_owned())),
            },
            Step::Migrations => {
                let Some(migrator) = &self.adapters.migrator else {
                    return Ok(StepOutcome::Skipped("no [migrations] section".to_owned()));
                };
                let url = self.adapters.database.url(&ctx.database, &self.conn());
                let env = MigrationEnv {
                    name: &ctx.env.name,
                    database_url: &url,
                };
                migrator.run(&worktree, &env)?;
                Ok(StepOutcome::Done(Some(migrator.name().to_owned())))
            }
            Step::PostMigrateHook => self.hook(HookStage::PostMigrate, &worktree, ctx),
            Step::CopyFiles => self.copy_files(ctx),
            Step::PostSetupHook => self.hook(HookStage::PostSetup, &worktree, ctx),
            Step::TerminalTitle => {
                self.emit(Event::Title(format!(
                    "{}: {}",
                    self.config.project_name(),
                    ctx.env.name
                )));
                Ok(StepOutcome::Done(None))
            }
            Step::Browser => match self.start_browser(ctx)? {
                None => Ok(StepOutcome::Skipped("no [browser] section".to_owned())),
                Some(Err(conflict)) => Ok(StepOutcome::Warned(conflict)),
                Some(Ok(session)) => {
                    run.browser_started = true;
                    Ok(StepOutcome::Done(Some(format!(
                        "debug port {}",
                        session.debug_port
                    ))))
                }
            },
            Step::AutoOpen => {
                if !run.options.open {
                    return Ok(StepOutcome::Skipped("not requested".to_owned()));
                }
                let commands = match &run.options.open_command {
                    Some(c) => vec![c.clone()],
                    None => self.config.open_commands().to_vec(),
                };
                if commands.is_empty() {
                    return Ok(StepOutcome::Skipped("no [open] commands".to_owned()));
                }
                let failures: Vec<String> = commands
                    .iter()
                    .filter_map(|c| {
                        ctx.run_command("open", c, &worktree)
                            .err()
                            .map(|e| format!("{c}: {e}"))
                    })
                    .collect();
                if failures.is_empty() {
                    Ok(StepOutcome::Done(None))
                } else {
                    Ok(StepOutcome::Warned(failures.join("; ")))
                }
            }
        }
    }

    fn hook(&self, stage: HookStage, cwd: &Path, ctx: &EnvContext) -> Result<StepOutcome, CoreError> {
        match run_hooks(self.config, stage, cwd, ctx)? {
            0 => Ok(StepOutcome::Skipped("no commands".to_owned())),
            n => Ok(StepOutcome::Done(Some(format!("{n} command(s)")))),
        }
    }

    fn copy_files(&self, ctx: &EnvContext) -> Result<StepOutcome, CoreError> {
        let copies = self.config.copies();
        if copies.is_empty() {
            return Ok(StepOutcome::Skipped("nothing configured".to_owned()));
        }
        let mut failures = Vec::new();
        let mut copied = 0usize;
        for entry in copies {
            let from = ctx.source.join(&entry.from);
            let to = ctx.env.worktree.join(entry.destination());
            let result = if from.is_file() {
                to.parent()
                    .map_or(Ok(()), fs::create_dir_all)
                    .and_then(|()| fs::copy(&from, &to).map(|_| ()))
                    .map_err(|e| e.to_string())
            } else {
                Err("source file not found".to_owned())
            };
            match result {
                Ok(()) => copied += 1,
                Err(e) => failures.push(format!("{}: {e}", entry.from)),
            }
        }
        if failures.is_empty() {
            Ok(StepOutcome::Done(Some(format!("{copied} file(s)"))))
        } else {
            Ok(StepOutcome::Warned(failures.join("; ")))
        }
    }

    /// `None` when no browser is configured, `Some(Err(reason))` on a
    /// conflicting instance.
    fn start_browser(
        &self,
        ctx: &EnvContext,
    ) -> Result<Option<Result<BrowserSession, String>>, CoreError> {
        let (Some(browser), Some(section)) = (&self.adapters.browser, self.config.browser()) else {
            return Ok(None);
        };
        if let Some(reason) = browser.check_conflicts()? {
            return Ok(Some(Err(reason)));
        }
        let url = ctx.expand(&section.start_url);
        let name = ctx.env.name.as_str();
        browser.start(name, ctx.debug_port, &url)?;
        browser.update_debug_config(&ctx.env.worktree, ctx.debug_port)?;
        if let Some(registry) = self.registry() {
            registry.register(DebugEndpoint {
                project: self.config.project_name().to_owned(),
                env: name.to_owned(),
                port: ctx.debug_port,
                backend: browser.name().to_owned(),
                worktree: ctx.env.worktree.clone(),
                registered_at: chrono::Utc::now().to_rfc3339(),
            })?;
        }
        Ok(Some(Ok(BrowserSession {
            env: name.to_owned(),
            debug_port: ctx.debug_port,
            url,
        })))
    }

    /// Tear down the environment matching `query`. Zero matches is a no-op.
    pub fn down(&self, query: &str, force: bool) -> Result<DownOutcome, CoreError> {
        match self.resolver().find(query)? {
            Some(live) => Ok(DownOutcome::Removed(self.teardown(&live, force)?)),
            None => {
                let message = format!("no environment matches '{query}'; nothing to do");
                warn!("{message}");
                self.emit(Event::Warning(message));
                Ok(DownOutcome::NotFound(query.to_owned()))
            }
        }
    }

    /// Remove every resource of `live`. Without `force`, refuses when the
    /// worktree has uncommitted changes or commits missing from mainline.
    pub fn teardown(&self, live: &LiveEnvironment, force: bool) -> Result<DownReport, CoreError> {
        let env = &live.env;
        let main = self.config.main_branch();
        if !force && env.worktree.exists() {
            let changed = self.user_changes(&env.worktree)?;
            if !changed.is_empty() {
                return Err(CoreError::Unsafe {
                    env: env.name.to_string(),
                    reason: format!("the worktree has uncommitted changes ({})", changed.join(", ")),
                });
            }
            let (ahead, _) = self.vcs.ahead_behind(main, &env.branch)?;
            if ahead > 0 {
                return Err(CoreError::Unsafe {
                    env: env.name.to_string(),
                    reason: format!("{ahead} commit(s) are not in '{main}'"),
                });
            }
        }

        let mut lifecycle = Lifecycle::new(EnvState::Active);
        lifecycle.advance(EnvState::TearingDown)?;
        let (_, siblings) = self.siblings()?;
        let ctx = self.context_for(live, &siblings)?;
        let mut report = DownReport {
            env: env.clone(),
            removed: Vec::new(),
            warnings: Vec::new(),
        };

        if env.worktree.exists() {
            if let Err(e) = run_hooks(self.config, HookStage::PreCleanup, &env.worktree, &ctx) {
                self.teardown_warning(&mut report, format!("pre-cleanup hook: {e}"));
            }
            // must run before the worktree is removed
            if let Some(browser) = &self.adapters.browser {
                match browser.clean_debug_config(&env.worktree) {
                    Ok(true) => self.teardown_removed(&mut report, "debug configuration".to_owned()),
                    Ok(false) => {}
                    Err(e) => self.teardown_warning(&mut report, format!("debug config: {e}")),
                }
            }
        }

        {
            let _lock = ProjectLock::acquire(&ProjectLock::path(&self.state_dir))?;
            // user changes were ruled out above unless forced
            match self.vcs.remove_worktree(&env.worktree, true) {
                Ok(()) => self.teardown_removed(
                    &mut report,
                    format!("worktree {}", env.worktree.display()),
                ),
                Err(e) => self.teardown_warning(&mut report, format!("worktree: {e}")),
            }
            self.remove_branch(env, &mut report);
        }

        match self.adapters.database.drop_database(&ctx.database, &self.conn()) {
            Ok(DropOutcome::Dropped) => {
                self.teardown_removed(&mut report, format!("database {}", ctx.database));
            }
            Ok(DropOutcome::Missing) => self.teardown_warning(
                &mut report,
                format!("database {} did not exist", ctx.database),
            ),
            Err(e) => self.teardown_warning(&mut report, format!("database: {e}")),
        }

        if let (Some(storage), Some(section)) = (&self.adapters.storage, self.config.storage()) {
            for r in delete_containers(
                storage.as_ref(),
                &section.containers,
                &env.name,
                &self.storage_conn(),
            ) {
                match r.result {
                    Ok(()) => self.teardown_removed(&mut report, format!("container {}", r.container)),
                    Err(e) => {
                        self.teardown_warning(&mut report, format!("container {}: {e}", r.container));
                    }
                }
            }
        }

        if let Some(browser) = &self.adapters.browser {
            match browser.stop(&env.name) {
                Ok(()) => self.teardown_removed(&mut report, "browser session".to_owned()),
                Err(e) => self.teardown_warning(&mut report, format!("browser: {e}")),
            }
            if let Some(registry) = self.registry() {
                if let Err(e) = registry.unregister(self.config.project_name(), &env.name) {
                    self.teardown_warning(&mut report, format!("debug registry: {e}"));
                }
            }
        }

        lifecycle.advance(EnvState::Removed)?;
        info!("tore down {}", env.name);
        Ok(report)
    }

    /// Uncommitted paths in `worktree`, minus the files sprig itself put
    /// there (copied files and the editor debug configuration).
    pub(crate) fn user_changes(&self, worktree: &Path) -> Result<Vec<String>, CoreError> {
        let generated: Vec<&str> = self
            .config
            .copies()
            .iter()
            .map(sprig_schema::CopyEntry::destination)
            .chain(std::iter::once(DEBUG_CONFIG_PATH))
            .collect();
        Ok(self
            .vcs
            .changed_paths(worktree)?
            .into_iter()
            .filter(|p| !generated.contains(&p.as_str()))
            .collect())
    }

    /// Delete the branch unless another worktree still has it checked out.
    fn remove_branch(&self, env: &Environment, report: &mut DownReport) {
        let branch = env.branch.as_str();
        let in_use = match self.vcs.worktrees() {
            Ok(wts) => wts.iter().any(|w| w.branch.as_deref() == Some(branch)),
            Err(e) => {
                self.teardown_warning(report, format!("branch {branch}: {e}"));
                return;
            }
        };
        if in_use {
            self.teardown_warning(
                report,
                format!("branch {branch} is checked out elsewhere; kept"),
            );
            return;
        }
        match self.vcs.local_branch_exists(branch) {
            Ok(false) => {}
            Ok(true) => match self.vcs.delete_branch(branch, true) {
                Ok(()) => self.teardown_removed(report, format!("branch {branch}")),
                Err(e) => self.teardown_warning(report, format!("branch {branch}: {e}")),
            },
            Err(e) => self.teardown_warning(report, format!("branch {branch}: {e}")),
        }
    }

    fn teardown_removed(&self, report: &mut DownReport, what: String) {
        self.emit(Event::Removed(what.clone()));
        report.removed.push(what);
    }

    fn teardown_warning(&self, report: &mut DownReport, message: String) {
        warn!("{message}");
        self.emit(Event::Warning(message.clone()));
        report.warnings.push(message);
    }

    /// Start (or restart) the browser debug session of an existing
    /// environment.
    pub fn browser(&self, query: &str) -> Result<BrowserSession, CoreError> {
        let live = self.resolver().require(query)?;
        let Some(browser) = &self.adapters.browser else {
            return Err(CoreError::Configuration(
                "no [browser] section in sprig.toml".to_owned(),
            ));
        };
        let (_, siblings) = self.siblings()?;
        let ctx = self.context_for(&live, &siblings)?;
        browser.stop(&live.env.name)?;
        match self.start_browser(&ctx)? {
            Some(Ok(session)) => Ok(session),
            Some(Err(conflict)) => Err(CoreError::Conflict(conflict)),
            None => Err(CoreError::Configuration(
                "no [browser] section in sprig.toml".to_owned(),
            )),
        }
    }

    /// Every live environment with its derived ports and database.
    pub fn list(&self) -> Result<Vec<EnvStatus>, CoreError> {
        let (live, siblings) = self.siblings()?;
        let conn = self.conn();
        let mut out = Vec::with_capacity(live.len());
        for l in &live {
            let database = database_name(&self.config.database_prefix(), &l.env.name);
            let ctx = self.context_for(l, &siblings).ok();
            out.push(EnvStatus {
                name: l.env.name.to_string(),
                branch: l.env.branch.to_string(),
                worktree: l.env.worktree.clone(),
                ports: ctx.as_ref().map(|c| c.ports),
                debug_port: self
                    .config
                    .browser()
                    .and_then(|_| ctx.as_ref().map(|c| c.debug_port)),
                database_exists: self
                    .adapters
                    .database
                    .database_exists(&database, &conn)
                    .ok(),
                database,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Run a migration operation against an existing environment.
    pub fn migrate(&self, query: &str, action: &MigrateAction) -> Result<MigrateOutcome, CoreError> {
        let Some(migrator) = &self.adapters.migrator else {
            return Err(CoreError::Configuration(
                "no [migrations] section in sprig.toml".to_owned(),
            ));
        };
        let live = self.resolver().require(query)?;
        let db = database_name(&self.config.database_prefix(), &live.env.name);
        let url = self.adapters.database.url(&db, &self.conn());
        let env = MigrationEnv {
            name: &live.env.name,
            database_url: &url,
        };
        let root = &live.env.worktree;
        let tool = migrator.name().to_owned();
        let outcome = match action {
            MigrateAction::Run => {
                migrator.run(root, &env)?;
                MigrateOutcome::Applied
            }
            MigrateAction::Add(name) => match migrator.add(root, &env, name)? {
                Capability::Supported(()) => MigrateOutcome::Added(name.clone()),
                Capability::NotSupported => MigrateOutcome::NotSupported(tool),
            },
            MigrateAction::Remove => match migrator.remove(root, &env)? {
                Capability::Supported(()) => MigrateOutcome::Removed,
                Capability::NotSupported => MigrateOutcome::NotSupported(tool),
            },
            MigrateAction::List => match migrator.list(root, &env)? {
                Capability::Supported(list) => MigrateOutcome::Listed(list),
                Capability::NotSupported => MigrateOutcome::NotSupported(tool),
            },
        };
        Ok(outcome)
    }

    /// Names of the storage containers `env` owns.
    pub fn containers_for(&self, env: &str) -> Vec<String> {
        self.config
            .storage()
            .map(|s| container_names(&s.containers, env))
            .unwrap_or_default()
    }
}

/// `<git-common-dir>/sprig`: lock file, mock state, browser profiles.
pub fn state_dir(vcs: &dyn Vcs) -> Result<PathBuf, CoreError> {
    Ok(vcs.common_dir()?.join("sprig"))
}

fn best_effort_message(error: &CoreError) -> String {
    match error {
        CoreError::Adapter(e @ AdapterError::ToolUnavailable { .. }) => {
            format!("{e}; skipped, complete this step by hand")
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_steps_are_the_resource_creators() {
        let fatal: Vec<Step> = Step::PIPELINE
            .into_iter()
            .filter(|s| s.policy() == Policy::Fatal)
            .collect();
        assert_eq!(
            fatal,
            [
                Step::InfraReady,
                Step::Worktree,
                Step::Database,
                Step::Build,
                Step::Migrations
            ]
        );
    }

    #[test]
    fn rollback_only_names_earlier_fatal_steps() {
        for (i, step) in Step::PIPELINE.iter().enumerate() {
            for undone in step.rolls_back() {
                let pos = Step::PIPELINE.iter().position(|s| s == undone).unwrap();
                assert!(pos < i, "{step} rolls back later step {undone}");
                assert_eq!(undone.policy(), Policy::Fatal);
            }
        }
    }

    #[test]
    fn best_effort_steps_roll_nothing_back() {
        for step in Step::PIPELINE {
            if step.policy() == Policy::BestEffort {
                assert!(step.rolls_back().is_empty(), "{step}");
            }
        }
    }

    #[test]
    fn missing_tool_on_best_effort_step_suggests_manual_recovery() {
        let err = CoreError::Adapter(AdapterError::ToolUnavailable {
            tool: "az".to_owned(),
            hint: "install azure-cli".to_owned(),
        });
        assert!(best_effort_message(&err).contains("by hand"));
    }
}
