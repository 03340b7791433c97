use crate::api::{ApiError, LoginRequest, MovieApi, MovieQuery, SignupRequest};
use crate::catalog::{self, UploadOutcome};
use crate::config::Config;
use crate::credentials::{CheckOutcome, CredentialCheck, ACCESS_DENIED, ACCOUNT_ACCESS_DENIED};
use crate::csvcheck::Validator;
use crate::dashboard::{self, Poller, Snapshot};
use crate::gate::{AuthGate, GateView};
use crate::journal::Journal;
use crate::keys::{BackendSync, DeleteOutcome, KeyRing};
use crate::prompt::Prompt;
use crate::render;
use crate::session::{Session, SessionStore};
use anyhow::{bail, Context as _, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const MIN_PASSWORD_CHARS: usize = 8;

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Sign in to the admin console with a UID or email
    Login {
        /// Credential to check; prompted for when omitted
        credential: Option<String>,
    },
    #[command(hide = true)]
    Administration,
    /// Clear the session, user, keys and flags
    Logout,
    /// Show session, user and active key
    Status,
    /// Backend account management
    #[command(subcommand)]
    Account(AccountCommand),
    /// API key management
    #[command(subcommand)]
    Keys(KeysCommand),
    /// Usage dashboard
    Dashboard {
        /// Keep polling until interrupted
        #[arg(long)]
        watch: bool,
        /// Stop watching after N updates
        #[arg(long, value_name = "N", requires = "watch")]
        count: Option<usize>,
    },
    /// Movie catalog
    #[command(subcommand)]
    Movies(MoviesCommand),
    /// List genres
    Genres,
    /// List release years
    Years,
    /// Catalog totals
    Stats,
}

#[derive(Subcommand, Debug, Clone)]
pub enum AccountCommand {
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "REEL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create a backend account
    Signup {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, env = "REEL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Permanently delete the signed-in account
    Delete,
}

#[derive(Subcommand, Debug, Clone)]
pub enum KeysCommand {
    /// List keys (masked unless revealed)
    List,
    /// Create a new key
    New,
    /// Toggle display of one key's value
    Reveal { id: String },
    /// Print a key's value, or send it to the terminal clipboard
    Copy {
        id: String,
        /// Use an OSC 52 escape instead of printing
        #[arg(long)]
        clipboard: bool,
    },
    /// Delete a key
    Delete { id: String },
}

#[derive(Subcommand, Debug, Clone)]
pub enum MoviesCommand {
    /// List one page of movies
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        genre: Option<String>,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        search: Option<String>,
    },
    /// Show one movie
    Show { id: i64 },
    /// Search titles
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
    },
    /// Update fields: movies edit 12 title="New title" year=2001
    Edit {
        id: i64,
        #[arg(required = true, num_args = 1..)]
        fields: Vec<String>,
    },
    /// Delete a movie
    Delete { id: i64 },
    /// Validate and upload a CSV file
    Upload {
        file: PathBuf,
        /// Validate only
        #[arg(long)]
        dry_run: bool,
    },
}

impl Command {
    /// Short name recorded in the journal. Never includes argument values.
    fn label(&self) -> &'static str {
        match self {
            Command::Login { .. } => "login",
            Command::Administration => "administration",
            Command::Logout => "logout",
            Command::Status => "status",
            Command::Account(AccountCommand::Login { .. }) => "account login",
            Command::Account(AccountCommand::Signup { .. }) => "account signup",
            Command::Account(AccountCommand::Delete) => "account delete",
            Command::Keys(KeysCommand::List) => "keys list",
            Command::Keys(KeysCommand::New) => "keys new",
            Command::Keys(KeysCommand::Reveal { .. }) => "keys reveal",
            Command::Keys(KeysCommand::Copy { .. }) => "keys copy",
            Command::Keys(KeysCommand::Delete { .. }) => "keys delete",
            Command::Dashboard { .. } => "dashboard",
            Command::Movies(MoviesCommand::List { .. }) => "movies list",
            Command::Movies(MoviesCommand::Show { .. }) => "movies show",
            Command::Movies(MoviesCommand::Search { .. }) => "movies search",
            Command::Movies(MoviesCommand::Edit { .. }) => "movies edit",
            Command::Movies(MoviesCommand::Delete { .. }) => "movies delete",
            Command::Movies(MoviesCommand::Upload { .. }) => "movies upload",
            Command::Genres => "genres",
            Command::Years => "years",
            Command::Stats => "stats",
        }
    }
}

/// One line typed at the shell, parsed with the same command tree.
#[derive(Parser, Debug)]
#[command(name = "reel", no_binary_name = true, disable_version_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: Command,
}

pub struct Context {
    pub config: Config,
    pub store: SessionStore,
    /// Shared with the dashboard poller thread
    pub api: Arc<dyn MovieApi + Send + Sync>,
    pub keys: KeyRing,
    pub journal: Journal,
    pub prompt: Box<dyn Prompt>,
    pub gate: AuthGate,
    pub data_dir: PathBuf,
    /// Key given with --api-key; wins over the stored active key
    pub override_key: Option<String>,
}

impl Context {
    pub fn new(
        config: Config,
        store: SessionStore,
        api: Arc<dyn MovieApi + Send + Sync>,
        journal: Journal,
        prompt: Box<dyn Prompt>,
        data_dir: PathBuf,
        override_key: Option<String>,
    ) -> Self {
        let keys = KeyRing::load(&store);
        let gate = AuthGate::new(config.session.ttl());
        let mut ctx = Self {
            config,
            store,
            api,
            keys,
            journal,
            prompt,
            gate,
            data_dir,
            override_key,
        };
        ctx.refresh_api_key();
        ctx
    }

    /// Point the client at the current key: --api-key, then the stored
    /// active key, then config/env.
    fn refresh_api_key(&mut self) {
        let key = self
            .override_key
            .clone()
            .or_else(|| self.store.active_key())
            .or_else(|| self.config.api.resolve_api_key());
        self.api.set_api_key(key);
    }

    /// Journal write failures are logged, never fatal.
    fn note(&mut self, write: impl FnOnce(&mut Journal) -> Result<()>) {
        if let Err(e) = write(&mut self.journal) {
            tracing::warn!(error = %e, "failed to write journal entry");
        }
    }

    fn user_id(&self) -> Option<String> {
        match self.store.user() {
            Ok(user) => user.map(|u| u.id),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable user record");
                None
            }
        }
    }

    /// Gate check for protected commands.
    fn require_session(&mut self) -> Result<Session> {
        match self.gate.evaluate(&mut self.store, Utc::now())? {
            GateView::Protected(session) => Ok(session),
            GateView::Restricted { login_revealed } => {
                if login_revealed {
                    bail!("Restricted: sign in with `login <uid-or-email>` or `account login`");
                }
                bail!("Restricted area")
            }
        }
    }
}

pub fn run_once(ctx: &mut Context, command: Command) -> Result<()> {
    execute(ctx, command)
}

pub fn run_repl(mut ctx: Context) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let history = ctx.data_dir.join("history.txt");
    if rl.load_history(&history).is_err() {
        tracing::debug!(path = %history.display(), "no shell history yet");
    }

    println!("reel - type help for commands, exit to quit");

    loop {
        match rl.readline("reel> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                rl.add_history_entry(line)?;

                if line == "exit" || line == "quit" {
                    break;
                }

                let words = match shell_words::split(line) {
                    Ok(words) => words,
                    Err(e) => {
                        eprintln!("Error: {}", e);
                        continue;
                    }
                };
                let parsed = match ShellLine::try_parse_from(words) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        let _ = e.print();
                        continue;
                    }
                };

                if let Err(e) = execute(&mut ctx, parsed.command) {
                    eprintln!("Error: {:#}", e);
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Input error: {}", e);
                break;
            }
        }
    }

    if let Err(e) = rl.save_history(&history) {
        tracing::warn!(error = %e, "failed to save shell history");
    }
    Ok(())
}

fn execute(ctx: &mut Context, command: Command) -> Result<()> {
    tracing::debug!(command = command.label(), run_id = %ctx.journal.run_id(), "executing");
    let label = command.label();
    ctx.note(|j| j.command(label));

    let result = match command {
        Command::Login { credential } => admin_login(ctx, credential),
        Command::Administration => {
            ctx.gate.reveal_login(&mut ctx.store)?;
            println!("Admin sign-in enabled. Use `login <uid-or-email>`.");
            Ok(())
        }
        Command::Logout => logout(ctx),
        Command::Status => status(ctx),
        Command::Account(cmd) => account(ctx, cmd),
        Command::Keys(cmd) => keys(ctx, cmd),
        Command::Dashboard { watch, count } => show_dashboard(ctx, watch, count),
        Command::Movies(cmd) => movies(ctx, cmd),
        Command::Genres => {
            for genre in ctx.api.genres()? {
                println!("{}", genre);
            }
            Ok(())
        }
        Command::Years => {
            let years: Vec<String> = ctx.api.years()?.iter().map(i32::to_string).collect();
            println!("{}", years.join(" "));
            Ok(())
        }
        Command::Stats => {
            print!("{}", render::catalog_stats(&ctx.api.stats()?));
            Ok(())
        }
    };

    ctx.refresh_api_key();
    result
}

fn admin_login(ctx: &mut Context, credential: Option<String>) -> Result<()> {
    let input = match credential {
        Some(input) => input,
        None => ctx.prompt.ask("UID or email").unwrap_or_default(),
    };

    let outcome = CredentialCheck::new(&ctx.config.admin).submit(&input, &mut ctx.store, Utc::now());
    match outcome {
        Ok(CheckOutcome::Granted(session)) => {
            ctx.note(|j| j.session_issued(&session.subject_id, "credential"));
            println!(
                "Signed in as {} until {}",
                session.subject_email,
                session
                    .expires_at(ctx.config.session.ttl())
                    .format("%Y-%m-%d %H:%M UTC")
            );
            Ok(())
        }
        Ok(CheckOutcome::Denied) => {
            ctx.note(|j| j.session_denied("credential"));
            bail!(ACCESS_DENIED)
        }
        Err(e) => Err(e.into()),
    }
}

fn logout(ctx: &mut Context) -> Result<()> {
    ctx.store.clear_all()?;
    ctx.keys.reset();
    ctx.note(|j| j.logout());
    tracing::info!("signed out");
    println!("Signed out");
    Ok(())
}

fn status(ctx: &mut Context) -> Result<()> {
    let view = ctx.gate.evaluate(&mut ctx.store, Utc::now())?;
    println!("Backend: {}", ctx.api.base_url());
    match view.session() {
        Some(session) => println!(
            "Session: {} ({}), expires {}",
            session.subject_email,
            session.subject_id,
            session
                .expires_at(ctx.config.session.ttl())
                .format("%Y-%m-%d %H:%M UTC")
        ),
        None => println!("Session: none"),
    }
    match ctx.store.user()? {
        Some(user) => println!("Account: {} (id {})", user.email, user.id),
        None => println!("Account: not signed in"),
    }
    match ctx.api.api_key() {
        Some(key) => println!("Active key: fingerprint {}", crate::keys::fingerprint(&key)),
        None => println!("Active key: none"),
    }
    println!("Journal: {}", ctx.journal.path.display());
    Ok(())
}

fn read_password(ctx: &Context, given: Option<String>, label: &str) -> Result<String> {
    match given {
        Some(password) => Ok(password),
        None => ctx
            .prompt
            .ask(label)
            .context("password required (use --password or REEL_PASSWORD)"),
    }
}

fn account(ctx: &mut Context, command: AccountCommand) -> Result<()> {
    match command {
        AccountCommand::Login { email, password } => {
            let email = email.trim().to_string();
            let password = read_password(ctx, password, "Password")?;
            if email.is_empty() || password.is_empty() {
                bail!("Email and password are required");
            }

            let response = match ctx.api.login(&LoginRequest { email, password }) {
                Ok(response) => response,
                Err(ApiError::Unauthorized { status, message }) => {
                    tracing::debug!(status, %message, "backend refused sign-in");
                    ctx.note(|j| j.session_denied("account"));
                    bail!(ACCOUNT_ACCESS_DENIED)
                }
                Err(e) => return Err(e.into()),
            };

            let now = Utc::now();
            let user = response.user;
            ctx.store.save_user(&user)?;
            ctx.keys
                .adopt_server_values(&response.api_keys, &mut ctx.store, now)?;
            let session = Session::issue(&user.id, &user.email, now);
            ctx.store.save_session(&session)?;
            ctx.store.set_login_revealed(false)?;
            ctx.note(|j| j.session_issued(&user.id, "account"));
            tracing::info!(user = %user.id, "account session issued");

            // Key ids only come from the dashboard; needed for deletes.
            ctx.refresh_api_key();
            match ctx.api.dashboard(&user.id) {
                Ok(dashboard) => ctx
                    .keys
                    .sync_server(&dashboard.api_keys, &mut ctx.store, now)?,
                Err(e) => tracing::warn!(error = %e, "could not fetch key ids after login"),
            }

            println!(
                "{}",
                response
                    .message
                    .unwrap_or_else(|| format!("Signed in as {}", user.email))
            );
            Ok(())
        }
        AccountCommand::Signup {
            email,
            name,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => {
                    let first = read_password(ctx, None, "Password")?;
                    let second = read_password(ctx, None, "Confirm password")?;
                    if first != second {
                        bail!("Passwords do not match");
                    }
                    first
                }
            };
            if password.chars().count() < MIN_PASSWORD_CHARS {
                bail!("Password must be at least {} characters", MIN_PASSWORD_CHARS);
            }

            let response = ctx.api.signup(&SignupRequest {
                email: email.trim().to_string(),
                password,
                name,
            })?;
            if let Some(key) = response.api_key {
                ctx.keys
                    .adopt_server_values(&[key], &mut ctx.store, Utc::now())?;
            }
            println!(
                "{}",
                response
                    .message
                    .unwrap_or_else(|| "Account created".to_string())
            );
            println!("Sign in with `account login --email {}`", email.trim());
            Ok(())
        }
        AccountCommand::Delete => {
            let user = ctx
                .store
                .user()?
                .context("No account is signed in; use `account login`")?;
            if !ctx.prompt.confirm(&format!(
                "Delete account {}? This cannot be undone.",
                user.email
            )) {
                println!("Cancelled");
                return Ok(());
            }
            if ctx.prompt.ask("Type DELETE to confirm").as_deref() != Some("DELETE") {
                println!("Cancelled");
                return Ok(());
            }

            ctx.api.delete_account(&user.id)?;
            ctx.store.clear_all()?;
            ctx.keys.reset();
            ctx.note(|j| j.account_deleted(&user.id));
            println!("Account deleted");
            Ok(())
        }
    }
}

fn keys(ctx: &mut Context, command: KeysCommand) -> Result<()> {
    ctx.require_session()?;
    let user_id = ctx.user_id();

    match command {
        KeysCommand::List => {}
        KeysCommand::New => {
            let outcome = ctx.keys.create(
                &*ctx.api,
                user_id.as_deref(),
                &ctx.config.keys.prefix,
                &mut ctx.store,
                Utc::now(),
                &mut rand::thread_rng(),
            )?;
            let key = outcome.key;
            let backend = outcome.backend.label();
            ctx.note(|j| j.key_event("create", &key.id, &key.value, backend));
            match &outcome.backend {
                BackendSync::Confirmed => println!("Created {} ({})", key.name, key.id),
                BackendSync::LocalOnly | BackendSync::Unresolved => eprintln!(
                    "Warning: no backend account is signed in; {} is a local key the backend will not accept",
                    key.id
                ),
                BackendSync::Failed(e) => {
                    let reason = if e.is_transport() {
                        "backend unreachable"
                    } else {
                        "backend refused"
                    };
                    eprintln!(
                        "Warning: {} ({}); {} is a local key the backend will not accept",
                        reason, e, key.id
                    )
                }
            }
        }
        KeysCommand::Reveal { id } => {
            let shown = ctx.keys.toggle_reveal(&id)?;
            println!("{} {}", id, if shown { "revealed" } else { "hidden" });
        }
        KeysCommand::Copy { id, clipboard } => {
            let value = ctx.keys.copy_value(&id)?.to_string();
            if clipboard {
                print!("{}", render::osc52(&value));
                eprintln!("Copied {} to the clipboard", id);
            } else {
                println!("{}", value);
            }
            return Ok(());
        }
        KeysCommand::Delete { id } => {
            let outcome = ctx.keys.delete(
                &id,
                &*ctx.api,
                user_id.as_deref(),
                ctx.prompt.as_ref(),
                &mut ctx.store,
            )?;
            match outcome {
                DeleteOutcome::Cancelled => println!("Cancelled"),
                DeleteOutcome::Removed { key, backend } => {
                    let label = backend.label();
                    ctx.note(|j| j.key_event("delete", &key.id, &key.value, label));
                    match &backend {
                        BackendSync::Failed(e) => eprintln!(
                            "Warning: backend delete failed ({}); removed {} locally only",
                            e, key.id
                        ),
                        BackendSync::Unresolved => eprintln!(
                            "Warning: the backend has no id for {}; removed locally only, it may still be active",
                            key.id
                        ),
                        BackendSync::Confirmed | BackendSync::LocalOnly => {}
                    }
                    println!("Deleted {}", key.id);
                }
            }
        }
    }

    let active = ctx.store.active_key();
    print!("{}", render::keys_table(&ctx.keys, active.as_deref()));
    Ok(())
}

fn show_dashboard(ctx: &mut Context, watch: bool, count: Option<usize>) -> Result<()> {
    ctx.require_session()?;
    let user_id = ctx
        .user_id()
        .context("No backend account is signed in; use `account login`")?;
    let key_count = ctx.keys.keys().len();

    if !watch {
        let snapshot = dashboard::load_once(
            &*ctx.api,
            &user_id,
            ctx.config.dashboard.demo_fallback,
            key_count,
        );
        return present_snapshot(ctx, snapshot, false);
    }

    let poller = Poller::spawn(Arc::clone(&ctx.api), user_id, &ctx.config.dashboard, key_count);
    let wait = Duration::from_millis(ctx.config.dashboard.max_backoff_ms)
        + ctx.config.api.timeout()
        + Duration::from_secs(1);

    let mut seen = 0;
    while count.map_or(true, |limit| seen < limit) {
        let Some(snapshot) = poller.recv_timeout(wait) else {
            tracing::warn!("dashboard poller stopped responding");
            break;
        };
        seen += 1;
        present_snapshot(ctx, snapshot, true)?;
    }
    poller.stop();
    Ok(())
}

fn present_snapshot(ctx: &mut Context, snapshot: Snapshot, watching: bool) -> Result<()> {
    match &snapshot {
        Snapshot::Failed { error, .. } if !watching => bail!("Dashboard unavailable: {}", error),
        Snapshot::Live {
            keys, fetched_at, ..
        } => ctx.keys.sync_server(keys, &mut ctx.store, *fetched_at)?,
        _ => {}
    }
    print!("{}", render::snapshot(&snapshot));
    Ok(())
}

fn movies(ctx: &mut Context, command: MoviesCommand) -> Result<()> {
    match command {
        MoviesCommand::List {
            page,
            limit,
            genre,
            year,
            search,
        } => {
            let query = MovieQuery {
                limit: limit.unwrap_or(ctx.config.catalog.page_size),
                genre,
                year,
                search,
                ..MovieQuery::page(page, ctx.config.catalog.page_size)
            };
            let (list, info) = catalog::fetch_page(&*ctx.api, &query)?;
            print!("{}", render::movie_table(&list.movies));
            println!("{}", render::page_line(&info));
        }
        MoviesCommand::Show { id } => {
            print!("{}", render::movie_detail(&ctx.api.get_movie(id)?));
        }
        MoviesCommand::Search { query } => {
            let result = catalog::search(&*ctx.api, &query.join(" "))?;
            print!("{}", render::movie_table(&result.movies));
            println!("{} result(s) for '{}'", result.count, result.query);
        }
        MoviesCommand::Edit { id, fields } => {
            ctx.require_session()?;
            let update = catalog::parse_update(&fields, Validator::current().max_year())?;
            let result = catalog::edit_movie(&*ctx.api, id, &update);
            let target = id.to_string();
            let ok = result.is_ok();
            ctx.note(|j| j.catalog_change("edit", &target, ok));
            let message = result?;
            println!(
                "{}",
                message
                    .message
                    .unwrap_or_else(|| format!("Movie {} updated", id))
            );
        }
        MoviesCommand::Delete { id } => {
            ctx.require_session()?;
            let result = catalog::delete_movie(&*ctx.api, id, ctx.prompt.as_ref());
            let target = id.to_string();
            match result {
                Ok(None) => println!("Cancelled"),
                Ok(Some(message)) => {
                    ctx.note(|j| j.catalog_change("delete", &target, true));
                    println!(
                        "{}",
                        message
                            .message
                            .unwrap_or_else(|| format!("Movie {} deleted", id))
                    );
                }
                Err(e) => {
                    ctx.note(|j| j.catalog_change("delete", &target, false));
                    return Err(e.into());
                }
            }
        }
        MoviesCommand::Upload { file, dry_run } => {
            ctx.require_session()?;
            let outcome = catalog::upload_csv(&*ctx.api, &file, dry_run, &Validator::current())?;
            let target = file.display().to_string();
            match outcome {
                UploadOutcome::Rejected(report) => {
                    print!("{}", render::validation_report(&report));
                    bail!("{} was not uploaded", target);
                }
                UploadOutcome::Validated(report) => {
                    print!("{}", render::validation_report(&report));
                    println!("Dry run: nothing uploaded");
                }
                UploadOutcome::Uploaded {
                    validation,
                    response,
                } => {
                    ctx.note(|j| j.catalog_change("upload", &target, true));
                    print!("{}", render::validation_report(&validation));
                    println!(
                        "{}",
                        response
                            .message
                            .unwrap_or_else(|| "Upload complete".to_string())
                    );
                    println!(
                        "  inserted {}, updated {}, skipped {}",
                        response.inserted, response.updated, response.skipped
                    );
                    for error in &response.errors {
                        println!("  - {}", error);
                    }
                }
            }
        }
    }
    Ok(())
}
