use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod api;
mod chat;
mod config;
mod console;
mod db;
mod error;
mod guard;
mod models;
mod persona;
mod report;
mod risk;
mod session;
mod survey;

use api::ApiClient;
use config::Config;
use console::Console;
use db::SessionStore;
use error::ApiError;
use guard::{Navigator, Outcome, Route};
use models::{Credentials, HealthProfile, ModelKind};
use session::SessionManager;
use survey::Wizard;

#[derive(Parser)]
#[command(name = "risk-client")]
#[command(about = "Diabetes risk survey, results and history from the terminal", long_about = None)]
struct Cli {
    /// Base URL of the prediction service (overrides RISK_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Session database file (overrides RISK_STORE_PATH)
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Register {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Log in and remember the session
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Forget the stored session
    Logout,
    /// Show the logged-in account
    Whoami,
    /// Take the risk survey
    Survey {
        /// CSV file with `question,value` rows instead of prompting
        #[arg(long)]
        answers: Option<PathBuf>,
    },
    /// Saved results
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
    /// Health data kept with the account
    Profile {
        #[command(subcommand)]
        command: ProfileCommand,
    },
    /// Talk to the health assistant
    Chat,
    /// Describe the prediction models
    Models {
        /// Model key, e.g. `random_forest`, for the full description
        key: Option<String>,
    },
}

#[derive(Subcommand)]
enum HistoryCommand {
    List {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    Delete {
        id: i64,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Write a markdown report of past results
    Report {
        #[arg(long, default_value_t = 50)]
        limit: u32,
        #[arg(long, default_value = "history.md")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum ProfileCommand {
    Show,
    Set {
        #[arg(long)]
        age: Option<u32>,
        /// 0 for female, 1 for male
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=1))]
        sex: Option<u8>,
        /// Height in centimetres
        #[arg(long)]
        height: Option<f64>,
        /// Weight in kilograms
        #[arg(long)]
        weight: Option<f64>,
    },
}

impl Commands {
    fn route(&self) -> Route {
        match self {
            Self::Register { .. } => Route::Register,
            Self::Login { .. } => Route::Login,
            Self::Logout | Self::Chat => Route::Home,
            Self::Whoami => Route::Account,
            Self::Survey { .. } => Route::RiskPredictor,
            Self::History { .. } => Route::History,
            Self::Profile { .. } => Route::Profile,
            Self::Models { .. } => Route::Models,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "debug" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::from_env()?.with_overrides(cli.api_url, cli.store);
    debug!(api_url = %config.api_url, store = %config.store_path.display(), "configuration loaded");

    let store = SessionStore::open(&config.store_path)
        .await
        .with_context(|| format!("failed to open session store {}", config.store_path.display()))?;
    let api = ApiClient::new(config.api_url.clone(), config.request_timeout)
        .context("failed to build HTTP client")?;

    let mut session = SessionManager::new(store);
    session.initialize(&api).await;

    let mut nav = Navigator::default();
    if !admit(&mut nav, cli.command.route(), &session) {
        return Ok(());
    }

    match run(cli.command, &api, &mut session, &mut nav).await {
        Err(ref err) if err.downcast_ref::<ApiError>().is_some_and(ApiError::requires_login) => {
            eprintln!("Your session has expired. Log in again with `risk-client login`.");
            std::process::exit(1);
        }
        result => result,
    }
}

/// Applies the route guard and explains any redirect.
fn admit(nav: &mut Navigator, route: Route, session: &SessionManager) -> bool {
    let outcome = nav.navigate(route, session.state());
    if outcome == Outcome::Render && nav.current() == route {
        return true;
    }

    match (outcome, nav.current()) {
        (Outcome::Loading, _) => println!("Loading session, try again in a moment."),
        (_, Route::Login) => println!("Please log in first: risk-client login --email <EMAIL> --password <PASSWORD>"),
        (_, Route::Account) => match session.current_user() {
            Some(user) => println!("Already logged in as {}. Run `risk-client logout` first.", user.email),
            None => println!("Already logged in."),
        },
        (_, other) => println!("Redirected to {other}."),
    }
    false
}

async fn run(
    command: Commands,
    api: &ApiClient,
    session: &mut SessionManager,
    nav: &mut Navigator,
) -> anyhow::Result<()> {
    match command {
        Commands::Register { email, password } => {
            let message = api
                .register(&Credentials { email, password })
                .await
                .context("registration failed")?;
            println!("{message}");
            println!("You can now log in with `risk-client login`.");
        }
        Commands::Login { email, password } => {
            let user = api
                .login(session, &Credentials { email, password })
                .await
                .context("login failed")?;
            println!("Logged in as {}.", user.email);
        }
        Commands::Logout => {
            // Also clears a stored session that could not be verified at startup.
            let was_logged_in = session.is_logged_in();
            session.logout().await.context("failed to clear session")?;
            if was_logged_in {
                println!("Logged out.");
            } else {
                println!("Not logged in.");
            }
        }
        Commands::Whoami => {
            if let Some(user) = session.current_user() {
                println!("{} (id {})", user.email, user.id);
            }
        }
        Commands::Survey { answers } => {
            let mut console = Console::new(io::stdin().lock(), io::stdout());
            let mut wizard = Wizard::new();

            if let Some(path) = answers {
                let answers = survey::read_answers_csv(&path)?;
                survey::apply_answers(&mut wizard, &answers)?;
            } else if !console.fill_wizard(&mut wizard)? {
                println!("Survey cancelled.");
                return Ok(());
            }

            loop {
                let (ticket, request) = wizard.begin_submit()?;
                match api.predict(session, &request).await {
                    Ok(response) => {
                        wizard.finish_submit(ticket, Ok(()));
                        nav.navigate(Route::PredictionResult, session.state());
                        print!("{}", report::render_prediction(&response));
                        return Ok(());
                    }
                    Err(err) => {
                        wizard.finish_submit(ticket, Err(err.to_string()));
                        if err.requires_login() {
                            return Err(err.into());
                        }
                        eprintln!("Submission failed: {err}");
                        if !console.confirm("Your answers are kept. Try again?")? {
                            return Err(err).context("prediction failed");
                        }
                    }
                }
            }
        }
        Commands::History { command } => run_history(command, api, session).await?,
        Commands::Profile { command } => run_profile(command, api, session).await?,
        Commands::Chat => {
            let mut chat = chat::ChatSession::new();
            Console::new(io::stdin().lock(), io::stdout()).run_chat(&mut chat)?;
        }
        Commands::Models { key: None } => print!("{}", report::render_models()),
        Commands::Models { key: Some(key) } => {
            let kind: ModelKind = key.parse()?;
            print!("{}", report::render_persona(persona::persona(kind)));
        }
    }

    Ok(())
}

async fn run_history(
    command: HistoryCommand,
    api: &ApiClient,
    session: &mut SessionManager,
) -> anyhow::Result<()> {
    match command {
        HistoryCommand::List { limit } => {
            let records = api
                .history(session, limit)
                .await
                .context("failed to load history")?;
            print!("{}", report::render_history(&records));
        }
        HistoryCommand::Delete { id, yes } => {
            let mut console = Console::new(io::stdin().lock(), io::stdout());
            if delete_record(&mut console, api, session, id, yes).await? {
                println!("Deleted record {id}.");
            } else {
                println!("Kept record {id}.");
            }
        }
        HistoryCommand::Report { limit, out } => {
            let records = api
                .history(session, limit)
                .await
                .context("failed to load history")?;
            let email = session
                .current_user()
                .map(|user| user.email.clone())
                .unwrap_or_default();
            let report = report::build_history_report(&email, Utc::now(), &records);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }
    Ok(())
}

/// Deletes one history record once the user agrees.
async fn delete_record<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    api: &ApiClient,
    session: &mut SessionManager,
    id: i64,
    assume_yes: bool,
) -> anyhow::Result<bool> {
    if !assume_yes && !console.confirm(&format!("Delete record {id}? This cannot be undone."))? {
        return Ok(false);
    }
    api.delete_history(session, id)
        .await
        .with_context(|| format!("failed to delete record {id}"))?;
    Ok(true)
}

async fn run_profile(
    command: ProfileCommand,
    api: &ApiClient,
    session: &mut SessionManager,
) -> anyhow::Result<()> {
    match command {
        ProfileCommand::Show => {
            let profile = api
                .fetch_profile(session)
                .await
                .context("failed to load profile")?;
            let summary = risk::summarize_profile(&profile, Utc::now().date_naive());
            print!("{}", report::render_profile(&profile, &summary));
        }
        ProfileCommand::Set {
            age,
            sex,
            height,
            weight,
        } => {
            let current = api
                .fetch_profile(session)
                .await
                .context("failed to load profile")?;
            let updated = HealthProfile {
                age: age.or(current.age),
                sex: sex.or(current.sex),
                height: height.or(current.height),
                weight: weight.or(current.weight),
                ..current
            };
            let message = api
                .update_profile(session, &updated)
                .await
                .context("failed to save profile")?;
            println!("{message}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::models::{BearerToken, User, UserId};

    async fn logged_in() -> SessionManager {
        let mut session = SessionManager::new(SessionStore::in_memory().await.unwrap());
        session
            .login(
                BearerToken::parse("tok-1").unwrap(),
                None,
                User {
                    id: UserId::Number(7),
                    email: "jan@example.com".to_string(),
                },
            )
            .await
            .unwrap();
        session
    }

    async fn delete_with_answer(answer: &str, assume_yes: bool, expected_calls: u64) -> bool {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/history/4"))
            .respond_with(ResponseTemplate::new(200))
            .expect(expected_calls)
            .mount(&server)
            .await;
        let api = ApiClient::new(format!("{}/api", server.uri()), Duration::from_secs(5)).unwrap();
        let mut session = logged_in().await;
        let mut output = Vec::new();
        let mut console = Console::new(answer.as_bytes(), &mut output);

        delete_record(&mut console, &api, &mut session, 4, assume_yes)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn declined_delete_sends_nothing() {
        assert!(!delete_with_answer("n\n", false, 0).await);
        assert!(!delete_with_answer("", false, 0).await);
    }

    #[tokio::test]
    async fn confirmed_delete_reaches_the_backend() {
        assert!(delete_with_answer("y\n", false, 1).await);
        assert!(delete_with_answer("", true, 1).await);
    }
}
