use std::{error::Error, path::Path, process, sync::Arc};

use clap::{command, Parser, Subcommand, ValueHint};
use log::{debug, error, info, warn, LevelFilter};
use url::Url;
use veil::Redact;

use tonearm::{
    client::Tonearm,
    config::Config,
    credentials::SessionId,
    playback::Command,
    session::{FileStore, SessionStore},
    sync::PollStatus,
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Hash, PartialEq, Eq, Parser, Redact)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Secrets file
    ///
    /// Holds the application's client id and secret. Keep it private.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("secrets.toml"))]
    secrets_file: String,

    /// Session file
    ///
    /// Where credentials are kept between invocations after `login`. Keep it
    /// private: it grants access to your Spotify account.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath, default_value_t = String::from("sessions.toml"))]
    sessions_file: String,

    /// Application client id, overriding the secrets file
    #[arg(long, env = "TONEARM_CLIENT_ID")]
    client_id: Option<String>,

    /// Application client secret, overriding the secrets file
    #[arg(long, env = "TONEARM_CLIENT_SECRET", hide_env_values = true)]
    #[redact]
    client_secret: Option<String>,

    /// Redirect URI registered for the application
    #[arg(long, env = "TONEARM_REDIRECT_URI", value_hint = ValueHint::Url)]
    redirect_uri: Option<Url>,

    /// Market (ISO 3166-1 alpha-2 country code) for catalog results
    #[arg(long, env = "TONEARM_MARKET")]
    market: Option<String>,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,

    #[command(subcommand)]
    command: Action,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, Subcommand)]
enum Action {
    /// Print the URL to log in with
    Authorize,

    /// Complete a login with the code or callback URL from `authorize`
    Login { code: String },

    /// Search the catalog; works without logging in
    Search {
        #[arg(required = true)]
        query: Vec<String>,
    },

    /// Show what is playing
    NowPlaying,

    /// Follow playback until interrupted
    Watch,

    /// Resume, or play a track URI
    Play { uri: Option<String> },

    /// Pause playback
    Pause,

    /// Skip to the next track
    Next,

    /// Skip to the previous track
    Previous,

    /// Set the volume
    Volume {
        #[arg(value_parser = clap::value_parser!(u8).range(0..=100))]
        percent: u8,
    },

    /// List available devices
    Devices,

    /// Forget the stored credentials
    Logout,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            0 => {
                // Quiet and verbose are mutually exclusive, and `verbose` is 0
                // by default. So this arm means: quiet mode.
                LevelFilter::Warn
            }
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
        logger.filter_module("tonearm", level);
    }

    logger.init();
}

/// Loads the configuration from the secrets file and command line.
///
/// A missing secrets file is not an error: guest search then reports what is
/// missing once it is needed.
fn load_config(args: &Args) -> tonearm::error::Result<Config> {
    let mut config = if Path::new(&args.secrets_file).exists() {
        Config::from_file(&args.secrets_file)?
    } else {
        info!(
            "{} not found; using command line and environment only",
            args.secrets_file
        );
        Config::new()?
    };

    if args.client_id.is_some() {
        config.client_id.clone_from(&args.client_id);
    }
    if args.client_secret.is_some() {
        config.client_secret.clone_from(&args.client_secret);
    }
    if args.redirect_uri.is_some() {
        config.redirect_uri.clone_from(&args.redirect_uri);
    }
    if args.market.is_some() {
        config.market.clone_from(&args.market);
    }

    Ok(config)
}

/// Extracts the authorization code from a bare code or a callback URL.
fn authorization_code(input: &str) -> Result<String, Box<dyn Error>> {
    let Ok(url) = Url::parse(input) else {
        return Ok(input.to_owned());
    };

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => return Err(format!("login was denied: {value}").into()),
            _ => {}
        }
    }

    code.ok_or_else(|| "callback URL carries no code".into())
}

/// Main application logic.
///
/// # Errors
///
/// This function returns an error when the command failed; see
/// [`tonearm::error::ErrorKind`] for the possible causes.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let config = load_config(&args)?;
    let store = Arc::new(FileStore::new(&args.sessions_file));
    let tonearm = Tonearm::new(config, Arc::clone(&store) as Arc<dyn SessionStore>)?;
    let session = SessionId::local();

    match args.command {
        Action::Authorize => {
            let (url, _state) = tonearm.authorize_url()?;
            println!("{url}");
        }

        Action::Login { code } => {
            let code = authorization_code(&code)?;
            let pair = tonearm.login(session, &code).await?;
            let profile = tonearm.profile(Some(&pair)).await?;
            info!(
                "logged in as {}",
                profile.value.display_name.as_deref().unwrap_or(&profile.value.id)
            );
            if !profile.value.is_premium() {
                warn!("playback control requires a premium subscription");
            }
        }

        Action::Search { query } => {
            let pair = store.load(session)?;
            let results = tonearm.search(&query.join(" "), pair.as_ref()).await?;
            tonearm.persist(session, results.updated.as_ref())?;
            debug!("searched as {:?}", results.mode);

            for track in results.value {
                println!("{}  {} - {}", track.uri, track.artist_names(), track.name);
            }
        }

        Action::NowPlaying => {
            let access = tonearm.session_access(session).await?;
            match tonearm.playback_view(&access).await? {
                Some(view) => println!("{view}"),
                None => println!("nothing playing"),
            }
        }

        Action::Watch => {
            let mut views = tonearm.watch(session).await;
            loop {
                tokio::select! {
                    // Prioritize shutdown signals.
                    biased;

                    _ = tokio::signal::ctrl_c() => {
                        info!("shutting down gracefully");
                        tonearm.unwatch(session).await;
                        break;
                    }

                    changed = views.changed() => {
                        if changed.is_err() {
                            break;
                        }

                        let snapshot = views.borrow_and_update().clone();
                        match (snapshot.status, snapshot.view) {
                            (PollStatus::Stopped, _) => break,
                            (PollStatus::Ok, Some(view)) => println!("{view}"),
                            (PollStatus::Ok, None) => println!("nothing playing"),
                            _ => {}
                        }
                    }
                }
            }
        }

        Action::Devices => {
            let access = tonearm.session_access(session).await?;
            for device in tonearm.devices(&access).await? {
                let marker = if device.is_active { "*" } else { " " };
                println!(
                    "{marker} {}  {} ({})",
                    device.id.as_deref().unwrap_or("-"),
                    device.name,
                    device.kind
                );
            }
        }

        Action::Logout => {
            tonearm.logout(session).await?;
        }

        Action::Play { uri: Some(uri) } => {
            control(&tonearm, session, Command::play_track(uri)).await?;
        }
        Action::Play { uri: None } => control(&tonearm, session, Command::resume()).await?,
        Action::Pause => control(&tonearm, session, Command::Pause).await?,
        Action::Next => control(&tonearm, session, Command::Next).await?,
        Action::Previous => control(&tonearm, session, Command::Previous).await?,
        Action::Volume { percent } => {
            control(&tonearm, session, Command::Volume(percent)).await?;
        }
    }

    Ok(())
}

/// Sends a transport command and prints the state it settled in.
async fn control(
    tonearm: &Tonearm,
    session: SessionId,
    command: Command,
) -> Result<(), Box<dyn Error>> {
    let access = tonearm.session_access(session).await?;
    match tonearm
        .control_playback_settled(session, &access, command)
        .await?
    {
        Some(view) => println!("{view}"),
        None => println!("nothing playing"),
    }

    Ok(())
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and runs the requested command.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    debug!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
