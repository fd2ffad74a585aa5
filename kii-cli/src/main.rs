//! Kii Cloud command-line client
//!
//! Signs in, stores and fetches objects, runs bucket queries and moves file
//! bodies through one application on one site. The session token is kept
//! in a file between runs.
//!
//! Usage:
//!   kii --app-id APP --app-key KEY login alice secret
//!   kii object put scores points=10 player=alice
//!   kii query scores --where 'points>=10' --sort -points

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kii_cli::{build_query, fetch_file, parse_assignment, parse_expiry, resolve_site};
use kii_cloud::{Entity, FileTokenStore, Fields, KiiBucket, KiiClient, KiiConfig, KiiFileBucket};
use tracing::{debug, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "kii")]
#[command(about = "Command-line client for Kii Cloud applications")]
struct Args {
    /// Application id
    #[arg(long, env = "KII_APP_ID")]
    app_id: String,

    /// Application key
    #[arg(long, env = "KII_APP_KEY")]
    app_key: String,

    /// Site the application lives on (us, jp, cn, sg)
    #[arg(long, env = "KII_SITE", default_value = "us")]
    site: String,

    /// Explicit API base URL; overrides --site
    #[arg(long, env = "KII_BASE_URL")]
    base_url: Option<String>,

    /// File the session token is kept in between runs
    #[arg(long, env = "KII_TOKEN_FILE", default_value = "kii-session.json")]
    token_file: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a new user
    Register {
        username: String,
        password: String,
        #[arg(long)]
        email: Option<String>,
    },
    /// Sign in with a login name, email address or phone number
    Login { identifier: String, password: String },
    /// Forget the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Work with single objects
    #[command(subcommand)]
    Object(ObjectCommand),
    /// Query an object bucket
    Query {
        bucket: String,
        /// Filter such as `points>=10`; repeat to combine with AND
        #[arg(short = 'w', long = "where")]
        filters: Vec<String>,
        /// Sort field; prefix with `-` for descending
        #[arg(long, allow_hyphen_values = true)]
        sort: Option<String>,
        #[arg(long)]
        limit: Option<u32>,
        /// Follow pagination until every page is read
        #[arg(long)]
        all: bool,
        /// Use the signed-in user's bucket instead of the application's
        #[arg(long)]
        mine: bool,
    },
    /// Work with files
    #[command(subcommand)]
    File(FileCommand),
}

#[derive(Subcommand, Debug)]
enum ObjectCommand {
    /// Create an object, or update it when --id is given
    Put {
        bucket: String,
        #[arg(long)]
        id: Option<String>,
        /// Field assignments `key=value`; values are read as JSON when possible
        fields: Vec<String>,
        #[arg(long)]
        mine: bool,
    },
    /// Print an object
    Get { uri: String },
    /// Delete an object
    Delete { uri: String },
}

#[derive(Subcommand, Debug)]
enum FileCommand {
    /// Upload a local file
    Upload {
        bucket: String,
        path: PathBuf,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        mine: bool,
    },
    /// Download a file body
    Download { uri: String, to: PathBuf },
    /// Move a file to the trash
    Trash { uri: String },
    /// Take a file out of the trash
    Restore { uri: String },
    /// Delete a file for good
    Shred { uri: String },
    /// Print a public download URL
    Publish {
        uri: String,
        /// RFC 3339 time or lifetime such as `12h` or `7d`
        #[arg(long)]
        expires: Option<String>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let site = resolve_site(&args.site, args.base_url.as_deref())?;
    let config = KiiConfig::new(&args.app_id, &args.app_key).with_site(site);
    let client = KiiClient::builder(config)
        .token_store(Arc::new(FileTokenStore::new(&args.token_file)))
        .build()
        .context("failed to set up the client")?;
    debug!(token_file = %args.token_file.display(), "client ready");

    match args.command {
        Command::Register { username, password, email } => {
            let mut user = match email {
                Some(email) => client.user_with_username_and_email(&username, &email, &password)?,
                None => client.user_with_username(&username, &password)?,
            };
            user.perform_registration_blocking().context("registration failed")?;
            println!("registered {}", user.object_uri()?);
        }
        Command::Login { identifier, password } => {
            let user = client
                .authenticate_blocking(&identifier, &password)
                .context("sign-in failed")?;
            println!("signed in as {}", user.username().unwrap_or(&identifier));
        }
        Command::Logout => {
            client.logout()?;
            println!("signed out");
        }
        Command::Whoami => {
            restore_session(&client);
            let Some(user) = client.current_user() else {
                bail!("not signed in");
            };
            println!("{}", user.describe());
        }
        Command::Object(command) => {
            restore_session(&client);
            run_object(&client, command)?;
        }
        Command::Query { bucket, filters, sort, limit, all, mine } => {
            restore_session(&client);
            let query = build_query(&filters, sort.as_deref(), limit)?;
            let mut bucket = object_bucket(&client, &bucket, mine)?;
            let objects = if all {
                let mut objects = Vec::new();
                let mut key: Option<String> = None;
                loop {
                    let page = bucket.execute_query_blocking(&query, key.as_deref())?;
                    objects.extend(page.results);
                    match page.next_pagination_key {
                        Some(next) => key = Some(next),
                        None => break,
                    }
                }
                objects
            } else {
                bucket.execute_query_blocking(&query, None)?.results
            };
            for object in &objects {
                println!("{}", object.describe());
            }
            debug!(count = objects.len(), "query finished");
        }
        Command::File(command) => {
            restore_session(&client);
            run_file(&client, command)?;
        }
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    // RUST_LOG wins over --verbose when set.
    match EnvFilter::try_from_default_env() {
        Ok(filter) => FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .init(),
        Err(_) => FmtSubscriber::builder()
            .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .init(),
    }
}

/// Signs back in with the stored token. A stale token is reported and the
/// command continues with application credentials only.
fn restore_session(client: &KiiClient) {
    match client.restore_session_blocking() {
        Ok(Some(user)) => debug!(user = ?user.uuid(), "session restored"),
        Ok(None) => debug!("no stored session"),
        Err(e) => warn!("stored session could not be restored: {e}"),
    }
}

fn object_bucket(client: &KiiClient, name: &str, mine: bool) -> Result<KiiBucket> {
    if mine {
        let user = client.current_user().context("--mine needs a signed-in user")?;
        return Ok(user.bucket(name)?);
    }
    Ok(client.bucket(name)?)
}

fn file_bucket(client: &KiiClient, name: &str, mine: bool) -> Result<KiiFileBucket> {
    if mine {
        let user = client.current_user().context("--mine needs a signed-in user")?;
        return Ok(user.file_bucket(name)?);
    }
    Ok(client.file_bucket(name)?)
}

fn run_object(client: &KiiClient, command: ObjectCommand) -> Result<()> {
    match command {
        ObjectCommand::Put { bucket, id, fields, mine } => {
            let bucket = object_bucket(client, &bucket, mine)?;
            let mut object = match id {
                Some(id) => bucket.object_with_id(&id)?,
                None => bucket.create_object(),
            };
            for raw in &fields {
                let (key, value) = parse_assignment(raw)?;
                object
                    .set_field(&key, value)
                    .with_context(|| format!("cannot set field {key:?}"))?;
            }
            object.save_blocking().context("save failed")?;
            println!("{}", object.object_uri()?);
        }
        ObjectCommand::Get { uri } => {
            let mut object = client.object_with_uri(&uri)?;
            object.refresh_blocking().with_context(|| format!("cannot fetch {uri}"))?;
            println!("{}", object.describe());
        }
        ObjectCommand::Delete { uri } => {
            let mut object = client.object_with_uri(&uri)?;
            object.delete_blocking().with_context(|| format!("cannot delete {uri}"))?;
            println!("deleted {uri}");
        }
    }
    Ok(())
}

fn run_file(client: &KiiClient, command: FileCommand) -> Result<()> {
    match command {
        FileCommand::Upload { bucket, path, title, mine } => {
            let bucket = file_bucket(client, &bucket, mine)?;
            let mut file = bucket.file_with_local_path(&path);
            if let Some(title) = title {
                file.set_title(&title)?;
            }
            file.save_file_blocking()
                .with_context(|| format!("upload of {} failed", path.display()))?;
            println!("{}", file.object_uri()?);
        }
        FileCommand::Download { uri, to } => {
            let mut file = client.file_with_uri(&uri)?;
            file.get_body_blocking(&to)
                .with_context(|| format!("download of {uri} failed"))?;
            println!("saved {}", to.display());
        }
        FileCommand::Trash { uri } => {
            let mut file = fetch_file(client, &uri)?;
            file.move_to_trash_blocking()?;
            println!("trashed {uri}");
        }
        FileCommand::Restore { uri } => {
            let mut file = fetch_file(client, &uri)?;
            file.restore_from_trash_blocking()?;
            println!("restored {uri}");
        }
        FileCommand::Shred { uri } => {
            let mut file = fetch_file(client, &uri)?;
            file.shred_blocking()?;
            println!("shredded {uri}");
        }
        FileCommand::Publish { uri, expires } => {
            let expires_at = expires
                .as_deref()
                .map(|raw| parse_expiry(raw, chrono::Utc::now()))
                .transpose()?;
            let mut file = fetch_file(client, &uri)?;
            println!("{}", file.publish_blocking(expires_at)?);
        }
    }
    Ok(())
}
