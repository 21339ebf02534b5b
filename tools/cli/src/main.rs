//! drivelink CLI - Command line interface for OneDrive operations.
//!
//! Every invocation signs in interactively, runs one command against the
//! drive and signs out again; tokens are never written to disk.

mod config;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use url::Url;

use drivelink_common::DrivePath;
use drivelink_storage::onedrive::{
    ConflictBehavior, DriveClient, DriveItem, DriveRoot, InteractiveDelegate,
    OAuthIdentityClient, TokenProvider,
};

use config::{CliConfig, CLIENT_ID_ENV};

#[derive(Parser)]
#[command(name = "drivelink")]
#[command(about = "drivelink - OneDrive file and folder operations")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (default: <config dir>/drivelink/config.json).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve paths against the application folder instead of the drive root.
    #[arg(short, long, global = true)]
    app: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether the application folder exists.
    AppRoot,

    /// Show an item's metadata.
    Stat {
        /// Path of the item.
        path: String,
    },

    /// List a folder.
    Ls {
        /// Folder path (default: root).
        #[arg(default_value = "/")]
        path: String,
    },

    /// Upload a local file.
    Put {
        /// Local file to upload.
        source: PathBuf,

        /// Destination path in the drive; a trailing '/' keeps the local name.
        dest: String,
    },

    /// Create a folder.
    Mkdir {
        /// Folder name.
        name: String,

        /// Parent folder path (default: root).
        #[arg(short, long, default_value = "/")]
        parent: String,

        /// Name collision policy: "fail", "replace", or "rename".
        #[arg(long, default_value = "fail")]
        conflict: ConflictBehavior,
    },

    /// Rename an item by ID.
    Rename {
        /// Item ID.
        id: String,

        /// New name.
        name: String,
    },

    /// Delete an item by ID.
    Rm {
        /// Item ID.
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(cli.config.as_deref())?;
    let root = if cli.app {
        DriveRoot::AppRoot
    } else {
        DriveRoot::Drive
    };

    let session = Session::open(config)?;
    let outcome = run(&session.client, root, cli.command).await;

    if let Err(e) = session.tokens.sign_out().await {
        warn!("Sign-out failed: {}", e);
    }

    outcome
}

fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    let config = match path {
        Some(path) => CliConfig::load(path)?,
        None => match CliConfig::default_path() {
            Some(path) => CliConfig::load(&path)?,
            None => CliConfig::default(),
        },
    };

    let config = config.with_client_id(std::env::var(CLIENT_ID_ENV).ok());
    if config.auth.client_id.is_empty() {
        anyhow::bail!(
            "No client ID configured. Set {} or add auth.client_id to the config file",
            CLIENT_ID_ENV
        );
    }

    Ok(config)
}

/// Signed-in drive access for one invocation.
struct Session {
    tokens: Arc<TokenProvider>,
    client: DriveClient,
}

impl Session {
    fn open(config: CliConfig) -> Result<Self> {
        let scopes = config.auth.scopes.clone();
        let identity = OAuthIdentityClient::from_config(config.auth, Arc::new(BrowserPrompt))
            .context("Invalid authentication settings")?;
        let tokens = Arc::new(TokenProvider::with_scopes(Arc::new(identity), scopes));
        let client =
            DriveClient::new(config.drive, tokens.clone()).context("Failed to create client")?;

        Ok(Self { tokens, client })
    }
}

/// Opens the sign-in page in a browser and reads the redirect URL from stdin.
struct BrowserPrompt;

#[async_trait]
impl InteractiveDelegate for BrowserPrompt {
    async fn authorize(&self, url: &Url) -> drivelink_common::Result<String> {
        println!("Sign in at:\n  {}\n", url);
        if let Err(e) = open::that(url.as_str()) {
            warn!("Could not open a browser: {}", e);
        }
        println!("After signing in, paste the URL you were redirected to:");

        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await?;
        Ok(line)
    }
}

async fn run(client: &DriveClient, root: DriveRoot, command: Commands) -> Result<()> {
    match command {
        Commands::AppRoot => cmd_app_root(client).await,

        Commands::Stat { path } => cmd_stat(client, root, &path).await,

        Commands::Ls { path } => cmd_ls(client, root, &path).await,

        Commands::Put { source, dest } => cmd_put(client, root, &source, &dest).await,

        Commands::Mkdir {
            name,
            parent,
            conflict,
        } => cmd_mkdir(client, root, &parent, &name, conflict).await,

        Commands::Rename { id, name } => cmd_rename(client, &id, &name).await,

        Commands::Rm { id } => cmd_rm(client, &id).await,
    }
}

async fn cmd_app_root(client: &DriveClient) -> Result<()> {
    let exists = client
        .app_root_exists()
        .await
        .context("Failed to query the application folder")?;

    if exists {
        println!("Application folder exists.");
    } else {
        println!("Application folder does not exist yet.");
    }
    Ok(())
}

fn print_item(item: &DriveItem) {
    let info = item.info();
    println!("  Name: {}", info.name);
    println!("  ID: {}", info.id);

    match item {
        DriveItem::File(file) => {
            println!("  Type: file");
            println!("  Size: {} bytes", file.size);
            if let Some(mime) = file.mime_type() {
                println!("  MIME type: {}", mime);
            }
        }
        DriveItem::Folder(folder) => {
            println!("  Type: folder");
            println!("  Children: {}", folder.child_count());
        }
    }

    if let Some(modified) = info.last_modified_date_time {
        println!("  Modified: {}", modified.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(url) = &info.web_url {
        println!("  URL: {}", url);
    }
}

async fn cmd_stat(client: &DriveClient, root: DriveRoot, path: &str) -> Result<()> {
    let item = client
        .get_item(root, path)
        .await
        .with_context(|| format!("Failed to get {}", path))?;

    println!("{}:", path);
    print_item(&item);
    Ok(())
}

async fn cmd_ls(client: &DriveClient, root: DriveRoot, path: &str) -> Result<()> {
    let items = client
        .list_children(root, path)
        .await
        .with_context(|| format!("Failed to list {}", path))?;

    if items.is_empty() {
        println!("Folder is empty.");
        return Ok(());
    }

    println!("Contents of {}:", path);
    for item in items {
        match item {
            DriveItem::Folder(folder) => {
                println!("  [DIR]  {}/ ({} items)", folder.info.name, folder.child_count())
            }
            DriveItem::File(file) => {
                println!("  [FILE] {} ({} bytes)", file.info.name, file.size)
            }
        }
    }
    Ok(())
}

/// Resolve where `source` lands; a folder-like `dest` gets the source's name.
fn upload_target(source: &Path, dest: &str) -> Result<String> {
    if !dest.ends_with('/') {
        return Ok(dest.to_string());
    }

    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("{} has no usable file name", source.display()))?;
    Ok(DrivePath::parse(dest)?.join(name)?.to_string())
}

async fn cmd_put(client: &DriveClient, root: DriveRoot, source: &Path, dest: &str) -> Result<()> {
    let dest = upload_target(source, dest)?;
    info!("Uploading {} to {}", source.display(), dest);

    let file = tokio::fs::File::open(source)
        .await
        .with_context(|| format!("Failed to open {}", source.display()))?;
    let len = file
        .metadata()
        .await
        .context("Failed to read file metadata")?
        .len();

    let uploaded = client
        .upload_stream(root, &dest, file, len)
        .await
        .context("Failed to upload file")?;

    println!("File uploaded successfully!");
    print_item(&DriveItem::File(uploaded));
    Ok(())
}

async fn cmd_mkdir(
    client: &DriveClient,
    root: DriveRoot,
    parent: &str,
    name: &str,
    conflict: ConflictBehavior,
) -> Result<()> {
    let folder = client
        .create_folder_in(root, parent, name, conflict)
        .await
        .with_context(|| format!("Failed to create folder {}", name))?;

    println!("Folder created successfully!");
    print_item(&DriveItem::Folder(folder));
    Ok(())
}

async fn cmd_rename(client: &DriveClient, id: &str, name: &str) -> Result<()> {
    client
        .rename_item(id, name)
        .await
        .with_context(|| format!("Failed to rename {}", id))?;

    println!("Renamed {} to {}", id, name);
    Ok(())
}

async fn cmd_rm(client: &DriveClient, id: &str) -> Result<()> {
    client
        .delete_item(id)
        .await
        .with_context(|| format!("Failed to delete {}", id))?;

    println!("Deleted {}", id);
    Ok(())
}
