use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use dfs_client::config::{Configuration, FS_DEFAULT_NAME_KEY};
use dfs_client::fs::remote::DEFAULT_NAMENODE_PORT;
use dfs_client::namenode::NameNodeServer;
use dfs_client::DfsClient;

// loaded in this order when no --conf is given
const DEFAULT_RESOURCES: [&str; 2] = ["hdfs-site.xml", "core-site.xml"];

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration resource to load, in order; repeatable
    #[arg(long = "conf", value_name = "FILE", global = true)]
    conf: Vec<PathBuf>,

    /// Override a configuration property
    #[arg(short = 'D', value_name = "KEY=VALUE", global = true)]
    define: Vec<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(flatten)]
    Fs(FsCommand),
    /// List /tmp/, upload a file there and list it again
    Demo {
        #[arg(long, default_value = "core-site.xml")]
        local: PathBuf,
        #[arg(long, default_value = "/tmp/")]
        dir: String,
    },
    /// Export a local directory as a namenode
    Namenode {
        #[arg(short, long, default_value_t = DEFAULT_NAMENODE_PORT)]
        port: u16,
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        bind: IpAddr,
        #[arg(long)]
        root: PathBuf,
    },
}

/// Operations forwarded to the configured filesystem.
#[derive(Subcommand, Debug)]
enum FsCommand {
    /// List a directory
    Ls { path: String },
    /// Create a directory unless it exists
    Mkdir { path: String },
    /// Delete a path recursively when the client closes
    Rmr { path: String },
    /// Upload a local file or directory
    Put { local: PathBuf, remote: String },
    /// Download a file or directory
    Get { remote: String, local: PathBuf },
    /// Print a file to stdout
    Cat { path: String },
    /// Create a file holding the given text
    Touch {
        path: String,
        #[arg(default_value = "")]
        content: String,
    },
}

fn load_configuration(args: &Args) -> anyhow::Result<Configuration> {
    let mut conf = Configuration::new();
    if args.conf.is_empty() {
        for name in DEFAULT_RESOURCES {
            match Configuration::locate_resource(name) {
                Some(path) => conf.add_resource(path)?,
                None => debug!("{} not found, skipping", name),
            }
        }
    } else {
        for path in &args.conf {
            conf.add_resource(path)
                .with_context(|| format!("loading {}", path.display()))?;
        }
    }
    for pair in &args.define {
        conf.set_pair(pair)?;
    }
    Ok(conf)
}

async fn run_demo(conf: &Configuration, local: PathBuf, dir: &str) -> anyhow::Result<()> {
    println!(
        "{}",
        conf.get(FS_DEFAULT_NAME_KEY).as_deref().unwrap_or("null")
    );
    let mut client = DfsClient::new(conf).await?;
    client.ls(dir).await?;
    client.copy_file(&local, dir).await?;
    client.ls(dir).await?;
    client.close().await?;
    Ok(())
}

async fn run_command(conf: &Configuration, command: FsCommand) -> anyhow::Result<()> {
    let mut client = DfsClient::new(conf)
        .await
        .with_context(|| format!("opening {}", conf.default_fs()))?;
    match command {
        FsCommand::Ls { path } => client.ls(&path).await?,
        FsCommand::Mkdir { path } => client.mkdir(&path).await?,
        FsCommand::Rmr { path } => client.rmr(&path).await?,
        FsCommand::Put { local, remote } => client.copy_file(&local, &remote).await?,
        FsCommand::Get { remote, local } => client.download(&remote, &local).await?,
        FsCommand::Cat { path } => client.cat(&path).await?,
        FsCommand::Touch { path, content } => client.create_file(&path, &content).await?,
    }
    client.close().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let conf = load_configuration(&args)?;

    match args.command {
        Command::Namenode { port, bind, root } => {
            let nameserver = NameNodeServer::new(SocketAddr::new(bind, port), root);
            nameserver.run_nameserver().await?;
            Ok(())
        }
        Command::Demo { local, dir } => run_demo(&conf, local, &dir).await,
        Command::Fs(command) => run_command(&conf, command).await,
    }
}
